use std::sync::Arc;

use tokio::time::timeout;
use tracing::{info, warn};

use crate::orchestrator::config::SessionConfig;
use crate::orchestrator::error::SessionError;
use crate::orchestrator::runtime::{self, DebateSessionHandle};
use crate::orchestrator::traits::{DebateService, EventStream};
use crate::orchestrator::types::{DebateSession, DebateSetup};

pub struct DebateOrchestrator {
    config: SessionConfig,
    service: Arc<dyn DebateService>,
}

impl DebateOrchestrator {
    pub fn new(config: SessionConfig, service: Arc<dyn DebateService>) -> Self {
        Self { config, service }
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    pub fn service(&self) -> Arc<dyn DebateService> {
        Arc::clone(&self.service)
    }

    /// Creates the remote debate, opens its event stream, asks the service to
    /// begin, and hands the stream to a session worker.
    ///
    /// Every remote call is bounded by the local or remote request timeout,
    /// picked from the setup's participants.
    pub async fn start_session(
        &self,
        setup: &DebateSetup,
    ) -> Result<DebateSessionHandle, SessionError> {
        setup.validate()?;
        let bound = self.config.request_timeout_for(setup);
        let request = setup.to_request();

        info!(
            target: "debate_orchestrator",
            topic = %setup.topic,
            format = setup.format.as_str(),
            participants = setup.participants.len(),
            judges = setup.judging.judge_models.len(),
            local = setup.has_local_participant(),
            ?bound,
            "creating debate"
        );

        let created = match timeout(bound, self.service.create_debate(&request)).await {
            Ok(Ok(created)) => created,
            Ok(Err(err)) => {
                return Err(SessionError::CreateFailed {
                    reason: format!("{err:#}"),
                })
            }
            Err(_) => return Err(SessionError::CreateTimedOut { timeout: bound }),
        };
        let session_id = created.id.clone();

        let mut stream = match timeout(bound, self.service.open_stream(&session_id)).await {
            Ok(Ok(stream)) => stream,
            Ok(Err(err)) => {
                return Err(SessionError::StreamOpenFailed {
                    session_id,
                    reason: format!("{err:#}"),
                })
            }
            Err(_) => {
                return Err(SessionError::StreamOpenTimedOut {
                    session_id,
                    timeout: bound,
                })
            }
        };

        // The stream is opened first so no early event is missed.
        let started = match timeout(bound, self.service.start_debate(&session_id)).await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(err)) => Err(format!("{err:#}")),
            Err(_) => Err(format!("no answer within {bound:?}")),
        };
        if let Err(reason) = started {
            close_quietly(&session_id, &mut *stream).await;
            return Err(SessionError::StartFailed { session_id, reason });
        }

        info!(
            target: "debate_orchestrator",
            %session_id,
            status = %created.status,
            "debate streaming"
        );

        let session = DebateSession::new(session_id, setup);
        Ok(runtime::spawn_session(
            self.config.clone(),
            setup.clone(),
            session,
            stream,
        ))
    }

    /// Models the service can run. Bounded by the remote request timeout.
    pub async fn list_models(&self) -> anyhow::Result<Vec<String>> {
        let bound = self.config.request_timeout_remote;
        timeout(bound, self.service.list_models())
            .await
            .map_err(|_| anyhow::anyhow!("model listing did not answer within {bound:?}"))?
    }
}

async fn close_quietly(session_id: &str, stream: &mut dyn EventStream) {
    if let Err(err) = stream.close().await {
        warn!(
            target: "debate_orchestrator",
            %session_id,
            %err,
            "failed to close event stream after start failure"
        );
    }
}
