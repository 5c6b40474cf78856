use std::time::Duration;

use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tracing::warn;

use crate::orchestrator::error::SessionError;
use crate::orchestrator::types::{SessionRecord, SessionUpdate};

use super::worker::SessionCommand;

/// Cheap cloneable way to stop a running session from elsewhere.
#[derive(Clone)]
pub struct SessionCanceller {
    command_tx: mpsc::Sender<SessionCommand>,
}

impl SessionCanceller {
    /// Returns false when the session had already finished.
    pub async fn cancel(&self) -> bool {
        self.command_tx.send(SessionCommand::Cancel).await.is_ok()
    }
}

pub struct DebateSessionHandle {
    session_id: String,
    close_grace: Duration,
    command_tx: mpsc::Sender<SessionCommand>,
    updates_tx: broadcast::Sender<SessionUpdate>,
    worker: Option<JoinHandle<SessionRecord>>,
    reader: Option<JoinHandle<()>>,
}

impl DebateSessionHandle {
    pub(super) fn new(
        session_id: String,
        close_grace: Duration,
        command_tx: mpsc::Sender<SessionCommand>,
        updates_tx: broadcast::Sender<SessionUpdate>,
        worker: JoinHandle<SessionRecord>,
        reader: JoinHandle<()>,
    ) -> Self {
        Self {
            session_id,
            close_grace,
            command_tx,
            updates_tx,
            worker: Some(worker),
            reader: Some(reader),
        }
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    /// Live updates from this point on.
    pub fn subscribe(&self) -> broadcast::Receiver<SessionUpdate> {
        self.updates_tx.subscribe()
    }

    pub fn canceller(&self) -> SessionCanceller {
        SessionCanceller {
            command_tx: self.command_tx.clone(),
        }
    }

    pub async fn cancel(&self) -> bool {
        self.canceller().cancel().await
    }

    /// Waits for the session to reach a terminal state and the stream to close.
    pub async fn wait(mut self) -> Result<SessionRecord, SessionError> {
        let worker = self.worker.take().ok_or_else(|| SessionError::WorkerFailed {
            session_id: self.session_id.clone(),
            reason: "session worker already consumed".to_string(),
        })?;

        let record = worker.await.map_err(|err| SessionError::WorkerFailed {
            session_id: self.session_id.clone(),
            reason: err.to_string(),
        })?;

        if let Some(reader) = self.reader.take() {
            let abort = reader.abort_handle();
            if timeout(self.close_grace, reader).await.is_err() {
                warn!(
                    target: "debate_orchestrator",
                    session_id = %self.session_id,
                    grace = ?self.close_grace,
                    "event stream did not close in time; aborting reader"
                );
                abort.abort();
            }
        }

        Ok(record)
    }
}

impl Drop for DebateSessionHandle {
    fn drop(&mut self) {
        if let Some(worker) = self.worker.take() {
            worker.abort();
        }
        if let Some(reader) = self.reader.take() {
            reader.abort();
        }
    }
}
