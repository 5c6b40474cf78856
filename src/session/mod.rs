//! End-to-end debate runs: stream, judge, persist, and report lifecycle progress.

pub mod lifecycle;
mod transcript;

pub use transcript::ResolvedJudging;

use std::sync::Arc;
use std::time::Instant;

use tokio::sync::broadcast;
use tracing::{debug, info, warn};

use crate::judging::{aggregate, EnsembleSummary, JudgeDecision};
use crate::orchestrator::{
    DebateOrchestrator, DebateSessionHandle, DebateSetup, SessionError, SessionRecord,
};
use crate::persistence::{DebateTranscript, TranscriptSink, TranscriptStatus};
use crate::session::lifecycle::{SessionLifecyclePhase, SessionLifecycleUpdate};
use crate::session::transcript::assemble_transcript;
use crate::telemetry::events::{
    record_judging_resolved, record_transcript_save_failed, record_transcript_saved,
};

const LIFECYCLE_CAPACITY: usize = 32;

/// How a session with out-of-order turns is stored.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum SuspectPolicy {
    #[default]
    PersistNormally,
    /// Store it like an errored session: no ensemble summary, status `partial`.
    TreatAsPartial,
}

/// Outcome of one stored debate.
#[derive(Debug, Clone, PartialEq)]
pub struct DebateReport {
    pub debate_id: i64,
    pub session_id: String,
    pub status: TranscriptStatus,
    pub termination: String,
    pub suspect: bool,
    pub final_phase: String,
    pub message_count: usize,
    pub ensemble: Option<EnsembleSummary>,
    pub excluded_judge_decisions: usize,
}

impl DebateReport {
    fn new(debate_id: i64, transcript: &DebateTranscript) -> Self {
        let metadata = &transcript.metadata;
        Self {
            debate_id,
            session_id: metadata.context.remote_session_id.clone(),
            status: metadata.context.status,
            termination: metadata.context.termination.clone(),
            suspect: metadata.context.suspect,
            final_phase: metadata.final_phase.clone(),
            message_count: metadata.message_count,
            ensemble: transcript.ensemble.clone(),
            excluded_judge_decisions: metadata.context.excluded_judge_decisions,
        }
    }

    pub fn is_partial(&self) -> bool {
        self.status == TranscriptStatus::Partial
    }
}

pub struct DebateSessionManager {
    orchestrator: DebateOrchestrator,
    sink: Arc<dyn TranscriptSink>,
    suspect_policy: SuspectPolicy,
    lifecycle_tx: broadcast::Sender<SessionLifecycleUpdate>,
}

impl DebateSessionManager {
    pub fn new(orchestrator: DebateOrchestrator, sink: Arc<dyn TranscriptSink>) -> Self {
        let (lifecycle_tx, _) = broadcast::channel(LIFECYCLE_CAPACITY);
        Self {
            orchestrator,
            sink,
            suspect_policy: SuspectPolicy::default(),
            lifecycle_tx,
        }
    }

    pub fn with_suspect_policy(mut self, policy: SuspectPolicy) -> Self {
        self.suspect_policy = policy;
        self
    }

    pub fn orchestrator(&self) -> &DebateOrchestrator {
        &self.orchestrator
    }

    pub fn subscribe_lifecycle(&self) -> broadcast::Receiver<SessionLifecycleUpdate> {
        self.lifecycle_tx.subscribe()
    }

    fn emit_lifecycle(&self, update: SessionLifecycleUpdate) {
        if self.lifecycle_tx.send(update).is_err() {
            debug!(
                target: "session_manager",
                "no lifecycle subscribers"
            );
        }
    }

    /// Creates the debate and starts streaming it. Use the returned handle to
    /// watch or cancel, then pass it to [`DebateSessionManager::complete`].
    pub async fn start(&self, setup: &DebateSetup) -> Result<DebateSessionHandle, SessionError> {
        self.emit_lifecycle(SessionLifecycleUpdate::new(
            None,
            SessionLifecyclePhase::Creating,
        ));

        match self.orchestrator.start_session(setup).await {
            Ok(handle) => {
                self.emit_lifecycle(SessionLifecycleUpdate::new(
                    Some(handle.session_id()),
                    SessionLifecyclePhase::Streaming,
                ));
                Ok(handle)
            }
            Err(err) => {
                warn!(target: "session_manager", %err, "debate did not start");
                self.emit_lifecycle(SessionLifecycleUpdate::failed(
                    None,
                    err.kind(),
                    err.to_string(),
                    false,
                ));
                Err(err)
            }
        }
    }

    /// Runs one debate to its terminal state and stores whatever it produced.
    pub async fn run_debate(&self, setup: &DebateSetup) -> Result<DebateReport, SessionError> {
        let handle = self.start(setup).await?;
        self.complete(handle).await
    }

    /// Waits for a started session, then judges and persists it.
    pub async fn complete(&self, handle: DebateSessionHandle) -> Result<DebateReport, SessionError> {
        let session_id = handle.session_id().to_string();
        match handle.wait().await {
            Ok(record) => self.finalize(record).await,
            Err(err) => {
                self.emit_lifecycle(SessionLifecycleUpdate::failed(
                    Some(&session_id),
                    err.kind(),
                    err.to_string(),
                    false,
                ));
                Err(err)
            }
        }
    }

    /// Aggregates judging and persists the record, partial or not.
    pub async fn finalize(&self, record: SessionRecord) -> Result<DebateReport, SessionError> {
        let session_id = record.session.session_id.clone();
        let status = self.transcript_status(&record);

        info!(
            target: "session_manager",
            %session_id,
            termination = record.termination.as_str(),
            turns = record.turns.len(),
            judge_decisions = record.judge_decisions.len(),
            suspect = record.is_suspect(),
            partial = status == TranscriptStatus::Partial,
            "finalizing debate"
        );

        self.emit_lifecycle(SessionLifecycleUpdate::new(
            Some(&session_id),
            SessionLifecyclePhase::Judging,
        ));
        let judging = resolve_judging(&session_id, record.judge_decisions.clone(), status);
        let transcript = assemble_transcript(&record, judging, status);

        self.persist(transcript).await
    }

    /// Saves a transcript whose earlier save failed. Each successful call
    /// creates a new debate row.
    pub async fn retry_persist(
        &self,
        transcript: DebateTranscript,
    ) -> Result<DebateReport, SessionError> {
        info!(
            target: "session_manager",
            session_id = %transcript.metadata.context.remote_session_id,
            "retrying transcript save"
        );
        self.persist(transcript).await
    }

    fn transcript_status(&self, record: &SessionRecord) -> TranscriptStatus {
        let suspect_partial =
            record.is_suspect() && self.suspect_policy == SuspectPolicy::TreatAsPartial;
        if record.termination.is_complete() && !suspect_partial {
            TranscriptStatus::Complete
        } else {
            TranscriptStatus::Partial
        }
    }

    async fn persist(&self, transcript: DebateTranscript) -> Result<DebateReport, SessionError> {
        let session_id = transcript.metadata.context.remote_session_id.clone();
        let partial = transcript.is_partial();
        self.emit_lifecycle(SessionLifecycleUpdate::new(
            Some(&session_id),
            SessionLifecyclePhase::Persisting,
        ));

        let started = Instant::now();
        match self.sink.save(&transcript).await {
            Ok(debate_id) => {
                record_transcript_saved(
                    &session_id,
                    debate_id,
                    partial,
                    transcript.messages.len(),
                    started.elapsed(),
                );
                self.emit_lifecycle(SessionLifecycleUpdate::completed(
                    &session_id,
                    debate_id,
                    partial,
                ));
                Ok(DebateReport::new(debate_id, &transcript))
            }
            Err(source) => {
                record_transcript_save_failed(&session_id, partial, &source);
                self.emit_lifecycle(SessionLifecycleUpdate::failed(
                    Some(&session_id),
                    "persistence_failed",
                    source.to_string(),
                    true,
                ));
                Err(SessionError::PersistenceFailed {
                    session_id,
                    transcript: Box::new(transcript),
                    source,
                })
            }
        }
    }
}

/// Partial transcripts keep the usable decisions but never an ensemble verdict.
fn resolve_judging(
    session_id: &str,
    decisions: Vec<JudgeDecision>,
    status: TranscriptStatus,
) -> ResolvedJudging {
    let received = decisions.len();
    let resolved = match aggregate(decisions) {
        Ok(report) => {
            let summary = match status {
                TranscriptStatus::Complete => report.summary,
                TranscriptStatus::Partial => None,
            };
            ResolvedJudging {
                method: report.outcome.method(),
                decisions: report.outcome.into_decisions(),
                summary,
                excluded: report.excluded.len(),
                error: None,
            }
        }
        Err(err) => {
            warn!(
                target: "session_manager",
                %session_id,
                %err,
                "debate stored without a judging verdict"
            );
            ResolvedJudging {
                excluded: received,
                error: Some(err.to_string()),
                ..ResolvedJudging::default()
            }
        }
    };

    record_judging_resolved(
        session_id,
        resolved.method.map(|method| method.as_str()),
        resolved
            .summary
            .as_ref()
            .map(|summary| summary.final_winner_id.as_str()),
        resolved.decisions.len(),
        resolved.excluded,
    );
    resolved
}
