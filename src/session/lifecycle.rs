//! Lifecycle broadcast payloads for end-to-end debate runs.

use std::time::SystemTime;

/// Coarse stages of one debate run, from the creation request to the stored transcript.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionLifecyclePhase {
    Creating,
    Streaming,
    Judging,
    Persisting,
    Completed,
    Failed,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub enum SessionLifecyclePayload {
    #[default]
    None,
    Completed(CompletionPayload),
    Failed(FailurePayload),
}

#[derive(Debug, Clone, PartialEq)]
pub struct CompletionPayload {
    pub debate_id: i64,
    pub partial: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct FailurePayload {
    pub error: String,
    pub code: &'static str,
    /// The transcript is still in memory and a persistence retry may succeed.
    pub retryable: bool,
}

#[derive(Debug, Clone)]
pub struct SessionLifecycleUpdate {
    /// Remote debate id; unknown until the creation request succeeds.
    pub session_id: Option<String>,
    pub phase: SessionLifecyclePhase,
    pub issued_at: SystemTime,
    pub payload: SessionLifecyclePayload,
}

impl SessionLifecycleUpdate {
    pub fn new(session_id: Option<&str>, phase: SessionLifecyclePhase) -> Self {
        Self {
            session_id: session_id.map(str::to_string),
            phase,
            issued_at: SystemTime::now(),
            payload: SessionLifecyclePayload::None,
        }
    }

    pub fn completed(session_id: &str, debate_id: i64, partial: bool) -> Self {
        Self {
            payload: SessionLifecyclePayload::Completed(CompletionPayload { debate_id, partial }),
            ..Self::new(Some(session_id), SessionLifecyclePhase::Completed)
        }
    }

    pub fn failed(
        session_id: Option<&str>,
        code: &'static str,
        error: impl Into<String>,
        retryable: bool,
    ) -> Self {
        Self {
            payload: SessionLifecyclePayload::Failed(FailurePayload {
                error: error.into(),
                code,
                retryable,
            }),
            ..Self::new(session_id, SessionLifecyclePhase::Failed)
        }
    }
}
