use std::time::Duration;

use serde::Serialize;
use thiserror::Error;

use crate::orchestrator::types::Stage;
use crate::persistence::{DebateTranscript, PersistenceError};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unknown {kind} `{value}`")]
pub struct UnknownVariant {
    pub kind: &'static str,
    pub value: String,
}

impl UnknownVariant {
    pub(crate) fn new(kind: &'static str, value: impl Into<String>) -> Self {
        Self {
            kind,
            value: value.into(),
        }
    }
}

/// A stream frame that could not be decoded. Never fatal to the session.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MalformedEvent {
    #[error("frame is not valid JSON: {0}")]
    NotJson(String),
    #[error("frame is not a JSON object")]
    NotAnObject,
    #[error("frame has no `type` discriminator")]
    MissingType,
    #[error("unknown event type `{0}`")]
    UnknownType(String),
    #[error("invalid `{kind}` payload: {reason}")]
    InvalidPayload { kind: &'static str, reason: String },
}

/// A completed turn that does not belong to the expected stage.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize)]
#[error("turn from `{speaker_id}` arrived for {received} while expecting {expected}")]
pub struct OutOfOrderTurn {
    pub speaker_id: String,
    pub expected: Stage,
    pub received: Stage,
    /// The turn opened the next stage before every participant finished the current one.
    pub premature: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TerminationCause {
    #[error("no stream event for {idle_ms} ms")]
    StreamTimeout { idle_ms: u64 },
    #[error("session cancelled by caller")]
    Cancelled,
    #[error("service reported a stream error: {message}")]
    StreamError { message: String },
    #[error("stream transport failed: {reason}")]
    Transport { reason: String },
    #[error("stream closed before the debate completed")]
    StreamClosed,
}

impl TerminationCause {
    pub fn as_str(&self) -> &'static str {
        match self {
            TerminationCause::StreamTimeout { .. } => "stream_timeout",
            TerminationCause::Cancelled => "cancelled",
            TerminationCause::StreamError { .. } => "stream_error",
            TerminationCause::Transport { .. } => "transport",
            TerminationCause::StreamClosed => "stream_closed",
        }
    }
}

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("invalid debate setup: {reason}")]
    InvalidSetup { reason: String },
    #[error("debate creation failed: {reason}")]
    CreateFailed { reason: String },
    #[error("debate creation did not answer within {timeout:?}")]
    CreateTimedOut { timeout: Duration },
    #[error("failed to open event stream for debate {session_id}: {reason}")]
    StreamOpenFailed { session_id: String, reason: String },
    #[error("event stream for debate {session_id} did not open within {timeout:?}")]
    StreamOpenTimedOut {
        session_id: String,
        timeout: Duration,
    },
    #[error("failed to start debate {session_id}: {reason}")]
    StartFailed { session_id: String, reason: String },
    #[error("session worker for debate {session_id} failed: {reason}")]
    WorkerFailed { session_id: String, reason: String },
    /// The assembled transcript rides along so the caller can retry the save.
    #[error("transcript for debate {session_id} was not persisted: {source}")]
    PersistenceFailed {
        session_id: String,
        transcript: Box<DebateTranscript>,
        #[source]
        source: PersistenceError,
    },
}

impl SessionError {
    pub(crate) fn invalid_setup(reason: impl Into<String>) -> Self {
        SessionError::InvalidSetup {
            reason: reason.into(),
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            SessionError::InvalidSetup { .. } => "invalid_setup",
            SessionError::CreateFailed { .. } => "create_failed",
            SessionError::CreateTimedOut { .. } => "create_timed_out",
            SessionError::StreamOpenFailed { .. } => "stream_open_failed",
            SessionError::StreamOpenTimedOut { .. } => "stream_open_timed_out",
            SessionError::StartFailed { .. } => "start_failed",
            SessionError::WorkerFailed { .. } => "worker_failed",
            SessionError::PersistenceFailed { .. } => "persistence_failed",
        }
    }
}
