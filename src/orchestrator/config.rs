use std::time::Duration;

use crate::orchestrator::constants::{
    DEFAULT_CLOSE_GRACE, DEFAULT_EVENT_QUEUE_CAPACITY, DEFAULT_REQUEST_TIMEOUT_LOCAL,
    DEFAULT_REQUEST_TIMEOUT_REMOTE, DEFAULT_STREAM_IDLE_TIMEOUT, DEFAULT_UPDATE_CAPACITY,
};
use crate::orchestrator::types::DebateSetup;

/// Runtime knobs for one streamed debate session.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Bound for the creation, stream-open and start calls when a participant runs locally.
    pub request_timeout_local: Duration,
    /// Bound for the same calls when every participant is served remotely.
    pub request_timeout_remote: Duration,
    /// Maximum silence on the event stream before the session is treated as errored.
    pub idle_timeout: Duration,
    /// Capacity of the bounded queue between the stream reader and the session worker.
    pub event_queue_capacity: usize,
    /// Capacity of the live update broadcast channel.
    pub update_capacity: usize,
    /// How long to wait for the stream reader to close after the worker finished.
    pub close_grace: Duration,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            request_timeout_local: DEFAULT_REQUEST_TIMEOUT_LOCAL,
            request_timeout_remote: DEFAULT_REQUEST_TIMEOUT_REMOTE,
            idle_timeout: DEFAULT_STREAM_IDLE_TIMEOUT,
            event_queue_capacity: DEFAULT_EVENT_QUEUE_CAPACITY,
            update_capacity: DEFAULT_UPDATE_CAPACITY,
            close_grace: DEFAULT_CLOSE_GRACE,
        }
    }
}

impl SessionConfig {
    /// Local inference is slower, so any local participant selects the longer bound.
    pub fn request_timeout_for(&self, setup: &DebateSetup) -> Duration {
        if setup.has_local_participant() {
            self.request_timeout_local
        } else {
            self.request_timeout_remote
        }
    }
}
