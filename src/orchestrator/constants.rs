use std::time::Duration;

/// Providers that run inference on the local machine.
pub(crate) const LOCAL_PROVIDERS: &[&str] = &["ollama"];

pub(crate) const DEFAULT_REQUEST_TIMEOUT_LOCAL: Duration = Duration::from_secs(120);
pub(crate) const DEFAULT_REQUEST_TIMEOUT_REMOTE: Duration = Duration::from_secs(30);
pub(crate) const DEFAULT_STREAM_IDLE_TIMEOUT: Duration = Duration::from_secs(300);
pub(crate) const DEFAULT_CLOSE_GRACE: Duration = Duration::from_secs(2);
pub(crate) const DEFAULT_EVENT_QUEUE_CAPACITY: usize = 64;
pub(crate) const DEFAULT_UPDATE_CAPACITY: usize = 128;
pub(crate) const COMMAND_CAPACITY: usize = 4;

pub(crate) const EVENT_MESSAGE_CHUNK: &str = "message-chunk";
pub(crate) const EVENT_JUDGE_DECISION: &str = "judge-decision";
pub(crate) const EVENT_DEBATE_COMPLETED: &str = "debate-completed";
pub(crate) const EVENT_STREAM_ERROR: &str = "stream-error";
