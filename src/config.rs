//! Runtime configuration: typed defaults with an environment overlay.

use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use anyhow::{anyhow, Result};
use serde::{Deserialize, Serialize};

use crate::dirs_compat::default_database_path;
use crate::orchestrator::SessionConfig;
use crate::persistence::SqliteConfig;
use crate::session::SuspectPolicy;

pub const ENV_API_BASE_URL: &str = "DIALECTUS_API_BASE_URL";
pub const ENV_LOG_LEVEL: &str = "DIALECTUS_LOG_LEVEL";
pub const ENV_HTTP_TIMEOUT_LOCAL: &str = "DIALECTUS_HTTP_TIMEOUT_LOCAL";
pub const ENV_HTTP_TIMEOUT_REMOTE: &str = "DIALECTUS_HTTP_TIMEOUT_REMOTE";
pub const ENV_WEBSOCKET_TIMEOUT: &str = "DIALECTUS_WEBSOCKET_TIMEOUT";
pub const ENV_STREAM_IDLE_TIMEOUT: &str = "DIALECTUS_STREAM_IDLE_TIMEOUT";
pub const ENV_EVENT_QUEUE_CAPACITY: &str = "DIALECTUS_EVENT_QUEUE_CAPACITY";
pub const ENV_TREAT_SUSPECT_AS_PARTIAL: &str = "DIALECTUS_TREAT_SUSPECT_AS_PARTIAL";
pub const ENV_DB_PATH: &str = "DIALECTUS_DB_PATH";
pub const ENV_LOG_DIR: &str = "DIALECTUS_LOG_DIR";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    pub api_base_url: String,
    pub log_level: String,
    pub http_timeout_local_secs: u64,
    pub http_timeout_remote_secs: u64,
    pub websocket_timeout_secs: u64,
    pub stream_idle_timeout_secs: u64,
    pub event_queue_capacity: usize,
    pub treat_suspect_as_partial: bool,
    pub database_path: Option<PathBuf>,
    pub log_dir: Option<PathBuf>,
}

impl Default for ClientConfig {
    fn default() -> Self {
        let session = SessionConfig::default();
        Self {
            api_base_url: "http://localhost:8000".to_string(),
            log_level: "info".to_string(),
            http_timeout_local_secs: session.request_timeout_local.as_secs(),
            http_timeout_remote_secs: session.request_timeout_remote.as_secs(),
            websocket_timeout_secs: 60,
            stream_idle_timeout_secs: session.idle_timeout.as_secs(),
            event_queue_capacity: session.event_queue_capacity,
            treat_suspect_as_partial: false,
            database_path: None,
            log_dir: None,
        }
    }
}

impl ClientConfig {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Overlays values from `lookup` on the defaults. Empty values are ignored.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let read = |key: &str| {
            lookup(key)
                .map(|value| value.trim().to_string())
                .filter(|value| !value.is_empty())
        };

        let mut config = Self::default();
        if let Some(url) = read(ENV_API_BASE_URL) {
            config.api_base_url = url.trim_end_matches('/').to_string();
        }
        if let Some(level) = read(ENV_LOG_LEVEL) {
            config.log_level = level;
        }
        if let Some(secs) = parse(ENV_HTTP_TIMEOUT_LOCAL, read(ENV_HTTP_TIMEOUT_LOCAL))? {
            config.http_timeout_local_secs = secs;
        }
        if let Some(secs) = parse(ENV_HTTP_TIMEOUT_REMOTE, read(ENV_HTTP_TIMEOUT_REMOTE))? {
            config.http_timeout_remote_secs = secs;
        }
        if let Some(secs) = parse(ENV_WEBSOCKET_TIMEOUT, read(ENV_WEBSOCKET_TIMEOUT))? {
            config.websocket_timeout_secs = secs;
        }
        if let Some(secs) = parse(ENV_STREAM_IDLE_TIMEOUT, read(ENV_STREAM_IDLE_TIMEOUT))? {
            config.stream_idle_timeout_secs = secs;
        }
        if let Some(capacity) = parse(ENV_EVENT_QUEUE_CAPACITY, read(ENV_EVENT_QUEUE_CAPACITY))? {
            config.event_queue_capacity = capacity;
        }
        if let Some(value) = read(ENV_TREAT_SUSPECT_AS_PARTIAL) {
            config.treat_suspect_as_partial = parse_flag(ENV_TREAT_SUSPECT_AS_PARTIAL, &value)?;
        }
        if let Some(path) = read(ENV_DB_PATH) {
            config.database_path = Some(PathBuf::from(path));
        }
        if let Some(dir) = read(ENV_LOG_DIR) {
            config.log_dir = Some(PathBuf::from(dir));
        }
        Ok(config)
    }

    pub fn session_config(&self) -> SessionConfig {
        SessionConfig {
            request_timeout_local: Duration::from_secs(self.http_timeout_local_secs),
            request_timeout_remote: Duration::from_secs(self.http_timeout_remote_secs),
            idle_timeout: Duration::from_secs(self.stream_idle_timeout_secs),
            event_queue_capacity: self.event_queue_capacity,
            ..SessionConfig::default()
        }
    }

    pub fn websocket_timeout(&self) -> Duration {
        Duration::from_secs(self.websocket_timeout_secs)
    }

    pub fn suspect_policy(&self) -> SuspectPolicy {
        if self.treat_suspect_as_partial {
            SuspectPolicy::TreatAsPartial
        } else {
            SuspectPolicy::PersistNormally
        }
    }

    pub fn database_path(&self) -> PathBuf {
        self.database_path
            .clone()
            .unwrap_or_else(default_database_path)
    }

    pub fn sqlite_config(&self) -> SqliteConfig {
        SqliteConfig::file(self.database_path())
    }
}

fn parse<T>(key: &str, value: Option<String>) -> Result<Option<T>>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    value
        .map(|raw| {
            raw.parse::<T>()
                .map_err(|err| anyhow!("{key} has invalid value `{raw}`: {err}"))
        })
        .transpose()
}

fn parse_flag(key: &str, value: &str) -> Result<bool> {
    match value.to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(anyhow!("{key} has invalid value `{value}`: expected a boolean")),
    }
}
