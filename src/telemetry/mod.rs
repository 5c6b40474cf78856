//! Tracing subscriber setup and structured debate events.

pub mod events;

use std::path::Path;

use anyhow::{Context, Result};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, layer::SubscriberExt, EnvFilter, Registry};

pub(crate) const LOG_FILE_PREFIX: &str = "dialectus-client.log";

/// Installs the global subscriber. `RUST_LOG` wins over `default_level`.
///
/// With `log_dir` set, a daily-rotated JSON log is written there as well; keep the
/// returned guard alive for the life of the process so buffered lines are flushed.
pub fn init_tracing(default_level: &str, log_dir: Option<&Path>) -> Result<Option<WorkerGuard>> {
    let env_filter = match EnvFilter::try_from_default_env() {
        Ok(filter) => filter,
        Err(_) => EnvFilter::try_new(default_level)
            .with_context(|| format!("invalid log level `{default_level}`"))?,
    };
    let fmt_layer = fmt::layer().with_target(false);

    let (file_layer, guard) = match log_dir {
        Some(dir) => {
            let appender = tracing_appender::rolling::daily(dir, LOG_FILE_PREFIX);
            let (writer, guard) = tracing_appender::non_blocking(appender);
            let layer = fmt::layer().json().with_writer(writer);
            (Some(layer), Some(guard))
        }
        None => (None, None),
    };

    let subscriber = Registry::default()
        .with(env_filter)
        .with(fmt_layer)
        .with(file_layer);

    tracing::subscriber::set_global_default(subscriber)
        .context("failed to set global subscriber")?;
    Ok(guard)
}
