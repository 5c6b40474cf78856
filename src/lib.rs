//! Dialectus debate client core.
//!
//! Consumes a remote debate service, rebuilds the debate from its event
//! stream, combines judge verdicts and stores finished transcripts.

pub mod config;
mod dirs_compat;
pub mod judging;
pub mod orchestrator;
pub mod persistence;
pub mod session;
pub mod telemetry;

#[cfg(test)]
pub(crate) mod test_support;
