use anyhow::Result;
use async_trait::async_trait;

use crate::orchestrator::types::{DebateCreated, DebateSetupRequest};

/// Remote debate service: creation, start and the live event stream.
#[async_trait]
pub trait DebateService: Send + Sync {
    async fn create_debate(&self, request: &DebateSetupRequest) -> Result<DebateCreated>;

    async fn start_debate(&self, _debate_id: &str) -> Result<()> {
        Ok(())
    }

    async fn open_stream(&self, debate_id: &str) -> Result<Box<dyn EventStream>>;

    async fn list_models(&self) -> Result<Vec<String>> {
        Ok(Vec::new())
    }
}

/// Ordered source of raw text frames for one debate.
#[async_trait]
pub trait EventStream: Send {
    /// `None` once the remote side has closed the stream.
    async fn next_frame(&mut self) -> Option<Result<String>>;

    async fn close(&mut self) -> Result<()>;
}
