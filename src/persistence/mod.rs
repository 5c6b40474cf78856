//! Transcript storage.

mod error;
mod records;
mod sqlite;

pub use error::{PersistenceError, StorageFault, WriteStage};
pub use records::{
    CriterionScoreRow, DebateListEntry, DebateMetadata, DebateRow, DebateTranscript,
    EnsembleSummaryRow, JudgeDecisionRow, MessageRow, ParticipantInfo, StoredDebate,
    TranscriptContext, TranscriptStatus,
};
pub use sqlite::{SqliteConfig, SqlitePath, SqlitePersistence};

use async_trait::async_trait;

/// Destination for finished debate transcripts.
#[async_trait]
pub trait TranscriptSink: Send + Sync {
    /// Stores the transcript atomically and returns the new debate id.
    async fn save(&self, transcript: &DebateTranscript) -> Result<i64, PersistenceError>;
}

#[async_trait]
impl TranscriptSink for SqlitePersistence {
    async fn save(&self, transcript: &DebateTranscript) -> Result<i64, PersistenceError> {
        let store = self.clone();
        let transcript = transcript.clone();
        tokio::task::spawn_blocking(move || store.save_transcript(&transcript))
            .await
            .map_err(|err| PersistenceError::PersistenceFailed {
                stage: WriteStage::Begin,
                source: StorageFault::Worker(err.to_string()),
            })?
    }
}

#[cfg(test)]
mod tests;
