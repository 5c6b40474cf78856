use std::fmt;

use thiserror::Error;

/// Insert step of a transcript save, in write order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteStage {
    Begin,
    Debate,
    Messages,
    JudgeDecisions,
    CriterionScores,
    EnsembleSummary,
    Commit,
}

impl WriteStage {
    pub fn as_str(&self) -> &'static str {
        match self {
            WriteStage::Begin => "begin",
            WriteStage::Debate => "debate",
            WriteStage::Messages => "messages",
            WriteStage::JudgeDecisions => "judge_decisions",
            WriteStage::CriterionScores => "criterion_scores",
            WriteStage::EnsembleSummary => "ensemble_summary",
            WriteStage::Commit => "commit",
        }
    }
}

impl fmt::Display for WriteStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Low-level cause underneath a [`PersistenceError`].
#[derive(Debug, Error)]
pub enum StorageFault {
    #[error("sqlite: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("connection pool: {0}")]
    Pool(#[from] r2d2::Error),
    #[error("json encoding: {0}")]
    Encode(#[from] serde_json::Error),
    #[error("storage worker: {0}")]
    Worker(String),
}

#[derive(Debug, Error)]
pub enum PersistenceError {
    /// The save was rolled back; nothing from the transcript was written.
    #[error("transcript write failed at {stage} stage: {source}")]
    PersistenceFailed {
        stage: WriteStage,
        #[source]
        source: StorageFault,
    },
    #[error("debate {debate_id} not found")]
    NotFound { debate_id: i64 },
    #[error(transparent)]
    Storage(#[from] StorageFault),
}

impl PersistenceError {
    pub(crate) fn at(stage: WriteStage) -> impl FnOnce(rusqlite::Error) -> PersistenceError {
        move |err| PersistenceError::PersistenceFailed {
            stage,
            source: StorageFault::Sqlite(err),
        }
    }

    pub fn stage(&self) -> Option<WriteStage> {
        match self {
            PersistenceError::PersistenceFailed { stage, .. } => Some(*stage),
            _ => None,
        }
    }
}

impl From<rusqlite::Error> for PersistenceError {
    fn from(err: rusqlite::Error) -> Self {
        PersistenceError::Storage(StorageFault::Sqlite(err))
    }
}

impl From<r2d2::Error> for PersistenceError {
    fn from(err: r2d2::Error) -> Self {
        PersistenceError::Storage(StorageFault::Pool(err))
    }
}
