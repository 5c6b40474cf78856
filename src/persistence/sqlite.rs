use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use r2d2::{Pool, PooledConnection};
use r2d2_sqlite::SqliteConnectionManager;
use rusqlite::types::Type;
use rusqlite::{params, Connection, OpenFlags, OptionalExtension, Row, Transaction, TransactionBehavior};
use serde_json::Value as JsonValue;

use crate::judging::{EnsembleSummary, JudgeDecision};
use crate::orchestrator::Turn;
use crate::persistence::error::{PersistenceError, StorageFault, WriteStage};
use crate::persistence::records::{
    CriterionScoreRow, DebateListEntry, DebateMetadata, DebateRow, DebateTranscript,
    EnsembleSummaryRow, JudgeDecisionRow, MessageRow, StoredDebate,
};

const SCHEMA_SQL: &str = r#"
CREATE TABLE IF NOT EXISTS debates (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    topic TEXT NOT NULL,
    format TEXT NOT NULL,
    participants TEXT NOT NULL,
    final_phase TEXT NOT NULL,
    total_rounds INTEGER NOT NULL,
    saved_at TEXT NOT NULL,
    message_count INTEGER NOT NULL,
    word_count INTEGER NOT NULL,
    total_debate_time_ms INTEGER NOT NULL,
    scores TEXT,
    context_metadata TEXT,
    created_at DATETIME DEFAULT CURRENT_TIMESTAMP
);

CREATE TABLE IF NOT EXISTS messages (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    debate_id INTEGER NOT NULL,
    speaker_id TEXT NOT NULL,
    position TEXT NOT NULL,
    phase TEXT NOT NULL,
    round_number INTEGER NOT NULL,
    content TEXT NOT NULL,
    timestamp TEXT NOT NULL,
    word_count INTEGER NOT NULL,
    metadata TEXT,
    cost REAL,
    generation_id TEXT,
    cost_queried_at DATETIME,
    FOREIGN KEY (debate_id) REFERENCES debates (id) ON DELETE CASCADE
);

CREATE TABLE IF NOT EXISTS judge_decisions (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    debate_id INTEGER NOT NULL,
    judge_model TEXT NOT NULL,
    judge_provider TEXT NOT NULL,
    winner_id TEXT NOT NULL,
    winner_margin REAL NOT NULL,
    overall_feedback TEXT,
    reasoning TEXT,
    generation_time_ms INTEGER,
    cost REAL,
    generation_id TEXT,
    cost_queried_at DATETIME,
    created_at DATETIME DEFAULT CURRENT_TIMESTAMP,
    FOREIGN KEY (debate_id) REFERENCES debates (id) ON DELETE CASCADE
);

CREATE TABLE IF NOT EXISTS criterion_scores (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    judge_decision_id INTEGER NOT NULL,
    criterion TEXT NOT NULL,
    participant_id TEXT NOT NULL,
    score REAL NOT NULL,
    feedback TEXT,
    FOREIGN KEY (judge_decision_id) REFERENCES judge_decisions (id) ON DELETE CASCADE
);

CREATE TABLE IF NOT EXISTS ensemble_summary (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    debate_id INTEGER NOT NULL UNIQUE,
    final_winner_id TEXT NOT NULL,
    final_margin REAL NOT NULL,
    ensemble_method TEXT NOT NULL DEFAULT 'majority',
    num_judges INTEGER NOT NULL,
    consensus_level REAL,
    summary_reasoning TEXT,
    summary_feedback TEXT,
    participating_judge_decision_ids TEXT,
    created_at DATETIME DEFAULT CURRENT_TIMESTAMP,
    FOREIGN KEY (debate_id) REFERENCES debates (id) ON DELETE CASCADE
);

CREATE INDEX IF NOT EXISTS idx_messages_debate_id ON messages (debate_id);
CREATE INDEX IF NOT EXISTS idx_messages_round_phase ON messages (debate_id, round_number, phase);
CREATE INDEX IF NOT EXISTS idx_judge_decisions_debate_id ON judge_decisions (debate_id);
CREATE INDEX IF NOT EXISTS idx_criterion_scores_decision_id ON criterion_scores (judge_decision_id);
CREATE INDEX IF NOT EXISTS idx_ensemble_summary_debate_id ON ensemble_summary (debate_id);
"#;

/// Storage location of the transcript database.
#[derive(Debug, Clone)]
pub enum SqlitePath {
    File(PathBuf),
    Memory,
}

impl SqlitePath {
    fn to_manager(&self) -> SqliteConnectionManager {
        match self {
            SqlitePath::File(path) => {
                SqliteConnectionManager::file(path).with_flags(Self::open_flags())
            }
            SqlitePath::Memory => SqliteConnectionManager::memory().with_flags(Self::open_flags()),
        }
    }

    fn open_flags() -> OpenFlags {
        OpenFlags::SQLITE_OPEN_CREATE
            | OpenFlags::SQLITE_OPEN_READ_WRITE
            | OpenFlags::SQLITE_OPEN_FULL_MUTEX
    }

    fn as_path(&self) -> Option<&Path> {
        match self {
            SqlitePath::File(path) => Some(path.as_path()),
            SqlitePath::Memory => None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct SqliteConfig {
    pub path: SqlitePath,
    pub pool_size: u32,
    /// Writers wait this long for the database lock before failing.
    pub busy_timeout: Duration,
}

impl SqliteConfig {
    pub fn file(path: impl Into<PathBuf>) -> Self {
        Self {
            path: SqlitePath::File(path.into()),
            pool_size: 4,
            busy_timeout: Duration::from_secs(5),
        }
    }

    /// Every in-memory connection is its own database, so the pool holds one.
    pub fn memory() -> Self {
        Self {
            path: SqlitePath::Memory,
            pool_size: 1,
            busy_timeout: Duration::from_millis(250),
        }
    }
}

/// Pooled SQLite store for debate transcripts.
#[derive(Clone)]
pub struct SqlitePersistence {
    pool: Pool<SqliteConnectionManager>,
    db_path: Option<PathBuf>,
}

impl SqlitePersistence {
    /// Opens the pool and creates the schema if it does not exist yet.
    pub fn bootstrap(config: SqliteConfig) -> Result<Self> {
        if let Some(parent) = config.path.as_path().and_then(Path::parent) {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).with_context(|| {
                    format!("failed to create database directory {}", parent.display())
                })?;
            }
        }

        let busy_timeout = config.busy_timeout;
        let manager = config
            .path
            .to_manager()
            .with_init(move |conn| Self::configure_connection(conn, busy_timeout));

        let pool = Pool::builder()
            .max_size(config.pool_size.max(1))
            .connection_timeout(Duration::from_secs(5))
            .build(manager)
            .context("failed to create SQLite connection pool")?;

        {
            let mut conn = pool
                .get()
                .context("failed to acquire SQLite bootstrap connection")?;
            Self::run_migrations(&mut conn)?;
        }

        Ok(Self {
            pool,
            db_path: config.path.as_path().map(Path::to_path_buf),
        })
    }

    pub fn db_path(&self) -> Option<&Path> {
        self.db_path.as_deref()
    }

    /// Provides access to a pooled connection for custom commands.
    pub fn connection(&self) -> Result<PooledConnection<SqliteConnectionManager>, PersistenceError> {
        Ok(self.pool.get()?)
    }

    fn configure_connection(conn: &mut Connection, busy_timeout: Duration) -> rusqlite::Result<()> {
        conn.busy_timeout(busy_timeout)?;
        conn.execute_batch("PRAGMA journal_mode=WAL;")?;
        conn.execute_batch("PRAGMA foreign_keys=ON;")?;
        conn.execute_batch("PRAGMA synchronous=NORMAL;")?;
        Ok(())
    }

    fn run_migrations(conn: &mut Connection) -> Result<()> {
        conn.execute_batch(SCHEMA_SQL)
            .context("failed to run transcript schema migrations")?;
        Ok(())
    }

    #[cfg(test)]
    pub(crate) fn run_migrations_for_tests(&self) -> Result<()> {
        let mut conn = self.pool.get().context("failed to acquire connection")?;
        Self::run_migrations(&mut conn)
    }

    /// Writes the debate, its turns and its judging graph in one transaction.
    ///
    /// Each call inserts a fresh debate row, so saving the same transcript twice
    /// stores it twice.
    pub fn save_transcript(&self, transcript: &DebateTranscript) -> Result<i64, PersistenceError> {
        let mut conn = self
            .pool
            .get()
            .map_err(|err| PersistenceError::PersistenceFailed {
                stage: WriteStage::Begin,
                source: StorageFault::Pool(err),
            })?;
        let tx = conn
            .transaction_with_behavior(TransactionBehavior::Immediate)
            .map_err(PersistenceError::at(WriteStage::Begin))?;

        let debate_id = insert_debate(&tx, &transcript.metadata)?;
        insert_messages(&tx, debate_id, &transcript.messages)?;
        let decision_ids = insert_judge_decisions(&tx, debate_id, &transcript.judge_decisions)?;
        insert_criterion_scores(&tx, &decision_ids, &transcript.judge_decisions)?;
        if let Some(summary) = &transcript.ensemble {
            insert_ensemble_summary(&tx, debate_id, summary, &decision_ids)?;
        }

        tx.commit().map_err(PersistenceError::at(WriteStage::Commit))?;
        Ok(debate_id)
    }

    /// Newest first. `None` returns every debate.
    pub fn list_debates(&self, limit: Option<usize>) -> Result<Vec<DebateListEntry>, PersistenceError> {
        let conn = self.connection()?;
        let limit = limit.map_or(-1, |limit| limit as i64);
        let mut stmt = conn.prepare(
            "SELECT id, topic, format, final_phase, message_count, saved_at
            FROM debates
            ORDER BY saved_at DESC, id DESC
            LIMIT ?1",
        )?;
        let entries = stmt
            .query_map(params![limit], |row| {
                Ok(DebateListEntry {
                    id: row.get("id")?,
                    topic: row.get("topic")?,
                    format: row.get("format")?,
                    final_phase: row.get("final_phase")?,
                    message_count: row.get("message_count")?,
                    saved_at: row.get("saved_at")?,
                })
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(entries)
    }

    pub fn load_debate(&self, debate_id: i64) -> Result<StoredDebate, PersistenceError> {
        let conn = self.connection()?;

        let debate = conn
            .query_row(
                "SELECT id, topic, format, participants, final_phase, total_rounds, saved_at,
                    message_count, word_count, total_debate_time_ms, scores, context_metadata,
                    created_at
                FROM debates WHERE id = ?1",
                params![debate_id],
                read_debate,
            )
            .optional()?
            .ok_or(PersistenceError::NotFound { debate_id })?;

        let messages = conn
            .prepare(
                "SELECT id, debate_id, speaker_id, position, phase, round_number, content,
                    timestamp, word_count, metadata, cost, generation_id, cost_queried_at
                FROM messages WHERE debate_id = ?1
                ORDER BY round_number, id",
            )?
            .query_map(params![debate_id], read_message)?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        let mut judge_decisions = conn
            .prepare(
                "SELECT id, debate_id, judge_model, judge_provider, winner_id, winner_margin,
                    overall_feedback, reasoning, generation_time_ms, cost, generation_id,
                    cost_queried_at, created_at
                FROM judge_decisions WHERE debate_id = ?1
                ORDER BY id",
            )?
            .query_map(params![debate_id], read_judge_decision)?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        let scores = conn
            .prepare(
                "SELECT cs.id, cs.judge_decision_id, cs.criterion, cs.participant_id, cs.score,
                    cs.feedback
                FROM criterion_scores cs
                JOIN judge_decisions jd ON jd.id = cs.judge_decision_id
                WHERE jd.debate_id = ?1
                ORDER BY cs.id",
            )?
            .query_map(params![debate_id], read_criterion_score)?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        let mut by_decision: HashMap<i64, Vec<CriterionScoreRow>> = HashMap::new();
        for score in scores {
            by_decision
                .entry(score.judge_decision_id)
                .or_default()
                .push(score);
        }
        for decision in &mut judge_decisions {
            decision.criterion_scores = by_decision.remove(&decision.id).unwrap_or_default();
        }

        let ensemble = conn
            .query_row(
                "SELECT id, debate_id, final_winner_id, final_margin, ensemble_method, num_judges,
                    consensus_level, summary_reasoning, summary_feedback,
                    participating_judge_decision_ids, created_at
                FROM ensemble_summary WHERE debate_id = ?1",
                params![debate_id],
                read_ensemble_summary,
            )
            .optional()?;

        Ok(StoredDebate {
            debate,
            messages,
            judge_decisions,
            ensemble,
        })
    }

    /// Removes a debate; turns, decisions, scores and the summary cascade with it.
    pub fn delete_debate(&self, debate_id: i64) -> Result<(), PersistenceError> {
        let conn = self.connection()?;
        let affected = conn.execute("DELETE FROM debates WHERE id = ?1", params![debate_id])?;
        if affected == 0 {
            return Err(PersistenceError::NotFound { debate_id });
        }
        Ok(())
    }
}

fn encode<T: serde::Serialize>(stage: WriteStage, value: &T) -> Result<String, PersistenceError> {
    serde_json::to_string(value).map_err(|err| PersistenceError::PersistenceFailed {
        stage,
        source: StorageFault::Encode(err),
    })
}

fn insert_debate(tx: &Transaction<'_>, metadata: &DebateMetadata) -> Result<i64, PersistenceError> {
    let participants = encode(WriteStage::Debate, &metadata.participants)?;
    let scores = metadata
        .scores
        .as_ref()
        .map(|scores| encode(WriteStage::Debate, scores))
        .transpose()?;
    let context = encode(WriteStage::Debate, &metadata.context)?;

    tx.execute(
        "INSERT INTO debates (
            topic, format, participants, final_phase, total_rounds, saved_at,
            message_count, word_count, total_debate_time_ms, scores, context_metadata
        ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
        params![
            metadata.topic,
            metadata.format,
            participants,
            metadata.final_phase,
            metadata.total_rounds,
            metadata.saved_at,
            metadata.message_count as i64,
            metadata.word_count as i64,
            metadata.total_debate_time_ms as i64,
            scores,
            context,
        ],
    )
    .map_err(PersistenceError::at(WriteStage::Debate))?;

    Ok(tx.last_insert_rowid())
}

fn insert_messages(tx: &Transaction<'_>, debate_id: i64, turns: &[Turn]) -> Result<(), PersistenceError> {
    let mut stmt = tx
        .prepare(
            "INSERT INTO messages (
                debate_id, speaker_id, position, phase, round_number, content, timestamp,
                word_count, metadata, cost, generation_id, cost_queried_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)",
        )
        .map_err(PersistenceError::at(WriteStage::Messages))?;

    for turn in turns {
        stmt.execute(params![
            debate_id,
            turn.speaker_id,
            turn.position.as_str(),
            turn.phase.as_str(),
            turn.round_number,
            turn.content,
            turn.timestamp.to_rfc3339(),
            turn.word_count as i64,
            turn.metadata.as_ref().map(JsonValue::to_string),
            turn.cost,
            turn.generation_id,
            turn.cost_queried_at,
        ])
        .map_err(PersistenceError::at(WriteStage::Messages))?;
    }
    Ok(())
}

fn insert_judge_decisions(
    tx: &Transaction<'_>,
    debate_id: i64,
    decisions: &[JudgeDecision],
) -> Result<Vec<i64>, PersistenceError> {
    let mut stmt = tx
        .prepare(
            "INSERT INTO judge_decisions (
                debate_id, judge_model, judge_provider, winner_id, winner_margin,
                overall_feedback, reasoning, generation_time_ms, cost, generation_id,
                cost_queried_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
        )
        .map_err(PersistenceError::at(WriteStage::JudgeDecisions))?;

    let mut ids = Vec::with_capacity(decisions.len());
    for decision in decisions {
        let id = stmt
            .insert(params![
                debate_id,
                decision.judge_model,
                decision.judge_provider,
                decision.winner(),
                decision.winner_margin,
                decision.overall_feedback,
                decision.reasoning,
                decision.generation_time_ms.map(|ms| ms as i64),
                decision.cost,
                decision.generation_id,
                decision.cost_queried_at,
            ])
            .map_err(PersistenceError::at(WriteStage::JudgeDecisions))?;
        ids.push(id);
    }
    Ok(ids)
}

fn insert_criterion_scores(
    tx: &Transaction<'_>,
    decision_ids: &[i64],
    decisions: &[JudgeDecision],
) -> Result<(), PersistenceError> {
    let mut stmt = tx
        .prepare(
            "INSERT INTO criterion_scores (
                judge_decision_id, criterion, participant_id, score, feedback
            ) VALUES (?1, ?2, ?3, ?4, ?5)",
        )
        .map_err(PersistenceError::at(WriteStage::CriterionScores))?;

    for (decision_id, decision) in decision_ids.iter().zip(decisions) {
        for score in &decision.criterion_scores {
            stmt.execute(params![
                decision_id,
                score.criterion,
                score.participant_id,
                score.score,
                score.feedback,
            ])
            .map_err(PersistenceError::at(WriteStage::CriterionScores))?;
        }
    }
    Ok(())
}

fn insert_ensemble_summary(
    tx: &Transaction<'_>,
    debate_id: i64,
    summary: &EnsembleSummary,
    decision_ids: &[i64],
) -> Result<(), PersistenceError> {
    let participating: Vec<i64> = summary
        .participating_decisions
        .iter()
        .filter_map(|index| decision_ids.get(*index).copied())
        .collect();
    let participating = encode(WriteStage::EnsembleSummary, &participating)?;

    tx.execute(
        "INSERT INTO ensemble_summary (
            debate_id, final_winner_id, final_margin, ensemble_method, num_judges,
            consensus_level, summary_reasoning, summary_feedback,
            participating_judge_decision_ids
        ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
        params![
            debate_id,
            summary.final_winner_id,
            summary.final_margin,
            summary.method.as_str(),
            summary.num_judges as i64,
            summary.consensus_level(),
            summary.summary_reasoning,
            summary.summary_feedback,
            participating,
        ],
    )
    .map_err(PersistenceError::at(WriteStage::EnsembleSummary))?;
    Ok(())
}

/// A stored value that no longer decodes is an error, never an empty default.
fn json_column<T: serde::de::DeserializeOwned>(row: &Row, column: &str) -> rusqlite::Result<Option<T>> {
    let Some(json) = row.get::<_, Option<String>>(column)? else {
        return Ok(None);
    };
    serde_json::from_str(&json).map(Some).map_err(|err| {
        let index = row.as_ref().column_index(column).unwrap_or_default();
        rusqlite::Error::FromSqlConversionFailure(index, Type::Text, Box::new(err))
    })
}

fn read_debate(row: &Row) -> rusqlite::Result<DebateRow> {
    Ok(DebateRow {
        id: row.get("id")?,
        topic: row.get("topic")?,
        format: row.get("format")?,
        participants: json_column(row, "participants")?.unwrap_or_default(),
        final_phase: row.get("final_phase")?,
        total_rounds: row.get("total_rounds")?,
        saved_at: row.get("saved_at")?,
        message_count: row.get("message_count")?,
        word_count: row.get("word_count")?,
        total_debate_time_ms: row.get("total_debate_time_ms")?,
        scores: json_column(row, "scores")?,
        context: json_column(row, "context_metadata")?,
        created_at: row.get("created_at")?,
    })
}

fn read_message(row: &Row) -> rusqlite::Result<MessageRow> {
    Ok(MessageRow {
        id: row.get("id")?,
        debate_id: row.get("debate_id")?,
        speaker_id: row.get("speaker_id")?,
        position: row.get("position")?,
        phase: row.get("phase")?,
        round_number: row.get("round_number")?,
        content: row.get("content")?,
        timestamp: row.get("timestamp")?,
        word_count: row.get("word_count")?,
        metadata: json_column(row, "metadata")?,
        cost: row.get("cost")?,
        generation_id: row.get("generation_id")?,
        cost_queried_at: row.get("cost_queried_at")?,
    })
}

fn read_judge_decision(row: &Row) -> rusqlite::Result<JudgeDecisionRow> {
    Ok(JudgeDecisionRow {
        id: row.get("id")?,
        debate_id: row.get("debate_id")?,
        judge_model: row.get("judge_model")?,
        judge_provider: row.get("judge_provider")?,
        winner_id: row.get("winner_id")?,
        winner_margin: row.get("winner_margin")?,
        overall_feedback: row.get("overall_feedback")?,
        reasoning: row.get("reasoning")?,
        generation_time_ms: row.get("generation_time_ms")?,
        cost: row.get("cost")?,
        generation_id: row.get("generation_id")?,
        cost_queried_at: row.get("cost_queried_at")?,
        created_at: row.get("created_at")?,
        criterion_scores: Vec::new(),
    })
}

fn read_criterion_score(row: &Row) -> rusqlite::Result<CriterionScoreRow> {
    Ok(CriterionScoreRow {
        id: row.get("id")?,
        judge_decision_id: row.get("judge_decision_id")?,
        criterion: row.get("criterion")?,
        participant_id: row.get("participant_id")?,
        score: row.get("score")?,
        feedback: row.get("feedback")?,
    })
}

fn read_ensemble_summary(row: &Row) -> rusqlite::Result<EnsembleSummaryRow> {
    Ok(EnsembleSummaryRow {
        id: row.get("id")?,
        debate_id: row.get("debate_id")?,
        final_winner_id: row.get("final_winner_id")?,
        final_margin: row.get("final_margin")?,
        ensemble_method: row.get("ensemble_method")?,
        num_judges: row.get("num_judges")?,
        consensus_level: row.get("consensus_level")?,
        summary_reasoning: row.get("summary_reasoning")?,
        summary_feedback: row.get("summary_feedback")?,
        participating_judge_decision_ids: json_column(row, "participating_judge_decision_ids")?
            .unwrap_or_default(),
        created_at: row.get("created_at")?,
    })
}
