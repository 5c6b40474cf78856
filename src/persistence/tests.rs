use std::sync::Arc;

use rusqlite::Connection;
use tempfile::NamedTempFile;

use super::sqlite::{SqliteConfig, SqlitePath, SqlitePersistence};
use super::{PersistenceError, StorageFault, TranscriptSink, TranscriptStatus, WriteStage};
use crate::test_support::{judge_decision, sample_transcript};

fn file_store() -> (SqlitePersistence, NamedTempFile) {
    let file = NamedTempFile::new().expect("temp db file");
    let config = SqliteConfig::file(file.path());
    let store = SqlitePersistence::bootstrap(config).expect("bootstrap should succeed");
    (store, file)
}

fn count(conn: &Connection, table: &str) -> i64 {
    conn.query_row(&format!("SELECT count(*) FROM {table}"), [], |row| row.get(0))
        .expect("count rows")
}

#[test]
fn bootstrap_creates_schema_and_indexes() {
    let store = SqlitePersistence::bootstrap(SqliteConfig::memory()).expect("bootstrap");
    let conn = store.connection().expect("connection available");

    for table in [
        "debates",
        "messages",
        "judge_decisions",
        "criterion_scores",
        "ensemble_summary",
    ] {
        let found: i64 = conn
            .query_row(
                "SELECT count(*) FROM sqlite_master WHERE type = 'table' AND name = ?1",
                [table],
                |row| row.get(0),
            )
            .expect("query sqlite_master");
        assert_eq!(found, 1, "missing table {table}");
    }

    let indexes: i64 = conn
        .query_row(
            "SELECT count(*) FROM sqlite_master WHERE type = 'index' AND name LIKE 'idx_%'",
            [],
            |row| row.get(0),
        )
        .expect("query indexes");
    assert_eq!(indexes, 5);

    let foreign_keys: i64 = conn
        .query_row("PRAGMA foreign_keys", [], |row| row.get(0))
        .expect("pragma");
    assert_eq!(foreign_keys, 1);
}

#[test]
fn migrations_are_idempotent() {
    let (store, _file) = file_store();
    store
        .run_migrations_for_tests()
        .expect("second migration run succeeds");

    let reopened = SqlitePersistence::bootstrap(SqliteConfig {
        path: SqlitePath::File(store.db_path().expect("file path").to_path_buf()),
        ..SqliteConfig::memory()
    })
    .expect("reopen existing database");
    assert!(reopened.list_debates(None).expect("list").is_empty());
}

#[test]
fn saved_transcript_reads_back_identically() {
    let (store, _file) = file_store();
    let transcript = sample_transcript("Cities should ban cars", "2026-03-01T10:00:00+00:00", 3);

    let id = store.save_transcript(&transcript).expect("save succeeds");
    let stored = store.load_debate(id).expect("load succeeds");

    assert_eq!(stored.debate.topic, transcript.metadata.topic);
    assert_eq!(stored.debate.format, transcript.metadata.format);
    assert_eq!(stored.debate.participants, transcript.metadata.participants);
    assert_eq!(stored.participant_ids(), vec!["model_a", "model_b"]);
    assert_eq!(
        stored.debate.message_count,
        transcript.metadata.message_count as i64
    );
    assert_eq!(stored.debate.word_count, transcript.metadata.word_count as i64);
    assert_eq!(stored.messages.len(), transcript.messages.len());
    assert_eq!(stored.judge_decisions.len(), transcript.judge_decisions.len());
    assert_eq!(
        stored.debate.context.as_ref().map(|context| context.status),
        Some(TranscriptStatus::Complete)
    );

    let first = &stored.messages[0];
    assert_eq!(first.speaker_id, "model_a");
    assert_eq!(first.phase, "opening");
    assert_eq!(first.round_number, 1);
    assert_eq!(first.content, transcript.messages[0].content);

    for (row, decision) in stored.judge_decisions.iter().zip(&transcript.judge_decisions) {
        assert_eq!(row.judge_model, decision.judge_model);
        assert_eq!(row.criterion_scores.len(), decision.criterion_scores.len());
        assert!(row.criterion_scores.iter().all(|score| score.judge_decision_id == row.id));
    }

    let ensemble = stored.ensemble.expect("ensemble stored");
    let decision_ids: Vec<i64> = stored.judge_decisions.iter().map(|row| row.id).collect();
    assert_eq!(ensemble.participating_judge_decision_ids, decision_ids);
    assert_eq!(ensemble.ensemble_method, "majority");
    assert_eq!(ensemble.num_judges, 3);
}

#[test]
fn messages_load_in_round_order() {
    let (store, _file) = file_store();
    let mut transcript = sample_transcript("Ordering", "2026-03-01T10:00:00+00:00", 0);
    transcript.messages.reverse();

    let id = store.save_transcript(&transcript).expect("save succeeds");
    let stored = store.load_debate(id).expect("load succeeds");
    let rounds: Vec<i64> = stored.messages.iter().map(|row| row.round_number).collect();
    let mut sorted = rounds.clone();
    sorted.sort_unstable();
    assert_eq!(rounds, sorted);
}

#[test]
fn saving_twice_creates_two_debates() {
    let (store, _file) = file_store();
    let transcript = sample_transcript("Twice", "2026-03-01T10:00:00+00:00", 1);

    let first = store.save_transcript(&transcript).expect("first save");
    let second = store.save_transcript(&transcript).expect("second save");
    assert_ne!(first, second);
    assert_eq!(store.list_debates(None).expect("list").len(), 2);
}

#[test]
fn listing_is_newest_first_with_limit() {
    let (store, _file) = file_store();
    for (topic, saved_at) in [
        ("older", "2026-01-01T00:00:00+00:00"),
        ("newest", "2026-03-01T00:00:00+00:00"),
        ("middle", "2026-02-01T00:00:00+00:00"),
    ] {
        store
            .save_transcript(&sample_transcript(topic, saved_at, 0))
            .expect("save");
    }

    let all = store.list_debates(None).expect("list all");
    let topics: Vec<&str> = all.iter().map(|entry| entry.topic.as_str()).collect();
    assert_eq!(topics, vec!["newest", "middle", "older"]);

    let limited = store.list_debates(Some(2)).expect("list limited");
    assert_eq!(limited.len(), 2);
    assert_eq!(limited[0].topic, "newest");
}

#[test]
fn loading_unknown_debate_is_not_found() {
    let (store, _file) = file_store();
    match store.load_debate(404) {
        Err(PersistenceError::NotFound { debate_id }) => assert_eq!(debate_id, 404),
        other => panic!("unexpected result {other:?}"),
    }
}

#[test]
fn corrupt_json_columns_fail_the_load() {
    let (store, _file) = file_store();
    let id = store
        .save_transcript(&sample_transcript("Corrupt", "2026-03-01T10:00:00+00:00", 2))
        .expect("save");

    let conn = store.connection().expect("connection");
    conn.execute(
        "UPDATE debates SET participants = 'not json' WHERE id = ?1",
        [id],
    )
    .expect("corrupt participants");
    match store.load_debate(id) {
        Err(PersistenceError::Storage(StorageFault::Sqlite(
            rusqlite::Error::FromSqlConversionFailure(index, _, _),
        ))) => assert_eq!(index, 3),
        other => panic!("unexpected result {other:?}"),
    }

    conn.execute(
        "UPDATE debates SET participants = '[]' WHERE id = ?1",
        [id],
    )
    .expect("restore participants");
    conn.execute(
        "UPDATE ensemble_summary SET participating_judge_decision_ids = '{broken' WHERE debate_id = ?1",
        [id],
    )
    .expect("corrupt ensemble ids");
    assert!(matches!(
        store.load_debate(id),
        Err(PersistenceError::Storage(StorageFault::Sqlite(
            rusqlite::Error::FromSqlConversionFailure(..)
        )))
    ));
}

#[test]
fn deleting_debate_cascades_to_children() {
    let (store, _file) = file_store();
    let id = store
        .save_transcript(&sample_transcript("Cascade", "2026-03-01T10:00:00+00:00", 2))
        .expect("save");

    store.delete_debate(id).expect("delete succeeds");

    let conn = store.connection().expect("connection");
    for table in [
        "debates",
        "messages",
        "judge_decisions",
        "criterion_scores",
        "ensemble_summary",
    ] {
        assert_eq!(count(&conn, table), 0, "orphaned rows in {table}");
    }
    assert!(matches!(
        store.delete_debate(id),
        Err(PersistenceError::NotFound { .. })
    ));
}

#[test]
fn failure_mid_save_rolls_back_everything() {
    let (store, _file) = file_store();
    {
        let conn = store.connection().expect("connection");
        conn.execute_batch("DROP TABLE criterion_scores;")
            .expect("drop table");
    }

    let err = store
        .save_transcript(&sample_transcript("Rollback", "2026-03-01T10:00:00+00:00", 2))
        .expect_err("save must fail");
    assert_eq!(err.stage(), Some(WriteStage::CriterionScores));

    let conn = store.connection().expect("connection");
    assert_eq!(count(&conn, "debates"), 0);
    assert_eq!(count(&conn, "messages"), 0);
    assert_eq!(count(&conn, "judge_decisions"), 0);
}

#[test]
fn one_ensemble_summary_per_debate() {
    let (store, _file) = file_store();
    let id = store
        .save_transcript(&sample_transcript("Unique", "2026-03-01T10:00:00+00:00", 2))
        .expect("save");

    let conn = store.connection().expect("connection");
    let duplicate = conn.execute(
        "INSERT INTO ensemble_summary (debate_id, final_winner_id, final_margin, num_judges)
        VALUES (?1, 'model_a', 1.0, 2)",
        [id],
    );
    assert!(duplicate.is_err());
}

#[test]
fn decision_without_winner_aborts_the_save() {
    let (store, _file) = file_store();
    let mut transcript = sample_transcript("No winner", "2026-03-01T10:00:00+00:00", 0);
    transcript
        .judge_decisions
        .push(judge_decision("judge-x", None, 0.0));

    let err = store.save_transcript(&transcript).expect_err("save must fail");
    assert_eq!(err.stage(), Some(WriteStage::JudgeDecisions));
    assert!(store.list_debates(None).expect("list").is_empty());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn concurrent_saves_do_not_interfere() {
    let (store, _file) = file_store();
    let sink: Arc<dyn TranscriptSink> = Arc::new(store.clone());

    let mut tasks = Vec::new();
    for index in 0..4 {
        let sink = Arc::clone(&sink);
        tasks.push(tokio::spawn(async move {
            let transcript = sample_transcript(
                &format!("parallel {index}"),
                "2026-03-01T10:00:00+00:00",
                2,
            );
            sink.save(&transcript).await
        }));
    }

    for task in tasks {
        task.await.expect("task joins").expect("save succeeds");
    }

    let conn = store.connection().expect("connection");
    assert_eq!(count(&conn, "debates"), 4);
    assert_eq!(count(&conn, "ensemble_summary"), 4);
}
