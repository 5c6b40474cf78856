use serde::Serialize;
use std::time::Duration;
use tracing::{info, warn};

use crate::orchestrator::{MalformedEvent, OutOfOrderTurn, SessionTermination, Turn};

pub(crate) const TARGET: &str = "telemetry::debate";
pub(crate) const EVENT_TURN: &str = "debate_turn_completed";
pub(crate) const EVENT_OUT_OF_ORDER: &str = "debate_turn_out_of_order";
pub(crate) const EVENT_MALFORMED: &str = "debate_frame_malformed";
pub(crate) const EVENT_TERMINATED: &str = "debate_session_terminated";
pub(crate) const EVENT_JUDGING: &str = "debate_judging_resolved";
pub(crate) const EVENT_SAVED: &str = "debate_transcript_saved";
pub(crate) const EVENT_SAVE_FAILED: &str = "debate_transcript_save_failed";

#[derive(Debug, Serialize)]
pub struct TurnCompletedEvent<'a> {
    pub session_id: &'a str,
    pub speaker_id: &'a str,
    pub phase: &'static str,
    pub round: u32,
    pub word_count: usize,
}

#[derive(Debug, Serialize)]
pub struct OutOfOrderEvent<'a> {
    pub session_id: &'a str,
    pub violation: &'a OutOfOrderTurn,
}

#[derive(Debug, Serialize)]
pub struct SessionTerminatedEvent<'a> {
    pub session_id: &'a str,
    pub termination: &'static str,
    pub detail: Option<String>,
    pub turns: usize,
    pub judge_decisions: usize,
    pub dropped_frames: usize,
    pub discarded_partial_turns: usize,
    pub elapsed_ms: u64,
}

#[derive(Debug, Serialize)]
pub struct JudgingResolvedEvent<'a> {
    pub session_id: &'a str,
    pub method: Option<&'static str>,
    pub winner_id: Option<&'a str>,
    pub num_judges: usize,
    pub excluded: usize,
}

#[derive(Debug, Serialize)]
pub struct TranscriptSavedEvent<'a> {
    pub session_id: &'a str,
    pub debate_id: i64,
    pub partial: bool,
    pub message_count: usize,
    pub latency_ms: u64,
}

fn emit<T: Serialize>(event_name: &'static str, event: &T) {
    match serde_json::to_string(event) {
        Ok(payload) => info!(target: TARGET, event = event_name, payload = %payload),
        Err(err) => warn!(
            target: TARGET,
            event = event_name,
            %err,
            "failed to encode telemetry event"
        ),
    }
}

pub fn record_turn_completed(session_id: &str, turn: &Turn) {
    emit(
        EVENT_TURN,
        &TurnCompletedEvent {
            session_id,
            speaker_id: &turn.speaker_id,
            phase: turn.phase.as_str(),
            round: turn.round_number,
            word_count: turn.word_count,
        },
    );
}

pub fn record_out_of_order_turn(session_id: &str, violation: &OutOfOrderTurn) {
    warn!(
        target: TARGET,
        event = EVENT_OUT_OF_ORDER,
        session_id,
        %violation,
        "turn outside the expected phase order"
    );
    emit(
        EVENT_OUT_OF_ORDER,
        &OutOfOrderEvent {
            session_id,
            violation,
        },
    );
}

pub fn record_malformed_frame(session_id: &str, error: &MalformedEvent) {
    warn!(
        target: TARGET,
        event = EVENT_MALFORMED,
        session_id,
        %error,
        "dropping malformed stream frame"
    );
}

pub fn record_session_terminated(
    session_id: &str,
    termination: &SessionTermination,
    turns: usize,
    judge_decisions: usize,
    dropped_frames: usize,
    discarded_partial_turns: usize,
    elapsed: Duration,
) {
    emit(
        EVENT_TERMINATED,
        &SessionTerminatedEvent {
            session_id,
            termination: termination.as_str(),
            detail: termination.cause().map(ToString::to_string),
            turns,
            judge_decisions,
            dropped_frames,
            discarded_partial_turns,
            elapsed_ms: duration_to_ms(elapsed),
        },
    );
}

pub fn record_judging_resolved(
    session_id: &str,
    method: Option<&'static str>,
    winner_id: Option<&str>,
    num_judges: usize,
    excluded: usize,
) {
    emit(
        EVENT_JUDGING,
        &JudgingResolvedEvent {
            session_id,
            method,
            winner_id,
            num_judges,
            excluded,
        },
    );
}

pub fn record_transcript_saved(
    session_id: &str,
    debate_id: i64,
    partial: bool,
    message_count: usize,
    latency: Duration,
) {
    emit(
        EVENT_SAVED,
        &TranscriptSavedEvent {
            session_id,
            debate_id,
            partial,
            message_count,
            latency_ms: duration_to_ms(latency),
        },
    );
}

pub fn record_transcript_save_failed(
    session_id: &str,
    partial: bool,
    error: &crate::persistence::PersistenceError,
) {
    warn!(
        target: TARGET,
        event = EVENT_SAVE_FAILED,
        session_id,
        partial,
        stage = error.stage().map(|stage| stage.as_str()),
        %error,
        "transcript was not saved"
    );
}

pub(crate) fn duration_to_ms(duration: Duration) -> u64 {
    duration.as_millis().min(u64::MAX as u128) as u64
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn duration_clamps_to_u64() {
        let duration = Duration::new(u64::MAX, 0);
        assert_eq!(duration_to_ms(duration), u64::MAX);
    }

    #[test]
    fn terminated_event_carries_cause_detail() {
        let termination = SessionTermination::Errored(
            crate::orchestrator::TerminationCause::StreamTimeout { idle_ms: 500 },
        );
        let event = SessionTerminatedEvent {
            session_id: "debate-1",
            termination: termination.as_str(),
            detail: termination.cause().map(ToString::to_string),
            turns: 4,
            judge_decisions: 0,
            dropped_frames: 1,
            discarded_partial_turns: 0,
            elapsed_ms: 1_500,
        };
        let encoded = serde_json::to_value(&event).expect("event encodes");
        assert_eq!(encoded["termination"], "stream_timeout");
        assert_eq!(encoded["detail"], "no stream event for 500 ms");
    }
}
