//! Decoding of raw stream frames into typed debate events.

use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::Value;

use crate::judging::JudgeDecision;
use crate::orchestrator::constants::{
    EVENT_DEBATE_COMPLETED, EVENT_JUDGE_DECISION, EVENT_MESSAGE_CHUNK, EVENT_STREAM_ERROR,
};
use crate::orchestrator::error::MalformedEvent;
use crate::orchestrator::types::{CompletionSummary, Phase, Position};

#[derive(Debug, Clone, PartialEq)]
pub enum DebateEvent {
    MessageChunk(MessageChunk),
    JudgeDecision(JudgeDecision),
    DebateCompleted(CompletionSummary),
    StreamError { message: String },
}

impl DebateEvent {
    pub fn kind(&self) -> &'static str {
        match self {
            DebateEvent::MessageChunk(_) => EVENT_MESSAGE_CHUNK,
            DebateEvent::JudgeDecision(_) => EVENT_JUDGE_DECISION,
            DebateEvent::DebateCompleted(_) => EVENT_DEBATE_COMPLETED,
            DebateEvent::StreamError { .. } => EVENT_STREAM_ERROR,
        }
    }
}

/// A fragment of one speaker's turn.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct MessageChunk {
    pub speaker_id: String,
    #[serde(default)]
    pub position: Position,
    pub phase: Phase,
    pub round_number: u32,
    #[serde(default)]
    pub content: String,
    #[serde(default, alias = "complete")]
    pub is_complete: bool,
    #[serde(default)]
    pub cost: Option<f64>,
    #[serde(default)]
    pub generation_id: Option<String>,
    #[serde(default)]
    pub cost_queried_at: Option<String>,
    #[serde(default)]
    pub metadata: Option<Value>,
}

#[derive(Deserialize)]
struct JudgeDecisionFrame {
    decision: JudgeDecision,
}

#[derive(Deserialize)]
struct StreamErrorFrame {
    #[serde(alias = "error")]
    message: String,
}

/// Decodes one text frame. Total: every input yields an event or a [`MalformedEvent`].
pub fn decode_frame(raw: &str) -> Result<DebateEvent, MalformedEvent> {
    let value: Value =
        serde_json::from_str(raw).map_err(|err| MalformedEvent::NotJson(err.to_string()))?;

    let kind = match &value {
        Value::Object(map) => match map.get("type") {
            Some(Value::String(kind)) => kind.clone(),
            _ => return Err(MalformedEvent::MissingType),
        },
        _ => return Err(MalformedEvent::NotAnObject),
    };

    match kind.as_str() {
        EVENT_MESSAGE_CHUNK => {
            let chunk: MessageChunk = payload(EVENT_MESSAGE_CHUNK, value)?;
            if chunk.speaker_id.trim().is_empty() {
                return Err(MalformedEvent::InvalidPayload {
                    kind: EVENT_MESSAGE_CHUNK,
                    reason: "speaker_id is empty".to_string(),
                });
            }
            Ok(DebateEvent::MessageChunk(chunk))
        }
        EVENT_JUDGE_DECISION => payload::<JudgeDecisionFrame>(EVENT_JUDGE_DECISION, value)
            .map(|frame| DebateEvent::JudgeDecision(frame.decision)),
        EVENT_DEBATE_COMPLETED => {
            payload(EVENT_DEBATE_COMPLETED, value).map(DebateEvent::DebateCompleted)
        }
        EVENT_STREAM_ERROR => payload::<StreamErrorFrame>(EVENT_STREAM_ERROR, value)
            .map(|frame| DebateEvent::StreamError {
                message: frame.message,
            }),
        _ => Err(MalformedEvent::UnknownType(kind)),
    }
}

fn payload<T: DeserializeOwned>(kind: &'static str, value: Value) -> Result<T, MalformedEvent> {
    serde_json::from_value(value).map_err(|err| MalformedEvent::InvalidPayload {
        kind,
        reason: err.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_message_chunk() {
        let raw = r#"{"type":"message-chunk","speaker_id":"model_a","position":"pro","phase":"opening","round_number":1,"content":"Hello ","is_complete":false}"#;
        match decode_frame(raw).expect("chunk decodes") {
            DebateEvent::MessageChunk(chunk) => {
                assert_eq!(chunk.speaker_id, "model_a");
                assert_eq!(chunk.position, Position::Pro);
                assert_eq!(chunk.phase, Phase::Opening);
                assert_eq!(chunk.round_number, 1);
                assert_eq!(chunk.content, "Hello ");
                assert!(!chunk.is_complete);
            }
            other => panic!("unexpected event {other:?}"),
        }
    }

    #[test]
    fn decodes_judge_decision_with_scores() {
        let raw = r#"{"type":"judge-decision","decision":{"judge_model":"judge-1","judge_provider":"openrouter","winner_id":"model_b","winner_margin":3.5,"criterion_scores":[{"criterion":"logic","participant_id":"model_a","score":6.0},{"criterion":"logic","participant_id":"model_b","score":8.0}]}}"#;
        match decode_frame(raw).expect("decision decodes") {
            DebateEvent::JudgeDecision(decision) => {
                assert_eq!(decision.judge_model, "judge-1");
                assert_eq!(decision.winner_id.as_deref(), Some("model_b"));
                assert_eq!(decision.criterion_scores.len(), 2);
            }
            other => panic!("unexpected event {other:?}"),
        }
    }

    #[test]
    fn completion_fields_are_optional() {
        let raw = r#"{"type":"debate-completed"}"#;
        assert_eq!(
            decode_frame(raw).expect("completion decodes"),
            DebateEvent::DebateCompleted(CompletionSummary::default())
        );

        let raw = r#"{"type":"debate-completed","final_phase":"closing","total_rounds":4}"#;
        match decode_frame(raw).expect("completion decodes") {
            DebateEvent::DebateCompleted(summary) => {
                assert_eq!(summary.final_phase, Some(Phase::Closing));
                assert_eq!(summary.total_rounds, Some(4));
            }
            other => panic!("unexpected event {other:?}"),
        }
    }

    #[test]
    fn stream_error_accepts_error_field() {
        let raw = r#"{"type":"stream-error","error":"model crashed"}"#;
        assert_eq!(
            decode_frame(raw).expect("error decodes"),
            DebateEvent::StreamError {
                message: "model crashed".to_string()
            }
        );
    }

    #[test]
    fn rejects_frames_that_are_not_events() {
        assert!(matches!(
            decode_frame("not json"),
            Err(MalformedEvent::NotJson(_))
        ));
        assert_eq!(decode_frame("[1, 2]"), Err(MalformedEvent::NotAnObject));
        assert_eq!(
            decode_frame(r#"{"speaker_id":"model_a"}"#),
            Err(MalformedEvent::MissingType)
        );
        assert_eq!(
            decode_frame(r#"{"type":42}"#),
            Err(MalformedEvent::MissingType)
        );
    }

    #[test]
    fn unknown_type_is_reported_by_name() {
        assert_eq!(
            decode_frame(r#"{"type":"judging-started"}"#),
            Err(MalformedEvent::UnknownType("judging-started".to_string()))
        );
    }

    #[test]
    fn missing_required_field_is_invalid_payload() {
        let raw = r#"{"type":"message-chunk","speaker_id":"model_a","round_number":1}"#;
        match decode_frame(raw) {
            Err(MalformedEvent::InvalidPayload { kind, .. }) => assert_eq!(kind, "message-chunk"),
            other => panic!("unexpected result {other:?}"),
        }

        let raw = r#"{"type":"message-chunk","speaker_id":" ","phase":"opening","round_number":1}"#;
        assert!(matches!(
            decode_frame(raw),
            Err(MalformedEvent::InvalidPayload { .. })
        ));
    }
}
