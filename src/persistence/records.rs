use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::judging::{EnsembleSummary, JudgeDecision};
use crate::orchestrator::Turn;

/// Participant entry stored in the `participants` JSON column.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParticipantInfo {
    pub id: String,
    pub name: String,
    pub provider: String,
    #[serde(default)]
    pub personality: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TranscriptStatus {
    Complete,
    Partial,
}

/// How the session ended, stored in the `context_metadata` JSON column.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TranscriptContext {
    pub remote_session_id: String,
    pub status: TranscriptStatus,
    pub termination: String,
    #[serde(default)]
    pub termination_detail: Option<String>,
    pub planned_rounds: u32,
    pub suspect: bool,
    pub out_of_order_turns: usize,
    pub dropped_frames: usize,
    pub discarded_partial_turns: usize,
    #[serde(default)]
    pub judging_method: Option<String>,
    pub excluded_judge_decisions: usize,
    #[serde(default)]
    pub judging_error: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DebateMetadata {
    pub topic: String,
    pub format: String,
    pub participants: Vec<ParticipantInfo>,
    pub final_phase: String,
    pub total_rounds: u32,
    pub saved_at: String,
    pub message_count: usize,
    pub word_count: usize,
    pub total_debate_time_ms: u64,
    pub scores: Option<Value>,
    pub context: TranscriptContext,
}

/// One save unit: the debate row and its whole judging graph.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DebateTranscript {
    pub metadata: DebateMetadata,
    pub messages: Vec<Turn>,
    pub judge_decisions: Vec<JudgeDecision>,
    pub ensemble: Option<EnsembleSummary>,
}

impl DebateTranscript {
    pub fn is_partial(&self) -> bool {
        self.metadata.context.status == TranscriptStatus::Partial
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DebateRow {
    pub id: i64,
    pub topic: String,
    pub format: String,
    pub participants: Vec<ParticipantInfo>,
    pub final_phase: String,
    pub total_rounds: i64,
    pub saved_at: String,
    pub message_count: i64,
    pub word_count: i64,
    pub total_debate_time_ms: i64,
    pub scores: Option<Value>,
    pub context: Option<TranscriptContext>,
    pub created_at: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MessageRow {
    pub id: i64,
    pub debate_id: i64,
    pub speaker_id: String,
    pub position: String,
    pub phase: String,
    pub round_number: i64,
    pub content: String,
    pub timestamp: String,
    pub word_count: i64,
    pub metadata: Option<Value>,
    pub cost: Option<f64>,
    pub generation_id: Option<String>,
    pub cost_queried_at: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CriterionScoreRow {
    pub id: i64,
    pub judge_decision_id: i64,
    pub criterion: String,
    pub participant_id: String,
    pub score: f64,
    pub feedback: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct JudgeDecisionRow {
    pub id: i64,
    pub debate_id: i64,
    pub judge_model: String,
    pub judge_provider: String,
    pub winner_id: String,
    pub winner_margin: f64,
    pub overall_feedback: Option<String>,
    pub reasoning: Option<String>,
    pub generation_time_ms: Option<i64>,
    pub cost: Option<f64>,
    pub generation_id: Option<String>,
    pub cost_queried_at: Option<String>,
    pub created_at: Option<String>,
    pub criterion_scores: Vec<CriterionScoreRow>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EnsembleSummaryRow {
    pub id: i64,
    pub debate_id: i64,
    pub final_winner_id: String,
    pub final_margin: f64,
    pub ensemble_method: String,
    pub num_judges: i64,
    pub consensus_level: Option<f64>,
    pub summary_reasoning: Option<String>,
    pub summary_feedback: Option<String>,
    pub participating_judge_decision_ids: Vec<i64>,
    pub created_at: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DebateListEntry {
    pub id: i64,
    pub topic: String,
    pub format: String,
    pub final_phase: String,
    pub message_count: i64,
    pub saved_at: String,
}

/// A debate read back with its full turn and judging graph.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StoredDebate {
    pub debate: DebateRow,
    pub messages: Vec<MessageRow>,
    pub judge_decisions: Vec<JudgeDecisionRow>,
    pub ensemble: Option<EnsembleSummaryRow>,
}

impl StoredDebate {
    pub fn participant_ids(&self) -> Vec<&str> {
        self.debate
            .participants
            .iter()
            .map(|participant| participant.id.as_str())
            .collect()
    }
}
