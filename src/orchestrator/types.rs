use std::collections::{BTreeMap, HashSet};
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::judging::JudgeDecision;
use crate::orchestrator::constants::LOCAL_PROVIDERS;
use crate::orchestrator::error::{OutOfOrderTurn, SessionError, TerminationCause, UnknownVariant};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DebateFormat {
    Oxford,
    Parliamentary,
    Socratic,
}

impl DebateFormat {
    pub fn as_str(&self) -> &'static str {
        match self {
            DebateFormat::Oxford => "oxford",
            DebateFormat::Parliamentary => "parliamentary",
            DebateFormat::Socratic => "socratic",
        }
    }

    /// Phases in speaking order. Phase `i` is played in round `i + 1`.
    pub fn phases(&self) -> &'static [Phase] {
        match self {
            DebateFormat::Oxford => &[
                Phase::Opening,
                Phase::Rebuttal,
                Phase::CrossExamination,
                Phase::Closing,
            ],
            DebateFormat::Parliamentary => &[Phase::Opening, Phase::Rebuttal, Phase::Closing],
            DebateFormat::Socratic => &[
                Phase::Opening,
                Phase::Questioning,
                Phase::Rebuttal,
                Phase::Closing,
            ],
        }
    }

    pub fn stages(&self) -> Vec<Stage> {
        self.phases()
            .iter()
            .enumerate()
            .map(|(index, phase)| Stage::new(*phase, index as u32 + 1))
            .collect()
    }

    pub fn planned_rounds(&self) -> u32 {
        self.phases().len() as u32
    }
}

impl fmt::Display for DebateFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DebateFormat {
    type Err = UnknownVariant;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "oxford" => Ok(DebateFormat::Oxford),
            "parliamentary" => Ok(DebateFormat::Parliamentary),
            "socratic" => Ok(DebateFormat::Socratic),
            _ => Err(UnknownVariant::new("debate format", value)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    Opening,
    Rebuttal,
    CrossExamination,
    Questioning,
    Closing,
}

impl Phase {
    pub fn as_str(&self) -> &'static str {
        match self {
            Phase::Opening => "opening",
            Phase::Rebuttal => "rebuttal",
            Phase::CrossExamination => "cross_examination",
            Phase::Questioning => "questioning",
            Phase::Closing => "closing",
        }
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Phase {
    type Err = UnknownVariant;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "opening" => Ok(Phase::Opening),
            "rebuttal" => Ok(Phase::Rebuttal),
            "cross_examination" => Ok(Phase::CrossExamination),
            "questioning" => Ok(Phase::Questioning),
            "closing" => Ok(Phase::Closing),
            _ => Err(UnknownVariant::new("debate phase", value)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Position {
    Pro,
    Con,
    Neutral,
}

impl Position {
    pub fn as_str(&self) -> &'static str {
        match self {
            Position::Pro => "pro",
            Position::Con => "con",
            Position::Neutral => "neutral",
        }
    }
}

impl Default for Position {
    fn default() -> Self {
        Position::Neutral
    }
}

/// A (phase, round) pair. The unit the state tracker advances through.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Stage {
    pub phase: Phase,
    pub round: u32,
}

impl Stage {
    pub fn new(phase: Phase, round: u32) -> Self {
        Self { phase, round }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} (round {})", self.phase, self.round)
    }
}

/// One speaker's complete contribution for a phase and round.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Turn {
    pub speaker_id: String,
    pub position: Position,
    pub phase: Phase,
    pub round_number: u32,
    pub content: String,
    pub timestamp: DateTime<Utc>,
    pub word_count: usize,
    pub cost: Option<f64>,
    pub generation_id: Option<String>,
    pub cost_queried_at: Option<String>,
    pub metadata: Option<Value>,
}

impl Turn {
    pub fn stage(&self) -> Stage {
        Stage::new(self.phase, self.round_number)
    }
}

/// Whitespace-delimited token count.
pub fn word_count(text: &str) -> usize {
    text.split_whitespace().count()
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParticipantSetup {
    pub id: String,
    pub name: String,
    pub provider: String,
    #[serde(default)]
    pub personality: String,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
    #[serde(default = "default_temperature")]
    pub temperature: f32,
}

fn default_max_tokens() -> u32 {
    300
}

fn default_temperature() -> f32 {
    0.7
}

impl ParticipantSetup {
    pub fn is_local(&self) -> bool {
        LOCAL_PROVIDERS
            .iter()
            .any(|provider| provider.eq_ignore_ascii_case(self.provider.trim()))
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct JudgingSetup {
    #[serde(default)]
    pub judge_models: Vec<String>,
    #[serde(default)]
    pub judge_provider: Option<String>,
    #[serde(default)]
    pub criteria: Vec<String>,
}

/// Everything needed to ask the service for a new debate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DebateSetup {
    pub topic: String,
    pub format: DebateFormat,
    #[serde(default = "default_word_limit")]
    pub word_limit: u32,
    pub participants: Vec<ParticipantSetup>,
    #[serde(default)]
    pub judging: JudgingSetup,
}

fn default_word_limit() -> u32 {
    200
}

impl DebateSetup {
    pub fn validate(&self) -> Result<(), SessionError> {
        if self.topic.trim().is_empty() {
            return Err(SessionError::invalid_setup("topic must not be empty"));
        }
        if self.participants.len() < 2 {
            return Err(SessionError::invalid_setup(format!(
                "at least two participants are required, got {}",
                self.participants.len()
            )));
        }
        if self.word_limit == 0 {
            return Err(SessionError::invalid_setup("word limit must be positive"));
        }

        let mut seen = HashSet::new();
        for participant in &self.participants {
            let id = participant.id.trim();
            if id.is_empty() {
                return Err(SessionError::invalid_setup("participant id must not be empty"));
            }
            if participant.provider.trim().is_empty() {
                return Err(SessionError::invalid_setup(format!(
                    "participant `{id}` has no provider"
                )));
            }
            if !seen.insert(id) {
                return Err(SessionError::invalid_setup(format!(
                    "participant id `{id}` is used twice"
                )));
            }
        }

        if self
            .judging
            .judge_models
            .iter()
            .any(|model| model.trim().is_empty())
        {
            return Err(SessionError::invalid_setup("judge model names must not be empty"));
        }
        if !self.judging.judge_models.is_empty()
            && self
                .judging
                .judge_provider
                .as_deref()
                .map_or(true, |provider| provider.trim().is_empty())
        {
            return Err(SessionError::invalid_setup(
                "a judge provider is required when judge models are configured",
            ));
        }

        Ok(())
    }

    pub fn has_local_participant(&self) -> bool {
        self.participants.iter().any(ParticipantSetup::is_local)
    }

    pub fn participant_ids(&self) -> Vec<String> {
        self.participants
            .iter()
            .map(|participant| participant.id.clone())
            .collect()
    }

    pub fn to_request(&self) -> DebateSetupRequest {
        let models = self
            .participants
            .iter()
            .map(|participant| {
                (
                    participant.id.clone(),
                    ModelSettings {
                        name: participant.name.clone(),
                        provider: participant.provider.clone(),
                        personality: participant.personality.clone(),
                        max_tokens: participant.max_tokens,
                        temperature: participant.temperature,
                    },
                )
            })
            .collect();

        DebateSetupRequest {
            topic: self.topic.clone(),
            format: self.format,
            word_limit: self.word_limit,
            models,
            judge_models: self.judging.judge_models.clone(),
            judge_provider: self.judging.judge_provider.clone().unwrap_or_default(),
            criteria: self.judging.criteria.clone(),
        }
    }
}

/// Wire body for `POST /api/debates`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DebateSetupRequest {
    pub topic: String,
    pub format: DebateFormat,
    pub word_limit: u32,
    pub models: BTreeMap<String, ModelSettings>,
    pub judge_models: Vec<String>,
    pub judge_provider: String,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub criteria: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ModelSettings {
    pub name: String,
    pub provider: String,
    pub personality: String,
    pub max_tokens: u32,
    pub temperature: f32,
}

/// Service reply to a creation request.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct DebateCreated {
    pub id: String,
    #[serde(default)]
    pub status: String,
    #[serde(default)]
    pub config: Option<Value>,
}

/// Client-side view of a remote debate.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DebateSession {
    pub session_id: String,
    pub topic: String,
    pub format: DebateFormat,
    pub participants: Vec<String>,
    pub planned_rounds: u32,
    pub phase: Phase,
    pub round: u32,
    pub created_at: DateTime<Utc>,
}

impl DebateSession {
    pub fn new(session_id: impl Into<String>, setup: &DebateSetup) -> Self {
        let first = setup.format.phases()[0];
        Self {
            session_id: session_id.into(),
            topic: setup.topic.clone(),
            format: setup.format,
            participants: setup.participant_ids(),
            planned_rounds: setup.format.planned_rounds(),
            phase: first,
            round: 1,
            created_at: Utc::now(),
        }
    }

    pub fn stage(&self) -> Stage {
        Stage::new(self.phase, self.round)
    }

    pub(crate) fn move_to(&mut self, stage: Stage) {
        self.phase = stage.phase;
        self.round = stage.round;
    }
}

/// Summary carried by the `debate-completed` event. Every field is optional on the wire.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CompletionSummary {
    #[serde(default)]
    pub final_phase: Option<Phase>,
    #[serde(default)]
    pub total_rounds: Option<u32>,
    #[serde(default)]
    pub message_count: Option<usize>,
    #[serde(default)]
    pub total_debate_time_ms: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionTermination {
    Completed,
    Errored(TerminationCause),
}

impl SessionTermination {
    pub fn is_complete(&self) -> bool {
        matches!(self, SessionTermination::Completed)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            SessionTermination::Completed => "completed",
            SessionTermination::Errored(cause) => cause.as_str(),
        }
    }

    pub fn cause(&self) -> Option<&TerminationCause> {
        match self {
            SessionTermination::Completed => None,
            SessionTermination::Errored(cause) => Some(cause),
        }
    }
}

/// Live progress broadcast while a session runs.
#[derive(Debug, Clone, PartialEq)]
pub enum SessionUpdate {
    TurnCompleted(Turn),
    StageAdvanced { from: Stage, to: Stage },
    JudgeDecisionReceived {
        judge_model: String,
        winner_id: Option<String>,
    },
    ProtocolViolation(OutOfOrderTurn),
    Terminated(SessionTermination),
}

/// Everything a finished session accumulated, handed to judging and persistence.
#[derive(Debug, Clone)]
pub struct SessionRecord {
    pub setup: DebateSetup,
    pub session: DebateSession,
    pub turns: Vec<Turn>,
    pub judge_decisions: Vec<JudgeDecision>,
    pub termination: SessionTermination,
    pub completion: Option<CompletionSummary>,
    pub violations: Vec<OutOfOrderTurn>,
    pub dropped_frames: usize,
    pub discarded_partial_turns: usize,
    pub elapsed: Duration,
}

impl SessionRecord {
    /// At least one turn arrived outside the expected phase order.
    pub fn is_suspect(&self) -> bool {
        !self.violations.is_empty()
    }
}
