use std::collections::{HashMap, HashSet};

use chrono::{DateTime, Utc};
use serde_json::Value;

use crate::orchestrator::error::{OutOfOrderTurn, TerminationCause};
use crate::orchestrator::events::MessageChunk;
use crate::orchestrator::types::{
    word_count, DebateFormat, Position, SessionTermination, Stage, Turn,
};

/// Identity of an in-flight turn.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub(crate) struct TurnKey {
    pub(crate) speaker_id: String,
    pub(crate) stage: Stage,
}

#[derive(Debug, Default)]
struct PendingTurn {
    content: String,
    fragments: usize,
    position: Position,
    cost: Option<f64>,
    generation_id: Option<String>,
    cost_queried_at: Option<String>,
    metadata: Option<Value>,
}

impl PendingTurn {
    fn absorb(&mut self, chunk: MessageChunk) {
        // Fragments are concatenated verbatim; the service owns spacing.
        self.content.push_str(&chunk.content);
        self.fragments += 1;
        self.position = chunk.position;
        if chunk.cost.is_some() {
            self.cost = chunk.cost;
        }
        if chunk.generation_id.is_some() {
            self.generation_id = chunk.generation_id;
        }
        if chunk.cost_queried_at.is_some() {
            self.cost_queried_at = chunk.cost_queried_at;
        }
        if chunk.metadata.is_some() {
            self.metadata = chunk.metadata;
        }
    }

    fn finish(self, key: TurnKey, timestamp: DateTime<Utc>) -> Turn {
        Turn {
            word_count: word_count(&self.content),
            speaker_id: key.speaker_id,
            position: self.position,
            phase: key.stage.phase,
            round_number: key.stage.round,
            content: self.content,
            timestamp,
            cost: self.cost,
            generation_id: self.generation_id,
            cost_queried_at: self.cost_queried_at,
            metadata: self.metadata,
        }
    }
}

/// Joins streamed fragments into whole turns, one buffer per speaker and stage.
#[derive(Debug, Default)]
pub(crate) struct TurnReassembler {
    pending: HashMap<TurnKey, PendingTurn>,
}

impl TurnReassembler {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Returns the finished turn when `chunk` carries the completion flag.
    pub(crate) fn ingest(&mut self, chunk: MessageChunk, now: DateTime<Utc>) -> Option<Turn> {
        let key = TurnKey {
            speaker_id: chunk.speaker_id.clone(),
            stage: Stage::new(chunk.phase, chunk.round_number),
        };

        if !chunk.is_complete {
            self.pending.entry(key).or_default().absorb(chunk);
            return None;
        }

        let mut pending = self.pending.remove(&key).unwrap_or_default();
        pending.absorb(chunk);
        Some(pending.finish(key, now))
    }

    pub(crate) fn pending_len(&self) -> usize {
        self.pending.len()
    }

    /// Drops every unfinished buffer, returning what was thrown away.
    pub(crate) fn discard_pending(&mut self) -> Vec<TurnKey> {
        let mut keys: Vec<TurnKey> = self.pending.drain().map(|(key, _)| key).collect();
        keys.sort_by(|a, b| {
            a.stage
                .cmp(&b.stage)
                .then_with(|| a.speaker_id.cmp(&b.speaker_id))
        });
        keys
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum TrackerState {
    Active(Stage),
    Completed,
    Errored(TerminationCause),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum TurnVerdict {
    Accepted,
    Advanced { from: Stage, to: Stage },
    OutOfOrder(OutOfOrderTurn),
    Ignored,
}

/// Walks the format's stage sequence as completed turns arrive.
///
/// Only the current stage and its immediate successor are legal. Anything else
/// is recorded as a violation without moving the cursor.
#[derive(Debug)]
pub(crate) struct DebateStateTracker {
    sequence: Vec<Stage>,
    cursor: usize,
    state: TrackerState,
    participants: Vec<String>,
    spoken: HashSet<String>,
    violations: Vec<OutOfOrderTurn>,
}

impl DebateStateTracker {
    pub(crate) fn new(format: DebateFormat, participants: Vec<String>) -> Self {
        let sequence = format.stages();
        let first = sequence[0];
        Self {
            sequence,
            cursor: 0,
            state: TrackerState::Active(first),
            participants,
            spoken: HashSet::new(),
            violations: Vec::new(),
        }
    }

    #[cfg(test)]
    pub(crate) fn state(&self) -> &TrackerState {
        &self.state
    }

    /// Last stage the debate reached, terminal or not.
    pub(crate) fn stage(&self) -> Stage {
        self.sequence[self.cursor]
    }

    /// How the debate ended, once it has.
    pub(crate) fn termination(&self) -> Option<SessionTermination> {
        match &self.state {
            TrackerState::Active(_) => None,
            TrackerState::Completed => Some(SessionTermination::Completed),
            TrackerState::Errored(cause) => Some(SessionTermination::Errored(cause.clone())),
        }
    }

    pub(crate) fn is_terminal(&self) -> bool {
        !matches!(self.state, TrackerState::Active(_))
    }

    pub(crate) fn violations(&self) -> &[OutOfOrderTurn] {
        &self.violations
    }

    fn round_complete(&self) -> bool {
        self.participants
            .iter()
            .all(|participant| self.spoken.contains(participant))
    }

    pub(crate) fn observe_turn(&mut self, turn: &Turn) -> TurnVerdict {
        let current = match self.state {
            TrackerState::Active(stage) => stage,
            _ => return TurnVerdict::Ignored,
        };
        let received = turn.stage();

        if received == current {
            self.spoken.insert(turn.speaker_id.clone());
            return TurnVerdict::Accepted;
        }

        let next = self.sequence.get(self.cursor + 1).copied();
        if next == Some(received) {
            let premature = !self.round_complete();
            self.cursor += 1;
            self.state = TrackerState::Active(received);
            self.spoken.clear();
            self.spoken.insert(turn.speaker_id.clone());

            if premature {
                return TurnVerdict::OutOfOrder(self.flag(turn, current, received, true));
            }
            return TurnVerdict::Advanced {
                from: current,
                to: received,
            };
        }

        TurnVerdict::OutOfOrder(self.flag(turn, current, received, false))
    }

    fn flag(&mut self, turn: &Turn, expected: Stage, received: Stage, premature: bool) -> OutOfOrderTurn {
        let violation = OutOfOrderTurn {
            speaker_id: turn.speaker_id.clone(),
            expected,
            received,
            premature,
        };
        self.violations.push(violation.clone());
        violation
    }

    /// Returns false when the tracker was already terminal.
    pub(crate) fn complete(&mut self) -> bool {
        if self.is_terminal() {
            return false;
        }
        self.state = TrackerState::Completed;
        true
    }

    /// Returns false when the tracker was already terminal.
    pub(crate) fn fail(&mut self, cause: TerminationCause) -> bool {
        if self.is_terminal() {
            return false;
        }
        self.state = TrackerState::Errored(cause);
        true
    }
}
