use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use serde::{Deserialize, Serialize};

/// One judge's score for one participant on one criterion.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CriterionScore {
    pub criterion: String,
    pub participant_id: String,
    pub score: f64,
    #[serde(default)]
    pub feedback: Option<String>,
}

/// One judge's verdict as delivered on the event stream.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JudgeDecision {
    pub judge_model: String,
    #[serde(default)]
    pub judge_provider: String,
    #[serde(default)]
    pub winner_id: Option<String>,
    #[serde(default)]
    pub winner_margin: f64,
    #[serde(default)]
    pub overall_feedback: Option<String>,
    #[serde(default)]
    pub reasoning: Option<String>,
    #[serde(default)]
    pub generation_time_ms: Option<u64>,
    #[serde(default)]
    pub cost: Option<f64>,
    #[serde(default)]
    pub generation_id: Option<String>,
    #[serde(default)]
    pub cost_queried_at: Option<String>,
    #[serde(default)]
    pub criterion_scores: Vec<CriterionScore>,
}

impl JudgeDecision {
    pub fn winner(&self) -> Option<&str> {
        self.winner_id
            .as_deref()
            .map(str::trim)
            .filter(|winner| !winner.is_empty())
    }

    /// Every scored participant was scored on the same set of criteria.
    pub fn scores_are_comparable(&self) -> bool {
        let mut criteria_by_participant: BTreeMap<&str, BTreeSet<&str>> = BTreeMap::new();
        for score in &self.criterion_scores {
            if !score.score.is_finite() {
                return false;
            }
            criteria_by_participant
                .entry(score.participant_id.as_str())
                .or_default()
                .insert(score.criterion.as_str());
        }

        let mut sets = criteria_by_participant.values();
        match sets.next() {
            Some(first) => sets.all(|set| set == first),
            None => true,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EnsembleMethod {
    Single,
    Majority,
}

impl EnsembleMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            EnsembleMethod::Single => "single",
            EnsembleMethod::Majority => "majority",
        }
    }
}

impl fmt::Display for EnsembleMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Judging shape selected by how many usable decisions arrived.
#[derive(Debug, Clone, PartialEq)]
pub enum JudgingOutcome {
    NoJudging,
    SingleJudge(JudgeDecision),
    /// Always two or more decisions.
    Ensemble(Vec<JudgeDecision>),
}

impl JudgingOutcome {
    pub fn classify(mut decisions: Vec<JudgeDecision>) -> Self {
        match decisions.len() {
            0 => JudgingOutcome::NoJudging,
            1 => JudgingOutcome::SingleJudge(decisions.remove(0)),
            _ => JudgingOutcome::Ensemble(decisions),
        }
    }

    pub fn decisions(&self) -> &[JudgeDecision] {
        match self {
            JudgingOutcome::NoJudging => &[],
            JudgingOutcome::SingleJudge(decision) => std::slice::from_ref(decision),
            JudgingOutcome::Ensemble(decisions) => decisions,
        }
    }

    pub fn into_decisions(self) -> Vec<JudgeDecision> {
        match self {
            JudgingOutcome::NoJudging => Vec::new(),
            JudgingOutcome::SingleJudge(decision) => vec![decision],
            JudgingOutcome::Ensemble(decisions) => decisions,
        }
    }

    pub fn method(&self) -> Option<EnsembleMethod> {
        match self {
            JudgingOutcome::NoJudging => None,
            JudgingOutcome::SingleJudge(_) => Some(EnsembleMethod::Single),
            JudgingOutcome::Ensemble(_) => Some(EnsembleMethod::Majority),
        }
    }
}

/// Combined verdict across the usable judge decisions of one debate.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EnsembleSummary {
    pub final_winner_id: String,
    pub final_margin: f64,
    pub method: EnsembleMethod,
    pub num_judges: usize,
    consensus_level: f64,
    pub summary_reasoning: Option<String>,
    pub summary_feedback: Option<String>,
    /// Positions of the contributing decisions in the usable decision list.
    pub participating_decisions: Vec<usize>,
}

impl EnsembleSummary {
    pub(crate) fn new(
        final_winner_id: String,
        final_margin: f64,
        method: EnsembleMethod,
        votes_for_winner: usize,
        num_judges: usize,
    ) -> Self {
        let consensus_level = if num_judges == 0 {
            0.0
        } else {
            votes_for_winner as f64 / num_judges as f64
        };
        Self {
            final_winner_id,
            final_margin,
            method,
            num_judges,
            consensus_level,
            summary_reasoning: None,
            summary_feedback: None,
            participating_decisions: (0..num_judges).collect(),
        }
    }

    /// Share of judges that chose the final winner.
    pub fn consensus_level(&self) -> f64 {
        self.consensus_level
    }
}
