//! Combining independent judge decisions into one verdict.
//!
//! The result never depends on the order decisions arrived in: tallies are
//! keyed by participant, margins are summed in sorted order, and ties fall
//! through to a lexical comparison.

use std::collections::BTreeMap;
use std::fmt;

use serde::Serialize;
use thiserror::Error;
use tracing::warn;

use crate::judging::types::{EnsembleMethod, EnsembleSummary, JudgeDecision, JudgingOutcome};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AggregationError {
    #[error("none of the {received} judge decisions named a usable winner")]
    NoUsableJudgeDecisions { received: usize },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum IncompleteReason {
    MissingWinner,
    NonComparableScores,
}

impl fmt::Display for IncompleteReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            IncompleteReason::MissingWinner => f.write_str("no winner named"),
            IncompleteReason::NonComparableScores => {
                f.write_str("criterion scores do not cover the same criteria for every participant")
            }
        }
    }
}

/// A decision left out of aggregation. Reported, never fatal.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize)]
#[error("judge decision from `{judge_model}` excluded: {reason}")]
pub struct IncompleteJudgeDecision {
    pub judge_model: String,
    pub reason: IncompleteReason,
}

#[derive(Debug, Clone, PartialEq)]
pub struct JudgingReport {
    pub outcome: JudgingOutcome,
    pub summary: Option<EnsembleSummary>,
    pub excluded: Vec<IncompleteJudgeDecision>,
}

pub fn aggregate(decisions: Vec<JudgeDecision>) -> Result<JudgingReport, AggregationError> {
    let received = decisions.len();
    let mut usable = Vec::with_capacity(received);
    let mut excluded = Vec::new();

    for decision in decisions {
        let reason = if decision.winner().is_none() {
            Some(IncompleteReason::MissingWinner)
        } else if !decision.scores_are_comparable() {
            Some(IncompleteReason::NonComparableScores)
        } else {
            None
        };

        match reason {
            Some(reason) => {
                let incomplete = IncompleteJudgeDecision {
                    judge_model: decision.judge_model.clone(),
                    reason,
                };
                warn!(target: "judging", %incomplete, "skipping judge decision");
                excluded.push(incomplete);
            }
            None => usable.push(decision),
        }
    }

    if received > 0 && usable.is_empty() {
        return Err(AggregationError::NoUsableJudgeDecisions { received });
    }

    let outcome = JudgingOutcome::classify(usable);
    let summary = summarize(&outcome);

    Ok(JudgingReport {
        outcome,
        summary,
        excluded,
    })
}

fn summarize(outcome: &JudgingOutcome) -> Option<EnsembleSummary> {
    match outcome {
        JudgingOutcome::NoJudging => None,
        JudgingOutcome::SingleJudge(decision) => Some(single(decision)),
        JudgingOutcome::Ensemble(decisions) => Some(majority(decisions)),
    }
}

fn single(decision: &JudgeDecision) -> EnsembleSummary {
    let winner = decision.winner().unwrap_or_default().to_string();
    let mut summary = EnsembleSummary::new(
        winner,
        decision.winner_margin,
        EnsembleMethod::Single,
        1,
        1,
    );
    summary.summary_reasoning = decision.reasoning.clone();
    summary.summary_feedback = decision.overall_feedback.clone();
    summary
}

#[derive(Debug, Default)]
struct Tally {
    votes: usize,
    margins: Vec<f64>,
}

impl Tally {
    fn margin_sum(&self) -> f64 {
        ordered_sum(&self.margins)
    }

    fn margin_mean(&self) -> f64 {
        if self.margins.is_empty() {
            0.0
        } else {
            self.margin_sum() / self.margins.len() as f64
        }
    }
}

fn majority(decisions: &[JudgeDecision]) -> EnsembleSummary {
    let mut tallies: BTreeMap<&str, Tally> = BTreeMap::new();
    for decision in decisions {
        if let Some(winner) = decision.winner() {
            let tally = tallies.entry(winner).or_default();
            tally.votes += 1;
            tally.margins.push(decision.winner_margin);
        }
    }

    let (winner, tally) = match select_winner(&tallies) {
        Some(selected) => selected,
        None => {
            return EnsembleSummary::new(
                String::new(),
                0.0,
                EnsembleMethod::Majority,
                0,
                decisions.len(),
            )
        }
    };

    let final_margin = tally.margin_mean();
    let mut summary = EnsembleSummary::new(
        winner.to_string(),
        final_margin,
        EnsembleMethod::Majority,
        tally.votes,
        decisions.len(),
    );
    summary.summary_reasoning = Some(format!(
        "{} of {} judges chose {}; mean winning margin {:.2}",
        tally.votes,
        decisions.len(),
        winner,
        final_margin
    ));

    let mut feedback: Vec<&str> = decisions
        .iter()
        .filter(|decision| decision.winner() == Some(winner))
        .filter_map(|decision| decision.overall_feedback.as_deref())
        .map(str::trim)
        .filter(|feedback| !feedback.is_empty())
        .collect();
    feedback.sort_unstable();
    if !feedback.is_empty() {
        summary.summary_feedback = Some(feedback.join("\n\n"));
    }

    summary
}

/// Most votes wins; then the larger summed margin; then the lexically smallest id.
fn select_winner<'a, 'b>(
    tallies: &'b BTreeMap<&'a str, Tally>,
) -> Option<(&'a str, &'b Tally)> {
    tallies
        .iter()
        .max_by(|(a_id, a), (b_id, b)| {
            a.votes
                .cmp(&b.votes)
                .then_with(|| a.margin_sum().total_cmp(&b.margin_sum()))
                .then_with(|| b_id.cmp(a_id))
        })
        .map(|(id, tally)| (*id, tally))
}

/// Per participant, the mean score on each criterion across `decisions`.
pub fn criterion_means(decisions: &[JudgeDecision]) -> BTreeMap<String, BTreeMap<String, f64>> {
    let mut collected: BTreeMap<&str, BTreeMap<&str, Vec<f64>>> = BTreeMap::new();
    for decision in decisions {
        for score in &decision.criterion_scores {
            collected
                .entry(score.participant_id.as_str())
                .or_default()
                .entry(score.criterion.as_str())
                .or_default()
                .push(score.score);
        }
    }

    collected
        .into_iter()
        .map(|(participant, criteria)| {
            let means = criteria
                .into_iter()
                .map(|(criterion, scores)| {
                    let mean = ordered_sum(&scores) / scores.len() as f64;
                    (criterion.to_string(), mean)
                })
                .collect();
            (participant.to_string(), means)
        })
        .collect()
}

fn ordered_sum(values: &[f64]) -> f64 {
    let mut sorted = values.to_vec();
    sorted.sort_by(f64::total_cmp);
    sorted.iter().sum()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::judging::types::CriterionScore;

    fn decision(judge: &str, winner: Option<&str>, margin: f64) -> JudgeDecision {
        JudgeDecision {
            judge_model: judge.to_string(),
            judge_provider: "openrouter".to_string(),
            winner_id: winner.map(str::to_string),
            winner_margin: margin,
            overall_feedback: Some(format!("feedback from {judge}")),
            reasoning: Some(format!("reasoning from {judge}")),
            generation_time_ms: Some(1200),
            cost: None,
            generation_id: None,
            cost_queried_at: None,
            criterion_scores: Vec::new(),
        }
    }

    fn score(criterion: &str, participant: &str, value: f64) -> CriterionScore {
        CriterionScore {
            criterion: criterion.to_string(),
            participant_id: participant.to_string(),
            score: value,
            feedback: None,
        }
    }

    #[test]
    fn no_decisions_means_no_judging() {
        let report = aggregate(Vec::new()).expect("empty input is fine");
        assert_eq!(report.outcome, JudgingOutcome::NoJudging);
        assert!(report.summary.is_none());
        assert!(report.excluded.is_empty());
    }

    #[test]
    fn single_decision_is_copied_with_full_consensus() {
        let report = aggregate(vec![decision("judge-1", Some("model_b"), 2.5)]).expect("aggregates");
        let summary = report.summary.expect("summary");
        assert!(matches!(report.outcome, JudgingOutcome::SingleJudge(_)));
        assert_eq!(summary.method, EnsembleMethod::Single);
        assert_eq!(summary.final_winner_id, "model_b");
        assert_eq!(summary.final_margin, 2.5);
        assert_eq!(summary.num_judges, 1);
        assert_eq!(summary.consensus_level(), 1.0);
        assert_eq!(summary.summary_reasoning.as_deref(), Some("reasoning from judge-1"));
    }

    #[test]
    fn majority_takes_winner_and_mean_margin_of_its_voters() {
        let report = aggregate(vec![
            decision("judge-1", Some("A"), 4.0),
            decision("judge-2", Some("A"), 6.0),
            decision("judge-3", Some("B"), 8.0),
        ])
        .expect("aggregates");
        let summary = report.summary.expect("summary");

        assert_eq!(summary.method, EnsembleMethod::Majority);
        assert_eq!(summary.final_winner_id, "A");
        assert!((summary.final_margin - 5.0).abs() < 1e-9);
        assert_eq!(summary.num_judges, 3);
        assert!((summary.consensus_level() - 2.0 / 3.0).abs() < 1e-9);
        assert_eq!(summary.participating_decisions, vec![0, 1, 2]);
        assert_eq!(
            summary.summary_feedback.as_deref(),
            Some("feedback from judge-1\n\nfeedback from judge-2")
        );
    }

    #[test]
    fn full_tie_resolves_to_lexically_first_in_any_order() {
        let forward = aggregate(vec![
            decision("judge-1", Some("A"), 5.0),
            decision("judge-2", Some("B"), 5.0),
        ])
        .expect("aggregates")
        .summary
        .expect("summary");
        let reversed = aggregate(vec![
            decision("judge-2", Some("B"), 5.0),
            decision("judge-1", Some("A"), 5.0),
        ])
        .expect("aggregates")
        .summary
        .expect("summary");

        assert_eq!(forward.final_winner_id, "A");
        assert_eq!(reversed.final_winner_id, "A");
        assert_eq!(forward.consensus_level(), 0.5);
    }

    #[test]
    fn vote_tie_breaks_on_summed_margin() {
        let summary = aggregate(vec![
            decision("judge-1", Some("A"), 3.0),
            decision("judge-2", Some("B"), 7.0),
        ])
        .expect("aggregates")
        .summary
        .expect("summary");
        assert_eq!(summary.final_winner_id, "B");
        assert_eq!(summary.final_margin, 7.0);
    }

    #[test]
    fn result_is_independent_of_arrival_order() {
        let decisions = vec![
            decision("judge-1", Some("A"), 0.1),
            decision("judge-2", Some("B"), 0.2),
            decision("judge-3", Some("A"), 0.3),
            decision("judge-4", Some("B"), 0.2),
            decision("judge-5", Some("C"), 9.0),
        ];
        let baseline = aggregate(decisions.clone())
            .expect("aggregates")
            .summary
            .expect("summary");

        for rotation in 0..decisions.len() {
            let mut permuted = decisions.clone();
            permuted.rotate_left(rotation);
            for candidate in [permuted.clone(), permuted.into_iter().rev().collect()] {
                let summary = aggregate(candidate)
                    .expect("aggregates")
                    .summary
                    .expect("summary");
                assert_eq!(summary.final_winner_id, baseline.final_winner_id);
                assert_eq!(summary.final_margin.to_bits(), baseline.final_margin.to_bits());
                assert_eq!(summary.consensus_level(), baseline.consensus_level());
                assert_eq!(summary.summary_feedback, baseline.summary_feedback);
            }
        }
    }

    #[test]
    fn decisions_without_winner_are_excluded() {
        let report = aggregate(vec![
            decision("judge-1", Some("A"), 2.0),
            decision("judge-2", None, 0.0),
            decision("judge-3", Some("  "), 0.0),
        ])
        .expect("aggregates");

        assert_eq!(report.excluded.len(), 2);
        assert_eq!(report.excluded[0].reason, IncompleteReason::MissingWinner);
        let summary = report.summary.expect("summary");
        assert_eq!(summary.method, EnsembleMethod::Single);
        assert_eq!(summary.num_judges, 1);
    }

    #[test]
    fn only_incomplete_decisions_is_an_error() {
        let err = aggregate(vec![decision("judge-1", None, 0.0)]).expect_err("nothing usable");
        assert_eq!(err, AggregationError::NoUsableJudgeDecisions { received: 1 });
    }

    #[test]
    fn uneven_criterion_coverage_is_excluded() {
        let mut uneven = decision("judge-1", Some("A"), 1.0);
        uneven.criterion_scores = vec![
            score("logic", "A", 7.0),
            score("logic", "B", 6.0),
            score("evidence", "A", 8.0),
        ];
        let mut even = decision("judge-2", Some("B"), 1.0);
        even.criterion_scores = vec![score("logic", "A", 5.0), score("logic", "B", 6.0)];

        let report = aggregate(vec![uneven, even]).expect("aggregates");
        assert_eq!(report.excluded.len(), 1);
        assert_eq!(report.excluded[0].reason, IncompleteReason::NonComparableScores);
        assert_eq!(report.summary.expect("summary").final_winner_id, "B");
    }

    #[test]
    fn criterion_means_average_across_judges() {
        let mut first = decision("judge-1", Some("A"), 1.0);
        first.criterion_scores = vec![score("logic", "A", 6.0), score("logic", "B", 4.0)];
        let mut second = decision("judge-2", Some("A"), 1.0);
        second.criterion_scores = vec![score("logic", "A", 8.0), score("logic", "B", 5.0)];

        let means = criterion_means(&[first, second]);
        assert_eq!(means["A"]["logic"], 7.0);
        assert_eq!(means["B"]["logic"], 4.5);
    }
}
