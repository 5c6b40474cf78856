mod ensemble;
mod types;

pub use ensemble::{
    aggregate, criterion_means, AggregationError, IncompleteJudgeDecision, IncompleteReason,
    JudgingReport,
};
pub use types::{CriterionScore, EnsembleMethod, EnsembleSummary, JudgeDecision, JudgingOutcome};
