use chrono::{SecondsFormat, Utc};

use crate::judging::{criterion_means, EnsembleMethod, EnsembleSummary, JudgeDecision};
use crate::orchestrator::SessionRecord;
use crate::persistence::{
    DebateMetadata, DebateTranscript, ParticipantInfo, TranscriptContext, TranscriptStatus,
};
use crate::telemetry::events::duration_to_ms;

/// What judging left behind for one session, ready to be stored.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ResolvedJudging {
    /// Usable decisions only. Excluded ones are counted, not kept.
    pub decisions: Vec<JudgeDecision>,
    pub summary: Option<EnsembleSummary>,
    pub method: Option<EnsembleMethod>,
    pub excluded: usize,
    pub error: Option<String>,
}

/// Builds the save unit for a finished session.
///
/// `final_phase` and `total_rounds` come from the completion event when the
/// service sent them, otherwise from the last stage the session reached.
pub(crate) fn assemble_transcript(
    record: &SessionRecord,
    judging: ResolvedJudging,
    status: TranscriptStatus,
) -> DebateTranscript {
    let completion = record.completion.clone().unwrap_or_default();
    let final_phase = completion.final_phase.unwrap_or(record.session.phase);
    let total_rounds = completion.total_rounds.unwrap_or(record.session.round);
    let total_debate_time_ms = completion
        .total_debate_time_ms
        .unwrap_or_else(|| duration_to_ms(record.elapsed));

    let means = criterion_means(&judging.decisions);
    let scores = if means.is_empty() {
        None
    } else {
        serde_json::to_value(&means).ok()
    };

    let participants = record
        .setup
        .participants
        .iter()
        .map(|participant| ParticipantInfo {
            id: participant.id.clone(),
            name: participant.name.clone(),
            provider: participant.provider.clone(),
            personality: participant.personality.clone(),
        })
        .collect();

    let context = TranscriptContext {
        remote_session_id: record.session.session_id.clone(),
        status,
        termination: record.termination.as_str().to_string(),
        termination_detail: record.termination.cause().map(ToString::to_string),
        planned_rounds: record.session.planned_rounds,
        suspect: record.is_suspect(),
        out_of_order_turns: record.violations.len(),
        dropped_frames: record.dropped_frames,
        discarded_partial_turns: record.discarded_partial_turns,
        judging_method: judging.method.map(|method| method.as_str().to_string()),
        excluded_judge_decisions: judging.excluded,
        judging_error: judging.error,
    };

    DebateTranscript {
        metadata: DebateMetadata {
            topic: record.session.topic.clone(),
            format: record.session.format.as_str().to_string(),
            participants,
            final_phase: final_phase.as_str().to_string(),
            total_rounds,
            saved_at: Utc::now().to_rfc3339_opts(SecondsFormat::Micros, true),
            message_count: record.turns.len(),
            word_count: record.turns.iter().map(|turn| turn.word_count).sum(),
            total_debate_time_ms,
            scores,
            context,
        },
        messages: record.turns.clone(),
        judge_decisions: judging.decisions,
        ensemble: judging.summary,
    }
}
