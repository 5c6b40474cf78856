//! Fixtures shared by the unit tests of several modules.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::{anyhow, bail, Result};
use async_trait::async_trait;
use chrono::Utc;
use serde_json::json;

use crate::judging::{aggregate, CriterionScore, JudgeDecision};
use crate::orchestrator::{
    DebateCreated, DebateFormat, DebateService, DebateSetup, DebateSetupRequest, EventStream,
    JudgingSetup, ParticipantSetup, Phase, Position, Turn,
};
use crate::persistence::{
    DebateMetadata, DebateTranscript, ParticipantInfo, PersistenceError, StorageFault,
    TranscriptContext, TranscriptSink, TranscriptStatus, WriteStage,
};

pub(crate) const DEBATE_ID: &str = "debate-1";

pub(crate) fn participant(id: &str, provider: &str) -> ParticipantSetup {
    ParticipantSetup {
        id: id.to_string(),
        name: format!("{id}-model"),
        provider: provider.to_string(),
        personality: "analytical".to_string(),
        max_tokens: 300,
        temperature: 0.7,
    }
}

pub(crate) fn setup(format: DebateFormat, provider: &str, judges: &[&str]) -> DebateSetup {
    DebateSetup {
        topic: "Cities should ban private cars".to_string(),
        format,
        word_limit: 200,
        participants: vec![participant("model_a", provider), participant("model_b", provider)],
        judging: JudgingSetup {
            judge_models: judges.iter().map(|judge| judge.to_string()).collect(),
            judge_provider: (!judges.is_empty()).then(|| "openrouter".to_string()),
            criteria: vec!["logic".to_string(), "evidence".to_string()],
        },
    }
}

pub(crate) enum Step {
    Frame(String),
    Delay(Duration),
    Fail(String),
    End,
    Hang,
}

pub(crate) fn frames(raw: Vec<String>) -> Vec<Step> {
    raw.into_iter().map(Step::Frame).collect()
}

pub(crate) fn chunk_frame(
    speaker: &str,
    phase: Phase,
    round: u32,
    content: &str,
    complete: bool,
) -> String {
    let position = if speaker == "model_a" { "pro" } else { "con" };
    json!({
        "type": "message-chunk",
        "speaker_id": speaker,
        "position": position,
        "phase": phase.as_str(),
        "round_number": round,
        "content": content,
        "is_complete": complete,
    })
    .to_string()
}

/// A turn streamed as two fragments.
pub(crate) fn turn_frames(speaker: &str, phase: Phase, round: u32) -> Vec<String> {
    vec![
        chunk_frame(speaker, phase, round, &format!("{speaker} argues "), false),
        chunk_frame(speaker, phase, round, &format!("during {}.", phase.as_str()), true),
    ]
}

/// Every participant speaks once in each of the first `rounds` stages.
pub(crate) fn rounds_frames(format: DebateFormat, rounds: usize) -> Vec<String> {
    format
        .stages()
        .into_iter()
        .take(rounds)
        .flat_map(|stage| {
            ["model_a", "model_b"]
                .into_iter()
                .flat_map(move |speaker| turn_frames(speaker, stage.phase, stage.round))
        })
        .collect()
}

pub(crate) fn judge_frame(model: &str, winner: Option<&str>, margin: f64) -> String {
    json!({
        "type": "judge-decision",
        "decision": judge_decision(model, winner, margin),
    })
    .to_string()
}

pub(crate) fn completed_frame(final_phase: Option<&str>) -> String {
    match final_phase {
        Some(phase) => json!({ "type": "debate-completed", "final_phase": phase }).to_string(),
        None => json!({ "type": "debate-completed" }).to_string(),
    }
}

pub(crate) fn stream_error_frame(message: &str) -> String {
    json!({ "type": "stream-error", "message": message }).to_string()
}

pub(crate) fn judge_decision(model: &str, winner: Option<&str>, margin: f64) -> JudgeDecision {
    let score = |criterion: &str, participant: &str, value: f64| CriterionScore {
        criterion: criterion.to_string(),
        participant_id: participant.to_string(),
        score: value,
        feedback: Some(format!("{criterion} feedback")),
    };
    JudgeDecision {
        judge_model: model.to_string(),
        judge_provider: "openrouter".to_string(),
        winner_id: winner.map(str::to_string),
        winner_margin: margin,
        overall_feedback: Some(format!("{model} overall")),
        reasoning: Some(format!("{model} reasoning")),
        generation_time_ms: Some(900),
        cost: Some(0.002),
        generation_id: Some(format!("gen-{model}")),
        cost_queried_at: None,
        criterion_scores: vec![
            score("logic", "model_a", 7.0),
            score("logic", "model_b", 6.0),
            score("evidence", "model_a", 8.0),
            score("evidence", "model_b", 5.5),
        ],
    }
}

pub(crate) fn sample_transcript(topic: &str, saved_at: &str, judges: usize) -> DebateTranscript {
    let messages: Vec<Turn> = [
        ("model_a", Phase::Opening, 1),
        ("model_b", Phase::Opening, 1),
        ("model_a", Phase::Rebuttal, 2),
        ("model_b", Phase::Rebuttal, 2),
    ]
    .into_iter()
    .map(|(speaker, phase, round)| Turn {
        speaker_id: speaker.to_string(),
        position: if speaker == "model_a" {
            Position::Pro
        } else {
            Position::Con
        },
        phase,
        round_number: round,
        content: format!("{speaker} speaks in {}", phase.as_str()),
        timestamp: Utc::now(),
        word_count: 4,
        cost: Some(0.001),
        generation_id: None,
        cost_queried_at: None,
        metadata: Some(json!({ "model": speaker })),
    })
    .collect();

    let decisions: Vec<JudgeDecision> = (0..judges)
        .map(|index| {
            let winner = if index % 3 == 2 { "model_b" } else { "model_a" };
            judge_decision(&format!("judge-{index}"), Some(winner), 2.0 + index as f64)
        })
        .collect();
    let report = aggregate(decisions).expect("fixture decisions are usable");
    let ensemble = report.summary;
    let judge_decisions = report.outcome.into_decisions();

    DebateTranscript {
        metadata: DebateMetadata {
            topic: topic.to_string(),
            format: "oxford".to_string(),
            participants: ["model_a", "model_b"]
                .into_iter()
                .map(|id| ParticipantInfo {
                    id: id.to_string(),
                    name: format!("{id}-model"),
                    provider: "openrouter".to_string(),
                    personality: "analytical".to_string(),
                })
                .collect(),
            final_phase: "rebuttal".to_string(),
            total_rounds: 2,
            saved_at: saved_at.to_string(),
            message_count: messages.len(),
            word_count: messages.iter().map(|turn| turn.word_count).sum(),
            total_debate_time_ms: 4_200,
            scores: None,
            context: TranscriptContext {
                remote_session_id: DEBATE_ID.to_string(),
                status: TranscriptStatus::Complete,
                termination: "completed".to_string(),
                termination_detail: None,
                planned_rounds: 4,
                suspect: false,
                out_of_order_turns: 0,
                dropped_frames: 0,
                discarded_partial_turns: 0,
                judging_method: ensemble.as_ref().map(|summary| summary.method.to_string()),
                excluded_judge_decisions: 0,
                judging_error: None,
            },
        },
        messages,
        judge_decisions,
        ensemble,
    }
}

pub(crate) struct ScriptedStream {
    steps: VecDeque<Step>,
    closed: Arc<AtomicBool>,
}

impl ScriptedStream {
    pub(crate) fn new(steps: Vec<Step>) -> (Self, Arc<AtomicBool>) {
        let closed = Arc::new(AtomicBool::new(false));
        (
            Self {
                steps: steps.into(),
                closed: Arc::clone(&closed),
            },
            closed,
        )
    }
}

#[async_trait]
impl EventStream for ScriptedStream {
    async fn next_frame(&mut self) -> Option<Result<String>> {
        loop {
            match self.steps.pop_front() {
                Some(Step::Frame(frame)) => return Some(Ok(frame)),
                Some(Step::Delay(delay)) => tokio::time::sleep(delay).await,
                Some(Step::Fail(reason)) => return Some(Err(anyhow!(reason))),
                Some(Step::End) => return None,
                Some(Step::Hang) | None => std::future::pending::<()>().await,
            }
        }
    }

    async fn close(&mut self) -> Result<()> {
        self.closed.store(true, Ordering::SeqCst);
        Ok(())
    }
}

pub(crate) struct MockDebateService {
    stream: Mutex<Option<ScriptedStream>>,
    create_delay: Duration,
    fail_start: bool,
    pub(crate) requests: Mutex<Vec<DebateSetupRequest>>,
    pub(crate) started: AtomicUsize,
}

impl MockDebateService {
    pub(crate) fn new(stream: ScriptedStream) -> Self {
        Self {
            stream: Mutex::new(Some(stream)),
            create_delay: Duration::ZERO,
            fail_start: false,
            requests: Mutex::new(Vec::new()),
            started: AtomicUsize::new(0),
        }
    }

    pub(crate) fn with_create_delay(mut self, delay: Duration) -> Self {
        self.create_delay = delay;
        self
    }

    pub(crate) fn failing_start(mut self) -> Self {
        self.fail_start = true;
        self
    }
}

#[async_trait]
impl DebateService for MockDebateService {
    async fn create_debate(&self, request: &DebateSetupRequest) -> Result<DebateCreated> {
        self.requests
            .lock()
            .expect("requests lock")
            .push(request.clone());
        if !self.create_delay.is_zero() {
            tokio::time::sleep(self.create_delay).await;
        }
        Ok(DebateCreated {
            id: DEBATE_ID.to_string(),
            status: "created".to_string(),
            config: None,
        })
    }

    async fn start_debate(&self, debate_id: &str) -> Result<()> {
        self.started.fetch_add(1, Ordering::SeqCst);
        if self.fail_start {
            bail!("service refused to start {debate_id}");
        }
        Ok(())
    }

    async fn open_stream(&self, debate_id: &str) -> Result<Box<dyn EventStream>> {
        let stream = self.stream.lock().expect("stream lock").take();
        match stream {
            Some(stream) => Ok(Box::new(stream)),
            None => Err(anyhow!("no scripted stream left for {debate_id}")),
        }
    }
}

/// Sink that fails its first `failures` saves, then keeps transcripts in memory.
pub(crate) struct FlakySink {
    failures_left: AtomicUsize,
    pub(crate) saved: Mutex<Vec<DebateTranscript>>,
}

impl FlakySink {
    pub(crate) fn new(failures: usize) -> Self {
        Self {
            failures_left: AtomicUsize::new(failures),
            saved: Mutex::new(Vec::new()),
        }
    }
}

#[async_trait]
impl TranscriptSink for FlakySink {
    async fn save(&self, transcript: &DebateTranscript) -> Result<i64, PersistenceError> {
        let remaining = self.failures_left.load(Ordering::SeqCst);
        if remaining > 0 {
            self.failures_left.store(remaining - 1, Ordering::SeqCst);
            return Err(PersistenceError::PersistenceFailed {
                stage: WriteStage::Debate,
                source: StorageFault::Worker("disk full".to_string()),
            });
        }
        let mut saved = self.saved.lock().expect("saved lock");
        saved.push(transcript.clone());
        Ok(saved.len() as i64)
    }
}
