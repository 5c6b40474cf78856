use std::time::Instant;

use chrono::Utc;
use tokio::sync::{broadcast, mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tracing::{debug, info, warn};

use crate::judging::JudgeDecision;
use crate::orchestrator::config::SessionConfig;
use crate::orchestrator::error::{MalformedEvent, TerminationCause};
use crate::orchestrator::events::{decode_frame, DebateEvent};
use crate::orchestrator::types::{
    CompletionSummary, DebateSession, DebateSetup, SessionRecord, SessionTermination,
    SessionUpdate, Turn,
};
use crate::telemetry::events::{
    duration_to_ms, record_malformed_frame, record_out_of_order_turn, record_session_terminated,
    record_turn_completed,
};

use super::state::{DebateStateTracker, TurnReassembler, TurnVerdict};

pub(crate) enum StreamItem {
    Frame(String),
    Failed(String),
    Closed,
}

pub(crate) enum SessionCommand {
    Cancel,
}

/// Owns all mutable session state. Events are applied strictly one at a time.
pub(crate) struct SessionWorker {
    config: SessionConfig,
    setup: DebateSetup,
    session: DebateSession,
    frame_rx: mpsc::Receiver<StreamItem>,
    command_rx: mpsc::Receiver<SessionCommand>,
    updates_tx: broadcast::Sender<SessionUpdate>,
    close_tx: Option<oneshot::Sender<()>>,
    reassembler: TurnReassembler,
    tracker: DebateStateTracker,
    turns: Vec<Turn>,
    judge_decisions: Vec<JudgeDecision>,
    completion: Option<CompletionSummary>,
    dropped_frames: usize,
    started_at: Instant,
}

impl SessionWorker {
    pub(crate) fn new(
        config: SessionConfig,
        setup: DebateSetup,
        session: DebateSession,
        frame_rx: mpsc::Receiver<StreamItem>,
        command_rx: mpsc::Receiver<SessionCommand>,
        updates_tx: broadcast::Sender<SessionUpdate>,
        close_tx: oneshot::Sender<()>,
    ) -> Self {
        let tracker = DebateStateTracker::new(session.format, session.participants.clone());
        Self {
            config,
            setup,
            session,
            frame_rx,
            command_rx,
            updates_tx,
            close_tx: Some(close_tx),
            reassembler: TurnReassembler::new(),
            tracker,
            turns: Vec::new(),
            judge_decisions: Vec::new(),
            completion: None,
            dropped_frames: 0,
            started_at: Instant::now(),
        }
    }

    pub(crate) fn spawn(self) -> JoinHandle<SessionRecord> {
        tokio::spawn(self.run())
    }

    async fn run(mut self) -> SessionRecord {
        let idle_timeout = self.config.idle_timeout;
        let mut commands_open = true;

        let termination = loop {
            if let Some(termination) = self.tracker.termination() {
                break termination;
            }
            tokio::select! {
                biased;
                command = self.command_rx.recv(), if commands_open => match command {
                    Some(SessionCommand::Cancel) => {
                        info!(
                            target: "debate_orchestrator",
                            session_id = %self.session.session_id,
                            "session cancelled by caller"
                        );
                        self.tracker.fail(TerminationCause::Cancelled);
                    }
                    None => commands_open = false,
                },
                item = timeout(idle_timeout, self.frame_rx.recv()) => match item {
                    Ok(Some(StreamItem::Frame(raw))) => self.handle_frame(&raw),
                    Ok(Some(StreamItem::Failed(reason))) => {
                        warn!(
                            target: "debate_orchestrator",
                            session_id = %self.session.session_id,
                            %reason,
                            "event stream transport failed"
                        );
                        self.tracker.fail(TerminationCause::Transport { reason });
                    }
                    Ok(Some(StreamItem::Closed)) | Ok(None) => {
                        self.tracker.fail(TerminationCause::StreamClosed);
                    }
                    Err(_) => {
                        warn!(
                            target: "debate_orchestrator",
                            session_id = %self.session.session_id,
                            ?idle_timeout,
                            "no stream event within idle timeout"
                        );
                        self.tracker.fail(TerminationCause::StreamTimeout {
                            idle_ms: duration_to_ms(idle_timeout),
                        });
                    }
                },
            }
        };

        self.finish(termination)
    }

    fn handle_frame(&mut self, raw: &str) {
        match decode_frame(raw) {
            Ok(event) => self.apply(event),
            Err(MalformedEvent::UnknownType(kind)) => {
                debug!(
                    target: "debate_orchestrator",
                    session_id = %self.session.session_id,
                    %kind,
                    "ignoring unrecognised event kind"
                );
            }
            Err(err) => {
                self.dropped_frames += 1;
                record_malformed_frame(&self.session.session_id, &err);
            }
        }
    }

    fn apply(&mut self, event: DebateEvent) {
        match event {
            DebateEvent::MessageChunk(chunk) => {
                if let Some(turn) = self.reassembler.ingest(chunk, Utc::now()) {
                    self.accept_turn(turn);
                }
            }
            DebateEvent::JudgeDecision(decision) => {
                self.publish(SessionUpdate::JudgeDecisionReceived {
                    judge_model: decision.judge_model.clone(),
                    winner_id: decision.winner_id.clone(),
                });
                self.judge_decisions.push(decision);
            }
            DebateEvent::DebateCompleted(summary) => {
                if self.tracker.complete() {
                    self.completion = Some(summary);
                }
            }
            DebateEvent::StreamError { message } => {
                warn!(
                    target: "debate_orchestrator",
                    session_id = %self.session.session_id,
                    %message,
                    "service reported stream error"
                );
                self.tracker.fail(TerminationCause::StreamError { message });
            }
        }
    }

    fn accept_turn(&mut self, turn: Turn) {
        match self.tracker.observe_turn(&turn) {
            TurnVerdict::Accepted => {}
            TurnVerdict::Advanced { from, to } => {
                self.session.move_to(to);
                self.publish(SessionUpdate::StageAdvanced { from, to });
            }
            TurnVerdict::OutOfOrder(violation) => {
                record_out_of_order_turn(&self.session.session_id, &violation);
                let advanced = violation.premature.then(|| SessionUpdate::StageAdvanced {
                    from: violation.expected,
                    to: violation.received,
                });
                self.publish(SessionUpdate::ProtocolViolation(violation));
                if let Some(update) = advanced {
                    self.session.move_to(self.tracker.stage());
                    self.publish(update);
                }
            }
            TurnVerdict::Ignored => return,
        }

        record_turn_completed(&self.session.session_id, &turn);
        self.publish(SessionUpdate::TurnCompleted(turn.clone()));
        self.turns.push(turn);
    }

    fn publish(&self, update: SessionUpdate) {
        // Nobody listening is fine.
        let _ = self.updates_tx.send(update);
    }

    fn finish(mut self, termination: SessionTermination) -> SessionRecord {
        if let Some(close) = self.close_tx.take() {
            let _ = close.send(());
        }

        let discarded = self.reassembler.discard_pending();
        if !discarded.is_empty() {
            warn!(
                target: "debate_orchestrator",
                session_id = %self.session.session_id,
                count = discarded.len(),
                "discarding unfinished turns"
            );
        }

        self.session.move_to(self.tracker.stage());

        let elapsed = self.started_at.elapsed();
        record_session_terminated(
            &self.session.session_id,
            &termination,
            self.turns.len(),
            self.judge_decisions.len(),
            self.dropped_frames,
            discarded.len(),
            elapsed,
        );
        self.publish(SessionUpdate::Terminated(termination.clone()));

        SessionRecord {
            setup: self.setup,
            session: self.session,
            turns: self.turns,
            judge_decisions: self.judge_decisions,
            termination,
            completion: self.completion,
            violations: self.tracker.violations().to_vec(),
            dropped_frames: self.dropped_frames,
            discarded_partial_turns: discarded.len(),
            elapsed,
        }
    }
}
