//! Debate session orchestration: remote setup, stream decoding, turn
//! reassembly and phase tracking.

mod constants;
mod engine;
mod error;
mod runtime;

pub mod config;
pub mod events;
pub mod service;
pub mod traits;
pub mod types;

pub use config::SessionConfig;
pub use engine::DebateOrchestrator;
pub use error::{MalformedEvent, OutOfOrderTurn, SessionError, TerminationCause, UnknownVariant};
pub use events::{decode_frame, DebateEvent, MessageChunk};
pub use runtime::{DebateSessionHandle, SessionCanceller};
pub use service::HttpDebateService;
pub use traits::{DebateService, EventStream};
pub use types::{
    word_count, CompletionSummary, DebateCreated, DebateFormat, DebateSession, DebateSetup,
    DebateSetupRequest, JudgingSetup, ModelSettings, ParticipantSetup, Phase, Position,
    SessionRecord, SessionTermination, SessionUpdate, Stage, Turn,
};
