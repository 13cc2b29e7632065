//! Parley Engine - the conversation session engine.
//!
//! Per user turn the [`SessionSequencer`] composes four pieces:
//!
//! - [`quota::QuotaEnforcer`] gates and records daily token/asset consumption
//! - [`context::ContextManager`] keeps a bounded history and compacts old turns
//! - the injected [`ModelInvoker`] produces an ordered fragment stream
//! - [`delivery::DeliveryEngine`] republishes that stream through a [`Transport`]
//!   at a bounded rate, with markup fallback and overflow publishing
//!
//! Turns for one user are strictly sequential; turns for different users run
//! concurrently and share nothing but the [`store::SessionStore`].

#![warn(clippy::all)]
#![allow(clippy::pedantic)]

pub mod clock;
pub mod context;
pub mod delivery;
pub mod error;
pub mod model;
pub mod quota;
pub mod sequencer;
pub mod store;
pub mod traits;

pub use clock::{Clock, FixedClock, SystemClock};
pub use context::{
    CompactedSummary, CompactionOutcome, ContextManager, ContextStats, HistoryRecord,
    ModelSummarizer, PromptEntry, PromptMaterial, Role, Turn,
};
pub use delivery::{DeliveryEngine, DeliveryOptions, DeliveryResult, DeliveryStatus, CURSOR};
pub use error::{EngineError, ModelError, PublishError, SummarizeError, TransportError};
pub use model::{InvocationOutcome, ResilienceConfig, ResilientInvoker};
pub use quota::{
    Capability, Decision, DenyReason, Limit, PlanDefinition, PlanTable, PlanTier, QuotaEnforcer,
    RequestKind, UsageKind, UsageRecord, UsageReport,
};
pub use sequencer::{SequencerBuilder, SessionSequencer, TurnReport, TurnResult};
pub use store::{ConfiguredStore, MemoryStore, SessionStore, SqliteStore};
pub use traits::{
    FragmentStream, LongFormPublisher, MarkupKind, ModelEvent, ModelInvoker, SessionHandle,
    Summarizer, Transport,
};
