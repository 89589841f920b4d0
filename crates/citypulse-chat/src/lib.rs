//! CityPulse Chat crate - the conversational search-resolution pipeline.
//!
//! Provides turn classification (`intent`), slot extraction (`extractor`),
//! follow-up repair from session memory (`context`, `context_cache`),
//! location tiering (`location`), analysis parsing (`analysis`), reply
//! composition (`response`) and the per-turn orchestrator. Remote services
//! are reached through the traits in `collaborator`.

pub mod analysis;
pub mod collaborator;
pub mod context;
pub mod context_cache;
pub mod error;
pub mod extractor;
pub mod intent;
pub mod location;
pub mod orchestrator;
pub mod response;

pub use analysis::{AnalysisPayload, PlaceHighlight};
pub use collaborator::{
    CallLimiter, CollaboratorError, CompletionRequest, GeocodeResult, PlaceSummary,
    PlacesService, TextCompletion,
};
pub use context::ContextResolver;
pub use context_cache::{ContextStore, InMemoryContextStore};
pub use error::ChatError;
pub use extractor::{ExtractedSlots, SlotExtractor};
pub use intent::IntentClassifier;
pub use location::{LocationResolver, ResolvedLocation};
pub use orchestrator::{ChatOrchestrator, SessionLocks, TurnReply};
pub use response::ResponseComposer;
