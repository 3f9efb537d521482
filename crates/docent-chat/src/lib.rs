//! Retrieval-augmented conversation pipeline for Docent.
//!
//! Looks up documents for each user utterance, assembles a bounded request
//! context, streams the assistant's answer, and keeps the conversation log
//! consistent while the answer grows.

pub mod context;
pub mod conversation;
pub mod error;
pub mod orchestrator;
pub mod search;

pub use context::ContextAssembler;
pub use conversation::{ConversationState, TurnPhase};
pub use error::ChatError;
pub use orchestrator::{ChatPipeline, TurnOutcome};
pub use search::{HttpSearchClient, SearchService};
