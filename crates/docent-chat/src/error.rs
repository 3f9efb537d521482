//! Error types for the conversation pipeline.

use crate::conversation::TurnPhase;

/// Errors from the conversation state machine and orchestrator.
#[derive(Debug, thiserror::Error)]
pub enum ChatError {
    #[error("message cannot be empty")]
    EmptyMessage,
    #[error("a turn is already in progress")]
    Busy,
    #[error("invalid turn transition: {from} -> {to}")]
    InvalidTransition { from: TurnPhase, to: TurnPhase },
}
