//! Conversation state machine.
//!
//! Owns the ordered message log and the turn lifecycle:
//! - Idle -> Sending (user message appended, loading)
//! - Sending -> Streaming (assistant placeholder appended)
//! - Streaming -> Streaming (delta appended to the placeholder)
//! - Streaming -> Idle (placeholder finalized)
//! - Sending | Streaming -> Error -> Idle (apology installed)
//!
//! The log is append-only while a turn runs. The streaming placeholder is
//! tracked by index rather than by reference; the index stays valid because
//! the log may only be cleared while Idle.

use std::fmt;

use tracing::{debug, warn};
use uuid::Uuid;

use docent_core::error::APOLOGY_MESSAGE;
use docent_core::types::{ConversationMessage, Role, SearchResult};

use crate::error::ChatError;

/// Lifecycle phase of the current turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TurnPhase {
    /// No turn in progress. Ready to start.
    Idle,
    /// User message recorded; searching and preparing the request.
    Sending,
    /// Assistant placeholder recorded; deltas are being appended.
    Streaming,
    /// The turn failed; transient before returning to Idle.
    Error,
}

impl fmt::Display for TurnPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TurnPhase::Idle => write!(f, "Idle"),
            TurnPhase::Sending => write!(f, "Sending"),
            TurnPhase::Streaming => write!(f, "Streaming"),
            TurnPhase::Error => write!(f, "Error"),
        }
    }
}

impl TurnPhase {
    /// Returns whether a transition from `self` to `target` is valid.
    pub fn can_transition_to(&self, target: &TurnPhase) -> bool {
        matches!(
            (self, target),
            (TurnPhase::Idle, TurnPhase::Sending)
                | (TurnPhase::Sending, TurnPhase::Streaming)
                | (TurnPhase::Streaming, TurnPhase::Streaming)
                | (TurnPhase::Streaming, TurnPhase::Idle)
                // Failure transitions
                | (TurnPhase::Sending, TurnPhase::Error)
                | (TurnPhase::Streaming, TurnPhase::Error)
                | (TurnPhase::Error, TurnPhase::Idle)
        )
    }
}

// =============================================================================
// ConversationState
// =============================================================================

/// The conversation log plus the state of the turn in progress.
///
/// Single writer: every mutation goes through the transition methods below,
/// and readers only ever get shared slices or clones.
#[derive(Debug, Clone)]
pub struct ConversationState {
    messages: Vec<ConversationMessage>,
    is_loading: bool,
    phase: TurnPhase,
    streaming_index: Option<usize>,
}

impl Default for ConversationState {
    fn default() -> Self {
        Self::new()
    }
}

impl ConversationState {
    pub fn new() -> Self {
        Self {
            messages: Vec::new(),
            is_loading: false,
            phase: TurnPhase::Idle,
            streaming_index: None,
        }
    }

    pub fn messages(&self) -> &[ConversationMessage] {
        &self.messages
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    pub fn is_loading(&self) -> bool {
        self.is_loading
    }

    pub fn phase(&self) -> TurnPhase {
        self.phase
    }

    /// Index of the message currently receiving deltas.
    pub fn streaming_index(&self) -> Option<usize> {
        self.streaming_index
    }

    /// The most recent assistant message, if any.
    pub fn last_assistant(&self) -> Option<&ConversationMessage> {
        self.messages.iter().rev().find(|m| m.role == Role::Assistant)
    }

    /// Idle -> Sending: record the user's message and mark the turn loading.
    ///
    /// Rejected with `Busy` while another turn is in progress, and with
    /// `EmptyMessage` for blank input. A rejected start changes nothing.
    pub fn begin_turn(&mut self, content: &str) -> Result<Uuid, ChatError> {
        if self.is_loading || self.phase != TurnPhase::Idle {
            return Err(ChatError::Busy);
        }
        if content.trim().is_empty() {
            return Err(ChatError::EmptyMessage);
        }

        self.transition(TurnPhase::Sending)?;
        let message = ConversationMessage::user(content);
        let id = message.id;
        self.messages.push(message);
        self.is_loading = true;
        Ok(id)
    }

    /// Sending -> Streaming: append the empty assistant placeholder.
    pub fn open_placeholder(&mut self, sources: Vec<SearchResult>) -> Result<Uuid, ChatError> {
        self.transition(TurnPhase::Streaming)?;
        let message = ConversationMessage::placeholder(sources);
        let id = message.id;
        self.streaming_index = Some(self.messages.len());
        self.messages.push(message);
        Ok(id)
    }

    /// Streaming self-loop: append `text` to the trailing placeholder.
    pub fn append_delta(&mut self, text: &str) -> Result<(), ChatError> {
        let idx = self.trailing_streaming_index(TurnPhase::Streaming)?;
        self.messages[idx].content.push_str(text);
        Ok(())
    }

    /// Streaming -> Idle: finalize the placeholder and release the gate.
    pub fn complete(&mut self) -> Result<Uuid, ChatError> {
        let idx = self.trailing_streaming_index(TurnPhase::Idle)?;
        self.transition(TurnPhase::Idle)?;

        let message = &mut self.messages[idx];
        message.streaming = false;
        self.streaming_index = None;
        self.is_loading = false;
        Ok(message.id)
    }

    /// Sending | Streaming -> Error -> Idle.
    ///
    /// Partial content is discarded: the placeholder's content is replaced by
    /// the apology. Without a placeholder, an apology message is appended.
    /// Returns the id of the message carrying the apology.
    pub fn fail(&mut self) -> Result<Uuid, ChatError> {
        self.transition(TurnPhase::Error)?;

        let id = match self.streaming_index.take() {
            Some(idx) => {
                let message = &mut self.messages[idx];
                message.content = APOLOGY_MESSAGE.to_string();
                message.streaming = false;
                message.id
            }
            None => {
                let message = ConversationMessage::assistant(APOLOGY_MESSAGE);
                let id = message.id;
                self.messages.push(message);
                id
            }
        };

        self.is_loading = false;
        self.transition(TurnPhase::Idle)?;
        Ok(id)
    }

    /// Remove every message. Only permitted while Idle.
    pub fn clear(&mut self) -> Result<(), ChatError> {
        if self.phase != TurnPhase::Idle || self.is_loading {
            return Err(ChatError::Busy);
        }
        debug!(removed = self.messages.len(), "Conversation cleared");
        self.messages.clear();
        Ok(())
    }

    // -- Private helpers --

    fn transition(&mut self, target: TurnPhase) -> Result<(), ChatError> {
        if self.phase.can_transition_to(&target) {
            if self.phase != target {
                debug!("Turn phase: {} -> {}", self.phase, target);
            }
            self.phase = target;
            Ok(())
        } else {
            Err(ChatError::InvalidTransition {
                from: self.phase,
                to: target,
            })
        }
    }

    /// Locate the placeholder by position: it must be the trailing message
    /// and still streaming.
    fn trailing_streaming_index(&self, target: TurnPhase) -> Result<usize, ChatError> {
        let invalid = ChatError::InvalidTransition {
            from: self.phase,
            to: target,
        };
        if self.phase != TurnPhase::Streaming {
            return Err(invalid);
        }
        match self.streaming_index {
            Some(idx) if idx + 1 == self.messages.len() && self.messages[idx].streaming => Ok(idx),
            other => {
                warn!(
                    streaming_index = ?other,
                    len = self.messages.len(),
                    "Streaming placeholder is not the trailing message"
                );
                Err(invalid)
            }
        }
    }
}

// =============================================================================
// Tests
// =============================================================================
