//! Shared data model for the retrieval-augmented chat pipeline.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

// =============================================================================
// Roles and outbound messages
// =============================================================================

/// Author of a conversation message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
    System,
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Role::User => write!(f, "user"),
            Role::Assistant => write!(f, "assistant"),
            Role::System => write!(f, "system"),
        }
    }
}

/// One entry of the message list sent to the completion backend.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutboundMessage {
    pub role: Role,
    pub content: String,
}

impl OutboundMessage {
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::new(Role::User, content)
    }

    pub fn system(content: impl Into<String>) -> Self {
        Self::new(Role::System, content)
    }
}

// =============================================================================
// Search results
// =============================================================================

/// A document returned by the search backend.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DocumentRef {
    pub id: u64,
    pub title: String,
    pub content: String,
    #[serde(default)]
    pub url: String,
    #[serde(default)]
    pub category: String,
    #[serde(default)]
    pub tags: Vec<String>,
}

/// A ranked search hit. Rank is the position in the returned list.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchResult {
    pub document: DocumentRef,
    /// Relevance score reported by the backend.
    pub score: f64,
}

// =============================================================================
// Conversation messages
// =============================================================================

/// A message in the conversation log.
///
/// `content` only grows while `streaming` is true and is frozen afterwards.
/// `sources` is populated for assistant messages when they are created and is
/// never touched again.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConversationMessage {
    pub id: Uuid,
    pub role: Role,
    pub content: String,
    #[serde(default)]
    pub sources: Vec<SearchResult>,
    pub created_at: DateTime<Utc>,
    pub streaming: bool,
}

impl ConversationMessage {
    /// A finalized user message.
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            role: Role::User,
            content: content.into(),
            sources: Vec::new(),
            created_at: Utc::now(),
            streaming: false,
        }
    }

    /// An empty assistant message waiting for its first delta.
    pub fn placeholder(sources: Vec<SearchResult>) -> Self {
        Self {
            id: Uuid::new_v4(),
            role: Role::Assistant,
            content: String::new(),
            sources,
            created_at: Utc::now(),
            streaming: true,
        }
    }

    /// A finalized assistant message with fixed content.
    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            role: Role::Assistant,
            content: content.into(),
            sources: Vec::new(),
            created_at: Utc::now(),
            streaming: false,
        }
    }

    /// The `{role, content}` pair sent upstream for this message.
    pub fn to_outbound(&self) -> OutboundMessage {
        OutboundMessage::new(self.role, self.content.clone())
    }
}
