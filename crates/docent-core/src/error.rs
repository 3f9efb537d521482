use thiserror::Error;

/// Fixed text shown in place of an assistant answer when a turn fails.
///
/// Raw error text and partially received content are never surfaced to the
/// user; every fatal failure renders as exactly this message.
pub const APOLOGY_MESSAGE: &str = "Sorry, I encountered an error. Please try again.";

/// Top-level error type for the Docent pipeline.
///
/// The first five variants mirror the pipeline's failure taxonomy. Search and
/// frame-decode failures are swallowed where they occur; transport failures
/// end the turn. Subsystem crates convert into this type so the `?` operator
/// works across crate boundaries.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum DocentError {
    #[error("Search failed: {0}")]
    SearchFailure(String),

    #[error("Failed to open stream: {0}")]
    TransportOpen(String),

    #[error("Stream read failed: {0}")]
    TransportRead(String),

    #[error("Malformed stream record: {0}")]
    FrameDecode(String),

    #[error("{operation} timed out after {secs}s")]
    Timeout { operation: String, secs: u64 },

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl DocentError {
    /// Whether this error ends the turn it occurred in.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            DocentError::TransportOpen(_)
                | DocentError::TransportRead(_)
                | DocentError::Timeout { .. }
        )
    }
}

impl From<toml::de::Error> for DocentError {
    fn from(err: toml::de::Error) -> Self {
        DocentError::Config(err.to_string())
    }
}

impl From<toml::ser::Error> for DocentError {
    fn from(err: toml::ser::Error) -> Self {
        DocentError::Config(err.to_string())
    }
}

/// A specialized `Result` type for Docent operations.
pub type Result<T> = std::result::Result<T, DocentError>;
