//! Streaming transport layer for Docent.
//!
//! Decodes the completion endpoint's newline-delimited wire format into
//! frames and drives a single streaming exchange, reporting ordered
//! callbacks to an observer.

pub mod consumer;
pub mod decoder;
pub mod transport;

pub use consumer::{StreamConsumer, StreamObserver, StreamSummary, Termination};
pub use decoder::{decode_record, decode_stream, FrameDecoder, FrameKind, StreamFrame};
pub use transport::{ByteStream, CompletionTransport, HttpCompletionTransport};
