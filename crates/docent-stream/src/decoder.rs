//! Wire frame decoder for the streaming completion endpoint.
//!
//! The endpoint sends newline-delimited records. A record is blank, a
//! comment (`:` prefix), or a data record (`data:` prefix) carrying either the
//! `[DONE]` sentinel or a JSON object whose optional `content` string is the
//! next delta. The decoder:
//! - Buffers raw bytes so records (and UTF-8 sequences) may span chunks
//! - Emits frames only for completed records, in arrival order
//! - Degrades an unparseable record to a `Malformed` frame instead of failing
//! - Stops producing frames once the sentinel has been seen

use std::collections::VecDeque;

use bytes::{Bytes, BytesMut};
use futures::{Stream, StreamExt};
use serde::Deserialize;
use tracing::{debug, warn};

use docent_core::error::{DocentError, Result};

/// Payload that marks the end of a stream.
pub const DONE_SENTINEL: &str = "[DONE]";

const DATA_PREFIX: &str = "data:";

// =============================================================================
// Frames
// =============================================================================

/// Kind of a decoded wire frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameKind {
    /// A fragment of assistant text.
    Delta,
    /// The completion sentinel.
    Done,
    /// A data record that could not be decoded.
    Malformed,
}

/// One decoded record from the stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamFrame {
    pub kind: FrameKind,
    /// Delta text; only set for `Delta` frames.
    pub payload: Option<String>,
}

impl StreamFrame {
    pub fn delta(text: impl Into<String>) -> Self {
        Self {
            kind: FrameKind::Delta,
            payload: Some(text.into()),
        }
    }

    pub fn done() -> Self {
        Self {
            kind: FrameKind::Done,
            payload: None,
        }
    }

    pub fn malformed() -> Self {
        Self {
            kind: FrameKind::Malformed,
            payload: None,
        }
    }
}

/// JSON body of a data record. Unknown fields are ignored.
#[derive(Debug, Deserialize)]
struct DeltaPayload {
    #[serde(default)]
    content: Option<String>,
}

// =============================================================================
// FrameDecoder
// =============================================================================

/// Incremental decoder holding the partial record that spans chunk boundaries.
#[derive(Debug, Default)]
pub struct FrameDecoder {
    buffer: BytesMut,
    /// Prefix of `buffer` already known to contain no newline.
    scanned: usize,
    finished: bool,
}

impl FrameDecoder {
    pub fn new() -> Self {
        Self {
            buffer: BytesMut::with_capacity(8192),
            scanned: 0,
            finished: false,
        }
    }

    /// Whether the completion sentinel has been decoded.
    pub fn is_finished(&self) -> bool {
        self.finished
    }

    /// Bytes held for a record that has not been completed yet.
    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }

    /// Append a chunk and return the frames for every record it completed.
    ///
    /// After the sentinel, input is discarded and nothing more is emitted.
    pub fn push(&mut self, chunk: &[u8]) -> Vec<StreamFrame> {
        if self.finished {
            return Vec::new();
        }
        self.buffer.extend_from_slice(chunk);

        let mut frames = Vec::new();
        while let Some(offset) = self.buffer[self.scanned..].iter().position(|&b| b == b'\n') {
            let newline_pos = self.scanned + offset;
            self.scanned = 0;
            let mut record = self.buffer.split_to(newline_pos + 1);
            record.truncate(record.len() - 1);
            if let Some(frame) = self.accept(&record) {
                frames.push(frame);
                if self.finished {
                    self.buffer.clear();
                    break;
                }
            }
        }
        self.scanned = self.buffer.len();
        frames
    }

    /// Flush the unterminated record left at end of data, if any.
    pub fn finish(&mut self) -> Vec<StreamFrame> {
        self.scanned = 0;
        if self.finished || self.buffer.is_empty() {
            self.buffer.clear();
            return Vec::new();
        }
        let record = self.buffer.split();
        self.accept(&record).into_iter().collect()
    }

    fn accept(&mut self, record: &[u8]) -> Option<StreamFrame> {
        let frame = decode_record(record)?;
        if frame.kind == FrameKind::Done {
            self.finished = true;
        }
        Some(frame)
    }
}

/// Decode a single record (without its trailing newline).
///
/// Returns `None` for records that carry no frame: blank lines, comments,
/// non-data fields, and heartbeats whose JSON has no visible `content`.
pub fn decode_record(record: &[u8]) -> Option<StreamFrame> {
    let record = record.strip_suffix(b"\r").unwrap_or(record);

    let line = match std::str::from_utf8(record) {
        Ok(line) => line,
        Err(e) => {
            if record.starts_with(DATA_PREFIX.as_bytes()) {
                warn!(error = %e, "Stream record is not valid UTF-8");
                return Some(StreamFrame::malformed());
            }
            return None;
        }
    };

    let data = line.strip_prefix(DATA_PREFIX)?;
    let data = data.strip_prefix(' ').unwrap_or(data);

    if data == DONE_SENTINEL {
        return Some(StreamFrame::done());
    }

    match parse_payload(data) {
        Ok(Some(text)) => Some(StreamFrame::delta(text)),
        Ok(None) => {
            debug!("Heartbeat record");
            None
        }
        Err(e) => {
            warn!(error = %e, data_preview = %preview(data), "Skipping malformed stream record");
            Some(StreamFrame::malformed())
        }
    }
}

fn parse_payload(data: &str) -> Result<Option<String>> {
    let payload: DeltaPayload =
        serde_json::from_str(data).map_err(|e| DocentError::FrameDecode(e.to_string()))?;
    Ok(payload.content.filter(|text| !text.is_empty()))
}

fn preview(data: &str) -> &str {
    match data.char_indices().nth(80) {
        Some((idx, _)) => &data[..idx],
        None => data,
    }
}

// =============================================================================
// Lazy frame sequence
// =============================================================================

/// Turn a byte stream into the finite sequence of frames it carries.
///
/// The sequence ends after the sentinel, at end of data (after flushing the
/// unterminated tail), or right after yielding a transport error. The byte
/// stream is not polled again once the sentinel has been produced.
pub fn decode_stream<S>(bytes: S) -> impl Stream<Item = Result<StreamFrame>>
where
    S: Stream<Item = Result<Bytes>> + Unpin,
{
    futures::stream::unfold(
        (bytes, FrameDecoder::new(), VecDeque::new(), false),
        |(mut bytes, mut decoder, mut pending, mut ended)| async move {
            loop {
                if let Some(frame) = pending.pop_front() {
                    return Some((Ok(frame), (bytes, decoder, pending, ended)));
                }
                if ended || decoder.is_finished() {
                    return None;
                }
                match bytes.next().await {
                    Some(Ok(chunk)) => pending.extend(decoder.push(&chunk)),
                    Some(Err(e)) => {
                        ended = true;
                        return Some((Err(e), (bytes, decoder, pending, ended)));
                    }
                    None => {
                        ended = true;
                        pending.extend(decoder.finish());
                    }
                }
            }
        },
    )
}

// =============================================================================
// Tests
// =============================================================================
