//! Stream consumer: drives one streaming exchange to completion.
//!
//! Opens the exchange, pulls body chunks one read at a time through
//! [`decode_stream`], and reports progress to a [`StreamObserver`]. For a
//! single call the observer sees either
//! - zero or more `on_delta` calls followed by exactly one `on_done`, or
//! - zero or more `on_delta` calls followed by exactly one `on_error`.
//!
//! Callbacks run inline on the consumer's task, so they are never concurrent
//! and arrive in decode order.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;
use tracing::{debug, error, warn};

use docent_core::error::DocentError;
use docent_core::types::OutboundMessage;

use crate::decoder::{decode_stream, FrameKind};
use crate::transport::CompletionTransport;

/// Receives the ordered callbacks of one streaming exchange.
pub trait StreamObserver {
    /// A delta arrived. Called in strict arrival order.
    fn on_delta(&mut self, text: &str);
    /// The exchange completed, by sentinel or by graceful close.
    fn on_done(&mut self);
    /// The exchange failed. Nothing else is called afterwards.
    fn on_error(&mut self, err: DocentError);
}

/// How a consumed stream ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Termination {
    /// The `[DONE]` sentinel was decoded.
    Sentinel,
    /// The body ended without a sentinel.
    EndOfData,
    /// Opening or reading failed.
    Error,
}

/// Counters collected while consuming one exchange.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamSummary {
    pub deltas: usize,
    pub malformed: usize,
    pub bytes: usize,
    pub terminated_by: Termination,
}

impl StreamSummary {
    fn new() -> Self {
        Self {
            deltas: 0,
            malformed: 0,
            bytes: 0,
            terminated_by: Termination::Error,
        }
    }
}

/// Runs streaming exchanges against a shared transport handle.
#[derive(Clone)]
pub struct StreamConsumer {
    transport: Arc<dyn CompletionTransport>,
    open_timeout: Duration,
}

impl StreamConsumer {
    /// `open_timeout` bounds opening the exchange only; reads are unbounded.
    pub fn new(transport: Arc<dyn CompletionTransport>, open_timeout: Duration) -> Self {
        Self {
            transport,
            open_timeout,
        }
    }

    /// Open one exchange for `messages` and report it to `observer`.
    pub async fn run<O>(&self, messages: &[OutboundMessage], observer: &mut O) -> StreamSummary
    where
        O: StreamObserver + ?Sized,
    {
        let mut summary = StreamSummary::new();

        let opened = tokio::time::timeout(self.open_timeout, self.transport.open(messages)).await;
        let body = match opened {
            Ok(Ok(body)) => body,
            Ok(Err(e)) => {
                error!(error = %e, "Completion stream could not be opened");
                observer.on_error(e);
                return summary;
            }
            Err(_) => {
                let e = DocentError::Timeout {
                    operation: "opening completion stream".to_string(),
                    secs: self.open_timeout.as_secs(),
                };
                error!(error = %e, "Completion stream could not be opened");
                observer.on_error(e);
                return summary;
            }
        };

        let read = AtomicUsize::new(0);
        let frames = decode_stream(body.inspect(|chunk| {
            if let Ok(chunk) = chunk {
                read.fetch_add(chunk.len(), Ordering::Relaxed);
            }
        }));
        futures::pin_mut!(frames);

        summary.terminated_by = loop {
            match frames.next().await {
                Some(Ok(frame)) => match frame.kind {
                    FrameKind::Delta => {
                        if let Some(text) = frame.payload.as_deref() {
                            summary.deltas += 1;
                            observer.on_delta(text);
                        }
                    }
                    FrameKind::Malformed => {
                        summary.malformed += 1;
                        warn!(malformed = summary.malformed, "Malformed frame skipped");
                    }
                    FrameKind::Done => {
                        observer.on_done();
                        break Termination::Sentinel;
                    }
                },
                Some(Err(e)) => {
                    error!(error = %e, deltas = summary.deltas, "Completion stream read failed");
                    observer.on_error(e);
                    break Termination::Error;
                }
                None => {
                    debug!("Completion stream closed without sentinel");
                    observer.on_done();
                    break Termination::EndOfData;
                }
            }
        };
        summary.bytes = read.load(Ordering::Relaxed);

        debug!(
            deltas = summary.deltas,
            malformed = summary.malformed,
            bytes = summary.bytes,
            terminated_by = ?summary.terminated_by,
            "Completion stream finished"
        );
        summary
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    use async_trait::async_trait;
    use bytes::Bytes;
    use docent_core::error::Result;

    use crate::transport::ByteStream;

    #[derive(Debug, Clone, PartialEq)]
    enum Event {
        Delta(String),
        Done,
        Error(String),
    }

    #[derive(Default)]
    struct Recorder {
        events: Vec<Event>,
    }

    impl StreamObserver for Recorder {
        fn on_delta(&mut self, text: &str) {
            self.events.push(Event::Delta(text.to_string()));
        }
        fn on_done(&mut self) {
            self.events.push(Event::Done);
        }
        fn on_error(&mut self, err: DocentError) {
            self.events.push(Event::Error(err.to_string()));
        }
    }

    /// Replays a scripted body; `None` means the open call fails.
    struct ScriptedTransport {
        chunks: Mutex<Option<Vec<Result<Bytes>>>>,
        opened_with: Mutex<Vec<OutboundMessage>>,
    }

    impl ScriptedTransport {
        fn body(chunks: Vec<Result<Bytes>>) -> Arc<Self> {
            Arc::new(Self {
                chunks: Mutex::new(Some(chunks)),
                opened_with: Mutex::new(Vec::new()),
            })
        }

        fn refusing() -> Arc<Self> {
            Arc::new(Self {
                chunks: Mutex::new(None),
                opened_with: Mutex::new(Vec::new()),
            })
        }
    }

    #[async_trait]
    impl CompletionTransport for ScriptedTransport {
        async fn open(&self, messages: &[OutboundMessage]) -> Result<ByteStream> {
            *self.opened_with.lock().unwrap() = messages.to_vec();
            match self.chunks.lock().unwrap().take() {
                Some(chunks) => Ok(Box::pin(futures::stream::iter(chunks))),
                None => Err(DocentError::TransportOpen("HTTP 503".to_string())),
            }
        }
    }

    struct HangingTransport;

    #[async_trait]
    impl CompletionTransport for HangingTransport {
        async fn open(&self, _messages: &[OutboundMessage]) -> Result<ByteStream> {
            futures::future::pending::<()>().await;
            unreachable!()
        }
    }

    fn chunk(s: &'static str) -> Result<Bytes> {
        Ok(Bytes::from_static(s.as_bytes()))
    }

    async fn run_with(transport: Arc<dyn CompletionTransport>) -> (Vec<Event>, StreamSummary) {
        let consumer = StreamConsumer::new(transport, Duration::from_secs(30));
        let mut recorder = Recorder::default();
        let summary = consumer
            .run(&[OutboundMessage::user("q")], &mut recorder)
            .await;
        (recorder.events, summary)
    }

    #[tokio::test]
    async fn test_deltas_then_done_in_order() {
        let transport = ScriptedTransport::body(vec![
            chunk("data: {\"content\":\"Hi\"}\n"),
            chunk("data: {\"content\":\" there\"}\n"),
            chunk("data: [DONE]\n"),
        ]);
        let (events, summary) = run_with(transport).await;
        assert_eq!(
            events,
            vec![
                Event::Delta("Hi".to_string()),
                Event::Delta(" there".to_string()),
                Event::Done,
            ]
        );
        assert_eq!(summary.deltas, 2);
        assert_eq!(summary.terminated_by, Termination::Sentinel);
    }

    #[tokio::test]
    async fn test_split_record_emits_single_delta() {
        let transport = ScriptedTransport::body(vec![
            chunk("data: {\"content\":\"Hel"),
            chunk("lo\"}\n"),
            chunk("data: [DONE]\n"),
        ]);
        let (events, _) = run_with(transport).await;
        assert_eq!(events, vec![Event::Delta("Hello".to_string()), Event::Done]);
    }

    #[tokio::test]
    async fn test_graceful_close_without_sentinel_is_done() {
        let transport = ScriptedTransport::body(vec![chunk("data: {\"content\":\"partial\"}\n")]);
        let (events, summary) = run_with(transport).await;
        assert_eq!(
            events,
            vec![Event::Delta("partial".to_string()), Event::Done]
        );
        assert_eq!(summary.terminated_by, Termination::EndOfData);
    }

    #[tokio::test]
    async fn test_empty_body_is_done() {
        let transport = ScriptedTransport::body(vec![]);
        let (events, summary) = run_with(transport).await;
        assert_eq!(events, vec![Event::Done]);
        assert_eq!(summary.terminated_by, Termination::EndOfData);
    }

    #[tokio::test]
    async fn test_sentinel_in_unterminated_tail() {
        let transport = ScriptedTransport::body(vec![chunk("data: {\"content\":\"x\"}\ndata: [DONE]")]);
        let (events, summary) = run_with(transport).await;
        assert_eq!(events, vec![Event::Delta("x".to_string()), Event::Done]);
        assert_eq!(summary.terminated_by, Termination::Sentinel);
    }

    #[tokio::test]
    async fn test_open_failure_only_calls_on_error() {
        let (events, summary) = run_with(ScriptedTransport::refusing()).await;
        assert_eq!(events.len(), 1);
        assert!(matches!(&events[0], Event::Error(m) if m.contains("HTTP 503")));
        assert_eq!(summary.terminated_by, Termination::Error);
        assert_eq!(summary.bytes, 0);
    }

    #[tokio::test]
    async fn test_read_failure_stops_after_single_error() {
        let transport = ScriptedTransport::body(vec![
            chunk("data: {\"content\":\"a\"}\n"),
            Err(DocentError::TransportRead("connection reset".to_string())),
            chunk("data: {\"content\":\"b\"}\n"),
            chunk("data: [DONE]\n"),
        ]);
        let (events, summary) = run_with(transport).await;
        assert_eq!(events.len(), 2);
        assert_eq!(events[0], Event::Delta("a".to_string()));
        assert!(matches!(&events[1], Event::Error(m) if m.contains("connection reset")));
        assert_eq!(summary.terminated_by, Termination::Error);
    }

    #[tokio::test]
    async fn test_malformed_frame_is_skipped() {
        let transport = ScriptedTransport::body(vec![
            chunk("data: {\"content\":\"a\"}\n"),
            chunk("data: {oops\n"),
            chunk(": comment\n\n"),
            chunk("data: {}\n"),
            chunk("data: {\"content\":\"b\"}\n"),
            chunk("data: [DONE]\n"),
        ]);
        let (events, summary) = run_with(transport).await;
        assert_eq!(
            events,
            vec![
                Event::Delta("a".to_string()),
                Event::Delta("b".to_string()),
                Event::Done,
            ]
        );
        assert_eq!(summary.malformed, 1);
    }

    #[tokio::test]
    async fn test_summary_counts_bytes_read() {
        let transport = ScriptedTransport::body(vec![
            chunk("data: {\"content\":\"a\"}\n"),
            chunk("data: {oops\ndata: {\"con"),
            chunk("tent\":\"b\"}"),
        ]);
        let (events, summary) = run_with(transport).await;
        assert_eq!(
            events,
            vec![
                Event::Delta("a".to_string()),
                Event::Delta("b".to_string()),
                Event::Done,
            ]
        );
        assert_eq!(
            summary,
            StreamSummary {
                deltas: 2,
                malformed: 1,
                bytes: 22 + 23 + 10,
                terminated_by: Termination::EndOfData,
            }
        );
    }

    #[tokio::test]
    async fn test_reads_stop_at_sentinel() {
        let transport = ScriptedTransport::body(vec![
            chunk("data: [DONE]\n"),
            Err(DocentError::TransportRead("never read".to_string())),
        ]);
        let (events, _) = run_with(transport).await;
        assert_eq!(events, vec![Event::Done]);
    }

    #[tokio::test]
    async fn test_messages_forwarded_to_transport() {
        let transport = ScriptedTransport::body(vec![chunk("data: [DONE]\n")]);
        let consumer = StreamConsumer::new(transport.clone(), Duration::from_secs(30));
        let messages = vec![OutboundMessage::system("ctx"), OutboundMessage::user("q")];
        let mut recorder = Recorder::default();
        consumer.run(&messages, &mut recorder).await;
        assert_eq!(*transport.opened_with.lock().unwrap(), messages);
    }

    #[tokio::test(start_paused = true)]
    async fn test_open_timeout_reports_error() {
        let consumer = StreamConsumer::new(Arc::new(HangingTransport), Duration::from_secs(30));
        let mut recorder = Recorder::default();
        let summary = consumer
            .run(&[OutboundMessage::user("q")], &mut recorder)
            .await;
        assert_eq!(recorder.events.len(), 1);
        assert!(matches!(&recorder.events[0], Event::Error(m) if m.contains("timed out after 30s")));
        assert_eq!(summary.terminated_by, Termination::Error);
    }
}
