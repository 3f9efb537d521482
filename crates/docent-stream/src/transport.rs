//! Streaming completion transport.
//!
//! `CompletionTransport` is the seam between the pipeline and the language
//! model backend: it opens one exchange for a prepared message list and hands
//! back the raw response body as a byte stream. `HttpCompletionTransport` is
//! the production implementation; tests substitute in-memory fakes.

use std::pin::Pin;

use async_trait::async_trait;
use bytes::Bytes;
use futures::{Stream, StreamExt};
use serde::Serialize;
use tracing::{debug, warn};

use docent_core::config::ApiConfig;
use docent_core::error::{DocentError, Result};
use docent_core::types::OutboundMessage;

/// Raw response body of a streaming exchange.
pub type ByteStream = Pin<Box<dyn Stream<Item = Result<Bytes>> + Send>>;

/// Opens streaming exchanges with the completion backend.
#[async_trait]
pub trait CompletionTransport: Send + Sync {
    /// Open one exchange for `messages`.
    ///
    /// Fails with `DocentError::TransportOpen` when the backend refuses or
    /// reports a non-success status. Errors while reading the returned body
    /// surface as `DocentError::TransportRead` items.
    async fn open(&self, messages: &[OutboundMessage]) -> Result<ByteStream>;
}

#[derive(Debug, Serialize)]
struct StreamRequest<'a> {
    messages: &'a [OutboundMessage],
    stream: bool,
}

/// `CompletionTransport` over HTTP POST with a streamed response body.
#[derive(Debug, Clone)]
pub struct HttpCompletionTransport {
    client: reqwest::Client,
    url: String,
}

impl HttpCompletionTransport {
    /// Build a transport for the stream endpoint described by `api`.
    ///
    /// Only connection setup is bounded here; the body may stream for as long
    /// as the backend keeps it open.
    pub fn new(api: &ApiConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .connect_timeout(api.request_timeout())
            .build()
            .map_err(|e| DocentError::Config(format!("HTTP client: {e}")))?;
        Ok(Self::with_client(client, api.endpoint(&api.stream_path)))
    }

    /// Use an existing client, e.g. one shared with the search client.
    pub fn with_client(client: reqwest::Client, url: impl Into<String>) -> Self {
        Self {
            client,
            url: url.into(),
        }
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}

#[async_trait]
impl CompletionTransport for HttpCompletionTransport {
    async fn open(&self, messages: &[OutboundMessage]) -> Result<ByteStream> {
        debug!(url = %self.url, messages = messages.len(), "Opening completion stream");

        let response = self
            .client
            .post(&self.url)
            .header(reqwest::header::ACCEPT, "text/event-stream")
            .json(&StreamRequest {
                messages,
                stream: true,
            })
            .send()
            .await
            .map_err(|e| DocentError::TransportOpen(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            warn!(status = status.as_u16(), body = %body, "Completion stream refused");
            return Err(DocentError::TransportOpen(format!("HTTP {}", status.as_u16())));
        }

        let body = response
            .bytes_stream()
            .map(|chunk| chunk.map_err(|e| DocentError::TransportRead(e.to_string())));
        Ok(Box::pin(body))
    }
}
