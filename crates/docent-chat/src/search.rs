//! Document search contract.
//!
//! The pipeline only needs ranked documents for a query; ranking itself lives
//! in the backend. `HttpSearchClient` talks to the backend's search endpoint.

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::debug;

use docent_core::config::ApiConfig;
use docent_core::error::{DocentError, Result};
use docent_core::types::SearchResult;

/// Looks up documents relevant to a query.
#[async_trait]
pub trait SearchService: Send + Sync {
    /// Return at most `limit` results, best match first.
    ///
    /// Must fail with `DocentError::SearchFailure` (or `Timeout`) rather than
    /// hang indefinitely.
    async fn search(&self, query: &str, limit: usize) -> Result<Vec<SearchResult>>;
}

#[derive(Debug, Serialize)]
struct SearchRequest<'a> {
    query: &'a str,
    limit: usize,
}

#[derive(Debug, Deserialize)]
struct SearchResponse {
    #[serde(default)]
    results: Vec<SearchResult>,
}

/// `SearchService` backed by the HTTP search endpoint.
#[derive(Debug, Clone)]
pub struct HttpSearchClient {
    client: reqwest::Client,
    url: String,
    timeout: Duration,
}

impl HttpSearchClient {
    pub fn new(api: &ApiConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .connect_timeout(api.request_timeout())
            .build()
            .map_err(|e| DocentError::Config(format!("HTTP client: {e}")))?;
        Ok(Self::with_client(client, api))
    }

    /// Use an existing client, e.g. one shared with the completion transport.
    pub fn with_client(client: reqwest::Client, api: &ApiConfig) -> Self {
        Self {
            client,
            url: api.endpoint(&api.search_path),
            timeout: api.request_timeout(),
        }
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}

#[async_trait]
impl SearchService for HttpSearchClient {
    async fn search(&self, query: &str, limit: usize) -> Result<Vec<SearchResult>> {
        let response = self
            .client
            .post(&self.url)
            .timeout(self.timeout)
            .json(&SearchRequest { query, limit })
            .send()
            .await
            .map_err(|e| DocentError::SearchFailure(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(DocentError::SearchFailure(format!(
                "HTTP {}",
                status.as_u16()
            )));
        }

        let body: SearchResponse = response
            .json()
            .await
            .map_err(|e| DocentError::SearchFailure(e.to_string()))?;
        debug!(results = body.results.len(), "Search completed");
        Ok(body.results)
    }
}
