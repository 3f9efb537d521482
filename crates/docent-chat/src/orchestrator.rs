//! Chat pipeline: central coordinator wiring search, context, and streaming.
//!
//! One turn runs search -> assemble -> stream -> finalize. The `is_loading`
//! flag of the conversation state is the only gate: a turn started while
//! another is in progress is dropped, not queued.

use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use tracing::{debug, error, info, warn};
use uuid::Uuid;

use docent_core::config::DocentConfig;
use docent_core::error::{DocentError, Result};
use docent_core::types::{ConversationMessage, SearchResult};
use docent_stream::consumer::{StreamConsumer, StreamObserver};
use docent_stream::transport::{CompletionTransport, HttpCompletionTransport};

use crate::context::ContextAssembler;
use crate::conversation::{ConversationState, TurnPhase};
use crate::error::ChatError;
use crate::search::{HttpSearchClient, SearchService};

/// How a call to [`ChatPipeline::send_turn`] ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TurnOutcome {
    /// Another turn was in progress or the utterance was blank. Nothing changed.
    Rejected,
    /// The assistant message was finalized with streamed content.
    Completed { message_id: Uuid },
    /// The turn failed. `message_id` is the message carrying the apology, or
    /// `None` if the turn had already been finalized and no apology was added.
    Failed { message_id: Option<Uuid> },
}

/// Central pipeline that owns the conversation and runs turns against it.
pub struct ChatPipeline {
    search: Arc<dyn SearchService>,
    consumer: StreamConsumer,
    assembler: ContextAssembler,
    search_limit: usize,
    request_timeout: Duration,
    state: Mutex<ConversationState>,
}

impl ChatPipeline {
    /// Create a pipeline over explicit search and transport handles.
    pub fn new(
        config: &DocentConfig,
        search: Arc<dyn SearchService>,
        transport: Arc<dyn CompletionTransport>,
    ) -> Self {
        let request_timeout = config.api.request_timeout();
        Self {
            search,
            consumer: StreamConsumer::new(transport, request_timeout),
            assembler: ContextAssembler::new(&config.context),
            search_limit: config.search.limit,
            request_timeout,
            state: Mutex::new(ConversationState::new()),
        }
    }

    /// Create a pipeline talking HTTP to the backend in `config.api`.
    ///
    /// Both endpoints share one client, built once here.
    pub fn from_config(config: &DocentConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .connect_timeout(config.api.request_timeout())
            .build()
            .map_err(|e| DocentError::Config(format!("HTTP client: {e}")))?;

        let search = HttpSearchClient::with_client(client.clone(), &config.api);
        let transport = HttpCompletionTransport::with_client(
            client,
            config.api.endpoint(&config.api.stream_path),
        );
        Ok(Self::new(config, Arc::new(search), Arc::new(transport)))
    }

    /// Run one turn for `utterance`.
    ///
    /// Returns `Rejected` without touching the conversation if a turn is
    /// already in progress or the utterance is blank. Otherwise the turn runs
    /// to a terminal state before this returns. Dropping the returned future
    /// abandons the turn: reading stops and the turn is finalized as failed.
    pub async fn send_turn(&self, utterance: &str) -> TurnOutcome {
        let prior = {
            let mut state = self.lock_state();
            let prior = state.messages().to_vec();
            match state.begin_turn(utterance) {
                Ok(_) => prior,
                Err(e) => {
                    debug!(error = %e, "Turn rejected");
                    return TurnOutcome::Rejected;
                }
            }
        };
        let mut guard = TurnGuard::new(&self.state);
        info!(history = prior.len(), "Turn started");

        let results = self.search_documents(utterance).await;
        let outbound = self.assembler.assemble(utterance, &prior, &results);

        let opened = self.lock_state().open_placeholder(results);
        if let Err(e) = opened {
            error!(error = %e, "Could not open assistant placeholder");
            let message_id = guard.fail();
            return TurnOutcome::Failed { message_id };
        }

        let mut observer = TurnObserver {
            state: &self.state,
            outcome: None,
        };
        let summary = self.consumer.run(&outbound, &mut observer).await;
        guard.disarm();

        let outcome = match observer.outcome {
            Some(outcome) => outcome,
            None => {
                // The consumer always ends with on_done or on_error; reaching
                // here means a callback's transition was refused.
                warn!(summary = ?summary, "Turn ended without a terminal transition");
                let message_id = self.fail_turn();
                TurnOutcome::Failed { message_id }
            }
        };
        info!(outcome = ?outcome, deltas = summary.deltas, "Turn finished");
        outcome
    }

    /// Snapshot of the conversation log in insertion order.
    pub fn messages(&self) -> Vec<ConversationMessage> {
        self.lock_state().messages().to_vec()
    }

    pub fn is_loading(&self) -> bool {
        self.lock_state().is_loading()
    }

    pub fn phase(&self) -> TurnPhase {
        self.lock_state().phase()
    }

    /// Remove every message. Fails with `Busy` while a turn is in progress.
    pub fn clear(&self) -> std::result::Result<(), ChatError> {
        self.lock_state().clear()
    }

    // -- Private helpers --

    /// Best-effort search: any failure or timeout degrades to no results.
    async fn search_documents(&self, query: &str) -> Vec<SearchResult> {
        let search = self.search.search(query, self.search_limit);
        match tokio::time::timeout(self.request_timeout, search).await {
            Ok(Ok(results)) => {
                debug!(results = results.len(), "Search succeeded");
                results
            }
            Ok(Err(e)) => {
                warn!(error = %e, "Search failed; continuing without context");
                Vec::new()
            }
            Err(_) => {
                warn!(
                    timeout_secs = self.request_timeout.as_secs(),
                    "Search timed out; continuing without context"
                );
                Vec::new()
            }
        }
    }

    fn fail_turn(&self) -> Option<Uuid> {
        fail_state(&self.state)
    }

    fn lock_state(&self) -> MutexGuard<'_, ConversationState> {
        lock(&self.state)
    }
}

fn lock(state: &Mutex<ConversationState>) -> MutexGuard<'_, ConversationState> {
    // A panic while holding the lock leaves the log itself consistent, so
    // recover the guard instead of propagating the poison.
    state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Drive the state to its failure transition, returning the apology's id.
///
/// Returns `None` when the state is already Idle and nothing was changed.
fn fail_state(state: &Mutex<ConversationState>) -> Option<Uuid> {
    match lock(state).fail() {
        Ok(id) => Some(id),
        Err(e) => {
            warn!(error = %e, "Failure transition skipped");
            None
        }
    }
}

// =============================================================================
// Stream callbacks
// =============================================================================

/// Routes stream callbacks into the conversation state transitions.
struct TurnObserver<'a> {
    state: &'a Mutex<ConversationState>,
    outcome: Option<TurnOutcome>,
}

impl StreamObserver for TurnObserver<'_> {
    fn on_delta(&mut self, text: &str) {
        if let Err(e) = lock(self.state).append_delta(text) {
            warn!(error = %e, "Delta dropped");
        }
    }

    fn on_done(&mut self) {
        match lock(self.state).complete() {
            Ok(message_id) => self.outcome = Some(TurnOutcome::Completed { message_id }),
            Err(e) => warn!(error = %e, "Completion transition refused"),
        }
    }

    fn on_error(&mut self, err: DocentError) {
        error!(error = %err, fatal = err.is_fatal(), "Turn failed");
        let message_id = fail_state(self.state);
        self.outcome = Some(TurnOutcome::Failed { message_id });
    }
}

// =============================================================================
// Abandonment guard
// =============================================================================

/// Finalizes the turn as failed if `send_turn` is dropped mid-flight.
struct TurnGuard<'a> {
    state: &'a Mutex<ConversationState>,
    armed: bool,
}

impl<'a> TurnGuard<'a> {
    fn new(state: &'a Mutex<ConversationState>) -> Self {
        Self { state, armed: true }
    }

    fn disarm(&mut self) {
        self.armed = false;
    }

    fn fail(&mut self) -> Option<Uuid> {
        self.armed = false;
        fail_state(self.state)
    }
}

impl Drop for TurnGuard<'_> {
    fn drop(&mut self) {
        if self.armed {
            warn!("Turn abandoned before completion");
            fail_state(self.state);
        }
    }
}

// =============================================================================
// Tests
// =============================================================================
