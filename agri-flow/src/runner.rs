//! FlowRunner – loads a session, runs exactly **one** user turn through the
//! workflow, and persists the result.
//!
//! A turn is atomic: the runner works on a loaded copy of the
//! [`ConversationState`] and saves it only once the turn has completed.
//! If the turn future is dropped, or the consumer of
//! [`FlowRunner::turn_stream`] goes away, nothing is written.
//!
//! Turns of the same session are serialized by the store's per-session lock;
//! different sessions run fully in parallel.
//!
//! ```rust,ignore
//! let runner = create_flow_runner(&config, transport, storage, None)?;
//! let reply = runner
//!     .turn(TurnRequest::new("farmer-42", "My wheat leaves have yellow spots"))
//!     .await?;
//! println!("{}", reply.response_text);
//! ```

use serde::Serialize;
use serde_json::Value;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

use crate::{
    error::{FlowError, Result},
    graph::Graph,
    intent::{IntentClassifier, classify_rules},
    loop_guard::{LoopGuard, REPHRASE_MESSAGE, scope_for},
    node::Node,
    state::ConversationState,
    storage::SessionStore,
    stream::{ResponseStream, TurnEvents},
    task::TurnInput,
    tools::ImageInput,
};

/// One user turn as submitted by a front end.
#[derive(Debug, Clone)]
pub struct TurnRequest {
    pub session_id: String,
    pub message: String,
    pub image: Option<ImageInput>,
    pub extra_text: Option<String>,
}

impl TurnRequest {
    pub fn new(session_id: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            session_id: session_id.into(),
            message: message.into(),
            image: None,
            extra_text: None,
        }
    }

    pub fn with_image(mut self, image: ImageInput) -> Self {
        self.image = Some(image);
        self
    }

    pub fn with_extra_text(mut self, text: impl Into<String>) -> Self {
        self.extra_text = Some(text.into());
        self
    }
}

/// What the front end gets back after a turn.
#[derive(Debug, Clone, Serialize)]
pub struct TurnResponse {
    pub session_id: String,
    pub response_text: String,
    pub current_node: Node,
    pub structured_data: Value,
    pub is_complete: bool,
    pub requires_user_input: bool,
    pub next_action: String,
}

impl TurnResponse {
    fn from_state(state: &ConversationState, response_text: String) -> Self {
        Self {
            session_id: state.session_id().to_string(),
            response_text,
            current_node: state.current_node(),
            structured_data: state.structured_data(),
            is_complete: state.is_complete(),
            requires_user_input: state.requires_user_input(),
            next_action: state.next_action().to_string(),
        }
    }
}

/// High-level helper that orchestrates the _lock → load → run → save_ cycle.
#[derive(Clone)]
pub struct FlowRunner {
    graph: Arc<Graph>,
    store: SessionStore,
    classifier: Arc<IntentClassifier>,
    loop_guard: LoopGuard,
}

impl FlowRunner {
    pub fn new(
        graph: Arc<Graph>,
        store: SessionStore,
        classifier: Arc<IntentClassifier>,
        loop_guard: LoopGuard,
    ) -> Self {
        Self {
            graph,
            store,
            classifier,
            loop_guard,
        }
    }

    pub fn graph(&self) -> &Graph {
        &self.graph
    }

    /// Run one turn and return the committed response.
    pub async fn turn(&self, request: TurnRequest) -> Result<TurnResponse> {
        let _guard = self.store.lock(&request.session_id).await;
        self.run_locked(request, &TurnEvents::disabled()).await
    }

    /// Run one turn in the background and stream its events.
    ///
    /// The session lock is taken before this returns, so streamed turns of
    /// one session run in the order they were submitted. Dropping the
    /// returned stream cancels the turn without saving it.
    pub async fn turn_stream(&self, request: TurnRequest) -> ResponseStream {
        let guard = self.store.lock(&request.session_id).await;
        let (events, stream) = TurnEvents::channel();
        let runner = self.clone();

        tokio::spawn(async move {
            let _guard = guard;
            let session_id = request.session_id.clone();
            tokio::select! {
                result = runner.run_locked(request, &events) => {
                    if let Err(e) = result {
                        error!(session_id = %session_id, error = %e, "Streamed turn failed");
                        events.error(e.user_message());
                    }
                }
                _ = events.closed() => {
                    info!(session_id = %session_id, "Stream closed by consumer, turn cancelled");
                }
            }
        });

        stream
    }

    /// Current state of a session.
    pub async fn session(&self, session_id: &str) -> Result<ConversationState> {
        self.store
            .load(session_id)
            .await?
            .ok_or_else(|| FlowError::SessionNotFound(session_id.to_string()))
    }

    /// Start the session over from Initial with an empty context.
    pub async fn reset(&self, session_id: &str) -> Result<ConversationState> {
        let _guard = self.store.lock(session_id).await;
        let state = ConversationState::new(session_id);
        self.store.save(state.clone()).await?;
        info!(session_id = %session_id, "Session reset");
        Ok(state)
    }

    pub async fn delete(&self, session_id: &str) -> Result<()> {
        let _guard = self.store.lock(session_id).await;
        self.store.delete(session_id).await?;
        info!(session_id = %session_id, "Session deleted");
        Ok(())
    }

    /// Body of a turn. The caller holds the session lock.
    async fn run_locked(&self, request: TurnRequest, events: &TurnEvents) -> Result<TurnResponse> {
        // 1. Load the session, or start a new one
        let mut state = match self.store.load(&request.session_id).await? {
            Some(state) => state,
            None => {
                info!(session_id = %request.session_id, "Starting new session");
                ConversationState::new(&request.session_id)
            }
        };

        let turn = TurnInput {
            message: request.message,
            image: request.image,
            extra_text: request.extra_text,
        };

        // 2. Repetition check, scoped by where the message would lead
        let message = turn.message.trim();
        let looped = !message.is_empty() && !state.is_complete() && {
            let rule_intent = classify_rules(&turn, state.context()).intent;
            let scope = scope_for(state.current_node(), rule_intent);
            self.loop_guard.check(&mut state, scope, message)
        };

        // 3. Classify against the history before this turn, then run the graph
        let intent = if looped {
            None
        } else {
            Some(
                self.classifier
                    .classify(&turn, state.context(), state.transcript())
                    .await,
            )
        };
        state.begin_turn(transcript_text(&turn));

        let response_text = match intent {
            Some(intent) => {
                debug!(
                    session_id = %state.session_id(),
                    intent = %intent.intent,
                    confidence = intent.confidence,
                    source = ?intent.source,
                    "Intent classified"
                );
                self.graph.advance(&mut state, &turn, &intent, events).await
            }
            None => {
                warn!(session_id = %state.session_id(), "Repeated message, asking to rephrase");
                events.partial(REPHRASE_MESSAGE);
                REPHRASE_MESSAGE.to_string()
            }
        };

        // 4. Commit
        state.finish_turn(response_text.clone());
        let response = TurnResponse::from_state(&state, response_text);
        self.store.save(state).await?;
        events.finish(response.clone());
        Ok(response)
    }
}

fn transcript_text(turn: &TurnInput) -> String {
    let text = turn.combined_text();
    match (&turn.image, text.is_empty()) {
        (Some(_), true) => "[image]".to_string(),
        (Some(_), false) => format!("{text} [image]"),
        (None, _) => text,
    }
}
