use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::{
    config::RouterConfig,
    context::Context,
    error::{FlowError, Result},
    gateway::ToolGateway,
    intent::IntentResult,
    node::Node,
    state::ConversationState,
    tools::ImageInput,
};

/// Raw inputs of one user turn.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TurnInput {
    pub message: String,
    pub image: Option<ImageInput>,
    /// Free text sent alongside an image (e.g. "wheat, 3 acres")
    pub extra_text: Option<String>,
}

impl TurnInput {
    pub fn text(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            ..Self::default()
        }
    }

    pub fn has_image(&self) -> bool {
        self.image.is_some()
    }

    /// Message and extra text joined, for extraction and intent scoring.
    pub fn combined_text(&self) -> String {
        match self.extra_text.as_deref().map(str::trim) {
            Some(extra) if !extra.is_empty() => format!("{} {}", self.message.trim(), extra),
            _ => self.message.trim().to_string(),
        }
    }
}

/// Defines what should happen after a handler completes
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum NextAction {
    /// Move to the node and run it within the same turn
    Continue(Node),
    /// Move to (or stay on) the node and wait for the user
    AwaitInput(Node),
    /// The workflow is finished
    Complete,
    /// Unrecoverable fault
    Fatal(String),
}

/// Result of a handler execution
#[derive(Debug, Clone)]
pub struct TaskResult {
    /// Response fragment to send to the user
    pub response: Option<String>,
    pub next_action: NextAction,
    /// Context changes, deep-merged by the router
    pub update: Context,
    /// Progress note surfaced through the response stream
    pub status_message: Option<String>,
    /// Why the session waits, set on recovered errors
    pub await_reason: Option<String>,
}

impl TaskResult {
    pub fn new(response: Option<String>, next_action: NextAction) -> Self {
        Self {
            response,
            next_action,
            update: Context::new(),
            status_message: None,
            await_reason: None,
        }
    }

    pub fn reply(response: impl Into<String>, next_action: NextAction) -> Self {
        Self::new(Some(response.into()), next_action)
    }

    pub fn with_update(mut self, update: Context) -> Self {
        self.update = update;
        self
    }

    pub fn with_status(mut self, status: impl Into<String>) -> Self {
        self.status_message = Some(status.into());
        self
    }

    /// Turn a handler-local error into a recoverable Followup, keeping any
    /// partial progress in `update`.
    pub fn recovered(err: &FlowError, update: Context) -> Self {
        let mut result = Self::reply(err.user_message(), NextAction::AwaitInput(Node::Followup))
            .with_update(update);
        result.await_reason = Some(err.kind().to_string());
        result
    }
}

/// Everything a handler may look at. State is read-only.
pub struct TaskInput<'a> {
    pub state: &'a ConversationState,
    pub turn: &'a TurnInput,
    pub intent: &'a IntentResult,
    pub gateway: &'a ToolGateway,
    pub config: &'a RouterConfig,
    /// True when the router moved here earlier in this same turn
    pub entered: bool,
}

impl TaskInput<'_> {
    pub fn context(&self) -> &Context {
        self.state.context()
    }
}

/// Core trait that all node handlers implement
#[async_trait]
pub trait Task: Send + Sync {
    /// Node this handler serves
    fn node(&self) -> Node;

    async fn run(&self, input: TaskInput<'_>) -> Result<TaskResult>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn combined_text_appends_extra_text() {
        let mut turn = TurnInput::text("  what is this?  ");
        assert_eq!(turn.combined_text(), "what is this?");

        turn.extra_text = Some("wheat field".to_string());
        assert_eq!(turn.combined_text(), "what is this? wheat field");

        turn.extra_text = Some("   ".to_string());
        assert_eq!(turn.combined_text(), "what is this?");
    }

    #[test]
    fn recovered_results_await_input_in_followup() {
        let err = FlowError::tool_unavailable("classify", "503");
        let result = TaskResult::recovered(&err, Context::new());
        assert_eq!(result.next_action, NextAction::AwaitInput(Node::Followup));
        assert_eq!(result.await_reason.as_deref(), Some("tool_unavailable"));
        assert!(result.response.unwrap().contains("disease classifier"));
    }
}
