use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use std::collections::BTreeMap;

use crate::{
    context::{ChatMessage, Context, Transcript},
    node::Node,
};

/// What the conversation is waiting for after a turn.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TurnOutcome {
    /// The router moved on and will keep executing without user input.
    Continue,
    /// The assistant asked something and needs the user's reply.
    AwaitInput { reason: Option<String> },
    /// The workflow finished normally.
    Complete,
    /// The session hit an unrecoverable fault.
    Fatal { reason: String },
}

impl TurnOutcome {
    pub fn await_input() -> Self {
        Self::AwaitInput { reason: None }
    }

    pub fn await_because(reason: impl Into<String>) -> Self {
        Self::AwaitInput {
            reason: Some(reason.into()),
        }
    }

    pub fn as_hint(&self) -> &'static str {
        match self {
            Self::Continue => "continue",
            Self::AwaitInput { .. } => "await_user_input",
            Self::Complete => "completed",
            Self::Fatal { .. } => "fatal",
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoopEntry {
    pub last_message: Option<String>,
    pub repeat_count: u32,
}

/// Everything the orchestrator knows about one conversation.
///
/// Fields are crate-private so that node changes only happen through the
/// router, which checks each move against the declared transition table.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConversationState {
    pub(crate) session_id: String,
    pub(crate) current_node: Node,
    pub(crate) previous_node: Node,
    pub(crate) outcome: TurnOutcome,
    pub(crate) transcript: Transcript,
    pub(crate) context: Context,
    #[serde(default)]
    pub(crate) loop_tracker: BTreeMap<String, LoopEntry>,
    pub(crate) turn_count: u64,
    pub(crate) created_at: DateTime<Utc>,
    pub(crate) updated_at: DateTime<Utc>,
}

impl ConversationState {
    pub fn new(session_id: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            session_id: session_id.into(),
            current_node: Node::Initial,
            previous_node: Node::Initial,
            outcome: TurnOutcome::await_input(),
            transcript: Transcript::new(),
            context: Context::new(),
            loop_tracker: BTreeMap::new(),
            turn_count: 0,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    pub fn current_node(&self) -> Node {
        self.current_node
    }

    pub fn previous_node(&self) -> Node {
        self.previous_node
    }

    pub fn outcome(&self) -> &TurnOutcome {
        &self.outcome
    }

    pub fn next_action(&self) -> &'static str {
        self.outcome.as_hint()
    }

    pub fn requires_user_input(&self) -> bool {
        matches!(self.outcome, TurnOutcome::AwaitInput { .. })
    }

    pub fn is_complete(&self) -> bool {
        self.current_node.is_terminal()
    }

    pub fn transcript(&self) -> &Transcript {
        &self.transcript
    }

    pub fn context(&self) -> &Context {
        &self.context
    }

    pub fn loop_entry(&self, scope: &str) -> Option<&LoopEntry> {
        self.loop_tracker.get(scope)
    }

    pub fn turn_count(&self) -> u64 {
        self.turn_count
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn updated_at(&self) -> DateTime<Utc> {
        self.updated_at
    }

    pub(crate) fn begin_turn(&mut self, user_text: impl Into<String>) {
        self.turn_count += 1;
        self.transcript.push(ChatMessage::user(user_text));
    }

    pub(crate) fn finish_turn(&mut self, assistant_text: impl Into<String>) {
        self.transcript.push(ChatMessage::assistant(assistant_text));
        self.updated_at = Utc::now();
    }

    /// Snapshot returned to the front end alongside the response text.
    pub fn structured_data(&self) -> Value {
        json!({
            "current_node": self.current_node,
            "previous_node": self.previous_node,
            "next_action": self.next_action(),
            "requires_user_input": self.requires_user_input(),
            "turn_count": self.turn_count,
            "context": self.context.to_value(),
        })
    }
}
