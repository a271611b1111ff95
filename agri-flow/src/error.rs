use thiserror::Error;

use crate::node::Node;

#[derive(Error, Debug)]
pub enum FlowError {
    #[error("Missing required context: {missing}")]
    Validation { missing: String, hint: String },

    #[error("Tool '{tool}' unavailable: {message}")]
    ToolUnavailable { tool: String, message: String },

    #[error("Intent refinement produced unusable output: {0}")]
    IntentAmbiguous(String),

    #[error("Repeated message detected in scope '{scope}'")]
    LoopDetected { scope: String },

    #[error("Undeclared transition requested: {from} -> {to}")]
    FatalState { from: Node, to: Node },

    #[error("Invalid workflow graph: {0}")]
    InvalidGraph(String),

    #[error("Session not found: {0}")]
    SessionNotFound(String),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, FlowError>;

impl FlowError {
    pub fn validation(missing: impl Into<String>, hint: impl Into<String>) -> Self {
        Self::Validation {
            missing: missing.into(),
            hint: hint.into(),
        }
    }

    pub fn tool_unavailable(tool: impl Into<String>, message: impl Into<String>) -> Self {
        Self::ToolUnavailable {
            tool: tool.into(),
            message: message.into(),
        }
    }

    /// Only an undeclared transition ends a session.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::FatalState { .. })
    }

    /// Short machine-readable tag, used as the await reason on recovered turns.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Validation { .. } => "validation",
            Self::ToolUnavailable { .. } => "tool_unavailable",
            Self::IntentAmbiguous(_) => "intent_ambiguous",
            Self::LoopDetected { .. } => "loop_detected",
            Self::FatalState { .. } => "fatal_state",
            Self::InvalidGraph(_) => "invalid_graph",
            Self::SessionNotFound(_) => "session_not_found",
            Self::Storage(_) => "storage",
            Self::Config(_) => "config",
            Self::Serialization(_) => "serialization",
        }
    }

    /// Text safe to show the user. Internal detail stays in the logs.
    pub fn user_message(&self) -> String {
        match self {
            Self::Validation { missing, hint } => {
                format!("I still need {missing} before I can continue. {hint}")
            }
            Self::ToolUnavailable { tool, .. } => format!(
                "Sorry, the {} is not responding right now. Your progress is saved, so please try again in a moment.",
                tool_display_name(tool)
            ),
            Self::IntentAmbiguous(_) => {
                "Could you tell me a little more about what you would like to do?".to_string()
            }
            Self::LoopDetected { .. } => crate::loop_guard::REPHRASE_MESSAGE.to_string(),
            Self::FatalState { .. } => {
                "Something went wrong and this conversation cannot continue. Please start a new session."
                    .to_string()
            }
            _ => "Something went wrong on our side. Please try again.".to_string(),
        }
    }
}

fn tool_display_name(tool: &str) -> &str {
    match tool {
        "classify" => "disease classifier",
        "prescribe" => "treatment advisor",
        "insure" => "insurance service",
        "find_vendor" => "vendor directory",
        other => other,
    }
}
