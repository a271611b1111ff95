//! # agri-flow
//!
//! Session-scoped conversational workflow orchestrator for an agricultural
//! assistant. A farmer's turn (text, optionally a plant photo) is classified,
//! routed through a fixed graph of nodes (diagnosis, treatment, insurance,
//! vendor lookup, ordering) and answered, with every external capability
//! reached through a retrying [`gateway::ToolGateway`].
//!
//! The main entry point is [`FlowRunner`], built with
//! [`workflow::create_flow_runner`].

pub mod config;
pub mod context;
pub mod error;
pub mod gateway;
pub mod graph;
pub mod intent;
pub mod loop_guard;
pub mod node;
pub mod runner;
pub mod state;
pub mod storage;
#[cfg(feature = "postgres")]
pub mod storage_postgres;
pub mod stream;
pub mod task;
pub mod tasks;
pub mod tools;
pub mod workflow;

// Re-export commonly used types
pub use config::FlowConfig;
pub use context::{ChatMessage, Context, MessageRole, Transcript};
pub use error::{FlowError, Result};
pub use gateway::{FailureKind, ToolError, ToolGateway, ToolName, ToolResult, ToolTransport};
pub use graph::{Graph, GraphBuilder, TransitionTable};
pub use intent::{
    InsuranceAction, IntentClassifier, IntentLabel, IntentRefiner, IntentResult, IntentSource,
};
pub use loop_guard::LoopGuard;
pub use node::Node;
pub use runner::{FlowRunner, TurnRequest, TurnResponse};
pub use state::{ConversationState, TurnOutcome};
pub use storage::{InMemorySessionStorage, SessionGuard, SessionStorage, SessionStore};
#[cfg(feature = "postgres")]
pub use storage_postgres::PostgresSessionStorage;
pub use stream::{ResponseStream, TurnEvent, TurnEvents};
pub use task::{NextAction, Task, TaskInput, TaskResult, TurnInput};
pub use tools::ImageInput;
pub use workflow::{build_agri_workflow, create_flow_runner};

#[cfg(feature = "http")]
pub use gateway::http::HttpToolTransport;
#[cfg(feature = "rig")]
pub use intent::refiner::OpenRouterRefiner;
