//! Node handlers of the agricultural workflow.
//!
//! Each handler reads the conversation state and returns a [`TaskResult`]
//! holding its reply, the next action and a context update. None of them
//! write to the state directly.
//!
//! [`TaskResult`]: crate::task::TaskResult

mod classifying;
mod followup;
mod initial;
mod insurance;
mod order_booking;
mod prescribing;
mod show_vendors;
pub mod types;
pub(crate) mod utils;
mod vendor_query;

pub use classifying::ClassifyingTask;
pub use followup::FollowupTask;
pub use initial::{InitialTask, WELCOME_MESSAGE};
pub use insurance::InsuranceTask;
pub use order_booking::OrderBookingTask;
pub use prescribing::PrescribingTask;
pub use show_vendors::ShowVendorsTask;
pub use types::{
    ClassificationRecord, InsuranceContext, Order, OrderStatus, PrescriptionRecord, VendorQuery,
    session_keys,
};
pub use vendor_query::VendorQueryTask;

#[cfg(test)]
pub(crate) mod test_support {
    use async_trait::async_trait;
    use serde_json::Value;
    use std::{collections::HashMap, sync::Arc, sync::Mutex};

    use crate::{
        config::{GatewayConfig, RouterConfig},
        error::Result,
        gateway::{ToolError, ToolGateway, ToolName, ToolTransport},
        intent::classify_rules,
        state::ConversationState,
        task::{Task, TaskInput, TaskResult, TurnInput},
    };

    /// Answers each tool from a scripted queue and records the arguments.
    /// The last scripted reply repeats once the queue is drained.
    #[derive(Default)]
    pub struct StubTransport {
        replies: Mutex<HashMap<ToolName, Vec<std::result::Result<Value, ToolError>>>>,
        calls: Mutex<Vec<(ToolName, Value)>>,
    }

    impl StubTransport {
        pub fn reply(self, tool: ToolName, data: Value) -> Self {
            self.replies.lock().unwrap().entry(tool).or_default().push(Ok(data));
            self
        }

        pub fn fail(self, tool: ToolName, error: ToolError) -> Self {
            self.replies.lock().unwrap().entry(tool).or_default().push(Err(error));
            self
        }

        pub fn calls(&self, tool: ToolName) -> Vec<Value> {
            self.calls
                .lock()
                .unwrap()
                .iter()
                .filter(|(t, _)| *t == tool)
                .map(|(_, args)| args.clone())
                .collect()
        }
    }

    #[async_trait]
    impl ToolTransport for StubTransport {
        async fn call(
            &self,
            tool: ToolName,
            arguments: &Value,
        ) -> std::result::Result<Value, ToolError> {
            self.calls.lock().unwrap().push((tool, arguments.clone()));
            let mut replies = self.replies.lock().unwrap();
            match replies.get_mut(&tool) {
                Some(queue) if queue.len() > 1 => queue.remove(0),
                Some(queue) if !queue.is_empty() => queue[0].clone(),
                _ => Err(ToolError::connection(format!("{tool} not scripted"))),
            }
        }
    }

    pub fn gateway(transport: Arc<StubTransport>) -> ToolGateway {
        ToolGateway::new(
            transport,
            GatewayConfig {
                max_attempts: 1,
                base_delay_ms: 1,
                ..GatewayConfig::default()
            },
        )
    }

    /// Run one handler the way the router would, classifying with rules only.
    pub async fn run_task(
        task: &dyn Task,
        state: &ConversationState,
        turn: &TurnInput,
        gateway: &ToolGateway,
        entered: bool,
    ) -> Result<TaskResult> {
        let intent = classify_rules(turn, state.context());
        let config = RouterConfig::default();
        task.run(TaskInput {
            state,
            turn,
            intent: &intent,
            gateway,
            config: &config,
            entered,
        })
        .await
    }
}
