#![allow(dead_code)]

use agri_flow::{
    FlowConfig, FlowRunner, InMemorySessionStorage, IntentRefiner, ToolError, ToolName,
    ToolTransport, create_flow_runner,
};
use async_trait::async_trait;
use serde_json::{Value, json};
use std::{
    collections::HashMap,
    sync::{Arc, Mutex},
    time::Duration,
};

/// Tool backend answering from per-tool queues; the last reply repeats.
#[derive(Default)]
pub struct ScriptedTransport {
    replies: Mutex<HashMap<ToolName, Vec<Result<Value, ToolError>>>>,
    calls: Mutex<Vec<(ToolName, Value)>>,
    delay: Option<Duration>,
}

impl ScriptedTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

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

    /// Reasonable answers for every tool.
    pub fn healthy() -> Self {
        Self::new()
            .reply(
                ToolName::Classify,
                json!({"disease": "Leaf Rust", "confidence": 0.92}),
            )
            .reply(
                ToolName::Prescribe,
                json!({
                    "treatment_text": "Spray propiconazole at the first sign of pustules.",
                    "dosage": "1 ml per litre of water",
                    "safety_notes": "Wear gloves and a mask while spraying.",
                    "products": ["Propiconazole 25% EC"]
                }),
            )
            .reply(
                ToolName::Insure,
                insurance_text(json!({
                    "premium": 1250.5,
                    "certificate_reference": "PMFBY-2024-000123"
                })),
            )
            .reply(
                ToolName::FindVendor,
                json!([
                    {"vendor": "Kisan Agro Centre", "price": 420.0, "availability": "in stock"},
                    {"vendor": "Green Fields", "price": 399.0, "availability": "2 days"}
                ]),
            )
    }
}

#[async_trait]
impl ToolTransport for ScriptedTransport {
    async fn call(&self, tool: ToolName, arguments: &Value) -> Result<Value, ToolError> {
        self.calls.lock().unwrap().push((tool, arguments.clone()));
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        let mut replies = self.replies.lock().unwrap();
        match replies.get_mut(&tool) {
            Some(queue) if queue.len() > 1 => queue.remove(0),
            Some(queue) if !queue.is_empty() => queue[0].clone(),
            _ => Err(ToolError::connection(format!("{tool} not scripted"))),
        }
    }
}

/// Insurance tool-call reply with a JSON text block.
pub fn insurance_text(body: Value) -> Value {
    json!({
        "content": [{"type": "text", "text": body.to_string()}],
        "is_error": false
    })
}

/// Language-model stand-in returning a fixed completion, or failing.
pub struct ScriptedRefiner {
    pub answer: Option<String>,
}

#[async_trait]
impl IntentRefiner for ScriptedRefiner {
    async fn complete(&self, _prompt: &str) -> anyhow::Result<String> {
        match &self.answer {
            Some(answer) => Ok(answer.clone()),
            None => anyhow::bail!("model unavailable"),
        }
    }
}

pub fn test_config() -> FlowConfig {
    let mut config = FlowConfig::default();
    config.gateway.base_delay_ms = 1;
    config
}

pub fn runner_with(transport: Arc<ScriptedTransport>) -> FlowRunner {
    create_flow_runner(
        &test_config(),
        transport,
        Arc::new(InMemorySessionStorage::new()),
        None,
    )
    .expect("valid test configuration")
}
