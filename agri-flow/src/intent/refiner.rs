//! Language-model refinement of insurance requests.
//!
//! The model output is untrusted: it is accepted only if it parses into
//! [`RefinedInsuranceIntent`] and passes range checks. Everything else is a
//! [`RefinementOutcome::ParseFailure`] and the caller falls back to rules.

use async_trait::async_trait;
use serde::Deserialize;

use super::insurance::InsuranceAction;
use crate::context::{ChatMessage, MessageRole};

/// Anything that can answer a single prompt with text.
#[async_trait]
pub trait IntentRefiner: Send + Sync {
    async fn complete(&self, prompt: &str) -> anyhow::Result<String>;
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RefinedInsuranceIntent {
    pub action: InsuranceAction,
    pub confidence: f32,
    #[serde(default)]
    pub reasoning: String,
}

#[derive(Debug, Clone, PartialEq)]
pub enum RefinementOutcome {
    Validated(RefinedInsuranceIntent),
    ParseFailure(String),
}

pub const REFINEMENT_PREAMBLE: &str = r#"You classify crop insurance requests from Indian farmers.
Respond with ONLY a JSON object, no prose, in this exact shape:
{"action": "<calculate_premium|generate_certificate|get_companies|recommend>", "confidence": <0.0-1.0>, "reasoning": "<one sentence>"}"#;

const EXAMPLES: &str = r#"EXAMPLES:
"How much premium for 3 hectares of rice in Odisha?" -> calculate_premium
"I need crop insurance for my 5 hectare wheat farm in Punjab" -> calculate_premium
"Help me apply for crop insurance with this premium" -> generate_certificate
"Please issue my insurance certificate" -> generate_certificate
"Which companies provide crop insurance in Maharashtra?" -> get_companies
"What scheme should I choose for cotton?" -> recommend"#;

const RULES: &str = r#"CRITICAL RULES:
- Any wish to apply, buy, enroll, purchase or get a certificate is generate_certificate, even if the message also mentions the premium.
- Questions about price, cost or premium without a wish to buy are calculate_premium.
- Questions about who offers insurance are get_companies.
- Questions about which scheme or coverage fits best are recommend.
- If nothing else fits, use calculate_premium."#;

/// Build the refinement prompt from the message, recent history and what is
/// already known about the farm.
pub fn build_prompt(message: &str, history: &[ChatMessage], known_facts: &str) -> String {
    let mut prompt = String::new();
    prompt.push_str(EXAMPLES);
    prompt.push_str("\n\n");
    prompt.push_str(RULES);
    prompt.push_str("\n\n");

    if !history.is_empty() {
        prompt.push_str("RECENT CONVERSATION:\n");
        for entry in history {
            let role = match entry.role {
                MessageRole::User => "farmer",
                MessageRole::Assistant => "assistant",
                MessageRole::System => "system",
            };
            prompt.push_str(&format!("{role}: {}\n", entry.content));
        }
        prompt.push('\n');
    }
    if !known_facts.is_empty() {
        prompt.push_str(&format!("KNOWN FACTS: {known_facts}\n\n"));
    }
    prompt.push_str(&format!("MESSAGE: \"{message}\"\n"));
    prompt
}

/// Validate raw model output. Code fences around the JSON are tolerated.
pub fn parse_refinement(raw: &str) -> RefinementOutcome {
    let trimmed = raw.trim();
    let body = trimmed
        .strip_prefix("```json")
        .or_else(|| trimmed.strip_prefix("```"))
        .and_then(|rest| rest.strip_suffix("```"))
        .unwrap_or(trimmed)
        .trim();

    match serde_json::from_str::<RefinedInsuranceIntent>(body) {
        Ok(refined) if (0.0..=1.0).contains(&refined.confidence) => {
            RefinementOutcome::Validated(refined)
        }
        Ok(refined) => RefinementOutcome::ParseFailure(format!(
            "confidence {} outside [0, 1]",
            refined.confidence
        )),
        Err(e) => RefinementOutcome::ParseFailure(e.to_string()),
    }
}

#[cfg(feature = "rig")]
pub use rig_refiner::OpenRouterRefiner;

#[cfg(feature = "rig")]
mod rig_refiner {
    use async_trait::async_trait;
    use rig::{agent::Agent, client::CompletionClient, completion::Prompt, providers::openrouter};

    use super::{IntentRefiner, REFINEMENT_PREAMBLE};

    pub const API_KEY_ENV: &str = "OPENROUTER_API_KEY";

    /// Refiner backed by an OpenRouter-hosted model.
    pub struct OpenRouterRefiner {
        agent: Agent<openrouter::CompletionModel>,
    }

    impl OpenRouterRefiner {
        pub fn new(api_key: &str, model: &str) -> Self {
            let client = openrouter::Client::new(api_key);
            let agent = client.agent(model).preamble(REFINEMENT_PREAMBLE).build();
            Self { agent }
        }

        pub fn from_env(model: &str) -> anyhow::Result<Self> {
            let api_key = std::env::var(API_KEY_ENV)
                .map_err(|_| anyhow::anyhow!("{API_KEY_ENV} not set"))?;
            Ok(Self::new(&api_key, model))
        }
    }

    #[async_trait]
    impl IntentRefiner for OpenRouterRefiner {
        async fn complete(&self, prompt: &str) -> anyhow::Result<String> {
            Ok(self.agent.prompt(prompt).await?)
        }
    }
}
