use async_trait::async_trait;
use serde_json::json;
use tracing::{debug, info};

use super::{
    types::{ClassificationRecord, PrescriptionRecord, session_keys},
    utils::{classification, update_with},
};
use crate::{
    error::{FlowError, Result},
    gateway::ToolName,
    intent::IntentLabel,
    node::Node,
    task::{NextAction, Task, TaskInput, TaskResult},
    tools::parse_prescription,
};

const NEXT_STEPS: &str = "Would you like help with crop insurance, or shall I find vendors near you who stock the recommended products?";

/// Treatment advice for the classified disease.
pub struct PrescribingTask;

#[async_trait]
impl Task for PrescribingTask {
    fn node(&self) -> Node {
        Node::Prescribing
    }

    async fn run(&self, input: TaskInput<'_>) -> Result<TaskResult> {
        let record = classification(input.context()).ok_or_else(|| {
            FlowError::validation(
                "a diagnosis",
                "Please upload a photo of the affected plant first.",
            )
        })?;

        if !input.entered {
            return route_reply(&input, &record).await;
        }

        let (prescription, fetched) = prescription_for(&input, &record).await?;
        let response = format!("{}\n\n{}", present(&prescription), NEXT_STEPS);
        let result = TaskResult::reply(response, NextAction::AwaitInput(Node::Prescribing));
        Ok(if fetched {
            result.with_update(update_with(session_keys::PRESCRIPTION, &prescription))
        } else {
            result
        })
    }
}

async fn route_reply(input: &TaskInput<'_>, record: &ClassificationRecord) -> Result<TaskResult> {
    let result = match input.intent.intent {
        IntentLabel::Insurance => TaskResult::new(None, NextAction::Continue(Node::Insurance))
            .with_status("Looking into crop insurance"),
        IntentLabel::Vendor | IntentLabel::Order => {
            TaskResult::new(None, NextAction::Continue(Node::VendorQuery))
                .with_status("Looking for vendors")
        }
        IntentLabel::Decline => TaskResult::reply(
            "Alright. I hope your crop recovers quickly!",
            NextAction::Complete,
        ),
        IntentLabel::Restart => TaskResult::new(None, NextAction::Continue(Node::Followup)),
        _ if input.turn.has_image() => TaskResult::new(None, NextAction::Continue(Node::Followup)),
        IntentLabel::Treatment => {
            let (prescription, fetched) = prescription_for(input, record).await?;
            let result = TaskResult::reply(
                format!("{}\n\n{}", present(&prescription), NEXT_STEPS),
                NextAction::AwaitInput(Node::Prescribing),
            );
            if fetched {
                result.with_update(update_with(session_keys::PRESCRIPTION, &prescription))
            } else {
                result
            }
        }
        _ => TaskResult::reply(
            format!("Is there anything else I can help with for the {}? {}", record.disease, NEXT_STEPS),
            NextAction::AwaitInput(Node::Prescribing),
        ),
    };
    Ok(result)
}

/// Stored prescription for the same disease, or a fresh one. The flag
/// tells whether the tool was called.
async fn prescription_for(
    input: &TaskInput<'_>,
    record: &ClassificationRecord,
) -> Result<(PrescriptionRecord, bool)> {
    if let Some(cached) = input
        .context()
        .get::<PrescriptionRecord>(session_keys::PRESCRIPTION)
        .filter(|p| p.disease == record.disease)
    {
        debug!(disease = %record.disease, "Reusing stored prescription");
        return Ok((cached, false));
    }

    let data = input
        .gateway
        .invoke(
            ToolName::Prescribe,
            json!({
                "disease": record.disease,
                "crop": record.crop,
                "confidence": record.confidence,
            }),
        )
        .await
        .into_data(ToolName::Prescribe)?;
    let prescription = PrescriptionRecord::new(&record.disease, parse_prescription(data)?);
    info!(
        session_id = %input.state.session_id(),
        disease = %record.disease,
        products = prescription.products.len(),
        "Prescription received"
    );
    Ok((prescription, true))
}

fn present(prescription: &PrescriptionRecord) -> String {
    let mut text = format!("**Treatment for {}**\n{}", prescription.disease, prescription.treatment_text);
    if let Some(dosage) = &prescription.dosage {
        text.push_str(&format!("\n\n**Dosage:** {dosage}"));
    }
    if let Some(notes) = &prescription.safety_notes {
        text.push_str(&format!("\n\n**Safety:** {notes}"));
    }
    if !prescription.products.is_empty() {
        text.push_str(&format!("\n\n**Products:** {}", prescription.products.join(", ")));
    }
    text
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        state::ConversationState,
        task::TurnInput,
        tasks::test_support::{StubTransport, gateway, run_task},
    };
    use std::sync::Arc;

    fn diagnosed_state() -> ConversationState {
        let mut state = ConversationState::new("s1");
        state.current_node = Node::Prescribing;
        state.context.set(
            session_keys::CLASSIFICATION,
            json!({"disease": "Leaf Rust", "confidence": 0.9, "crop": "wheat", "image_digest": "abc"}),
        );
        state
    }

    fn prescriber() -> Arc<StubTransport> {
        Arc::new(StubTransport::default().reply(
            ToolName::Prescribe,
            json!({
                "treatment_text": "Spray propiconazole at first sign of pustules.",
                "dosage": "1 ml per litre",
                "safety_notes": "Wear gloves.",
                "products": ["Propiconazole 25% EC"]
            }),
        ))
    }

    #[tokio::test]
    async fn first_visit_presents_treatment_and_waits() {
        let transport = prescriber();
        let gateway = gateway(transport.clone());
        let state = diagnosed_state();

        let result = run_task(&PrescribingTask, &state, &TurnInput::text("wheat"), &gateway, true)
            .await
            .unwrap();

        let response = result.response.unwrap();
        assert!(response.contains("propiconazole"));
        assert!(response.contains("1 ml per litre"));
        assert_eq!(result.next_action, NextAction::AwaitInput(Node::Prescribing));
        let stored: PrescriptionRecord = result.update.get(session_keys::PRESCRIPTION).unwrap();
        assert_eq!(stored.primary_product(), Some("Propiconazole 25% EC"));
        assert_eq!(transport.calls(ToolName::Prescribe)[0]["disease"], "Leaf Rust");
    }

    #[tokio::test]
    async fn later_turns_route_by_intent() {
        let transport = prescriber();
        let gateway = gateway(transport.clone());
        let state = diagnosed_state();

        let cases = [
            ("I want crop insurance", NextAction::Continue(Node::Insurance)),
            ("where can I buy this", NextAction::Continue(Node::VendorQuery)),
            ("no thanks", NextAction::Complete),
        ];
        for (text, expected) in cases {
            let result = run_task(&PrescribingTask, &state, &TurnInput::text(text), &gateway, false)
                .await
                .unwrap();
            assert_eq!(result.next_action, expected, "{text}");
        }
        assert!(transport.calls(ToolName::Prescribe).is_empty());
    }

    #[tokio::test]
    async fn stored_prescription_is_reused() {
        let transport = prescriber();
        let gateway = gateway(transport.clone());
        let mut state = diagnosed_state();
        state.context.set(
            session_keys::PRESCRIPTION,
            json!({"disease": "Leaf Rust", "treatment_text": "Use resistant varieties.", "products": []}),
        );

        let result = run_task(&PrescribingTask, &state, &TurnInput::text("treatment?"), &gateway, false)
            .await
            .unwrap();
        assert!(result.response.unwrap().contains("resistant varieties"));
        assert!(result.update.is_empty());
        assert!(transport.calls(ToolName::Prescribe).is_empty());
    }

    #[tokio::test]
    async fn missing_diagnosis_is_a_validation_error() {
        let gateway = gateway(prescriber());
        let state = ConversationState::new("s1");
        let err = run_task(&PrescribingTask, &state, &TurnInput::text("treat it"), &gateway, true)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "validation");
    }
}
