use async_trait::async_trait;

use super::{
    types::{Order, OrderStatus, session_keys},
    utils::{classification, image_to_classify, insurance_context, known_crop},
};
use crate::{
    context::Context,
    error::Result,
    intent::{
        ActionSignals, IntentLabel, extract,
        extract::{contains_term, normalize},
    },
    node::Node,
    task::{NextAction, Task, TaskInput, TaskResult},
};

const RETRY_PHRASES: &[&str] = &["try again", "retry", "try it again", "check again"];

const MENU: &str = "What would you like to do next? I can diagnose another plant from a photo, suggest treatment, help with crop insurance, or find vendors for the products you need.";

/// Hub for re-routing between branches and for recovering from errors.
pub struct FollowupTask;

#[async_trait]
impl Task for FollowupTask {
    fn node(&self) -> Node {
        Node::Followup
    }

    async fn run(&self, input: TaskInput<'_>) -> Result<TaskResult> {
        let mut update = Context::new();
        if let Some(crop) = extract::extract_crop(&input.turn.combined_text()) {
            update.set(session_keys::CROP, crop);
        }

        let result = match input.intent.intent {
            IntentLabel::Restart => TaskResult::reply(
                "Sure, let's start over.",
                NextAction::Continue(Node::Initial),
            ),
            _ if input.turn.has_image() => classify_or_ask(&input, &mut update),
            IntentLabel::Treatment if classification(input.context()).is_some() => {
                TaskResult::new(None, NextAction::Continue(Node::Prescribing))
            }
            IntentLabel::Insurance => TaskResult::new(None, NextAction::Continue(Node::Insurance))
                .with_status("Looking into crop insurance"),
            _ if resumes_insurance(&input) => {
                TaskResult::new(None, NextAction::Continue(Node::Insurance))
                    .with_status("Resuming your insurance request")
            }
            IntentLabel::Vendor | IntentLabel::Order => {
                TaskResult::new(None, NextAction::Continue(Node::VendorQuery))
                    .with_status("Looking for vendors")
            }
            IntentLabel::Decline => TaskResult::reply(
                "Thank you for using the assistant. Wishing you a healthy harvest!",
                NextAction::Complete,
            ),
            _ if retries_pending_image(&input) => classify_or_ask(&input, &mut update),
            IntentLabel::Diagnose | IntentLabel::Treatment => TaskResult::reply(
                "Please upload a clear photo of the affected plant and tell me the crop name.",
                NextAction::AwaitInput(Node::Followup),
            ),
            _ => TaskResult::reply(targeted_question(&input), NextAction::AwaitInput(Node::Followup)),
        };
        Ok(if update.is_empty() {
            result
        } else {
            result.with_update(update)
        })
    }
}

/// New or still-unclassified photo: classify once the crop is known.
fn classify_or_ask(input: &TaskInput<'_>, update: &mut Context) -> TaskResult {
    if let Some(image) = &input.turn.image {
        update.set(session_keys::PENDING_IMAGE, image);
    }
    match known_crop(input) {
        Some(crop) => TaskResult::new(None, NextAction::Continue(Node::Classifying))
            .with_status(format!("Analysing your {crop} photo")),
        None => TaskResult::reply(
            "Which crop is in the photo (for example wheat, rice or tomato)?",
            NextAction::AwaitInput(Node::Followup),
        ),
    }
}

/// A stored photo still needs a diagnosis. One the classifier already failed
/// on is only retried when the user asks for it.
fn retries_pending_image(input: &TaskInput<'_>) -> bool {
    let Some(image) = image_to_classify(input) else {
        return false;
    };
    let attempted = input
        .context()
        .get::<String>(session_keys::ATTEMPTED_IMAGE)
        .is_some_and(|digest| digest == image.digest());
    if !attempted {
        return true;
    }
    let normalized = normalize(&input.turn.combined_text());
    input.intent.is(IntentLabel::Diagnose)
        || RETRY_PHRASES.iter().any(|p| contains_term(&normalized, p))
}

/// An insurance request was interrupted and this message carries on with it.
fn resumes_insurance(input: &TaskInput<'_>) -> bool {
    let insurance = insurance_context(input.context());
    let in_progress =
        insurance.requested_action.is_some() && insurance.current_certificate().is_none();
    in_progress
        && (input.intent.is(IntentLabel::Affirm)
            || ActionSignals::from_text(&input.turn.combined_text()).any())
}

/// Question aimed at whatever the conversation was last doing.
fn targeted_question(input: &TaskInput<'_>) -> String {
    let context = input.context();
    let insurance = insurance_context(context);
    let last_order: Option<Order> = context.get(session_keys::SELECTED_ORDER);

    if insurance.premium.is_some() && insurance.current_certificate().is_none() {
        return "Would you like to continue with your insurance application? Just say \"apply\" and share your name.".to_string();
    }
    if last_order.is_some_and(|o| o.status == OrderStatus::Placed) {
        return format!("Your order is on its way. {MENU}");
    }
    if let Some(record) = classification(context) {
        return format!(
            "Would you like the treatment for {}, crop insurance, or vendors near you?",
            record.disease
        );
    }
    MENU.to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        state::ConversationState,
        task::TurnInput,
        tasks::test_support::{StubTransport, gateway, run_task},
        tools::ImageInput,
    };
    use serde_json::json;
    use std::sync::Arc;

    fn followup_state() -> ConversationState {
        let mut state = ConversationState::new("s1");
        state.current_node = Node::Followup;
        state
    }

    #[tokio::test]
    async fn fresh_intent_reroutes() {
        let gateway = gateway(Arc::new(StubTransport::default()));
        let state = followup_state();
        let cases = [
            ("start over", NextAction::Continue(Node::Initial)),
            ("I need crop insurance", NextAction::Continue(Node::Insurance)),
            ("where can I buy urea", NextAction::Continue(Node::VendorQuery)),
            ("no thanks, bye", NextAction::Complete),
            ("hello", NextAction::AwaitInput(Node::Followup)),
        ];
        for (text, expected) in cases {
            let result = run_task(&FollowupTask, &state, &TurnInput::text(text), &gateway, false)
                .await
                .unwrap();
            assert_eq!(result.next_action, expected, "{text}");
        }
    }

    #[tokio::test]
    async fn pending_image_is_classified_once_the_crop_is_known() {
        let gateway = gateway(Arc::new(StubTransport::default()));
        let mut state = followup_state();
        state.context.set(
            session_keys::PENDING_IMAGE,
            ImageInput::from_bytes("image/png", b"leaf"),
        );

        let result = run_task(&FollowupTask, &state, &TurnInput::text("it is tomato"), &gateway, false)
            .await
            .unwrap();
        assert_eq!(result.next_action, NextAction::Continue(Node::Classifying));
        assert_eq!(result.update.get::<String>(session_keys::CROP).as_deref(), Some("tomato"));
    }

    #[tokio::test]
    async fn failed_photo_is_only_retried_on_request() {
        let gateway = gateway(Arc::new(StubTransport::default()));
        let mut state = followup_state();
        let image = ImageInput::from_bytes("image/png", b"blurry leaf");
        state.context.set(session_keys::CROP, "rice");
        state.context.set(session_keys::ATTEMPTED_IMAGE, image.digest());
        state.context.set(session_keys::PENDING_IMAGE, image);

        for text in ["hello", "thanks for the help"] {
            let result = run_task(&FollowupTask, &state, &TurnInput::text(text), &gateway, false)
                .await
                .unwrap();
            assert_eq!(result.next_action, NextAction::AwaitInput(Node::Followup), "{text}");
        }
        for text in ["please try again", "can you diagnose it now"] {
            let result = run_task(&FollowupTask, &state, &TurnInput::text(text), &gateway, false)
                .await
                .unwrap();
            assert_eq!(result.next_action, NextAction::Continue(Node::Classifying), "{text}");
        }
    }

    #[tokio::test]
    async fn treatment_needs_a_diagnosis() {
        let gateway = gateway(Arc::new(StubTransport::default()));
        let mut state = followup_state();
        let turn = TurnInput::text("what treatment should I use");

        let before = run_task(&FollowupTask, &state, &turn, &gateway, false).await.unwrap();
        assert_eq!(before.next_action, NextAction::AwaitInput(Node::Followup));

        state.context.set(
            session_keys::CLASSIFICATION,
            json!({"disease": "Early Blight", "confidence": 0.8, "crop": "tomato", "image_digest": "x"}),
        );
        let after = run_task(&FollowupTask, &state, &turn, &gateway, false).await.unwrap();
        assert_eq!(after.next_action, NextAction::Continue(Node::Prescribing));
    }

    #[tokio::test]
    async fn interrupted_purchase_resumes_in_insurance() {
        let gateway = gateway(Arc::new(StubTransport::default()));
        let mut state = followup_state();
        state.context.set(
            session_keys::INSURANCE,
            json!({"premium": 1250.5, "requested_action": "generate_certificate"}),
        );

        let result = run_task(&FollowupTask, &state, &TurnInput::text("apply again"), &gateway, false)
            .await
            .unwrap();
        assert_eq!(result.next_action, NextAction::Continue(Node::Insurance));
    }
}
