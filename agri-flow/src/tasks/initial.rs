use async_trait::async_trait;
use tracing::info;

use super::{types::session_keys, utils::known_crop};
use crate::{
    context::Context,
    error::Result,
    intent::{IntentLabel, extract},
    node::Node,
    task::{NextAction, Task, TaskInput, TaskResult},
};

pub const WELCOME_MESSAGE: &str = "Hello! I can help you diagnose plant diseases from a photo, recommend treatment, calculate crop insurance premiums and find vendors near you. Send a photo of the affected plant with the crop name, or tell me what you need.";

/// Entry point of every conversation: decides which branch of the workflow
/// the opening message belongs to.
pub struct InitialTask;

#[async_trait]
impl Task for InitialTask {
    fn node(&self) -> Node {
        Node::Initial
    }

    async fn run(&self, input: TaskInput<'_>) -> Result<TaskResult> {
        let text = input.turn.combined_text();
        let mut update = Context::new();
        if let Some(crop) = extract::extract_crop(&text) {
            update.set(session_keys::CROP, crop);
        }

        if let Some(image) = &input.turn.image {
            update.set(session_keys::PENDING_IMAGE, image);
            return Ok(match known_crop(&input) {
                Some(crop) => {
                    info!(session_id = %input.state.session_id(), crop = %crop, "Image received, classifying");
                    TaskResult::new(None, NextAction::Continue(Node::Classifying))
                        .with_update(update)
                        .with_status(format!("Analysing your {crop} photo"))
                }
                None => TaskResult::reply(
                    "Thanks for the photo. Which crop is this (for example wheat, rice or tomato)?",
                    NextAction::AwaitInput(Node::Followup),
                )
                .with_update(update),
            });
        }

        let result = match input.intent.intent {
            IntentLabel::Insurance => TaskResult::new(None, NextAction::Continue(Node::Insurance))
                .with_status("Looking into crop insurance"),
            IntentLabel::Vendor | IntentLabel::Order => {
                TaskResult::new(None, NextAction::Continue(Node::VendorQuery))
                    .with_status("Looking for vendors")
            }
            IntentLabel::Diagnose | IntentLabel::Treatment => TaskResult::reply(
                "Please upload a clear photo of the affected leaves or plant, and tell me the crop name.",
                NextAction::AwaitInput(Node::Followup),
            ),
            _ => TaskResult::reply(WELCOME_MESSAGE, NextAction::AwaitInput(Node::Followup)),
        };
        Ok(if update.is_empty() {
            result
        } else {
            result.with_update(update)
        })
    }
}
