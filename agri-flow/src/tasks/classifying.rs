use async_trait::async_trait;
use serde_json::json;
use tracing::{info, warn};

use super::{
    types::{ClassificationRecord, session_keys},
    utils::{image_to_classify, known_crop, percent, update_with},
};
use crate::{
    context::Context,
    error::{FlowError, Result},
    gateway::ToolName,
    node::Node,
    task::{NextAction, Task, TaskInput, TaskResult},
    tools::{Diagnosis, ImageInput, parse_diagnosis},
};

/// Sends the plant photo to the disease classifier.
pub struct ClassifyingTask;

#[async_trait]
impl Task for ClassifyingTask {
    fn node(&self) -> Node {
        Node::Classifying
    }

    async fn run(&self, input: TaskInput<'_>) -> Result<TaskResult> {
        let image = image_to_classify(&input).ok_or_else(|| {
            FlowError::validation(
                "a photo of the affected plant",
                "Please upload a clear picture of the leaves.",
            )
        })?;
        let crop = known_crop(&input);
        let mut attempted = update_with(session_keys::ATTEMPTED_IMAGE, image.digest());
        attempted.set(session_keys::PENDING_IMAGE, &image);

        let diagnosis = match diagnose(&input, &image, crop.as_deref()).await {
            Ok(diagnosis) => diagnosis,
            Err(e) => {
                warn!(
                    session_id = %input.state.session_id(),
                    error = %e,
                    "Classification failed, photo kept for a retry"
                );
                return Ok(TaskResult::recovered(&e, attempted));
            }
        };

        info!(
            session_id = %input.state.session_id(),
            disease = %diagnosis.disease,
            confidence = diagnosis.confidence,
            "Image classified"
        );

        if diagnosis.confidence < input.config.min_disease_confidence {
            return Ok(TaskResult::reply(
                format!(
                    "I could not identify the problem with enough confidence ({} sure it might be {}). Could you send a closer, well-lit photo of the affected leaves?",
                    percent(diagnosis.confidence),
                    diagnosis.disease
                ),
                NextAction::AwaitInput(Node::Followup),
            )
            .with_update(attempted));
        }

        let mut response = format!(
            "Your {} appears to have **{}** (confidence {}).",
            crop.as_deref().unwrap_or("plant"),
            diagnosis.disease,
            percent(diagnosis.confidence)
        );
        if diagnosis.attention_artifact.is_some() {
            response.push_str(" I have highlighted the affected areas in the attached map.");
        }

        let record = ClassificationRecord::new(diagnosis, crop.clone(), &image);
        let mut update = Context::new();
        update.set(session_keys::CLASSIFICATION, &record);
        update.set(session_keys::PENDING_IMAGE, &image);
        if let Some(crop) = crop {
            update.set(session_keys::CROP, crop);
        }

        Ok(
            TaskResult::reply(response, NextAction::Continue(Node::Prescribing))
                .with_update(update)
                .with_status("Preparing treatment advice"),
        )
    }
}

async fn diagnose(
    input: &TaskInput<'_>,
    image: &ImageInput,
    crop: Option<&str>,
) -> Result<Diagnosis> {
    let data = input
        .gateway
        .invoke(
            ToolName::Classify,
            json!({
                "image": image.data,
                "mime_type": image.mime_type,
                "crop": crop,
            }),
        )
        .await
        .into_data(ToolName::Classify)?;
    parse_diagnosis(data)
}
