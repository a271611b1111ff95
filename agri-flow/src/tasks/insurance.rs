//! Crop insurance: premium quotes, certificate issuance, insurer lookup and
//! scheme recommendations.
//!
//! Details (crop, area, state, applicant name) are collected across turns.
//! Whatever has been learned is written back on every result, including
//! failed ones, so an interrupted purchase resumes where it stopped.

use async_trait::async_trait;
use serde_json::{Value, json};
use tracing::{info, warn};

use super::{
    types::{InsuranceContext, session_keys},
    utils::{format_price, insurance_context, join_words, known_crop, update_with},
};
use crate::{
    context::Context,
    error::{FlowError, Result},
    gateway::ToolName,
    intent::{ActionSignals, ExtractedEntities, InsuranceAction, IntentLabel},
    node::Node,
    task::{NextAction, Task, TaskInput, TaskResult},
    tools::{InsuranceReply, parse_insurance_reply},
};

const MENU: &str = "I can calculate your insurance premium, issue an insurance certificate, list the insurance companies serving your state, or recommend a suitable scheme. What would you like to do?";

pub struct InsuranceTask;

#[async_trait]
impl Task for InsuranceTask {
    fn node(&self) -> Node {
        Node::Insurance
    }

    async fn run(&self, input: TaskInput<'_>) -> Result<TaskResult> {
        let text = input.turn.combined_text();
        let mut insurance = insurance_context(input.context());
        absorb_details(&input, &mut insurance, &text);

        if !input.entered {
            if let Some(result) = leave_for(&input) {
                return Ok(result.with_update(save(&insurance)));
            }
        }

        let Some(action) = resolve_action(&input, &insurance, &text) else {
            return Ok(
                TaskResult::reply(MENU, NextAction::AwaitInput(Node::Insurance))
                    .with_update(save(&insurance)),
            );
        };
        insurance.requested_action = Some(action);

        let missing = insurance.missing_for(action);
        if !missing.is_empty() {
            return Ok(ask_for_details(&input, insurance, action, &missing));
        }
        insurance.extraction_attempts = Some(0);
        insurance.awaiting_details = false;

        info!(
            session_id = %input.state.session_id(),
            action = %action,
            "Running insurance action"
        );

        let response = match action {
            InsuranceAction::GenerateCertificate => {
                match issue_certificate(&input, &mut insurance).await {
                    Ok(response) => response,
                    // keep the premium and purchase key for the next attempt
                    Err(e) => return Ok(TaskResult::recovered(&e, save(&insurance))),
                }
            }
            InsuranceAction::CalculatePremium => {
                match calculate_premium(&input, &mut insurance).await {
                    Ok(premium) => premium_message(&insurance, premium),
                    Err(e) => return Ok(TaskResult::recovered(&e, save(&insurance))),
                }
            }
            InsuranceAction::GetCompanies => {
                let reply = match call_insure(&input, action, &insurance).await {
                    Ok(reply) => reply,
                    Err(e) => return Ok(TaskResult::recovered(&e, save(&insurance))),
                };
                let companies = reply.companies();
                let response = if companies.is_empty() {
                    reply.text()
                } else {
                    format!(
                        "Insurance companies serving {}:\n{}",
                        insurance.region.as_deref().unwrap_or("your state"),
                        companies
                            .iter()
                            .map(|c| format!("- {c}"))
                            .collect::<Vec<_>>()
                            .join("\n")
                    )
                };
                insurance.companies = Some(companies);
                response
            }
            InsuranceAction::Recommend => {
                let reply = match call_insure(&input, action, &insurance).await {
                    Ok(reply) => reply,
                    Err(e) => return Ok(TaskResult::recovered(&e, save(&insurance))),
                };
                let recommendation = reply.text();
                insurance.recommendation = Some(recommendation.clone());
                format!("{recommendation}\n\nWould you like me to calculate the premium for your farm?")
            }
        };

        Ok(
            TaskResult::reply(response, NextAction::AwaitInput(Node::Insurance))
                .with_update(save(&insurance)),
        )
    }
}

fn save(insurance: &InsuranceContext) -> Context {
    update_with(session_keys::INSURANCE, insurance)
}

/// Fold anything mentioned in this turn into the stored details.
fn absorb_details(input: &TaskInput<'_>, insurance: &mut InsuranceContext, text: &str) {
    let found = ExtractedEntities::from_text(text);
    insurance.crop = found
        .crop
        .or(insurance.crop.take())
        .or_else(|| known_crop(input));
    if found.area_hectare.is_some() {
        insurance.area_hectare = found.area_hectare;
    }
    if found.region.is_some() {
        insurance.region = found.region;
    }
    if found.applicant_name.is_some() {
        insurance.applicant_name = found.applicant_name;
    }
}

/// Requests that take the conversation out of the insurance branch.
fn leave_for(input: &TaskInput<'_>) -> Option<TaskResult> {
    match input.intent.intent {
        IntentLabel::Vendor | IntentLabel::Order => Some(
            TaskResult::new(None, NextAction::Continue(Node::VendorQuery))
                .with_status("Looking for vendors"),
        ),
        IntentLabel::Decline => Some(TaskResult::reply(
            "No problem. Good luck with your harvest!",
            NextAction::Complete,
        )),
        IntentLabel::Restart => Some(TaskResult::new(None, NextAction::Continue(Node::Followup))),
        _ if input.turn.has_image() => {
            Some(TaskResult::new(None, NextAction::Continue(Node::Followup)))
        }
        _ => None,
    }
}

fn resolve_action(
    input: &TaskInput<'_>,
    insurance: &InsuranceContext,
    text: &str,
) -> Option<InsuranceAction> {
    if input.intent.is(IntentLabel::Insurance) {
        if let Some(action) = input.intent.insurance_action() {
            return Some(action);
        }
    }

    let signals = ActionSignals::from_text(text);
    if signals.any() || input.intent.is(IntentLabel::Insurance) {
        return Some(signals.action());
    }

    if input.intent.is(IntentLabel::Affirm)
        && insurance.premium.is_some()
        && insurance.current_certificate().is_none()
    {
        return Some(InsuranceAction::GenerateCertificate);
    }

    if insurance.awaiting_details {
        return insurance.requested_action;
    }
    None
}

fn ask_for_details(
    input: &TaskInput<'_>,
    mut insurance: InsuranceContext,
    action: InsuranceAction,
    missing: &[&str],
) -> TaskResult {
    let attempts = insurance.extraction_attempts.unwrap_or(0) + 1;
    let wanted = join_words(missing);

    if attempts >= input.config.max_extraction_attempts {
        warn!(
            session_id = %input.state.session_id(),
            action = %action,
            missing = %wanted,
            "Giving up on insurance details"
        );
        insurance.extraction_attempts = Some(0);
        insurance.awaiting_details = false;
        let err = FlowError::validation(
            format!("your {wanted}"),
            "Tell me when you have these details, for example: \"wheat, 5 hectares in Punjab, my name is Ravi Kumar\".",
        );
        return TaskResult::recovered(&err, save(&insurance));
    }

    insurance.extraction_attempts = Some(attempts);
    insurance.awaiting_details = true;
    let example = match action {
        InsuranceAction::GetCompanies => "for example \"Maharashtra\"",
        InsuranceAction::Recommend => "for example \"rice in Odisha\"",
        InsuranceAction::GenerateCertificate => {
            "for example \"wheat, 5 hectares in Punjab, my name is Ravi Kumar\""
        }
        InsuranceAction::CalculatePremium => "for example \"wheat, 5 hectares in Punjab\"",
    };
    TaskResult::reply(
        format!("To {} I need your {wanted} ({example}).", purpose(action)),
        NextAction::AwaitInput(Node::Insurance),
    )
    .with_update(save(&insurance))
}

fn purpose(action: InsuranceAction) -> &'static str {
    match action {
        InsuranceAction::CalculatePremium => "calculate the premium",
        InsuranceAction::GenerateCertificate => "issue the insurance certificate",
        InsuranceAction::GetCompanies => "list insurance companies",
        InsuranceAction::Recommend => "recommend a scheme",
    }
}

fn arguments_for(action: InsuranceAction, insurance: &InsuranceContext) -> Value {
    let arguments = match action {
        InsuranceAction::CalculatePremium => json!({
            "crop": insurance.crop,
            "area_hectare": insurance.area_hectare,
            "state": insurance.region,
        }),
        InsuranceAction::GenerateCertificate => json!({
            "crop": insurance.crop,
            "area_hectare": insurance.area_hectare,
            "state": insurance.region,
            "farmer_name": insurance.applicant_name,
            "premium": insurance.premium,
        }),
        InsuranceAction::GetCompanies => json!({ "state": insurance.region }),
        InsuranceAction::Recommend => json!({
            "crop": insurance.crop,
            "state": insurance.region,
        }),
    };
    json!({ "action": action.as_str(), "arguments": arguments })
}

async fn call_insure(
    input: &TaskInput<'_>,
    action: InsuranceAction,
    insurance: &InsuranceContext,
) -> Result<InsuranceReply> {
    let data = input
        .gateway
        .invoke(ToolName::Insure, arguments_for(action, insurance))
        .await
        .into_data(ToolName::Insure)?;
    parse_insurance_reply(data)
}

async fn calculate_premium(
    input: &TaskInput<'_>,
    insurance: &mut InsuranceContext,
) -> Result<Option<f64>> {
    let reply = call_insure(input, InsuranceAction::CalculatePremium, insurance).await?;
    let premium = reply.premium();
    if premium.is_some() {
        insurance.premium = premium;
        insurance.quoted_for = Some(insurance.terms());
    }
    Ok(premium)
}

fn premium_message(insurance: &InsuranceContext, premium: Option<f64>) -> String {
    let farm = format!(
        "{} ha of {} in {}",
        insurance.area_hectare.unwrap_or_default(),
        insurance.crop.as_deref().unwrap_or("your crop"),
        insurance.region.as_deref().unwrap_or("your state")
    );
    match premium {
        Some(premium) => format!(
            "The estimated premium for {farm} is **{}**. Would you like me to apply and issue the insurance certificate?",
            format_price(premium)
        ),
        None => format!(
            "I could not get a premium quote for {farm} right now. Would you like to try again?"
        ),
    }
}

async fn issue_certificate(
    input: &TaskInput<'_>,
    insurance: &mut InsuranceContext,
) -> Result<String> {
    if let Some(reference) = insurance.current_certificate() {
        return Ok(format!(
            "Your insurance certificate has already been issued. Reference: **{reference}**."
        ));
    }

    // a quote for other terms is stale, and so is its purchase
    if insurance.current_premium().is_none() {
        if calculate_premium(input, insurance).await?.is_none() {
            return Err(FlowError::tool_unavailable(
                ToolName::Insure.as_str(),
                "premium missing from quote",
            ));
        }
        insurance.purchase_key = None;
    }

    let key = insurance
        .purchase_key
        .get_or_insert_with(|| uuid::Uuid::new_v4().to_string())
        .clone();
    let data = input
        .gateway
        .invoke_side_effect(
            ToolName::Insure,
            arguments_for(InsuranceAction::GenerateCertificate, insurance),
            Some(&key),
        )
        .await
        .into_data(ToolName::Insure)?;
    let reply = parse_insurance_reply(data)?;

    let reference = reply.certificate_reference();
    if reference.is_some() {
        insurance.certificate_reference = reference.clone();
        insurance.certified_for = Some(insurance.terms());
    }
    insurance.certificate_document = reply.document_uri().map(str::to_string);
    info!(
        session_id = %input.state.session_id(),
        reference = reference.as_deref().unwrap_or("-"),
        "Insurance certificate issued"
    );

    let mut response = match &reference {
        Some(reference) => format!(
            "Your insurance certificate has been issued for {}. Reference: **{reference}**.",
            insurance.applicant_name.as_deref().unwrap_or("you")
        ),
        None => reply.text(),
    };
    if let Some(premium) = insurance.premium {
        response.push_str(&format!(" Premium payable: {}.", format_price(premium)));
    }
    if let Some(document) = &insurance.certificate_document {
        response.push_str(&format!("\nDownload: {document}"));
    }
    Ok(response)
}
