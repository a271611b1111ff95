use async_trait::async_trait;
use serde_json::json;
use tracing::info;

use super::{
    types::{PrescriptionRecord, VendorQuery, session_keys},
    utils::{insurance_context, update_with},
};
use crate::{
    context::Context,
    error::Result,
    gateway::ToolName,
    intent::{IntentLabel, extract},
    node::Node,
    task::{NextAction, Task, TaskInput, TaskResult},
    tools::parse_vendor_offers,
};

/// Works out what to search for and where, confirms, then searches.
pub struct VendorQueryTask;

#[async_trait]
impl Task for VendorQueryTask {
    fn node(&self) -> Node {
        Node::VendorQuery
    }

    async fn run(&self, input: TaskInput<'_>) -> Result<TaskResult> {
        let text = input.turn.combined_text();
        let stored: VendorQuery = input
            .context()
            .get(session_keys::VENDOR_QUERY)
            .unwrap_or_default();

        if !input.entered {
            match input.intent.intent {
                IntentLabel::Decline => {
                    return Ok(TaskResult::reply(
                        "Okay, I won't search for vendors.",
                        NextAction::Complete,
                    ));
                }
                IntentLabel::Insurance | IntentLabel::Restart => {
                    return Ok(TaskResult::new(None, NextAction::Continue(Node::Followup)));
                }
                _ => {}
            }
        }

        let query = resolve_query(&input, &stored, &text);

        if stored.confirmation_pending && input.intent.is(IntentLabel::Affirm) {
            if let (Some(product), Some(location)) = (query.product.clone(), query.location.clone()) {
                return search(&input, query, product, location).await;
            }
        }

        let mut query = query;
        let response = match (&query.product, &query.location) {
            (None, None) => {
                "Which product are you looking for, and near which town or state?".to_string()
            }
            (None, Some(location)) => format!("Which product should I look for near {location}?"),
            (Some(product), None) => {
                format!("Where should I look for {product}? Tell me your town or state.")
            }
            (Some(product), Some(location)) => {
                format!("Shall I search for vendors selling **{product}** near **{location}**?")
            }
        };
        query.confirmation_pending = query.is_ready();

        Ok(
            TaskResult::reply(response, NextAction::AwaitInput(Node::VendorQuery))
                .with_update(update_with(session_keys::VENDOR_QUERY, &query)),
        )
    }
}

fn resolve_query(input: &TaskInput<'_>, stored: &VendorQuery, text: &str) -> VendorQuery {
    let product = extract::extract_product(text)
        .or_else(|| stored.product.clone())
        .or_else(|| {
            input
                .context()
                .get::<PrescriptionRecord>(session_keys::PRESCRIPTION)
                .and_then(|p| p.primary_product().map(str::to_string))
        });
    let location = extract::extract_location(text)
        .or_else(|| stored.location.clone())
        .or_else(|| insurance_context(input.context()).region);
    VendorQuery {
        product,
        location,
        confirmation_pending: stored.confirmation_pending,
    }
}

async fn search(
    input: &TaskInput<'_>,
    mut query: VendorQuery,
    product: String,
    location: String,
) -> Result<TaskResult> {
    let data = input
        .gateway
        .invoke(
            ToolName::FindVendor,
            json!({ "product": product, "location": location }),
        )
        .await
        .into_data(ToolName::FindVendor)?;
    let offers = parse_vendor_offers(data)?;
    info!(
        session_id = %input.state.session_id(),
        product = %product,
        location = %location,
        offers = offers.len(),
        "Vendor search finished"
    );

    query.confirmation_pending = false;
    let mut update = Context::new();
    update.set(session_keys::VENDOR_QUERY, &query);

    if offers.is_empty() {
        return Ok(TaskResult::reply(
            format!("I could not find vendors selling {product} near {location}. Would you like to try another product or location?"),
            NextAction::AwaitInput(Node::VendorQuery),
        )
        .with_update(update));
    }

    update.set(session_keys::VENDOR_OPTIONS, &offers);
    Ok(TaskResult::new(None, NextAction::Continue(Node::ShowVendors))
        .with_update(update)
        .with_status(format!("Found {} vendors", offers.len())))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        state::ConversationState,
        task::TurnInput,
        tasks::test_support::{StubTransport, gateway, run_task},
        tools::VendorOffer,
    };
    use std::sync::Arc;

    fn vendor_state(query: serde_json::Value) -> ConversationState {
        let mut state = ConversationState::new("s1");
        state.current_node = Node::VendorQuery;
        state.context.set(session_keys::VENDOR_QUERY, query);
        state
    }

    #[tokio::test]
    async fn product_and_location_come_from_earlier_steps() {
        let gateway = gateway(Arc::new(StubTransport::default()));
        let mut state = ConversationState::new("s1");
        state.context.set(
            session_keys::PRESCRIPTION,
            json!({"disease": "Leaf Rust", "treatment_text": "spray", "products": ["Propiconazole"]}),
        );
        state.context.set(session_keys::INSURANCE, json!({"region": "Punjab"}));

        let result = run_task(&VendorQueryTask, &state, &TurnInput::text("find a vendor"), &gateway, true)
            .await
            .unwrap();

        assert!(result.response.unwrap().contains("Propiconazole"));
        let query: VendorQuery = result.update.get(session_keys::VENDOR_QUERY).unwrap();
        assert_eq!(query.location.as_deref(), Some("Punjab"));
        assert!(query.confirmation_pending);
    }

    #[tokio::test]
    async fn missing_location_is_asked_for() {
        let gateway = gateway(Arc::new(StubTransport::default()));
        let state = ConversationState::new("s1");

        let result = run_task(&VendorQueryTask, &state, &TurnInput::text("I want to buy urea"), &gateway, true)
            .await
            .unwrap();

        assert_eq!(result.next_action, NextAction::AwaitInput(Node::VendorQuery));
        let query: VendorQuery = result.update.get(session_keys::VENDOR_QUERY).unwrap();
        assert_eq!(query.product.as_deref(), Some("urea"));
        assert!(!query.confirmation_pending);
    }

    #[tokio::test]
    async fn confirmation_runs_the_search() {
        let transport = Arc::new(StubTransport::default().reply(
            ToolName::FindVendor,
            json!([{"vendor": "Kisan Agro", "price": 420.0, "availability": "in stock"}]),
        ));
        let gateway = gateway(transport.clone());
        let state = vendor_state(json!({"product": "urea", "location": "Punjab", "confirmation_pending": true}));

        let result = run_task(&VendorQueryTask, &state, &TurnInput::text("yes please"), &gateway, false)
            .await
            .unwrap();

        assert_eq!(result.next_action, NextAction::Continue(Node::ShowVendors));
        let offers: Vec<VendorOffer> = result.update.get(session_keys::VENDOR_OPTIONS).unwrap();
        assert_eq!(offers[0].vendor, "Kisan Agro");
        assert_eq!(transport.calls(ToolName::FindVendor)[0]["location"], "Punjab");
    }

    #[tokio::test]
    async fn empty_search_asks_again() {
        let transport = Arc::new(StubTransport::default().reply(ToolName::FindVendor, json!({"vendors": []})));
        let gateway = gateway(transport);
        let state = vendor_state(json!({"product": "urea", "location": "Punjab", "confirmation_pending": true}));

        let result = run_task(&VendorQueryTask, &state, &TurnInput::text("yes"), &gateway, false)
            .await
            .unwrap();
        assert_eq!(result.next_action, NextAction::AwaitInput(Node::VendorQuery));
        assert!(!result.update.contains(session_keys::VENDOR_OPTIONS));
    }

    #[tokio::test]
    async fn decline_completes() {
        let gateway = gateway(Arc::new(StubTransport::default()));
        let state = vendor_state(json!({"product": "urea", "location": "Punjab", "confirmation_pending": true}));
        let result = run_task(&VendorQueryTask, &state, &TurnInput::text("no thanks"), &gateway, false)
            .await
            .unwrap();
        assert_eq!(result.next_action, NextAction::Complete);
    }
}
