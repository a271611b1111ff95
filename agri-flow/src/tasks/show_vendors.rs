use async_trait::async_trait;
use tracing::info;

use super::{
    types::{Order, VendorQuery, session_keys},
    utils::{format_price, parse_selection, update_with},
};
use crate::{
    error::{FlowError, Result},
    intent::IntentLabel,
    node::Node,
    task::{NextAction, Task, TaskInput, TaskResult},
    tools::VendorOffer,
};

pub struct ShowVendorsTask;

#[async_trait]
impl Task for ShowVendorsTask {
    fn node(&self) -> Node {
        Node::ShowVendors
    }

    async fn run(&self, input: TaskInput<'_>) -> Result<TaskResult> {
        let options: Vec<VendorOffer> = input
            .context()
            .get(session_keys::VENDOR_OPTIONS)
            .filter(|options: &Vec<VendorOffer>| !options.is_empty())
            .ok_or_else(|| {
                FlowError::validation(
                    "a vendor search",
                    "Tell me which product you need and where, and I will look for vendors.",
                )
            })?;

        if input.entered {
            return Ok(TaskResult::reply(
                format!(
                    "Here is what I found:\n{}\n\nReply with the number or name of the vendor you want to order from.",
                    list(&options)
                ),
                NextAction::AwaitInput(Node::ShowVendors),
            ));
        }

        let text = input.turn.combined_text();
        if let Some(index) = parse_selection(&text, &options) {
            let offer = &options[index];
            let product = input
                .context()
                .get::<VendorQuery>(session_keys::VENDOR_QUERY)
                .and_then(|q| q.product)
                .unwrap_or_else(|| "the product".to_string());
            let order = Order::from_offer(offer, &product);
            info!(
                session_id = %input.state.session_id(),
                vendor = %order.vendor,
                reference = %order.reference,
                "Vendor selected"
            );
            return Ok(
                TaskResult::new(None, NextAction::Continue(Node::OrderBooking))
                    .with_update(update_with(session_keys::SELECTED_ORDER, &order)),
            );
        }

        Ok(match input.intent.intent {
            IntentLabel::Decline => TaskResult::reply(
                "Okay, no order placed. Thanks for using the assistant!",
                NextAction::Complete,
            ),
            IntentLabel::Restart | IntentLabel::Insurance => {
                TaskResult::new(None, NextAction::Continue(Node::Followup))
            }
            _ => TaskResult::reply(
                format!(
                    "Please pick one of these vendors by number:\n{}",
                    list(&options)
                ),
                NextAction::AwaitInput(Node::ShowVendors),
            ),
        })
    }
}

fn list(options: &[VendorOffer]) -> String {
    options
        .iter()
        .enumerate()
        .map(|(i, offer)| {
            let mut line = format!("{}. **{}**", i + 1, offer.vendor);
            if let Some(price) = offer.price {
                line.push_str(&format!(" - {}", format_price(price)));
            }
            if let Some(availability) = &offer.availability {
                line.push_str(&format!(" ({availability})"));
            }
            line
        })
        .collect::<Vec<_>>()
        .join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        state::ConversationState,
        task::TurnInput,
        tasks::{
            OrderStatus,
            test_support::{StubTransport, gateway, run_task},
        },
    };
    use serde_json::json;
    use std::sync::Arc;

    fn listed_state() -> ConversationState {
        let mut state = ConversationState::new("s1");
        state.current_node = Node::ShowVendors;
        state.context.set(
            session_keys::VENDOR_OPTIONS,
            json!([
                {"vendor": "Kisan Agro", "price": 420.0, "availability": "in stock"},
                {"vendor": "Green Fields", "price": 399.0}
            ]),
        );
        state.context.set(session_keys::VENDOR_QUERY, json!({"product": "urea", "location": "Punjab"}));
        state
    }

    #[tokio::test]
    async fn options_are_listed_on_arrival() {
        let gateway = gateway(Arc::new(StubTransport::default()));
        let result = run_task(&ShowVendorsTask, &listed_state(), &TurnInput::text("yes"), &gateway, true)
            .await
            .unwrap();
        let response = result.response.unwrap();
        assert!(response.contains("1. **Kisan Agro** - Rs 420.00 (in stock)"));
        assert!(response.contains("2. **Green Fields** - Rs 399.00"));
        assert_eq!(result.next_action, NextAction::AwaitInput(Node::ShowVendors));
    }

    #[tokio::test]
    async fn selection_creates_an_order() {
        let gateway = gateway(Arc::new(StubTransport::default()));
        let result = run_task(&ShowVendorsTask, &listed_state(), &TurnInput::text("2"), &gateway, false)
            .await
            .unwrap();
        assert_eq!(result.next_action, NextAction::Continue(Node::OrderBooking));
        let order: Order = result.update.get(session_keys::SELECTED_ORDER).unwrap();
        assert_eq!(order.vendor, "Green Fields");
        assert_eq!(order.product, "urea");
        assert_eq!(order.status, OrderStatus::AwaitingConfirmation);
    }

    #[tokio::test]
    async fn unclear_reply_lists_again() {
        let gateway = gateway(Arc::new(StubTransport::default()));
        let result = run_task(&ShowVendorsTask, &listed_state(), &TurnInput::text("hmm"), &gateway, false)
            .await
            .unwrap();
        assert_eq!(result.next_action, NextAction::AwaitInput(Node::ShowVendors));
    }
}
