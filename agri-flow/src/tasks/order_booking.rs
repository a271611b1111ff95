use async_trait::async_trait;
use tracing::info;

use super::{
    types::{Order, OrderStatus, session_keys},
    utils::format_price,
};
use crate::{
    context::Context,
    error::{FlowError, Result},
    intent::IntentLabel,
    node::Node,
    task::{NextAction, Task, TaskInput, TaskResult},
};

/// Confirms the selected vendor offer and records the order.
pub struct OrderBookingTask;

#[async_trait]
impl Task for OrderBookingTask {
    fn node(&self) -> Node {
        Node::OrderBooking
    }

    async fn run(&self, input: TaskInput<'_>) -> Result<TaskResult> {
        let mut order: Order = input
            .context()
            .get(session_keys::SELECTED_ORDER)
            .ok_or_else(|| {
                FlowError::validation("a vendor choice", "Pick a vendor from the list first.")
            })?;

        if input.entered || order.status != OrderStatus::AwaitingConfirmation {
            return Ok(TaskResult::reply(summary(&order), NextAction::AwaitInput(Node::OrderBooking)));
        }

        match input.intent.intent {
            IntentLabel::Affirm | IntentLabel::Order => {
                order.status = OrderStatus::Placed;
                info!(
                    session_id = %input.state.session_id(),
                    reference = %order.reference,
                    vendor = %order.vendor,
                    "Order placed"
                );

                let mut orders: Vec<Order> = input.context().get(session_keys::ORDERS).unwrap_or_default();
                orders.push(order.clone());
                let mut update = Context::new();
                update.set(session_keys::SELECTED_ORDER, &order);
                update.set(session_keys::ORDERS, &orders);

                Ok(TaskResult::reply(
                    format!(
                        "Your order for {} from {} is placed. Order reference: **{}**. Is there anything else I can help you with?",
                        order.product, order.vendor, order.reference
                    ),
                    NextAction::AwaitInput(Node::Followup),
                )
                .with_update(update))
            }
            IntentLabel::Decline => {
                order.status = OrderStatus::Cancelled;
                let mut update = Context::new();
                update.set(session_keys::SELECTED_ORDER, &order);
                Ok(TaskResult::reply("Okay, the order has been cancelled.", NextAction::Complete)
                    .with_update(update))
            }
            _ => Ok(TaskResult::reply(summary(&order), NextAction::AwaitInput(Node::OrderBooking))),
        }
    }
}

fn summary(order: &Order) -> String {
    let price = order
        .price
        .map(|p| format!(" for {}", format_price(p)))
        .unwrap_or_default();
    format!(
        "You selected **{}** from **{}**{price}. Shall I place the order? (yes / no)",
        order.product, order.vendor
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        state::ConversationState,
        task::TurnInput,
        tasks::test_support::{StubTransport, gateway, run_task},
    };
    use serde_json::json;
    use std::sync::Arc;

    fn booking_state() -> ConversationState {
        let mut state = ConversationState::new("s1");
        state.current_node = Node::OrderBooking;
        state.context.set(
            session_keys::SELECTED_ORDER,
            json!({
                "reference": "ORD-0000ABCD",
                "vendor": "Kisan Agro",
                "product": "urea",
                "price": 420.0,
                "status": "awaiting_confirmation"
            }),
        );
        state
    }

    #[tokio::test]
    async fn confirmation_places_the_order() {
        let gateway = gateway(Arc::new(StubTransport::default()));
        let result = run_task(&OrderBookingTask, &booking_state(), &TurnInput::text("yes, confirm"), &gateway, false)
            .await
            .unwrap();

        assert_eq!(result.next_action, NextAction::AwaitInput(Node::Followup));
        assert!(result.response.unwrap().contains("ORD-0000ABCD"));
        let orders: Vec<Order> = result.update.get(session_keys::ORDERS).unwrap();
        assert_eq!(orders.len(), 1);
        assert_eq!(orders[0].status, OrderStatus::Placed);
    }

    #[tokio::test]
    async fn decline_cancels_and_completes() {
        let gateway = gateway(Arc::new(StubTransport::default()));
        let result = run_task(&OrderBookingTask, &booking_state(), &TurnInput::text("no"), &gateway, false)
            .await
            .unwrap();

        assert_eq!(result.next_action, NextAction::Complete);
        let order: Order = result.update.get(session_keys::SELECTED_ORDER).unwrap();
        assert_eq!(order.status, OrderStatus::Cancelled);
    }

    #[tokio::test]
    async fn arrival_asks_for_confirmation() {
        let gateway = gateway(Arc::new(StubTransport::default()));
        let result = run_task(&OrderBookingTask, &booking_state(), &TurnInput::text("2"), &gateway, true)
            .await
            .unwrap();
        assert!(result.response.unwrap().contains("Rs 420.00"));
        assert_eq!(result.next_action, NextAction::AwaitInput(Node::OrderBooking));
    }
}
