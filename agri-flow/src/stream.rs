//! Response Streamer.
//!
//! A turn reports progress as [`TurnEvent`]s: status notes while handlers
//! run, the text fragments they produce, and finally the full response.
//! Only the task holding the session's turn lock owns the sender, so events
//! of one session never interleave.

use serde::Serialize;
use tokio::sync::mpsc;

use crate::{node::Node, runner::TurnResponse};

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum TurnEvent {
    Status { node: Node, message: String },
    Partial { text: String },
    Final(TurnResponse),
    /// The turn failed before a response could be committed
    Error { message: String },
}

/// Producer side, handed to the router for one turn.
#[derive(Debug, Clone, Default)]
pub struct TurnEvents {
    sender: Option<mpsc::UnboundedSender<TurnEvent>>,
}

impl TurnEvents {
    /// Events are dropped; used by the non-streaming entry point.
    pub fn disabled() -> Self {
        Self { sender: None }
    }

    pub fn channel() -> (Self, ResponseStream) {
        let (sender, receiver) = mpsc::unbounded_channel();
        (
            Self {
                sender: Some(sender),
            },
            ResponseStream { receiver },
        )
    }

    pub fn status(&self, node: Node, message: impl Into<String>) {
        self.send(TurnEvent::Status {
            node,
            message: message.into(),
        });
    }

    pub fn partial(&self, text: impl Into<String>) {
        self.send(TurnEvent::Partial { text: text.into() });
    }

    pub fn finish(&self, response: TurnResponse) {
        self.send(TurnEvent::Final(response));
    }

    pub fn error(&self, message: impl Into<String>) {
        self.send(TurnEvent::Error {
            message: message.into(),
        });
    }

    /// Resolves once the consumer has dropped its receiver. Never resolves
    /// for disabled event sinks.
    pub async fn closed(&self) {
        match &self.sender {
            Some(sender) => sender.closed().await,
            None => std::future::pending().await,
        }
    }

    fn send(&self, event: TurnEvent) {
        if let Some(sender) = &self.sender {
            // a closed receiver is noticed through `closed()`
            let _ = sender.send(event);
        }
    }
}

/// Consumer side: ordered events of a single turn.
#[derive(Debug)]
pub struct ResponseStream {
    receiver: mpsc::UnboundedReceiver<TurnEvent>,
}

impl ResponseStream {
    pub async fn next(&mut self) -> Option<TurnEvent> {
        self.receiver.recv().await
    }

    /// Drain the stream until the producer is done.
    pub async fn collect(mut self) -> Vec<TurnEvent> {
        let mut events = Vec::new();
        while let Some(event) = self.receiver.recv().await {
            events.push(event);
        }
        events
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn events_arrive_in_emission_order() {
        let (events, stream) = TurnEvents::channel();
        events.status(Node::Classifying, "Analysing the photo");
        events.partial("Leaf rust detected.");
        events.partial("Here is the treatment.");
        drop(events);

        let collected = stream.collect().await;
        assert_eq!(collected.len(), 3);
        assert!(matches!(
            &collected[0],
            TurnEvent::Status { node: Node::Classifying, .. }
        ));
        assert!(matches!(&collected[2], TurnEvent::Partial { text } if text == "Here is the treatment."));
    }

    #[tokio::test]
    async fn closed_resolves_when_the_receiver_is_dropped() {
        let (events, stream) = TurnEvents::channel();
        drop(stream);
        events.closed().await;
        events.partial("nobody listens");
    }
}
