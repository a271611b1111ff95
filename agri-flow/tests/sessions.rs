mod common;

use agri_flow::{
    FlowError, ImageInput, Node, ToolName, TurnEvent, TurnRequest,
};
use common::{ScriptedTransport, runner_with};
use std::{sync::Arc, time::Duration};

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_turns_of_one_session_are_serialized() {
    let runner = runner_with(Arc::new(ScriptedTransport::healthy()));
    let turns = 12;

    let handles: Vec<_> = (0..turns)
        .map(|i| {
            let runner = runner.clone();
            tokio::spawn(async move {
                runner
                    .turn(TurnRequest::new("shared", format!("hello number {i}")))
                    .await
                    .unwrap()
            })
        })
        .collect();
    for handle in handles {
        handle.await.unwrap();
    }

    let state = runner.session("shared").await.unwrap();
    assert_eq!(state.turn_count(), turns as u64);
    assert_eq!(state.transcript().len(), 2 * turns);

    // strictly alternating user / assistant messages
    for pair in state.transcript().messages().chunks(2) {
        assert_eq!(pair[0].role, agri_flow::MessageRole::User);
        assert_eq!(pair[1].role, agri_flow::MessageRole::Assistant);
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn different_sessions_do_not_share_state() {
    let runner = runner_with(Arc::new(ScriptedTransport::healthy()));

    let a = runner.clone();
    let b = runner.clone();
    let (first, second) = tokio::join!(
        a.turn(TurnRequest::new("alice", "I need crop insurance for cotton in Gujarat")),
        b.turn(TurnRequest::new("bob", "hello")),
    );

    assert_eq!(first.unwrap().current_node, Node::Insurance);
    assert_eq!(second.unwrap().current_node, Node::Followup);
    let bob = runner.session("bob").await.unwrap();
    assert!(bob.context().get_value("insurance").is_none());
}

#[tokio::test]
async fn streamed_turn_ends_with_the_final_response() {
    let runner = runner_with(Arc::new(ScriptedTransport::healthy()));

    let stream = runner
        .turn_stream(
            TurnRequest::new("streamer", "wheat")
                .with_image(ImageInput::from_bytes("image/png", b"leaf")),
        )
        .await;
    let events = stream.collect().await;

    assert!(matches!(events.first(), Some(TurnEvent::Status { .. })));
    let Some(TurnEvent::Final(response)) = events.last() else {
        panic!("last event must be the final response, got {events:?}");
    };
    assert_eq!(response.current_node, Node::Prescribing);

    let partials: Vec<&str> = events
        .iter()
        .filter_map(|e| match e {
            TurnEvent::Partial { text } => Some(text.as_str()),
            _ => None,
        })
        .collect();
    assert_eq!(partials.join("\n\n"), response.response_text);
}

#[tokio::test]
async fn dropping_the_stream_cancels_the_turn_without_saving() {
    let transport = Arc::new(ScriptedTransport::healthy().with_delay(Duration::from_millis(300)));
    let runner = runner_with(transport.clone());

    let mut stream = runner
        .turn_stream(
            TurnRequest::new("cancelled", "wheat")
                .with_image(ImageInput::from_bytes("image/png", b"leaf")),
        )
        .await;
    // the first status arrives before the classifier answers
    assert!(matches!(stream.next().await, Some(TurnEvent::Status { .. })));
    drop(stream);

    tokio::time::sleep(Duration::from_millis(500)).await;
    assert!(matches!(
        runner.session("cancelled").await,
        Err(FlowError::SessionNotFound(_))
    ));

    // the lock was released: a later turn on the same session goes through
    let reply = runner.turn(TurnRequest::new("cancelled", "hello")).await.unwrap();
    assert_eq!(reply.current_node, Node::Followup);
    assert_eq!(transport.calls(ToolName::Classify).len(), 1);
}

#[tokio::test]
async fn reset_and_delete() {
    let runner = runner_with(Arc::new(ScriptedTransport::healthy()));
    runner
        .turn(TurnRequest::new("farmer", "premium for wheat 5 hectares in Punjab"))
        .await
        .unwrap();

    let fresh = runner.reset("farmer").await.unwrap();
    assert_eq!(fresh.current_node(), Node::Initial);
    assert!(fresh.context().is_empty());
    assert_eq!(runner.session("farmer").await.unwrap().turn_count(), 0);

    runner.delete("farmer").await.unwrap();
    assert!(matches!(
        runner.session("farmer").await,
        Err(FlowError::SessionNotFound(_))
    ));
}
