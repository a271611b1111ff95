mod common;

use agri_flow::{
    Context, InsuranceAction, IntentClassifier, IntentSource, Node, ToolError, ToolGateway,
    ToolName, Transcript, TransitionTable, TurnInput, config::GatewayConfig,
    gateway::IDEMPOTENCY_KEY_ARG,
};
use common::{ScriptedRefiner, ScriptedTransport};
use serde_json::json;
use std::{collections::BTreeSet, sync::Arc, time::Duration};

const INSURANCE_MESSAGES: &[&str] = &[
    "Help me apply for crop insurance with this premium",
    "How much is the insurance premium for my paddy?",
    "Which insurance companies operate in Bihar?",
    "What insurance coverage do you recommend for cotton?",
    "Tell me about crop insurance",
];

fn classifier(answer: Option<&str>) -> IntentClassifier {
    IntentClassifier::new(
        Some(Arc::new(ScriptedRefiner {
            answer: answer.map(str::to_string),
        })),
        Duration::from_millis(200),
    )
}

#[test]
fn every_active_node_can_reach_error_and_terminals_are_closed() {
    let table = TransitionTable::agricultural();
    table.validate().unwrap();

    for node in Node::ALL {
        let targets: BTreeSet<Node> = table.targets(node).collect();
        if node.is_terminal() {
            assert!(targets.is_empty(), "{node} must not transition");
        } else {
            assert!(targets.contains(&Node::Error), "{node} has no error edge");
        }
    }
    assert!(
        table.edges().iter().all(|e| Node::ALL.contains(&e.from) && Node::ALL.contains(&e.to)),
        "edges only reference declared nodes"
    );
}

#[tokio::test]
async fn refinement_failure_behaves_exactly_like_no_refiner() {
    let rules_only = IntentClassifier::rules_only();
    let failing = classifier(None);
    let garbage = classifier(Some("I think they want insurance"));
    let out_of_range = classifier(Some(
        r#"{"action": "calculate_premium", "confidence": 1.7, "reasoning": "x"}"#,
    ));

    for message in INSURANCE_MESSAGES {
        let turn = TurnInput::text(*message);
        let (context, history) = (Context::new(), Transcript::new());

        let expected = rules_only.classify(&turn, &context, &history).await;
        assert_eq!(expected.source, IntentSource::Fallback, "{message}");
        for degraded in [&failing, &garbage, &out_of_range] {
            let result = degraded.classify(&turn, &context, &history).await;
            assert_eq!(result, expected, "{message}");
        }
    }
}

#[tokio::test]
async fn fallback_follows_the_documented_tiers() {
    let rules_only = IntentClassifier::rules_only();
    let expected = [
        InsuranceAction::GenerateCertificate,
        InsuranceAction::CalculatePremium,
        InsuranceAction::GetCompanies,
        InsuranceAction::Recommend,
        InsuranceAction::CalculatePremium,
    ];
    for (message, action) in INSURANCE_MESSAGES.iter().zip(expected) {
        let result = rules_only
            .classify(&TurnInput::text(*message), &Context::new(), &Transcript::new())
            .await;
        assert_eq!(result.insurance_action, Some(action), "{message}");
    }
}

#[tokio::test]
async fn valid_refinement_overrides_the_keywords() {
    let refined = classifier(Some(
        r#"```json
{"action": "get_companies", "confidence": 0.88, "reasoning": "asks who sells the policy"}
```"#,
    ));
    let result = refined
        .classify(
            &TurnInput::text("How much is the insurance premium for my paddy?"),
            &Context::new(),
            &Transcript::new(),
        )
        .await;
    assert_eq!(result.source, IntentSource::Refined);
    assert_eq!(result.insurance_action, Some(InsuranceAction::GetCompanies));
    assert_eq!(result.confidence, 0.88);
}

fn retrying_gateway(transport: Arc<ScriptedTransport>) -> ToolGateway {
    ToolGateway::new(
        transport,
        GatewayConfig {
            max_attempts: 3,
            base_delay_ms: 1,
            ..GatewayConfig::default()
        },
    )
}

#[tokio::test]
async fn side_effects_without_a_key_are_attempted_once() {
    let transport = Arc::new(ScriptedTransport::new().fail(ToolName::Insure, ToolError::server("502")));
    let gateway = retrying_gateway(transport.clone());

    let result = gateway
        .invoke_side_effect(ToolName::Insure, json!({"action": "generate_certificate"}), None)
        .await;

    assert!(!result.is_success());
    assert_eq!(result.attempts(), 1);
    assert_eq!(transport.calls(ToolName::Insure).len(), 1);
}

#[tokio::test]
async fn keyed_side_effects_retry_with_the_same_key() {
    let transport = Arc::new(
        ScriptedTransport::new()
            .fail(ToolName::Insure, ToolError::server("502"))
            .fail(ToolName::Insure, ToolError::connection("reset"))
            .reply(ToolName::Insure, json!({"content": [], "is_error": false})),
    );
    let gateway = retrying_gateway(transport.clone());

    let result = gateway
        .invoke_side_effect(
            ToolName::Insure,
            json!({"action": "generate_certificate"}),
            Some("purchase-1"),
        )
        .await;

    assert!(result.is_success());
    assert_eq!(result.attempts(), 3);
    let calls = transport.calls(ToolName::Insure);
    assert_eq!(calls.len(), 3);
    assert!(calls.iter().all(|c| c[IDEMPOTENCY_KEY_ARG] == "purchase-1"));
}
