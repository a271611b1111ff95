use std::sync::Arc;
use tracing::{debug, info};

use crate::{
    config::{FlowConfig, RouterConfig},
    error::Result,
    gateway::{ToolGateway, ToolTransport},
    graph::{Graph, GraphBuilder},
    intent::{IntentClassifier, IntentRefiner},
    loop_guard::LoopGuard,
    runner::FlowRunner,
    storage::{SessionStorage, SessionStore},
    tasks::{
        ClassifyingTask, FollowupTask, InitialTask, InsuranceTask, OrderBookingTask,
        PrescribingTask, ShowVendorsTask, VendorQueryTask,
    },
};

pub const WORKFLOW_ID: &str = "agri_advisory";

/// The advisory graph with every node handler registered.
pub fn build_agri_workflow(gateway: Arc<ToolGateway>, config: &RouterConfig) -> Result<Graph> {
    GraphBuilder::new(WORKFLOW_ID)
        .with_gateway(gateway)
        .with_config(config.clone())
        .add_task(Arc::new(InitialTask))
        .add_task(Arc::new(ClassifyingTask))
        .add_task(Arc::new(PrescribingTask))
        .add_task(Arc::new(InsuranceTask))
        .add_task(Arc::new(VendorQueryTask))
        .add_task(Arc::new(ShowVendorsTask))
        .add_task(Arc::new(OrderBookingTask))
        .add_task(Arc::new(FollowupTask))
        .build()
}

/// Wire a ready-to-use runner from configuration and the pluggable parts.
///
/// `refiner` is only used when `intent.refinement_enabled` is set.
pub fn create_flow_runner(
    config: &FlowConfig,
    transport: Arc<dyn ToolTransport>,
    storage: Arc<dyn SessionStorage>,
    refiner: Option<Arc<dyn IntentRefiner>>,
) -> Result<FlowRunner> {
    config.validate()?;

    let gateway = Arc::new(ToolGateway::new(transport, config.gateway.clone()));
    let graph = Arc::new(build_agri_workflow(gateway, &config.router)?);

    let refiner = if config.intent.refinement_enabled {
        refiner
    } else {
        if refiner.is_some() {
            debug!("Intent refinement disabled by configuration, ignoring refiner");
        }
        None
    };
    let classifier = Arc::new(IntentClassifier::new(
        refiner,
        config.intent.refinement_timeout(),
    ));

    info!(
        workflow = WORKFLOW_ID,
        refinement = classifier.has_refiner(),
        max_attempts = config.gateway.max_attempts,
        loop_threshold = config.loop_guard.threshold,
        "Flow runner ready"
    );

    Ok(FlowRunner::new(
        graph,
        SessionStore::new(storage),
        classifier,
        LoopGuard::new(config.loop_guard.threshold),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        node::Node,
        storage::InMemorySessionStorage,
        tasks::test_support::{StubTransport, gateway},
    };

    #[test]
    fn every_active_node_has_a_handler() {
        let graph = build_agri_workflow(
            Arc::new(gateway(Arc::new(StubTransport::default()))),
            &RouterConfig::default(),
        )
        .unwrap();

        for node in Node::ALL {
            assert_eq!(graph.get_task(node).is_some(), !node.is_terminal(), "{node}");
        }
    }

    #[test]
    fn invalid_configuration_is_rejected() {
        let mut config = FlowConfig::default();
        config.gateway.max_attempts = 0;
        let result = create_flow_runner(
            &config,
            Arc::new(StubTransport::default()),
            Arc::new(InMemorySessionStorage::new()),
            None,
        );
        assert!(result.is_err());
    }
}
