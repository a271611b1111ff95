//! Workflow Router.
//!
//! The conversation graph is a fixed, cyclic set of declared edges between
//! [`Node`]s. [`Graph::advance`] runs the handler of the current node, merges
//! its context update and follows its [`NextAction`], refusing any move that
//! is not declared in the [`TransitionTable`].

use std::{
    collections::{BTreeSet, HashMap, VecDeque},
    sync::Arc,
};
use tracing::{debug, error, info, warn};

use crate::{
    config::RouterConfig,
    error::{FlowError, Result},
    gateway::ToolGateway,
    intent::IntentResult,
    node::Node,
    state::{ConversationState, TurnOutcome},
    stream::TurnEvents,
    task::{NextAction, Task, TaskInput, TaskResult, TurnInput},
};

pub const COMPLETED_MESSAGE: &str = "This conversation is complete. Please start a new session if you need anything else.";
pub const ERROR_MESSAGE: &str = "This conversation was closed after an internal error. Please start a new session.";

/// Declared edge between two nodes
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Edge {
    pub from: Node,
    pub to: Node,
    pub trigger: &'static str,
}

#[derive(Debug, Clone, Default)]
pub struct TransitionTable {
    edges: Vec<Edge>,
}

impl TransitionTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_edge(mut self, from: Node, to: Node, trigger: &'static str) -> Self {
        if !self.allows(from, to) {
            self.edges.push(Edge { from, to, trigger });
        }
        self
    }

    pub fn allows(&self, from: Node, to: Node) -> bool {
        self.edges.iter().any(|e| e.from == from && e.to == to)
    }

    pub fn targets(&self, from: Node) -> impl Iterator<Item = Node> + '_ {
        self.edges.iter().filter(move |e| e.from == from).map(|e| e.to)
    }

    pub fn edges(&self) -> &[Edge] {
        &self.edges
    }

    /// The advisory workflow: diagnosis, treatment, insurance and vendor
    /// lookup, with Followup as the recovery and re-routing hub.
    pub fn agricultural() -> Self {
        let table = Self::new()
            .add_edge(Node::Initial, Node::Classifying, "image and crop present")
            .add_edge(Node::Initial, Node::Followup, "required context missing")
            .add_edge(Node::Initial, Node::Insurance, "insurance request")
            .add_edge(Node::Initial, Node::VendorQuery, "vendor request")
            .add_edge(Node::Classifying, Node::Prescribing, "disease identified")
            .add_edge(Node::Classifying, Node::Followup, "classifier needs more input")
            .add_edge(Node::Prescribing, Node::Insurance, "insurance requested")
            .add_edge(Node::Prescribing, Node::VendorQuery, "product sourcing requested")
            .add_edge(Node::Prescribing, Node::Completed, "nothing else requested")
            .add_edge(Node::Prescribing, Node::Followup, "recovery")
            .add_edge(Node::Insurance, Node::VendorQuery, "vendor requested after insurance")
            .add_edge(Node::Insurance, Node::Completed, "insurance finished")
            .add_edge(Node::Insurance, Node::Followup, "recovery")
            .add_edge(Node::VendorQuery, Node::ShowVendors, "search confirmed")
            .add_edge(Node::VendorQuery, Node::Completed, "search declined")
            .add_edge(Node::VendorQuery, Node::Followup, "recovery")
            .add_edge(Node::ShowVendors, Node::OrderBooking, "vendor selected")
            .add_edge(Node::ShowVendors, Node::Completed, "no vendor selected")
            .add_edge(Node::ShowVendors, Node::Followup, "recovery")
            .add_edge(Node::OrderBooking, Node::Followup, "order placed")
            .add_edge(Node::OrderBooking, Node::Completed, "finished")
            .add_edge(Node::Followup, Node::Initial, "restart")
            .add_edge(Node::Followup, Node::Classifying, "new image")
            .add_edge(Node::Followup, Node::Prescribing, "treatment requested")
            .add_edge(Node::Followup, Node::Insurance, "insurance requested")
            .add_edge(Node::Followup, Node::VendorQuery, "vendor requested")
            .add_edge(Node::Followup, Node::Completed, "user is done");

        Node::ALL
            .into_iter()
            .filter(|n| !n.is_terminal())
            .fold(table, |table, node| {
                table.add_edge(node, Node::Error, "unrecoverable fault")
            })
    }

    /// Check the table is usable before any conversation starts.
    pub fn validate(&self) -> Result<()> {
        for edge in &self.edges {
            if edge.from.is_terminal() {
                return Err(FlowError::InvalidGraph(format!(
                    "terminal node {} has an outgoing edge to {}",
                    edge.from, edge.to
                )));
            }
        }

        for node in Node::ALL.into_iter().filter(|n| !n.is_terminal()) {
            if !self.allows(node, Node::Error) {
                return Err(FlowError::InvalidGraph(format!(
                    "node {node} has no edge to error"
                )));
            }
        }

        let mut reachable = BTreeSet::from([Node::Initial]);
        let mut queue = VecDeque::from([Node::Initial]);
        while let Some(node) = queue.pop_front() {
            for next in self.targets(node) {
                if reachable.insert(next) {
                    queue.push_back(next);
                }
            }
        }
        if let Some(unreachable) = Node::ALL.into_iter().find(|n| !reachable.contains(n)) {
            return Err(FlowError::InvalidGraph(format!(
                "node {unreachable} is not reachable from initial"
            )));
        }
        Ok(())
    }
}

/// Validated workflow: transition table plus one handler per active node.
pub struct Graph {
    pub id: String,
    table: TransitionTable,
    tasks: HashMap<Node, Arc<dyn Task>>,
    gateway: Arc<ToolGateway>,
    config: RouterConfig,
}

impl Graph {
    pub fn table(&self) -> &TransitionTable {
        &self.table
    }

    pub fn gateway(&self) -> &ToolGateway {
        &self.gateway
    }

    pub fn config(&self) -> &RouterConfig {
        &self.config
    }

    pub fn get_task(&self, node: Node) -> Option<Arc<dyn Task>> {
        self.tasks.get(&node).cloned()
    }

    /// Run one user turn against `state` and return the response text.
    ///
    /// Handlers run in sequence while they ask to continue, up to
    /// `max_hops_per_turn`. Handler errors are recovered into Followup;
    /// only an undeclared transition moves the session to Error.
    pub async fn advance(
        &self,
        state: &mut ConversationState,
        turn: &TurnInput,
        intent: &IntentResult,
        events: &TurnEvents,
    ) -> String {
        match state.current_node {
            Node::Completed => {
                state.outcome = TurnOutcome::Complete;
                return COMPLETED_MESSAGE.to_string();
            }
            Node::Error => return ERROR_MESSAGE.to_string(),
            _ => {}
        }

        let mut responses: Vec<String> = Vec::new();
        let mut entered = false;
        let mut hops = 0u32;

        loop {
            let node = state.current_node;
            let Some(task) = self.tasks.get(&node).cloned() else {
                // build() guarantees a handler for every active node
                self.fail(state, &mut responses, format!("no handler registered for {node}"));
                break;
            };

            debug!(session_id = %state.session_id, node = %node, entered, "Running node handler");
            let input = TaskInput {
                state: &*state,
                turn,
                intent,
                gateway: &self.gateway,
                config: &self.config,
                entered,
            };

            let result = match task.run(input).await {
                Ok(result) => result,
                Err(e) if e.is_fatal() => {
                    error!(session_id = %state.session_id, node = %node, error = %e, "Fatal handler error");
                    self.fail(state, &mut responses, e.to_string());
                    break;
                }
                Err(e) => {
                    warn!(
                        session_id = %state.session_id,
                        node = %node,
                        kind = e.kind(),
                        error = %e,
                        "Handler error, recovering to followup"
                    );
                    TaskResult::recovered(&e, Default::default())
                }
            };

            if let Some(status) = &result.status_message {
                events.status(node, status.clone());
            }
            state.context.merge(result.update);
            if let Some(text) = result.response {
                events.partial(text.clone());
                responses.push(text);
            }

            let target = match &result.next_action {
                NextAction::Continue(target) | NextAction::AwaitInput(target) => Some(*target),
                NextAction::Complete => Some(Node::Completed),
                NextAction::Fatal(_) => None,
            };
            if let Some(target) = target {
                if let Err(e) = self.transition(state, target) {
                    error!(session_id = %state.session_id, error = %e, "Rejected transition");
                    self.fail(state, &mut responses, e.to_string());
                    break;
                }
            }

            match result.next_action {
                NextAction::Continue(_) => {
                    hops += 1;
                    if hops >= self.config.max_hops_per_turn {
                        warn!(session_id = %state.session_id, hops, "Hop limit reached, waiting for input");
                        state.outcome = TurnOutcome::await_input();
                        break;
                    }
                    state.outcome = TurnOutcome::Continue;
                    entered = true;
                }
                NextAction::AwaitInput(_) => {
                    state.outcome = TurnOutcome::AwaitInput {
                        reason: result.await_reason,
                    };
                    break;
                }
                NextAction::Complete => {
                    state.outcome = TurnOutcome::Complete;
                    break;
                }
                NextAction::Fatal(reason) => {
                    self.fail(state, &mut responses, reason);
                    break;
                }
            }
        }

        if responses.is_empty() {
            "How else can I help you with your crop?".to_string()
        } else {
            responses.join("\n\n")
        }
    }

    /// Move along a declared edge. Staying on the same node is not a move.
    fn transition(&self, state: &mut ConversationState, target: Node) -> Result<()> {
        let from = state.current_node;
        if from == target {
            return Ok(());
        }
        if !self.table.allows(from, target) {
            return Err(FlowError::FatalState { from, to: target });
        }
        info!(session_id = %state.session_id, from = %from, to = %target, "Transition");
        state.previous_node = from;
        state.current_node = target;
        Ok(())
    }

    fn fail(&self, state: &mut ConversationState, responses: &mut Vec<String>, reason: String) {
        if !state.current_node.is_terminal() {
            state.previous_node = state.current_node;
            state.current_node = Node::Error;
        }
        state.outcome = TurnOutcome::Fatal { reason };
        responses.push(
            FlowError::FatalState {
                from: state.previous_node,
                to: Node::Error,
            }
            .user_message(),
        );
    }
}

/// Builder for creating graphs
pub struct GraphBuilder {
    id: String,
    table: TransitionTable,
    tasks: HashMap<Node, Arc<dyn Task>>,
    gateway: Option<Arc<ToolGateway>>,
    config: RouterConfig,
}

impl GraphBuilder {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            table: TransitionTable::agricultural(),
            tasks: HashMap::new(),
            gateway: None,
            config: RouterConfig::default(),
        }
    }

    pub fn with_table(mut self, table: TransitionTable) -> Self {
        self.table = table;
        self
    }

    pub fn add_task(mut self, task: Arc<dyn Task>) -> Self {
        self.tasks.insert(task.node(), task);
        self
    }

    pub fn with_gateway(mut self, gateway: Arc<ToolGateway>) -> Self {
        self.gateway = Some(gateway);
        self
    }

    pub fn with_config(mut self, config: RouterConfig) -> Self {
        self.config = config;
        self
    }

    pub fn build(self) -> Result<Graph> {
        self.table.validate()?;

        if let Some(missing) = Node::ALL
            .into_iter()
            .find(|n| !n.is_terminal() && !self.tasks.contains_key(n))
        {
            return Err(FlowError::InvalidGraph(format!(
                "no handler registered for {missing}"
            )));
        }
        if let Some(node) = self.tasks.keys().find(|n| n.is_terminal()) {
            return Err(FlowError::InvalidGraph(format!(
                "terminal node {node} cannot have a handler"
            )));
        }
        let gateway = self
            .gateway
            .ok_or_else(|| FlowError::InvalidGraph("no tool gateway configured".to_string()))?;

        info!(graph_id = %self.id, edges = self.table.edges().len(), "Workflow graph validated");
        Ok(Graph {
            id: self.id,
            table: self.table,
            tasks: self.tasks,
            gateway,
            config: self.config,
        })
    }
}
