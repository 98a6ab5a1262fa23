//! The dataflow graph engine (§4.1): a [`BasicFlow`] is a directed graph of
//! nodes connected by action-labeled edges. Each step runs the current
//! node's full lifecycle, looks up the edge registered for the action it
//! returned, and moves to that edge's target — until a terminal action is
//! hit, no edge matches, or `max_steps` is exceeded.
//!
//! A single flow's walk is inherently sequential (each step depends on the
//! previous one's routing decision); running many flow *instances*
//! concurrently — the batch and parallel-subflow concurrency models in §4.1 —
//! is [`crate::batch`]'s job, not this module's.

use async_trait::async_trait;
use serde_json::Value;
use std::collections::{HashMap, HashSet};
use std::marker::PhantomData;
use thiserror::Error;

use crate::action::Action;
use crate::node::{ExecutionContext, Node, NodeBackend, NodeError};
use crate::storage::StorageBackend;
use crate::store::Store;

#[derive(Debug, Error)]
pub enum FlowError {
    #[error("flow has no node registered for id '{0}'")]
    NodeNotFound(String),
    #[error("no edge registered for action '{action}' from node '{node}'")]
    NoEdgeForAction { node: String, action: String },
    #[error("flow exceeded its max_steps budget ({0})")]
    MaxStepsExceeded(usize),
    #[error("nested flow exceeded its max nesting depth ({0})")]
    MaxNestingDepthExceeded(usize),
    #[error(transparent)]
    Node(#[from] NodeError),
}

/// A guard evaluated against the blackboard before an edge may be taken.
/// Lets two edges share an action name (e.g. `"default"`) and fork on
/// blackboard state, as the quality-gate regenerate loop does on a score key.
#[derive(Debug, Clone)]
pub enum RouteCondition {
    Always,
    KeyExists(String),
    KeyEquals(String, Value),
}

impl RouteCondition {
    fn matches<S: StorageBackend>(&self, store: &Store<S>) -> bool {
        match self {
            RouteCondition::Always => true,
            RouteCondition::KeyExists(key) => store.contains_key(key).unwrap_or(false),
            RouteCondition::KeyEquals(key, expected) => {
                matches!(store.get_raw(key), Ok(Some(actual)) if &actual == expected)
            }
        }
    }
}

struct Edge {
    action: String,
    condition: RouteCondition,
    target: String,
}

/// Type-erased node handle. [`NodeBackend`] carries associated `Prep`/`Exec`
/// types that differ per implementation, so a flow graph — which holds
/// heterogeneous node types in one collection — stores `Box<dyn NodeRunner<S>>`
/// rather than `Box<dyn NodeBackend<S>>` directly.
#[async_trait]
pub trait NodeRunner<S: StorageBackend>: Send + Sync {
    fn id(&self) -> &str;
    async fn run_node(&self, store: &mut Store<S>) -> Result<Action, NodeError>;
}

struct NamedNode<B> {
    id: String,
    node: Node<B>,
}

#[async_trait]
impl<S, B> NodeRunner<S> for NamedNode<B>
where
    S: StorageBackend,
    B: NodeBackend<S>,
{
    fn id(&self) -> &str {
        &self.id
    }

    async fn run_node(&self, store: &mut Store<S>) -> Result<Action, NodeError> {
        self.node.run(store).await
    }
}

#[derive(Debug, Clone)]
pub struct FlowConfig {
    pub start_node: String,
    pub max_steps: usize,
    pub terminal_actions: HashSet<String>,
}

impl FlowConfig {
    pub fn new(start_node: impl Into<String>, max_steps: usize) -> Self {
        Self {
            start_node: start_node.into(),
            max_steps,
            terminal_actions: HashSet::new(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct FlowExecutionResult {
    pub final_action: Action,
    pub steps_taken: usize,
    pub path: Vec<String>,
}

/// A directed graph of nodes wired together by action-labeled edges.
pub struct BasicFlow<S: StorageBackend> {
    name: String,
    nodes: HashMap<String, Box<dyn NodeRunner<S>>>,
    edges: HashMap<String, Vec<Edge>>,
    config: FlowConfig,
}

impl<S: StorageBackend> BasicFlow<S> {
    pub fn run_once<'a>(
        &'a self,
        store: &'a mut Store<S>,
    ) -> std::pin::Pin<Box<dyn std::future::Future<Output = Result<FlowExecutionResult, FlowError>> + Send + 'a>>
    {
        Box::pin(async move {
            let mut current = self.config.start_node.clone();
            let mut path = Vec::new();
            let mut steps = 0usize;
            let mut last_action = Action::default_action();

            loop {
                if steps >= self.config.max_steps {
                    return Err(FlowError::MaxStepsExceeded(self.config.max_steps));
                }

                let node = self
                    .nodes
                    .get(&current)
                    .ok_or_else(|| FlowError::NodeNotFound(current.clone()))?;

                if path.iter().filter(|id| *id == &current).count() >= 2 {
                    tracing::debug!(
                        flow = self.name,
                        node = current,
                        "revisiting node (path-vector scan): intentional loop assumed, max_steps is the hard bound"
                    );
                }

                path.push(current.clone());
                let action = node.run_node(store).await?;
                steps += 1;
                last_action = action.clone();

                if self.config.terminal_actions.contains(action.name()) {
                    return Ok(FlowExecutionResult {
                        final_action: last_action,
                        steps_taken: steps,
                        path,
                    });
                }

                let edges = self.edges.get(&current);
                let next = edges.and_then(|edges| {
                    edges
                        .iter()
                        .find(|edge| edge.action == action.name() && edge.condition.matches(store))
                });

                match next {
                    Some(edge) => current = edge.target.clone(),
                    None => {
                        return Err(FlowError::NoEdgeForAction {
                            node: current,
                            action: action.name().to_string(),
                        })
                    }
                }
            }
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}

/// Builds a [`BasicFlow`] node-by-node and edge-by-edge.
pub struct FlowBuilder<S: StorageBackend> {
    name: String,
    nodes: HashMap<String, Box<dyn NodeRunner<S>>>,
    edges: HashMap<String, Vec<Edge>>,
    start_node: Option<String>,
    max_steps: usize,
    terminal_actions: HashSet<String>,
    _marker: PhantomData<S>,
}

impl<S: StorageBackend> FlowBuilder<S> {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            nodes: HashMap::new(),
            edges: HashMap::new(),
            start_node: None,
            max_steps: 1000,
            terminal_actions: HashSet::new(),
            _marker: PhantomData,
        }
    }

    pub fn node<B>(mut self, id: impl Into<String>, backend: B) -> Self
    where
        B: NodeBackend<S> + 'static,
    {
        let id = id.into();
        self.nodes.insert(
            id.clone(),
            Box::new(NamedNode {
                id,
                node: Node::new(backend),
            }),
        );
        self
    }

    pub fn edge(mut self, from: impl Into<String>, action: impl Into<String>, to: impl Into<String>) -> Self {
        self.edges.entry(from.into()).or_default().push(Edge {
            action: action.into(),
            condition: RouteCondition::Always,
            target: to.into(),
        });
        self
    }

    pub fn conditional_edge(
        mut self,
        from: impl Into<String>,
        action: impl Into<String>,
        condition: RouteCondition,
        to: impl Into<String>,
    ) -> Self {
        self.edges.entry(from.into()).or_default().push(Edge {
            action: action.into(),
            condition,
            target: to.into(),
        });
        self
    }

    pub fn start(mut self, id: impl Into<String>) -> Self {
        self.start_node = Some(id.into());
        self
    }

    pub fn max_steps(mut self, steps: usize) -> Self {
        self.max_steps = steps;
        self
    }

    pub fn terminal_action(mut self, action: impl Into<String>) -> Self {
        self.terminal_actions.insert(action.into());
        self
    }

    pub fn build(self) -> BasicFlow<S> {
        let start_node = self.start_node.expect("FlowBuilder::start must be called before build");
        let mut config = FlowConfig::new(start_node, self.max_steps);
        config.terminal_actions = self.terminal_actions;
        BasicFlow {
            name: self.name,
            nodes: self.nodes,
            edges: self.edges,
            config,
        }
    }
}

const NESTING_DEPTH_KEY: &str = "__flow_nesting_depth";
const MAX_NESTING_DEPTH: usize = 10;

/// Wraps a [`BasicFlow`] as a [`NodeBackend`] so it can be embedded as a
/// single node inside a parent flow (the repo-analysis and content-generation
/// subflows embedded in the top-level pipeline, §5).
pub struct FlowNode<S: StorageBackend> {
    name: String,
    inner: BasicFlow<S>,
}

impl<S: StorageBackend> FlowNode<S> {
    pub fn new(name: impl Into<String>, inner: BasicFlow<S>) -> Self {
        Self {
            name: name.into(),
            inner,
        }
    }
}

/// A nested flow reads and writes the parent's blackboard throughout its
/// walk, not just at its boundary, so the whole run happens in `post` (the
/// only phase holding `&mut Store<S>`) rather than split across
/// `prep`/`exec`. The nesting-depth guard lives in blackboard state under
/// [`NESTING_DEPTH_KEY`] rather than `ExecutionContext::metadata`, since that
/// metadata resets every node invocation and the depth must survive across
/// the whole nested walk.
#[async_trait]
impl<S: StorageBackend> NodeBackend<S> for FlowNode<S> {
    type Prep = usize;
    type Exec = ();

    fn name(&self) -> &str {
        &self.name
    }

    async fn prep(&self, store: &Store<S>) -> Result<usize, NodeError> {
        let depth: usize = store
            .get_or(NESTING_DEPTH_KEY, 0)
            .map_err(|e| NodeError::Store(e.to_string()))?;
        if depth >= MAX_NESTING_DEPTH {
            return Err(NodeError::Prep(
                FlowError::MaxNestingDepthExceeded(MAX_NESTING_DEPTH).to_string(),
            ));
        }
        Ok(depth)
    }

    async fn exec(&self, _prep: &usize, _ctx: &ExecutionContext) -> Result<(), NodeError> {
        Ok(())
    }

    async fn post(&self, store: &mut Store<S>, depth: usize, _exec: ()) -> Result<Action, NodeError> {
        store
            .set_raw(NESTING_DEPTH_KEY, Value::from(depth + 1))
            .map_err(|e| NodeError::Store(e.to_string()))?;
        let result = self.inner.run_once(store).await.map_err(|e| NodeError::Exec {
            attempts: 1,
            message: e.to_string(),
        })?;
        store
            .set_raw(NESTING_DEPTH_KEY, Value::from(depth))
            .map_err(|e| NodeError::Store(e.to_string()))?;
        Ok(result.final_action)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::InMemoryStorage;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingNode {
        name: &'static str,
        next_action: &'static str,
        counter: std::sync::Arc<AtomicUsize>,
    }

    #[async_trait]
    impl NodeBackend<InMemoryStorage> for CountingNode {
        type Prep = ();
        type Exec = ();

        fn name(&self) -> &str {
            self.name
        }

        async fn prep(&self, _store: &Store<InMemoryStorage>) -> Result<(), NodeError> {
            Ok(())
        }

        async fn exec(&self, _prep: &(), _ctx: &ExecutionContext) -> Result<(), NodeError> {
            self.counter.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }

        async fn post(
            &self,
            _store: &mut Store<InMemoryStorage>,
            _prep: (),
            _exec: (),
        ) -> Result<Action, NodeError> {
            Ok(Action::simple(self.next_action))
        }
    }

    #[tokio::test]
    async fn walks_a_linear_flow_to_completion() {
        let counter = std::sync::Arc::new(AtomicUsize::new(0));
        let flow: BasicFlow<InMemoryStorage> = FlowBuilder::new("linear")
            .node(
                "a",
                CountingNode {
                    name: "a",
                    next_action: "default",
                    counter: counter.clone(),
                },
            )
            .node(
                "b",
                CountingNode {
                    name: "b",
                    next_action: "done",
                    counter: counter.clone(),
                },
            )
            .edge("a", "default", "b")
            .start("a")
            .terminal_action("done")
            .build();

        let mut store = Store::default();
        let result = flow.run_once(&mut store).await.unwrap();
        assert_eq!(result.steps_taken, 2);
        assert_eq!(result.path, vec!["a".to_string(), "b".to_string()]);
        assert_eq!(counter.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn missing_edge_errors() {
        let counter = std::sync::Arc::new(AtomicUsize::new(0));
        let flow: BasicFlow<InMemoryStorage> = FlowBuilder::new("dead_end")
            .node(
                "a",
                CountingNode {
                    name: "a",
                    next_action: "unrouted",
                    counter,
                },
            )
            .start("a")
            .build();

        let mut store = Store::default();
        let result = flow.run_once(&mut store).await;
        assert!(matches!(result, Err(FlowError::NoEdgeForAction { .. })));
    }

    #[tokio::test]
    async fn max_steps_bounds_an_intentional_loop() {
        let counter = std::sync::Arc::new(AtomicUsize::new(0));
        let flow: BasicFlow<InMemoryStorage> = FlowBuilder::new("looping")
            .node(
                "a",
                CountingNode {
                    name: "a",
                    next_action: "default",
                    counter,
                },
            )
            .edge("a", "default", "a")
            .start("a")
            .max_steps(5)
            .build();

        let mut store = Store::default();
        let result = flow.run_once(&mut store).await;
        assert!(matches!(result, Err(FlowError::MaxStepsExceeded(5))));
    }

    #[tokio::test]
    async fn conditional_edge_forks_on_blackboard_state() {
        let counter = std::sync::Arc::new(AtomicUsize::new(0));
        let flow: BasicFlow<InMemoryStorage> = FlowBuilder::new("quality_gate")
            .node(
                "check",
                CountingNode {
                    name: "check",
                    next_action: "default",
                    counter: counter.clone(),
                },
            )
            .node(
                "accept",
                CountingNode {
                    name: "accept",
                    next_action: "done",
                    counter: counter.clone(),
                },
            )
            .conditional_edge(
                "check",
                "default",
                RouteCondition::KeyEquals("pass".into(), serde_json::json!(true)),
                "accept",
            )
            .start("check")
            .terminal_action("done")
            .build();

        let mut store = Store::default();
        store.set_raw("pass", serde_json::json!(true)).unwrap();
        let result = flow.run_once(&mut store).await.unwrap();
        assert_eq!(result.path, vec!["check".to_string(), "accept".to_string()]);
    }
}
