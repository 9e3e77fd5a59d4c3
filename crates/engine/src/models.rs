//! Core domain models for the pipeline engine.
//!
//! These types are the source of truth for what a materialized pipeline
//! looks like in memory. A [`Dag`] is constructed once per run (by the
//! builder) and is read-only thereafter.

use std::time::Duration;

use indexmap::IndexMap;
use serde::Serialize;
use serde_json::{Map, Value};

use crate::error::EngineError;

// ---------------------------------------------------------------------------
// RetryPolicy
// ---------------------------------------------------------------------------

/// How a full channel is retried on send.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Maximum number of retries after the initial attempt.
    pub max_retries: u32,
    /// Delay before the first retry.
    pub retry_delay: Duration,
    /// Factor by which the delay grows after each failed retry.
    pub backoff_factor: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            retry_delay: Duration::from_secs(1),
            backoff_factor: 2.0,
        }
    }
}

// ---------------------------------------------------------------------------
// EdgeSpec
// ---------------------------------------------------------------------------

/// Directed edge from one node to another, with its dataflow settings.
#[derive(Debug, Clone)]
pub struct EdgeSpec {
    pub from: String,
    pub to: String,
    /// Bounded channel capacity for this edge.
    pub buffer_size: usize,
    /// Codec consulted when payload and target types disagree.
    pub codec: String,
    pub retry: RetryPolicy,
}

impl EdgeSpec {
    /// An edge with default dataflow settings (buffer 1, `json` codec).
    pub fn new(from: impl Into<String>, to: impl Into<String>) -> Self {
        Self {
            from: from.into(),
            to: to.into(),
            buffer_size: 1,
            codec: "json".to_string(),
            retry: RetryPolicy::default(),
        }
    }

    /// The channel-manager key for this edge.
    pub fn id(&self) -> String {
        format!("{}->{}", self.from, self.to)
    }
}

// ---------------------------------------------------------------------------
// NodeSpec
// ---------------------------------------------------------------------------

/// A single computation step in the pipeline graph.
#[derive(Debug, Clone)]
pub struct NodeSpec {
    /// Unique identifier within the DAG (referenced by edges).
    pub id: String,
    /// Human name (the step name from the scenario).
    pub name: String,
    /// Classification tag mapping to a registered handler.
    pub node_type: String,
    /// The raw step descriptor this node came from, for operators.
    pub description: String,
    /// Arbitrary configuration, including contract/herd overlays.
    pub config: Map<String, Value>,
    /// IDs of upstream nodes.
    pub dependencies: Vec<String>,
    /// IDs of downstream nodes.
    pub dependents: Vec<String>,
}

impl NodeSpec {
    pub fn new(id: impl Into<String>, name: impl Into<String>, node_type: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            node_type: node_type.into(),
            description: String::new(),
            config: Map::new(),
            dependencies: Vec::new(),
            dependents: Vec::new(),
        }
    }

    pub fn with_config(mut self, key: impl Into<String>, value: Value) -> Self {
        self.config.insert(key.into(), value);
        self
    }
}

// ---------------------------------------------------------------------------
// Dag
// ---------------------------------------------------------------------------

/// The materialized pipeline graph.
///
/// Node order is insertion order, which makes the topological sort's
/// tie-break between independent subtrees deterministic.
#[derive(Debug, Clone, Default)]
pub struct Dag {
    pub nodes: IndexMap<String, NodeSpec>,
    pub edges: Vec<EdgeSpec>,
    /// Computed by [`Dag::finalize`]; empty until then.
    pub topo_order: Vec<String>,
    /// Whether nodes of this run are confined by the isolation runtime.
    pub isolate: bool,
    /// Tag applied to confined children (cgroup names, hostnames).
    pub isolation_id: String,
}

impl Dag {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a node.
    ///
    /// # Errors
    /// Returns [`EngineError::DuplicateNode`] if the ID is already taken.
    pub fn add_node(&mut self, node: NodeSpec) -> Result<(), EngineError> {
        if self.nodes.contains_key(&node.id) {
            return Err(EngineError::DuplicateNode(node.id));
        }
        self.nodes.insert(node.id.clone(), node);
        Ok(())
    }

    /// Add an edge with default dataflow settings, maintaining both
    /// adjacency lists.
    pub fn add_edge(&mut self, from: &str, to: &str) {
        self.add_edge_spec(EdgeSpec::new(from, to));
    }

    /// Add a fully configured edge, maintaining both adjacency lists.
    pub fn add_edge_spec(&mut self, edge: EdgeSpec) {
        if let Some(node) = self.nodes.get_mut(&edge.from) {
            node.dependents.push(edge.to.clone());
        }
        if let Some(node) = self.nodes.get_mut(&edge.to) {
            node.dependencies.push(edge.from.clone());
        }
        self.edges.push(edge);
    }

    pub fn get_node(&self, id: &str) -> Option<&NodeSpec> {
        self.nodes.get(id)
    }

    /// Nodes with no dependencies, in insertion order.
    pub fn sources(&self) -> Vec<&NodeSpec> {
        self.nodes
            .values()
            .filter(|n| n.dependencies.is_empty())
            .collect()
    }

    /// Find a node ID by its human name (first match in insertion order).
    pub fn node_id_by_name(&self, name: &str) -> Option<&str> {
        self.nodes
            .values()
            .find(|n| n.name == name)
            .map(|n| n.id.as_str())
    }

    pub fn edge(&self, from: &str, to: &str) -> Option<&EdgeSpec> {
        self.edges.iter().find(|e| e.from == from && e.to == to)
    }

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    pub fn edge_count(&self) -> usize {
        self.edges.len()
    }

    /// Validate and freeze: checks invariants and stores the topological
    /// order. Must be called before execution.
    ///
    /// # Errors
    /// Propagates validation failures (see [`Dag::validate`]).
    pub fn finalize(&mut self) -> Result<(), EngineError> {
        self.validate()?;
        self.topo_order = self.topological_sort()?;
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// NodeState / DataPassStrategy
// ---------------------------------------------------------------------------

/// Lifecycle state of a node within a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeState {
    Pending,
    Running,
    Succeeded,
    Failed,
    Retrying,
    Skipped,
}

impl std::fmt::Display for NodeState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            NodeState::Pending => "pending",
            NodeState::Running => "running",
            NodeState::Succeeded => "succeeded",
            NodeState::Failed => "failed",
            NodeState::Retrying => "retrying",
            NodeState::Skipped => "skipped",
        };
        f.write_str(s)
    }
}

/// Where forwarded packets are mirrored, beyond the in-memory channels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DataPassStrategy {
    /// In-memory only.
    #[default]
    Json,
    /// Sink-bound payloads are appended to `<run_id>.out.json`.
    File,
    /// Every forwarded payload is printed to stdout.
    Stdout,
}

impl std::str::FromStr for DataPassStrategy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "json" => Ok(Self::Json),
            "file" => Ok(Self::File),
            "stdout" => Ok(Self::Stdout),
            other => Err(format!("unknown data-pass strategy '{other}'")),
        }
    }
}
