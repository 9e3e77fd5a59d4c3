//! Engine-level error types.

use std::collections::BTreeMap;

use thiserror::Error;

/// Errors produced by the pipeline engine (validation + execution).
#[derive(Debug, Error)]
pub enum EngineError {
    // ------ Configuration / validation errors ------

    /// Two or more nodes share the same ID.
    #[error("duplicate node ID: '{0}'")]
    DuplicateNode(String),

    /// An edge references a node ID that doesn't exist in the DAG.
    #[error("edge references unknown node '{node_id}' ({side} side)")]
    UnknownNode {
        node_id: String,
        side: &'static str,
    },

    /// The graph contains a directed cycle through the named node.
    #[error("cycle detected in DAG at node '{0}'")]
    CycleDetected(String),

    /// A step names a dependency that matches no earlier step.
    #[error("dependency '{dependency}' not found for step '{step}'")]
    DependencyNotFound { step: String, dependency: String },

    /// No handler is registered for a node's classification tag.
    #[error("unknown node type '{0}'")]
    UnknownNodeType(String),

    // ------ Channel errors ------

    /// No channel exists for the requested edge.
    #[error("no channel exists for edge {from}->{to}")]
    UnknownEdge { from: String, to: String },

    /// A send kept finding the channel full through every retry slot.
    #[error("failed to send on edge {edge} after {attempts} retries")]
    SendExhausted { edge: String, attempts: u32 },

    /// The channel closed with no remaining packets.
    #[error("channel for edge {edge} is closed")]
    ChannelClosed { edge: String },

    /// No packet arrived within the receive deadline.
    #[error("timeout waiting for data on edge {edge}")]
    ReceiveTimeout { edge: String },

    /// A codec round-trip failed to convert a payload.
    #[error("codec '{codec}' conversion failed: {source}")]
    Codec {
        codec: String,
        #[source]
        source: serde_json::Error,
    },

    // ------ Execution errors ------

    /// A node handler returned an error.
    #[error("node '{node_id}' failed: {source}")]
    Handler {
        node_id: String,
        #[source]
        source: nodes::NodeError,
    },

    /// A node task panicked; the payload is carried as text.
    #[error("panic in node '{node_id}': {message}")]
    Panic { node_id: String, message: String },

    /// The run's context was cancelled (deadline, explicit, or fatal
    /// error elsewhere). Never recorded as a node error.
    #[error("execution cancelled")]
    Cancelled,

    /// The run finished with recorded node errors under fail-stop.
    #[error("pipeline run failed with {} node error(s)", .errors.len())]
    RunFailed { errors: BTreeMap<String, String> },
}

impl EngineError {
    /// Whether this error is the cancellation signal.
    pub fn is_cancelled(&self) -> bool {
        matches!(self, EngineError::Cancelled)
    }
}
