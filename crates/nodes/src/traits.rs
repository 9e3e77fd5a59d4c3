//! The `NodeHandler` trait — the contract every node must fulfil.

use async_trait::async_trait;
use serde_json::{Map, Value};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::error::NodeError;
use crate::packet::DataPacket;

/// Shared context passed to every node during execution.
///
/// Defined here (in the nodes crate) so both the engine and individual node
/// implementations can import it without a circular dependency.
#[derive(Debug, Clone)]
pub struct NodeContext {
    /// ID of the node within the DAG (e.g. `step_2`).
    pub node_id: String,
    /// Human name of the node (the step name from the scenario).
    pub node_name: String,
    /// Classification tag that selected this handler.
    pub node_type: String,
    /// Node configuration, including contract/herd overlays.
    pub config: Map<String, Value>,
    /// Unique identifier of the current run.
    pub run_id: String,
    /// Isolation level requested for this run.
    pub isolation: sandbox::IsolationLevel,
    /// Run-wide cancellation signal. Handlers must abandon blocking work
    /// and return promptly once this fires.
    pub cancel: CancellationToken,
}

impl NodeContext {
    /// String view of a config key.
    pub fn config_str(&self, key: &str) -> Option<String> {
        self.config.get(key).map(|v| match v {
            Value::String(s) => s.clone(),
            other => other.to_string(),
        })
    }

    /// Integer view of a config key (accepts numbers and numeric strings).
    pub fn config_u64(&self, key: &str) -> Option<u64> {
        match self.config.get(key)? {
            Value::Number(n) => n.as_u64(),
            Value::String(s) => s.parse().ok(),
            _ => None,
        }
    }
}

/// The core node trait.
///
/// A handler is invoked once per run. Source nodes (no dependencies)
/// implement [`produce`](Self::produce) and push zero or more packets into
/// `out`; every other node implements [`process`](Self::process), which the
/// node's mode handler drives once per incoming packet (batch mode calls it
/// per buffered packet at flush time).
#[async_trait]
pub trait NodeHandler: Send + Sync {
    /// Emit this node's packets. Only called for source nodes.
    async fn produce(
        &self,
        ctx: &NodeContext,
        out: &mpsc::Sender<DataPacket>,
    ) -> Result<(), NodeError> {
        let _ = (ctx, out);
        Ok(())
    }

    /// Process one incoming packet, returning the packet to forward
    /// downstream, or `None` to drop it.
    async fn process(
        &self,
        ctx: &NodeContext,
        packet: DataPacket,
    ) -> Result<Option<DataPacket>, NodeError>;
}

impl std::fmt::Debug for dyn NodeHandler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("dyn NodeHandler")
    }
}
