//! `MockNode` — a test double for `NodeHandler`.
//!
//! Useful in unit and integration tests where a real node implementation is
//! either unavailable or irrelevant.

use async_trait::async_trait;
use serde_json::Value;
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;

use crate::error::NodeError;
use crate::packet::DataPacket;
use crate::traits::{NodeContext, NodeHandler};

/// Behaviour injected into `MockNode` at construction time.
pub enum MockBehaviour {
    /// Forward every packet unchanged (re-stamped with the node's ID).
    Identity,
    /// Replace every packet's payload with a specific JSON value.
    ReturnValue(Value),
    /// As a source, emit one packet per value in order.
    EmitSequence(Vec<Value>),
    /// Fail with a `Retryable` error.
    FailRetryable(String),
    /// Fail with a `Fatal` error.
    FailFatal(String),
}

/// A mock node that records every payload it sees and behaves as
/// programmed.
pub struct MockNode {
    /// Label used in test assertions.
    pub name: String,
    /// What the node will do when invoked.
    pub behaviour: MockBehaviour,
    /// All payloads seen by this node (in call order).
    pub calls: Arc<Mutex<Vec<Value>>>,
}

impl MockNode {
    fn with_behaviour(name: impl Into<String>, behaviour: MockBehaviour) -> Self {
        Self {
            name: name.into(),
            behaviour,
            calls: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// A mock that forwards packets unchanged.
    pub fn identity(name: impl Into<String>) -> Self {
        Self::with_behaviour(name, MockBehaviour::Identity)
    }

    /// A mock that always succeeds with the given payload.
    pub fn returning(name: impl Into<String>, value: Value) -> Self {
        Self::with_behaviour(name, MockBehaviour::ReturnValue(value))
    }

    /// A source mock that emits the given payloads in order.
    pub fn emitting(name: impl Into<String>, values: Vec<Value>) -> Self {
        Self::with_behaviour(name, MockBehaviour::EmitSequence(values))
    }

    /// A mock that always fails with a `Fatal` error.
    pub fn failing_fatal(name: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::with_behaviour(name, MockBehaviour::FailFatal(msg.into()))
    }

    /// A mock that always fails with a `Retryable` error.
    pub fn failing_retryable(name: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::with_behaviour(name, MockBehaviour::FailRetryable(msg.into()))
    }

    /// Number of payloads this node has seen.
    pub fn call_count(&self) -> usize {
        self.calls.lock().unwrap().len()
    }

    /// Handle for asserting on recorded payloads after the node has been
    /// moved into a registry.
    pub fn calls_handle(&self) -> Arc<Mutex<Vec<Value>>> {
        Arc::clone(&self.calls)
    }
}

#[async_trait]
impl NodeHandler for MockNode {
    async fn produce(
        &self,
        ctx: &NodeContext,
        out: &mpsc::Sender<DataPacket>,
    ) -> Result<(), NodeError> {
        match &self.behaviour {
            MockBehaviour::EmitSequence(values) => {
                for value in values {
                    self.calls.lock().unwrap().push(value.clone());
                    out.send(DataPacket::new(value.clone(), ctx.node_id.clone()))
                        .await
                        .map_err(|_| NodeError::Fatal("mock output channel closed".into()))?;
                }
                Ok(())
            }
            MockBehaviour::ReturnValue(value) => {
                self.calls.lock().unwrap().push(value.clone());
                out.send(DataPacket::new(value.clone(), ctx.node_id.clone()))
                    .await
                    .map_err(|_| NodeError::Fatal("mock output channel closed".into()))
            }
            MockBehaviour::Identity => Ok(()),
            MockBehaviour::FailRetryable(msg) => Err(NodeError::Retryable(msg.clone())),
            MockBehaviour::FailFatal(msg) => Err(NodeError::Fatal(msg.clone())),
        }
    }

    async fn process(
        &self,
        ctx: &NodeContext,
        packet: DataPacket,
    ) -> Result<Option<DataPacket>, NodeError> {
        self.calls.lock().unwrap().push(packet.payload.clone());

        match &self.behaviour {
            MockBehaviour::Identity | MockBehaviour::EmitSequence(_) => {
                let mut forwarded = packet;
                forwarded.source_node = ctx.node_id.clone();
                Ok(Some(forwarded))
            }
            MockBehaviour::ReturnValue(value) => {
                let mut forwarded = packet.derive(value.clone());
                forwarded.source_node = ctx.node_id.clone();
                Ok(Some(forwarded))
            }
            MockBehaviour::FailRetryable(msg) => Err(NodeError::Retryable(msg.clone())),
            MockBehaviour::FailFatal(msg) => Err(NodeError::Fatal(msg.clone())),
        }
    }
}
