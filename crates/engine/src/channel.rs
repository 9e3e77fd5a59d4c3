//! Channel manager — owns the bounded packet channels between nodes.
//!
//! Every edge `"<from>-><to>"` maps to one bounded channel created at
//! executor setup. The writer side retries on a full buffer per the edge's
//! [`RetryPolicy`], racing the run's cancellation token; the reader side
//! offers blocking, deadline, and non-blocking receives with typed
//! conversion (direct bind first, codec round-trip as the fallback).

use std::collections::HashMap;
use std::sync::RwLock;
use std::time::Duration;

use serde::de::DeserializeOwned;
use serde_json::Value;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::{TryRecvError, TrySendError};
use tokio_util::sync::CancellationToken;

use nodes::DataPacket;

use crate::codec::codec;
use crate::error::EngineError;
use crate::models::{EdgeSpec, RetryPolicy};

struct EdgeChannel {
    edge: EdgeSpec,
    sender: Option<mpsc::Sender<DataPacket>>,
    receiver: Option<mpsc::Receiver<DataPacket>>,
}

/// Owns every edge channel of a run.
#[derive(Default)]
pub struct ChannelManager {
    inner: RwLock<HashMap<String, EdgeChannel>>,
}

impl ChannelManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create the bounded channel for an edge.
    pub fn register(&self, edge: EdgeSpec) {
        let (sender, receiver) = mpsc::channel(edge.buffer_size.max(1));
        self.inner.write().expect("channel map lock poisoned").insert(
            edge.id(),
            EdgeChannel {
                edge,
                sender: Some(sender),
                receiver: Some(receiver),
            },
        );
    }

    /// The edge configuration for `from -> to`.
    ///
    /// # Errors
    /// [`EngineError::UnknownEdge`] if the edge was never registered.
    pub fn edge(&self, from: &str, to: &str) -> Result<EdgeSpec, EngineError> {
        self.inner
            .read()
            .expect("channel map lock poisoned")
            .get(&edge_id(from, to))
            .map(|c| c.edge.clone())
            .ok_or_else(|| unknown_edge(from, to))
    }

    /// A writer handle for `from -> to`.
    ///
    /// # Errors
    /// [`EngineError::UnknownEdge`] for unregistered edges,
    /// [`EngineError::ChannelClosed`] once the writer side has been closed.
    pub fn sender(&self, from: &str, to: &str) -> Result<mpsc::Sender<DataPacket>, EngineError> {
        let map = self.inner.read().expect("channel map lock poisoned");
        let entry = map.get(&edge_id(from, to)).ok_or_else(|| unknown_edge(from, to))?;
        entry.sender.clone().ok_or_else(|| EngineError::ChannelClosed {
            edge: edge_id(from, to),
        })
    }

    /// Claim the single reader side of `from -> to`. Each edge has exactly
    /// one reader; claiming twice fails.
    ///
    /// # Errors
    /// [`EngineError::UnknownEdge`] for unregistered edges,
    /// [`EngineError::ChannelClosed`] if the receiver was already claimed.
    pub fn take_receiver(
        &self,
        from: &str,
        to: &str,
    ) -> Result<mpsc::Receiver<DataPacket>, EngineError> {
        let mut map = self.inner.write().expect("channel map lock poisoned");
        let entry = map
            .get_mut(&edge_id(from, to))
            .ok_or_else(|| unknown_edge(from, to))?;
        entry.receiver.take().ok_or_else(|| EngineError::ChannelClosed {
            edge: edge_id(from, to),
        })
    }

    /// Close the writer side of one edge. Idempotent.
    pub fn close_edge(&self, from: &str, to: &str) {
        if let Some(entry) = self
            .inner
            .write()
            .expect("channel map lock poisoned")
            .get_mut(&edge_id(from, to))
        {
            entry.sender = None;
        }
    }

    /// Close every channel exactly once.
    pub fn close_all(&self) {
        for entry in self
            .inner
            .write()
            .expect("channel map lock poisoned")
            .values_mut()
        {
            entry.sender = None;
        }
    }

    /// Send a packet on `from -> to`, retrying on a full buffer per the
    /// edge's policy.
    ///
    /// # Errors
    /// [`EngineError::SendExhausted`] when every retry slot found the
    /// buffer full, [`EngineError::ChannelClosed`] if the reader is gone,
    /// [`EngineError::Cancelled`] if the run was cancelled mid-retry.
    pub async fn send(
        &self,
        from: &str,
        to: &str,
        packet: DataPacket,
        cancel: &CancellationToken,
    ) -> Result<(), EngineError> {
        let sender = self.sender(from, to)?;
        let edge = self.edge(from, to)?;

        match sender.try_send(packet) {
            Ok(()) => Ok(()),
            Err(TrySendError::Closed(_)) => Err(EngineError::ChannelClosed { edge: edge.id() }),
            Err(TrySendError::Full(packet)) => {
                send_with_retry(&sender, packet, &edge.retry, &edge.id(), cancel).await
            }
        }
    }
}

/// Retry a send per the policy: sleep, try again, grow the delay.
async fn send_with_retry(
    sender: &mpsc::Sender<DataPacket>,
    mut packet: DataPacket,
    policy: &RetryPolicy,
    edge: &str,
    cancel: &CancellationToken,
) -> Result<(), EngineError> {
    let mut delay = policy.retry_delay;

    for _ in 0..policy.max_retries {
        tokio::select! {
            () = cancel.cancelled() => return Err(EngineError::Cancelled),
            () = tokio::time::sleep(delay) => {}
        }

        match sender.try_send(packet) {
            Ok(()) => return Ok(()),
            Err(TrySendError::Closed(_)) => {
                return Err(EngineError::ChannelClosed {
                    edge: edge.to_string(),
                })
            }
            Err(TrySendError::Full(returned)) => {
                packet = returned;
                delay = delay.mul_f64(policy.backoff_factor);
            }
        }
    }

    Err(EngineError::SendExhausted {
        edge: edge.to_string(),
        attempts: policy.max_retries,
    })
}

/// Block for the next packet and bind it to `T`.
///
/// # Errors
/// [`EngineError::ChannelClosed`] when the channel closed with no
/// remaining packets; codec errors if neither direct binding nor the
/// edge's codec round-trip can produce a `T`.
pub async fn receive_as<T: DeserializeOwned>(
    rx: &mut mpsc::Receiver<DataPacket>,
    edge: &EdgeSpec,
) -> Result<T, EngineError> {
    match rx.recv().await {
        Some(packet) => convert_payload(packet.payload, edge),
        None => Err(EngineError::ChannelClosed { edge: edge.id() }),
    }
}

/// Like [`receive_as`], but gives up after `timeout`.
///
/// # Errors
/// [`EngineError::ReceiveTimeout`] when no packet arrives in time.
pub async fn receive_with_timeout<T: DeserializeOwned>(
    rx: &mut mpsc::Receiver<DataPacket>,
    edge: &EdgeSpec,
    timeout: Duration,
) -> Result<T, EngineError> {
    match tokio::time::timeout(timeout, rx.recv()).await {
        Ok(Some(packet)) => convert_payload(packet.payload, edge),
        Ok(None) => Err(EngineError::ChannelClosed { edge: edge.id() }),
        Err(_) => Err(EngineError::ReceiveTimeout { edge: edge.id() }),
    }
}

/// Non-blocking receive: `Ok(None)` when no packet is waiting.
///
/// # Errors
/// [`EngineError::ChannelClosed`] when the channel is closed and drained.
pub fn try_receive<T: DeserializeOwned>(
    rx: &mut mpsc::Receiver<DataPacket>,
    edge: &EdgeSpec,
) -> Result<Option<T>, EngineError> {
    match rx.try_recv() {
        Ok(packet) => convert_payload(packet.payload, edge).map(Some),
        Err(TryRecvError::Empty) => Ok(None),
        Err(TryRecvError::Disconnected) => Err(EngineError::ChannelClosed { edge: edge.id() }),
    }
}

/// Bind a payload to `T`: direct `serde_json` binding first, then a
/// round-trip through the edge's codec.
fn convert_payload<T: DeserializeOwned>(payload: Value, edge: &EdgeSpec) -> Result<T, EngineError> {
    match serde_json::from_value(payload.clone()) {
        Ok(value) => Ok(value),
        Err(_) => {
            let codec = codec(&edge.codec);
            let bytes = codec.encode(&payload)?;
            let decoded = codec.decode(&bytes)?;
            serde_json::from_value(decoded).map_err(|source| EngineError::Codec {
                codec: edge.codec.clone(),
                source,
            })
        }
    }
}

fn edge_id(from: &str, to: &str) -> String {
    format!("{from}->{to}")
}

fn unknown_edge(from: &str, to: &str) -> EngineError {
    EngineError::UnknownEdge {
        from: from.to_string(),
        to: to.to_string(),
    }
}
