//! Data packets — the unit of data travelling on an edge.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;

/// A structured data packet flowing between DAG nodes.
///
/// Packets are immutable once sent: nodes that transform data emit new
/// packets rather than mutating received ones.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DataPacket {
    /// The actual data.
    pub payload: Value,
    /// Free-form information about the data.
    pub metadata: HashMap<String, String>,
    /// Wall-clock creation time.
    pub timestamp: DateTime<Utc>,
    /// ID of the node that created this packet.
    pub source_node: String,
}

impl DataPacket {
    /// Create a packet with the given payload and emitting node ID.
    pub fn new(payload: Value, source_node: impl Into<String>) -> Self {
        Self {
            payload,
            metadata: HashMap::new(),
            timestamp: Utc::now(),
            source_node: source_node.into(),
        }
    }

    /// Add a metadata entry, returning the packet for chaining.
    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    /// A fresh packet carrying `payload`, stamped with a new timestamp but
    /// inheriting this packet's metadata and source.
    pub fn derive(&self, payload: Value) -> Self {
        Self {
            payload,
            metadata: self.metadata.clone(),
            timestamp: Utc::now(),
            source_node: self.source_node.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn metadata_chains() {
        let p = DataPacket::new(json!({"a": 1}), "step_0")
            .with_metadata("codec", "json")
            .with_metadata("batch", "7");

        assert_eq!(p.source_node, "step_0");
        assert_eq!(p.metadata["codec"], "json");
        assert_eq!(p.metadata["batch"], "7");
    }

    #[test]
    fn derive_keeps_metadata_and_source() {
        let original = DataPacket::new(json!([1, 2, 3]), "src").with_metadata("k", "v");
        let derived = original.derive(json!(1));

        assert_eq!(derived.source_node, "src");
        assert_eq!(derived.metadata["k"], "v");
        assert_eq!(derived.payload, json!(1));
    }
}
