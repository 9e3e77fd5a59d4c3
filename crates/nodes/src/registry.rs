//! Node-type registry — factory lookup by classification tag.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use serde_json::{Map, Value};

use crate::builtin::{CommandNode, PassthroughNode, SinkNode, SourceNode};
use crate::error::NodeError;
use crate::traits::NodeHandler;

/// A factory producing a handler from a node's config map.
pub type NodeFactory =
    Arc<dyn Fn(&Map<String, Value>) -> Result<Arc<dyn NodeHandler>, NodeError> + Send + Sync>;

/// Maps node-type tags to handler factories.
///
/// Registrations must complete before a run starts; the map is read-mostly
/// afterwards.
pub struct NodeRegistry {
    factories: RwLock<HashMap<String, NodeFactory>>,
}

impl NodeRegistry {
    /// An empty registry.
    pub fn new() -> Self {
        Self {
            factories: RwLock::new(HashMap::new()),
        }
    }

    /// A registry pre-populated with the engine-level tags.
    pub fn with_builtins() -> Self {
        let registry = Self::new();

        registry.register("source", Arc::new(|_| Ok(Arc::new(SourceNode))));
        registry.register("sink", Arc::new(|_| Ok(Arc::new(SinkNode))));
        registry.register("command", Arc::new(|_| Ok(Arc::new(CommandNode))));
        for tag in ["filter", "transform", "aggregate", "enrich"] {
            registry.register(tag, Arc::new(|_| Ok(Arc::new(PassthroughNode))));
        }

        registry
    }

    /// Register (or replace) a factory for a node-type tag.
    pub fn register(&self, node_type: impl Into<String>, factory: NodeFactory) {
        self.factories
            .write()
            .expect("registry lock poisoned")
            .insert(node_type.into(), factory);
    }

    /// Create a handler for the given tag.
    ///
    /// # Errors
    /// Returns [`NodeError::UnknownType`] when no factory is registered.
    pub fn create(
        &self,
        node_type: &str,
        config: &Map<String, Value>,
    ) -> Result<Arc<dyn NodeHandler>, NodeError> {
        let factory = self
            .factories
            .read()
            .expect("registry lock poisoned")
            .get(node_type)
            .cloned()
            .ok_or_else(|| NodeError::UnknownType(node_type.to_string()))?;

        factory(config)
    }

    /// Whether a tag has a registered factory.
    pub fn contains(&self, node_type: &str) -> bool {
        self.factories
            .read()
            .expect("registry lock poisoned")
            .contains_key(node_type)
    }
}

impl Default for NodeRegistry {
    fn default() -> Self {
        Self::with_builtins()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::MockNode;

    #[test]
    fn builtins_are_registered() {
        let registry = NodeRegistry::with_builtins();
        for tag in ["source", "sink", "filter", "transform", "aggregate", "enrich", "command"] {
            assert!(registry.contains(tag), "missing builtin '{tag}'");
        }
    }

    #[test]
    fn unknown_tag_is_rejected() {
        let registry = NodeRegistry::with_builtins();
        let err = registry.create("csv_reader", &Map::new()).unwrap_err();
        assert!(matches!(err, NodeError::UnknownType(t) if t == "csv_reader"));
    }

    #[test]
    fn plugin_registration_wins_lookup() {
        let registry = NodeRegistry::with_builtins();
        registry.register(
            "csv_reader",
            Arc::new(|_| Ok(Arc::new(MockNode::identity("csv_reader")))),
        );
        assert!(registry.create("csv_reader", &Map::new()).is_ok());
    }
}
