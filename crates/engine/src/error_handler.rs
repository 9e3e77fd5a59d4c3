//! Per-node error aggregation and the continue/stop decision.

use std::collections::BTreeMap;
use std::sync::Mutex;

use crate::error::EngineError;

/// Thread-safe map of node errors, configured with a `fatal` flag that
/// decides whether the first error stops the run.
pub struct ErrorHandler {
    fatal: bool,
    errors: Mutex<BTreeMap<String, String>>,
}

impl ErrorHandler {
    /// `fatal = true` is fail-stop; `false` is continue-on-error.
    pub fn new(fatal: bool) -> Self {
        Self {
            fatal,
            errors: Mutex::new(BTreeMap::new()),
        }
    }

    /// Record a node's error. Returns `true` if execution should continue.
    pub fn handle(&self, node_id: &str, err: &EngineError) -> bool {
        self.errors
            .lock()
            .expect("error map lock poisoned")
            .insert(node_id.to_string(), err.to_string());
        !self.fatal
    }

    /// Snapshot copy of all recorded errors.
    pub fn errors(&self) -> BTreeMap<String, String> {
        self.errors.lock().expect("error map lock poisoned").clone()
    }

    pub fn is_empty(&self) -> bool {
        self.errors.lock().expect("error map lock poisoned").is_empty()
    }

    pub fn len(&self) -> usize {
        self.errors.lock().expect("error map lock poisoned").len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use nodes::NodeError;

    fn handler_error(node: &str) -> EngineError {
        EngineError::Handler {
            node_id: node.into(),
            source: NodeError::Fatal("boom".into()),
        }
    }

    #[test]
    fn fatal_handler_stops_execution() {
        let handler = ErrorHandler::new(true);
        assert!(!handler.handle("b", &handler_error("b")));
        assert_eq!(handler.len(), 1);
    }

    #[test]
    fn non_fatal_handler_continues() {
        let handler = ErrorHandler::new(false);
        assert!(handler.handle("b", &handler_error("b")));
        assert!(handler.handle("c", &handler_error("c")));
        assert_eq!(handler.len(), 2);
    }

    #[test]
    fn errors_returns_a_snapshot() {
        let handler = ErrorHandler::new(true);
        handler.handle("b", &handler_error("b"));

        let snapshot = handler.errors();
        handler.handle("c", &handler_error("c"));

        // The earlier snapshot is unaffected by later records.
        assert_eq!(snapshot.len(), 1);
        assert!(snapshot.contains_key("b"));
        assert_eq!(handler.errors().len(), 2);
    }
}
