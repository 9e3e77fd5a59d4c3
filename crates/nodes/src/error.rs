//! Node-level error type.

use thiserror::Error;

/// Errors returned by a node handler.
///
/// The engine uses the variant to decide retry behaviour:
/// - `Retryable` — a source node is re-invoked with exponential back-off.
/// - `Fatal`     — the node is immediately marked as failed.
#[derive(Debug, Error, Clone)]
pub enum NodeError {
    /// Transient failure; the engine may re-try the node.
    #[error("retryable node error: {0}")]
    Retryable(String),

    /// Permanent failure; no retry should be attempted.
    #[error("fatal node error: {0}")]
    Fatal(String),

    /// No handler factory is registered for the requested node type.
    #[error("no handler registered for node type '{0}'")]
    UnknownType(String),
}
