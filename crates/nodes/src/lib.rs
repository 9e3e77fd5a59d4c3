//! `nodes` crate — the `NodeHandler` trait, data packets, and built-in
//! node implementations.
//!
//! Every node — built-in and plug-in alike — must implement
//! [`NodeHandler`]. The engine crate dispatches execution through this
//! trait object; packets and the execution context live here so both the
//! engine and individual node implementations can import them without a
//! circular dependency.

pub mod builtin;
pub mod error;
pub mod mock;
pub mod packet;
pub mod registry;
pub mod traits;

pub use error::NodeError;
pub use packet::DataPacket;
pub use registry::NodeRegistry;
pub use traits::{NodeContext, NodeHandler};

// Nodes carry the isolation policy through their context.
pub use sandbox::IsolationLevel;
