//! `sandbox` crate — Linux isolation and resource control for node slices.
//!
//! Each confined node runs as a child process that unshares a namespace
//! set, is chrooted into a throwaway minimal root, and is accounted under a
//! cgroup v2 directory with cpu/memory/io limits. On platforms without
//! these facilities the sandbox degrades to a plain child process with a
//! warning.

pub mod cgroup;
pub mod chroot;
pub mod error;
pub mod executor;
pub mod limits;
pub mod namespaces;

pub use error::SandboxError;
pub use executor::{IsolationLevel, Sandbox, SandboxResult};
pub use limits::Limits;
pub use namespaces::NamespaceSet;
