//! Sandbox-level error type.

use thiserror::Error;

/// Errors produced while confining or running a node child process.
#[derive(Debug, Error)]
pub enum SandboxError {
    /// No command was configured for the sandbox.
    #[error("no command specified")]
    NoCommand,

    /// A resource limit string used an unknown unit or malformed number.
    #[error("bad limit value '{0}'")]
    BadLimits(String),

    /// Preparing the chroot skeleton failed.
    #[error("failed to prepare chroot at {path}: {source}")]
    Chroot {
        path: String,
        #[source]
        source: std::io::Error,
    },

    /// Writing a cgroup control file failed.
    #[error("cgroup '{name}': failed to write {file}: {source}")]
    Cgroup {
        name: String,
        file: &'static str,
        #[source]
        source: std::io::Error,
    },

    /// cgroup v2 is not mounted on this host.
    #[error("cgroup v2 filesystem not mounted at {0}")]
    CgroupUnavailable(&'static str),

    /// Spawning or waiting on the child failed.
    #[error("failed to run command: {0}")]
    Spawn(#[from] std::io::Error),
}
