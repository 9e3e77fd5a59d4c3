//! cgroup v2 resource accounting for confined children.

use std::path::PathBuf;

use tracing::warn;

use crate::error::SandboxError;
use crate::limits::{parse_size, Limits};

/// Mount point of the cgroup v2 hierarchy.
pub const CGROUP_ROOT: &str = "/sys/fs/cgroup";

/// Path of a named cgroup directory.
pub fn cgroup_path(name: &str) -> PathBuf {
    PathBuf::from(CGROUP_ROOT).join(name)
}

/// Create the cgroup, register `pid` in it, and write the configured
/// limits (`cpu.max`, `memory.max`, `io.weight`).
///
/// # Errors
/// Returns [`SandboxError::CgroupUnavailable`] when cgroup v2 is not
/// mounted, [`SandboxError::BadLimits`] for malformed sizes, and
/// [`SandboxError::Cgroup`] for any control-file write failure.
pub fn apply(name: &str, pid: u32, limits: &Limits) -> Result<(), SandboxError> {
    if !std::path::Path::new(CGROUP_ROOT).exists() {
        return Err(SandboxError::CgroupUnavailable(CGROUP_ROOT));
    }

    let dir = cgroup_path(name);
    std::fs::create_dir_all(&dir).map_err(|source| SandboxError::Cgroup {
        name: name.to_string(),
        file: ".",
        source,
    })?;

    let write = |file: &'static str, value: &str| -> Result<(), SandboxError> {
        std::fs::write(dir.join(file), value).map_err(|source| SandboxError::Cgroup {
            name: name.to_string(),
            file,
            source,
        })
    };

    write("cgroup.procs", &pid.to_string())?;

    if !limits.cpu_quota.is_empty() {
        write("cpu.max", &limits.cpu_quota)?;
    }
    if !limits.memory_max.is_empty() {
        write("memory.max", &parse_size(&limits.memory_max)?)?;
    }
    if !limits.io_weight.is_empty() {
        write("io.weight", &limits.io_weight)?;
    }

    Ok(())
}

/// Remove the cgroup directory. Missing directories are not an error; a
/// failed removal is logged and swallowed, since cleanup runs on teardown
/// paths that must not mask the node's own result.
pub fn cleanup(name: &str) {
    let dir = cgroup_path(name);
    if !dir.exists() {
        return;
    }
    if let Err(err) = std::fs::remove_dir(&dir) {
        warn!(cgroup = name, %err, "failed to remove cgroup directory");
    }
}

/// Drop guard that removes a cgroup when it goes out of scope.
pub struct CgroupGuard {
    name: Option<String>,
}

impl CgroupGuard {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: Some(name.into()),
        }
    }

    /// A guard that owns nothing (cgroup setup was skipped).
    pub fn disarmed() -> Self {
        Self { name: None }
    }
}

impl Drop for CgroupGuard {
    fn drop(&mut self) {
        if let Some(name) = self.name.take() {
            cleanup(&name);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn path_is_rooted() {
        assert_eq!(
            cgroup_path("drover-7"),
            PathBuf::from("/sys/fs/cgroup/drover-7")
        );
    }

    #[test]
    fn cleanup_of_missing_cgroup_is_noop() {
        cleanup("drover-test-nonexistent-cgroup");
    }

    #[test]
    fn disarmed_guard_drops_quietly() {
        let _guard = CgroupGuard::disarmed();
    }
}
