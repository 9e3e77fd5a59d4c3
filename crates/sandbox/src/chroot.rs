//! Minimal chroot skeleton preparation.

use std::path::Path;

use crate::error::SandboxError;

/// Directories every chroot skeleton contains.
const SKELETON_DIRS: &[&str] = &[
    "bin", "dev", "etc", "lib", "lib64", "proc", "sys", "tmp", "usr", "var",
];

/// Create a minimal root filesystem layout at `root`: the standard top-level
/// directories plus an empty `/dev/null`.
///
/// # Errors
/// Returns [`SandboxError::Chroot`] if any directory or file cannot be
/// created.
pub fn prepare_chroot(root: &Path) -> Result<(), SandboxError> {
    let mk = |path: &Path| -> Result<(), SandboxError> {
        std::fs::create_dir_all(path).map_err(|source| SandboxError::Chroot {
            path: path.display().to_string(),
            source,
        })
    };

    mk(root)?;
    for dir in SKELETON_DIRS {
        mk(&root.join(dir))?;
    }

    let dev_null = root.join("dev").join("null");
    if !dev_null.exists() {
        std::fs::File::create(&dev_null).map_err(|source| SandboxError::Chroot {
            path: dev_null.display().to_string(),
            source,
        })?;
    }

    Ok(())
}

/// Copy an executable into the skeleton's `/bin`, returning the path it will
/// have inside the chroot.
///
/// # Errors
/// Returns [`SandboxError::Chroot`] on any filesystem failure.
pub fn install_binary(root: &Path, binary: &Path) -> Result<String, SandboxError> {
    let name = binary
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_else(|| "node".to_string());
    let dest = root.join("bin").join(&name);

    std::fs::copy(binary, &dest).map_err(|source| SandboxError::Chroot {
        path: dest.display().to_string(),
        source,
    })?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        std::fs::set_permissions(&dest, std::fs::Permissions::from_mode(0o755)).map_err(
            |source| SandboxError::Chroot {
                path: dest.display().to_string(),
                source,
            },
        )?;
    }

    Ok(format!("/bin/{name}"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn skeleton_has_standard_layout() {
        let tmp = tempfile::tempdir().unwrap();
        prepare_chroot(tmp.path()).unwrap();

        for dir in SKELETON_DIRS {
            assert!(tmp.path().join(dir).is_dir(), "missing {dir}");
        }
        assert!(tmp.path().join("dev/null").is_file());
    }

    #[test]
    fn prepare_is_idempotent() {
        let tmp = tempfile::tempdir().unwrap();
        prepare_chroot(tmp.path()).unwrap();
        prepare_chroot(tmp.path()).unwrap();
    }

    #[test]
    fn binary_lands_in_bin() {
        let tmp = tempfile::tempdir().unwrap();
        prepare_chroot(tmp.path()).unwrap();

        let src = tmp.path().join("payload");
        std::fs::write(&src, b"#!/bin/sh\nexit 0\n").unwrap();

        let inside = install_binary(tmp.path(), &src).unwrap();
        assert_eq!(inside, "/bin/payload");
        assert!(tmp.path().join("bin/payload").is_file());
    }
}
