//! Confined child process lifecycle.
//!
//! `Sandbox` builds up the confinement configuration (command, limits,
//! chroot, namespaces, cgroup name) and `execute` runs the child to
//! completion, collecting stdout/stderr/exit code. Teardown of the cgroup
//! and any throwaway chroot is guaranteed by guard types.

use std::path::PathBuf;
use std::process::Stdio;
use std::str::FromStr;

use tracing::warn;

use crate::cgroup::{self, CgroupGuard};
use crate::chroot::{install_binary, prepare_chroot};
use crate::error::SandboxError;
use crate::limits::Limits;
use crate::namespaces::NamespaceSet;

/// How strongly a node is confined.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum IsolationLevel {
    /// No confinement; failures to confine are warnings.
    #[default]
    None,
    /// Namespace + chroot + cgroup confinement of a child process.
    Process,
    /// Reserved; currently falls back to process isolation.
    Container,
}

impl FromStr for IsolationLevel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "none" => Ok(Self::None),
            "process" => Ok(Self::Process),
            "container" => Ok(Self::Container),
            other => Err(format!("unknown isolation level '{other}'")),
        }
    }
}

impl IsolationLevel {
    /// Resolve reserved levels to what actually runs.
    pub fn effective(self) -> Self {
        match self {
            Self::Container => {
                warn!("container isolation is not implemented; falling back to process isolation");
                Self::Process
            }
            other => other,
        }
    }

    pub fn is_isolated(self) -> bool {
        !matches!(self, Self::None)
    }
}

/// Outcome of a confined execution.
#[derive(Debug)]
pub struct SandboxResult {
    pub exit_code: i32,
    pub stdout: Vec<u8>,
    pub stderr: Vec<u8>,
}

impl SandboxResult {
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }
}

/// Builder for a confined child process.
pub struct Sandbox {
    command: Vec<String>,
    limits: Limits,
    chroot_dir: Option<PathBuf>,
    work_dir: Option<PathBuf>,
    env: Vec<(String, String)>,
    namespaces: NamespaceSet,
    cgroup_name: String,
    hostname: Option<String>,
    level: IsolationLevel,
}

impl Sandbox {
    pub fn new(command: Vec<String>) -> Self {
        Self {
            command,
            limits: Limits::default(),
            chroot_dir: None,
            work_dir: None,
            env: Vec::new(),
            namespaces: NamespaceSet::default(),
            cgroup_name: format!("drover-{}", std::process::id()),
            hostname: None,
            level: IsolationLevel::Process,
        }
    }

    pub fn limits(mut self, limits: Limits) -> Self {
        self.limits = limits;
        self
    }

    /// Use an existing chroot directory instead of a throwaway one.
    pub fn chroot_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.chroot_dir = Some(dir.into());
        self
    }

    pub fn work_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.work_dir = Some(dir.into());
        self
    }

    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.push((key.into(), value.into()));
        self
    }

    pub fn namespaces(mut self, set: NamespaceSet) -> Self {
        self.namespaces = set;
        self
    }

    pub fn cgroup_name(mut self, name: impl Into<String>) -> Self {
        self.cgroup_name = name.into();
        self
    }

    /// Hostname to set inside the new UTS namespace.
    pub fn hostname(mut self, name: impl Into<String>) -> Self {
        self.hostname = Some(name.into());
        self
    }

    pub fn isolation(mut self, level: IsolationLevel) -> Self {
        self.level = level;
        self
    }

    /// Run the command to completion inside the configured confinement.
    ///
    /// # Errors
    /// Returns [`SandboxError::NoCommand`] for an empty command line, and
    /// spawn/limit errors per their variants. With
    /// [`IsolationLevel::None`], confinement failures degrade to warnings
    /// and the command runs unconfined.
    pub async fn execute(&self) -> Result<SandboxResult, SandboxError> {
        if self.command.is_empty() {
            return Err(SandboxError::NoCommand);
        }

        let level = self.level.effective();

        // A throwaway chroot root unless the caller supplied one. The
        // TempDir handle doubles as the cleanup guard.
        let mut temp_root: Option<tempfile::TempDir> = None;
        let mut command = self.command.clone();
        let chroot_dir = if level.is_isolated() {
            let dir = match &self.chroot_dir {
                Some(dir) => dir.clone(),
                None => {
                    let tmp = tempfile::Builder::new()
                        .prefix("drover-chroot-")
                        .tempdir()?;
                    let path = tmp.path().to_path_buf();
                    temp_root = Some(tmp);
                    path
                }
            };
            prepare_chroot(&dir)?;
            // The node binary must exist inside the new root; argv[0] is
            // rewritten to its in-chroot path.
            let binary = resolve_binary(&command[0])?;
            command[0] = install_binary(&dir, &binary)?;
            Some(dir)
        } else {
            None
        };

        let mut cmd = std::process::Command::new(&command[0]);
        cmd.args(&command[1..])
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        if !self.env.is_empty() {
            cmd.env_clear().envs(self.env.iter().cloned());
        }
        if let Some(dir) = &self.work_dir {
            cmd.current_dir(dir);
        }

        self.confine(&mut cmd, chroot_dir.as_deref(), level);

        let child = tokio::process::Command::from(cmd)
            .kill_on_drop(true)
            .spawn()?;

        // Register the child in its cgroup before it does real work. A
        // failure here is fatal only for isolated runs.
        let _cgroup_guard = match child.id() {
            Some(pid) if !self.limits.is_empty() => {
                match cgroup::apply(&self.cgroup_name, pid, &self.limits) {
                    Ok(()) => CgroupGuard::new(self.cgroup_name.clone()),
                    Err(err @ SandboxError::BadLimits(_)) => return Err(err),
                    Err(err) if level.is_isolated() => return Err(err),
                    Err(err) => {
                        warn!(%err, "failed to apply cgroup limits");
                        CgroupGuard::disarmed()
                    }
                }
            }
            _ => CgroupGuard::disarmed(),
        };

        let output = child.wait_with_output().await?;
        drop(temp_root);

        Ok(SandboxResult {
            exit_code: output.status.code().unwrap_or(-1),
            stdout: output.stdout,
            stderr: output.stderr,
        })
    }

    /// Install the pre-exec confinement hook: unshare, hostname, chroot,
    /// `/proc` remount. Runs in the forked child, before exec.
    #[cfg(target_os = "linux")]
    fn confine(
        &self,
        cmd: &mut std::process::Command,
        chroot_dir: Option<&std::path::Path>,
        level: IsolationLevel,
    ) {
        use std::ffi::CString;
        use std::os::unix::process::CommandExt;

        if !level.is_isolated() {
            return;
        }

        let flags = self.namespaces.clone_flags();
        let hostname = self.hostname.clone();
        let mount_proc = self.namespaces.pid && self.namespaces.mount;
        let root = chroot_dir
            .map(|p| CString::new(p.as_os_str().as_encoded_bytes()).expect("path has no NUL"));

        // SAFETY: only async-signal-safe syscalls run between fork and exec.
        unsafe {
            cmd.pre_exec(move || {
                if flags != 0 && libc::unshare(flags) != 0 {
                    return Err(std::io::Error::last_os_error());
                }

                if let Some(name) = &hostname {
                    if libc::sethostname(name.as_ptr().cast(), name.len()) != 0 {
                        return Err(std::io::Error::last_os_error());
                    }
                }

                if let Some(root) = &root {
                    if libc::chdir(root.as_ptr()) != 0
                        || libc::chroot(root.as_ptr()) != 0
                        || libc::chdir(c"/".as_ptr()) != 0
                    {
                        return Err(std::io::Error::last_os_error());
                    }

                    if mount_proc
                        && libc::mount(
                            c"proc".as_ptr(),
                            c"/proc".as_ptr(),
                            c"proc".as_ptr(),
                            0,
                            std::ptr::null(),
                        ) != 0
                    {
                        return Err(std::io::Error::last_os_error());
                    }
                }

                Ok(())
            });
        }
    }

    #[cfg(not(target_os = "linux"))]
    fn confine(
        &self,
        _cmd: &mut std::process::Command,
        _chroot_dir: Option<&std::path::Path>,
        level: IsolationLevel,
    ) {
        if level.is_isolated() {
            warn!("namespace isolation is only available on Linux; running unconfined");
        }
    }
}

/// Resolve a command name to the binary that will be copied into the
/// chroot: explicit paths pass through, bare names search `PATH`.
fn resolve_binary(name: &str) -> Result<PathBuf, SandboxError> {
    let path = std::path::Path::new(name);
    if path.components().count() > 1 {
        return Ok(path.to_path_buf());
    }

    let search = std::env::var_os("PATH").unwrap_or_default();
    for dir in std::env::split_paths(&search) {
        let candidate = dir.join(name);
        if candidate.is_file() {
            return Ok(candidate);
        }
    }

    Err(SandboxError::Spawn(std::io::Error::new(
        std::io::ErrorKind::NotFound,
        format!("command '{name}' not found in PATH"),
    )))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resolved_binaries_come_from_path() {
        let sh = resolve_binary("sh").expect("sh is on PATH");
        assert!(sh.is_absolute());
        assert!(sh.is_file());

        let explicit = resolve_binary("/usr/bin/env").unwrap();
        assert_eq!(explicit, std::path::PathBuf::from("/usr/bin/env"));

        assert!(resolve_binary("no-such-binary-drover").is_err());
    }

    #[test]
    fn isolation_level_parses() {
        assert_eq!("none".parse::<IsolationLevel>().unwrap(), IsolationLevel::None);
        assert_eq!(
            "process".parse::<IsolationLevel>().unwrap(),
            IsolationLevel::Process
        );
        assert_eq!(
            "container".parse::<IsolationLevel>().unwrap(),
            IsolationLevel::Container
        );
        assert!("vm".parse::<IsolationLevel>().is_err());
    }

    #[test]
    fn container_falls_back_to_process() {
        assert_eq!(IsolationLevel::Container.effective(), IsolationLevel::Process);
        assert_eq!(IsolationLevel::None.effective(), IsolationLevel::None);
    }

    #[tokio::test]
    async fn empty_command_is_rejected() {
        let err = Sandbox::new(vec![]).execute().await.unwrap_err();
        assert!(matches!(err, SandboxError::NoCommand));
    }

    #[tokio::test]
    async fn unconfined_command_runs() {
        let result = Sandbox::new(vec!["echo".into(), "bale".into()])
            .isolation(IsolationLevel::None)
            .execute()
            .await
            .unwrap();

        assert!(result.success());
        assert_eq!(String::from_utf8_lossy(&result.stdout).trim(), "bale");
    }

    #[tokio::test]
    async fn nonzero_exit_is_reported() {
        let result = Sandbox::new(vec!["sh".into(), "-c".into(), "exit 3".into()])
            .isolation(IsolationLevel::None)
            .execute()
            .await
            .unwrap();

        assert_eq!(result.exit_code, 3);
        assert!(!result.success());
    }
}
