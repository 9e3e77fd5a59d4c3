//! Namespace selection for confined children.

/// Which Linux namespaces a confined child unshares.
///
/// The default set is UTS, PID, mount, and IPC; network and user namespaces
/// are opt-in (the latter requires privileges most runs do not have).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NamespaceSet {
    pub uts: bool,
    pub pid: bool,
    pub mount: bool,
    pub ipc: bool,
    pub net: bool,
    pub user: bool,
}

impl Default for NamespaceSet {
    fn default() -> Self {
        Self {
            uts: true,
            pid: true,
            mount: true,
            ipc: true,
            net: false,
            user: false,
        }
    }
}

impl NamespaceSet {
    /// An empty set (no isolation).
    pub fn none() -> Self {
        Self {
            uts: false,
            pid: false,
            mount: false,
            ipc: false,
            net: false,
            user: false,
        }
    }

    pub fn with_net(mut self) -> Self {
        self.net = true;
        self
    }

    pub fn with_user(mut self) -> Self {
        self.user = true;
        self
    }

    /// Compose the `CLONE_*` flag word for `unshare(2)`.
    #[cfg(target_os = "linux")]
    pub fn clone_flags(&self) -> libc::c_int {
        let mut flags = 0;
        if self.uts {
            flags |= libc::CLONE_NEWUTS;
        }
        if self.pid {
            flags |= libc::CLONE_NEWPID;
        }
        if self.mount {
            flags |= libc::CLONE_NEWNS;
        }
        if self.ipc {
            flags |= libc::CLONE_NEWIPC;
        }
        if self.net {
            flags |= libc::CLONE_NEWNET;
        }
        if self.user {
            flags |= libc::CLONE_NEWUSER;
        }
        flags
    }

    pub fn is_empty(&self) -> bool {
        !(self.uts || self.pid || self.mount || self.ipc || self.net || self.user)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_set_is_uts_pid_mount_ipc() {
        let ns = NamespaceSet::default();
        assert!(ns.uts && ns.pid && ns.mount && ns.ipc);
        assert!(!ns.net && !ns.user);
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn flags_compose() {
        let flags = NamespaceSet::default().clone_flags();
        assert_ne!(flags & libc::CLONE_NEWUTS, 0);
        assert_ne!(flags & libc::CLONE_NEWPID, 0);
        assert_ne!(flags & libc::CLONE_NEWNS, 0);
        assert_ne!(flags & libc::CLONE_NEWIPC, 0);
        assert_eq!(flags & libc::CLONE_NEWNET, 0);

        let with_net = NamespaceSet::default().with_net().clone_flags();
        assert_ne!(with_net & libc::CLONE_NEWNET, 0);
    }

    #[test]
    fn none_is_empty() {
        assert!(NamespaceSet::none().is_empty());
        assert!(!NamespaceSet::default().is_empty());
    }
}
