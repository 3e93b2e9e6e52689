//! Process-wide registry of live helper children.
//!
//! Every spawned helper pid is registered here so that host-wide
//! teardown can reap children whose endpoints never got the chance to
//! close cleanly.

use std::collections::HashSet;
use std::sync::Mutex;

use nix::sys::signal::{Signal, kill};
use nix::unistd::Pid;
use tracing::{debug, warn};

/// The host's registry of live helper children.
pub trait IpcRegistry: Send + Sync {
    /// Record a live child pid.
    fn register(&self, pid: u32);

    /// Forget a child pid, normally at endpoint teardown or child exit.
    fn remove(&self, pid: u32);
}

/// Default [`IpcRegistry`] backed by an in-memory pid table.
#[derive(Debug, Default)]
pub struct ChildRegistry {
    pids: Mutex<HashSet<u32>>,
}

impl ChildRegistry {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of currently tracked children.
    ///
    /// # Panics
    ///
    /// Panics if the registry mutex is poisoned.
    #[must_use]
    pub fn len(&self) -> usize {
        self.pids.lock().expect("lock poisoned").len()
    }

    /// True when no children are tracked.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Hard-kill every tracked child. Intended for host-wide teardown
    /// after all endpoints are closed.
    ///
    /// # Panics
    ///
    /// Panics if the registry mutex is poisoned.
    pub fn kill_all(&self) {
        let pids: Vec<u32> = self.pids.lock().expect("lock poisoned").drain().collect();
        for pid in pids {
            debug!(pid, "killing leftover helper child");
            if let Err(err) = kill(Pid::from_raw(pid as i32), Signal::SIGKILL) {
                warn!(pid, %err, "could not deliver SIGKILL to helper child");
            }
        }
    }
}

impl IpcRegistry for ChildRegistry {
    fn register(&self, pid: u32) {
        self.pids.lock().expect("lock poisoned").insert(pid);
    }

    fn remove(&self, pid: u32) {
        self.pids.lock().expect("lock poisoned").remove(&pid);
    }
}
