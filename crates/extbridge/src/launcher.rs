//! Helper binary resolution and launch.
//!
//! Helpers are standalone executables resolved against the host's
//! configured search paths and spawned with a dedicated pipe pair per
//! direction. The child is told its two descriptor numbers on the
//! command line:
//!
//! ```text
//! helper --in-fd=<read end> --out-fd=<write end> [args...]
//! ```
//!
//! The pipes are deliberately separate from stdio so helpers can keep
//! printing to the console while speaking the framed protocol.

use std::os::fd::{AsRawFd, OwnedFd};
use std::os::unix::fs::MetadataExt;
use std::path::{Path, PathBuf};

use nix::fcntl::{FcntlArg, OFlag, fcntl};
use nix::sys::signal::{SigSet, SigmaskHow, sigprocmask};
use nix::unistd::{Gid, close, getgid, getgroups, getuid, pipe};
use tokio::net::unix::pipe::{Receiver, Sender};
use tokio::process::{Child, Command};
use tracing::{debug, warn};

use crate::error::BridgeError;
use crate::services::ConfigStore;

/// A launched helper with the host-side pipe ends.
pub(crate) struct SpawnedHelper {
    /// Child process handle; waited on by the exit watcher.
    pub child: Child,
    /// OS pid recorded at spawn time.
    pub pid: u32,
    /// Host-side read end (helper output).
    pub reader: Receiver,
    /// Host-side write end (helper input).
    pub writer: Sender,
}

/// Resolve `binary` against the configured search paths.
///
/// An empty path list falls back to the `%B` install-dir token with a
/// warning. Directories are skipped; the first regular file with the
/// owner-execute bit wins.
///
/// # Errors
///
/// Returns [`BridgeError::HelperNotFound`] when no candidate matches.
pub(crate) fn resolve_helper(
    config: &dyn ConfigStore,
    binary: &str,
    warn_on_fallback: bool,
) -> Result<PathBuf, BridgeError> {
    let mut search_paths = config.helper_search_paths();

    if search_paths.is_empty() {
        if warn_on_fallback {
            warn!(
                "no helper_binary_path configured; falling back to the \
                 installation binary directory"
            );
        }
        search_paths.push("%B".to_owned());
    }

    for raw in search_paths {
        let candidate = config.expand_path(&raw).join(binary);

        let Ok(meta) = std::fs::metadata(&candidate) else {
            continue;
        };

        if meta.is_dir() {
            continue;
        }

        if meta.mode() & 0o100 != 0 {
            return Ok(candidate);
        }
    }

    Err(BridgeError::HelperNotFound {
        binary: binary.to_owned(),
    })
}

/// Verify the current process may actually execute `path`.
///
/// A binary that is not world-executable is still runnable when we own
/// it, run as root, or share its group (primary or supplementary). The
/// failure message carries the setgid group-membership guidance.
///
/// # Errors
///
/// Returns [`BridgeError::HelperNotRunnable`] when no ownership or
/// group path applies, [`BridgeError::SpawnFailed`] when the probe
/// itself fails.
pub(crate) fn probe_executable(path: &Path) -> Result<(), BridgeError> {
    let meta =
        std::fs::metadata(path).map_err(|err| BridgeError::SpawnFailed(err.to_string()))?;

    // World-executable: nothing to check.
    if meta.mode() & 0o001 != 0 {
        return Ok(());
    }

    let uid = getuid();
    if uid.is_root() || uid.as_raw() == meta.uid() {
        return Ok(());
    }

    if getgid().as_raw() == meta.gid() {
        return Ok(());
    }

    let groups = getgroups().map_err(|err| BridgeError::SpawnFailed(err.to_string()))?;
    if groups.contains(&Gid::from_raw(meta.gid())) {
        return Ok(());
    }

    Err(BridgeError::HelperNotRunnable {
        path: path.to_owned(),
    })
}

/// Spawn `path` with a fresh pipe pair per direction.
///
/// The child reads framed input from the `in` pair and writes framed
/// output to the `out` pair; its `pre_exec` hook unblocks all signals
/// (the host's runtime threads run with most of them masked) and closes
/// the host-side ends. Must be called from within a Tokio runtime.
///
/// # Errors
///
/// Returns [`BridgeError::PipeFailed`] when a pipe cannot be created
/// and [`BridgeError::SpawnFailed`] when the process cannot be spawned.
pub(crate) fn spawn_helper(path: &Path, args: &[String]) -> Result<SpawnedHelper, BridgeError> {
    // 'in' pair: host writes, child reads.
    let (child_in, host_in) = pipe().map_err(|err| BridgeError::PipeFailed(err.to_string()))?;
    // 'out' pair: child writes, host reads.
    let (host_out, child_out) = pipe().map_err(|err| BridgeError::PipeFailed(err.to_string()))?;

    let host_in_raw = host_in.as_raw_fd();
    let host_out_raw = host_out.as_raw_fd();

    let mut command = Command::new(path);
    command
        .arg(format!("--in-fd={}", child_in.as_raw_fd()))
        .arg(format!("--out-fd={}", child_out.as_raw_fd()))
        .args(args)
        .kill_on_drop(false);

    // SAFETY: the hook only performs async-signal-safe operations
    // (sigprocmask, close).
    unsafe {
        command.pre_exec(move || {
            sigprocmask(SigmaskHow::SIG_UNBLOCK, Some(&SigSet::all()), None)
                .map_err(std::io::Error::from)?;
            close(host_in_raw).map_err(std::io::Error::from)?;
            close(host_out_raw).map_err(std::io::Error::from)?;
            Ok(())
        });
    }

    let child = command
        .spawn()
        .map_err(|err| BridgeError::SpawnFailed(err.to_string()))?;

    let pid = child
        .id()
        .ok_or_else(|| BridgeError::SpawnFailed("helper exited before pid capture".to_owned()))?;

    // The child owns its copies now; drop ours.
    drop(child_in);
    drop(child_out);

    let reader = wrap_receiver(host_out)?;
    let writer = wrap_sender(host_in)?;

    debug!(pid, path = %path.display(), "helper launched");

    Ok(SpawnedHelper {
        child,
        pid,
        reader,
        writer,
    })
}

fn set_nonblocking(fd: &OwnedFd) -> nix::Result<()> {
    let flags = fcntl(fd.as_raw_fd(), FcntlArg::F_GETFL)?;
    let flags = OFlag::from_bits_truncate(flags) | OFlag::O_NONBLOCK;
    fcntl(fd.as_raw_fd(), FcntlArg::F_SETFL(flags))?;
    Ok(())
}

fn wrap_receiver(fd: OwnedFd) -> Result<Receiver, BridgeError> {
    set_nonblocking(&fd).map_err(|err| BridgeError::PipeFailed(err.to_string()))?;
    Receiver::from_owned_fd(fd).map_err(|err| BridgeError::PipeFailed(err.to_string()))
}

fn wrap_sender(fd: OwnedFd) -> Result<Sender, BridgeError> {
    set_nonblocking(&fd).map_err(|err| BridgeError::PipeFailed(err.to_string()))?;
    Sender::from_owned_fd(fd).map_err(|err| BridgeError::PipeFailed(err.to_string()))
}
