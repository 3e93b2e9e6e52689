//! Bridge error types.
//!
//! Every variant here is terminal for the endpoint that raises it: errors
//! route through the endpoint's error trigger, which logs once and tears
//! the endpoint down. There is no in-band recovery; the owner constructs
//! a new endpoint to retry.

use std::path::PathBuf;

use extbridge_core::ProtocolError;

/// Result alias for bridge operations.
pub type BridgeResult<T> = Result<T, BridgeError>;

/// Errors raised by the helper bridge.
#[derive(Debug, thiserror::Error)]
pub enum BridgeError {
    /// Frame-level or envelope-level protocol violation.
    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    /// A known command arrived with an unparsable sub-message.
    #[error("Invalid {0}")]
    UnparsableCommand(String),

    /// An `HTTPRESPONSE` referenced a proxy session that does not exist.
    #[error("HTTPRESPONSE for unknown proxy session {0}")]
    UnknownHttpSession(u32),

    /// The helper binary was not found in any configured search path.
    #[error("helper binary '{binary}' not found in any configured search path")]
    HelperNotFound {
        /// The binary that was searched for.
        binary: String,
    },

    /// The helper binary exists but the current process may not execute it.
    #[error(
        "cannot run helper binary '{path}': the host was installed setgid and you are not in \
         that group. If you were recently added to the group, log out and back in to activate \
         it; check your groups with the 'groups' command"
    )]
    HelperNotRunnable {
        /// Path of the rejected binary.
        path: PathBuf,
    },

    /// Forking/spawning the helper process failed.
    #[error("failed to launch helper: {0}")]
    SpawnFailed(String),

    /// Creating the stdio pipe pairs failed.
    #[error("could not create pipe: {0}")]
    PipeFailed(String),

    /// A transport write failed.
    #[error("write failure")]
    WriteFailure,

    /// The remote side closed the stream.
    #[error("External socket closed")]
    TransportClosed,

    /// A transport is already active on this endpoint.
    #[error("endpoint already has an active transport")]
    TransportBusy,

    /// The endpoint has been torn down and cannot be restarted.
    #[error("endpoint is closed")]
    EndpointClosed,

    /// The helper process exited with a failure status.
    #[error("helper process exited: {0}")]
    HelperExited(String),

    /// The remote side requested shutdown.
    #[error("Remote connection requesting shutdown: {0}")]
    RemoteShutdown(String),

    /// The helper stopped answering liveness probes.
    #[error("ping timeout")]
    PingTimeout,

    /// A send was attempted with no transport attached.
    #[error("no connections")]
    NoConnection,
}
