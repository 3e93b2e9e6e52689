//! Endpoint driver hooks.
//!
//! Concrete helper kinds (capture drivers, database helpers, …) share
//! one bridge engine and differ only in how they react to errors, which
//! extra commands they understand, and whether they want liveness
//! probing. Those capabilities live behind [`BridgeDriver`].

use std::time::Duration;

use crate::services::MessageLevel;

/// Liveness probe policy for an endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PingPolicy {
    /// Interval between outbound PINGs.
    pub interval: Duration,

    /// The endpoint fails once `now - last_pong` exceeds
    /// `interval * timeout_factor`.
    pub timeout_factor: u32,
}

impl Default for PingPolicy {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(5),
            timeout_factor: 3,
        }
    }
}

/// Behavior hooks implemented by a concrete endpoint driver.
///
/// All hooks have conservative defaults; a driver overrides only what it
/// needs. Hooks are invoked without the endpoint lock held and may call
/// back into the endpoint's send path.
pub trait BridgeDriver: Send + Sync + 'static {
    /// Called once with the terminal error before the endpoint is torn
    /// down.
    fn handle_error(&self, _message: &str) {}

    /// Offered every command the built-in dispatcher does not recognize.
    /// Return `true` when handled; unhandled commands are dropped
    /// silently so newer helpers keep working against older hosts.
    fn handle_unknown(&self, _command: &str, _seqno: u32, _content: &[u8]) -> bool {
        false
    }

    /// Intercept a helper log message before it reaches the message
    /// bus. Return `true` to swallow it.
    fn handle_message(&self, _text: &str, _level: MessageLevel) -> bool {
        false
    }

    /// Liveness policy; `None` disables the ping timer.
    fn ping_policy(&self) -> Option<PingPolicy> {
        None
    }
}

/// Driver with every hook at its default.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopDriver;

impl BridgeDriver for NoopDriver {}
