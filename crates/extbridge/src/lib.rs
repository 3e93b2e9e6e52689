//! Host-side bridge to out-of-process helper programs.
//!
//! A bridge endpoint owns one bidirectional byte stream to a helper
//! (a child process spawned with a dedicated pipe pair, a pre-connected
//! duplex stream, or a stream whose writes are delegated to an external
//! callback) and multiplexes the built-in command set over it:
//! liveness probes, operator messages, remote shutdown, event-bus
//! subscriptions in both directions, and an HTTP proxy that parks host
//! web requests while the helper streams responses back.
//!
//! # Architecture
//!
//! ```text
//! ┌───────────────┐   frames    ┌──────────────┐   commands   ┌────────────────┐
//! │   Transport   │────────────▶│  Dispatcher  │─────────────▶│ Built-in + driver │
//! │ (pipe/stream) │◀────────────│  send path   │◀─────────────│    handlers     │
//! └───────────────┘             └──────────────┘              └────────────────┘
//!        ▲                                                          │
//!        │            collaborator seams (config, message bus,      │
//!        └────────────  event bus, HTTP server, child registry) ◀───┘
//! ```
//!
//! # Module Overview
//!
//! - [`bridge`]: the endpoint engine ([`ExternalBridge`])
//! - [`driver`]: per-endpoint behavior hooks ([`BridgeDriver`])
//! - [`error`]: terminal error catalog ([`BridgeError`])
//! - [`services`]: dependency-injected host collaborators
//!
//! The wire protocol itself (framing, command envelope, sub-messages)
//! lives in [`extbridge_core`], re-exported here as [`proto`].
//!
//! # Failure model
//!
//! Every error is terminal for its endpoint: the first transport
//! failure, framing violation, unparsable command, liveness timeout, or
//! remote shutdown runs the driver's error hook once and tears the
//! endpoint down. Owners construct a fresh endpoint to retry.

pub mod bridge;
pub mod driver;
pub mod error;
pub mod services;

mod http_proxy;
mod launcher;
mod transport;

/// The wire protocol crate.
pub use extbridge_core as proto;

pub use bridge::ExternalBridge;
pub use driver::{BridgeDriver, NoopDriver, PingPolicy};
pub use error::{BridgeError, BridgeResult};
pub use services::{
    AuthRole, BusEvent, ChildRegistry, ConfigStore, ConnectionError, EVENT_CONTENT_FIELD,
    EventBus, EventCallback, HttpConnection, HttpServer, IpcRegistry, MessageBus, MessageLevel,
    RouteHandler, Services, StaticConfig, TracingMessageBus,
};
pub use transport::WriteCallback;
