//! Collaborator interfaces consumed by the bridge.
//!
//! The bridge does not own a configuration store, a message bus, an event
//! bus, an HTTP server, or a child-process registry; the host process
//! does. Each appears here as a dependency-injected trait so endpoints
//! can be driven against the real host subsystems in production and
//! against in-memory doubles in tests.
//!
//! # Lifecycle
//!
//! Collaborators must be constructed before the first endpoint and must
//! outlive every endpoint; the registry's kill sweep runs after all
//! endpoints are closed.

pub mod registry;

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

pub use registry::{ChildRegistry, IpcRegistry};

/// Well-known content field under which a remote-published JSON payload
/// is attached to a bus event.
pub const EVENT_CONTENT_FIELD: &str = "eventbus.event_json";

/// Severity of an operator-visible message.
///
/// The discriminants mirror the wire-level message flags.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MessageLevel {
    /// Developer diagnostics.
    Debug,
    /// Operator information.
    Info,
    /// Recoverable error.
    Error,
    /// Operator alert.
    Alert,
    /// Unrecoverable error.
    Fatal,
}

impl MessageLevel {
    /// Map a wire-level message flag to a level; unknown flags degrade
    /// to [`MessageLevel::Info`].
    #[must_use]
    pub const fn from_wire(flag: i32) -> Self {
        match flag {
            1 => Self::Debug,
            4 => Self::Error,
            8 => Self::Alert,
            16 => Self::Fatal,
            _ => Self::Info,
        }
    }

    /// The wire-level flag for this level.
    #[must_use]
    pub const fn as_wire(self) -> i32 {
        match self {
            Self::Debug => 1,
            Self::Info => 2,
            Self::Error => 4,
            Self::Alert => 8,
            Self::Fatal => 16,
        }
    }
}

/// The host's configuration store, as consumed by the bridge.
pub trait ConfigStore: Send + Sync {
    /// The configured helper search paths (the repeatable
    /// `helper_binary_path` key), in priority order. May be empty.
    fn helper_search_paths(&self) -> Vec<String>;

    /// Expand a raw search path, resolving the `%B` token to the host's
    /// installation binary directory.
    fn expand_path(&self, raw: &str) -> PathBuf;
}

/// A static [`ConfigStore`] suitable for embedding hosts and tests.
#[derive(Debug, Clone)]
pub struct StaticConfig {
    /// Raw search paths, as the `helper_binary_path` key would carry them.
    pub search_paths: Vec<String>,
    /// Directory substituted for the `%B` token.
    pub bin_dir: PathBuf,
}

impl ConfigStore for StaticConfig {
    fn helper_search_paths(&self) -> Vec<String> {
        self.search_paths.clone()
    }

    fn expand_path(&self, raw: &str) -> PathBuf {
        if raw == "%B" {
            self.bin_dir.clone()
        } else {
            PathBuf::from(raw.replace("%B", &self.bin_dir.to_string_lossy()))
        }
    }
}

/// The host's message bus: an operator-visible logging sink.
pub trait MessageBus: Send + Sync {
    /// Publish one message at the given level.
    fn publish(&self, level: MessageLevel, text: &str);
}

/// Default [`MessageBus`] that routes to `tracing`.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingMessageBus;

impl MessageBus for TracingMessageBus {
    fn publish(&self, level: MessageLevel, text: &str) {
        match level {
            MessageLevel::Debug => tracing::debug!(target: "extbridge::msgbus", "{text}"),
            MessageLevel::Info => tracing::info!(target: "extbridge::msgbus", "{text}"),
            MessageLevel::Error | MessageLevel::Fatal => {
                tracing::error!(target: "extbridge::msgbus", "{text}");
            }
            MessageLevel::Alert => tracing::warn!(target: "extbridge::msgbus", "{text}"),
        }
    }
}

/// An event on the host's event bus.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BusEvent {
    /// Event type, also the subscription key.
    pub event_type: String,

    /// String-keyed event content.
    pub content: BTreeMap<String, serde_json::Value>,
}

impl BusEvent {
    /// Create an empty event of the given type.
    #[must_use]
    pub fn new(event_type: impl Into<String>) -> Self {
        Self {
            event_type: event_type.into(),
            content: BTreeMap::new(),
        }
    }

    /// Create an event carrying a raw JSON payload under
    /// [`EVENT_CONTENT_FIELD`].
    #[must_use]
    pub fn with_json_content(event_type: impl Into<String>, json: impl Into<String>) -> Self {
        let mut content = BTreeMap::new();
        content.insert(
            EVENT_CONTENT_FIELD.to_owned(),
            serde_json::Value::String(json.into()),
        );
        Self {
            event_type: event_type.into(),
            content,
        }
    }
}

/// Callback invoked for each event a listener matches.
pub type EventCallback = Arc<dyn Fn(&BusEvent) + Send + Sync>;

/// The host's event bus, as consumed by the bridge.
pub trait EventBus: Send + Sync {
    /// Register a listener for the named event; returns an opaque
    /// listener id.
    fn register_listener(&self, event: &str, callback: EventCallback) -> u64;

    /// Remove a previously registered listener.
    fn remove_listener(&self, id: u64);

    /// Publish an event to all matching listeners.
    fn publish(&self, event: BusEvent);
}

/// Authorization role attached to a registered route or minted token.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AuthRole {
    /// An authenticated logon session.
    Logon,
}

/// Error raised by a connection mutation the host server rejected.
#[derive(Debug, thiserror::Error)]
#[error("{0}")]
pub struct ConnectionError(pub String);

/// Handler bound to a registered route; invoked once per request.
#[async_trait]
pub trait RouteHandler: Send + Sync {
    /// Serve one request. The connection remains valid until this
    /// returns.
    async fn handle(&self, connection: Arc<dyn HttpConnection>);
}

/// The host's HTTP server, as consumed by the bridge.
pub trait HttpServer: Send + Sync {
    /// Bind `handler` to `(uri, method)` under the given role.
    fn register_route(&self, uri: &str, method: &str, role: AuthRole, handler: Arc<dyn RouteHandler>);

    /// Mint an auth token bound to `name` under the given role.
    fn create_auth_token(&self, name: &str, role: AuthRole) -> String;
}

/// One in-flight connection of the host's HTTP server.
///
/// Headers must be appended before any body bytes are pushed. A second
/// status assignment is a no-op (first one wins).
pub trait HttpConnection: Send + Sync {
    /// Request URI.
    fn uri(&self) -> String;

    /// Request verb, e.g. `"GET"`.
    fn verb(&self) -> String;

    /// Request variables (query/post), in connection order.
    fn variables(&self) -> BTreeMap<String, String>;

    /// Append a response header.
    ///
    /// # Errors
    ///
    /// Fails if the response head has already been committed.
    fn append_header(&self, name: &str, value: &str) -> Result<(), ConnectionError>;

    /// Set the response status code.
    ///
    /// # Errors
    ///
    /// Fails if the response head has already been committed.
    fn set_status(&self, status: u16) -> Result<(), ConnectionError>;

    /// Push bytes onto the streaming response body.
    fn put_data(&self, data: &[u8]);

    /// Complete the response stream normally.
    fn complete(&self);

    /// Cancel the response stream, failing the client request.
    fn cancel(&self);

    /// Install a callback fired when the client side closes the
    /// connection.
    fn set_closure_cb(&self, callback: Box<dyn FnOnce() + Send>);
}

/// Bundle of collaborator handles injected into every endpoint.
#[derive(Clone)]
pub struct Services {
    /// Configuration store.
    pub config: Arc<dyn ConfigStore>,
    /// Operator message sink.
    pub message_bus: Arc<dyn MessageBus>,
    /// Event bus.
    pub event_bus: Arc<dyn EventBus>,
    /// HTTP server.
    pub http_server: Arc<dyn HttpServer>,
    /// Process-wide child registry.
    pub ipc_registry: Arc<dyn IpcRegistry>,
}
