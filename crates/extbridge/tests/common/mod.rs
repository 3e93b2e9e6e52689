//! In-memory collaborator doubles and a duplex-stream harness for
//! driving a bridge endpoint from the helper's side of the wire.
#![allow(dead_code)]

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use bytes::{Bytes, BytesMut};
use extbridge::proto::FrameCodec;
use extbridge::proto::messages::Command;
use extbridge::{
    AuthRole, BridgeDriver, BusEvent, ChildRegistry, ConnectionError, EventBus, EventCallback,
    ExternalBridge, HttpConnection, HttpServer, MessageBus, MessageLevel, PingPolicy,
    RouteHandler, Services, StaticConfig,
};
use futures::{SinkExt, StreamExt};
use prost::Message;
use tokio::io::DuplexStream;
use tokio_util::codec::Framed;

/// Install a test subscriber once so `RUST_LOG` controls bridge output.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// Message bus double that records everything published.
#[derive(Default)]
pub struct RecordingBus {
    messages: Mutex<Vec<(MessageLevel, String)>>,
}

impl RecordingBus {
    pub fn messages(&self) -> Vec<(MessageLevel, String)> {
        self.messages.lock().unwrap().clone()
    }

    pub fn contains(&self, level: MessageLevel, fragment: &str) -> bool {
        self.messages()
            .iter()
            .any(|(l, text)| *l == level && text.contains(fragment))
    }
}

impl MessageBus for RecordingBus {
    fn publish(&self, level: MessageLevel, text: &str) {
        self.messages.lock().unwrap().push((level, text.to_owned()));
    }
}

/// Event bus double with working listener dispatch.
#[derive(Default)]
pub struct FakeEventBus {
    next_id: AtomicU64,
    listeners: Mutex<HashMap<u64, (String, EventCallback)>>,
    published: Mutex<Vec<BusEvent>>,
    removed: AtomicU64,
}

impl FakeEventBus {
    pub fn listener_count(&self) -> usize {
        self.listeners.lock().unwrap().len()
    }

    pub fn removed_count(&self) -> u64 {
        self.removed.load(Ordering::SeqCst)
    }

    pub fn published(&self) -> Vec<BusEvent> {
        self.published.lock().unwrap().clone()
    }

    /// Fire an event through all matching listeners, as the host bus
    /// would.
    pub fn emit(&self, event: &BusEvent) {
        let callbacks: Vec<EventCallback> = self
            .listeners
            .lock()
            .unwrap()
            .values()
            .filter(|(name, _)| *name == event.event_type)
            .map(|(_, cb)| cb.clone())
            .collect();
        for callback in callbacks {
            callback(event);
        }
    }
}

impl EventBus for FakeEventBus {
    fn register_listener(&self, event: &str, callback: EventCallback) -> u64 {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst) + 1;
        self.listeners
            .lock()
            .unwrap()
            .insert(id, (event.to_owned(), callback));
        id
    }

    fn remove_listener(&self, id: u64) {
        if self.listeners.lock().unwrap().remove(&id).is_some() {
            self.removed.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn publish(&self, event: BusEvent) {
        self.published.lock().unwrap().push(event);
    }
}

/// One registered route on the HTTP server double.
#[derive(Clone)]
pub struct RegisteredRoute {
    pub uri: String,
    pub method: String,
    pub role: AuthRole,
    pub handler: Arc<dyn RouteHandler>,
}

/// HTTP server double that stores routes and mints counted tokens.
#[derive(Default)]
pub struct FakeHttpServer {
    routes: Mutex<Vec<RegisteredRoute>>,
    minted: AtomicU64,
}

impl FakeHttpServer {
    pub fn route(&self, uri: &str) -> Option<RegisteredRoute> {
        self.routes
            .lock()
            .unwrap()
            .iter()
            .find(|r| r.uri == uri)
            .cloned()
    }

    pub fn route_count(&self) -> usize {
        self.routes.lock().unwrap().len()
    }

    /// Invoke the handler registered for `uri` on a worker task, as the
    /// host server would for an incoming request.
    pub fn drive(&self, uri: &str, connection: Arc<FakeConnection>) -> tokio::task::JoinHandle<()> {
        let route = self.route(uri).expect("route not registered");
        tokio::spawn(async move {
            route.handler.handle(connection).await;
        })
    }
}

impl HttpServer for FakeHttpServer {
    fn register_route(&self, uri: &str, method: &str, role: AuthRole, handler: Arc<dyn RouteHandler>) {
        self.routes.lock().unwrap().push(RegisteredRoute {
            uri: uri.to_owned(),
            method: method.to_owned(),
            role,
            handler,
        });
    }

    fn create_auth_token(&self, name: &str, _role: AuthRole) -> String {
        let n = self.minted.fetch_add(1, Ordering::SeqCst) + 1;
        format!("{name}-token-{n}")
    }
}

#[derive(Default)]
struct ConnectionState {
    headers: Vec<(String, String)>,
    status: Option<u16>,
    body: Vec<u8>,
    completed: bool,
    cancelled: bool,
    closure_cb: Option<Box<dyn FnOnce() + Send>>,
}

/// Connection double mimicking one in-flight host-server request.
pub struct FakeConnection {
    uri: String,
    verb: String,
    variables: BTreeMap<String, String>,
    state: Mutex<ConnectionState>,
}

impl FakeConnection {
    pub fn new(uri: &str, verb: &str, variables: &[(&str, &str)]) -> Arc<Self> {
        Arc::new(Self {
            uri: uri.to_owned(),
            verb: verb.to_owned(),
            variables: variables
                .iter()
                .map(|(k, v)| ((*k).to_owned(), (*v).to_owned()))
                .collect(),
            state: Mutex::new(ConnectionState::default()),
        })
    }

    pub fn status(&self) -> Option<u16> {
        self.state.lock().unwrap().status
    }

    pub fn headers(&self) -> Vec<(String, String)> {
        self.state.lock().unwrap().headers.clone()
    }

    pub fn body(&self) -> Vec<u8> {
        self.state.lock().unwrap().body.clone()
    }

    pub fn completed(&self) -> bool {
        self.state.lock().unwrap().completed
    }

    pub fn cancelled(&self) -> bool {
        self.state.lock().unwrap().cancelled
    }

    /// Simulate the client hanging up: fire the closure callback.
    pub fn trigger_close(&self) {
        let callback = self.state.lock().unwrap().closure_cb.take();
        if let Some(callback) = callback {
            callback();
        }
    }
}

impl HttpConnection for FakeConnection {
    fn uri(&self) -> String {
        self.uri.clone()
    }

    fn verb(&self) -> String {
        self.verb.clone()
    }

    fn variables(&self) -> BTreeMap<String, String> {
        self.variables.clone()
    }

    fn append_header(&self, name: &str, value: &str) -> Result<(), ConnectionError> {
        let mut state = self.state.lock().unwrap();
        if state.completed {
            return Err(ConnectionError("response already completed".to_owned()));
        }
        state.headers.push((name.to_owned(), value.to_owned()));
        Ok(())
    }

    fn set_status(&self, status: u16) -> Result<(), ConnectionError> {
        let mut state = self.state.lock().unwrap();
        if state.completed {
            return Err(ConnectionError("response already completed".to_owned()));
        }
        // First status wins; later assignments are no-ops.
        if state.status.is_none() {
            state.status = Some(status);
        }
        Ok(())
    }

    fn put_data(&self, data: &[u8]) {
        self.state.lock().unwrap().body.extend_from_slice(data);
    }

    fn complete(&self) {
        self.state.lock().unwrap().completed = true;
    }

    fn cancel(&self) {
        self.state.lock().unwrap().cancelled = true;
    }

    fn set_closure_cb(&self, callback: Box<dyn FnOnce() + Send>) {
        self.state.lock().unwrap().closure_cb = Some(callback);
    }
}

/// Driver double recording terminal errors; optionally with a liveness
/// policy.
#[derive(Default)]
pub struct RecordingDriver {
    errors: Arc<Mutex<Vec<String>>>,
    ping: Option<PingPolicy>,
}

impl RecordingDriver {
    pub fn with_ping(policy: PingPolicy) -> Self {
        Self {
            errors: Arc::new(Mutex::new(Vec::new())),
            ping: Some(policy),
        }
    }

    pub fn errors_handle(&self) -> Arc<Mutex<Vec<String>>> {
        self.errors.clone()
    }
}

impl BridgeDriver for RecordingDriver {
    fn handle_error(&self, message: &str) {
        self.errors.lock().unwrap().push(message.to_owned());
    }

    fn ping_policy(&self) -> Option<PingPolicy> {
        self.ping
    }
}

/// The host side of a test endpoint: the bridge plus handles to every
/// collaborator double.
pub struct TestHost {
    pub bridge: ExternalBridge,
    pub msgbus: Arc<RecordingBus>,
    pub eventbus: Arc<FakeEventBus>,
    pub http: Arc<FakeHttpServer>,
    pub registry: Arc<ChildRegistry>,
    pub errors: Arc<Mutex<Vec<String>>>,
}

impl TestHost {
    pub fn error_count(&self) -> usize {
        self.errors.lock().unwrap().len()
    }
}

/// The helper's side of the wire: a framed view of the duplex stream.
pub struct Helper {
    framed: Framed<DuplexStream, FrameCodec>,
}

impl Helper {
    pub fn new(stream: DuplexStream) -> Self {
        Self {
            framed: Framed::new(stream, FrameCodec::new()),
        }
    }

    /// Send one command with an explicit seqno.
    pub async fn send<M: Message>(&mut self, command_tag: &str, seqno: u32, body: &M) {
        let mut command = Command::with_body(command_tag, body);
        command.seqno = seqno;
        self.framed
            .send(Bytes::from(command.encode_to_vec()))
            .await
            .expect("helper send failed");
    }

    /// Send a fully caller-built envelope (for malformed-content
    /// scenarios).
    pub async fn send_command(&mut self, command: Command) {
        self.framed
            .send(Bytes::from(command.encode_to_vec()))
            .await
            .expect("helper send failed");
    }

    /// Send raw pre-framed bytes (for corruption scenarios).
    pub async fn send_raw(&mut self, bytes: Bytes) {
        use tokio::io::AsyncWriteExt;
        self.framed
            .get_mut()
            .write_all(&bytes)
            .await
            .expect("helper raw send failed");
    }

    /// Receive the next command from the host, with a test timeout.
    pub async fn recv(&mut self) -> Command {
        let frame = tokio::time::timeout(Duration::from_secs(5), self.framed.next())
            .await
            .expect("timed out waiting for a host frame")
            .expect("host stream closed")
            .expect("host frame failed to decode");
        Command::decode(frame.as_ref()).expect("host sent an unparsable envelope")
    }

    /// Receive the next command if one arrives within `wait`.
    pub async fn try_recv(&mut self, wait: Duration) -> Option<Command> {
        let frame = tokio::time::timeout(wait, self.framed.next()).await.ok()??;
        let frame = frame.expect("host frame failed to decode");
        Some(Command::decode(frame.as_ref()).expect("host sent an unparsable envelope"))
    }

    /// Expect the host to close the stream.
    pub async fn expect_eof(&mut self) {
        let next = tokio::time::timeout(Duration::from_secs(5), self.framed.next())
            .await
            .expect("timed out waiting for host EOF");
        assert!(next.is_none(), "expected EOF, got a frame");
    }
}

/// Build one well-formed frame for `command`.
pub fn frame_bytes(command: &Command) -> BytesMut {
    use tokio_util::codec::Encoder;
    let mut buf = BytesMut::new();
    FrameCodec::new()
        .encode(command.encode_to_vec().as_slice(), &mut buf)
        .expect("frame encode failed");
    buf
}

/// Build a bridge over an in-memory duplex stream, attached and
/// running, with a recording driver.
pub fn attached_host() -> (TestHost, Helper) {
    attached_host_with_driver(RecordingDriver::default())
}

/// Same as [`attached_host`] with a custom recording driver (e.g. one
/// carrying a liveness policy).
pub fn attached_host_with_driver(driver: RecordingDriver) -> (TestHost, Helper) {
    init_tracing();

    let msgbus = Arc::new(RecordingBus::default());
    let eventbus = Arc::new(FakeEventBus::default());
    let http = Arc::new(FakeHttpServer::default());
    let registry = Arc::new(ChildRegistry::new());
    let errors = driver.errors_handle();

    let services = Services {
        config: Arc::new(StaticConfig {
            search_paths: vec![],
            bin_dir: std::env::temp_dir(),
        }),
        message_bus: msgbus.clone(),
        event_bus: eventbus.clone(),
        http_server: http.clone(),
        ipc_registry: registry.clone(),
    };

    let bridge = ExternalBridge::with_driver(services, Box::new(driver));

    let (host_side, helper_side) = tokio::io::duplex(64 * 1024);
    bridge.attach_stream(host_side).expect("attach failed");

    (
        TestHost {
            bridge,
            msgbus,
            eventbus,
            http,
            registry,
            errors,
        },
        Helper::new(helper_side),
    )
}

/// Poll `predicate` until it holds or the test deadline passes.
pub async fn wait_until(what: &str, predicate: impl Fn() -> bool) {
    let deadline = std::time::Instant::now() + Duration::from_secs(5);
    while !predicate() {
        assert!(
            std::time::Instant::now() < deadline,
            "timed out waiting for: {what}"
        );
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

/// Services wired entirely to doubles, for tests that launch real
/// helper children.
pub fn spawn_services(search_paths: Vec<String>) -> (Services, Arc<ChildRegistry>, Arc<RecordingBus>) {
    init_tracing();

    let msgbus = Arc::new(RecordingBus::default());
    let registry = Arc::new(ChildRegistry::new());
    let services = Services {
        config: Arc::new(StaticConfig {
            search_paths,
            bin_dir: std::env::temp_dir(),
        }),
        message_bus: msgbus.clone(),
        event_bus: Arc::new(FakeEventBus::default()),
        http_server: Arc::new(FakeHttpServer::default()),
        ipc_registry: registry.clone(),
    };
    (services, registry, msgbus)
}
