//! The endpoint engine.
//!
//! An [`ExternalBridge`] binds exactly one transport (a spawned helper
//! child, a pre-connected duplex stream, or a delegated write callback)
//! and runs the command protocol over it: seqno assignment on the send
//! path, dispatch of inbound envelopes to the built-in handlers, the
//! optional liveness timer, and full resource teardown on the first
//! terminal error.
//!
//! # Locking
//!
//! One endpoint-scoped mutex guards all mutable state. It is held only
//! for short, non-blocking sections and never across `.await`;
//! collaborator callbacks and driver hooks are invoked with the lock
//! dropped.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex, Weak};
use std::time::Instant;

use bytes::BytesMut;
use extbridge_core::messages::{
    Command, EventbusEvent, EventbusPublishEvent, EventbusRegisterListener, ExternalShutdown,
    HttpAuthToken, HttpAuthTokenRequest, HttpRegisterUri, HttpRequest, HttpResponse, MsgbusMessage,
    Ping, Pong, SubHttpVariableData, tag,
};
use extbridge_core::{FrameCodec, ProtocolError};
use nix::sys::signal::{Signal, kill};
use nix::unistd::Pid;
use prost::Message;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::task::JoinHandle;
use tokio_util::codec::{Decoder, Encoder};
use tracing::{debug, error, warn};

use crate::driver::{BridgeDriver, NoopDriver};
use crate::error::BridgeError;
use crate::http_proxy::{self, HttpSession, SessionOutcome};
use crate::launcher;
use crate::services::{AuthRole, BusEvent, MessageLevel, Services};
use crate::transport::{self, DynReader, DynWriter, WriteCallback, WriteSink};

const LOCK_POISONED: &str = "lock poisoned";

/// One bridge endpoint, bound to at most one helper transport.
///
/// Dropping the bridge tears the endpoint down: the spawned helper (if
/// any) is hard-killed, parked HTTP sessions are failed, and all
/// transport tasks are cancelled.
pub struct ExternalBridge {
    inner: Arc<BridgeInner>,
}

/// Shared engine state; tasks and nested resources hold weak references
/// to it so the owner's handle controls the endpoint's lifetime.
pub(crate) struct BridgeInner {
    pub(crate) services: Services,
    pub(crate) driver: Box<dyn BridgeDriver>,
    pub(crate) state: Mutex<BridgeState>,
}

/// Mutable endpoint state, guarded by the endpoint mutex.
pub(crate) struct BridgeState {
    /// No new I/O may start while true.
    pub(crate) stopped: bool,
    /// Sticky teardown marker; a cancelled endpoint cannot be restarted.
    pub(crate) cancelled: bool,

    /// Last assigned outbound sequence number; wraps past `u32::MAX`
    /// skipping the reserved 0.
    seqno: u32,

    /// Timestamp of the most recent PONG, for the liveness timer.
    last_pong: Instant,

    /// Helper binary name and arguments for `run_ipc`.
    helper_binary: String,
    helper_args: Vec<String>,

    /// Active outbound sink.
    sink: WriteSink,

    /// Ingress accumulation for the delegated (externally driven) mode.
    ingest_buf: BytesMut,
    ingest_codec: FrameCodec,

    /// Parked proxy sessions by request id.
    pub(crate) http_sessions: HashMap<u32, HttpSession>,
    /// Next proxy request id; independent of `seqno`.
    pub(crate) http_session_id: u32,

    /// Event-bus listener ids by event name.
    eventbus_listeners: HashMap<String, u64>,

    /// Pid of the spawned helper, when transport is a child process.
    child_pid: Option<u32>,

    reader_task: Option<JoinHandle<()>>,
    writer_task: Option<JoinHandle<()>>,
    ping_task: Option<JoinHandle<()>>,
}

impl ExternalBridge {
    /// Create an endpoint with default driver hooks.
    #[must_use]
    pub fn new(services: Services) -> Self {
        Self::with_driver(services, Box::new(NoopDriver))
    }

    /// Create an endpoint with custom driver hooks.
    #[must_use]
    pub fn with_driver(services: Services, driver: Box<dyn BridgeDriver>) -> Self {
        Self {
            inner: Arc::new(BridgeInner {
                services,
                driver,
                state: Mutex::new(BridgeState {
                    stopped: true,
                    cancelled: false,
                    seqno: 0,
                    last_pong: Instant::now(),
                    helper_binary: String::new(),
                    helper_args: Vec::new(),
                    sink: WriteSink::None,
                    ingest_buf: BytesMut::new(),
                    ingest_codec: FrameCodec::new(),
                    http_sessions: HashMap::new(),
                    http_session_id: 0,
                    eventbus_listeners: HashMap::new(),
                    child_pid: None,
                    reader_task: None,
                    writer_task: None,
                    ping_task: None,
                }),
            }),
        }
    }

    /// Configure the helper binary and arguments used by [`run_ipc`].
    ///
    /// [`run_ipc`]: ExternalBridge::run_ipc
    pub fn set_helper(&self, binary: impl Into<String>, args: Vec<String>) {
        let mut state = self.inner.state.lock().expect(LOCK_POISONED);
        state.helper_binary = binary.into();
        state.helper_args = args;
    }

    /// Check whether `binary` resolves to an executable helper in the
    /// configured search paths, without launching it.
    #[must_use]
    pub fn check_helper(&self, binary: &str) -> bool {
        launcher::resolve_helper(&*self.inner.services.config, binary, false).is_ok()
    }

    /// Resolve, permission-check, and launch the configured helper,
    /// binding this endpoint to its pipe pair.
    ///
    /// Must be called from within a Tokio runtime.
    ///
    /// # Errors
    ///
    /// Fails without touching endpoint state when a transport is already
    /// active ([`BridgeError::TransportBusy`]), the endpoint was already
    /// torn down ([`BridgeError::EndpointClosed`]), or resolution,
    /// permission probing, or the spawn itself fails.
    pub fn run_ipc(&self) -> Result<(), BridgeError> {
        let inner = &self.inner;
        let mut state = inner.state.lock().expect(LOCK_POISONED);

        if state.cancelled {
            return Err(BridgeError::EndpointClosed);
        }
        if state.child_pid.is_some() || state.sink.is_active() {
            return Err(BridgeError::TransportBusy);
        }
        if state.helper_binary.is_empty() {
            return Err(BridgeError::SpawnFailed(
                "no helper binary configured".to_owned(),
            ));
        }

        state.stopped = true;
        state.ingest_buf.clear();

        let binary = state.helper_binary.clone();
        let args = state.helper_args.clone();

        let path = launcher::resolve_helper(&*inner.services.config, &binary, true)?;
        launcher::probe_executable(&path)?;
        let spawned = launcher::spawn_helper(&path, &args)?;

        let pid = spawned.pid;
        state.child_pid = Some(pid);
        inner.install_transport(
            &mut state,
            Box::new(spawned.reader),
            Box::new(spawned.writer),
        );
        drop(state);

        inner.services.ipc_registry.register(pid);
        inner.spawn_exit_watcher(spawned.child, pid);
        inner.start_ping_timer();

        Ok(())
    }

    /// Bind this endpoint to a pre-connected duplex stream.
    ///
    /// Must be called from within a Tokio runtime.
    ///
    /// # Errors
    ///
    /// Fails without touching endpoint state when a helper child or
    /// another transport is already active, or the endpoint was already
    /// torn down.
    pub fn attach_stream<S>(&self, stream: S) -> Result<(), BridgeError>
    where
        S: AsyncRead + AsyncWrite + Send + 'static,
    {
        let inner = &self.inner;
        let mut state = inner.state.lock().expect(LOCK_POISONED);

        if state.cancelled {
            return Err(BridgeError::EndpointClosed);
        }
        if state.child_pid.is_some() || state.sink.is_active() {
            return Err(BridgeError::TransportBusy);
        }

        state.stopped = true;
        state.ingest_buf.clear();

        let (read_half, write_half) = tokio::io::split(stream);
        inner.install_transport(&mut state, Box::new(read_half), Box::new(write_half));
        drop(state);

        inner.start_ping_timer();

        Ok(())
    }

    /// Delegate outbound writes to an external callback.
    ///
    /// In this mode the owner of the underlying stream drives the
    /// inbound side by handing buffered bytes to [`ingest`].
    ///
    /// [`ingest`]: ExternalBridge::ingest
    ///
    /// # Errors
    ///
    /// Fails when another transport is already active or the endpoint
    /// was already torn down.
    pub fn set_write_callback(&self, callback: WriteCallback) -> Result<(), BridgeError> {
        let mut state = self.inner.state.lock().expect(LOCK_POISONED);

        if state.cancelled {
            return Err(BridgeError::EndpointClosed);
        }
        if state.child_pid.is_some() || state.sink.is_active() {
            return Err(BridgeError::TransportBusy);
        }

        state.sink = WriteSink::Callback(callback);
        state.ingest_buf.clear();
        state.stopped = false;
        state.last_pong = Instant::now();

        Ok(())
    }

    /// Hand externally read bytes to the decode loop (delegated mode).
    ///
    /// Complete frames are dispatched in order; a framing violation
    /// tears the endpoint down. Bytes arriving after teardown are
    /// ignored.
    pub fn ingest(&self, data: &[u8]) {
        self.inner.ingest(data);
    }

    /// True while the endpoint is bound to a live transport.
    #[must_use]
    pub fn is_running(&self) -> bool {
        let state = self.inner.state.lock().expect(LOCK_POISONED);
        !state.stopped && !state.cancelled
    }

    /// Pid of the spawned helper child, when one is running.
    #[must_use]
    pub fn child_pid(&self) -> Option<u32> {
        self.inner.state.lock().expect(LOCK_POISONED).child_pid
    }

    /// Number of currently parked HTTP proxy sessions.
    #[must_use]
    pub fn active_http_sessions(&self) -> usize {
        self.inner.state.lock().expect(LOCK_POISONED).http_sessions.len()
    }

    /// Tear the endpoint down: fail parked sessions, drop listeners and
    /// timers, close the transport, hard-kill the helper.
    pub fn close(&self) {
        self.inner.close_external();
    }

    /// Close the pipe pair and deliver SIGTERM to the helper child.
    pub fn ipc_soft_kill(&self) {
        self.inner.kill_child(Signal::SIGTERM);
    }

    /// Close the pipe pair and deliver SIGKILL to the helper child.
    pub fn ipc_hard_kill(&self) {
        self.inner.kill_child(Signal::SIGKILL);
    }

    /// Send a caller-built command envelope. A zero `seqno` is assigned
    /// on the way out. Returns the transmitted seqno, or 0 on failure.
    ///
    /// This is the extension point for drivers speaking commands beyond
    /// the built-in set.
    pub fn send_command(&self, command: Command) -> u32 {
        self.inner.send(command)
    }

    /// Send a liveness probe.
    pub fn send_ping(&self) -> u32 {
        self.inner.send_ping()
    }

    /// Ask the remote side to shut down.
    pub fn send_shutdown(&self, reason: &str) -> u32 {
        let body = ExternalShutdown {
            reason: Some(reason.to_owned()),
        };
        self.inner.send(Command::with_body(tag::SHUTDOWN, &body))
    }

    /// Forward a host event to the helper as an `EVENT` command.
    pub fn proxy_event(&self, event: &BusEvent) {
        self.inner.proxy_event(event);
    }
}

impl Drop for ExternalBridge {
    fn drop(&mut self) {
        self.inner.close_external();
    }
}

impl BridgeInner {
    /// Install reader/writer tasks for a stream transport and mark the
    /// endpoint running. Called with the state lock held.
    fn install_transport(self: &Arc<Self>, state: &mut BridgeState, reader: DynReader, writer: DynWriter) {
        let weak = Arc::downgrade(self);
        let on_write_error = {
            let weak = weak.clone();
            move || {
                if let Some(inner) = weak.upgrade() {
                    inner.trigger_error(&BridgeError::WriteFailure);
                }
            }
        };
        let (write_tx, writer_task) = transport::spawn_writer(writer, on_write_error);

        let on_frame = {
            let weak = weak.clone();
            move |frame: bytes::Bytes| match weak.upgrade() {
                Some(inner) => {
                    inner.dispatch_frame(&frame);
                    true
                }
                None => false,
            }
        };
        let on_close = move |reason: Option<ProtocolError>| {
            let Some(inner) = weak.upgrade() else {
                return;
            };
            match reason {
                None => {
                    // EOF is routine at helper exit; keep it quiet.
                    debug!("external stream closed");
                    inner.trigger_error(&BridgeError::TransportClosed);
                }
                Some(err) => {
                    error!(%err, "external transport read error");
                    let err = BridgeError::from(err);
                    inner.trigger_error(&err);
                }
            }
        };
        let reader_task = transport::spawn_reader(reader, on_frame, on_close);

        state.sink = WriteSink::Task(write_tx);
        state.reader_task = Some(reader_task);
        state.writer_task = Some(writer_task);
        state.stopped = false;
        state.cancelled = false;
        state.last_pong = Instant::now();
    }

    /// Watch for helper exit: clean exits close the endpoint, failures
    /// raise an error. Either way the pid leaves the registry.
    fn spawn_exit_watcher(self: &Arc<Self>, mut child: tokio::process::Child, pid: u32) {
        let weak = Arc::downgrade(self);
        tokio::spawn(async move {
            let status = child.wait().await;
            let Some(inner) = weak.upgrade() else {
                return;
            };

            inner.services.ipc_registry.remove(pid);
            inner.state.lock().expect(LOCK_POISONED).child_pid = None;

            match status {
                Ok(status) if status.success() => {
                    debug!(pid, "helper exited cleanly");
                    inner.close_external();
                }
                Ok(status) => {
                    inner.trigger_error(&BridgeError::HelperExited(status.to_string()));
                }
                Err(err) => {
                    inner.trigger_error(&BridgeError::HelperExited(err.to_string()));
                }
            }
        });
    }

    /// Start the liveness timer when the driver asks for one.
    fn start_ping_timer(self: &Arc<Self>) {
        let Some(policy) = self.driver.ping_policy() else {
            return;
        };

        let weak = Arc::downgrade(self);
        let handle = tokio::spawn(async move {
            let mut interval = tokio::time::interval(policy.interval);
            // The immediate first tick; the probe cadence starts one
            // interval from now.
            interval.tick().await;

            loop {
                interval.tick().await;
                let Some(inner) = weak.upgrade() else {
                    return;
                };

                let timed_out = {
                    let state = inner.state.lock().expect(LOCK_POISONED);
                    if state.stopped {
                        return;
                    }
                    state.last_pong.elapsed() > policy.interval * policy.timeout_factor
                };

                if timed_out {
                    inner.trigger_error(&BridgeError::PingTimeout);
                    return;
                }

                inner.send_ping();
            }
        });

        self.state.lock().expect(LOCK_POISONED).ping_task = Some(handle);
    }

    /// Decode loop for externally supplied bytes (delegated mode).
    fn ingest(self: &Arc<Self>, data: &[u8]) {
        let mut frames = Vec::new();
        let failure = {
            let mut state = self.state.lock().expect(LOCK_POISONED);
            if state.stopped {
                return;
            }
            state.ingest_buf.extend_from_slice(data);

            loop {
                // Disjoint borrows of the codec and its buffer.
                let BridgeState {
                    ingest_codec,
                    ingest_buf,
                    ..
                } = &mut *state;
                match ingest_codec.decode(ingest_buf) {
                    Ok(Some(frame)) => frames.push(frame),
                    Ok(None) => break None,
                    Err(err) => break Some(err),
                }
            }
        };

        for frame in frames {
            self.dispatch_frame(&frame);
        }

        if let Some(err) = failure {
            error!(%err, "external transport framing error");
            let err = BridgeError::from(err);
            self.trigger_error(&err);
        }
    }

    /// Serialize, frame, and transmit one command, assigning a seqno if
    /// the caller left it zero. Returns the seqno on the wire, 0 on
    /// failure (after endpoint teardown).
    pub(crate) fn send(&self, mut command: Command) -> u32 {
        let result = {
            let mut state = self.state.lock().expect(LOCK_POISONED);

            if command.seqno == 0 {
                state.seqno = state.seqno.wrapping_add(1);
                if state.seqno == 0 {
                    state.seqno = 1;
                }
                command.seqno = state.seqno;
            }
            let seqno = command.seqno;

            let payload = command.encode_to_vec();
            let mut buf = BytesMut::with_capacity(extbridge_core::HEADER_LEN + payload.len());
            let mut codec = FrameCodec::new();

            match codec.encode(payload.as_slice(), &mut buf) {
                Ok(()) => state.sink.send(buf.freeze()).map(|()| seqno),
                Err(err) => Err(BridgeError::Protocol(err)),
            }
        };

        match result {
            Ok(seqno) => seqno,
            Err(err) => {
                error!(%err, "could not transmit command");
                self.trigger_error(&err);
                0
            }
        }
    }

    pub(crate) fn send_ping(&self) -> u32 {
        self.send(Command::with_body(tag::PING, &Ping {}))
    }

    fn send_pong(&self, ping_seqno: u32) -> u32 {
        self.send(Command::with_body(tag::PONG, &Pong { ping_seqno }))
    }

    pub(crate) fn send_http_request(
        &self,
        req_id: u32,
        uri: &str,
        method: &str,
        variables: &BTreeMap<String, String>,
    ) -> u32 {
        let body = HttpRequest {
            req_id,
            uri: uri.to_owned(),
            method: method.to_owned(),
            variable_data: variables
                .iter()
                .map(|(field, content)| SubHttpVariableData {
                    field: field.clone(),
                    content: content.clone(),
                })
                .collect(),
        };
        self.send(Command::with_body(tag::HTTP_REQUEST, &body))
    }

    fn send_http_auth(&self, token: &str) -> u32 {
        let body = HttpAuthToken {
            token: token.to_owned(),
        };
        self.send(Command::with_body(tag::HTTP_AUTH, &body))
    }

    /// Serialize a bus event to JSON and forward it as an `EVENT`.
    pub(crate) fn proxy_event(&self, event: &BusEvent) {
        let json = match serde_json::to_string(event) {
            Ok(json) => json,
            Err(err) => {
                warn!(%err, "could not serialize bus event for forwarding");
                return;
            }
        };
        self.send(Command::with_body(
            tag::EVENT,
            &EventbusEvent { event_json: json },
        ));
    }

    /// Route one verified frame payload to its handler.
    pub(crate) fn dispatch_frame(self: &Arc<Self>, payload: &[u8]) {
        let command = match Command::decode(payload) {
            Ok(command) => command,
            Err(err) => {
                warn!(%err, "unparsable command envelope");
                self.trigger_error(&BridgeError::Protocol(ProtocolError::Decode(err)));
                return;
            }
        };
        self.dispatch_command(command);
    }

    /// Built-in command table; unknown commands are offered to the
    /// driver, then dropped so newer helpers keep working.
    fn dispatch_command(self: &Arc<Self>, command: Command) {
        match command.command.as_str() {
            tag::MESSAGE => self.handle_message(&command.content),
            tag::PING => self.handle_ping(command.seqno, &command.content),
            tag::PONG => self.handle_pong(&command.content),
            tag::SHUTDOWN => self.handle_shutdown(&command.content),
            tag::HTTP_REGISTER_URI => self.handle_http_register(&command.content),
            tag::HTTP_RESPONSE => self.handle_http_response(&command.content),
            tag::HTTP_AUTH_REQ => self.handle_http_auth_request(&command.content),
            tag::EVENTBUS_REGISTER => self.handle_eventbus_register(&command.content),
            tag::EVENTBUS_PUBLISH => self.handle_eventbus_publish(&command.content),
            other => {
                if !self
                    .driver
                    .handle_unknown(other, command.seqno, &command.content)
                {
                    debug!(command = other, "dropping unhandled command");
                }
            }
        }
    }

    fn handle_message(&self, content: &[u8]) {
        let Ok(message) = MsgbusMessage::decode(content) else {
            self.unparsable(tag::MESSAGE);
            return;
        };

        let level = MessageLevel::from_wire(message.msgtype);
        if !self.driver.handle_message(&message.msgtext, level) {
            self.services.message_bus.publish(level, &message.msgtext);
        }
    }

    fn handle_ping(&self, seqno: u32, content: &[u8]) {
        if Ping::decode(content).is_err() {
            self.unparsable(tag::PING);
            return;
        }
        self.send_pong(seqno);
    }

    fn handle_pong(&self, content: &[u8]) {
        if Pong::decode(content).is_err() {
            self.unparsable(tag::PONG);
            return;
        }
        self.state.lock().expect(LOCK_POISONED).last_pong = Instant::now();
    }

    fn handle_shutdown(&self, content: &[u8]) {
        let Ok(shutdown) = ExternalShutdown::decode(content) else {
            self.unparsable(tag::SHUTDOWN);
            return;
        };

        let reason = shutdown.reason.unwrap_or_default();
        self.services.message_bus.publish(
            MessageLevel::Info,
            &format!("External helper interface shutting down: {reason}"),
        );
        self.trigger_error(&BridgeError::RemoteShutdown(reason));
    }

    fn handle_http_register(self: &Arc<Self>, content: &[u8]) {
        let Ok(register) = HttpRegisterUri::decode(content) else {
            self.unparsable(tag::HTTP_REGISTER_URI);
            return;
        };
        http_proxy::register_uri(self, &register.uri, &register.method);
    }

    fn handle_http_response(self: &Arc<Self>, content: &[u8]) {
        let Ok(response) = HttpResponse::decode(content) else {
            self.unparsable(tag::HTTP_RESPONSE);
            return;
        };
        http_proxy::handle_response(self, response);
    }

    fn handle_http_auth_request(&self, content: &[u8]) {
        if HttpAuthTokenRequest::decode(content).is_err() {
            self.unparsable(tag::HTTP_AUTH_REQ);
            return;
        }

        let token = self
            .services
            .http_server
            .create_auth_token("external", AuthRole::Logon);
        self.send_http_auth(&token);
    }

    fn handle_eventbus_register(self: &Arc<Self>, content: &[u8]) {
        let Ok(register) = EventbusRegisterListener::decode(content) else {
            self.unparsable(tag::EVENTBUS_REGISTER);
            return;
        };

        for event in register.event {
            // Re-registration replaces the previous listener.
            let stale = {
                let mut state = self.state.lock().expect(LOCK_POISONED);
                state.eventbus_listeners.remove(&event)
            };
            if let Some(id) = stale {
                self.services.event_bus.remove_listener(id);
            }

            let weak = Arc::downgrade(self);
            let id = self.services.event_bus.register_listener(
                &event,
                Arc::new(move |event: &BusEvent| {
                    if let Some(inner) = weak.upgrade() {
                        inner.proxy_event(event);
                    }
                }),
            );

            let mut state = self.state.lock().expect(LOCK_POISONED);
            if state.stopped {
                // Teardown raced the registration; don't leak the
                // listener.
                drop(state);
                self.services.event_bus.remove_listener(id);
            } else {
                state.eventbus_listeners.insert(event, id);
            }
        }
    }

    fn handle_eventbus_publish(&self, content: &[u8]) {
        let Ok(publish) = EventbusPublishEvent::decode(content) else {
            self.unparsable(tag::EVENTBUS_PUBLISH);
            return;
        };

        let event = BusEvent::with_json_content(publish.event_type, publish.event_content_json);
        self.services.event_bus.publish(event);
    }

    /// Shared failure path for a known command with a bad sub-message.
    fn unparsable(&self, command: &str) {
        self.services.message_bus.publish(
            MessageLevel::Error,
            &format!("external interface received an unparsable {command}"),
        );
        self.trigger_error(&BridgeError::UnparsableCommand(command.to_owned()));
    }

    /// Terminal error path: run the driver hook once, then tear down.
    /// A second trigger on a stopped endpoint is a no-op.
    pub(crate) fn trigger_error(&self, error: &BridgeError) {
        {
            let state = self.state.lock().expect(LOCK_POISONED);
            if state.stopped {
                return;
            }
        }

        self.driver.handle_error(&error.to_string());
        self.close_external();
    }

    /// Full teardown; safe to call multiple times and from any handler
    /// or task.
    pub(crate) fn close_external(&self) {
        let (listeners, sessions, tasks, pid) = {
            let mut state = self.state.lock().expect(LOCK_POISONED);
            state.stopped = true;
            state.cancelled = true;
            state.sink = WriteSink::None;
            state.ingest_buf = BytesMut::new();

            let listeners: Vec<u64> = state.eventbus_listeners.drain().map(|(_, id)| id).collect();
            let sessions: Vec<HttpSession> =
                state.http_sessions.drain().map(|(_, s)| s).collect();
            let tasks = [
                state.ping_task.take(),
                state.reader_task.take(),
                state.writer_task.take(),
            ];
            (listeners, sessions, tasks, state.child_pid.take())
        };

        for id in listeners {
            self.services.event_bus.remove_listener(id);
        }

        for session in sessions {
            session.connection.cancel();
            session.gate.release(SessionOutcome::Aborted);
        }

        for task in tasks.into_iter().flatten() {
            task.abort();
        }

        if let Some(pid) = pid {
            self.services.ipc_registry.remove(pid);
            if let Err(err) = kill(Pid::from_raw(pid as i32), Signal::SIGKILL) {
                debug!(pid, %err, "could not hard-kill helper child");
            }
        }
    }

    /// Close the pipe transport and signal the helper child.
    fn kill_child(&self, signal: Signal) {
        let (reader, writer, pid) = {
            let mut state = self.state.lock().expect(LOCK_POISONED);
            state.stopped = true;
            state.cancelled = true;
            state.sink = WriteSink::None;
            (
                state.reader_task.take(),
                state.writer_task.take(),
                state.child_pid.take(),
            )
        };

        for task in [reader, writer].into_iter().flatten() {
            task.abort();
        }

        if let Some(pid) = pid {
            self.services.ipc_registry.remove(pid);
            if let Err(err) = kill(Pid::from_raw(pid as i32), signal) {
                debug!(pid, %err, "could not signal helper child");
            }
        }
    }
}
