//! HTTP proxy session machine.
//!
//! A helper can register routes on the host's web server. Each request
//! hitting such a route is parked: the handler allocates a proxy
//! session, forwards the request to the helper as an `HTTPREQUEST`, and
//! blocks on the session's gate while the helper streams any number of
//! `HTTPRESPONSE` chunks back through the connection. The terminal chunk
//! (`close_response = true`) completes the stream and releases the
//! handler; teardown and client disconnects release it with a failure.
//!
//! The endpoint lock is never held across the gate wait; the receive
//! path that delivers `HTTPRESPONSE` chunks takes the same lock and
//! would otherwise deadlock against the parked handler.

use std::sync::{Arc, Mutex, Weak};

use async_trait::async_trait;
use extbridge_core::messages::HttpResponse;
use tokio::sync::oneshot;
use tracing::warn;

use crate::bridge::BridgeInner;
use crate::error::BridgeError;
use crate::services::{AuthRole, ConnectionError, HttpConnection, MessageLevel, RouteHandler};

/// How a parked session was released.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum SessionOutcome {
    /// The helper completed the response stream.
    Completed,
    /// Teardown or a client disconnect failed the session.
    Aborted,
}

/// Single-shot gate a parked handler blocks on.
///
/// Release is idempotent: the sender is taken on first use, so the
/// closure callback, the response path, and teardown can all race on it
/// safely.
pub(crate) struct SessionGate {
    slot: Mutex<Option<oneshot::Sender<SessionOutcome>>>,
}

impl SessionGate {
    fn new(sender: oneshot::Sender<SessionOutcome>) -> Self {
        Self {
            slot: Mutex::new(Some(sender)),
        }
    }

    /// Release the gate; later calls are no-ops.
    pub(crate) fn release(&self, outcome: SessionOutcome) {
        if let Some(sender) = self.slot.lock().expect("lock poisoned").take() {
            let _ = sender.send(outcome);
        }
    }
}

/// One parked proxy session.
#[derive(Clone)]
pub(crate) struct HttpSession {
    /// The host-server connection being answered.
    pub(crate) connection: Arc<dyn HttpConnection>,
    /// Gate the parked handler waits on.
    pub(crate) gate: Arc<SessionGate>,
}

/// Register `(uri, method)` on the host server, bound to the proxy
/// handler.
pub(crate) fn register_uri(inner: &Arc<BridgeInner>, uri: &str, method: &str) {
    let handler = Arc::new(ProxyRouteHandler {
        bridge: Arc::downgrade(inner),
    });
    inner
        .services
        .http_server
        .register_route(uri, method, AuthRole::Logon, handler);
}

/// Route handler that parks the request on a proxy session.
struct ProxyRouteHandler {
    bridge: Weak<BridgeInner>,
}

#[async_trait]
impl RouteHandler for ProxyRouteHandler {
    async fn handle(&self, connection: Arc<dyn HttpConnection>) {
        let Some(inner) = self.bridge.upgrade() else {
            connection.cancel();
            return;
        };

        let uri = connection.uri();
        let verb = connection.verb();
        let variables = connection.variables();

        let (gate_rx, gate, req_id) = {
            let mut state = inner.state.lock().expect("lock poisoned");
            if state.stopped {
                drop(state);
                connection.cancel();
                return;
            }

            let req_id = state.http_session_id;
            state.http_session_id = state.http_session_id.wrapping_add(1);

            let (gate_tx, gate_rx) = oneshot::channel();
            let gate = Arc::new(SessionGate::new(gate_tx));
            state.http_sessions.insert(
                req_id,
                HttpSession {
                    connection: connection.clone(),
                    gate: gate.clone(),
                },
            );

            (gate_rx, gate, req_id)
        };

        inner.send_http_request(req_id, &uri, &verb, &variables);

        // A client that disconnects mid-stream must not leave the
        // handler parked forever.
        {
            let gate = gate.clone();
            connection.set_closure_cb(Box::new(move || gate.release(SessionOutcome::Aborted)));
        }

        // Park. The endpoint lock is NOT held here.
        let _ = gate_rx.await;

        let mut state = inner.state.lock().expect("lock poisoned");
        state.http_sessions.remove(&req_id);
    }
}

/// Apply one `HTTPRESPONSE` chunk to its parked session.
pub(crate) fn handle_response(inner: &Arc<BridgeInner>, response: HttpResponse) {
    let session = {
        let state = inner.state.lock().expect("lock poisoned");
        state.http_sessions.get(&response.req_id).cloned()
    };

    let Some(session) = session else {
        inner.services.message_bus.publish(
            MessageLevel::Error,
            "external interface received an HTTPRESPONSE for an unknown session",
        );
        inner.trigger_error(&BridgeError::UnknownHttpSession(response.req_id));
        return;
    };

    // Headers must land before any body bytes.
    for header in &response.header_content {
        if let Err(err) = session.connection.append_header(&header.header, &header.content) {
            warn!(%err, "host server rejected HTTPRESPONSE header");
            inner.trigger_error(&BridgeError::UnparsableCommand(
                "HTTPRESPONSE header block".to_owned(),
            ));
            return;
        }
    }

    if let Some(code) = response.resultcode {
        let result = u16::try_from(code)
            .map_err(|_| ConnectionError(format!("status code {code} out of range")))
            .and_then(|status| session.connection.set_status(status));
        if let Err(err) = result {
            warn!(%err, "host server rejected HTTPRESPONSE status");
            inner.trigger_error(&BridgeError::UnparsableCommand(
                "HTTPRESPONSE status code".to_owned(),
            ));
            return;
        }
    }

    if let Some(content) = &response.content {
        if !content.is_empty() {
            session.connection.put_data(content);
        }
    }

    if response.close_response.unwrap_or(false) {
        session.connection.complete();
        session.gate.release(SessionOutcome::Completed);
    }
}
