//! Command envelope and sub-message schemas.
//!
//! Every frame payload is a serialized [`Command`] envelope whose
//! `content` carries one of the sub-messages below, selected by the
//! `command` string tag. The schemas are written out as `prost` derives
//! rather than generated from `.proto` sources so the field numbers are
//! reviewable in-tree; they are frozen by compatibility with deployed
//! helpers and must not be renumbered.
//!
//! Optional fields use `Option`; the remaining fields use implicit
//! presence, which encodes identically for every value the protocol
//! actually produces.

use prost::Message;

/// Wire tags for the built-in command set.
pub mod tag {
    /// Helper → host log message.
    pub const MESSAGE: &str = "MESSAGE";
    /// Liveness probe.
    pub const PING: &str = "PING";
    /// Liveness reply.
    pub const PONG: &str = "PONG";
    /// Remote-initiated shutdown.
    pub const SHUTDOWN: &str = "SHUTDOWN";
    /// Helper registers an HTTP route on the host.
    pub const HTTP_REGISTER_URI: &str = "HTTPREGISTERURI";
    /// Helper streams a response chunk for a proxied request.
    pub const HTTP_RESPONSE: &str = "HTTPRESPONSE";
    /// Helper requests a host auth token.
    pub const HTTP_AUTH_REQ: &str = "HTTPAUTHREQ";
    /// Host → helper proxied HTTP request.
    pub const HTTP_REQUEST: &str = "HTTPREQUEST";
    /// Host → helper minted auth token.
    pub const HTTP_AUTH: &str = "HTTPAUTH";
    /// Helper subscribes to host events.
    pub const EVENTBUS_REGISTER: &str = "EVENTBUSREGISTER";
    /// Helper publishes a host event.
    pub const EVENTBUS_PUBLISH: &str = "EVENTBUSPUBLISH";
    /// Host → helper forwarded event.
    pub const EVENT: &str = "EVENT";
}

/// The command envelope carried by every frame.
#[derive(Clone, PartialEq, Message)]
pub struct Command {
    /// Command tag, e.g. `"PING"`; see [`tag`].
    #[prost(string, tag = "1")]
    pub command: String,

    /// Monotonic sequence number; 0 means "unassigned" and is replaced
    /// on the send path.
    #[prost(uint32, tag = "2")]
    pub seqno: u32,

    /// Serialized sub-message selected by `command`.
    #[prost(bytes = "vec", tag = "3")]
    pub content: Vec<u8>,
}

impl Command {
    /// Build an envelope around a serialized sub-message, leaving the
    /// sequence number unassigned.
    #[must_use]
    pub fn with_body<M: Message>(command: &str, body: &M) -> Self {
        Self {
            command: command.to_owned(),
            seqno: 0,
            content: body.encode_to_vec(),
        }
    }
}

/// Severity of a helper-originated log message.
///
/// The discriminants are wire-fixed bit flags, not a dense enum.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, ::prost::Enumeration)]
#[repr(i32)]
pub enum MessageType {
    /// Developer diagnostics.
    Debug = 1,
    /// Operator information.
    Info = 2,
    /// Recoverable error.
    Error = 4,
    /// Operator alert.
    Alert = 8,
    /// Unrecoverable error.
    Fatal = 16,
}

/// `MESSAGE`: a log line forwarded to the host message bus.
#[derive(Clone, PartialEq, Message)]
pub struct MsgbusMessage {
    /// Severity, one of [`MessageType`].
    #[prost(enumeration = "MessageType", tag = "1")]
    pub msgtype: i32,

    /// Message text.
    #[prost(string, tag = "2")]
    pub msgtext: String,
}

/// `PING`: liveness probe; the reply correlates on the envelope seqno.
#[derive(Clone, Copy, PartialEq, Message)]
pub struct Ping {}

/// `PONG`: liveness reply.
#[derive(Clone, Copy, PartialEq, Message)]
pub struct Pong {
    /// Envelope seqno of the `PING` being answered.
    #[prost(uint32, tag = "1")]
    pub ping_seqno: u32,
}

/// `SHUTDOWN`: the remote side is terminating the link.
#[derive(Clone, PartialEq, Message)]
pub struct ExternalShutdown {
    /// Human-readable reason.
    #[prost(string, optional, tag = "1")]
    pub reason: Option<String>,
}

/// `HTTPREGISTERURI`: the helper asks the host to route a URI to it.
#[derive(Clone, PartialEq, Message)]
pub struct HttpRegisterUri {
    /// URI to register.
    #[prost(string, tag = "1")]
    pub uri: String,

    /// HTTP verb, e.g. `"GET"`.
    #[prost(string, tag = "2")]
    pub method: String,
}

/// A single request variable of a proxied HTTP request.
#[derive(Clone, PartialEq, Message)]
pub struct SubHttpVariableData {
    /// Variable name.
    #[prost(string, tag = "1")]
    pub field: String,

    /// Variable value.
    #[prost(string, tag = "2")]
    pub content: String,
}

/// `HTTPREQUEST`: a host-side request proxied to the helper.
#[derive(Clone, PartialEq, Message)]
pub struct HttpRequest {
    /// Proxy session id; echoed back in every `HTTPRESPONSE` chunk.
    #[prost(uint32, tag = "1")]
    pub req_id: u32,

    /// Request URI.
    #[prost(string, tag = "2")]
    pub uri: String,

    /// Request verb.
    #[prost(string, tag = "3")]
    pub method: String,

    /// Request variables (query/post), in connection order.
    #[prost(message, repeated, tag = "4")]
    pub variable_data: Vec<SubHttpVariableData>,
}

/// A single response header of a proxied HTTP response.
#[derive(Clone, PartialEq, Message)]
pub struct SubHttpHeader {
    /// Header name.
    #[prost(string, tag = "1")]
    pub header: String,

    /// Header value.
    #[prost(string, tag = "2")]
    pub content: String,
}

/// `HTTPRESPONSE`: one chunk of a streamed proxy response.
///
/// Any number of body-only chunks may precede the terminal chunk with
/// `close_response = true`.
#[derive(Clone, PartialEq, Message)]
pub struct HttpResponse {
    /// Proxy session id from the originating `HTTPREQUEST`.
    #[prost(uint32, tag = "1")]
    pub req_id: u32,

    /// Headers to append; must arrive before any body bytes are pushed.
    #[prost(message, repeated, tag = "2")]
    pub header_content: Vec<SubHttpHeader>,

    /// Body bytes to stream.
    #[prost(bytes = "vec", optional, tag = "3")]
    pub content: Option<Vec<u8>>,

    /// HTTP status code; honored on the first chunk that carries one.
    #[prost(uint32, optional, tag = "4")]
    pub resultcode: Option<u32>,

    /// True on the terminal chunk: complete the stream, release the
    /// parked handler.
    #[prost(bool, optional, tag = "5")]
    pub close_response: Option<bool>,
}

/// `HTTPAUTHREQ`: the helper asks for a host auth token.
#[derive(Clone, Copy, PartialEq, Message)]
pub struct HttpAuthTokenRequest {}

/// `HTTPAUTH`: a minted host auth token.
#[derive(Clone, PartialEq, Message)]
pub struct HttpAuthToken {
    /// Opaque token value.
    #[prost(string, tag = "1")]
    pub token: String,
}

/// `EVENTBUSREGISTER`: subscribe the helper to named host events.
#[derive(Clone, PartialEq, Message)]
pub struct EventbusRegisterListener {
    /// Event names to subscribe to.
    #[prost(string, repeated, tag = "1")]
    pub event: Vec<String>,
}

/// `EVENTBUSPUBLISH`: the helper publishes an event onto the host bus.
#[derive(Clone, PartialEq, Message)]
pub struct EventbusPublishEvent {
    /// Event type to construct.
    #[prost(string, tag = "1")]
    pub event_type: String,

    /// JSON payload attached under the bus's well-known content field.
    #[prost(string, tag = "2")]
    pub event_content_json: String,
}

/// `EVENT`: a host event forwarded to a subscribed helper.
#[derive(Clone, PartialEq, Message)]
pub struct EventbusEvent {
    /// The event serialized as JSON.
    #[prost(string, tag = "1")]
    pub event_json: String,
}
