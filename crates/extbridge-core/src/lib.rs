//! Wire protocol for the external helper bridge.
//!
//! This crate defines the on-wire contract spoken between a host process
//! and an out-of-process helper over a single bidirectional byte stream:
//!
//! ```text
//! ┌─────────────────────────────────────────┐
//! │          Command sub-messages            │  Protobuf (messages)
//! ├─────────────────────────────────────────┤
//! │          Command envelope                │  command / seqno / content
//! ├─────────────────────────────────────────┤
//! │          Framing                         │  signature + length + Adler-32
//! ├─────────────────────────────────────────┤
//! │          Byte stream                     │  pipe pair / duplex stream
//! └─────────────────────────────────────────┘
//! ```
//!
//! # Module Overview
//!
//! - [`error`]: protocol error types ([`ProtocolError`], [`ProtocolResult`])
//! - [`framing`]: checksummed frame codec ([`FrameCodec`], [`adler32`])
//! - [`messages`]: the command envelope and sub-message schemas
//!
//! # Compatibility
//!
//! The frame signature, the Adler-32 checksum, and the protobuf field
//! numbers of every message in [`messages`] are fixed by the existing
//! helper ecosystem. Changing any of them breaks deployed helpers.

pub mod error;
pub mod framing;
pub mod messages;

pub use error::{MAX_FRAME_SIZE, ProtocolError, ProtocolResult};
pub use framing::{FRAME_SIGNATURE, FrameCodec, HEADER_LEN, adler32};
pub use messages::{
    Command, EventbusEvent, EventbusPublishEvent, EventbusRegisterListener, ExternalShutdown,
    HttpAuthToken, HttpAuthTokenRequest, HttpRegisterUri, HttpRequest, HttpResponse, MessageType,
    MsgbusMessage, Ping, Pong, SubHttpHeader, SubHttpVariableData,
};
