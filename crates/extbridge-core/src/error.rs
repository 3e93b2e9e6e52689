//! Protocol error types.

/// Maximum frame payload size accepted by the codec (16 MiB).
///
/// The length field of an inbound frame is validated against this bound
/// before any allocation occurs.
pub const MAX_FRAME_SIZE: usize = 16 * 1024 * 1024;

/// Result alias for protocol operations.
pub type ProtocolResult<T> = Result<T, ProtocolError>;

/// Errors raised by the frame codec and envelope deserialization.
///
/// Every variant is terminal for the endpoint that observes it: the
/// framing carries a per-frame checksum but no resynchronization marker,
/// so a stream that has desynchronized once cannot be trusted again.
#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    /// The 32-bit frame signature did not match [`crate::FRAME_SIGNATURE`].
    #[error("frame signature mismatch: got {got:#010x}, expected {expected:#010x}")]
    Desync {
        /// Signature value read from the stream.
        got: u32,
        /// The protocol-fixed signature.
        expected: u32,
    },

    /// The Adler-32 checksum computed over the payload did not match the
    /// checksum carried in the frame header.
    #[error("frame checksum mismatch: computed {computed:#010x}, header says {header:#010x}")]
    ChecksumMismatch {
        /// Checksum computed over the received payload.
        computed: u32,
        /// Checksum carried in the frame header.
        header: u32,
    },

    /// The frame length field exceeds the codec's maximum frame size.
    #[error("frame of {size} bytes exceeds maximum of {max} bytes")]
    FrameTooLarge {
        /// Length announced by the frame header.
        size: usize,
        /// Maximum the codec accepts.
        max: usize,
    },

    /// The stream ended in the middle of a frame.
    #[error("stream ended mid-frame: {buffered} of {needed} bytes buffered")]
    Truncated {
        /// Bytes buffered when the stream ended.
        buffered: usize,
        /// Bytes the pending frame requires.
        needed: usize,
    },

    /// The frame payload was not a valid command envelope.
    #[error("command envelope decode failed: {0}")]
    Decode(#[from] prost::DecodeError),

    /// Underlying transport I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl ProtocolError {
    /// Construct a [`ProtocolError::FrameTooLarge`].
    #[must_use]
    pub const fn frame_too_large(size: usize, max: usize) -> Self {
        Self::FrameTooLarge { size, max }
    }
}
