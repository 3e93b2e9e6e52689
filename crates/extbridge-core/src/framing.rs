//! Checksummed frame codec for the helper protocol.
//!
//! This module implements a [`tokio_util::codec`] compatible codec for the
//! signature-prefixed binary framing spoken by external helpers. Each
//! frame consists of:
//!
//! ```text
//! +-----------------+-----------------+-----------------+----------------+
//! | Signature       | Length          | Adler-32        | Payload        |
//! | (4 bytes, BE)   | (4 bytes, BE)   | (4 bytes, BE)   |                |
//! +-----------------+-----------------+-----------------+----------------+
//! ```
//!
//! The signature is the protocol-fixed constant [`FRAME_SIGNATURE`]; the
//! checksum is computed over exactly `length` payload bytes. A frame is
//! surfaced to the caller only once the signature matches, the full
//! payload is buffered, and the checksum verifies.
//!
//! # Security Considerations
//!
//! The codec enforces bounded reads:
//! - frame length is validated BEFORE allocation
//! - maximum frame size is [`MAX_FRAME_SIZE`] (16 MiB) unless lowered
//! - oversized frames are rejected with [`ProtocolError::FrameTooLarge`]

use bytes::{Buf, BufMut, Bytes, BytesMut};
use tokio_util::codec::{Decoder, Encoder};

use crate::error::{MAX_FRAME_SIZE, ProtocolError, ProtocolResult};

/// Protocol-fixed frame signature. Must match the helper's.
pub const FRAME_SIGNATURE: u32 = 0xDECA_FBAD;

/// Length of the frame header: signature, payload length, checksum.
pub const HEADER_LEN: usize = 12;

/// Compute the Adler-32 checksum of `data`.
///
/// Standard definition: moduli 65521, initial `a = 1`, `b = 0`. The
/// helper protocol carries the result big-endian in the frame header.
#[must_use]
pub fn adler32(data: &[u8]) -> u32 {
    const MOD: u32 = 65_521;
    // Largest run of byte additions that cannot overflow u32 before the
    // deferred reduction.
    const NMAX: usize = 5552;

    let mut a: u32 = 1;
    let mut b: u32 = 0;

    for chunk in data.chunks(NMAX) {
        for &byte in chunk {
            a += u32::from(byte);
            b += a;
        }
        a %= MOD;
        b %= MOD;
    }

    (b << 16) | a
}

/// Frame codec implementing the signature + length + checksum framing.
///
/// Used with [`tokio_util::codec::FramedRead`] (or driven manually against
/// a [`BytesMut`] ingress buffer) to extract complete, verified payloads
/// from a byte stream.
#[derive(Debug, Clone)]
pub struct FrameCodec {
    /// Maximum allowed payload size.
    max_frame_size: usize,
}

impl Default for FrameCodec {
    fn default() -> Self {
        Self::new()
    }
}

impl FrameCodec {
    /// Create a new frame codec with the default maximum frame size.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            max_frame_size: MAX_FRAME_SIZE,
        }
    }

    /// Create a frame codec with a custom maximum frame size.
    ///
    /// # Panics
    ///
    /// Panics if `max_size` exceeds [`MAX_FRAME_SIZE`].
    #[must_use]
    pub fn with_max_size(max_size: usize) -> Self {
        assert!(
            max_size <= MAX_FRAME_SIZE,
            "max_size {max_size} exceeds protocol limit {MAX_FRAME_SIZE}"
        );
        Self {
            max_frame_size: max_size,
        }
    }

    /// Returns the maximum payload size for this codec.
    #[must_use]
    pub const fn max_frame_size(&self) -> usize {
        self.max_frame_size
    }
}

impl Decoder for FrameCodec {
    type Item = Bytes;
    type Error = ProtocolError;

    /// Decode one frame from the input buffer.
    ///
    /// # Returns
    ///
    /// - `Ok(Some(payload))` once a complete, verified frame is buffered
    /// - `Ok(None)` if more data is needed
    /// - `Err(ProtocolError::Desync)` on a signature mismatch
    /// - `Err(ProtocolError::FrameTooLarge)` if the length exceeds the cap
    /// - `Err(ProtocolError::ChecksumMismatch)` on checksum failure
    fn decode(&mut self, src: &mut BytesMut) -> ProtocolResult<Option<Bytes>> {
        // Need the full header to know the frame length.
        if src.len() < HEADER_LEN {
            return Ok(None);
        }

        // Peek the header without consuming; a short read must leave the
        // buffer intact so the next read completion can finish the frame.
        let signature = u32::from_be_bytes([src[0], src[1], src[2], src[3]]);
        if signature != FRAME_SIGNATURE {
            return Err(ProtocolError::Desync {
                got: signature,
                expected: FRAME_SIGNATURE,
            });
        }

        let length = u32::from_be_bytes([src[4], src[5], src[6], src[7]]) as usize;

        // Validate length BEFORE allocating or reserving.
        if length > self.max_frame_size {
            return Err(ProtocolError::frame_too_large(length, self.max_frame_size));
        }

        let checksum = u32::from_be_bytes([src[8], src[9], src[10], src[11]]);

        let total_len = HEADER_LEN + length;
        if src.len() < total_len {
            src.reserve(total_len - src.len());
            return Ok(None);
        }

        let computed = adler32(&src[HEADER_LEN..total_len]);
        if computed != checksum {
            return Err(ProtocolError::ChecksumMismatch {
                computed,
                header: checksum,
            });
        }

        src.advance(HEADER_LEN);
        let payload = src.split_to(length).freeze();

        Ok(Some(payload))
    }

    /// Decode at end-of-stream.
    ///
    /// Leftover bytes that do not form a complete frame are a protocol
    /// violation: the peer hung up mid-frame.
    fn decode_eof(&mut self, src: &mut BytesMut) -> ProtocolResult<Option<Bytes>> {
        match self.decode(src)? {
            Some(frame) => Ok(Some(frame)),
            None if src.is_empty() => Ok(None),
            None => {
                let needed = if src.len() < HEADER_LEN {
                    HEADER_LEN
                } else {
                    HEADER_LEN + u32::from_be_bytes([src[4], src[5], src[6], src[7]]) as usize
                };
                Err(ProtocolError::Truncated {
                    buffered: src.len(),
                    needed,
                })
            }
        }
    }
}

impl Encoder<&[u8]> for FrameCodec {
    type Error = ProtocolError;

    /// Encode a payload into a frame.
    ///
    /// Writes the header and copies the payload verbatim; the only
    /// allocation is the reserve on the destination buffer.
    fn encode(&mut self, item: &[u8], dst: &mut BytesMut) -> ProtocolResult<()> {
        if item.len() > self.max_frame_size {
            return Err(ProtocolError::frame_too_large(
                item.len(),
                self.max_frame_size,
            ));
        }

        dst.reserve(HEADER_LEN + item.len());

        dst.put_u32(FRAME_SIGNATURE);
        #[allow(clippy::cast_possible_truncation)] // Validated above
        dst.put_u32(item.len() as u32);
        dst.put_u32(adler32(item));
        dst.extend_from_slice(item);

        Ok(())
    }
}

impl Encoder<Bytes> for FrameCodec {
    type Error = ProtocolError;

    fn encode(&mut self, item: Bytes, dst: &mut BytesMut) -> ProtocolResult<()> {
        self.encode(item.as_ref(), dst)
    }
}

impl Encoder<Vec<u8>> for FrameCodec {
    type Error = ProtocolError;

    fn encode(&mut self, item: Vec<u8>, dst: &mut BytesMut) -> ProtocolResult<()> {
        self.encode(item.as_slice(), dst)
    }
}
