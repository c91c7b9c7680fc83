//! Wire framing for the appliance protocol.
//!
//! Every frame on the stream has the layout:
//!
//! ```text
//! +------+------+--------+---------+-----------------+----------+
//! | 0x7E | 0x7E | length | command | payload ...     | checksum |
//! +------+------+--------+---------+-----------------+----------+
//!                 |<------------- length bytes -------------->|
//! ```
//!
//! `length` counts the command, payload and checksum bytes. The checksum
//! covers everything from `length` up to the end of the payload.

use std::fmt;
use std::sync::Arc;

use bytes::{Buf, BufMut, Bytes, BytesMut};
use thiserror::Error;

use crate::core::{
    DEFAULT_MAX_FRAME_BODY, FRAME_HEADER_SIZE, FRAME_MAGIC, FRAME_OVERHEAD,
    MAX_ENCODABLE_FRAME_BODY, MIN_FRAME_BODY,
};

/// A decoded frame: command code plus payload.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Frame {
    /// Command code.
    pub command: u8,
    /// Payload between the command and checksum bytes.
    pub payload: Bytes,
}

impl Frame {
    /// Create a frame.
    pub fn new(command: u8, payload: impl Into<Bytes>) -> Self {
        Self {
            command,
            payload: payload.into(),
        }
    }

    /// Create a frame with no payload.
    pub fn empty(command: u8) -> Self {
        Self::new(command, Bytes::new())
    }

    /// Value of the length byte for this frame.
    pub fn body_len(&self) -> usize {
        self.payload.len() + MIN_FRAME_BODY
    }

    /// Size of the frame on the wire.
    pub fn encoded_len(&self) -> usize {
        self.payload.len() + FRAME_OVERHEAD
    }
}

/// Integrity check appended to every frame.
pub trait Checksum: Send + Sync + fmt::Debug {
    /// Compute the checksum over the length byte, command and payload.
    fn compute(&self, covered: &[u8]) -> u8;
}

/// Sum of the covered bytes modulo 256, as used by the appliance.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Sum8;

impl Checksum for Sum8 {
    fn compute(&self, covered: &[u8]) -> u8 {
        covered.iter().fold(0u8, |acc, b| acc.wrapping_add(*b))
    }
}

impl<C: Checksum + ?Sized> Checksum for Arc<C> {
    fn compute(&self, covered: &[u8]) -> u8 {
        (**self).compute(covered)
    }
}

/// Errors that can occur during frame encoding or decoding.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum FrameError {
    /// Length byte below the command + checksum minimum.
    #[error("frame length {len} too short (minimum {min})", min = MIN_FRAME_BODY)]
    TooShort {
        /// Length byte value.
        len: usize,
    },

    /// Length exceeds the configured maximum.
    #[error("frame length {len} exceeds maximum {max}")]
    Oversized {
        /// Length byte value (or required length when encoding).
        len: usize,
        /// Maximum accepted.
        max: usize,
    },

    /// Bytes at the head of the buffer are not a frame marker.
    #[error("expected frame marker, found 0x{found:02x}")]
    BadMagic {
        /// Offending byte.
        found: u8,
    },

    /// Checksum does not match the frame contents.
    #[error("checksum mismatch on command 0x{command:02x}: computed 0x{expected:02x}, frame carries 0x{actual:02x}")]
    ChecksumMismatch {
        /// Command byte of the corrupt frame.
        command: u8,
        /// Checksum computed over the received bytes.
        expected: u8,
        /// Checksum carried by the frame.
        actual: u8,
    },
}

/// Encode a frame for the wire.
pub fn encode_frame<C: Checksum + ?Sized>(
    frame: &Frame,
    checksum: &C,
) -> Result<Bytes, FrameError> {
    let body = frame.body_len();
    if body > MAX_ENCODABLE_FRAME_BODY {
        return Err(FrameError::Oversized {
            len: body,
            max: MAX_ENCODABLE_FRAME_BODY,
        });
    }

    let mut buf = BytesMut::with_capacity(frame.encoded_len());
    buf.put_slice(&FRAME_MAGIC);
    buf.put_u8(body as u8);
    buf.put_u8(frame.command);
    buf.put_slice(&frame.payload);
    let sum = checksum.compute(&buf[FRAME_MAGIC.len()..]);
    buf.put_u8(sum);

    Ok(buf.freeze())
}

/// Incremental frame decoder.
///
/// Bytes are appended as they arrive from the stream; [`decode`](Self::decode)
/// yields complete frames regardless of how the stream was segmented. On a
/// decode error the offending bytes stay buffered so the caller can choose
/// between [`resync`](Self::resync) and abandoning the stream.
#[derive(Debug)]
pub struct FrameDecoder<C = Sum8> {
    buf: BytesMut,
    max_body: usize,
    checksum: C,
}

impl FrameDecoder<Sum8> {
    /// Create a decoder using the appliance checksum.
    pub fn new() -> Self {
        Self::with_checksum(Sum8)
    }
}

impl Default for FrameDecoder<Sum8> {
    fn default() -> Self {
        Self::new()
    }
}

impl<C: Checksum> FrameDecoder<C> {
    /// Create a decoder with a custom checksum.
    pub fn with_checksum(checksum: C) -> Self {
        Self {
            buf: BytesMut::with_capacity(256),
            max_body: DEFAULT_MAX_FRAME_BODY,
            checksum,
        }
    }

    /// Set the largest accepted length byte.
    pub fn with_max_body(mut self, max_body: usize) -> Self {
        self.max_body = max_body;
        self
    }

    /// Change the largest accepted length byte.
    pub fn set_max_body(&mut self, max_body: usize) {
        self.max_body = max_body;
    }

    /// Largest accepted length byte.
    pub fn max_body(&self) -> usize {
        self.max_body
    }

    /// Append received bytes.
    pub fn extend_from_slice(&mut self, bytes: &[u8]) {
        self.buf.extend_from_slice(bytes);
    }

    /// Receive buffer, for reading directly from the stream.
    pub fn buffer_mut(&mut self) -> &mut BytesMut {
        &mut self.buf
    }

    /// Bytes buffered but not yet decoded.
    pub fn buffered(&self) -> usize {
        self.buf.len()
    }

    /// Drop everything buffered.
    pub fn clear(&mut self) {
        self.buf.clear();
    }

    /// Decode the next complete frame.
    ///
    /// Returns `Ok(None)` when more bytes are needed.
    pub fn decode(&mut self) -> Result<Option<Frame>, FrameError> {
        let buf = &self.buf;

        for (i, marker) in FRAME_MAGIC.iter().enumerate() {
            match buf.get(i) {
                None => return Ok(None),
                Some(b) if b != marker => return Err(FrameError::BadMagic { found: *b }),
                Some(_) => {}
            }
        }

        let Some(&len) = buf.get(FRAME_MAGIC.len()) else {
            return Ok(None);
        };
        let body = len as usize;
        if body < MIN_FRAME_BODY {
            return Err(FrameError::TooShort { len: body });
        }
        if body > self.max_body {
            return Err(FrameError::Oversized {
                len: body,
                max: self.max_body,
            });
        }

        let total = FRAME_MAGIC.len() + 1 + body;
        if buf.len() < total {
            return Ok(None);
        }

        let command = buf[FRAME_HEADER_SIZE - 1];
        let expected = self.checksum.compute(&buf[FRAME_MAGIC.len()..total - 1]);
        let actual = buf[total - 1];
        if expected != actual {
            return Err(FrameError::ChecksumMismatch {
                command,
                expected,
                actual,
            });
        }

        let mut raw = self.buf.split_to(total);
        raw.advance(FRAME_HEADER_SIZE);
        raw.truncate(body - MIN_FRAME_BODY);

        Ok(Some(Frame {
            command,
            payload: raw.freeze(),
        }))
    }

    /// Discard bytes up to the next plausible frame marker.
    ///
    /// Always drops at least one byte when the buffer is non-empty, so
    /// repeated `decode`/`resync` cycles make progress. Returns the number
    /// of bytes discarded.
    pub fn resync(&mut self) -> usize {
        if self.buf.is_empty() {
            return 0;
        }

        let skip = (1..self.buf.len())
            .find(|&i| {
                self.buf[i] == FRAME_MAGIC[0]
                    && self.buf.get(i + 1).is_none_or(|&b| b == FRAME_MAGIC[1])
            })
            .unwrap_or(self.buf.len());

        self.buf.advance(skip);
        skip
    }
}
