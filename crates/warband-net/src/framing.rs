//! Length-prefixed framing over a raw byte stream.
//!
//! Every message on the wire is a length-prefixed frame:
//!
//! ```text
//! +-------------------+--------------------+
//! | length (4 bytes)  |   payload          |
//! | u32 big-endian    |   (length bytes)   |
//! +-------------------+--------------------+
//! ```
//!
//! The length does **not** include the 4 prefix bytes themselves. A length of
//! 0 is a valid frame and is emitted like any other.
//!
//! Transports hand over bytes in whatever chunks the OS or the WebSocket
//! library produced, so [`FrameCodec`] keeps the tail of an incomplete frame
//! between calls. One codec belongs to exactly one connection.

use bytes::{Buf, Bytes, BytesMut};

/// Size of the length prefix in bytes.
pub const LENGTH_PREFIX_SIZE: usize = 4;

/// Configuration for the framing layer.
#[derive(Debug, Clone)]
pub struct FrameConfig {
    /// Maximum allowed payload size in bytes. Default: 1 MB.
    pub max_payload_size: u32,
}

impl Default for FrameConfig {
    fn default() -> Self {
        Self {
            max_payload_size: 1_048_576,
        }
    }
}

/// Errors that can occur during framing operations.
#[derive(Debug, thiserror::Error)]
pub enum FrameError {
    /// The payload size exceeds the configured maximum.
    #[error("payload size {size} exceeds maximum {max}")]
    PayloadTooLarge {
        /// The actual (or declared) payload size.
        size: u64,
        /// The configured maximum.
        max: u32,
    },
}

/// Prefix `payload` with its big-endian `u32` length.
pub fn encode_frame(payload: &[u8], config: &FrameConfig) -> Result<Vec<u8>, FrameError> {
    let len = payload.len() as u64;
    if len > u64::from(config.max_payload_size) {
        return Err(FrameError::PayloadTooLarge {
            size: len,
            max: config.max_payload_size,
        });
    }

    let mut out = Vec::with_capacity(LENGTH_PREFIX_SIZE + payload.len());
    out.extend_from_slice(&(len as u32).to_be_bytes());
    out.extend_from_slice(payload);
    Ok(out)
}

/// Incremental decoder turning arbitrary byte chunks into complete frames.
pub struct FrameCodec {
    /// Carry-over bytes: a partial prefix, or a prefix plus partial payload.
    buffer: BytesMut,
    max_payload_size: u32,
}

impl FrameCodec {
    /// Create an empty codec.
    pub fn new(config: &FrameConfig) -> Self {
        Self {
            buffer: BytesMut::with_capacity(8 * 1024),
            max_payload_size: config.max_payload_size,
        }
    }

    /// Append a chunk without extracting anything.
    pub fn extend(&mut self, chunk: &[u8]) {
        self.buffer.extend_from_slice(chunk);
    }

    /// Extract the next complete frame, if one is buffered.
    ///
    /// Returns `Ok(None)` when fewer than 4 bytes are buffered or when the
    /// declared payload has not fully arrived yet; the buffer is left intact
    /// in both cases.
    pub fn next_frame(&mut self) -> Result<Option<Bytes>, FrameError> {
        if self.buffer.len() < LENGTH_PREFIX_SIZE {
            return Ok(None);
        }

        let mut prefix = [0u8; LENGTH_PREFIX_SIZE];
        prefix.copy_from_slice(&self.buffer[..LENGTH_PREFIX_SIZE]);
        let payload_len = u32::from_be_bytes(prefix);

        if payload_len > self.max_payload_size {
            return Err(FrameError::PayloadTooLarge {
                size: u64::from(payload_len),
                max: self.max_payload_size,
            });
        }

        let payload_len = payload_len as usize;
        if self.buffer.len() - LENGTH_PREFIX_SIZE < payload_len {
            return Ok(None);
        }

        self.buffer.advance(LENGTH_PREFIX_SIZE);
        Ok(Some(self.buffer.split_to(payload_len).freeze()))
    }

    /// Append `chunk` and drain every frame that is now complete, in order.
    pub fn push(&mut self, chunk: &[u8]) -> Result<Vec<Bytes>, FrameError> {
        self.extend(chunk);

        let mut frames = Vec::new();
        while let Some(frame) = self.next_frame()? {
            frames.push(frame);
        }
        Ok(frames)
    }

    /// Number of bytes held back waiting for the rest of a frame.
    pub fn buffered_len(&self) -> usize {
        self.buffer.len()
    }

    /// Drop any buffered partial frame.
    pub fn reset(&mut self) {
        self.buffer.clear();
    }
}
