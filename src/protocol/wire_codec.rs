//! Stream splitter: one handshake, then length-prefixed frames.
//!
//! Uses `bytes::BytesMut` for zero-copy buffer management.
//! Implements a one-way state machine:
//! - `Handshake`: need exactly 40 bytes, validated once
//! - `WaitingForLength`: streaming, need the 4-byte length prefix
//! - `WaitingForBody`: length parsed, need N more bytes
//!
//! # Example
//!
//! ```ignore
//! use spanwire_client::protocol::{WireCodec, WireItem};
//!
//! let mut codec = WireCodec::new();
//!
//! // Data arrives in chunks from socket
//! let mut items = Vec::new();
//! codec.push(&chunk, &mut items)?;
//! for item in items {
//!     match item {
//!         WireItem::Handshake(hello) => println!("server speaks {}", hello.version),
//!         WireItem::Frame(bytes) => println!("frame of {} bytes", bytes.len()),
//!     }
//! }
//! ```

use bytes::{Buf, Bytes, BytesMut};

use super::handshake::{HandshakeMessage, HELLO_SIZE};
use super::registry::LENGTH_PREFIX_SIZE;
use crate::error::{Result, SpanwireError};

/// Default maximum declared frame length (64 MiB).
pub const DEFAULT_MAX_FRAME_SIZE: u32 = 64 * 1024 * 1024;

/// Default initial buffer capacity.
pub const DEFAULT_BUFFER_CAPACITY: usize = 64 * 1024;

/// One unit produced by the codec.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WireItem {
    /// The validated server hello. Emitted exactly once, first.
    Handshake(HandshakeMessage),
    /// One opaque frame body (type byte + header + payload).
    Frame(Bytes),
}

#[derive(Debug, Clone, Copy)]
enum State {
    Handshake,
    WaitingForLength,
    WaitingForBody { remaining: u32 },
}

/// Per-connection byte accumulator. Not reusable across connections.
pub struct WireCodec {
    buffer: BytesMut,
    state: State,
    expected: HandshakeMessage,
    max_frame_size: u32,
}

impl WireCodec {
    /// Create a codec expecting this client's protocol version.
    pub fn new() -> Self {
        Self::with_max_frame_size(DEFAULT_MAX_FRAME_SIZE)
    }

    pub fn with_max_frame_size(max_frame_size: u32) -> Self {
        Self {
            buffer: BytesMut::with_capacity(DEFAULT_BUFFER_CAPACITY),
            state: State::Handshake,
            expected: HandshakeMessage::expected(),
            max_frame_size,
        }
    }

    /// Override the hello the server must send.
    pub fn expecting(mut self, expected: HandshakeMessage) -> Self {
        self.expected = expected;
        self
    }

    /// Push data into the buffer and append every complete item to `items`.
    ///
    /// Items extracted before an error are still appended, so the caller can
    /// deliver them before closing.
    ///
    /// # Errors
    ///
    /// - `Handshake` if the hello does not match; the codec stays in
    ///   handshake mode and the caller must close the connection.
    /// - `FrameTooLarge` if a declared frame length exceeds the maximum.
    pub fn push(&mut self, data: &[u8], items: &mut Vec<WireItem>) -> Result<()> {
        self.buffer.extend_from_slice(data);

        while let Some(item) = self.try_extract_one()? {
            items.push(item);
        }
        Ok(())
    }

    fn try_extract_one(&mut self) -> Result<Option<WireItem>> {
        match self.state {
            State::Handshake => {
                let Some(hello) = HandshakeMessage::decode(&self.buffer) else {
                    return Ok(None);
                };
                hello.validate(&self.expected)?;

                self.buffer.advance(HELLO_SIZE);
                self.state = State::WaitingForLength;
                Ok(Some(WireItem::Handshake(hello)))
            }

            State::WaitingForLength => {
                if self.buffer.len() < LENGTH_PREFIX_SIZE {
                    return Ok(None);
                }
                let length = self.buffer.get_u32_le();
                if length > self.max_frame_size {
                    return Err(SpanwireError::FrameTooLarge {
                        size: length,
                        max: self.max_frame_size,
                    });
                }

                self.state = State::WaitingForBody { remaining: length };
                self.try_extract_one()
            }

            State::WaitingForBody { remaining } => {
                let remaining = remaining as usize;
                if self.buffer.len() < remaining {
                    return Ok(None);
                }

                let body = self.buffer.split_to(remaining).freeze();
                self.state = State::WaitingForLength;
                Ok(Some(WireItem::Frame(body)))
            }
        }
    }

    /// Whether the handshake has been accepted.
    pub fn is_streaming(&self) -> bool {
        !matches!(self.state, State::Handshake)
    }

    /// Number of buffered, not yet consumed bytes.
    pub fn len(&self) -> usize {
        self.buffer.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }

    #[cfg(test)]
    fn state_name(&self) -> &'static str {
        match self.state {
            State::Handshake => "Handshake",
            State::WaitingForLength => "WaitingForLength",
            State::WaitingForBody { .. } => "WaitingForBody",
        }
    }
}

impl Default for WireCodec {
    fn default() -> Self {
        Self::new()
    }
}
