//! Error types for spanwire-client.

use thiserror::Error;

use crate::protocol::Version;

/// Handshake validation failure. Always fatal to the connection.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum HandshakeError {
    /// The first 4 bytes are not the expected magic.
    #[error("signature mismatch: expected {expected:#010x}, got {actual:#010x}")]
    SignatureMismatch { expected: u32, actual: u32 },

    /// The protocol name tag does not match.
    #[error("protocol mismatch: expected {expected:#010x}, got {actual:#010x}")]
    ProtocolMismatch { expected: u32, actual: u32 },

    /// Major version or pre-release bytes differ.
    #[error("version mismatch: expected {expected}, got {actual}")]
    VersionMismatch { expected: Version, actual: Version },
}

/// Failure decoding a single frame. Not fatal: the frame is discarded.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DecodeError {
    /// No header decoder is registered for this type code.
    #[error("unknown message type: {0}")]
    UnknownMessageType(u8),

    /// Header or payload bytes ran short.
    #[error("truncated frame: needed {needed} bytes, {available} available")]
    Truncated { needed: usize, available: usize },

    /// Declared payload size does not match the bytes left in the frame.
    #[error("payload length mismatch: header declares {declared} bytes, frame carries {actual}")]
    LengthMismatch { declared: usize, actual: usize },

    /// A variable-length string is not valid UTF-8.
    #[error("invalid UTF-8 in string field")]
    InvalidUtf8,
}

/// Main error type for all spanwire operations.
#[derive(Debug, Error)]
pub enum SpanwireError {
    /// I/O error on the socket.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Handshake rejected.
    #[error("handshake failed: {0}")]
    Handshake(#[from] HandshakeError),

    /// Frame could not be decoded.
    #[error("decode error: {0}")]
    Decode(#[from] DecodeError),

    /// Declared frame length is above the configured maximum.
    #[error("frame size {size} exceeds maximum {max}")]
    FrameTooLarge { size: u32, max: u32 },

    /// Persistent store rejected a mutation.
    #[error("store error: {0}")]
    Store(String),

    /// JSON error (settings files).
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// MsgPack serialization error (journal store).
    #[error("MsgPack encode error: {0}")]
    MsgPackEncode(#[from] rmp_serde::encode::Error),

    /// MsgPack deserialization error (journal store).
    #[error("MsgPack decode error: {0}")]
    MsgPackDecode(#[from] rmp_serde::decode::Error),

    /// Connection closed unexpectedly.
    #[error("Connection closed")]
    ConnectionClosed,

    /// Server address could not be parsed.
    #[error("invalid address: {0}")]
    InvalidAddress(String),

    /// A network link is already open on this manager.
    #[error("A network link already exists")]
    AlreadyConnected,
}

impl SpanwireError {
    /// Whether this error ends the connection.
    ///
    /// Decode and store errors are recovered locally; everything on the
    /// handshake or socket path is not.
    pub fn is_fatal(&self) -> bool {
        !matches!(self, SpanwireError::Decode(_) | SpanwireError::Store(_))
    }
}

/// Result type alias using SpanwireError.
pub type Result<T> = std::result::Result<T, SpanwireError>;
