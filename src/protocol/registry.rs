//! Message codec: type-code dispatch over a static header-decoder table.
//!
//! Decoding always runs in two phases. The header decoder registered for
//! the leading type byte reads the fixed-size fields, the declared payload
//! size is checked against the bytes left in the frame, and only then are
//! the variable-length fields materialized.

use bytes::{BufMut, Bytes, BytesMut};

use super::component::Reader;
use super::message::{
    EncodeMessage, Message, MessageHeader, MessageKind, ProjectHeader, ServerConfig,
    SpanAllocHeader, SpanDatasetHeader, SpanEventHeader, SpanFollows, SpanParent, SpanUpdate,
};
use crate::error::DecodeError;

/// Size of the length prefix in front of every streaming frame.
pub const LENGTH_PREFIX_SIZE: usize = 4;

/// Size of the type discriminator at the start of every frame.
pub const TYPE_CODE_SIZE: usize = 1;

/// One entry in the static decoder table.
#[derive(Clone, Copy)]
pub struct HeaderDecoder {
    pub kind: MessageKind,
    pub name: &'static str,
    /// Largest number of header bytes the decoder will read.
    pub header_size: usize,
    decode: fn(&[u8]) -> Result<Message, DecodeError>,
}

impl HeaderDecoder {
    const fn of<H: MessageHeader>(kind: MessageKind, name: &'static str) -> Self {
        Self {
            kind,
            name,
            header_size: H::SIZE,
            decode: decode_with::<H>,
        }
    }

    /// Decode a frame body (everything after the type byte).
    #[inline]
    pub fn decode(&self, body: &[u8]) -> Result<Message, DecodeError> {
        (self.decode)(body)
    }
}

impl std::fmt::Debug for HeaderDecoder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HeaderDecoder")
            .field("kind", &self.kind)
            .field("name", &self.name)
            .field("header_size", &self.header_size)
            .finish()
    }
}

/// Type code → header decoder. Indexed directly by the code.
pub static REGISTRY: [HeaderDecoder; 8] = [
    HeaderDecoder::of::<ProjectHeader>(MessageKind::Project, "Project"),
    HeaderDecoder::of::<SpanAllocHeader>(MessageKind::SpanAlloc, "SpanAlloc"),
    HeaderDecoder::of::<SpanParent>(MessageKind::SpanParent, "SpanParent"),
    HeaderDecoder::of::<SpanFollows>(MessageKind::SpanFollows, "SpanFollows"),
    HeaderDecoder::of::<SpanEventHeader>(MessageKind::SpanEvent, "SpanEvent"),
    HeaderDecoder::of::<SpanUpdate>(MessageKind::SpanUpdate, "SpanUpdate"),
    HeaderDecoder::of::<SpanDatasetHeader>(MessageKind::SpanDataset, "SpanDataset"),
    HeaderDecoder::of::<ServerConfig>(MessageKind::ServerConfig, "ServerConfig"),
];

/// Look up the decoder for a type code.
#[inline]
pub fn lookup(code: u8) -> Option<&'static HeaderDecoder> {
    REGISTRY.get(code as usize)
}

fn decode_with<H: MessageHeader>(body: &[u8]) -> Result<Message, DecodeError> {
    let mut reader = Reader::new(body);
    let header = H::read(&mut reader)?;
    debug_assert!(reader.position() <= H::SIZE);

    let declared = header.payload_size();
    let available = reader.remaining();
    if available < declared {
        return Err(DecodeError::Truncated {
            needed: declared,
            available,
        });
    }
    if available > declared {
        return Err(DecodeError::LengthMismatch {
            declared,
            actual: available,
        });
    }

    let mut payload = Reader::new(reader.rest());
    header.into_message(&mut payload)
}

/// Stateless encoder/decoder for one frame's worth of bytes.
pub struct MessageCodec;

impl MessageCodec {
    /// Decode one frame (type byte + header + payload, without the length prefix).
    pub fn decode(frame: &[u8]) -> Result<Message, DecodeError> {
        let (&code, body) = frame.split_first().ok_or(DecodeError::Truncated {
            needed: TYPE_CODE_SIZE,
            available: 0,
        })?;
        let decoder = lookup(code).ok_or(DecodeError::UnknownMessageType(code))?;
        decoder.decode(body)
    }

    /// Encode a message body (type byte + header + payload).
    pub fn encode<M: EncodeMessage>(message: &M, out: &mut impl BufMut) {
        out.put_u8(M::KIND.code());
        message.write_header(out);
        message.write_payload(out);
    }

    /// Encode any [`Message`] body.
    pub fn encode_message(message: &Message, out: &mut impl BufMut) {
        match message {
            Message::ServerConfig(m) => Self::encode(m, out),
            Message::Project(m) => Self::encode(m, out),
            Message::SpanAlloc(m) => Self::encode(m, out),
            Message::SpanParent(m) => Self::encode(m, out),
            Message::SpanFollows(m) => Self::encode(m, out),
            Message::SpanEvent(m) => Self::encode(m, out),
            Message::SpanUpdate(m) => Self::encode(m, out),
            Message::SpanDataset(m) => Self::encode(m, out),
        }
    }
}

/// Build a complete streaming frame: `u32` LE length prefix followed by `body`.
pub fn build_frame(body: &[u8]) -> Bytes {
    let mut buf = BytesMut::with_capacity(LENGTH_PREFIX_SIZE + body.len());
    buf.put_u32_le(body.len() as u32);
    buf.extend_from_slice(body);
    buf.freeze()
}

/// Encode `message` and wrap it in a length-prefixed frame.
pub fn frame_message(message: &Message) -> Bytes {
    let mut body = BytesMut::new();
    MessageCodec::encode_message(message, &mut body);
    build_frame(&body)
}
