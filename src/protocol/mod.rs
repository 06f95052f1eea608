//! Protocol module - handshake, framing and message codec.
//!
//! This module implements the binary wire protocol:
//! - 40-byte handshake validation
//! - Wire codec splitting the stream into length-prefixed frames
//! - Two-phase header/payload message decoding over a static registry
//! - Client → server configuration messages

mod client_message;
mod component;
mod handshake;
mod message;
mod registry;
mod wire_codec;

pub use client_message::{
    ClientConfig, ClientMessage, ClientRecord, CLIENT_CONFIG_CODE, CLIENT_RECORD_CODE,
};
pub use component::{Component, Duration, Level, PayloadComponent, Reader, Vchar};
pub use handshake::{
    HandshakeMessage, Version, DEFAULT_PORT, HELLO_SIZE, PRE_RELEASE_SIZE, PROTOCOL_MAJOR,
    PROTOCOL_NAME, PROTOCOL_PRE_RELEASE, SIGNATURE,
};
pub use message::{
    Cpu, EncodeMessage, Message, MessageHeader, MessageKind, Metadata, Project, ServerConfig,
    SpanAlloc, SpanDataset, SpanEvent, SpanFollows, SpanParent, SpanUpdate, Target,
};
pub use registry::{
    build_frame, frame_message, lookup, HeaderDecoder, MessageCodec, LENGTH_PREFIX_SIZE,
    REGISTRY, TYPE_CODE_SIZE,
};
pub use wire_codec::{WireCodec, WireItem, DEFAULT_BUFFER_CAPACITY, DEFAULT_MAX_FRAME_SIZE};
