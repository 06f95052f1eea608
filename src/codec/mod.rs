//! Codec module - serialization of persisted records.
//!
//! - [`MsgPackCodec`] - MessagePack using `rmp-serde` (`to_vec_named`)
//!
//! Codecs are marker structs with static methods rather than trait objects,
//! so the encoding is picked at compile time.

mod msgpack;

pub use msgpack::MsgPackCodec;
