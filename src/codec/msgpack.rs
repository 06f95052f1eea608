//! MsgPack codec using `rmp-serde`.
//!
//! Always encodes with `to_vec_named` so structs become maps keyed by
//! field name. Journal records stay readable after fields are added or
//! reordered, and external tools can inspect them without the Rust types.
//!
//! # Example
//!
//! ```
//! use spanwire_client::codec::MsgPackCodec;
//! use spanwire_client::pipeline::SpanStats;
//! use spanwire_client::protocol::Duration;
//!
//! let stats = SpanStats {
//!     min: Some(Duration::from_nanos(10)),
//!     max: None,
//!     average: None,
//! };
//! let encoded = MsgPackCodec::encode(&stats).unwrap();
//! let decoded: SpanStats = MsgPackCodec::decode(&encoded).unwrap();
//! assert_eq!(decoded, stats);
//! ```

use crate::error::Result;

/// MessagePack codec for persisted records.
pub struct MsgPackCodec;

impl MsgPackCodec {
    /// Encode a value to MsgPack bytes (struct-as-map).
    #[inline]
    pub fn encode<T: serde::Serialize>(value: &T) -> Result<Vec<u8>> {
        Ok(rmp_serde::to_vec_named(value)?)
    }

    /// Decode MsgPack bytes to a value.
    #[inline]
    pub fn decode<T: serde::de::DeserializeOwned>(bytes: &[u8]) -> Result<T> {
        Ok(rmp_serde::from_slice(bytes)?)
    }
}
