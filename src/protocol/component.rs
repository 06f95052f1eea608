//! Fixed-size header components and their variable-length payloads.
//!
//! Every message is decoded in two phases. The header phase reads only
//! fixed-size fields through [`Component::read`]: integers, presence flags
//! of optional fields and the `u32` length of every [`Vchar`]. The payload
//! phase then walks the same structure through
//! [`PayloadComponent::read_payload`] and is the only place strings get
//! allocated.
//!
//! ```text
//! ┌──────┬──────────────────────────────┬───────────────────────────┐
//! │ Type │ Header (≤ H::SIZE bytes)     │ Payload (Σ Vchar lengths) │
//! │ u8   │ ints, option flags, lengths  │ UTF-8 bytes, header order │
//! └──────┴──────────────────────────────┴───────────────────────────┘
//! ```

use bytes::BufMut;
use serde::{Deserialize, Serialize};

use crate::error::DecodeError;

/// Bounds-checked little-endian cursor over a frame slice.
#[derive(Debug)]
pub struct Reader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    pub fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    /// Bytes consumed so far.
    #[inline]
    pub fn position(&self) -> usize {
        self.pos
    }

    /// Bytes left to read.
    #[inline]
    pub fn remaining(&self) -> usize {
        self.buf.len() - self.pos
    }

    /// The unread tail, without consuming it.
    #[inline]
    pub fn rest(&self) -> &'a [u8] {
        &self.buf[self.pos..]
    }

    pub fn read_bytes(&mut self, len: usize) -> Result<&'a [u8], DecodeError> {
        if self.remaining() < len {
            return Err(DecodeError::Truncated {
                needed: len,
                available: self.remaining(),
            });
        }
        let slice = &self.buf[self.pos..self.pos + len];
        self.pos += len;
        Ok(slice)
    }

    fn read_array<const N: usize>(&mut self) -> Result<[u8; N], DecodeError> {
        let mut out = [0u8; N];
        out.copy_from_slice(self.read_bytes(N)?);
        Ok(out)
    }

    pub fn read_u8(&mut self) -> Result<u8, DecodeError> {
        Ok(self.read_array::<1>()?[0])
    }

    pub fn read_u16(&mut self) -> Result<u16, DecodeError> {
        Ok(u16::from_le_bytes(self.read_array()?))
    }

    pub fn read_u32(&mut self) -> Result<u32, DecodeError> {
        Ok(u32::from_le_bytes(self.read_array()?))
    }

    pub fn read_u64(&mut self) -> Result<u64, DecodeError> {
        Ok(u64::from_le_bytes(self.read_array()?))
    }

    pub fn read_i64(&mut self) -> Result<i64, DecodeError> {
        Ok(i64::from_le_bytes(self.read_array()?))
    }
}

/// A fixed-size header field.
pub trait Component: Sized {
    /// Largest number of header bytes this component may occupy.
    const SIZE: usize;

    fn read(reader: &mut Reader<'_>) -> Result<Self, DecodeError>;

    fn write(&self, out: &mut impl BufMut);
}

/// A header field that owns variable-length payload bytes.
pub trait PayloadComponent {
    type Output;

    /// Payload bytes this field declared in the header phase.
    fn payload_size(&self) -> usize;

    fn read_payload(&self, reader: &mut Reader<'_>) -> Result<Self::Output, DecodeError>;
}

macro_rules! int_component {
    ($ty:ty, $read:ident, $put:ident) => {
        impl Component for $ty {
            const SIZE: usize = std::mem::size_of::<$ty>();

            #[inline]
            fn read(reader: &mut Reader<'_>) -> Result<Self, DecodeError> {
                reader.$read()
            }

            #[inline]
            fn write(&self, out: &mut impl BufMut) {
                out.$put(*self);
            }
        }
    };
}

int_component!(u8, read_u8, put_u8);
int_component!(u16, read_u16, put_u16_le);
int_component!(u32, read_u32, put_u32_le);
int_component!(u64, read_u64, put_u64_le);
int_component!(i64, read_i64, put_i64_le);

impl Component for bool {
    const SIZE: usize = 1;

    fn read(reader: &mut Reader<'_>) -> Result<Self, DecodeError> {
        Ok(reader.read_u8()? == 1)
    }

    fn write(&self, out: &mut impl BufMut) {
        out.put_u8(u8::from(*self));
    }
}

/// Optional field: one presence byte, then `T` iff the byte is `1`.
impl<T: Component> Component for Option<T> {
    const SIZE: usize = 1 + T::SIZE;

    fn read(reader: &mut Reader<'_>) -> Result<Self, DecodeError> {
        if reader.read_u8()? == 1 {
            Ok(Some(T::read(reader)?))
        } else {
            Ok(None)
        }
    }

    fn write(&self, out: &mut impl BufMut) {
        match self {
            Some(value) => {
                out.put_u8(1);
                value.write(out);
            }
            None => out.put_u8(0),
        }
    }
}

impl<T: PayloadComponent> PayloadComponent for Option<T> {
    type Output = Option<T::Output>;

    fn payload_size(&self) -> usize {
        self.as_ref().map_or(0, PayloadComponent::payload_size)
    }

    fn read_payload(&self, reader: &mut Reader<'_>) -> Result<Self::Output, DecodeError> {
        self.as_ref().map(|c| c.read_payload(reader)).transpose()
    }
}

/// Length-prefixed UTF-8 string, header half.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Vchar {
    pub length: u32,
}

impl Vchar {
    pub fn of(value: &str) -> Self {
        Self {
            length: value.len() as u32,
        }
    }
}

impl Component for Vchar {
    const SIZE: usize = 4;

    fn read(reader: &mut Reader<'_>) -> Result<Self, DecodeError> {
        Ok(Self {
            length: reader.read_u32()?,
        })
    }

    fn write(&self, out: &mut impl BufMut) {
        out.put_u32_le(self.length);
    }
}

impl PayloadComponent for Vchar {
    type Output = String;

    fn payload_size(&self) -> usize {
        self.length as usize
    }

    fn read_payload(&self, reader: &mut Reader<'_>) -> Result<String, DecodeError> {
        let bytes = reader.read_bytes(self.length as usize)?;
        std::str::from_utf8(bytes)
            .map(str::to_owned)
            .map_err(|_| DecodeError::InvalidUtf8)
    }
}

/// Severity level of a span or event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Level {
    Trace,
    Debug,
    #[default]
    Info,
    Warning,
    Error,
}

impl Level {
    /// Unknown codes fall back to `Info`.
    pub fn from_raw(raw: u8) -> Self {
        match raw {
            0 => Level::Trace,
            1 => Level::Debug,
            2 => Level::Info,
            3 => Level::Warning,
            4 => Level::Error,
            _ => Level::Info,
        }
    }

    pub fn raw(self) -> u8 {
        match self {
            Level::Trace => 0,
            Level::Debug => 1,
            Level::Info => 2,
            Level::Warning => 3,
            Level::Error => 4,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Level::Trace => "Trace",
            Level::Debug => "Debug",
            Level::Info => "Info",
            Level::Warning => "Warning",
            Level::Error => "Error",
        }
    }
}

impl Component for Level {
    const SIZE: usize = 1;

    fn read(reader: &mut Reader<'_>) -> Result<Self, DecodeError> {
        Ok(Level::from_raw(reader.read_u8()?))
    }

    fn write(&self, out: &mut impl BufMut) {
        out.put_u8(self.raw());
    }
}

/// Nanosecond duration; `u32` seconds + `u32` nanoseconds on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
pub struct Duration {
    pub nanoseconds: u64,
}

impl Duration {
    pub const NANOS_PER_SEC: u64 = 1_000_000_000;

    pub fn from_nanos(nanoseconds: u64) -> Self {
        Self { nanoseconds }
    }

    pub fn from_parts(seconds: u32, nanoseconds: u32) -> Self {
        Self {
            nanoseconds: u64::from(seconds) * Self::NANOS_PER_SEC + u64::from(nanoseconds),
        }
    }

    pub fn seconds_part(&self) -> u32 {
        (self.nanoseconds / Self::NANOS_PER_SEC) as u32
    }

    pub fn subsec_nanos(&self) -> u32 {
        (self.nanoseconds % Self::NANOS_PER_SEC) as u32
    }

    pub fn as_secs_f64(&self) -> f64 {
        self.nanoseconds as f64 / Self::NANOS_PER_SEC as f64
    }
}

impl From<Duration> for std::time::Duration {
    fn from(d: Duration) -> Self {
        std::time::Duration::from_nanos(d.nanoseconds)
    }
}

impl Component for Duration {
    const SIZE: usize = 8;

    fn read(reader: &mut Reader<'_>) -> Result<Self, DecodeError> {
        let seconds = reader.read_u32()?;
        let nanos = reader.read_u32()?;
        Ok(Duration::from_parts(seconds, nanos))
    }

    fn write(&self, out: &mut impl BufMut) {
        out.put_u32_le(self.seconds_part());
        out.put_u32_le(self.subsec_nanos());
    }
}
