//! Client → server messages.
//!
//! Framed exactly like server messages: `u32` length, `u8` type code, then
//! the fixed fields. Neither message carries a payload.

use bytes::{BufMut, Bytes, BytesMut};
use serde::{Deserialize, Serialize};

use super::component::{Component, Level, Reader};
use super::registry::{build_frame, TYPE_CODE_SIZE};
use crate::error::DecodeError;

/// Type code of [`ClientConfig`].
pub const CLIENT_CONFIG_CODE: u8 = 0;

/// Type code of [`ClientRecord`].
pub const CLIENT_RECORD_CODE: u8 = 1;

/// Recording request: capture up to `max_rows` runs per span when enabled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClientRecord {
    pub max_rows: u32,
    pub enable: bool,
}

impl ClientRecord {
    pub fn start(max_rows: u32) -> Self {
        Self {
            max_rows,
            enable: true,
        }
    }

    pub fn stop() -> Self {
        Self {
            max_rows: 0,
            enable: false,
        }
    }
}

impl Component for ClientRecord {
    const SIZE: usize = u32::SIZE + bool::SIZE;

    fn read(reader: &mut Reader<'_>) -> Result<Self, DecodeError> {
        Ok(Self {
            max_rows: u32::read(reader)?,
            enable: bool::read(reader)?,
        })
    }

    fn write(&self, out: &mut impl BufMut) {
        self.max_rows.write(out);
        self.enable.write(out);
    }
}

/// The client's answer to a `ServerConfig`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClientConfig {
    pub max_average_points: u32,
    pub max_level: Level,
    pub record: ClientRecord,
    pub period: u16,
}

impl Component for ClientConfig {
    const SIZE: usize = u32::SIZE + Level::SIZE + ClientRecord::SIZE + u16::SIZE;

    fn read(reader: &mut Reader<'_>) -> Result<Self, DecodeError> {
        Ok(Self {
            max_average_points: u32::read(reader)?,
            max_level: Level::read(reader)?,
            record: ClientRecord::read(reader)?,
            period: u16::read(reader)?,
        })
    }

    fn write(&self, out: &mut impl BufMut) {
        self.max_average_points.write(out);
        self.max_level.write(out);
        self.record.write(out);
        self.period.write(out);
    }
}

/// Any message the client can send.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClientMessage {
    Config(ClientConfig),
    Record(ClientRecord),
}

impl ClientMessage {
    pub fn code(&self) -> u8 {
        match self {
            ClientMessage::Config(_) => CLIENT_CONFIG_CODE,
            ClientMessage::Record(_) => CLIENT_RECORD_CODE,
        }
    }

    /// Encode as a complete length-prefixed frame.
    pub fn to_frame(&self) -> Bytes {
        let mut body = BytesMut::with_capacity(TYPE_CODE_SIZE + ClientConfig::SIZE);
        body.put_u8(self.code());
        match self {
            ClientMessage::Config(config) => config.write(&mut body),
            ClientMessage::Record(record) => record.write(&mut body),
        }
        build_frame(&body)
    }

    /// Decode a frame body (without the length prefix).
    pub fn decode(frame: &[u8]) -> Result<Self, DecodeError> {
        let mut reader = Reader::new(frame);
        let code = reader.read_u8()?;
        let message = match code {
            CLIENT_CONFIG_CODE => ClientMessage::Config(ClientConfig::read(&mut reader)?),
            CLIENT_RECORD_CODE => ClientMessage::Record(ClientRecord::read(&mut reader)?),
            other => return Err(DecodeError::UnknownMessageType(other)),
        };
        if reader.remaining() != 0 {
            return Err(DecodeError::LengthMismatch {
                declared: 0,
                actual: reader.remaining(),
            });
        }
        Ok(message)
    }
}

impl From<ClientConfig> for ClientMessage {
    fn from(config: ClientConfig) -> Self {
        ClientMessage::Config(config)
    }
}

impl From<ClientRecord> for ClientMessage {
    fn from(record: ClientRecord) -> Self {
        ClientMessage::Record(record)
    }
}
