//! Server messages: decoded values and their header halves.
//!
//! Each `*Header` struct holds only fixed-size fields and implements
//! [`MessageHeader`]; [`MessageHeader::into_message`] consumes the payload
//! to produce the owned [`Message`] value.

use bytes::BufMut;
use serde::{Deserialize, Serialize};

use super::component::{Component, Duration, Level, PayloadComponent, Reader, Vchar};
use crate::error::DecodeError;

/// Type code of each server message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum MessageKind {
    Project = 0,
    SpanAlloc = 1,
    SpanParent = 2,
    SpanFollows = 3,
    SpanEvent = 4,
    SpanUpdate = 5,
    SpanDataset = 6,
    ServerConfig = 7,
}

impl MessageKind {
    #[inline]
    pub fn code(self) -> u8 {
        self as u8
    }
}

/// A fully decoded server message. Owns all of its data.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Message {
    ServerConfig(ServerConfig),
    Project(Project),
    SpanAlloc(SpanAlloc),
    SpanParent(SpanParent),
    SpanFollows(SpanFollows),
    SpanEvent(SpanEvent),
    SpanUpdate(SpanUpdate),
    SpanDataset(SpanDataset),
}

impl Message {
    pub fn kind(&self) -> MessageKind {
        match self {
            Message::ServerConfig(_) => MessageKind::ServerConfig,
            Message::Project(_) => MessageKind::Project,
            Message::SpanAlloc(_) => MessageKind::SpanAlloc,
            Message::SpanParent(_) => MessageKind::SpanParent,
            Message::SpanFollows(_) => MessageKind::SpanFollows,
            Message::SpanEvent(_) => MessageKind::SpanEvent,
            Message::SpanUpdate(_) => MessageKind::SpanUpdate,
            Message::SpanDataset(_) => MessageKind::SpanDataset,
        }
    }
}

/// Header half of a message: fixed-size fields plus declared payload size.
pub trait MessageHeader: Component {
    /// Sum of every variable-length field declared by this header.
    fn payload_size(&self) -> usize;

    /// Read the payload fields in header-declaration order.
    fn into_message(self, payload: &mut Reader<'_>) -> Result<Message, DecodeError>;
}

/// Encoding side of a message, used for client tooling and tests.
pub trait EncodeMessage {
    const KIND: MessageKind;

    fn write_header(&self, out: &mut impl BufMut);

    fn write_payload(&self, out: &mut impl BufMut);
}

// ============================================================================
// Shared sub-structures
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Target {
    pub os: String,
    pub family: String,
    pub arch: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TargetHeader {
    pub os: Vchar,
    pub family: Vchar,
    pub arch: Vchar,
}

impl Component for TargetHeader {
    const SIZE: usize = Vchar::SIZE * 3;

    fn read(reader: &mut Reader<'_>) -> Result<Self, DecodeError> {
        Ok(Self {
            os: Vchar::read(reader)?,
            family: Vchar::read(reader)?,
            arch: Vchar::read(reader)?,
        })
    }

    fn write(&self, out: &mut impl BufMut) {
        self.os.write(out);
        self.family.write(out);
        self.arch.write(out);
    }
}

impl PayloadComponent for TargetHeader {
    type Output = Target;

    fn payload_size(&self) -> usize {
        self.os.payload_size() + self.family.payload_size() + self.arch.payload_size()
    }

    fn read_payload(&self, reader: &mut Reader<'_>) -> Result<Target, DecodeError> {
        Ok(Target {
            os: self.os.read_payload(reader)?,
            family: self.family.read_payload(reader)?,
            arch: self.arch.read_payload(reader)?,
        })
    }
}

impl Target {
    fn header(&self) -> TargetHeader {
        TargetHeader {
            os: Vchar::of(&self.os),
            family: Vchar::of(&self.family),
            arch: Vchar::of(&self.arch),
        }
    }

    fn write_payload(&self, out: &mut impl BufMut) {
        out.put_slice(self.os.as_bytes());
        out.put_slice(self.family.as_bytes());
        out.put_slice(self.arch.as_bytes());
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Cpu {
    pub name: String,
    pub core_count: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CpuHeader {
    pub name: Vchar,
    pub core_count: u32,
}

impl Component for CpuHeader {
    const SIZE: usize = Vchar::SIZE + u32::SIZE;

    fn read(reader: &mut Reader<'_>) -> Result<Self, DecodeError> {
        Ok(Self {
            name: Vchar::read(reader)?,
            core_count: u32::read(reader)?,
        })
    }

    fn write(&self, out: &mut impl BufMut) {
        self.name.write(out);
        self.core_count.write(out);
    }
}

impl PayloadComponent for CpuHeader {
    type Output = Cpu;

    fn payload_size(&self) -> usize {
        self.name.payload_size()
    }

    fn read_payload(&self, reader: &mut Reader<'_>) -> Result<Cpu, DecodeError> {
        Ok(Cpu {
            name: self.name.read_payload(reader)?,
            core_count: self.core_count,
        })
    }
}

/// Static description of a span callsite.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Metadata {
    pub level: Level,
    pub line: Option<u32>,
    pub name: String,
    pub target: String,
    pub module_path: Option<String>,
    pub file: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MetadataHeader {
    pub level: Level,
    pub line: Option<u32>,
    pub name: Vchar,
    pub target: Vchar,
    pub module_path: Option<Vchar>,
    pub file: Option<Vchar>,
}

impl Component for MetadataHeader {
    const SIZE: usize =
        Level::SIZE + <Option<u32>>::SIZE + Vchar::SIZE * 2 + <Option<Vchar>>::SIZE * 2;

    fn read(reader: &mut Reader<'_>) -> Result<Self, DecodeError> {
        Ok(Self {
            level: Level::read(reader)?,
            line: Component::read(reader)?,
            name: Vchar::read(reader)?,
            target: Vchar::read(reader)?,
            module_path: Component::read(reader)?,
            file: Component::read(reader)?,
        })
    }

    fn write(&self, out: &mut impl BufMut) {
        self.level.write(out);
        self.line.write(out);
        self.name.write(out);
        self.target.write(out);
        self.module_path.write(out);
        self.file.write(out);
    }
}

impl PayloadComponent for MetadataHeader {
    type Output = Metadata;

    fn payload_size(&self) -> usize {
        self.name.payload_size()
            + self.target.payload_size()
            + self.module_path.payload_size()
            + self.file.payload_size()
    }

    fn read_payload(&self, reader: &mut Reader<'_>) -> Result<Metadata, DecodeError> {
        Ok(Metadata {
            level: self.level,
            line: self.line,
            name: self.name.read_payload(reader)?,
            target: self.target.read_payload(reader)?,
            module_path: self.module_path.read_payload(reader)?,
            file: self.file.read_payload(reader)?,
        })
    }
}

impl Metadata {
    fn header(&self) -> MetadataHeader {
        MetadataHeader {
            level: self.level,
            line: self.line,
            name: Vchar::of(&self.name),
            target: Vchar::of(&self.target),
            module_path: self.module_path.as_deref().map(Vchar::of),
            file: self.file.as_deref().map(Vchar::of),
        }
    }

    fn write_payload(&self, out: &mut impl BufMut) {
        out.put_slice(self.name.as_bytes());
        out.put_slice(self.target.as_bytes());
        if let Some(module_path) = &self.module_path {
            out.put_slice(module_path.as_bytes());
        }
        if let Some(file) = &self.file {
            out.put_slice(file.as_bytes());
        }
    }
}

// ============================================================================
// Project (0)
// ============================================================================

/// Describes the instrumented application. Starts a new project.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Project {
    pub app_name: String,
    pub name: String,
    pub version: String,
    pub command_line: String,
    pub target: Target,
    pub cpu: Option<Cpu>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProjectHeader {
    pub app_name: Vchar,
    pub name: Vchar,
    pub version: Vchar,
    pub command_line: Vchar,
    pub target: TargetHeader,
    pub cpu: Option<CpuHeader>,
}

impl Component for ProjectHeader {
    const SIZE: usize = Vchar::SIZE * 4 + TargetHeader::SIZE + <Option<CpuHeader>>::SIZE;

    fn read(reader: &mut Reader<'_>) -> Result<Self, DecodeError> {
        Ok(Self {
            app_name: Vchar::read(reader)?,
            name: Vchar::read(reader)?,
            version: Vchar::read(reader)?,
            command_line: Vchar::read(reader)?,
            target: TargetHeader::read(reader)?,
            cpu: Component::read(reader)?,
        })
    }

    fn write(&self, out: &mut impl BufMut) {
        self.app_name.write(out);
        self.name.write(out);
        self.version.write(out);
        self.command_line.write(out);
        self.target.write(out);
        self.cpu.write(out);
    }
}

impl MessageHeader for ProjectHeader {
    fn payload_size(&self) -> usize {
        self.app_name.payload_size()
            + self.name.payload_size()
            + self.version.payload_size()
            + self.command_line.payload_size()
            + self.target.payload_size()
            + self.cpu.payload_size()
    }

    fn into_message(self, payload: &mut Reader<'_>) -> Result<Message, DecodeError> {
        Ok(Message::Project(Project {
            app_name: self.app_name.read_payload(payload)?,
            name: self.name.read_payload(payload)?,
            version: self.version.read_payload(payload)?,
            command_line: self.command_line.read_payload(payload)?,
            target: self.target.read_payload(payload)?,
            cpu: self.cpu.read_payload(payload)?,
        }))
    }
}

impl EncodeMessage for Project {
    const KIND: MessageKind = MessageKind::Project;

    fn write_header(&self, out: &mut impl BufMut) {
        ProjectHeader {
            app_name: Vchar::of(&self.app_name),
            name: Vchar::of(&self.name),
            version: Vchar::of(&self.version),
            command_line: Vchar::of(&self.command_line),
            target: self.target.header(),
            cpu: self.cpu.as_ref().map(|cpu| CpuHeader {
                name: Vchar::of(&cpu.name),
                core_count: cpu.core_count,
            }),
        }
        .write(out);
    }

    fn write_payload(&self, out: &mut impl BufMut) {
        out.put_slice(self.app_name.as_bytes());
        out.put_slice(self.name.as_bytes());
        out.put_slice(self.version.as_bytes());
        out.put_slice(self.command_line.as_bytes());
        self.target.write_payload(out);
        if let Some(cpu) = &self.cpu {
            out.put_slice(cpu.name.as_bytes());
        }
    }
}

// ============================================================================
// SpanAlloc (1)
// ============================================================================

/// A new span callsite was registered by the remote process.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SpanAlloc {
    pub id: u32,
    pub metadata: Metadata,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SpanAllocHeader {
    pub id: u32,
    pub metadata: MetadataHeader,
}

impl Component for SpanAllocHeader {
    const SIZE: usize = u32::SIZE + MetadataHeader::SIZE;

    fn read(reader: &mut Reader<'_>) -> Result<Self, DecodeError> {
        Ok(Self {
            id: u32::read(reader)?,
            metadata: MetadataHeader::read(reader)?,
        })
    }

    fn write(&self, out: &mut impl BufMut) {
        self.id.write(out);
        self.metadata.write(out);
    }
}

impl MessageHeader for SpanAllocHeader {
    fn payload_size(&self) -> usize {
        self.metadata.payload_size()
    }

    fn into_message(self, payload: &mut Reader<'_>) -> Result<Message, DecodeError> {
        Ok(Message::SpanAlloc(SpanAlloc {
            id: self.id,
            metadata: self.metadata.read_payload(payload)?,
        }))
    }
}

impl EncodeMessage for SpanAlloc {
    const KIND: MessageKind = MessageKind::SpanAlloc;

    fn write_header(&self, out: &mut impl BufMut) {
        SpanAllocHeader {
            id: self.id,
            metadata: self.metadata.header(),
        }
        .write(out);
    }

    fn write_payload(&self, out: &mut impl BufMut) {
        self.metadata.write_payload(out);
    }
}

// ============================================================================
// Header-only messages: SpanParent (2), SpanFollows (3), SpanUpdate (5), ServerConfig (7)
// ============================================================================

/// Macro for messages whose header is the whole message.
macro_rules! header_only_message {
    ($ty:ident, $kind:ident, { $($field:ident : $fty:ty),+ $(,)? }) => {
        impl Component for $ty {
            const SIZE: usize = 0 $(+ <$fty as Component>::SIZE)+;

            fn read(reader: &mut Reader<'_>) -> Result<Self, DecodeError> {
                Ok(Self {
                    $($field: <$fty as Component>::read(reader)?,)+
                })
            }

            fn write(&self, out: &mut impl BufMut) {
                $(self.$field.write(out);)+
            }
        }

        impl MessageHeader for $ty {
            fn payload_size(&self) -> usize {
                0
            }

            fn into_message(self, _payload: &mut Reader<'_>) -> Result<Message, DecodeError> {
                Ok(Message::$kind(self))
            }
        }

        impl EncodeMessage for $ty {
            const KIND: MessageKind = MessageKind::$kind;

            fn write_header(&self, out: &mut impl BufMut) {
                Component::write(self, out);
            }

            fn write_payload(&self, _out: &mut impl BufMut) {}
        }
    };
}

/// `id` is now a child of `parent`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SpanParent {
    pub id: u32,
    pub parent: u32,
}

header_only_message!(SpanParent, SpanParent, { id: u32, parent: u32 });

/// `id` is a sibling that follows `follows`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SpanFollows {
    pub id: u32,
    pub follows: u32,
}

header_only_message!(SpanFollows, SpanFollows, { id: u32, follows: u32 });

/// Live statistics of a span.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SpanUpdate {
    pub id: u32,
    pub run_count: u32,
    pub average: Duration,
    pub min: Duration,
    pub max: Duration,
}

header_only_message!(SpanUpdate, SpanUpdate, {
    id: u32,
    run_count: u32,
    average: Duration,
    min: Duration,
    max: Duration,
});

/// Limits advertised by the server right after the handshake.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerConfig {
    pub max_rows: u32,
    pub min_period: u16,
}

header_only_message!(ServerConfig, ServerConfig, { max_rows: u32, min_period: u16 });

// ============================================================================
// SpanEvent (4)
// ============================================================================

/// A log event inside a span. `message` is a delimited row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SpanEvent {
    pub id: u32,
    pub timestamp: i64,
    pub level: Level,
    pub message: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SpanEventHeader {
    pub id: u32,
    pub timestamp: i64,
    pub level: Level,
    pub message: Vchar,
}

impl Component for SpanEventHeader {
    const SIZE: usize = u32::SIZE + i64::SIZE + Level::SIZE + Vchar::SIZE;

    fn read(reader: &mut Reader<'_>) -> Result<Self, DecodeError> {
        Ok(Self {
            id: u32::read(reader)?,
            timestamp: i64::read(reader)?,
            level: Level::read(reader)?,
            message: Vchar::read(reader)?,
        })
    }

    fn write(&self, out: &mut impl BufMut) {
        self.id.write(out);
        self.timestamp.write(out);
        self.level.write(out);
        self.message.write(out);
    }
}

impl MessageHeader for SpanEventHeader {
    fn payload_size(&self) -> usize {
        self.message.payload_size()
    }

    fn into_message(self, payload: &mut Reader<'_>) -> Result<Message, DecodeError> {
        Ok(Message::SpanEvent(SpanEvent {
            id: self.id,
            timestamp: self.timestamp,
            level: self.level,
            message: self.message.read_payload(payload)?,
        }))
    }
}

impl EncodeMessage for SpanEvent {
    const KIND: MessageKind = MessageKind::SpanEvent;

    fn write_header(&self, out: &mut impl BufMut) {
        SpanEventHeader {
            id: self.id,
            timestamp: self.timestamp,
            level: self.level,
            message: Vchar::of(&self.message),
        }
        .write(out);
    }

    fn write_payload(&self, out: &mut impl BufMut) {
        out.put_slice(self.message.as_bytes());
    }
}

// ============================================================================
// SpanDataset (6)
// ============================================================================

/// A batch of recorded runs for one span, as a delimited text blob.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SpanDataset {
    pub id: u32,
    pub run_count: u32,
    pub content: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SpanDatasetHeader {
    pub id: u32,
    pub run_count: u32,
    pub content: Vchar,
}

impl Component for SpanDatasetHeader {
    const SIZE: usize = u32::SIZE * 2 + Vchar::SIZE;

    fn read(reader: &mut Reader<'_>) -> Result<Self, DecodeError> {
        Ok(Self {
            id: u32::read(reader)?,
            run_count: u32::read(reader)?,
            content: Vchar::read(reader)?,
        })
    }

    fn write(&self, out: &mut impl BufMut) {
        self.id.write(out);
        self.run_count.write(out);
        self.content.write(out);
    }
}

impl MessageHeader for SpanDatasetHeader {
    fn payload_size(&self) -> usize {
        self.content.payload_size()
    }

    fn into_message(self, payload: &mut Reader<'_>) -> Result<Message, DecodeError> {
        Ok(Message::SpanDataset(SpanDataset {
            id: self.id,
            run_count: self.run_count,
            content: self.content.read_payload(payload)?,
        }))
    }
}

impl EncodeMessage for SpanDataset {
    const KIND: MessageKind = MessageKind::SpanDataset;

    fn write_header(&self, out: &mut impl BufMut) {
        SpanDatasetHeader {
            id: self.id,
            run_count: self.run_count,
            content: Vchar::of(&self.content),
        }
        .write(out);
    }

    fn write_payload(&self, out: &mut impl BufMut) {
        out.put_slice(self.content.as_bytes());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_codes() {
        assert_eq!(MessageKind::Project.code(), 0);
        assert_eq!(MessageKind::SpanDataset.code(), 6);
        assert_eq!(MessageKind::ServerConfig.code(), 7);
    }

    #[test]
    fn test_static_header_sizes() {
        assert_eq!(SpanParent::SIZE, 8);
        assert_eq!(SpanUpdate::SIZE, 4 + 4 + 8 * 3);
        assert_eq!(ServerConfig::SIZE, 6);
        assert_eq!(MetadataHeader::SIZE, 1 + 5 + 4 + 4 + 5 + 5);
        assert_eq!(ProjectHeader::SIZE, 16 + 12 + 9);
    }

    #[test]
    fn test_metadata_header_payload_size() {
        let meta = Metadata {
            level: Level::Warning,
            line: Some(12),
            name: "work".into(),
            target: "app".into(),
            module_path: None,
            file: Some("main.rs".into()),
        };
        assert_eq!(meta.header().payload_size(), 4 + 3 + 7);
    }

    #[test]
    fn test_header_only_payload_is_empty() {
        let mut reader = Reader::new(&[]);
        let msg = SpanParent { id: 2, parent: 1 }
            .into_message(&mut reader)
            .unwrap();
        assert_eq!(msg, Message::SpanParent(SpanParent { id: 2, parent: 1 }));
    }
}
