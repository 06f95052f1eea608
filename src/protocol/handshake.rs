//! Connection handshake (the 40-byte hello message).
//!
//! ```text
//! ┌───────────┬───────────┬───────────┬──────────────────────────┐
//! │ Signature │ Protocol  │ Major     │ Pre-release              │
//! │ 4 bytes   │ 4 bytes   │ u64 LE    │ 24 bytes, zero-padded    │
//! └───────────┴───────────┴───────────┴──────────────────────────┘
//! ```
//!
//! The server sends it once, first thing on the socket. The client checks
//! every field for exact equality and echoes its own hello on success.

use std::fmt;

use crate::error::HandshakeError;

/// Size of the hello message in bytes (fixed, exactly 40).
pub const HELLO_SIZE: usize = 40;

/// Length of the pre-release identifier.
pub const PRE_RELEASE_SIZE: usize = 24;

/// `b"BP3D"` read as a little-endian u32.
pub const SIGNATURE: u32 = u32::from_le_bytes(*b"BP3D");

/// `b"PROF"` read as a little-endian u32.
pub const PROTOCOL_NAME: u32 = u32::from_le_bytes(*b"PROF");

/// Major version spoken by this client.
pub const PROTOCOL_MAJOR: u64 = 1;

/// Pre-release identifier spoken by this client.
pub const PROTOCOL_PRE_RELEASE: &str = "rc.2.0.0";

/// Default TCP port of the debug server.
pub const DEFAULT_PORT: u16 = 4026;

/// Protocol version: major number plus a raw 24-byte pre-release tag.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct Version {
    pub major: u64,
    pub pre_release: [u8; PRE_RELEASE_SIZE],
}

impl Version {
    /// Build a version, truncating or zero-padding `pre_release` to 24 bytes.
    pub fn new(major: u64, pre_release: &str) -> Self {
        let mut buf = [0u8; PRE_RELEASE_SIZE];
        let bytes = pre_release.as_bytes();
        let len = bytes.len().min(PRE_RELEASE_SIZE);
        buf[..len].copy_from_slice(&bytes[..len]);
        Self {
            major,
            pre_release: buf,
        }
    }

    /// The version this client expects.
    pub fn current() -> Self {
        Self::new(PROTOCOL_MAJOR, PROTOCOL_PRE_RELEASE)
    }

    /// Exact equality on major and every pre-release byte.
    #[inline]
    pub fn matches(&self, other: &Version) -> bool {
        self.major == other.major && self.pre_release == other.pre_release
    }

    /// Pre-release tag up to the first zero byte, lossily decoded.
    pub fn pre_release_str(&self) -> String {
        let end = self
            .pre_release
            .iter()
            .position(|&b| b == 0)
            .unwrap_or(PRE_RELEASE_SIZE);
        String::from_utf8_lossy(&self.pre_release[..end]).into_owned()
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let pre = self.pre_release_str();
        if pre.is_empty() {
            write!(f, "{}", self.major)
        } else {
            write!(f, "{}-{}", self.major, pre)
        }
    }
}

impl fmt::Debug for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Version({self})")
    }
}

/// Decoded hello message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HandshakeMessage {
    pub signature: u32,
    pub name: u32,
    pub version: Version,
}

impl HandshakeMessage {
    /// The hello this client expects and sends back.
    pub fn expected() -> Self {
        Self {
            signature: SIGNATURE,
            name: PROTOCOL_NAME,
            version: Version::current(),
        }
    }

    /// Encode to the fixed 40-byte layout.
    pub fn encode(&self) -> [u8; HELLO_SIZE] {
        let mut buf = [0u8; HELLO_SIZE];
        buf[0..4].copy_from_slice(&self.signature.to_le_bytes());
        buf[4..8].copy_from_slice(&self.name.to_le_bytes());
        buf[8..16].copy_from_slice(&self.version.major.to_le_bytes());
        buf[16..40].copy_from_slice(&self.version.pre_release);
        buf
    }

    /// Decode from bytes.
    ///
    /// Returns `None` if fewer than 40 bytes are available.
    pub fn decode(buf: &[u8]) -> Option<Self> {
        if buf.len() < HELLO_SIZE {
            return None;
        }
        let mut pre_release = [0u8; PRE_RELEASE_SIZE];
        pre_release.copy_from_slice(&buf[16..40]);
        Some(Self {
            signature: u32::from_le_bytes([buf[0], buf[1], buf[2], buf[3]]),
            name: u32::from_le_bytes([buf[4], buf[5], buf[6], buf[7]]),
            version: Version {
                major: u64::from_le_bytes([
                    buf[8], buf[9], buf[10], buf[11], buf[12], buf[13], buf[14], buf[15],
                ]),
                pre_release,
            },
        })
    }

    /// Check signature, protocol name and version against `expected`, in that order.
    pub fn validate(&self, expected: &HandshakeMessage) -> Result<(), HandshakeError> {
        if self.signature != expected.signature {
            return Err(HandshakeError::SignatureMismatch {
                expected: expected.signature,
                actual: self.signature,
            });
        }
        if self.name != expected.name {
            return Err(HandshakeError::ProtocolMismatch {
                expected: expected.name,
                actual: self.name,
            });
        }
        if !self.version.matches(&expected.version) {
            return Err(HandshakeError::VersionMismatch {
                expected: expected.version,
                actual: self.version,
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_magic_constants() {
        assert_eq!(SIGNATURE, 0x4433_5042);
        assert_eq!(PROTOCOL_NAME, 0x464F_5250);
    }

    #[test]
    fn test_encode_layout() {
        let bytes = HandshakeMessage::expected().encode();
        assert_eq!(bytes.len(), HELLO_SIZE);
        assert_eq!(&bytes[0..4], b"BP3D");
        assert_eq!(&bytes[4..8], b"PROF");
        assert_eq!(&bytes[8..16], &1u64.to_le_bytes());
        assert_eq!(&bytes[16..24], b"rc.2.0.0");
        assert!(bytes[24..].iter().all(|&b| b == 0));
    }

    #[test]
    fn test_decode_too_short() {
        let bytes = [0u8; HELLO_SIZE - 1];
        assert!(HandshakeMessage::decode(&bytes).is_none());
    }

    #[test]
    fn test_validate_ok() {
        let hello = HandshakeMessage::decode(&HandshakeMessage::expected().encode()).unwrap();
        assert!(hello.validate(&HandshakeMessage::expected()).is_ok());
    }

    #[test]
    fn test_validate_signature_first() {
        // Everything wrong: the signature is reported
        let hello = HandshakeMessage {
            signature: 0,
            name: 0,
            version: Version::new(9, "x"),
        };
        let err = hello.validate(&HandshakeMessage::expected()).unwrap_err();
        assert!(matches!(err, HandshakeError::SignatureMismatch { .. }));
    }

    #[test]
    fn test_validate_protocol_name() {
        let mut hello = HandshakeMessage::expected();
        hello.name = u32::from_le_bytes(*b"PRO0");
        let err = hello.validate(&HandshakeMessage::expected()).unwrap_err();
        assert!(matches!(err, HandshakeError::ProtocolMismatch { .. }));
    }

    #[test]
    fn test_validate_version_is_exact() {
        let expected = HandshakeMessage::expected();

        let mut hello = expected;
        hello.version = Version::new(2, PROTOCOL_PRE_RELEASE);
        assert!(matches!(
            hello.validate(&expected),
            Err(HandshakeError::VersionMismatch { .. })
        ));

        // A "compatible" pre-release is still a mismatch
        hello.version = Version::new(1, "rc.2.0.1");
        assert!(matches!(
            hello.validate(&expected),
            Err(HandshakeError::VersionMismatch { .. })
        ));
    }

    #[test]
    fn test_version_truncates_pre_release() {
        let long = "a".repeat(40);
        let v = Version::new(1, &long);
        assert_eq!(v.pre_release_str().len(), PRE_RELEASE_SIZE);
        assert_eq!(Version::current().to_string(), "1-rc.2.0.0");
    }
}
