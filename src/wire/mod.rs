//! Framing transport wire format (C1) and the KV-map sub-records shared by
//! both protocol versions (C2).
//!
//! Frame layout, per byte offset:
//!
//! ```text
//! 0..4   magic      b"KDSP"
//! 4      version    1 (v2, legacy) | 2 (v3, compact)
//! 5..9   size       u32 big-endian, length of `content`
//! 9..13  seqno      u32 big-endian, 0 for unsolicited reports
//! 13..17 checksum   adler32 of `content`
//! 17..   content    version-specific payload
//! ```

pub mod v2;
pub mod v3;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::types::adler32;

pub const FRAME_MAGIC: [u8; 4] = *b"KDSP";
pub const FRAME_HEADER_LEN: usize = 17;

/// Hard ceiling on a single frame's content length, protecting the reader
/// from a runaway helper claiming an unbounded size.
pub const MAX_FRAME_SIZE: u32 = 16 * 1024 * 1024;

#[derive(Debug, Error)]
pub enum WireError {
    #[error("frame too short: need {need} bytes, have {have}")]
    TooShort { need: usize, have: usize },
    #[error("bad magic bytes")]
    BadMagic,
    #[error("unsupported frame version: {0}")]
    UnsupportedVersion(u8),
    #[error("frame size {0} exceeds maximum of {MAX_FRAME_SIZE}")]
    TooLarge(u32),
    #[error("checksum mismatch: expected {expected:#x}, got {got:#x}")]
    ChecksumMismatch { expected: u32, got: u32 },
    #[error("content decode error: {0}")]
    Decode(String),
}

/// Wire protocol version negotiated at handshake.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProtoVersion {
    /// Legacy JSON-KV framed protocol.
    V2,
    /// Compact binary sub-record protocol.
    V3,
}

impl ProtoVersion {
    fn wire_tag(self) -> u8 {
        match self {
            ProtoVersion::V2 => 1,
            ProtoVersion::V3 => 2,
        }
    }

    fn from_wire_tag(tag: u8) -> Result<Self, WireError> {
        match tag {
            1 => Ok(ProtoVersion::V2),
            2 => Ok(ProtoVersion::V3),
            other => Err(WireError::UnsupportedVersion(other)),
        }
    }
}

/// A single length-prefixed, checksummed frame.
#[derive(Debug, Clone)]
pub struct Frame {
    pub version: ProtoVersion,
    pub seqno: u32,
    pub content: Vec<u8>,
}

impl Frame {
    pub fn new(version: ProtoVersion, seqno: u32, content: Vec<u8>) -> Self {
        Self { version, seqno, content }
    }

    /// Serialize to the on-wire byte representation.
    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(FRAME_HEADER_LEN + self.content.len());
        buf.extend_from_slice(&FRAME_MAGIC);
        buf.push(self.version.wire_tag());
        buf.extend_from_slice(&(self.content.len() as u32).to_be_bytes());
        buf.extend_from_slice(&self.seqno.to_be_bytes());
        buf.extend_from_slice(&adler32(&self.content).to_be_bytes());
        buf.extend_from_slice(&self.content);
        buf
    }

    /// Decode a header + content buffer already sized to `size` (the
    /// transport is responsible for reading exactly `FRAME_HEADER_LEN +
    /// size` bytes before calling this).
    pub fn decode(buf: &[u8]) -> Result<Self, WireError> {
        if buf.len() < FRAME_HEADER_LEN {
            return Err(WireError::TooShort { need: FRAME_HEADER_LEN, have: buf.len() });
        }
        if buf[0..4] != FRAME_MAGIC {
            return Err(WireError::BadMagic);
        }
        let version = ProtoVersion::from_wire_tag(buf[4])?;
        let size = u32::from_be_bytes(buf[5..9].try_into().unwrap());
        if size > MAX_FRAME_SIZE {
            return Err(WireError::TooLarge(size));
        }
        let seqno = u32::from_be_bytes(buf[9..13].try_into().unwrap());
        let checksum = u32::from_be_bytes(buf[13..17].try_into().unwrap());

        let content = &buf[FRAME_HEADER_LEN..];
        if content.len() != size as usize {
            return Err(WireError::TooShort { need: size as usize, have: content.len() });
        }
        let actual = adler32(content);
        if actual != checksum {
            return Err(WireError::ChecksumMismatch { expected: checksum, got: actual });
        }

        Ok(Self {
            version,
            seqno,
            content: content.to_vec(),
        })
    }
}

/// Command envelope sent to a helper/remote (v2/v3 share this shape once
/// decoded; only the wire encoding of `content` differs).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Command {
    pub seqno: u32,
    pub kind: CommandKind,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum CommandKind {
    Probe { definition: String },
    ListInterfaces,
    Open { definition: String },
    SetChannel { channel: String },
    SetChanset { channels: Vec<String> },
    Ping,
    Pong,
    Close,
}

/// Response envelope from a helper/remote.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Ack {
    pub seqno: u32,
    pub success: bool,
    pub message: Option<String>,
    pub kind: AckKind,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AckKind {
    ProbeResult { supported: bool, caps: u32 },
    InterfaceList { interfaces: Vec<String> },
    OpenResult(crate::types::OpenReport),
    ChannelSet,
    Pong,
    Closed,
    /// An unsolicited capture report, carried on the same envelope as
    /// command acks (seqno 0) rather than a separate frame shape.
    Report(crate::types::DataReport),
    Generic,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn frame_round_trips() {
        let frame = Frame::new(ProtoVersion::V3, 42, b"hello world".to_vec());
        let encoded = frame.encode();
        let decoded = Frame::decode(&encoded).unwrap();
        assert_eq!(decoded.seqno, 42);
        assert_eq!(decoded.version, ProtoVersion::V3);
        assert_eq!(decoded.content, b"hello world");
    }

    #[test]
    fn rejects_bad_magic() {
        let mut buf = Frame::new(ProtoVersion::V2, 1, vec![1, 2, 3]).encode();
        buf[0] = b'X';
        assert!(matches!(Frame::decode(&buf), Err(WireError::BadMagic)));
    }

    #[test]
    fn rejects_checksum_mismatch() {
        let mut buf = Frame::new(ProtoVersion::V2, 1, vec![1, 2, 3]).encode();
        let last = buf.len() - 1;
        buf[last] ^= 0xFF;
        assert!(matches!(Frame::decode(&buf), Err(WireError::ChecksumMismatch { .. })));
    }

    #[test]
    fn rejects_oversized_frame() {
        let mut buf = Frame::new(ProtoVersion::V2, 1, vec![1, 2, 3]).encode();
        buf[5..9].copy_from_slice(&(MAX_FRAME_SIZE + 1).to_be_bytes());
        assert!(matches!(Frame::decode(&buf), Err(WireError::TooLarge(_))));
    }
}
