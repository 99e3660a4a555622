//! Protocol error types.

use thiserror::Error;

/// Errors that can occur while framing, parsing, or segmenting.
#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("invalid magic bytes: expected 'SWRP', got {0:?}")]
    InvalidMagic([u8; 4]),

    #[error("unsupported protocol version: {0}")]
    UnsupportedVersion(u8),

    #[error("unknown packet type: {0:#04x}")]
    UnknownPacketType(u8),

    #[error("buffer too short: need {needed} bytes, have {available}")]
    BufferTooShort { needed: usize, available: usize },

    #[error("checksum mismatch: expected {expected:#010x}, got {actual:#010x}")]
    ChecksumMismatch { expected: u32, actual: u32 },

    #[error("invalid payload length: expected {expected}, got {actual}")]
    InvalidPayloadLength { expected: usize, actual: usize },

    #[error("frame too large: {size} bytes needs more than {max_segments} segments")]
    FrameTooLarge { size: usize, max_segments: u16 },

    #[error("frame reassembly error: {0}")]
    FrameReassemblyError(String),

    #[error("parse error: {0}")]
    ParseError(String),
}
