//! # swrp-protocol
//!
//! Wire protocol implementation for SerialWarp (SWRP).
//!
//! This crate provides:
//! - Little-endian binary codec primitives
//! - Packet framing with a fixed 16-byte header and CRC32C validation
//! - Typed payloads for every packet type
//! - Frame segmentation and reassembly for encoded video frames

pub mod checksum;
pub mod codec;
pub mod error;
pub mod frame;
pub mod packet;
pub mod payload;

pub use codec::{ByteReader, ByteWriter};
pub use error::ProtocolError;
pub use frame::{EncodedFrame, FrameMetadata, FrameReassembler, FrameSegment};
pub use packet::{Packet, PacketHeader, PacketType, HEADER_SIZE, MAGIC};
pub use payload::{
    FrameAckPayload, FrameHeader, HelloPayload, PingPayload, PongPayload, StartAckPayload,
    StartPayload, CAP_AUDIO, CAP_HIDPI, CAP_KNOWN_MASK, START_STATUS_OK,
    START_STATUS_UNSUPPORTED,
};

/// Protocol version supported by this implementation.
pub const PROTOCOL_VERSION: u8 = 1;

/// Maximum segment size for encoded frame data (64 KiB).
pub const MAX_SEGMENT_SIZE: usize = 65536;

/// Maximum payload size of any v1 packet: a FRAME carrying a full segment.
pub const MAX_PAYLOAD_SIZE: usize = payload::FrameHeader::SIZE + MAX_SEGMENT_SIZE;
