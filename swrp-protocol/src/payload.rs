//! Typed payloads for each packet type.
//!
//! All payloads are fixed-size little-endian structures. STOP and STOP_ACK
//! carry no payload. FRAME payloads are a 32-byte [`FrameHeader`] followed by
//! the segment bytes.

use bytes::Bytes;

use crate::codec::{ByteReader, ByteWriter};
use crate::error::ProtocolError;
use crate::PROTOCOL_VERSION;

/// Capability bit: the endpoint supports HiDPI scaling.
pub const CAP_HIDPI: u32 = 0x01;

/// Capability bit: the endpoint supports audio (reserved, unused in v1).
pub const CAP_AUDIO: u32 = 0x02;

/// Mask of capability bits this implementation understands. Unknown bits are
/// preserved on echo and otherwise ignored.
pub const CAP_KNOWN_MASK: u32 = CAP_HIDPI | CAP_AUDIO;

/// START_ACK status: session accepted.
pub const START_STATUS_OK: u8 = 0;

/// START_ACK status: requested parameters exceed the sink's capabilities.
pub const START_STATUS_UNSUPPORTED: u8 = 1;

fn check_len(data: &[u8], expected: usize) -> Result<(), ProtocolError> {
    if data.len() < expected {
        return Err(ProtocolError::InvalidPayloadLength {
            expected,
            actual: data.len(),
        });
    }
    Ok(())
}

/// HELLO / HELLO_ACK payload (28 bytes).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HelloPayload {
    pub software_version: u16,
    pub min_protocol_version: u16,
    pub max_protocol_version: u16,
    pub reserved1: u16,
    pub max_width: u32,
    pub max_height: u32,
    /// Fixed-point 16.16 frames per second.
    pub max_fps_fixed: u32,
    pub capabilities: u32,
    pub reserved2: u32,
}

impl HelloPayload {
    pub const SIZE: usize = 28;

    pub fn new(
        software_version: u16,
        max_width: u32,
        max_height: u32,
        max_fps: u32,
        capabilities: u32,
    ) -> Self {
        Self {
            software_version,
            min_protocol_version: PROTOCOL_VERSION as u16,
            max_protocol_version: PROTOCOL_VERSION as u16,
            reserved1: 0,
            max_width,
            max_height,
            max_fps_fixed: max_fps << 16,
            capabilities,
            reserved2: 0,
        }
    }

    pub fn to_bytes(&self) -> Bytes {
        let mut w = ByteWriter::with_capacity(Self::SIZE);
        w.put_u16(self.software_version);
        w.put_u16(self.min_protocol_version);
        w.put_u16(self.max_protocol_version);
        w.put_u16(self.reserved1);
        w.put_u32(self.max_width);
        w.put_u32(self.max_height);
        w.put_u32(self.max_fps_fixed);
        w.put_u32(self.capabilities);
        w.put_u32(self.reserved2);
        w.into_bytes()
    }

    pub fn parse(data: &[u8]) -> Result<Self, ProtocolError> {
        check_len(data, Self::SIZE)?;
        let mut r = ByteReader::new(data);
        Ok(Self {
            software_version: r.read_u16()?,
            min_protocol_version: r.read_u16()?,
            max_protocol_version: r.read_u16()?,
            reserved1: r.read_u16()?,
            max_width: r.read_u32()?,
            max_height: r.read_u32()?,
            max_fps_fixed: r.read_u32()?,
            capabilities: r.read_u32()?,
            reserved2: r.read_u32()?,
        })
    }

    /// Whole frames per second (fractional 16.16 bits ignored in v1).
    pub fn max_fps(&self) -> u32 {
        self.max_fps_fixed >> 16
    }

    pub fn supports_hidpi(&self) -> bool {
        self.capabilities & CAP_HIDPI != 0
    }

    pub fn supports_audio(&self) -> bool {
        self.capabilities & CAP_AUDIO != 0
    }

    /// Capability bits this implementation does not understand.
    pub fn unknown_capabilities(&self) -> u32 {
        self.capabilities & !CAP_KNOWN_MASK
    }
}

/// START payload (24 bytes).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StartPayload {
    pub width: u32,
    pub height: u32,
    /// Fixed-point 16.16 frames per second.
    pub fps_fixed: u32,
    pub bitrate_bps: u32,
    pub pixel_format: u8,
    pub audio_enabled: u8,
    pub audio_sample_rate: u16,
    pub audio_channels: u8,
    pub audio_bits: u8,
    pub reserved: u16,
}

impl StartPayload {
    pub const SIZE: usize = 24;

    pub fn new(width: u32, height: u32, fps: u32, bitrate_bps: u32) -> Self {
        Self {
            width,
            height,
            fps_fixed: fps << 16,
            bitrate_bps,
            pixel_format: 0,
            audio_enabled: 0,
            audio_sample_rate: 0,
            audio_channels: 0,
            audio_bits: 0,
            reserved: 0,
        }
    }

    pub fn to_bytes(&self) -> Bytes {
        let mut w = ByteWriter::with_capacity(Self::SIZE);
        w.put_u32(self.width);
        w.put_u32(self.height);
        w.put_u32(self.fps_fixed);
        w.put_u32(self.bitrate_bps);
        w.put_u8(self.pixel_format);
        w.put_u8(self.audio_enabled);
        w.put_u16(self.audio_sample_rate);
        w.put_u8(self.audio_channels);
        w.put_u8(self.audio_bits);
        w.put_u16(self.reserved);
        w.into_bytes()
    }

    pub fn parse(data: &[u8]) -> Result<Self, ProtocolError> {
        check_len(data, Self::SIZE)?;
        let mut r = ByteReader::new(data);
        let payload = Self {
            width: r.read_u32()?,
            height: r.read_u32()?,
            fps_fixed: r.read_u32()?,
            bitrate_bps: r.read_u32()?,
            pixel_format: r.read_u8()?,
            audio_enabled: r.read_u8()?,
            audio_sample_rate: r.read_u16()?,
            audio_channels: r.read_u8()?,
            audio_bits: r.read_u8()?,
            reserved: r.read_u16()?,
        };

        if payload.width == 0 || payload.height == 0 {
            return Err(ProtocolError::ParseError(format!(
                "START with zero dimension: {}x{}",
                payload.width, payload.height
            )));
        }

        Ok(payload)
    }

    pub fn fps(&self) -> u32 {
        self.fps_fixed >> 16
    }
}

/// START_ACK payload (4 bytes).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StartAckPayload {
    pub status: u8,
    pub reserved: u8,
    pub initial_credits: u16,
}

impl StartAckPayload {
    pub const SIZE: usize = 4;

    /// Default flow-control grant when the sink does not override it.
    pub const DEFAULT_CREDITS: u16 = 8;

    pub fn ok(initial_credits: u16) -> Self {
        Self {
            status: START_STATUS_OK,
            reserved: 0,
            initial_credits,
        }
    }

    pub fn rejected(status: u8) -> Self {
        Self {
            status,
            reserved: 0,
            initial_credits: 0,
        }
    }

    pub fn to_bytes(&self) -> Bytes {
        let mut w = ByteWriter::with_capacity(Self::SIZE);
        w.put_u8(self.status);
        w.put_u8(self.reserved);
        w.put_u16(self.initial_credits);
        w.into_bytes()
    }

    pub fn parse(data: &[u8]) -> Result<Self, ProtocolError> {
        check_len(data, Self::SIZE)?;
        let mut r = ByteReader::new(data);
        Ok(Self {
            status: r.read_u8()?,
            reserved: r.read_u8()?,
            initial_credits: r.read_u16()?,
        })
    }

    pub fn is_ok(&self) -> bool {
        self.status == START_STATUS_OK
    }
}

/// FRAME header (32 bytes, precedes the segment bytes in the payload).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameHeader {
    pub frame_number: u64,
    pub pts_us: u64,
    pub capture_ts_us: u64,
    /// Total encoded size across all segments of this frame.
    pub frame_size: u32,
    pub segment_index: u16,
    pub segment_count: u16,
}

impl FrameHeader {
    pub const SIZE: usize = 32;

    pub fn write(&self, w: &mut ByteWriter) {
        w.put_u64(self.frame_number);
        w.put_u64(self.pts_us);
        w.put_u64(self.capture_ts_us);
        w.put_u32(self.frame_size);
        w.put_u16(self.segment_index);
        w.put_u16(self.segment_count);
    }

    pub fn to_bytes(&self) -> Bytes {
        let mut w = ByteWriter::with_capacity(Self::SIZE);
        self.write(&mut w);
        w.into_bytes()
    }

    pub fn parse(data: &[u8]) -> Result<Self, ProtocolError> {
        check_len(data, Self::SIZE)?;
        let mut r = ByteReader::new(data);
        let header = Self {
            frame_number: r.read_u64()?,
            pts_us: r.read_u64()?,
            capture_ts_us: r.read_u64()?,
            frame_size: r.read_u32()?,
            segment_index: r.read_u16()?,
            segment_count: r.read_u16()?,
        };

        if header.segment_count == 0 {
            return Err(ProtocolError::FrameReassemblyError(
                "segment_count cannot be zero".to_string(),
            ));
        }
        if header.segment_index >= header.segment_count {
            return Err(ProtocolError::FrameReassemblyError(format!(
                "segment_index {} out of range for segment_count {}",
                header.segment_index, header.segment_count
            )));
        }

        Ok(header)
    }
}

/// FRAME_ACK payload (16 bytes).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameAckPayload {
    pub frame_number: u64,
    pub decode_time_us: u32,
    /// Credits returned to the sender: the segment count of the acked frame.
    pub credits_returned: u16,
    pub reserved: u16,
}

impl FrameAckPayload {
    pub const SIZE: usize = 16;

    pub fn new(frame_number: u64, decode_time_us: u32, credits_returned: u16) -> Self {
        Self {
            frame_number,
            decode_time_us,
            credits_returned,
            reserved: 0,
        }
    }

    pub fn to_bytes(&self) -> Bytes {
        let mut w = ByteWriter::with_capacity(Self::SIZE);
        w.put_u64(self.frame_number);
        w.put_u32(self.decode_time_us);
        w.put_u16(self.credits_returned);
        w.put_u16(self.reserved);
        w.into_bytes()
    }

    pub fn parse(data: &[u8]) -> Result<Self, ProtocolError> {
        check_len(data, Self::SIZE)?;
        let mut r = ByteReader::new(data);
        Ok(Self {
            frame_number: r.read_u64()?,
            decode_time_us: r.read_u32()?,
            credits_returned: r.read_u16()?,
            reserved: r.read_u16()?,
        })
    }
}

/// PING payload (8 bytes).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PingPayload {
    pub timestamp_us: u64,
}

impl PingPayload {
    pub const SIZE: usize = 8;

    pub fn new(timestamp_us: u64) -> Self {
        Self { timestamp_us }
    }

    pub fn to_bytes(&self) -> Bytes {
        let mut w = ByteWriter::with_capacity(Self::SIZE);
        w.put_u64(self.timestamp_us);
        w.into_bytes()
    }

    pub fn parse(data: &[u8]) -> Result<Self, ProtocolError> {
        check_len(data, Self::SIZE)?;
        let mut r = ByteReader::new(data);
        Ok(Self {
            timestamp_us: r.read_u64()?,
        })
    }
}

/// PONG payload (16 bytes).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PongPayload {
    pub ping_timestamp_us: u64,
    pub pong_timestamp_us: u64,
}

impl PongPayload {
    pub const SIZE: usize = 16;

    pub fn new(ping_timestamp_us: u64, pong_timestamp_us: u64) -> Self {
        Self {
            ping_timestamp_us,
            pong_timestamp_us,
        }
    }

    pub fn to_bytes(&self) -> Bytes {
        let mut w = ByteWriter::with_capacity(Self::SIZE);
        w.put_u64(self.ping_timestamp_us);
        w.put_u64(self.pong_timestamp_us);
        w.into_bytes()
    }

    pub fn parse(data: &[u8]) -> Result<Self, ProtocolError> {
        check_len(data, Self::SIZE)?;
        let mut r = ByteReader::new(data);
        Ok(Self {
            ping_timestamp_us: r.read_u64()?,
            pong_timestamp_us: r.read_u64()?,
        })
    }
}
