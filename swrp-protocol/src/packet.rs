//! SWRP packet framing.
//!
//! Packet layout (16-byte header, little-endian, CRC over header + payload):
//!
//! ```text
//! +--------+---------+------+--------+----------+-------------+
//! | magic  | version | type | flags  | sequence | payload_len |
//! | 4 bytes| 1 byte  |1 byte|2 bytes | 4 bytes  |   4 bytes   |
//! +--------+---------+------+--------+----------+-------------+
//! | payload                                     | crc32c      |
//! | payload_len bytes                           | 4 bytes     |
//! +---------------------------------------------+-------------+
//! ```

use bytes::Bytes;

use crate::checksum::crc32c;
use crate::codec::{ByteReader, ByteWriter};
use crate::error::ProtocolError;
use crate::{MAX_PAYLOAD_SIZE, PROTOCOL_VERSION};

/// Magic bytes identifying SWRP packets: "SWRP" (0x50525753 read little-endian).
pub const MAGIC: [u8; 4] = *b"SWRP";

/// Size of the fixed packet header in bytes (4+1+1+2+4+4 = 16).
pub const HEADER_SIZE: usize = 16;

/// Size of the trailing CRC32C in bytes.
pub const CRC_SIZE: usize = 4;

/// Packet types. Each request type has exactly one response type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum PacketType {
    Hello = 0x01,
    HelloAck = 0x02,
    Start = 0x03,
    StartAck = 0x04,
    Frame = 0x10,
    FrameAck = 0x11,
    Stop = 0x30,
    StopAck = 0x31,
    Ping = 0x40,
    Pong = 0x41,
}

impl PacketType {
    pub fn from_u8(value: u8) -> Result<Self, ProtocolError> {
        match value {
            0x01 => Ok(PacketType::Hello),
            0x02 => Ok(PacketType::HelloAck),
            0x03 => Ok(PacketType::Start),
            0x04 => Ok(PacketType::StartAck),
            0x10 => Ok(PacketType::Frame),
            0x11 => Ok(PacketType::FrameAck),
            0x30 => Ok(PacketType::Stop),
            0x31 => Ok(PacketType::StopAck),
            0x40 => Ok(PacketType::Ping),
            0x41 => Ok(PacketType::Pong),
            _ => Err(ProtocolError::UnknownPacketType(value)),
        }
    }

    /// The response type paired with this request, or `None` for responses.
    pub fn response_type(self) -> Option<PacketType> {
        match self {
            PacketType::Hello => Some(PacketType::HelloAck),
            PacketType::Start => Some(PacketType::StartAck),
            PacketType::Frame => Some(PacketType::FrameAck),
            PacketType::Stop => Some(PacketType::StopAck),
            PacketType::Ping => Some(PacketType::Pong),
            _ => None,
        }
    }
}

/// Parsed packet header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PacketHeader {
    pub packet_type: PacketType,
    /// Reserved, zero in v1.
    pub flags: u16,
    /// Monotonically increasing per sender; may wrap.
    pub sequence: u32,
    pub payload_length: u32,
}

impl PacketHeader {
    pub fn new(packet_type: PacketType, sequence: u32, payload_length: u32) -> Self {
        Self {
            packet_type,
            flags: 0,
            sequence,
            payload_length,
        }
    }

    fn write(&self, w: &mut ByteWriter) {
        w.put_slice(&MAGIC);
        w.put_u8(PROTOCOL_VERSION);
        w.put_u8(self.packet_type as u8);
        w.put_u16(self.flags);
        w.put_u32(self.sequence);
        w.put_u32(self.payload_length);
    }

    /// Parses the 16-byte header from the front of `data`.
    pub fn parse(data: &[u8]) -> Result<Self, ProtocolError> {
        let mut r = ByteReader::new(data);
        if data.len() < HEADER_SIZE {
            return Err(ProtocolError::BufferTooShort {
                needed: HEADER_SIZE,
                available: data.len(),
            });
        }

        let magic: [u8; 4] = r.read_slice(4)?.try_into().unwrap();
        if magic != MAGIC {
            return Err(ProtocolError::InvalidMagic(magic));
        }

        let version = r.read_u8()?;
        if version != PROTOCOL_VERSION {
            return Err(ProtocolError::UnsupportedVersion(version));
        }

        let packet_type = PacketType::from_u8(r.read_u8()?)?;
        let flags = r.read_u16()?;
        let sequence = r.read_u32()?;
        let payload_length = r.read_u32()?;

        if payload_length as usize > MAX_PAYLOAD_SIZE {
            return Err(ProtocolError::InvalidPayloadLength {
                expected: MAX_PAYLOAD_SIZE,
                actual: payload_length as usize,
            });
        }

        Ok(Self {
            packet_type,
            flags,
            sequence,
            payload_length,
        })
    }
}

/// A complete packet: header plus opaque payload.
///
/// The payload's interpretation is determined by [`PacketType`]; see the
/// [`payload`](crate::payload) module for the typed forms.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Packet {
    pub header: PacketHeader,
    pub payload: Bytes,
}

impl Packet {
    pub fn new(packet_type: PacketType, sequence: u32, payload: Bytes) -> Self {
        Self {
            header: PacketHeader::new(packet_type, sequence, payload.len() as u32),
            payload,
        }
    }

    /// Parses exactly one packet from the front of `data`.
    ///
    /// Returns the packet and the number of bytes consumed; trailing bytes
    /// are left for the caller. The CRC is verified last, over header and
    /// payload.
    pub fn parse(data: &[u8]) -> Result<(Self, usize), ProtocolError> {
        let header = PacketHeader::parse(data)?;
        let payload_end = HEADER_SIZE + header.payload_length as usize;
        let total = payload_end + CRC_SIZE;

        if data.len() < total {
            return Err(ProtocolError::BufferTooShort {
                needed: total,
                available: data.len(),
            });
        }

        let expected = u32::from_le_bytes([
            data[payload_end],
            data[payload_end + 1],
            data[payload_end + 2],
            data[payload_end + 3],
        ]);
        let actual = crc32c(&data[..payload_end]);
        if expected != actual {
            return Err(ProtocolError::ChecksumMismatch { expected, actual });
        }

        let payload = Bytes::copy_from_slice(&data[HEADER_SIZE..payload_end]);
        Ok((Self { header, payload }, total))
    }

    /// Serializes the packet: header, payload, then the CRC.
    pub fn to_bytes(&self) -> Bytes {
        let mut w = ByteWriter::with_capacity(HEADER_SIZE + self.payload.len() + CRC_SIZE);
        self.header.write(&mut w);
        w.put_slice(&self.payload);
        let crc = crc32c(w.as_slice());
        w.put_u32(crc);
        w.into_bytes()
    }

    /// Total wire size of this packet.
    pub fn wire_size(&self) -> usize {
        HEADER_SIZE + self.payload.len() + CRC_SIZE
    }

    pub fn packet_type(&self) -> PacketType {
        self.header.packet_type
    }

    pub fn sequence(&self) -> u32 {
        self.header.sequence
    }
}
