//! Packet Structures and Serialization
//!
//! Every datagram starts with a fixed 32-byte header followed by an optional
//! payload. All multi-byte fields are written in network byte order.
//!
//! ```text
//! offset  size  field
//! 0       4     magic            0x50325055 ("P2PU")
//! 4       1     packet_type
//! 5       1     version
//! 6       2     sequence_num
//! 8       4     frame_id
//! 12      2     packet_id
//! 14      2     total_packets
//! 16      4     frame_size
//! 20      2     data_size
//! 22      2     checksum         additive, over payload only
//! 24      4     timestamp_ms
//! 28      4     reserved
//! ```

use bytes::{Buf, BufMut, Bytes, BytesMut};
use std::fmt;
use thiserror::Error;

/// Size of the packet header in bytes
pub const HEADER_SIZE: usize = 32;

/// Magic number identifying this protocol ("P2PU")
pub const MAGIC: u32 = 0x5032_5055;

/// Protocol version written into every header
pub const PROTOCOL_VERSION: u8 = 1;

/// Largest datagram the link is expected to carry
pub const MAX_DATAGRAM_SIZE: usize = 1400;

/// Maximum payload size per packet (datagram limit minus header)
pub const MAX_PAYLOAD_SIZE: usize = MAX_DATAGRAM_SIZE - HEADER_SIZE;

/// Default maximum size of a single frame (200 KiB)
pub const MAX_FRAME_SIZE: usize = 200 * 1024;

/// Packet types
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum PacketType {
    /// Reserved: start-of-frame marker
    FrameStart = 0x01,
    /// Fragment of a frame
    FrameData = 0x02,
    /// Reserved: end-of-frame marker
    FrameEnd = 0x03,
    /// Positive acknowledgement of one packet
    Ack = 0x04,
    /// Negative acknowledgement (checksum failure)
    Nack = 0x05,
    /// Liveness probe
    Heartbeat = 0x06,
}

impl PacketType {
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            0x01 => Some(PacketType::FrameStart),
            0x02 => Some(PacketType::FrameData),
            0x03 => Some(PacketType::FrameEnd),
            0x04 => Some(PacketType::Ack),
            0x05 => Some(PacketType::Nack),
            0x06 => Some(PacketType::Heartbeat),
            _ => None,
        }
    }

    pub fn as_u8(self) -> u8 {
        self as u8
    }

    /// True for the header-only feedback packets
    pub fn is_feedback(self) -> bool {
        matches!(self, PacketType::Ack | PacketType::Nack)
    }
}

impl fmt::Display for PacketType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            PacketType::FrameStart => "FrameStart",
            PacketType::FrameData => "FrameData",
            PacketType::FrameEnd => "FrameEnd",
            PacketType::Ack => "Ack",
            PacketType::Nack => "Nack",
            PacketType::Heartbeat => "Heartbeat",
        };
        f.write_str(name)
    }
}

/// Additive payload checksum: sum of all bytes modulo 2^16.
///
/// Cheap, not cryptographic. Most corruptions are caught, but swapped bytes
/// or compensating errors are not.
pub fn checksum(payload: &[u8]) -> u16 {
    payload
        .iter()
        .fold(0u16, |sum, &byte| sum.wrapping_add(u16::from(byte)))
}

/// Fixed 32-byte packet header
///
/// The magic and reserved fields are implicit: they are written on
/// serialization and checked (magic) or skipped (reserved) on parsing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PacketHeader {
    /// Packet kind
    pub packet_type: PacketType,
    /// Protocol version
    pub version: u8,
    /// Sender-wide wrapping sequence number of data packets
    pub sequence_num: u16,
    /// Frame this packet belongs to
    pub frame_id: u32,
    /// Position of this packet within its frame
    pub packet_id: u16,
    /// Number of packets in the frame
    pub total_packets: u16,
    /// Total size of the frame in bytes
    pub frame_size: u32,
    /// Size of this packet's payload
    pub data_size: u16,
    /// Checksum over the payload
    pub checksum: u16,
    /// Send timestamp (milliseconds, sender clock)
    pub timestamp_ms: u32,
}

impl PacketHeader {
    /// Create a header for a header-only packet (ACK, NACK, heartbeat)
    pub fn new_control(
        packet_type: PacketType,
        frame_id: u32,
        packet_id: u16,
        timestamp_ms: u32,
    ) -> Self {
        PacketHeader {
            packet_type,
            version: PROTOCOL_VERSION,
            sequence_num: 0,
            frame_id,
            packet_id,
            total_packets: 0,
            frame_size: 0,
            data_size: 0,
            checksum: 0,
            timestamp_ms,
        }
    }

    /// Byte offset of this packet's payload within its frame
    #[inline]
    pub fn frame_offset(&self, max_payload: usize) -> usize {
        usize::from(self.packet_id) * max_payload
    }

    /// Parse header from bytes (network byte order)
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, PacketError> {
        if bytes.len() < HEADER_SIZE {
            return Err(PacketError::Truncated {
                expected: HEADER_SIZE,
                actual: bytes.len(),
            });
        }

        let mut buf = &bytes[..HEADER_SIZE];
        let magic = buf.get_u32();
        if magic != MAGIC {
            return Err(PacketError::InvalidMagic(magic));
        }

        let raw_type = buf.get_u8();
        let packet_type =
            PacketType::from_u8(raw_type).ok_or(PacketError::UnknownPacketType(raw_type))?;

        let header = PacketHeader {
            packet_type,
            version: buf.get_u8(),
            sequence_num: buf.get_u16(),
            frame_id: buf.get_u32(),
            packet_id: buf.get_u16(),
            total_packets: buf.get_u16(),
            frame_size: buf.get_u32(),
            data_size: buf.get_u16(),
            checksum: buf.get_u16(),
            timestamp_ms: buf.get_u32(),
        };
        // The remaining 4 bytes are reserved.
        Ok(header)
    }

    /// Serialize header to bytes (network byte order)
    pub fn to_bytes(&self, buf: &mut BytesMut) {
        buf.put_u32(MAGIC);
        buf.put_u8(self.packet_type.as_u8());
        buf.put_u8(self.version);
        buf.put_u16(self.sequence_num);
        buf.put_u32(self.frame_id);
        buf.put_u16(self.packet_id);
        buf.put_u16(self.total_packets);
        buf.put_u32(self.frame_size);
        buf.put_u16(self.data_size);
        buf.put_u16(self.checksum);
        buf.put_u32(self.timestamp_ms);
        buf.put_u32(0);
    }
}

/// A header plus its payload
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Packet {
    /// Packet header
    pub header: PacketHeader,
    /// Payload data (empty for control packets)
    pub payload: Bytes,
}

impl Packet {
    /// Create a frame data packet, filling in `data_size` and `checksum`
    #[allow(clippy::too_many_arguments)]
    pub fn new_data(
        sequence_num: u16,
        frame_id: u32,
        packet_id: u16,
        total_packets: u16,
        frame_size: u32,
        timestamp_ms: u32,
        payload: Bytes,
    ) -> Result<Self, PacketError> {
        let data_size = u16::try_from(payload.len()).map_err(|_| PacketError::PayloadTooLarge {
            size: payload.len(),
            max: usize::from(u16::MAX),
        })?;

        Ok(Packet {
            header: PacketHeader {
                packet_type: PacketType::FrameData,
                version: PROTOCOL_VERSION,
                sequence_num,
                frame_id,
                packet_id,
                total_packets,
                frame_size,
                data_size,
                checksum: checksum(&payload),
                timestamp_ms,
            },
            payload,
        })
    }

    /// Create a header-only control packet
    pub fn new_control(
        packet_type: PacketType,
        frame_id: u32,
        packet_id: u16,
        timestamp_ms: u32,
    ) -> Self {
        Packet {
            header: PacketHeader::new_control(packet_type, frame_id, packet_id, timestamp_ms),
            payload: Bytes::new(),
        }
    }

    /// Packet kind
    pub fn packet_type(&self) -> PacketType {
        self.header.packet_type
    }

    /// Total size of the packet (header + payload)
    pub fn size(&self) -> usize {
        HEADER_SIZE + self.payload.len()
    }

    /// Whether the payload matches the checksum carried in the header
    pub fn checksum_valid(&self) -> bool {
        checksum(&self.payload) == self.header.checksum
    }

    /// Serialize the packet to bytes
    pub fn to_bytes(&self) -> BytesMut {
        let mut buf = BytesMut::with_capacity(self.size());
        self.header.to_bytes(&mut buf);
        buf.put_slice(&self.payload);
        buf
    }

    /// Parse a packet from one received datagram
    ///
    /// The datagram must be exactly `HEADER_SIZE + data_size` bytes long.
    /// The checksum is not verified here.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, PacketError> {
        let header = PacketHeader::from_bytes(bytes)?;

        let expected = HEADER_SIZE + usize::from(header.data_size);
        if bytes.len() != expected {
            return Err(PacketError::LengthMismatch {
                expected,
                actual: bytes.len(),
            });
        }

        Ok(Packet {
            header,
            payload: Bytes::copy_from_slice(&bytes[HEADER_SIZE..]),
        })
    }
}

/// Packet parsing and validation errors
///
/// Any of these makes a datagram malformed: it is dropped without feedback.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PacketError {
    #[error("Truncated packet: expected at least {expected} bytes, got {actual}")]
    Truncated { expected: usize, actual: usize },

    #[error("Invalid magic number: {0:#010x}")]
    InvalidMagic(u32),

    #[error("Unknown packet type: {0:#04x}")]
    UnknownPacketType(u8),

    #[error("Length mismatch: header declares {expected} bytes, datagram has {actual}")]
    LengthMismatch { expected: usize, actual: usize },

    #[error("Payload too large: {size} bytes (max {max})")]
    PayloadTooLarge { size: usize, max: usize },
}
