//! Frame fragmentation
//!
//! Splits an opaque frame buffer into bounded-size data packets. Payload
//! slices share the frame's `Bytes` allocation, so fragmentation does not copy.

use crate::packet::{Packet, PacketError, MAX_FRAME_SIZE, MAX_PAYLOAD_SIZE};
use bytes::Bytes;
use thiserror::Error;

/// Size limits shared by both ends of a transfer
///
/// Sender and receiver must agree on `max_payload`: the receiver places
/// packet `n` at offset `n * max_payload`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameLimits {
    /// Maximum payload bytes per packet
    pub max_payload: usize,
    /// Maximum bytes per frame
    pub max_frame_size: usize,
}

impl FrameLimits {
    pub fn new(max_payload: usize, max_frame_size: usize) -> Self {
        FrameLimits {
            max_payload,
            max_frame_size,
        }
    }

    /// Number of packets needed to carry a frame of `frame_size` bytes
    pub fn packets_for(&self, frame_size: usize) -> usize {
        total_packets(frame_size, self.max_payload)
    }
}

impl Default for FrameLimits {
    fn default() -> Self {
        FrameLimits::new(MAX_PAYLOAD_SIZE, MAX_FRAME_SIZE)
    }
}

/// `ceil(frame_size / max_payload)`
#[inline]
pub fn total_packets(frame_size: usize, max_payload: usize) -> usize {
    if max_payload == 0 {
        return 0;
    }
    (frame_size + max_payload - 1) / max_payload
}

/// Fragmentation errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FragmentError {
    #[error("Frame is empty")]
    EmptyFrame,

    #[error("Frame too large: {size} bytes (max {max})")]
    FrameTooLarge { size: usize, max: usize },

    #[error("Frame needs {packets} packets (max {max})")]
    TooManyPackets { packets: usize, max: usize },

    #[error("Per-packet payload limit must be non-zero")]
    ZeroPayload,

    #[error("Packet error: {0}")]
    Packet(#[from] PacketError),
}

/// Strictly monotonic frame identifier source
///
/// Owned by the sender; identifiers never repeat until the 32-bit space
/// wraps.
#[derive(Debug, Clone)]
pub struct FrameIdGenerator {
    next: u32,
}

impl FrameIdGenerator {
    /// Start counting at `first`
    pub fn new(first: u32) -> Self {
        FrameIdGenerator { next: first }
    }

    /// Take the next identifier
    pub fn next_id(&mut self) -> u32 {
        let id = self.next;
        self.next = self.next.wrapping_add(1);
        id
    }
}

impl Default for FrameIdGenerator {
    fn default() -> Self {
        FrameIdGenerator::new(1)
    }
}

/// A frame split into its packets
#[derive(Debug, Clone)]
pub struct FragmentedFrame {
    /// Identifier assigned to the frame
    pub frame_id: u32,
    /// Total frame size in bytes
    pub frame_size: usize,
    /// Packets in `packet_id` order
    pub packets: Vec<Packet>,
}

impl FragmentedFrame {
    pub fn total_packets(&self) -> usize {
        self.packets.len()
    }
}

/// Splits frames into packets
///
/// Assigns a fresh frame identifier per frame and a sender-wide wrapping
/// sequence number per packet.
#[derive(Debug, Clone)]
pub struct Fragmenter {
    limits: FrameLimits,
    frame_ids: FrameIdGenerator,
    next_sequence: u16,
}

impl Fragmenter {
    pub fn new(limits: FrameLimits) -> Self {
        Fragmenter {
            limits,
            frame_ids: FrameIdGenerator::default(),
            next_sequence: 0,
        }
    }

    /// Use a specific identifier source
    pub fn with_frame_ids(limits: FrameLimits, frame_ids: FrameIdGenerator) -> Self {
        Fragmenter {
            limits,
            frame_ids,
            next_sequence: 0,
        }
    }

    pub fn limits(&self) -> &FrameLimits {
        &self.limits
    }

    /// Check that a frame can be sent, without consuming an identifier
    pub fn check(&self, frame_size: usize) -> Result<usize, FragmentError> {
        if frame_size == 0 {
            return Err(FragmentError::EmptyFrame);
        }
        if self.limits.max_payload == 0 {
            return Err(FragmentError::ZeroPayload);
        }
        if frame_size > self.limits.max_frame_size {
            return Err(FragmentError::FrameTooLarge {
                size: frame_size,
                max: self.limits.max_frame_size,
            });
        }

        let packets = self.limits.packets_for(frame_size);
        if packets > usize::from(u16::MAX) {
            return Err(FragmentError::TooManyPackets {
                packets,
                max: usize::from(u16::MAX),
            });
        }
        Ok(packets)
    }

    /// Split `frame` into packets stamped with `timestamp_ms`
    ///
    /// Fails before producing anything if the frame is empty or too large.
    pub fn fragment(
        &mut self,
        frame: Bytes,
        timestamp_ms: u32,
    ) -> Result<FragmentedFrame, FragmentError> {
        let total = self.check(frame.len())?;
        let frame_size = u32::try_from(frame.len()).map_err(|_| FragmentError::FrameTooLarge {
            size: frame.len(),
            max: u32::MAX as usize,
        })?;

        let frame_id = self.frame_ids.next_id();
        let mut packets = Vec::with_capacity(total);

        for (index, start) in (0..frame.len()).step_by(self.limits.max_payload).enumerate() {
            let end = (start + self.limits.max_payload).min(frame.len());
            let sequence_num = self.next_sequence;
            self.next_sequence = self.next_sequence.wrapping_add(1);

            packets.push(Packet::new_data(
                sequence_num,
                frame_id,
                index as u16,
                total as u16,
                frame_size,
                timestamp_ms,
                frame.slice(start..end),
            )?);
        }

        tracing::trace!(frame_id, frame_size, packets = total, "Fragmented frame");

        Ok(FragmentedFrame {
            frame_id,
            frame_size: frame.len(),
            packets,
        })
    }
}

impl Default for Fragmenter {
    fn default() -> Self {
        Fragmenter::new(FrameLimits::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frame_of(len: usize) -> Bytes {
        Bytes::from((0..len).map(|i| (i % 251) as u8).collect::<Vec<u8>>())
    }

    #[test]
    fn test_total_packets() {
        assert_eq!(total_packets(1, 1400), 1);
        assert_eq!(total_packets(1400, 1400), 1);
        assert_eq!(total_packets(1401, 1400), 2);
        assert_eq!(total_packets(3000, 1400), 3);
    }

    #[test]
    fn test_fragment_sizes() {
        let mut fragmenter = Fragmenter::new(FrameLimits::new(1400, MAX_FRAME_SIZE));
        let frame = frame_of(3000);

        let fragmented = fragmenter.fragment(frame.clone(), 0).unwrap();
        let sizes: Vec<u16> = fragmented
            .packets
            .iter()
            .map(|p| p.header.data_size)
            .collect();

        assert_eq!(sizes, vec![1400, 1400, 200]);
        for (i, packet) in fragmented.packets.iter().enumerate() {
            assert_eq!(packet.header.packet_id as usize, i);
            assert_eq!(packet.header.total_packets, 3);
            assert_eq!(packet.header.frame_size, 3000);
            assert!(packet.checksum_valid());
        }
        assert_eq!(&fragmented.packets[2].payload[..], &frame[2800..]);
    }

    #[test]
    fn test_exact_payload_is_one_packet() {
        let mut fragmenter = Fragmenter::default();
        let fragmented = fragmenter.fragment(frame_of(MAX_PAYLOAD_SIZE), 0).unwrap();
        assert_eq!(fragmented.total_packets(), 1);
    }

    #[test]
    fn test_frame_ids_are_monotonic() {
        let mut fragmenter = Fragmenter::default();
        let a = fragmenter.fragment(frame_of(10), 5).unwrap();
        let b = fragmenter.fragment(frame_of(10), 5).unwrap();
        assert_eq!(b.frame_id, a.frame_id + 1);
    }

    #[test]
    fn test_frame_ids_start_at_seed_and_wrap() {
        let limits = FrameLimits::new(4, 64);
        let mut fragmenter = Fragmenter::with_frame_ids(limits, FrameIdGenerator::new(u32::MAX));
        assert_eq!(fragmenter.fragment(frame_of(4), 0).unwrap().frame_id, u32::MAX);
        assert_eq!(fragmenter.fragment(frame_of(4), 0).unwrap().frame_id, 0);
    }

    #[test]
    fn test_sequence_numbers_span_frames() {
        let mut fragmenter = Fragmenter::new(FrameLimits::new(4, 64));
        let a = fragmenter.fragment(frame_of(8), 0).unwrap();
        let b = fragmenter.fragment(frame_of(4), 0).unwrap();

        let seqs: Vec<u16> = a
            .packets
            .iter()
            .chain(b.packets.iter())
            .map(|p| p.header.sequence_num)
            .collect();
        assert_eq!(seqs, vec![0, 1, 2]);
    }

    #[test]
    fn test_rejects_empty_and_oversized() {
        let mut fragmenter = Fragmenter::new(FrameLimits::new(100, 1000));
        assert_eq!(
            fragmenter.fragment(Bytes::new(), 0).unwrap_err(),
            FragmentError::EmptyFrame
        );
        assert_eq!(
            fragmenter.fragment(frame_of(1001), 0).unwrap_err(),
            FragmentError::FrameTooLarge {
                size: 1001,
                max: 1000
            }
        );
        // Rejected frames do not consume identifiers
        assert_eq!(fragmenter.fragment(frame_of(1), 0).unwrap().frame_id, 1);
    }

    #[test]
    fn test_too_many_packets() {
        let fragmenter = Fragmenter::new(FrameLimits::new(1, 100_000));
        assert!(matches!(
            fragmenter.check(70_000),
            Err(FragmentError::TooManyPackets { .. })
        ));
    }
}
