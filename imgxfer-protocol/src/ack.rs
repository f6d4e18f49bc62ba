//! ACK and NACK generation
//!
//! Every ingested frame data packet is answered with a header-only feedback
//! packet addressed back to its origin: ACK when the payload was stored (or
//! already held), NACK when the checksum failed. Other rejections get no
//! answer.

use crate::packet::{Packet, PacketType};
use crate::reassembly::{IngestOutcome, ReassemblyError};

/// Feedback owed to the sender of one packet
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Feedback {
    Ack { frame_id: u32, packet_id: u16 },
    Nack { frame_id: u32, packet_id: u16 },
}

impl Feedback {
    /// Feedback for a reassembly result, or `None` if the packet is dropped
    /// silently
    pub fn for_result(result: &Result<IngestOutcome, ReassemblyError>) -> Option<Self> {
        match result {
            Ok(outcome) => Some(Feedback::for_outcome(outcome)),
            Err(err) => Feedback::for_error(err),
        }
    }

    /// Accepted, duplicate and completing packets are all acknowledged
    pub fn for_outcome(outcome: &IngestOutcome) -> Self {
        Feedback::Ack {
            frame_id: outcome.frame_id(),
            packet_id: outcome.packet_id(),
        }
    }

    /// Only checksum failures are negatively acknowledged
    pub fn for_error(err: &ReassemblyError) -> Option<Self> {
        match err {
            ReassemblyError::ChecksumMismatch {
                frame_id,
                packet_id,
                ..
            } => Some(Feedback::Nack {
                frame_id: *frame_id,
                packet_id: *packet_id,
            }),
            _ => None,
        }
    }

    pub fn packet_type(&self) -> PacketType {
        match self {
            Feedback::Ack { .. } => PacketType::Ack,
            Feedback::Nack { .. } => PacketType::Nack,
        }
    }

    pub fn frame_id(&self) -> u32 {
        match self {
            Feedback::Ack { frame_id, .. } | Feedback::Nack { frame_id, .. } => *frame_id,
        }
    }

    pub fn packet_id(&self) -> u16 {
        match self {
            Feedback::Ack { packet_id, .. } | Feedback::Nack { packet_id, .. } => *packet_id,
        }
    }

    /// Build the header-only packet carrying this feedback
    pub fn to_packet(&self, timestamp_ms: u32) -> Packet {
        Packet::new_control(
            self.packet_type(),
            self.frame_id(),
            self.packet_id(),
            timestamp_ms,
        )
    }

    /// Recover feedback from a received ACK or NACK packet
    pub fn from_packet(packet: &Packet) -> Option<Self> {
        let frame_id = packet.header.frame_id;
        let packet_id = packet.header.packet_id;
        match packet.packet_type() {
            PacketType::Ack => Some(Feedback::Ack {
                frame_id,
                packet_id,
            }),
            PacketType::Nack => Some(Feedback::Nack {
                frame_id,
                packet_id,
            }),
            _ => None,
        }
    }
}

/// ACK packet for one frame data packet
pub fn ack_packet(frame_id: u32, packet_id: u16, timestamp_ms: u32) -> Packet {
    Feedback::Ack {
        frame_id,
        packet_id,
    }
    .to_packet(timestamp_ms)
}

/// NACK packet for one frame data packet
pub fn nack_packet(frame_id: u32, packet_id: u16, timestamp_ms: u32) -> Packet {
    Feedback::Nack {
        frame_id,
        packet_id,
    }
    .to_packet(timestamp_ms)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::packet::HEADER_SIZE;
    use crate::reassembly::CompletedFrame;
    use bytes::Bytes;

    #[test]
    fn test_ack_for_every_outcome() {
        let outcomes = [
            IngestOutcome::Accepted {
                frame_id: 1,
                packet_id: 2,
                received: 1,
                total: 3,
            },
            IngestOutcome::Duplicate {
                frame_id: 1,
                packet_id: 2,
            },
            IngestOutcome::Completed {
                packet_id: 2,
                frame: CompletedFrame {
                    frame_id: 1,
                    data: Bytes::new(),
                },
            },
        ];

        for outcome in outcomes {
            assert_eq!(
                Feedback::for_result(&Ok(outcome)),
                Some(Feedback::Ack {
                    frame_id: 1,
                    packet_id: 2
                })
            );
        }
    }

    #[test]
    fn test_nack_only_for_checksum() {
        let checksum = ReassemblyError::ChecksumMismatch {
            frame_id: 5,
            packet_id: 1,
            expected: 10,
            actual: 11,
        };
        assert_eq!(
            Feedback::for_error(&checksum),
            Some(Feedback::Nack {
                frame_id: 5,
                packet_id: 1
            })
        );

        let invalid = ReassemblyError::InvalidPacketId {
            frame_id: 5,
            packet_id: 3,
            total_packets: 3,
        };
        assert_eq!(Feedback::for_error(&invalid), None);
    }

    #[test]
    fn test_feedback_packet_roundtrip() {
        let nack = nack_packet(77, 12, 500);
        let bytes = nack.to_bytes();
        assert_eq!(bytes.len(), HEADER_SIZE);

        let decoded = Packet::from_bytes(&bytes).unwrap();
        assert_eq!(
            Feedback::from_packet(&decoded),
            Some(Feedback::Nack {
                frame_id: 77,
                packet_id: 12
            })
        );

        let ack = ack_packet(77, 12, 500);
        assert_eq!(ack.packet_type(), PacketType::Ack);
        assert_eq!(ack.header.data_size, 0);
    }

    #[test]
    fn test_heartbeat_is_not_feedback() {
        let hb = Packet::new_control(PacketType::Heartbeat, 0, 0, 0);
        assert_eq!(Feedback::from_packet(&hb), None);
    }
}
