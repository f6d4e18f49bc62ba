//! Frame reassembly
//!
//! Collects the packets of one frame into a frame-sized buffer and hands the
//! buffer out once every packet has arrived.
//!
//! The reassembler tracks a single frame at a time. A packet for a different
//! `frame_id` discards whatever partial frame is in progress, so a fast
//! second sender can starve a slow first one. Callers that need several
//! peers should run one `Reassembler` per peer.

use crate::fragment::FrameLimits;
use crate::packet::{Packet, PacketType};
use bytes::{Bytes, BytesMut};
use std::time::{Duration, Instant};
use thiserror::Error;

/// Reassembly errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ReassemblyError {
    #[error("Checksum mismatch on frame {frame_id} packet {packet_id}: header {expected:#06x}, computed {actual:#06x}")]
    ChecksumMismatch {
        frame_id: u32,
        packet_id: u16,
        expected: u16,
        actual: u16,
    },

    #[error("Invalid frame size {size} for frame {frame_id} (max {max})")]
    InvalidFrameSize { frame_id: u32, size: usize, max: usize },

    #[error("Invalid packet id {packet_id} for frame {frame_id} ({total_packets} packets)")]
    InvalidPacketId {
        frame_id: u32,
        packet_id: u16,
        total_packets: u16,
    },

    #[error("Packet {packet_id} of frame {frame_id} out of bounds: {offset}+{len} > {frame_size}")]
    OutOfBounds {
        frame_id: u32,
        packet_id: u16,
        offset: usize,
        len: usize,
        frame_size: usize,
    },

    #[error("Frame {frame_id} completed with {received} bytes, header declared {declared}")]
    SizeMismatch {
        frame_id: u32,
        received: usize,
        declared: usize,
    },

    #[error("Not a frame data packet: {0}")]
    UnexpectedPacketType(PacketType),
}

/// A fully reassembled frame, owned by the caller
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompletedFrame {
    pub frame_id: u32,
    pub data: Bytes,
}

/// Result of feeding one packet to the reassembler
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IngestOutcome {
    /// Payload stored; frame still incomplete
    Accepted {
        frame_id: u32,
        packet_id: u16,
        received: u16,
        total: u16,
    },
    /// Packet was already stored for this frame
    Duplicate { frame_id: u32, packet_id: u16 },
    /// Last missing packet arrived
    Completed {
        packet_id: u16,
        frame: CompletedFrame,
    },
}

impl IngestOutcome {
    pub fn frame_id(&self) -> u32 {
        match self {
            IngestOutcome::Accepted { frame_id, .. } => *frame_id,
            IngestOutcome::Duplicate { frame_id, .. } => *frame_id,
            IngestOutcome::Completed { frame, .. } => frame.frame_id,
        }
    }

    pub fn packet_id(&self) -> u16 {
        match self {
            IngestOutcome::Accepted { packet_id, .. } => *packet_id,
            IngestOutcome::Duplicate { packet_id, .. } => *packet_id,
            IngestOutcome::Completed { packet_id, .. } => *packet_id,
        }
    }
}

/// State of the frame currently being reassembled
#[derive(Debug)]
pub struct FrameReassembly {
    frame_id: u32,
    frame_size: usize,
    total_packets: u16,
    buffer: BytesMut,
    received: Vec<bool>,
    received_packets: u16,
    received_bytes: usize,
    last_update: Instant,
}

impl FrameReassembly {
    fn new(frame_id: u32, frame_size: usize, total_packets: u16, now: Instant) -> Self {
        FrameReassembly {
            frame_id,
            frame_size,
            total_packets,
            buffer: BytesMut::zeroed(frame_size),
            received: vec![false; usize::from(total_packets)],
            received_packets: 0,
            received_bytes: 0,
            last_update: now,
        }
    }

    pub fn frame_id(&self) -> u32 {
        self.frame_id
    }

    pub fn frame_size(&self) -> usize {
        self.frame_size
    }

    pub fn total_packets(&self) -> u16 {
        self.total_packets
    }

    pub fn received_packets(&self) -> u16 {
        self.received_packets
    }

    pub fn last_update(&self) -> Instant {
        self.last_update
    }

    pub fn is_complete(&self) -> bool {
        self.received_packets == self.total_packets
    }

    /// Copy `packet`'s payload into its slot
    ///
    /// Returns `false` if the slot was already filled.
    fn store(
        &mut self,
        packet: &Packet,
        max_payload: usize,
        now: Instant,
    ) -> Result<bool, ReassemblyError> {
        let header = &packet.header;
        if header.packet_id >= self.total_packets {
            return Err(ReassemblyError::InvalidPacketId {
                frame_id: self.frame_id,
                packet_id: header.packet_id,
                total_packets: self.total_packets,
            });
        }

        let slot = usize::from(header.packet_id);
        if self.received[slot] {
            return Ok(false);
        }

        let offset = header.frame_offset(max_payload);
        let len = packet.payload.len();
        if len > max_payload || offset + len > self.frame_size {
            return Err(ReassemblyError::OutOfBounds {
                frame_id: self.frame_id,
                packet_id: header.packet_id,
                offset,
                len,
                frame_size: self.frame_size,
            });
        }

        self.buffer[offset..offset + len].copy_from_slice(&packet.payload);
        self.received[slot] = true;
        self.received_packets += 1;
        self.received_bytes += len;
        self.last_update = now;
        Ok(true)
    }

    /// Packet ids not yet received
    pub fn missing(&self) -> Vec<u16> {
        self.received
            .iter()
            .enumerate()
            .filter(|(_, got)| !**got)
            .map(|(id, _)| id as u16)
            .collect()
    }
}

/// Reassembly counters, cumulative since creation
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReassemblyStats {
    pub frames_completed: u64,
    pub frames_superseded: u64,
    pub frames_expired: u64,
    pub duplicates: u64,
}

/// Single-frame-in-flight reassembler
#[derive(Debug)]
pub struct Reassembler {
    limits: FrameLimits,
    current: Option<FrameReassembly>,
    last_completed: Option<u32>,
    stats: ReassemblyStats,
}

impl Reassembler {
    pub fn new(limits: FrameLimits) -> Self {
        Reassembler {
            limits,
            current: None,
            last_completed: None,
            stats: ReassemblyStats::default(),
        }
    }

    pub fn limits(&self) -> &FrameLimits {
        &self.limits
    }

    /// Identifier of the most recently completed frame
    pub fn last_completed(&self) -> Option<u32> {
        self.last_completed
    }

    /// Frame currently in progress, if any
    pub fn current(&self) -> Option<&FrameReassembly> {
        self.current.as_ref()
    }

    pub fn stats(&self) -> ReassemblyStats {
        self.stats
    }

    pub fn reset_stats(&mut self) {
        self.stats = ReassemblyStats::default();
    }

    /// Drop any partial frame and forget the last completed one
    pub fn clear(&mut self) {
        self.current = None;
        self.last_completed = None;
    }

    /// Feed one frame data packet, using the current instant
    pub fn ingest(&mut self, packet: &Packet) -> Result<IngestOutcome, ReassemblyError> {
        self.ingest_at(packet, Instant::now())
    }

    /// Feed one frame data packet
    ///
    /// Checks run in order: packet type, checksum, already completed frame,
    /// frame switch, packet id, duplicate, bounds. On completion the buffer
    /// is moved out and the reassembler becomes empty. Late copies of the
    /// most recently completed frame are reported as duplicates.
    pub fn ingest_at(
        &mut self,
        packet: &Packet,
        now: Instant,
    ) -> Result<IngestOutcome, ReassemblyError> {
        let header = &packet.header;
        if header.packet_type != PacketType::FrameData {
            return Err(ReassemblyError::UnexpectedPacketType(header.packet_type));
        }

        if !packet.checksum_valid() {
            return Err(ReassemblyError::ChecksumMismatch {
                frame_id: header.frame_id,
                packet_id: header.packet_id,
                expected: header.checksum,
                actual: crate::packet::checksum(&packet.payload),
            });
        }

        let frame_id = header.frame_id;
        let packet_id = header.packet_id;
        if self.last_completed == Some(frame_id) {
            self.stats.duplicates += 1;
            tracing::trace!(frame_id, packet_id, "Packet for completed frame");
            return Ok(IngestOutcome::Duplicate {
                frame_id,
                packet_id,
            });
        }

        let mut frame = match self.current.take() {
            Some(frame) if frame.frame_id == frame_id => frame,
            stale => self.start_frame(stale, packet, now)?,
        };

        match frame.store(packet, self.limits.max_payload, now) {
            Ok(true) => {}
            Ok(false) => {
                self.current = Some(frame);
                self.stats.duplicates += 1;
                tracing::trace!(frame_id, packet_id, "Duplicate packet");
                return Ok(IngestOutcome::Duplicate {
                    frame_id,
                    packet_id,
                });
            }
            Err(e) => {
                self.current = Some(frame);
                return Err(e);
            }
        }

        tracing::trace!(
            frame_id,
            packet_id,
            received = frame.received_packets,
            total = frame.total_packets,
            "Stored packet"
        );

        if !frame.is_complete() {
            let outcome = IngestOutcome::Accepted {
                frame_id,
                packet_id,
                received: frame.received_packets,
                total: frame.total_packets,
            };
            self.current = Some(frame);
            return Ok(outcome);
        }

        if frame.received_bytes != frame.frame_size {
            return Err(ReassemblyError::SizeMismatch {
                frame_id,
                received: frame.received_bytes,
                declared: frame.frame_size,
            });
        }

        self.last_completed = Some(frame_id);
        self.stats.frames_completed += 1;
        tracing::debug!(frame_id, size = frame.frame_size, "Frame reassembled");

        Ok(IngestOutcome::Completed {
            packet_id,
            frame: CompletedFrame {
                frame_id,
                data: frame.buffer.freeze(),
            },
        })
    }

    /// Build a reassembly for `packet`'s frame, discarding `stale`
    fn start_frame(
        &mut self,
        stale: Option<FrameReassembly>,
        packet: &Packet,
        now: Instant,
    ) -> Result<FrameReassembly, ReassemblyError> {
        let header = &packet.header;

        if let Some(old) = stale {
            self.stats.frames_superseded += 1;
            tracing::debug!(
                old_frame = old.frame_id,
                new_frame = header.frame_id,
                received = old.received_packets,
                total = old.total_packets,
                "Discarding partial frame"
            );
        }

        let frame_size = header.frame_size as usize;
        if frame_size == 0 || frame_size > self.limits.max_frame_size {
            return Err(ReassemblyError::InvalidFrameSize {
                frame_id: header.frame_id,
                size: frame_size,
                max: self.limits.max_frame_size,
            });
        }

        tracing::trace!(
            frame_id = header.frame_id,
            frame_size,
            total_packets = header.total_packets,
            "New frame"
        );
        Ok(FrameReassembly::new(
            header.frame_id,
            frame_size,
            header.total_packets,
            now,
        ))
    }

    /// Discard the partial frame if it has not progressed for `max_age`
    ///
    /// Returns the id of the evicted frame.
    pub fn evict_stale(&mut self, now: Instant, max_age: Duration) -> Option<u32> {
        let stale = self
            .current
            .as_ref()
            .map(|f| now.saturating_duration_since(f.last_update) >= max_age)
            .unwrap_or(false);

        if !stale {
            return None;
        }

        let frame = self.current.take()?;
        self.stats.frames_expired += 1;
        tracing::debug!(
            frame_id = frame.frame_id,
            received = frame.received_packets,
            total = frame.total_packets,
            "Evicted stalled frame"
        );
        Some(frame.frame_id)
    }
}
