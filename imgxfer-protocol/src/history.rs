//! Sender-side history of recently transmitted frames
//!
//! Keeps the packets of the last N frames so that a NACK can be answered
//! with a resend. Frames older than the window are forgotten; a NACK for
//! them only counts as a loss.

use crate::fragment::FragmentedFrame;
use crate::packet::Packet;
use std::collections::VecDeque;
use std::time::Instant;
use thiserror::Error;

/// History lookup errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum HistoryError {
    #[error("Frame {0} is no longer in the send history")]
    UnknownFrame(u32),

    #[error("Frame {frame_id} has no packet {packet_id}")]
    UnknownPacket { frame_id: u32, packet_id: u16 },

    #[error("Packet {packet_id} of frame {frame_id} already resent {attempts} times")]
    RetryLimit {
        frame_id: u32,
        packet_id: u16,
        attempts: u32,
    },
}

/// Stored packet with metadata
#[derive(Debug, Clone)]
struct StoredPacket {
    packet: Packet,
    /// Number of resends so far
    retransmissions: u32,
    acknowledged: bool,
}

#[derive(Debug, Clone)]
struct StoredFrame {
    frame_id: u32,
    packets: Vec<StoredPacket>,
    first_sent: Instant,
}

impl StoredFrame {
    fn is_acknowledged(&self) -> bool {
        self.packets.iter().all(|p| p.acknowledged)
    }
}

/// Bounded window of sent frames
#[derive(Debug)]
pub struct SendHistory {
    frames: VecDeque<StoredFrame>,
    capacity: usize,
    max_retransmits: u32,
}

impl SendHistory {
    /// Keep up to `capacity` frames, resending each packet at most
    /// `max_retransmits` times
    pub fn new(capacity: usize, max_retransmits: u32) -> Self {
        SendHistory {
            frames: VecDeque::with_capacity(capacity),
            capacity,
            max_retransmits,
        }
    }

    /// Remember a frame that is about to be transmitted
    ///
    /// Evicts the oldest frame when the window is full. With zero capacity
    /// nothing is stored.
    pub fn record(&mut self, frame: &FragmentedFrame) {
        if self.capacity == 0 {
            return;
        }
        while self.frames.len() >= self.capacity {
            if let Some(old) = self.frames.pop_front() {
                tracing::trace!(
                    frame_id = old.frame_id,
                    acknowledged = old.is_acknowledged(),
                    age_ms = old.first_sent.elapsed().as_millis() as u64,
                    "Frame left send history"
                );
            }
        }

        let now = Instant::now();
        self.frames.push_back(StoredFrame {
            frame_id: frame.frame_id,
            packets: frame
                .packets
                .iter()
                .map(|packet| StoredPacket {
                    packet: packet.clone(),
                    retransmissions: 0,
                    acknowledged: false,
                })
                .collect(),
            first_sent: now,
        });
    }

    fn find_mut(&mut self, frame_id: u32, packet_id: u16) -> Result<&mut StoredPacket, HistoryError> {
        let frame = self
            .frames
            .iter_mut()
            .rev()
            .find(|f| f.frame_id == frame_id)
            .ok_or(HistoryError::UnknownFrame(frame_id))?;

        frame
            .packets
            .get_mut(usize::from(packet_id))
            .ok_or(HistoryError::UnknownPacket {
                frame_id,
                packet_id,
            })
    }

    /// Mark a packet as acknowledged by the receiver
    pub fn acknowledge(&mut self, frame_id: u32, packet_id: u16) -> Result<(), HistoryError> {
        self.find_mut(frame_id, packet_id)?.acknowledged = true;
        Ok(())
    }

    /// Get a packet for retransmission
    ///
    /// Counts the attempt; fails once `max_retransmits` is reached.
    pub fn retransmit(&mut self, frame_id: u32, packet_id: u16) -> Result<Packet, HistoryError> {
        let max = self.max_retransmits;
        let stored = self.find_mut(frame_id, packet_id)?;

        if stored.retransmissions >= max {
            return Err(HistoryError::RetryLimit {
                frame_id,
                packet_id,
                attempts: stored.retransmissions,
            });
        }

        stored.retransmissions += 1;
        stored.acknowledged = false;
        Ok(stored.packet.clone())
    }

    /// Whether every packet of a frame has been acknowledged
    pub fn is_acknowledged(&self, frame_id: u32) -> Option<bool> {
        self.frames
            .iter()
            .find(|f| f.frame_id == frame_id)
            .map(StoredFrame::is_acknowledged)
    }

    /// Number of frames currently held
    pub fn len(&self) -> usize {
        self.frames.len()
    }

    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }

    pub fn clear(&mut self) {
        self.frames.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fragment::{FrameLimits, Fragmenter};
    use bytes::Bytes;

    fn sent_frame(fragmenter: &mut Fragmenter, len: usize) -> FragmentedFrame {
        fragmenter
            .fragment(Bytes::from(vec![0xAB; len]), 0)
            .unwrap()
    }

    #[test]
    fn test_retransmit_returns_stored_packet() {
        let mut fragmenter = Fragmenter::new(FrameLimits::new(100, 10_000));
        let frame = sent_frame(&mut fragmenter, 250);
        let mut history = SendHistory::new(4, 3);
        history.record(&frame);

        let resent = history.retransmit(frame.frame_id, 1).unwrap();
        assert_eq!(resent, frame.packets[1]);
    }

    #[test]
    fn test_retry_limit() {
        let mut fragmenter = Fragmenter::new(FrameLimits::new(100, 10_000));
        let frame = sent_frame(&mut fragmenter, 100);
        let mut history = SendHistory::new(4, 2);
        history.record(&frame);

        history.retransmit(frame.frame_id, 0).unwrap();
        history.retransmit(frame.frame_id, 0).unwrap();
        assert_eq!(
            history.retransmit(frame.frame_id, 0),
            Err(HistoryError::RetryLimit {
                frame_id: frame.frame_id,
                packet_id: 0,
                attempts: 2
            })
        );
    }

    #[test]
    fn test_window_evicts_oldest() {
        let mut fragmenter = Fragmenter::new(FrameLimits::new(100, 10_000));
        let mut history = SendHistory::new(2, 3);

        let first = sent_frame(&mut fragmenter, 10);
        history.record(&first);
        history.record(&sent_frame(&mut fragmenter, 10));
        history.record(&sent_frame(&mut fragmenter, 10));

        assert_eq!(history.len(), 2);
        assert_eq!(
            history.retransmit(first.frame_id, 0),
            Err(HistoryError::UnknownFrame(first.frame_id))
        );
    }

    #[test]
    fn test_acknowledge() {
        let mut fragmenter = Fragmenter::new(FrameLimits::new(100, 10_000));
        let frame = sent_frame(&mut fragmenter, 150);
        let mut history = SendHistory::new(4, 3);
        history.record(&frame);

        history.acknowledge(frame.frame_id, 0).unwrap();
        assert_eq!(history.is_acknowledged(frame.frame_id), Some(false));
        history.acknowledge(frame.frame_id, 1).unwrap();
        assert_eq!(history.is_acknowledged(frame.frame_id), Some(true));

        assert_eq!(
            history.acknowledge(frame.frame_id, 2),
            Err(HistoryError::UnknownPacket {
                frame_id: frame.frame_id,
                packet_id: 2
            })
        );
    }

    #[test]
    fn test_zero_capacity_keeps_nothing() {
        let mut fragmenter = Fragmenter::new(FrameLimits::new(100, 10_000));
        let mut history = SendHistory::new(0, 3);
        history.record(&sent_frame(&mut fragmenter, 10));
        assert!(history.is_empty());
    }
}
