//! Transfer statistics
//!
//! Counters are advisory and kept under the same lock as the connection
//! state by the runtime.

use crate::reassembly::ReassemblyStats;
use std::time::{Duration, Instant};

/// Transfer counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TransferStats {
    /// Frame data packets handed to the link, including resends
    pub packets_sent: u64,
    /// Frame data packets received, valid or not
    pub packets_received: u64,
    /// NACKs received from the peer
    pub packets_lost: u64,
    /// Packets resent in answer to a NACK
    pub packets_retransmitted: u64,
    /// Payload bytes sent
    pub bytes_sent: u64,
    /// Payload bytes received
    pub bytes_received: u64,
    /// Frames fully handed to the link
    pub frames_sent: u64,
    /// Frames fully reassembled
    pub frames_completed: u64,
    /// Frames decoded and delivered
    pub frames_decoded: u64,
    /// Completed frames dropped because the decode queue was full
    pub frames_dropped: u64,
    /// Packets that failed their checksum
    pub checksum_failures: u64,
    /// Datagrams that could not be parsed
    pub malformed_packets: u64,
    /// Frames the decoder rejected
    pub decode_failures: u64,
    /// Heartbeats received
    pub heartbeats_received: u64,
}

impl TransferStats {
    /// Fraction of sent packets reported lost
    pub fn loss_rate(&self) -> f64 {
        if self.packets_sent == 0 {
            0.0
        } else {
            self.packets_lost as f64 / self.packets_sent as f64
        }
    }

    pub fn reset(&mut self) {
        *self = TransferStats::default();
    }
}

/// Counters plus derived rates at one instant
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StatsSnapshot {
    pub counters: TransferStats,
    /// Receive-side frame outcomes
    pub reassembly: ReassemblyStats,
    /// Decoded frames per second over the last full window
    pub fps: f32,
    /// Time since the counters were last reset
    pub elapsed: Duration,
}

impl StatsSnapshot {
    /// Average payload throughput in bytes per second, both directions
    pub fn throughput_bps(&self) -> f64 {
        let secs = self.elapsed.as_secs_f64();
        if secs <= 0.0 {
            return 0.0;
        }
        (self.counters.bytes_sent + self.counters.bytes_received) as f64 / secs
    }
}

/// Frame rate over fixed windows
#[derive(Debug, Clone)]
pub struct FpsMeter {
    window: Duration,
    window_start: Option<Instant>,
    frames: u32,
    fps: f32,
}

impl FpsMeter {
    pub fn new(window: Duration) -> Self {
        FpsMeter {
            window,
            window_start: None,
            frames: 0,
            fps: 0.0,
        }
    }

    pub fn record(&mut self) {
        self.record_at(Instant::now());
    }

    /// Count one frame; the rate is recomputed each time a window closes
    pub fn record_at(&mut self, now: Instant) {
        let start = *self.window_start.get_or_insert(now);
        self.frames += 1;

        let elapsed = now.saturating_duration_since(start);
        if elapsed >= self.window && !elapsed.is_zero() {
            self.fps = self.frames as f32 / elapsed.as_secs_f32();
            self.frames = 0;
            self.window_start = Some(now);
        }
    }

    /// Rate measured over the last completed window
    pub fn fps(&self) -> f32 {
        self.fps
    }

    pub fn reset(&mut self) {
        self.window_start = None;
        self.frames = 0;
        self.fps = 0.0;
    }
}

impl Default for FpsMeter {
    fn default() -> Self {
        FpsMeter::new(Duration::from_secs(1))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_loss_rate() {
        let mut stats = TransferStats::default();
        assert_eq!(stats.loss_rate(), 0.0);

        stats.packets_sent = 200;
        stats.packets_lost = 5;
        assert!((stats.loss_rate() - 0.025).abs() < f64::EPSILON);

        stats.reset();
        assert_eq!(stats, TransferStats::default());
    }

    #[test]
    fn test_fps_window() {
        let mut meter = FpsMeter::new(Duration::from_secs(1));
        let t0 = Instant::now();

        for i in 0..10 {
            meter.record_at(t0 + Duration::from_millis(i * 100));
        }
        // Window not closed yet
        assert_eq!(meter.fps(), 0.0);

        meter.record_at(t0 + Duration::from_millis(1000));
        assert!((meter.fps() - 11.0).abs() < 0.01);

        meter.reset();
        assert_eq!(meter.fps(), 0.0);
    }

    #[test]
    fn test_throughput() {
        let snapshot = StatsSnapshot {
            counters: TransferStats {
                bytes_sent: 1000,
                bytes_received: 1000,
                ..Default::default()
            },
            reassembly: ReassemblyStats::default(),
            fps: 0.0,
            elapsed: Duration::from_secs(2),
        };
        assert!((snapshot.throughput_bps() - 1000.0).abs() < f64::EPSILON);
    }
}
