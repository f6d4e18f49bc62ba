//! Time utilities
//!
//! Millisecond clock for packet timestamps and a periodic timer for
//! heartbeats.

use std::time::{Duration, Instant};

/// Monotonic millisecond clock starting at endpoint start
///
/// Packet timestamps are 32-bit milliseconds that wrap after ~49 days.
#[derive(Debug, Clone, Copy)]
pub struct Clock {
    epoch: Instant,
}

impl Clock {
    pub fn new() -> Self {
        Clock {
            epoch: Instant::now(),
        }
    }

    /// Clock whose zero is the given instant
    pub fn from_instant(epoch: Instant) -> Self {
        Clock { epoch }
    }

    pub fn epoch(&self) -> Instant {
        self.epoch
    }

    /// Time since the epoch
    #[inline]
    pub fn elapsed(&self) -> Duration {
        self.epoch.elapsed()
    }

    /// Milliseconds at `instant`, truncated to 32 bits
    pub fn millis_at(&self, instant: Instant) -> u32 {
        instant.saturating_duration_since(self.epoch).as_millis() as u32
    }

    /// Current packet timestamp
    #[inline]
    pub fn now_ms(&self) -> u32 {
        self.millis_at(Instant::now())
    }
}

impl Default for Clock {
    fn default() -> Self {
        Self::new()
    }
}

/// Timer for periodic operations
#[derive(Debug, Clone)]
pub struct Timer {
    interval: Duration,
    last_fire: Instant,
}

impl Timer {
    /// Create a new timer with the given interval
    pub fn new(interval: Duration) -> Self {
        Timer {
            interval,
            last_fire: Instant::now(),
        }
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Check if the timer has expired
    pub fn expired(&self) -> bool {
        self.last_fire.elapsed() >= self.interval
    }

    /// Reset the timer
    pub fn reset(&mut self) {
        self.last_fire = Instant::now();
    }

    /// Get time until next expiration
    pub fn time_until_expiration(&self) -> Duration {
        self.interval.saturating_sub(self.last_fire.elapsed())
    }

    /// Fire the timer if expired, returning true if it fired
    pub fn try_fire(&mut self) -> bool {
        if self.expired() {
            self.reset();
            true
        } else {
            false
        }
    }
}
