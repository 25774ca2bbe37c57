//! Sliding-window byte and packet counters.
//!
//! Eviction happens inline on every record and query; there is no
//! background timer.

use std::collections::VecDeque;
use std::time::{Duration, Instant};

use crate::core::constants::DEFAULT_METRICS_WINDOW;

/// Time-bounded event log producing throughput figures.
#[derive(Debug, Clone)]
pub struct MetricsWindow {
    /// `(timestamp, byte_count)` in arrival order.
    events: VecDeque<(Instant, u64)>,
    /// Retention window.
    window: Duration,
    /// Bytes recorded since creation.
    total_bytes: u64,
    /// Events recorded since creation.
    total_packets: u64,
}

impl Default for MetricsWindow {
    fn default() -> Self {
        Self::new(DEFAULT_METRICS_WINDOW)
    }
}

impl MetricsWindow {
    /// Create a window with the given retention.
    pub fn new(window: Duration) -> Self {
        Self {
            events: VecDeque::new(),
            window,
            total_bytes: 0,
            total_packets: 0,
        }
    }

    /// Retention window.
    pub fn window(&self) -> Duration {
        self.window
    }

    /// Record one packet of `byte_count` bytes at `now`.
    pub fn record(&mut self, now: Instant, byte_count: u64) {
        self.evict(now);
        self.events.push_back((now, byte_count));
        self.total_bytes += byte_count;
        self.total_packets += 1;
    }

    /// Bytes recorded within the window ending at `now`.
    pub fn bytes_in_window(&mut self, now: Instant) -> u64 {
        self.evict(now);
        self.events.iter().map(|&(_, bytes)| bytes).sum()
    }

    /// Packets recorded within the window ending at `now`.
    pub fn packets_in_window(&mut self, now: Instant) -> u64 {
        self.evict(now);
        self.events.len() as u64
    }

    /// Throughput over the window, in bits per second.
    pub fn throughput_bps(&mut self, now: Instant) -> f64 {
        let secs = self.window.as_secs_f64();
        if secs <= 0.0 {
            return 0.0;
        }
        self.bytes_in_window(now) as f64 * 8.0 / secs
    }

    /// Bytes recorded since creation.
    pub fn total_bytes(&self) -> u64 {
        self.total_bytes
    }

    /// Packets recorded since creation.
    pub fn total_packets(&self) -> u64 {
        self.total_packets
    }

    /// Drop entries older than `now - window`.
    fn evict(&mut self, now: Instant) {
        let Some(cutoff) = now.checked_sub(self.window) else {
            return;
        };
        while let Some(&(at, _)) = self.events.front() {
            if at >= cutoff {
                break;
            }
            self.events.pop_front();
        }
    }
}
