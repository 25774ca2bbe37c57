//! Connection statistics snapshot.

use std::time::Duration;

use crate::core::RttStats;

/// Point-in-time statistics for one connection.
///
/// RTT figures come from the secured transport unchanged; everything else
/// is computed locally.
#[derive(Debug, Clone, Default, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub struct ConnectionStats {
    /// Most recent RTT sample.
    pub rtt_latest: Duration,
    /// Smoothed RTT.
    pub rtt_smoothed: Duration,
    /// Minimum RTT.
    pub rtt_min: Duration,

    /// Outgoing throughput over the metrics window, bits per second.
    pub tx_bps: f64,
    /// Incoming throughput over the metrics window, bits per second.
    pub rx_bps: f64,
    /// Frames sent within the metrics window.
    pub tx_packets_in_window: u64,
    /// Frames received within the metrics window.
    pub rx_packets_in_window: u64,

    /// Unreliable frames inferred lost.
    pub packets_lost: u64,
    /// Unreliable frames received.
    pub packets_received: u64,
    /// `packets_lost / (packets_lost + packets_received)`.
    pub loss_rate: f64,

    /// Frames sent since the connection started.
    pub packets_sent: u64,
    /// Bytes sent since the connection started.
    pub bytes_sent: u64,
    /// Bytes received since the connection started.
    pub bytes_received: u64,
    /// Time since the connection was created.
    pub elapsed: Duration,

    /// Smoothed jitter on the reliable channel, milliseconds.
    pub reliable_jitter_ms: f64,
    /// Smoothed jitter on the unreliable channel, milliseconds.
    pub unreliable_jitter_ms: f64,

    /// Reliable sequence slots skipped by the gap deadline.
    pub skipped: u64,
    /// Reliable frames dropped as late or duplicate.
    pub stale: u64,
    /// Frames that failed to decode.
    pub malformed: u64,
}

impl ConnectionStats {
    /// Copy the transport's RTT figures into the snapshot.
    pub fn with_rtt(mut self, rtt: RttStats) -> Self {
        self.rtt_latest = rtt.latest;
        self.rtt_smoothed = rtt.smoothed;
        self.rtt_min = rtt.minimum;
        self
    }
}
