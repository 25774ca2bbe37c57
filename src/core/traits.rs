//! Collaborator traits.
//!
//! The core never talks to a network directly. Everything it needs from the
//! secured transport goes through [`Transport`], and everything it needs to
//! know about time goes through [`Clock`].

use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use bytes::Bytes;

use super::error::TransportError;

/// Round-trip-time figures reported by the secured transport.
///
/// The core passes these through verbatim; it never computes RTT itself.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub struct RttStats {
    /// Most recent RTT sample.
    pub latest: Duration,
    /// Smoothed RTT.
    pub smoothed: Duration,
    /// Minimum RTT observed over the connection lifetime.
    pub minimum: Duration,
}

/// Outcome of a best-effort send attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BestEffort {
    /// The message was handed to the transport.
    Sent,
    /// The peer never negotiated best-effort delivery. The frame is returned
    /// so the caller can re-route it.
    Unsupported(Bytes),
}

/// Secured transport contract.
///
/// Implementations must not block: writes are queued and flushed by the
/// transport itself. One value serves exactly one connection.
///
/// `send_ordered` and `send_best_effort` are called while the connection's
/// state lock is held. They must not call back into that connection (for
/// example [`Connection::handle_event`](crate::transport::Connection::handle_event))
/// on the same thread, or the call deadlocks. Hand events over through a
/// task or channel instead.
pub trait Transport: Send + Sync + 'static {
    /// Write one frame to the reliable, in-order stream and flush it.
    fn send_ordered(&self, frame: Bytes) -> Result<(), TransportError>;

    /// Send one frame as an unordered, loss-tolerant message.
    fn send_best_effort(&self, frame: Bytes) -> Result<BestEffort, TransportError>;

    /// Current RTT figures.
    fn rtt_stats(&self) -> RttStats;

    /// Start closing the underlying connection.
    ///
    /// Termination is reported back later through the lifecycle events.
    fn close(&self, reason: &str);
}

/// Time source.
pub trait Clock: Send + Sync + 'static {
    /// Monotonic instant, used for deadlines and metric windows.
    fn now(&self) -> Instant;

    /// Wall-clock milliseconds truncated to 32 bits, used as frame timestamps.
    fn wall_ms(&self) -> u32;
}

/// Clock backed by the operating system.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }

    fn wall_ms(&self) -> u32 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis() as u32)
            .unwrap_or(0)
    }
}
