//! In-memory transport and clock.
//!
//! [`MemoryTransport`] records every write instead of putting it on a wire,
//! which lets a test pipe frames between two connections in any order it
//! likes. [`ManualClock`] only moves when told to.

use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use bytes::Bytes;

use crate::core::constants::MAX_DATAGRAM_FRAME_SIZE;
use crate::core::{BestEffort, Clock, RttStats, Transport, TransportError};

#[derive(Debug)]
struct Recorded {
    ordered: Vec<Bytes>,
    best_effort: Vec<Bytes>,
    best_effort_supported: bool,
    rtt: RttStats,
    close_reason: Option<String>,
}

/// Transport that records writes in memory.
#[derive(Debug)]
pub struct MemoryTransport {
    inner: Mutex<Recorded>,
}

impl Default for MemoryTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryTransport {
    /// Create a transport with best-effort delivery available.
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Recorded {
                ordered: Vec::new(),
                best_effort: Vec::new(),
                best_effort_supported: true,
                rtt: RttStats::default(),
                close_reason: None,
            }),
        }
    }

    /// Toggle best-effort support, simulating a peer without datagrams.
    pub fn set_best_effort_supported(&self, supported: bool) {
        self.lock().best_effort_supported = supported;
    }

    /// Set the RTT figures reported by [`Transport::rtt_stats`].
    pub fn set_rtt(&self, rtt: RttStats) {
        self.lock().rtt = rtt;
    }

    /// Frames written to the ordered stream so far.
    pub fn ordered(&self) -> Vec<Bytes> {
        self.lock().ordered.clone()
    }

    /// Frames sent best-effort so far.
    pub fn best_effort(&self) -> Vec<Bytes> {
        self.lock().best_effort.clone()
    }

    /// Drain the ordered stream.
    pub fn take_ordered(&self) -> Vec<Bytes> {
        std::mem::take(&mut self.lock().ordered)
    }

    /// Drain the best-effort queue.
    pub fn take_best_effort(&self) -> Vec<Bytes> {
        std::mem::take(&mut self.lock().best_effort)
    }

    /// Whether `close` has been called.
    pub fn is_closed(&self) -> bool {
        self.lock().close_reason.is_some()
    }

    /// Reason passed to `close`, if any.
    pub fn close_reason(&self) -> Option<String> {
        self.lock().close_reason.clone()
    }

    fn lock(&self) -> MutexGuard<'_, Recorded> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Transport for MemoryTransport {
    fn send_ordered(&self, frame: Bytes) -> Result<(), TransportError> {
        let mut inner = self.lock();
        if inner.close_reason.is_some() {
            return Err(TransportError::Closed);
        }
        inner.ordered.push(frame);
        Ok(())
    }

    fn send_best_effort(&self, frame: Bytes) -> Result<BestEffort, TransportError> {
        let mut inner = self.lock();
        if inner.close_reason.is_some() {
            return Err(TransportError::Closed);
        }
        if !inner.best_effort_supported {
            return Ok(BestEffort::Unsupported(frame));
        }
        if frame.len() > MAX_DATAGRAM_FRAME_SIZE {
            return Err(TransportError::TooLarge {
                size: frame.len(),
                max: MAX_DATAGRAM_FRAME_SIZE,
            });
        }
        inner.best_effort.push(frame);
        Ok(BestEffort::Sent)
    }

    fn rtt_stats(&self) -> RttStats {
        self.lock().rtt
    }

    fn close(&self, reason: &str) {
        let mut inner = self.lock();
        if inner.close_reason.is_none() {
            inner.close_reason = Some(reason.to_string());
        }
    }
}

/// Clock that advances only when told to.
#[derive(Debug)]
pub struct ManualClock {
    inner: Mutex<(Instant, u32)>,
}

impl Default for ManualClock {
    fn default() -> Self {
        Self::new()
    }
}

impl ManualClock {
    /// Create a clock at the current instant with wall time 0 ms.
    pub fn new() -> Self {
        Self::with_wall_ms(0)
    }

    /// Create a clock whose wall time starts at `wall_ms`.
    pub fn with_wall_ms(wall_ms: u32) -> Self {
        Self {
            inner: Mutex::new((Instant::now(), wall_ms)),
        }
    }

    /// Move both monotonic and wall time forward.
    pub fn advance(&self, by: Duration) {
        let mut inner = self.lock();
        inner.0 += by;
        inner.1 = inner.1.wrapping_add(by.as_millis() as u32);
    }

    /// Jump wall time without touching monotonic time.
    pub fn set_wall_ms(&self, wall_ms: u32) {
        self.lock().1 = wall_ms;
    }

    fn lock(&self) -> MutexGuard<'_, (Instant, u32)> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Instant {
        self.lock().0
    }

    fn wall_ms(&self) -> u32 {
        self.lock().1
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_records_writes() {
        let t = MemoryTransport::new();
        t.send_ordered(Bytes::from_static(b"a")).unwrap();
        assert_eq!(
            t.send_best_effort(Bytes::from_static(b"b")).unwrap(),
            BestEffort::Sent
        );

        assert_eq!(t.ordered(), vec![Bytes::from_static(b"a")]);
        assert_eq!(t.take_best_effort(), vec![Bytes::from_static(b"b")]);
        assert!(t.best_effort().is_empty());
    }

    #[test]
    fn test_unsupported_returns_frame() {
        let t = MemoryTransport::new();
        t.set_best_effort_supported(false);

        let out = t.send_best_effort(Bytes::from_static(b"x")).unwrap();
        assert_eq!(out, BestEffort::Unsupported(Bytes::from_static(b"x")));
        assert!(t.best_effort().is_empty());
    }

    #[test]
    fn test_oversized_best_effort_rejected() {
        let t = MemoryTransport::new();
        let frame = Bytes::from(vec![0u8; MAX_DATAGRAM_FRAME_SIZE + 1]);

        assert!(matches!(
            t.send_best_effort(frame),
            Err(TransportError::TooLarge { max: MAX_DATAGRAM_FRAME_SIZE, .. })
        ));
    }

    #[test]
    fn test_closed_rejects_writes() {
        let t = MemoryTransport::new();
        t.close("done");
        t.close("twice");

        assert_eq!(t.close_reason().as_deref(), Some("done"));
        assert!(matches!(
            t.send_ordered(Bytes::new()),
            Err(TransportError::Closed)
        ));
    }

    #[test]
    fn test_manual_clock_advance() {
        let clock = ManualClock::with_wall_ms(u32::MAX - 5);
        let start = clock.now();

        clock.advance(Duration::from_millis(10));
        assert_eq!(clock.now() - start, Duration::from_millis(10));
        assert_eq!(clock.wall_ms(), 4);
    }
}
