//! Reorder buffer for the reliable channel.
//!
//! Delivers frames strictly in sequence order while bounding the latency a
//! missing frame can add. Out-of-order arrivals wait in `pending`; when a
//! gap has been open for `gap_deadline`, the missing slots are skipped for
//! good and the buffered frames behind them are released.
//!
//! The deadline is only checked when a frame arrives. With no further
//! traffic a gap stays open indefinitely.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use bytes::Bytes;

use crate::core::constants::{DEFAULT_GAP_DEADLINE, DEFAULT_MAX_PENDING};
use crate::transport::sequence::{distance, is_ahead};

/// A frame released by the reorder buffer, in delivery order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Released {
    /// Sequence number.
    pub sequence: u16,
    /// Sender timestamp carried by the frame.
    pub timestamp_ms: u32,
    /// Application payload.
    pub payload: Bytes,
}

/// What happened to a single arrival.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Arrival {
    /// The frame was the expected one and was released immediately.
    Delivered,
    /// The frame is ahead of a gap and was buffered.
    Buffered,
    /// The frame is behind `expected` (already delivered or skipped) and was dropped.
    Stale,
    /// A frame with this sequence is already buffered; the new copy was dropped.
    Duplicate,
}

/// Reorder buffer state.
#[derive(Debug, Clone)]
pub struct ReorderBuffer {
    /// Next sequence to deliver.
    expected: u16,
    /// Out-of-order arrivals, keyed by sequence. Never contains `expected`.
    pending: HashMap<u16, (u32, Bytes)>,
    /// When the current gap was first noticed.
    gap_started_at: Option<Instant>,
    /// How long a gap may stay open.
    gap_deadline: Duration,
    /// Upper bound on `pending.len()`.
    max_pending: usize,
    /// Slots given up on.
    skipped: u64,
    /// Late or duplicate arrivals dropped.
    stale: u64,
}

impl Default for ReorderBuffer {
    fn default() -> Self {
        Self::new(DEFAULT_GAP_DEADLINE)
    }
}

impl ReorderBuffer {
    /// Create a buffer expecting sequence 0.
    pub fn new(gap_deadline: Duration) -> Self {
        Self::with_capacity(gap_deadline, DEFAULT_MAX_PENDING)
    }

    /// Create a buffer with an explicit pending-set bound.
    pub fn with_capacity(gap_deadline: Duration, max_pending: usize) -> Self {
        Self {
            expected: 0,
            pending: HashMap::new(),
            gap_started_at: None,
            gap_deadline,
            max_pending: max_pending.max(1),
            skipped: 0,
            stale: 0,
        }
    }

    /// Next sequence the buffer will deliver.
    pub fn expected(&self) -> u16 {
        self.expected
    }

    /// Number of buffered frames.
    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    /// Whether a gap timer is running.
    pub fn gap_open(&self) -> bool {
        self.gap_started_at.is_some()
    }

    /// Total sequence slots skipped by deadline.
    pub fn skipped(&self) -> u64 {
        self.skipped
    }

    /// Total late or duplicate arrivals dropped.
    pub fn stale(&self) -> u64 {
        self.stale
    }

    /// Discard buffered frames and stop the gap timer. Counters are kept.
    pub fn clear_pending(&mut self) {
        self.pending.clear();
        self.gap_started_at = None;
    }

    /// Process one arrival and append everything now deliverable to `out`,
    /// in order.
    pub fn arrive(
        &mut self,
        sequence: u16,
        timestamp_ms: u32,
        payload: Bytes,
        now: Instant,
        out: &mut Vec<Released>,
    ) -> Arrival {
        let outcome = if sequence == self.expected {
            out.push(Released {
                sequence,
                timestamp_ms,
                payload,
            });
            self.expected = self.expected.wrapping_add(1);
            Arrival::Delivered
        } else if !is_ahead(sequence, self.expected) {
            self.stale += 1;
            tracing::trace!(sequence, expected = self.expected, "reorder: stale arrival dropped");
            Arrival::Stale
        } else if self.pending.contains_key(&sequence) {
            self.stale += 1;
            tracing::trace!(sequence, "reorder: duplicate arrival dropped");
            Arrival::Duplicate
        } else {
            self.pending.insert(sequence, (timestamp_ms, payload));
            self.gap_started_at.get_or_insert(now);
            tracing::trace!(
                sequence,
                expected = self.expected,
                pending = self.pending.len(),
                "reorder: buffered"
            );
            Arrival::Buffered
        };

        self.settle(now, out);
        outcome
    }

    /// Drain contiguous frames and enforce the gap deadline.
    ///
    /// Iterative: each pass either drains at least one entry or skips the
    /// whole expired hole, so the loop ends within `pending.len()` passes.
    fn settle(&mut self, now: Instant, out: &mut Vec<Released>) {
        loop {
            self.drain(out);

            if self.pending.is_empty() {
                self.gap_started_at = None;
                return;
            }

            let started = *self.gap_started_at.get_or_insert(now);
            let expired = now.saturating_duration_since(started) >= self.gap_deadline;
            let overflow = self.pending.len() > self.max_pending;
            if !expired && !overflow {
                return;
            }

            self.skip_hole();
            self.gap_started_at = None;
        }
    }

    /// Release `expected` and its successors while they are buffered.
    fn drain(&mut self, out: &mut Vec<Released>) {
        while let Some((timestamp_ms, payload)) = self.pending.remove(&self.expected) {
            out.push(Released {
                sequence: self.expected,
                timestamp_ms,
                payload,
            });
            self.expected = self.expected.wrapping_add(1);
        }
    }

    /// Advance `expected` to the nearest buffered sequence, counting every
    /// slot passed over as permanently lost.
    fn skip_hole(&mut self) {
        let Some(hole) = self
            .pending
            .keys()
            .map(|&seq| distance(self.expected, seq))
            .min()
        else {
            return;
        };

        tracing::debug!(
            from = self.expected,
            slots = hole,
            pending = self.pending.len(),
            "reorder: gap deadline expired, skipping"
        );

        self.skipped += u64::from(hole);
        self.expected = self.expected.wrapping_add(hole);
    }
}
