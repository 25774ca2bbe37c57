//! Loss accounting for the unreliable channel.
//!
//! Loss is inferred from forward sequence gaps. The estimator assumes
//! sequence numbers only move forward: a frame that arrives behind
//! `expected` (true reordering) is counted as a new forward gap of almost a
//! full ring against the corrected baseline. There is no reorder recovery on
//! this channel.

use crate::transport::sequence::distance;

/// Unreliable-channel loss estimator.
#[derive(Debug, Clone, Default)]
pub struct LossEstimator {
    /// Next sequence expected.
    expected: u16,
    /// Frames observed.
    received: u64,
    /// Frames inferred lost. Only ever increases.
    lost: u64,
}

impl LossEstimator {
    /// Create an estimator expecting sequence 0.
    pub fn new() -> Self {
        Self::default()
    }

    /// Record an arrival and return how many frames this arrival revealed as lost.
    pub fn observe(&mut self, sequence: u16) -> u64 {
        let lost_now = u64::from(distance(self.expected, sequence));
        if lost_now > 0 {
            self.lost += lost_now;
            tracing::trace!(
                sequence,
                expected = self.expected,
                lost = lost_now,
                "loss: gap detected"
            );
        }

        self.expected = sequence.wrapping_add(1);
        self.received += 1;
        lost_now
    }

    /// Next sequence expected.
    pub fn expected(&self) -> u16 {
        self.expected
    }

    /// Frames observed so far.
    pub fn received(&self) -> u64 {
        self.received
    }

    /// Frames inferred lost so far.
    pub fn lost(&self) -> u64 {
        self.lost
    }

    /// `lost / (lost + received)`, or 0 when nothing has been seen.
    pub fn loss_rate(&self) -> f64 {
        loss_rate(self.lost, self.received)
    }
}

/// Loss ratio, defined as 0 when both counters are 0.
pub fn loss_rate(lost: u64, received: u64) -> f64 {
    let total = lost + received;
    if total == 0 {
        0.0
    } else {
        lost as f64 / total as f64
    }
}
