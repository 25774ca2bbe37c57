//! Inter-arrival jitter estimation (RFC 3550 §6.4.1).
//!
//! Transit is `receive_ms - send_ms`. Sender and receiver clocks need not be
//! synchronised; only the change in transit between consecutive frames
//! matters.

use crate::core::constants::JITTER_GAIN;

/// Smoothed jitter estimator. One instance per channel.
#[derive(Debug, Clone, Default)]
pub struct JitterEstimator {
    /// Transit of the previous frame.
    previous_transit: Option<i32>,
    /// Smoothed jitter in milliseconds.
    smoothed_jitter: f64,
}

impl JitterEstimator {
    /// Create an estimator with no samples.
    pub fn new() -> Self {
        Self::default()
    }

    /// Transit time for a frame, tolerant of 32-bit timestamp wraparound.
    pub fn transit(send_ms: u32, receive_ms: u32) -> i32 {
        receive_ms.wrapping_sub(send_ms) as i32
    }

    /// Feed one frame's timestamps and return the updated jitter.
    pub fn observe(&mut self, send_ms: u32, receive_ms: u32) -> f64 {
        self.observe_transit(Self::transit(send_ms, receive_ms))
    }

    /// Feed one transit sample and return the updated jitter.
    pub fn observe_transit(&mut self, transit: i32) -> f64 {
        if let Some(previous) = self.previous_transit {
            let d = (i64::from(transit) - i64::from(previous)).abs() as f64;
            self.smoothed_jitter += (d - self.smoothed_jitter) / JITTER_GAIN;
        }
        self.previous_transit = Some(transit);
        self.smoothed_jitter
    }

    /// Current smoothed jitter in milliseconds.
    pub fn jitter_ms(&self) -> f64 {
        self.smoothed_jitter
    }
}
