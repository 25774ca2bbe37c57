//! Per-channel receive-side state.
//!
//! - [`ReorderBuffer`]: in-order delivery with a bounded gap deadline (reliable)
//! - [`LossEstimator`]: loss from sequence gaps (unreliable)
//! - [`JitterEstimator`]: RFC 3550 jitter (one per channel)

mod jitter;
mod loss;
mod reorder;

pub use jitter::JitterEstimator;
pub use loss::{loss_rate, LossEstimator};
pub use reorder::{Arrival, ReorderBuffer, Released};
