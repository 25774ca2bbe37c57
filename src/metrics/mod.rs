//! Throughput windows and connection statistics.

mod stats;
mod window;

pub use stats::ConnectionStats;
pub use window::MetricsWindow;
