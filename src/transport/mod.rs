//! Transport layer.
//!
//! This module carries application frames over the two channels. It provides:
//!
//! - **Framing**: [`encode`] / [`decode`] for the 7-byte header wire format
//! - **Sequencing**: per-channel [`sequence`] counters with wraparound ordering
//! - **Connection**: the [`Connection`] state machine, handlers, and stats
//! - **Bindings**: [`MemoryTransport`] for tests, `QuicTransport` over QUIC
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────┐
//! │            Application                  │
//! ├─────────────────────────────────────────┤
//! │         Connection                      │  ← This module
//! │   framing, sequencing, handlers, stats  │
//! ├─────────────────────────────────────────┤
//! │      Transport trait (QUIC binding)     │
//! │   ordered stream  │  datagrams          │
//! └─────────────────────────────────────────┘
//! ```

mod connection;
mod error;
mod frame;
mod memory;
pub mod sequence;

#[cfg(feature = "quic")]
mod quic;

pub use connection::*;
pub use error::*;
pub use frame::*;
pub use memory::{ManualClock, MemoryTransport};

#[cfg(feature = "quic")]
pub use quic::{establish, QuicTransport};
