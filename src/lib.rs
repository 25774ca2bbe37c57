//! # dualnet
//!
//! Dual-channel messaging over one secured connection.
//!
//! Every connection carries two logical channels:
//!
//! - **Reliable**: ordered delivery over a stream, with a bounded reorder
//!   buffer that gives up on a missing frame after a gap deadline
//! - **Unreliable**: best-effort datagrams, with loss inferred from sequence
//!   gaps
//!
//! Frames on both channels share a 7-byte header (channel tag, 16-bit
//! sequence, 32-bit millisecond timestamp), which also feeds per-channel
//! jitter estimates. Sliding windows track throughput; RTT comes straight
//! from the secured transport.
//!
//! ## Feature Flags
//!
//! - `quic` (default): QUIC binding and client/server endpoints (quinn)
//! - `serde` (default): `Serialize` for statistics snapshots
//!
//! ## Modules
//!
//! - [`core`]: Collaborator traits, constants, and error types
//! - [`transport`]: Framing, sequencing, and the connection state machine
//! - [`channel`]: Reorder buffer, loss and jitter estimators
//! - [`metrics`]: Throughput windows and statistics snapshots
//! - [`endpoint`]: Client and server endpoints (requires `quic` feature)
//!
//! ## Example Usage
//!
//! ```rust
//! use std::sync::Arc;
//! use dualnet::prelude::*;
//!
//! let transport = Arc::new(MemoryTransport::new());
//! let conn = Connection::builder(transport.clone()).build();
//! conn.handle_event(TransportEvent::Established);
//!
//! let seq = conn.send(&b"hello"[..], Channel::Reliable)?;
//! assert_eq!(seq, 0);
//!
//! let frame = decode(&transport.ordered()[0])?;
//! assert_eq!(frame.channel, Channel::Reliable);
//! assert_eq!(&frame.payload[..], b"hello");
//! # Ok::<(), dualnet::DualnetError>(())
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![cfg_attr(docsrs, feature(doc_cfg))]

pub mod channel;
pub mod core;
pub mod metrics;
pub mod transport;

// Endpoints (feature-gated)
#[cfg(feature = "quic")]
#[cfg_attr(docsrs, doc(cfg(feature = "quic")))]
pub mod endpoint;

/// Prelude module for convenient imports.
pub mod prelude {
    pub use crate::core::*;

    pub use crate::transport::{
        decode, encode, Channel, Connection, ConnectionBuilder, ConnectionConfig,
        ConnectionError, ConnectionId, ConnectionPhase, ConnectionResult, Frame, FrameError,
        HandlerKind, ManualClock, MemoryTransport, Message, Termination, TransportEvent,
    };

    pub use crate::metrics::ConnectionStats;

    #[cfg(feature = "quic")]
    pub use crate::endpoint::{Endpoint, EndpointBuilder, EndpointConfig, EndpointError, Role};
}

// Re-export commonly used items at crate root
pub use core::{DualnetError, Transport, TransportError};
pub use metrics::ConnectionStats;
pub use transport::{Channel, Connection, ConnectionConfig, ConnectionPhase, Message};

#[cfg(feature = "quic")]
pub use endpoint::{Endpoint, EndpointBuilder};
