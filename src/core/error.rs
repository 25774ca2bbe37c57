//! Error types for dualnet.

use thiserror::Error;

use crate::transport::{ConnectionError, FrameError};

#[cfg(feature = "quic")]
use crate::endpoint::EndpointError;

/// Errors reported by a transport collaborator.
#[derive(Debug, Error)]
pub enum TransportError {
    /// The underlying connection is closed or was never attached.
    #[error("transport closed")]
    Closed,

    /// Payload exceeds what the transport can carry in one message.
    #[error("message too large: {size} bytes (max {max})")]
    TooLarge {
        /// Size of the rejected message.
        size: usize,
        /// Largest size the transport accepts.
        max: usize,
    },

    /// QUIC-level failure reported by the secured transport.
    #[error("quic error: {0}")]
    Quic(String),
}

impl TransportError {
    /// Check if this error means the connection can no longer carry traffic.
    pub fn is_fatal(&self) -> bool {
        matches!(self, TransportError::Closed | TransportError::Quic(_))
    }
}

/// Top-level dualnet errors.
#[derive(Debug, Error)]
pub enum DualnetError {
    /// Frame could not be decoded.
    #[error("malformed frame: {0}")]
    Frame(#[from] FrameError),

    /// Connection-level error.
    #[error("connection error: {0}")]
    Connection(#[from] ConnectionError),

    /// Transport collaborator error.
    #[error("transport error: {0}")]
    Transport(#[from] TransportError),

    /// Endpoint setup error.
    #[cfg(feature = "quic")]
    #[error("endpoint error: {0}")]
    Endpoint(#[from] EndpointError),
}
