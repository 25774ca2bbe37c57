//! Connection error types.

use thiserror::Error;

use super::connection::{ConnectionPhase, HandlerKind};
use crate::core::TransportError;

/// Errors returned to the application by a [`Connection`](super::Connection).
#[derive(Debug, Error)]
pub enum ConnectionError {
    /// Send attempted outside the `Established` phase.
    #[error("not connected (phase: {0:?})")]
    NotConnected(ConnectionPhase),

    /// A handler of this kind is already registered.
    #[error("{0} handler already registered")]
    HandlerAlreadyRegistered(HandlerKind),

    /// Best-effort delivery is unavailable and fallback is disabled.
    #[error("peer does not support best-effort delivery")]
    UnsupportedCapability,

    /// The transport rejected the write.
    #[error("transport error: {0}")]
    Transport(#[from] TransportError),
}

impl ConnectionError {
    /// Check if the connection is unusable after this error.
    pub fn is_fatal(&self) -> bool {
        match self {
            ConnectionError::Transport(e) => e.is_fatal(),
            _ => false,
        }
    }
}

/// Result type for connection operations.
pub type ConnectionResult<T> = Result<T, ConnectionError>;
