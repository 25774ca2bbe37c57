//! Endpoint error types.

use thiserror::Error;

use super::config::Role;
use crate::transport::ConnectionError;

/// Errors from endpoint setup and teardown.
#[derive(Debug, Error)]
pub enum EndpointError {
    /// Operation not permitted for this endpoint's role.
    #[error("{operation} is not available on a {role} endpoint")]
    RoleViolation {
        /// The endpoint's role.
        role: Role,
        /// The rejected operation.
        operation: &'static str,
    },

    /// `listen` or `on_connect` called on an endpoint that is already
    /// listening.
    #[error("endpoint already started")]
    AlreadyStarted,

    /// Operation needs a bound endpoint.
    #[error("endpoint not started")]
    NotStarted,

    /// Failed to bind the UDP socket.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// TLS or QUIC configuration rejected.
    #[error("invalid quic configuration: {0}")]
    Config(String),

    /// Could not start a connection attempt.
    #[error("connect failed: {0}")]
    Connect(String),

    /// The handshake failed.
    #[error("handshake failed: {0}")]
    Handshake(#[from] quinn::ConnectionError),

    /// Connection-level error.
    #[error("connection error: {0}")]
    Connection(#[from] ConnectionError),
}
