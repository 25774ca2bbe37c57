//! Client and server endpoints.
//!
//! An [`Endpoint`] owns one QUIC socket. Server endpoints accept
//! connections; client endpoints open them. Both hand every established
//! [`Connection`](crate::transport::Connection) to the registered connect
//! handler.

mod config;
#[allow(clippy::module_inception)]
mod endpoint;
mod error;

pub use config::{EndpointBuilder, EndpointConfig, Role};
pub use endpoint::Endpoint;
pub use error::EndpointError;
