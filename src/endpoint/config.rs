//! Endpoint configuration.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use quinn::crypto::rustls::{QuicClientConfig, QuicServerConfig};
use quinn::rustls;
use quinn::rustls::pki_types::{CertificateDer, PrivateKeyDer};

use super::error::EndpointError;
use crate::core::constants::ALPN;
use crate::transport::ConnectionConfig;

/// Which side of the handshake an endpoint plays.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    /// Initiates connections.
    Client,
    /// Accepts connections.
    Server,
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Role::Client => f.write_str("client"),
            Role::Server => f.write_str("server"),
        }
    }
}

/// Endpoint configuration.
#[derive(Debug, Clone)]
pub struct EndpointConfig {
    /// Client or server.
    pub role: Role,

    /// Local address for client endpoints.
    pub client_bind_addr: SocketAddr,

    /// Applied to every connection the endpoint creates.
    pub connection: ConnectionConfig,

    /// Close a connection after this long without traffic.
    pub idle_timeout: Duration,

    /// Send keep-alives at this interval, if set.
    pub keep_alive_interval: Option<Duration>,
}

impl EndpointConfig {
    fn with_role(role: Role) -> Self {
        Self {
            role,
            client_bind_addr: SocketAddr::from(([0, 0, 0, 0], 0)),
            connection: ConnectionConfig::default(),
            idle_timeout: Duration::from_secs(30),
            keep_alive_interval: Some(Duration::from_secs(5)),
        }
    }

    /// Build a QUIC server configuration from a certificate chain and key.
    ///
    /// Sets the ALPN, idle timeout, and keep-alive interval.
    pub fn quic_server_config(
        &self,
        cert_chain: Vec<CertificateDer<'static>>,
        key: PrivateKeyDer<'static>,
    ) -> Result<quinn::ServerConfig, EndpointError> {
        let provider = Arc::new(rustls::crypto::ring::default_provider());
        let mut tls = rustls::ServerConfig::builder_with_provider(provider)
            .with_protocol_versions(&[&rustls::version::TLS13])
            .map_err(config_error)?
            .with_no_client_auth()
            .with_single_cert(cert_chain, key)
            .map_err(config_error)?;
        tls.alpn_protocols = vec![ALPN.to_vec()];

        let crypto = QuicServerConfig::try_from(tls).map_err(config_error)?;
        let mut config = quinn::ServerConfig::with_crypto(Arc::new(crypto));
        config.transport_config(Arc::new(self.transport_config()?));
        Ok(config)
    }

    /// Build a QUIC client configuration trusting `roots`.
    pub fn quic_client_config(
        &self,
        roots: rustls::RootCertStore,
    ) -> Result<quinn::ClientConfig, EndpointError> {
        let provider = Arc::new(rustls::crypto::ring::default_provider());
        let mut tls = rustls::ClientConfig::builder_with_provider(provider)
            .with_protocol_versions(&[&rustls::version::TLS13])
            .map_err(config_error)?
            .with_root_certificates(roots)
            .with_no_client_auth();
        tls.alpn_protocols = vec![ALPN.to_vec()];

        let crypto = QuicClientConfig::try_from(tls).map_err(config_error)?;
        let mut config = quinn::ClientConfig::new(Arc::new(crypto));
        config.transport_config(Arc::new(self.transport_config()?));
        Ok(config)
    }

    fn transport_config(&self) -> Result<quinn::TransportConfig, EndpointError> {
        let idle = quinn::IdleTimeout::try_from(self.idle_timeout).map_err(config_error)?;

        let mut transport = quinn::TransportConfig::default();
        transport
            .max_idle_timeout(Some(idle))
            .keep_alive_interval(self.keep_alive_interval);
        Ok(transport)
    }
}

fn config_error(e: impl std::fmt::Display) -> EndpointError {
    EndpointError::Config(e.to_string())
}

/// Builder for [`EndpointConfig`].
#[derive(Debug)]
pub struct EndpointBuilder {
    config: EndpointConfig,
}

impl EndpointBuilder {
    /// Start a server configuration.
    pub fn server() -> Self {
        Self {
            config: EndpointConfig::with_role(Role::Server),
        }
    }

    /// Start a client configuration.
    pub fn client() -> Self {
        Self {
            config: EndpointConfig::with_role(Role::Client),
        }
    }

    /// Set the local address used by client endpoints.
    pub fn client_bind_addr(mut self, addr: SocketAddr) -> Self {
        self.config.client_bind_addr = addr;
        self
    }

    /// Set the reorder gap deadline.
    pub fn gap_deadline(mut self, deadline: Duration) -> Self {
        self.config.connection.gap_deadline = deadline;
        self
    }

    /// Set the throughput window.
    pub fn metrics_window(mut self, window: Duration) -> Self {
        self.config.connection.metrics_window = window;
        self
    }

    /// Set the reorder buffer capacity.
    pub fn max_pending(mut self, max: usize) -> Self {
        self.config.connection.max_pending = max;
        self
    }

    /// Enable or disable stream fallback for unreliable sends.
    pub fn datagram_fallback(mut self, enabled: bool) -> Self {
        self.config.connection.datagram_fallback = enabled;
        self
    }

    /// Set the idle timeout.
    pub fn idle_timeout(mut self, timeout: Duration) -> Self {
        self.config.idle_timeout = timeout;
        self
    }

    /// Set or disable the keep-alive interval.
    pub fn keep_alive_interval(mut self, interval: Option<Duration>) -> Self {
        self.config.keep_alive_interval = interval;
        self
    }

    /// Build the configuration.
    pub fn build(self) -> EndpointConfig {
        self.config
    }
}
