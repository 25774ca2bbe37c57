//! Client and server endpoints over QUIC.

use std::future::Future;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex, PoisonError};

use tokio::sync::oneshot;

use super::config::{EndpointConfig, Role};
use super::error::EndpointError;
use crate::transport::{
    connect_handler, establish, ConnectHandler, Connection, ConnectionConfig, ConnectionError,
    ConnectionPhase, HandlerKind,
};

type Registry = Arc<Mutex<Vec<Connection>>>;

/// A dualnet endpoint.
///
/// A server endpoint accepts connections after [`listen`](Self::listen); a
/// client endpoint opens them with [`connect`](Self::connect). Either way the
/// connect handler fires once per established connection.
///
/// # Example
///
/// ```ignore
/// use dualnet::prelude::*;
///
/// let config = EndpointBuilder::server().build();
/// let quic = config.quic_server_config(certs, key)?;
///
/// let mut server = Endpoint::new(config);
/// server.on_connect(|conn: Connection| async move {
///     conn.on_data(|msg: Message| async move {
///         println!("{} bytes on {}", msg.payload.len(), msg.channel);
///     })
///     .ok();
/// })?;
/// let addr = server.listen("0.0.0.0:4433".parse()?, quic)?;
/// ```
pub struct Endpoint {
    config: EndpointConfig,
    on_connect: Option<ConnectHandler>,
    quic: Option<quinn::Endpoint>,
    shutdown_tx: Option<oneshot::Sender<()>>,
    connections: Registry,
}

impl std::fmt::Debug for Endpoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Endpoint")
            .field("role", &self.config.role)
            .field("started", &self.quic.is_some())
            .finish()
    }
}

impl Endpoint {
    /// Create an endpoint. Nothing is bound until `listen` or `connect`.
    pub fn new(config: EndpointConfig) -> Self {
        Self {
            config,
            on_connect: None,
            quic: None,
            shutdown_tx: None,
            connections: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Endpoint role.
    pub fn role(&self) -> Role {
        self.config.role
    }

    /// Endpoint configuration.
    pub fn config(&self) -> &EndpointConfig {
        &self.config
    }

    /// Register the handler fired once per established connection.
    ///
    /// A listening server has already handed its handler to the accept
    /// loop, so registering afterwards fails with
    /// [`EndpointError::AlreadyStarted`].
    pub fn on_connect<F, Fut>(&mut self, handler: F) -> Result<(), EndpointError>
    where
        F: Fn(Connection) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        if self.shutdown_tx.is_some() {
            return Err(EndpointError::AlreadyStarted);
        }
        if self.on_connect.is_some() {
            return Err(ConnectionError::HandlerAlreadyRegistered(HandlerKind::Connect).into());
        }
        self.on_connect = Some(connect_handler(handler));
        Ok(())
    }

    /// Bind `addr` and accept connections in the background.
    ///
    /// Returns the bound address, which differs from `addr` when port 0 was
    /// requested.
    pub fn listen(
        &mut self,
        addr: SocketAddr,
        server_config: quinn::ServerConfig,
    ) -> Result<SocketAddr, EndpointError> {
        self.require(Role::Server, "listen")?;
        if self.quic.is_some() {
            return Err(EndpointError::AlreadyStarted);
        }

        let quic = quinn::Endpoint::server(server_config, addr)?;
        let local_addr = quic.local_addr()?;
        let (shutdown_tx, shutdown_rx) = oneshot::channel();

        tokio::spawn(accept_loop(
            quic.clone(),
            self.config.connection.clone(),
            self.on_connect.clone(),
            self.connections.clone(),
            shutdown_rx,
        ));

        tracing::info!(addr = %local_addr, "listening");
        self.quic = Some(quic);
        self.shutdown_tx = Some(shutdown_tx);
        Ok(local_addr)
    }

    /// Connect to a server and wait for the handshake.
    pub async fn connect(
        &mut self,
        addr: SocketAddr,
        server_name: &str,
        client_config: quinn::ClientConfig,
    ) -> Result<Connection, EndpointError> {
        self.require(Role::Client, "connect")?;

        let quic = match &self.quic {
            Some(quic) => quic.clone(),
            None => {
                let quic = quinn::Endpoint::client(self.config.client_bind_addr)?;
                self.quic = Some(quic.clone());
                quic
            }
        };

        let connecting = quic
            .connect_with(client_config, addr, server_name)
            .map_err(|e| EndpointError::Connect(e.to_string()))?;
        let conn = establish(
            connecting,
            self.config.connection.clone(),
            self.on_connect.clone(),
        )
        .await?;

        tracing::info!(conn = %conn.id(), peer = %addr, "connected");
        track(&self.connections, conn.clone());
        Ok(conn)
    }

    /// Local address of the bound socket.
    pub fn local_addr(&self) -> Result<SocketAddr, EndpointError> {
        let quic = self.quic.as_ref().ok_or(EndpointError::NotStarted)?;
        Ok(quic.local_addr()?)
    }

    /// Connections that have not yet closed.
    pub fn connections(&self) -> Vec<Connection> {
        let mut connections = lock(&self.connections);
        connections.retain(|c| c.phase() != ConnectionPhase::Closed);
        connections.clone()
    }

    /// Stop accepting, close every connection, and wait for the socket to
    /// drain. Safe to call more than once.
    pub async fn close(&mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }

        let connections = std::mem::take(&mut *lock(&self.connections));
        for conn in &connections {
            conn.close();
        }

        if let Some(quic) = self.quic.take() {
            quic.close(0u32.into(), b"endpoint closed");
            quic.wait_idle().await;
            tracing::info!(closed = connections.len(), "endpoint closed");
        }
    }

    fn require(&self, role: Role, operation: &'static str) -> Result<(), EndpointError> {
        if self.config.role != role {
            return Err(EndpointError::RoleViolation {
                role: self.config.role,
                operation,
            });
        }
        Ok(())
    }
}

impl Drop for Endpoint {
    fn drop(&mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }
    }
}

async fn accept_loop(
    quic: quinn::Endpoint,
    config: ConnectionConfig,
    on_connect: Option<ConnectHandler>,
    connections: Registry,
    mut shutdown_rx: oneshot::Receiver<()>,
) {
    loop {
        let incoming = tokio::select! {
            _ = &mut shutdown_rx => break,
            incoming = quic.accept() => match incoming {
                Some(incoming) => incoming,
                None => break,
            },
        };

        let connecting = match incoming.accept() {
            Ok(connecting) => connecting,
            Err(e) => {
                tracing::warn!(error = %e, "rejected incoming connection");
                continue;
            }
        };

        let config = config.clone();
        let on_connect = on_connect.clone();
        let connections = connections.clone();
        tokio::spawn(async move {
            match establish(connecting, config, on_connect).await {
                Ok(conn) => {
                    tracing::info!(conn = %conn.id(), peer = ?conn.peer(), "accepted");
                    track(&connections, conn);
                }
                Err(e) => tracing::debug!(error = %e, "handshake failed"),
            }
        });
    }

    tracing::debug!("accept loop stopped");
}

fn track(connections: &Registry, conn: Connection) {
    let mut connections = lock(connections);
    connections.retain(|c| c.phase() != ConnectionPhase::Closed);
    connections.push(conn);
}

fn lock(connections: &Registry) -> std::sync::MutexGuard<'_, Vec<Connection>> {
    connections.lock().unwrap_or_else(PoisonError::into_inner)
}
