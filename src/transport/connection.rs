//! Connection state management.
//!
//! A [`Connection`] owns both channels' sequencing and receive state, the
//! throughput windows, and the application's handlers. It is driven by
//! [`TransportEvent`]s delivered one at a time by whatever runs the secured
//! transport, and never performs blocking I/O itself.
//!
//! # State Machine
//!
//! ```text
//! ┌──────┐ HandshakeStarted ┌─────────────┐ Established ┌─────────────┐
//! │ Init │─────────────────>│ Handshaking │────────────>│ Established │
//! └──────┘                  └─────────────┘             └─────────────┘
//!     │                            │                      │        │
//!     │                            │ Terminated    close()│        │ Terminated
//!     │                            ↓                      ↓        │
//!     │      Terminated       ┌────────┐  Terminated ┌─────────┐   │
//!     └──────────────────────>│ Closed │<────────────│ Closing │   │
//!                             └────────┘             └─────────┘   │
//!                                  ↑                               │
//!                                  └───────────────────────────────┘
//! ```
//!
//! Transitions come from the transport, not from the application; `close()`
//! only moves to `Closing` and asks the transport to shut down.
//!
//! # Handlers
//!
//! Released messages go onto a per-connection delivery queue drained by a
//! single tokio task, which awaits the data handler for one message before
//! starting the next. Ingestion never waits on a handler, and the handler
//! sees messages in release order on any runtime flavor. The close handler
//! is queued behind any undelivered data.

use std::future::Future;
use std::net::SocketAddr;
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use bytes::Bytes;
use tokio::sync::mpsc;

use super::error::{ConnectionError, ConnectionResult};
use super::frame::{self, Channel};
use super::sequence::SequenceAllocator;
use crate::channel::{JitterEstimator, LossEstimator, ReorderBuffer, Released};
use crate::core::constants::{DEFAULT_GAP_DEADLINE, DEFAULT_MAX_PENDING, DEFAULT_METRICS_WINDOW};
use crate::core::{BestEffort, Clock, SystemClock, Transport};
use crate::metrics::{ConnectionStats, MetricsWindow};

/// Boxed future returned by handlers.
pub type HandlerFuture = Pin<Box<dyn Future<Output = ()> + Send + 'static>>;

/// Handler invoked once when a connection becomes established.
pub type ConnectHandler = Arc<dyn Fn(Connection) -> HandlerFuture + Send + Sync>;

type DataHandler = Arc<dyn Fn(Message) -> HandlerFuture + Send + Sync>;
type CloseHandler = Box<dyn FnOnce(Termination) -> HandlerFuture + Send>;

/// Work item for the delivery task.
enum Delivery {
    Data(Message),
    Close(CloseHandler, Termination),
}

/// Wrap an async closure as a [`ConnectHandler`].
pub fn connect_handler<F, Fut>(handler: F) -> ConnectHandler
where
    F: Fn(Connection) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    Arc::new(move |conn| Box::pin(handler(conn)))
}

/// Connection lifecycle phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionPhase {
    /// Created, transport handshake not started.
    Init,
    /// Secured transport handshake in progress.
    Handshaking,
    /// Handshake complete, data transfer active.
    Established,
    /// Local close requested, waiting for the transport to terminate.
    Closing,
    /// Transport terminated.
    Closed,
}

/// Kinds of per-connection handler.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandlerKind {
    /// Connection established.
    Connect,
    /// Data arrival.
    Data,
    /// Connection termination.
    Close,
}

impl std::fmt::Display for HandlerKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            HandlerKind::Connect => f.write_str("connect"),
            HandlerKind::Data => f.write_str("data"),
            HandlerKind::Close => f.write_str("close"),
        }
    }
}

/// Why the transport terminated.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Termination {
    /// Whether the connection closed cleanly.
    pub graceful: bool,
    /// Human-readable reason from the transport.
    pub reason: String,
}

impl Termination {
    /// A clean shutdown.
    pub fn graceful(reason: impl Into<String>) -> Self {
        Self {
            graceful: true,
            reason: reason.into(),
        }
    }

    /// A faulted shutdown.
    pub fn faulted(reason: impl Into<String>) -> Self {
        Self {
            graceful: false,
            reason: reason.into(),
        }
    }
}

/// Lifecycle and data events from the secured transport.
#[derive(Debug, Clone)]
pub enum TransportEvent {
    /// Handshake has begun.
    HandshakeStarted,
    /// Handshake completed.
    Established,
    /// One encoded frame arrived (from either the stream or a datagram).
    Data(Bytes),
    /// Transport closed, gracefully or not.
    Terminated(Termination),
}

/// A message handed to the application's data handler.
#[derive(Debug, Clone, PartialEq)]
pub struct Message {
    /// Channel the message arrived on.
    pub channel: Channel,
    /// Sender's sequence number.
    pub sequence: u16,
    /// Sender's timestamp (wall-clock ms, truncated).
    pub timestamp_ms: u32,
    /// Application payload.
    pub payload: Bytes,
    /// Receive time minus send time, in ms. Includes any clock offset.
    pub latency_ms: i32,
    /// Channel jitter after this frame, in ms.
    pub jitter_ms: f64,
    /// Remote address, if known.
    pub peer: Option<SocketAddr>,
}

/// Process-unique connection identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionId(u64);

impl ConnectionId {
    fn next() -> Self {
        static NEXT: AtomicU64 = AtomicU64::new(1);
        Self(NEXT.fetch_add(1, Ordering::Relaxed))
    }

    /// Raw value.
    pub fn as_u64(self) -> u64 {
        self.0
    }
}

impl std::fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Per-connection tunables.
#[derive(Debug, Clone)]
pub struct ConnectionConfig {
    /// How long the reorder buffer waits for a missing reliable frame.
    pub gap_deadline: Duration,
    /// Retention window for throughput figures.
    pub metrics_window: Duration,
    /// Maximum buffered out-of-order reliable frames.
    pub max_pending: usize,
    /// Re-route unreliable frames over the ordered stream when the peer
    /// lacks best-effort support.
    pub datagram_fallback: bool,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            gap_deadline: DEFAULT_GAP_DEADLINE,
            metrics_window: DEFAULT_METRICS_WINDOW,
            max_pending: DEFAULT_MAX_PENDING,
            datagram_fallback: true,
        }
    }
}

/// Builder for a [`Connection`].
pub struct ConnectionBuilder {
    transport: Arc<dyn Transport>,
    config: ConnectionConfig,
    clock: Arc<dyn Clock>,
    peer: Option<SocketAddr>,
    on_connect: Option<ConnectHandler>,
}

impl ConnectionBuilder {
    /// Start building a connection over `transport`.
    pub fn new(transport: Arc<dyn Transport>) -> Self {
        Self {
            transport,
            config: ConnectionConfig::default(),
            clock: Arc::new(SystemClock),
            peer: None,
            on_connect: None,
        }
    }

    /// Set the connection configuration.
    pub fn config(mut self, config: ConnectionConfig) -> Self {
        self.config = config;
        self
    }

    /// Set the time source.
    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Record the remote address.
    pub fn peer(mut self, peer: SocketAddr) -> Self {
        self.peer = Some(peer);
        self
    }

    /// Handler fired once the connection is established.
    pub fn on_connect(mut self, handler: ConnectHandler) -> Self {
        self.on_connect = Some(handler);
        self
    }

    /// Build the connection in the `Init` phase.
    pub fn build(self) -> Connection {
        let now = self.clock.now();
        let state = State {
            phase: ConnectionPhase::Init,
            send_reliable: SequenceAllocator::new(),
            send_unreliable: SequenceAllocator::new(),
            reorder: ReorderBuffer::with_capacity(self.config.gap_deadline, self.config.max_pending),
            loss: LossEstimator::new(),
            jitter: [JitterEstimator::new(), JitterEstimator::new()],
            tx: MetricsWindow::new(self.config.metrics_window),
            rx: MetricsWindow::new(self.config.metrics_window),
            malformed: 0,
            fallback_warned: false,
            created_at: now,
            on_connect: self.on_connect,
            on_data: None,
            on_close: None,
            delivery: None,
            termination: None,
        };

        Connection {
            inner: Arc::new(Inner {
                id: ConnectionId::next(),
                peer: self.peer,
                transport: self.transport,
                clock: self.clock,
                config: self.config,
                state: Mutex::new(state),
            }),
        }
    }
}

struct Inner {
    id: ConnectionId,
    peer: Option<SocketAddr>,
    transport: Arc<dyn Transport>,
    clock: Arc<dyn Clock>,
    config: ConnectionConfig,
    state: Mutex<State>,
}

struct State {
    phase: ConnectionPhase,

    send_reliable: SequenceAllocator,
    send_unreliable: SequenceAllocator,

    reorder: ReorderBuffer,
    loss: LossEstimator,
    /// Indexed by [`Channel::index`].
    jitter: [JitterEstimator; 2],

    tx: MetricsWindow,
    rx: MetricsWindow,
    malformed: u64,
    fallback_warned: bool,
    created_at: Instant,

    on_connect: Option<ConnectHandler>,
    on_data: Option<DataHandler>,
    on_close: Option<CloseHandler>,
    /// Feeds the delivery task; started with the first delivered message.
    delivery: Option<mpsc::UnboundedSender<Delivery>>,
    termination: Option<Termination>,
}

/// Handle to one connection. Cheap to clone; all clones share state.
#[derive(Clone)]
pub struct Connection {
    inner: Arc<Inner>,
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("id", &self.inner.id)
            .field("peer", &self.inner.peer)
            .field("phase", &self.phase())
            .finish()
    }
}

impl Connection {
    /// Start building a connection over `transport`.
    pub fn builder(transport: Arc<dyn Transport>) -> ConnectionBuilder {
        ConnectionBuilder::new(transport)
    }

    /// Connection identifier.
    pub fn id(&self) -> ConnectionId {
        self.inner.id
    }

    /// Remote address, if known.
    pub fn peer(&self) -> Option<SocketAddr> {
        self.inner.peer
    }

    /// Current lifecycle phase.
    pub fn phase(&self) -> ConnectionPhase {
        self.state().phase
    }

    /// Whether sends are currently accepted.
    pub fn is_established(&self) -> bool {
        self.phase() == ConnectionPhase::Established
    }

    /// Connection configuration.
    pub fn config(&self) -> &ConnectionConfig {
        &self.inner.config
    }

    /// Register the data handler. Only one may be registered.
    pub fn on_data<F, Fut>(&self, handler: F) -> ConnectionResult<()>
    where
        F: Fn(Message) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let mut state = self.state();
        if state.on_data.is_some() {
            return Err(ConnectionError::HandlerAlreadyRegistered(HandlerKind::Data));
        }
        state.on_data = Some(Arc::new(move |msg| Box::pin(handler(msg))));
        Ok(())
    }

    /// Register the close handler. Only one may be registered.
    ///
    /// If the connection has already terminated, the handler is dispatched
    /// immediately with the recorded termination.
    pub fn on_close<F, Fut>(&self, handler: F) -> ConnectionResult<()>
    where
        F: FnOnce(Termination) -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let mut state = self.state();
        if state.on_close.is_some() {
            return Err(ConnectionError::HandlerAlreadyRegistered(HandlerKind::Close));
        }

        if let Some(termination) = state.termination.clone() {
            drop(state);
            dispatch(Box::pin(handler(termination)));
            return Ok(());
        }

        state.on_close = Some(Box::new(move |t| Box::pin(handler(t))));
        Ok(())
    }

    /// Send `payload` on `channel` and flush it to the transport.
    ///
    /// Returns the sequence number stamped on the frame.
    pub fn send(&self, payload: impl Into<Bytes>, channel: Channel) -> ConnectionResult<u16> {
        let payload = payload.into();
        let mut state = self.state();

        if state.phase != ConnectionPhase::Established {
            return Err(ConnectionError::NotConnected(state.phase));
        }

        // Committed only once the transport accepts the frame.
        let sequence = match channel {
            Channel::Reliable => state.send_reliable.peek(),
            Channel::Unreliable => state.send_unreliable.peek(),
        };
        let encoded = frame::encode(channel, sequence, self.inner.clock.wall_ms(), &payload);
        let len = encoded.len() as u64;

        // Transmit under the lock so wire order matches sequence order.
        match channel {
            Channel::Reliable => self.inner.transport.send_ordered(encoded)?,
            Channel::Unreliable => match self.inner.transport.send_best_effort(encoded)? {
                BestEffort::Sent => {}
                BestEffort::Unsupported(encoded) => {
                    if !self.inner.config.datagram_fallback {
                        return Err(ConnectionError::UnsupportedCapability);
                    }
                    if !state.fallback_warned {
                        state.fallback_warned = true;
                        tracing::warn!(
                            conn = %self.inner.id,
                            "peer lacks datagram support, unreliable frames use the ordered stream"
                        );
                    }
                    self.inner.transport.send_ordered(encoded)?;
                }
            },
        }

        match channel {
            Channel::Reliable => state.send_reliable.next(),
            Channel::Unreliable => state.send_unreliable.next(),
        };
        let now = self.inner.clock.now();
        state.tx.record(now, len);
        tracing::trace!(conn = %self.inner.id, %channel, sequence, bytes = len, "frame sent");
        Ok(sequence)
    }

    /// Ask the transport to close. Sends fail from this point on.
    pub fn close(&self) {
        let mut state = self.state();
        match state.phase {
            ConnectionPhase::Closing | ConnectionPhase::Closed => return,
            _ => state.phase = ConnectionPhase::Closing,
        }
        drop(state);

        tracing::debug!(conn = %self.inner.id, "closing");
        self.inner.transport.close("closed by application");
    }

    /// Feed one transport event into the state machine.
    pub fn handle_event(&self, event: TransportEvent) {
        match event {
            TransportEvent::HandshakeStarted => self.handle_handshake_started(),
            TransportEvent::Established => self.handle_established(),
            TransportEvent::Data(bytes) => self.handle_data(bytes),
            TransportEvent::Terminated(termination) => self.handle_terminated(termination),
        }
    }

    /// Snapshot of RTT, throughput, loss, and jitter.
    pub fn stats(&self) -> ConnectionStats {
        let rtt = self.inner.transport.rtt_stats();
        let now = self.inner.clock.now();
        let mut state = self.state();

        ConnectionStats {
            tx_bps: state.tx.throughput_bps(now),
            rx_bps: state.rx.throughput_bps(now),
            tx_packets_in_window: state.tx.packets_in_window(now),
            rx_packets_in_window: state.rx.packets_in_window(now),
            packets_lost: state.loss.lost(),
            packets_received: state.loss.received(),
            loss_rate: state.loss.loss_rate(),
            packets_sent: state.tx.total_packets(),
            bytes_sent: state.tx.total_bytes(),
            bytes_received: state.rx.total_bytes(),
            elapsed: now.saturating_duration_since(state.created_at),
            reliable_jitter_ms: state.jitter[Channel::Reliable.index()].jitter_ms(),
            unreliable_jitter_ms: state.jitter[Channel::Unreliable.index()].jitter_ms(),
            skipped: state.reorder.skipped(),
            stale: state.reorder.stale(),
            malformed: state.malformed,
            ..Default::default()
        }
        .with_rtt(rtt)
    }

    fn handle_handshake_started(&self) {
        let mut state = self.state();
        if state.phase == ConnectionPhase::Init {
            state.phase = ConnectionPhase::Handshaking;
            tracing::debug!(conn = %self.inner.id, "handshaking");
        }
    }

    fn handle_established(&self) {
        let mut state = self.state();
        match state.phase {
            ConnectionPhase::Init | ConnectionPhase::Handshaking => {}
            phase => {
                tracing::debug!(conn = %self.inner.id, ?phase, "ignoring late handshake completion");
                return;
            }
        }
        state.phase = ConnectionPhase::Established;
        let handler = state.on_connect.take();
        drop(state);

        tracing::debug!(conn = %self.inner.id, peer = ?self.inner.peer, "established");
        if let Some(handler) = handler {
            dispatch(handler(self.clone()));
        }
    }

    fn handle_data(&self, bytes: Bytes) {
        let mut state = self.state();
        match state.phase {
            ConnectionPhase::Established | ConnectionPhase::Closing => {}
            phase => {
                tracing::debug!(conn = %self.inner.id, ?phase, "dropping frame outside established phase");
                return;
            }
        }

        let frame = match frame::decode(&bytes) {
            Ok(frame) => frame,
            Err(e) => {
                state.malformed += 1;
                tracing::warn!(conn = %self.inner.id, error = %e, "malformed frame ignored");
                return;
            }
        };

        let now = self.inner.clock.now();
        let received_ms = self.inner.clock.wall_ms();
        state.rx.record(now, bytes.len() as u64);

        let jitter_ms = state.jitter[frame.channel.index()].observe(frame.timestamp_ms, received_ms);
        let mut messages = Vec::new();

        match frame.channel {
            Channel::Reliable => {
                let mut released = Vec::new();
                state
                    .reorder
                    .arrive(frame.sequence, frame.timestamp_ms, frame.payload, now, &mut released);
                messages.extend(released.into_iter().map(|r: Released| Message {
                    channel: Channel::Reliable,
                    sequence: r.sequence,
                    timestamp_ms: r.timestamp_ms,
                    payload: r.payload,
                    latency_ms: JitterEstimator::transit(r.timestamp_ms, received_ms),
                    jitter_ms,
                    peer: self.inner.peer,
                }));
            }
            Channel::Unreliable => {
                state.loss.observe(frame.sequence);
                messages.push(Message {
                    channel: Channel::Unreliable,
                    sequence: frame.sequence,
                    timestamp_ms: frame.timestamp_ms,
                    payload: frame.payload,
                    latency_ms: JitterEstimator::transit(frame.timestamp_ms, received_ms),
                    jitter_ms,
                    peer: self.inner.peer,
                });
            }
        }

        tracing::trace!(
            conn = %self.inner.id,
            channel = %frame.channel,
            sequence = frame.sequence,
            delivered = messages.len(),
            "frame received"
        );

        // Enqueue under the lock so concurrent ingestion keeps release order.
        // No handler registered: frames are accounted for but not delivered.
        if let Some(queue) = self.delivery_queue(&mut state) {
            for message in messages {
                if queue.send(Delivery::Data(message)).is_err() {
                    tracing::warn!(conn = %self.inner.id, "delivery task gone, message dropped");
                    break;
                }
            }
        }
    }

    /// Sender for the delivery task, starting it on first use.
    fn delivery_queue<'a>(
        &self,
        state: &'a mut State,
    ) -> Option<&'a mpsc::UnboundedSender<Delivery>> {
        if state.delivery.is_none() {
            let handler = state.on_data.clone()?;
            let handle = match tokio::runtime::Handle::try_current() {
                Ok(handle) => handle,
                Err(_) => {
                    tracing::warn!(
                        conn = %self.inner.id,
                        "no tokio runtime available, message dropped"
                    );
                    return None;
                }
            };
            let (tx, rx) = mpsc::unbounded_channel();
            handle.spawn(deliver(self.inner.id, handler, rx));
            state.delivery = Some(tx);
        }
        state.delivery.as_ref()
    }

    fn handle_terminated(&self, termination: Termination) {
        let mut state = self.state();
        if state.phase == ConnectionPhase::Closed {
            return;
        }

        state.phase = ConnectionPhase::Closed;
        state.termination = Some(termination.clone());
        state.reorder.clear_pending();
        state.on_connect = None;
        state.on_data = None;
        let handler = state.on_close.take();
        // Dropping the sender lets the delivery task exit once drained.
        let queue = state.delivery.take();
        drop(state);

        if termination.graceful {
            tracing::debug!(conn = %self.inner.id, reason = %termination.reason, "closed");
        } else {
            tracing::warn!(conn = %self.inner.id, reason = %termination.reason, "terminated");
        }

        let Some(handler) = handler else {
            return;
        };
        match queue {
            Some(queue) => {
                if let Err(mpsc::error::SendError(Delivery::Close(handler, termination))) =
                    queue.send(Delivery::Close(handler, termination))
                {
                    dispatch(handler(termination));
                }
            }
            None => dispatch(handler(termination)),
        }
    }

    fn state(&self) -> MutexGuard<'_, State> {
        self.inner
            .state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }
}

/// Drain the delivery queue, one handler call at a time.
async fn deliver(
    id: ConnectionId,
    handler: DataHandler,
    mut rx: mpsc::UnboundedReceiver<Delivery>,
) {
    while let Some(item) = rx.recv().await {
        match item {
            Delivery::Data(message) => handler(message).await,
            Delivery::Close(on_close, termination) => {
                on_close(termination).await;
                break;
            }
        }
    }
    tracing::trace!(conn = %id, "delivery task finished");
}

/// Run a handler future as its own task.
fn dispatch(future: HandlerFuture) {
    match tokio::runtime::Handle::try_current() {
        Ok(handle) => {
            handle.spawn(future);
        }
        Err(_) => tracing::warn!("no tokio runtime available, handler dropped"),
    }
}
