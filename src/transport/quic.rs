//! QUIC binding for the [`Transport`] contract.
//!
//! The reliable channel rides one unidirectional stream per direction, each
//! frame preceded by a big-endian `u32` length. The unreliable channel uses
//! QUIC datagrams (RFC 9221).
//!
//! [`establish`] turns a pending handshake into a running [`Connection`]:
//!
//! ```text
//! HandshakeStarted ──> handshake ──> attach ──> Established ──> spawn I/O tasks
//!                                                                  │
//!                          Terminated <── quinn::Connection::closed()
//! ```

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, OnceLock, PoisonError};
use std::time::Duration;

use bytes::Bytes;
use quinn::{SendDatagramError, VarInt};
use tokio::sync::mpsc;

use super::connection::{
    ConnectHandler, Connection, ConnectionConfig, Termination, TransportEvent,
};
use crate::core::constants::{MAX_STREAM_FRAME_SIZE, STREAM_LENGTH_PREFIX_SIZE};
use crate::core::{BestEffort, RttStats, Transport, TransportError};

/// Application close code for a clean shutdown.
const CLOSE_OK: u32 = 0;

/// Stop code sent when the peer writes an oversized stream frame.
const STOP_FRAME_TOO_LARGE: u32 = 1;

/// [`Transport`] over a `quinn::Connection`.
///
/// Ordered writes are queued to a writer task, so `send_ordered` never
/// blocks.
#[derive(Debug)]
pub struct QuicTransport {
    conn: OnceLock<quinn::Connection>,
    ordered_tx: mpsc::UnboundedSender<Bytes>,
    min_rtt: Mutex<Option<Duration>>,
    close_requested: AtomicBool,
}

impl QuicTransport {
    /// Create an unattached transport and the queue its writer task drains.
    fn new() -> (Self, mpsc::UnboundedReceiver<Bytes>) {
        let (ordered_tx, ordered_rx) = mpsc::unbounded_channel();
        let transport = Self {
            conn: OnceLock::new(),
            ordered_tx,
            min_rtt: Mutex::new(None),
            close_requested: AtomicBool::new(false),
        };
        (transport, ordered_rx)
    }

    fn attach(&self, conn: quinn::Connection) {
        let conn = self.conn.get_or_init(|| conn);
        if self.close_requested.load(Ordering::Acquire) {
            conn.close(VarInt::from_u32(CLOSE_OK), b"closed by application");
        }
    }
}

impl Transport for QuicTransport {
    fn send_ordered(&self, frame: Bytes) -> Result<(), TransportError> {
        if frame.len() > MAX_STREAM_FRAME_SIZE {
            return Err(TransportError::TooLarge {
                size: frame.len(),
                max: MAX_STREAM_FRAME_SIZE,
            });
        }
        self.ordered_tx
            .send(frame)
            .map_err(|_| TransportError::Closed)
    }

    fn send_best_effort(&self, frame: Bytes) -> Result<BestEffort, TransportError> {
        let conn = self.conn.get().ok_or(TransportError::Closed)?;
        let size = frame.len();

        // Keep a handle for the fallback path.
        match conn.send_datagram(frame.clone()) {
            Ok(()) => Ok(BestEffort::Sent),
            Err(SendDatagramError::UnsupportedByPeer | SendDatagramError::Disabled) => {
                Ok(BestEffort::Unsupported(frame))
            }
            Err(SendDatagramError::TooLarge) => Err(TransportError::TooLarge {
                size,
                max: conn.max_datagram_size().unwrap_or(0),
            }),
            Err(e) => Err(TransportError::Quic(e.to_string())),
        }
    }

    fn rtt_stats(&self) -> RttStats {
        let Some(conn) = self.conn.get() else {
            return RttStats::default();
        };

        let rtt = conn.rtt();
        let mut min = self.min_rtt.lock().unwrap_or_else(PoisonError::into_inner);
        let minimum = match *min {
            Some(m) if m <= rtt => m,
            _ => {
                *min = Some(rtt);
                rtt
            }
        };

        // quinn exposes only its smoothed estimate.
        RttStats {
            latest: rtt,
            smoothed: rtt,
            minimum,
        }
    }

    fn close(&self, reason: &str) {
        self.close_requested.store(true, Ordering::Release);
        if let Some(conn) = self.conn.get() {
            conn.close(VarInt::from_u32(CLOSE_OK), reason.as_bytes());
        }
    }
}

/// Drive a pending QUIC handshake to an established [`Connection`].
///
/// Returns once the handshake completes; I/O then continues on spawned
/// tasks until the QUIC connection closes.
pub async fn establish(
    connecting: quinn::Connecting,
    config: ConnectionConfig,
    on_connect: Option<ConnectHandler>,
) -> Result<Connection, quinn::ConnectionError> {
    let (transport, ordered_rx) = QuicTransport::new();
    let transport = Arc::new(transport);

    let mut builder = Connection::builder(transport.clone())
        .config(config)
        .peer(connecting.remote_address());
    if let Some(handler) = on_connect {
        builder = builder.on_connect(handler);
    }
    let conn = builder.build();

    conn.handle_event(TransportEvent::HandshakeStarted);
    let quic = match connecting.await {
        Ok(quic) => quic,
        Err(e) => {
            conn.handle_event(TransportEvent::Terminated(Termination::faulted(e.to_string())));
            return Err(e);
        }
    };

    transport.attach(quic.clone());
    conn.handle_event(TransportEvent::Established);

    tokio::spawn(write_ordered(quic.clone(), ordered_rx));
    tokio::spawn(read_ordered(quic.clone(), conn.clone()));
    tokio::spawn(read_datagrams(quic.clone(), conn.clone()));
    tokio::spawn(watch_close(quic, conn.clone()));

    Ok(conn)
}

/// Drain the ordered queue onto our uni stream.
async fn write_ordered(quic: quinn::Connection, mut rx: mpsc::UnboundedReceiver<Bytes>) {
    let mut stream = match quic.open_uni().await {
        Ok(stream) => stream,
        Err(e) => {
            tracing::debug!(error = %e, "ordered stream unavailable");
            return;
        }
    };

    while let Some(frame) = rx.recv().await {
        let len = (frame.len() as u32).to_be_bytes();
        if let Err(e) = stream.write_all(&len).await {
            tracing::debug!(error = %e, "ordered stream write failed");
            return;
        }
        if let Err(e) = stream.write_all(&frame).await {
            tracing::debug!(error = %e, "ordered stream write failed");
            return;
        }
    }

    let _ = stream.finish();
}

/// Accept the peer's uni streams and feed each length-prefixed frame in.
async fn read_ordered(quic: quinn::Connection, conn: Connection) {
    while let Ok(mut recv) = quic.accept_uni().await {
        let mut len = [0u8; STREAM_LENGTH_PREFIX_SIZE];
        loop {
            if recv.read_exact(&mut len).await.is_err() {
                break;
            }

            let size = u32::from_be_bytes(len) as usize;
            if size > MAX_STREAM_FRAME_SIZE {
                tracing::warn!(
                    conn = %conn.id(),
                    size,
                    max = MAX_STREAM_FRAME_SIZE,
                    "oversized stream frame, stopping stream"
                );
                let _ = recv.stop(VarInt::from_u32(STOP_FRAME_TOO_LARGE));
                break;
            }

            let mut buf = vec![0u8; size];
            if recv.read_exact(&mut buf).await.is_err() {
                break;
            }
            conn.handle_event(TransportEvent::Data(Bytes::from(buf)));
        }
    }
}

async fn read_datagrams(quic: quinn::Connection, conn: Connection) {
    while let Ok(datagram) = quic.read_datagram().await {
        conn.handle_event(TransportEvent::Data(datagram));
    }
}

async fn watch_close(quic: quinn::Connection, conn: Connection) {
    let reason = quic.closed().await;
    conn.handle_event(TransportEvent::Terminated(termination(reason)));
}

fn termination(reason: quinn::ConnectionError) -> Termination {
    match reason {
        quinn::ConnectionError::LocallyClosed => Termination::graceful("closed locally"),
        quinn::ConnectionError::ApplicationClosed(close) => {
            Termination::graceful(String::from_utf8_lossy(&close.reason).into_owned())
        }
        other => Termination::faulted(other.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unattached_transport() {
        let (transport, _rx) = QuicTransport::new();

        assert_eq!(transport.rtt_stats(), RttStats::default());
        assert!(matches!(
            transport.send_best_effort(Bytes::from_static(b"x")),
            Err(TransportError::Closed)
        ));
    }

    #[test]
    fn test_ordered_frames_queued() {
        let (transport, mut rx) = QuicTransport::new();
        transport.send_ordered(Bytes::from_static(b"a")).unwrap();
        transport.send_ordered(Bytes::from_static(b"b")).unwrap();

        assert_eq!(rx.try_recv().unwrap(), Bytes::from_static(b"a"));
        assert_eq!(rx.try_recv().unwrap(), Bytes::from_static(b"b"));
    }

    #[test]
    fn test_oversized_ordered_rejected() {
        let (transport, _rx) = QuicTransport::new();
        let frame = Bytes::from(vec![0u8; MAX_STREAM_FRAME_SIZE + 1]);

        assert!(matches!(
            transport.send_ordered(frame),
            Err(TransportError::TooLarge { .. })
        ));
    }

    #[test]
    fn test_queue_closed_after_writer_gone() {
        let (transport, rx) = QuicTransport::new();
        drop(rx);

        assert!(matches!(
            transport.send_ordered(Bytes::from_static(b"a")),
            Err(TransportError::Closed)
        ));
    }

    #[test]
    fn test_termination_mapping() {
        assert!(termination(quinn::ConnectionError::LocallyClosed).graceful);
        assert!(!termination(quinn::ConnectionError::TimedOut).graceful);
        assert!(!termination(quinn::ConnectionError::Reset).graceful);
    }
}
