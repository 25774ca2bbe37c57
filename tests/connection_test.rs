//! Connection tests over the in-memory transport.
//!
//! Two connections are wired back to back; frames written by one are fed to
//! the other by hand, which lets each test choose arrival order and timing.

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use dualnet::prelude::*;
use tokio::sync::mpsc;

struct Peer {
    conn: Connection,
    transport: Arc<MemoryTransport>,
    clock: Arc<ManualClock>,
}

fn peer(config: ConnectionConfig) -> Peer {
    let transport = Arc::new(MemoryTransport::new());
    let clock = Arc::new(ManualClock::with_wall_ms(1_000));
    let conn = Connection::builder(transport.clone())
        .config(config)
        .clock(clock.clone())
        .build();
    conn.handle_event(TransportEvent::HandshakeStarted);
    conn.handle_event(TransportEvent::Established);
    Peer {
        conn,
        transport,
        clock,
    }
}

fn collect(conn: &Connection) -> mpsc::UnboundedReceiver<Message> {
    let (tx, rx) = mpsc::unbounded_channel();
    conn.on_data(move |msg: Message| {
        let tx = tx.clone();
        async move {
            let _ = tx.send(msg);
        }
    })
    .unwrap();
    rx
}

async fn drain(rx: &mut mpsc::UnboundedReceiver<Message>) -> Vec<Message> {
    // Let spawned handlers run.
    for _ in 0..8 {
        tokio::task::yield_now().await;
    }
    let mut out = Vec::new();
    while let Ok(msg) = rx.try_recv() {
        out.push(msg);
    }
    out
}

fn sequences(messages: &[Message]) -> Vec<u16> {
    messages.iter().map(|m| m.sequence).collect()
}

fn deliver(to: &Connection, frame: &Bytes) {
    to.handle_event(TransportEvent::Data(frame.clone()));
}

#[tokio::test]
async fn reliable_in_order_delivery() {
    let a = peer(ConnectionConfig::default());
    let b = peer(ConnectionConfig::default());
    let mut rx = collect(&b.conn);

    for payload in [&b"zero"[..], b"one", b"two"] {
        a.conn.send(payload, Channel::Reliable).unwrap();
    }
    for frame in a.transport.take_ordered() {
        deliver(&b.conn, &frame);
    }

    let got = drain(&mut rx).await;
    assert_eq!(sequences(&got), vec![0, 1, 2]);
    assert_eq!(&got[1].payload[..], b"one");
    assert!(got.iter().all(|m| m.channel == Channel::Reliable));
}

#[tokio::test]
async fn reliable_reorder_recovery() {
    let a = peer(ConnectionConfig::default());
    let b = peer(ConnectionConfig::default());
    let mut rx = collect(&b.conn);

    for _ in 0..3 {
        a.conn.send(&b"x"[..], Channel::Reliable).unwrap();
    }
    let frames = a.transport.take_ordered();
    deliver(&b.conn, &frames[0]);
    deliver(&b.conn, &frames[2]);
    assert_eq!(sequences(&drain(&mut rx).await), vec![0]);

    deliver(&b.conn, &frames[1]);
    assert_eq!(sequences(&drain(&mut rx).await), vec![1, 2]);
}

#[tokio::test]
async fn reliable_gap_skipped_after_deadline() {
    let config = ConnectionConfig {
        gap_deadline: Duration::from_millis(200),
        ..Default::default()
    };
    let a = peer(config.clone());
    let b = peer(config);
    let mut rx = collect(&b.conn);

    for _ in 0..4 {
        a.conn.send(&b"x"[..], Channel::Reliable).unwrap();
    }
    let frames = a.transport.take_ordered();

    deliver(&b.conn, &frames[0]);
    deliver(&b.conn, &frames[2]);
    b.clock.advance(Duration::from_millis(250));
    deliver(&b.conn, &frames[3]);

    assert_eq!(sequences(&drain(&mut rx).await), vec![0, 2, 3]);

    // The skipped frame is dropped when it finally shows up.
    deliver(&b.conn, &frames[1]);
    assert!(drain(&mut rx).await.is_empty());

    let stats = b.conn.stats();
    assert_eq!(stats.skipped, 1);
    assert_eq!(stats.stale, 1);
}

#[tokio::test]
async fn reliable_gap_persists_without_traffic() {
    let a = peer(ConnectionConfig::default());
    let b = peer(ConnectionConfig::default());
    let mut rx = collect(&b.conn);

    for _ in 0..3 {
        a.conn.send(&b"x"[..], Channel::Reliable).unwrap();
    }
    let frames = a.transport.take_ordered();
    deliver(&b.conn, &frames[0]);
    deliver(&b.conn, &frames[2]);

    // No timer: nothing moves until another frame arrives.
    b.clock.advance(Duration::from_secs(10));
    assert_eq!(sequences(&drain(&mut rx).await), vec![0]);
    assert_eq!(b.conn.stats().skipped, 0);
}

#[tokio::test]
async fn unreliable_loss_accounting() {
    let a = peer(ConnectionConfig::default());
    let b = peer(ConnectionConfig::default());
    let mut rx = collect(&b.conn);

    for _ in 0..10 {
        a.conn.send(&b"u"[..], Channel::Unreliable).unwrap();
    }
    let frames = a.transport.take_best_effort();
    assert_eq!(frames.len(), 10);

    // Drop 4, 6 and 8.
    for (seq, frame) in frames.iter().enumerate() {
        if ![4, 6, 8].contains(&seq) {
            deliver(&b.conn, frame);
        }
    }

    let got = drain(&mut rx).await;
    assert_eq!(sequences(&got), vec![0, 1, 2, 3, 5, 7, 9]);
    assert!(got.iter().all(|m| m.channel == Channel::Unreliable));

    let stats = b.conn.stats();
    assert_eq!(stats.packets_received, 7);
    assert_eq!(stats.packets_lost, 3);
    assert!((stats.loss_rate - 0.3).abs() < 1e-9);
}

#[tokio::test]
async fn unreliable_falls_back_to_ordered_stream() {
    let a = peer(ConnectionConfig::default());
    let b = peer(ConnectionConfig::default());
    let mut rx = collect(&b.conn);
    a.transport.set_best_effort_supported(false);

    a.conn.send(&b"u"[..], Channel::Unreliable).unwrap();
    assert!(a.transport.best_effort().is_empty());

    for frame in a.transport.take_ordered() {
        deliver(&b.conn, &frame);
    }
    let got = drain(&mut rx).await;
    assert_eq!(got.len(), 1);
    assert_eq!(got[0].channel, Channel::Unreliable);
}

#[tokio::test]
async fn latency_and_jitter_reported() {
    let a = peer(ConnectionConfig::default());
    let b = peer(ConnectionConfig::default());
    let mut rx = collect(&b.conn);

    // Receiver clock runs 40 ms ahead of the sender.
    b.clock.set_wall_ms(1_040);
    for _ in 0..20 {
        a.conn.send(&b"j"[..], Channel::Unreliable).unwrap();
        for frame in a.transport.take_best_effort() {
            deliver(&b.conn, &frame);
        }
        a.clock.advance(Duration::from_millis(10));
        b.clock.advance(Duration::from_millis(10));
    }

    let got = drain(&mut rx).await;
    assert_eq!(got.len(), 20);
    assert!(got.iter().all(|m| m.latency_ms == 40));

    // Constant transit time means no jitter.
    assert!(got[19].jitter_ms.abs() < 1e-9);
    assert!(b.conn.stats().unreliable_jitter_ms.abs() < 1e-9);
}

#[tokio::test]
async fn stats_throughput_window() {
    let a = peer(ConnectionConfig {
        metrics_window: Duration::from_secs(5),
        ..Default::default()
    });
    let b = peer(ConnectionConfig::default());

    // 125-byte frames: 7-byte header + 118-byte payload.
    for _ in 0..5 {
        a.conn.send(vec![7u8; 118], Channel::Reliable).unwrap();
    }
    for frame in a.transport.take_ordered() {
        deliver(&b.conn, &frame);
    }

    let tx = a.conn.stats();
    assert_eq!(tx.bytes_sent, 625);
    assert!((tx.tx_bps - 1000.0).abs() < 1e-9);

    let rx = b.conn.stats();
    assert_eq!(rx.bytes_received, 625);
    assert_eq!(rx.rx_packets_in_window, 5);

    a.clock.advance(Duration::from_millis(5_001));
    assert_eq!(a.conn.stats().tx_bps, 0.0);
}

#[tokio::test]
async fn malformed_frames_do_not_break_connection() {
    let a = peer(ConnectionConfig::default());
    let b = peer(ConnectionConfig::default());
    let mut rx = collect(&b.conn);

    deliver(&b.conn, &Bytes::from_static(&[0x01, 0x00]));
    deliver(&b.conn, &Bytes::from_static(&[0x09, 0, 0, 0, 0, 0, 0, 1]));

    a.conn.send(&b"ok"[..], Channel::Reliable).unwrap();
    for frame in a.transport.take_ordered() {
        deliver(&b.conn, &frame);
    }

    assert_eq!(sequences(&drain(&mut rx).await), vec![0]);
    assert_eq!(b.conn.stats().malformed, 2);
    assert_eq!(b.conn.phase(), ConnectionPhase::Established);
}

#[tokio::test]
async fn termination_fires_close_once_and_blocks_sends() {
    let a = peer(ConnectionConfig::default());
    let (tx, mut rx) = mpsc::unbounded_channel();
    a.conn
        .on_close(move |t: Termination| async move {
            let _ = tx.send(t);
        })
        .unwrap();

    a.conn.close();
    assert_eq!(a.conn.phase(), ConnectionPhase::Closing);
    assert_eq!(
        a.transport.close_reason().as_deref(),
        Some("closed by application")
    );

    a.conn
        .handle_event(TransportEvent::Terminated(Termination::graceful("bye")));
    a.conn
        .handle_event(TransportEvent::Terminated(Termination::faulted("late")));

    let t = rx.recv().await.unwrap();
    assert!(t.graceful);
    assert_eq!(t.reason, "bye");
    assert!(rx.recv().await.is_none());

    let err = a.conn.send(&b"x"[..], Channel::Reliable).unwrap_err();
    assert!(matches!(
        err,
        ConnectionError::NotConnected(ConnectionPhase::Closed)
    ));
}

#[tokio::test]
async fn full_sequence_wraparound() {
    let a = peer(ConnectionConfig::default());
    let b = peer(ConnectionConfig::default());
    let mut rx = collect(&b.conn);

    for _ in 0..65_537u32 {
        a.conn.send(Bytes::new(), Channel::Reliable).unwrap();
    }
    let frames = a.transport.take_ordered();
    for frame in &frames {
        deliver(&b.conn, frame);
    }

    // Let every handler task finish before counting.
    let mut delivered = 0usize;
    while delivered < frames.len() {
        match rx.recv().await {
            Some(_) => delivered += 1,
            None => break,
        }
    }
    assert_eq!(delivered, 65_537);

    let stats = b.conn.stats();
    assert_eq!(stats.skipped, 0);
    assert_eq!(stats.stale, 0);
}
