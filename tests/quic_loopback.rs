//! End-to-end tests over a real QUIC loopback connection.
//!
//! A self-signed certificate is generated per test; the client trusts it
//! directly.

#![cfg(feature = "quic")]

use std::net::SocketAddr;
use std::time::Duration;

use dualnet::prelude::*;
use rustls::pki_types::{CertificateDer, PrivateKeyDer};
use rustls::RootCertStore;
use tokio::sync::mpsc;
use tokio::time::timeout;

const WAIT: Duration = Duration::from_secs(5);

fn self_signed() -> (CertificateDer<'static>, PrivateKeyDer<'static>) {
    let cert = rcgen::generate_simple_self_signed(vec!["localhost".into()]).unwrap();
    let der = cert.cert.der().clone();
    let key = PrivateKeyDer::Pkcs8(cert.key_pair.serialize_der().into());
    (der, key)
}

fn loopback() -> SocketAddr {
    "127.0.0.1:0".parse().unwrap()
}

fn client_for(cert: CertificateDer<'static>) -> (Endpoint, quinn::ClientConfig) {
    let config = EndpointBuilder::client()
        .client_bind_addr(loopback())
        .build();
    let mut roots = RootCertStore::empty();
    roots.add(cert).unwrap();
    let quic = config.quic_client_config(roots).unwrap();
    (Endpoint::new(config), quic)
}

#[tokio::test]
async fn loopback_delivers_both_channels() {
    let (cert, key) = self_signed();
    let config = EndpointBuilder::server().build();
    let quic = config.quic_server_config(vec![cert.clone()], key).unwrap();
    let mut server = Endpoint::new(config);

    let (ready_tx, mut ready_rx) = mpsc::unbounded_channel();
    let (data_tx, mut data_rx) = mpsc::unbounded_channel::<Message>();
    server
        .on_connect(move |conn: Connection| {
            let ready_tx = ready_tx.clone();
            let data_tx = data_tx.clone();
            async move {
                conn.on_data(move |msg: Message| {
                    let data_tx = data_tx.clone();
                    async move {
                        let _ = data_tx.send(msg);
                    }
                })
                .unwrap();
                let _ = ready_tx.send(conn.id());
            }
        })
        .unwrap();
    let addr = server.listen(loopback(), quic).unwrap();

    let (mut client, client_quic) = client_for(cert);
    let conn = client.connect(addr, "localhost", client_quic).await.unwrap();
    assert!(conn.is_established());
    assert_eq!(conn.peer(), Some(addr));

    timeout(WAIT, ready_rx.recv()).await.unwrap().unwrap();

    for i in 0..10u8 {
        conn.send(vec![i; 16], Channel::Reliable).unwrap();
    }
    conn.send(&b"datagram"[..], Channel::Unreliable).unwrap();

    let mut reliable = Vec::new();
    let mut unreliable = Vec::new();
    while reliable.len() < 10 || unreliable.is_empty() {
        let msg = timeout(WAIT, data_rx.recv()).await.unwrap().unwrap();
        match msg.channel {
            Channel::Reliable => reliable.push(msg),
            Channel::Unreliable => unreliable.push(msg),
        }
    }

    let mut seqs: Vec<u16> = reliable.iter().map(|m| m.sequence).collect();
    seqs.sort_unstable();
    assert_eq!(seqs, (0..10).collect::<Vec<u16>>());
    assert!(reliable.iter().all(|m| m.payload.len() == 16));
    assert_eq!(&unreliable[0].payload[..], b"datagram");

    let stats = conn.stats();
    assert_eq!(stats.packets_sent, 11);
    assert!(stats.rtt_smoothed > Duration::ZERO);
    assert!(stats.rtt_min <= stats.rtt_smoothed);

    client.close().await;
    server.close().await;
}

#[tokio::test]
async fn loopback_close_fires_handler() {
    let (cert, key) = self_signed();
    let config = EndpointBuilder::server().build();
    let quic = config.quic_server_config(vec![cert.clone()], key).unwrap();
    let mut server = Endpoint::new(config);
    let addr = server.listen(loopback(), quic).unwrap();

    let (mut client, client_quic) = client_for(cert);
    let conn = client.connect(addr, "localhost", client_quic).await.unwrap();

    let (tx, mut rx) = mpsc::unbounded_channel();
    conn.on_close(move |t: Termination| async move {
        let _ = tx.send(t);
    })
    .unwrap();

    client.close().await;

    let termination = timeout(WAIT, rx.recv()).await.unwrap().unwrap();
    assert!(termination.graceful);
    assert_eq!(conn.phase(), ConnectionPhase::Closed);
    assert!(matches!(
        conn.send(&b"late"[..], Channel::Reliable),
        Err(ConnectionError::NotConnected(ConnectionPhase::Closed))
    ));

    server.close().await;
}

#[tokio::test]
async fn role_violations_fail_fast() {
    let (cert, key) = self_signed();
    let server_config = EndpointBuilder::server().build();
    let quic = server_config
        .quic_server_config(vec![cert.clone()], key)
        .unwrap();

    let (mut client, client_quic) = client_for(cert);
    let err = client.listen(loopback(), quic.clone()).unwrap_err();
    assert!(matches!(
        err,
        EndpointError::RoleViolation {
            role: Role::Client,
            operation: "listen"
        }
    ));

    let mut server = Endpoint::new(server_config);
    let addr = server.listen(loopback(), quic.clone()).unwrap();
    assert!(matches!(
        server.listen(loopback(), quic),
        Err(EndpointError::AlreadyStarted)
    ));

    let err = server
        .connect(addr, "localhost", client_quic)
        .await
        .unwrap_err();
    assert!(matches!(err, EndpointError::RoleViolation { role: Role::Server, .. }));

    server.close().await;
    server.close().await;
}

#[tokio::test]
async fn connect_handler_after_listen_is_rejected() {
    let (cert, key) = self_signed();
    let config = EndpointBuilder::server().build();
    let quic = config.quic_server_config(vec![cert], key).unwrap();
    let mut server = Endpoint::new(config);
    server.listen(loopback(), quic).unwrap();

    let err = server.on_connect(|_conn: Connection| async {}).unwrap_err();
    assert!(matches!(err, EndpointError::AlreadyStarted));

    server.close().await;
}
