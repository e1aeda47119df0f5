//! Outbound pool behavior against a real TCP listener: edge-triggered
//! connectivity events, fixed-interval redial, and command delivery with
//! secret stamping.

use std::time::Duration;

use futures::StreamExt;
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio::time::timeout;
use tokio_util::codec::Framed;
use tokio_util::sync::CancellationToken;

use pf_core::model::{Cluster, Node};
use pf_core::{ClusterId, NodeId, Registry};
use pf_orchestrator::{CoreEvent, OutboundPool};
use pf_protocol::message::{hash_secret, ExitCommand};
use pf_protocol::{Envelope, JsonCodec, Message, SecretCipher};

const WAIT: Duration = Duration::from_secs(5);
const RECONNECT: Duration = Duration::from_millis(50);

fn registry_with_tray(address: &str, port: u16, secret: Option<&str>) -> Registry {
    let nodes = vec![Node {
        id: NodeId::new("n1"),
        name: "Node 1".to_string(),
        address: address.to_string(),
        port,
        secret: secret.map(str::to_string),
        connected: false,
    }];
    let clusters = vec![Cluster {
        id: ClusterId::new("wall"),
        name: "Wall".to_string(),
        enabled: true,
        nodes: vec![NodeId::new("n1")],
        description: String::new(),
    }];
    let (registry, report) = Registry::load(nodes, clusters, vec![]);
    assert!(report.complete());
    registry
}

async fn expect_connectivity(events: &mut mpsc::Receiver<CoreEvent>, expected: bool) {
    let event = timeout(WAIT, events.recv())
        .await
        .expect("timed out waiting for connectivity event")
        .expect("event channel closed");
    match event {
        CoreEvent::NodeConnectivity {
            cluster,
            node,
            connected,
        } => {
            assert_eq!(cluster, ClusterId::new("wall"));
            assert_eq!(node, NodeId::new("n1"));
            assert_eq!(connected, expected);
        }
        other => panic!("unexpected event: {other:?}"),
    }
}

#[tokio::test]
async fn test_reconnect_cycle_emits_one_event_per_transition() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let registry = registry_with_tray("127.0.0.1", addr.port(), None);

    let (events_tx, mut events) = mpsc::channel(64);
    let cancel = CancellationToken::new();
    let pool = OutboundPool::start(&registry, RECONNECT, events_tx, cancel.clone());
    assert_eq!(pool.transport_count(), 1);

    // First dial succeeds
    let (tray, _) = timeout(WAIT, listener.accept()).await.unwrap().unwrap();
    expect_connectivity(&mut events, true).await;

    // Dropping the socket yields exactly one disconnected event, then the
    // pool redials on its fixed interval
    drop(tray);
    expect_connectivity(&mut events, false).await;

    let (_tray, _) = timeout(WAIT, listener.accept()).await.unwrap().unwrap();
    expect_connectivity(&mut events, true).await;

    cancel.cancel();
}

#[tokio::test]
async fn test_initial_dial_failure_is_silent() {
    // Bind and immediately free a port so the first dials are refused
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);

    let registry = registry_with_tray("127.0.0.1", addr.port(), None);
    let (events_tx, mut events) = mpsc::channel(64);
    let cancel = CancellationToken::new();
    let _pool = OutboundPool::start(&registry, RECONNECT, events_tx, cancel.clone());

    // Several failed dial rounds, no events
    tokio::time::sleep(RECONNECT * 4).await;
    assert!(events.try_recv().is_err());

    // The node comes up; the next scheduled dial connects
    let listener = TcpListener::bind(addr).await.unwrap();
    let (_tray, _) = timeout(WAIT, listener.accept()).await.unwrap().unwrap();
    expect_connectivity(&mut events, true).await;

    cancel.cancel();
}

#[tokio::test]
async fn test_commands_reach_the_tray_with_hashed_secret() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let registry = registry_with_tray("127.0.0.1", addr.port(), Some("hunter2"));

    let (events_tx, mut events) = mpsc::channel(64);
    let cancel = CancellationToken::new();
    let pool = OutboundPool::start(&registry, RECONNECT, events_tx, cancel.clone());

    let (tray, _) = timeout(WAIT, listener.accept()).await.unwrap().unwrap();
    expect_connectivity(&mut events, true).await;

    pool.send_to_cluster(
        &ClusterId::new("wall"),
        &Message::ExitCommand(ExitCommand { id: 3 }),
    )
    .await;

    // The tray side shares the secret, so it can decode the frame
    let codec = JsonCodec::with_cipher(Some(SecretCipher::new("hunter2")));
    let mut framed = Framed::new(tray, codec);
    let value = timeout(WAIT, framed.next())
        .await
        .expect("timed out waiting for command")
        .expect("connection closed")
        .expect("decode failed");

    let envelope: Envelope = serde_json::from_value(value).unwrap();
    assert_eq!(envelope.secret, Some(hash_secret("hunter2")));
    assert_eq!(envelope.message, Message::ExitCommand(ExitCommand { id: 3 }));

    cancel.cancel();
}

#[tokio::test]
async fn test_disabled_cluster_gets_no_transports() {
    let nodes = vec![Node {
        id: NodeId::new("n1"),
        name: "Node 1".to_string(),
        address: "127.0.0.1".to_string(),
        port: 1,
        secret: None,
        connected: false,
    }];
    let clusters = vec![Cluster {
        id: ClusterId::new("mothballed"),
        name: "Mothballed".to_string(),
        enabled: false,
        nodes: vec![NodeId::new("n1")],
        description: String::new(),
    }];
    let (registry, _) = Registry::load(nodes, clusters, vec![]);

    let (events_tx, _events) = mpsc::channel(64);
    let cancel = CancellationToken::new();
    let pool = OutboundPool::start(&registry, RECONNECT, events_tx, cancel.clone());
    assert_eq!(pool.transport_count(), 0);

    cancel.cancel();
}
