//! Outbound tray connections
//!
//! The core dials every node of every enabled cluster and keeps one transport
//! per (cluster, node) pair. A transport that is down is redialed on a fixed
//! interval, with no backoff: trays on a render wall come back in bulk after
//! a power cycle, and the operator wants them picked up promptly.
//!
//! Connectivity events are edge-triggered. A successful dial emits one
//! connected event, a loss emits one disconnected event; a dial attempt that
//! fails while the link is already down stays silent.

use std::collections::HashMap;
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio_util::codec::Framed;
use tokio_util::sync::CancellationToken;

use pf_core::{ClusterId, NodeId, Registry};
use pf_protocol::message::hash_secret;
use pf_protocol::{Envelope, JsonCodec, Message, SecretCipher};

use crate::events::CoreEvent;

/// Per-transport command queue depth
const COMMAND_QUEUE: usize = 64;

struct NodeHandle {
    commands: mpsc::Sender<Envelope>,
    /// Hashed shared secret stamped onto every command envelope
    secret: Option<String>,
}

/// One transport per (cluster, node) pair of every enabled cluster
pub struct OutboundPool {
    transports: HashMap<(ClusterId, NodeId), NodeHandle>,
}

impl OutboundPool {
    /// Spawn one transport task per (cluster, node) pair
    ///
    /// Disabled clusters get no transports; their nodes are unreachable
    /// until the definitions change and the core restarts.
    pub fn start(
        registry: &Registry,
        reconnect_interval: Duration,
        events: mpsc::Sender<CoreEvent>,
        cancel: CancellationToken,
    ) -> Self {
        let mut transports = HashMap::new();

        for cluster in registry.clusters() {
            if !cluster.enabled {
                tracing::info!(cluster = %cluster.id, "skipping disabled cluster");
                continue;
            }
            for node_id in &cluster.nodes {
                let Some(node) = registry.find_node(node_id) else {
                    // Load validation rejects clusters with unknown nodes
                    continue;
                };
                let (tx, rx) = mpsc::channel(COMMAND_QUEUE);
                transports.insert(
                    (cluster.id.clone(), node_id.clone()),
                    NodeHandle {
                        commands: tx,
                        secret: node.secret.as_deref().map(hash_secret),
                    },
                );
                tokio::spawn(run_transport(
                    cluster.id.clone(),
                    node_id.clone(),
                    node.socket_address(),
                    node.secret.as_deref().map(SecretCipher::new),
                    reconnect_interval,
                    rx,
                    events.clone(),
                    cancel.clone(),
                ));
            }
        }

        Self { transports }
    }

    /// Send a command to every node of a cluster, stamping each envelope
    /// with that node's hashed secret
    pub async fn send_to_cluster(&self, cluster: &ClusterId, message: &Message) {
        let mut found = false;
        for ((cluster_id, node_id), handle) in &self.transports {
            if cluster_id != cluster {
                continue;
            }
            found = true;
            let envelope =
                Envelope::new(message.clone()).with_secret(handle.secret.clone());
            if handle.commands.send(envelope).await.is_err() {
                tracing::warn!(node = %node_id, "transport task gone, dropping command");
            }
        }
        if !found {
            // Commands only target clusters the registry validated at load
            debug_assert!(false, "no transports for cluster {cluster}");
            tracing::warn!(cluster = %cluster, "no transports for cluster, dropping command");
        }
    }

    #[doc(hidden)]
    pub fn transport_count(&self) -> usize {
        self.transports.len()
    }
}

/// Own one link to a tray: dial, pump frames, redial on a fixed interval
#[allow(clippy::too_many_arguments)]
async fn run_transport(
    cluster: ClusterId,
    node: NodeId,
    address: String,
    cipher: Option<SecretCipher>,
    reconnect_interval: Duration,
    mut commands: mpsc::Receiver<Envelope>,
    events: mpsc::Sender<CoreEvent>,
    cancel: CancellationToken,
) {
    loop {
        match TcpStream::connect(&address).await {
            Ok(stream) => {
                tracing::info!(node = %node, %address, "tray connected");
                if send_connectivity(&events, &cluster, &node, true).await.is_err() {
                    return;
                }
                run_connected(stream, cipher.clone(), &node, &mut commands, &events, &cancel)
                    .await;
                tracing::info!(node = %node, %address, "tray disconnected");
                if send_connectivity(&events, &cluster, &node, false).await.is_err() {
                    return;
                }
            }
            Err(e) => {
                tracing::debug!(node = %node, %address, error = %e, "dial failed");
            }
        }

        tokio::select! {
            _ = cancel.cancelled() => return,
            _ = tokio::time::sleep(reconnect_interval) => {}
        }
    }
}

async fn send_connectivity(
    events: &mpsc::Sender<CoreEvent>,
    cluster: &ClusterId,
    node: &NodeId,
    connected: bool,
) -> Result<(), mpsc::error::SendError<CoreEvent>> {
    events
        .send(CoreEvent::NodeConnectivity {
            cluster: cluster.clone(),
            node: node.clone(),
            connected,
        })
        .await
}

/// Pump frames both ways until the link drops or the core shuts down
async fn run_connected(
    stream: TcpStream,
    cipher: Option<SecretCipher>,
    node: &NodeId,
    commands: &mut mpsc::Receiver<Envelope>,
    events: &mpsc::Sender<CoreEvent>,
    cancel: &CancellationToken,
) {
    let mut framed = Framed::new(stream, JsonCodec::with_cipher(cipher));

    loop {
        tokio::select! {
            _ = cancel.cancelled() => return,
            command = commands.recv() => {
                let Some(envelope) = command else { return };
                if let Err(e) = framed.send(envelope).await {
                    tracing::warn!(node = %node, error = %e, "write failed");
                    return;
                }
            }
            frame = framed.next() => {
                match frame {
                    Some(Ok(payload)) => {
                        let event = CoreEvent::TrayMessage {
                            node: node.clone(),
                            payload,
                        };
                        if events.send(event).await.is_err() {
                            return;
                        }
                    }
                    Some(Err(e)) => {
                        tracing::warn!(node = %node, error = %e, "read failed");
                        return;
                    }
                    None => return,
                }
            }
        }
    }
}
