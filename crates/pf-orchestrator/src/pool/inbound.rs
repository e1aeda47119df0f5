//! Inbound viewer connections
//!
//! Viewers connect in over plain TCP. Each gets a per-connection task and an
//! outgoing queue; the core addresses individual viewers for the catch-up
//! snapshot and broadcasts deltas to all of them. A viewer whose queue is
//! gone is pruned on the next broadcast.
//!
//! Failing to bind the listener is the only fatal error on this path; a
//! misbehaving viewer just loses its own connection.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use dashmap::DashMap;
use futures::{SinkExt, StreamExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio_util::codec::Framed;
use tokio_util::sync::CancellationToken;

use pf_protocol::{Envelope, JsonCodec, Message};

use crate::events::{CoreEvent, ViewerId};

/// Per-viewer outgoing queue depth
const OUTGOING_QUEUE: usize = 256;

/// Registry of connected viewers and their outgoing queues
#[derive(Default)]
pub struct ViewerPool {
    viewers: DashMap<ViewerId, mpsc::Sender<Envelope>>,
    next_id: AtomicU64,
}

impl ViewerPool {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Accept viewer connections until shutdown
    pub async fn run(
        self: Arc<Self>,
        listener: TcpListener,
        events: mpsc::Sender<CoreEvent>,
        cancel: CancellationToken,
    ) {
        loop {
            tokio::select! {
                _ = cancel.cancelled() => return,
                accepted = listener.accept() => {
                    match accepted {
                        Ok((stream, peer)) => {
                            let id = ViewerId(self.next_id.fetch_add(1, Ordering::Relaxed));
                            tracing::info!(viewer = %id, %peer, "viewer connected");
                            tokio::spawn(Arc::clone(&self).run_viewer(
                                id,
                                stream,
                                events.clone(),
                                cancel.clone(),
                            ));
                        }
                        Err(e) => {
                            tracing::warn!(error = %e, "accept failed");
                        }
                    }
                }
            }
        }
    }

    /// Queue a message for one viewer; silently a no-op if it is gone
    pub async fn send_to(&self, viewer: ViewerId, message: Message) {
        let Some(tx) = self.viewers.get(&viewer).map(|entry| entry.value().clone()) else {
            return;
        };
        if tx.send(Envelope::new(message)).await.is_err() {
            self.viewers.remove(&viewer);
        }
    }

    /// Queue a message for every connected viewer, pruning dead ones
    pub async fn broadcast(&self, message: Message) {
        let targets: Vec<(ViewerId, mpsc::Sender<Envelope>)> = self
            .viewers
            .iter()
            .map(|entry| (*entry.key(), entry.value().clone()))
            .collect();

        for (id, tx) in targets {
            if tx.send(Envelope::new(message.clone())).await.is_err() {
                self.viewers.remove(&id);
            }
        }
    }

    /// Own one viewer connection for its lifetime
    async fn run_viewer(
        self: Arc<Self>,
        id: ViewerId,
        stream: TcpStream,
        events: mpsc::Sender<CoreEvent>,
        cancel: CancellationToken,
    ) {
        let mut framed = Framed::new(stream, JsonCodec::new());
        let (tx, mut rx) = mpsc::channel(OUTGOING_QUEUE);
        self.viewers.insert(id, tx);

        // Registered before the event, so the snapshot reply finds the queue
        if events.send(CoreEvent::ViewerConnected { viewer: id }).await.is_err() {
            self.viewers.remove(&id);
            return;
        }

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                outgoing = rx.recv() => {
                    let Some(envelope) = outgoing else { break };
                    if let Err(e) = framed.send(envelope).await {
                        tracing::debug!(viewer = %id, error = %e, "viewer write failed");
                        break;
                    }
                }
                frame = framed.next() => {
                    match frame {
                        Some(Ok(payload)) => {
                            let event = CoreEvent::ViewerMessage { viewer: id, payload };
                            if events.send(event).await.is_err() {
                                break;
                            }
                        }
                        Some(Err(e)) => {
                            tracing::debug!(viewer = %id, error = %e, "viewer read failed");
                            break;
                        }
                        None => break,
                    }
                }
            }
        }

        self.viewers.remove(&id);
        tracing::info!(viewer = %id, "viewer disconnected");
        let _ = events.send(CoreEvent::ViewerDisconnected { viewer: id }).await;
    }
}
