//! The core event loop
//!
//! [`Core`] owns the [`CoreState`] and consumes [`CoreEvent`]s from a single
//! channel. Frames are routed through two dispatchers, one for tray traffic
//! and one for viewer traffic, so a viewer cannot smuggle in a tray-only
//! message type. After every event the outbox is drained onto the pools.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use pf_core::Registry;
use pf_protocol::message::{
    ErrorOccurredMessage, GuiProcessCommand, GuiStartCommand, ProcessOutputMessage,
    ProcessStatusMessage, TrayStatusMessage,
};
use pf_protocol::Dispatcher;

use crate::events::CoreEvent;
use crate::pool::{OutboundPool, ViewerPool};
use crate::state::CoreState;

/// How often terminal processes are checked against the retention window
const SWEEP_INTERVAL: Duration = Duration::from_secs(5);

pub struct Core {
    state: CoreState,
    tray_dispatcher: Dispatcher<CoreState>,
    gui_dispatcher: Dispatcher<CoreState>,
    outbound: OutboundPool,
    viewers: Arc<ViewerPool>,
    /// For re-enqueueing deferred start commands
    events_tx: mpsc::Sender<CoreEvent>,
    process_retention: Duration,
}

impl Core {
    pub fn new(
        registry: Registry,
        outbound: OutboundPool,
        viewers: Arc<ViewerPool>,
        events_tx: mpsc::Sender<CoreEvent>,
        process_retention: Duration,
    ) -> Self {
        let mut tray_dispatcher = Dispatcher::new();
        tray_dispatcher.register::<ProcessStatusMessage, _>(CoreState::handle_process_status);
        tray_dispatcher.register::<ProcessOutputMessage, _>(CoreState::handle_process_output);
        tray_dispatcher.register::<ErrorOccurredMessage, _>(CoreState::handle_error_occurred);
        tray_dispatcher.register::<TrayStatusMessage, _>(CoreState::handle_tray_status);

        let mut gui_dispatcher = Dispatcher::new();
        gui_dispatcher.register::<GuiStartCommand, _>(CoreState::handle_gui_start);
        gui_dispatcher.register::<GuiProcessCommand, _>(CoreState::handle_gui_process_command);

        Self {
            state: CoreState::new(registry),
            tray_dispatcher,
            gui_dispatcher,
            outbound,
            viewers,
            events_tx,
            process_retention,
        }
    }

    /// Consume events until shutdown
    pub async fn run(mut self, mut events: mpsc::Receiver<CoreEvent>, cancel: CancellationToken) {
        let mut sweep = tokio::time::interval(SWEEP_INTERVAL);
        sweep.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    tracing::info!("core loop shutting down");
                    return;
                }
                _ = sweep.tick() => {
                    self.handle_event(CoreEvent::RetentionSweep).await;
                }
                event = events.recv() => {
                    let Some(event) = event else { return };
                    self.handle_event(event).await;
                }
            }
        }
    }

    async fn handle_event(&mut self, event: CoreEvent) {
        match event {
            CoreEvent::TrayMessage { node, payload } => {
                self.state.current_node = Some(node);
                self.tray_dispatcher.dispatch(&mut self.state, payload);
                self.state.current_node = None;
            }
            CoreEvent::NodeConnectivity {
                cluster,
                node,
                connected,
            } => {
                self.state.node_connectivity(&cluster, &node, connected);
            }
            CoreEvent::ViewerConnected { viewer } => {
                tracing::debug!(%viewer, "sending state snapshot");
                for message in self.state.snapshot_messages() {
                    self.viewers.send_to(viewer, message).await;
                }
            }
            CoreEvent::ViewerMessage { viewer, payload } => {
                tracing::trace!(%viewer, "dispatching viewer message");
                self.gui_dispatcher.dispatch(&mut self.state, payload);
            }
            CoreEvent::ViewerDisconnected { viewer } => {
                tracing::debug!(%viewer, "viewer gone");
            }
            CoreEvent::DispatchStart { process } => {
                self.state.dispatch_start(process);
            }
            CoreEvent::RetentionSweep => {
                self.state.retention_sweep(self.process_retention);
            }
        }
        self.drain_outbox().await;
    }

    /// Push everything the handlers queued onto the wire
    async fn drain_outbox(&mut self) {
        let outbox = std::mem::take(&mut self.state.outbox);

        for (cluster, message) in outbox.cluster_sends {
            self.outbound.send_to_cluster(&cluster, &message).await;
        }
        for message in outbox.broadcasts {
            self.viewers.broadcast(message).await;
        }
        for (process, delay) in outbox.delayed_starts {
            let events = self.events_tx.clone();
            tokio::spawn(async move {
                tokio::time::sleep(delay).await;
                let _ = events.send(CoreEvent::DispatchStart { process }).await;
            });
        }
    }
}
