//! Events feeding the core loop
//!
//! Everything that can change core state arrives here: frames from tray
//! connections, frames from viewers, connectivity transitions, and internal
//! timers. The core consumes them from a single channel, so all state
//! mutation is serialized without locks.

use std::fmt;

use pf_core::{ClusterId, NodeId, ProcessId};

/// Identifier of one connected viewer, unique for the lifetime of the core
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ViewerId(pub u64);

impl fmt::Display for ViewerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "viewer-{}", self.0)
    }
}

/// One unit of work for the core loop
#[derive(Debug)]
pub enum CoreEvent {
    /// A decoded frame from a tray connection
    TrayMessage {
        node: NodeId,
        payload: serde_json::Value,
    },

    /// A tray connection was established or lost
    NodeConnectivity {
        cluster: ClusterId,
        node: NodeId,
        connected: bool,
    },

    /// A viewer finished its TCP handshake and wants the state snapshot
    ViewerConnected { viewer: ViewerId },

    /// A decoded frame from a viewer connection
    ViewerMessage {
        viewer: ViewerId,
        payload: serde_json::Value,
    },

    /// A viewer connection ended
    ViewerDisconnected { viewer: ViewerId },

    /// A delayed start command is due
    DispatchStart { process: ProcessId },

    /// Time to drop terminal processes past their retention window
    RetentionSweep,
}
