//! pf-orchestrator: The procfleet core daemon
//!
//! The core loads the entity definitions, dials out to every tray agent,
//! accepts viewer connections, and relays commands and state between the
//! two. All state changes flow through one event loop; the connection pools
//! only move frames.

pub mod core;
pub mod events;
pub mod pool;
pub mod state;

pub use crate::core::Core;
pub use events::{CoreEvent, ViewerId};
pub use pool::{OutboundPool, ViewerPool};
pub use state::CoreState;
