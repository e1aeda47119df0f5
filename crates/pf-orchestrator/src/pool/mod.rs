//! Connection pools
//!
//! [`outbound`] dials out to tray agents and keeps those links alive;
//! [`inbound`] accepts viewer connections. Both turn decoded frames into
//! [`CoreEvent`](crate::events::CoreEvent)s; neither touches core state.

pub mod inbound;
pub mod outbound;

pub use inbound::ViewerPool;
pub use outbound::OutboundPool;
