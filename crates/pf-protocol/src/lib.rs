//! pf-protocol: Wire protocol for the procfleet orchestration core
//!
//! This crate defines the message framing and typed envelopes used for
//! communication between the core, the tray agents, and viewer front-ends.
//! Every message on the wire is a length-prefixed JSON document, optionally
//! encrypted with a shared-secret stream cipher.

pub mod cipher;
pub mod dispatch;
pub mod error;
pub mod frame;
pub mod message;

pub use cipher::SecretCipher;
pub use dispatch::Dispatcher;
pub use error::ProtocolError;
pub use frame::JsonCodec;
pub use message::{
    ApiVersion, ClusterStatus, Envelope, Message, MessageKind, NodeError, NodeStatus, OutputType,
    CURRENT_VERSION,
};
