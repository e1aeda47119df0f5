//! pf-core: Domain model and registry for procfleet
//!
//! This crate provides the entity types (nodes, clusters, programs,
//! processes), the in-memory registry with its drift-detecting content hash,
//! the per-process status aggregation state machine, and shared
//! configuration/logging plumbing used by the orchestrator daemon.

pub mod config;
pub mod error;
pub mod jsonload;
pub mod logging;
pub mod model;
pub mod process;
pub mod registry;
pub mod time;
pub mod types;

pub use error::{ConfigError, CoreError, LoadError};
pub use model::{Cluster, Configuration, Node, Program};
pub use process::Process;
pub use registry::{LoadReport, Registry};
pub use types::{ClusterId, ConfigurationId, NodeId, ProcessId, ProgramId};
