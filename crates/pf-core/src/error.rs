//! Core error types for procfleet

use std::path::PathBuf;
use thiserror::Error;

use pf_protocol::ProtocolError;

/// Top-level error type for the procfleet crates
#[derive(Error, Debug)]
pub enum CoreError {
    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("load error: {0}")]
    Load(#[from] LoadError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Daemon configuration file errors
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("config file not found: {0}")]
    NotFound(PathBuf),

    #[error("invalid config: {0}")]
    Invalid(String),

    #[error("TOML parse error: {0}")]
    Parse(#[from] toml::de::Error),
}

/// Per-item failures while loading entity definitions into the registry
///
/// These never abort a load; the valid subset is kept and the failures are
/// reported back to the caller.
#[derive(Error, Debug)]
pub enum LoadError {
    #[error("could not read definition file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("could not parse definition file {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("duplicate node id `{0}`")]
    DuplicateNode(String),

    #[error("duplicate cluster id `{0}`")]
    DuplicateCluster(String),

    #[error("duplicate cluster name `{0}`")]
    DuplicateClusterName(String),

    #[error("duplicate program id `{0}`")]
    DuplicateProgram(String),

    #[error("cluster `{cluster}` references unknown node `{node}`")]
    UnknownNode { cluster: String, node: String },

    #[error("program `{program}` references unknown cluster `{cluster}`")]
    UnknownCluster { program: String, cluster: String },

    #[error("program `{0}` has an empty tag")]
    EmptyTag(String),

    #[error("program `{0}` lists no clusters")]
    NoClusters(String),
}
