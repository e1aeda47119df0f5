//! Static entity records
//!
//! These structs mirror the externally-authored definition files. The schema
//! validation of those files is a collaborator's concern; here they are plain
//! serde types, checked only for referential integrity at registry load.

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::types::{ClusterId, ConfigurationId, NodeId, ProgramId};

/// One addressable remote machine running a tray agent
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Node {
    pub id: NodeId,
    pub name: String,
    pub address: String,
    pub port: u16,
    /// Shared secret for the connection to this node's tray; `None` means
    /// the connection is unencrypted
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub secret: Option<String>,
    /// Live connectivity, owned by the outbound pool; never part of the
    /// definition files or the registry hash
    #[serde(skip)]
    pub connected: bool,
}

impl Node {
    /// `host:port` form used when dialing
    pub fn socket_address(&self) -> String {
        format!("{}:{}", self.address, self.port)
    }
}

/// A named group of nodes addressed as a unit
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Cluster {
    pub id: ClusterId,
    pub name: String,
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Ordered list of member nodes, by id
    pub nodes: Vec<NodeId>,
    #[serde(default)]
    pub description: String,
}

/// One named parameter preset of a program
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Configuration {
    pub id: ConfigurationId,
    pub name: String,
    #[serde(default)]
    pub parameters: String,
    #[serde(default)]
    pub description: String,
}

/// Per-cluster parameter override of a program
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClusterOverride {
    pub id: ClusterId,
    #[serde(default)]
    pub parameters: String,
}

/// A launchable application
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Program {
    pub id: ProgramId,
    pub name: String,
    pub executable: String,
    #[serde(default)]
    pub commandline_parameters: String,
    #[serde(default)]
    pub working_directory: String,
    pub configurations: Vec<Configuration>,
    /// Clusters this program may run on, each with its parameter override
    pub clusters: Vec<ClusterOverride>,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Delay between receiving a start request and issuing the command
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        with = "crate::config::opt_duration_millis"
    )]
    pub delay: Option<Duration>,
    /// Whether trays should forward this program's stdout/stderr
    #[serde(default = "default_true")]
    pub forward_out_err: bool,
}

fn default_true() -> bool {
    true
}
