//! Per-process state tracking and aggregation
//!
//! One [`Process`] is one launched instance of a program+configuration on a
//! cluster, spanning all of that cluster's nodes. Each node keeps an
//! append-only [`NodeLog`] of status events, error events, and output lines;
//! the cluster-level status is recomputed from the latest per-node statuses
//! after every single status append.
//!
//! The recomputation is incremental over the latest snapshot, not a replay:
//! once a `CrashExit` has escalated the cluster status, a stale `Running`
//! arriving later for another node does not undo it.

use std::collections::BTreeMap;

use pf_protocol::message::{
    ExitCommand, GuiProcessLogMessage, GuiProcessLogMessageHistory, GuiProcessStatus, KillCommand,
    LogMessageRecord, NodeStatusRecord, ProcessRecord, StartCommand,
};
use pf_protocol::{ClusterStatus, NodeError, NodeStatus, OutputType};

use crate::registry::Registry;
use crate::time::current_time_millis;
use crate::types::{ClusterId, ConfigurationId, NodeId, ProcessId, ProgramId};

/// One status event in a node's history
#[derive(Debug, Clone, PartialEq)]
pub struct StatusEntry {
    pub id: i64,
    pub status: NodeStatus,
    pub time: u64,
}

/// One error event in a node's history
#[derive(Debug, Clone, PartialEq)]
pub struct ErrorEntry {
    pub id: i64,
    pub error: NodeError,
    pub message: String,
    pub time: u64,
}

/// One output line in a node's history
#[derive(Debug, Clone, PartialEq)]
pub struct LogEntry {
    pub id: i64,
    pub output_type: OutputType,
    pub message: String,
    pub time: u64,
}

/// Append-only per-node history of one process
#[derive(Debug, Clone, Default, PartialEq)]
pub struct NodeLog {
    pub statuses: Vec<StatusEntry>,
    pub errors: Vec<ErrorEntry>,
    pub messages: Vec<LogEntry>,
}

impl NodeLog {
    /// The node's latest reported status, if it has reported at all
    pub fn latest_status(&self) -> Option<NodeStatus> {
        self.statuses.last().map(|s| s.status)
    }
}

/// One launched instance of a program+configuration on a cluster
#[derive(Debug, Clone)]
pub struct Process {
    pub id: ProcessId,
    pub program_id: ProgramId,
    pub configuration_id: ConfigurationId,
    pub cluster_id: ClusterId,
    /// Milliseconds since the Unix epoch
    pub created: u64,
    node_logs: BTreeMap<NodeId, NodeLog>,
    cluster_status: ClusterStatus,
    status_time: u64,
    next_status_id: i64,
    next_error_id: i64,
    next_message_id: i64,
}

impl Process {
    pub fn new(
        id: ProcessId,
        program_id: ProgramId,
        configuration_id: ConfigurationId,
        cluster_id: ClusterId,
    ) -> Self {
        let now = current_time_millis();
        Self {
            id,
            program_id,
            configuration_id,
            cluster_id,
            created: now,
            node_logs: BTreeMap::new(),
            cluster_status: ClusterStatus::Unknown,
            status_time: now,
            next_status_id: 0,
            next_error_id: 0,
            next_message_id: 0,
        }
    }

    /// Current aggregate status across all reporting nodes
    pub fn cluster_status(&self) -> ClusterStatus {
        self.cluster_status
    }

    /// Timestamp of the last aggregate status change
    pub fn status_time(&self) -> u64 {
        self.status_time
    }

    /// Latest reported status of one node; `Unknown` if it never reported
    pub fn latest_node_status(&self, node: &NodeId) -> NodeStatus {
        self.node_logs
            .get(node)
            .and_then(NodeLog::latest_status)
            .unwrap_or(NodeStatus::Unknown)
    }

    fn all_nodes_have_status(&self, status: NodeStatus) -> bool {
        !self.node_logs.is_empty()
            && self
                .node_logs
                .values()
                .all(|log| log.latest_status() == Some(status))
    }

    fn any_node_has_status(&self, status: NodeStatus) -> bool {
        self.node_logs
            .values()
            .any(|log| log.latest_status() == Some(status))
    }

    /// Append a status event for one node and recompute the aggregate
    ///
    /// Returns the id of the appended event. The aggregate is derived from
    /// the latest-status snapshot of all nodes that have reported at least
    /// once, with `CrashExit` taking precedence over everything else.
    pub fn push_node_status(&mut self, node: &NodeId, status: NodeStatus) -> i64 {
        let id = self.next_status_id;
        self.next_status_id += 1;
        self.node_logs.entry(node.clone()).or_default().statuses.push(StatusEntry {
            id,
            status,
            time: current_time_millis(),
        });

        let new_status = match status {
            NodeStatus::Starting => ClusterStatus::Starting,
            NodeStatus::Running => {
                if self.all_nodes_have_status(NodeStatus::Running) {
                    ClusterStatus::Running
                } else {
                    self.cluster_status
                }
            }
            NodeStatus::NormalExit => {
                if self.all_nodes_have_status(NodeStatus::NormalExit) {
                    ClusterStatus::Exit
                } else if !self.any_node_has_status(NodeStatus::CrashExit) {
                    ClusterStatus::PartialExit
                } else {
                    self.cluster_status
                }
            }
            NodeStatus::CrashExit => ClusterStatus::CrashExit,
            NodeStatus::FailedToStart => ClusterStatus::FailedToStart,
            // Trays never report Unknown; keep the aggregate untouched
            NodeStatus::Unknown => self.cluster_status,
        };

        if new_status != self.cluster_status {
            self.cluster_status = new_status;
            self.status_time = current_time_millis();
        }
        id
    }

    /// Record a node-level error; never affects the aggregate status
    pub fn push_node_error(&mut self, node: &NodeId, error: NodeError, message: String) -> i64 {
        let id = self.next_error_id;
        self.next_error_id += 1;
        self.node_logs.entry(node.clone()).or_default().errors.push(ErrorEntry {
            id,
            error,
            message,
            time: current_time_millis(),
        });
        id
    }

    /// Record one output line from a node
    pub fn push_output(&mut self, node: &NodeId, output_type: OutputType, message: String) -> i64 {
        let id = self.next_message_id;
        self.next_message_id += 1;
        self.node_logs.entry(node.clone()).or_default().messages.push(LogEntry {
            id,
            output_type,
            message,
            time: current_time_millis(),
        });
        id
    }

    /// Snapshot form for the viewer initialization message
    pub fn to_record(&self) -> ProcessRecord {
        let mut history: Vec<NodeStatusRecord> = self
            .node_logs
            .iter()
            .flat_map(|(node, log)| {
                log.statuses.iter().map(|entry| NodeStatusRecord {
                    node_id: node.to_string(),
                    id: entry.id,
                    status: entry.status,
                    time: entry.time,
                })
            })
            .collect();
        history.sort_by_key(|record| record.id);

        ProcessRecord {
            id: self.id.as_i32(),
            program_id: self.program_id.to_string(),
            configuration_id: self.configuration_id.to_string(),
            cluster_id: self.cluster_id.to_string(),
            cluster_status: self.cluster_status,
            time: self.status_time,
            node_status_history: history,
        }
    }

    /// Status delta for viewers; `node` is absent for the synthetic update
    /// broadcast at creation time
    pub fn status_delta(&self, node: Option<&NodeId>) -> GuiProcessStatus {
        let latest = node.and_then(|n| {
            self.node_logs
                .get(n)
                .and_then(|log| log.statuses.last())
        });
        GuiProcessStatus {
            process_id: self.id.as_i32(),
            program_id: self.program_id.to_string(),
            configuration_id: self.configuration_id.to_string(),
            cluster_id: self.cluster_id.to_string(),
            node_id: node.map(ToString::to_string),
            node_status: latest.map(|entry| entry.status),
            cluster_status: self.cluster_status,
            id: latest.map(|entry| entry.id).unwrap_or(-1),
            time: latest.map(|entry| entry.time).unwrap_or(self.status_time),
        }
    }

    /// Delta message for the most recent output line of one node
    pub fn log_delta(&self, node: &NodeId) -> Option<GuiProcessLogMessage> {
        let entry = self.node_logs.get(node)?.messages.last()?;
        Some(GuiProcessLogMessage {
            process_id: self.id.as_i32(),
            node_id: node.to_string(),
            id: entry.id,
            output_type: entry.output_type,
            message: entry.message.clone(),
            time: entry.time,
        })
    }

    /// Complete ordered log history, for late-joining viewers
    pub fn log_history(&self) -> GuiProcessLogMessageHistory {
        let mut messages: Vec<LogMessageRecord> = self
            .node_logs
            .iter()
            .flat_map(|(node, log)| {
                log.messages.iter().map(|entry| LogMessageRecord {
                    node_id: node.to_string(),
                    id: entry.id,
                    output_type: entry.output_type,
                    message: entry.message.clone(),
                    time: entry.time,
                })
            })
            .collect();
        messages.sort_by_key(|record| record.id);

        GuiProcessLogMessageHistory {
            process_id: self.id.as_i32(),
            messages,
        }
    }
}

/// Build the start command for a process
///
/// Concatenates the program's base parameters, the chosen configuration's
/// parameters, and the per-cluster override. Returns `None` when the process
/// references entities the registry does not hold; for a process created
/// through the normal start path that is a defect.
pub fn start_command(registry: &Registry, process: &Process) -> Option<StartCommand> {
    let program = registry.find_program(&process.program_id)?;
    let configuration =
        registry.find_configuration(&process.program_id, &process.configuration_id)?;
    let cluster_override = program
        .clusters
        .iter()
        .find(|c| c.id == process.cluster_id)?;

    let commandline_parameters = [
        program.commandline_parameters.as_str(),
        configuration.parameters.as_str(),
        cluster_override.parameters.as_str(),
    ]
    .iter()
    .filter(|part| !part.is_empty())
    .copied()
    .collect::<Vec<_>>()
    .join(" ");

    Some(StartCommand {
        id: process.id.as_i32(),
        executable: program.executable.clone(),
        working_directory: program.working_directory.clone(),
        commandline_parameters,
        program_id: process.program_id.to_string(),
        configuration_id: process.configuration_id.to_string(),
        cluster_id: process.cluster_id.to_string(),
        forward_out_err: program.forward_out_err,
        data_hash: registry.data_hash(),
    })
}

/// Build the exit command for a process; carries only the id
pub fn exit_command(process: &Process) -> ExitCommand {
    ExitCommand {
        id: process.id.as_i32(),
    }
}

/// Build the kill command for a process; carries only the id
pub fn kill_command(process: &Process) -> KillCommand {
    KillCommand {
        id: process.id.as_i32(),
    }
}
