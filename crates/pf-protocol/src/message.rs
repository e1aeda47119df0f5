//! Message types for the procfleet protocol
//!
//! Every wire message is a JSON object carrying the envelope keys `type`
//! (string discriminant), `version` (integer triple) and, on core-to-tray
//! commands, `secret` (hex SHA-512 of the node's shared secret). The payload
//! fields live next to the envelope keys in the same object.
//!
//! The message model is a tagged union: [`Message`] is keyed by the `type`
//! discriminant and each variant owns its typed payload struct. Payload
//! structs additionally expose their discriminant through [`MessageKind`] so
//! the dispatcher can route raw JSON by type string.
//!
//! # Message Flow
//!
//! 1. Core connects out to every tray and sends `StartCommand` /
//!    `ExitCommand` / `KillCommand` messages.
//! 2. Trays reply asynchronously with `ProcessStatusMessage`,
//!    `ProcessOutputMessage`, `ErrorOccurredMessage` and, after a
//!    (re)connect, a `TrayStatusMessage` listing what is already running.
//! 3. Viewers connect in to the core; the core greets each with
//!    `GuiInitialization` plus one `GuiProcessLogMessageHistory` per live
//!    process, then streams `GuiProcessStatus` / `GuiProcessLogMessage` /
//!    `GuiClusterConnectivity` deltas. Viewers send `GuiStartCommand` and
//!    `GuiProcessCommand`.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha512};

/// Protocol version as an integer triple; the major component must match
/// between peers.
pub type ApiVersion = [i32; 3];

/// Version stamped on every outgoing envelope.
pub const CURRENT_VERSION: ApiVersion = [1, 0, 0];

/// Payload types that can appear behind a `type` discriminant
pub trait MessageKind: Serialize + DeserializeOwned {
    /// The wire value of the `type` key for this payload
    const TYPE: &'static str;
}

/// Latest reported state of a program on one node
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum NodeStatus {
    Starting,
    Running,
    NormalExit,
    CrashExit,
    FailedToStart,
    Unknown,
}

/// Aggregate state of a process across all nodes of its cluster
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ClusterStatus {
    Starting,
    Running,
    Exit,
    PartialExit,
    CrashExit,
    FailedToStart,
    Unknown,
}

impl ClusterStatus {
    /// Whether this status is terminal, i.e. the process will not report
    /// further node statuses except through a restart
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            ClusterStatus::Exit | ClusterStatus::CrashExit | ClusterStatus::FailedToStart
        )
    }
}

/// Node-level communication errors; recorded per process but never affecting
/// the aggregate cluster status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum NodeError {
    TimedOut,
    WriteError,
    ReadError,
    UnknownError,
}

/// Which output stream a log line came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputType {
    StdOut,
    StdErr,
}

/// Command to start a program on every node of a cluster (core -> tray)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StartCommand {
    /// Core-assigned process id, unique for the lifetime of the core
    pub id: i32,
    pub executable: String,
    pub working_directory: String,
    /// Base parameters + configuration parameters + cluster override,
    /// concatenated
    pub commandline_parameters: String,
    pub program_id: String,
    pub configuration_id: String,
    pub cluster_id: String,
    /// Whether the tray should forward stdout/stderr lines back to the core
    pub forward_out_err: bool,
    /// Registry content hash at the time the command was issued, for
    /// configuration drift detection
    pub data_hash: u64,
}

impl MessageKind for StartCommand {
    const TYPE: &'static str = "StartCommand";
}

/// Ask the trays to let a process exit gracefully (core -> tray)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExitCommand {
    pub id: i32,
}

impl MessageKind for ExitCommand {
    const TYPE: &'static str = "ExitCommand";
}

/// Forcefully terminate a process (core -> tray)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct KillCommand {
    pub id: i32,
}

impl MessageKind for KillCommand {
    const TYPE: &'static str = "KillCommand";
}

/// Status change of one process on one node (tray -> core)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProcessStatusMessage {
    pub process_id: i32,
    pub status: NodeStatus,
}

impl MessageKind for ProcessStatusMessage {
    const TYPE: &'static str = "ProcessStatusMessage";
}

/// One line of process output (tray -> core)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProcessOutputMessage {
    pub process_id: i32,
    pub output_type: OutputType,
    pub message: String,
}

impl MessageKind for ProcessOutputMessage {
    const TYPE: &'static str = "ProcessOutputMessage";
}

/// Process known to a tray, reported after a (re)connect
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TrayProcessInfo {
    pub process_id: i32,
    pub program_id: String,
    pub configuration_id: String,
    pub cluster_id: String,
    /// Registry hash of the core instance that started the process
    pub data_hash: u64,
}

/// Inventory of processes already running on a tray (tray -> core)
///
/// Lets a restarted core re-adopt processes it did not start itself.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TrayStatusMessage {
    pub processes: Vec<TrayProcessInfo>,
}

impl MessageKind for TrayStatusMessage {
    const TYPE: &'static str = "TrayStatusMessage";
}

/// Node-level error concerning a process (tray -> core)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorOccurredMessage {
    pub process_id: Option<i32>,
    pub error: NodeError,
    pub message: String,
}

impl MessageKind for ErrorOccurredMessage {
    const TYPE: &'static str = "ErrorOccurredMessage";
}

/// A program configuration as shown to viewers
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConfigurationRecord {
    pub id: String,
    pub name: String,
}

/// A program as shown to viewers
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProgramRecord {
    pub id: String,
    pub name: String,
    pub tags: Vec<String>,
    pub clusters: Vec<String>,
    pub configurations: Vec<ConfigurationRecord>,
    pub enabled: bool,
}

/// A node with its live connectivity as shown to viewers
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeRecord {
    pub id: String,
    pub name: String,
    pub connected: bool,
}

/// A cluster as shown to viewers
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClusterRecord {
    pub id: String,
    pub name: String,
    pub enabled: bool,
    pub nodes: Vec<NodeRecord>,
}

/// One per-node status event in a process's history
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeStatusRecord {
    pub node_id: String,
    pub id: i64,
    pub status: NodeStatus,
    /// Milliseconds since the Unix epoch
    pub time: u64,
}

/// An in-flight process as shown to viewers
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProcessRecord {
    pub id: i32,
    pub program_id: String,
    pub configuration_id: String,
    pub cluster_id: String,
    pub cluster_status: ClusterStatus,
    pub time: u64,
    pub node_status_history: Vec<NodeStatusRecord>,
}

/// Full state snapshot sent to a viewer right after it connects
/// (core -> gui)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GuiInitialization {
    pub programs: Vec<ProgramRecord>,
    pub clusters: Vec<ClusterRecord>,
    pub processes: Vec<ProcessRecord>,
    pub data_hash: u64,
}

impl MessageKind for GuiInitialization {
    const TYPE: &'static str = "GuiInitialization";
}

/// Status delta for one process (core -> gui)
///
/// `node_id`/`node_status` are absent for the synthetic update broadcast when
/// a process is created, before any tray has reported.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GuiProcessStatus {
    pub process_id: i32,
    pub program_id: String,
    pub configuration_id: String,
    pub cluster_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub node_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub node_status: Option<NodeStatus>,
    pub cluster_status: ClusterStatus,
    /// Per-process monotonic status event id
    pub id: i64,
    pub time: u64,
}

impl MessageKind for GuiProcessStatus {
    const TYPE: &'static str = "GuiProcessStatus";
}

/// Single new log line for a process (core -> gui)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GuiProcessLogMessage {
    pub process_id: i32,
    pub node_id: String,
    pub id: i64,
    pub output_type: OutputType,
    pub message: String,
    pub time: u64,
}

impl MessageKind for GuiProcessLogMessage {
    const TYPE: &'static str = "GuiProcessLogMessage";
}

/// One historic log line inside a catch-up message
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LogMessageRecord {
    pub node_id: String,
    pub id: i64,
    pub output_type: OutputType,
    pub message: String,
    pub time: u64,
}

/// Complete log history of one process, sent to late-joining viewers
/// (core -> gui)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GuiProcessLogMessageHistory {
    pub process_id: i32,
    pub messages: Vec<LogMessageRecord>,
}

impl MessageKind for GuiProcessLogMessageHistory {
    const TYPE: &'static str = "GuiProcessLogMessageHistory";
}

/// Connectivity change of one node within one cluster (core -> gui)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GuiClusterConnectivity {
    pub cluster_id: String,
    pub node_id: String,
    pub connected: bool,
}

impl MessageKind for GuiClusterConnectivity {
    const TYPE: &'static str = "GuiClusterConnectivity";
}

/// A process has been removed from the registry (core -> gui)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GuiProcessRemoved {
    pub process_id: i32,
}

impl MessageKind for GuiProcessRemoved {
    const TYPE: &'static str = "GuiProcessRemoved";
}

/// Request to start a program on a cluster (gui -> core)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GuiStartCommand {
    pub program_id: String,
    pub configuration_id: String,
    pub cluster_id: String,
}

impl MessageKind for GuiStartCommand {
    const TYPE: &'static str = "GuiStartCommand";
}

/// Directive applied to an existing process
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ProcessDirective {
    /// Let the process exit gracefully
    Exit,
    /// Terminate the process
    Kill,
    /// Forget a terminal process
    Remove,
}

/// Request to act on a running or finished process (gui -> core)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GuiProcessCommand {
    pub process_id: i32,
    pub command: ProcessDirective,
}

impl MessageKind for GuiProcessCommand {
    const TYPE: &'static str = "GuiProcessCommand";
}

/// All known messages, keyed by the `type` discriminant
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum Message {
    StartCommand(StartCommand),
    ExitCommand(ExitCommand),
    KillCommand(KillCommand),
    ProcessStatusMessage(ProcessStatusMessage),
    ProcessOutputMessage(ProcessOutputMessage),
    TrayStatusMessage(TrayStatusMessage),
    ErrorOccurredMessage(ErrorOccurredMessage),
    GuiInitialization(GuiInitialization),
    GuiProcessStatus(GuiProcessStatus),
    GuiProcessLogMessage(GuiProcessLogMessage),
    GuiProcessLogMessageHistory(GuiProcessLogMessageHistory),
    GuiClusterConnectivity(GuiClusterConnectivity),
    GuiProcessRemoved(GuiProcessRemoved),
    GuiStartCommand(GuiStartCommand),
    GuiProcessCommand(GuiProcessCommand),
}

impl Message {
    /// The wire value of this message's `type` key
    pub fn type_str(&self) -> &'static str {
        match self {
            Message::StartCommand(_) => StartCommand::TYPE,
            Message::ExitCommand(_) => ExitCommand::TYPE,
            Message::KillCommand(_) => KillCommand::TYPE,
            Message::ProcessStatusMessage(_) => ProcessStatusMessage::TYPE,
            Message::ProcessOutputMessage(_) => ProcessOutputMessage::TYPE,
            Message::TrayStatusMessage(_) => TrayStatusMessage::TYPE,
            Message::ErrorOccurredMessage(_) => ErrorOccurredMessage::TYPE,
            Message::GuiInitialization(_) => GuiInitialization::TYPE,
            Message::GuiProcessStatus(_) => GuiProcessStatus::TYPE,
            Message::GuiProcessLogMessage(_) => GuiProcessLogMessage::TYPE,
            Message::GuiProcessLogMessageHistory(_) => GuiProcessLogMessageHistory::TYPE,
            Message::GuiClusterConnectivity(_) => GuiClusterConnectivity::TYPE,
            Message::GuiProcessRemoved(_) => GuiProcessRemoved::TYPE,
            Message::GuiStartCommand(_) => GuiStartCommand::TYPE,
            Message::GuiProcessCommand(_) => GuiProcessCommand::TYPE,
        }
    }
}

/// Versioned wrapper around a [`Message`]; the wire form is the JSON
/// serialization of this struct, with the payload fields flattened next to
/// the envelope keys
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    pub version: ApiVersion,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub secret: Option<String>,
    #[serde(flatten)]
    pub message: Message,
}

impl Envelope {
    /// Wrap a message, stamping the current protocol version
    pub fn new(message: Message) -> Self {
        Self {
            version: CURRENT_VERSION,
            secret: None,
            message,
        }
    }

    /// Attach a hashed shared secret; used on core-to-tray commands only
    pub fn with_secret(mut self, secret: Option<String>) -> Self {
        self.secret = secret;
        self
    }
}

/// Hash a node's shared secret the way it travels in the `secret` envelope
/// field
pub fn hash_secret(secret: &str) -> String {
    hex::encode(Sha512::digest(secret.as_bytes()))
}
