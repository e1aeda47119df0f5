//! Core state and message handlers
//!
//! [`CoreState`] owns the registry and is mutated exclusively by the core
//! loop, one event at a time. Handlers never touch a socket; everything they
//! want sent goes into the [`Outbox`], which the loop drains after each
//! event. That keeps handlers synchronous, deterministic, and directly
//! testable.

use std::time::Duration;

use pf_core::process::{self, Process};
use pf_core::time::elapsed_millis;
use pf_core::{ClusterId, ConfigurationId, NodeId, ProcessId, ProgramId, Registry};
use pf_protocol::message::{
    ClusterRecord, ConfigurationRecord, ErrorOccurredMessage, GuiClusterConnectivity,
    GuiInitialization, GuiProcessCommand, GuiProcessRemoved, GuiStartCommand, NodeRecord,
    ProcessDirective, ProcessOutputMessage, ProcessStatusMessage, ProgramRecord,
    TrayStatusMessage,
};
use pf_protocol::{Message, NodeStatus};

/// Messages produced by handlers, drained by the core loop after each event
#[derive(Default)]
pub struct Outbox {
    /// Deltas for every connected viewer
    pub broadcasts: Vec<Message>,
    /// Commands for every node of a cluster
    pub cluster_sends: Vec<(ClusterId, Message)>,
    /// Start commands to issue after a program's configured delay
    pub delayed_starts: Vec<(ProcessId, Duration)>,
}

impl Outbox {
    pub fn is_empty(&self) -> bool {
        self.broadcasts.is_empty()
            && self.cluster_sends.is_empty()
            && self.delayed_starts.is_empty()
    }
}

/// All mutable core state; owned by the core loop, never shared
pub struct CoreState {
    pub registry: Registry,
    pub outbox: Outbox,
    /// Node whose frame is currently being dispatched
    pub current_node: Option<NodeId>,
}

impl CoreState {
    pub fn new(registry: Registry) -> Self {
        Self {
            registry,
            outbox: Outbox::default(),
            current_node: None,
        }
    }

    fn sender_node(&self) -> Option<NodeId> {
        if self.current_node.is_none() {
            tracing::warn!("tray message dispatched outside a tray context");
        }
        self.current_node.clone()
    }

    /// A node reported a status change for one of its processes
    pub fn handle_process_status(&mut self, message: ProcessStatusMessage) {
        let Some(node) = self.sender_node() else { return };
        let id = ProcessId::new(message.process_id);
        let Some(process) = self.registry.find_process_mut(id) else {
            tracing::warn!(process = %id, "status for unknown process");
            return;
        };
        process.push_node_status(&node, message.status);
        tracing::debug!(
            process = %id, node = %node, status = ?message.status,
            cluster_status = ?process.cluster_status(), "status update"
        );
        let delta = process.status_delta(Some(&node));
        self.outbox.broadcasts.push(Message::GuiProcessStatus(delta));
    }

    /// A node forwarded one line of process output
    pub fn handle_process_output(&mut self, message: ProcessOutputMessage) {
        let Some(node) = self.sender_node() else { return };
        let id = ProcessId::new(message.process_id);
        let Some(process) = self.registry.find_process_mut(id) else {
            tracing::warn!(process = %id, "output for unknown process");
            return;
        };
        process.push_output(&node, message.output_type, message.message);
        if let Some(delta) = process.log_delta(&node) {
            self.outbox.broadcasts.push(Message::GuiProcessLogMessage(delta));
        }
    }

    /// A node hit a communication error concerning a process
    pub fn handle_error_occurred(&mut self, message: ErrorOccurredMessage) {
        let Some(node) = self.sender_node() else { return };
        tracing::warn!(
            node = %node, error = ?message.error, detail = %message.message,
            "node reported an error"
        );
        let Some(process_id) = message.process_id else { return };
        let id = ProcessId::new(process_id);
        if let Some(process) = self.registry.find_process_mut(id) {
            process.push_node_error(&node, message.error, message.message);
        }
    }

    /// A (re)connected tray reported what it is already running
    ///
    /// Processes the core does not know get adopted: a core restart must not
    /// orphan what the trays kept alive. Negative ids mark processes the
    /// tray started outside of any core and are skipped.
    pub fn handle_tray_status(&mut self, message: TrayStatusMessage) {
        let Some(node) = self.sender_node() else { return };
        for info in message.processes {
            if info.process_id < 0 {
                tracing::debug!(node = %node, id = info.process_id, "skipping local tray process");
                continue;
            }
            if info.data_hash != self.registry.data_hash() {
                tracing::warn!(
                    node = %node, process = info.process_id,
                    "process was started against different definitions"
                );
            }
            let id = ProcessId::new(info.process_id);
            self.registry.bump_next_process_id(info.process_id);

            if let Some(process) = self.registry.find_process_mut(id) {
                // Already known; the tray confirms it is alive on this node
                process.push_node_status(&node, NodeStatus::Running);
                let delta = process.status_delta(Some(&node));
                self.outbox.broadcasts.push(Message::GuiProcessStatus(delta));
                continue;
            }

            tracing::info!(node = %node, process = %id, "adopting process");
            let mut process = Process::new(
                id,
                ProgramId::new(info.program_id),
                ConfigurationId::new(info.configuration_id),
                ClusterId::new(info.cluster_id),
            );
            process.push_node_status(&node, NodeStatus::Running);
            let delta = process.status_delta(Some(&node));
            self.registry.add_process(process);
            self.outbox.broadcasts.push(Message::GuiProcessStatus(delta));
        }
    }

    /// A viewer asked to start a program on a cluster
    pub fn handle_gui_start(&mut self, message: GuiStartCommand) {
        let program_id = ProgramId::new(message.program_id);
        let configuration_id = ConfigurationId::new(message.configuration_id);
        let cluster_id = ClusterId::new(message.cluster_id);

        let Some(program) = self.registry.find_program(&program_id) else {
            tracing::warn!(program = %program_id, "start request for unknown program");
            return;
        };
        if !program.enabled {
            tracing::warn!(program = %program_id, "start request for disabled program");
            return;
        }
        if !program.clusters.iter().any(|c| c.id == cluster_id) {
            tracing::warn!(
                program = %program_id, cluster = %cluster_id,
                "start request for cluster the program does not target"
            );
            return;
        }
        let delay = program.delay;
        if self
            .registry
            .find_configuration(&program_id, &configuration_id)
            .is_none()
        {
            tracing::warn!(
                program = %program_id, configuration = %configuration_id,
                "start request with unknown configuration"
            );
            return;
        }
        match self.registry.find_cluster(&cluster_id) {
            Some(cluster) if cluster.enabled => {}
            Some(_) => {
                tracing::warn!(cluster = %cluster_id, "start request for disabled cluster");
                return;
            }
            None => {
                tracing::warn!(cluster = %cluster_id, "start request for unknown cluster");
                return;
            }
        }

        let id = self.registry.allocate_process_id();
        let process = Process::new(id, program_id.clone(), configuration_id, cluster_id);
        // Announce the process before any tray reports a status
        let delta = process.status_delta(None);
        self.registry.add_process(process);
        self.outbox.broadcasts.push(Message::GuiProcessStatus(delta));

        match delay {
            Some(delay) if !delay.is_zero() => {
                tracing::info!(process = %id, ?delay, "deferring start command");
                self.outbox.delayed_starts.push((id, delay));
            }
            _ => self.dispatch_start(id),
        }
    }

    /// Issue the start command for a created (possibly delayed) process
    pub fn dispatch_start(&mut self, id: ProcessId) {
        let Some(process) = self.registry.find_process(id) else {
            // Removed while its delay was pending
            tracing::debug!(process = %id, "not starting removed process");
            return;
        };
        let Some(command) = process::start_command(&self.registry, process) else {
            tracing::error!(process = %id, "process references unknown definitions");
            return;
        };
        tracing::info!(
            process = %id, cluster = %process.cluster_id, executable = %command.executable,
            "issuing start command"
        );
        self.outbox
            .cluster_sends
            .push((process.cluster_id.clone(), Message::StartCommand(command)));
    }

    /// A viewer asked to exit, kill, or remove an existing process
    pub fn handle_gui_process_command(&mut self, message: GuiProcessCommand) {
        let id = ProcessId::new(message.process_id);
        let Some(process) = self.registry.find_process(id) else {
            tracing::warn!(process = %id, "command for unknown process");
            return;
        };

        match message.command {
            ProcessDirective::Exit => {
                let command = Message::ExitCommand(process::exit_command(process));
                self.outbox
                    .cluster_sends
                    .push((process.cluster_id.clone(), command));
            }
            ProcessDirective::Kill => {
                let command = Message::KillCommand(process::kill_command(process));
                self.outbox
                    .cluster_sends
                    .push((process.cluster_id.clone(), command));
            }
            ProcessDirective::Remove => {
                if !process.cluster_status().is_terminal() {
                    tracing::warn!(
                        process = %id, status = ?process.cluster_status(),
                        "refusing to remove a live process"
                    );
                    return;
                }
                self.remove_process(id);
            }
        }
    }

    /// A tray link came up or went down
    pub fn node_connectivity(&mut self, cluster: &ClusterId, node: &NodeId, connected: bool) {
        self.registry.set_node_connected(node, connected);
        self.outbox
            .broadcasts
            .push(Message::GuiClusterConnectivity(GuiClusterConnectivity {
                cluster_id: cluster.to_string(),
                node_id: node.to_string(),
                connected,
            }));
    }

    /// Drop terminal processes that have sat past the retention window
    pub fn retention_sweep(&mut self, retention: Duration) {
        let expired: Vec<ProcessId> = self
            .registry
            .processes()
            .into_iter()
            .filter(|p| {
                p.cluster_status().is_terminal()
                    && elapsed_millis(p.status_time()) > retention.as_millis() as u64
            })
            .map(|p| p.id)
            .collect();

        for id in expired {
            tracing::info!(process = %id, "retention expired");
            self.remove_process(id);
        }
    }

    fn remove_process(&mut self, id: ProcessId) {
        if self.registry.remove_process(id).is_some() {
            self.outbox
                .broadcasts
                .push(Message::GuiProcessRemoved(GuiProcessRemoved {
                    process_id: id.as_i32(),
                }));
        }
    }

    /// Catch-up messages for a freshly connected viewer: the full snapshot,
    /// then one log history per live process
    pub fn snapshot_messages(&self) -> Vec<Message> {
        let registry = &self.registry;
        let mut messages = vec![Message::GuiInitialization(GuiInitialization {
            programs: registry.programs().into_iter().map(program_record).collect(),
            clusters: registry
                .clusters()
                .into_iter()
                .map(|c| cluster_record(c, registry))
                .collect(),
            processes: registry
                .processes()
                .into_iter()
                .map(Process::to_record)
                .collect(),
            data_hash: registry.data_hash(),
        })];
        for process in registry.processes() {
            messages.push(Message::GuiProcessLogMessageHistory(process.log_history()));
        }
        messages
    }
}

fn program_record(program: &pf_core::Program) -> ProgramRecord {
    ProgramRecord {
        id: program.id.to_string(),
        name: program.name.clone(),
        tags: program.tags.clone(),
        clusters: program.clusters.iter().map(|c| c.id.to_string()).collect(),
        configurations: program
            .configurations
            .iter()
            .map(|c| ConfigurationRecord {
                id: c.id.to_string(),
                name: c.name.clone(),
            })
            .collect(),
        enabled: program.enabled,
    }
}

fn cluster_record(cluster: &pf_core::Cluster, registry: &Registry) -> ClusterRecord {
    ClusterRecord {
        id: cluster.id.to_string(),
        name: cluster.name.clone(),
        enabled: cluster.enabled,
        nodes: cluster
            .nodes
            .iter()
            .filter_map(|id| registry.find_node(id))
            .map(|node| NodeRecord {
                id: node.id.to_string(),
                name: node.name.clone(),
                connected: node.connected,
            })
            .collect(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pf_core::model::{Cluster, ClusterOverride, Configuration, Node, Program};
    use pf_protocol::message::TrayProcessInfo;
    use pf_protocol::{ClusterStatus, OutputType};

    fn fixture() -> CoreState {
        let nodes = vec![
            Node {
                id: NodeId::new("n1"),
                name: "Node 1".to_string(),
                address: "localhost".to_string(),
                port: 5001,
                secret: None,
                connected: false,
            },
            Node {
                id: NodeId::new("n2"),
                name: "Node 2".to_string(),
                address: "localhost".to_string(),
                port: 5002,
                secret: None,
                connected: false,
            },
        ];
        let clusters = vec![Cluster {
            id: ClusterId::new("wall"),
            name: "Wall".to_string(),
            enabled: true,
            nodes: vec![NodeId::new("n1"), NodeId::new("n2")],
            description: String::new(),
        }];
        let programs = vec![Program {
            id: ProgramId::new("renderer"),
            name: "Renderer".to_string(),
            executable: "/usr/bin/renderer".to_string(),
            commandline_parameters: "--base".to_string(),
            working_directory: "/srv".to_string(),
            configurations: vec![Configuration {
                id: ConfigurationId::new("default"),
                name: "Default".to_string(),
                parameters: "--conf".to_string(),
                description: String::new(),
            }],
            clusters: vec![ClusterOverride {
                id: ClusterId::new("wall"),
                parameters: String::new(),
            }],
            tags: vec![],
            enabled: true,
            delay: None,
            forward_out_err: true,
        }];
        let (registry, report) = Registry::load(nodes, clusters, programs);
        assert!(report.complete());
        CoreState::new(registry)
    }

    fn start_renderer(state: &mut CoreState) -> ProcessId {
        state.handle_gui_start(GuiStartCommand {
            program_id: "renderer".to_string(),
            configuration_id: "default".to_string(),
            cluster_id: "wall".to_string(),
        });
        state.registry.processes()[0].id
    }

    fn drain(state: &mut CoreState) -> Outbox {
        std::mem::take(&mut state.outbox)
    }

    #[test]
    fn test_gui_start_creates_process_and_command() {
        let mut state = fixture();
        let id = start_renderer(&mut state);
        let outbox = drain(&mut state);

        // One creation broadcast without node fields
        assert_eq!(outbox.broadcasts.len(), 1);
        match &outbox.broadcasts[0] {
            Message::GuiProcessStatus(delta) => {
                assert_eq!(delta.process_id, id.as_i32());
                assert_eq!(delta.node_id, None);
                assert_eq!(delta.cluster_status, ClusterStatus::Unknown);
            }
            other => panic!("unexpected broadcast: {other:?}"),
        }

        // One start command for the whole cluster
        assert_eq!(outbox.cluster_sends.len(), 1);
        let (cluster, message) = &outbox.cluster_sends[0];
        assert_eq!(cluster, &ClusterId::new("wall"));
        match message {
            Message::StartCommand(cmd) => {
                assert_eq!(cmd.id, id.as_i32());
                assert_eq!(cmd.commandline_parameters, "--base --conf");
            }
            other => panic!("unexpected command: {other:?}"),
        }
        assert!(outbox.delayed_starts.is_empty());
    }

    #[test]
    fn test_gui_start_with_delay_defers_command() {
        let state = fixture();
        // Rebuild with a delayed program
        let mut programs: Vec<Program> =
            state.registry.programs().into_iter().cloned().collect();
        programs[0].delay = Some(Duration::from_millis(1500));
        let nodes = state.registry.nodes().into_iter().cloned().collect();
        let clusters = state.registry.clusters().into_iter().cloned().collect();
        let (registry, _) = Registry::load(nodes, clusters, programs);
        let mut state = CoreState::new(registry);

        let id = start_renderer(&mut state);
        let outbox = drain(&mut state);
        assert!(outbox.cluster_sends.is_empty());
        assert_eq!(outbox.delayed_starts, vec![(id, Duration::from_millis(1500))]);

        // The deferred dispatch produces the command
        state.dispatch_start(id);
        let outbox = drain(&mut state);
        assert_eq!(outbox.cluster_sends.len(), 1);
    }

    #[test]
    fn test_gui_start_rejects_unknown_and_disabled() {
        let mut state = fixture();

        state.handle_gui_start(GuiStartCommand {
            program_id: "ghost".to_string(),
            configuration_id: "default".to_string(),
            cluster_id: "wall".to_string(),
        });
        state.handle_gui_start(GuiStartCommand {
            program_id: "renderer".to_string(),
            configuration_id: "ghost".to_string(),
            cluster_id: "wall".to_string(),
        });
        state.handle_gui_start(GuiStartCommand {
            program_id: "renderer".to_string(),
            configuration_id: "default".to_string(),
            cluster_id: "ghost".to_string(),
        });

        assert!(state.registry.processes().is_empty());
        assert!(state.outbox.is_empty());
    }

    #[test]
    fn test_status_update_broadcasts_delta() {
        let mut state = fixture();
        let id = start_renderer(&mut state);
        drain(&mut state);

        state.current_node = Some(NodeId::new("n1"));
        state.handle_process_status(ProcessStatusMessage {
            process_id: id.as_i32(),
            status: NodeStatus::Starting,
        });
        state.current_node = None;

        let outbox = drain(&mut state);
        assert_eq!(outbox.broadcasts.len(), 1);
        match &outbox.broadcasts[0] {
            Message::GuiProcessStatus(delta) => {
                assert_eq!(delta.node_id.as_deref(), Some("n1"));
                assert_eq!(delta.node_status, Some(NodeStatus::Starting));
                assert_eq!(delta.cluster_status, ClusterStatus::Starting);
            }
            other => panic!("unexpected broadcast: {other:?}"),
        }
    }

    #[test]
    fn test_output_broadcasts_log_delta() {
        let mut state = fixture();
        let id = start_renderer(&mut state);
        drain(&mut state);

        state.current_node = Some(NodeId::new("n2"));
        state.handle_process_output(ProcessOutputMessage {
            process_id: id.as_i32(),
            output_type: OutputType::StdErr,
            message: "warning: low vram".to_string(),
        });

        let outbox = drain(&mut state);
        match &outbox.broadcasts[0] {
            Message::GuiProcessLogMessage(delta) => {
                assert_eq!(delta.node_id, "n2");
                assert_eq!(delta.message, "warning: low vram");
            }
            other => panic!("unexpected broadcast: {other:?}"),
        }
    }

    #[test]
    fn test_status_for_unknown_process_ignored() {
        let mut state = fixture();
        state.current_node = Some(NodeId::new("n1"));
        state.handle_process_status(ProcessStatusMessage {
            process_id: 99,
            status: NodeStatus::Running,
        });
        assert!(state.outbox.is_empty());
    }

    #[test]
    fn test_tray_status_adopts_unknown_processes() {
        let mut state = fixture();
        state.current_node = Some(NodeId::new("n1"));
        state.handle_tray_status(TrayStatusMessage {
            processes: vec![
                TrayProcessInfo {
                    process_id: 7,
                    program_id: "renderer".to_string(),
                    configuration_id: "default".to_string(),
                    cluster_id: "wall".to_string(),
                    data_hash: state.registry.data_hash(),
                },
                // Started by the tray itself, not ours to track
                TrayProcessInfo {
                    process_id: -1,
                    program_id: "local".to_string(),
                    configuration_id: "default".to_string(),
                    cluster_id: "wall".to_string(),
                    data_hash: 0,
                },
            ],
        });
        state.current_node = None;

        let processes = state.registry.processes();
        assert_eq!(processes.len(), 1);
        let adopted = processes[0];
        assert_eq!(adopted.id, ProcessId::new(7));
        assert_eq!(adopted.cluster_status(), ClusterStatus::Unknown);
        assert_eq!(adopted.latest_node_status(&NodeId::new("n1")), NodeStatus::Running);

        // Ids allocated afterwards must not collide with the adopted one
        assert_eq!(state.registry.allocate_process_id(), ProcessId::new(8));
    }

    #[test]
    fn test_remove_requires_terminal_status() {
        let mut state = fixture();
        let id = start_renderer(&mut state);
        state.current_node = Some(NodeId::new("n1"));
        state.handle_process_status(ProcessStatusMessage {
            process_id: id.as_i32(),
            status: NodeStatus::Running,
        });
        state.current_node = None;
        drain(&mut state);

        state.handle_gui_process_command(GuiProcessCommand {
            process_id: id.as_i32(),
            command: ProcessDirective::Remove,
        });
        assert!(state.registry.find_process(id).is_some());

        state.current_node = Some(NodeId::new("n1"));
        state.handle_process_status(ProcessStatusMessage {
            process_id: id.as_i32(),
            status: NodeStatus::NormalExit,
        });
        state.current_node = None;
        drain(&mut state);

        state.handle_gui_process_command(GuiProcessCommand {
            process_id: id.as_i32(),
            command: ProcessDirective::Remove,
        });
        assert!(state.registry.find_process(id).is_none());
        let outbox = drain(&mut state);
        assert!(matches!(
            outbox.broadcasts.as_slice(),
            [Message::GuiProcessRemoved(removed)] if removed.process_id == id.as_i32()
        ));
    }

    #[test]
    fn test_exit_and_kill_target_the_cluster() {
        let mut state = fixture();
        let id = start_renderer(&mut state);
        drain(&mut state);

        state.handle_gui_process_command(GuiProcessCommand {
            process_id: id.as_i32(),
            command: ProcessDirective::Exit,
        });
        state.handle_gui_process_command(GuiProcessCommand {
            process_id: id.as_i32(),
            command: ProcessDirective::Kill,
        });

        let outbox = drain(&mut state);
        assert_eq!(outbox.cluster_sends.len(), 2);
        assert!(matches!(outbox.cluster_sends[0].1, Message::ExitCommand(_)));
        assert!(matches!(outbox.cluster_sends[1].1, Message::KillCommand(_)));
    }

    #[test]
    fn test_connectivity_updates_registry_and_broadcasts() {
        let mut state = fixture();
        state.node_connectivity(&ClusterId::new("wall"), &NodeId::new("n1"), true);

        assert!(state.registry.find_node(&NodeId::new("n1")).unwrap().connected);
        let outbox = drain(&mut state);
        assert!(matches!(
            outbox.broadcasts.as_slice(),
            [Message::GuiClusterConnectivity(c)] if c.connected && c.node_id == "n1"
        ));
    }

    #[test]
    fn test_retention_sweep_removes_only_expired_terminal() {
        let mut state = fixture();
        let id = start_renderer(&mut state);
        state.current_node = Some(NodeId::new("n1"));
        state.handle_process_status(ProcessStatusMessage {
            process_id: id.as_i32(),
            status: NodeStatus::NormalExit,
        });
        state.current_node = None;
        drain(&mut state);

        // Freshly terminal, inside the window
        state.retention_sweep(Duration::from_secs(90));
        assert!(state.registry.find_process(id).is_some());

        // Zero retention expires it immediately
        state.retention_sweep(Duration::ZERO);
        assert!(state.registry.find_process(id).is_none());
    }

    #[test]
    fn test_retention_sweep_spares_running_processes() {
        let mut state = fixture();
        let id = start_renderer(&mut state);
        state.current_node = Some(NodeId::new("n1"));
        state.handle_process_status(ProcessStatusMessage {
            process_id: id.as_i32(),
            status: NodeStatus::Running,
        });
        state.current_node = None;
        drain(&mut state);

        state.retention_sweep(Duration::ZERO);
        assert!(state.registry.find_process(id).is_some());
    }

    #[test]
    fn test_snapshot_contains_state_and_histories() {
        let mut state = fixture();
        let id = start_renderer(&mut state);
        state.current_node = Some(NodeId::new("n1"));
        state.handle_process_output(ProcessOutputMessage {
            process_id: id.as_i32(),
            output_type: OutputType::StdOut,
            message: "ready".to_string(),
        });
        state.current_node = None;

        let messages = state.snapshot_messages();
        assert_eq!(messages.len(), 2);
        match &messages[0] {
            Message::GuiInitialization(init) => {
                assert_eq!(init.programs.len(), 1);
                assert_eq!(init.clusters.len(), 1);
                assert_eq!(init.clusters[0].nodes.len(), 2);
                assert_eq!(init.processes.len(), 1);
                assert_eq!(init.data_hash, state.registry.data_hash());
            }
            other => panic!("unexpected first message: {other:?}"),
        }
        match &messages[1] {
            Message::GuiProcessLogMessageHistory(history) => {
                assert_eq!(history.process_id, id.as_i32());
                assert_eq!(history.messages.len(), 1);
            }
            other => panic!("unexpected second message: {other:?}"),
        }
    }
}
