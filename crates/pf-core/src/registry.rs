//! In-memory entity registry
//!
//! Holds the ID-indexed tables for nodes, clusters, programs, and live
//! processes. All lookups go by id; nothing stores a reference into another
//! table. After every (re)load a content hash over all static fields is
//! computed, used to detect configuration drift between core instances (for
//! example across a tray or viewer reconnect).

use std::collections::HashMap;

use sha2::{Digest, Sha256};

use crate::error::LoadError;
use crate::model::{Cluster, Node, Program};
use crate::process::Process;
use crate::types::{ClusterId, ConfigurationId, NodeId, ProcessId, ProgramId};

/// Outcome of a registry load; failures are per item, the valid subset is
/// always kept
#[derive(Debug, Default)]
pub struct LoadReport {
    pub failures: Vec<LoadError>,
}

impl LoadReport {
    /// Whether every definition made it into the registry
    pub fn complete(&self) -> bool {
        self.failures.is_empty()
    }
}

/// ID-indexed store of all static and dynamic entities
#[derive(Debug, Default)]
pub struct Registry {
    nodes: HashMap<NodeId, Node>,
    clusters: HashMap<ClusterId, Cluster>,
    programs: HashMap<ProgramId, Program>,
    processes: HashMap<ProcessId, Process>,
    next_process_id: i32,
    data_hash: u64,
}

impl Registry {
    /// Build a registry from externally-loaded definitions
    ///
    /// Validates referential integrity: clusters may only reference declared
    /// nodes, programs only declared clusters, and cluster names must be
    /// unique. Offending items are skipped and reported; the rest loads.
    pub fn load(
        nodes: Vec<Node>,
        clusters: Vec<Cluster>,
        programs: Vec<Program>,
    ) -> (Registry, LoadReport) {
        let mut registry = Registry::default();
        let mut report = LoadReport::default();

        for node in nodes {
            if registry.nodes.contains_key(&node.id) {
                report
                    .failures
                    .push(LoadError::DuplicateNode(node.id.to_string()));
                continue;
            }
            registry.nodes.insert(node.id.clone(), node);
        }

        for cluster in clusters {
            if let Err(e) = registry.validate_cluster(&cluster) {
                report.failures.push(e);
                continue;
            }
            registry.clusters.insert(cluster.id.clone(), cluster);
        }

        for program in programs {
            if let Err(e) = registry.validate_program(&program) {
                report.failures.push(e);
                continue;
            }
            registry.programs.insert(program.id.clone(), program);
        }

        registry.data_hash = registry.compute_data_hash();
        (registry, report)
    }

    fn validate_cluster(&self, cluster: &Cluster) -> Result<(), LoadError> {
        if self.clusters.contains_key(&cluster.id) {
            return Err(LoadError::DuplicateCluster(cluster.id.to_string()));
        }
        if self.clusters.values().any(|c| c.name == cluster.name) {
            return Err(LoadError::DuplicateClusterName(cluster.name.clone()));
        }
        for node_id in &cluster.nodes {
            if !self.nodes.contains_key(node_id) {
                return Err(LoadError::UnknownNode {
                    cluster: cluster.id.to_string(),
                    node: node_id.to_string(),
                });
            }
        }
        Ok(())
    }

    fn validate_program(&self, program: &Program) -> Result<(), LoadError> {
        if self.programs.contains_key(&program.id) {
            return Err(LoadError::DuplicateProgram(program.id.to_string()));
        }
        if program.clusters.is_empty() {
            return Err(LoadError::NoClusters(program.id.to_string()));
        }
        if program.tags.iter().any(String::is_empty) {
            return Err(LoadError::EmptyTag(program.id.to_string()));
        }
        for cluster in &program.clusters {
            if !self.clusters.contains_key(&cluster.id) {
                return Err(LoadError::UnknownCluster {
                    program: program.id.to_string(),
                    cluster: cluster.id.to_string(),
                });
            }
        }
        Ok(())
    }

    pub fn find_node(&self, id: &NodeId) -> Option<&Node> {
        self.nodes.get(id)
    }

    pub fn find_cluster(&self, id: &ClusterId) -> Option<&Cluster> {
        self.clusters.get(id)
    }

    pub fn find_program(&self, id: &ProgramId) -> Option<&Program> {
        self.programs.get(id)
    }

    pub fn find_process(&self, id: ProcessId) -> Option<&Process> {
        self.processes.get(&id)
    }

    pub fn find_process_mut(&mut self, id: ProcessId) -> Option<&mut Process> {
        self.processes.get_mut(&id)
    }

    /// The configuration of a program, by id
    pub fn find_configuration(
        &self,
        program: &ProgramId,
        configuration: &ConfigurationId,
    ) -> Option<&crate::model::Configuration> {
        self.programs
            .get(program)?
            .configurations
            .iter()
            .find(|c| &c.id == configuration)
    }

    /// All clusters that contain the given node, sorted by id
    pub fn clusters_for_node(&self, node: &NodeId) -> Vec<&Cluster> {
        let mut clusters: Vec<_> = self
            .clusters
            .values()
            .filter(|c| c.nodes.contains(node))
            .collect();
        clusters.sort_by(|a, b| a.id.cmp(&b.id));
        clusters
    }

    /// Nodes sorted by id
    pub fn nodes(&self) -> Vec<&Node> {
        let mut nodes: Vec<_> = self.nodes.values().collect();
        nodes.sort_by(|a, b| a.id.cmp(&b.id));
        nodes
    }

    /// Clusters sorted by id
    pub fn clusters(&self) -> Vec<&Cluster> {
        let mut clusters: Vec<_> = self.clusters.values().collect();
        clusters.sort_by(|a, b| a.id.cmp(&b.id));
        clusters
    }

    /// Programs sorted by id
    pub fn programs(&self) -> Vec<&Program> {
        let mut programs: Vec<_> = self.programs.values().collect();
        programs.sort_by(|a, b| a.id.cmp(&b.id));
        programs
    }

    /// Live processes sorted by id
    pub fn processes(&self) -> Vec<&Process> {
        let mut processes: Vec<_> = self.processes.values().collect();
        processes.sort_by_key(|p| p.id);
        processes
    }

    /// Allocate the next process id; unique for the lifetime of the core
    pub fn allocate_process_id(&mut self) -> ProcessId {
        let id = ProcessId::new(self.next_process_id);
        self.next_process_id += 1;
        id
    }

    /// Make sure future ids start above `id`; used when adopting processes
    /// reported by a tray after a core restart
    pub fn bump_next_process_id(&mut self, id: i32) {
        self.next_process_id = self.next_process_id.max(id + 1);
    }

    pub fn add_process(&mut self, process: Process) {
        self.processes.insert(process.id, process);
    }

    pub fn remove_process(&mut self, id: ProcessId) -> Option<Process> {
        self.processes.remove(&id)
    }

    /// Update a node's live connectivity; returns true if it changed
    pub fn set_node_connected(&mut self, id: &NodeId, connected: bool) -> bool {
        match self.nodes.get_mut(id) {
            Some(node) if node.connected != connected => {
                node.connected = connected;
                true
            }
            _ => false,
        }
    }

    /// Content hash over all static entity fields, recomputed once per load
    pub fn data_hash(&self) -> u64 {
        self.data_hash
    }

    fn compute_data_hash(&self) -> u64 {
        let mut hash = DataHash::default();

        for cluster in self.clusters() {
            hash.add_str(cluster.id.as_str());
            hash.add_str(&cluster.name);
            hash.add_bool(cluster.enabled);
            for node_id in &cluster.nodes {
                hash.add_str(node_id.as_str());
            }
        }

        for node in self.nodes() {
            hash.add_str(node.id.as_str());
            hash.add_str(&node.name);
            hash.add_str(&node.address);
            hash.add_bytes(&node.port.to_le_bytes());
            hash.add_str(node.secret.as_deref().unwrap_or(""));
        }

        for program in self.programs() {
            hash.add_str(program.id.as_str());
            hash.add_str(&program.name);
            hash.add_str(&program.executable);
            hash.add_str(&program.commandline_parameters);
            hash.add_str(&program.working_directory);
            hash.add_bool(program.enabled);
            for tag in &program.tags {
                hash.add_str(tag);
            }
            for configuration in &program.configurations {
                hash.add_str(configuration.id.as_str());
                hash.add_str(&configuration.name);
                hash.add_str(&configuration.parameters);
            }
            for cluster in &program.clusters {
                hash.add_str(cluster.id.as_str());
                hash.add_str(&cluster.parameters);
            }
        }

        hash.finish()
    }
}

/// Order-stable field combiner, based on boost::hash_combine (golden ratio
/// mixing). Not commutative: swapping two fields changes the result.
#[derive(Default)]
struct DataHash {
    hash: u64,
}

impl DataHash {
    const GOLDEN_RATIO: u64 = 0x9e37_79b9;

    fn add(&mut self, rhs: u64) {
        self.hash ^= rhs
            .wrapping_add(Self::GOLDEN_RATIO)
            .wrapping_add(self.hash << 6)
            .wrapping_add(self.hash >> 2);
    }

    fn add_bytes(&mut self, bytes: &[u8]) {
        // First 8 bytes of SHA-256, so field hashes are stable across core
        // instances (unlike the std hasher)
        let digest = Sha256::digest(bytes);
        let mut word = [0u8; 8];
        word.copy_from_slice(&digest[..8]);
        self.add(u64::from_le_bytes(word));
    }

    fn add_str(&mut self, s: &str) {
        self.add_bytes(s.as_bytes());
    }

    fn add_bool(&mut self, b: bool) {
        self.add_bytes(&[b as u8]);
    }

    fn finish(self) -> u64 {
        self.hash
    }
}
