//! Common test utilities for sqlha-cluster integration tests.

#![allow(dead_code)]

use sqlha_cluster::simulation::{RunReport, Simulation, SimulationConfig};
use sqlha_cluster::{ClusterNode, JsonStateStore, NodePhase};
use sqlha_core::UnitId;
use std::path::PathBuf;
use std::sync::Arc;
use tempfile::TempDir;

/// Availability group name used by every test cluster.
pub const GROUP: &str = "juju-ag";

/// Delivery rounds allowed before a test cluster is considered stuck.
pub const MAX_ROUNDS: usize = 200;

/// A simulated formation plus the directories backing it.
pub struct TestCluster {
    /// The simulation under test.
    pub sim: Simulation,
    /// Units in creation order.
    pub units: Vec<UnitId>,
    /// State directory for persistent clusters.
    temp_dir: Option<TempDir>,
}

impl TestCluster {
    /// A cluster of `node_count` nodes with the default quorum of three.
    pub fn new(node_count: usize) -> Self {
        Self::with_quorum(node_count, 3)
    }

    /// A cluster with an explicit quorum.
    pub fn with_quorum(node_count: usize, quorum: usize) -> Self {
        let mut cluster = Self::empty(quorum, None);
        for _ in 0..node_count {
            cluster.add_node();
        }
        cluster
    }

    /// A cluster whose nodes persist state as JSON files in a temp dir.
    pub fn persistent(node_count: usize) -> Self {
        let dir = TempDir::new().expect("temp dir");
        let mut cluster = Self::empty(3, Some(dir));
        for _ in 0..node_count {
            cluster.add_node();
        }
        cluster
    }

    fn empty(quorum: usize, temp_dir: Option<TempDir>) -> Self {
        let sim = Simulation::new(SimulationConfig {
            group_name: GROUP.to_string(),
            quorum,
        });
        Self {
            sim,
            units: Vec::new(),
            temp_dir,
        }
    }

    /// Add one node; persistent clusters give it its own state file.
    pub fn add_node(&mut self) -> UnitId {
        let unit = match self.temp_dir.as_ref() {
            Some(dir) => {
                let path = dir
                    .path()
                    .join(format!("node-{}", self.units.len()))
                    .join("formation-state.json");
                self.sim
                    .add_node_with_store(Arc::new(JsonStateStore::new(path)))
                    .expect("add node")
            }
            None => self.sim.add_node().expect("add node"),
        };
        self.units.push(unit.clone());
        unit
    }

    /// Path of a persistent node's state file.
    pub fn state_file(&self, index: usize) -> Option<PathBuf> {
        self.temp_dir.as_ref().map(|dir| {
            dir.path()
                .join(format!("node-{index}"))
                .join("formation-state.json")
        })
    }

    /// Elect the first unit and run until nothing is pending.
    pub async fn form(&mut self) -> RunReport {
        self.sim.elect(&self.units[0]).expect("elect");
        self.settle().await
    }

    /// Run until nothing is pending.
    pub async fn settle(&mut self) -> RunReport {
        self.sim
            .run_until_quiescent(MAX_ROUNDS)
            .await
            .expect("simulation settles")
    }

    /// Poke every unit, then settle. Failures from the pokes are ignored.
    pub async fn retry_all(&mut self) -> RunReport {
        for unit in self.units.clone() {
            let _ = self.sim.poke(&unit).await;
        }
        self.settle().await
    }

    /// Node by creation index.
    pub fn node(&self, index: usize) -> &ClusterNode {
        self.sim.node(&self.units[index]).expect("known unit")
    }

    /// Whether every node has joined the group.
    pub fn all_clustered(&self) -> bool {
        (0..self.units.len()).all(|i| self.node(i).phase() == NodePhase::Clustered)
    }
}

/// Sorted node names as plain strings.
pub fn names<T: ToString>(nodes: &[T]) -> Vec<String> {
    let mut names: Vec<String> = nodes.iter().map(ToString::to_string).collect();
    names.sort();
    names
}
