//! Single-process simulation of a formation.
//!
//! A [`Simulation`] wires several [`ClusterNode`]s to one in-memory broadcast
//! hub and one simulated SQL Server fleet, then replays queued broadcast
//! deliveries round-robin until nothing is pending. It drives the
//! `sqlha-sim` binary and the integration tests.

use crate::config::NodeConfig;
use crate::error::{ClusterError, ClusterResult};
use crate::event::{ClusterEvent, Evaluation, NodePhase, Notification};
use crate::node::{ClusterNode, NodeContext};
use crate::state::{MemoryStateStore, StateStore};
use sqlha_core::broadcast::{Delivery, MemoryBroadcastHub};
use sqlha_core::testing::MockSqlServer;
use sqlha_core::{MemoryResolver, NodeName, UnitId};
use std::collections::BTreeMap;
use std::sync::Arc;

/// Application name used for simulated unit identifiers.
const APPLICATION: &str = "mssql";

/// Settings shared by every simulated node.
#[derive(Debug, Clone)]
pub struct SimulationConfig {
    /// Availability group name.
    pub group_name: String,
    /// Ready nodes required before the group is created.
    pub quorum: usize,
}

impl Default for SimulationConfig {
    fn default() -> Self {
        let defaults = NodeConfig::default();
        Self {
            group_name: defaults.group_name,
            quorum: defaults.quorum,
        }
    }
}

/// Summary of one [`Simulation::run_until_quiescent`] call.
#[derive(Debug, Clone, Default)]
pub struct RunReport {
    /// Delivery rounds taken.
    pub rounds: usize,
    /// Events handled.
    pub events: usize,
    /// Failed evaluations, in order, as `(unit, error message)`.
    pub failures: Vec<(UnitId, String)>,
}

struct SimulatedUnit {
    ctx: NodeContext,
    node: ClusterNode,
}

/// Several nodes sharing a broadcast hub and a database fleet.
pub struct Simulation {
    config: SimulationConfig,
    hub: MemoryBroadcastHub,
    fleet: MockSqlServer,
    resolver: Arc<MemoryResolver>,
    units: BTreeMap<UnitId, SimulatedUnit>,
    next_index: usize,
}

impl Simulation {
    /// Create an empty simulation.
    pub fn new(config: SimulationConfig) -> Self {
        Self {
            config,
            hub: MemoryBroadcastHub::new(),
            fleet: MockSqlServer::new(),
            resolver: Arc::new(MemoryResolver::new()),
            units: BTreeMap::new(),
            next_index: 0,
        }
    }

    /// Add a node with in-memory state.
    pub fn add_node(&mut self) -> ClusterResult<UnitId> {
        self.add_node_with_store(Arc::new(MemoryStateStore::new()))
    }

    /// Add a node persisting to `store`.
    ///
    /// Node `i` (from zero) is unit `mssql/i`, named `n{i+1}` at `10.0.0.{i+1}`.
    pub fn add_node_with_store(&mut self, store: Arc<dyn StateStore>) -> ClusterResult<UnitId> {
        let index = self.next_index;
        let unit = UnitId::new(format!("{APPLICATION}/{index}"));
        let name = NodeName::new(format!("n{}", index + 1));
        let address = format!("10.0.0.{}", index + 1);

        let config = NodeConfig::builder()
            .node_name(name.clone())
            .bind_address(address.clone())
            .group_name(self.config.group_name.clone())
            .quorum(self.config.quorum)
            .build()
            .map_err(ClusterError::Config)?;

        self.fleet.add_node(name, address);
        let ctx = NodeContext {
            broadcast: Arc::new(self.hub.join(unit.clone())),
            connector: Arc::new(self.fleet.clone()),
            resolver: self.resolver.clone(),
            store,
        };
        let node = ClusterNode::load(config, ctx.clone())?;
        self.units.insert(unit.clone(), SimulatedUnit { ctx, node });
        self.next_index += 1;
        Ok(unit)
    }

    /// Designate the leader.
    pub fn elect(&self, unit: &UnitId) -> ClusterResult<()> {
        Ok(self.hub.set_leader(unit)?)
    }

    /// Rebuild a node from its persisted state, as after a process restart.
    pub fn restart(&mut self, unit: &UnitId) -> ClusterResult<()> {
        let slot = self
            .units
            .get_mut(unit)
            .ok_or_else(|| ClusterError::State(format!("unknown unit {unit}")))?;
        let config = slot.node.config().clone();
        slot.node = ClusterNode::load(config, slot.ctx.clone())?;
        Ok(())
    }

    /// Handle one event on one node.
    ///
    /// When the administrator password first becomes visible to a node whose
    /// instance is not set up, the instance is started with it and the node
    /// is sent [`ClusterEvent::UnitInitialized`].
    pub async fn deliver(&mut self, unit: &UnitId, event: ClusterEvent) -> ClusterResult<Evaluation> {
        let fleet = self.fleet.clone();
        let slot = self
            .units
            .get_mut(unit)
            .ok_or_else(|| ClusterError::State(format!("unknown unit {unit}")))?;
        let node = &mut slot.node;

        let eval = node.handle(event).await?;
        if eval.has(&Notification::SaPasswordReady) && !node.state().initialized {
            if let Some(password) = node.sa_password() {
                tracing::info!(node = %node.name(), "Starting database instance");
                fleet.start(node.name().as_str(), &password);
                return node.handle(ClusterEvent::UnitInitialized).await;
            }
        }
        Ok(eval)
    }

    /// Force a re-evaluation of one node, as an operator retry would.
    pub async fn poke(&mut self, unit: &UnitId) -> ClusterResult<Evaluation> {
        self.deliver(unit, ClusterEvent::Changed(None)).await
    }

    /// Replay deliveries until none are pending.
    ///
    /// Each round hands at most one delivery to every unit. A peer joining is
    /// followed by a change event for that peer, so the newcomer's existing
    /// data is read. Failed evaluations are logged and reported, not retried.
    pub async fn run_until_quiescent(&mut self, max_rounds: usize) -> ClusterResult<RunReport> {
        let mut report = RunReport::default();
        while !self.hub.is_quiescent() {
            if report.rounds == max_rounds {
                return Err(ClusterError::State(format!(
                    "simulation did not settle after {max_rounds} rounds"
                )));
            }
            report.rounds += 1;

            for unit in self.hub.units() {
                let Some(delivery) = self.hub.next_delivery(&unit) else {
                    continue;
                };
                let mut events = vec![ClusterEvent::from(delivery.clone())];
                if let Delivery::PeerJoined(peer) = delivery {
                    events.push(ClusterEvent::Changed(Some(peer)));
                }
                for event in events {
                    report.events += 1;
                    if let Err(e) = self.deliver(&unit, event).await {
                        tracing::warn!(unit = %unit, error = %e, "Simulated evaluation failed");
                        report.failures.push((unit.clone(), e.to_string()));
                    }
                }
            }
        }
        tracing::debug!(rounds = report.rounds, events = report.events, "Simulation settled");
        Ok(report)
    }

    /// The broadcast hub.
    pub fn hub(&self) -> &MemoryBroadcastHub {
        &self.hub
    }

    /// The simulated database fleet.
    pub fn fleet(&self) -> &MockSqlServer {
        &self.fleet
    }

    /// The shared name resolver.
    pub fn resolver(&self) -> &MemoryResolver {
        &self.resolver
    }

    /// All unit identifiers.
    pub fn units(&self) -> Vec<UnitId> {
        self.units.keys().cloned().collect()
    }

    /// A node by unit.
    pub fn node(&self, unit: &UnitId) -> Option<&ClusterNode> {
        self.units.get(unit).map(|slot| &slot.node)
    }

    /// Phase of every node, keyed by node name.
    pub fn phases(&self) -> BTreeMap<NodeName, NodePhase> {
        self.units
            .values()
            .map(|slot| (slot.node.name().clone(), slot.node.phase()))
            .collect()
    }
}
