//! Local view of peer readiness and membership.
//!
//! Records are created on first sighting and only ever promoted:
//! `ready_to_cluster` and `clustered` are never cleared, and `clustered`
//! implies `ready_to_cluster`.

use serde::{Deserialize, Serialize};
use sqlha_core::db::ReplicaNode;
use sqlha_core::{NameResolver, NodeName};
use std::collections::BTreeMap;

/// What this node knows about one peer (or itself).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeRecord {
    /// Replication endpoint address.
    pub address: String,
    /// Certificate installed and mirroring endpoint created.
    #[serde(default)]
    pub ready_to_cluster: bool,
    /// Member of the availability group.
    #[serde(default)]
    pub clustered: bool,
}

/// Peer records keyed by node name.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NodeRegistry {
    nodes: BTreeMap<NodeName, NodeRecord>,
}

impl NodeRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or update a peer record, merging flags monotonically.
    ///
    /// The name is registered with `resolver` when first seen or when its
    /// address changes. Resolver failures are logged and do not prevent the
    /// update. Returns whether the record changed.
    pub fn record_peer(
        &mut self,
        resolver: &dyn NameResolver,
        name: &NodeName,
        address: &str,
        ready_to_cluster: bool,
        clustered: bool,
    ) -> bool {
        let before = self.nodes.get(name).cloned();
        let record = self.nodes.entry(name.clone()).or_default();
        let moved = record.address != address;
        if moved {
            record.address = address.to_string();
        }
        record.ready_to_cluster |= ready_to_cluster || clustered;
        record.clustered |= clustered;

        if moved {
            if let Err(e) = resolver.register(address, name) {
                tracing::warn!(node = %name, address, error = %e, "Failed to register node address");
            }
        }

        let changed = before.as_ref() != Some(&*record);
        if changed {
            tracing::debug!(
                node = %name,
                address,
                ready = record.ready_to_cluster,
                clustered = record.clustered,
                "Recorded peer"
            );
        }
        changed
    }

    /// Promote an existing record to ready. Returns whether it changed.
    pub fn mark_ready(&mut self, name: &NodeName) -> bool {
        match self.nodes.get_mut(name) {
            Some(record) if !record.ready_to_cluster => {
                record.ready_to_cluster = true;
                true
            }
            _ => false,
        }
    }

    /// Promote an existing record to clustered. Returns whether it changed.
    pub fn mark_clustered(&mut self, name: &NodeName) -> bool {
        match self.nodes.get_mut(name) {
            Some(record) if !record.clustered => {
                record.ready_to_cluster = true;
                record.clustered = true;
                true
            }
            _ => false,
        }
    }

    /// Look up a record.
    pub fn get(&self, name: &str) -> Option<&NodeRecord> {
        self.nodes.get(name)
    }

    /// Whether a node has been seen.
    pub fn contains(&self, name: &str) -> bool {
        self.nodes.contains_key(name)
    }

    /// Nodes ready to be replicas, in name order.
    pub fn ready_nodes(&self) -> Vec<ReplicaNode> {
        self.select(|r| r.ready_to_cluster)
    }

    /// Nodes that are members of the group, in name order.
    pub fn clustered_nodes(&self) -> Vec<ReplicaNode> {
        self.select(|r| r.clustered)
    }

    fn select(&self, keep: impl Fn(&NodeRecord) -> bool) -> Vec<ReplicaNode> {
        self.nodes
            .iter()
            .filter(|(_, record)| keep(record))
            .map(|(name, record)| ReplicaNode::new(name.clone(), record.address.clone()))
            .collect()
    }

    /// Iterate over all records.
    pub fn iter(&self) -> impl Iterator<Item = (&NodeName, &NodeRecord)> {
        self.nodes.iter()
    }

    /// Number of known nodes.
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    /// Whether no nodes are known.
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }
}
