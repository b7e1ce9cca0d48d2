//! Availability-group formation.
//!
//! Once the shared certificate is advertised, every evaluation runs:
//!
//! 1. Replication-channel gate: install the certificate and create the
//!    mirroring endpoint, each at most once.
//! 2. Advertise `ready_to_cluster`.
//! 3. Resolve the role. The primary creates the group once a quorum of nodes
//!    is ready, then adds late joiners. Secondaries join once the primary
//!    lists them, then copy logins.
//!
//! Every step re-checks its guard, so an evaluation aborted by a database
//! failure resumes on the next event.

use crate::error::ClusterResult;
use crate::event::{Evaluation, Notification, WaitReason};
use crate::logins::sync_logins;
use crate::node::ClusterNode;
use crate::secrets::CertificateBundle;
use sqlha_core::broadcast::keys;
use sqlha_core::db::{DatabaseOperations, ReplicaNode};
use sqlha_core::NodeName;
use std::collections::BTreeSet;
use std::sync::Arc;

impl ClusterNode {
    /// Run formation for this node against the advertised certificate.
    pub async fn configure_cluster_node(
        &mut self,
        bundle: &CertificateBundle,
        eval: &mut Evaluation,
    ) -> ClusterResult<()> {
        if !self.prepare_replication_channel(bundle, eval).await? {
            return Ok(());
        }

        // Self was recorded with its address on initialization.
        let me = self.config.node_name.clone();
        self.state.registry.mark_ready(&me);
        self.persist()?;
        self.ctx
            .broadcast
            .set_local(keys::READY_TO_CLUSTER, keys::TRUE)?;

        if self.is_primary_replica().await? {
            self.configure_primary_replica(eval).await
        } else {
            self.configure_secondary_replica(eval).await
        }
    }

    /// Install the certificate and create the mirroring endpoint.
    ///
    /// Returns `false` when the node cannot pass the gate yet.
    async fn prepare_replication_channel(
        &mut self,
        bundle: &CertificateBundle,
        eval: &mut Evaluation,
    ) -> ClusterResult<bool> {
        if !self.state.initialized {
            tracing::info!(node = %self.config.node_name, "Waiting for local initialization");
            eval.wait(WaitReason::NotInitialized);
            return Ok(false);
        }

        self.install_master_certificate(bundle).await?;

        if !self.state.mirroring_endpoint_ready {
            self.local_db().await?.create_endpoint().await?;
            self.state.mirroring_endpoint_ready = true;
            self.persist()?;
        }
        Ok(true)
    }

    async fn configure_primary_replica(&mut self, eval: &mut Evaluation) -> ClusterResult<()> {
        if !self.is_group_ready() {
            return self.create_group(eval).await;
        }

        let replicas: BTreeSet<NodeName> = self.ag_replicas().await?.into_iter().collect();
        let new_nodes: Vec<ReplicaNode> = self
            .state
            .registry
            .ready_nodes()
            .into_iter()
            .filter(|node| !replicas.contains(&node.name))
            .collect();
        if new_nodes.is_empty() {
            return Ok(());
        }

        self.local_db()
            .await?
            .add_replicas(&self.config.group_name, &new_nodes)
            .await?;
        self.write_nonce()?;

        let names: Vec<NodeName> = new_nodes.into_iter().map(|n| n.name).collect();
        tracing::info!(group = %self.config.group_name, added = ?names, "Added replicas");
        eval.notify(Notification::ReplicasAdded(names));
        Ok(())
    }

    async fn create_group(&mut self, eval: &mut Evaluation) -> ClusterResult<()> {
        if self.state.availability_group_joined {
            tracing::info!(group = %self.config.group_name, "Availability group already configured");
            return Ok(());
        }

        let ready = self.state.registry.ready_nodes();
        if ready.len() < self.config.quorum {
            tracing::warn!(
                ready = ready.len(),
                required = self.config.quorum,
                "Not enough ready nodes to create the availability group"
            );
            eval.wait(WaitReason::Quorum {
                ready: ready.len(),
                required: self.config.quorum,
            });
            return Ok(());
        }

        self.local_db()
            .await?
            .create_group(&self.config.group_name, &ready)
            .await?;
        self.ctx.broadcast.set_group(&[(keys::AG_READY, keys::TRUE)])?;
        self.mark_self_clustered()?;
        self.write_nonce()?;

        let names: Vec<NodeName> = ready.into_iter().map(|n| n.name).collect();
        tracing::info!(group = %self.config.group_name, replicas = ?names, "Created availability group");
        eval.notify(Notification::GroupCreated(names));
        Ok(())
    }

    async fn configure_secondary_replica(&mut self, eval: &mut Evaluation) -> ClusterResult<()> {
        if !self.is_group_ready() {
            eval.wait(WaitReason::GroupNotReady);
            return Ok(());
        }
        let Some(primary) = self.ag_primary_replica().await? else {
            eval.wait(WaitReason::PrimaryUnknown);
            return Ok(());
        };

        let primary_db = self.peer_db(&primary).await?;
        let replicas = primary_db.replicas(&self.config.group_name).await?;
        if !replicas.contains(&self.config.node_name) {
            tracing::info!(primary = %primary, "Primary has not listed this node yet");
            eval.wait(WaitReason::NotListed { primary });
            return Ok(());
        }

        self.join_existing_group(eval).await?;

        let local_db = self.local_db().await?;
        let synced = sync_logins(primary_db.as_ref(), local_db.as_ref()).await?;
        if !synced.is_empty() {
            eval.notify(Notification::LoginsSynced(synced));
        }
        Ok(())
    }

    async fn join_existing_group(&mut self, eval: &mut Evaluation) -> ClusterResult<()> {
        if self.state.availability_group_joined {
            tracing::debug!(group = %self.config.group_name, "Availability group already joined");
            return Ok(());
        }
        self.local_db()
            .await?
            .join_group(&self.config.group_name)
            .await?;
        self.mark_self_clustered()?;
        tracing::info!(group = %self.config.group_name, "Joined availability group");
        eval.notify(Notification::JoinedGroup);
        Ok(())
    }

    fn mark_self_clustered(&mut self) -> ClusterResult<()> {
        let me = self.config.node_name.clone();
        self.state.registry.mark_clustered(&me);
        self.ctx.broadcast.set_local(keys::CLUSTERED, keys::TRUE)?;
        self.state.availability_group_joined = true;
        self.persist()
    }

    /// The member instance to ask about topology: this node once joined,
    /// otherwise an already clustered peer.
    async fn topology_source(&self) -> ClusterResult<Option<Arc<dyn DatabaseOperations>>> {
        if self.state.availability_group_joined {
            return Ok(Some(self.local_db().await?));
        }
        let peer = self
            .state
            .registry
            .clustered_nodes()
            .into_iter()
            .rfind(|node| node.name != self.config.node_name);
        match peer {
            Some(peer) => Ok(Some(self.peer_db(&peer.name).await?)),
            None => Ok(None),
        }
    }

    /// The group's primary replica, if the group exists and a member can
    /// report it.
    pub async fn ag_primary_replica(&self) -> ClusterResult<Option<NodeName>> {
        if !self.is_group_ready() {
            return Ok(None);
        }
        match self.topology_source().await? {
            Some(db) => Ok(db.primary_replica(&self.config.group_name).await?),
            None => Ok(None),
        }
    }

    /// The group's replicas, empty if the group does not exist or no member
    /// can report them.
    pub async fn ag_replicas(&self) -> ClusterResult<Vec<NodeName>> {
        if !self.is_group_ready() {
            return Ok(Vec::new());
        }
        match self.topology_source().await? {
            Some(db) => Ok(db.replicas(&self.config.group_name).await?),
            None => Ok(Vec::new()),
        }
    }

    /// Whether this node should act as primary.
    ///
    /// With a known primary this is name equality; before the group exists
    /// the leader acts as primary. A formed group whose primary no member
    /// can report has no primary here.
    pub async fn is_primary_replica(&self) -> ClusterResult<bool> {
        match self.ag_primary_replica().await? {
            Some(primary) => Ok(primary == self.config.node_name),
            None if self.is_group_ready() => Ok(false),
            None => Ok(self.ctx.broadcast.is_leader()),
        }
    }
}
