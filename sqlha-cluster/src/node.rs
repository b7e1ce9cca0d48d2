//! The per-node event handler.

use crate::config::NodeConfig;
use crate::error::{ClusterError, ClusterResult};
use crate::event::{ClusterEvent, Evaluation, NodePhase, Notification, WaitReason};
use crate::registry::NodeRegistry;
use crate::secrets::CertificateBundle;
use crate::state::{LocalState, StateStore};
use sqlha_core::broadcast::keys;
use sqlha_core::db::Credentials;
use sqlha_core::{BroadcastStore, DatabaseConnector, DatabaseOperations, NameResolver, NodeName};
use std::sync::Arc;

/// Shared collaborators a node runs against.
#[derive(Clone)]
pub struct NodeContext {
    /// Broadcast handle for this node's unit.
    pub broadcast: Arc<dyn BroadcastStore>,
    /// Opens database handles for this node and its peers.
    pub connector: Arc<dyn DatabaseConnector>,
    /// Makes peer names resolvable.
    pub resolver: Arc<dyn NameResolver>,
    /// Persists [`LocalState`].
    pub store: Arc<dyn StateStore>,
}

/// One database node taking part in formation.
///
/// Handlers take `&mut self`, so evaluations on a node never overlap.
pub struct ClusterNode {
    pub(crate) config: NodeConfig,
    pub(crate) ctx: NodeContext,
    pub(crate) state: LocalState,
    saved: LocalState,
}

impl ClusterNode {
    /// Load persisted state and create the node.
    pub fn load(config: NodeConfig, ctx: NodeContext) -> ClusterResult<Self> {
        config.validate().map_err(ClusterError::Config)?;
        let (state, saved) = match ctx.store.load()? {
            Some(state) => (state.clone(), state),
            None => (LocalState::default(), LocalState::default()),
        };
        tracing::info!(
            node = %config.node_name,
            unit = %ctx.broadcast.unit(),
            initialized = state.initialized,
            joined = state.availability_group_joined,
            peers = state.registry.len(),
            "Loaded cluster node"
        );
        Ok(Self {
            config,
            ctx,
            state,
            saved,
        })
    }

    /// Node configuration.
    pub fn config(&self) -> &NodeConfig {
        &self.config
    }

    /// This node's name.
    pub fn name(&self) -> &NodeName {
        &self.config.node_name
    }

    /// Current local state.
    pub fn state(&self) -> &LocalState {
        &self.state
    }

    /// Known peers.
    pub fn registry(&self) -> &NodeRegistry {
        &self.state.registry
    }

    /// Formation phase derived from local state.
    pub fn phase(&self) -> NodePhase {
        if self.state.availability_group_joined {
            NodePhase::Clustered
        } else if self
            .state
            .registry
            .get(self.config.node_name.as_str())
            .is_some_and(|r| r.ready_to_cluster)
        {
            NodePhase::ReadyToCluster
        } else {
            NodePhase::Uninitialized
        }
    }

    /// The advertised administrator password.
    pub fn sa_password(&self) -> Option<String> {
        self.ctx.broadcast.group(keys::SA_PASSWORD)
    }

    /// Whether the availability group has been advertised as created.
    pub fn is_group_ready(&self) -> bool {
        keys::is_true(self.ctx.broadcast.group(keys::AG_READY).as_deref())
    }

    /// Handle one event and report what happened.
    ///
    /// State reached before a failure is persisted, so a later event resumes
    /// from there.
    pub async fn handle(&mut self, event: ClusterEvent) -> ClusterResult<Evaluation> {
        tracing::debug!(node = %self.config.node_name, event = ?event, "Handling event");
        let mut eval = Evaluation::default();
        // Every evaluation starts from the peers' current bags.
        self.sync_peers();
        let result = match event {
            ClusterEvent::LeaderElected => self.on_leader_elected(&mut eval).await,
            ClusterEvent::PeerJoined(_) => self.on_peer_joined(),
            ClusterEvent::Changed(_) => self.on_changed(&mut eval).await,
            ClusterEvent::UnitInitialized => self.on_initialized(&mut eval).await,
        };
        let persisted = self.persist();
        if let Err(e) = &result {
            tracing::warn!(node = %self.config.node_name, error = %e, "Evaluation failed");
        }
        result?;
        persisted?;
        eval.phase = self.phase();
        Ok(eval)
    }

    async fn on_leader_elected(&mut self, eval: &mut Evaluation) -> ClusterResult<()> {
        self.ensure_sa_password()?;
        if self.sa_password().is_some() {
            eval.notify(Notification::SaPasswordReady);
        }
        if self.ensure_master_certificate().await? {
            eval.notify(Notification::CertificateAdvertised);
        }
        self.configure_if_certified(eval).await
    }

    fn on_peer_joined(&self) -> ClusterResult<()> {
        let me = &self.config.node_name;
        let Some(record) = self.state.registry.get(me.as_str()) else {
            return Ok(());
        };
        self.advertise_identity()?;
        if record.ready_to_cluster {
            self.ctx.broadcast.set_local(keys::READY_TO_CLUSTER, keys::TRUE)?;
        }
        if record.clustered {
            self.ctx.broadcast.set_local(keys::CLUSTERED, keys::TRUE)?;
        }
        Ok(())
    }

    async fn on_changed(&mut self, eval: &mut Evaluation) -> ClusterResult<()> {
        self.ensure_sa_password()?;
        if self.sa_password().is_some() {
            eval.notify(Notification::SaPasswordReady);
        } else {
            eval.wait(WaitReason::SaPasswordNotAdvertised);
        }
        self.configure_if_certified(eval).await
    }

    async fn on_initialized(&mut self, eval: &mut Evaluation) -> ClusterResult<()> {
        self.state.initialized = true;
        let me = self.config.node_name.clone();
        let address = self.config.bind_address.clone();
        self.state
            .registry
            .record_peer(self.ctx.resolver.as_ref(), &me, &address, false, false);
        self.advertise_identity()?;
        self.persist()?;
        tracing::info!(node = %me, "Local instance initialized");

        if self.ensure_master_certificate().await? {
            eval.notify(Notification::CertificateAdvertised);
        }
        self.configure_if_certified(eval).await
    }

    async fn configure_if_certified(&mut self, eval: &mut Evaluation) -> ClusterResult<()> {
        match CertificateBundle::from_group(self.ctx.broadcast.as_ref())? {
            Some(bundle) => self.configure_cluster_node(&bundle, eval).await,
            None => {
                eval.wait(WaitReason::CertificateNotAdvertised);
                Ok(())
            }
        }
    }

    /// Re-read every peer bag into the registry.
    fn sync_peers(&mut self) {
        let broadcast = Arc::clone(&self.ctx.broadcast);
        for unit in broadcast.peers() {
            let bag = broadcast.peer_bag(&unit);
            let (Some(name), Some(address)) = (bag.get(keys::NODE_NAME), bag.get(keys::NODE_ADDRESS))
            else {
                continue;
            };
            if name.is_empty() || address.is_empty() {
                continue;
            }
            self.state.registry.record_peer(
                self.ctx.resolver.as_ref(),
                &NodeName::new(name.as_str()),
                address,
                keys::is_true(bag.get(keys::READY_TO_CLUSTER).map(String::as_str)),
                keys::is_true(bag.get(keys::CLUSTERED).map(String::as_str)),
            );
        }
    }

    fn advertise_identity(&self) -> ClusterResult<()> {
        let broadcast = &self.ctx.broadcast;
        broadcast.set_local(keys::NODE_NAME, self.config.node_name.as_str())?;
        broadcast.set_local(keys::NODE_ADDRESS, &self.config.bind_address)?;
        Ok(())
    }

    /// Rewrite the nonce so peers re-evaluate.
    pub(crate) fn write_nonce(&self) -> ClusterResult<()> {
        let nonce = uuid::Uuid::new_v4().simple().to_string();
        self.ctx.broadcast.set_local(keys::NONCE, &nonce)?;
        Ok(())
    }

    fn credentials(&self) -> ClusterResult<Credentials> {
        let password = self
            .sa_password()
            .ok_or(ClusterError::MissingSecret(keys::SA_PASSWORD))?;
        Ok(Credentials::new(self.config.admin_login.clone(), password))
    }

    /// Connect to the local instance.
    pub(crate) async fn local_db(&self) -> ClusterResult<Arc<dyn DatabaseOperations>> {
        self.db_at(&self.config.bind_address).await
    }

    /// Connect to a peer by name, through its recorded address when known.
    pub(crate) async fn peer_db(&self, name: &NodeName) -> ClusterResult<Arc<dyn DatabaseOperations>> {
        if name == &self.config.node_name {
            return self.local_db().await;
        }
        let host = self
            .state
            .registry
            .get(name.as_str())
            .map(|r| r.address.clone())
            .unwrap_or_else(|| name.to_string());
        self.db_at(&host).await
    }

    async fn db_at(&self, host: &str) -> ClusterResult<Arc<dyn DatabaseOperations>> {
        let credentials = self.credentials()?;
        Ok(self.ctx.connector.connect(host, &credentials).await?)
    }

    /// Save state if it changed since the last save.
    pub(crate) fn persist(&mut self) -> ClusterResult<()> {
        if self.state != self.saved {
            self.ctx.store.save(&self.state)?;
            self.saved = self.state.clone();
        }
        Ok(())
    }
}
