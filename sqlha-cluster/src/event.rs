//! Events a node reacts to and the report each evaluation produces.

use sqlha_core::broadcast::Delivery;
use sqlha_core::{NodeName, UnitId};

/// Something that may move the node forward.
///
/// Every event re-runs the full state machine from current broadcast and
/// local state, so events carry only what is needed for logging.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClusterEvent {
    /// This unit became the leader.
    LeaderElected,
    /// A peer unit appeared.
    PeerJoined(UnitId),
    /// Broadcast data changed: a peer bag when `Some`, the group bag when `None`.
    Changed(Option<UnitId>),
    /// The local database instance was set up with the shared password.
    UnitInitialized,
}

impl From<Delivery> for ClusterEvent {
    fn from(delivery: Delivery) -> Self {
        match delivery {
            Delivery::PeerJoined(unit) => Self::PeerJoined(unit),
            Delivery::PeerChanged(unit) => Self::Changed(Some(unit)),
            Delivery::GroupChanged => Self::Changed(None),
            Delivery::LeaderElected => Self::LeaderElected,
        }
    }
}

/// Where a node stands in formation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum NodePhase {
    /// Certificate or endpoint not yet in place.
    #[default]
    Uninitialized,
    /// Ready to be added to the group.
    ReadyToCluster,
    /// Member of the group.
    Clustered,
}

/// Why an evaluation stopped short without failing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WaitReason {
    /// The local instance has not been set up yet.
    NotInitialized,
    /// The leader has not advertised the administrator password.
    SaPasswordNotAdvertised,
    /// The leader has not advertised the certificate bundle.
    CertificateNotAdvertised,
    /// Too few ready nodes to create the group.
    Quorum {
        /// Nodes currently ready.
        ready: usize,
        /// Nodes required.
        required: usize,
    },
    /// The group has not been advertised as created.
    GroupNotReady,
    /// No reachable member could report the primary.
    PrimaryUnknown,
    /// The primary has not listed this node as a replica yet.
    NotListed {
        /// Primary that was asked.
        primary: NodeName,
    },
}

/// Progress the host process may want to act on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Notification {
    /// The administrator password is available; the local instance can be set up.
    SaPasswordReady,
    /// This node generated and advertised the shared certificate.
    CertificateAdvertised,
    /// This node created the group with these replicas.
    GroupCreated(Vec<NodeName>),
    /// This node joined the group.
    JoinedGroup,
    /// This node added replicas to the group.
    ReplicasAdded(Vec<NodeName>),
    /// Logins copied from the primary.
    LoginsSynced(Vec<String>),
}

/// Outcome of handling one event.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Evaluation {
    /// Phase after the evaluation.
    pub phase: NodePhase,
    /// Conditions that stopped progress.
    pub waiting: Vec<WaitReason>,
    /// Progress made.
    pub notifications: Vec<Notification>,
}

impl Evaluation {
    pub(crate) fn wait(&mut self, reason: WaitReason) {
        self.waiting.push(reason);
    }

    pub(crate) fn notify(&mut self, notification: Notification) {
        self.notifications.push(notification);
    }

    /// Whether a notification was raised.
    pub fn has(&self, notification: &Notification) -> bool {
        self.notifications.contains(notification)
    }

    /// Whether the evaluation waited on `reason`.
    pub fn is_waiting_on(&self, reason: &WaitReason) -> bool {
        self.waiting.contains(reason)
    }
}
