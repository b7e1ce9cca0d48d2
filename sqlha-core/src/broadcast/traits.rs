//! Broadcast store trait and error types.

use crate::types::UnitId;
use std::collections::BTreeMap;
use thiserror::Error;

/// A snapshot of one bag.
pub type Bag = BTreeMap<String, String>;

/// Errors raised by broadcast stores.
#[derive(Debug, Error)]
pub enum BroadcastError {
    /// A non-leader unit tried to write the group bag.
    #[error("Unit {0} is not the leader and cannot write group data")]
    NotLeader(UnitId),

    /// The unit is not known to the store.
    #[error("Unknown unit: {0}")]
    UnknownUnit(UnitId),

    /// The underlying exchange failed.
    #[error("Broadcast transport error: {0}")]
    Transport(String),
}

/// Result type for broadcast operations.
pub type BroadcastResult<T> = Result<T, BroadcastError>;

/// Key/value exchange between a unit, its peers, and the shared group bag.
///
/// Implementations must enforce single-writer discipline: a unit writes only
/// its own bag, and only the leader writes the group bag.
pub trait BroadcastStore: Send + Sync {
    /// The unit this handle writes as.
    fn unit(&self) -> &UnitId;

    /// Whether this unit is currently the designated leader.
    fn is_leader(&self) -> bool;

    /// Read a key from this unit's own bag.
    fn local(&self, key: &str) -> Option<String>;

    /// Write a key to this unit's own bag.
    fn set_local(&self, key: &str, value: &str) -> BroadcastResult<()>;

    /// Units currently visible as peers, excluding this one.
    fn peers(&self) -> Vec<UnitId>;

    /// Snapshot a peer's bag. Unknown peers read as empty.
    fn peer_bag(&self, unit: &UnitId) -> Bag;

    /// Read a key from the group bag.
    fn group(&self, key: &str) -> Option<String>;

    /// Write several group keys as one update.
    ///
    /// Fails with [`BroadcastError::NotLeader`] when called by a non-leader.
    fn set_group(&self, entries: &[(&str, &str)]) -> BroadcastResult<()>;
}
