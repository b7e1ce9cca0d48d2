//! In-memory broadcast hub for tests and single-process simulation.
//!
//! The hub holds every unit's bag plus the group bag, and queues change
//! deliveries per unit so a driver can replay them as lifecycle events.
//! Writes that leave a value unchanged are not delivered, matching how a
//! real exchange suppresses no-op updates.

use super::traits::{Bag, BroadcastError, BroadcastResult, BroadcastStore};
use crate::types::UnitId;
use parking_lot::Mutex;
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::Arc;

/// A change a unit has not yet observed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Delivery {
    /// A new peer appeared.
    PeerJoined(UnitId),
    /// A peer rewrote its bag.
    PeerChanged(UnitId),
    /// The leader rewrote the group bag.
    GroupChanged,
    /// This unit became leader.
    LeaderElected,
}

#[derive(Default)]
struct UnitSlot {
    bag: Bag,
    inbox: VecDeque<Delivery>,
}

impl UnitSlot {
    fn deliver(&mut self, delivery: Delivery) {
        // Identical pending deliveries collapse; the reader re-reads state anyway.
        if !self.inbox.contains(&delivery) {
            self.inbox.push_back(delivery);
        }
    }
}

#[derive(Default)]
struct HubState {
    leader: Option<UnitId>,
    units: BTreeMap<UnitId, UnitSlot>,
    group: Bag,
    group_writes: HashMap<String, usize>,
}

impl HubState {
    fn notify_others(&mut self, writer: &UnitId, delivery: Delivery) {
        for (unit, slot) in self.units.iter_mut() {
            if unit != writer {
                slot.deliver(delivery.clone());
            }
        }
    }
}

/// Shared state behind every [`MemoryBroadcast`] handle.
#[derive(Clone, Default)]
pub struct MemoryBroadcastHub {
    inner: Arc<Mutex<HubState>>,
}

impl MemoryBroadcastHub {
    /// Create an empty hub.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a unit and return its handle.
    ///
    /// Existing units receive [`Delivery::PeerJoined`] for the newcomer, and
    /// the newcomer receives one for each existing unit. Joining twice returns
    /// a handle to the same bag.
    pub fn join(&self, unit: impl Into<UnitId>) -> MemoryBroadcast {
        let unit = unit.into();
        let mut state = self.inner.lock();
        if !state.units.contains_key(&unit) {
            let existing: Vec<UnitId> = state.units.keys().cloned().collect();
            for slot in state.units.values_mut() {
                slot.deliver(Delivery::PeerJoined(unit.clone()));
            }
            let mut slot = UnitSlot::default();
            for peer in existing {
                slot.deliver(Delivery::PeerJoined(peer));
            }
            state.units.insert(unit.clone(), slot);
            tracing::debug!(unit = %unit, "Unit joined broadcast hub");
        }
        MemoryBroadcast {
            unit,
            inner: Arc::clone(&self.inner),
        }
    }

    /// Designate the leader and notify it.
    pub fn set_leader(&self, unit: &UnitId) -> BroadcastResult<()> {
        let mut state = self.inner.lock();
        let slot = state
            .units
            .get_mut(unit)
            .ok_or_else(|| BroadcastError::UnknownUnit(unit.clone()))?;
        slot.deliver(Delivery::LeaderElected);
        state.leader = Some(unit.clone());
        tracing::info!(unit = %unit, "Leader designated");
        Ok(())
    }

    /// The current leader, if any.
    pub fn leader(&self) -> Option<UnitId> {
        self.inner.lock().leader.clone()
    }

    /// All units in join order of their identifiers.
    pub fn units(&self) -> Vec<UnitId> {
        self.inner.lock().units.keys().cloned().collect()
    }

    /// Take the oldest pending delivery for a unit.
    pub fn next_delivery(&self, unit: &UnitId) -> Option<Delivery> {
        self.inner
            .lock()
            .units
            .get_mut(unit)
            .and_then(|slot| slot.inbox.pop_front())
    }

    /// Whether no unit has pending deliveries.
    pub fn is_quiescent(&self) -> bool {
        self.inner
            .lock()
            .units
            .values()
            .all(|slot| slot.inbox.is_empty())
    }

    /// Snapshot the group bag.
    pub fn group_bag(&self) -> Bag {
        self.inner.lock().group.clone()
    }

    /// Snapshot a unit's bag.
    pub fn unit_bag(&self, unit: &UnitId) -> Bag {
        self.inner
            .lock()
            .units
            .get(unit)
            .map(|slot| slot.bag.clone())
            .unwrap_or_default()
    }

    /// How many times a group key has changed value.
    pub fn group_writes(&self, key: &str) -> usize {
        self.inner
            .lock()
            .group_writes
            .get(key)
            .copied()
            .unwrap_or(0)
    }
}

/// One unit's view of a [`MemoryBroadcastHub`].
#[derive(Clone)]
pub struct MemoryBroadcast {
    unit: UnitId,
    inner: Arc<Mutex<HubState>>,
}

impl BroadcastStore for MemoryBroadcast {
    fn unit(&self) -> &UnitId {
        &self.unit
    }

    fn is_leader(&self) -> bool {
        self.inner.lock().leader.as_ref() == Some(&self.unit)
    }

    fn local(&self, key: &str) -> Option<String> {
        self.inner
            .lock()
            .units
            .get(&self.unit)
            .and_then(|slot| slot.bag.get(key).cloned())
    }

    fn set_local(&self, key: &str, value: &str) -> BroadcastResult<()> {
        let mut state = self.inner.lock();
        let slot = state
            .units
            .get_mut(&self.unit)
            .ok_or_else(|| BroadcastError::UnknownUnit(self.unit.clone()))?;
        if slot.bag.get(key).map(String::as_str) == Some(value) {
            return Ok(());
        }
        slot.bag.insert(key.to_string(), value.to_string());
        let writer = self.unit.clone();
        state.notify_others(&writer, Delivery::PeerChanged(writer.clone()));
        Ok(())
    }

    fn peers(&self) -> Vec<UnitId> {
        self.inner
            .lock()
            .units
            .keys()
            .filter(|unit| **unit != self.unit)
            .cloned()
            .collect()
    }

    fn peer_bag(&self, unit: &UnitId) -> Bag {
        self.inner
            .lock()
            .units
            .get(unit)
            .map(|slot| slot.bag.clone())
            .unwrap_or_default()
    }

    fn group(&self, key: &str) -> Option<String> {
        self.inner.lock().group.get(key).cloned()
    }

    fn set_group(&self, entries: &[(&str, &str)]) -> BroadcastResult<()> {
        let mut state = self.inner.lock();
        if state.leader.as_ref() != Some(&self.unit) {
            return Err(BroadcastError::NotLeader(self.unit.clone()));
        }

        let mut changed = false;
        for (key, value) in entries {
            if state.group.get(*key).map(String::as_str) == Some(*value) {
                continue;
            }
            state.group.insert((*key).to_string(), (*value).to_string());
            *state.group_writes.entry((*key).to_string()).or_insert(0) += 1;
            changed = true;
        }

        if changed {
            state.notify_others(&self.unit, Delivery::GroupChanged);
        }
        Ok(())
    }
}
