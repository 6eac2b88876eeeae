//! Entity state storage
//!
//! The [`EntityStateStore`] holds the last known snapshot of every entity.
//! Snapshots are immutable and shared as `Arc<EntityState>`; an update swaps
//! the whole `Arc` under the map's shard lock, so a concurrent reader sees
//! either the previous snapshot or the new one, never a mix.

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use ha_core::{Attributes, DynValue, EntityId, EntityState};
use std::sync::Arc;
use tracing::{debug, instrument, trace};

/// Outcome of writing a snapshot: the new one and the one it displaced
pub type StateSwap = (Arc<EntityState>, Option<Arc<EntityState>>);

/// The current state of every known entity
#[derive(Default)]
pub struct EntityStateStore {
    /// Snapshots keyed by entity id
    states: DashMap<String, Arc<EntityState>>,
}

impl EntityStateStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the snapshot of `state.entity_id` and return the previous one
    #[instrument(skip_all)]
    pub fn set(&self, state: impl Into<Arc<EntityState>>) -> Option<Arc<EntityState>> {
        let state = state.into();
        let entity_id = state.entity_id.clone();

        trace!(entity_id = %entity_id, state = %state.state, "Swapping entity state");
        self.states.insert(entity_id.to_string(), state)
    }

    /// Derive the next snapshot from the current one and swap it in
    ///
    /// `last_changed` is kept when the value is unchanged. The read and the
    /// write happen under one entry lock, so two concurrent updates of the
    /// same entity cannot both observe the same previous snapshot.
    #[instrument(skip(self, state, attributes), fields(entity_id = %entity_id))]
    pub fn update(
        &self,
        entity_id: &EntityId,
        state: impl Into<DynValue>,
        attributes: Attributes,
    ) -> StateSwap {
        match self.states.entry(entity_id.to_string()) {
            Entry::Occupied(mut entry) => {
                let next = Arc::new(entry.get().with_update(state, attributes));
                let previous = entry.insert(next.clone());
                debug!(
                    state = %next.state,
                    changed = previous.state != next.state,
                    "Updated entity state"
                );
                (next, Some(previous))
            }
            Entry::Vacant(entry) => {
                let next = Arc::new(EntityState::new(entity_id.clone(), state, attributes));
                entry.insert(next.clone());
                debug!(state = %next.state, "Created entity state");
                (next, None)
            }
        }
    }

    pub fn get(&self, entity_id: &str) -> Option<Arc<EntityState>> {
        self.states.get(entity_id).map(|s| s.value().clone())
    }

    /// Current value of an entity, if known
    pub fn get_state(&self, entity_id: &str) -> Option<DynValue> {
        self.states.get(entity_id).map(|s| s.state.clone())
    }

    pub fn contains(&self, entity_id: &str) -> bool {
        self.states.contains_key(entity_id)
    }

    /// Snapshot of every stored state
    pub fn all(&self) -> Vec<Arc<EntityState>> {
        self.states.iter().map(|r| r.value().clone()).collect()
    }

    /// Ids of the entities whose current snapshot satisfies `predicate`
    ///
    /// The result is a point-in-time selection sorted by id; entities that
    /// appear later are not included.
    pub fn select(&self, predicate: impl Fn(&EntityState) -> bool) -> Vec<EntityId> {
        let mut ids: Vec<EntityId> = self
            .states
            .iter()
            .filter(|r| predicate(r.value()))
            .map(|r| r.value().entity_id.clone())
            .collect();
        ids.sort();
        ids
    }

    /// Drop an entity and return its last snapshot
    #[instrument(skip(self), fields(entity_id = %entity_id))]
    pub fn remove(&self, entity_id: &EntityId) -> Option<Arc<EntityState>> {
        let removed = self.states.remove(entity_id.as_str()).map(|(_, s)| s);
        if removed.is_some() {
            trace!("Removed entity state");
        }
        removed
    }

    pub fn len(&self) -> usize {
        self.states.len()
    }

    pub fn is_empty(&self) -> bool {
        self.states.is_empty()
    }
}
