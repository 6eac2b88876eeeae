//! Entity state snapshots

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{DynValue, EntityId};

/// Attribute name → value mapping of a state
pub type Attributes = BTreeMap<String, DynValue>;

/// Snapshot of one entity at a point in time
///
/// Snapshots are never edited in place. An update produces a new value via
/// [`EntityState::with_update`] which replaces the previous snapshot in the
/// store as a whole.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EntityState {
    pub entity_id: EntityId,

    /// Current value ("on", 21.5, a structured payload, ...)
    pub state: DynValue,

    #[serde(default)]
    pub attributes: Attributes,

    /// When the state value last changed
    pub last_changed: DateTime<Utc>,

    /// When the snapshot was last written, even if the value stayed the same
    pub last_updated: DateTime<Utc>,
}

impl EntityState {
    /// Create a first snapshot stamped with the current time
    pub fn new(entity_id: EntityId, state: impl Into<DynValue>, attributes: Attributes) -> Self {
        let now = Utc::now();
        Self {
            entity_id,
            state: state.into(),
            attributes,
            last_changed: now,
            last_updated: now,
        }
    }

    /// Derive the next snapshot, keeping `last_changed` when the value is unchanged
    pub fn with_update(&self, state: impl Into<DynValue>, attributes: Attributes) -> Self {
        let now = Utc::now();
        let state = state.into();
        let last_changed = if state == self.state {
            self.last_changed
        } else {
            now
        };

        Self {
            entity_id: self.entity_id.clone(),
            state,
            attributes,
            last_changed,
            last_updated: now,
        }
    }

    pub fn domain(&self) -> &str {
        self.entity_id.domain()
    }

    /// Attribute lookup with the same null-propagation as [`DynValue::get`]
    pub fn attribute(&self, key: &str) -> &DynValue {
        static MISSING: DynValue = DynValue::Null;
        self.attributes.get(key).unwrap_or(&MISSING)
    }

    pub fn is_state(&self, value: impl Into<DynValue>) -> bool {
        self.state == value.into()
    }

    pub fn is_unavailable(&self) -> bool {
        self.state == "unavailable"
    }
}

impl PartialEq for EntityState {
    fn eq(&self, other: &Self) -> bool {
        // Timestamps are bookkeeping, not identity
        self.entity_id == other.entity_id
            && self.state == other.state
            && self.attributes == other.attributes
    }
}
