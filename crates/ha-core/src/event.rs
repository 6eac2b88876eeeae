//! Events delivered by the hub's event stream

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{Context, DynValue, EntityId, EntityState};

/// Event type of state change events
pub const STATE_CHANGED: &str = "state_changed";

/// Event type of service call notifications
pub const CALL_SERVICE: &str = "call_service";

/// Event type identifier
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct EventType(String);

impl EventType {
    pub fn new(event_type: impl Into<String>) -> Self {
        Self(event_type.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Special event type that matches all events
    pub fn match_all() -> Self {
        Self("*".to_string())
    }

    pub fn is_match_all(&self) -> bool {
        self.0 == "*"
    }
}

impl From<&str> for EventType {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

impl From<String> for EventType {
    fn from(s: String) -> Self {
        Self::new(s)
    }
}

impl std::fmt::Display for EventType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// An entity moved from one snapshot to another
///
/// `old_state` is absent the first time the hub reports an entity;
/// `new_state` is absent when the entity was removed.
#[derive(Debug, Clone)]
pub struct StateChange {
    pub entity_id: EntityId,
    pub new_state: Option<Arc<EntityState>>,
    pub old_state: Option<Arc<EntityState>>,
    pub context: Context,
}

/// Any other event fired on the hub
#[derive(Debug, Clone)]
pub struct CustomEvent {
    pub event_type: EventType,
    pub data: DynValue,
    pub time_fired: DateTime<Utc>,
    pub context: Context,
}

impl CustomEvent {
    pub fn new(event_type: impl Into<EventType>, data: impl Into<DynValue>, context: Context) -> Self {
        Self {
            event_type: event_type.into(),
            data: data.into(),
            time_fired: Utc::now(),
            context,
        }
    }
}

/// One item of the hub's event stream
#[derive(Debug, Clone)]
pub enum HubEvent {
    StateChanged(StateChange),
    Custom(CustomEvent),
}

impl HubEvent {
    pub fn event_type(&self) -> &str {
        match self {
            HubEvent::StateChanged(_) => STATE_CHANGED,
            HubEvent::Custom(event) => event.event_type.as_str(),
        }
    }

    pub fn context(&self) -> &Context {
        match self {
            HubEvent::StateChanged(change) => &change.context,
            HubEvent::Custom(event) => &event.context,
        }
    }
}
