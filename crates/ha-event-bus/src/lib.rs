//! Broadcast bus for hub events
//!
//! The [`EventBus`] is the in-process side of the hub's event stream. Both
//! state changes and custom events go through it; subscribers either follow
//! one event type or every event (MATCH_ALL).

use dashmap::DashMap;
use ha_core::{EventType, HubEvent};
use tokio::sync::broadcast;
use tracing::{debug, trace};

/// Default channel capacity for event subscriptions
pub const DEFAULT_CHANNEL_CAPACITY: usize = 1024;

/// Fan-out bus for [`HubEvent`]s
pub struct EventBus {
    /// Senders per event type
    listeners: DashMap<EventType, broadcast::Sender<HubEvent>>,
    /// Sender for MATCH_ALL subscribers
    match_all_sender: broadcast::Sender<HubEvent>,
    capacity: usize,
}

impl EventBus {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CHANNEL_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        let (match_all_sender, _) = broadcast::channel(capacity);
        Self {
            listeners: DashMap::new(),
            match_all_sender,
            capacity,
        }
    }

    /// Subscribe to one event type, or to everything with `"*"`
    pub fn subscribe(&self, event_type: impl Into<EventType>) -> broadcast::Receiver<HubEvent> {
        let event_type = event_type.into();
        trace!(event_type = %event_type, "Subscribing to event type");

        if event_type.is_match_all() {
            return self.match_all_sender.subscribe();
        }

        self.listeners
            .entry(event_type)
            .or_insert_with(|| broadcast::channel(self.capacity).0)
            .subscribe()
    }

    /// Subscribe to all events
    pub fn subscribe_all(&self) -> broadcast::Receiver<HubEvent> {
        self.match_all_sender.subscribe()
    }

    /// Deliver an event to its type's subscribers and to MATCH_ALL subscribers
    ///
    /// Returns how many receivers got the event.
    pub fn fire(&self, event: HubEvent) -> usize {
        debug!(event_type = %event.event_type(), "Firing event");

        // A send error only means nobody is listening
        let typed = self
            .listeners
            .get(&EventType::new(event.event_type()))
            .and_then(|sender| sender.send(event.clone()).ok())
            .unwrap_or(0);

        typed + self.match_all_sender.send(event).unwrap_or(0)
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}
