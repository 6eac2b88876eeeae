//! Boundary to the home-automation hub
//!
//! The rules engine only talks to the hub through [`HubClient`]: subscribe
//! to the event stream, read current states, call services, write states
//! and fire events. The transport behind it (websocket, authentication,
//! reconnects) lives outside this workspace; [`LocalHub`] implements the
//! trait in-process on top of the event bus, state store and service
//! registry crates.

mod local;

use async_trait::async_trait;
use futures::stream::BoxStream;
use ha_core::{Attributes, Context, DynValue, EntityId, EntityState, HubEvent, ServiceCall};
use ha_service_registry::ServiceError;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::watch;

pub use local::LocalHub;

/// The hub's event stream; it ends when the connection goes away
pub type HubEventStream = BoxStream<'static, HubEvent>;

/// Result type for hub requests
pub type HubResult<T> = Result<T, HubError>;

/// Errors surfaced by hub requests
#[derive(Debug, Clone, Error)]
pub enum HubError {
    #[error("not connected to the hub")]
    NotConnected,

    #[error("unknown entity: {0}")]
    UnknownEntity(String),

    #[error(transparent)]
    Service(#[from] ServiceError),

    #[error("hub request failed: {0}")]
    Request(String),
}

/// Connection lifecycle as reported by the transport
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Connecting,
    Connected,
    Disconnected,
}

/// Everything the rules engine consumes from the hub
#[async_trait]
pub trait HubClient: Send + Sync {
    /// Subscribe to state changes and custom events
    async fn subscribe_events(&self) -> HubResult<HubEventStream>;

    /// Current snapshot of one entity
    async fn get_state(&self, entity_id: &EntityId) -> HubResult<Option<Arc<EntityState>>>;

    /// Current snapshot of every entity
    async fn get_all_states(&self) -> HubResult<Vec<Arc<EntityState>>>;

    /// Call `domain.service`; completes when the hub acknowledged the call
    async fn call_service(&self, call: ServiceCall) -> HubResult<()>;

    /// Write an entity's state directly, bypassing services
    async fn set_state(
        &self,
        entity_id: &EntityId,
        state: DynValue,
        attributes: Attributes,
        context: Context,
    ) -> HubResult<Arc<EntityState>>;

    /// Fire a custom event on the hub's bus
    async fn fire_event(&self, event_type: &str, data: DynValue, context: Context) -> HubResult<()>;

    /// Watch the connection lifecycle
    fn connection(&self) -> watch::Receiver<ConnectionState>;

    fn is_connected(&self) -> bool {
        *self.connection().borrow() == ConnectionState::Connected
    }
}

/// Shared handle to a hub client
pub type SharedHub = Arc<dyn HubClient>;
