//! In-process hub
//!
//! [`LocalHub`] keeps entity states in an [`EntityStateStore`], publishes
//! every change on an [`EventBus`] and answers service calls through a
//! [`ServiceRegistry`]. Adding an entity registers the standard entity
//! services of its domain, which move the entity between on/off or the
//! media transport states the way a real hub integration would.

use async_trait::async_trait;
use futures::StreamExt;
use ha_core::domains::{self, SCRIPT_DOMAIN};
use ha_core::{
    Attributes, Context, CustomEvent, DynValue, EntityId, EntityState, HubEvent, ServiceCall,
    StateChange, ATTR_ENTITY_ID, CALL_SERVICE,
};
use ha_event_bus::EventBus;
use ha_service_registry::{ServiceError, ServiceRegistry, ServiceResult};
use ha_state_store::EntityStateStore;
use std::future::Future;
use std::sync::Arc;
use tokio::sync::{broadcast, watch};
use tracing::{debug, info, instrument, warn};

use crate::{ConnectionState, HubClient, HubError, HubEventStream, HubResult};

/// A hub living in the same process as the rules engine
pub struct LocalHub {
    bus: Arc<EventBus>,
    states: Arc<EntityStateStore>,
    services: Arc<ServiceRegistry>,
    connection: watch::Sender<ConnectionState>,
}

impl LocalHub {
    /// Create a connected hub with the default event buffer
    pub fn new() -> Self {
        Self::with_capacity(ha_event_bus::DEFAULT_CHANNEL_CAPACITY)
    }

    /// Create a connected hub whose event stream buffers `capacity` events
    pub fn with_capacity(capacity: usize) -> Self {
        let (connection, _) = watch::channel(ConnectionState::Connected);
        Self {
            bus: Arc::new(EventBus::with_capacity(capacity)),
            states: Arc::new(EntityStateStore::new()),
            services: Arc::new(ServiceRegistry::new()),
            connection,
        }
    }

    pub fn bus(&self) -> &Arc<EventBus> {
        &self.bus
    }

    pub fn states(&self) -> &Arc<EntityStateStore> {
        &self.states
    }

    pub fn services(&self) -> &Arc<ServiceRegistry> {
        &self.services
    }

    /// Add or update an entity and make sure its domain's services exist
    #[instrument(skip(self, state, attributes), fields(entity_id = %entity_id))]
    pub fn add_entity(
        &self,
        entity_id: EntityId,
        state: impl Into<DynValue>,
        attributes: Attributes,
    ) -> Arc<EntityState> {
        self.register_entity_services(entity_id.domain());
        write_state(&self.states, &self.bus, &entity_id, state.into(), attributes, Context::new())
    }

    /// Register a script, callable as the `script.<name>` service
    pub fn register_script<F, Fut>(&self, name: &str, handler: F)
    where
        F: Fn(ServiceCall) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ServiceResult> + Send + 'static,
    {
        self.services.register(SCRIPT_DOMAIN, name, handler);
    }

    /// Report the transport as connected again
    pub fn connect(&self) {
        info!("Hub connected");
        self.connection.send_replace(ConnectionState::Connected);
    }

    /// Report the transport as gone; open event streams end
    pub fn disconnect(&self) {
        info!("Hub disconnected");
        self.connection.send_replace(ConnectionState::Disconnected);
    }

    fn ensure_connected(&self) -> HubResult<()> {
        if *self.connection.borrow() == ConnectionState::Connected {
            Ok(())
        } else {
            Err(HubError::NotConnected)
        }
    }

    fn register_entity_services(&self, entity_domain: &str) {
        let Some(services) = domains::entity_services(entity_domain) else {
            return;
        };
        let service_domain = domains::service_domain(entity_domain).to_string();

        for service in services {
            if self.services.has_service(&service_domain, service) {
                continue;
            }
            let states = self.states.clone();
            let bus = self.bus.clone();
            self.services
                .register(service_domain.clone(), service, move |call: ServiceCall| {
                    let result = apply_entity_service(&states, &bus, &call);
                    async move { result }
                });
        }
    }
}

impl Default for LocalHub {
    fn default() -> Self {
        Self::new()
    }
}

/// Swap in the next snapshot and publish the change
fn write_state(
    states: &EntityStateStore,
    bus: &EventBus,
    entity_id: &EntityId,
    state: DynValue,
    attributes: Attributes,
    context: Context,
) -> Arc<EntityState> {
    let (new_state, old_state) = states.update(entity_id, state, attributes);
    bus.fire(HubEvent::StateChanged(StateChange {
        entity_id: entity_id.clone(),
        new_state: Some(new_state.clone()),
        old_state,
        context,
    }));
    new_state
}

/// The state an entity moves to when `service` is applied to it
fn next_state(service: &str, current: &DynValue) -> Option<&'static str> {
    match service {
        "turn_on" => Some("on"),
        "turn_off" => Some("off"),
        "toggle" if current == "on" => Some("off"),
        "toggle" => Some("on"),
        "media_play" => Some("playing"),
        "media_pause" => Some("paused"),
        "media_stop" => Some("idle"),
        "media_play_pause" if current == "playing" => Some("paused"),
        "media_play_pause" => Some("playing"),
        _ => None,
    }
}

fn apply_entity_service(
    states: &EntityStateStore,
    bus: &EventBus,
    call: &ServiceCall,
) -> ServiceResult {
    let targets = call.entity_ids();
    if targets.is_empty() {
        return Err(ServiceError::InvalidData(format!(
            "{} requires an entity_id",
            call.service_id()
        )));
    }

    for target in targets {
        let current = states
            .get(&target)
            .ok_or_else(|| ServiceError::InvalidData(format!("unknown entity {target}")))?;
        let next = next_state(&call.service, &current.state).ok_or_else(|| {
            ServiceError::InvalidData(format!("{} is not an entity service", call.service))
        })?;

        // Extra service data (brightness, volume, ...) lands in the attributes
        let mut attributes = current.attributes.clone();
        if let Some(extra) = call.data.as_map() {
            for (key, value) in extra.iter().filter(|(k, _)| k.as_str() != ATTR_ENTITY_ID) {
                attributes.insert(key.clone(), value.clone());
            }
        }

        debug!(entity_id = %target, service = %call.service, state = next, "Applying entity service");
        write_state(
            states,
            bus,
            &current.entity_id,
            next.into(),
            attributes,
            call.context.child(),
        );
    }
    Ok(())
}

/// Adapt a bus receiver into a stream that ends on disconnect
fn event_stream(
    rx: broadcast::Receiver<HubEvent>,
    connection: watch::Receiver<ConnectionState>,
) -> HubEventStream {
    enum Next {
        Event(HubEvent),
        Lagged(u64),
        ConnectionChanged,
        End,
    }

    futures::stream::unfold((rx, connection), |(mut rx, mut connection)| async move {
        loop {
            let next = tokio::select! {
                result = rx.recv() => match result {
                    Ok(event) => Next::Event(event),
                    Err(broadcast::error::RecvError::Lagged(n)) => Next::Lagged(n),
                    Err(broadcast::error::RecvError::Closed) => Next::End,
                },
                changed = connection.changed() => match changed {
                    Ok(()) => Next::ConnectionChanged,
                    Err(_) => Next::End,
                },
            };

            match next {
                Next::Event(event) => return Some((event, (rx, connection))),
                Next::Lagged(n) => warn!(skipped = n, "Event stream lagged"),
                Next::ConnectionChanged => {
                    if *connection.borrow_and_update() != ConnectionState::Connected {
                        info!("Connection lost, ending event stream");
                        return None;
                    }
                }
                Next::End => return None,
            }
        }
    })
    .boxed()
}

#[async_trait]
impl HubClient for LocalHub {
    async fn subscribe_events(&self) -> HubResult<HubEventStream> {
        self.ensure_connected()?;
        let mut connection = self.connection.subscribe();
        connection.borrow_and_update();
        Ok(event_stream(self.bus.subscribe_all(), connection))
    }

    async fn get_state(&self, entity_id: &EntityId) -> HubResult<Option<Arc<EntityState>>> {
        self.ensure_connected()?;
        Ok(self.states.get(entity_id.as_str()))
    }

    async fn get_all_states(&self) -> HubResult<Vec<Arc<EntityState>>> {
        self.ensure_connected()?;
        Ok(self.states.all())
    }

    #[instrument(skip(self, call), fields(service = %call.service_id()))]
    async fn call_service(&self, call: ServiceCall) -> HubResult<()> {
        self.ensure_connected()?;

        let notification = CustomEvent::new(
            CALL_SERVICE,
            serde_json::json!({
                "domain": call.domain,
                "service": call.service,
                "service_data": call.data.to_json(),
            }),
            call.context.clone(),
        );
        self.bus.fire(HubEvent::Custom(notification));

        self.services.call(call).await?;
        Ok(())
    }

    async fn set_state(
        &self,
        entity_id: &EntityId,
        state: DynValue,
        attributes: Attributes,
        context: Context,
    ) -> HubResult<Arc<EntityState>> {
        self.ensure_connected()?;
        Ok(write_state(&self.states, &self.bus, entity_id, state, attributes, context))
    }

    async fn fire_event(&self, event_type: &str, data: DynValue, context: Context) -> HubResult<()> {
        self.ensure_connected()?;
        self.bus
            .fire(HubEvent::Custom(CustomEvent::new(event_type, data, context)));
        Ok(())
    }

    fn connection(&self) -> watch::Receiver<ConnectionState> {
        self.connection.subscribe()
    }
}
