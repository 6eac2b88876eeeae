//! Test hub
//!
//! Wraps a [`LocalHub`] with captured service calls and helpers to move
//! entities between states and to start an engine against it.

#![allow(dead_code)]

use ha_config::EngineConfig;
use ha_core::{Attributes, DynValue, EntityId, HubEvent, ServiceCall, CALL_SERVICE};
use ha_hub::{LocalHub, SharedHub};
use ha_rules::RulesEngine;
use ha_service_registry::ServiceResult;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;

/// A service call as observed on the hub
#[derive(Debug, Clone)]
pub struct CapturedCall {
    pub domain: String,
    pub service: String,
    pub data: DynValue,
}

impl CapturedCall {
    pub fn entity_id(&self) -> Option<&str> {
        self.data.get("entity_id").as_str()
    }
}

pub struct TestHub {
    pub hub: Arc<LocalHub>,
    call_events: Mutex<broadcast::Receiver<HubEvent>>,
    captured: Mutex<Vec<CapturedCall>>,
}

impl TestHub {
    pub fn new() -> Self {
        let hub = Arc::new(LocalHub::new());
        let call_events = Mutex::new(hub.bus().subscribe(CALL_SERVICE));
        Self {
            hub,
            call_events,
            captured: Mutex::new(Vec::new()),
        }
    }

    pub fn shared(&self) -> SharedHub {
        self.hub.clone()
    }

    /// Add an entity or move it to a new state
    pub fn set(&self, entity_id: &str, state: &str) {
        self.set_with(entity_id, state, Attributes::new());
    }

    pub fn set_with(&self, entity_id: &str, state: impl Into<DynValue>, attributes: Attributes) {
        let entity_id: EntityId = entity_id.parse().expect("Invalid entity_id");
        self.hub.add_entity(entity_id, state, attributes);
    }

    pub fn assert_state(&self, entity_id: &str, expected: &str) {
        let state = self.hub.states().get_state(entity_id);
        assert_eq!(
            state,
            Some(DynValue::from(expected)),
            "Expected entity {} to be in state '{}', but was {:?}",
            entity_id,
            expected,
            state
        );
    }

    /// Every service call issued so far
    pub fn calls(&self) -> Vec<CapturedCall> {
        let mut rx = self.call_events.lock().unwrap();
        let mut captured = self.captured.lock().unwrap();
        while let Ok(event) = rx.try_recv() {
            if let HubEvent::Custom(event) = event {
                captured.push(CapturedCall {
                    domain: event.data.get("domain").as_str().unwrap_or_default().to_string(),
                    service: event.data.get("service").as_str().unwrap_or_default().to_string(),
                    data: event.data.get("service_data").clone(),
                });
            }
        }
        captured.clone()
    }

    pub fn calls_to(&self, domain: &str, service: &str) -> Vec<CapturedCall> {
        self.calls()
            .into_iter()
            .filter(|c| c.domain == domain && c.service == service)
            .collect()
    }

    /// Register a script that counts its runs
    pub fn script(&self, name: &str) -> Arc<AtomicUsize> {
        let runs = Arc::new(AtomicUsize::new(0));
        let counter = runs.clone();
        self.hub.register_script(name, move |_call: ServiceCall| {
            counter.fetch_add(1, Ordering::SeqCst);
            async { ServiceResult::Ok(()) }
        });
        runs
    }

    /// Replace a service with one that takes `delay` to answer
    pub fn slow_service(&self, domain: &str, service: &str, delay: Duration) {
        self.hub
            .services()
            .register(domain, service, move |_call: ServiceCall| async move {
                tokio::time::sleep(delay).await;
                Ok(())
            });
    }

    /// Connect an engine with default settings
    pub async fn engine(&self) -> RulesEngine {
        RulesEngine::connect(self.shared(), EngineConfig::default())
            .await
            .expect("engine connects")
    }

    /// Connect an engine and start its dispatch loop
    pub async fn running_engine(&self) -> (RulesEngine, JoinHandle<()>) {
        let engine = self.engine().await;
        let runner = engine.clone();
        let handle = tokio::spawn(async move {
            runner.run().await.expect("dispatch loop");
        });
        (engine, handle)
    }
}

/// Let spawned tasks run until they block
pub async fn settle() {
    tokio::time::sleep(Duration::from_millis(50)).await;
}

pub fn counter() -> Arc<AtomicUsize> {
    Arc::new(AtomicUsize::new(0))
}

pub fn count(counter: &Arc<AtomicUsize>) -> usize {
    counter.load(Ordering::SeqCst)
}
