//! The rules engine facade
//!
//! [`RulesEngine`] owns the hub connection, the engine's state store, the
//! rule registry and the background machinery (dispatcher, executor,
//! scheduler). It is a cheap handle: clones share the same engine, so apps
//! can keep one inside their callbacks.

use chrono::NaiveTime;
use futures::StreamExt;
use ha_config::EngineConfig;
use ha_core::domains::SCRIPT_DOMAIN;
use ha_core::{Attributes, Context, DynValue, EntityId, EntityState, ServiceCall};
use ha_hub::{ConnectionState, HubError, HubEventStream, SharedHub};
use ha_state_store::EntityStateStore;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument};

use crate::app::RulesApp;
use crate::builder::{parse_ids, EntityBuilder, EventRuleBuilder};
use crate::dispatch::Dispatcher;
use crate::error::{RuleError, RuleResult};
use crate::executor::ActionExecutor;
use crate::registry::RuleRegistry;
use crate::rule::{CallbackFuture, EventTarget, RuleId, TaskCallback, Targets};
use crate::scheduler::Scheduler;

pub(crate) struct EngineInner {
    pub(crate) hub: SharedHub,
    pub(crate) store: Arc<EntityStateStore>,
    pub(crate) registry: Arc<RuleRegistry>,
    pub(crate) executor: ActionExecutor,
    pub(crate) dispatcher: Dispatcher,
    pub(crate) scheduler: Scheduler,
    pub(crate) cancel: CancellationToken,
    /// Taken by the one `run()` call
    events: Mutex<Option<HubEventStream>>,
}

#[derive(Clone)]
pub struct RulesEngine {
    pub(crate) inner: Arc<EngineInner>,
}

fn task_callback<F, Fut>(callback: F) -> TaskCallback
where
    F: Fn() -> Fut + Send + Sync + 'static,
    Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
{
    Arc::new(move || Box::pin(callback()) as CallbackFuture)
}

impl RulesEngine {
    /// Wait for the hub, load its current states and subscribe to its events
    #[instrument(skip_all)]
    pub async fn connect(hub: SharedHub, config: EngineConfig) -> RuleResult<Self> {
        let mut connection = hub.connection();
        if *connection.borrow() != ConnectionState::Connected {
            info!("Waiting for hub connection");
        }
        connection
            .wait_for(|state| *state == ConnectionState::Connected)
            .await
            .map_err(|_| HubError::NotConnected)?;

        // Subscribe before the snapshot so no change falls in between
        let events = hub.subscribe_events().await?;

        let store = Arc::new(EntityStateStore::new());
        for state in hub.get_all_states().await? {
            store.set(state);
        }
        info!(entities = store.len(), "Loaded current states");

        let cancel = CancellationToken::new();
        let registry = Arc::new(RuleRegistry::new());
        let executor = ActionExecutor::new(hub.clone(), config.action_timeout());
        let dispatcher = Dispatcher::new(
            registry.clone(),
            store.clone(),
            executor.clone(),
            cancel.clone(),
        );
        let scheduler = Scheduler::new(hub.clone(), executor.clone(), cancel.clone());

        Ok(Self {
            inner: Arc::new(EngineInner {
                hub,
                store,
                registry,
                executor,
                dispatcher,
                scheduler,
                cancel,
                events: Mutex::new(Some(events)),
            }),
        })
    }

    /// Dispatch hub events until the stream ends or [`shutdown`](Self::shutdown)
    /// is called; either way the engine is stopped afterwards
    pub async fn run(&self) -> RuleResult<()> {
        let events = self.inner.events.lock().await.take();
        let Some(mut events) = events else {
            return Err(if self.is_shut_down() {
                RuleError::ShutDown
            } else {
                RuleError::AlreadyRunning
            });
        };

        info!(rules = self.rule_count(), "Rules engine running");
        let cancel = &self.inner.cancel;
        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    debug!("Dispatch loop cancelled");
                    break;
                }
                event = events.next() => match event {
                    Some(event) => {
                        self.inner.dispatcher.handle(event);
                    }
                    None => {
                        info!("Hub event stream ended");
                        break;
                    }
                },
            }
        }

        cancel.cancel();
        info!("Rules engine stopped");
        Ok(())
    }

    /// Stop dispatching and cancel schedules and pending stabilization waits
    pub fn shutdown(&self) {
        if !self.inner.cancel.is_cancelled() {
            info!("Shutting down rules engine");
            self.inner.cancel.cancel();
        }
    }

    pub fn is_shut_down(&self) -> bool {
        self.inner.cancel.is_cancelled()
    }

    pub(crate) fn ensure_running(&self) -> RuleResult<()> {
        if self.is_shut_down() {
            Err(RuleError::ShutDown)
        } else {
            Ok(())
        }
    }

    /// Last known states as seen by the dispatcher
    pub fn store(&self) -> &Arc<EntityStateStore> {
        &self.inner.store
    }

    pub fn hub(&self) -> &SharedHub {
        &self.inner.hub
    }

    pub fn rule_count(&self) -> usize {
        self.inner.registry.len()
    }

    pub fn state(&self, entity_id: &str) -> Option<Arc<EntityState>> {
        self.inner.store.get(entity_id)
    }

    /// Initialize apps in order; failing apps are logged and skipped
    pub fn load_apps(&self, apps: &[Box<dyn RulesApp>]) -> Vec<(String, RuleError)> {
        let mut failures = Vec::new();
        for app in apps {
            let before = self.rule_count();
            match app.initialize(self) {
                Ok(()) => info!(
                    app = app.name(),
                    rules = self.rule_count() - before,
                    "App initialized"
                ),
                Err(e) => {
                    error!(app = app.name(), error = %e, "App failed to initialize");
                    failures.push((app.name().to_string(), e));
                }
            }
        }
        failures
    }

    // Rule entry points

    pub fn entity(&self, entity_id: &str) -> RuleResult<EntityBuilder> {
        self.entities([entity_id])
    }

    pub fn entities<I, S>(&self, entity_ids: I) -> RuleResult<EntityBuilder>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let ids = parse_ids(entity_ids)?;
        Ok(EntityBuilder::new(self.clone(), Targets::Ids(ids)))
    }

    /// Entities picked by `selector`
    ///
    /// State rules evaluate the selector on every change; commands resolve
    /// it once against the current states.
    pub fn entities_where<P>(&self, selector: P) -> EntityBuilder
    where
        P: Fn(&EntityState) -> bool + Send + Sync + 'static,
    {
        EntityBuilder::new(self.clone(), Targets::Selector(Arc::new(selector)))
    }

    pub fn event(&self, event_type: impl Into<String>) -> EventRuleBuilder {
        self.events([event_type.into()])
    }

    pub fn events<I, S>(&self, event_types: I) -> EventRuleBuilder
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let names = event_types.into_iter().map(Into::into).collect();
        EventRuleBuilder::new(self.clone(), EventTarget::Names(names))
    }

    /// Events accepted by `predicate(event_type, data)`
    pub fn events_where<P>(&self, predicate: P) -> EventRuleBuilder
    where
        P: Fn(&str, &DynValue) -> bool + Send + Sync + 'static,
    {
        EventRuleBuilder::new(self.clone(), EventTarget::Predicate(Arc::new(predicate)))
    }

    // Direct hub access, bounded by the action timeout

    async fn bounded<T>(&self, request: impl Future<Output = Result<T, HubError>>) -> RuleResult<T> {
        self.ensure_running()?;
        let timeout = self.inner.executor.timeout();
        match tokio::time::timeout(timeout, request).await {
            Ok(result) => Ok(result?),
            Err(_) => Err(RuleError::Timeout(timeout)),
        }
    }

    /// Call any hub service
    pub async fn call_service(
        &self,
        domain: &str,
        service: &str,
        data: impl Into<DynValue>,
    ) -> RuleResult<()> {
        let call = ServiceCall::new(domain, service, data, Context::new());
        debug!(service = %call.service_id(), "Calling service");
        self.bounded(self.inner.hub.call_service(call)).await
    }

    /// Start a script; the `script.` prefix is optional
    pub async fn run_script(&self, script: &str) -> RuleResult<()> {
        let name = script.strip_prefix("script.").unwrap_or(script);
        self.call_service(SCRIPT_DOMAIN, name, DynValue::Map(Default::default()))
            .await
    }

    pub async fn fire_event(&self, event_type: &str, data: impl Into<DynValue>) -> RuleResult<()> {
        self.bounded(self.inner.hub.fire_event(event_type, data.into(), Context::new()))
            .await
    }

    /// Write an entity's state directly on the hub
    pub async fn set_state(
        &self,
        entity_id: &str,
        state: impl Into<DynValue>,
        attributes: Attributes,
    ) -> RuleResult<Arc<EntityState>> {
        let entity_id: EntityId = entity_id.parse()?;
        self.bounded(
            self.inner
                .hub
                .set_state(&entity_id, state.into(), attributes, Context::new()),
        )
        .await
    }

    // Scheduler helpers

    /// Run `callback` every `period`, first one period from now
    pub fn run_every<F, Fut>(&self, period: Duration, callback: F) -> RuleResult<RuleId>
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        self.ensure_running()?;
        if period.is_zero() {
            return Err(RuleError::InvalidPeriod);
        }
        let id = self.inner.registry.next_id();
        let callback = task_callback(callback);
        self.inner.scheduler.every(id, period, move || callback());
        info!(rule_id = %id, period = ?period, "Periodic task registered");
        Ok(id)
    }

    /// Run `callback` once after `delay`
    pub fn run_in<F, Fut>(&self, delay: Duration, callback: F) -> RuleResult<RuleId>
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        self.ensure_running()?;
        let id = self.inner.registry.next_id();
        self.inner.scheduler.once(id, delay, task_callback(callback));
        info!(rule_id = %id, delay = ?delay, "Delayed task registered");
        Ok(id)
    }

    /// Run `callback` every day at `at`, local time
    pub fn run_daily<F, Fut>(&self, at: NaiveTime, callback: F) -> RuleResult<RuleId>
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        self.ensure_running()?;
        let id = self.inner.registry.next_id();
        self.inner.scheduler.daily(id, at, task_callback(callback));
        info!(rule_id = %id, at = %at, "Daily task registered");
        Ok(id)
    }
}
