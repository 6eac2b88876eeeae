//! Fluent rule builders
//!
//! Each step returns the type that allows only the legal next steps:
//!
//! ```text
//! engine.entity("binary_sensor.hall")?          EntityBuilder
//!     .when_state_change()                      StateRuleBuilder<ExactFilter>
//!     .from("off").to("on")
//!     .and_not_change_for(Duration::from_secs(2))
//!     .use_entity("light.hall")?                StateActionBuilder
//!     .turn_on().with_attribute("brightness", 180)
//!     .execute()?;                              RuleId
//! ```
//!
//! Verbs (`turn_on`, `toggle`, `set_state`, media transport) come from the
//! [`EntityActions`] trait so every builder that can take an action shares
//! them. A builder is one rule under construction and is consumed by its
//! terminal call.

use ha_core::{Context, DynValue, EntityId, EntityState};
use std::future::Future;
use std::marker::PhantomData;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

use crate::action::{ActionKind, ActionList, FluentAction};
use crate::engine::RulesEngine;
use crate::error::{RuleError, RuleResult};
use crate::executor::ExecutionReport;
use crate::rule::{
    CallbackFuture, EventCallback, EventRule, EventTarget, RuleId, ScheduledRule, StateAction,
    StateCallback, StateFilter, StateRule, Targets,
};

/// Declarative verbs shared by every builder that accepts actions
pub trait EntityActions: Sized {
    type Next;

    /// Append an action to the chain
    fn push_action(self, action: FluentAction) -> Self::Next;

    fn turn_on(self) -> Self::Next {
        self.push_action(FluentAction::new(ActionKind::TurnOn))
    }

    fn turn_off(self) -> Self::Next {
        self.push_action(FluentAction::new(ActionKind::TurnOff))
    }

    fn toggle(self) -> Self::Next {
        self.push_action(FluentAction::new(ActionKind::Toggle))
    }

    /// Write the state directly instead of going through a service
    fn set_state(self, state: impl Into<DynValue>) -> Self::Next {
        self.push_action(FluentAction::set_state(state))
    }

    fn play(self) -> Self::Next {
        self.push_action(FluentAction::new(ActionKind::MediaPlay))
    }

    fn pause(self) -> Self::Next {
        self.push_action(FluentAction::new(ActionKind::MediaPause))
    }

    fn play_pause(self) -> Self::Next {
        self.push_action(FluentAction::new(ActionKind::MediaPlayPause))
    }

    fn stop(self) -> Self::Next {
        self.push_action(FluentAction::new(ActionKind::MediaStop))
    }
}

pub(crate) fn parse_ids<I, S>(ids: I) -> RuleResult<Vec<EntityId>>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    ids.into_iter()
        .map(|id| id.as_ref().parse::<EntityId>().map_err(RuleError::from))
        .collect()
}

fn state_callback<F, Fut>(callback: F) -> StateCallback
where
    F: Fn(EntityId, Arc<EntityState>, Option<Arc<EntityState>>) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
{
    Arc::new(move |id, new, old| Box::pin(callback(id, new, old)) as CallbackFuture)
}

fn add_attribute(actions: &mut ActionList, name: impl Into<String>, value: impl Into<DynValue>) {
    let name = name.into();
    if !actions.add_attribute(name.clone(), value) {
        debug!(attribute = %name, "Attribute given before any action, ignoring");
    }
}

/// Entry point for everything about a set of entities
pub struct EntityBuilder {
    engine: RulesEngine,
    targets: Targets,
}

impl EntityBuilder {
    pub(crate) fn new(engine: RulesEngine, targets: Targets) -> Self {
        Self { engine, targets }
    }

    /// React to state changes with exact-match filtering
    ///
    /// Without `from`/`to`, the rule fires whenever the state value changes.
    pub fn when_state_change(self) -> StateRuleBuilder<ExactFilter> {
        StateRuleBuilder::new(self.engine, self.targets, StateFilter::default())
    }

    /// React to state changes accepted by `predicate(new, old)`
    pub fn when_state_change_where<P>(self, predicate: P) -> StateRuleBuilder<LambdaFilter>
    where
        P: Fn(&EntityState, Option<&EntityState>) -> bool + Send + Sync + 'static,
    {
        StateRuleBuilder::new(self.engine, self.targets, StateFilter::Lambda(Arc::new(predicate)))
    }

    /// Resolve the targets against the current states
    pub fn resolve(&self) -> Vec<EntityId> {
        match &self.targets {
            Targets::Ids(ids) => ids.clone(),
            Targets::Selector(selector) => self.engine.inner.store.select(|s| selector(s)),
        }
    }
}

impl EntityActions for EntityBuilder {
    type Next = EntityCommand;

    fn push_action(self, action: FluentAction) -> EntityCommand {
        let targets = self.resolve();
        let mut actions = ActionList::new();
        actions.begin(action);
        EntityCommand {
            engine: self.engine,
            targets,
            actions,
        }
    }
}

/// An immediate command against resolved entities
///
/// Selectors were evaluated when the command was created; entities that
/// appear later are not included.
pub struct EntityCommand {
    engine: RulesEngine,
    targets: Vec<EntityId>,
    actions: ActionList,
}

impl EntityCommand {
    pub fn with_attribute(mut self, name: impl Into<String>, value: impl Into<DynValue>) -> Self {
        add_attribute(&mut self.actions, name, value);
        self
    }

    pub fn targets(&self) -> &[EntityId] {
        &self.targets
    }

    /// Run the actions once
    pub async fn execute(mut self) -> RuleResult<ExecutionReport> {
        self.execute_and_clear().await
    }

    /// Run the actions and empty the list
    pub async fn execute_and_clear(&mut self) -> RuleResult<ExecutionReport> {
        self.engine.ensure_running()?;
        let context = Context::new();
        Ok(self
            .actions
            .execute_and_clear(&self.engine.inner.executor, &self.targets, &context)
            .await)
    }

    /// Run the actions, keeping them for another run
    pub async fn execute_retained(&self) -> RuleResult<ExecutionReport> {
        self.engine.ensure_running()?;
        let context = Context::new();
        Ok(self
            .actions
            .execute_retained(&self.engine.inner.executor, &self.targets, &context)
            .await)
    }

    /// Replay the actions every `period`, starting one period from now
    pub fn schedule_every(self, period: Duration) -> RuleResult<RuleId> {
        self.engine.ensure_running()?;
        if period.is_zero() {
            return Err(RuleError::InvalidPeriod);
        }
        if self.actions.is_empty() {
            return Err(RuleError::MissingAction(Targets::Ids(self.targets).to_string()));
        }

        let inner = &self.engine.inner;
        let rule = inner.registry.add_scheduled_rule(ScheduledRule {
            id: inner.registry.next_id(),
            period,
            targets: self.targets,
            actions: self.actions,
        });
        info!(rule_id = %rule.id, period = ?period, "Scheduled rule registered");
        let id = rule.id;
        inner.scheduler.start_rule(rule);
        Ok(id)
    }
}

impl EntityActions for EntityCommand {
    type Next = EntityCommand;

    fn push_action(mut self, action: FluentAction) -> EntityCommand {
        self.actions.begin(action);
        self
    }
}

/// Marker: the rule filters on exact from/to values
pub struct ExactFilter;

/// Marker: the rule filters with a custom predicate
pub struct LambdaFilter;

/// Trigger part of a state rule
struct StateTrigger {
    engine: RulesEngine,
    targets: Targets,
    filter: StateFilter,
    stable_for: Option<Duration>,
}

impl StateTrigger {
    fn register(self, action: StateAction) -> RuleResult<RuleId> {
        self.engine.ensure_running()?;
        let registry = &self.engine.inner.registry;
        let rule = registry.add_state_rule(StateRule {
            id: registry.next_id(),
            targets: self.targets,
            filter: self.filter,
            stable_for: self.stable_for,
            action,
        });
        info!(rule_id = %rule.id, targets = %rule.targets, "State rule registered");
        Ok(rule.id)
    }
}

/// A state rule whose trigger is being configured
pub struct StateRuleBuilder<F> {
    trigger: StateTrigger,
    _filter: PhantomData<F>,
}

impl<F> StateRuleBuilder<F> {
    fn new(engine: RulesEngine, targets: Targets, filter: StateFilter) -> Self {
        Self {
            trigger: StateTrigger {
                engine,
                targets,
                filter,
                stable_for: None,
            },
            _filter: PhantomData,
        }
    }

    /// Only fire once the new state has held for `duration`
    pub fn and_not_change_for(mut self, duration: Duration) -> Self {
        self.trigger.stable_for = Some(duration);
        self
    }

    /// Run a callback with (entity id, new state, old state)
    pub fn call<C, Fut>(self, callback: C) -> StateRuleReady
    where
        C: Fn(EntityId, Arc<EntityState>, Option<Arc<EntityState>>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        StateRuleReady {
            trigger: self.trigger,
            action: StateAction::Callback(state_callback(callback)),
        }
    }

    /// Start a script; the `script.` prefix is optional
    pub fn run_script(self, script: impl Into<String>) -> StateRuleReady {
        self.run_scripts([script.into()])
    }

    pub fn run_scripts<I, S>(self, scripts: I) -> StateRuleReady
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        StateRuleReady {
            trigger: self.trigger,
            action: StateAction::Scripts(scripts.into_iter().map(Into::into).collect()),
        }
    }

    /// Apply the declarative actions to another entity
    pub fn use_entity(self, entity_id: &str) -> RuleResult<StateActionBuilder> {
        self.use_entities([entity_id])
    }

    pub fn use_entities<I, S>(self, entity_ids: I) -> RuleResult<StateActionBuilder>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let targets = parse_ids(entity_ids)?;
        Ok(StateActionBuilder::new(self.trigger, Some(targets)))
    }

    /// Apply the declarative actions to the entities currently accepted by
    /// `selector`
    pub fn use_entities_where<P>(self, selector: P) -> StateActionBuilder
    where
        P: Fn(&EntityState) -> bool,
    {
        let targets = self.trigger.engine.inner.store.select(selector);
        StateActionBuilder::new(self.trigger, Some(targets))
    }
}

impl StateRuleBuilder<ExactFilter> {
    /// Require the previous state value
    pub fn from(mut self, value: impl Into<DynValue>) -> Self {
        if let StateFilter::Exact { from, .. } = &mut self.trigger.filter {
            *from = Some(value.into());
        }
        self
    }

    /// Require the new state value
    pub fn to(mut self, value: impl Into<DynValue>) -> Self {
        if let StateFilter::Exact { to, .. } = &mut self.trigger.filter {
            *to = Some(value.into());
        }
        self
    }

    /// Also fire when only attributes changed
    pub fn all_changes(mut self) -> Self {
        if let StateFilter::Exact { all_changes, .. } = &mut self.trigger.filter {
            *all_changes = true;
        }
        self
    }
}

impl<F> EntityActions for StateRuleBuilder<F> {
    type Next = StateActionBuilder;

    fn push_action(self, action: FluentAction) -> StateActionBuilder {
        StateActionBuilder::new(self.trigger, None).push_action(action)
    }
}

/// A state rule with a callback or script, ready to register
pub struct StateRuleReady {
    trigger: StateTrigger,
    action: StateAction,
}

impl StateRuleReady {
    pub fn execute(self) -> RuleResult<RuleId> {
        self.trigger.register(self.action)
    }
}

/// A state rule collecting declarative actions
pub struct StateActionBuilder {
    trigger: StateTrigger,
    targets: Option<Vec<EntityId>>,
    actions: ActionList,
}

impl StateActionBuilder {
    fn new(trigger: StateTrigger, targets: Option<Vec<EntityId>>) -> Self {
        Self {
            trigger,
            targets,
            actions: ActionList::new(),
        }
    }

    pub fn with_attribute(mut self, name: impl Into<String>, value: impl Into<DynValue>) -> Self {
        add_attribute(&mut self.actions, name, value);
        self
    }

    pub fn execute(self) -> RuleResult<RuleId> {
        if self.actions.is_empty() {
            return Err(RuleError::MissingAction(self.trigger.targets.to_string()));
        }
        self.trigger.register(StateAction::Entity {
            targets: self.targets,
            actions: self.actions,
        })
    }
}

impl EntityActions for StateActionBuilder {
    type Next = StateActionBuilder;

    fn push_action(mut self, action: FluentAction) -> StateActionBuilder {
        self.actions.begin(action);
        self
    }
}

/// A custom event rule
pub struct EventRuleBuilder {
    engine: RulesEngine,
    target: EventTarget,
    callback: Option<EventCallback>,
}

impl EventRuleBuilder {
    pub(crate) fn new(engine: RulesEngine, target: EventTarget) -> Self {
        Self {
            engine,
            target,
            callback: None,
        }
    }

    /// Run a callback with (event type, data)
    pub fn call<C, Fut>(mut self, callback: C) -> Self
    where
        C: Fn(String, DynValue) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        self.callback = Some(Arc::new(move |event_type, data| {
            Box::pin(callback(event_type, data)) as CallbackFuture
        }));
        self
    }

    pub fn execute(self) -> RuleResult<RuleId> {
        self.engine.ensure_running()?;
        let Some(callback) = self.callback else {
            let target = match &self.target {
                EventTarget::Names(names) => names.join(", "),
                EventTarget::Predicate(_) => "<event predicate>".to_string(),
            };
            return Err(RuleError::MissingAction(target));
        };

        let registry = &self.engine.inner.registry;
        let rule = registry.add_event_rule(EventRule {
            id: registry.next_id(),
            target: self.target,
            callback,
        });
        info!(rule_id = %rule.id, "Event rule registered");
        Ok(rule.id)
    }
}
