//! Dispatch engine
//!
//! [`Dispatcher::handle`] runs synchronously on the event loop for every hub
//! event. It records state changes in the engine's store, evaluates each
//! registered rule in registration order and spawns one task per matched
//! rule. Everything that can wait (stabilization, hub calls, user
//! callbacks) happens inside those tasks, so a slow rule never holds up the
//! next event or the other rules.
//!
//! User code is isolated at two points: predicates and selectors run under
//! `catch_unwind` and count as "no match" when they panic, and action
//! futures are wrapped so errors and panics are logged at the task boundary.

use futures::FutureExt;
use ha_core::{Context, CustomEvent, EntityId, EntityState, HubEvent, StateChange};
use ha_state_store::EntityStateStore;
use std::any::Any;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, trace, warn};

use crate::executor::{ActionExecutor, ExecutionReport};
use crate::registry::RuleRegistry;
use crate::rule::{EventRule, EventTarget, RuleId, StateAction, StateFilter, StateRule};

/// Evaluates hub events against the rule registry
#[derive(Clone)]
pub struct Dispatcher {
    registry: Arc<RuleRegistry>,
    store: Arc<EntityStateStore>,
    executor: ActionExecutor,
    cancel: CancellationToken,
}

impl Dispatcher {
    pub fn new(
        registry: Arc<RuleRegistry>,
        store: Arc<EntityStateStore>,
        executor: ActionExecutor,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            registry,
            store,
            executor,
            cancel,
        }
    }

    /// Process one event; returns the number of rules that matched
    pub fn handle(&self, event: HubEvent) -> usize {
        if self.cancel.is_cancelled() {
            return 0;
        }
        match event {
            HubEvent::StateChanged(change) => self.dispatch_state_change(change),
            HubEvent::Custom(event) => self.dispatch_custom_event(event),
        }
    }

    fn dispatch_state_change(&self, change: StateChange) -> usize {
        let StateChange {
            entity_id,
            new_state,
            old_state,
            ..
        } = change;

        let Some(new) = new_state else {
            trace!(entity_id = %entity_id, "Entity removed");
            self.store.remove(&entity_id);
            return 0;
        };
        let displaced = self.store.set(new.clone());
        let old = old_state.or(displaced);

        let mut matched = 0;
        for rule in self.registry.state_rules() {
            if !self.state_rule_matches(&rule, &new, old.as_deref()) {
                continue;
            }
            matched += 1;
            debug!(rule_id = %rule.id, entity_id = %entity_id, "State rule matched");

            let task = fire_state_rule(
                rule.clone(),
                entity_id.clone(),
                new.clone(),
                old.clone(),
                self.store.clone(),
                self.executor.clone(),
                self.cancel.clone(),
            );
            spawn_guarded(rule.id, task);
        }
        matched
    }

    fn state_rule_matches(&self, rule: &StateRule, new: &EntityState, old: Option<&EntityState>) -> bool {
        if !guarded(rule.id, "entity selector", || rule.targets.matches(new)) {
            return false;
        }
        match &rule.filter {
            StateFilter::Lambda(predicate) => guarded(rule.id, "state predicate", || predicate(new, old)),
            StateFilter::Exact {
                from,
                to,
                all_changes,
            } => StateFilter::exact_match(from.as_ref(), to.as_ref(), *all_changes, new, old),
        }
    }

    fn dispatch_custom_event(&self, event: CustomEvent) -> usize {
        let event_type = event.event_type.as_str();

        let mut matched = 0;
        for rule in self.registry.event_rules() {
            if !event_rule_matches(&rule, event_type, &event) {
                continue;
            }
            matched += 1;
            debug!(rule_id = %rule.id, event_type, "Event rule matched");

            let callback = rule.callback.clone();
            let cancel = self.cancel.clone();
            let (name, data) = (event_type.to_string(), event.data.clone());
            let rule_id = rule.id;
            spawn_guarded(rule_id, async move {
                if cancel.is_cancelled() {
                    return Ok(());
                }
                info!(rule_id = %rule_id, event_type = %name, "Rule fired");
                callback(name, data).await
            });
        }
        matched
    }
}

fn event_rule_matches(rule: &EventRule, event_type: &str, event: &CustomEvent) -> bool {
    match &rule.target {
        EventTarget::Names(names) => names.iter().any(|name| name == event_type),
        EventTarget::Predicate(predicate) => {
            guarded(rule.id, "event predicate", || predicate(event_type, &event.data))
        }
    }
}

async fn fire_state_rule(
    rule: Arc<StateRule>,
    entity_id: EntityId,
    new: Arc<EntityState>,
    old: Option<Arc<EntityState>>,
    store: Arc<EntityStateStore>,
    executor: ActionExecutor,
    cancel: CancellationToken,
) -> anyhow::Result<()> {
    if let Some(duration) = rule.stable_for {
        tokio::select! {
            _ = cancel.cancelled() => {
                debug!(rule_id = %rule.id, entity_id = %entity_id, "Stabilization wait cancelled");
                return Ok(());
            }
            _ = tokio::time::sleep(duration) => {}
        }

        let still_current = store.get(entity_id.as_str()).is_some_and(|current| {
            current.state == new.state && current.last_changed == new.last_changed
        });
        if !still_current {
            debug!(rule_id = %rule.id, entity_id = %entity_id, "State changed during stabilization, dropping match");
            return Ok(());
        }
    }

    if cancel.is_cancelled() {
        return Ok(());
    }

    let context = Context::new();
    info!(rule_id = %rule.id, entity_id = %entity_id, context_id = %context.id, "Rule fired");

    match &rule.action {
        StateAction::Callback(callback) => callback(entity_id, new, old).await,
        StateAction::Scripts(scripts) => {
            let report = executor.run_scripts(scripts, &context).await;
            log_report(rule.id, &report);
            Ok(())
        }
        StateAction::Entity { targets, actions } => {
            let targets = targets.as_deref().unwrap_or(std::slice::from_ref(&entity_id));
            let report = actions.execute_retained(&executor, targets, &context).await;
            log_report(rule.id, &report);
            Ok(())
        }
    }
}

pub(crate) fn log_report(rule_id: RuleId, report: &ExecutionReport) {
    if report.is_success() {
        debug!(rule_id = %rule_id, calls = report.issued, "Rule actions completed");
    } else {
        warn!(
            rule_id = %rule_id,
            failed = report.failed,
            timed_out = report.timed_out,
            "Rule actions did not all complete"
        );
    }
}

/// Evaluate user filter code; a panic counts as no match
fn guarded(rule_id: RuleId, what: &str, filter: impl FnOnce() -> bool) -> bool {
    match std::panic::catch_unwind(AssertUnwindSafe(filter)) {
        Ok(matched) => matched,
        Err(panic) => {
            warn!(
                rule_id = %rule_id,
                panic = %panic_message(panic.as_ref()),
                "{what} panicked, treating as no match"
            );
            false
        }
    }
}

/// Run a rule action as its own task, logging errors and panics
pub(crate) fn spawn_guarded<F>(rule_id: RuleId, action: F)
where
    F: Future<Output = anyhow::Result<()>> + Send + 'static,
{
    tokio::spawn(async move {
        match AssertUnwindSafe(action).catch_unwind().await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => error!(rule_id = %rule_id, error = %format!("{e:#}"), "Rule action failed"),
            Err(panic) => error!(
                rule_id = %rule_id,
                panic = %panic_message(panic.as_ref()),
                "Rule action panicked"
            ),
        }
    });
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::action::ActionList;
    use crate::rule::{StateAction, Targets};
    use ha_core::Attributes;
    use ha_hub::LocalHub;
    use std::time::Duration;

    fn dispatcher() -> (Dispatcher, Arc<RuleRegistry>, Arc<EntityStateStore>) {
        let registry = Arc::new(RuleRegistry::new());
        let store = Arc::new(EntityStateStore::new());
        let executor = ActionExecutor::new(Arc::new(LocalHub::new()), Duration::from_secs(5));
        let dispatcher = Dispatcher::new(
            registry.clone(),
            store.clone(),
            executor,
            CancellationToken::new(),
        );
        (dispatcher, registry, store)
    }

    fn change(entity: &str, old: Option<&str>, new: &str) -> HubEvent {
        let id: EntityId = entity.parse().unwrap();
        HubEvent::StateChanged(StateChange {
            entity_id: id.clone(),
            new_state: Some(Arc::new(EntityState::new(id.clone(), new, Attributes::new()))),
            old_state: old.map(|s| Arc::new(EntityState::new(id.clone(), s, Attributes::new()))),
            context: Context::new(),
        })
    }

    fn noop_rule(registry: &RuleRegistry, targets: Targets, filter: StateFilter) {
        registry.add_state_rule(StateRule {
            id: registry.next_id(),
            targets,
            filter,
            stable_for: None,
            action: StateAction::Entity {
                targets: Some(Vec::new()),
                actions: ActionList::new(),
            },
        });
    }

    #[tokio::test]
    async fn test_state_change_updates_store_and_removal_clears_it() {
        let (dispatcher, _, store) = dispatcher();
        dispatcher.handle(change("sensor.door", None, "open"));
        assert_eq!(store.get_state("sensor.door"), Some("open".into()));

        let id: EntityId = "sensor.door".parse().unwrap();
        dispatcher.handle(HubEvent::StateChanged(StateChange {
            entity_id: id,
            new_state: None,
            old_state: None,
            context: Context::new(),
        }));
        assert!(!store.contains("sensor.door"));
    }

    #[tokio::test]
    async fn test_missing_old_state_falls_back_to_store() {
        let (dispatcher, registry, _) = dispatcher();
        noop_rule(
            &registry,
            Targets::Ids(vec!["light.a".parse().unwrap()]),
            StateFilter::Exact {
                from: Some("off".into()),
                to: Some("on".into()),
                all_changes: false,
            },
        );

        dispatcher.handle(change("light.a", None, "off"));
        // The event carries no old state; the displaced snapshot is used
        assert_eq!(dispatcher.handle(change("light.a", None, "on")), 1);
    }

    #[tokio::test]
    async fn test_panicking_selector_does_not_stop_other_rules() {
        let (dispatcher, registry, _) = dispatcher();
        noop_rule(
            &registry,
            Targets::Selector(Arc::new(|_: &EntityState| -> bool { panic!("selector failure") })),
            StateFilter::default(),
        );
        noop_rule(
            &registry,
            Targets::Ids(vec!["light.a".parse().unwrap()]),
            StateFilter::default(),
        );

        assert_eq!(dispatcher.handle(change("light.a", Some("off"), "on")), 1);
    }

    #[tokio::test]
    async fn test_cancelled_dispatcher_ignores_events() {
        let registry = Arc::new(RuleRegistry::new());
        let store = Arc::new(EntityStateStore::new());
        let cancel = CancellationToken::new();
        let dispatcher = Dispatcher::new(
            registry.clone(),
            store.clone(),
            ActionExecutor::new(Arc::new(LocalHub::new()), Duration::from_secs(5)),
            cancel.clone(),
        );
        noop_rule(&registry, Targets::Ids(vec!["light.a".parse().unwrap()]), StateFilter::default());

        cancel.cancel();
        assert_eq!(dispatcher.handle(change("light.a", Some("off"), "on")), 0);
        assert!(store.is_empty());
    }

    #[test]
    fn test_panic_message() {
        let payload: Box<dyn Any + Send> = Box::new("boom");
        assert_eq!(panic_message(payload.as_ref()), "boom");
        let payload: Box<dyn Any + Send> = Box::new(String::from("bang"));
        assert_eq!(panic_message(payload.as_ref()), "bang");
    }
}
