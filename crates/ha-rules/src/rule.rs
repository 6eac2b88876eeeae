//! Registered rules
//!
//! Rules are plain data once a builder finalizes them. The dispatcher and
//! scheduler only read them; nothing mutates a rule after registration.

use futures::future::BoxFuture;
use ha_core::{DynValue, EntityId, EntityState};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use crate::action::ActionList;

/// Identifier handed out when a rule is registered
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RuleId(pub(crate) u64);

impl RuleId {
    pub fn as_u64(self) -> u64 {
        self.0
    }
}

impl fmt::Display for RuleId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "rule-{}", self.0)
    }
}

/// Custom state filter over (new, old)
pub type StatePredicate = Arc<dyn Fn(&EntityState, Option<&EntityState>) -> bool + Send + Sync>;

/// Picks entities by their current state
pub type EntitySelector = Arc<dyn Fn(&EntityState) -> bool + Send + Sync>;

/// Custom event filter over (event type, data)
pub type EventPredicate = Arc<dyn Fn(&str, &DynValue) -> bool + Send + Sync>;

/// Callback result; errors are logged by the engine
pub type CallbackFuture = BoxFuture<'static, anyhow::Result<()>>;

/// Invoked with the triggering entity, its new state and its previous state
pub type StateCallback =
    Arc<dyn Fn(EntityId, Arc<EntityState>, Option<Arc<EntityState>>) -> CallbackFuture + Send + Sync>;

/// Invoked with the event type and its data
pub type EventCallback = Arc<dyn Fn(String, DynValue) -> CallbackFuture + Send + Sync>;

/// Invoked by the scheduler helpers
pub type TaskCallback = Arc<dyn Fn() -> CallbackFuture + Send + Sync>;

/// Which entities a state rule listens to
#[derive(Clone)]
pub enum Targets {
    Ids(Vec<EntityId>),
    /// Evaluated against the new state of every change
    Selector(EntitySelector),
}

impl Targets {
    pub fn matches(&self, state: &EntityState) -> bool {
        match self {
            Targets::Ids(ids) => ids.contains(&state.entity_id),
            Targets::Selector(selector) => selector(state),
        }
    }
}

impl fmt::Display for Targets {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Targets::Ids(ids) => {
                let ids: Vec<&str> = ids.iter().map(EntityId::as_str).collect();
                write!(f, "{}", ids.join(", "))
            }
            Targets::Selector(_) => f.write_str("<selector>"),
        }
    }
}

/// How a state rule decides whether a change matches
#[derive(Clone)]
pub enum StateFilter {
    Exact {
        from: Option<DynValue>,
        to: Option<DynValue>,
        /// Match attribute-only updates too
        all_changes: bool,
    },
    Lambda(StatePredicate),
}

impl Default for StateFilter {
    fn default() -> Self {
        StateFilter::Exact {
            from: None,
            to: None,
            all_changes: false,
        }
    }
}

impl StateFilter {
    /// Exact-match semantics; `Lambda` filters are evaluated by the dispatcher
    pub(crate) fn exact_match(
        from: Option<&DynValue>,
        to: Option<&DynValue>,
        all_changes: bool,
        new: &EntityState,
        old: Option<&EntityState>,
    ) -> bool {
        if let Some(to) = to {
            if new.state != *to {
                return false;
            }
        }
        if let Some(from) = from {
            match old {
                Some(old) if old.state == *from => {}
                _ => return false,
            }
        }
        let changed = old.map_or(true, |old| old.state != new.state);
        changed || all_changes
    }
}

/// What a state rule does when it fires
#[derive(Clone)]
pub enum StateAction {
    Callback(StateCallback),
    Scripts(Vec<String>),
    /// Declarative actions; without explicit targets they apply to the
    /// entity that triggered the rule
    Entity {
        targets: Option<Vec<EntityId>>,
        actions: ActionList,
    },
}

#[derive(Clone)]
pub struct StateRule {
    pub id: RuleId,
    pub targets: Targets,
    pub filter: StateFilter,
    pub stable_for: Option<Duration>,
    pub action: StateAction,
}

#[derive(Clone)]
pub enum EventTarget {
    Names(Vec<String>),
    Predicate(EventPredicate),
}

#[derive(Clone)]
pub struct EventRule {
    pub id: RuleId,
    pub target: EventTarget,
    pub callback: EventCallback,
}

/// Declarative actions replayed on a fixed period
#[derive(Clone)]
pub struct ScheduledRule {
    pub id: RuleId,
    pub period: Duration,
    pub targets: Vec<EntityId>,
    pub actions: ActionList,
}

#[cfg(test)]
mod tests {
    use super::*;
    use ha_core::Attributes;

    fn state(value: &str) -> EntityState {
        EntityState::new("light.hall".parse().unwrap(), value, Attributes::new())
    }

    #[test]
    fn test_exact_filter_to_and_from() {
        let on: DynValue = "on".into();
        let off: DynValue = "off".into();

        assert!(StateFilter::exact_match(None, Some(&on), false, &state("on"), Some(&state("off"))));
        assert!(!StateFilter::exact_match(None, Some(&on), false, &state("off"), Some(&state("on"))));
        assert!(StateFilter::exact_match(Some(&off), Some(&on), false, &state("on"), Some(&state("off"))));
        assert!(!StateFilter::exact_match(
            Some(&off),
            Some(&on),
            false,
            &state("on"),
            Some(&state("unavailable"))
        ));
        // A from filter cannot match an entity that had no previous state
        assert!(!StateFilter::exact_match(Some(&off), None, false, &state("on"), None));
    }

    #[test]
    fn test_unchanged_value_needs_all_changes() {
        assert!(!StateFilter::exact_match(None, None, false, &state("on"), Some(&state("on"))));
        assert!(StateFilter::exact_match(None, None, true, &state("on"), Some(&state("on"))));
        assert!(StateFilter::exact_match(None, None, false, &state("on"), None));
    }

    #[test]
    fn test_targets_display() {
        let targets = Targets::Ids(vec!["light.a".parse().unwrap(), "light.b".parse().unwrap()]);
        assert_eq!(targets.to_string(), "light.a, light.b");
        assert!(targets.matches(&EntityState::new(
            "light.b".parse().unwrap(),
            "on",
            Attributes::new()
        )));
    }
}
