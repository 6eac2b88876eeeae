//! Rule registry
//!
//! Append-only lists of rules per kind. Dispatch iterates a snapshot taken
//! under a short read lock, so registering a rule while an event is being
//! dispatched never blocks on user code and never changes the rule set seen
//! by that event.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, PoisonError, RwLock};
use tracing::{debug, instrument};

use crate::rule::{EventRule, RuleId, ScheduledRule, StateRule};

#[derive(Default)]
pub struct RuleRegistry {
    next_id: AtomicU64,
    state_rules: RwLock<Vec<Arc<StateRule>>>,
    event_rules: RwLock<Vec<Arc<EventRule>>>,
    scheduled_rules: RwLock<Vec<Arc<ScheduledRule>>>,
}

fn append<T>(list: &RwLock<Vec<Arc<T>>>, rule: T) -> Arc<T> {
    let rule = Arc::new(rule);
    list.write()
        .unwrap_or_else(PoisonError::into_inner)
        .push(rule.clone());
    rule
}

fn snapshot<T>(list: &RwLock<Vec<Arc<T>>>) -> Vec<Arc<T>> {
    list.read().unwrap_or_else(PoisonError::into_inner).clone()
}

fn count<T>(list: &RwLock<Vec<Arc<T>>>) -> usize {
    list.read().unwrap_or_else(PoisonError::into_inner).len()
}

impl RuleRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reserve the id of the next rule
    pub fn next_id(&self) -> RuleId {
        RuleId(self.next_id.fetch_add(1, Ordering::Relaxed) + 1)
    }

    #[instrument(skip_all, fields(rule_id = %rule.id, targets = %rule.targets))]
    pub fn add_state_rule(&self, rule: StateRule) -> Arc<StateRule> {
        debug!("Registering state rule");
        append(&self.state_rules, rule)
    }

    #[instrument(skip_all, fields(rule_id = %rule.id))]
    pub fn add_event_rule(&self, rule: EventRule) -> Arc<EventRule> {
        debug!("Registering event rule");
        append(&self.event_rules, rule)
    }

    #[instrument(skip_all, fields(rule_id = %rule.id, period = ?rule.period))]
    pub fn add_scheduled_rule(&self, rule: ScheduledRule) -> Arc<ScheduledRule> {
        debug!("Registering scheduled rule");
        append(&self.scheduled_rules, rule)
    }

    /// State rules in registration order
    pub fn state_rules(&self) -> Vec<Arc<StateRule>> {
        snapshot(&self.state_rules)
    }

    /// Event rules in registration order
    pub fn event_rules(&self) -> Vec<Arc<EventRule>> {
        snapshot(&self.event_rules)
    }

    pub fn scheduled_rules(&self) -> Vec<Arc<ScheduledRule>> {
        snapshot(&self.scheduled_rules)
    }

    /// Total number of registered rules
    pub fn len(&self) -> usize {
        count(&self.state_rules) + count(&self.event_rules) + count(&self.scheduled_rules)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
