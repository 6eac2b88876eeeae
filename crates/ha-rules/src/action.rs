//! Declarative entity actions and the ordered list they accumulate in

use ha_core::{Attributes, Context, DynValue, EntityId};

use crate::executor::{ActionExecutor, ExecutionReport};

/// What a declarative action does to its target entities
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActionKind {
    TurnOn,
    TurnOff,
    Toggle,
    SetState,
    MediaPlay,
    MediaPause,
    MediaStop,
    MediaPlayPause,
}

impl ActionKind {
    /// Entity service implementing this action; `SetState` writes the state directly
    pub fn service(self) -> Option<&'static str> {
        match self {
            ActionKind::TurnOn => Some("turn_on"),
            ActionKind::TurnOff => Some("turn_off"),
            ActionKind::Toggle => Some("toggle"),
            ActionKind::SetState => None,
            ActionKind::MediaPlay => Some("media_play"),
            ActionKind::MediaPause => Some("media_pause"),
            ActionKind::MediaStop => Some("media_stop"),
            ActionKind::MediaPlayPause => Some("media_play_pause"),
        }
    }
}

/// One declarative action: a kind, an optional state payload and extra
/// attributes sent along with the hub call
#[derive(Debug, Clone, PartialEq)]
pub struct FluentAction {
    pub kind: ActionKind,
    pub state: Option<DynValue>,
    pub attributes: Attributes,
}

impl FluentAction {
    pub fn new(kind: ActionKind) -> Self {
        Self {
            kind,
            state: None,
            attributes: Attributes::new(),
        }
    }

    pub fn set_state(state: impl Into<DynValue>) -> Self {
        Self {
            state: Some(state.into()),
            ..Self::new(ActionKind::SetState)
        }
    }
}

/// Accumulator threaded through a builder chain
///
/// The action currently being built is `pending`; starting the next one
/// moves it to the back of the queue. Attributes always go to the pending
/// action. Executing either drains the list ([`ActionList::execute_and_clear`],
/// one-shot commands) or leaves it intact for the next run
/// ([`ActionList::execute_retained`], rules and schedules).
#[derive(Debug, Clone, Default)]
pub struct ActionList {
    pending: Option<FluentAction>,
    queued: Vec<FluentAction>,
}

impl ActionList {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start a new action, completing the pending one
    pub fn begin(&mut self, action: FluentAction) {
        if let Some(done) = self.pending.replace(action) {
            self.queued.push(done);
        }
    }

    /// Attach an attribute to the action being built
    ///
    /// Returns `false` when no action has been started.
    pub fn add_attribute(&mut self, name: impl Into<String>, value: impl Into<DynValue>) -> bool {
        match self.pending.as_mut() {
            Some(action) => {
                action.attributes.insert(name.into(), value.into());
                true
            }
            None => false,
        }
    }

    pub fn len(&self) -> usize {
        self.queued.len() + usize::from(self.pending.is_some())
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// All actions in the order they were declared
    pub fn iter(&self) -> impl Iterator<Item = &FluentAction> {
        self.queued.iter().chain(self.pending.iter())
    }

    /// Run every action against `targets` and empty the list
    pub async fn execute_and_clear(
        &mut self,
        executor: &ActionExecutor,
        targets: &[EntityId],
        context: &Context,
    ) -> ExecutionReport {
        let mut actions = std::mem::take(&mut self.queued);
        actions.extend(self.pending.take());
        executor.execute(targets, &actions, context).await
    }

    /// Run every action against `targets`, keeping them for the next run
    pub async fn execute_retained(
        &self,
        executor: &ActionExecutor,
        targets: &[EntityId],
        context: &Context,
    ) -> ExecutionReport {
        let actions: Vec<FluentAction> = self.iter().cloned().collect();
        executor.execute(targets, &actions, context).await
    }
}
