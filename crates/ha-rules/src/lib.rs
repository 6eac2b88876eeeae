//! Reactive rules for a home-automation hub
//!
//! Apps register rules through a fluent API on [`RulesEngine`]:
//!
//! - **State rules** fire when an entity's state changes, optionally
//!   filtered by exact `from`/`to` values or a custom predicate, and
//!   optionally only after the new state held for a while
//!   (`and_not_change_for`).
//! - **Event rules** fire on custom hub events by name or predicate.
//! - **Scheduled rules** replay declarative actions on a fixed period.
//!
//! Matched rules run as independent tasks. Hub calls issued for one firing
//! run concurrently and the engine waits for them at most the configured
//! action timeout. Errors and panics in user code are logged and never stop
//! dispatch.
//!
//! ```ignore
//! use ha_rules::prelude::*;
//!
//! engine
//!     .entity("binary_sensor.hall_motion")?
//!     .when_state_change()
//!     .to("off")
//!     .and_not_change_for(Duration::from_secs(120))
//!     .use_entity("light.hall")?
//!     .turn_off()
//!     .execute()?;
//! ```

mod action;
mod app;
mod builder;
mod dispatch;
mod engine;
mod error;
mod executor;
mod registry;
mod rule;
mod scheduler;

pub use action::{ActionKind, ActionList, FluentAction};
pub use app::RulesApp;
pub use builder::{
    EntityActions, EntityBuilder, EntityCommand, EventRuleBuilder, ExactFilter, LambdaFilter,
    StateActionBuilder, StateRuleBuilder, StateRuleReady,
};
pub use dispatch::Dispatcher;
pub use engine::RulesEngine;
pub use error::{RuleError, RuleResult};
pub use executor::{ActionExecutor, ExecutionReport};
pub use registry::RuleRegistry;
pub use rule::{RuleId, StateFilter, Targets};
pub use scheduler::until_next;

pub mod prelude {
    pub use crate::{EntityActions, RuleError, RuleId, RuleResult, RulesApp, RulesEngine};
    pub use ha_core::{Attributes, DynValue, EntityId, EntityState};
    pub use std::time::Duration;
}
