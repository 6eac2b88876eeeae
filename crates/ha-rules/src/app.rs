//! User apps
//!
//! An app is a named bundle of rules. The daemon hands every app the engine
//! once at startup; the app registers its rules and returns. Errors are
//! registration errors (bad entity id, rule without an action) and only
//! affect the app that raised them.

use crate::engine::RulesEngine;
use crate::error::RuleResult;

pub trait RulesApp: Send + Sync {
    fn name(&self) -> &str;

    /// Register this app's rules
    fn initialize(&self, engine: &RulesEngine) -> RuleResult<()>;
}
