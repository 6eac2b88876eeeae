//! Errors raised while registering rules or issuing commands

use ha_core::EntityIdError;
use ha_hub::HubError;
use std::time::Duration;
use thiserror::Error;

/// Result type for rule registration and engine operations
pub type RuleResult<T> = Result<T, RuleError>;

#[derive(Debug, Error)]
pub enum RuleError {
    /// A rule or command named an id that is not `domain.object_id`
    #[error(transparent)]
    InvalidEntityId(#[from] EntityIdError),

    /// A rule was finalized without anything to do when it fires
    #[error("rule on {0} declares no action")]
    MissingAction(String),

    #[error(transparent)]
    Hub(#[from] HubError),

    /// A repeating schedule needs a non-zero period
    #[error("schedule period must be greater than zero")]
    InvalidPeriod,

    #[error("hub call did not complete within {0:?}")]
    Timeout(Duration),

    #[error("the engine is already dispatching events")]
    AlreadyRunning,

    #[error("the engine has shut down")]
    ShutDown,
}
