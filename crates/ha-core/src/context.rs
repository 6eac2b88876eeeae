//! Context for correlating a rule firing with the hub calls it causes

use serde::{Deserialize, Serialize};
use ulid::Ulid;

/// Identifies the origin of an event or service call
///
/// Every rule firing opens a fresh context; service calls issued for that
/// firing carry it, and state changes caused by those calls carry it back as
/// parent, so one firing can be followed through the logs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Context {
    /// Unique identifier (ULID)
    pub id: String,

    /// Context that caused this one
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parent_id: Option<String>,
}

impl Context {
    pub fn new() -> Self {
        Self {
            id: Ulid::new().to_string(),
            parent_id: None,
        }
    }

    /// Create a context caused by this one
    pub fn child(&self) -> Self {
        Self {
            id: Ulid::new().to_string(),
            parent_id: Some(self.id.clone()),
        }
    }
}

impl Default for Context {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_child_links_to_parent() {
        let root = Context::new();
        let child = root.child();
        assert_ne!(child.id, root.id);
        assert_eq!(child.parent_id.as_deref(), Some(root.id.as_str()));
        assert!(root.parent_id.is_none());
    }
}
