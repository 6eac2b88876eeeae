//! Entity identifiers of the form `domain.object_id`

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Why a string is not a usable entity id
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum EntityIdError {
    #[error("entity id '{0}' must be of the form domain.object_id")]
    MissingSeparator(String),

    #[error("entity id '{0}' has an empty domain")]
    EmptyDomain(String),

    #[error("entity id '{0}' has an empty object id")]
    EmptyObjectId(String),

    #[error("entity id '{0}' contains characters outside [a-z0-9_] or misplaced underscores")]
    InvalidChars(String),
}

/// Identifier of a hub entity, e.g. `light.kitchen`
///
/// The full id is kept as one string so it can be borrowed cheaply; the
/// position of the separator gives the domain and object id slices.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct EntityId {
    full: String,
    dot: usize,
}

impl EntityId {
    /// Build an entity id from its two halves
    pub fn new(domain: &str, object_id: &str) -> Result<Self, EntityIdError> {
        format!("{domain}.{object_id}").parse()
    }

    /// The category prefix (`light`, `media_player`, `script`, ...)
    pub fn domain(&self) -> &str {
        &self.full[..self.dot]
    }

    /// The part after the separator
    pub fn object_id(&self) -> &str {
        &self.full[self.dot + 1..]
    }

    pub fn as_str(&self) -> &str {
        &self.full
    }

    // Mirrors the hub's slug rules: lowercase alphanumerics and underscores,
    // never leading or trailing underscores.
    fn valid_slug(s: &str) -> bool {
        !s.starts_with('_')
            && !s.ends_with('_')
            && s.chars()
                .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_')
    }
}

impl FromStr for EntityId {
    type Err = EntityIdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let dot = match s.find('.') {
            Some(dot) if s[dot + 1..].find('.').is_none() => dot,
            _ => return Err(EntityIdError::MissingSeparator(s.to_string())),
        };
        let (domain, object_id) = (&s[..dot], &s[dot + 1..]);

        if domain.is_empty() {
            return Err(EntityIdError::EmptyDomain(s.to_string()));
        }
        if object_id.is_empty() {
            return Err(EntityIdError::EmptyObjectId(s.to_string()));
        }
        if domain.contains("__") || !Self::valid_slug(domain) || !Self::valid_slug(object_id) {
            return Err(EntityIdError::InvalidChars(s.to_string()));
        }

        Ok(Self {
            full: s.to_string(),
            dot,
        })
    }
}

impl TryFrom<String> for EntityId {
    type Error = EntityIdError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        s.parse()
    }
}

impl TryFrom<&str> for EntityId {
    type Error = EntityIdError;

    fn try_from(s: &str) -> Result<Self, Self::Error> {
        s.parse()
    }
}

impl From<EntityId> for String {
    fn from(id: EntityId) -> String {
        id.full
    }
}

impl AsRef<str> for EntityId {
    fn as_ref(&self) -> &str {
        &self.full
    }
}

impl fmt::Display for EntityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.full)
    }
}
