//! Values referenced with `!secret key`
//!
//! Secrets live in `secrets.yaml` next to the main configuration file. They
//! keep their YAML type, so `!secret timeout` can fill a numeric field.

use crate::error::{ConfigError, ConfigResult};
use serde_yaml::Value;
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;
use tracing::debug;

pub const SECRETS_FILE: &str = "secrets.yaml";

#[derive(Debug, Clone, Default)]
pub struct Secrets {
    values: BTreeMap<String, Value>,
}

impl Secrets {
    /// Load `secrets.yaml` from `config_dir`; a missing file means no secrets
    pub fn load(config_dir: &Path) -> ConfigResult<Self> {
        let path = config_dir.join(SECRETS_FILE);
        if !path.exists() {
            debug!(path = %path.display(), "No secrets file");
            return Ok(Self::default());
        }

        let content = fs::read_to_string(&path).map_err(|e| ConfigError::ReadFile {
            path: path.clone(),
            source: e,
        })?;
        let values: Option<BTreeMap<String, Value>> =
            serde_yaml::from_str(&content).map_err(|e| ConfigError::ParseYaml {
                path: path.clone(),
                source: e,
            })?;
        let values = values.unwrap_or_default();

        debug!(path = %path.display(), count = values.len(), "Loaded secrets");
        Ok(Self { values })
    }

    pub fn get(&self, key: &str) -> ConfigResult<&Value> {
        self.values.get(key).ok_or_else(|| ConfigError::SecretNotFound {
            key: key.to_string(),
        })
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_secrets_keep_their_type() {
        let dir = TempDir::new().unwrap();
        fs::write(
            dir.path().join(SECRETS_FILE),
            "hub_token: abc123\naction_timeout: 7\n",
        )
        .unwrap();

        let secrets = Secrets::load(dir.path()).unwrap();
        assert_eq!(secrets.len(), 2);
        assert_eq!(secrets.get("hub_token").unwrap().as_str(), Some("abc123"));
        assert_eq!(secrets.get("action_timeout").unwrap().as_u64(), Some(7));
        assert!(matches!(
            secrets.get("missing"),
            Err(ConfigError::SecretNotFound { .. })
        ));
    }

    #[test]
    fn test_missing_or_empty_file() {
        let dir = TempDir::new().unwrap();
        assert!(Secrets::load(dir.path()).unwrap().is_empty());

        fs::write(dir.path().join(SECRETS_FILE), "").unwrap();
        assert!(Secrets::load(dir.path()).unwrap().is_empty());
    }
}
