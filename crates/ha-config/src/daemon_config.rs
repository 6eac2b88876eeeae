//! Typed daemon configuration
//!
//! ```yaml
//! engine:
//!   action_timeout_secs: 5
//!   event_buffer: 1024
//! logging:
//!   filter: info
//! hub:
//!   entities:
//!     - entity_id: light.kitchen
//!       state: "off"
//!       attributes: { friendly_name: Kitchen }
//! ```
//!
//! Every section is optional and falls back to its defaults.

use ha_core::{Attributes, DynValue, EntityId};
use serde::{Deserialize, Serialize};
use serde_yaml::Value;
use std::path::Path;
use std::time::Duration;
use tracing::info;

use crate::error::{ConfigError, ConfigResult};
use crate::loader::YamlLoader;

pub const DEFAULT_CONFIG_FILE: &str = "ha-rules.yaml";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct DaemonConfig {
    pub engine: EngineConfig,
    pub logging: LoggingConfig,
    pub hub: HubConfig,
}

/// Settings of the rules engine itself
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Upper bound on how long one execution waits for its hub calls
    pub action_timeout_secs: u64,
    /// Events buffered per subscriber before it starts lagging
    pub event_buffer: usize,
}

impl EngineConfig {
    pub fn action_timeout(&self) -> Duration {
        Duration::from_secs(self.action_timeout_secs)
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            action_timeout_secs: 5,
            event_buffer: 1024,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// `tracing_subscriber::EnvFilter` directive; `RUST_LOG` wins when set
    pub filter: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            filter: "info".to_string(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct HubConfig {
    /// Entities created when the in-process hub starts
    pub entities: Vec<EntitySeed>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EntitySeed {
    pub entity_id: EntityId,
    #[serde(default)]
    pub state: DynValue,
    #[serde(default)]
    pub attributes: Attributes,
}

impl DaemonConfig {
    /// Load from `path`; a missing file yields the defaults
    pub fn load(path: impl AsRef<Path>) -> ConfigResult<Self> {
        let path = path.as_ref();
        if !path.exists() {
            info!(path = %path.display(), "No configuration file, using defaults");
            return Ok(Self::default());
        }

        let config_dir = path
            .parent()
            .filter(|dir| !dir.as_os_str().is_empty())
            .unwrap_or(Path::new("."));
        let loader = YamlLoader::new(config_dir)?;
        let file_name = path.file_name().map(Path::new).unwrap_or(path);
        let config = Self::from_yaml(loader.load_file(file_name)?)?;
        info!(path = %path.display(), entities = config.hub.entities.len(), "Loaded configuration");
        Ok(config)
    }

    /// Build from an already resolved YAML document
    pub fn from_yaml(value: Value) -> ConfigResult<Self> {
        if value.is_null() {
            return Ok(Self::default());
        }
        let config: Self = serde_yaml::from_value(value).map_err(ConfigError::Layout)?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> ConfigResult<()> {
        if self.engine.action_timeout_secs == 0 {
            return Err(ConfigError::InvalidValue {
                key: "engine.action_timeout_secs".to_string(),
                reason: "must be at least 1".to_string(),
            });
        }
        if self.engine.event_buffer == 0 {
            return Err(ConfigError::InvalidValue {
                key: "engine.event_buffer".to_string(),
                reason: "must be at least 1".to_string(),
            });
        }
        Ok(())
    }
}
