//! Configuration for the rules daemon
//!
//! The daemon reads one YAML file (default `ha-rules.yaml`) with two custom
//! tags:
//!
//! - `!secret key` - substitute from `secrets.yaml` next to the file
//! - `!env_var NAME [default]` - substitute from the environment
//!
//! # Example
//!
//! ```ignore
//! use ha_config::DaemonConfig;
//!
//! let config = DaemonConfig::load("/etc/ha-rules/ha-rules.yaml")?;
//! let timeout = config.engine.action_timeout();
//! ```

mod daemon_config;
mod error;
mod loader;
mod secrets;

pub use daemon_config::{
    DaemonConfig, EngineConfig, EntitySeed, HubConfig, LoggingConfig, DEFAULT_CONFIG_FILE,
};
pub use error::{ConfigError, ConfigResult};
pub use loader::YamlLoader;
pub use secrets::Secrets;

pub use serde_yaml::Value;
