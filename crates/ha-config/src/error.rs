//! Configuration errors

use std::path::PathBuf;
use thiserror::Error;

pub type ConfigResult<T> = Result<T, ConfigError>;

/// Anything that keeps the daemon from building its configuration
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("cannot read {path}: {source}")]
    ReadFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("{path} is not valid YAML: {source}")]
    ParseYaml {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },

    #[error("secret '{key}' is not defined in secrets.yaml")]
    SecretNotFound { key: String },

    #[error("environment variable '{var}' is not set and has no default")]
    EnvVarNotFound { var: String },

    /// A tag was applied to something other than a plain string
    #[error("invalid {tag} tag: {reason}")]
    InvalidTag { tag: String, reason: String },

    /// The document parsed but does not have the daemon's shape
    #[error("unexpected configuration layout: {0}")]
    Layout(#[source] serde_yaml::Error),

    #[error("invalid value for '{key}': {reason}")]
    InvalidValue { key: String, reason: String },
}
