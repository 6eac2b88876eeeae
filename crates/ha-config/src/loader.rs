//! YAML loading with tag substitution
//!
//! Supported tags:
//! - `!secret key` - value of `key` in secrets.yaml
//! - `!env_var NAME [default]` - environment variable, read as a YAML
//!   scalar so `!env_var TIMEOUT 5` yields a number

use crate::error::{ConfigError, ConfigResult};
use crate::secrets::Secrets;
use serde_yaml::value::TaggedValue;
use serde_yaml::Value;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, trace};

pub struct YamlLoader {
    config_dir: PathBuf,
    secrets: Secrets,
}

impl YamlLoader {
    /// Create a loader reading secrets from `config_dir`
    pub fn new(config_dir: impl Into<PathBuf>) -> ConfigResult<Self> {
        let config_dir = config_dir.into();
        let secrets = Secrets::load(&config_dir)?;
        Ok(Self { config_dir, secrets })
    }

    pub fn with_secrets(config_dir: impl Into<PathBuf>, secrets: Secrets) -> Self {
        Self {
            config_dir: config_dir.into(),
            secrets,
        }
    }

    pub fn config_dir(&self) -> &Path {
        &self.config_dir
    }

    /// Read and resolve a YAML file; relative paths start at the config directory
    pub fn load_file(&self, path: impl AsRef<Path>) -> ConfigResult<Value> {
        let path = self.config_dir.join(path.as_ref());
        debug!(path = %path.display(), "Loading YAML file");

        let content = fs::read_to_string(&path).map_err(|e| ConfigError::ReadFile {
            path: path.clone(),
            source: e,
        })?;
        self.load_str(&content, &path)
    }

    /// Parse and resolve YAML text; `source` is only used in errors
    pub fn load_str(&self, content: &str, source: &Path) -> ConfigResult<Value> {
        let value: Value = serde_yaml::from_str(content).map_err(|e| ConfigError::ParseYaml {
            path: source.to_path_buf(),
            source: e,
        })?;
        self.resolve(value)
    }

    fn resolve(&self, value: Value) -> ConfigResult<Value> {
        match value {
            Value::Tagged(tagged) => self.resolve_tag(*tagged),
            Value::Mapping(map) => map
                .into_iter()
                .map(|(k, v)| Ok((k, self.resolve(v)?)))
                .collect::<ConfigResult<serde_yaml::Mapping>>()
                .map(Value::Mapping),
            Value::Sequence(seq) => seq
                .into_iter()
                .map(|v| self.resolve(v))
                .collect::<ConfigResult<Vec<_>>>()
                .map(Value::Sequence),
            other => Ok(other),
        }
    }

    fn resolve_tag(&self, tagged: TaggedValue) -> ConfigResult<Value> {
        let tag = tagged.tag.to_string();
        trace!(tag = %tag, "Resolving tag");

        match tag.as_str() {
            "!secret" => {
                let key = tag_argument(&tag, tagged.value)?;
                debug!(key = %key, "Substituted secret");
                self.secrets.get(&key).cloned()
            }
            "!env_var" => {
                let argument = tag_argument(&tag, tagged.value)?;
                let (name, default) = match argument.split_once(char::is_whitespace) {
                    Some((name, default)) => (name, Some(default.trim())),
                    None => (argument.as_str(), None),
                };
                let raw = match (std::env::var(name), default) {
                    (Ok(value), _) => value,
                    (Err(_), Some(default)) => default.to_string(),
                    (Err(_), None) => {
                        return Err(ConfigError::EnvVarNotFound {
                            var: name.to_string(),
                        })
                    }
                };
                debug!(var = %name, "Substituted environment variable");
                Ok(serde_yaml::from_str(&raw).unwrap_or(Value::String(raw)))
            }
            _ => Ok(Value::Tagged(Box::new(TaggedValue {
                tag: tagged.tag,
                value: self.resolve(tagged.value)?,
            }))),
        }
    }
}

fn tag_argument(tag: &str, value: Value) -> ConfigResult<String> {
    match value {
        Value::String(s) => Ok(s),
        other => Err(ConfigError::InvalidTag {
            tag: tag.to_string(),
            reason: format!("expected a string, found {other:?}"),
        }),
    }
}
