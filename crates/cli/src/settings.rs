//! Settings loading
//!
//! Layers, lowest to highest precedence: built-in defaults, an optional
//! config file (`queuectl.{toml,json,yaml}` in the working directory, or
//! `--config <file>`), then `QUEUECTL_*` environment variables.

use anyhow::{anyhow, bail, Context, Result};
use queuectl_core::EngineConfig;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::path::{Path, PathBuf};
use std::time::Duration;

const DEFAULT_DB_PATH: &str = "queue.db";
const DEFAULT_CONFIG_NAME: &str = "queuectl";
/// File written by `config set` when no `--config` is given
const DEFAULT_WRITABLE_CONFIG: &str = "queuectl.json";
const ENV_PREFIX: &str = "QUEUECTL";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub db_path: String,
    pub max_retries: u32,
    pub backoff_base: u32,
    pub job_timeout_secs: u64,
    pub idle_interval_secs: u64,
}

impl Default for Settings {
    fn default() -> Self {
        let engine = EngineConfig::default();
        Self {
            db_path: DEFAULT_DB_PATH.to_string(),
            max_retries: engine.max_retries,
            backoff_base: engine.backoff_base,
            job_timeout_secs: engine.job_timeout.as_secs(),
            idle_interval_secs: engine.idle_interval.as_secs(),
        }
    }
}

impl Settings {
    /// Load settings from defaults, file and environment
    pub fn load(config_file: Option<&Path>) -> Result<Self> {
        let file = match config_file {
            Some(path) => config::File::from(path).required(true),
            None => config::File::with_name(DEFAULT_CONFIG_NAME).required(false),
        };

        let settings: Settings = config::Config::builder()
            .add_source(file)
            .add_source(config::Environment::with_prefix(ENV_PREFIX).try_parsing(true))
            .build()
            .context("Failed to read configuration")?
            .try_deserialize()
            .context("Invalid configuration")?;

        settings.engine_config().validate()?;
        Ok(settings)
    }

    /// Engine view of the settings, passed into the core services
    pub fn engine_config(&self) -> EngineConfig {
        EngineConfig {
            max_retries: self.max_retries,
            backoff_base: self.backoff_base,
            job_timeout: Duration::from_secs(self.job_timeout_secs),
            idle_interval: Duration::from_secs(self.idle_interval_secs),
        }
    }

    /// Effective value of one key, `None` for unknown keys
    pub fn get(&self, key: &str) -> Result<Option<Value>> {
        let all = serde_json::to_value(self)?;
        Ok(all.get(key).cloned())
    }

    /// File that `config set` writes: `--config` when given, else `queuectl.json`
    pub fn writable_path(config_file: Option<&Path>) -> PathBuf {
        config_file
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from(DEFAULT_WRITABLE_CONFIG))
    }

    /// Persist `key = raw` into a JSON config file and return the resulting settings
    ///
    /// Other keys already in the file are kept. The file is only written when
    /// the key is known, the value has the key's type and the result validates.
    pub fn set_in_file(path: &Path, key: &str, raw: &str) -> Result<Settings> {
        if path.extension().and_then(|e| e.to_str()) != Some("json") {
            bail!(
                "config set writes JSON files; {} is not a .json path",
                path.display()
            );
        }

        let defaults = serde_json::to_value(Settings::default())?;
        let value = match defaults.get(key) {
            None => bail!("'{}' is not a valid config option", key),
            Some(Value::String(_)) => Value::String(raw.to_string()),
            Some(_) => raw.trim().parse::<u64>().map(Value::from).map_err(|_| {
                anyhow!("Invalid value for '{}': expected a non-negative integer", key)
            })?,
        };

        let mut doc: Map<String, Value> = if path.exists() {
            let text = std::fs::read_to_string(path)
                .with_context(|| format!("Failed to read {}", path.display()))?;
            serde_json::from_str(&text)
                .with_context(|| format!("{} is not a JSON object", path.display()))?
        } else {
            Map::new()
        };
        doc.insert(key.to_string(), value);

        let settings: Settings = serde_json::from_value(Value::Object(doc.clone()))
            .with_context(|| format!("Invalid value for '{}'", key))?;
        settings.engine_config().validate()?;

        std::fs::write(path, serde_json::to_string_pretty(&doc)?)
            .with_context(|| format!("Failed to write {}", path.display()))?;
        Ok(settings)
    }

    /// Database location with `~` expanded; `--db` wins over configuration
    pub fn database_url(&self, override_path: Option<&str>) -> String {
        let raw = override_path.unwrap_or(&self.db_path);
        shellexpand::tilde(raw).into_owned()
    }
}
