//! # gameapd-config
//!
//! Configuration model for the GameAP daemon: connection details for the
//! control-plane API, per-action script templates, the OS user table used
//! by the service-manager supervisor, and scheduler tuning.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

pub mod validation;

/// Top-level daemon configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Node identifier assigned by the control plane.
    pub ds_id: u32,

    /// Control-plane API base URL.
    pub api_host: String,

    /// Control-plane API token.
    pub api_key: String,

    #[serde(default = "default_listen_ip")]
    pub listen_ip: String,

    #[serde(default = "default_listen_port")]
    pub listen_port: u16,

    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Base directory holding all game server work dirs.
    #[serde(default = "default_work_path")]
    pub work_path: PathBuf,

    /// Tools directory; defaults to `<work_path>/tools`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tools_path: Option<PathBuf>,

    /// OS user table for service-account credentials.
    /// Values may carry a `base64:` prefix.
    #[serde(default)]
    pub users: HashMap<String, String>,

    /// Per-action command templates with a `{command}` placeholder.
    #[serde(default)]
    pub scripts: Scripts,

    #[serde(default)]
    pub task_manager: TaskManagerConfig,

    /// Directory holding generated service descriptors
    /// (service-manager supervisor only).
    #[serde(default = "default_services_config_path")]
    pub services_config_path: PathBuf,

    /// Name prefix of generated services.
    #[serde(default = "default_service_prefix")]
    pub service_prefix: String,

    // TLS material, consumed by the listener outside of this crate.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ca_certificate_file: Option<PathBuf>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub certificate_chain_file: Option<PathBuf>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub private_key_file: Option<PathBuf>,
}

/// Script templates wrapped around server commands.
///
/// Each template may reference `{command}` (replaced with the server's own
/// command line) plus the full shortcode set.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Scripts {
    #[serde(default)]
    pub start: String,
    #[serde(default)]
    pub stop: String,
    #[serde(default)]
    pub kill: String,
    #[serde(default)]
    pub restart: String,
    #[serde(default)]
    pub status: String,
    #[serde(default)]
    pub install: String,
    #[serde(default)]
    pub update: String,
    #[serde(default)]
    pub reinstall: String,
    #[serde(default)]
    pub delete: String,
}

/// Task scheduler tuning.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskManagerConfig {
    /// How often the ingest loop wakes up to consider an API poll.
    #[serde(default = "default_update_period", with = "duration_secs")]
    pub update_period: Duration,
}

impl Default for TaskManagerConfig {
    fn default() -> Self {
        Self {
            update_period: default_update_period(),
        }
    }
}

impl Config {
    /// Load configuration from a YAML file.
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(&path)
            .with_context(|| format!("Failed to read config file: {}", path.as_ref().display()))?;

        Self::load_from_string(&content)
    }

    /// Load configuration from a YAML string.
    pub fn load_from_string(content: &str) -> Result<Self> {
        let config: Config =
            serde_yaml::from_str(content).context("Failed to parse YAML configuration")?;

        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<()> {
        validation::validate_config(self)
    }

    /// Tools directory, derived from the work path unless overridden.
    pub fn tools_path(&self) -> PathBuf {
        self.tools_path
            .clone()
            .unwrap_or_else(|| self.work_path.join("tools"))
    }
}

/// Serialize durations as plain seconds.
mod duration_secs {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(value.as_secs())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        let secs = u64::deserialize(deserializer)?;
        Ok(Duration::from_secs(secs))
    }
}

fn default_listen_ip() -> String {
    "0.0.0.0".to_string()
}

fn default_listen_port() -> u16 {
    31717
}

fn default_log_level() -> String {
    "debug".to_string()
}

fn default_work_path() -> PathBuf {
    if cfg!(windows) {
        PathBuf::from("C:\\gameap")
    } else {
        PathBuf::from("/srv/gameap")
    }
}

fn default_services_config_path() -> PathBuf {
    PathBuf::from("C:\\gameap\\services")
}

fn default_service_prefix() -> String {
    "gameapServer".to_string()
}

fn default_update_period() -> Duration {
    Duration::from_secs(1)
}
