use crate::utils::get_config_path;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;
use thiserror::Error;
use tokio::fs;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    JsonError(#[from] serde_json::Error),
}

/// Default location of the migration stack template
pub const DEFAULT_MIGRATION_STACK_TEMPLATE_URL: &str =
    "https://migration-resources.s3.amazonaws.com/migration-helper.yml";

fn default_poll_interval_secs() -> u64 {
    30
}

fn default_uploader_count() -> usize {
    8
}

fn default_queue_capacity() -> usize {
    1000
}

fn default_template_url() -> String {
    DEFAULT_MIGRATION_STACK_TEMPLATE_URL.to_string()
}

fn default_command_timeout_secs() -> u64 {
    600
}

fn default_command_log_prefix() -> String {
    "migration-command-logs".to_string()
}

/// Operator-supplied values that take precedence over anything the
/// migration stack deployment persisted into the migration context.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ConfigOverrides(HashMap<String, String>);

impl ConfigOverrides {
    pub fn new() -> Self {
        Self::default()
    }

    /// Look up an override. Blank values count as unset.
    pub fn get(&self, key: &str) -> Option<&str> {
        self.0
            .get(key)
            .map(String::as_str)
            .filter(|v| !v.trim().is_empty())
    }

    pub fn set(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.0.insert(key.into(), value.into());
    }

    pub fn with(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.set(key, value);
        self
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl From<HashMap<String, String>> for ConfigOverrides {
    fn from(map: HashMap<String, String>) -> Self {
        Self(map)
    }
}

/// Migration orchestrator configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MigrationConfig {
    /// Seconds between two status checks of the migration stack
    #[serde(default = "default_poll_interval_secs")]
    pub poll_interval_secs: u64,
    /// Number of concurrent file uploaders
    #[serde(default = "default_uploader_count")]
    pub uploader_count: usize,
    /// Capacity of the crawl/upload queue. The crawler waits when it is full.
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,
    #[serde(default = "default_template_url")]
    pub migration_stack_template_url: String,
    /// Upper bound for a single remote command, in seconds
    #[serde(default = "default_command_timeout_secs")]
    pub command_timeout_secs: u64,
    #[serde(default = "default_command_log_prefix")]
    pub command_log_prefix: String,
    #[serde(default, skip_serializing_if = "ConfigOverrides::is_empty")]
    pub overrides: ConfigOverrides,
}

impl Default for MigrationConfig {
    fn default() -> Self {
        Self {
            poll_interval_secs: default_poll_interval_secs(),
            uploader_count: default_uploader_count(),
            queue_capacity: default_queue_capacity(),
            migration_stack_template_url: default_template_url(),
            command_timeout_secs: default_command_timeout_secs(),
            command_log_prefix: default_command_log_prefix(),
            overrides: ConfigOverrides::default(),
        }
    }
}

impl MigrationConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }

    pub fn command_timeout(&self) -> Duration {
        Duration::from_secs(self.command_timeout_secs)
    }
}

/// Read the configuration file
pub async fn read_config(data_dir: &Path) -> Result<Option<MigrationConfig>, ConfigError> {
    let config_path = get_config_path(data_dir);

    if !config_path.exists() {
        return Ok(None);
    }

    let content = fs::read_to_string(&config_path).await?;
    let config: MigrationConfig = serde_json::from_str(&content)?;
    Ok(Some(config))
}

/// Write the configuration file
pub async fn write_config(data_dir: &Path, config: &MigrationConfig) -> Result<(), ConfigError> {
    let config_path = get_config_path(data_dir);
    fs::create_dir_all(data_dir).await?;
    let content = serde_json::to_string_pretty(config)?;
    fs::write(&config_path, content).await?;
    Ok(())
}
