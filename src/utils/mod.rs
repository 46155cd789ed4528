use std::path::{Path, PathBuf};

/// Name of the persisted migration records file
pub const MIGRATIONS_FILE: &str = "migrations.json";

/// Name of the operator configuration file
pub const CONFIG_FILE: &str = "config.json";

/// Get the path to the migration records file inside a data directory
pub fn get_migrations_path(data_dir: &Path) -> PathBuf {
    data_dir.join(MIGRATIONS_FILE)
}

/// Get the path to the configuration file inside a data directory
pub fn get_config_path(data_dir: &Path) -> PathBuf {
    data_dir.join(CONFIG_FILE)
}

/// Get current timestamp in ISO 8601 format
pub fn now_iso() -> String {
    chrono::Utc::now().to_rfc3339()
}

/// Get current time as seconds since the unix epoch
pub fn now_epoch() -> i64 {
    chrono::Utc::now().timestamp()
}

/// True when the value is missing or only whitespace
pub fn is_blank(value: &str) -> bool {
    value.trim().is_empty()
}
