//! Startup configuration (§6 "Local persisted state", §9 config.json keys),
//! loaded the way the teacher's `Settings::load` already does: the `config`
//! crate layering a TOML/JSON file under environment overrides.

use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;
use std::path::Path;

fn default_api_base() -> String {
    "https://portal.example.com".to_string()
}

fn default_store_path() -> String {
    "data/gateway_config.db".to_string()
}

fn default_log_path() -> String {
    "gateway.log".to_string()
}

fn default_offline_buffer_days() -> u32 {
    7
}

fn default_retry_attempts() -> u32 {
    3
}

fn default_upload_interval_ms() -> u64 {
    10_000
}

fn default_true() -> bool {
    true
}

fn default_tag_history_max_rows() -> i64 {
    100_000
}

fn default_gateway_name() -> String {
    gethostname::gethostname().to_string_lossy().to_string()
}

/// Startup `config.json` (§6): `{activation_code, api_base,
/// offline_buffer_days?, retry_attempts?, log_level?}` plus the fields this
/// crate needs beyond the distilled set (store/log paths, gateway name,
/// uploader tuning) -- all optional with the same defaults the original used.
#[derive(Debug, Deserialize, Clone)]
pub struct Settings {
    pub activation_code: String,
    #[serde(default = "default_api_base")]
    pub api_base: String,
    #[serde(default = "default_gateway_name")]
    pub gateway_name: String,
    #[serde(default = "default_offline_buffer_days")]
    pub offline_buffer_days: u32,
    #[serde(default = "default_retry_attempts")]
    pub retry_attempts: u32,
    #[serde(default)]
    pub log_level: Option<String>,
    #[serde(default = "default_store_path")]
    pub store_path: String,
    #[serde(default = "default_log_path")]
    pub log_path: String,
    #[serde(default = "default_upload_interval_ms")]
    pub upload_interval_ms: u64,
    #[serde(default = "default_true")]
    pub compression_enabled: bool,
    #[serde(default = "default_tag_history_max_rows")]
    pub tag_history_max_rows: i64,
}

impl Settings {
    pub fn load(config_path: &Path) -> Result<Self, ConfigError> {
        let s = Config::builder()
            .add_source(File::from(config_path))
            .add_source(Environment::with_prefix("GATEWAY").separator("__"))
            .build()?;

        s.try_deserialize()
    }

    pub fn offline_buffer_ms(&self) -> i64 {
        self.offline_buffer_days as i64 * 24 * 3600 * 1000
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn loads_minimal_config_with_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        let mut f = std::fs::File::create(&path).unwrap();
        write!(f, r#"{{"activation_code": "ABCD-1234-EFGH"}}"#).unwrap();

        let settings = Settings::load(&path).unwrap();
        assert_eq!(settings.activation_code, "ABCD-1234-EFGH");
        assert_eq!(settings.offline_buffer_days, 7);
        assert_eq!(settings.retry_attempts, 3);
        assert!(settings.compression_enabled);
        assert_eq!(settings.upload_interval_ms, 10_000);
    }

    #[test]
    fn missing_activation_code_fails_to_deserialize() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        let mut f = std::fs::File::create(&path).unwrap();
        write!(f, "{{}}").unwrap();

        assert!(Settings::load(&path).is_err());
    }
}
