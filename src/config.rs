//! Configuration — reads/writes `~/.quotatray/config.json`.
//!
//! The file uses camelCase keys so it stays hand-editable alongside the
//! tray frontends that share it. Unknown fields are ignored and missing
//! fields fall back to defaults, so older files keep loading. The core
//! treats the loaded values as read-only.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::warn;

/// Polling intervals below this are clamped; the local server does not
/// need sub-30-second sampling.
const MIN_POLLING_INTERVAL_SECS: u64 = 30;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct Config {
    /// Quota polling interval in seconds.
    pub polling_interval: u64,
    /// Model ids pinned to the top of any summary/menu.
    pub pinned_models: Vec<String>,
    /// Remaining-percentage threshold below which a low-quota alert fires.
    pub low_quota_threshold: f64,
    /// Whether low-quota/exhausted alerts are emitted at all.
    pub show_notifications: bool,
    /// API key for the OpenAI liveness provider; empty means unconfigured.
    pub openai_api_key: String,
    /// API key for the Anthropic liveness provider; empty means unconfigured.
    pub anthropic_api_key: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            polling_interval: 120,
            pinned_models: Vec::new(),
            low_quota_threshold: 20.0,
            show_notifications: true,
            openai_api_key: String::new(),
            anthropic_api_key: String::new(),
        }
    }
}

impl Config {
    /// Default config location: `~/.quotatray/config.json`.
    pub fn default_path() -> Result<PathBuf> {
        let home = dirs::home_dir().context("Cannot determine home directory")?;
        Ok(home.join(".quotatray").join("config.json"))
    }

    /// Load the config from `path`, writing a default file if none exists.
    /// A malformed file is logged and replaced by defaults in memory (the
    /// file itself is left untouched for the operator to inspect).
    pub fn load(path: &Path) -> Result<Self> {
        if path.exists() {
            let data = std::fs::read_to_string(path)
                .with_context(|| format!("Failed to read config at {}", path.display()))?;
            match serde_json::from_str(&data) {
                Ok(config) => return Ok(config),
                Err(e) => {
                    warn!("Malformed config at {} ({}) — using defaults", path.display(), e);
                    return Ok(Self::default());
                }
            }
        }

        let config = Self::default();
        config.save(path)?;
        Ok(config)
    }

    /// Write the config to `path`, creating parent directories as needed.
    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let data = serde_json::to_string_pretty(self)?;
        std::fs::write(path, data)
            .with_context(|| format!("Failed to save config to {}", path.display()))
    }

    /// Polling interval with the 30-second floor applied.
    pub fn polling_interval(&self) -> Duration {
        Duration::from_secs(self.polling_interval.max(MIN_POLLING_INTERVAL_SECS))
    }

    pub fn openai_api_key(&self) -> Option<&str> {
        Some(self.openai_api_key.as_str()).filter(|k| !k.is_empty())
    }

    pub fn anthropic_api_key(&self) -> Option<&str> {
        Some(self.anthropic_api_key.as_str()).filter(|k| !k.is_empty())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_written_on_first_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");

        let config = Config::load(&path).unwrap();
        assert!(path.exists());
        assert_eq!(config.polling_interval, 120);
        assert_eq!(config.low_quota_threshold, 20.0);
        assert!(config.show_notifications);
        assert!(config.openai_api_key().is_none());
    }

    #[test]
    fn test_camel_case_keys_and_missing_fields() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(
            &path,
            r#"{"pollingInterval": 60, "openaiApiKey": "sk-test", "lowQuotaThreshold": 15}"#,
        )
        .unwrap();

        let config = Config::load(&path).unwrap();
        assert_eq!(config.polling_interval, 60);
        assert_eq!(config.openai_api_key(), Some("sk-test"));
        assert_eq!(config.low_quota_threshold, 15.0);
        // Missing fields fall back to defaults.
        assert!(config.show_notifications);
        assert!(config.anthropic_api_key().is_none());
    }

    #[test]
    fn test_polling_interval_floor() {
        let config = Config {
            polling_interval: 5,
            ..Config::default()
        };
        assert_eq!(config.polling_interval(), Duration::from_secs(30));

        let config = Config {
            polling_interval: 300,
            ..Config::default()
        };
        assert_eq!(config.polling_interval(), Duration::from_secs(300));
    }

    #[test]
    fn test_malformed_file_falls_back_to_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(&path, "{not json").unwrap();

        let config = Config::load(&path).unwrap();
        assert_eq!(config.polling_interval, 120);
    }
}
