//! Runtime settings.
//!
//! Settings come from an optional JSON file, then environment overrides.
//! Every field has a default, so an empty or partial file is valid.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;

#[cfg(not(target_arch = "wasm32"))]
use std::time::Duration;

#[cfg(target_arch = "wasm32")]
use web_time::Duration;

/// Environment variable naming the settings file.
pub const CONFIG_ENV: &str = "DRIFTBOARD_CONFIG";
/// Environment override for [`StorageSettings::data_dir`].
pub const DATA_DIR_ENV: &str = "DRIFTBOARD_DATA_DIR";
/// Environment override for [`ServerSettings::addr`].
pub const ADDR_ENV: &str = "DRIFTBOARD_ADDR";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("Invalid config {path}: {source}")]
    Parse {
        path: PathBuf,
        source: serde_json::Error,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub autosave: AutosaveSettings,
    /// Crossfade length when switching drawings, in milliseconds.
    pub transition_ms: u64,
    pub storage: StorageSettings,
    pub server: ServerSettings,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AutosaveSettings {
    pub scene_delay_ms: u64,
    pub name_delay_ms: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageSettings {
    /// Directory of the file backend. `None` selects the default location.
    pub data_dir: Option<PathBuf>,
    /// Keep everything in memory.
    pub in_memory: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerSettings {
    pub addr: String,
    /// Filter used when `RUST_LOG` is unset.
    pub log_filter: String,
    /// How often scheduled backend jobs run, in milliseconds.
    pub scheduler_interval_ms: u64,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            autosave: AutosaveSettings::default(),
            transition_ms: 500,
            storage: StorageSettings::default(),
            server: ServerSettings::default(),
        }
    }
}

impl Default for AutosaveSettings {
    fn default() -> Self {
        Self {
            scene_delay_ms: 1000,
            name_delay_ms: 600,
        }
    }
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            addr: "0.0.0.0:3030".to_string(),
            log_filter: "driftboard_server=info,tower_http=info".to_string(),
            scheduler_interval_ms: 1000,
        }
    }
}

impl Settings {
    /// Load settings from `path`, or defaults when `path` is `None`.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let Some(path) = path else {
            return Ok(Self::default());
        };
        let json = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_json(&json).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Parse settings from JSON. Missing fields take their defaults.
    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }

    /// Load from the file named by `DRIFTBOARD_CONFIG` and apply environment
    /// overrides.
    pub fn from_env() -> Result<Self, ConfigError> {
        let path = std::env::var_os(CONFIG_ENV).map(PathBuf::from);
        let mut settings = Self::load(path.as_deref())?;
        settings.apply_overrides(|key| std::env::var(key).ok());
        Ok(settings)
    }

    /// Apply overrides looked up by environment variable name.
    pub fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(dir) = lookup(DATA_DIR_ENV).filter(|v| !v.is_empty()) {
            self.storage.data_dir = Some(PathBuf::from(dir));
        }
        if let Some(addr) = lookup(ADDR_ENV).filter(|v| !v.is_empty()) {
            self.server.addr = addr;
        }
    }

    pub fn scene_delay(&self) -> Duration {
        Duration::from_millis(self.autosave.scene_delay_ms)
    }

    pub fn name_delay(&self) -> Duration {
        Duration::from_millis(self.autosave.name_delay_ms)
    }

    pub fn transition_duration(&self) -> Duration {
        Duration::from_millis(self.transition_ms)
    }

    pub fn scheduler_interval(&self) -> Duration {
        Duration::from_millis(self.server.scheduler_interval_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_defaults_match_documented_delays() {
        let settings = Settings::default();
        assert_eq!(settings.scene_delay(), crate::autosave::SCENE_SAVE_DELAY);
        assert_eq!(settings.name_delay(), crate::autosave::NAME_SAVE_DELAY);
        assert_eq!(settings.transition_duration(), crate::transition::TRANSITION_DURATION);
    }

    #[test]
    fn test_partial_file_keeps_defaults() {
        let settings = Settings::from_json(r#"{ "autosave": { "scene_delay_ms": 250 } }"#).unwrap();
        assert_eq!(settings.autosave.scene_delay_ms, 250);
        assert_eq!(settings.autosave.name_delay_ms, 600);
        assert_eq!(settings.server.addr, "0.0.0.0:3030");
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("driftboard.json");
        std::fs::write(&path, r#"{ "transition_ms": 200, "storage": { "in_memory": true } }"#).unwrap();

        let settings = Settings::load(Some(&path)).unwrap();
        assert_eq!(settings.transition_ms, 200);
        assert!(settings.storage.in_memory);
    }

    #[test]
    fn test_load_reports_bad_json() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("broken.json");
        std::fs::write(&path, "{ not json").unwrap();

        assert!(matches!(Settings::load(Some(&path)), Err(ConfigError::Parse { .. })));
        assert!(matches!(
            Settings::load(Some(&dir.path().join("absent.json"))),
            Err(ConfigError::Read { .. })
        ));
    }

    #[test]
    fn test_overrides() {
        let env = HashMap::from([
            (DATA_DIR_ENV, "/tmp/boards".to_string()),
            (ADDR_ENV, "127.0.0.1:9000".to_string()),
        ]);
        let mut settings = Settings::default();
        settings.apply_overrides(|key| env.get(key).cloned());

        assert_eq!(settings.storage.data_dir, Some(PathBuf::from("/tmp/boards")));
        assert_eq!(settings.server.addr, "127.0.0.1:9000");
    }
}
