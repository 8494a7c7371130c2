//! Engine configuration.
//!
//! Defaults match a small desktop machine: four concurrent backups and a
//! half-second reaction time to pause/resume/cancel. A JSON file may override
//! any field; omitted fields keep their default.

use std::path::Path;
use std::time::Duration;

use serde::Deserialize;

use crate::error::EngineError;

/// Folder names skipped wherever they appear in a path.
pub const DEFAULT_EXCLUDED_NAMES: &[&str] = &[
    "AppData",
    "Application Data",
    "Saved Games",
    "Favorites",
    "MicrosoftEdgeBackups",
];

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Maximum number of backups copying at the same time
    pub workers: usize,

    /// Delay between control-state checks while a task is paused
    #[serde(rename = "poll_interval_ms", with = "millis")]
    pub poll_interval: Duration,

    /// Deny-list matched as substrings of the full path
    pub excluded_names: Vec<String>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        EngineConfig {
            workers: 4,
            poll_interval: Duration::from_millis(500),
            excluded_names: DEFAULT_EXCLUDED_NAMES.iter().map(|s| s.to_string()).collect(),
        }
    }
}

impl EngineConfig {
    /// Load a configuration file, validating the result.
    pub fn from_file(path: &Path) -> Result<Self, EngineError> {
        let raw = std::fs::read_to_string(path).map_err(|e| EngineError::ConfigUnreadable {
            path: path.to_path_buf(),
            source: e,
        })?;
        let config: EngineConfig =
            serde_json::from_str(&raw).map_err(|e| EngineError::ConfigMalformed {
                path: path.to_path_buf(),
                source: e,
            })?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), EngineError> {
        if self.workers == 0 {
            return Err(EngineError::InvalidConfig {
                reason: "workers must be at least 1".to_string(),
            });
        }
        if self.poll_interval.is_zero() {
            return Err(EngineError::InvalidConfig {
                reason: "poll_interval_ms must be greater than 0".to_string(),
            });
        }
        Ok(())
    }
}

mod millis {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer};

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_millis)
    }
}
