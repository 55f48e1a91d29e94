use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

pub const MIN_POLL_INTERVAL_SECS: u64 = 10;
pub const MAX_POLL_INTERVAL_SECS: u64 = 24 * 60 * 60;
pub const MAX_HELPER_TIMEOUT_SECS: u64 = 60 * 60;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Could not determine home directory")]
    NoHomeDir,
    #[error("Failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("Invalid settings in {path}: {source}")]
    Parse {
        path: PathBuf,
        source: serde_json::Error,
    },
}

/// Where usage readings come from.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum SourceKind {
    /// Call the usage endpoint directly.
    #[default]
    Api,
    /// Run the fetch-usage.sh helper and read its cache file.
    Helper,
    /// Only read the cache file.
    Cache,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub source: SourceKind,
    pub fallback_to_cache: bool,
    pub poll_interval_secs: u64,
    pub helper_timeout_secs: u64,
    pub show_values: bool,
    pub show_labels: bool,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            source: SourceKind::Api,
            fallback_to_cache: true,
            poll_interval_secs: 60,
            helper_timeout_secs: 60,
            show_values: true,
            show_labels: false,
        }
    }
}

impl Settings {
    /// Load settings from `path`; a missing file means defaults.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = match std::fs::read_to_string(path) {
            Ok(c) => c,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                log::debug!("No settings at {}, using defaults", path.display());
                return Ok(Self::default());
            }
            Err(source) => {
                return Err(ConfigError::Read {
                    path: path.to_path_buf(),
                    source,
                })
            }
        };

        serde_json::from_str(&content).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(
            self.poll_interval_secs
                .clamp(MIN_POLL_INTERVAL_SECS, MAX_POLL_INTERVAL_SECS),
        )
    }

    pub fn helper_timeout(&self) -> Duration {
        Duration::from_secs(self.helper_timeout_secs.clamp(1, MAX_HELPER_TIMEOUT_SECS))
    }

    /// Labels only make sense next to values.
    pub fn labels_visible(&self) -> bool {
        self.show_values && self.show_labels
    }
}

/// `<config dir>/claude-usage-bar/settings.json`
pub fn default_settings_path() -> Option<PathBuf> {
    Some(dirs::config_dir()?.join("claude-usage-bar").join("settings.json"))
}

/// `~/.claude`, home of the credentials, helper script and cache file.
pub fn claude_dir() -> Result<PathBuf, ConfigError> {
    let home = dirs::home_dir().ok_or(ConfigError::NoHomeDir)?;
    Ok(home.join(".claude"))
}
