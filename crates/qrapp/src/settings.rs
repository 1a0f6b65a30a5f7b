use std::path::Path;
use std::time::Duration;

use qrapp_core::update::{DEFAULT_FEED_OWNER, DEFAULT_FEED_REPO, LOCAL_FEED_PORT};
use qrapp_core::{FeedMode, UpdateConfig};
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum SettingsError {
    #[error("failed to read settings from {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid settings in {path}: {source}")]
    Parse {
        path: String,
        #[source]
        source: serde_json::Error,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AppSettings {
    #[serde(default = "default_ui_port")]
    pub ui_port: u16,

    #[serde(default = "default_true")]
    pub open_browser: bool,

    #[serde(default = "default_true")]
    pub check_for_updates: bool,

    #[serde(default = "default_http_timeout")]
    pub http_timeout_secs: u64,

    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_secs: u64,

    #[serde(default)]
    pub debug_logging: bool,

    #[serde(default = "default_max_log_size_bytes")]
    pub max_log_size_bytes: u64,

    #[serde(default = "default_bind_retry_delays")]
    pub bind_retry_delays_secs: Vec<u64>,

    #[serde(default = "default_feed_owner")]
    pub feed_owner: String,

    #[serde(default = "default_feed_repo")]
    pub feed_repo: String,
}

fn default_true() -> bool {
    true
}

fn default_ui_port() -> u16 {
    8080
}

fn default_http_timeout() -> u64 {
    60
}

fn default_connect_timeout() -> u64 {
    10
}

fn default_max_log_size_bytes() -> u64 {
    5 * 1024 * 1024
}

fn default_bind_retry_delays() -> Vec<u64> {
    vec![0, 1, 2, 5]
}

fn default_feed_owner() -> String {
    DEFAULT_FEED_OWNER.to_string()
}

fn default_feed_repo() -> String {
    DEFAULT_FEED_REPO.to_string()
}

impl Default for AppSettings {
    fn default() -> Self {
        Self {
            ui_port: default_ui_port(),
            open_browser: true,
            check_for_updates: true,
            http_timeout_secs: default_http_timeout(),
            connect_timeout_secs: default_connect_timeout(),
            debug_logging: false,
            max_log_size_bytes: default_max_log_size_bytes(),
            bind_retry_delays_secs: default_bind_retry_delays(),
            feed_owner: default_feed_owner(),
            feed_repo: default_feed_repo(),
        }
    }
}

impl AppSettings {
    /// Read settings from `path`. A missing file yields the defaults.
    pub fn load_from(path: &Path) -> Result<Self, SettingsError> {
        let content = match std::fs::read_to_string(path) {
            Ok(content) => content,
            Err(error) if error.kind() == std::io::ErrorKind::NotFound => {
                return Ok(Self::default());
            }
            Err(source) => {
                return Err(SettingsError::Read {
                    path: path.display().to_string(),
                    source,
                });
            }
        };

        serde_json::from_str(&content).map_err(|source| SettingsError::Parse {
            path: path.display().to_string(),
            source,
        })
    }

    /// Update configuration for this run.
    pub fn update_config(&self, local_feed: bool, force_on_dev_build: bool) -> UpdateConfig {
        let mode = if local_feed {
            FeedMode::Local {
                port: LOCAL_FEED_PORT,
            }
        } else {
            FeedMode::Remote {
                owner: self.feed_owner.clone(),
                repo: self.feed_repo.clone(),
            }
        };

        UpdateConfig::new(mode)
            .force_check_on_dev_build(force_on_dev_build)
            .with_timeouts(
                Duration::from_secs(self.http_timeout_secs),
                Duration::from_secs(self.connect_timeout_secs),
            )
    }
}
