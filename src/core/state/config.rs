use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::core::error::{LauncherError, LauncherResult};
use crate::core::update::UPDATE_POLL_INTERVAL;

/// Launcher-wide settings, persisted as `launcher_config.json`.
/// Unknown or missing fields fall back to their defaults.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LauncherConfig {
    pub account_sweep_interval_secs: u64,
    pub update_check_cooldown_secs: u64,
    pub update_startup_delay_secs: u64,
    pub session_expiry_window_secs: u64,
    pub current_version: String,
    pub update_manifest_url: Option<String>,
}

impl Default for LauncherConfig {
    fn default() -> Self {
        Self {
            account_sweep_interval_secs: 300,
            update_check_cooldown_secs: 1800,
            update_startup_delay_secs: 5,
            session_expiry_window_secs: 600,
            current_version: env!("CARGO_PKG_VERSION").to_string(),
            update_manifest_url: None,
        }
    }
}

impl LauncherConfig {
    pub fn account_sweep_interval(&self) -> Duration {
        Duration::from_secs(self.account_sweep_interval_secs.max(1))
    }

    pub fn update_check_cooldown(&self) -> Duration {
        Duration::from_secs(self.update_check_cooldown_secs.max(1))
    }

    /// Tick of the periodic update timer, never longer than the cooldown.
    pub fn update_poll_interval(&self) -> Duration {
        self.update_check_cooldown().min(UPDATE_POLL_INTERVAL)
    }

    pub fn update_startup_delay(&self) -> Duration {
        Duration::from_secs(self.update_startup_delay_secs)
    }

    pub fn session_expiry_window(&self) -> Duration {
        Duration::from_secs(self.session_expiry_window_secs)
    }

    /// Load from `path`; a missing or corrupt file yields the defaults.
    pub fn load_or_default(path: &Path) -> Self {
        let raw = match std::fs::read_to_string(path) {
            Ok(raw) => raw,
            Err(_) => {
                debug!("No config at {:?}, using defaults", path);
                return Self::default();
            }
        };
        serde_json::from_str(&raw).unwrap_or_else(|err| {
            warn!("Config at {:?} is unreadable ({}), using defaults", path, err);
            Self::default()
        })
    }

    pub fn save(&self, path: &Path) -> LauncherResult<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| LauncherError::Io {
                path: parent.to_path_buf(),
                source: e,
            })?;
        }
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(path, json).map_err(|e| LauncherError::Io {
            path: path.to_path_buf(),
            source: e,
        })
    }
}
