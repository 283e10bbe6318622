use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

pub const APP_DIR_NAME: &str = "ModLauncher";
pub const BOOTSTRAP_FILE: &str = "launcher_bootstrap.json";

/// Points the launcher at a relocated data directory.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct BootstrapConfig {
    data_dir: PathBuf,
}

fn default_base_dir() -> PathBuf {
    dirs::data_dir().unwrap_or_else(|| PathBuf::from("."))
}

/// Data directory under the platform data dir, honoring the bootstrap file.
pub fn default_data_dir() -> PathBuf {
    data_dir_in(&default_base_dir())
}

pub fn data_dir_in(base: &Path) -> PathBuf {
    let bootstrap_path = base.join(BOOTSTRAP_FILE);
    let dir = match std::fs::read_to_string(&bootstrap_path) {
        Ok(raw) => match serde_json::from_str::<BootstrapConfig>(&raw) {
            Ok(cfg) => {
                debug!("Data dir from bootstrap file: {:?}", cfg.data_dir);
                cfg.data_dir
            }
            Err(err) => {
                warn!("Ignoring unreadable {:?}: {}", bootstrap_path, err);
                base.join(APP_DIR_NAME)
            }
        },
        Err(_) => base.join(APP_DIR_NAME),
    };

    if !dir.exists() {
        if let Err(err) = std::fs::create_dir_all(&dir) {
            warn!("Could not create data dir {:?}: {}", dir, err);
        }
    }
    dir
}

/// Everything the launcher persists, relative to one data directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DataPaths {
    pub root: PathBuf,
}

impl DataPaths {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn config_file(&self) -> PathBuf {
        self.root.join("launcher_config.json")
    }

    pub fn resource_limits_file(&self) -> PathBuf {
        self.root.join("resource_limits.json")
    }

    pub fn update_state_file(&self) -> PathBuf {
        self.root.join("update_state.json")
    }

    pub fn update_downloads_dir(&self) -> PathBuf {
        self.root.join("updates")
    }
}
