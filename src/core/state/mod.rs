pub mod app_state;
pub mod config;
pub mod limits;
pub mod paths;

pub use app_state::{AppState, BackendPorts, HostPorts};
pub use config::LauncherConfig;
pub use limits::{total_memory_mb, validate_limits, FileLimitsStore};
pub use paths::{data_dir_in, default_data_dir, DataPaths, APP_DIR_NAME, BOOTSTRAP_FILE};
