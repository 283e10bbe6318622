// ─── Event names and payload shapes ───
// Every event the orchestration layer consumes or produces, as emitted by the
// backend services (snake_case JSON).

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

pub const RUNTIME_DOWNLOAD_PROGRESS: &str = "runtime-download-progress";
pub const RUNTIME_DOWNLOAD_COMPLETED: &str = "runtime-download-completed";
pub const ASSET_DOWNLOAD_PROGRESS: &str = "asset-download-progress";
pub const ASSET_DOWNLOAD_COMPLETED: &str = "asset-download-completed";
pub const UPDATE_DOWNLOAD_START: &str = "update-download-start";
pub const UPDATE_DOWNLOAD_PROGRESS: &str = "update-download-progress";
pub const UPDATE_DOWNLOAD_COMPLETE: &str = "update-download-complete";
pub const PROCESS_EXITED: &str = "process-exited";
pub const CLOSE_REQUESTED_DURING_DOWNLOAD: &str = "close-requested-during-download";
pub const INSTANCE_LAUNCH_PROGRESS: &str = "instance-launch-progress";
pub const LAUNCHER_NOTICE: &str = "launcher-notice";

/// A progress/complete event pair tracked as one operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TrackedEvents {
    pub progress: &'static str,
    pub complete: &'static str,
}

pub const RUNTIME_DOWNLOAD: TrackedEvents = TrackedEvents {
    progress: RUNTIME_DOWNLOAD_PROGRESS,
    complete: RUNTIME_DOWNLOAD_COMPLETED,
};

pub const ASSET_DOWNLOAD: TrackedEvents = TrackedEvents {
    progress: ASSET_DOWNLOAD_PROGRESS,
    complete: ASSET_DOWNLOAD_COMPLETED,
};

pub const UPDATE_DOWNLOAD: TrackedEvents = TrackedEvents {
    progress: UPDATE_DOWNLOAD_PROGRESS,
    complete: UPDATE_DOWNLOAD_COMPLETE,
};

/// Payload that may name the operation it belongs to.
///
/// Payloads without a scope are accepted by any subscriber of the event.
pub trait ScopedPayload: DeserializeOwned + Send + 'static {
    fn scope(&self) -> Option<&str> {
        None
    }
}

/// Payload that carries a completion ratio.
pub trait ProgressPayload: ScopedPayload {
    fn percent(&self) -> Option<u8>;
}

fn ratio_percent(done: u64, total: Option<u64>) -> Option<u8> {
    match total {
        Some(total) if total > 0 => Some(((done.min(total) * 100) / total) as u8),
        _ => None,
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RuntimeDownloadProgress {
    pub version: Option<String>,
    #[serde(default)]
    pub downloaded: u64,
    pub total: Option<u64>,
}

impl ScopedPayload for RuntimeDownloadProgress {
    fn scope(&self) -> Option<&str> {
        self.version.as_deref()
    }
}

impl ProgressPayload for RuntimeDownloadProgress {
    fn percent(&self) -> Option<u8> {
        ratio_percent(self.downloaded, self.total)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RuntimeDownloadCompleted {
    pub version: Option<String>,
}

impl ScopedPayload for RuntimeDownloadCompleted {
    fn scope(&self) -> Option<&str> {
        self.version.as_deref()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AssetDownloadProgress {
    pub target_id: Option<String>,
    #[serde(default)]
    pub percent: f64,
    pub current_file: Option<String>,
}

impl ScopedPayload for AssetDownloadProgress {
    fn scope(&self) -> Option<&str> {
        self.target_id.as_deref()
    }
}

impl ProgressPayload for AssetDownloadProgress {
    fn percent(&self) -> Option<u8> {
        Some(self.percent.clamp(0.0, 100.0).round() as u8)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AssetDownloadCompleted {
    pub target_id: Option<String>,
}

impl ScopedPayload for AssetDownloadCompleted {
    fn scope(&self) -> Option<&str> {
        self.target_id.as_deref()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct UpdateDownloadStart {
    pub version: String,
    pub total: Option<u64>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct UpdateDownloadProgress {
    pub version: Option<String>,
    #[serde(default)]
    pub downloaded: u64,
    pub total: Option<u64>,
}

impl ScopedPayload for UpdateDownloadProgress {
    fn scope(&self) -> Option<&str> {
        self.version.as_deref()
    }
}

impl ProgressPayload for UpdateDownloadProgress {
    fn percent(&self) -> Option<u8> {
        ratio_percent(self.downloaded, self.total)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct UpdateDownloadComplete {
    pub version: Option<String>,
}

impl ScopedPayload for UpdateDownloadComplete {
    fn scope(&self) -> Option<&str> {
        self.version.as_deref()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ProcessExited {
    pub target_id: String,
    pub exit_code: Option<i32>,
}

/// Launch pipeline progress, one event per phase transition.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct InstanceLaunchProgress {
    pub id: String,
    pub value: u8,
    pub stage: String,
    pub state: String,
}
