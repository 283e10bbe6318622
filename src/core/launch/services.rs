use std::path::PathBuf;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::core::error::LauncherResult;

/// A launchable target (an installed modpack instance).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LaunchTarget {
    pub id: String,
    pub content_version: String,
    /// Where the target's content manifest is served from.
    pub source_url: String,
}

/// Runtime provisioning. `install` must be idempotent.
#[async_trait]
pub trait RuntimeProvisioner: Send + Sync {
    async fn install(&self, version: &str) -> LauncherResult<()>;

    /// Fails when `version` is not installed.
    async fn runtime_path(&self, version: &str) -> LauncherResult<PathBuf>;
}

/// Target content synchronization. `sync_assets` is resumable.
#[async_trait]
pub trait AssetSync: Send + Sync {
    async fn prepare_target_dir(
        &self,
        target_id: &str,
        runtime_version: &str,
    ) -> LauncherResult<PathBuf>;

    async fn sync_assets(
        &self,
        target_id: &str,
        content_version: &str,
        source_url: &str,
    ) -> LauncherResult<()>;
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LaunchRequest {
    pub target_id: String,
    pub runtime_path: PathBuf,
    pub runtime_version: String,
    pub content_version: String,
    pub access_token: String,
    pub min_memory_mb: u32,
    pub max_memory_mb: u32,
}

#[async_trait]
pub trait ProcessLauncher: Send + Sync {
    /// Spawn the game process and return its pid.
    async fn launch(&self, request: &LaunchRequest) -> LauncherResult<u32>;
}

pub const MIN_MEMORY_FLOOR_MB: u32 = 512;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceLimits {
    pub min_memory_mb: u32,
    pub max_memory_mb: u32,
}

impl Default for ResourceLimits {
    fn default() -> Self {
        Self {
            min_memory_mb: MIN_MEMORY_FLOOR_MB,
            max_memory_mb: 2048,
        }
    }
}

#[async_trait]
pub trait ResourceLimitsStore: Send + Sync {
    async fn load(&self) -> LauncherResult<ResourceLimits>;

    /// Validate and persist; returns the limits actually stored.
    async fn save(&self, limits: ResourceLimits) -> LauncherResult<ResourceLimits>;
}
