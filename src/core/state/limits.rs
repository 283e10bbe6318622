use std::path::PathBuf;

use async_trait::async_trait;
use tracing::{debug, info};

use crate::core::error::{LauncherError, LauncherResult};
use crate::core::launch::{ResourceLimits, ResourceLimitsStore, MIN_MEMORY_FLOOR_MB};

/// Total physical memory in MiB, if the platform reports it.
pub fn total_memory_mb() -> Option<u32> {
    let mut system = sysinfo::System::new();
    system.refresh_memory();
    let mb = system.total_memory() / (1024 * 1024);
    (mb > 0).then(|| mb.min(u32::MAX as u64) as u32)
}

/// Check `limits` and clamp the maximum to physical memory.
pub fn validate_limits(
    limits: ResourceLimits,
    total_memory_mb: Option<u32>,
) -> LauncherResult<ResourceLimits> {
    if limits.min_memory_mb < MIN_MEMORY_FLOOR_MB {
        return Err(LauncherError::InvalidResourceLimits(format!(
            "minimum memory must be at least {} MB, got {}",
            MIN_MEMORY_FLOOR_MB, limits.min_memory_mb
        )));
    }
    if limits.min_memory_mb > limits.max_memory_mb {
        return Err(LauncherError::InvalidResourceLimits(format!(
            "minimum memory ({} MB) exceeds maximum ({} MB)",
            limits.min_memory_mb, limits.max_memory_mb
        )));
    }

    let mut checked = limits;
    if let Some(total) = total_memory_mb {
        if checked.max_memory_mb > total {
            debug!(
                "Clamping max memory {} MB to physical {} MB",
                checked.max_memory_mb, total
            );
            checked.max_memory_mb = total;
        }
        if checked.min_memory_mb > checked.max_memory_mb {
            return Err(LauncherError::InvalidResourceLimits(format!(
                "minimum memory ({} MB) exceeds physical memory ({} MB)",
                checked.min_memory_mb, total
            )));
        }
    }
    Ok(checked)
}

/// `resource_limits.json` in the data directory.
pub struct FileLimitsStore {
    path: PathBuf,
    total_memory_mb: Option<u32>,
}

impl FileLimitsStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            total_memory_mb: total_memory_mb(),
        }
    }

    pub fn with_total_memory_mb(mut self, total: Option<u32>) -> Self {
        self.total_memory_mb = total;
        self
    }
}

#[async_trait]
impl ResourceLimitsStore for FileLimitsStore {
    async fn load(&self) -> LauncherResult<ResourceLimits> {
        let raw = match tokio::fs::read_to_string(&self.path).await {
            Ok(raw) => raw,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                return Ok(ResourceLimits::default());
            }
            Err(source) => {
                return Err(LauncherError::Io {
                    path: self.path.clone(),
                    source,
                })
            }
        };
        Ok(serde_json::from_str(&raw)?)
    }

    async fn save(&self, limits: ResourceLimits) -> LauncherResult<ResourceLimits> {
        let checked = validate_limits(limits, self.total_memory_mb)?;
        if let Some(parent) = self.path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| LauncherError::Io {
                    path: parent.to_path_buf(),
                    source: e,
                })?;
        }
        let json = serde_json::to_string_pretty(&checked)?;
        tokio::fs::write(&self.path, json)
            .await
            .map_err(|e| LauncherError::Io {
                path: self.path.clone(),
                source: e,
            })?;
        info!(
            "Resource limits saved: {}-{} MB",
            checked.min_memory_mb, checked.max_memory_mb
        );
        Ok(checked)
    }
}
