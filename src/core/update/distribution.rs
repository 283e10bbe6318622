use async_trait::async_trait;

use super::model::{ReleaseInfo, UpdateArtifact};
use crate::core::error::LauncherResult;

/// Update Distribution Service.
#[async_trait]
pub trait UpdateDistribution: Send + Sync {
    /// Latest published release, if the service knows of one.
    async fn check(&self) -> LauncherResult<Option<ReleaseInfo>>;

    /// Fetch `release` to local disk, emitting update-download events.
    async fn download(&self, release: &ReleaseInfo) -> LauncherResult<UpdateArtifact>;

    /// Hand the artifact to the installer. On success the caller is expected
    /// to exit so the installer can replace the running binary.
    async fn install(&self, artifact: &UpdateArtifact) -> LauncherResult<()>;
}
