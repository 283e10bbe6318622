use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures_util::StreamExt;
use reqwest::Client;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info};

use super::distribution::UpdateDistribution;
use super::model::{ReleaseInfo, UpdateArtifact};
use crate::core::error::{LauncherError, LauncherResult};
use crate::core::events::{
    emit, EventSink, UpdateDownloadComplete, UpdateDownloadProgress, UpdateDownloadStart,
    UPDATE_DOWNLOAD_COMPLETE, UPDATE_DOWNLOAD_PROGRESS, UPDATE_DOWNLOAD_START,
};

/// Bytes between two progress events.
const PROGRESS_STEP: u64 = 256 * 1024;

/// Release manifest served as JSON:
/// `{ "version", "url", "sha256", "notes" }`.
pub struct HttpUpdateSource {
    client: Client,
    manifest_url: String,
    download_dir: PathBuf,
    events: Arc<dyn EventSink>,
}

impl HttpUpdateSource {
    pub fn new(
        manifest_url: impl Into<String>,
        download_dir: impl Into<PathBuf>,
        events: Arc<dyn EventSink>,
    ) -> LauncherResult<Self> {
        let client = Client::builder()
            .user_agent(concat!("modlauncher/", env!("CARGO_PKG_VERSION")))
            .connect_timeout(Duration::from_secs(15))
            .build()?;
        Ok(Self {
            client,
            manifest_url: manifest_url.into(),
            download_dir: download_dir.into(),
            events,
        })
    }

    fn artifact_path(&self, release: &ReleaseInfo) -> PathBuf {
        self.download_dir.join(artifact_file_name(release))
    }
}

/// Last URL path segment, or `update-<version>` when the URL has none.
fn artifact_file_name(release: &ReleaseInfo) -> String {
    release
        .url
        .split(['?', '#'])
        .next()
        .and_then(|url| url.rsplit('/').next())
        .filter(|name| !name.is_empty() && !name.contains(':'))
        .map(str::to_string)
        .unwrap_or_else(|| format!("update-{}", release.version))
}

fn io_error(path: &Path) -> impl FnOnce(std::io::Error) -> LauncherError + '_ {
    move |source| LauncherError::Io {
        path: path.to_path_buf(),
        source,
    }
}

#[async_trait]
impl UpdateDistribution for HttpUpdateSource {
    async fn check(&self) -> LauncherResult<Option<ReleaseInfo>> {
        let response = self.client.get(&self.manifest_url).send().await?;
        let status = response.status();
        if status == reqwest::StatusCode::NOT_FOUND {
            debug!("No release manifest at {}", self.manifest_url);
            return Ok(None);
        }
        if !status.is_success() {
            return Err(LauncherError::DownloadFailed {
                url: self.manifest_url.clone(),
                status: status.as_u16(),
            });
        }
        let release: ReleaseInfo = response.json().await?;
        debug!("Release manifest lists {}", release.version);
        Ok(Some(release))
    }

    async fn download(&self, release: &ReleaseInfo) -> LauncherResult<UpdateArtifact> {
        tokio::fs::create_dir_all(&self.download_dir)
            .await
            .map_err(io_error(&self.download_dir))?;

        let response = self.client.get(&release.url).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(LauncherError::DownloadFailed {
                url: release.url.clone(),
                status: status.as_u16(),
            });
        }

        let total = response.content_length();
        emit(
            self.events.as_ref(),
            UPDATE_DOWNLOAD_START,
            &UpdateDownloadStart {
                version: release.version.clone(),
                total,
            },
        );

        let dest = self.artifact_path(release);
        let mut downloaded = 0u64;
        let mut next_report = PROGRESS_STEP;
        {
            let mut file = tokio::fs::File::create(&dest)
                .await
                .map_err(io_error(&dest))?;
            let mut stream = response.bytes_stream();
            while let Some(chunk) = stream.next().await {
                let chunk = chunk?;
                file.write_all(&chunk).await.map_err(io_error(&dest))?;
                downloaded += chunk.len() as u64;
                if downloaded >= next_report {
                    next_report = downloaded + PROGRESS_STEP;
                    emit(
                        self.events.as_ref(),
                        UPDATE_DOWNLOAD_PROGRESS,
                        &UpdateDownloadProgress {
                            version: Some(release.version.clone()),
                            downloaded,
                            total,
                        },
                    );
                }
            }
            file.flush().await.map_err(io_error(&dest))?;
        }

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            tokio::fs::set_permissions(&dest, std::fs::Permissions::from_mode(0o755))
                .await
                .map_err(io_error(&dest))?;
        }

        emit(
            self.events.as_ref(),
            UPDATE_DOWNLOAD_COMPLETE,
            &UpdateDownloadComplete {
                version: Some(release.version.clone()),
            },
        );
        info!(
            "Downloaded update {} ({} bytes) to {:?}",
            release.version, downloaded, dest
        );

        Ok(UpdateArtifact {
            version: release.version.clone(),
            path: dest,
            sha256: release.sha256.clone(),
        })
    }

    async fn install(&self, artifact: &UpdateArtifact) -> LauncherResult<()> {
        let child = tokio::process::Command::new(&artifact.path)
            .spawn()
            .map_err(io_error(&artifact.path))?;
        info!(
            "Installer for {} started (pid {:?})",
            artifact.version,
            child.id()
        );
        Ok(())
    }
}
