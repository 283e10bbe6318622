use std::cmp::Ordering;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::core::clock::UnixSeconds;
use crate::core::error::{LauncherError, LauncherResult};

/// Persisted self-update record.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateState {
    pub current_version: String,
    #[serde(default)]
    pub available_version: Option<String>,
    #[serde(default)]
    pub downloaded: bool,
    #[serde(default)]
    pub download_ready: bool,
    #[serde(default)]
    pub last_check: Option<UnixSeconds>,
    #[serde(default)]
    pub artifact: Option<UpdateArtifact>,
}

impl UpdateState {
    pub fn new(current_version: impl Into<String>) -> Self {
        Self {
            current_version: current_version.into(),
            ..Default::default()
        }
    }

    /// The record describes the version that is already running.
    pub fn is_stale(&self) -> bool {
        self.available_version.as_deref() == Some(self.current_version.as_str())
    }

    /// Forget everything about a pending update; keeps `last_check`.
    pub fn clear_pending(&mut self) {
        self.available_version = None;
        self.downloaded = false;
        self.download_ready = false;
        self.artifact = None;
    }

    /// Artifact ready for installation, if the record says there is one.
    pub fn ready_artifact(&self) -> Option<&UpdateArtifact> {
        if !self.download_ready {
            return None;
        }
        self.artifact
            .as_ref()
            .filter(|a| self.available_version.as_deref() == Some(a.version.as_str()))
    }
}

/// Latest release as published by the distribution service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReleaseInfo {
    pub version: String,
    pub url: String,
    pub sha256: String,
    #[serde(default)]
    pub notes: Option<String>,
}

/// A downloaded release on disk. `sha256` is the digest it must match.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpdateArtifact {
    pub version: String,
    pub path: PathBuf,
    pub sha256: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DownloadOrigin {
    Auto,
    Manual,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CheckTrigger {
    /// First check after reconciliation; ignores the cooldown.
    Startup,
    Periodic,
    /// User asked from settings; still honors the cooldown.
    Manual,
    /// User insisted on checking now.
    Forced,
}

impl CheckTrigger {
    pub fn honors_cooldown(self) -> bool {
        matches!(self, Self::Periodic | Self::Manual)
    }

    /// Failures of user-initiated checks are shown, the rest only logged.
    pub fn is_user_initiated(self) -> bool {
        matches!(self, Self::Manual | Self::Forced)
    }
}

/// Compare dotted numeric versions (`1.10.0 > 1.9.3`). A leading `v` is
/// ignored; anything after `-` or `+` is dropped. `None` when either side
/// is not numeric.
pub fn compare_versions(a: &str, b: &str) -> Option<Ordering> {
    fn parts(version: &str) -> Option<Vec<u64>> {
        let core = version
            .trim()
            .trim_start_matches('v')
            .split(['-', '+'])
            .next()?;
        core.split('.').map(|p| p.parse::<u64>().ok()).collect()
    }
    let (mut a, mut b) = (parts(a)?, parts(b)?);
    let len = a.len().max(b.len());
    a.resize(len, 0);
    b.resize(len, 0);
    Some(a.cmp(&b))
}

/// Whether `candidate` should replace `current`.
pub fn is_newer(candidate: &str, current: &str) -> bool {
    match compare_versions(candidate, current) {
        Some(order) => order == Ordering::Greater,
        None => candidate != current,
    }
}

/// JSON file holding the [`UpdateState`].
#[derive(Debug, Clone)]
pub struct UpdateStateFile {
    path: PathBuf,
}

impl UpdateStateFile {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Missing or unreadable records load as `None`.
    pub async fn load(&self) -> Option<UpdateState> {
        let raw = match tokio::fs::read_to_string(&self.path).await {
            Ok(raw) => raw,
            Err(err) => {
                debug!("No update state at {:?}: {}", self.path, err);
                return None;
            }
        };
        match serde_json::from_str(&raw) {
            Ok(state) => Some(state),
            Err(err) => {
                warn!("Ignoring corrupt update state {:?}: {}", self.path, err);
                None
            }
        }
    }

    pub async fn save(&self, state: &UpdateState) -> LauncherResult<()> {
        if let Some(parent) = self.path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| LauncherError::Io {
                    path: parent.to_path_buf(),
                    source: e,
                })?;
        }
        let json = serde_json::to_string_pretty(state)?;
        tokio::fs::write(&self.path, json)
            .await
            .map_err(|e| LauncherError::Io {
                path: self.path.clone(),
                source: e,
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stale_when_available_equals_current() {
        let mut state = UpdateState::new("1.4.0");
        assert!(!state.is_stale());
        state.available_version = Some("1.4.0".into());
        assert!(state.is_stale());
        state.clear_pending();
        assert!(!state.is_stale());
        assert_eq!(state.available_version, None);
    }

    #[test]
    fn ready_artifact_must_match_available_version() {
        let mut state = UpdateState::new("1.0.0");
        state.available_version = Some("1.1.0".into());
        state.download_ready = true;
        state.artifact = Some(UpdateArtifact {
            version: "1.0.5".into(),
            path: "/tmp/old".into(),
            sha256: "00".into(),
        });
        assert!(state.ready_artifact().is_none());
        if let Some(artifact) = state.artifact.as_mut() {
            artifact.version = "1.1.0".into();
        }
        assert!(state.ready_artifact().is_some());
    }

    #[test]
    fn version_ordering_is_numeric() {
        assert!(is_newer("1.10.0", "1.9.3"));
        assert!(is_newer("v2.0", "1.99.99"));
        assert!(!is_newer("1.2.0", "1.2"));
        assert!(!is_newer("1.2.0-beta", "1.2.0"));
        assert!(is_newer("nightly-b", "nightly-a"));
    }

    #[test]
    fn record_uses_camel_case_on_disk() {
        let value = serde_json::to_value(UpdateState::new("1.0.0")).unwrap();
        assert_eq!(value["currentVersion"], "1.0.0");
        assert_eq!(value["downloadReady"], false);
    }

    #[tokio::test]
    async fn file_round_trip_and_corrupt_fallback() {
        let dir = tempfile::tempdir().unwrap();
        let file = UpdateStateFile::new(dir.path().join("nested").join("update_state.json"));
        assert_eq!(file.load().await, None);

        let mut state = UpdateState::new("1.0.0");
        state.last_check = Some(UnixSeconds(42));
        file.save(&state).await.unwrap();
        assert_eq!(file.load().await, Some(state));

        std::fs::write(file.path(), "{not json").unwrap();
        assert_eq!(file.load().await, None);
    }
}
