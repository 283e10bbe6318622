use std::path::Path;

use sha2::{Digest, Sha256};

use super::model::UpdateArtifact;
use crate::core::error::{LauncherError, LauncherResult};

pub async fn sha256_file(path: &Path) -> LauncherResult<String> {
    let bytes = tokio::fs::read(path).await.map_err(|e| LauncherError::Io {
        path: path.to_path_buf(),
        source: e,
    })?;
    let mut hasher = Sha256::new();
    hasher.update(&bytes);
    Ok(hex::encode(hasher.finalize()))
}

/// Fail with [`LauncherError::Sha256Mismatch`] unless the file on disk hashes
/// to the artifact's digest.
pub async fn verify_artifact(artifact: &UpdateArtifact) -> LauncherResult<()> {
    let actual = sha256_file(&artifact.path).await?;
    if !actual.eq_ignore_ascii_case(artifact.sha256.trim()) {
        return Err(LauncherError::Sha256Mismatch {
            path: artifact.path.clone(),
            expected: artifact.sha256.clone(),
            actual,
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::testing::PAYLOAD_SHA256;

    #[tokio::test]
    async fn accepts_matching_digest_in_any_case() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("setup.bin");
        std::fs::write(&path, b"payload").unwrap();

        assert_eq!(sha256_file(&path).await.unwrap(), PAYLOAD_SHA256);
        let artifact = UpdateArtifact {
            version: "1.1.0".into(),
            path,
            sha256: PAYLOAD_SHA256.to_uppercase(),
        };
        verify_artifact(&artifact).await.unwrap();
    }

    #[tokio::test]
    async fn rejects_tampered_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("setup.bin");
        std::fs::write(&path, b"tampered").unwrap();

        let err = verify_artifact(&UpdateArtifact {
            version: "1.1.0".into(),
            path,
            sha256: PAYLOAD_SHA256.into(),
        })
        .await
        .unwrap_err();
        assert!(matches!(err, LauncherError::Sha256Mismatch { .. }));
    }
}
