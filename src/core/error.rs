use std::path::PathBuf;
use thiserror::Error;

use crate::core::session::AuthErrorCode;

/// Central error type for the orchestration backend.
/// Every module returns `Result<T, LauncherError>`.
#[derive(Debug, Error)]
pub enum LauncherError {
    // ── IO ──────────────────────────────────────────────
    #[error("IO error at {path:?}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    // ── Network ─────────────────────────────────────────
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Download failed for {url}: HTTP {status}")]
    DownloadFailed { url: String, status: u16 },

    // ── Integrity ───────────────────────────────────────
    #[error("SHA-256 mismatch for {path:?}: expected {expected}, got {actual}")]
    Sha256Mismatch {
        path: PathBuf,
        expected: String,
        actual: String,
    },

    // ── JSON ────────────────────────────────────────────
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    // ── Auth ────────────────────────────────────────────
    #[error("Session for {username} is unusable: {code}")]
    StructuralAuth {
        username: String,
        code: AuthErrorCode,
    },

    #[error("Session service error for {username}: {message}")]
    SessionService { username: String, message: String },

    #[error("Access denied for {0}")]
    AccessDenied(String),

    #[error("Account not found: {0}")]
    AccountNotFound(String),

    // ── Runtime / assets / process ──────────────────────
    #[error("Runtime {version} error: {message}")]
    Runtime { version: String, message: String },

    #[error("Asset sync failed for {target}: {message}")]
    AssetSync { target: String, message: String },

    #[error("Process launch failed for {target}: {message}")]
    ProcessLaunch { target: String, message: String },

    #[error("Unknown content version {0:?}")]
    UnmappedContentVersion(String),

    // ── Update ──────────────────────────────────────────
    #[error("Update error: {0}")]
    Update(String),

    // ── Config ──────────────────────────────────────────
    #[error("Invalid resource limits: {0}")]
    InvalidResourceLimits(String),

    // ── Generic ─────────────────────────────────────────
    #[error("{0}")]
    Other(String),
}

/// Convenience alias used throughout the crate.
pub type LauncherResult<T> = Result<T, LauncherError>;

/// How a failure is handled at a component boundary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorClass {
    /// The credential itself is unusable. Never retried; forces re-login.
    StructuralAuth,
    /// Network, timeouts, service hiccups. Surfaced, the user re-triggers.
    Transient,
    /// Bad input that has a deterministic fallback.
    Validation,
}

impl LauncherError {
    pub fn class(&self) -> ErrorClass {
        match self {
            LauncherError::StructuralAuth { .. } => ErrorClass::StructuralAuth,
            LauncherError::UnmappedContentVersion(_) | LauncherError::InvalidResourceLimits(_) => {
                ErrorClass::Validation
            }
            _ => ErrorClass::Transient,
        }
    }

    pub fn is_structural_auth(&self) -> bool {
        self.class() == ErrorClass::StructuralAuth
    }
}

impl From<std::io::Error> for LauncherError {
    fn from(source: std::io::Error) -> Self {
        LauncherError::Io {
            path: PathBuf::new(),
            source,
        }
    }
}

// ── Serialization for IPC ───────────────────────────────
// Tauri commands require the error type to implement `Serialize`.
impl serde::Serialize for LauncherError {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(&self.to_string())
    }
}
