use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use super::model::SessionEnvelope;
use crate::core::error::LauncherResult;

/// Session/Auth service: stores and refreshes per-account credentials.
///
/// `Err` from these calls means the service could not be reached; a rejected
/// credential comes back as an `Ok` envelope with `status: err`.
#[async_trait]
pub trait SessionService: Send + Sync {
    async fn ensure_valid_session(&self, username: &str) -> LauncherResult<SessionEnvelope>;

    /// Delete the persisted credential for `username`.
    async fn remove_session(&self, username: &str) -> LauncherResult<()>;
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "decision", rename_all = "snake_case")]
pub enum AccessDecision {
    Granted,
    Denied { reason: Option<String> },
}

/// Access/whitelist service.
#[async_trait]
pub trait AccessService: Send + Sync {
    async fn check_access(&self, username: &str) -> LauncherResult<AccessDecision>;
}

/// Used when no whitelist is configured.
#[derive(Debug, Default, Clone, Copy)]
pub struct OpenAccess;

#[async_trait]
impl AccessService for OpenAccess {
    async fn check_access(&self, _username: &str) -> LauncherResult<AccessDecision> {
        Ok(AccessDecision::Granted)
    }
}
