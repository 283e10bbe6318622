use std::time::Duration;

use serde::{Deserialize, Deserializer, Serialize};
use tracing::warn;

use crate::core::clock::UnixSeconds;
use crate::core::error::{LauncherError, LauncherResult};

/// Anything above this is a millisecond timestamp (year 5138 in seconds).
const MILLIS_THRESHOLD: i64 = 100_000_000_000;

/// Refreshable credential bound to one username.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Session {
    pub access_token: String,
    #[serde(default)]
    pub refresh_token: Option<String>,
    pub username: String,
    pub uuid: String,
    /// Unix seconds. Millisecond values from the backend are normalized on read.
    #[serde(deserialize_with = "seconds_or_millis")]
    pub expires_at: UnixSeconds,
    pub user_type: String,
}

impl Session {
    pub fn is_expired(&self, now: UnixSeconds) -> bool {
        self.expires_at <= now
    }

    pub fn is_expiring_within(&self, window: Duration, now: UnixSeconds) -> bool {
        self.expires_at <= now.plus(window)
    }
}

fn seconds_or_millis<'de, D>(deserializer: D) -> Result<UnixSeconds, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = i64::deserialize(deserializer)?;
    if raw > MILLIS_THRESHOLD {
        warn!("Session expiry {} looks like milliseconds, normalizing", raw);
        return Ok(UnixSeconds(raw / 1000));
    }
    Ok(UnixSeconds(raw))
}

/// Reconciliation status of an account's session with the auth service.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum SyncStatus {
    /// Added locally, never checked.
    #[default]
    Local,
    /// A validation request is in flight.
    Syncing,
    /// Last validation succeeded.
    Synced,
    /// Last validation could not reach the service; the session is kept.
    SyncFailed,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Account {
    /// Stable id, equal to the session username.
    pub id: String,
    pub session: Session,
    pub is_active: bool,
    #[serde(default)]
    pub sync: SyncStatus,
}

impl Account {
    pub fn new(session: Session) -> Self {
        Self {
            id: Self::id_for(&session.username),
            session,
            is_active: false,
            sync: SyncStatus::Local,
        }
    }

    pub fn id_for(username: &str) -> String {
        username.to_string()
    }

    pub fn username(&self) -> &str {
        &self.session.username
    }

    /// Apply a refreshed credential without replacing the account.
    pub fn apply_refresh(&mut self, refreshed: Session) {
        self.session.access_token = refreshed.access_token;
        if refreshed.refresh_token.is_some() {
            self.session.refresh_token = refreshed.refresh_token;
        }
        self.session.expires_at = refreshed.expires_at;
        self.session.uuid = refreshed.uuid;
        self.session.user_type = refreshed.user_type;
    }
}

/// Codes the auth service uses when a credential is unusable.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum AuthErrorCode {
    NoSession,
    NoRefreshToken,
    RefreshFailed,
    ProfileRejected,
    /// Any other code; not structural.
    Other(String),
}

impl AuthErrorCode {
    pub fn parse(raw: &str) -> Self {
        match raw.trim().to_ascii_lowercase().replace('-', "_").as_str() {
            "no_session" => Self::NoSession,
            "no_refresh_token" => Self::NoRefreshToken,
            "refresh_failed" => Self::RefreshFailed,
            "profile_rejected" => Self::ProfileRejected,
            _ => Self::Other(raw.to_string()),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            Self::NoSession => "no_session",
            Self::NoRefreshToken => "no_refresh_token",
            Self::RefreshFailed => "refresh_failed",
            Self::ProfileRejected => "profile_rejected",
            Self::Other(raw) => raw,
        }
    }

    pub fn is_structural(&self) -> bool {
        !matches!(self, Self::Other(_))
    }
}

impl From<String> for AuthErrorCode {
    fn from(raw: String) -> Self {
        Self::parse(&raw)
    }
}

impl From<AuthErrorCode> for String {
    fn from(code: AuthErrorCode) -> Self {
        code.as_str().to_string()
    }
}

impl std::fmt::Display for AuthErrorCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum EnvelopeStatus {
    Ok,
    Err,
}

/// Response of the auth service's validate-and-refresh operation.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SessionEnvelope {
    pub status: EnvelopeStatus,
    #[serde(default)]
    pub session: Option<Session>,
    #[serde(default)]
    pub refreshed: bool,
    #[serde(default)]
    pub code: Option<AuthErrorCode>,
    #[serde(default)]
    pub message: Option<String>,
}

impl SessionEnvelope {
    pub fn valid(session: Option<Session>, refreshed: bool) -> Self {
        Self {
            status: EnvelopeStatus::Ok,
            session,
            refreshed,
            code: None,
            message: None,
        }
    }

    pub fn invalid(code: AuthErrorCode) -> Self {
        Self {
            status: EnvelopeStatus::Err,
            session: None,
            refreshed: false,
            code: Some(code),
            message: None,
        }
    }

    pub fn into_check(self) -> SessionCheck {
        match self.status {
            EnvelopeStatus::Ok => SessionCheck::Valid {
                session: self.session,
                refreshed: self.refreshed,
            },
            EnvelopeStatus::Err => SessionCheck::Invalid {
                code: self.code,
                message: self.message,
            },
        }
    }
}

/// Interpreted envelope.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionCheck {
    /// Usable. `session` carries the refreshed credential when one was issued.
    Valid {
        session: Option<Session>,
        refreshed: bool,
    },
    /// The service rejected the credential.
    Invalid {
        code: Option<AuthErrorCode>,
        message: Option<String>,
    },
}

impl SessionCheck {
    /// Error form of an `Invalid` check: structural codes become
    /// [`LauncherError::StructuralAuth`], anything else a service error.
    pub fn into_result(self, username: &str) -> LauncherResult<Option<Session>> {
        match self {
            SessionCheck::Valid { session, .. } => Ok(session),
            SessionCheck::Invalid {
                code: Some(code), ..
            } if code.is_structural() => Err(LauncherError::StructuralAuth {
                username: username.to_string(),
                code,
            }),
            SessionCheck::Invalid { code, message } => Err(LauncherError::SessionService {
                username: username.to_string(),
                message: message
                    .or_else(|| code.map(|c| c.to_string()))
                    .unwrap_or_else(|| "session rejected".into()),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn session(expires_at: i64) -> Session {
        Session {
            access_token: "token".into(),
            refresh_token: None,
            username: "Steve".into(),
            uuid: "uuid".into(),
            expires_at: UnixSeconds(expires_at),
            user_type: "msa".into(),
        }
    }

    #[test]
    fn expiry_window_is_measured_in_seconds() {
        let now = UnixSeconds(1_700_000_000);
        let window = Duration::from_secs(10 * 60);
        assert!(!session(now.0 + 3600).is_expiring_within(window, now));
        assert!(session(now.0 + 300).is_expiring_within(window, now));
        assert!(!session(now.0 + 300).is_expired(now));
    }

    #[test]
    fn millisecond_expiry_is_normalized() {
        let parsed: Session = serde_json::from_value(json!({
            "access_token": "a",
            "username": "Steve",
            "uuid": "u",
            "expires_at": 1_700_000_000_000_i64,
            "user_type": "msa"
        }))
        .unwrap();
        assert_eq!(parsed.expires_at, UnixSeconds(1_700_000_000));
    }

    #[test]
    fn auth_codes_accept_both_spellings() {
        assert_eq!(AuthErrorCode::parse("no-session"), AuthErrorCode::NoSession);
        assert_eq!(
            AuthErrorCode::parse("PROFILE_REJECTED"),
            AuthErrorCode::ProfileRejected
        );
        assert!(!AuthErrorCode::parse("timeout").is_structural());
    }

    #[test]
    fn envelope_parses_backend_shape() {
        let envelope: SessionEnvelope = serde_json::from_value(json!({
            "status": "err",
            "code": "refresh_failed"
        }))
        .unwrap();
        let err = envelope.into_check().into_result("Steve").unwrap_err();
        assert!(err.is_structural_auth());
    }

    #[test]
    fn non_structural_rejection_is_transient() {
        let err = SessionEnvelope::invalid(AuthErrorCode::parse("rate_limited"))
            .into_check()
            .into_result("Steve")
            .unwrap_err();
        assert!(!err.is_structural_auth());
    }

    #[test]
    fn refresh_keeps_account_identity() {
        let mut account = Account::new(session(10));
        let mut refreshed = session(99);
        refreshed.access_token = "fresh".into();
        account.apply_refresh(refreshed);
        assert_eq!(account.id, "Steve");
        assert_eq!(account.session.access_token, "fresh");
        assert_eq!(account.session.expires_at, UnixSeconds(99));
    }
}
