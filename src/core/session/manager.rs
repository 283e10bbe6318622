use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use futures_util::future::join_all;
use serde::Serialize;
use tokio::sync::Mutex;
use tracing::{debug, info, instrument, warn};

use super::book::{AccountBook, ActiveChange};
use super::model::{Account, Session, SessionCheck, SyncStatus};
use super::service::{AccessDecision, AccessService, SessionService};
use crate::core::clock::Clock;
use crate::core::error::{LauncherError, LauncherResult};
use crate::core::notify::{notify_best_effort, Notice, Notifier, ToastLevel};
use crate::core::timer::{self, TimerHandle};

pub const ACCOUNT_SWEEP_INTERVAL: Duration = Duration::from_secs(5 * 60);

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LogoutOutcome {
    pub removed: String,
    pub active: ActiveChange,
}

impl LogoutOutcome {
    pub fn login_required(&self) -> bool {
        self.active == ActiveChange::Cleared
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum SwitchOutcome {
    Switched { refreshed: bool },
    /// The token was rejected and the account logged out instead.
    LoggedOut(LogoutOutcome),
    /// The auth service could not be reached; nothing changed.
    Unavailable,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SweepReport {
    /// Another sweep was still running.
    pub skipped: bool,
    pub checked: usize,
    pub refreshed: Vec<String>,
    pub dropped: Vec<String>,
    pub unreachable: Vec<String>,
    pub active_change: Option<ActiveChange>,
}

/// Resets the sweep flag however the sweep ends.
struct SweepGuard<'a>(&'a AtomicBool);

impl Drop for SweepGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

/// Owns the authenticated accounts and the active-account pointer.
pub struct AccountSessionManager {
    book: Mutex<AccountBook>,
    sessions: Arc<dyn SessionService>,
    access: Arc<dyn AccessService>,
    notifier: Arc<dyn Notifier>,
    clock: Arc<dyn Clock>,
    expiry_window: Duration,
    sweeping: AtomicBool,
}

impl AccountSessionManager {
    pub fn new(
        sessions: Arc<dyn SessionService>,
        access: Arc<dyn AccessService>,
        notifier: Arc<dyn Notifier>,
        clock: Arc<dyn Clock>,
        expiry_window: Duration,
    ) -> Self {
        Self {
            book: Mutex::new(AccountBook::default()),
            sessions,
            access,
            notifier,
            clock,
            expiry_window,
            sweeping: AtomicBool::new(false),
        }
    }

    pub async fn accounts(&self) -> Vec<Account> {
        self.book.lock().await.accounts().to_vec()
    }

    pub async fn active_account(&self) -> Option<Account> {
        self.book.lock().await.active().cloned()
    }

    pub async fn active_session(&self) -> Option<Session> {
        self.book.lock().await.active().map(|a| a.session.clone())
    }

    /// Add or replace the account for `session.username`.
    pub async fn add_account(&self, session: Session) -> Account {
        let account = self.book.lock().await.upsert(session);
        info!(
            "Account '{}' stored (active: {})",
            account.id, account.is_active
        );
        account
    }

    /// Login path: ask the whitelist first, then add.
    pub async fn admit(&self, session: Session) -> LauncherResult<Account> {
        match self.access.check_access(&session.username).await? {
            AccessDecision::Granted => Ok(self.add_account(session).await),
            AccessDecision::Denied { reason } => {
                warn!(
                    "Access denied for '{}': {}",
                    session.username,
                    reason.as_deref().unwrap_or("no reason given")
                );
                Err(LauncherError::AccessDenied(session.username))
            }
        }
    }

    /// Seed the list from persisted sessions at startup.
    pub async fn restore(&self, sessions: Vec<Session>, active: Option<&str>) {
        let mut book = self.book.lock().await;
        for session in sessions {
            book.upsert(session);
        }
        if let Some(id) = active {
            if !book.set_active(id) {
                debug!("Persisted active account '{}' no longer exists", id);
            }
        }
        info!("Restored {} account(s)", book.len());
    }

    /// User-initiated switch. The token is validated before anything changes.
    #[instrument(skip(self))]
    pub async fn switch_account(&self, id: &str) -> LauncherResult<SwitchOutcome> {
        let username = {
            let mut book = self.book.lock().await;
            let account = book
                .get_mut(id)
                .ok_or_else(|| LauncherError::AccountNotFound(id.to_string()))?;
            account.sync = SyncStatus::Syncing;
            account.username().to_string()
        };

        let check = match self.sessions.ensure_valid_session(&username).await {
            Ok(envelope) => envelope.into_check(),
            Err(err) => {
                warn!("Cannot validate '{}' before switching: {}", username, err);
                if let Some(account) = self.book.lock().await.get_mut(id) {
                    account.sync = SyncStatus::SyncFailed;
                }
                self.toast(
                    ToastLevel::Error,
                    format!("Could not verify {username}. Try again in a moment."),
                );
                return Ok(SwitchOutcome::Unavailable);
            }
        };

        match check {
            SessionCheck::Valid { session, refreshed } => {
                {
                    let mut book = self.book.lock().await;
                    let Some(account) = book.get_mut(id) else {
                        return Err(LauncherError::AccountNotFound(id.to_string()));
                    };
                    if let Some(session) = session {
                        account.apply_refresh(session);
                    }
                    account.sync = SyncStatus::Synced;
                    book.set_active(id);
                }
                info!("Switched active account to '{}'", id);
                self.toast(ToastLevel::Success, format!("Switched to {username}"));
                Ok(SwitchOutcome::Switched { refreshed })
            }
            SessionCheck::Invalid { code, .. } => {
                warn!(
                    "Session for '{}' rejected ({}), logging out",
                    username,
                    code.as_ref().map_or("no code", |c| c.as_str())
                );
                let outcome = self.logout_account(id).await?;
                self.toast(
                    ToastLevel::Error,
                    format!("The session for {username} expired. Please log in again."),
                );
                Ok(SwitchOutcome::LoggedOut(outcome))
            }
        }
    }

    /// Remove an account and its persisted credential.
    #[instrument(skip(self))]
    pub async fn logout_account(&self, id: &str) -> LauncherResult<LogoutOutcome> {
        let (removed, change) = self
            .book
            .lock()
            .await
            .remove(id)
            .ok_or_else(|| LauncherError::AccountNotFound(id.to_string()))?;

        if let Err(err) = self.sessions.remove_session(removed.username()).await {
            warn!(
                "Cannot delete stored credential for '{}': {}",
                removed.id, err
            );
        }

        info!("Logged out '{}'", removed.id);
        self.announce(&change);
        Ok(LogoutOutcome {
            removed: removed.id,
            active: change,
        })
    }

    /// Validate and refresh every account. Rejected accounts are dropped in
    /// one update; unreachable ones are kept.
    #[instrument(skip(self))]
    pub async fn validate_all(&self) -> SweepReport {
        if self.sweeping.swap(true, Ordering::SeqCst) {
            debug!("Account sweep already running, skipping");
            return SweepReport {
                skipped: true,
                ..Default::default()
            };
        }
        let _guard = SweepGuard(&self.sweeping);

        let usernames: Vec<(String, String)> = self
            .book
            .lock()
            .await
            .accounts()
            .iter()
            .map(|a| (a.id.clone(), a.username().to_string()))
            .collect();

        let checks = join_all(usernames.iter().map(|(_, username)| {
            let sessions = self.sessions.clone();
            async move { sessions.ensure_valid_session(username).await }
        }))
        .await;

        let mut report = SweepReport {
            checked: usernames.len(),
            ..Default::default()
        };
        let mut refreshed: Vec<(String, Session)> = Vec::new();
        let mut synced: Vec<String> = Vec::new();

        for ((id, username), result) in usernames.into_iter().zip(checks) {
            match result.map(|envelope| envelope.into_check()) {
                Ok(SessionCheck::Valid { session, .. }) => {
                    if let Some(session) = session {
                        report.refreshed.push(id.clone());
                        refreshed.push((id.clone(), session));
                    }
                    synced.push(id);
                }
                Ok(SessionCheck::Invalid { code, .. }) => {
                    info!(
                        "Dropping '{}': session rejected ({})",
                        username,
                        code.as_ref().map_or("no code", |c| c.as_str())
                    );
                    report.dropped.push(id);
                }
                Err(err) => {
                    warn!("Validation for '{}' unreachable: {}", username, err);
                    report.unreachable.push(id);
                }
            }
        }

        let change = {
            let mut book = self.book.lock().await;
            for (id, session) in refreshed {
                if let Some(account) = book.get_mut(&id) {
                    account.apply_refresh(session);
                }
            }
            for id in &synced {
                if let Some(account) = book.get_mut(id) {
                    account.sync = SyncStatus::Synced;
                }
            }
            for id in &report.unreachable {
                if let Some(account) = book.get_mut(id) {
                    account.sync = SyncStatus::SyncFailed;
                }
            }

            let now = self.clock.now();
            for account in book.accounts() {
                if account.session.is_expiring_within(self.expiry_window, now) {
                    debug!(
                        "Token for '{}' expires at {} (now {})",
                        account.id, account.session.expires_at, now
                    );
                }
            }

            if report.dropped.is_empty() {
                ActiveChange::Unchanged
            } else {
                book.remove_many(&report.dropped).1
            }
        };

        self.announce(&change);
        report.active_change = Some(change);
        report
    }

    /// Write back a credential refreshed outside the manager (launch path).
    pub async fn store_refreshed(&self, id: &str, session: Session) -> bool {
        let mut book = self.book.lock().await;
        match book.get_mut(id) {
            Some(account) => {
                account.apply_refresh(session);
                account.sync = SyncStatus::Synced;
                true
            }
            None => false,
        }
    }

    pub fn is_sweeping(&self) -> bool {
        self.sweeping.load(Ordering::SeqCst)
    }

    /// Start the periodic sweep. Dropping the handle stops it.
    pub fn spawn_periodic_validation(self: &Arc<Self>, period: Duration) -> TimerHandle {
        let manager: Weak<Self> = Arc::downgrade(self);
        timer::spawn_every("account-sweep", period, move || {
            let manager = manager.clone();
            async move {
                if let Some(manager) = manager.upgrade() {
                    manager.validate_all().await;
                }
            }
        })
    }

    fn announce(&self, change: &ActiveChange) {
        match change {
            ActiveChange::Unchanged => {}
            ActiveChange::Promoted(id) => notify_best_effort(
                self.notifier.as_ref(),
                Notice::AccountSwitched {
                    username: id.clone(),
                },
            ),
            ActiveChange::Cleared => {
                notify_best_effort(self.notifier.as_ref(), Notice::LoginRequired)
            }
        }
    }

    fn toast(&self, level: ToastLevel, message: String) {
        notify_best_effort(self.notifier.as_ref(), Notice::toast(level, message));
    }
}
