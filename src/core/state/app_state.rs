use std::sync::{Arc, Mutex};

use tracing::{debug, info, warn};

use super::config::LauncherConfig;
use super::limits::FileLimitsStore;
use super::paths::DataPaths;
use crate::core::clock::{Clock, SystemClock};
use crate::core::close_guard::{ChannelPrompt, CloseGuard, DownloadActivity, WindowControl};
use crate::core::error::LauncherResult;
use crate::core::events::{EventSink, EventSource, ProgressBridge, ProgressIndicator};
use crate::core::launch::{
    AssetSync, AuthFailure, InstanceLaunchCoordinator, LaunchEnvironment, LaunchServices,
    ProcessLauncher, RuntimeProvisioner,
};
use crate::core::notify::{notify_best_effort, Notice, Notifier};
use crate::core::session::{Account, AccessService, AccountSessionManager, SessionService};
use crate::core::sync_lock;
use crate::core::timer::TimerHandle;
use crate::core::update::{
    HttpUpdateSource, InstallStartedHook, UpdateDistribution, UpdateStateFile,
    UpdateStateMachine,
};

/// Backend services the launcher talks to.
#[derive(Clone)]
pub struct BackendPorts {
    pub sessions: Arc<dyn SessionService>,
    pub access: Arc<dyn AccessService>,
    pub runtime: Arc<dyn RuntimeProvisioner>,
    pub assets: Arc<dyn AssetSync>,
    pub process: Arc<dyn ProcessLauncher>,
    /// Overrides the HTTP source built from `update_manifest_url`.
    pub distribution: Option<Arc<dyn UpdateDistribution>>,
}

/// The host shell: event bus, taskbar, UI notices and the main window.
#[derive(Clone)]
pub struct HostPorts {
    pub source: Arc<dyn EventSource>,
    pub events: Arc<dyn EventSink>,
    pub indicator: Arc<dyn ProgressIndicator>,
    pub notifier: Arc<dyn Notifier>,
    pub window: Arc<dyn WindowControl>,
    /// Called once an update installer is running.
    pub on_install_started: Option<InstallStartedHook>,
}

pub struct AppState {
    pub paths: DataPaths,
    pub config: LauncherConfig,
    pub accounts: Arc<AccountSessionManager>,
    pub launcher: Arc<InstanceLaunchCoordinator>,
    /// `None` when no update source is configured.
    pub updates: Option<Arc<UpdateStateMachine>>,
    pub close_guard: Arc<CloseGuard>,
    pub prompt: Arc<ChannelPrompt>,
    pub limits: Arc<FileLimitsStore>,
    pub downloads: DownloadActivity,
    source: Arc<dyn EventSource>,
    timers: Mutex<Vec<TimerHandle>>,
}

impl AppState {
    pub fn new(paths: DataPaths, backend: BackendPorts, host: HostPorts) -> LauncherResult<Self> {
        let config = LauncherConfig::load_or_default(&paths.config_file());
        Self::with_clock(paths, config, backend, host, Arc::new(SystemClock))
    }

    pub fn with_clock(
        paths: DataPaths,
        config: LauncherConfig,
        backend: BackendPorts,
        host: HostPorts,
        clock: Arc<dyn Clock>,
    ) -> LauncherResult<Self> {
        let bridge = ProgressBridge::new(host.source.clone(), host.indicator.clone());
        let downloads = DownloadActivity::new();

        let accounts = Arc::new(AccountSessionManager::new(
            backend.sessions.clone(),
            backend.access.clone(),
            host.notifier.clone(),
            clock.clone(),
            config.session_expiry_window(),
        ));

        let limits = Arc::new(FileLimitsStore::new(paths.resource_limits_file()));
        let on_auth_failed = {
            let accounts = accounts.clone();
            let notifier = host.notifier.clone();
            Arc::new(move |failure: AuthFailure| {
                warn!(
                    "Launch of '{}' needs a new login for '{}' ({})",
                    failure.target_id, failure.username, failure.code
                );
                let accounts = accounts.clone();
                let notifier = notifier.clone();
                tokio::spawn(async move {
                    force_relogin(&accounts, notifier.as_ref(), &failure.username).await;
                });
            })
        };
        let launcher = Arc::new(
            InstanceLaunchCoordinator::new(
                LaunchServices {
                    runtime: backend.runtime,
                    assets: backend.assets,
                    sessions: backend.sessions,
                    process: backend.process,
                    limits: limits.clone(),
                },
                accounts.clone(),
                LaunchEnvironment {
                    bridge: bridge.clone(),
                    source: host.source.clone(),
                    events: host.events.clone(),
                    notifier: host.notifier.clone(),
                    clock: clock.clone(),
                },
                on_auth_failed,
            )
            .with_expiry_window(config.session_expiry_window()),
        );

        let distribution: Option<Arc<dyn UpdateDistribution>> =
            match (backend.distribution, &config.update_manifest_url) {
                (Some(distribution), _) => Some(distribution),
                (None, Some(url)) => Some(Arc::new(HttpUpdateSource::new(
                    url.clone(),
                    paths.update_downloads_dir(),
                    host.events.clone(),
                )?)),
                (None, None) => {
                    info!("No update source configured; self-update disabled");
                    None
                }
            };
        let updates = distribution.map(|distribution| {
            let machine = UpdateStateMachine::new(
                distribution,
                UpdateStateFile::new(paths.update_state_file()),
                bridge.clone(),
                host.notifier.clone(),
                clock.clone(),
                config.current_version.clone(),
            )
            .with_cooldown(config.update_check_cooldown())
            .with_download_activity(downloads.clone());
            Arc::new(match host.on_install_started.clone() {
                Some(hook) => machine.with_install_hook(hook),
                None => machine,
            })
        });

        let prompt = Arc::new(ChannelPrompt::new(host.notifier.clone()));
        let close_guard = Arc::new(CloseGuard::new(prompt.clone(), host.window));

        Ok(Self {
            paths,
            config,
            accounts,
            launcher,
            updates,
            close_guard,
            prompt,
            limits,
            downloads,
            source: host.source,
            timers: Mutex::new(Vec::new()),
        })
    }

    /// Attach event listeners and start the account sweep and update timers.
    /// Calling it again restarts everything.
    pub fn start_background(&self) {
        self.stop_background();
        self.launcher.attach_exit_listener();
        self.close_guard.attach(self.source.clone());

        let mut timers = sync_lock(&self.timers);
        timers.push(
            self.accounts
                .spawn_periodic_validation(self.config.account_sweep_interval()),
        );
        if let Some(updates) = &self.updates {
            timers.push(updates.spawn_startup(self.config.update_startup_delay()));
            timers.push(updates.spawn_periodic(self.config.update_poll_interval()));
        }
        info!(
            "Background tasks started: {}",
            timers
                .iter()
                .map(TimerHandle::label)
                .collect::<Vec<_>>()
                .join(", ")
        );
    }

    /// Cancel every timer and detach every listener.
    pub fn stop_background(&self) {
        sync_lock(&self.timers).clear();
        self.launcher.detach_exit_listener();
        self.close_guard.detach();
    }

    pub fn timer_count(&self) -> usize {
        sync_lock(&self.timers)
            .iter()
            .filter(|timer| !timer.is_finished())
            .count()
    }
}

/// Drop the account whose credential can no longer be used and show login.
async fn force_relogin(
    accounts: &AccountSessionManager,
    notifier: &dyn Notifier,
    username: &str,
) {
    match accounts.logout_account(&Account::id_for(username)).await {
        // Clearing the active account already announced the login.
        Ok(outcome) if outcome.login_required() => {}
        Ok(_) => notify_best_effort(notifier, Notice::LoginRequired),
        Err(err) => {
            debug!("Account '{}' already gone: {}", username, err);
            notify_best_effort(notifier, Notice::LoginRequired);
        }
    }
}

impl Drop for AppState {
    fn drop(&mut self) {
        self.stop_background();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::events::{EventHub, NoIndicator};
    use crate::core::launch::{LaunchOutcome, LaunchTarget};
    use crate::core::session::AuthErrorCode;
    use crate::core::testing::{
        session, CallLog, FakeAccess, FakeAssets, FakeDistribution, FakeProcess, FakeRuntime,
        FakeSessions, RecordingNotifier, Scripted,
    };
    use async_trait::async_trait;
    use std::time::Duration;

    #[derive(Default)]
    struct FakeWindow {
        log: CallLog,
    }

    #[async_trait]
    impl WindowControl for FakeWindow {
        async fn clear_downloading_flag(&self) -> LauncherResult<()> {
            self.log.record("clear_downloading_flag");
            Ok(())
        }

        async fn close_window(&self) -> LauncherResult<()> {
            self.log.record("close_window");
            Ok(())
        }
    }

    struct Rig {
        state: AppState,
        hub: Arc<EventHub>,
        sessions: Arc<FakeSessions>,
        notifier: Arc<RecordingNotifier>,
        _dir: tempfile::TempDir,
    }

    fn rig(with_updates: bool) -> Rig {
        let dir = tempfile::tempdir().unwrap();
        let hub = Arc::new(EventHub::new());
        let sessions = Arc::new(FakeSessions::default());
        let notifier = Arc::new(RecordingNotifier::default());
        let distribution: Option<Arc<dyn UpdateDistribution>> = if with_updates {
            Some(Arc::new(FakeDistribution::new(dir.path())))
        } else {
            None
        };
        let state = AppState::with_clock(
            DataPaths::new(dir.path()),
            LauncherConfig::default(),
            BackendPorts {
                sessions: sessions.clone(),
                access: Arc::new(FakeAccess::default()),
                runtime: Arc::new(FakeRuntime::with_installed(&["8", "17", "21"])),
                assets: Arc::new(FakeAssets::default()),
                process: Arc::new(FakeProcess::default()),
                distribution,
            },
            HostPorts {
                source: hub.clone(),
                events: hub.clone(),
                indicator: Arc::new(NoIndicator),
                notifier: notifier.clone(),
                window: Arc::new(FakeWindow::default()),
                on_install_started: None,
            },
            Arc::new(SystemClock),
        )
        .unwrap();
        Rig {
            state,
            hub,
            sessions,
            notifier,
            _dir: dir,
        }
    }

    #[tokio::test]
    async fn background_tasks_start_and_stop_together() {
        let rig = rig(true);

        rig.state.start_background();
        assert_eq!(rig.state.timer_count(), 3);
        assert_eq!(rig.hub.total_listeners(), 2);

        rig.state.start_background();
        assert_eq!(rig.state.timer_count(), 3);
        assert_eq!(rig.hub.total_listeners(), 2);

        rig.state.stop_background();
        assert_eq!(rig.state.timer_count(), 0);
        assert_eq!(rig.hub.total_listeners(), 0);
    }

    #[tokio::test]
    async fn update_timers_need_an_update_source() {
        let rig = rig(false);
        assert!(rig.state.updates.is_none());

        rig.state.start_background();
        assert_eq!(rig.state.timer_count(), 1);
    }

    #[tokio::test]
    async fn rejected_session_at_launch_asks_for_login() {
        let rig = rig(false);
        rig.state
            .accounts
            .add_account(session("Alex", "token", 4_000_000_000))
            .await;
        rig.sessions
            .answer("Alex", Scripted::Invalid(AuthErrorCode::RefreshFailed));

        let outcome = rig
            .state
            .launcher
            .start(LaunchTarget {
                id: "pack".into(),
                content_version: "1.16.5".into(),
                source_url: "https://packs.example/pack.json".into(),
            })
            .await;

        assert_eq!(
            outcome,
            LaunchOutcome::AuthRequired {
                code: AuthErrorCode::RefreshFailed
            }
        );
        let login_shown = || {
            rig.notifier
                .count(|notice| matches!(notice, Notice::LoginRequired))
        };
        tokio::time::timeout(Duration::from_secs(1), async {
            while login_shown() == 0 {
                tokio::task::yield_now().await;
            }
        })
        .await
        .unwrap();
        assert_eq!(login_shown(), 1);
        assert!(rig.state.accounts.active_account().await.is_none());
        assert!(rig.state.accounts.accounts().await.is_empty());
    }

    #[tokio::test]
    async fn rejected_session_leaves_other_accounts_signed_in() {
        let rig = rig(false);
        rig.state
            .accounts
            .restore(
                vec![
                    session("Steve", "token", 4_000_000_000),
                    session("Alex", "token", 4_000_000_000),
                ],
                Some("Alex"),
            )
            .await;
        rig.sessions
            .answer("Alex", Scripted::Invalid(AuthErrorCode::RefreshFailed));

        rig.state
            .launcher
            .start(LaunchTarget {
                id: "pack".into(),
                content_version: "1.16.5".into(),
                source_url: "https://packs.example/pack.json".into(),
            })
            .await;

        tokio::time::timeout(Duration::from_secs(1), async {
            while rig
                .notifier
                .count(|notice| matches!(notice, Notice::LoginRequired))
                == 0
            {
                tokio::task::yield_now().await;
            }
        })
        .await
        .unwrap();
        let remaining: Vec<String> = rig
            .state
            .accounts
            .accounts()
            .await
            .into_iter()
            .map(|account| account.id)
            .collect();
        assert_eq!(remaining, vec!["Steve".to_string()]);
    }
}
