use std::panic::AssertUnwindSafe;
use std::path::PathBuf;
use std::sync::{Arc, Mutex, Weak};
use std::time::Duration;

use futures_util::FutureExt;
use serde::Serialize;
use serde_json::Value;
use tracing::{debug, error, info, instrument, warn};

use super::phase::{LaunchFailure, LaunchPhase, LaunchPhaseState};
use super::playtime::PlaytimeLedger;
use super::runtime::{required_runtime, RuntimeRequirement};
use super::services::{
    AssetSync, LaunchRequest, LaunchTarget, ProcessLauncher, ResourceLimitsStore,
    RuntimeProvisioner,
};
use crate::core::clock::Clock;
use crate::core::error::{LauncherError, LauncherResult};
use crate::core::events::{
    emit, AssetDownloadCompleted, AssetDownloadProgress, EventSink, EventSource,
    InstanceLaunchProgress, ListenerId, ProcessExited, ProgressBridge, ProgressPayload,
    RuntimeDownloadCompleted, RuntimeDownloadProgress, ASSET_DOWNLOAD, INSTANCE_LAUNCH_PROGRESS,
    PROCESS_EXITED, RUNTIME_DOWNLOAD,
};
use crate::core::notify::{notify_best_effort, Notice, Notifier, ToastLevel};
use crate::core::session::{AccountSessionManager, AuthErrorCode, SessionService};
use crate::core::store::KeyedStore;
use crate::core::sync_lock;

/// Backend ports the pipeline drives.
#[derive(Clone)]
pub struct LaunchServices {
    pub runtime: Arc<dyn RuntimeProvisioner>,
    pub assets: Arc<dyn AssetSync>,
    pub sessions: Arc<dyn SessionService>,
    pub process: Arc<dyn ProcessLauncher>,
    pub limits: Arc<dyn ResourceLimitsStore>,
}

/// Event and UI plumbing shared with the rest of the app.
#[derive(Clone)]
pub struct LaunchEnvironment {
    pub bridge: ProgressBridge,
    pub source: Arc<dyn EventSource>,
    pub events: Arc<dyn EventSink>,
    pub notifier: Arc<dyn Notifier>,
    pub clock: Arc<dyn Clock>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AuthFailure {
    pub target_id: String,
    pub username: String,
    pub code: AuthErrorCode,
}

/// Invoked once per launch aborted by a structural auth error.
pub type AuthFailedCallback = Arc<dyn Fn(AuthFailure) + Send + Sync>;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum LaunchOutcome {
    Started { pid: u32 },
    /// `start` was called while the target was not idle; nothing happened.
    AlreadyActive { phase: LaunchPhase },
    AuthRequired { code: AuthErrorCode },
    Failed(LaunchFailure),
}

struct PhaseError {
    phase: LaunchPhase,
    error: LauncherError,
}

fn at(phase: LaunchPhase) -> impl FnOnce(LauncherError) -> PhaseError {
    move |error| PhaseError { phase, error }
}

fn publish(events: &dyn EventSink, target_id: &str, state: &LaunchPhaseState) {
    emit(
        events,
        INSTANCE_LAUNCH_PROGRESS,
        &InstanceLaunchProgress {
            id: target_id.to_string(),
            value: state.progress_value(),
            stage: state.stage_label(),
            state: state.ui_state().to_string(),
        },
    );
}

/// Drives one launch per target through
/// runtime → assets → session → process, and back to idle on exit.
pub struct InstanceLaunchCoordinator {
    services: LaunchServices,
    accounts: Arc<AccountSessionManager>,
    env: LaunchEnvironment,
    on_auth_failed: AuthFailedCallback,
    expiry_window: Duration,
    states: Arc<KeyedStore<String, LaunchPhaseState>>,
    failures: KeyedStore<String, LaunchFailure>,
    playtime: PlaytimeLedger,
    exit_listener: Mutex<Option<ListenerId>>,
}

impl InstanceLaunchCoordinator {
    pub fn new(
        services: LaunchServices,
        accounts: Arc<AccountSessionManager>,
        env: LaunchEnvironment,
        on_auth_failed: AuthFailedCallback,
    ) -> Self {
        Self {
            services,
            accounts,
            env,
            on_auth_failed,
            expiry_window: Duration::from_secs(600),
            states: Arc::new(KeyedStore::new()),
            failures: KeyedStore::new(),
            playtime: PlaytimeLedger::new(),
            exit_listener: Mutex::new(None),
        }
    }

    pub fn with_expiry_window(mut self, window: Duration) -> Self {
        self.expiry_window = window;
        self
    }

    pub fn state(&self, target_id: &str) -> LaunchPhaseState {
        self.states
            .get(&target_id.to_string())
            .unwrap_or_default()
    }

    pub fn last_failure(&self, target_id: &str) -> Option<LaunchFailure> {
        self.failures.get(&target_id.to_string())
    }

    pub fn playtime(&self, target_id: &str) -> u64 {
        self.playtime.total(target_id)
    }

    /// Drop all runtime state kept for a deleted target.
    pub fn forget_target(&self, target_id: &str) {
        let key = target_id.to_string();
        if self.states.evict(&key).is_some_and(|s| s.is_live()) {
            warn!("Forgetting target '{}' while its process is alive", target_id);
        }
        self.failures.evict(&key);
        self.playtime.evict(target_id);
        debug!("Launch state for '{}' evicted", target_id);
    }

    /// Register the process-exit listener. Calling again replaces the
    /// previous registration.
    pub fn attach_exit_listener(self: &Arc<Self>) {
        let weak: Weak<Self> = Arc::downgrade(self);
        let id = self.env.source.listen(
            PROCESS_EXITED,
            Arc::new(move |value: &Value| {
                let Some(coordinator) = weak.upgrade() else {
                    return;
                };
                match serde_json::from_value::<ProcessExited>(value.clone()) {
                    Ok(exited) => coordinator.handle_exit(&exited),
                    Err(err) => debug!("Ignoring malformed '{}' payload: {}", PROCESS_EXITED, err),
                }
            }),
        );
        if let Some(previous) = sync_lock(&self.exit_listener).replace(id) {
            self.env.source.unlisten(previous);
        }
    }

    pub fn detach_exit_listener(&self) {
        if let Some(id) = sync_lock(&self.exit_listener).take() {
            self.env.source.unlisten(id);
        }
    }

    /// Returns the target to idle and closes its play-time session.
    pub fn handle_exit(&self, exited: &ProcessExited) {
        let id = &exited.target_id;
        let was_live = self.states.replace_if(
            id.clone(),
            |current| current.is_some_and(LaunchPhaseState::is_live),
            LaunchPhaseState::Idle,
        );
        if !was_live {
            debug!("Exit for '{}' ignored: nothing running", id);
            return;
        }

        let played = self.playtime.finish(id, self.env.clock.now()).unwrap_or(0);
        info!(
            "Target '{}' exited with code {:?} after {}s",
            id, exited.exit_code, played
        );
        if let Some(code) = exited.exit_code.filter(|code| *code != 0) {
            notify_best_effort(
                self.env.notifier.as_ref(),
                Notice::toast(
                    ToastLevel::Warning,
                    format!("{} exited with code {}", id, code),
                ),
            );
        }
        publish(self.env.events.as_ref(), id, &LaunchPhaseState::Idle);
    }

    /// Start `target`. A no-op unless the target is idle.
    #[instrument(skip(self, target), fields(target_id = %target.id))]
    pub async fn start(&self, target: LaunchTarget) -> LaunchOutcome {
        let id = target.id.clone();
        let entering = LaunchPhaseState::ResolvingRuntime { percent: None };
        let accepted = self.states.replace_if(
            id.clone(),
            |current| current.map_or(true, LaunchPhaseState::is_idle),
            entering.clone(),
        );
        if !accepted {
            let phase = self.state(&id).phase();
            debug!("Launch of '{}' ignored: already {:?}", id, phase);
            return LaunchOutcome::AlreadyActive { phase };
        }
        self.failures.evict(&id);
        publish(self.env.events.as_ref(), &id, &entering);
        info!("Launching '{}' ({})", id, target.content_version);

        let result = match AssertUnwindSafe(self.run_pipeline(&target))
            .catch_unwind()
            .await
        {
            Ok(result) => result,
            Err(_) => {
                let phase = self.state(&id).phase();
                error!("Launch pipeline for '{}' panicked during {:?}", id, phase);
                Err(PhaseError {
                    phase,
                    error: LauncherError::Other("launch pipeline panicked".into()),
                })
            }
        };

        match result {
            Ok(pid) => self.enter_running(&id, pid),
            Err(failure) => self.fail(&id, failure),
        }
    }

    async fn run_pipeline(&self, target: &LaunchTarget) -> Result<u32, PhaseError> {
        let requirement = required_runtime(&target.content_version);
        if requirement.fallback {
            notify_best_effort(
                self.env.notifier.as_ref(),
                Notice::toast(
                    ToastLevel::Warning,
                    format!(
                        "Unknown game version {}, using runtime {}",
                        target.content_version, requirement.version
                    ),
                ),
            );
        }
        let runtime_path = self
            .ensure_runtime(&target.id, requirement)
            .await
            .map_err(at(LaunchPhase::ResolvingRuntime))?;

        self.enter(
            &target.id,
            LaunchPhaseState::DownloadingAssets {
                percent: None,
                current_file: None,
            },
        );
        self.sync_target(target, requirement)
            .await
            .map_err(at(LaunchPhase::DownloadingAssets))?;

        self.enter(&target.id, LaunchPhaseState::RefreshingSession);
        let access_token = self
            .refresh_session()
            .await
            .map_err(at(LaunchPhase::RefreshingSession))?;

        self.enter(&target.id, LaunchPhaseState::Launching);
        self.spawn_process(target, requirement, runtime_path, access_token)
            .await
            .map_err(at(LaunchPhase::Launching))
    }

    fn enter(&self, target_id: &str, state: LaunchPhaseState) {
        debug!("'{}' → {:?}", target_id, state.phase());
        publish(self.env.events.as_ref(), target_id, &state);
        self.states.set(target_id.to_string(), state);
    }

    /// Progress callback that rewrites the target's state while it is still
    /// in the phase the progress belongs to.
    fn progress_updater<P>(
        &self,
        target_id: &str,
        to_state: impl Fn(P) -> LaunchPhaseState + Send + Sync + 'static,
    ) -> impl Fn(P) + Send + Sync + 'static
    where
        P: 'static,
    {
        let states = self.states.clone();
        let events = self.env.events.clone();
        let id = target_id.to_string();
        move |payload: P| {
            let state = to_state(payload);
            let phase = state.phase();
            let updated = states.replace_if(
                id.clone(),
                |current| current.is_some_and(|c| c.phase() == phase),
                state.clone(),
            );
            if updated {
                publish(events.as_ref(), &id, &state);
            }
        }
    }

    async fn ensure_runtime(
        &self,
        target_id: &str,
        requirement: RuntimeRequirement,
    ) -> LauncherResult<PathBuf> {
        let version = requirement.version;
        match self.services.runtime.runtime_path(version).await {
            Ok(path) => {
                debug!("Runtime {} already installed at {:?}", version, path);
                return Ok(path);
            }
            Err(err) => debug!("Runtime {} not available ({}), installing", version, err),
        }

        let _progress = self.env.bridge.track_shared(
            RUNTIME_DOWNLOAD,
            format!("{target_id}:{version}"),
            version,
            self.progress_updater(target_id, |p: RuntimeDownloadProgress| {
                LaunchPhaseState::ResolvingRuntime {
                    percent: p.percent(),
                }
            }),
            |_: RuntimeDownloadCompleted| {},
        );
        self.services.runtime.install(version).await?;
        info!("Runtime {} installed", version);
        self.services.runtime.runtime_path(version).await
    }

    async fn sync_target(
        &self,
        target: &LaunchTarget,
        requirement: RuntimeRequirement,
    ) -> LauncherResult<()> {
        let dir = self
            .services
            .assets
            .prepare_target_dir(&target.id, requirement.version)
            .await?;
        debug!("Target directory for '{}': {:?}", target.id, dir);

        let _progress = self.env.bridge.track(
            ASSET_DOWNLOAD,
            target.id.clone(),
            self.progress_updater(&target.id, |p: AssetDownloadProgress| {
                LaunchPhaseState::DownloadingAssets {
                    percent: p.percent(),
                    current_file: p.current_file,
                }
            }),
            |_: AssetDownloadCompleted| {},
        );
        self.services
            .assets
            .sync_assets(&target.id, &target.content_version, &target.source_url)
            .await?;

        info!("Assets for '{}' are up to date", target.id);
        notify_best_effort(
            self.env.notifier.as_ref(),
            Notice::TargetReady {
                target_id: target.id.clone(),
            },
        );
        Ok(())
    }

    /// Re-validate the active session and return the token to launch with.
    /// Only structural auth errors stop the launch.
    async fn refresh_session(&self) -> LauncherResult<String> {
        let account =
            self.accounts
                .active_account()
                .await
                .ok_or_else(|| LauncherError::StructuralAuth {
                    username: String::new(),
                    code: AuthErrorCode::NoSession,
                })?;
        let username = account.username().to_string();
        let last_known = account.session.access_token.clone();

        if account
            .session
            .is_expiring_within(self.expiry_window, self.env.clock.now())
        {
            debug!("Session for '{}' is close to expiry", username);
        }

        let envelope = match self.services.sessions.ensure_valid_session(&username).await {
            Ok(envelope) => envelope,
            Err(err) => {
                warn!(
                    "Session check for '{}' failed ({}), using last-known token",
                    username, err
                );
                return Ok(last_known);
            }
        };

        match envelope.into_check().into_result(&username) {
            Ok(Some(session)) => {
                let token = session.access_token.clone();
                self.accounts.store_refreshed(&account.id, session).await;
                Ok(token)
            }
            Ok(None) => Ok(last_known),
            Err(err) if err.is_structural_auth() => Err(err),
            Err(err) => {
                warn!("{}; using last-known token", err);
                Ok(last_known)
            }
        }
    }

    async fn spawn_process(
        &self,
        target: &LaunchTarget,
        requirement: RuntimeRequirement,
        runtime_path: PathBuf,
        access_token: String,
    ) -> LauncherResult<u32> {
        let limits = match self.services.limits.load().await {
            Ok(limits) => limits,
            Err(err) => {
                warn!("Could not load resource limits ({}), using defaults", err);
                Default::default()
            }
        };

        let request = LaunchRequest {
            target_id: target.id.clone(),
            runtime_path,
            runtime_version: requirement.version.to_string(),
            content_version: target.content_version.clone(),
            access_token,
            min_memory_mb: limits.min_memory_mb,
            max_memory_mb: limits.max_memory_mb,
        };
        self.services.process.launch(&request).await
    }

    fn enter_running(&self, target_id: &str, pid: u32) -> LaunchOutcome {
        let now = self.env.clock.now();
        let running = LaunchPhaseState::Running {
            pid,
            started_at: now,
        };
        // An exit that arrived first has already put the target back to idle.
        let still_launching = self.states.replace_if(
            target_id.to_string(),
            |current| matches!(current, Some(LaunchPhaseState::Launching)),
            running.clone(),
        );
        if still_launching {
            self.playtime.begin(target_id, now);
            publish(self.env.events.as_ref(), target_id, &running);
        }
        info!("'{}' is running (pid {})", target_id, pid);
        LaunchOutcome::Started { pid }
    }

    fn fail(&self, target_id: &str, PhaseError { phase, error }: PhaseError) -> LaunchOutcome {
        let failure = LaunchFailure {
            phase,
            class: error.class(),
            message: error.to_string(),
        };
        publish(
            self.env.events.as_ref(),
            target_id,
            &LaunchPhaseState::Failed(failure.clone()),
        );
        self.states
            .set(target_id.to_string(), LaunchPhaseState::Idle);

        if let LauncherError::StructuralAuth { username, code } = error {
            warn!(
                "Launch of '{}' needs a new login: session for '{}' is unusable ({})",
                target_id, username, code
            );
            (self.on_auth_failed)(AuthFailure {
                target_id: target_id.to_string(),
                username,
                code: code.clone(),
            });
            return LaunchOutcome::AuthRequired { code };
        }

        error!(
            "Launch of '{}' failed during {:?}: {}",
            target_id, phase, failure.message
        );
        self.failures.set(target_id.to_string(), failure.clone());
        notify_best_effort(
            self.env.notifier.as_ref(),
            Notice::toast(
                ToastLevel::Error,
                format!("Could not launch {}: {}", target_id, failure.message),
            ),
        );
        LaunchOutcome::Failed(failure)
    }
}
