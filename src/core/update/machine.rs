use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, Weak};
use std::time::Duration;

use futures_util::FutureExt;
use serde::Serialize;
use tracing::{debug, error, info, warn};

use super::distribution::UpdateDistribution;
use super::integrity::verify_artifact;
use super::model::{
    is_newer, CheckTrigger, DownloadOrigin, ReleaseInfo, UpdateArtifact, UpdateState,
    UpdateStateFile,
};
use crate::core::clock::Clock;
use crate::core::close_guard::DownloadActivity;
use crate::core::error::{LauncherError, LauncherResult};
use crate::core::events::{
    ProgressBridge, ProgressPayload, UpdateDownloadComplete, UpdateDownloadProgress,
    UPDATE_DOWNLOAD,
};
use crate::core::notify::{notify_best_effort, Notice, Notifier, ToastLevel};
use crate::core::sync_lock;
use crate::core::timer::{self, TimerHandle};

pub const UPDATE_CHECK_COOLDOWN: Duration = Duration::from_secs(30 * 60);
/// How often the periodic timer asks; the cooldown decides whether it checks.
pub const UPDATE_POLL_INTERVAL: Duration = Duration::from_secs(60);

/// Runs once the installer is up; expected to exit the app.
pub type InstallStartedHook = Arc<dyn Fn(&str) + Send + Sync>;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(tag = "phase", rename_all = "snake_case")]
pub enum UpdatePhase {
    #[default]
    Idle,
    Checking,
    NoneAvailable,
    Available {
        version: String,
    },
    Downloading {
        version: String,
        origin: DownloadOrigin,
        percent: Option<u8>,
    },
    Ready {
        version: String,
    },
    /// The installer has been started; the app is expected to exit.
    Installing {
        version: String,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum ReconcileOutcome {
    /// Reconciliation already ran in this process.
    AlreadyDone,
    Clean,
    ClearedStale,
    /// The stored artifact failed verification and was dropped.
    Discarded { version: String },
    Installing { version: String },
    /// Automatic install failed; a manual install is offered instead.
    InstallDeferred { version: String },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum CheckOutcome {
    Skipped { next_check_in_secs: u64 },
    AlreadyChecking,
    AlreadyDownloading { version: String },
    UpToDate,
    AlreadyDownloaded { version: String },
    Downloaded { version: String },
    DownloadFailed { version: String, message: String },
    Installing { version: String },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UpdateSnapshot {
    pub phase: UpdatePhase,
    pub record: UpdateState,
}

/// Resets a busy flag when the guarded operation ends, however it ends.
struct BusyFlag<'a>(&'a AtomicBool);

impl<'a> BusyFlag<'a> {
    fn acquire(flag: &'a AtomicBool) -> Option<Self> {
        if flag.swap(true, Ordering::SeqCst) {
            return None;
        }
        Some(Self(flag))
    }
}

impl Drop for BusyFlag<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

/// Run a distribution call with panics turned into errors, so callers fall
/// through their normal failure path.
async fn contained<T>(
    what: &str,
    call: impl Future<Output = LauncherResult<T>>,
) -> LauncherResult<T> {
    match AssertUnwindSafe(call).catch_unwind().await {
        Ok(result) => result,
        Err(_) => {
            error!("Update {} panicked", what);
            Err(LauncherError::Update(format!("{what} panicked")))
        }
    }
}

/// Persisted self-update lifecycle:
/// check → download → ready → install, reconciled once at startup.
pub struct UpdateStateMachine {
    distribution: Arc<dyn UpdateDistribution>,
    store: UpdateStateFile,
    bridge: ProgressBridge,
    notifier: Arc<dyn Notifier>,
    clock: Arc<dyn Clock>,
    activity: DownloadActivity,
    cooldown: Duration,
    current_version: String,
    on_install_started: Option<InstallStartedHook>,
    record: tokio::sync::Mutex<UpdateState>,
    phase: Arc<Mutex<UpdatePhase>>,
    latest: Mutex<Option<ReleaseInfo>>,
    reconciled: AtomicBool,
    checking: AtomicBool,
    downloading: AtomicBool,
}

impl UpdateStateMachine {
    pub fn new(
        distribution: Arc<dyn UpdateDistribution>,
        store: UpdateStateFile,
        bridge: ProgressBridge,
        notifier: Arc<dyn Notifier>,
        clock: Arc<dyn Clock>,
        current_version: impl Into<String>,
    ) -> Self {
        let current_version = current_version.into();
        Self {
            distribution,
            store,
            bridge,
            notifier,
            clock,
            activity: DownloadActivity::new(),
            cooldown: UPDATE_CHECK_COOLDOWN,
            record: tokio::sync::Mutex::new(UpdateState::new(current_version.clone())),
            current_version,
            on_install_started: None,
            phase: Arc::new(Mutex::new(UpdatePhase::Idle)),
            latest: Mutex::new(None),
            reconciled: AtomicBool::new(false),
            checking: AtomicBool::new(false),
            downloading: AtomicBool::new(false),
        }
    }

    pub fn with_cooldown(mut self, cooldown: Duration) -> Self {
        self.cooldown = cooldown;
        self
    }

    /// Share the in-flight download counter with the close guard.
    pub fn with_download_activity(mut self, activity: DownloadActivity) -> Self {
        self.activity = activity;
        self
    }

    pub fn with_install_hook(mut self, hook: InstallStartedHook) -> Self {
        self.on_install_started = Some(hook);
        self
    }

    pub fn current_version(&self) -> &str {
        &self.current_version
    }

    pub fn phase(&self) -> UpdatePhase {
        sync_lock(&self.phase).clone()
    }

    pub fn is_checking(&self) -> bool {
        self.checking.load(Ordering::SeqCst)
    }

    pub async fn snapshot(&self) -> UpdateSnapshot {
        UpdateSnapshot {
            phase: self.phase(),
            record: self.record.lock().await.clone(),
        }
    }

    fn set_phase(&self, phase: UpdatePhase) -> UpdatePhase {
        debug!("Update phase → {:?}", phase);
        std::mem::replace(&mut *sync_lock(&self.phase), phase)
    }

    async fn persist(&self, record: &UpdateState) {
        if let Err(err) = self.store.save(record).await {
            warn!("Could not persist update state: {}", err);
        }
    }

    fn install_started(&self, version: &str) {
        info!("Installer for {} is running", version);
        if let Some(hook) = &self.on_install_started {
            hook(version);
        }
    }

    fn toast(&self, level: ToastLevel, message: String) {
        notify_best_effort(self.notifier.as_ref(), Notice::toast(level, message));
    }

    /// Load the persisted record, drop it if it is stale, and install a
    /// previously downloaded update. Runs once per process.
    pub async fn reconcile_startup(&self) -> ReconcileOutcome {
        if self.reconciled.swap(true, Ordering::SeqCst) {
            return ReconcileOutcome::AlreadyDone;
        }

        let mut record = self.record.lock().await;
        *record = self
            .store
            .load()
            .await
            .unwrap_or_else(|| UpdateState::new(self.current_version.clone()));
        if record.current_version != self.current_version {
            info!(
                "Update record was written by {}, now running {}",
                record.current_version, self.current_version
            );
            record.current_version = self.current_version.clone();
        }

        let mut outcome = ReconcileOutcome::Clean;
        let outdated = record
            .available_version
            .as_deref()
            .is_some_and(|v| !is_newer(v, &self.current_version));
        if record.is_stale() || outdated {
            info!(
                "Clearing stale update record ({:?}, running {})",
                record.available_version, self.current_version
            );
            record.clear_pending();
            outcome = ReconcileOutcome::ClearedStale;
        }
        self.persist(&record).await;

        let ready = record.ready_artifact().cloned();
        let available = record.available_version.clone();
        drop(record);

        if let Some(artifact) = ready {
            return self.auto_install(artifact).await;
        }
        if let Some(version) = available {
            self.set_phase(UpdatePhase::Available { version });
        }
        outcome
    }

    async fn auto_install(&self, artifact: UpdateArtifact) -> ReconcileOutcome {
        let version = artifact.version.clone();
        if let Err(err) = verify_artifact(&artifact).await {
            warn!("Downloaded update {} is unusable: {}", version, err);
            let mut record = self.record.lock().await;
            record.clear_pending();
            self.persist(&record).await;
            self.set_phase(UpdatePhase::Idle);
            return ReconcileOutcome::Discarded { version };
        }

        info!("Installing downloaded update {} (automatic, 1 attempt)", version);
        self.set_phase(UpdatePhase::Installing {
            version: version.clone(),
        });
        match contained("install", self.distribution.install(&artifact)).await {
            Ok(()) => {
                self.install_started(&version);
                ReconcileOutcome::Installing { version }
            }
            Err(err) => {
                warn!(
                    "Automatic install of {} failed: {}; waiting for manual install",
                    version, err
                );
                self.set_phase(UpdatePhase::Ready {
                    version: version.clone(),
                });
                notify_best_effort(
                    self.notifier.as_ref(),
                    Notice::UpdateReadyToInstall {
                        version: version.clone(),
                    },
                );
                ReconcileOutcome::InstallDeferred { version }
            }
        }
    }

    /// Ask the distribution service for a newer release and download it.
    ///
    /// Periodic and manual checks honor the cooldown since the last check;
    /// startup and forced checks do not. Only user-initiated checks report
    /// failures to the user. A check that finds a new release keeps the
    /// machine busy until the background download ends.
    pub async fn check(&self, trigger: CheckTrigger) -> LauncherResult<CheckOutcome> {
        if let ReconcileOutcome::Installing { version } = self.reconcile_startup().await {
            return Ok(CheckOutcome::Installing { version });
        }
        match self.phase() {
            UpdatePhase::Installing { version } => {
                return Ok(CheckOutcome::Installing { version });
            }
            UpdatePhase::Downloading { version, .. } => {
                debug!("Update check ({:?}) skipped: {} is downloading", trigger, version);
                return Ok(CheckOutcome::AlreadyDownloading { version });
            }
            _ => {}
        }
        let Some(_busy) = BusyFlag::acquire(&self.checking) else {
            debug!("Update check ({:?}) skipped: already checking", trigger);
            return Ok(CheckOutcome::AlreadyChecking);
        };

        let now = self.clock.now();
        {
            let mut record = self.record.lock().await;
            if let (true, Some(last)) = (trigger.honors_cooldown(), record.last_check) {
                let elapsed = now.seconds_since(last);
                if elapsed < self.cooldown.as_secs() {
                    let next_check_in_secs = self.cooldown.as_secs() - elapsed;
                    debug!("Update check on cooldown for {}s", next_check_in_secs);
                    if trigger == CheckTrigger::Manual {
                        self.toast(
                            ToastLevel::Info,
                            format!("Checked for updates {} min ago", elapsed / 60),
                        );
                    }
                    return Ok(CheckOutcome::Skipped { next_check_in_secs });
                }
            }
            record.last_check = Some(now);
            self.persist(&record).await;
        }

        let previous = self.set_phase(UpdatePhase::Checking);
        let release = match contained("check", self.distribution.check()).await {
            Ok(release) => release,
            Err(err) => {
                self.set_phase(previous);
                if trigger.is_user_initiated() {
                    self.toast(ToastLevel::Error, format!("Update check failed: {}", err));
                } else {
                    warn!("Background update check failed: {}", err);
                }
                return Err(err);
            }
        };

        let release = match release {
            Some(release) if is_newer(&release.version, &self.current_version) => release,
            other => {
                debug!(
                    "No newer release (latest: {:?}, running {})",
                    other.map(|r| r.version),
                    self.current_version
                );
                self.set_phase(UpdatePhase::NoneAvailable);
                if trigger.is_user_initiated() {
                    self.toast(
                        ToastLevel::Info,
                        format!("ModLauncher {} is up to date", self.current_version),
                    );
                }
                return Ok(CheckOutcome::UpToDate);
            }
        };

        let version = release.version.clone();
        info!(
            "Update {} available (running {})",
            version, self.current_version
        );
        *sync_lock(&self.latest) = Some(release.clone());
        {
            let mut record = self.record.lock().await;
            if record
                .ready_artifact()
                .is_some_and(|artifact| artifact.version == version)
            {
                self.set_phase(UpdatePhase::Ready {
                    version: version.clone(),
                });
                return Ok(CheckOutcome::AlreadyDownloaded { version });
            }
            record.clear_pending();
            record.available_version = Some(version.clone());
            self.persist(&record).await;
        }
        self.set_phase(UpdatePhase::Available {
            version: version.clone(),
        });
        notify_best_effort(
            self.notifier.as_ref(),
            Notice::UpdateAvailable {
                version: version.clone(),
            },
        );

        match self.download(&release, DownloadOrigin::Auto).await {
            Ok(_) => Ok(CheckOutcome::Downloaded { version }),
            Err(err) => Ok(CheckOutcome::DownloadFailed {
                version,
                message: err.to_string(),
            }),
        }
    }

    /// User-initiated download of the release found by the last check.
    pub async fn download_latest(&self) -> LauncherResult<UpdateArtifact> {
        let release = sync_lock(&self.latest)
            .clone()
            .ok_or_else(|| LauncherError::Update("no update has been found yet".into()))?;
        self.download(&release, DownloadOrigin::Manual).await
    }

    async fn download(
        &self,
        release: &ReleaseInfo,
        origin: DownloadOrigin,
    ) -> LauncherResult<UpdateArtifact> {
        let Some(_busy) = BusyFlag::acquire(&self.downloading) else {
            return Err(LauncherError::Update(format!(
                "download of {} already in progress",
                release.version
            )));
        };
        let _ticket = self.activity.begin();
        let version = release.version.clone();
        self.set_phase(UpdatePhase::Downloading {
            version: version.clone(),
            origin,
            percent: None,
        });

        let phase = self.phase.clone();
        let _progress = self.bridge.track(
            UPDATE_DOWNLOAD,
            version.clone(),
            move |progress: UpdateDownloadProgress| {
                if let UpdatePhase::Downloading { percent, .. } = &mut *sync_lock(&phase) {
                    *percent = progress.percent();
                }
            },
            |_: UpdateDownloadComplete| {},
        );

        let artifact = match self.fetch_verified(release).await {
            Ok(artifact) => artifact,
            Err(err) => {
                self.set_phase(UpdatePhase::Available {
                    version: version.clone(),
                });
                match origin {
                    DownloadOrigin::Manual => self.toast(
                        ToastLevel::Error,
                        format!("Update {} could not be downloaded: {}", version, err),
                    ),
                    DownloadOrigin::Auto => {
                        warn!("Background download of {} failed: {}", version, err)
                    }
                }
                return Err(err);
            }
        };

        {
            let mut record = self.record.lock().await;
            record.available_version = Some(version.clone());
            record.downloaded = true;
            record.download_ready = true;
            record.artifact = Some(artifact.clone());
            self.persist(&record).await;
        }
        self.set_phase(UpdatePhase::Ready {
            version: version.clone(),
        });
        info!("Update {} downloaded and verified ({:?})", version, origin);
        notify_best_effort(
            self.notifier.as_ref(),
            Notice::UpdateDownloaded { version, origin },
        );
        Ok(artifact)
    }

    /// Download and check the artifact against the manifest digest.
    async fn fetch_verified(&self, release: &ReleaseInfo) -> LauncherResult<UpdateArtifact> {
        let downloaded = contained("download", self.distribution.download(release)).await?;
        let artifact = UpdateArtifact {
            sha256: release.sha256.clone(),
            ..downloaded
        };
        if let Err(err) = verify_artifact(&artifact).await {
            if let Err(remove_err) = tokio::fs::remove_file(&artifact.path).await {
                debug!("Could not remove rejected artifact: {}", remove_err);
            }
            return Err(err);
        }
        Ok(artifact)
    }

    /// Install the downloaded update after the user confirmed it.
    pub async fn install_confirmed(&self) -> LauncherResult<()> {
        let artifact = self
            .record
            .lock()
            .await
            .ready_artifact()
            .cloned()
            .ok_or_else(|| LauncherError::Update("no downloaded update to install".into()))?;
        let version = artifact.version.clone();

        if let Err(err) = verify_artifact(&artifact).await {
            self.toast(
                ToastLevel::Error,
                format!("Update {} is damaged: {}", version, err),
            );
            return Err(err);
        }

        info!("Installing update {} (confirmed)", version);
        self.set_phase(UpdatePhase::Installing {
            version: version.clone(),
        });
        if let Err(err) = contained("install", self.distribution.install(&artifact)).await {
            self.set_phase(UpdatePhase::Ready {
                version: version.clone(),
            });
            self.toast(
                ToastLevel::Error,
                format!("Update {} could not be installed: {}", version, err),
            );
            return Err(err);
        }
        self.install_started(&version);
        Ok(())
    }

    /// Reconcile, then check once, after `delay`.
    pub fn spawn_startup(self: &Arc<Self>, delay: Duration) -> TimerHandle {
        let machine: Weak<Self> = Arc::downgrade(self);
        timer::spawn_after("update-startup", delay, async move {
            let Some(machine) = machine.upgrade() else {
                return;
            };
            if let ReconcileOutcome::Installing { .. } = machine.reconcile_startup().await {
                return;
            }
            if let Err(err) = machine.check(CheckTrigger::Startup).await {
                debug!("Startup update check ended with error: {}", err);
            }
        })
    }

    /// Ask for a periodic check every `poll`. Keep `poll` well below the
    /// cooldown so a check runs soon after the cooldown expires.
    pub fn spawn_periodic(self: &Arc<Self>, poll: Duration) -> TimerHandle {
        let machine: Weak<Self> = Arc::downgrade(self);
        timer::spawn_every("update-check", poll, move || {
            let machine = machine.clone();
            async move {
                if let Some(machine) = machine.upgrade() {
                    if let Err(err) = machine.check(CheckTrigger::Periodic).await {
                        debug!("Periodic update check ended with error: {}", err);
                    }
                }
            }
        })
    }
}
