// ─── Test doubles ───
// Recording fakes for every service port, shared by the unit tests.

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use serde_json::{json, Value};
use tokio::sync::Notify;

use crate::core::clock::UnixSeconds;
use crate::core::error::{LauncherError, LauncherResult};
use crate::core::events::{
    EventHub, EventSink, EventSource, ASSET_DOWNLOAD_COMPLETED, ASSET_DOWNLOAD_PROGRESS,
    RUNTIME_DOWNLOAD_COMPLETED, RUNTIME_DOWNLOAD_PROGRESS, UPDATE_DOWNLOAD_COMPLETE,
    UPDATE_DOWNLOAD_PROGRESS,
};
use crate::core::launch::{
    AssetSync, LaunchRequest, ProcessLauncher, ResourceLimits, ResourceLimitsStore,
    RuntimeProvisioner,
};
use crate::core::notify::{Notice, Notifier};
use crate::core::session::{
    AccessDecision, AccessService, AuthErrorCode, Session, SessionEnvelope, SessionService,
};
use crate::core::update::{ReleaseInfo, UpdateArtifact, UpdateDistribution};

pub fn session(username: &str, token: &str, expires_at: i64) -> Session {
    Session {
        access_token: token.into(),
        refresh_token: Some(format!("{username}-refresh")),
        username: username.into(),
        uuid: format!("{username}-uuid"),
        expires_at: UnixSeconds(expires_at),
        user_type: "msa".into(),
    }
}

#[derive(Default)]
pub struct RecordingNotifier {
    pub notices: Mutex<Vec<Notice>>,
}

impl RecordingNotifier {
    pub fn notices(&self) -> Vec<Notice> {
        self.notices.lock().unwrap().clone()
    }

    pub fn count(&self, matches: impl Fn(&Notice) -> bool) -> usize {
        self.notices.lock().unwrap().iter().filter(|n| matches(n)).count()
    }
}

impl Notifier for RecordingNotifier {
    fn notify(&self, notice: Notice) -> LauncherResult<()> {
        self.notices.lock().unwrap().push(notice);
        Ok(())
    }
}

/// Notifier whose UI is gone.
pub struct FailingNotifier;

impl Notifier for FailingNotifier {
    fn notify(&self, _notice: Notice) -> LauncherResult<()> {
        Err(LauncherError::Other("window closed".into()))
    }
}

#[derive(Debug, Clone)]
pub enum Scripted {
    Valid(Option<Session>),
    Refreshed(Session),
    Invalid(AuthErrorCode),
    Unreachable,
}

/// Session service answering from a per-username script (default: valid,
/// unchanged).
#[derive(Default)]
pub struct FakeSessions {
    pub script: Mutex<HashMap<String, Scripted>>,
    pub calls: Mutex<Vec<String>>,
    pub removed: Mutex<Vec<String>>,
}

impl FakeSessions {
    pub fn answer(&self, username: &str, answer: Scripted) {
        self.script
            .lock()
            .unwrap()
            .insert(username.to_string(), answer);
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    pub fn removed(&self) -> Vec<String> {
        self.removed.lock().unwrap().clone()
    }
}

#[async_trait]
impl SessionService for FakeSessions {
    async fn ensure_valid_session(&self, username: &str) -> LauncherResult<SessionEnvelope> {
        self.calls.lock().unwrap().push(username.to_string());
        let answer = self
            .script
            .lock()
            .unwrap()
            .get(username)
            .cloned()
            .unwrap_or(Scripted::Valid(None));
        match answer {
            Scripted::Valid(session) => Ok(SessionEnvelope::valid(session, false)),
            Scripted::Refreshed(session) => Ok(SessionEnvelope::valid(Some(session), true)),
            Scripted::Invalid(code) => Ok(SessionEnvelope::invalid(code)),
            Scripted::Unreachable => Err(LauncherError::SessionService {
                username: username.to_string(),
                message: "connection reset".into(),
            }),
        }
    }

    async fn remove_session(&self, username: &str) -> LauncherResult<()> {
        self.removed.lock().unwrap().push(username.to_string());
        Ok(())
    }
}

#[derive(Default)]
pub struct FakeAccess {
    pub denied: Mutex<HashSet<String>>,
}

#[async_trait]
impl AccessService for FakeAccess {
    async fn check_access(&self, username: &str) -> LauncherResult<AccessDecision> {
        if self.denied.lock().unwrap().contains(username) {
            return Ok(AccessDecision::Denied {
                reason: Some("not whitelisted".into()),
            });
        }
        Ok(AccessDecision::Granted)
    }
}

/// Counts calls per operation name.
#[derive(Default)]
pub struct CallLog {
    calls: Mutex<Vec<String>>,
}

impl CallLog {
    pub fn record(&self, call: impl Into<String>) {
        self.calls.lock().unwrap().push(call.into());
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    pub fn count(&self, prefix: &str) -> usize {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .filter(|c| c.starts_with(prefix))
            .count()
    }
}

/// Collect every payload emitted under `event`.
pub fn capture(hub: &EventHub, event: &str) -> Arc<Mutex<Vec<Value>>> {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = seen.clone();
    hub.listen(
        event,
        Arc::new(move |value: &Value| sink.lock().unwrap().push(value.clone())),
    );
    seen
}

/// Runtime provisioner over an in-memory set of installed versions. When a
/// hub is attached, `install` publishes one progress and one completion event.
#[derive(Default)]
pub struct FakeRuntime {
    installed: Mutex<HashSet<String>>,
    installs: Mutex<Vec<String>>,
    hub: Option<Arc<EventHub>>,
    gate: Option<Arc<Notify>>,
}

impl FakeRuntime {
    pub fn with_installed(versions: &[&str]) -> Self {
        Self {
            installed: Mutex::new(versions.iter().map(|v| v.to_string()).collect()),
            ..Default::default()
        }
    }

    pub fn with_hub(mut self, hub: Arc<EventHub>) -> Self {
        self.hub = Some(hub);
        self
    }

    /// Every `install` waits on `gate` before reporting progress.
    pub fn gated(mut self, gate: Arc<Notify>) -> Self {
        self.gate = Some(gate);
        self
    }

    pub fn installs(&self) -> Vec<String> {
        self.installs.lock().unwrap().clone()
    }
}

#[async_trait]
impl RuntimeProvisioner for FakeRuntime {
    async fn install(&self, version: &str) -> LauncherResult<()> {
        self.installs.lock().unwrap().push(version.to_string());
        if let Some(gate) = &self.gate {
            gate.notified().await;
        }
        if let Some(hub) = &self.hub {
            hub.emit_value(
                RUNTIME_DOWNLOAD_PROGRESS,
                json!({"version": version, "downloaded": 50, "total": 100}),
            );
            hub.emit_value(RUNTIME_DOWNLOAD_COMPLETED, json!({"version": version}));
        }
        self.installed.lock().unwrap().insert(version.to_string());
        Ok(())
    }

    async fn runtime_path(&self, version: &str) -> LauncherResult<PathBuf> {
        if self.installed.lock().unwrap().contains(version) {
            return Ok(PathBuf::from(format!("/runtimes/{version}/bin/java")));
        }
        Err(LauncherError::Runtime {
            version: version.to_string(),
            message: "not installed".into(),
        })
    }
}

#[derive(Default)]
pub struct FakeAssets {
    synced: Mutex<Vec<String>>,
    gate: Option<Arc<Notify>>,
    fail: bool,
    hub: Option<Arc<EventHub>>,
}

impl FakeAssets {
    /// `sync_assets` waits for `gate` before finishing.
    pub fn gated(gate: Arc<Notify>) -> Self {
        Self {
            gate: Some(gate),
            ..Default::default()
        }
    }

    pub fn failing() -> Self {
        Self {
            fail: true,
            ..Default::default()
        }
    }

    pub fn with_hub(mut self, hub: Arc<EventHub>) -> Self {
        self.hub = Some(hub);
        self
    }

    pub fn synced(&self) -> Vec<String> {
        self.synced.lock().unwrap().clone()
    }
}

#[async_trait]
impl AssetSync for FakeAssets {
    async fn prepare_target_dir(
        &self,
        target_id: &str,
        _runtime_version: &str,
    ) -> LauncherResult<PathBuf> {
        Ok(PathBuf::from(format!("/targets/{target_id}")))
    }

    async fn sync_assets(
        &self,
        target_id: &str,
        _content_version: &str,
        _source_url: &str,
    ) -> LauncherResult<()> {
        self.synced.lock().unwrap().push(target_id.to_string());
        if let Some(hub) = &self.hub {
            hub.emit_value(
                ASSET_DOWNLOAD_PROGRESS,
                json!({"target_id": target_id, "percent": 40.0, "current_file": "mods/example.jar"}),
            );
        }
        if let Some(gate) = &self.gate {
            gate.notified().await;
        }
        if self.fail {
            return Err(LauncherError::AssetSync {
                target: target_id.to_string(),
                message: "mirror returned 503".into(),
            });
        }
        if let Some(hub) = &self.hub {
            hub.emit_value(ASSET_DOWNLOAD_COMPLETED, json!({"target_id": target_id}));
        }
        Ok(())
    }
}

#[derive(Default)]
pub struct FakeProcess {
    requests: Mutex<Vec<LaunchRequest>>,
    panic: bool,
}

impl FakeProcess {
    pub fn panicking() -> Self {
        Self {
            panic: true,
            ..Default::default()
        }
    }

    pub fn requests(&self) -> Vec<LaunchRequest> {
        self.requests.lock().unwrap().clone()
    }
}

#[async_trait]
impl ProcessLauncher for FakeProcess {
    async fn launch(&self, request: &LaunchRequest) -> LauncherResult<u32> {
        if self.panic {
            panic!("launcher backend crashed");
        }
        self.requests.lock().unwrap().push(request.clone());
        Ok(4242)
    }
}

#[derive(Default)]
pub struct FakeLimits {
    limits: Mutex<ResourceLimits>,
}

#[async_trait]
impl ResourceLimitsStore for FakeLimits {
    async fn load(&self) -> LauncherResult<ResourceLimits> {
        Ok(*self.limits.lock().unwrap())
    }

    async fn save(&self, limits: ResourceLimits) -> LauncherResult<ResourceLimits> {
        *self.limits.lock().unwrap() = limits;
        Ok(limits)
    }
}

/// sha256("payload"), the bytes every fake update download contains.
pub const PAYLOAD_SHA256: &str =
    "239f59ed55e737c77147cf55ad0c1b030b6d7ee748a7426952f9b852d5a935e5";

/// Update service that "downloads" `payload` into a directory. With a hub
/// attached, `download` publishes 50% progress, then completion.
pub struct FakeDistribution {
    pub log: CallLog,
    dir: PathBuf,
    release: Mutex<Option<ReleaseInfo>>,
    fail_checks: AtomicBool,
    fail_downloads: AtomicBool,
    fail_installs: AtomicBool,
    panic_checks: AtomicBool,
    panic_downloads: AtomicBool,
    gate: Option<Arc<Notify>>,
    download_gate: Option<Arc<Notify>>,
    hub: Option<Arc<EventHub>>,
}

impl FakeDistribution {
    pub fn new(dir: &Path) -> Self {
        Self {
            log: CallLog::default(),
            dir: dir.to_path_buf(),
            release: Mutex::new(None),
            fail_checks: AtomicBool::new(false),
            fail_downloads: AtomicBool::new(false),
            fail_installs: AtomicBool::new(false),
            panic_checks: AtomicBool::new(false),
            panic_downloads: AtomicBool::new(false),
            gate: None,
            download_gate: None,
            hub: None,
        }
    }

    /// Every `check` waits for one permit from `gate`.
    pub fn gated(mut self, gate: Arc<Notify>) -> Self {
        self.gate = Some(gate);
        self
    }

    /// Every `download` waits for one permit from `gate` after reporting
    /// progress.
    pub fn gated_downloads(mut self, gate: Arc<Notify>) -> Self {
        self.download_gate = Some(gate);
        self
    }

    pub fn with_hub(mut self, hub: Arc<EventHub>) -> Self {
        self.hub = Some(hub);
        self
    }

    pub fn publish(&self, version: &str) {
        self.publish_with_digest(version, PAYLOAD_SHA256);
    }

    pub fn publish_with_digest(&self, version: &str, sha256: &str) {
        *self.release.lock().unwrap() = Some(ReleaseInfo {
            version: version.into(),
            url: format!("https://updates.example/setup-{version}.bin"),
            sha256: sha256.into(),
            notes: None,
        });
    }

    pub fn fail_checks(&self, fail: bool) {
        self.fail_checks.store(fail, Ordering::SeqCst);
    }

    pub fn fail_downloads(&self, fail: bool) {
        self.fail_downloads.store(fail, Ordering::SeqCst);
    }

    pub fn fail_installs(&self, fail: bool) {
        self.fail_installs.store(fail, Ordering::SeqCst);
    }

    pub fn panic_checks(&self, panic: bool) {
        self.panic_checks.store(panic, Ordering::SeqCst);
    }

    pub fn panic_downloads(&self, panic: bool) {
        self.panic_downloads.store(panic, Ordering::SeqCst);
    }
}

#[async_trait]
impl UpdateDistribution for FakeDistribution {
    async fn check(&self) -> LauncherResult<Option<ReleaseInfo>> {
        self.log.record("check");
        if let Some(gate) = &self.gate {
            gate.notified().await;
        }
        if self.panic_checks.load(Ordering::SeqCst) {
            panic!("update manifest parser crashed");
        }
        if self.fail_checks.load(Ordering::SeqCst) {
            return Err(LauncherError::DownloadFailed {
                url: "https://updates.example/latest.json".into(),
                status: 503,
            });
        }
        Ok(self.release.lock().unwrap().clone())
    }

    async fn download(&self, release: &ReleaseInfo) -> LauncherResult<UpdateArtifact> {
        if let Some(hub) = &self.hub {
            hub.emit_value(
                UPDATE_DOWNLOAD_PROGRESS,
                json!({"version": release.version, "downloaded": 50, "total": 100}),
            );
        }
        self.log.record(format!("download:{}", release.version));
        if let Some(gate) = &self.download_gate {
            gate.notified().await;
        }
        if self.panic_downloads.load(Ordering::SeqCst) {
            panic!("download stream crashed");
        }
        if self.fail_downloads.load(Ordering::SeqCst) {
            return Err(LauncherError::DownloadFailed {
                url: release.url.clone(),
                status: 500,
            });
        }
        let path = self.dir.join(format!("setup-{}.bin", release.version));
        std::fs::write(&path, b"payload").unwrap();
        if let Some(hub) = &self.hub {
            hub.emit_value(
                UPDATE_DOWNLOAD_COMPLETE,
                json!({"version": release.version}),
            );
        }
        Ok(UpdateArtifact {
            version: release.version.clone(),
            path,
            sha256: release.sha256.clone(),
        })
    }

    async fn install(&self, artifact: &UpdateArtifact) -> LauncherResult<()> {
        self.log.record(format!("install:{}", artifact.version));
        if self.fail_installs.load(Ordering::SeqCst) {
            return Err(LauncherError::Update("installer refused to start".into()));
        }
        Ok(())
    }
}
