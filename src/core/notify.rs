use std::sync::Arc;

use serde::Serialize;
use tracing::debug;

use crate::core::error::LauncherResult;
use crate::core::events::{emit, EventSink, LAUNCHER_NOTICE};
use crate::core::update::DownloadOrigin;

#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ToastLevel {
    Info,
    Success,
    Warning,
    Error,
}

/// Everything the orchestration layer asks the UI to show.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Notice {
    /// Transient, dismissible message.
    Toast { level: ToastLevel, message: String },
    /// The active account changed without the user picking it.
    AccountSwitched { username: String },
    /// No usable account remains; show the login surface.
    LoginRequired,
    /// A target's content finished syncing.
    TargetReady { target_id: String },
    UpdateAvailable { version: String },
    UpdateDownloaded {
        version: String,
        origin: DownloadOrigin,
    },
    /// Manual install affordance.
    UpdateReadyToInstall { version: String },
    /// Blocking question: close while a download is running?
    ConfirmCloseDuringDownload,
}

impl Notice {
    pub fn toast(level: ToastLevel, message: impl Into<String>) -> Self {
        Notice::Toast {
            level,
            message: message.into(),
        }
    }
}

/// UI surface port.
pub trait Notifier: Send + Sync {
    fn notify(&self, notice: Notice) -> LauncherResult<()>;
}

/// Deliver a notice, logging instead of failing when the UI cannot take it.
pub fn notify_best_effort(notifier: &dyn Notifier, notice: Notice) {
    if let Err(err) = notifier.notify(notice) {
        debug!("Notice dropped: {}", err);
    }
}

/// Publishes notices as `launcher-notice` events.
pub struct EventNotifier {
    sink: Arc<dyn EventSink>,
}

impl EventNotifier {
    pub fn new(sink: Arc<dyn EventSink>) -> Self {
        Self { sink }
    }
}

impl Notifier for EventNotifier {
    fn notify(&self, notice: Notice) -> LauncherResult<()> {
        emit(self.sink.as_ref(), LAUNCHER_NOTICE, &notice);
        Ok(())
    }
}
