use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use serde::Serialize;
use serde_json::Value;
use tokio::sync::oneshot;
use tracing::{debug, info, warn};

use crate::core::error::LauncherResult;
use crate::core::events::{EventSource, ListenerId, CLOSE_REQUESTED_DURING_DOWNLOAD};
use crate::core::notify::{Notice, Notifier};
use crate::core::sync_lock;

/// Counts downloads in flight. The window close handler consults it to
/// decide whether to ask before exiting.
///
/// `clear` starts a new generation; tickets from an older generation no
/// longer count when they drop.
#[derive(Debug, Clone, Default)]
pub struct DownloadActivity {
    inner: Arc<Mutex<ActivityCount>>,
}

#[derive(Debug, Default)]
struct ActivityCount {
    generation: u64,
    active: usize,
}

impl DownloadActivity {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn begin(&self) -> DownloadTicket {
        let mut count = sync_lock(&self.inner);
        count.active += 1;
        DownloadTicket {
            activity: self.clone(),
            generation: count.generation,
        }
    }

    pub fn is_active(&self) -> bool {
        sync_lock(&self.inner).active > 0
    }

    /// Forget all in-flight downloads so the next close goes through.
    pub fn clear(&self) {
        let mut count = sync_lock(&self.inner);
        count.generation += 1;
        count.active = 0;
    }

    fn release(&self, generation: u64) {
        let mut count = sync_lock(&self.inner);
        if count.generation == generation {
            count.active = count.active.saturating_sub(1);
        }
    }
}

/// Marks one download as in flight until dropped.
#[derive(Debug)]
pub struct DownloadTicket {
    activity: DownloadActivity,
    generation: u64,
}

impl Drop for DownloadTicket {
    fn drop(&mut self) {
        self.activity.release(self.generation);
    }
}

/// Host window operations needed to honor a confirmed close.
#[async_trait]
pub trait WindowControl: Send + Sync {
    async fn clear_downloading_flag(&self) -> LauncherResult<()>;
    async fn close_window(&self) -> LauncherResult<()>;
}

/// Blocking yes/no question to the user.
#[async_trait]
pub trait ConfirmationPrompt: Send + Sync {
    async fn confirm_close_during_download(&self) -> bool;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CloseDecision {
    Closed,
    Cancelled,
    /// Another confirmation was already open.
    Ignored,
}

/// Turns a "close requested while downloading" signal into a confirmation.
pub struct CloseGuard {
    prompt: Arc<dyn ConfirmationPrompt>,
    window: Arc<dyn WindowControl>,
    asking: AtomicBool,
    listener: Mutex<Option<(Arc<dyn EventSource>, ListenerId)>>,
}

impl CloseGuard {
    pub fn new(prompt: Arc<dyn ConfirmationPrompt>, window: Arc<dyn WindowControl>) -> Self {
        Self {
            prompt,
            window,
            asking: AtomicBool::new(false),
            listener: Mutex::new(None),
        }
    }

    /// Ask, then either clear the flag and close, or leave everything as is.
    pub async fn handle_close_request(&self) -> LauncherResult<CloseDecision> {
        if self.asking.swap(true, Ordering::SeqCst) {
            debug!("Close confirmation already open");
            return Ok(CloseDecision::Ignored);
        }
        let confirmed = self.prompt.confirm_close_during_download().await;
        self.asking.store(false, Ordering::SeqCst);

        if !confirmed {
            info!("Close cancelled; download continues");
            return Ok(CloseDecision::Cancelled);
        }
        info!("Close confirmed during download");
        self.window.clear_downloading_flag().await?;
        self.window.close_window().await?;
        Ok(CloseDecision::Closed)
    }

    /// Listen for the close-requested signal. Replaces an earlier
    /// registration.
    pub fn attach(self: &Arc<Self>, source: Arc<dyn EventSource>) {
        let weak = Arc::downgrade(self);
        let id = source.listen(
            CLOSE_REQUESTED_DURING_DOWNLOAD,
            Arc::new(move |_: &Value| {
                let Some(guard) = weak.upgrade() else {
                    return;
                };
                tokio::spawn(async move {
                    if let Err(err) = guard.handle_close_request().await {
                        warn!("Could not close after confirmation: {}", err);
                    }
                });
            }),
        );
        let replaced = sync_lock(&self.listener).replace((source, id));
        if let Some((previous_source, previous)) = replaced {
            previous_source.unlisten(previous);
        }
    }

    pub fn detach(&self) {
        if let Some((source, id)) = sync_lock(&self.listener).take() {
            source.unlisten(id);
        }
    }
}

/// Prompt answered later by the UI through [`ChannelPrompt::resolve`].
///
/// The question goes out as [`Notice::ConfirmCloseDuringDownload`]. A new
/// question supersedes a pending one, which then resolves as "cancel".
pub struct ChannelPrompt {
    notifier: Arc<dyn Notifier>,
    pending: Mutex<Option<oneshot::Sender<bool>>>,
}

impl ChannelPrompt {
    pub fn new(notifier: Arc<dyn Notifier>) -> Self {
        Self {
            notifier,
            pending: Mutex::new(None),
        }
    }

    /// Deliver the user's answer. Returns false when nothing was pending.
    pub fn resolve(&self, confirmed: bool) -> bool {
        match sync_lock(&self.pending).take() {
            Some(sender) => sender.send(confirmed).is_ok(),
            None => false,
        }
    }

    pub fn is_pending(&self) -> bool {
        sync_lock(&self.pending).is_some()
    }
}

#[async_trait]
impl ConfirmationPrompt for ChannelPrompt {
    async fn confirm_close_during_download(&self) -> bool {
        let (sender, receiver) = oneshot::channel();
        if let Some(previous) = sync_lock(&self.pending).replace(sender) {
            let _ = previous.send(false);
        }
        if let Err(err) = self.notifier.notify(Notice::ConfirmCloseDuringDownload) {
            warn!("Close confirmation could not be shown: {}", err);
            sync_lock(&self.pending).take();
            return false;
        }
        receiver.await.unwrap_or(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::events::{EventHub, EventSink};
    use crate::core::testing::{CallLog, FailingNotifier, RecordingNotifier};

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

    struct Answer(bool);

    #[async_trait]
    impl ConfirmationPrompt for Answer {
        async fn confirm_close_during_download(&self) -> bool {
            self.0
        }
    }

    #[tokio::test]
    async fn confirm_clears_flag_then_closes() {
        let window = Arc::new(FakeWindow::default());
        let guard = CloseGuard::new(Arc::new(Answer(true)), window.clone());

        assert_eq!(
            guard.handle_close_request().await.unwrap(),
            CloseDecision::Closed
        );
        assert_eq!(
            window.log.calls(),
            vec!["clear_downloading_flag".to_string(), "close_window".to_string()]
        );
    }

    #[tokio::test]
    async fn cancel_leaves_app_running() {
        let window = Arc::new(FakeWindow::default());
        let guard = CloseGuard::new(Arc::new(Answer(false)), window.clone());

        assert_eq!(
            guard.handle_close_request().await.unwrap(),
            CloseDecision::Cancelled
        );
        assert!(window.log.calls().is_empty());
    }

    #[tokio::test]
    async fn channel_prompt_resolves_from_ui() {
        let notifier = Arc::new(RecordingNotifier::default());
        let prompt = Arc::new(ChannelPrompt::new(notifier.clone()));

        let asking = prompt.clone();
        let answer = tokio::spawn(async move { asking.confirm_close_during_download().await });
        while !prompt.is_pending() {
            tokio::task::yield_now().await;
        }
        assert!(prompt.resolve(true));
        assert!(answer.await.unwrap());
        assert_eq!(notifier.notices(), vec![Notice::ConfirmCloseDuringDownload]);
        assert!(!prompt.resolve(true));
    }

    #[tokio::test]
    async fn second_question_cancels_the_first() {
        let prompt = Arc::new(ChannelPrompt::new(Arc::new(RecordingNotifier::default())));

        let first = {
            let prompt = prompt.clone();
            tokio::spawn(async move { prompt.confirm_close_during_download().await })
        };
        while !prompt.is_pending() {
            tokio::task::yield_now().await;
        }
        let second = {
            let prompt = prompt.clone();
            tokio::spawn(async move { prompt.confirm_close_during_download().await })
        };

        assert!(!first.await.unwrap());
        prompt.resolve(true);
        assert!(second.await.unwrap());
    }

    #[tokio::test]
    async fn unshowable_prompt_counts_as_cancel() {
        let prompt = ChannelPrompt::new(Arc::new(FailingNotifier));
        assert!(!prompt.confirm_close_during_download().await);
        assert!(!prompt.is_pending());
    }

    #[tokio::test]
    async fn close_signal_from_event_source_triggers_guard() {
        let hub = Arc::new(EventHub::new());
        let window = Arc::new(FakeWindow::default());
        let guard = Arc::new(CloseGuard::new(Arc::new(Answer(true)), window.clone()));
        guard.attach(hub.clone());

        hub.emit_value(CLOSE_REQUESTED_DURING_DOWNLOAD, Value::Null);
        while window.log.count("close_window") == 0 {
            tokio::task::yield_now().await;
        }

        guard.detach();
        assert_eq!(hub.total_listeners(), 0);
    }

    #[test]
    fn download_tickets_track_activity() {
        let activity = DownloadActivity::new();
        let a = activity.begin();
        let b = activity.begin();
        drop(a);
        assert!(activity.is_active());
        drop(b);
        assert!(!activity.is_active());

        let _c = activity.begin();
        activity.clear();
        assert!(!activity.is_active());
    }

    #[test]
    fn tickets_from_before_a_clear_do_not_hide_new_downloads() {
        let activity = DownloadActivity::new();
        let stale = activity.begin();
        activity.clear();

        let fresh = activity.begin();
        drop(stale);
        assert!(activity.is_active());

        drop(fresh);
        assert!(!activity.is_active());
    }
}
