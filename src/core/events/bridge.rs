use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, Weak};

use serde_json::Value;
use tracing::debug;
use uuid::Uuid;

use super::hub::{EventHandler, EventSource, ListenerId};
use super::indicator::ProgressIndicator;
use super::payloads::{ProgressPayload, ScopedPayload, TrackedEvents};
use crate::core::sync_lock;

type SubscriptionKey = (String, String);
type Registry = Mutex<HashMap<SubscriptionKey, Arc<SubscriptionInner>>>;

/// Forwards backend progress events for one in-flight operation.
///
/// At most one live subscription exists per `(event, scope)`; tracking the
/// same scope again disposes the previous subscription first. A subscription
/// is disposed exactly once: on its completion event, on `unsubscribe`, or
/// when the [`Subscription`] handle is dropped by the operation that owns it.
#[derive(Clone)]
pub struct ProgressBridge {
    source: Arc<dyn EventSource>,
    indicator: Arc<IndicatorGate>,
    live: Arc<Registry>,
}

impl ProgressBridge {
    pub fn new(source: Arc<dyn EventSource>, indicator: Arc<dyn ProgressIndicator>) -> Self {
        Self {
            source,
            indicator: Arc::new(IndicatorGate {
                indicator,
                active: Mutex::new(0),
            }),
            live: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    pub fn track<P, C>(
        &self,
        events: TrackedEvents,
        scope_key: impl Into<String>,
        on_progress: impl Fn(P) + Send + Sync + 'static,
        on_complete: impl FnOnce(C) + Send + 'static,
    ) -> Subscription
    where
        P: ProgressPayload,
        C: ScopedPayload,
    {
        let scope_key = scope_key.into();
        self.track_shared(events, scope_key.clone(), scope_key, on_progress, on_complete)
    }

    /// Track payloads for `scope` under the subscription key `scope_key`.
    ///
    /// Several operations waiting on the same shared work (one runtime
    /// install for two targets) each keep their own subscription.
    pub fn track_shared<P, C>(
        &self,
        events: TrackedEvents,
        scope_key: impl Into<String>,
        scope: impl Into<String>,
        on_progress: impl Fn(P) + Send + Sync + 'static,
        on_complete: impl FnOnce(C) + Send + 'static,
    ) -> Subscription
    where
        P: ProgressPayload,
        C: ScopedPayload,
    {
        let scope_key = scope_key.into();
        let key = (events.progress.to_string(), scope_key.clone());

        self.indicator.acquire();
        let inner = Arc::new(SubscriptionInner {
            id: Uuid::new_v4(),
            event_name: events.progress.to_string(),
            scope_key,
            scope: scope.into(),
            source: self.source.clone(),
            live: Arc::downgrade(&self.live),
            indicator: self.indicator.clone(),
            disposed: AtomicBool::new(false),
            listeners: Mutex::new(Vec::new()),
        });

        let replaced = sync_lock(&self.live).insert(key, inner.clone());
        if let Some(previous) = replaced {
            debug!(
                "Re-tracking '{}' for scope '{}': disposing previous subscription {}",
                previous.event_name, previous.scope_key, previous.id
            );
            previous.dispose();
        }

        let progress_handler: EventHandler = {
            let weak = Arc::downgrade(&inner);
            Arc::new(move |value: &Value| {
                let Some(inner) = weak.upgrade() else {
                    return;
                };
                let Some(payload) = inner.accept::<P>(value) else {
                    return;
                };
                inner.indicator.update(payload.percent());
                on_progress(payload);
            })
        };

        let complete_handler: EventHandler = {
            let weak = Arc::downgrade(&inner);
            let on_complete: Mutex<Option<Box<dyn FnOnce(C) + Send>>> =
                Mutex::new(Some(Box::new(on_complete)));
            Arc::new(move |value: &Value| {
                let Some(inner) = weak.upgrade() else {
                    return;
                };
                let Some(payload) = inner.accept::<C>(value) else {
                    return;
                };
                inner.dispose();
                let callback = sync_lock(&on_complete).take();
                if let Some(callback) = callback {
                    callback(payload);
                }
            })
        };

        inner.attach(self.source.listen(events.progress, progress_handler));
        inner.attach(self.source.listen(events.complete, complete_handler));

        debug!(
            "Tracking '{}' for scope '{}' ({})",
            inner.event_name, inner.scope_key, inner.id
        );
        Subscription { inner }
    }

    pub fn is_tracking(&self, event: &str, scope_key: &str) -> bool {
        sync_lock(&self.live).contains_key(&(event.to_string(), scope_key.to_string()))
    }

    pub fn live_count(&self) -> usize {
        sync_lock(&self.live).len()
    }
}

/// Handle owned by the operation that started tracking.
pub struct Subscription {
    inner: Arc<SubscriptionInner>,
}

impl Subscription {
    pub fn id(&self) -> Uuid {
        self.inner.id
    }

    pub fn event_name(&self) -> &str {
        &self.inner.event_name
    }

    pub fn scope_key(&self) -> &str {
        &self.inner.scope_key
    }

    pub fn is_active(&self) -> bool {
        !self.inner.is_disposed()
    }

    pub fn unsubscribe(&self) {
        self.inner.dispose();
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.inner.dispose();
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("id", &self.inner.id)
            .field("event_name", &self.inner.event_name)
            .field("scope_key", &self.inner.scope_key)
            .field("active", &self.is_active())
            .finish()
    }
}

struct SubscriptionInner {
    id: Uuid,
    event_name: String,
    scope_key: String,
    /// Payload scope accepted; equals `scope_key` unless tracked shared.
    scope: String,
    source: Arc<dyn EventSource>,
    live: Weak<Registry>,
    indicator: Arc<IndicatorGate>,
    disposed: AtomicBool,
    listeners: Mutex<Vec<ListenerId>>,
}

impl SubscriptionInner {
    fn is_disposed(&self) -> bool {
        self.disposed.load(Ordering::SeqCst)
    }

    /// Parse a payload addressed to this subscription. Late events, payloads
    /// for another scope and malformed payloads are ignored.
    fn accept<T: ScopedPayload>(&self, value: &Value) -> Option<T> {
        if self.is_disposed() {
            return None;
        }
        let payload: T = match serde_json::from_value(value.clone()) {
            Ok(payload) => payload,
            Err(err) => {
                debug!("Ignoring malformed '{}' payload: {}", self.event_name, err);
                return None;
            }
        };
        match payload.scope() {
            Some(scope) if scope != self.scope => None,
            _ => Some(payload),
        }
    }

    fn attach(&self, id: ListenerId) {
        let mut listeners = sync_lock(&self.listeners);
        if self.is_disposed() {
            drop(listeners);
            self.source.unlisten(id);
        } else {
            listeners.push(id);
        }
    }

    fn dispose(self: &Arc<Self>) {
        if self.disposed.swap(true, Ordering::SeqCst) {
            return;
        }

        let listeners = std::mem::take(&mut *sync_lock(&self.listeners));
        for id in listeners {
            self.source.unlisten(id);
        }

        if let Some(live) = self.live.upgrade() {
            let mut live = sync_lock(&live);
            let key = (self.event_name.clone(), self.scope_key.clone());
            if live
                .get(&key)
                .is_some_and(|current| Arc::ptr_eq(current, self))
            {
                live.remove(&key);
            }
        }

        self.indicator.release();
        debug!(
            "Disposed '{}' subscription for scope '{}' ({})",
            self.event_name, self.scope_key, self.id
        );
    }
}

/// Reference-counted access to the taskbar indicator: shown while any
/// subscription is live, hidden when the last one goes away. Indicator
/// failures never reach the tracked operation.
struct IndicatorGate {
    indicator: Arc<dyn ProgressIndicator>,
    active: Mutex<usize>,
}

impl IndicatorGate {
    fn acquire(&self) {
        let mut active = sync_lock(&self.active);
        *active += 1;
        if let Err(err) = self.indicator.show(None) {
            debug!("Progress indicator show failed: {}", err);
        }
    }

    fn update(&self, percent: Option<u8>) {
        if let Err(err) = self.indicator.show(percent) {
            debug!("Progress indicator update failed: {}", err);
        }
    }

    fn release(&self) {
        let mut active = sync_lock(&self.active);
        *active = active.saturating_sub(1);
        if *active == 0 {
            if let Err(err) = self.indicator.hide() {
                debug!("Progress indicator hide failed: {}", err);
            }
        }
    }
}
