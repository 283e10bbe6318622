use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use serde::Serialize;
use serde_json::Value;
use tracing::{debug, warn};

use crate::core::sync_lock;

/// Identifier of one registered listener.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(pub u64);

pub type EventHandler = Arc<dyn Fn(&Value) + Send + Sync>;

/// Something backend events can be listened to on.
pub trait EventSource: Send + Sync {
    fn listen(&self, event: &str, handler: EventHandler) -> ListenerId;
    fn unlisten(&self, id: ListenerId);
}

/// Something events can be emitted on.
pub trait EventSink: Send + Sync {
    fn emit_value(&self, event: &str, payload: Value);
}

/// Serialize `payload` and emit it. Serialization failures are logged and
/// dropped; an event is never worth failing an operation over.
pub fn emit<T: Serialize>(sink: &dyn EventSink, event: &str, payload: &T) {
    match serde_json::to_value(payload) {
        Ok(value) => sink.emit_value(event, value),
        Err(err) => warn!("Cannot serialize '{}' payload: {}", event, err),
    }
}

/// In-process named event bus.
///
/// Handlers are invoked outside the registry lock, so a handler may unlisten
/// itself (or anything else) while it runs.
#[derive(Default)]
pub struct EventHub {
    next_id: AtomicU64,
    listeners: Mutex<HashMap<String, Vec<(ListenerId, EventHandler)>>>,
}

impl EventHub {
    pub fn new() -> Self {
        Self::default()
    }

    fn listeners(&self) -> MutexGuard<'_, HashMap<String, Vec<(ListenerId, EventHandler)>>> {
        sync_lock(&self.listeners)
    }

    pub fn listener_count(&self, event: &str) -> usize {
        self.listeners().get(event).map_or(0, Vec::len)
    }

    pub fn total_listeners(&self) -> usize {
        self.listeners().values().map(Vec::len).sum()
    }
}

impl EventSource for EventHub {
    fn listen(&self, event: &str, handler: EventHandler) -> ListenerId {
        let id = ListenerId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.listeners()
            .entry(event.to_string())
            .or_default()
            .push((id, handler));
        id
    }

    fn unlisten(&self, id: ListenerId) {
        let mut listeners = self.listeners();
        for handlers in listeners.values_mut() {
            handlers.retain(|(candidate, _)| *candidate != id);
        }
        listeners.retain(|_, handlers| !handlers.is_empty());
    }
}

impl EventSink for EventHub {
    fn emit_value(&self, event: &str, payload: Value) {
        let handlers: Vec<EventHandler> = self
            .listeners()
            .get(event)
            .map(|handlers| handlers.iter().map(|(_, h)| h.clone()).collect())
            .unwrap_or_default();

        if handlers.is_empty() {
            debug!("Event '{}' has no listeners", event);
            return;
        }

        for handler in handlers {
            handler(&payload);
        }
    }
}
