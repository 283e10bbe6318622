use serde::Serialize;

use crate::core::clock::UnixSeconds;
use crate::core::store::KeyedStore;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct PlaytimeEntry {
    pub session_started: Option<UnixSeconds>,
    pub total_seconds: u64,
}

/// Accumulated play time per target, in whole seconds.
#[derive(Default)]
pub struct PlaytimeLedger {
    entries: KeyedStore<String, PlaytimeEntry>,
}

impl PlaytimeLedger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn begin(&self, target_id: &str, now: UnixSeconds) {
        self.entries.update(target_id.to_string(), |entry| {
            entry.session_started = Some(now);
        });
    }

    /// Close the open session and return its length, if one was open.
    pub fn finish(&self, target_id: &str, now: UnixSeconds) -> Option<u64> {
        self.entries.update(target_id.to_string(), |entry| {
            let started = entry.session_started.take()?;
            let played = now.seconds_since(started);
            entry.total_seconds += played;
            Some(played)
        })
    }

    pub fn total(&self, target_id: &str) -> u64 {
        self.entries
            .get(&target_id.to_string())
            .map(|entry| entry.total_seconds)
            .unwrap_or(0)
    }

    pub fn entry(&self, target_id: &str) -> Option<PlaytimeEntry> {
        self.entries.get(&target_id.to_string())
    }

    pub fn evict(&self, target_id: &str) {
        self.entries.evict(&target_id.to_string());
    }
}
