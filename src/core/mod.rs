// ─── ModLauncher Core ───
// Orchestration backend for a modded-game launcher.
//
// Architecture:
//   core/
//     events/      - Event hub, payloads, progress bridge
//     session/     - Accounts, active pointer, periodic validation
//     launch/      - Runtime table + per-target launch pipeline
//     update/      - Persisted update state + check/download/install
//     close_guard  - Confirm-close while a download is running
//     state/       - Config, resource limits, application wiring
//     clock, timer, store, notify - shared plumbing

pub mod clock;
pub mod close_guard;
pub mod error;
pub mod events;
pub mod launch;
pub mod notify;
pub mod session;
pub mod state;
pub mod store;
pub mod timer;
pub mod update;

#[cfg(test)]
pub(crate) mod testing;

/// Lock a std mutex, recovering the data if a holder panicked.
pub(crate) fn sync_lock<T>(mutex: &std::sync::Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}
