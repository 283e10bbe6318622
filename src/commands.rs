use std::sync::Arc;

use crate::core::error::{LauncherError, LauncherResult};
use crate::core::launch::{
    LaunchOutcome, LaunchPhaseState, LaunchTarget, ResourceLimits, ResourceLimitsStore,
};
use crate::core::session::{Account, LogoutOutcome, Session, SweepReport, SwitchOutcome};
use crate::core::state::{AppState, LauncherConfig};
use crate::core::update::{CheckOutcome, CheckTrigger, UpdateSnapshot, UpdateStateMachine};

type AppStateHandle<'a> = tauri::State<'a, Arc<AppState>>;

fn updates(state: &AppState) -> LauncherResult<&Arc<UpdateStateMachine>> {
    state
        .updates
        .as_ref()
        .ok_or_else(|| LauncherError::Update("self-update is not configured".into()))
}

// ── Accounts ────────────────────────────────────────────

#[tauri::command]
pub async fn list_accounts(state: AppStateHandle<'_>) -> Result<Vec<Account>, LauncherError> {
    Ok(state.accounts.accounts().await)
}

#[tauri::command]
pub async fn get_active_account(
    state: AppStateHandle<'_>,
) -> Result<Option<Account>, LauncherError> {
    Ok(state.accounts.active_account().await)
}

/// Called by the login flow once the auth service issued a session.
#[tauri::command]
pub async fn login_account(
    state: AppStateHandle<'_>,
    session: Session,
) -> Result<Account, LauncherError> {
    state.accounts.admit(session).await
}

#[tauri::command]
pub async fn switch_account(
    state: AppStateHandle<'_>,
    id: String,
) -> Result<SwitchOutcome, LauncherError> {
    state.accounts.switch_account(&id).await
}

#[tauri::command]
pub async fn logout_account(
    state: AppStateHandle<'_>,
    id: String,
) -> Result<LogoutOutcome, LauncherError> {
    state.accounts.logout_account(&id).await
}

#[tauri::command]
pub async fn validate_accounts(state: AppStateHandle<'_>) -> Result<SweepReport, LauncherError> {
    Ok(state.accounts.validate_all().await)
}

// ── Launch ──────────────────────────────────────────────

#[tauri::command]
pub async fn launch_target(
    state: AppStateHandle<'_>,
    target: LaunchTarget,
) -> Result<LaunchOutcome, LauncherError> {
    Ok(state.launcher.start(target).await)
}

#[tauri::command]
pub async fn get_launch_state(
    state: AppStateHandle<'_>,
    id: String,
) -> Result<LaunchPhaseState, LauncherError> {
    Ok(state.launcher.state(&id))
}

#[tauri::command]
pub async fn get_playtime(state: AppStateHandle<'_>, id: String) -> Result<u64, LauncherError> {
    Ok(state.launcher.playtime(&id))
}

#[tauri::command]
pub async fn forget_target(state: AppStateHandle<'_>, id: String) -> Result<(), LauncherError> {
    state.launcher.forget_target(&id);
    Ok(())
}

// ── Self-update ─────────────────────────────────────────

/// Settings-page check. Within the cooldown it only reports when the next
/// check is due, unless `force` is set.
#[tauri::command]
pub async fn check_for_updates(
    state: AppStateHandle<'_>,
    force: Option<bool>,
) -> Result<CheckOutcome, LauncherError> {
    let trigger = if force.unwrap_or(false) {
        CheckTrigger::Forced
    } else {
        CheckTrigger::Manual
    };
    updates(&state)?.check(trigger).await
}

#[tauri::command]
pub async fn download_update(state: AppStateHandle<'_>) -> Result<String, LauncherError> {
    let artifact = updates(&state)?.download_latest().await?;
    Ok(artifact.version)
}

/// Start the installer; the app exits once it is running.
#[tauri::command]
pub async fn install_update(state: AppStateHandle<'_>) -> Result<(), LauncherError> {
    updates(&state)?.install_confirmed().await
}

#[tauri::command]
pub async fn get_update_status(
    state: AppStateHandle<'_>,
) -> Result<Option<UpdateSnapshot>, LauncherError> {
    match &state.updates {
        Some(machine) => Ok(Some(machine.snapshot().await)),
        None => Ok(None),
    }
}

// ── Window ──────────────────────────────────────────────

/// Answer to the close-during-download question.
#[tauri::command]
pub async fn resolve_close_confirmation(
    state: AppStateHandle<'_>,
    confirmed: bool,
) -> Result<bool, LauncherError> {
    Ok(state.prompt.resolve(confirmed))
}

// ── Settings ────────────────────────────────────────────

#[tauri::command]
pub async fn get_resource_limits(
    state: AppStateHandle<'_>,
) -> Result<ResourceLimits, LauncherError> {
    state.limits.load().await
}

#[tauri::command]
pub async fn save_resource_limits(
    state: AppStateHandle<'_>,
    limits: ResourceLimits,
) -> Result<ResourceLimits, LauncherError> {
    state.limits.save(limits).await
}

#[tauri::command]
pub async fn get_launcher_config(
    state: AppStateHandle<'_>,
) -> Result<LauncherConfig, LauncherError> {
    Ok(state.config.clone())
}
