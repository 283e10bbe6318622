use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use tauri::window::{ProgressBarState, ProgressBarStatus};
use tauri::{AppHandle, Emitter, Listener, Manager, WindowEvent};
use tracing::{debug, error, info, warn};

use crate::commands;
use crate::core::close_guard::WindowControl;
use crate::core::error::{LauncherError, LauncherResult};
use crate::core::events::{
    EventHandler, EventSink, EventSource, ListenerId, ProgressIndicator,
    CLOSE_REQUESTED_DURING_DOWNLOAD,
};
use crate::core::notify::EventNotifier;
use crate::core::state::{default_data_dir, AppState, BackendPorts, DataPaths, HostPorts};
use crate::core::update::InstallStartedHook;

const MAIN_WINDOW: &str = "main";

fn tauri_error(err: tauri::Error) -> LauncherError {
    LauncherError::Other(err.to_string())
}

/// Tauri's event system as the backend event bus.
pub struct TauriBus {
    app: AppHandle,
}

impl TauriBus {
    pub fn new(app: AppHandle) -> Self {
        Self { app }
    }
}

impl EventSource for TauriBus {
    fn listen(&self, event: &str, handler: EventHandler) -> ListenerId {
        let name = event.to_string();
        let id = self.app.listen_any(event, move |event| {
            let value = serde_json::from_str::<Value>(event.payload()).unwrap_or_else(|err| {
                debug!("Non-JSON payload on '{}': {}", name, err);
                Value::Null
            });
            // Handlers may spawn tasks; run them inside the async runtime.
            let runtime = tauri::async_runtime::handle();
            let _entered = runtime.inner().enter();
            handler(&value);
        });
        ListenerId(u64::from(id))
    }

    fn unlisten(&self, id: ListenerId) {
        match u32::try_from(id.0) {
            Ok(id) => self.app.unlisten(id),
            Err(_) => warn!("Listener id {} is not a Tauri event id", id.0),
        }
    }
}

impl EventSink for TauriBus {
    fn emit_value(&self, event: &str, payload: Value) {
        if let Err(err) = self.app.emit(event, payload) {
            warn!("Failed to emit '{}': {}", event, err);
        }
    }
}

/// Progress on the main window's taskbar / dock icon.
pub struct TaskbarIndicator {
    app: AppHandle,
}

impl ProgressIndicator for TaskbarIndicator {
    fn show(&self, percent: Option<u8>) -> LauncherResult<()> {
        let Some(window) = self.app.get_webview_window(MAIN_WINDOW) else {
            return Ok(());
        };
        let state = match percent {
            Some(percent) => ProgressBarState {
                status: Some(ProgressBarStatus::Normal),
                progress: Some(u64::from(percent)),
            },
            None => ProgressBarState {
                status: Some(ProgressBarStatus::Indeterminate),
                progress: None,
            },
        };
        window.set_progress_bar(state).map_err(tauri_error)
    }

    fn hide(&self) -> LauncherResult<()> {
        let Some(window) = self.app.get_webview_window(MAIN_WINDOW) else {
            return Ok(());
        };
        window
            .set_progress_bar(ProgressBarState {
                status: Some(ProgressBarStatus::None),
                progress: None,
            })
            .map_err(tauri_error)
    }
}

/// Main-window control for the close guard.
pub struct MainWindow {
    app: AppHandle,
}

#[async_trait]
impl WindowControl for MainWindow {
    async fn clear_downloading_flag(&self) -> LauncherResult<()> {
        if let Some(state) = self.app.try_state::<Arc<AppState>>() {
            state.downloads.clear();
        }
        Ok(())
    }

    async fn close_window(&self) -> LauncherResult<()> {
        match self.app.get_webview_window(MAIN_WINDOW) {
            Some(window) => window.close().map_err(tauri_error),
            None => {
                self.app.exit(0);
                Ok(())
            }
        }
    }
}

fn exit_after_install(app: AppHandle) -> InstallStartedHook {
    Arc::new(move |version: &str| {
        info!("Exiting so the installer can apply {}", version);
        app.exit(0);
    })
}

/// Install the global `tracing` subscriber and start the desktop app with
/// the given backend services.
pub fn run(backend: BackendPorts) {
    crate::init_tracing();
    info!("ModLauncher {} starting...", env!("CARGO_PKG_VERSION"));

    let result = tauri::Builder::default()
        .plugin(tauri_plugin_opener::init())
        .on_window_event(|window, event| {
            let WindowEvent::CloseRequested { api, .. } = event else {
                return;
            };
            let downloading = window
                .app_handle()
                .try_state::<Arc<AppState>>()
                .is_some_and(|state| state.downloads.is_active());
            if downloading {
                api.prevent_close();
                if let Err(err) = window.app_handle().emit(CLOSE_REQUESTED_DURING_DOWNLOAD, ()) {
                    error!("Could not ask for close confirmation: {}", err);
                }
            }
        })
        .setup(move |app| {
            let handle = app.handle().clone();
            let bus = Arc::new(TauriBus::new(handle.clone()));
            let host = HostPorts {
                source: bus.clone(),
                events: bus.clone(),
                indicator: Arc::new(TaskbarIndicator {
                    app: handle.clone(),
                }),
                notifier: Arc::new(EventNotifier::new(bus)),
                window: Arc::new(MainWindow {
                    app: handle.clone(),
                }),
                on_install_started: Some(exit_after_install(handle.clone())),
            };
            let state = Arc::new(AppState::new(
                DataPaths::new(default_data_dir()),
                backend,
                host,
            )?);
            info!("Data directory: {:?}", state.paths.root);
            app.manage(state.clone());
            tauri::async_runtime::spawn(async move {
                state.start_background();
            });
            Ok(())
        })
        .invoke_handler(tauri::generate_handler![
            commands::list_accounts,
            commands::get_active_account,
            commands::login_account,
            commands::switch_account,
            commands::logout_account,
            commands::validate_accounts,
            commands::launch_target,
            commands::get_launch_state,
            commands::get_playtime,
            commands::forget_target,
            commands::check_for_updates,
            commands::download_update,
            commands::install_update,
            commands::get_update_status,
            commands::resolve_close_confirmation,
            commands::get_resource_limits,
            commands::save_resource_limits,
            commands::get_launcher_config,
        ])
        .run(tauri::generate_context!());

    if let Err(err) = result {
        error!("Desktop shell exited with error: {}", err);
    }
}
