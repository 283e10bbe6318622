use serde::Serialize;

use crate::core::clock::UnixSeconds;
use crate::core::error::ErrorClass;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LaunchPhase {
    Idle,
    ResolvingRuntime,
    DownloadingAssets,
    RefreshingSession,
    Launching,
    Running,
}

impl LaunchPhase {
    /// Progress band `(start, end)` on the 0..=100 launch bar.
    fn band(self) -> (u8, u8) {
        match self {
            LaunchPhase::Idle => (0, 0),
            LaunchPhase::ResolvingRuntime => (5, 25),
            LaunchPhase::DownloadingAssets => (25, 70),
            LaunchPhase::RefreshingSession => (75, 75),
            LaunchPhase::Launching => (90, 90),
            LaunchPhase::Running => (100, 100),
        }
    }

    pub fn stage(self) -> &'static str {
        match self {
            LaunchPhase::Idle => "Ready",
            LaunchPhase::ResolvingRuntime => "Preparing runtime",
            LaunchPhase::DownloadingAssets => "Downloading assets",
            LaunchPhase::RefreshingSession => "Refreshing session",
            LaunchPhase::Launching => "Starting game",
            LaunchPhase::Running => "Running",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LaunchFailure {
    pub phase: LaunchPhase,
    pub class: ErrorClass,
    pub message: String,
}

/// Per-target launch state. Anything other than `Idle` blocks a new start.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(tag = "phase", rename_all = "snake_case")]
pub enum LaunchPhaseState {
    #[default]
    Idle,
    ResolvingRuntime {
        percent: Option<u8>,
    },
    DownloadingAssets {
        percent: Option<u8>,
        current_file: Option<String>,
    },
    RefreshingSession,
    Launching,
    Running {
        pid: u32,
        started_at: UnixSeconds,
    },
    /// Surfaced once, then the target returns to `Idle`.
    Failed(LaunchFailure),
}

impl LaunchPhaseState {
    pub fn phase(&self) -> LaunchPhase {
        match self {
            LaunchPhaseState::Idle => LaunchPhase::Idle,
            LaunchPhaseState::ResolvingRuntime { .. } => LaunchPhase::ResolvingRuntime,
            LaunchPhaseState::DownloadingAssets { .. } => LaunchPhase::DownloadingAssets,
            LaunchPhaseState::RefreshingSession => LaunchPhase::RefreshingSession,
            LaunchPhaseState::Launching => LaunchPhase::Launching,
            LaunchPhaseState::Running { .. } => LaunchPhase::Running,
            LaunchPhaseState::Failed(failure) => failure.phase,
        }
    }

    pub fn is_idle(&self) -> bool {
        matches!(self, LaunchPhaseState::Idle)
    }

    /// The process is (or is about to be) alive.
    pub fn is_live(&self) -> bool {
        matches!(
            self,
            LaunchPhaseState::Launching | LaunchPhaseState::Running { .. }
        )
    }

    /// Position on the launch bar, interpolating inside the phase's band.
    pub fn progress_value(&self) -> u8 {
        let (start, end) = self.phase().band();
        let percent = match self {
            LaunchPhaseState::ResolvingRuntime { percent }
            | LaunchPhaseState::DownloadingAssets { percent, .. } => percent.unwrap_or(0),
            LaunchPhaseState::Failed(_) => return 100,
            _ => 0,
        };
        let span = u32::from(end - start);
        start + (span * u32::from(percent.min(100)) / 100) as u8
    }

    /// UI state string carried by `instance-launch-progress`.
    pub fn ui_state(&self) -> &'static str {
        match self {
            LaunchPhaseState::Idle => "idle",
            LaunchPhaseState::Failed(_) => "error",
            LaunchPhaseState::Running { .. } => "running",
            _ => "launching",
        }
    }

    pub fn stage_label(&self) -> String {
        match self {
            LaunchPhaseState::DownloadingAssets {
                current_file: Some(file),
                ..
            } => format!("{}: {}", LaunchPhase::DownloadingAssets.stage(), file),
            LaunchPhaseState::Failed(failure) => {
                format!("{} failed: {}", failure.phase.stage(), failure.message)
            }
            other => other.phase().stage().to_string(),
        }
    }
}
