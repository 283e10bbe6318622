use crate::core::error::LauncherResult;

/// Taskbar / dock progress indicator.
pub trait ProgressIndicator: Send + Sync {
    /// Show the indicator; `None` means indeterminate.
    fn show(&self, percent: Option<u8>) -> LauncherResult<()>;
    fn hide(&self) -> LauncherResult<()>;
}

/// For platforms (and tests) without a taskbar indicator.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoIndicator;

impl ProgressIndicator for NoIndicator {
    fn show(&self, _percent: Option<u8>) -> LauncherResult<()> {
        Ok(())
    }

    fn hide(&self) -> LauncherResult<()> {
        Ok(())
    }
}
