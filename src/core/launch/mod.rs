pub mod coordinator;
pub mod phase;
pub mod playtime;
pub mod runtime;
pub mod services;

pub use coordinator::{
    AuthFailedCallback, AuthFailure, InstanceLaunchCoordinator, LaunchEnvironment, LaunchOutcome,
    LaunchServices,
};
pub use phase::{LaunchFailure, LaunchPhase, LaunchPhaseState};
pub use playtime::{PlaytimeEntry, PlaytimeLedger};
pub use runtime::{required_runtime, RuntimeRequirement, DEFAULT_RUNTIME, RUNTIME_THRESHOLDS};
pub use services::{
    AssetSync, LaunchRequest, LaunchTarget, ProcessLauncher, ResourceLimits, ResourceLimitsStore,
    RuntimeProvisioner, MIN_MEMORY_FLOOR_MB,
};
