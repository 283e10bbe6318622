pub mod distribution;
pub mod http;
pub mod integrity;
pub mod machine;
pub mod model;

pub use distribution::UpdateDistribution;
pub use http::HttpUpdateSource;
pub use integrity::{sha256_file, verify_artifact};
pub use machine::{
    CheckOutcome, InstallStartedHook, ReconcileOutcome, UpdatePhase, UpdateSnapshot, UpdateStateMachine,
    UPDATE_CHECK_COOLDOWN, UPDATE_POLL_INTERVAL,
};
pub use model::{
    compare_versions, is_newer, CheckTrigger, DownloadOrigin, ReleaseInfo, UpdateArtifact,
    UpdateState, UpdateStateFile,
};
