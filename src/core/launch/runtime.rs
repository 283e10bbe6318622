use serde::Serialize;
use tracing::warn;

use crate::core::error::LauncherError;

/// Content minor version → runtime version, highest threshold first.
pub const RUNTIME_THRESHOLDS: [(u32, &str); 5] =
    [(21, "21"), (20, "17"), (18, "17"), (17, "16"), (8, "8")];

/// Runtime used when nothing in the table matches.
pub const DEFAULT_RUNTIME: &str = "8";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct RuntimeRequirement {
    pub version: &'static str,
    /// True when the content version could not be mapped and the default
    /// runtime was picked instead.
    pub fallback: bool,
}

/// First table entry whose threshold is at or below `minor`.
pub fn runtime_for_minor(minor: u32) -> Option<&'static str> {
    RUNTIME_THRESHOLDS
        .iter()
        .find(|(threshold, _)| minor >= *threshold)
        .map(|(_, runtime)| *runtime)
}

/// Parse `1.<minor>[.<patch>]`. A leading major above 1 sorts above every
/// threshold.
fn content_minor(content_version: &str) -> Option<u32> {
    let mut parts = content_version.trim().split('.');
    let major = parts.next()?.parse::<u32>().ok()?;
    if major > 1 {
        return Some(u32::MAX);
    }
    if major == 0 {
        return None;
    }
    parts.next()?.parse::<u32>().ok()
}

pub fn required_runtime(content_version: &str) -> RuntimeRequirement {
    match content_minor(content_version).and_then(runtime_for_minor) {
        Some(version) => RuntimeRequirement {
            version,
            fallback: false,
        },
        None => {
            warn!(
                "{}; falling back to runtime {}",
                LauncherError::UnmappedContentVersion(content_version.to_string()),
                DEFAULT_RUNTIME
            );
            RuntimeRequirement {
                version: DEFAULT_RUNTIME,
                fallback: true,
            }
        }
    }
}
