//! Shared utility functions used across the codebase.

use std::path::Path;
use std::time::{SystemTime, UNIX_EPOCH};

/// Whether `segment` can be used as a single path component under a root
/// directory: non-empty, no separators or NUL, not `.` or `..`.
pub fn is_safe_path_segment(segment: &str) -> bool {
    !segment.is_empty()
        && segment != "."
        && segment != ".."
        && !segment.contains(['/', '\\', '\0'])
}

/// Check whether an existing `target` resolves (symlinks included) to a
/// location inside `base`. Missing paths are never within.
pub fn path_within(base: &Path, target: &Path) -> bool {
    use std::path::Component;

    if target
        .components()
        .any(|component| matches!(component, Component::ParentDir))
    {
        return false;
    }

    let Ok(base_canonical) = base.canonicalize() else {
        return false;
    };
    match target.canonicalize() {
        Ok(target_canonical) => target_canonical.starts_with(&base_canonical),
        Err(_) => false,
    }
}

/// Seconds since the Unix epoch as a float (negative before 1970).
pub fn unix_seconds(time: SystemTime) -> f64 {
    match time.duration_since(UNIX_EPOCH) {
        Ok(elapsed) => elapsed.as_secs_f64(),
        Err(before) => -before.duration().as_secs_f64(),
    }
}
