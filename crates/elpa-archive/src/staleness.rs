use std::path::Path;

use crate::util::mtime_secs;

/// Whether the cache at `cache_path` predates the last change to `root`.
///
/// Compares modification times at whole-second resolution, so a change made
/// within the same second as the cache write is not detected. A missing cache
/// or an unreadable root is always stale.
pub fn is_stale(root: &Path, cache_path: &Path) -> bool {
    let Ok(cache_mtime) = mtime_secs(cache_path) else {
        return true;
    };
    match mtime_secs(root) {
        Ok(root_mtime) => root_mtime > cache_mtime,
        Err(err) => {
            tracing::debug!(
                target: "elpa.archive",
                root = %root.display(),
                error = %err,
                "cannot read repository root mtime; treating cache as stale"
            );
            true
        }
    }
}
