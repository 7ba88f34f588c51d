use std::path::PathBuf;
use std::time::Duration;

use elpa_package::PackageError;

pub type Result<T> = std::result::Result<T, ArchiveError>;

/// Rebuild- and cache-level failures.
///
/// None of these reach snapshot readers: a failed rebuild keeps the previous
/// index and a broken cache file is treated as a miss.
#[derive(Debug, thiserror::Error)]
pub enum ArchiveError {
    #[error("failed to scan repository root {root}: {source}")]
    Scan {
        root: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("no cache file at {path}")]
    CacheMissing { path: PathBuf },

    #[error("cache file {path} is corrupt: {reason}")]
    CacheCorrupt { path: PathBuf, reason: String },

    #[error("failed to write cache file {path}: {source}")]
    CacheWrite {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// A single artifact could not be turned into a package descriptor.
#[derive(Debug, thiserror::Error)]
pub enum ExtractionError {
    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: PackageError,
    },

    #[error("{path} declares package {found}, expected {expected}")]
    NameMismatch {
        path: PathBuf,
        expected: String,
        found: String,
    },

    #[error("{path} declares version {found}, but sits in version directory {directory}")]
    VersionMismatch {
        path: PathBuf,
        directory: String,
        found: String,
    },

    #[error("extracting {path} did not finish within {timeout:?}")]
    TimedOut { path: PathBuf, timeout: Duration },

    #[error("extracting {path} panicked")]
    Panicked { path: PathBuf },
}
