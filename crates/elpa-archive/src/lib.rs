//! Indexing and caching for a package archive.
//!
//! A repository root holds one artifact per package version:
//!
//! ```text
//! <root>/<name>/<version>/<name>.el    single-file package
//! <root>/<name>/<version>/<name>.tar   bundle with a <name>-pkg.el descriptor
//! ```
//!
//! [`Archive`] scans the root, keeps the highest version of every package and
//! persists the result under a store directory:
//!
//! ```text
//! <store>/archive-contents       served text form
//! <store>/archive-contents.bin   fast-reload index cache
//! ```
//!
//! The cache is reused until the root's mtime moves past the cache file's.
#![forbid(unsafe_code)]

mod archive;
pub mod contents;
mod discovery;
mod error;
mod extract;
mod index;
mod persist;
mod staleness;
mod util;

pub use archive::{
    Archive, ArchiveOptions, ArchiveSnapshot, ArchiveStatus, RebuildReport, RebuildSource,
    DEFAULT_EXTRACTION_TIMEOUT, DEFAULT_PURGE_THRESHOLD,
};
pub use discovery::{discover, ArtifactExtensions, Candidate};
pub use error::{ArchiveError, ExtractionError, Result};
pub use extract::{
    best_effort_commentary, extract, extract_with_timeout, ElispMetadataParser, MetadataParser,
    NO_COMMENTARY,
};
pub use index::{ArchiveIndex, MergeOutcome};
pub use persist::{CacheStore, ARCHIVE_CONTENTS_FILENAME, INDEX_CACHE_FILENAME};
pub use staleness::is_stale;
