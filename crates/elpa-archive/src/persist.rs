use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::contents;
use crate::error::{ArchiveError, Result};
use crate::index::ArchiveIndex;
use crate::util::{
    atomic_write, bincode_deserialize, bincode_serialize, now_millis, remove_file_best_effort,
    BINCODE_PAYLOAD_LIMIT_BYTES,
};

/// File name of the served `archive-contents` text.
pub const ARCHIVE_CONTENTS_FILENAME: &str = "archive-contents";
/// File name of the fast-reload index cache.
pub const INDEX_CACHE_FILENAME: &str = "archive-contents.bin";

const INDEX_CACHE_MAGIC: [u8; 8] = *b"ELPAIDX\0";
const INDEX_CACHE_FORMAT_VERSION: u32 = 1;

#[derive(Debug, Serialize)]
struct IndexCacheFile<'a> {
    magic: [u8; 8],
    format_version: u32,
    saved_at_millis: u64,
    index: &'a ArchiveIndex,
}

#[derive(Debug, Deserialize)]
struct IndexCacheFileOwned {
    magic: [u8; 8],
    format_version: u32,
    #[allow(dead_code)]
    saved_at_millis: u64,
    index: ArchiveIndex,
}

/// The on-disk cache of one archive, rooted at a store directory.
#[derive(Clone, Debug)]
pub struct CacheStore {
    dir: PathBuf,
}

impl CacheStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Path of the fast-reload cache; its mtime is the cache generation time.
    pub fn cache_path(&self) -> PathBuf {
        self.dir.join(INDEX_CACHE_FILENAME)
    }

    pub fn contents_path(&self) -> PathBuf {
        self.dir.join(ARCHIVE_CONTENTS_FILENAME)
    }

    /// Writes the index cache and the served `archive-contents` text.
    ///
    /// Both files are replaced atomically. Callers treat failure as
    /// best-effort: an unwritable store costs speed, not correctness.
    pub fn save(&self, index: &ArchiveIndex) -> Result<()> {
        let cache_path = self.cache_path();
        let file = IndexCacheFile {
            magic: INDEX_CACHE_MAGIC,
            format_version: INDEX_CACHE_FORMAT_VERSION,
            saved_at_millis: now_millis(),
            index,
        };
        let bytes = bincode_serialize(&file).map_err(|err| ArchiveError::CacheWrite {
            path: cache_path.clone(),
            source: std::io::Error::other(err),
        })?;

        let contents_path = self.contents_path();
        atomic_write(&contents_path, contents::render(index.packages()).as_bytes()).map_err(
            |source| ArchiveError::CacheWrite {
                path: contents_path,
                source,
            },
        )?;
        // Written last: the staleness check keys off this file's mtime.
        atomic_write(&cache_path, &bytes).map_err(|source| ArchiveError::CacheWrite {
            path: cache_path,
            source,
        })
    }

    pub fn load(&self) -> Result<ArchiveIndex> {
        let path = self.cache_path();
        let corrupt = |reason: String| ArchiveError::CacheCorrupt {
            path: path.clone(),
            reason,
        };

        let meta = match std::fs::metadata(&path) {
            Ok(meta) => meta,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                return Err(ArchiveError::CacheMissing { path });
            }
            Err(err) => return Err(corrupt(format!("failed to stat: {err}"))),
        };
        if !meta.is_file() {
            return Err(corrupt("not a regular file".to_owned()));
        }
        if meta.len() > BINCODE_PAYLOAD_LIMIT_BYTES as u64 {
            return Err(corrupt(format!(
                "file too large: {} bytes (limit {BINCODE_PAYLOAD_LIMIT_BYTES} bytes)",
                meta.len()
            )));
        }

        let bytes = std::fs::read(&path).map_err(|err| corrupt(format!("failed to read: {err}")))?;
        let file: IndexCacheFileOwned =
            bincode_deserialize(&bytes).map_err(|err| corrupt(format!("failed to decode: {err}")))?;

        if file.magic != INDEX_CACHE_MAGIC {
            return Err(corrupt("bad magic".to_owned()));
        }
        if file.format_version != INDEX_CACHE_FORMAT_VERSION {
            return Err(corrupt(format!(
                "unsupported format version: expected {INDEX_CACHE_FORMAT_VERSION}, found {}",
                file.format_version
            )));
        }
        Ok(file.index)
    }

    /// Deletes both cache files. Returns false if either could not be removed.
    pub fn purge(&self) -> bool {
        let cache = remove_file_best_effort(&self.cache_path(), "purge.index_cache");
        let contents = remove_file_best_effort(&self.contents_path(), "purge.contents");
        cache && contents
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use elpa_package::{PackageDescriptor, PackageKind, Requirement, Version};

    fn sample_index() -> ArchiveIndex {
        let mut index = ArchiveIndex::new();
        index.merge(PackageDescriptor {
            name: "foo".to_owned(),
            version: Version::parse("1.2").unwrap(),
            requirements: vec![Requirement {
                name: "emacs".to_owned(),
                version: Version::parse("25.1").unwrap(),
            }],
            summary: "Foo".to_owned(),
            kind: PackageKind::SingleFile,
            commentary: Some("Does foo.".to_owned()),
        });
        index.merge(PackageDescriptor {
            name: "bar".to_owned(),
            version: Version::parse("3").unwrap(),
            requirements: Vec::new(),
            summary: "Bar".to_owned(),
            kind: PackageKind::Bundle,
            commentary: None,
        });
        index
    }

    #[test]
    fn save_then_load_roundtrips() {
        let tmp = tempfile::tempdir().unwrap();
        let store = CacheStore::new(tmp.path().join("store"));
        let index = sample_index();

        store.save(&index).unwrap();
        assert_eq!(store.load().unwrap(), index);
        assert!(store.contents_path().is_file());
    }

    #[test]
    fn missing_and_corrupt_files_are_distinguished() {
        let tmp = tempfile::tempdir().unwrap();
        let store = CacheStore::new(tmp.path());
        assert!(matches!(store.load(), Err(ArchiveError::CacheMissing { .. })));

        std::fs::write(store.cache_path(), b"not bincode").unwrap();
        assert!(matches!(store.load(), Err(ArchiveError::CacheCorrupt { .. })));
    }

    #[test]
    fn wrong_magic_is_corrupt() {
        let tmp = tempfile::tempdir().unwrap();
        let store = CacheStore::new(tmp.path());
        let index = sample_index();
        let bytes = bincode_serialize(&IndexCacheFile {
            magic: *b"NOTELPA!",
            format_version: INDEX_CACHE_FORMAT_VERSION,
            saved_at_millis: 0,
            index: &index,
        })
        .unwrap();
        std::fs::write(store.cache_path(), bytes).unwrap();
        assert!(matches!(store.load(), Err(ArchiveError::CacheCorrupt { .. })));
    }

    #[test]
    fn purge_removes_both_files() {
        let tmp = tempfile::tempdir().unwrap();
        let store = CacheStore::new(tmp.path());
        store.save(&sample_index()).unwrap();
        assert!(store.purge());
        assert!(!store.cache_path().exists());
        assert!(!store.contents_path().exists());
        assert!(store.purge());
    }
}
