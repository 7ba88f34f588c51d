use std::path::PathBuf;
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant, SystemTime};

use elpa_package::PackageDescriptor;
use serde::Serialize;

use crate::contents;
use crate::discovery::{discover, ArtifactExtensions};
use crate::extract::{extract_with_timeout, ElispMetadataParser, MetadataParser};
use crate::index::{ArchiveIndex, MergeOutcome};
use crate::persist::CacheStore;
use crate::staleness::is_stale;
use crate::util::{mtime_secs, now_millis, secs_to_system_time};

pub const DEFAULT_EXTRACTION_TIMEOUT: Duration = Duration::from_secs(30);
pub const DEFAULT_PURGE_THRESHOLD: u32 = 1;

#[derive(Clone, Debug)]
pub struct ArchiveOptions {
    /// Repository root laid out as `<name>/<version>/<name>.<ext>`.
    pub root: PathBuf,
    /// Directory holding the cache files.
    pub store: PathBuf,
    pub extensions: ArtifactExtensions,
    pub extraction_timeout: Duration,
    /// Forced refreshes above this privilege level also delete the disk cache.
    pub purge_threshold: u32,
    /// Rebuild in the background when the root changes under a loaded index.
    pub revalidate: bool,
}

impl ArchiveOptions {
    pub fn new(root: impl Into<PathBuf>, store: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            store: store.into(),
            extensions: ArtifactExtensions::default(),
            extraction_timeout: DEFAULT_EXTRACTION_TIMEOUT,
            purge_threshold: DEFAULT_PURGE_THRESHOLD,
            revalidate: true,
        }
    }
}

/// An immutable view of the index handed to readers.
#[derive(Clone, Debug)]
pub struct ArchiveSnapshot {
    index: Arc<ArchiveIndex>,
    generated_at: SystemTime,
}

impl ArchiveSnapshot {
    pub fn index(&self) -> &ArchiveIndex {
        &self.index
    }

    /// Descriptors ordered by package name.
    pub fn packages(&self) -> impl Iterator<Item = &PackageDescriptor> + '_ {
        self.index.packages()
    }

    pub fn get(&self, name: &str) -> Option<&PackageDescriptor> {
        self.index.get(name)
    }

    pub fn len(&self) -> usize {
        self.index.len()
    }

    pub fn is_empty(&self) -> bool {
        self.index.is_empty()
    }

    /// Modification time of the repository root when the snapshot was taken.
    pub fn generated_at(&self) -> SystemTime {
        self.generated_at
    }

    /// The `archive-contents` text for this snapshot.
    pub fn render(&self) -> String {
        contents::render(self.index.packages())
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RebuildSource {
    /// Adopted from a fresh cache file.
    Cache,
    /// Built by scanning the repository root.
    Scan,
}

#[derive(Clone, Debug, Serialize)]
pub struct RebuildReport {
    pub source: RebuildSource,
    pub discovered: usize,
    pub indexed: usize,
    pub skipped: usize,
    pub saved: bool,
    pub duration_ms: u64,
    pub finished_at_millis: u64,
    /// Set when the rebuild failed and the previous index was kept.
    pub error: Option<String>,
}

#[derive(Clone, Debug, Serialize)]
pub struct ArchiveStatus {
    pub root: PathBuf,
    pub cache_path: PathBuf,
    pub cache_stale: bool,
    /// Package count of the index held in memory, if any.
    pub packages: Option<usize>,
    pub rebuilding: bool,
    pub rebuilds: u64,
    pub last_rebuild: Option<RebuildReport>,
}

/// Owns one archive: its in-memory index, cache files and rebuild worker.
///
/// Cloning is cheap and clones share state. At most one rebuild runs at a
/// time; callers without an index wait for it to finish, callers holding one
/// keep reading the previous index.
#[derive(Clone, Debug)]
pub struct Archive {
    inner: Arc<Inner>,
}

#[derive(Debug)]
struct Inner {
    options: ArchiveOptions,
    parser: Arc<dyn MetadataParser>,
    cache: CacheStore,
    state: Mutex<State>,
    rebuilt: Condvar,
}

#[derive(Debug, Default)]
struct State {
    current: Option<Loaded>,
    rebuilding: bool,
    /// Another pass to run once the current rebuild finishes.
    pending: Option<RebuildMode>,
    /// Completed rebuild passes.
    generation: u64,
    last_rebuild: Option<RebuildReport>,
}

#[derive(Debug)]
struct Loaded {
    index: Arc<ArchiveIndex>,
    /// Root mtime (or cache mtime) the index reflects.
    source_mtime: Option<u64>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum RebuildMode {
    /// Adopt the disk cache if it is fresh, otherwise scan.
    Reload,
    /// Always scan.
    Rescan,
}

impl RebuildMode {
    fn max(self, other: RebuildMode) -> RebuildMode {
        if self == RebuildMode::Rescan || other == RebuildMode::Rescan {
            RebuildMode::Rescan
        } else {
            RebuildMode::Reload
        }
    }
}

impl Archive {
    pub fn new(options: ArchiveOptions) -> Self {
        Self::with_parser(options, Arc::new(ElispMetadataParser))
    }

    pub fn with_parser(options: ArchiveOptions, parser: Arc<dyn MetadataParser>) -> Self {
        let cache = CacheStore::new(options.store.clone());
        Self {
            inner: Arc::new(Inner {
                options,
                parser,
                cache,
                state: Mutex::new(State::default()),
                rebuilt: Condvar::new(),
            }),
        }
    }

    pub fn options(&self) -> &ArchiveOptions {
        &self.inner.options
    }

    pub fn cache(&self) -> &CacheStore {
        &self.inner.cache
    }

    /// Returns the current index, loading or building it first if none is held.
    pub fn snapshot(&self) -> ArchiveSnapshot {
        let root_mtime = mtime_secs(&self.inner.options.root).ok();
        let generated_at = root_mtime
            .map(secs_to_system_time)
            .unwrap_or_else(SystemTime::now);

        let mut state = self.inner.lock_state();
        if let Some(loaded) = state.current.as_ref() {
            let index = Arc::clone(&loaded.index);
            let outdated = self.inner.options.revalidate
                && !state.rebuilding
                && matches!(
                    (root_mtime, loaded.source_mtime),
                    (Some(root), Some(source)) if root > source
                );
            if outdated {
                state.rebuilding = true;
            }
            drop(state);

            if outdated {
                tracing::debug!(
                    target: "elpa.archive",
                    root = %self.inner.options.root.display(),
                    "repository root changed; rebuilding in the background"
                );
                start_rebuild(&self.inner, RebuildMode::Rescan);
            }
            return ArchiveSnapshot {
                index,
                generated_at,
            };
        }

        let seen = state.generation;
        let start = !state.rebuilding;
        state.rebuilding = true;
        drop(state);

        if start {
            start_rebuild(&self.inner, RebuildMode::Reload);
        }
        let state = self.inner.wait_until(|state| state.generation > seen);
        let index = state
            .current
            .as_ref()
            .map(|loaded| Arc::clone(&loaded.index))
            .unwrap_or_default();

        ArchiveSnapshot {
            index,
            generated_at,
        }
    }

    /// Drops the in-memory index and rebuilds it, returning the new snapshot.
    ///
    /// When `level` exceeds the configured purge threshold the disk cache is
    /// deleted as well and the rebuild always rescans the root. Otherwise a
    /// fresh disk cache is adopted again.
    pub fn refresh(&self, level: u32) -> ArchiveSnapshot {
        let purge = level > self.inner.options.purge_threshold;
        let mode = if purge {
            RebuildMode::Rescan
        } else {
            RebuildMode::Reload
        };

        let mut state = self.inner.lock_state();
        state.current = None;
        let start = !state.rebuilding;
        let target = if start {
            state.rebuilding = true;
            state.generation + 1
        } else {
            // The running pass may predate this request; queue another.
            state.pending = Some(state.pending.map_or(mode, |pending| pending.max(mode)));
            state.generation + 2
        };
        drop(state);

        tracing::info!(
            target: "elpa.archive",
            level,
            purge,
            "forced archive refresh"
        );
        if purge && !self.inner.cache.purge() {
            tracing::warn!(
                target: "elpa.archive",
                store = %self.inner.cache.dir().display(),
                "failed to delete cache files"
            );
        }
        if start {
            start_rebuild(&self.inner, mode);
        }

        drop(self.inner.wait_until(|state| state.generation >= target));
        self.snapshot()
    }

    pub fn status(&self) -> ArchiveStatus {
        let cache_path = self.inner.cache.cache_path();
        let cache_stale = is_stale(&self.inner.options.root, &cache_path);
        let state = self.inner.lock_state();
        ArchiveStatus {
            root: self.inner.options.root.clone(),
            cache_path,
            cache_stale,
            packages: state.current.as_ref().map(|loaded| loaded.index.len()),
            rebuilding: state.rebuilding,
            rebuilds: state.generation,
            last_rebuild: state.last_rebuild.clone(),
        }
    }

    /// Blocks until no rebuild is running.
    pub fn wait_idle(&self) {
        drop(self.inner.wait_until(|state| !state.rebuilding));
    }

    /// Location of the artifact backing `descriptor` under the root.
    pub fn artifact_path(&self, descriptor: &PackageDescriptor) -> PathBuf {
        let ext = self.inner.options.extensions.extension_for(descriptor.kind);
        self.inner
            .options
            .root
            .join(&descriptor.name)
            .join(descriptor.version.to_string())
            .join(format!("{}.{ext}", descriptor.name))
    }
}

impl Inner {
    fn lock_state(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn wait_until(&self, done: impl Fn(&State) -> bool) -> MutexGuard<'_, State> {
        let mut state = self.lock_state();
        while !done(&state) {
            state = self
                .rebuilt
                .wait(state)
                .unwrap_or_else(PoisonError::into_inner);
        }
        state
    }
}

/// Runs rebuild passes on a worker thread. The caller must have set
/// `rebuilding` while holding the lock.
fn start_rebuild(inner: &Arc<Inner>, mode: RebuildMode) {
    let for_thread = Arc::clone(inner);
    let spawned = std::thread::Builder::new()
        .name("elpa-archive-rebuild".to_owned())
        .spawn(move || run_rebuilds(&for_thread, mode));
    if let Err(err) = spawned {
        tracing::warn!(
            target: "elpa.archive",
            error = %err,
            "failed to spawn rebuild thread; rebuilding on the caller's thread"
        );
        run_rebuilds(inner, mode);
    }
}

fn run_rebuilds(inner: &Inner, mut mode: RebuildMode) {
    loop {
        let (loaded, report) = rebuild(inner, mode);

        let mut state = inner.lock_state();
        if let Some(loaded) = loaded {
            state.current = Some(loaded);
        }
        state.generation += 1;
        state.last_rebuild = Some(report);
        let next = state.pending.take();
        if next.is_none() {
            state.rebuilding = false;
        }
        drop(state);
        inner.rebuilt.notify_all();

        match next {
            Some(next) => mode = next,
            None => return,
        }
    }
}

fn rebuild(inner: &Inner, mode: RebuildMode) -> (Option<Loaded>, RebuildReport) {
    let started = Instant::now();
    let options = &inner.options;
    let cache_path = inner.cache.cache_path();

    if mode == RebuildMode::Reload && !is_stale(&options.root, &cache_path) {
        match inner.cache.load() {
            Ok(index) => {
                tracing::debug!(
                    target: "elpa.archive",
                    path = %cache_path.display(),
                    packages = index.len(),
                    "loaded archive index from cache"
                );
                let report = RebuildReport {
                    source: RebuildSource::Cache,
                    discovered: 0,
                    indexed: index.len(),
                    skipped: 0,
                    saved: false,
                    duration_ms: started.elapsed().as_millis() as u64,
                    finished_at_millis: now_millis(),
                    error: None,
                };
                let loaded = Loaded {
                    index: Arc::new(index),
                    source_mtime: mtime_secs(&cache_path).ok(),
                };
                return (Some(loaded), report);
            }
            Err(err) => {
                tracing::debug!(
                    target: "elpa.archive",
                    error = %err,
                    "archive cache unusable; rescanning"
                );
            }
        }
    }

    // Captured before listing so changes made during the scan trigger another.
    let source_mtime = mtime_secs(&options.root).ok();
    let candidates = match discover(&options.root, &options.extensions) {
        Ok(candidates) => candidates,
        Err(err) => {
            tracing::warn!(
                target: "elpa.archive",
                error = %err,
                "archive rebuild failed; keeping the previous index"
            );
            let report = RebuildReport {
                source: RebuildSource::Scan,
                discovered: 0,
                indexed: 0,
                skipped: 0,
                saved: false,
                duration_ms: started.elapsed().as_millis() as u64,
                finished_at_millis: now_millis(),
                error: Some(err.to_string()),
            };
            return (None, report);
        }
    };

    let mut index = ArchiveIndex::new();
    let mut skipped = 0usize;
    for candidate in &candidates {
        match extract_with_timeout(
            Arc::clone(&inner.parser),
            candidate,
            options.extraction_timeout,
        ) {
            Ok(descriptor) => {
                let version = descriptor.version.clone();
                if let MergeOutcome::Replaced { previous } = index.merge(descriptor) {
                    tracing::trace!(
                        target: "elpa.archive",
                        package = %candidate.name,
                        %previous,
                        %version,
                        "newer version replaces indexed entry"
                    );
                }
            }
            Err(err) => {
                skipped += 1;
                tracing::warn!(
                    target: "elpa.archive",
                    path = %candidate.path.display(),
                    error = %err,
                    "skipping package artifact"
                );
            }
        }
    }

    let saved = match inner.cache.save(&index) {
        Ok(()) => true,
        Err(err) => {
            tracing::warn!(
                target: "elpa.archive",
                error = %err,
                "failed to persist archive cache"
            );
            false
        }
    };

    let report = RebuildReport {
        source: RebuildSource::Scan,
        discovered: candidates.len(),
        indexed: index.len(),
        skipped,
        saved,
        duration_ms: started.elapsed().as_millis() as u64,
        finished_at_millis: now_millis(),
        error: None,
    };
    tracing::info!(
        target: "elpa.archive",
        root = %options.root.display(),
        discovered = report.discovered,
        indexed = report.indexed,
        skipped = report.skipped,
        duration_ms = report.duration_ms,
        "rebuilt archive index"
    );

    let loaded = Loaded {
        index: Arc::new(index),
        source_mtime,
    };
    (Some(loaded), report)
}
