use std::fs::File;
use std::time::{Duration, SystemTime};

use elpa_archive::{is_stale, ArchiveIndex, CacheStore};

fn set_mtime(path: &std::path::Path, time: SystemTime) {
    File::open(path).unwrap().set_modified(time).unwrap();
}

#[test]
fn missing_cache_is_stale_regardless_of_root_mtime() {
    let tmp = tempfile::tempdir().unwrap();
    let root = tmp.path().join("root");
    std::fs::create_dir(&root).unwrap();
    set_mtime(&root, SystemTime::UNIX_EPOCH + Duration::from_secs(1));

    assert!(is_stale(&root, &tmp.path().join("store/archive-contents.bin")));
}

#[test]
fn cache_at_least_as_new_as_root_is_fresh() {
    let tmp = tempfile::tempdir().unwrap();
    let root = tmp.path().join("root");
    std::fs::create_dir(&root).unwrap();
    let store = CacheStore::new(tmp.path().join("store"));
    store.save(&ArchiveIndex::new()).unwrap();

    let t = SystemTime::UNIX_EPOCH + Duration::from_secs(1_700_000_000);
    set_mtime(&root, t);
    set_mtime(&store.cache_path(), t);
    assert!(!is_stale(&root, &store.cache_path()));

    // Sub-second differences are ignored.
    set_mtime(&root, t + Duration::from_millis(400));
    assert!(!is_stale(&root, &store.cache_path()));

    set_mtime(&root, t + Duration::from_secs(2));
    assert!(is_stale(&root, &store.cache_path()));
}

#[test]
fn unreadable_root_is_stale() {
    let tmp = tempfile::tempdir().unwrap();
    let store = CacheStore::new(tmp.path());
    store.save(&ArchiveIndex::new()).unwrap();
    assert!(is_stale(&tmp.path().join("missing-root"), &store.cache_path()));
}
