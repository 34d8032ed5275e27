//! Stable-list cache behavior: list round-trips, fingerprint comparisons,
//! session reset, TTL expiry.

use std::path::PathBuf;

use emissary_cache::stable_list::current_fingerprint;
use emissary_cache::{CacheError, StableListCache};

fn open_cache(dir: &tempfile::TempDir, ttl: u64) -> StableListCache {
    StableListCache::open(&dir.path().join("stable.sqlite3"), ttl, 0.0).unwrap()
}

fn paths(list: &[&str]) -> Vec<PathBuf> {
    list.iter().map(PathBuf::from).collect()
}

#[tokio::test]
async fn save_and_retrieve_stable_list() {
    let dir = tempfile::tempdir().unwrap();
    let cache = open_cache(&dir, 3600);

    let files = paths(&["/api/file1.rs", "/api/file2.rs", "/lib/file3.rs"]);
    cache.save_stable_list("test_session", &files).await.unwrap();

    let result = cache.get_stable_list("test_session").await.unwrap();
    assert_eq!(result, Some(files));
}

#[tokio::test]
async fn retrieve_non_existent_list_is_none() {
    let dir = tempfile::tempdir().unwrap();
    let cache = open_cache(&dir, 3600);
    assert_eq!(cache.get_stable_list("nope").await.unwrap(), None);
}

#[tokio::test]
async fn overwrite_stable_list() {
    let dir = tempfile::tempdir().unwrap();
    let cache = open_cache(&dir, 3600);

    cache
        .save_stable_list("s", &paths(&["/api/a.rs", "/api/b.rs"]))
        .await
        .unwrap();
    let new_list = paths(&["/lib/c.rs", "/lib/d.rs", "/lib/e.rs"]);
    cache.save_stable_list("s", &new_list).await.unwrap();

    assert_eq!(cache.get_stable_list("s").await.unwrap(), Some(new_list));
}

#[tokio::test]
async fn save_and_get_sent_file_info() {
    let dir = tempfile::tempdir().unwrap();
    let cache = open_cache(&dir, 3600);

    cache
        .update_sent_file_info("s", &PathBuf::from("/api/file1.rs"), 12345, 1_700_000_000)
        .await
        .unwrap();

    let info = cache
        .get_sent_file_info("s", &PathBuf::from("/api/file1.rs"))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(info.size, 12345);
    assert_eq!(info.mtime_ns, 1_700_000_000);

    assert!(cache
        .get_sent_file_info("s", &PathBuf::from("/api/other.rs"))
        .await
        .unwrap()
        .is_none());
}

#[tokio::test]
async fn update_replaces_existing_info() {
    let dir = tempfile::tempdir().unwrap();
    let cache = open_cache(&dir, 3600);
    let p = PathBuf::from("/api/file1.rs");

    cache
        .update_sent_file_info("s", &p, 12345, 1_700_000_000)
        .await
        .unwrap();
    cache
        .update_sent_file_info("s", &p, 54321, 1_700_001_000)
        .await
        .unwrap();

    let info = cache.get_sent_file_info("s", &p).await.unwrap().unwrap();
    assert_eq!(info.size, 54321);
    assert_eq!(info.mtime_ns, 1_700_001_000);
}

#[tokio::test]
async fn batch_update_sent_files() {
    let dir = tempfile::tempdir().unwrap();
    let cache = open_cache(&dir, 3600);

    let files = vec![
        (PathBuf::from("/api/file1.rs"), 12345u64, 1_700_000_000i64),
        (PathBuf::from("/api/file2.rs"), 23456, 1_700_000_100),
        (PathBuf::from("/api/file3.rs"), 34567, 1_700_000_200),
    ];
    cache.batch_update_sent_files("s", &files).await.unwrap();

    for (path, size, mtime_ns) in files {
        let info = cache.get_sent_file_info("s", &path).await.unwrap().unwrap();
        assert_eq!(info.size, size);
        assert_eq!(info.mtime_ns, mtime_ns);
    }
}

#[tokio::test]
async fn new_file_counts_as_changed() {
    let dir = tempfile::tempdir().unwrap();
    let cache = open_cache(&dir, 3600);
    assert!(cache
        .file_changed_since_last_send("s", &PathBuf::from("/api/new_file.rs"))
        .await
        .unwrap());
}

#[tokio::test]
async fn unchanged_file_is_not_changed() {
    let dir = tempfile::tempdir().unwrap();
    let cache = open_cache(&dir, 3600);

    let file = dir.path().join("data.txt");
    std::fs::write(&file, "hello").unwrap();
    let (size, mtime_ns) = current_fingerprint(&file).unwrap();

    cache
        .update_sent_file_info("s", &file, size, mtime_ns)
        .await
        .unwrap();
    assert!(!cache.file_changed_since_last_send("s", &file).await.unwrap());
}

#[tokio::test]
async fn size_change_is_detected() {
    let dir = tempfile::tempdir().unwrap();
    let cache = open_cache(&dir, 3600);

    let file = dir.path().join("data.txt");
    std::fs::write(&file, "hello").unwrap();
    let (size, mtime_ns) = current_fingerprint(&file).unwrap();
    cache
        .update_sent_file_info("s", &file, size, mtime_ns)
        .await
        .unwrap();

    std::fs::write(&file, "hello, longer content").unwrap();
    assert!(cache.file_changed_since_last_send("s", &file).await.unwrap());
}

#[tokio::test]
async fn recorded_mtime_mismatch_is_detected() {
    let dir = tempfile::tempdir().unwrap();
    let cache = open_cache(&dir, 3600);

    let file = dir.path().join("data.txt");
    std::fs::write(&file, "hello").unwrap();
    let (size, mtime_ns) = current_fingerprint(&file).unwrap();

    // Same size, different recorded mtime.
    cache
        .update_sent_file_info("s", &file, size, mtime_ns - 1)
        .await
        .unwrap();
    assert!(cache.file_changed_since_last_send("s", &file).await.unwrap());
}

#[tokio::test]
async fn reset_session_clears_both_tables() {
    let dir = tempfile::tempdir().unwrap();
    let cache = open_cache(&dir, 3600);
    let p = PathBuf::from("/api/file1.rs");

    cache
        .save_stable_list("s", &paths(&["/api/file1.rs", "/api/file2.rs"]))
        .await
        .unwrap();
    cache
        .update_sent_file_info("s", &p, 12345, 1_700_000_000)
        .await
        .unwrap();

    cache.reset_session("s").await.unwrap();

    assert!(cache.get_stable_list("s").await.unwrap().is_none());
    assert!(cache.get_sent_file_info("s", &p).await.unwrap().is_none());
}

#[tokio::test]
async fn entries_expire_after_ttl() {
    let dir = tempfile::tempdir().unwrap();
    let db_path = dir.path().join("stable.sqlite3");
    let cache = StableListCache::open(&db_path, 10, 0.0).unwrap();

    cache
        .save_stable_list("s", &paths(&["/api/file1.rs"]))
        .await
        .unwrap();
    assert!(cache.get_stable_list("s").await.unwrap().is_some());

    // Age every row past the TTL through a second connection to the same file.
    let conn = rusqlite::Connection::open(&db_path).unwrap();
    conn.execute("UPDATE stable_list SET updated_at = updated_at - 11", [])
        .unwrap();
    drop(conn);

    assert!(cache.get_stable_list("s").await.unwrap().is_none());
}

#[tokio::test]
async fn oversized_session_id_is_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let cache = open_cache(&dir, 3600);
    let long = "x".repeat(1025);
    let err = cache.get_stable_list(&long).await.unwrap_err();
    assert!(matches!(err, CacheError::SessionIdTooLong { len: 1025 }));
}
