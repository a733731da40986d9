//! End-to-end tests for the sync client facade.

mod support;

use std::path::Path;

use chrono::{Duration, TimeZone, Utc};
use filetime::FileTime;
use pretty_assertions::assert_eq;

use objsync::hash::hash_bytes;
use objsync::{SyncClient, SyncError, SyncSettings, TransferSettings};
use support::MemoryStore;

fn day(d: u32) -> chrono::DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 1, d, 0, 0, 0).unwrap()
}

/// Writes a file and pins its mtime, so runs of the same test are
/// deterministic regardless of wall-clock time.
fn write_pinned(path: &Path, data: &[u8], mtime: chrono::DateTime<Utc>) {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).unwrap();
    }
    std::fs::write(path, data).unwrap();
    filetime::set_file_mtime(path, FileTime::from_unix_time(mtime.timestamp(), 0)).unwrap();
}

#[tokio::test]
async fn upload_sync_pushes_the_whole_tree_once() {
    let store = MemoryStore::new();
    let client = SyncClient::new(store.clone());
    let root = tempfile::tempdir().unwrap();
    write_pinned(&root.path().join("a.txt"), b"alpha", day(1));
    write_pinned(&root.path().join("sub/b.txt"), b"beta", day(1));

    let settings = SyncSettings::with_prefix("site");
    let report = client.sync_upload_dir(root.path(), &settings).await.unwrap();

    assert_eq!(report.changed, vec!["site/a.txt", "site/sub/b.txt"]);
    assert!(report.failed.is_empty());

    let obj = store.object("site/a.txt").unwrap();
    assert_eq!(obj.data, b"alpha");
    // Uploads carry the content hash as custom metadata.
    assert_eq!(
        obj.custom.get("hashtag").map(String::as_str),
        Some(hash_bytes(b"alpha").as_str())
    );

    // A second run finds the remote copies newer and moves nothing.
    let report = client.sync_upload_dir(root.path(), &settings).await.unwrap();
    assert!(report.changed.is_empty());
    assert!(report.failed.is_empty());
}

#[tokio::test]
async fn upload_sync_leaves_remote_only_objects_alone() {
    let store = MemoryStore::new();
    let client = SyncClient::new(store.clone());
    let root = tempfile::tempdir().unwrap();
    write_pinned(&root.path().join("a.txt"), b"alpha", day(1));
    store.seed("site/remote-only.bin", b"keep", day(1), None);

    let settings = SyncSettings::with_prefix("site");
    let report = client.sync_upload_dir(root.path(), &settings).await.unwrap();

    assert_eq!(report.changed, vec!["site/a.txt"]);
    assert_eq!(store.object("site/remote-only.bin").unwrap().data, b"keep");
}

#[tokio::test]
async fn download_sync_materializes_the_remote_tree() {
    let store = MemoryStore::new();
    let client = SyncClient::new(store.clone());
    store.seed("site/a.txt", b"alpha", day(1), None);
    store.seed("site/sub/b.txt", b"beta", day(1), None);

    let root = tempfile::tempdir().unwrap();
    let target = root.path().join("pull");
    let settings = SyncSettings::with_prefix("site");
    let report = client.sync_download_dir(&target, &settings).await.unwrap();

    assert_eq!(report.changed, vec!["site/a.txt", "site/sub/b.txt"]);
    assert_eq!(std::fs::read(target.join("a.txt")).unwrap(), b"alpha");
    assert_eq!(std::fs::read(target.join("sub/b.txt")).unwrap(), b"beta");

    // The freshly written files are now newer than the remote copies.
    let report = client.sync_download_dir(&target, &settings).await.unwrap();
    assert!(report.changed.is_empty());
}

#[tokio::test]
async fn per_file_failures_do_not_stop_the_sync() {
    let store = MemoryStore::new();
    store
        .fail_puts
        .lock()
        .unwrap()
        .insert("site/bad.txt".to_string());
    let client = SyncClient::new(store.clone());
    let root = tempfile::tempdir().unwrap();
    write_pinned(&root.path().join("bad.txt"), b"nope", day(1));
    write_pinned(&root.path().join("good.txt"), b"fine", day(1));

    let settings = SyncSettings::with_prefix("site");
    let report = client.sync_upload_dir(root.path(), &settings).await.unwrap();

    assert_eq!(report.changed, vec!["site/good.txt"]);
    assert_eq!(report.failed.len(), 1);
    assert_eq!(report.failed[0].key, "site/bad.txt");
    assert!(store.object("site/bad.txt").is_none());
}

#[tokio::test]
async fn fail_fast_surfaces_the_first_error_and_stops() {
    let store = MemoryStore::new();
    store
        .fail_puts
        .lock()
        .unwrap()
        .insert("a-bad.txt".to_string());
    let client = SyncClient::new(store.clone());
    let root = tempfile::tempdir().unwrap();
    write_pinned(&root.path().join("a-bad.txt"), b"nope", day(1));
    write_pinned(&root.path().join("z-good.txt"), b"fine", day(1));

    let mut settings = SyncSettings::default();
    settings.transfer.fail_fast = true;
    let err = client
        .sync_upload_dir(root.path(), &settings)
        .await
        .unwrap_err();

    assert!(matches!(err, SyncError::Store(_)));
    // The later transfer never ran.
    assert!(store.object("z-good.txt").is_none());
}

#[tokio::test]
async fn single_file_sync_uploads_then_settles() {
    let store = MemoryStore::new();
    let client = SyncClient::new(store.clone());
    let root = tempfile::tempdir().unwrap();
    let path = root.path().join("c.txt");
    write_pinned(&path, b"v1", day(1));

    let settings = SyncSettings::with_prefix("site");
    let key = client.sync_upload_file(&path, &settings).await.unwrap();
    assert_eq!(key.as_deref(), Some("site/c.txt"));

    // The remote copy was just written, so a re-run is a no-op.
    let key = client.sync_upload_file(&path, &settings).await.unwrap();
    assert_eq!(key, None);

    // Touching the file into the future makes it the newer side again.
    let future = Utc::now() + Duration::hours(1);
    write_pinned(&path, b"v2", future);
    let key = client.sync_upload_file(&path, &settings).await.unwrap();
    assert_eq!(key.as_deref(), Some("site/c.txt"));
    assert_eq!(store.object("site/c.txt").unwrap().data, b"v2");
}

#[tokio::test]
async fn single_file_sync_downloads_a_missing_local_copy() {
    let store = MemoryStore::new();
    let client = SyncClient::new(store.clone());
    store.seed("site/c.txt", b"remote", day(1), None);

    let root = tempfile::tempdir().unwrap();
    let path = root.path().join("c.txt");
    let settings = SyncSettings::with_prefix("site");
    let key = client.sync_download_file(&path, &settings).await.unwrap();

    assert_eq!(key.as_deref(), Some("site/c.txt"));
    assert_eq!(std::fs::read(&path).unwrap(), b"remote");

    // The local file is now the newer side.
    let key = client.sync_download_file(&path, &settings).await.unwrap();
    assert_eq!(key, None);
}

#[tokio::test]
async fn single_file_sync_with_neither_side_is_not_found() {
    let store = MemoryStore::new();
    let client = SyncClient::new(store.clone());
    let root = tempfile::tempdir().unwrap();

    let err = client
        .sync_download_file(&root.path().join("absent.txt"), &SyncSettings::default())
        .await
        .unwrap_err();
    assert!(matches!(err, SyncError::NotFound(_)));
}

#[tokio::test]
async fn presigned_url_rejects_past_expiry_without_a_store_call() {
    let store = MemoryStore::new();
    let client = SyncClient::new(store.clone());

    let err = client
        .presigned_url("site/a.txt", None, Utc::now() - Duration::hours(1))
        .await
        .unwrap_err();
    assert!(matches!(err, SyncError::Config(_)));
    assert_eq!(store.presign_call_count(), 0);

    let url = client
        .presigned_url("site/a.txt", None, Utc::now() + Duration::hours(1))
        .await
        .unwrap();
    assert!(url.contains("site/a.txt"));
    assert_eq!(store.presign_call_count(), 1);
}

#[tokio::test]
async fn delete_is_idempotent() {
    let store = MemoryStore::new();
    let client = SyncClient::new(store.clone());
    store.seed("site/a.txt", b"alpha", day(1), None);

    let settings = TransferSettings::default();
    client.delete("site/a.txt", None, &settings).await.unwrap();
    assert!(store.object("site/a.txt").is_none());
    // Deleting again succeeds quietly.
    client.delete("site/a.txt", None, &settings).await.unwrap();
}

#[tokio::test]
async fn metadata_queries_reflect_the_stored_object() {
    let store = MemoryStore::new();
    let client = SyncClient::new(store.clone());
    let tag = hash_bytes(b"alpha");
    store.seed("site/a.txt", b"alpha", day(3), Some(&tag));

    assert_eq!(
        client.last_modified("site/a.txt", None).await.unwrap(),
        Some(day(3))
    );
    assert_eq!(
        client.hash_tag("site/a.txt", None).await.unwrap().as_deref(),
        Some(tag.as_str())
    );
    assert!(client.etag("site/a.txt", None).await.unwrap().is_some());
    assert_eq!(
        client
            .get_string("site/a.txt", None, &TransferSettings::default())
            .await
            .unwrap(),
        "alpha"
    );

    let entries = client.get_objects("site/").await.unwrap();
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].key, "site/a.txt");
}
