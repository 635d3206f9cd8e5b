//! Integration tests for the local-disk blob backend.

use file_gateway::{
    blob::{BlobAdapter, BlobError, LocalBlobAdapter},
    models::blob::{ListObjectsParams, PresignOperation, UploadObject},
};
use futures::TryStreamExt;
use std::{collections::BTreeMap, time::Duration};
use tempfile::TempDir;
use uuid::Uuid;

const BUCKET: &str = "tenant-a";

fn backend() -> (TempDir, LocalBlobAdapter) {
    let dir = tempfile::tempdir().expect("Failed to create temp directory");
    let adapter = LocalBlobAdapter::new(
        dir.path().join("objects"),
        "http://gateway.test",
        b"secret".to_vec(),
    )
    .unwrap();
    (dir, adapter)
}

async fn put(adapter: &LocalBlobAdapter, key: &str, data: &'static [u8]) {
    adapter.ensure_bucket_exists(BUCKET).await.unwrap();
    adapter
        .put_object(
            BUCKET,
            key,
            bytes::Bytes::from_static(data),
            None,
            BTreeMap::new(),
        )
        .await
        .unwrap();
}

#[tokio::test]
async fn upload_download_round_trip() {
    let (_dir, adapter) = backend();

    let uploaded = adapter
        .upload_object(
            BUCKET,
            UploadObject::new(&b"hello"[..], "a.txt")
                .content_type("text/plain")
                .key_salt(Uuid::new_v4())
                .meta("storage-id", "abc"),
        )
        .await
        .unwrap();
    assert_eq!(uploaded.bucket, BUCKET);
    assert_eq!(uploaded.etag, format!("{:x}", md5::compute(b"hello")));
    assert!(adapter.object_exists(BUCKET, &uploaded.key, None).await.unwrap());

    let downloaded = adapter
        .download_object(BUCKET, &uploaded.key, None)
        .await
        .unwrap();
    assert_eq!(downloaded.data.as_ref(), b"hello");
    assert_eq!(downloaded.metadata.mimetype, "text/plain");
    assert_eq!(downloaded.metadata.size, 5);
    assert_eq!(downloaded.metadata.etag.as_deref(), Some(uploaded.etag.as_str()));

    assert_eq!(adapter.object_size(BUCKET, &uploaded.key, None).await.unwrap(), 5);
    let versions = adapter.object_versions(BUCKET, &uploaded.key).await.unwrap();
    assert_eq!(versions.len(), 1);
    assert_eq!(versions[0].version_id, "null");
}

#[tokio::test]
async fn long_utf8_filenames_are_stored() {
    let (_dir, adapter) = backend();

    for name in [
        "プロジェクト計画書_第三四半期_レビュー済み最終版.docx".to_string(),
        format!("{}.pdf", "é".repeat(120)),
        "报告 ".repeat(40),
    ] {
        let uploaded = adapter
            .upload_object(BUCKET, UploadObject::new(&b"payload"[..], name.as_str()))
            .await
            .unwrap();
        assert!(adapter.object_exists(BUCKET, &uploaded.key, None).await.unwrap());

        let downloaded = adapter
            .download_object(BUCKET, &uploaded.key, None)
            .await
            .unwrap();
        assert_eq!(downloaded.data.as_ref(), b"payload");
    }

    let listed = adapter
        .list_objects(BUCKET, ListObjectsParams::default())
        .await
        .unwrap();
    assert_eq!(listed.items.len(), 3);
}

#[tokio::test]
async fn corrupt_sidecar_falls_back_to_defaults() {
    let (dir, adapter) = backend();
    put(&adapter, "k.txt", b"x").await;
    std::fs::write(
        dir.path().join("objects").join(BUCKET).join("k%2Etxt.meta"),
        b"{not json",
    )
    .unwrap();

    let stat = adapter.stat_object(BUCKET, "k.txt", None).await.unwrap();
    assert_eq!(stat.size, 1);
    assert_eq!(stat.mimetype, "application/octet-stream");
    assert!(stat.etag.is_none());
}

#[tokio::test]
async fn missing_objects_are_not_found_but_absent_for_exists() {
    let (_dir, adapter) = backend();
    adapter.ensure_bucket_exists(BUCKET).await.unwrap();

    assert!(!adapter.object_exists(BUCKET, "nope", None).await.unwrap());
    assert!(matches!(
        adapter.download_object(BUCKET, "nope", None).await,
        Err(BlobError::NotFound { .. })
    ));
    assert!(matches!(
        adapter.stat_object(BUCKET, "nope", None).await,
        Err(BlobError::NotFound { .. })
    ));
    assert!(matches!(
        adapter.copy_object(BUCKET, "nope", BUCKET, "dst").await,
        Err(BlobError::NotFound { .. })
    ));
}

#[tokio::test]
async fn delete_is_idempotent() {
    let (_dir, adapter) = backend();
    put(&adapter, "k.txt", b"x").await;

    assert!(adapter.delete_object(BUCKET, "k.txt", None).await.unwrap());
    assert!(!adapter.object_exists(BUCKET, "k.txt", None).await.unwrap());
    assert!(adapter.delete_object(BUCKET, "k.txt", None).await.unwrap());
}

#[tokio::test]
async fn ensure_bucket_is_idempotent_and_validates() {
    let (_dir, adapter) = backend();
    assert!(adapter.ensure_bucket_exists(BUCKET).await.unwrap());
    assert!(adapter.ensure_bucket_exists(BUCKET).await.unwrap());
    assert!(matches!(
        adapter.ensure_bucket_exists("../etc").await,
        Err(BlobError::InvalidBucketName { .. })
    ));
}

#[tokio::test]
async fn copy_lands_in_a_new_bucket() {
    let (_dir, adapter) = backend();
    put(&adapter, "src.txt", b"copy me").await;

    assert!(
        adapter
            .copy_object(BUCKET, "src.txt", "archive", "dst.txt")
            .await
            .unwrap()
    );
    let copied = adapter
        .download_object("archive", "dst.txt", None)
        .await
        .unwrap();
    assert_eq!(copied.data.as_ref(), b"copy me");
    assert!(adapter.object_exists(BUCKET, "src.txt", None).await.unwrap());
}

#[tokio::test]
async fn nested_keys_are_listed_in_order() {
    let (_dir, adapter) = backend();
    for key in ["photos/b.jpg", "photos/a.jpg", "docs/z.txt", "photos.txt"] {
        put(&adapter, key, b"x").await;
    }

    let keys: Vec<String> = adapter
        .object_stream(BUCKET, Some("photos/"), None)
        .map_ok(|item| item.key)
        .try_collect()
        .await
        .unwrap();
    assert_eq!(keys, ["photos/a.jpg", "photos/b.jpg"]);

    let all: Vec<String> = adapter
        .object_stream(BUCKET, None, None)
        .map_ok(|item| item.key)
        .try_collect()
        .await
        .unwrap();
    assert_eq!(all, ["docs/z.txt", "photos.txt", "photos/a.jpg", "photos/b.jpg"]);
}

#[tokio::test]
async fn pagination_has_no_overlap_and_no_gap() {
    let (_dir, adapter) = backend();
    let expected: Vec<String> = (0..7).map(|i| format!("obj-{i:02}")).collect();
    for key in &expected {
        adapter.ensure_bucket_exists(BUCKET).await.unwrap();
        adapter
            .put_object(
                BUCKET,
                key,
                bytes::Bytes::from_static(b"data"),
                None,
                BTreeMap::new(),
            )
            .await
            .unwrap();
    }

    let mut seen = Vec::new();
    let mut token = None;
    let mut pages = 0;
    loop {
        let page = adapter
            .list_objects(
                BUCKET,
                ListObjectsParams {
                    prefix: None,
                    max_keys: Some(3),
                    continuation_token: token.clone(),
                },
            )
            .await
            .unwrap();
        pages += 1;
        assert!(page.items.len() <= 3);
        seen.extend(page.items.into_iter().map(|item| item.key));
        if !page.is_truncated {
            assert!(page.next_continuation_token.is_none());
            break;
        }
        token = page.next_continuation_token;
    }

    assert_eq!(pages, 3);
    assert_eq!(seen, expected);
}

#[tokio::test]
async fn empty_or_missing_bucket_lists_nothing() {
    let (_dir, adapter) = backend();
    let page = adapter
        .list_objects("never-created", ListObjectsParams::default())
        .await
        .unwrap();
    assert!(page.items.is_empty());
    assert!(!page.is_truncated);

    let stats = adapter.bucket_stats("never-created").await.unwrap();
    assert_eq!(stats.total_files, 0);
    assert!(stats.last_modified.is_none());
}

#[tokio::test]
async fn bucket_stats_fold_every_object() {
    let (_dir, adapter) = backend();
    put(&adapter, "a", b"12345").await;
    put(&adapter, "b", b"123").await;

    let stats = adapter.bucket_stats(BUCKET).await.unwrap();
    assert_eq!(stats.total_files, 2);
    assert_eq!(stats.total_size, 8);
    assert!(stats.last_modified.is_some());
}

#[tokio::test]
async fn presigned_get_requires_the_object() {
    let (_dir, adapter) = backend();
    adapter.ensure_bucket_exists(BUCKET).await.unwrap();

    assert!(matches!(
        adapter
            .presigned_url(BUCKET, "missing", PresignOperation::Get, Duration::from_secs(60))
            .await,
        Err(BlobError::NotFound { .. })
    ));

    let url = adapter
        .presigned_url(BUCKET, "missing", PresignOperation::Put, Duration::from_secs(60))
        .await
        .unwrap();
    assert!(url.starts_with("http://gateway.test/blobs/tenant-a/missing?method=PUT"));
}

#[tokio::test]
async fn presigned_post_is_signed_as_put() {
    let (_dir, adapter) = backend();
    put(&adapter, "k", b"x").await;

    let url = adapter
        .presigned_url(BUCKET, "k", PresignOperation::Post, Duration::from_secs(60))
        .await
        .unwrap();
    assert!(url.contains("method=PUT"));

    assert!(matches!(
        adapter
            .presigned_url(BUCKET, "k", PresignOperation::Get, Duration::ZERO)
            .await,
        Err(BlobError::InvalidExpiry(_))
    ));
}

#[tokio::test]
async fn health_check_passes_on_a_writable_root() {
    let (_dir, adapter) = backend();
    adapter.health_check().await.unwrap();
    assert_eq!(adapter.backend_name(), "local");
}
