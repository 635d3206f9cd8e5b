//! Common test utilities: an in-memory catalog and an instrumented in-memory
//! blob backend.
//!
//! Note: #[allow(dead_code)] because each test file compiles common/ separately.

use async_trait::async_trait;
use bytes::Bytes;
use chrono::Utc;
use file_gateway::{
    blob::{
        BlobAdapter, BlobError, BlobResult, LocalBlobAdapter, ObjectStream, derive_object_key,
        effective_operation, validate_presign_ttl,
    },
    catalog::Catalog,
    handlers::AppState,
    models::blob::{
        DownloadedObject, ObjectMetadata, PresignOperation, UploadObject, UploadedObject,
        filename_of,
    },
    services::{FileService, OriginInfo, UploadRequest},
};
use sqlx::sqlite::SqlitePoolOptions;
use std::{
    collections::{BTreeMap, HashMap},
    sync::{
        Arc, Mutex,
        atomic::{AtomicBool, Ordering},
    },
    time::Duration,
};
use tempfile::TempDir;
use uuid::Uuid;

pub const BUCKET: &str = "tenantA";
pub const TENANT: &str = "t1";

/// Fresh migrated catalog on a private in-memory SQLite database.
#[allow(dead_code)]
pub async fn test_catalog() -> Catalog {
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .connect("sqlite::memory:")
        .await
        .expect("Failed to open in-memory SQLite");
    let catalog = Catalog::new(pool);
    catalog.migrate().await.expect("Failed to migrate catalog");
    catalog
}

/// Make every later `UPDATE` on the catalog fail.
#[allow(dead_code)]
pub async fn reject_catalog_updates(catalog: &Catalog) {
    sqlx::query(
        "CREATE TRIGGER reject_updates BEFORE UPDATE ON file_records \
         BEGIN SELECT RAISE(ABORT, 'catalog is read-only'); END",
    )
    .execute(catalog.pool())
    .await
    .expect("Failed to install update trigger");
}

#[allow(dead_code)]
pub fn origin() -> OriginInfo {
    OriginInfo::new(BUCKET, TENANT)
}

#[allow(dead_code)]
pub fn upload_request(filename: &str, data: &'static [u8]) -> UploadRequest {
    UploadRequest {
        data: Bytes::from_static(data),
        filename: filename.to_string(),
        mimetype: Some("text/plain".to_string()),
        origin: origin(),
    }
}

/// Blob backend held in memory that counts calls and can be told to fail.
#[allow(dead_code)]
#[derive(Default)]
pub struct MemoryBlobAdapter {
    objects: Mutex<BTreeMap<(String, String), (Bytes, ObjectMetadata)>>,
    calls: Mutex<HashMap<&'static str, usize>>,
    fail_uploads: AtomicBool,
    unavailable: AtomicBool,
}

#[allow(dead_code)]
impl MemoryBlobAdapter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of times `op` was called.
    pub fn calls(&self, op: &str) -> usize {
        self.calls.lock().unwrap().get(op).copied().unwrap_or(0)
    }

    pub fn reset_calls(&self) {
        self.calls.lock().unwrap().clear();
    }

    pub fn fail_uploads(&self, fail: bool) {
        self.fail_uploads.store(fail, Ordering::SeqCst);
    }

    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    /// Remove an object behind the gateway's back.
    pub fn remove_out_of_band(&self, bucket: &str, key: &str) {
        self.objects
            .lock()
            .unwrap()
            .remove(&(bucket.to_string(), key.to_string()));
    }

    pub fn insert(&self, bucket: &str, key: &str, data: &'static [u8]) {
        let metadata = ObjectMetadata {
            filename: filename_of(key),
            original_name: key.to_string(),
            mimetype: "application/octet-stream".to_string(),
            size: data.len() as u64,
            bucket: bucket.to_string(),
            key: key.to_string(),
            etag: Some(format!("{:x}", md5::compute(data))),
            last_modified: Some(Utc::now()),
            version_id: None,
        };
        self.objects.lock().unwrap().insert(
            (bucket.to_string(), key.to_string()),
            (Bytes::from_static(data), metadata),
        );
    }

    pub fn len(&self) -> usize {
        self.objects.lock().unwrap().len()
    }

    fn record(&self, op: &'static str) -> BlobResult<()> {
        *self.calls.lock().unwrap().entry(op).or_default() += 1;
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(BlobError::BackendUnavailable("connection refused".into()));
        }
        Ok(())
    }

    fn get(&self, bucket: &str, key: &str) -> Option<(Bytes, ObjectMetadata)> {
        self.objects
            .lock()
            .unwrap()
            .get(&(bucket.to_string(), key.to_string()))
            .cloned()
    }
}

#[async_trait]
impl BlobAdapter for MemoryBlobAdapter {
    fn backend_name(&self) -> &'static str {
        "memory"
    }

    async fn ensure_bucket_exists(&self, _bucket: &str) -> BlobResult<bool> {
        self.record("ensure_bucket_exists")?;
        Ok(true)
    }

    async fn upload_object(
        &self,
        bucket: &str,
        object: UploadObject,
    ) -> BlobResult<UploadedObject> {
        self.record("upload_object")?;
        self.ensure_bucket_exists(bucket).await?;

        let key = derive_object_key(
            &object.filename,
            object.key_salt.unwrap_or_else(Uuid::new_v4),
            Utc::now(),
        );
        if self.fail_uploads.load(Ordering::SeqCst) {
            return Err(BlobError::WriteFailed {
                bucket: bucket.to_string(),
                key,
                reason: "injected failure".into(),
            });
        }

        let etag = format!("{:x}", md5::compute(&object.data));
        let metadata = ObjectMetadata {
            filename: object.filename.clone(),
            original_name: object.filename.clone(),
            mimetype: object
                .content_type
                .clone()
                .unwrap_or_else(|| "application/octet-stream".into()),
            size: object.data.len() as u64,
            bucket: bucket.to_string(),
            key: key.clone(),
            etag: Some(etag.clone()),
            last_modified: Some(Utc::now()),
            version_id: None,
        };
        self.objects.lock().unwrap().insert(
            (bucket.to_string(), key.clone()),
            (object.data, metadata.clone()),
        );

        Ok(UploadedObject {
            bucket: bucket.to_string(),
            key,
            etag,
            metadata,
        })
    }

    async fn download_object(
        &self,
        bucket: &str,
        key: &str,
        _version_id: Option<&str>,
    ) -> BlobResult<DownloadedObject> {
        self.record("download_object")?;
        let (data, metadata) = self
            .get(bucket, key)
            .ok_or_else(|| BlobError::not_found(bucket, key))?;
        Ok(DownloadedObject { data, metadata })
    }

    async fn delete_object(
        &self,
        bucket: &str,
        key: &str,
        _version_id: Option<&str>,
    ) -> BlobResult<bool> {
        self.record("delete_object")?;
        self.remove_out_of_band(bucket, key);
        Ok(true)
    }

    async fn copy_object(
        &self,
        src_bucket: &str,
        src_key: &str,
        dst_bucket: &str,
        dst_key: &str,
    ) -> BlobResult<bool> {
        self.record("copy_object")?;
        let (data, mut metadata) = self
            .get(src_bucket, src_key)
            .ok_or_else(|| BlobError::not_found(src_bucket, src_key))?;
        metadata.bucket = dst_bucket.to_string();
        metadata.key = dst_key.to_string();
        self.objects
            .lock()
            .unwrap()
            .insert((dst_bucket.to_string(), dst_key.to_string()), (data, metadata));
        Ok(true)
    }

    async fn stat_object(
        &self,
        bucket: &str,
        key: &str,
        _version_id: Option<&str>,
    ) -> BlobResult<ObjectMetadata> {
        self.record("stat_object")?;
        self.get(bucket, key)
            .map(|(_, metadata)| metadata)
            .ok_or_else(|| BlobError::not_found(bucket, key))
    }

    async fn object_exists(
        &self,
        bucket: &str,
        key: &str,
        _version_id: Option<&str>,
    ) -> BlobResult<bool> {
        self.record("object_exists")?;
        Ok(self.get(bucket, key).is_some())
    }

    async fn presigned_url(
        &self,
        bucket: &str,
        key: &str,
        operation: PresignOperation,
        ttl: Duration,
    ) -> BlobResult<String> {
        self.record("presigned_url")?;
        validate_presign_ttl(ttl)?;
        let operation = effective_operation(operation);
        if operation == PresignOperation::Get && self.get(bucket, key).is_none() {
            return Err(BlobError::not_found(bucket, key));
        }
        Ok(format!(
            "memory://{bucket}/{key}?method={operation}&expires={}",
            ttl.as_secs()
        ))
    }

    fn object_stream<'a>(
        &'a self,
        bucket: &str,
        prefix: Option<&str>,
        start_at: Option<&str>,
    ) -> ObjectStream<'a> {
        let items: Vec<BlobResult<ObjectMetadata>> = self
            .objects
            .lock()
            .unwrap()
            .iter()
            .filter(|((b, k), _)| {
                b == bucket
                    && prefix.is_none_or(|p| k.starts_with(p))
                    && start_at.is_none_or(|s| k.as_str() >= s)
            })
            .map(|(_, (_, metadata))| Ok(metadata.clone()))
            .collect();
        Box::pin(futures::stream::iter(items))
    }
}

/// A `FileService` over the in-memory backend.
#[allow(dead_code)]
pub struct TestApp {
    pub service: FileService,
    pub blob: Arc<MemoryBlobAdapter>,
}

#[allow(dead_code)]
impl TestApp {
    pub async fn new() -> Self {
        let blob = Arc::new(MemoryBlobAdapter::new());
        let service = FileService::new(blob.clone(), test_catalog().await);
        Self { service, blob }
    }

    pub fn catalog(&self) -> &Catalog {
        self.service.catalog()
    }
}

/// Router state over a local-disk backend in a temporary directory.
#[allow(dead_code)]
pub struct TestServer {
    pub state: AppState,
    pub local: Arc<LocalBlobAdapter>,
    _temp_dir: TempDir,
}

#[allow(dead_code)]
impl TestServer {
    pub async fn new() -> Self {
        let temp_dir = tempfile::tempdir().expect("Failed to create temp directory");
        let local = Arc::new(
            LocalBlobAdapter::new(
                temp_dir.path().join("objects"),
                "http://gateway.test",
                b"test-secret".to_vec(),
            )
            .expect("Failed to build local backend"),
        );
        let service = FileService::new(local.clone(), test_catalog().await);
        let state = AppState::new(service).with_links(local.clone());

        Self {
            state,
            local,
            _temp_dir: temp_dir,
        }
    }

    pub fn router(&self) -> axum::Router {
        file_gateway::routes::routes::routes(1024 * 1024).with_state(self.state.clone())
    }
}
