//! FileService: upload, download, presign, delete and find over one logical
//! file that is split between the catalog (metadata) and a blob backend
//! (bytes).
//!
//! There is no distributed transaction between the two. Ordering is the only
//! consistency mechanism:
//! - upload writes the catalog row first, then the blob, then the pointer;
//! - download and delete check the blob before trusting the catalog pointer.
//!
//! The only inconsistent state this leaves behind is "catalog row without a
//! blob", which is recoverable by re-uploading with the returned storage id.

use crate::{
    blob::{BlobAdapter, BlobError, effective_operation, ensure_bucket_name_safe},
    catalog::{Catalog, CatalogError, FileRecordPatch, NewFileRecord, Scope},
    models::{
        blob::{
            BucketStats, ListObjectsParams, ListObjectsResult, ObjectMetadata, PresignOperation,
            UploadObject,
        },
        file_record::{FileAction, FileMetadata, FileRecord, FileStatus},
    },
};
use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::{sync::Arc, time::Duration};
use thiserror::Error;
use tracing::{error, info, warn};
use uuid::Uuid;

/// Lifetime of a presigned URL when the caller does not ask for one (3 hours).
pub const DEFAULT_PRESIGN_TTL_SECS: u64 = 10_800;

#[derive(Debug, Error)]
pub enum ServiceError {
    #[error("{0}")]
    NotFound(String),
    #[error("{0}")]
    BadRequest(String),
    #[error("upload of file `{storage_id}` to bucket `{bucket}` failed: {source}")]
    UploadFailed {
        storage_id: Uuid,
        bucket: String,
        #[source]
        source: BlobError,
    },
    #[error(
        "file `{storage_id}` stored as `{key}` in bucket `{bucket}` but its catalog pointer was not saved: {source}"
    )]
    PointerUpdateFailed {
        storage_id: Uuid,
        bucket: String,
        key: String,
        #[source]
        source: CatalogError,
    },
    #[error(transparent)]
    Blob(#[from] BlobError),
    #[error(transparent)]
    Catalog(#[from] CatalogError),
}

impl ServiceError {
    /// Stable numeric code surfaced to callers.
    pub fn status_code(&self) -> u16 {
        match self {
            ServiceError::NotFound(_) => 404,
            ServiceError::BadRequest(_) => 400,
            ServiceError::UploadFailed { .. } | ServiceError::PointerUpdateFailed { .. } => 500,
            ServiceError::Blob(err) => match err {
                BlobError::NotFound { .. } => 404,
                BlobError::InvalidKey(_)
                | BlobError::InvalidBucketName { .. }
                | BlobError::InvalidExpiry(_) => 400,
                BlobError::InvalidSignature(_) => 403,
                BlobError::BackendUnavailable(_) => 503,
                _ => 500,
            },
            ServiceError::Catalog(CatalogError::NotFound(_)) => 404,
            ServiceError::Catalog(_) => 500,
        }
    }
}

pub type ServiceResult<T> = Result<T, ServiceError>;

/// Who is asking, and on behalf of which tenant bucket.
///
/// `bucket` and `tenant_id` form the lookup scope; the rest is provenance
/// recorded on new files.
#[derive(Deserialize, Clone, Debug, Default)]
#[serde(rename_all = "camelCase")]
pub struct OriginInfo {
    pub bucket: String,
    pub tenant_id: String,
    #[serde(default)]
    pub user_id: Option<String>,
    #[serde(default)]
    pub session_id: Option<String>,
    #[serde(default)]
    pub ip_address: Option<String>,
    #[serde(default)]
    pub user_agent: Option<String>,
}

impl OriginInfo {
    pub fn new(bucket: impl Into<String>, tenant_id: impl Into<String>) -> Self {
        Self {
            bucket: bucket.into(),
            tenant_id: tenant_id.into(),
            ..Self::default()
        }
    }

    pub fn scope(&self) -> Scope {
        Scope::new(&self.bucket, &self.tenant_id)
    }
}

#[derive(Clone, Debug)]
pub struct UploadRequest {
    pub data: Bytes,
    pub filename: String,
    pub mimetype: Option<String>,
    pub origin: OriginInfo,
}

#[derive(Deserialize, Clone, Debug, Default)]
#[serde(rename_all = "camelCase")]
pub struct PresignRequest {
    /// Seconds; defaults to [`DEFAULT_PRESIGN_TTL_SECS`].
    pub expires_in: Option<u64>,

    /// Defaults to `GET`.
    pub operation: Option<PresignOperation>,
}

#[derive(Serialize, Clone, Debug)]
#[serde(rename_all = "camelCase")]
pub struct UploadResponse {
    pub storage_id: Uuid,
    pub filename: String,
    pub size: u64,
    pub blob_key: String,
    pub bucket: String,
    pub etag: String,
}

#[derive(Clone, Debug)]
pub struct DownloadResponse {
    pub data: Bytes,
    pub metadata: ObjectMetadata,
    pub filename: String,
    pub original_filename: Option<String>,
    pub mimetype: String,
    pub size: u64,
    pub storage_id: Uuid,
}

#[derive(Serialize, Clone, Debug)]
#[serde(rename_all = "camelCase")]
pub struct PresignedUrlResponse {
    pub presigned_url: String,
    pub expires_in: u64,
    pub operation: PresignOperation,
    pub filename: String,
    pub storage_id: Uuid,
}

#[derive(Serialize, Clone, Debug)]
#[serde(rename_all = "camelCase")]
pub struct DeleteResponse {
    pub storage_id: Uuid,
    pub filename: String,
    pub deleted_at: DateTime<Utc>,

    /// True when the record was already deleted and nothing was done.
    pub already_deleted: bool,
}

/// Cheap to clone; every request works on its own copy.
#[derive(Clone)]
pub struct FileService {
    blob: Arc<dyn BlobAdapter>,
    catalog: Catalog,
}

impl FileService {
    pub fn new(blob: Arc<dyn BlobAdapter>, catalog: Catalog) -> Self {
        Self { blob, catalog }
    }

    pub fn blob(&self) -> &Arc<dyn BlobAdapter> {
        &self.blob
    }

    pub fn catalog(&self) -> &Catalog {
        &self.catalog
    }

    /// Scoped catalog lookup with a caller-facing `NotFound`.
    async fn find_record(&self, id: Uuid, scope: &Scope) -> ServiceResult<FileRecord> {
        self.catalog
            .find_by_id(id, scope)
            .await
            .map_err(|err| not_found_in_scope(err, id, scope))
    }

    /// Look up a file record. Soft-deleted files are not found.
    pub async fn find(&self, id: Uuid, scope: &Scope) -> ServiceResult<FileRecord> {
        self.find_record(id, scope).await
    }

    /// Store a new file: catalog row, then blob, then blob pointer.
    pub async fn upload(&self, request: UploadRequest) -> ServiceResult<UploadResponse> {
        let UploadRequest {
            data,
            filename,
            mimetype,
            origin,
        } = request;

        if filename.trim().is_empty() {
            return Err(ServiceError::BadRequest("filename must not be empty".into()));
        }
        ensure_bucket_name_safe(&origin.bucket)
            .map_err(|err| ServiceError::BadRequest(err.to_string()))?;

        let size = data.len() as u64;
        let uploaded_at = Utc::now();

        let record = self
            .catalog
            .create(NewFileRecord {
                original_filename: Some(filename.clone()),
                mimetype: mimetype.clone(),
                bucket: Some(origin.bucket.clone()),
                tenant_id: Some(origin.tenant_id.clone()),
                user_id: origin.user_id.clone(),
                session_id: origin.session_id.clone(),
                ip_address: origin.ip_address.clone(),
                user_agent: origin.user_agent.clone(),
                metadata: FileMetadata::uploaded(uploaded_at, mimetype.clone()),
                ..NewFileRecord::new(filename.clone(), size as i64, FileAction::Upload)
            })
            .await?;
        info!(storage_id = %record.id, bucket = %origin.bucket, size, "upload started");

        let mut object = UploadObject::new(data, filename.clone())
            .key_salt(record.id)
            .meta("original-filename", filename.clone())
            .meta("storage-id", record.id.to_string())
            .meta("upload-timestamp", uploaded_at.to_rfc3339());
        if let Some(mimetype) = &mimetype {
            object = object.content_type(mimetype.clone());
        }

        let uploaded = match self.blob.upload_object(&origin.bucket, object).await {
            Ok(uploaded) => uploaded,
            Err(source) => {
                error!(storage_id = %record.id, bucket = %origin.bucket, error = %source, "blob upload failed, catalog row kept for retry");
                let patch = FileRecordPatch {
                    error_message: Some(source.to_string()),
                    ..FileRecordPatch::default()
                };
                if let Err(err) = self.catalog.update(record.id, patch).await {
                    error!(storage_id = %record.id, error = %err, "failed to record upload error");
                }
                return Err(ServiceError::UploadFailed {
                    storage_id: record.id,
                    bucket: origin.bucket,
                    source,
                });
            }
        };

        let patch = FileRecordPatch {
            bucket: Some(uploaded.bucket.clone()),
            key: Some(uploaded.key.clone()),
            file_path: Some(uploaded.key.clone()),
            metadata: Some(FileMetadata {
                uploaded_at: Some(Utc::now()),
                ..record.metadata.0.clone()
            }),
            ..FileRecordPatch::default()
        };
        if let Err(source) = self.catalog.update(record.id, patch).await {
            error!(
                storage_id = %record.id,
                bucket = %uploaded.bucket,
                key = %uploaded.key,
                error = %source,
                "blob stored but catalog pointer update failed"
            );
            return Err(ServiceError::PointerUpdateFailed {
                storage_id: record.id,
                bucket: uploaded.bucket,
                key: uploaded.key,
                source,
            });
        }
        info!(storage_id = %record.id, bucket = %uploaded.bucket, key = %uploaded.key, "upload complete");

        Ok(UploadResponse {
            storage_id: record.id,
            filename,
            size,
            blob_key: uploaded.key,
            bucket: uploaded.bucket,
            etag: uploaded.etag,
        })
    }

    /// Read a file's bytes after confirming the blob is really there.
    ///
    /// The download counter is bookkeeping; failing to bump it does not fail
    /// the download.
    pub async fn download(&self, id: Uuid, origin: &OriginInfo) -> ServiceResult<DownloadResponse> {
        let record = self.find_record(id, &origin.scope()).await?;
        let (bucket, key) = blob_pointer(&record)?;

        if !self.blob.object_exists(&bucket, &key, None).await? {
            warn!(storage_id = %id, bucket = %bucket, key = %key, "catalog points at a missing blob");
            return Err(stale_pointer(id, &bucket, &key));
        }

        let downloaded = self.blob.download_object(&bucket, &key, None).await?;

        let patch = FileRecordPatch {
            action: Some(FileAction::Download),
            downloaded_at: Some(Utc::now()),
            metadata: Some(record.metadata.with_download()),
            ..FileRecordPatch::default()
        };
        if let Err(err) = self.catalog.update(id, patch).await {
            error!(storage_id = %id, error = %err, "failed to record download");
        }

        Ok(DownloadResponse {
            size: downloaded.data.len() as u64,
            mimetype: record
                .mimetype
                .clone()
                .unwrap_or_else(|| downloaded.metadata.mimetype.clone()),
            data: downloaded.data,
            metadata: downloaded.metadata,
            filename: record.filename,
            original_filename: record.original_filename,
            storage_id: id,
        })
    }

    /// Issue a time-limited URL for a file.
    ///
    /// Issuing the URL is recorded as a download, whether or not the URL is
    /// ever fetched.
    pub async fn presigned_url(
        &self,
        id: Uuid,
        origin: &OriginInfo,
        request: PresignRequest,
    ) -> ServiceResult<PresignedUrlResponse> {
        let record = self.find_record(id, &origin.scope()).await?;
        let (bucket, key) = blob_pointer(&record)?;

        let expires_in = request.expires_in.unwrap_or(DEFAULT_PRESIGN_TTL_SECS);
        let operation = effective_operation(request.operation.unwrap_or_default());

        let presigned_url = self
            .blob
            .presigned_url(&bucket, &key, operation, Duration::from_secs(expires_in))
            .await
            .map_err(|err| match err {
                BlobError::NotFound { .. } => stale_pointer(id, &bucket, &key),
                other => ServiceError::Blob(other),
            })?;

        self.catalog
            .update(
                id,
                FileRecordPatch {
                    action: Some(FileAction::Download),
                    downloaded_at: Some(Utc::now()),
                    ..FileRecordPatch::default()
                },
            )
            .await?;
        info!(storage_id = %id, operation = %operation, expires_in, "presigned url issued");

        Ok(PresignedUrlResponse {
            presigned_url,
            expires_in,
            operation,
            filename: record.filename,
            storage_id: id,
        })
    }

    /// Soft-delete a file and remove its blob if it is still there.
    ///
    /// Deleting an already-deleted file succeeds without touching the blob
    /// backend.
    pub async fn delete(&self, id: Uuid, origin: &OriginInfo) -> ServiceResult<DeleteResponse> {
        let scope = origin.scope();
        let record = self
            .catalog
            .find_including_deleted(id, &scope)
            .await
            .map_err(|err| not_found_in_scope(err, id, &scope))?;

        if record.is_deleted() {
            info!(storage_id = %id, "file already deleted");
            return Ok(DeleteResponse {
                storage_id: id,
                deleted_at: record.deleted_at.unwrap_or(record.updated_at),
                filename: record.filename,
                already_deleted: true,
            });
        }

        match record.blob_location() {
            Some((bucket, key)) if bucket == origin.bucket => {
                if self.blob.object_exists(bucket, key, None).await? {
                    self.blob.delete_object(bucket, key, None).await?;
                } else {
                    warn!(storage_id = %id, bucket = %bucket, key = %key, "blob already gone, deleting catalog record only");
                }
            }
            Some((bucket, key)) => {
                warn!(storage_id = %id, bucket = %bucket, key = %key, request_bucket = %origin.bucket, "blob lives outside the request bucket, leaving it in place");
            }
            None => {
                warn!(storage_id = %id, "file has no blob pointer, deleting catalog record only");
            }
        }

        let deleted_at = Utc::now();
        let updated = self
            .catalog
            .update(
                id,
                FileRecordPatch {
                    status: Some(FileStatus::Deleted),
                    action: Some(FileAction::Delete),
                    deleted_at: Some(deleted_at),
                    metadata: Some(
                        record
                            .metadata
                            .with_deletion(deleted_at, Some(origin.tenant_id.clone())),
                    ),
                    ..FileRecordPatch::default()
                },
            )
            .await?;
        info!(storage_id = %id, "file deleted");

        Ok(DeleteResponse {
            storage_id: id,
            filename: updated.filename,
            deleted_at,
            already_deleted: false,
        })
    }

    /// One page of a bucket listing, straight from the blob backend.
    pub async fn list_objects(
        &self,
        bucket: &str,
        params: ListObjectsParams,
    ) -> ServiceResult<ListObjectsResult> {
        Ok(self.blob.list_objects(bucket, params).await?)
    }

    /// Whole-bucket statistics. Walks every object.
    pub async fn bucket_stats(&self, bucket: &str) -> ServiceResult<BucketStats> {
        Ok(self.blob.bucket_stats(bucket).await?)
    }
}

fn not_found_in_scope(err: CatalogError, id: Uuid, scope: &Scope) -> ServiceError {
    match err {
        CatalogError::NotFound(_) => ServiceError::NotFound(format!(
            "file `{id}` not found in bucket `{}` for tenant `{}`",
            scope.bucket, scope.tenant_id
        )),
        other => ServiceError::Catalog(other),
    }
}

fn stale_pointer(id: Uuid, bucket: &str, key: &str) -> ServiceError {
    ServiceError::NotFound(format!(
        "blob for file `{id}` not found: object `{key}` missing from bucket `{bucket}`"
    ))
}

/// The record's blob coordinates, or `BadRequest` when the upload never
/// reached its blob phase.
fn blob_pointer(record: &FileRecord) -> ServiceResult<(String, String)> {
    record
        .blob_location()
        .map(|(bucket, key)| (bucket.to_string(), key.to_string()))
        .ok_or_else(|| {
            ServiceError::BadRequest(format!(
                "file `{}` has no blob pointer; its upload did not complete",
                record.id
            ))
        })
}
