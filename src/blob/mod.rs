//! Blob adapter contract and backends.
//!
//! A `BlobAdapter` is a uniform capability surface over a remote object
//! store: bucket existence, object CRUD, presigned URLs, paginated listing and
//! bucket statistics. It knows nothing about the catalog.
//!
//! Backends:
//! - [`s3::S3BlobAdapter`] for any S3-compatible service (AWS, MinIO)
//! - [`local::LocalBlobAdapter`] for a directory on local disk

pub mod local;
pub mod s3;

use crate::models::blob::{
    BucketStats, DownloadedObject, ListObjectsParams, ListObjectsResult, ObjectMetadata,
    ObjectVersion, PresignOperation, UploadObject, UploadedObject,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::{Stream, StreamExt, TryStreamExt};
use std::{io, pin::Pin, time::Duration};
use thiserror::Error;
use tracing::warn;
use uuid::Uuid;

pub use local::LocalBlobAdapter;
pub use s3::S3BlobAdapter;

/// Longest accepted presign lifetime (7 days, the S3 limit).
pub const MAX_PRESIGN_TTL: Duration = Duration::from_secs(7 * 24 * 60 * 60);

/// Page size requested from backends that paginate natively.
pub const LIST_PAGE_SIZE: i32 = 1000;

const MAX_OBJECT_KEY_LEN: usize = 1024;
const MAX_FILENAME_LEN: usize = 128;
/// Bytes the filename segment of a derived key may take once every byte
/// outside `[A-Za-z0-9_-]` is percent-encoded, as filesystem backends do.
const MAX_FILENAME_ENCODED_LEN: usize = 160;
const MAX_EXTENSION_ENCODED_LEN: usize = 24;
const BUCKET_NAME_MIN_LEN: usize = 3;
const BUCKET_NAME_MAX_LEN: usize = 63;

#[derive(Debug, Error)]
pub enum BlobError {
    #[error("object `{key}` not found in bucket `{bucket}`")]
    NotFound { bucket: String, key: String },
    #[error("blob backend unavailable: {0}")]
    BackendUnavailable(String),
    #[error("failed to write `{key}` to bucket `{bucket}`: {reason}")]
    WriteFailed {
        bucket: String,
        key: String,
        reason: String,
    },
    #[error("failed to read `{key}` from bucket `{bucket}`: {reason}")]
    ReadFailed {
        bucket: String,
        key: String,
        reason: String,
    },
    #[error("failed to delete `{key}` from bucket `{bucket}`: {reason}")]
    DeleteFailed {
        bucket: String,
        key: String,
        reason: String,
    },
    #[error("invalid object key `{0}`")]
    InvalidKey(String),
    #[error("bucket `{name}` invalid: {reason}")]
    InvalidBucketName { name: String, reason: String },
    #[error("invalid presign expiry: {0}")]
    InvalidExpiry(String),
    #[error("presigned link rejected: {0}")]
    InvalidSignature(String),
    #[error("failed to presign `{key}` in bucket `{bucket}`: {reason}")]
    Presign {
        bucket: String,
        key: String,
        reason: String,
    },
    #[error("configuration error: {0}")]
    Config(String),
    #[error(transparent)]
    Io(#[from] io::Error),
}

impl BlobError {
    pub fn not_found(bucket: &str, key: &str) -> Self {
        BlobError::NotFound {
            bucket: bucket.to_string(),
            key: key.to_string(),
        }
    }

    /// True when the error means "the object is not there".
    pub fn is_not_found(&self) -> bool {
        matches!(self, BlobError::NotFound { .. })
    }
}

pub type BlobResult<T> = Result<T, BlobError>;

/// Lazily-produced sequence of objects in ascending key order.
pub type ObjectStream<'a> = Pin<Box<dyn Stream<Item = BlobResult<ObjectMetadata>> + Send + 'a>>;

#[async_trait]
pub trait BlobAdapter: Send + Sync + 'static {
    /// Static identifier of the backend, used in logs.
    fn backend_name(&self) -> &'static str;

    /// Create `bucket` if it does not exist. "Already exists" is success.
    async fn ensure_bucket_exists(&self, bucket: &str) -> BlobResult<bool>;

    /// Store a new object under a freshly derived, time-salted key.
    ///
    /// Always ensures the bucket first. Never overwrites: every call derives a
    /// new key.
    async fn upload_object(&self, bucket: &str, object: UploadObject)
    -> BlobResult<UploadedObject>;

    /// Read an object to completion.
    ///
    /// Existence is probed first so a missing object is `NotFound` on every
    /// backend; an error while streaming the payload is `ReadFailed`.
    async fn download_object(
        &self,
        bucket: &str,
        key: &str,
        version_id: Option<&str>,
    ) -> BlobResult<DownloadedObject>;

    /// Delete an object. Absent objects succeed without a backend delete.
    async fn delete_object(
        &self,
        bucket: &str,
        key: &str,
        version_id: Option<&str>,
    ) -> BlobResult<bool>;

    /// Copy an object on the backend without moving bytes through the gateway.
    async fn copy_object(
        &self,
        src_bucket: &str,
        src_key: &str,
        dst_bucket: &str,
        dst_key: &str,
    ) -> BlobResult<bool>;

    /// Backend metadata for an object; `NotFound` when absent.
    async fn stat_object(
        &self,
        bucket: &str,
        key: &str,
        version_id: Option<&str>,
    ) -> BlobResult<ObjectMetadata>;

    /// Existence probe. Absent is `Ok(false)`; only transport or auth
    /// failures are errors (`BackendUnavailable`).
    async fn object_exists(
        &self,
        bucket: &str,
        key: &str,
        version_id: Option<&str>,
    ) -> BlobResult<bool>;

    /// Issue a time-limited URL for `operation` on one object.
    ///
    /// `GET` requires the object to exist. `POST` is served as `PUT`.
    async fn presigned_url(
        &self,
        bucket: &str,
        key: &str,
        operation: PresignOperation,
        ttl: Duration,
    ) -> BlobResult<String>;

    /// Enumerate objects under `prefix` in key order, starting at `start_at`
    /// (inclusive). Pages are fetched on demand.
    fn object_stream<'a>(
        &'a self,
        bucket: &str,
        prefix: Option<&str>,
        start_at: Option<&str>,
    ) -> ObjectStream<'a>;

    /// Lightweight connectivity probe.
    async fn health_check(&self) -> BlobResult<()> {
        Ok(())
    }

    async fn object_size(
        &self,
        bucket: &str,
        key: &str,
        version_id: Option<&str>,
    ) -> BlobResult<u64> {
        Ok(self.stat_object(bucket, key, version_id).await?.size)
    }

    /// Versions known for an object. Backends without versioning report a
    /// single `"null"` version.
    async fn object_versions(&self, bucket: &str, key: &str) -> BlobResult<Vec<ObjectVersion>> {
        let stat = self.stat_object(bucket, key, None).await?;
        Ok(vec![ObjectVersion {
            version_id: stat.version_id.unwrap_or_else(|| "null".to_string()),
            is_latest: true,
            last_modified: stat.last_modified,
            size: stat.size,
            etag: stat.etag,
        }])
    }

    /// One page of a listing.
    ///
    /// Stops once `max_keys` items are collected; the next continuation token
    /// is the key of the first object not returned, so resuming with it yields
    /// no overlap and no gap.
    async fn list_objects(
        &self,
        bucket: &str,
        params: ListObjectsParams,
    ) -> BlobResult<ListObjectsResult> {
        let mut stream = self.object_stream(
            bucket,
            params.prefix.as_deref(),
            params.continuation_token.as_deref(),
        );

        let mut items = Vec::new();
        while let Some(item) = stream.next().await {
            let item = item?;
            if let Some(max_keys) = params.max_keys
                && items.len() >= max_keys
            {
                return Ok(ListObjectsResult {
                    items,
                    next_continuation_token: Some(item.key),
                    is_truncated: true,
                });
            }
            items.push(item);
        }

        Ok(ListObjectsResult {
            items,
            next_continuation_token: None,
            is_truncated: false,
        })
    }

    /// Count, total size and newest modification over the whole bucket.
    ///
    /// This walks every object; keep it off hot paths.
    async fn bucket_stats(&self, bucket: &str) -> BlobResult<BucketStats> {
        self.object_stream(bucket, None, None)
            .try_fold(BucketStats::default(), |mut stats, object| async move {
                stats.total_files += 1;
                stats.total_size += object.size;
                if object.last_modified > stats.last_modified {
                    stats.last_modified = object.last_modified;
                }
                Ok(stats)
            })
            .await
    }
}

/// Derive a collision-resistant object key.
///
/// `{unix-millis}-{salt}-{filename}`: the timestamp keeps keys roughly
/// chronological, the salt (the catalog id when known) makes two uploads of
/// the same name in the same millisecond distinct.
pub fn derive_object_key(filename: &str, salt: Uuid, at: DateTime<Utc>) -> String {
    format!(
        "{}-{}-{}",
        at.timestamp_millis(),
        salt,
        sanitize_filename(filename)
    )
}

/// Make a user-supplied filename usable as a single key segment.
fn sanitize_filename(filename: &str) -> String {
    let cleaned: String = filename
        .trim()
        .chars()
        .map(|c| match c {
            '/' | '\\' => '_',
            c if c.is_control() => '_',
            c => c,
        })
        .take(MAX_FILENAME_LEN)
        .collect();
    let cleaned = fit_encoded_budget(&cleaned);

    match cleaned.trim_matches('.') {
        "" => "file".to_string(),
        _ => cleaned,
    }
}

/// Percent-encoded size of one character.
fn encoded_len(c: char) -> usize {
    if c.is_ascii_alphanumeric() || c == '-' || c == '_' {
        1
    } else {
        3 * c.len_utf8()
    }
}

/// Longest prefix of `s` whose encoded size stays within `budget`.
fn truncate_encoded(s: &str, budget: usize) -> &str {
    let mut used = 0;
    for (idx, c) in s.char_indices() {
        used += encoded_len(c);
        if used > budget {
            return &s[..idx];
        }
    }
    s
}

/// Shorten a filename to [`MAX_FILENAME_ENCODED_LEN`], cutting the stem on a
/// character boundary and keeping a short extension.
fn fit_encoded_budget(name: &str) -> String {
    if name.chars().map(encoded_len).sum::<usize>() <= MAX_FILENAME_ENCODED_LEN {
        return name.to_string();
    }

    if let Some((stem, ext)) = name.rsplit_once('.')
        && !stem.is_empty()
        && !ext.is_empty()
    {
        let ext_len = encoded_len('.') + ext.chars().map(encoded_len).sum::<usize>();
        if ext_len <= MAX_EXTENSION_ENCODED_LEN {
            let stem = truncate_encoded(stem, MAX_FILENAME_ENCODED_LEN - ext_len);
            return format!("{stem}.{ext}");
        }
    }
    truncate_encoded(name, MAX_FILENAME_ENCODED_LEN).to_string()
}

/// Resolve the operation a backend will actually sign.
///
/// `POST` policies are not portable across S3-compatible stores, so they are
/// served as `PUT` with a warning rather than rejected.
pub fn effective_operation(operation: PresignOperation) -> PresignOperation {
    match operation {
        PresignOperation::Post => {
            warn!("POST presigned URLs are not supported by this backend, using PUT instead");
            PresignOperation::Put
        }
        other => other,
    }
}

pub fn validate_presign_ttl(ttl: Duration) -> BlobResult<()> {
    if ttl.is_zero() {
        return Err(BlobError::InvalidExpiry(
            "expiry must be greater than zero".into(),
        ));
    }
    if ttl > MAX_PRESIGN_TTL {
        return Err(BlobError::InvalidExpiry(format!(
            "expiry of {}s exceeds maximum of {}s",
            ttl.as_secs(),
            MAX_PRESIGN_TTL.as_secs()
        )));
    }
    Ok(())
}

/// Reject keys that are empty, oversized or absolute, and keys with `.`/`..`
/// segments or control characters.
pub fn ensure_key_safe(key: &str) -> BlobResult<()> {
    if key.is_empty() || key.len() > MAX_OBJECT_KEY_LEN {
        return Err(BlobError::InvalidKey(key.to_string()));
    }
    if key.starts_with('/')
        || key
            .split('/')
            .any(|segment| segment == ".." || segment == ".")
    {
        return Err(BlobError::InvalidKey(key.to_string()));
    }
    if key
        .bytes()
        .any(|b| b.is_ascii_control() || b == b'\\' || b == b'\0')
    {
        return Err(BlobError::InvalidKey(key.to_string()));
    }
    Ok(())
}

/// Validate bucket name format.
///
/// Loosely follows S3 naming: 3-63 characters of letters, digits, dots,
/// hyphens and underscores; starts and ends alphanumeric; no `..`, `.-` or
/// `-.`; not an IPv4 address. Mixed case is accepted since tenant buckets are
/// named after tenants; strict S3 backends report their own errors.
pub fn ensure_bucket_name_safe(name: &str) -> BlobResult<()> {
    let invalid = |reason: &str| BlobError::InvalidBucketName {
        name: name.to_string(),
        reason: reason.to_string(),
    };

    let len = name.len();
    if !(BUCKET_NAME_MIN_LEN..=BUCKET_NAME_MAX_LEN).contains(&len) {
        return Err(invalid("must be between 3 and 63 characters"));
    }
    if !name
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_'))
    {
        return Err(invalid(
            "allowed characters are letters, digits, dots, hyphens, and underscores",
        ));
    }
    if name.starts_with(['.', '-', '_']) || name.ends_with(['.', '-', '_']) {
        return Err(invalid("must start and end with a letter or digit"));
    }
    if name.contains("..") || name.contains("-.") || name.contains(".-") {
        return Err(invalid(
            "cannot contain consecutive dots or dot-hyphen combinations",
        ));
    }
    if is_ipv4_like(name) {
        return Err(invalid("must not be formatted like an IP address"));
    }
    Ok(())
}

fn is_ipv4_like(name: &str) -> bool {
    let parts: Vec<&str> = name.split('.').collect();
    parts.len() == 4
        && parts.iter().all(|segment| {
            !segment.is_empty()
                && segment.len() <= 3
                && segment.chars().all(|c| c.is_ascii_digit())
                && segment.parse::<u8>().is_ok()
        })
}
