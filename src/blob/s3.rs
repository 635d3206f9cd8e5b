//! S3-compatible blob backend using the AWS SDK.
//!
//! Works against AWS S3 and S3-compatible stores such as MinIO (set an
//! explicit endpoint and path-style addressing for the latter).

use super::{
    BlobAdapter, BlobError, BlobResult, LIST_PAGE_SIZE, ObjectStream, derive_object_key,
    effective_operation, validate_presign_ttl,
};
use crate::models::blob::{
    DownloadedObject, ObjectMetadata, PresignOperation, UploadObject, UploadedObject, filename_of,
};
use async_trait::async_trait;
use aws_config::BehaviorVersion;
use aws_sdk_s3::{
    Client,
    config::{Credentials, Region},
    error::{DisplayErrorContext, SdkError},
    presigning::PresigningConfig,
    primitives::{ByteStream, DateTime as AwsDateTime},
};
use chrono::{DateTime, Utc};
use percent_encoding::{NON_ALPHANUMERIC, utf8_percent_encode};
use std::time::Duration;
use tracing::{debug, info, instrument};
use uuid::Uuid;

const DEFAULT_CONTENT_TYPE: &str = "application/octet-stream";
const HEALTH_CHECK_TIMEOUT: Duration = Duration::from_secs(10);

/// Connection settings for an S3-compatible endpoint.
#[derive(Clone, Debug, Default)]
pub struct S3Settings {
    /// Explicit endpoint (`http://minio:9000`); bare `host:port` gets `http://`.
    pub endpoint: Option<String>,
    pub region: Option<String>,
    pub access_key_id: Option<String>,
    pub secret_access_key: Option<String>,
    /// Path-style addressing (`endpoint/bucket/key`), required by MinIO.
    pub force_path_style: bool,
}

pub struct S3BlobAdapter {
    client: Client,
    endpoint: String,
}

impl std::fmt::Debug for S3BlobAdapter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("S3BlobAdapter")
            .field("endpoint", &self.endpoint)
            .finish_non_exhaustive()
    }
}

impl S3BlobAdapter {
    /// Build a client from settings.
    ///
    /// Explicit credentials must come as a pair; without them the ambient AWS
    /// credential chain is used.
    pub async fn new(settings: S3Settings) -> BlobResult<Self> {
        if settings.access_key_id.is_some() ^ settings.secret_access_key.is_some() {
            return Err(BlobError::Config(
                "s3 config requires both access key and secret key when either is set".into(),
            ));
        }

        let region = settings
            .region
            .clone()
            .unwrap_or_else(|| "us-east-1".to_string());

        let mut builder = match (&settings.access_key_id, &settings.secret_access_key) {
            (Some(key_id), Some(secret)) => aws_sdk_s3::config::Builder::new()
                .behavior_version(BehaviorVersion::latest())
                .region(Region::new(region.clone()))
                .credentials_provider(Credentials::new(
                    key_id,
                    secret,
                    None,
                    None,
                    "file-gateway-config",
                )),
            _ => {
                let shared = aws_config::defaults(BehaviorVersion::latest())
                    .region(Region::new(region.clone()))
                    .load()
                    .await;
                aws_sdk_s3::config::Builder::from(&shared)
            }
        };

        let endpoint = settings.endpoint.as_ref().map(|endpoint| {
            let lower = endpoint.to_ascii_lowercase();
            if lower.starts_with("http://") || lower.starts_with("https://") {
                endpoint.clone()
            } else {
                format!("http://{endpoint}")
            }
        });
        if let Some(url) = &endpoint {
            builder = builder.endpoint_url(url);
        }
        if settings.force_path_style {
            builder = builder.force_path_style(true);
        }

        let endpoint = endpoint.unwrap_or_else(|| format!("s3.{region}.amazonaws.com"));
        info!(endpoint = %endpoint, region = %region, "S3 blob adapter configured");

        Ok(Self {
            client: Client::from_conf(builder.build()),
            endpoint,
        })
    }

    async fn presign(
        &self,
        bucket: &str,
        key: &str,
        operation: PresignOperation,
        ttl: Duration,
    ) -> BlobResult<String> {
        let presign_err = |reason: String| BlobError::Presign {
            bucket: bucket.to_string(),
            key: key.to_string(),
            reason,
        };
        let config = PresigningConfig::expires_in(ttl).map_err(|e| presign_err(e.to_string()))?;

        let request = match operation {
            PresignOperation::Get => self
                .client
                .get_object()
                .bucket(bucket)
                .key(key)
                .presigned(config)
                .await
                .map_err(|e| presign_err(DisplayErrorContext(&e).to_string()))?,
            PresignOperation::Put | PresignOperation::Post => self
                .client
                .put_object()
                .bucket(bucket)
                .key(key)
                .presigned(config)
                .await
                .map_err(|e| presign_err(DisplayErrorContext(&e).to_string()))?,
        };

        Ok(request.uri().to_string())
    }
}

/// HTTP status of a service error, if the request reached the service.
fn service_status<E>(err: &SdkError<E>) -> Option<u16> {
    match err {
        SdkError::ServiceError(service_err) => Some(service_err.raw().status().as_u16()),
        _ => None,
    }
}

/// Transport, timeout and auth failures; the backend could not be used at all.
fn unavailable<E>(err: &SdkError<E>) -> BlobError
where
    E: std::error::Error + Send + Sync + 'static,
{
    BlobError::BackendUnavailable(DisplayErrorContext(err).to_string())
}

/// Split a failed call into "backend said no" (`on_service`) and "backend
/// unreachable" (`BackendUnavailable`).
fn classify<E>(err: SdkError<E>, on_service: impl FnOnce(String) -> BlobError) -> BlobError
where
    E: std::error::Error + Send + Sync + 'static,
{
    match service_status(&err) {
        Some(401 | 403) | None => unavailable(&err),
        Some(_) => on_service(DisplayErrorContext(&err).to_string()),
    }
}

fn to_chrono(dt: &AwsDateTime) -> Option<DateTime<Utc>> {
    DateTime::<Utc>::from_timestamp(dt.secs(), dt.subsec_nanos())
}

fn strip_etag(etag: &str) -> String {
    etag.trim_matches('"').to_string()
}

#[async_trait]
impl BlobAdapter for S3BlobAdapter {
    fn backend_name(&self) -> &'static str {
        "s3"
    }

    #[instrument(skip(self), fields(backend = "s3"))]
    async fn ensure_bucket_exists(&self, bucket: &str) -> BlobResult<bool> {
        match self.client.head_bucket().bucket(bucket).send().await {
            Ok(_) => return Ok(true),
            Err(err) if service_status(&err) == Some(404) => {}
            Err(err) => return Err(unavailable(&err)),
        }

        match self.client.create_bucket().bucket(bucket).send().await {
            Ok(_) => {
                info!(bucket = %bucket, "bucket created");
                Ok(true)
            }
            Err(err)
                if err.as_service_error().is_some_and(|e| {
                    e.is_bucket_already_owned_by_you() || e.is_bucket_already_exists()
                }) =>
            {
                debug!(bucket = %bucket, "bucket created concurrently");
                Ok(true)
            }
            Err(err) => Err(classify(err, |reason| BlobError::WriteFailed {
                bucket: bucket.to_string(),
                key: String::new(),
                reason,
            })),
        }
    }

    #[instrument(skip(self, object), fields(backend = "s3", filename = %object.filename, size = object.data.len()))]
    async fn upload_object(
        &self,
        bucket: &str,
        object: UploadObject,
    ) -> BlobResult<UploadedObject> {
        self.ensure_bucket_exists(bucket).await?;

        let key = derive_object_key(
            &object.filename,
            object.key_salt.unwrap_or_else(Uuid::new_v4),
            Utc::now(),
        );
        let content_type = object
            .content_type
            .clone()
            .unwrap_or_else(|| DEFAULT_CONTENT_TYPE.to_string());
        let size = object.data.len() as u64;

        let mut request = self
            .client
            .put_object()
            .bucket(bucket)
            .key(&key)
            .content_type(&content_type)
            .body(ByteStream::from(object.data));
        for (name, value) in &object.metadata {
            request = request.metadata(name, value);
        }

        let output = request.send().await.map_err(|err| {
            classify(err, |reason| BlobError::WriteFailed {
                bucket: bucket.to_string(),
                key: key.clone(),
                reason,
            })
        })?;

        let etag = output.e_tag().map(strip_etag).unwrap_or_default();
        debug!(bucket = %bucket, key = %key, etag = %etag, "object stored");

        Ok(UploadedObject {
            bucket: bucket.to_string(),
            key: key.clone(),
            etag: etag.clone(),
            metadata: ObjectMetadata {
                filename: object.filename.clone(),
                original_name: object.filename,
                mimetype: content_type,
                size,
                bucket: bucket.to_string(),
                key,
                etag: Some(etag),
                last_modified: Some(Utc::now()),
                version_id: output.version_id().map(str::to_string),
            },
        })
    }

    #[instrument(skip(self), fields(backend = "s3"))]
    async fn download_object(
        &self,
        bucket: &str,
        key: &str,
        version_id: Option<&str>,
    ) -> BlobResult<DownloadedObject> {
        if !self.object_exists(bucket, key, version_id).await? {
            return Err(BlobError::not_found(bucket, key));
        }

        let output = self
            .client
            .get_object()
            .bucket(bucket)
            .key(key)
            .set_version_id(version_id.map(str::to_string))
            .send()
            .await
            .map_err(|err| {
                classify(err, |reason| BlobError::ReadFailed {
                    bucket: bucket.to_string(),
                    key: key.to_string(),
                    reason,
                })
            })?;

        let metadata = ObjectMetadata {
            filename: filename_of(key),
            original_name: key.to_string(),
            mimetype: output
                .content_type()
                .unwrap_or(DEFAULT_CONTENT_TYPE)
                .to_string(),
            size: output.content_length().unwrap_or(0).max(0) as u64,
            bucket: bucket.to_string(),
            key: key.to_string(),
            etag: output.e_tag().map(strip_etag),
            last_modified: output.last_modified().and_then(to_chrono),
            version_id: output.version_id().map(str::to_string),
        };

        let data = output
            .body
            .collect()
            .await
            .map_err(|err| BlobError::ReadFailed {
                bucket: bucket.to_string(),
                key: key.to_string(),
                reason: err.to_string(),
            })?
            .into_bytes();

        Ok(DownloadedObject { data, metadata })
    }

    #[instrument(skip(self), fields(backend = "s3"))]
    async fn delete_object(
        &self,
        bucket: &str,
        key: &str,
        version_id: Option<&str>,
    ) -> BlobResult<bool> {
        if !self.object_exists(bucket, key, version_id).await? {
            debug!(bucket = %bucket, key = %key, "object already absent, nothing to delete");
            return Ok(true);
        }

        self.client
            .delete_object()
            .bucket(bucket)
            .key(key)
            .set_version_id(version_id.map(str::to_string))
            .send()
            .await
            .map_err(|err| BlobError::DeleteFailed {
                bucket: bucket.to_string(),
                key: key.to_string(),
                reason: DisplayErrorContext(&err).to_string(),
            })?;

        Ok(true)
    }

    #[instrument(skip(self), fields(backend = "s3"))]
    async fn copy_object(
        &self,
        src_bucket: &str,
        src_key: &str,
        dst_bucket: &str,
        dst_key: &str,
    ) -> BlobResult<bool> {
        if !self.object_exists(src_bucket, src_key, None).await? {
            return Err(BlobError::not_found(src_bucket, src_key));
        }
        self.ensure_bucket_exists(dst_bucket).await?;

        // CopySource is `bucket/key` with the key percent-encoded.
        let copy_source = format!(
            "{}/{}",
            src_bucket,
            utf8_percent_encode(src_key, NON_ALPHANUMERIC)
        );

        self.client
            .copy_object()
            .bucket(dst_bucket)
            .key(dst_key)
            .copy_source(copy_source)
            .send()
            .await
            .map_err(|err| {
                classify(err, |reason| BlobError::WriteFailed {
                    bucket: dst_bucket.to_string(),
                    key: dst_key.to_string(),
                    reason,
                })
            })?;

        Ok(true)
    }

    #[instrument(skip(self), fields(backend = "s3"))]
    async fn stat_object(
        &self,
        bucket: &str,
        key: &str,
        version_id: Option<&str>,
    ) -> BlobResult<ObjectMetadata> {
        let output = self
            .client
            .head_object()
            .bucket(bucket)
            .key(key)
            .set_version_id(version_id.map(str::to_string))
            .send()
            .await
            .map_err(|err| {
                if service_status(&err) == Some(404) {
                    BlobError::not_found(bucket, key)
                } else {
                    unavailable(&err)
                }
            })?;

        Ok(ObjectMetadata {
            filename: filename_of(key),
            original_name: key.to_string(),
            mimetype: output
                .content_type()
                .unwrap_or(DEFAULT_CONTENT_TYPE)
                .to_string(),
            size: output.content_length().unwrap_or(0).max(0) as u64,
            bucket: bucket.to_string(),
            key: key.to_string(),
            etag: output.e_tag().map(strip_etag),
            last_modified: output.last_modified().and_then(to_chrono),
            version_id: output.version_id().map(str::to_string),
        })
    }

    #[instrument(skip(self), fields(backend = "s3"))]
    async fn object_exists(
        &self,
        bucket: &str,
        key: &str,
        version_id: Option<&str>,
    ) -> BlobResult<bool> {
        match self
            .client
            .head_object()
            .bucket(bucket)
            .key(key)
            .set_version_id(version_id.map(str::to_string))
            .send()
            .await
        {
            Ok(_) => Ok(true),
            Err(err) if service_status(&err) == Some(404) => Ok(false),
            Err(err) => Err(unavailable(&err)),
        }
    }

    #[instrument(skip(self), fields(backend = "s3"))]
    async fn presigned_url(
        &self,
        bucket: &str,
        key: &str,
        operation: PresignOperation,
        ttl: Duration,
    ) -> BlobResult<String> {
        validate_presign_ttl(ttl)?;

        let operation = effective_operation(operation);
        if operation == PresignOperation::Get && !self.object_exists(bucket, key, None).await? {
            return Err(BlobError::not_found(bucket, key));
        }

        let url = self.presign(bucket, key, operation, ttl).await?;
        debug!(bucket = %bucket, key = %key, %operation, "presigned URL issued");
        Ok(url)
    }

    fn object_stream<'a>(
        &'a self,
        bucket: &str,
        prefix: Option<&str>,
        start_at: Option<&str>,
    ) -> ObjectStream<'a> {
        let bucket = bucket.to_string();
        let prefix = prefix.map(str::to_string);
        let start_at = start_at.map(str::to_string);

        Box::pin(async_stream::try_stream! {
            // ListObjectsV2 resumes *after* a key; the resume key itself is
            // the first item owed to the caller, so probe it directly.
            if let Some(first) = &start_at
                && prefix.as_deref().is_none_or(|p| first.starts_with(p))
            {
                match self.stat_object(&bucket, first, None).await {
                    Ok(meta) => yield meta,
                    Err(err) if err.is_not_found() => {}
                    Err(err) => Err::<(), BlobError>(err)?,
                }
            }

            let mut continuation_token: Option<String> = None;
            loop {
                let output = self
                    .client
                    .list_objects_v2()
                    .bucket(&bucket)
                    .set_prefix(prefix.clone())
                    .set_start_after(start_at.clone())
                    .set_continuation_token(continuation_token.take())
                    .max_keys(LIST_PAGE_SIZE)
                    .send()
                    .await
                    .map_err(|err| unavailable(&err))?;

                for object in output.contents() {
                    let Some(key) = object.key() else { continue };
                    yield ObjectMetadata {
                        filename: filename_of(key),
                        original_name: key.to_string(),
                        mimetype: DEFAULT_CONTENT_TYPE.to_string(),
                        size: object.size().unwrap_or(0).max(0) as u64,
                        bucket: bucket.clone(),
                        key: key.to_string(),
                        etag: object.e_tag().map(strip_etag),
                        last_modified: object.last_modified().and_then(to_chrono),
                        version_id: None,
                    };
                }

                if output.is_truncated() == Some(true) {
                    continuation_token = output.next_continuation_token().map(str::to_string);
                    if continuation_token.is_none() {
                        break;
                    }
                } else {
                    break;
                }
            }
        })
    }

    #[instrument(skip(self), fields(backend = "s3"))]
    async fn health_check(&self) -> BlobResult<()> {
        tokio::time::timeout(HEALTH_CHECK_TIMEOUT, self.client.list_buckets().send())
            .await
            .map_err(|_| BlobError::BackendUnavailable("S3 health check timed out".into()))?
            .map_err(|err| unavailable(&err))?;
        Ok(())
    }
}
