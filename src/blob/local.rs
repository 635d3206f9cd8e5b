//! Local-disk blob backend.
//!
//! Objects live at `root/{bucket}/{encoded key}` with a JSON sidecar
//! (`{encoded key}.meta`) carrying content type, etag and user metadata.
//! Keys are percent-encoded into a single file name (dots included), so a
//! stored object never collides with a sidecar or a `.tmp-*` staging file.
//!
//! Presigned URLs are HMAC-SHA256 signed links to this gateway's `/blobs`
//! routes; [`LocalBlobAdapter::verify_link`] checks them.

use super::{
    BlobAdapter, BlobError, BlobResult, ObjectStream, derive_object_key, effective_operation,
    ensure_bucket_name_safe, ensure_key_safe, validate_presign_ttl,
};
use crate::models::blob::{
    DownloadedObject, ObjectMetadata, PresignOperation, UploadObject, UploadedObject, filename_of,
};
use async_trait::async_trait;
use base64::{Engine as _, engine::general_purpose::URL_SAFE_NO_PAD};
use bytes::{Bytes, BytesMut};
use chrono::{DateTime, Utc};
use futures::StreamExt;
use hmac::{Hmac, Mac};
use md5::Context;
use percent_encoding::{AsciiSet, NON_ALPHANUMERIC, percent_decode_str, utf8_percent_encode};
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use std::{
    collections::BTreeMap,
    io::{self, ErrorKind},
    path::{Path, PathBuf},
    time::Duration,
};
use tokio::{
    fs::{self, File},
    io::AsyncWriteExt,
};
use tokio_util::io::ReaderStream;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

type HmacSha256 = Hmac<Sha256>;

const DEFAULT_CONTENT_TYPE: &str = "application/octet-stream";
const SIDECAR_SUFFIX: &str = ".meta";
const TMP_PREFIX: &str = ".tmp-";
const MAX_FILE_NAME_LEN: usize = 240;

/// Everything but ASCII alphanumerics, `-` and `_`.
const KEY_ENCODE_SET: &AsciiSet = &NON_ALPHANUMERIC.remove(b'-').remove(b'_');

#[derive(Serialize, Deserialize, Default, Debug)]
#[serde(rename_all = "camelCase")]
struct Sidecar {
    content_type: Option<String>,
    etag: Option<String>,
    #[serde(default)]
    metadata: BTreeMap<String, String>,
}

#[derive(Clone, Debug)]
pub struct LocalBlobAdapter {
    root: PathBuf,

    /// Base URL presigned links point at, e.g. `http://localhost:3001`.
    public_url: String,

    signing_key: Vec<u8>,
}

impl LocalBlobAdapter {
    pub fn new(
        root: impl Into<PathBuf>,
        public_url: impl Into<String>,
        signing_key: impl Into<Vec<u8>>,
    ) -> BlobResult<Self> {
        let signing_key = signing_key.into();
        if signing_key.is_empty() {
            return Err(BlobError::Config("presign secret must not be empty".into()));
        }
        Ok(Self {
            root: root.into(),
            public_url: public_url.into().trim_end_matches('/').to_string(),
            signing_key,
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn bucket_root(&self, bucket: &str) -> PathBuf {
        self.root.join(bucket)
    }

    fn encode_key(key: &str) -> BlobResult<String> {
        ensure_key_safe(key)?;
        let encoded = utf8_percent_encode(key, KEY_ENCODE_SET).to_string();
        if encoded.len() > MAX_FILE_NAME_LEN {
            return Err(BlobError::InvalidKey(key.to_string()));
        }
        Ok(encoded)
    }

    fn decode_key(file_name: &str) -> Option<String> {
        percent_decode_str(file_name)
            .decode_utf8()
            .ok()
            .map(|key| key.into_owned())
    }

    /// Payload path for an object. Parent directories may not exist yet.
    fn object_path(&self, bucket: &str, key: &str) -> BlobResult<PathBuf> {
        ensure_bucket_name_safe(bucket)?;
        Ok(self.bucket_root(bucket).join(Self::encode_key(key)?))
    }

    fn sidecar_path(object_path: &Path) -> PathBuf {
        let mut name = object_path.as_os_str().to_owned();
        name.push(SIDECAR_SUFFIX);
        PathBuf::from(name)
    }

    async fn read_sidecar(object_path: &Path) -> Sidecar {
        let path = Self::sidecar_path(object_path);
        match fs::read(&path).await {
            Ok(raw) => serde_json::from_slice(&raw).unwrap_or_else(|err| {
                warn!(
                    path = %path.display(),
                    error = %err,
                    "corrupt sidecar, using defaults"
                );
                Sidecar::default()
            }),
            Err(_) => Sidecar::default(),
        }
    }

    /// Stream bytes into a staging file, fsync, then rename into place.
    ///
    /// Returns the MD5 etag. The staging file is removed on any failure.
    async fn write_atomically(target: &Path, data: &[u8]) -> io::Result<String> {
        let parent = target
            .parent()
            .map(Path::to_path_buf)
            .ok_or_else(|| io::Error::other("object path missing parent directory"))?;
        fs::create_dir_all(&parent).await?;
        let tmp_path = parent.join(format!("{TMP_PREFIX}{}", Uuid::new_v4()));

        let result = async {
            let mut file = File::create(&tmp_path).await?;
            let mut digest = Context::new();
            digest.consume(data);
            file.write_all(data).await?;
            file.flush().await?;
            file.sync_all().await?;
            fs::rename(&tmp_path, target).await?;
            Ok::<_, io::Error>(format!("{:x}", digest.compute()))
        }
        .await;

        if result.is_err() {
            let _ = fs::remove_file(&tmp_path).await;
        }
        result
    }

    /// Write an object under an exact key, replacing any previous payload.
    ///
    /// Used by `upload_object` after key derivation and by presigned `PUT`
    /// links, which name their key up front.
    pub async fn put_object(
        &self,
        bucket: &str,
        key: &str,
        data: Bytes,
        content_type: Option<String>,
        metadata: BTreeMap<String, String>,
    ) -> BlobResult<String> {
        let path = self.object_path(bucket, key)?;
        let write_failed = |err: io::Error| BlobError::WriteFailed {
            bucket: bucket.to_string(),
            key: key.to_string(),
            reason: err.to_string(),
        };

        let mut sidecar = Sidecar {
            content_type,
            etag: None,
            metadata,
        };
        let etag = Self::write_atomically(&path, &data)
            .await
            .map_err(write_failed)?;
        sidecar.etag = Some(etag.clone());

        let raw = serde_json::to_vec(&sidecar).map_err(|e| BlobError::WriteFailed {
            bucket: bucket.to_string(),
            key: key.to_string(),
            reason: e.to_string(),
        })?;
        Self::write_atomically(&Self::sidecar_path(&path), &raw)
            .await
            .map_err(write_failed)?;

        Ok(etag)
    }

    fn signature(
        &self,
        method: &str,
        bucket: &str,
        key: &str,
        expires: i64,
    ) -> BlobResult<HmacSha256> {
        let mut mac = HmacSha256::new_from_slice(&self.signing_key)
            .map_err(|e| BlobError::Config(format!("invalid presign secret: {e}")))?;
        mac.update(format!("{method}\n{bucket}\n{key}\n{expires}").as_bytes());
        Ok(mac)
    }

    /// Build a signed link for `method` on one object, valid until `expires`
    /// (unix seconds).
    fn signed_link(
        &self,
        method: &str,
        bucket: &str,
        key: &str,
        expires: i64,
    ) -> BlobResult<String> {
        let signature = URL_SAFE_NO_PAD.encode(
            self.signature(method, bucket, key, expires)?
                .finalize()
                .into_bytes(),
        );
        Ok(format!(
            "{}/blobs/{}/{}?method={}&expires={}&signature={}",
            self.public_url,
            bucket,
            utf8_percent_encode(key, NON_ALPHANUMERIC),
            method,
            expires,
            signature
        ))
    }

    /// Check a presigned link's signature and expiry.
    pub fn verify_link(
        &self,
        method: &str,
        bucket: &str,
        key: &str,
        expires: i64,
        signature: &str,
    ) -> BlobResult<()> {
        if expires < Utc::now().timestamp() {
            return Err(BlobError::InvalidSignature("link has expired".into()));
        }
        let provided = URL_SAFE_NO_PAD
            .decode(signature)
            .map_err(|_| BlobError::InvalidSignature("malformed signature".into()))?;
        self.signature(method, bucket, key, expires)?
            .verify_slice(&provided)
            .map_err(|_| BlobError::InvalidSignature("signature mismatch".into()))
    }

    async fn collect_keys(
        &self,
        bucket: &str,
        prefix: Option<&str>,
        start_at: Option<&str>,
    ) -> BlobResult<Vec<String>> {
        ensure_bucket_name_safe(bucket)?;
        let mut entries = match fs::read_dir(self.bucket_root(bucket)).await {
            Ok(entries) => entries,
            Err(err) if err.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(err) => return Err(BlobError::BackendUnavailable(err.to_string())),
        };

        let mut keys = Vec::new();
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| BlobError::BackendUnavailable(e.to_string()))?
        {
            let name = entry.file_name();
            let Some(name) = name.to_str() else { continue };
            if name.starts_with(TMP_PREFIX) || name.ends_with(SIDECAR_SUFFIX) {
                continue;
            }
            let Some(key) = Self::decode_key(name) else {
                continue;
            };
            if prefix.is_some_and(|p| !key.starts_with(p)) {
                continue;
            }
            if start_at.is_some_and(|s| key.as_str() < s) {
                continue;
            }
            keys.push(key);
        }
        keys.sort_unstable();
        Ok(keys)
    }
}

fn io_unavailable(err: io::Error) -> BlobError {
    BlobError::BackendUnavailable(err.to_string())
}

#[async_trait]
impl BlobAdapter for LocalBlobAdapter {
    fn backend_name(&self) -> &'static str {
        "local"
    }

    #[instrument(skip(self), fields(backend = "local"))]
    async fn ensure_bucket_exists(&self, bucket: &str) -> BlobResult<bool> {
        ensure_bucket_name_safe(bucket)?;
        let path = self.bucket_root(bucket);
        if !fs::try_exists(&path).await.map_err(io_unavailable)? {
            fs::create_dir_all(&path).await.map_err(io_unavailable)?;
            info!(bucket = %bucket, "bucket created");
        }
        Ok(true)
    }

    #[instrument(skip(self, object), fields(backend = "local", filename = %object.filename, size = object.data.len()))]
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
        let mimetype = object
            .content_type
            .clone()
            .unwrap_or_else(|| DEFAULT_CONTENT_TYPE.to_string());
        let size = object.data.len() as u64;

        let etag = self
            .put_object(
                bucket,
                &key,
                object.data,
                Some(mimetype.clone()),
                object.metadata,
            )
            .await?;
        debug!(bucket = %bucket, key = %key, etag = %etag, "object stored");

        Ok(UploadedObject {
            bucket: bucket.to_string(),
            key: key.clone(),
            etag: etag.clone(),
            metadata: ObjectMetadata {
                filename: object.filename.clone(),
                original_name: object.filename,
                mimetype,
                size,
                bucket: bucket.to_string(),
                key,
                etag: Some(etag),
                last_modified: Some(Utc::now()),
                version_id: None,
            },
        })
    }

    #[instrument(skip(self), fields(backend = "local"))]
    async fn download_object(
        &self,
        bucket: &str,
        key: &str,
        version_id: Option<&str>,
    ) -> BlobResult<DownloadedObject> {
        if !self.object_exists(bucket, key, version_id).await? {
            return Err(BlobError::not_found(bucket, key));
        }
        let path = self.object_path(bucket, key)?;
        let read_failed = |err: io::Error| BlobError::ReadFailed {
            bucket: bucket.to_string(),
            key: key.to_string(),
            reason: err.to_string(),
        };

        let file = File::open(&path).await.map_err(|err| {
            if err.kind() == ErrorKind::NotFound {
                BlobError::not_found(bucket, key)
            } else {
                read_failed(err)
            }
        })?;

        let mut stream = ReaderStream::new(file);
        let mut buffer = BytesMut::new();
        while let Some(chunk) = stream.next().await {
            buffer.extend_from_slice(&chunk.map_err(read_failed)?);
        }

        let metadata = self.stat_object(bucket, key, version_id).await?;
        Ok(DownloadedObject {
            data: buffer.freeze(),
            metadata,
        })
    }

    #[instrument(skip(self), fields(backend = "local"))]
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
        let path = self.object_path(bucket, key)?;
        let delete_failed = |err: io::Error| BlobError::DeleteFailed {
            bucket: bucket.to_string(),
            key: key.to_string(),
            reason: err.to_string(),
        };

        match fs::remove_file(&path).await {
            Ok(()) => debug!("removed physical file {}", path.display()),
            Err(err) if err.kind() == ErrorKind::NotFound => {
                debug!("file {} already missing", path.display());
            }
            Err(err) => return Err(delete_failed(err)),
        }
        match fs::remove_file(Self::sidecar_path(&path)).await {
            Ok(()) => {}
            Err(err) if err.kind() == ErrorKind::NotFound => {}
            Err(err) => return Err(delete_failed(err)),
        }
        Ok(true)
    }

    #[instrument(skip(self), fields(backend = "local"))]
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

        let src = self.object_path(src_bucket, src_key)?;
        let dst = self.object_path(dst_bucket, dst_key)?;
        let write_failed = |err: io::Error| BlobError::WriteFailed {
            bucket: dst_bucket.to_string(),
            key: dst_key.to_string(),
            reason: err.to_string(),
        };

        fs::copy(&src, &dst).await.map_err(write_failed)?;
        match fs::copy(Self::sidecar_path(&src), Self::sidecar_path(&dst)).await {
            Ok(_) => {}
            Err(err) if err.kind() == ErrorKind::NotFound => {}
            Err(err) => return Err(write_failed(err)),
        }
        Ok(true)
    }

    #[instrument(skip(self), fields(backend = "local"))]
    async fn stat_object(
        &self,
        bucket: &str,
        key: &str,
        _version_id: Option<&str>,
    ) -> BlobResult<ObjectMetadata> {
        let path = self.object_path(bucket, key)?;
        let meta = fs::metadata(&path).await.map_err(|err| {
            if err.kind() == ErrorKind::NotFound {
                BlobError::not_found(bucket, key)
            } else {
                io_unavailable(err)
            }
        })?;
        let sidecar = Self::read_sidecar(&path).await;

        Ok(ObjectMetadata {
            filename: filename_of(key),
            original_name: key.to_string(),
            mimetype: sidecar
                .content_type
                .unwrap_or_else(|| DEFAULT_CONTENT_TYPE.to_string()),
            size: meta.len(),
            bucket: bucket.to_string(),
            key: key.to_string(),
            etag: sidecar.etag,
            last_modified: meta.modified().ok().map(DateTime::<Utc>::from),
            version_id: None,
        })
    }

    async fn object_exists(
        &self,
        bucket: &str,
        key: &str,
        _version_id: Option<&str>,
    ) -> BlobResult<bool> {
        let path = self.object_path(bucket, key)?;
        fs::try_exists(&path).await.map_err(io_unavailable)
    }

    #[instrument(skip(self), fields(backend = "local"))]
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

        let expires = Utc::now().timestamp() + ttl.as_secs() as i64;
        self.signed_link(operation.as_str(), bucket, key, expires)
    }

    /// Development-only: each call buffers and sorts every key name in the
    /// bucket before yielding, unlike the S3 backend which pages lazily.
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
            // Directory order is arbitrary, so the key names of one bucket are
            // gathered and sorted; object metadata is still read one at a time.
            let keys = self
                .collect_keys(&bucket, prefix.as_deref(), start_at.as_deref())
                .await?;

            for key in keys {
                match self.stat_object(&bucket, &key, None).await {
                    Ok(meta) => yield meta,
                    // Deleted between the directory scan and the stat.
                    Err(err) if err.is_not_found() => continue,
                    Err(err) => Err::<(), BlobError>(err)?,
                }
            }
        })
    }

    async fn health_check(&self) -> BlobResult<()> {
        fs::create_dir_all(&self.root).await.map_err(io_unavailable)?;

        let probe = self.root.join(format!("{TMP_PREFIX}health-{}", Uuid::new_v4()));
        fs::write(&probe, b"readyz").await.map_err(io_unavailable)?;
        let read_back = fs::read(&probe).await;
        let _ = fs::remove_file(&probe).await;

        match read_back {
            Ok(bytes) if bytes == b"readyz" => Ok(()),
            Ok(_) => Err(BlobError::BackendUnavailable(
                "health probe content mismatch".into(),
            )),
            Err(err) => Err(io_unavailable(err)),
        }
    }
}
