//! Value types exchanged with blob backends.
//!
//! None of these are persisted locally; the backend is the source of truth
//! for whether an object physically exists.

use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::{collections::BTreeMap, fmt, str::FromStr};
use uuid::Uuid;

/// Uniform description of a stored object, whatever the backend.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ObjectMetadata {
    /// Last path segment of the key.
    pub filename: String,

    /// Full object key.
    pub original_name: String,

    /// Content type (MIME type).
    pub mimetype: String,

    /// Size in bytes.
    pub size: u64,

    pub bucket: String,
    pub key: String,

    /// Backend checksum (MD5 hex for single-part uploads).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub etag: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_modified: Option<DateTime<Utc>>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub version_id: Option<String>,
}

/// Input to `BlobAdapter::upload_object`.
#[derive(Clone, Debug)]
pub struct UploadObject {
    pub data: Bytes,
    pub filename: String,
    pub content_type: Option<String>,

    /// User metadata stored alongside the object.
    pub metadata: BTreeMap<String, String>,

    /// Salt mixed into the derived key; the catalog id when known.
    pub key_salt: Option<Uuid>,
}

impl UploadObject {
    pub fn new(data: impl Into<Bytes>, filename: impl Into<String>) -> Self {
        Self {
            data: data.into(),
            filename: filename.into(),
            content_type: None,
            metadata: BTreeMap::new(),
            key_salt: None,
        }
    }

    pub fn content_type(mut self, content_type: impl Into<String>) -> Self {
        self.content_type = Some(content_type.into());
        self
    }

    pub fn key_salt(mut self, salt: Uuid) -> Self {
        self.key_salt = Some(salt);
        self
    }

    pub fn meta(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }
}

/// Result of a successful blob write.
#[derive(Serialize, Clone, Debug)]
#[serde(rename_all = "camelCase")]
pub struct UploadedObject {
    pub bucket: String,
    pub key: String,
    pub etag: String,
    pub metadata: ObjectMetadata,
}

/// A fully-read object payload.
#[derive(Clone, Debug)]
pub struct DownloadedObject {
    pub data: Bytes,
    pub metadata: ObjectMetadata,
}

/// Parameters for a paginated listing.
#[derive(Clone, Debug, Default)]
pub struct ListObjectsParams {
    pub prefix: Option<String>,

    /// Stop after this many items; `None` enumerates everything.
    pub max_keys: Option<usize>,

    /// Key to resume from (inclusive), as returned by a previous page.
    pub continuation_token: Option<String>,
}

/// One page of a listing.
#[derive(Serialize, Clone, Debug, Default)]
#[serde(rename_all = "camelCase")]
pub struct ListObjectsResult {
    pub items: Vec<ObjectMetadata>,

    /// Key of the first object not returned, when truncated.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub next_continuation_token: Option<String>,

    pub is_truncated: bool,
}

/// Aggregate statistics over a whole bucket.
#[derive(Serialize, Clone, Debug, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct BucketStats {
    pub total_files: u64,
    pub total_size: u64,
    pub last_modified: Option<DateTime<Utc>>,
}

/// Version information for an object.
#[derive(Serialize, Clone, Debug)]
#[serde(rename_all = "camelCase")]
pub struct ObjectVersion {
    pub version_id: String,
    pub is_latest: bool,
    pub last_modified: Option<DateTime<Utc>>,
    pub size: u64,
    pub etag: Option<String>,
}

/// Operation a presigned URL grants.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, Default, PartialEq, Eq)]
#[serde(rename_all = "UPPERCASE")]
pub enum PresignOperation {
    #[default]
    Get,
    Put,
    /// Not supported natively by every backend; degraded to `Put`.
    Post,
}

impl PresignOperation {
    pub fn as_str(&self) -> &'static str {
        match self {
            PresignOperation::Get => "GET",
            PresignOperation::Put => "PUT",
            PresignOperation::Post => "POST",
        }
    }
}

impl fmt::Display for PresignOperation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PresignOperation {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "GET" => Ok(PresignOperation::Get),
            "PUT" => Ok(PresignOperation::Put),
            "POST" => Ok(PresignOperation::Post),
            other => Err(format!("unsupported presign operation `{other}`")),
        }
    }
}

/// Last path segment of a key.
pub fn filename_of(key: &str) -> String {
    key.rsplit('/').next().unwrap_or(key).to_string()
}
