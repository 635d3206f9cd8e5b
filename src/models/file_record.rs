//! Represents a logical file tracked by the catalog.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, types::Json};
use std::fmt;
use uuid::Uuid;

/// Last operation performed against a file.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, sqlx::Type)]
#[serde(rename_all = "lowercase")]
#[sqlx(rename_all = "lowercase")]
pub enum FileAction {
    Upload,
    Download,
    Delete,
    Update,
    Move,
    Copy,
}

/// Lifecycle state of a catalog row.
///
/// `Deleted` rows are retained (soft delete) and always carry `deleted_at`.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, Default, PartialEq, Eq, sqlx::Type)]
#[serde(rename_all = "lowercase")]
#[sqlx(rename_all = "lowercase")]
pub enum FileStatus {
    #[default]
    Active,
    Processing,
    Archived,
    Deleted,
}

impl fmt::Display for FileStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            FileStatus::Active => "active",
            FileStatus::Processing => "processing",
            FileStatus::Archived => "archived",
            FileStatus::Deleted => "deleted",
        };
        f.write_str(s)
    }
}

/// Operational facts accumulated on a file over its lifetime.
///
/// Only this fixed set of keys is ever written, so it is stored as a typed
/// JSON column. Updates compose a new value from the current one; the
/// catalog replaces the column wholesale.
#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct FileMetadata {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub uploaded_at: Option<DateTime<Utc>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_type: Option<String>,

    #[serde(default)]
    pub download_count: u64,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deleted_at: Option<DateTime<Utc>>,

    /// Tenant that requested the deletion.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deleted_by: Option<String>,
}

impl FileMetadata {
    /// Metadata for a freshly created upload record.
    pub fn uploaded(at: DateTime<Utc>, file_type: Option<String>) -> Self {
        Self {
            uploaded_at: Some(at),
            file_type,
            ..Self::default()
        }
    }

    /// Copy of `self` with the download counter bumped.
    pub fn with_download(&self) -> Self {
        Self {
            download_count: self.download_count.saturating_add(1),
            ..self.clone()
        }
    }

    /// Copy of `self` carrying the deletion bookkeeping.
    pub fn with_deletion(&self, at: DateTime<Utc>, by: Option<String>) -> Self {
        Self {
            deleted_at: Some(at),
            deleted_by: by,
            ..self.clone()
        }
    }
}

/// One catalog row describing a logical file and where its bytes live.
///
/// `bucket` and `key` are a pointer into the blob backend, not a cache: they
/// stay unset until the blob write succeeds, and must be existence-checked
/// against the backend before anything trusts them.
#[derive(Serialize, Deserialize, Clone, FromRow, Debug)]
#[serde(rename_all = "camelCase")]
pub struct FileRecord {
    /// Catalog-assigned identity, never reused.
    pub id: Uuid,

    /// Display name of the file.
    pub filename: String,

    /// Name the file was uploaded with.
    pub original_filename: Option<String>,

    /// Content type (MIME type) reported at upload.
    pub mimetype: Option<String>,

    /// Payload size in bytes, fixed at creation.
    pub size: i64,

    /// Backend path of the blob (mirrors `key`).
    pub file_path: Option<String>,

    /// Blob backend bucket.
    pub bucket: Option<String>,

    /// Blob backend object key.
    pub key: Option<String>,

    /// Last operation performed.
    pub action: FileAction,

    /// Lifecycle state.
    pub status: FileStatus,

    pub tenant_id: Option<String>,
    pub user_id: Option<String>,
    pub session_id: Option<String>,
    pub ip_address: Option<String>,
    pub user_agent: Option<String>,

    /// Typed operational counters and timestamps.
    pub metadata: Json<FileMetadata>,

    /// Last failure recorded against this file, if any.
    pub error_message: Option<String>,

    pub is_public: bool,
    pub expires_at: Option<DateTime<Utc>>,

    /// When the file was last downloaded or had a download link issued.
    pub downloaded_at: Option<DateTime<Utc>>,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub deleted_at: Option<DateTime<Utc>>,
}

impl FileRecord {
    /// The blob pointer, present only when both halves are set and non-empty.
    pub fn blob_location(&self) -> Option<(&str, &str)> {
        match (self.bucket.as_deref(), self.key.as_deref()) {
            (Some(bucket), Some(key)) if !bucket.is_empty() && !key.is_empty() => {
                Some((bucket, key))
            }
            _ => None,
        }
    }

    pub fn is_deleted(&self) -> bool {
        self.status == FileStatus::Deleted
    }
}
