//! Catalog store: one SQLite row per logical file.
//!
//! Every lookup is scoped by `(id, bucket, tenant_id)`; there is no way to
//! fetch a row by id alone. Writes are single statements touching one row.

use crate::models::file_record::{FileAction, FileMetadata, FileRecord, FileStatus};
use chrono::{DateTime, Utc};
use serde::Deserialize;
use sqlx::{QueryBuilder, SqlitePool, sqlite::Sqlite, types::Json};
use thiserror::Error;
use tracing::{debug, info};
use uuid::Uuid;

const MIGRATION_SQL: &str = include_str!("../../migrations/0001_init.sql");

const COLUMNS: &str = "id, filename, original_filename, mimetype, size, file_path, bucket, key, \
     action, status, tenant_id, user_id, session_id, ip_address, user_agent, metadata, \
     error_message, is_public, expires_at, downloaded_at, created_at, updated_at, deleted_at";

#[derive(Debug, Error)]
pub enum CatalogError {
    #[error("file record `{0}` not found")]
    NotFound(Uuid),
    #[error(transparent)]
    Sqlx(#[from] sqlx::Error),
}

pub type CatalogResult<T> = Result<T, CatalogError>;

/// Tenant boundary every lookup must match.
#[derive(Deserialize, Clone, Debug, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Scope {
    pub bucket: String,
    pub tenant_id: String,
}

impl Scope {
    pub fn new(bucket: impl Into<String>, tenant_id: impl Into<String>) -> Self {
        Self {
            bucket: bucket.into(),
            tenant_id: tenant_id.into(),
        }
    }
}

/// Fields supplied when a record is first created.
#[derive(Clone, Debug)]
pub struct NewFileRecord {
    pub filename: String,
    pub original_filename: Option<String>,
    pub mimetype: Option<String>,
    pub size: i64,
    pub bucket: Option<String>,
    pub action: FileAction,
    pub tenant_id: Option<String>,
    pub user_id: Option<String>,
    pub session_id: Option<String>,
    pub ip_address: Option<String>,
    pub user_agent: Option<String>,
    pub metadata: FileMetadata,
    pub is_public: bool,
    pub expires_at: Option<DateTime<Utc>>,
}

impl NewFileRecord {
    pub fn new(filename: impl Into<String>, size: i64, action: FileAction) -> Self {
        Self {
            filename: filename.into(),
            original_filename: None,
            mimetype: None,
            size,
            bucket: None,
            action,
            tenant_id: None,
            user_id: None,
            session_id: None,
            ip_address: None,
            user_agent: None,
            metadata: FileMetadata::default(),
            is_public: false,
            expires_at: None,
        }
    }
}

/// Merge-patch for [`Catalog::update`]. `None` leaves a column untouched.
///
/// `metadata` replaces the stored value; callers compose it from the current
/// record first.
#[derive(Clone, Debug, Default)]
pub struct FileRecordPatch {
    pub bucket: Option<String>,
    pub key: Option<String>,
    pub file_path: Option<String>,
    pub action: Option<FileAction>,
    pub status: Option<FileStatus>,
    pub metadata: Option<FileMetadata>,
    pub error_message: Option<String>,
    pub downloaded_at: Option<DateTime<Utc>>,
    pub deleted_at: Option<DateTime<Utc>>,
}

#[derive(Clone, Debug)]
pub struct Catalog {
    pool: SqlitePool,
}

impl Catalog {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Apply the embedded schema. Safe to run repeatedly.
    pub async fn migrate(&self) -> CatalogResult<()> {
        let statements = MIGRATION_SQL
            .split(';')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .collect::<Vec<_>>();

        info!("Running {} migration statements...", statements.len());
        for stmt in statements {
            debug!("Executing migration SQL: {}", stmt);
            sqlx::query(stmt).execute(&self.pool).await?;
        }
        Ok(())
    }

    /// Round-trip a trivial query; used by readiness probes.
    pub async fn ping(&self) -> CatalogResult<()> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }

    /// Scoped lookup of a live (not soft-deleted) record.
    pub async fn find_by_id(&self, id: Uuid, scope: &Scope) -> CatalogResult<FileRecord> {
        self.find_scoped(id, scope, false).await
    }

    /// Scoped lookup that also returns soft-deleted records.
    pub async fn find_including_deleted(
        &self,
        id: Uuid,
        scope: &Scope,
    ) -> CatalogResult<FileRecord> {
        self.find_scoped(id, scope, true).await
    }

    async fn find_scoped(
        &self,
        id: Uuid,
        scope: &Scope,
        include_deleted: bool,
    ) -> CatalogResult<FileRecord> {
        let mut builder = QueryBuilder::<Sqlite>::new(format!(
            "SELECT {COLUMNS} FROM file_records WHERE id = "
        ));
        builder.push_bind(id);
        builder.push(" AND bucket = ").push_bind(&scope.bucket);
        builder.push(" AND tenant_id = ").push_bind(&scope.tenant_id);
        if !include_deleted {
            builder
                .push(" AND status != ")
                .push_bind(FileStatus::Deleted);
        }

        builder
            .build_query_as::<FileRecord>()
            .fetch_optional(&self.pool)
            .await?
            .ok_or(CatalogError::NotFound(id))
    }

    /// Insert a record with a fresh id, status `active` and audit timestamps.
    pub async fn create(&self, new: NewFileRecord) -> CatalogResult<FileRecord> {
        let id = Uuid::new_v4();
        let now = Utc::now();

        let record = sqlx::query_as::<_, FileRecord>(&format!(
            "INSERT INTO file_records (
                id, filename, original_filename, mimetype, size, bucket, action, status,
                tenant_id, user_id, session_id, ip_address, user_agent, metadata,
                is_public, expires_at, created_at, updated_at
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            RETURNING {COLUMNS}"
        ))
        .bind(id)
        .bind(&new.filename)
        .bind(&new.original_filename)
        .bind(&new.mimetype)
        .bind(new.size)
        .bind(&new.bucket)
        .bind(new.action)
        .bind(FileStatus::Active)
        .bind(&new.tenant_id)
        .bind(&new.user_id)
        .bind(&new.session_id)
        .bind(&new.ip_address)
        .bind(&new.user_agent)
        .bind(Json(new.metadata))
        .bind(new.is_public)
        .bind(new.expires_at)
        .bind(now)
        .bind(now)
        .fetch_one(&self.pool)
        .await?;

        debug!(id = %record.id, filename = %record.filename, "file record created");
        Ok(record)
    }

    /// Merge-patch one record. `updated_at` always moves forward.
    pub async fn update(&self, id: Uuid, patch: FileRecordPatch) -> CatalogResult<FileRecord> {
        let mut builder = QueryBuilder::<Sqlite>::new("UPDATE file_records SET updated_at = ");
        builder.push_bind(Utc::now());

        if let Some(bucket) = patch.bucket {
            builder.push(", bucket = ").push_bind(bucket);
        }
        if let Some(key) = patch.key {
            builder.push(", key = ").push_bind(key);
        }
        if let Some(file_path) = patch.file_path {
            builder.push(", file_path = ").push_bind(file_path);
        }
        if let Some(action) = patch.action {
            builder.push(", action = ").push_bind(action);
        }
        if let Some(status) = patch.status {
            builder.push(", status = ").push_bind(status);
        }
        if let Some(metadata) = patch.metadata {
            builder.push(", metadata = ").push_bind(Json(metadata));
        }
        if let Some(error_message) = patch.error_message {
            builder.push(", error_message = ").push_bind(error_message);
        }
        if let Some(downloaded_at) = patch.downloaded_at {
            builder.push(", downloaded_at = ").push_bind(downloaded_at);
        }
        if let Some(deleted_at) = patch.deleted_at {
            builder.push(", deleted_at = ").push_bind(deleted_at);
        }

        builder.push(" WHERE id = ").push_bind(id);
        builder.push(format!(" RETURNING {COLUMNS}"));

        builder
            .build_query_as::<FileRecord>()
            .fetch_optional(&self.pool)
            .await?
            .ok_or(CatalogError::NotFound(id))
    }

    /// Mark a record deleted. The row is retained.
    pub async fn soft_delete(&self, id: Uuid) -> CatalogResult<FileRecord> {
        self.update(
            id,
            FileRecordPatch {
                status: Some(FileStatus::Deleted),
                action: Some(FileAction::Delete),
                deleted_at: Some(Utc::now()),
                ..FileRecordPatch::default()
            },
        )
        .await
    }
}
