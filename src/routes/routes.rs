//! Route table.
//!
//! ## Structure
//! - **Health**
//!   - `GET    /healthz`, `GET /readyz`
//!
//! - **Files** (scoped by `bucket` + `tenantId`)
//!   - `POST   /files`: upload (raw body)
//!   - `GET    /files/{id}`: catalog record
//!   - `GET    /files/{id}/content`: download
//!   - `POST   /files/{id}/presigned-url`: issue a presigned URL
//!   - `DELETE /files/{id}`: soft delete
//!
//! - **Buckets** (admin, blob backend only)
//!   - `GET    /buckets/{bucket}/objects`: paginated listing
//!   - `GET    /buckets/{bucket}/stats`: aggregate statistics
//!
//! - **Signed links** (local backend)
//!   - `GET|PUT /blobs/{bucket}/{*key}`
//!
//! The wildcard `*key` allows nested keys like `photos/2025/img.jpg`.

use crate::handlers::{
    AppState,
    blob_handlers::{get_blob, put_blob},
    bucket_handlers::{bucket_stats, list_objects},
    file_handlers::{delete_file, download_file, find_file, presign_file, upload_file},
    health_handlers::{healthz, readyz},
};
use axum::{
    Router,
    extract::DefaultBodyLimit,
    routing::{get, post},
};

/// Build the router. Request bodies above `max_upload_bytes` are rejected.
pub fn routes(max_upload_bytes: usize) -> Router<AppState> {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/readyz", get(readyz))
        .route("/files", post(upload_file))
        .route("/files/{id}", get(find_file).delete(delete_file))
        .route("/files/{id}/content", get(download_file))
        .route("/files/{id}/presigned-url", post(presign_file))
        .route("/buckets/{bucket}/objects", get(list_objects))
        .route("/buckets/{bucket}/stats", get(bucket_stats))
        .route("/blobs/{bucket}/{*key}", get(get_blob).put(put_blob))
        .layer(DefaultBodyLimit::max(max_upload_bytes))
}
