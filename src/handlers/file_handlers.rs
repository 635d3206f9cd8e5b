//! HTTP handlers for file operations.
//!
//! Every route is scoped by `bucket` + `tenantId`, passed as query
//! parameters (or inside `originInfo` for presign).

use super::{AppState, Success};
use crate::{
    errors::AppError,
    models::{blob::PresignOperation, file_record::FileRecord},
    services::{
        DeleteResponse, DownloadResponse, OriginInfo, PresignRequest, PresignedUrlResponse,
        UploadRequest, UploadResponse,
    },
};
use axum::{
    Json,
    body::{Body, Bytes},
    extract::{Path, Query, State},
    http::{HeaderMap, HeaderName, HeaderValue, StatusCode, header},
    response::{IntoResponse, Response},
};
use serde::Deserialize;
use uuid::Uuid;

/// `?bucket=&tenantId=` on scoped routes.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScopeQuery {
    pub bucket: String,
    pub tenant_id: String,
    pub user_id: Option<String>,
    pub session_id: Option<String>,
}

impl ScopeQuery {
    fn into_origin(self, headers: &HeaderMap) -> OriginInfo {
        OriginInfo {
            bucket: self.bucket,
            tenant_id: self.tenant_id,
            user_id: self.user_id,
            session_id: self.session_id,
            ip_address: header_str(headers, "x-forwarded-for")
                .and_then(|v| v.split(',').next())
                .map(|v| v.trim().to_string()),
            user_agent: header_str(headers, header::USER_AGENT.as_str()).map(str::to_string),
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadQuery {
    #[serde(flatten)]
    pub scope: ScopeQuery,
    pub filename: String,
}

/// Body of `POST /files/{id}/presigned-url`.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PresignBody {
    pub origin_info: OriginInfo,
    pub expires_in: Option<u64>,
    pub operation: Option<PresignOperation>,
}

fn header_str<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers.get(name).and_then(|v| v.to_str().ok())
}

/// `GET /files/{id}`
///
/// The catalog record.
pub async fn find_file(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Query(q): Query<ScopeQuery>,
    headers: HeaderMap,
) -> Result<Json<Success<FileRecord>>, AppError> {
    let origin = q.into_origin(&headers);
    let record = state.files.find(id, &origin.scope()).await?;
    Ok(Json(Success::new(record)))
}

/// `POST /files?bucket=&tenantId=&filename=`
///
/// Raw body upload. `Content-Type` becomes the file's mimetype.
pub async fn upload_file(
    State(state): State<AppState>,
    Query(q): Query<UploadQuery>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<(StatusCode, Json<Success<UploadResponse>>), AppError> {
    let mimetype = header_str(&headers, header::CONTENT_TYPE.as_str()).map(str::to_string);
    let origin = q.scope.into_origin(&headers);

    let uploaded = state
        .files
        .upload(UploadRequest {
            data: body,
            filename: q.filename,
            mimetype,
            origin,
        })
        .await?;

    Ok((StatusCode::CREATED, Json(Success::new(uploaded))))
}

/// `GET /files/{id}/content`
pub async fn download_file(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Query(q): Query<ScopeQuery>,
    headers: HeaderMap,
) -> Result<Response, AppError> {
    let origin = q.into_origin(&headers);
    let download = state.files.download(id, &origin).await?;

    let mut response = Response::new(Body::empty());
    set_download_headers(response.headers_mut(), &download);
    *response.body_mut() = Body::from(download.data);
    *response.status_mut() = StatusCode::OK;
    Ok(response)
}

/// `POST /files/{id}/presigned-url`
pub async fn presign_file(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(body): Json<PresignBody>,
) -> Result<Json<Success<PresignedUrlResponse>>, AppError> {
    let presigned = state
        .files
        .presigned_url(
            id,
            &body.origin_info,
            PresignRequest {
                expires_in: body.expires_in,
                operation: body.operation,
            },
        )
        .await?;
    Ok(Json(Success::new(presigned)))
}

/// `DELETE /files/{id}`
///
/// Soft delete. Repeat calls succeed.
pub async fn delete_file(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Query(q): Query<ScopeQuery>,
    headers: HeaderMap,
) -> Result<impl IntoResponse, AppError> {
    let origin = q.into_origin(&headers);
    let deleted: DeleteResponse = state.files.delete(id, &origin).await?;
    Ok(Json(Success::new(deleted)))
}

fn set_download_headers(headers: &mut HeaderMap, download: &DownloadResponse) {
    headers.insert(
        header::CONTENT_TYPE,
        HeaderValue::from_str(&download.mimetype)
            .unwrap_or_else(|_| HeaderValue::from_static("application/octet-stream")),
    );
    headers.insert(header::CONTENT_LENGTH, HeaderValue::from(download.size));

    let name = download
        .original_filename
        .as_deref()
        .unwrap_or(&download.filename)
        .replace(['"', '\\'], "_");
    if let Ok(value) = HeaderValue::from_str(&format!("attachment; filename=\"{name}\"")) {
        headers.insert(header::CONTENT_DISPOSITION, value);
    }

    if let Some(etag) = download.metadata.etag.as_ref()
        && let Ok(value) = HeaderValue::from_str(&format!("\"{etag}\""))
    {
        headers.insert(header::ETAG, value);
    }
    if let Ok(value) = HeaderValue::from_str(&download.storage_id.to_string()) {
        headers.insert(HeaderName::from_static("x-storage-id"), value);
    }
}
