//! Targets of presigned links issued by the local-disk backend.
//!
//! - `GET /blobs/{bucket}/{*key}?expires=&signature=` streams the object
//! - `PUT /blobs/{bucket}/{*key}?expires=&signature=` stores the body
//!
//! S3 links point at S3 itself and never reach these routes.

use super::AppState;
use crate::{blob::BlobAdapter, errors::AppError};
use axum::{
    body::{Body, Bytes},
    extract::{Path, Query, State},
    http::{HeaderMap, HeaderValue, StatusCode, header},
    response::Response,
};
use serde::Deserialize;
use std::collections::BTreeMap;

#[derive(Debug, Deserialize)]
pub struct SignedLinkQuery {
    /// Informational; the request method is what gets verified.
    #[serde(default)]
    pub method: Option<String>,
    pub expires: i64,
    pub signature: String,
}

/// `GET /blobs/{bucket}/{*key}`
pub async fn get_blob(
    State(state): State<AppState>,
    Path((bucket, key)): Path<(String, String)>,
    Query(q): Query<SignedLinkQuery>,
) -> Result<Response, AppError> {
    let links = state
        .links
        .as_ref()
        .ok_or_else(|| {
            AppError::new(StatusCode::NOT_FOUND, "signed links are not served here")
        })?;
    links.verify_link("GET", &bucket, &key, q.expires, &q.signature)?;

    let object = links.download_object(&bucket, &key, None).await?;

    let mut response = Response::new(Body::from(object.data));
    let headers = response.headers_mut();
    headers.insert(
        header::CONTENT_TYPE,
        HeaderValue::from_str(&object.metadata.mimetype)
            .unwrap_or_else(|_| HeaderValue::from_static("application/octet-stream")),
    );
    headers.insert(header::CONTENT_LENGTH, HeaderValue::from(object.metadata.size));
    if let Some(etag) = object.metadata.etag.as_ref()
        && let Ok(value) = HeaderValue::from_str(&format!("\"{etag}\""))
    {
        headers.insert(header::ETAG, value);
    }
    Ok(response)
}

/// `PUT /blobs/{bucket}/{*key}`
pub async fn put_blob(
    State(state): State<AppState>,
    Path((bucket, key)): Path<(String, String)>,
    Query(q): Query<SignedLinkQuery>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Response, AppError> {
    let links = state
        .links
        .as_ref()
        .ok_or_else(|| {
            AppError::new(StatusCode::NOT_FOUND, "signed links are not served here")
        })?;
    links.verify_link("PUT", &bucket, &key, q.expires, &q.signature)?;

    links.ensure_bucket_exists(&bucket).await?;
    let content_type = headers
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .map(|v| v.to_string());
    let etag = links
        .put_object(&bucket, &key, body, content_type, BTreeMap::new())
        .await?;

    let mut response = Response::new(Body::empty());
    if let Ok(value) = HeaderValue::from_str(&format!("\"{etag}\"")) {
        response.headers_mut().insert(header::ETAG, value);
    }
    *response.status_mut() = StatusCode::OK;
    Ok(response)
}
