//! Admin views over the blob backend: paginated listing and bucket stats.
//!
//! These bypass the catalog and report what is physically stored.

use super::{AppState, Success};
use crate::{
    errors::AppError,
    models::blob::{BucketStats, ListObjectsParams, ListObjectsResult},
};
use axum::{
    Json,
    extract::{Path, Query, State},
};
use base64::{Engine as _, engine::general_purpose};
use serde::Deserialize;

const MAX_KEYS_LIMIT: usize = 1000;

#[derive(Debug, Deserialize)]
pub struct ListObjectsQuery {
    pub prefix: Option<String>,
    #[serde(rename = "max-keys")]
    pub max_keys: Option<usize>,
    #[serde(rename = "continuation-token")]
    pub continuation_token: Option<String>,
}

/// `GET /buckets/{bucket}/objects?prefix=&max-keys=&continuation-token=`
///
/// Continuation tokens are opaque base64 on the wire.
pub async fn list_objects(
    State(state): State<AppState>,
    Path(bucket): Path<String>,
    Query(q): Query<ListObjectsQuery>,
) -> Result<Json<Success<ListObjectsResult>>, AppError> {
    let continuation_token = q
        .continuation_token
        .as_deref()
        .map(decode_continuation_token)
        .transpose()?;
    let params = ListObjectsParams {
        prefix: q.prefix,
        max_keys: Some(q.max_keys.unwrap_or(MAX_KEYS_LIMIT).clamp(1, MAX_KEYS_LIMIT)),
        continuation_token,
    };

    let mut result = state.files.list_objects(&bucket, params).await?;
    result.next_continuation_token = result
        .next_continuation_token
        .as_deref()
        .map(encode_continuation_token);
    Ok(Json(Success::new(result)))
}

/// `GET /buckets/{bucket}/stats`
///
/// Walks the whole bucket.
pub async fn bucket_stats(
    State(state): State<AppState>,
    Path(bucket): Path<String>,
) -> Result<Json<Success<BucketStats>>, AppError> {
    let stats = state.files.bucket_stats(&bucket).await?;
    Ok(Json(Success::new(stats)))
}

fn encode_continuation_token(key: &str) -> String {
    general_purpose::URL_SAFE_NO_PAD.encode(key)
}

fn decode_continuation_token(token: &str) -> Result<String, AppError> {
    general_purpose::URL_SAFE_NO_PAD
        .decode(token)
        .ok()
        .and_then(|bytes| String::from_utf8(bytes).ok())
        .ok_or_else(|| AppError::bad_request("invalid continuation token"))
}
