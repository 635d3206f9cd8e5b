//! Router tests over a local-disk backend, driven with `tower::ServiceExt`.

mod common;

use axum::{
    body::Body,
    http::{Request, StatusCode, header},
};
use common::TestServer;
use serde_json::{Value, json};
use tower::ServiceExt;

async fn send(router: &axum::Router, request: Request<Body>) -> (StatusCode, Vec<u8>) {
    let response = router.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    (status, body.to_vec())
}

async fn json_request(
    router: &axum::Router,
    method: &str,
    uri: &str,
    body: Option<Value>,
) -> (StatusCode, Value) {
    let mut builder = Request::builder().method(method).uri(uri);
    let body = match body {
        Some(v) => {
            builder = builder.header(header::CONTENT_TYPE, "application/json");
            Body::from(serde_json::to_vec(&v).unwrap())
        }
        None => Body::empty(),
    };

    let (status, bytes) = send(router, builder.body(body).unwrap()).await;
    let json = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap_or(Value::Null)
    };
    (status, json)
}

async fn upload(router: &axum::Router, filename: &str, data: &'static str) -> Value {
    let request = Request::builder()
        .method("POST")
        .uri(format!("/files?bucket=tenantA&tenantId=t1&filename={filename}"))
        .header(header::CONTENT_TYPE, "text/plain")
        .body(Body::from(data))
        .unwrap();
    let (status, bytes) = send(router, request).await;
    assert_eq!(status, StatusCode::CREATED);
    serde_json::from_slice(&bytes).unwrap()
}

#[tokio::test]
async fn healthz_and_readyz() {
    let server = TestServer::new().await;
    let router = server.router();

    let (status, body) = json_request(&router, "GET", "/healthz", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "ok");

    let (status, body) = json_request(&router, "GET", "/readyz", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["checks"]["catalog"]["ok"], true);
    assert_eq!(body["checks"]["blob"]["ok"], true);
}

#[tokio::test]
async fn file_lifecycle_over_http() {
    let server = TestServer::new().await;
    let router = server.router();

    let uploaded = upload(&router, "a.txt", "hello").await;
    assert_eq!(uploaded["success"], true);
    assert_eq!(uploaded["size"], 5);
    assert_eq!(uploaded["bucket"], "tenantA");
    let id = uploaded["storageId"].as_str().unwrap().to_string();

    let (status, record) = json_request(
        &router,
        "GET",
        &format!("/files/{id}?bucket=tenantA&tenantId=t1"),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(record["success"], true);
    assert_eq!(record["id"], id.as_str());
    assert_eq!(record["status"], "active");
    assert_eq!(record["key"], uploaded["blobKey"]);

    let request = Request::builder()
        .uri(format!("/files/{id}/content?bucket=tenantA&tenantId=t1"))
        .body(Body::empty())
        .unwrap();
    let response = router.clone().oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response.headers()[header::CONTENT_TYPE], "text/plain");
    assert_eq!(response.headers()["x-storage-id"], id.as_str());
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    assert_eq!(&bytes[..], b"hello");

    let (status, presigned) = json_request(
        &router,
        "POST",
        &format!("/files/{id}/presigned-url"),
        Some(json!({ "originInfo": { "bucket": "tenantA", "tenantId": "t1" } })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(presigned["expiresIn"], 10800);
    assert_eq!(presigned["operation"], "GET");
    assert!(
        presigned["presignedUrl"]
            .as_str()
            .unwrap()
            .starts_with("http://gateway.test/blobs/tenantA/")
    );

    let (status, deleted) = json_request(
        &router,
        "DELETE",
        &format!("/files/{id}?bucket=tenantA&tenantId=t1"),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(deleted["success"], true);
    assert_eq!(deleted["storageId"], id.as_str());

    let (status, body) = json_request(
        &router,
        "GET",
        &format!("/files/{id}/content?bucket=tenantA&tenantId=t1"),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["status"], 404);

    let (status, again) = json_request(
        &router,
        "DELETE",
        &format!("/files/{id}?bucket=tenantA&tenantId=t1"),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(again["alreadyDeleted"], true);
}

#[tokio::test]
async fn wrong_tenant_gets_not_found() {
    let server = TestServer::new().await;
    let router = server.router();
    let uploaded = upload(&router, "a.txt", "hello").await;
    let id = uploaded["storageId"].as_str().unwrap();

    let (status, body) = json_request(
        &router,
        "GET",
        &format!("/files/{id}?bucket=tenantA&tenantId=t2"),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert!(body["error"].as_str().unwrap().contains(id));
}

#[tokio::test]
async fn presigned_link_serves_the_object_once_verified() {
    let server = TestServer::new().await;
    let router = server.router();
    let uploaded = upload(&router, "a.txt", "hello").await;
    let id = uploaded["storageId"].as_str().unwrap();

    let (_, presigned) = json_request(
        &router,
        "POST",
        &format!("/files/{id}/presigned-url"),
        Some(json!({
            "originInfo": { "bucket": "tenantA", "tenantId": "t1" },
            "expiresIn": 60
        })),
    )
    .await;
    let url = presigned["presignedUrl"].as_str().unwrap();
    let path = url.strip_prefix("http://gateway.test").unwrap();

    let request = Request::builder().uri(path).body(Body::empty()).unwrap();
    let (status, bytes) = send(&router, request).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(bytes, b"hello");

    let tampered = path.replace("signature=", "signature=AAAA");
    let request = Request::builder()
        .uri(tampered)
        .body(Body::empty())
        .unwrap();
    let (status, _) = send(&router, request).await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let request = Request::builder()
        .method("PUT")
        .uri(path)
        .body(Body::from("overwrite"))
        .unwrap();
    let (status, _) = send(&router, request).await;
    assert_eq!(status, StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn presigned_put_link_stores_the_body() {
    use file_gateway::{blob::BlobAdapter, models::blob::PresignOperation};
    use std::time::Duration;

    let server = TestServer::new().await;
    let router = server.router();

    let url = server
        .local
        .presigned_url(
            "tenantA",
            "incoming/report.csv",
            PresignOperation::Put,
            Duration::from_secs(60),
        )
        .await
        .unwrap();
    let path = url.strip_prefix("http://gateway.test").unwrap();

    let request = Request::builder()
        .method("PUT")
        .uri(path)
        .header(header::CONTENT_TYPE, "text/csv")
        .body(Body::from("a,b\n1,2\n"))
        .unwrap();
    let (status, _) = send(&router, request).await;
    assert_eq!(status, StatusCode::OK);

    let stored = server
        .local
        .download_object("tenantA", "incoming/report.csv", None)
        .await
        .unwrap();
    assert_eq!(&stored.data[..], b"a,b\n1,2\n");
    assert_eq!(stored.metadata.mimetype, "text/csv");
}

#[tokio::test]
async fn bucket_listing_paginates_with_opaque_tokens() {
    let server = TestServer::new().await;
    let router = server.router();
    for name in ["a.txt", "b.txt", "c.txt"] {
        upload(&router, name, "x").await;
    }

    let (status, first) =
        json_request(&router, "GET", "/buckets/tenantA/objects?max-keys=2", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(first["items"].as_array().unwrap().len(), 2);
    assert_eq!(first["isTruncated"], true);
    let token = first["nextContinuationToken"].as_str().unwrap();

    let (status, rest) = json_request(
        &router,
        "GET",
        &format!("/buckets/tenantA/objects?max-keys=2&continuation-token={token}"),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(rest["items"].as_array().unwrap().len(), 1);
    assert_eq!(rest["isTruncated"], false);

    let (status, stats) = json_request(&router, "GET", "/buckets/tenantA/stats", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(stats["totalFiles"], 3);
    assert_eq!(stats["totalSize"], 3);
}

#[tokio::test]
async fn bad_requests_are_rejected() {
    let server = TestServer::new().await;
    let router = server.router();

    let (status, _) = json_request(
        &router,
        "GET",
        "/files/not-a-uuid?bucket=tenantA&tenantId=t1",
        None,
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, body) = json_request(
        &router,
        "GET",
        "/buckets/tenantA/objects?continuation-token=***",
        None,
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["status"], 400);
}
