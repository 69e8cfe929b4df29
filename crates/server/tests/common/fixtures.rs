//! Request helpers and test data.

use axum::body::{Body, Bytes};
use axum::http::{HeaderMap, Request, StatusCode};
use serde_json::Value;
use tower::ServiceExt;

/// Raw bearer token for principal `u1` (see `AuthConfig::for_testing`).
#[allow(dead_code)]
pub const TOKEN_U1: &str = "test-token-u1";

/// Raw bearer token for principal `u2`.
#[allow(dead_code)]
pub const TOKEN_U2: &str = "test-token-u2";

const BOUNDARY: &str = "satchel-test-boundary";

/// Smallest input that sniffs as image/png.
#[allow(dead_code)]
pub const PNG_HEADER: &[u8] = b"\x89PNG\r\n\x1a\n\x00\x00\x00\rIHDR";

/// Helper to make JSON requests.
#[allow(dead_code)]
pub async fn json_request(
    router: &axum::Router,
    method: &str,
    uri: &str,
    auth_token: Option<&str>,
) -> (StatusCode, Value) {
    let mut builder = Request::builder().method(method).uri(uri);

    if let Some(token) = auth_token {
        builder = builder.header("Authorization", format!("Bearer {}", token));
    }

    let request = builder.body(Body::empty()).unwrap();
    let response = router.clone().oneshot(request).await.unwrap();

    let status = response.status();
    let body_bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();

    let json: Value = if body_bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&body_bytes).unwrap_or(Value::Null)
    };

    (status, json)
}

/// Build a multipart body carrying `data` in field `field` named `filename`.
#[allow(dead_code)]
pub fn multipart_body(field: &str, filename: &str, data: &[u8]) -> Vec<u8> {
    let mut body = Vec::new();
    body.extend_from_slice(format!("--{BOUNDARY}\r\n").as_bytes());
    body.extend_from_slice(
        format!(
            "Content-Disposition: form-data; name=\"{field}\"; filename=\"{filename}\"\r\n"
        )
        .as_bytes(),
    );
    // The declared part type is ignored; content is sniffed.
    body.extend_from_slice(b"Content-Type: application/octet-stream\r\n\r\n");
    body.extend_from_slice(data);
    body.extend_from_slice(format!("\r\n--{BOUNDARY}--\r\n").as_bytes());
    body
}

/// POST a multipart upload to `uri`.
#[allow(dead_code)]
pub async fn upload_to(
    router: &axum::Router,
    uri: &str,
    auth_token: Option<&str>,
    body: Vec<u8>,
) -> (StatusCode, Value) {
    let mut builder = Request::builder()
        .method("POST")
        .uri(uri)
        .header(
            "Content-Type",
            format!("multipart/form-data; boundary={BOUNDARY}"),
        );
    if let Some(token) = auth_token {
        builder = builder.header("Authorization", format!("Bearer {}", token));
    }

    let response = router
        .clone()
        .oneshot(builder.body(Body::from(body)).unwrap())
        .await
        .unwrap();
    let status = response.status();
    let body_bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let json = serde_json::from_slice(&body_bytes).unwrap_or(Value::Null);
    (status, json)
}

/// Upload `data` as `filename` with no expiry.
#[allow(dead_code)]
pub async fn upload(
    router: &axum::Router,
    auth_token: &str,
    filename: &str,
    data: &[u8],
) -> (StatusCode, Value) {
    upload_to(
        router,
        "/v1/files",
        Some(auth_token),
        multipart_body("file", filename, data),
    )
    .await
}

/// GET a file, returning status, headers and the raw body.
#[allow(dead_code)]
pub async fn download(
    router: &axum::Router,
    auth_token: &str,
    content_id: &str,
) -> (StatusCode, HeaderMap, Bytes) {
    let request = Request::builder()
        .method("GET")
        .uri(format!("/v1/files/{content_id}"))
        .header("Authorization", format!("Bearer {}", auth_token))
        .body(Body::empty())
        .unwrap();
    let response = router.clone().oneshot(request).await.unwrap();

    let status = response.status();
    let headers = response.headers().clone();
    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    (status, headers, body)
}
