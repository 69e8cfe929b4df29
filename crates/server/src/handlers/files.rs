//! Upload, listing and download endpoints.

use crate::auth::current_principal;
use crate::error::{ApiError, ApiResult};
use crate::ingest::{IngestRequest, expiry_after};
use crate::state::AppState;
use axum::Json;
use axum::body::Body;
use axum::extract::{FromRequest, Multipart, Path, Query, Request, State};
use axum::http::header::{CONTENT_DISPOSITION, CONTENT_LENGTH, CONTENT_TYPE, X_CONTENT_TYPE_OPTIONS};
use axum::http::{HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use futures::StreamExt;
use percent_encoding::{AsciiSet, NON_ALPHANUMERIC, utf8_percent_encode};
use satchel_core::token::TokenScope;
use satchel_core::{ContentId, ContentRecord};
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

/// Bytes left unescaped in an RFC 5987 `ext-value` (`attr-char`).
const ATTR_CHAR: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'!')
    .remove(b'#')
    .remove(b'$')
    .remove(b'&')
    .remove(b'+')
    .remove(b'-')
    .remove(b'.')
    .remove(b'^')
    .remove(b'_')
    .remove(b'`')
    .remove(b'|')
    .remove(b'~');

/// Multipart field that carries the upload.
pub const UPLOAD_FIELD: &str = "file";

/// Query parameters for uploads.
#[derive(Debug, Default, Deserialize)]
pub struct UploadParams {
    /// Lifetime of the upload in seconds.
    pub expires_in_secs: Option<u64>,
}

/// Query parameters for listings.
#[derive(Debug, Default, Deserialize)]
pub struct ListParams {
    pub limit: Option<u32>,
}

/// A content record as presented to its owner.
#[derive(Debug, Serialize)]
pub struct FileResponse {
    pub content_id: ContentId,
    pub original_name: String,
    pub storage_name: String,
    pub media_type: String,
    pub size_bytes: u64,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339::option")]
    pub expires_at: Option<OffsetDateTime>,
}

impl From<ContentRecord> for FileResponse {
    fn from(record: ContentRecord) -> Self {
        Self {
            content_id: record.id,
            original_name: record.original_name,
            storage_name: record.stored_name,
            media_type: record.mime_type,
            size_bytes: record.size_bytes,
            created_at: record.created_at,
            expires_at: record.expires_at,
        }
    }
}

/// POST /v1/files - Upload one file as multipart field `file`.
///
/// Only the first `file` field is ingested; other fields are skipped.
#[tracing::instrument(skip(state, params, req))]
pub async fn upload_file(
    State(state): State<AppState>,
    Query(params): Query<UploadParams>,
    req: Request,
) -> ApiResult<(StatusCode, Json<FileResponse>)> {
    let principal = current_principal(&req, TokenScope::FilesWrite)?;
    let expires_at = params
        .expires_in_secs
        .map(|secs| expiry_after(OffsetDateTime::now_utc(), secs))
        .transpose()?;

    let mut multipart = Multipart::from_request(req, &state)
        .await
        .map_err(|e| ApiError::BadRequest(format!("invalid multipart body: {e}")))?;

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| ApiError::BadRequest(format!("invalid multipart body: {e}")))?
    {
        if field.name() != Some(UPLOAD_FIELD) {
            continue;
        }

        let request = IngestRequest {
            principal,
            declared_name: field.file_name().unwrap_or_default().to_string(),
            declared_size: None,
            expires_at,
        };
        let record = state.ingest.ingest(request, field).await?;
        return Ok((StatusCode::CREATED, Json(record.into())));
    }

    Err(ApiError::BadRequest(format!(
        "missing multipart field {UPLOAD_FIELD:?}"
    )))
}

/// GET /v1/files - List the caller's files, newest first.
#[tracing::instrument(skip(state, params, req))]
pub async fn list_files(
    State(state): State<AppState>,
    Query(params): Query<ListParams>,
    req: Request,
) -> ApiResult<Json<Vec<FileResponse>>> {
    let principal = current_principal(&req, TokenScope::FilesRead)?;
    let records = state
        .retrieval
        .list_by_owner(&principal, params.limit)
        .await?;

    Ok(Json(records.into_iter().map(FileResponse::from).collect()))
}

/// GET /v1/files/{content_id} - Stream one of the caller's files.
#[tracing::instrument(skip(state, req), fields(content_id = %content_id))]
pub async fn download_file(
    State(state): State<AppState>,
    Path(content_id): Path<String>,
    req: Request,
) -> ApiResult<Response> {
    let principal = current_principal(&req, TokenScope::FilesRead)?;
    // A malformed id cannot name anything the caller owns.
    let id = ContentId::parse(&content_id)
        .map_err(|_| ApiError::NotFound("content not found".to_string()))?;

    let opened = state.retrieval.open(&principal, id).await?;

    // Stream directly from storage to the HTTP response
    let body_stream = opened
        .stream
        .map(|result| result.map_err(|e| std::io::Error::other(e.to_string())));
    let content_type = HeaderValue::from_str(&opened.record.mime_type)
        .unwrap_or_else(|_| HeaderValue::from_static("application/octet-stream"));

    Ok((
        StatusCode::OK,
        [
            (CONTENT_TYPE, content_type),
            (CONTENT_LENGTH, HeaderValue::from(opened.size)),
            (
                CONTENT_DISPOSITION,
                content_disposition(&opened.record.original_name),
            ),
            (X_CONTENT_TYPE_OPTIONS, HeaderValue::from_static("nosniff")),
        ],
        Body::from_stream(body_stream),
    )
        .into_response())
}

/// `attachment` disposition carrying the display name.
///
/// The quoted `filename` is an ASCII approximation; `filename*` carries the
/// exact UTF-8 name percent-encoded (RFC 6266).
fn content_disposition(name: &str) -> HeaderValue {
    let base = name.rsplit(['/', '\\']).next().unwrap_or_default();
    let ascii: String = base
        .chars()
        .map(|c| {
            if (c.is_ascii_graphic() && c != '"' && c != '\\') || c == ' ' {
                c
            } else {
                '_'
            }
        })
        .collect();
    let encoded = utf8_percent_encode(base, ATTR_CHAR);

    HeaderValue::from_str(&format!(
        "attachment; filename=\"{ascii}\"; filename*=UTF-8''{encoded}"
    ))
    .unwrap_or_else(|_| HeaderValue::from_static("attachment"))
}
