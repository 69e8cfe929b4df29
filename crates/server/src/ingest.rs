//! Upload ingestion.
//!
//! Turns an untrusted byte stream into one stored object plus one index
//! record. Every validation gate runs before the first byte is persisted,
//! and any failure after that point removes what was written, so callers
//! see either a complete upload or nothing.

use crate::metrics::{BYTES_INGESTED, INGEST_DURATION, UPLOADS_INGESTED, record_rejection};
use crate::processing::ProcessingQueue;
use bytes::{Bytes, BytesMut};
use futures::{Stream, StreamExt};
use satchel_core::config::IngestConfig;
use satchel_core::media::sniff;
use satchel_core::{ContentId, ContentRecord, Principal, SNIFF_LEN, StorageName};
use satchel_metadata::models::ContentRow;
use satchel_metadata::{MetadataError, MetadataStore};
use satchel_storage::{ObjectStore, StorageError, StreamingUpload};
use std::fmt::Display;
use std::sync::Arc;
use std::time::Instant;
use time::{Duration, OffsetDateTime};

/// Reasons an upload is refused or fails.
#[derive(Debug, thiserror::Error)]
pub enum IngestError {
    #[error("upload is empty")]
    EmptyContent,

    #[error("media type {0} is not accepted")]
    UnsupportedType(String),

    #[error("invalid file name: {0}")]
    InvalidName(String),

    #[error("invalid expiry: {0}")]
    InvalidExpiry(String),

    #[error("upload exceeds the {limit} byte limit")]
    TooLarge { limit: u64 },

    #[error("declared size {declared} does not match the {actual} bytes received")]
    SizeMismatch { declared: u64, actual: u64 },

    #[error("upload stream interrupted: {0}")]
    StreamInterrupted(String),

    #[error("failed to write content: {0}")]
    StorageWriteFailed(#[source] StorageError),

    #[error("failed to index content: {0}")]
    IndexWriteFailed(#[source] MetadataError),
}

impl IngestError {
    /// Stable label for metrics and error codes.
    pub fn reason(&self) -> &'static str {
        match self {
            Self::EmptyContent => "empty_content",
            Self::UnsupportedType(_) => "unsupported_type",
            Self::InvalidName(_) => "invalid_name",
            Self::InvalidExpiry(_) => "invalid_expiry",
            Self::TooLarge { .. } => "too_large",
            Self::SizeMismatch { .. } => "size_mismatch",
            Self::StreamInterrupted(_) => "stream_interrupted",
            Self::StorageWriteFailed(_) => "storage_write_failed",
            Self::IndexWriteFailed(_) => "index_write_failed",
        }
    }

    /// Whether the failure was caused by the request rather than the server.
    pub fn is_client_error(&self) -> bool {
        !matches!(
            self,
            Self::StorageWriteFailed(_) | Self::IndexWriteFailed(_)
        )
    }
}

/// Who is uploading what.
#[derive(Clone, Debug)]
pub struct IngestRequest {
    pub principal: Principal,
    /// Display name supplied by the client.
    pub declared_name: String,
    /// Size announced by the client, checked against the bytes received.
    pub declared_size: Option<u64>,
    /// Requested expiration. Falls back to the configured default TTL.
    pub expires_at: Option<OffsetDateTime>,
}

/// Compute `now + secs`, rejecting lifetimes that do not fit a timestamp.
pub fn expiry_after(now: OffsetDateTime, secs: u64) -> Result<OffsetDateTime, IngestError> {
    i64::try_from(secs)
        .ok()
        .and_then(|secs| now.checked_add(Duration::seconds(secs)))
        .ok_or_else(|| IngestError::InvalidExpiry(format!("{secs} seconds is out of range")))
}

/// Validates and persists uploads.
pub struct IngestionPipeline {
    storage: Arc<dyn ObjectStore>,
    metadata: Arc<dyn MetadataStore>,
    config: IngestConfig,
    processing: Option<ProcessingQueue>,
}

impl IngestionPipeline {
    pub fn new(
        storage: Arc<dyn ObjectStore>,
        metadata: Arc<dyn MetadataStore>,
        config: IngestConfig,
        processing: Option<ProcessingQueue>,
    ) -> Self {
        Self {
            storage,
            metadata,
            config,
            processing,
        }
    }

    /// Ingest one upload, returning the new index record.
    #[tracing::instrument(
        skip(self, request, stream),
        fields(owner = %request.principal, declared_name = %request.declared_name)
    )]
    pub async fn ingest<S, E>(
        &self,
        request: IngestRequest,
        stream: S,
    ) -> Result<ContentRecord, IngestError>
    where
        S: Stream<Item = Result<Bytes, E>> + Send,
        E: Display,
    {
        let start_time = Instant::now();
        match self.ingest_inner(request, stream).await {
            Ok(record) => {
                UPLOADS_INGESTED.inc();
                BYTES_INGESTED.inc_by(record.size_bytes);
                INGEST_DURATION.observe(start_time.elapsed().as_secs_f64());
                tracing::info!(
                    content_id = %record.id,
                    media_type = %record.mime_type,
                    size_bytes = record.size_bytes,
                    "Upload ingested"
                );
                if let Some(queue) = &self.processing {
                    queue.submit(record.clone());
                }
                Ok(record)
            }
            Err(e) => {
                record_rejection(e.reason());
                if e.is_client_error() {
                    tracing::info!(reason = e.reason(), error = %e, "Upload rejected");
                } else {
                    tracing::error!(reason = e.reason(), error = %e, "Upload failed");
                }
                Err(e)
            }
        }
    }

    async fn ingest_inner<S, E>(
        &self,
        request: IngestRequest,
        stream: S,
    ) -> Result<ContentRecord, IngestError>
    where
        S: Stream<Item = Result<Bytes, E>> + Send,
        E: Display,
    {
        let limit = self.config.max_upload_bytes;
        match request.declared_size {
            Some(0) => return Err(IngestError::EmptyContent),
            Some(declared) if declared > limit => return Err(IngestError::TooLarge { limit }),
            _ => {}
        }

        let now = OffsetDateTime::now_utc();
        let expires_at = self.resolve_expiry(request.expires_at, now)?;

        // Buffer the sniff window; nothing is persisted until the type is known.
        let mut stream = std::pin::pin!(stream);
        let mut prefix = BytesMut::new();
        let mut exhausted = false;
        while prefix.len() < SNIFF_LEN {
            match stream.next().await {
                Some(Ok(chunk)) => prefix.extend_from_slice(&chunk),
                Some(Err(e)) => return Err(IngestError::StreamInterrupted(e.to_string())),
                None => {
                    exhausted = true;
                    break;
                }
            }
        }
        if prefix.is_empty() {
            return Err(IngestError::EmptyContent);
        }

        let media = sniff(&prefix);
        if !self.config.allowed_types.permits(&media) {
            return Err(IngestError::UnsupportedType(media.essence().to_string()));
        }

        let id = ContentId::new();
        let stored_name = StorageName::derive(id, &request.declared_name)
            .map_err(|e| IngestError::InvalidName(e.to_string()))?;
        let key = stored_name.key();

        let mut upload = self
            .storage
            .put_stream(&key)
            .await
            .map_err(IngestError::StorageWriteFailed)?;

        // Replay the buffered prefix ahead of the rest of the stream.
        let mut pending = Some(prefix.freeze());
        let mut received: u64 = 0;
        loop {
            let next = match pending.take() {
                Some(chunk) => Ok(Some(chunk)),
                None if exhausted => Ok(None),
                None => match stream.next().await {
                    Some(Ok(chunk)) => Ok(Some(chunk)),
                    Some(Err(e)) => Err(e.to_string()),
                    None => Ok(None),
                },
            };
            let chunk = match next {
                Ok(Some(chunk)) => chunk,
                Ok(None) => break,
                Err(message) => {
                    discard(upload, &key).await;
                    return Err(IngestError::StreamInterrupted(message));
                }
            };
            if chunk.is_empty() {
                continue;
            }

            received = received.saturating_add(chunk.len() as u64);
            if received > limit {
                discard(upload, &key).await;
                return Err(IngestError::TooLarge { limit });
            }
            if let Err(e) = upload.write(chunk).await {
                discard(upload, &key).await;
                return Err(IngestError::StorageWriteFailed(e));
            }
        }

        let record = ContentRecord {
            id,
            owner: request.principal,
            original_name: request.declared_name,
            stored_name: stored_name.as_str().to_string(),
            mime_type: media.essence().to_string(),
            size_bytes: received,
            path: key,
            created_at: now,
            expires_at,
        };

        // Publishing and indexing run on their own task so a dropped request
        // cannot stop between the object becoming visible and its record landing.
        let task = tokio::spawn(commit(
            self.storage.clone(),
            self.metadata.clone(),
            upload,
            record,
            request.declared_size,
        ));
        task.await.map_err(|e| {
            IngestError::StorageWriteFailed(StorageError::Io(std::io::Error::other(format!(
                "commit task failed: {e}"
            ))))
        })?
    }

    fn resolve_expiry(
        &self,
        requested: Option<OffsetDateTime>,
        now: OffsetDateTime,
    ) -> Result<Option<OffsetDateTime>, IngestError> {
        let Some(at) = requested else {
            // A default TTL too large to represent means "never".
            return Ok(self
                .config
                .default_ttl()
                .and_then(|ttl| now.checked_add(ttl)));
        };

        if at <= now {
            return Err(IngestError::InvalidExpiry(
                "expiration must be in the future".to_string(),
            ));
        }
        if let Some(max) = self.config.max_ttl()
            && at - now > max
        {
            return Err(IngestError::InvalidExpiry(format!(
                "lifetime exceeds the maximum of {} seconds",
                max.whole_seconds()
            )));
        }
        Ok(Some(at))
    }
}

/// Make a fully written upload visible and index it, removing the object
/// again if the size check or the index write fails.
async fn commit(
    storage: Arc<dyn ObjectStore>,
    metadata: Arc<dyn MetadataStore>,
    upload: Box<dyn StreamingUpload>,
    mut record: ContentRecord,
    declared_size: Option<u64>,
) -> Result<ContentRecord, IngestError> {
    record.size_bytes = upload
        .finish()
        .await
        .map_err(IngestError::StorageWriteFailed)?;

    if let Some(declared) = declared_size
        && declared != record.size_bytes
    {
        remove_object(storage.as_ref(), &record.path).await;
        return Err(IngestError::SizeMismatch {
            declared,
            actual: record.size_bytes,
        });
    }

    if let Err(e) = metadata.insert_content(&ContentRow::from(&record)).await {
        remove_object(storage.as_ref(), &record.path).await;
        return Err(IngestError::IndexWriteFailed(e));
    }

    Ok(record)
}

/// Best-effort removal of an object written by a failed upload.
///
/// A failure here leaves an orphan for the sweeper's reconciliation pass.
async fn remove_object(storage: &dyn ObjectStore, key: &str) {
    match storage.delete(key).await {
        Ok(()) => {}
        Err(e) if e.is_not_found() => {}
        Err(e) => {
            tracing::warn!(key = %key, error = %e, "Failed to remove object of failed upload");
        }
    }
}

async fn discard(upload: Box<dyn StreamingUpload>, key: &str) {
    if let Err(e) = upload.abort().await {
        tracing::warn!(key = %key, error = %e, "Failed to abort streaming upload");
    }
}
