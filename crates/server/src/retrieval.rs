//! Owner-scoped content retrieval.

use satchel_core::config::ServerConfig;
use satchel_core::{ContentId, ContentRecord, Principal};
use satchel_metadata::{MetadataError, MetadataStore};
use satchel_storage::{ByteStream, ObjectStore, StorageError};
use std::sync::Arc;

/// Retrieval failures.
///
/// Content owned by another principal is reported exactly like content that
/// does not exist.
#[derive(Debug, thiserror::Error)]
pub enum RetrievalError {
    #[error("content not found")]
    NotFound,

    #[error("storage error: {0}")]
    Storage(#[source] StorageError),

    #[error("index error: {0}")]
    Index(#[from] MetadataError),
}

/// A resolved record together with its bytes.
pub struct OpenedContent {
    pub record: ContentRecord,
    /// Size of the stored object.
    pub size: u64,
    pub stream: ByteStream,
}

/// Resolves content ids into records and bytes for their owners.
pub struct RetrievalGateway {
    storage: Arc<dyn ObjectStore>,
    metadata: Arc<dyn MetadataStore>,
    limits: ServerConfig,
}

impl RetrievalGateway {
    pub fn new(
        storage: Arc<dyn ObjectStore>,
        metadata: Arc<dyn MetadataStore>,
        limits: ServerConfig,
    ) -> Self {
        Self {
            storage,
            metadata,
            limits,
        }
    }

    /// Look up a record the principal owns.
    pub async fn resolve(
        &self,
        principal: &Principal,
        id: ContentId,
    ) -> Result<ContentRecord, RetrievalError> {
        let row = self
            .metadata
            .get_content_for_owner(*id.as_uuid(), principal.as_str())
            .await?
            .ok_or(RetrievalError::NotFound)?;
        let record = ContentRecord::try_from(row)?;
        if !record.is_owned_by(principal) {
            return Err(RetrievalError::NotFound);
        }
        Ok(record)
    }

    /// Resolve a record and open its stored bytes.
    ///
    /// An object that vanished between the index lookup and the read (an
    /// expiry sweep racing the request) is reported as not found.
    #[tracing::instrument(skip(self, principal), fields(owner = %principal, content_id = %id))]
    pub async fn open(
        &self,
        principal: &Principal,
        id: ContentId,
    ) -> Result<OpenedContent, RetrievalError> {
        let record = self.resolve(principal, id).await?;

        let meta = self.storage.head(&record.path).await.map_err(not_found_or_storage)?;
        let stream = self
            .storage
            .get_stream(&record.path)
            .await
            .map_err(not_found_or_storage)?;

        Ok(OpenedContent {
            record,
            size: meta.size,
            stream,
        })
    }

    /// The principal's records, newest first.
    ///
    /// `limit` falls back to the configured default and is clamped to
    /// `[1, max_list_limit]`.
    pub async fn list_by_owner(
        &self,
        principal: &Principal,
        limit: Option<u32>,
    ) -> Result<Vec<ContentRecord>, RetrievalError> {
        let limit = self.limits.list_limit(limit);
        let rows = self
            .metadata
            .list_content_by_owner(principal.as_str(), limit)
            .await?;

        rows.into_iter()
            .map(|row| ContentRecord::try_from(row).map_err(RetrievalError::from))
            .collect()
    }
}

fn not_found_or_storage(err: StorageError) -> RetrievalError {
    if err.is_not_found() {
        RetrievalError::NotFound
    } else {
        RetrievalError::Storage(err)
    }
}
