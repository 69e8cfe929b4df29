//! Content index repository.

use crate::error::MetadataResult;
use crate::models::ContentRow;
use async_trait::async_trait;
use time::OffsetDateTime;
use uuid::Uuid;

/// Repository for content records.
///
/// Every mutation is a single statement, so each is atomic on its own; the
/// repository never holds a lock across calls.
#[async_trait]
pub trait ContentRepo: Send + Sync {
    /// Insert a new record. Fails with `AlreadyExists` on an id or path collision.
    async fn insert_content(&self, row: &ContentRow) -> MetadataResult<()>;

    /// Get a record by id regardless of owner.
    async fn get_content(&self, id: Uuid) -> MetadataResult<Option<ContentRow>>;

    /// Get a record by id, only if `owner_id` owns it.
    async fn get_content_for_owner(
        &self,
        id: Uuid,
        owner_id: &str,
    ) -> MetadataResult<Option<ContentRow>>;

    /// List an owner's records, newest first.
    async fn list_content_by_owner(
        &self,
        owner_id: &str,
        limit: u32,
    ) -> MetadataResult<Vec<ContentRow>>;

    /// Records whose expiry is at or before `now`, ordered by id, strictly after
    /// the `after` cursor when given.
    async fn list_expired_content(
        &self,
        now: OffsetDateTime,
        after: Option<Uuid>,
        limit: u32,
    ) -> MetadataResult<Vec<ContentRow>>;

    /// Delete a record. Returns false if it was already gone.
    async fn delete_content(&self, id: Uuid) -> MetadataResult<bool>;

    /// Set or clear a record's expiry. Returns false if the record does not exist.
    async fn set_content_expiry(
        &self,
        id: Uuid,
        expires_at: Option<OffsetDateTime>,
    ) -> MetadataResult<bool>;

    /// Whether any record points at storage key `path`.
    async fn content_path_exists(&self, path: &str) -> MetadataResult<bool>;

    /// Total number of records.
    async fn count_content(&self) -> MetadataResult<u64>;
}
