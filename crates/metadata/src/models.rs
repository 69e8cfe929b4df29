//! Database models mapping to the metadata schema.

use crate::error::{MetadataError, MetadataResult};
use satchel_core::token::{Token, TokenId, TokenScope};
use satchel_core::{ContentId, ContentRecord, Principal};
use sqlx::FromRow;
use time::format_description::FormatItem;
use time::macros::format_description;
use time::{OffsetDateTime, UtcOffset};
use uuid::Uuid;

// =============================================================================
// Content
// =============================================================================

/// Content index record.
#[derive(Debug, Clone, FromRow)]
pub struct ContentRow {
    pub id: Uuid,
    pub owner_id: String,
    pub original_name: String,
    pub stored_name: String,
    pub mime_type: String,
    pub size_bytes: i64,
    pub path: String,
    pub created_at: OffsetDateTime,
    pub expires_at: Option<OffsetDateTime>,
}

impl From<&ContentRecord> for ContentRow {
    fn from(record: &ContentRecord) -> Self {
        Self {
            id: *record.id.as_uuid(),
            owner_id: record.owner.as_str().to_string(),
            original_name: record.original_name.clone(),
            stored_name: record.stored_name.clone(),
            mime_type: record.mime_type.clone(),
            size_bytes: i64::try_from(record.size_bytes).unwrap_or(i64::MAX),
            path: record.path.clone(),
            created_at: record.created_at,
            expires_at: record.expires_at,
        }
    }
}

impl TryFrom<ContentRow> for ContentRecord {
    type Error = MetadataError;

    fn try_from(row: ContentRow) -> Result<Self, Self::Error> {
        let owner = Principal::new(row.owner_id)
            .map_err(|e| MetadataError::Corrupt(format!("content {}: {e}", row.id)))?;
        let size_bytes = u64::try_from(row.size_bytes).map_err(|_| {
            MetadataError::Corrupt(format!(
                "content {}: negative size {}",
                row.id, row.size_bytes
            ))
        })?;

        Ok(ContentRecord {
            id: ContentId::from_uuid(row.id),
            owner,
            original_name: row.original_name,
            stored_name: row.stored_name,
            mime_type: row.mime_type,
            size_bytes,
            path: row.path,
            created_at: row.created_at,
            expires_at: row.expires_at,
        })
    }
}

/// Stored timestamp layout. Every value has the same width (nanosecond
/// fraction always present) so text comparison in SQL is chronological.
const DB_TIMESTAMP: &[FormatItem<'static>] = format_description!(
    "[year]-[month]-[day]T[hour]:[minute]:[second].[subsecond digits:9]Z"
);

/// Encode a timestamp for binding: converted to UTC, fixed width.
pub fn db_timestamp(at: OffsetDateTime) -> MetadataResult<String> {
    Ok(at.to_offset(UtcOffset::UTC).format(DB_TIMESTAMP)?)
}

/// [`db_timestamp`] for optional columns.
pub fn db_timestamp_opt(at: Option<OffsetDateTime>) -> MetadataResult<Option<String>> {
    at.map(db_timestamp).transpose()
}

// =============================================================================
// Tokens
// =============================================================================

/// Where a token came from.
pub const TOKEN_SOURCE_CONFIG: &str = "config";

/// Bearer token record.
#[derive(Debug, Clone, FromRow)]
pub struct TokenRow {
    pub token_id: Uuid,
    pub owner_id: String,
    pub token_hash: String,
    pub scopes: String, // JSON array
    pub source: String,
    pub expires_at: Option<OffsetDateTime>,
    pub revoked_at: Option<OffsetDateTime>,
    pub created_at: OffsetDateTime,
    pub last_used_at: Option<OffsetDateTime>,
    pub description: Option<String>,
}

impl TryFrom<TokenRow> for Token {
    type Error = MetadataError;

    fn try_from(row: TokenRow) -> Result<Self, Self::Error> {
        let owner = Principal::new(row.owner_id)
            .map_err(|e| MetadataError::Corrupt(format!("token {}: {e}", row.token_id)))?;
        let scope_names: Vec<String> = serde_json::from_str(&row.scopes)
            .map_err(|e| MetadataError::Corrupt(format!("token {} scopes: {e}", row.token_id)))?;
        // Unknown scopes are ignored rather than failing authentication outright.
        let scopes = scope_names
            .iter()
            .filter_map(|s| TokenScope::parse(s).ok())
            .collect();

        Ok(Token {
            id: TokenId::from_uuid(row.token_id),
            owner,
            scopes,
            expires_at: row.expires_at,
            revoked_at: row.revoked_at,
            created_at: row.created_at,
            description: row.description,
        })
    }
}
