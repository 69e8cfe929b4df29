//! Provisioning of configured bearer tokens.

use anyhow::{Result, bail};
use satchel_core::Principal;
use satchel_core::config::AuthConfig;
use satchel_core::token::TokenScope;
use satchel_metadata::MetadataStore;
use satchel_metadata::models::{TOKEN_SOURCE_CONFIG, TokenRow};
use std::collections::HashSet;
use time::OffsetDateTime;
use uuid::Uuid;

/// Make the index's config-sourced tokens match `config.tokens`.
///
/// New hashes are created, existing ones are left alone, and tokens provisioned
/// on an earlier start whose hash is no longer configured are revoked. A
/// configured hash that matches a revoked or expired token, or a token of
/// another owner, is a startup error.
pub async fn ensure_configured_tokens(
    metadata: &dyn MetadataStore,
    config: &AuthConfig,
) -> Result<()> {
    let now = OffsetDateTime::now_utc();
    let mut configured = HashSet::new();

    for provisioned in &config.tokens {
        // Stored hashes are lowercase hex, matching auth::hash_token.
        let hash = provisioned.normalized_hash();
        if hash.len() != 64 || !hash.chars().all(|c| c.is_ascii_hexdigit()) {
            bail!(
                "invalid token_hash for owner {:?}: expected 64 hex chars",
                provisioned.owner
            );
        }
        let owner = Principal::new(provisioned.owner.clone())
            .map_err(|e| anyhow::anyhow!("invalid token owner: {e}"))?;

        if let Some(existing) = metadata.get_token_by_hash(&hash).await? {
            if existing.revoked_at.is_some() {
                bail!(
                    "configured token for owner {:?} matches a revoked token (id={}); \
                     use a new token hash",
                    provisioned.owner,
                    existing.token_id
                );
            }
            if let Some(expires_at) = existing.expires_at
                && expires_at <= now
            {
                bail!(
                    "configured token for owner {:?} matches an expired token (id={}, expired={})",
                    provisioned.owner,
                    existing.token_id,
                    expires_at
                );
            }
            if existing.owner_id != owner.as_str() {
                bail!(
                    "configured token for owner {:?} is already issued to another principal",
                    provisioned.owner
                );
            }
            tracing::debug!(token_id = %existing.token_id, owner = %owner, "Configured token already exists");
            configured.insert(hash);
            continue;
        }

        let scopes = provisioned
            .scopes
            .clone()
            .unwrap_or_else(|| vec![TokenScope::FilesWrite.as_str().to_string()]);
        for scope in &scopes {
            TokenScope::parse(scope)
                .map_err(|_| anyhow::anyhow!("invalid scope {scope:?} for owner {owner}"))?;
        }

        let token = TokenRow {
            token_id: Uuid::new_v4(),
            owner_id: owner.as_str().to_string(),
            token_hash: hash.clone(),
            scopes: serde_json::to_string(&scopes)?,
            source: TOKEN_SOURCE_CONFIG.to_string(),
            expires_at: None,
            revoked_at: None,
            created_at: now,
            last_used_at: None,
            description: provisioned.description.clone(),
        };
        metadata.create_token(&token).await?;
        tracing::info!(token_id = %token.token_id, owner = %owner, "Configured token created");
        configured.insert(hash);
    }

    for stale in metadata
        .list_active_tokens_by_source(TOKEN_SOURCE_CONFIG)
        .await?
    {
        if configured.contains(&stale.token_hash) {
            continue;
        }
        metadata.revoke_token(stale.token_id, now).await?;
        tracing::info!(
            token_id = %stale.token_id,
            owner = %stale.owner_id,
            "Token no longer configured, revoked"
        );
    }

    Ok(())
}
