//! Tests for startup token provisioning.

mod common;

use axum::http::StatusCode;
use common::{TOKEN_U1, TestServer, json_request};
use satchel_core::config::{AuthConfig, ProvisionedToken};
use satchel_metadata::models::TOKEN_SOURCE_CONFIG;
use satchel_server::auth::hash_token;
use satchel_server::bootstrap::ensure_configured_tokens;
use time::OffsetDateTime;

fn single_token(owner: &str, raw: &str) -> AuthConfig {
    AuthConfig {
        tokens: vec![ProvisionedToken {
            owner: owner.to_string(),
            token_hash: hash_token(raw),
            scopes: None,
            description: None,
        }],
    }
}

#[tokio::test]
async fn test_configured_tokens_authenticate() {
    let server = TestServer::new().await;

    let (status, _) = json_request(&server.router, "GET", "/v1/files", Some(TOKEN_U1)).await;
    assert_eq!(status, StatusCode::OK);

    let row = server
        .metadata()
        .get_token_by_hash(&hash_token(TOKEN_U1))
        .await
        .unwrap()
        .expect("token provisioned");
    assert_eq!(row.owner_id, "u1");
    assert_eq!(row.source, TOKEN_SOURCE_CONFIG);
}

#[tokio::test]
async fn test_provisioning_is_idempotent() {
    let server = TestServer::new().await;
    let metadata = server.metadata();
    let config = AuthConfig::for_testing();

    let before = metadata
        .get_token_by_hash(&hash_token(TOKEN_U1))
        .await
        .unwrap()
        .unwrap();
    ensure_configured_tokens(metadata.as_ref(), &config)
        .await
        .unwrap();
    let after = metadata
        .get_token_by_hash(&hash_token(TOKEN_U1))
        .await
        .unwrap()
        .unwrap();

    assert_eq!(before.token_id, after.token_id);
    assert_eq!(
        metadata
            .list_active_tokens_by_source(TOKEN_SOURCE_CONFIG)
            .await
            .unwrap()
            .len(),
        2
    );
}

#[tokio::test]
async fn test_prefixed_uppercase_hash_matches() {
    let server = TestServer::new().await;
    let metadata = server.metadata();

    let mut config = single_token("u3", "token-for-u3");
    config.tokens[0].token_hash = format!(
        "sha256:{}",
        config.tokens[0].token_hash.to_ascii_uppercase()
    );
    ensure_configured_tokens(metadata.as_ref(), &config)
        .await
        .unwrap();

    let (status, _) =
        json_request(&server.router, "GET", "/v1/files", Some("token-for-u3")).await;
    assert_eq!(status, StatusCode::OK);
}

#[tokio::test]
async fn test_rotation_revokes_removed_tokens() {
    let server = TestServer::new().await;
    let metadata = server.metadata();

    ensure_configured_tokens(metadata.as_ref(), &single_token("u1", "rotated-u1"))
        .await
        .unwrap();

    let (status, _) = json_request(&server.router, "GET", "/v1/files", Some(TOKEN_U1)).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    let (status, _) = json_request(&server.router, "GET", "/v1/files", Some("rotated-u1")).await;
    assert_eq!(status, StatusCode::OK);

    let old = metadata
        .get_token_by_hash(&hash_token(TOKEN_U1))
        .await
        .unwrap()
        .unwrap();
    assert!(old.revoked_at.is_some());
}

#[tokio::test]
async fn test_revoked_hash_cannot_be_reconfigured() {
    let server = TestServer::new().await;
    let metadata = server.metadata();

    let row = metadata
        .get_token_by_hash(&hash_token(TOKEN_U1))
        .await
        .unwrap()
        .unwrap();
    metadata
        .revoke_token(row.token_id, OffsetDateTime::now_utc())
        .await
        .unwrap();

    let err = ensure_configured_tokens(metadata.as_ref(), &AuthConfig::for_testing())
        .await
        .unwrap_err();
    assert!(err.to_string().contains("revoked"), "{err}");
}

#[tokio::test]
async fn test_hash_owned_by_other_principal_rejected() {
    let server = TestServer::new().await;

    let err = ensure_configured_tokens(
        server.metadata().as_ref(),
        &single_token("someone-else", TOKEN_U1),
    )
    .await
    .unwrap_err();
    assert!(err.to_string().contains("another principal"), "{err}");
}
