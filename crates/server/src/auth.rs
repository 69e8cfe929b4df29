//! Authentication and authorization middleware.

use crate::error::{ApiError, ApiResult};
use crate::state::AppState;
use axum::extract::{Request, State};
use axum::http::header::AUTHORIZATION;
use axum::middleware::Next;
use axum::response::Response;
use satchel_core::Principal;
use satchel_core::token::{Token, TokenScope};
use sha2::{Digest, Sha256};
use time::OffsetDateTime;
use tracing::Instrument;
use uuid::Uuid;

/// Maximum length for trace IDs.
/// Longer trace IDs are truncated to prevent log bloat and potential log injection.
const MAX_TRACE_ID_LEN: usize = 128;

/// Trace ID for request correlation.
#[derive(Clone, Debug)]
pub struct TraceId(pub String);

impl TraceId {
    /// Generate a new random trace ID.
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    /// Create a trace ID from a client-provided value.
    ///
    /// Truncated to [`MAX_TRACE_ID_LEN`] characters, non-printable characters removed.
    pub fn from_client(value: &str) -> Self {
        // Limit by character count, not bytes, so multi-byte input cannot split a char.
        let sanitized: String = value
            .chars()
            .take(MAX_TRACE_ID_LEN)
            .filter(|c| c.is_ascii_graphic() || *c == ' ')
            .collect();

        if sanitized.is_empty() {
            Self::new()
        } else {
            Self(sanitized)
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for TraceId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for TraceId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Authenticated request extension.
#[derive(Clone, Debug)]
pub struct AuthenticatedUser {
    /// The validated token.
    pub token: Token,
}

impl AuthenticatedUser {
    /// The principal the token belongs to.
    pub fn principal(&self) -> &Principal {
        &self.token.owner
    }

    /// Check if the user has a specific scope.
    pub fn has_scope(&self, scope: TokenScope) -> bool {
        self.token.has_scope(scope)
    }

    /// Require a specific scope, returning an error if not present.
    pub fn require_scope(&self, scope: TokenScope) -> ApiResult<()> {
        if self.has_scope(scope) {
            Ok(())
        } else {
            Err(ApiError::Forbidden(format!(
                "missing required scope: {scope}"
            )))
        }
    }
}

/// Extract bearer token from Authorization header.
/// Per RFC 6750, the "Bearer" scheme is case-insensitive.
fn extract_bearer_token(req: &Request) -> Option<&str> {
    req.headers()
        .get(AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| {
            if v.len() >= 7 && v[..7].eq_ignore_ascii_case("bearer ") {
                Some(v[7..].trim())
            } else {
                None
            }
        })
        .filter(|token| !token.is_empty())
}

/// Extract trace ID from X-Trace-Id header or generate a new one.
fn extract_or_generate_trace_id(req: &Request) -> TraceId {
    req.headers()
        .get("x-trace-id")
        .and_then(|v| v.to_str().ok())
        .map(TraceId::from_client)
        .unwrap_or_else(TraceId::new)
}

/// Hash a raw bearer token the way provisioned hashes are stored.
pub fn hash_token(token: &str) -> String {
    hex::encode(Sha256::digest(token.as_bytes()))
}

/// Authentication middleware that validates tokens and sets up trace context.
///
/// Requests without a token pass through unauthenticated; handlers decide
/// whether they need a principal.
pub async fn auth_middleware(
    State(state): State<AppState>,
    mut req: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let trace_id = extract_or_generate_trace_id(&req);
    let trace_id_str = trace_id.0.clone();
    req.extensions_mut().insert(trace_id);

    if let Some(token_str) = extract_bearer_token(&req) {
        let token_hash = hash_token(token_str);

        let Some(token_row) = state.metadata.get_token_by_hash(&token_hash).await? else {
            return Err(ApiError::Unauthorized("invalid token".to_string()));
        };
        let token_id = token_row.token_id;
        let token = Token::try_from(token_row)?;

        if !token.is_valid() {
            return Err(ApiError::Unauthorized(
                "token expired or revoked".to_string(),
            ));
        }

        // Update last used time (fire and forget)
        let metadata = state.metadata.clone();
        tokio::spawn(async move {
            if let Err(e) = metadata
                .touch_token(token_id, OffsetDateTime::now_utc())
                .await
            {
                tracing::debug!(token_id = %token_id, error = %e, "Failed to record token use");
            }
        });

        req.extensions_mut().insert(AuthenticatedUser { token });
    }

    // Run the request within a tracing span that includes the trace ID
    let response = next
        .run(req)
        .instrument(tracing::info_span!("request", trace_id = %trace_id_str))
        .await;

    Ok(response)
}

/// Require authentication (token must be present).
pub fn require_auth(req: &Request) -> ApiResult<&AuthenticatedUser> {
    req.extensions()
        .get::<AuthenticatedUser>()
        .ok_or_else(|| ApiError::Unauthorized("authentication required".to_string()))
}

/// The authenticated principal for this request, after checking `scope`.
///
/// There is no anonymous or default owner: a request without a valid token
/// is rejected.
pub fn current_principal(req: &Request, scope: TokenScope) -> ApiResult<Principal> {
    let auth = require_auth(req)?;
    auth.require_scope(scope)?;
    Ok(auth.principal().clone())
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use satchel_core::token::TokenId;
    use std::collections::HashSet;

    fn request_with(header: Option<&str>) -> Request {
        let mut builder = axum::http::Request::builder().uri("/");
        if let Some(value) = header {
            builder = builder.header(AUTHORIZATION, value);
        }
        builder.body(Body::empty()).unwrap()
    }

    fn user(scopes: &[TokenScope]) -> AuthenticatedUser {
        AuthenticatedUser {
            token: Token {
                id: TokenId::new(),
                owner: Principal::new("u1").unwrap(),
                scopes: scopes.iter().copied().collect::<HashSet<_>>(),
                expires_at: None,
                revoked_at: None,
                created_at: OffsetDateTime::now_utc(),
                description: None,
            },
        }
    }

    #[test]
    fn test_bearer_scheme_case_insensitive() {
        assert_eq!(
            extract_bearer_token(&request_with(Some("Bearer abc"))),
            Some("abc")
        );
        assert_eq!(
            extract_bearer_token(&request_with(Some("bEaReR abc"))),
            Some("abc")
        );
        assert_eq!(extract_bearer_token(&request_with(Some("Basic abc"))), None);
        assert_eq!(extract_bearer_token(&request_with(Some("Bearer "))), None);
        assert_eq!(extract_bearer_token(&request_with(None)), None);
    }

    #[test]
    fn test_hash_token_matches_sha256sum() {
        // echo -n "test-token-u1" | sha256sum
        assert_eq!(
            hash_token("test-token-u1"),
            "e265155744a89b97d133ad5209c9b870e3c164854948fb21a5520b5675f7d208"
        );
    }

    #[test]
    fn test_trace_id_sanitized() {
        let id = TraceId::from_client("abc\ndef\u{00e9}");
        assert_eq!(id.as_str(), "abcdef");
        assert_eq!(TraceId::from_client(&"x".repeat(500)).as_str().len(), 128);
        assert!(!TraceId::from_client("\n\t").as_str().is_empty());
    }

    #[test]
    fn test_current_principal_requires_token_and_scope() {
        let mut req = request_with(None);
        assert!(matches!(
            current_principal(&req, TokenScope::FilesRead),
            Err(ApiError::Unauthorized(_))
        ));

        req.extensions_mut().insert(user(&[TokenScope::FilesRead]));
        assert_eq!(
            current_principal(&req, TokenScope::FilesRead)
                .unwrap()
                .as_str(),
            "u1"
        );
        assert!(matches!(
            current_principal(&req, TokenScope::FilesWrite),
            Err(ApiError::Forbidden(_))
        ));
    }
}
