//! Configuration types shared across crates.

use crate::media::AllowList;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use time::Duration;

/// Server configuration.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Bind address (e.g., "0.0.0.0:8080").
    #[serde(default = "default_bind")]
    pub bind: String,
    /// Enable the /metrics endpoint for Prometheus scraping (default: true).
    /// SECURITY: When enabled, restrict this endpoint at the network level.
    #[serde(default = "default_metrics_enabled")]
    pub metrics_enabled: bool,
    /// Listing page size when the client does not ask for one.
    #[serde(default = "default_list_limit")]
    pub default_list_limit: u32,
    /// Upper bound on the listing page size a client may request.
    #[serde(default = "default_max_list_limit")]
    pub max_list_limit: u32,
}

fn default_bind() -> String {
    "127.0.0.1:8080".to_string()
}

fn default_metrics_enabled() -> bool {
    true
}

fn default_list_limit() -> u32 {
    100
}

fn default_max_list_limit() -> u32 {
    1000
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
            metrics_enabled: default_metrics_enabled(),
            default_list_limit: default_list_limit(),
            max_list_limit: default_max_list_limit(),
        }
    }
}

impl ServerConfig {
    /// Clamp a requested listing size into `[1, max_list_limit]`.
    pub fn list_limit(&self, requested: Option<u32>) -> u32 {
        requested
            .unwrap_or(self.default_list_limit)
            .clamp(1, self.max_list_limit.max(1))
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.max_list_limit == 0 {
            return Err("server.max_list_limit must be at least 1".to_string());
        }
        if self.default_list_limit > self.max_list_limit {
            return Err(format!(
                "server.default_list_limit {} exceeds server.max_list_limit {}",
                self.default_list_limit, self.max_list_limit
            ));
        }
        Ok(())
    }
}

/// Storage backend configuration.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum StorageConfig {
    /// Local filesystem storage.
    Filesystem {
        /// Root directory for storage.
        path: PathBuf,
    },
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self::Filesystem {
            path: PathBuf::from("./data/uploads"),
        }
    }
}

/// Metadata store configuration.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum MetadataConfig {
    /// SQLite database.
    Sqlite {
        /// Database file path.
        path: PathBuf,
        /// Query timeout in seconds (advisory only - SQLite cannot force-cancel queries).
        /// Logs warnings for queries exceeding this duration.
        #[serde(default = "default_sqlite_query_timeout_secs")]
        query_timeout_secs: Option<u64>,
    },
}

fn default_sqlite_query_timeout_secs() -> Option<u64> {
    Some(30)
}

impl Default for MetadataConfig {
    fn default() -> Self {
        Self::Sqlite {
            path: PathBuf::from("./data/metadata.db"),
            query_timeout_secs: default_sqlite_query_timeout_secs(),
        }
    }
}

/// A bearer token provisioned from configuration at startup.
///
/// Tokens that were provisioned on an earlier start but are no longer listed
/// are revoked, so rotating a hash in the config file retires the old token.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ProvisionedToken {
    /// Principal the token authenticates as.
    pub owner: String,
    /// Pre-computed hash of the token (SHA256 hex, 64 characters, optionally
    /// prefixed with `sha256:`). Generate with: `echo -n "your-secret-token" | sha256sum`
    pub token_hash: String,
    /// Scopes for the token (default: ["files:write"]).
    pub scopes: Option<Vec<String>>,
    /// Description for the token.
    pub description: Option<String>,
}

impl ProvisionedToken {
    /// The hash as stored in the index: optional `sha256:` prefix removed, lowercase hex.
    pub fn normalized_hash(&self) -> String {
        self.token_hash
            .strip_prefix("sha256:")
            .unwrap_or(&self.token_hash)
            .to_ascii_lowercase()
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.owner.trim().is_empty() {
            return Err("auth.tokens[].owner must not be empty".to_string());
        }
        let hash = self.normalized_hash();
        if hash.len() != 64 || !hash.chars().all(|c| c.is_ascii_hexdigit()) {
            return Err(format!(
                "auth.tokens[].token_hash for owner {:?} must be 64 hex characters",
                self.owner
            ));
        }
        Ok(())
    }
}

/// Authentication configuration.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct AuthConfig {
    /// Tokens to provision at startup.
    #[serde(default)]
    pub tokens: Vec<ProvisionedToken>,
}

impl AuthConfig {
    /// Create a test configuration with two principals.
    ///
    /// **For testing only.** Hashes are of "test-token-u1" and "test-token-u2".
    pub fn for_testing() -> Self {
        Self {
            tokens: vec![
                ProvisionedToken {
                    owner: "u1".to_string(),
                    token_hash: "e265155744a89b97d133ad5209c9b870e3c164854948fb21a5520b5675f7d208"
                        .to_string(),
                    scopes: None,
                    description: Some("Test token u1".to_string()),
                },
                ProvisionedToken {
                    owner: "u2".to_string(),
                    token_hash: "ea88f4dbcbfc8f311f3fd29997a12adf588e7010ad7005eb0e942c6574d7991c"
                        .to_string(),
                    scopes: None,
                    description: Some("Test token u2".to_string()),
                },
            ],
        }
    }

    pub fn validate(&self) -> Result<(), String> {
        let mut seen = std::collections::HashSet::new();
        for token in &self.tokens {
            token.validate()?;
            if !seen.insert(token.normalized_hash()) {
                return Err(format!(
                    "auth.tokens contains a duplicate token_hash (owner {:?})",
                    token.owner
                ));
            }
        }
        Ok(())
    }
}

/// Ingestion configuration.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct IngestConfig {
    /// Media types accepted for upload, keyed by essence.
    #[serde(default)]
    pub allowed_types: AllowList,
    /// Largest accepted upload in bytes (default: 32 MiB).
    #[serde(default = "default_max_upload_bytes")]
    pub max_upload_bytes: u64,
    /// Lifetime applied to uploads that do not request one (default: none).
    #[serde(default)]
    pub default_ttl_secs: Option<u64>,
    /// Longest lifetime a client may request (default: unlimited).
    #[serde(default)]
    pub max_ttl_secs: Option<u64>,
}

fn default_max_upload_bytes() -> u64 {
    32 * 1024 * 1024
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            allowed_types: AllowList::default(),
            max_upload_bytes: default_max_upload_bytes(),
            default_ttl_secs: None,
            max_ttl_secs: None,
        }
    }
}

impl IngestConfig {
    pub fn default_ttl(&self) -> Option<Duration> {
        self.default_ttl_secs.map(saturating_seconds)
    }

    pub fn max_ttl(&self) -> Option<Duration> {
        self.max_ttl_secs.map(saturating_seconds)
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.allowed_types.is_empty() {
            return Err("ingest.allowed_types enables no media types".to_string());
        }
        if self.max_upload_bytes == 0 {
            return Err("ingest.max_upload_bytes must be positive".to_string());
        }
        if self.default_ttl_secs == Some(0) {
            return Err("ingest.default_ttl_secs must be positive when set".to_string());
        }
        if let (Some(default), Some(max)) = (self.default_ttl_secs, self.max_ttl_secs)
            && default > max
        {
            return Err(format!(
                "ingest.default_ttl_secs {default} exceeds ingest.max_ttl_secs {max}"
            ));
        }
        Ok(())
    }
}

/// Expiry sweeper configuration.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SweeperConfig {
    /// Run the sweeper in the background (default: true).
    #[serde(default = "default_sweeper_enabled")]
    pub enabled: bool,
    /// Seconds between sweep cycles (default: 1 hour).
    #[serde(default = "default_sweep_interval_secs")]
    pub interval_secs: u64,
    /// Records fetched per scan page.
    #[serde(default = "default_sweep_batch_size")]
    pub batch_size: u32,
    /// Also delete stored objects that have no index record, and stale
    /// partial uploads (default: true).
    #[serde(default = "default_reconcile_orphans")]
    pub reconcile_orphans: bool,
    /// Minimum age of an unindexed object before reconciliation removes it.
    /// Protects uploads whose index write has not landed yet.
    #[serde(default = "default_orphan_grace_secs")]
    pub orphan_grace_secs: u64,
}

fn default_sweeper_enabled() -> bool {
    true
}

fn default_sweep_interval_secs() -> u64 {
    3600 // 1 hour
}

fn default_reconcile_orphans() -> bool {
    true
}

fn default_sweep_batch_size() -> u32 {
    500
}

fn default_orphan_grace_secs() -> u64 {
    3600
}

impl Default for SweeperConfig {
    fn default() -> Self {
        Self {
            enabled: default_sweeper_enabled(),
            interval_secs: default_sweep_interval_secs(),
            batch_size: default_sweep_batch_size(),
            reconcile_orphans: default_reconcile_orphans(),
            orphan_grace_secs: default_orphan_grace_secs(),
        }
    }
}

/// Longest accepted sweep interval (30 days).
pub const MAX_SWEEP_INTERVAL_SECS: u64 = 30 * 24 * 60 * 60;

impl SweeperConfig {
    /// Get the sweep interval as a std::time::Duration, capped at
    /// [`MAX_SWEEP_INTERVAL_SECS`].
    pub fn interval(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.interval_secs.min(MAX_SWEEP_INTERVAL_SECS))
    }

    /// Get the orphan grace period as a Duration.
    pub fn orphan_grace(&self) -> Duration {
        saturating_seconds(self.orphan_grace_secs)
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.interval_secs == 0 {
            return Err("sweeper.interval_secs must be positive".to_string());
        }
        if self.interval_secs > MAX_SWEEP_INTERVAL_SECS {
            return Err(format!(
                "sweeper.interval_secs must be at most {MAX_SWEEP_INTERVAL_SECS}"
            ));
        }
        if self.batch_size == 0 {
            return Err("sweeper.batch_size must be positive".to_string());
        }
        Ok(())
    }
}

/// Post-ingest processing configuration.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ProcessingConfig {
    /// Number of worker tasks.
    #[serde(default = "default_processing_workers")]
    pub workers: usize,
    /// Jobs buffered before new submissions are dropped.
    #[serde(default = "default_processing_queue_capacity")]
    pub queue_capacity: usize,
}

fn default_processing_workers() -> usize {
    2
}

fn default_processing_queue_capacity() -> usize {
    256
}

impl Default for ProcessingConfig {
    fn default() -> Self {
        Self {
            workers: default_processing_workers(),
            queue_capacity: default_processing_queue_capacity(),
        }
    }
}

impl ProcessingConfig {
    pub fn validate(&self) -> Result<(), String> {
        if self.workers == 0 {
            return Err("processing.workers must be at least 1".to_string());
        }
        if self.queue_capacity == 0 {
            return Err("processing.queue_capacity must be at least 1".to_string());
        }
        Ok(())
    }
}

// Saturate at i64::MAX to prevent overflow wrapping to negative
fn saturating_seconds(secs: u64) -> Duration {
    Duration::seconds(i64::try_from(secs).unwrap_or(i64::MAX))
}

/// Complete application configuration.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct AppConfig {
    /// Server configuration.
    #[serde(default)]
    pub server: ServerConfig,
    /// Storage backend configuration.
    #[serde(default)]
    pub storage: StorageConfig,
    /// Metadata store configuration.
    #[serde(default)]
    pub metadata: MetadataConfig,
    /// Authentication configuration.
    #[serde(default)]
    pub auth: AuthConfig,
    /// Ingestion configuration.
    #[serde(default)]
    pub ingest: IngestConfig,
    /// Expiry sweeper configuration.
    #[serde(default)]
    pub sweeper: SweeperConfig,
    /// Post-ingest processing configuration.
    #[serde(default)]
    pub processing: ProcessingConfig,
}

impl AppConfig {
    /// Create a test configuration with sensible defaults.
    ///
    /// **For testing only.** Uses filesystem storage, SQLite metadata,
    /// a dummy token, and leaves the background sweeper disabled.
    pub fn for_testing() -> Self {
        Self {
            auth: AuthConfig::for_testing(),
            sweeper: SweeperConfig {
                enabled: false,
                ..SweeperConfig::default()
            },
            ..Self::default()
        }
    }

    /// Validate every section, returning the first problem found.
    pub fn validate(&self) -> Result<(), String> {
        self.server.validate()?;
        self.auth.validate()?;
        self.ingest.validate()?;
        self.sweeper.validate()?;
        self.processing.validate()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_validate() {
        assert!(AppConfig::default().validate().is_ok());
        assert!(AppConfig::for_testing().validate().is_ok());
    }

    #[test]
    fn test_server_config_defaults_metrics_enabled() {
        let config = ServerConfig::default();
        assert!(config.metrics_enabled);
    }

    #[test]
    fn test_list_limit_clamps() {
        let config = ServerConfig::default();
        assert_eq!(config.list_limit(None), 100);
        assert_eq!(config.list_limit(Some(0)), 1);
        assert_eq!(config.list_limit(Some(5)), 5);
        assert_eq!(config.list_limit(Some(1_000_000)), 1000);
    }

    #[test]
    fn test_sweeper_defaults_hourly() {
        let config = SweeperConfig::default();
        assert!(config.enabled);
        assert_eq!(config.interval(), std::time::Duration::from_secs(3600));
        assert!(config.reconcile_orphans);
    }

    #[test]
    fn test_sweeper_reconciles_orphans_when_unset() {
        let config: SweeperConfig = serde_json::from_str("{}").unwrap();
        assert!(config.reconcile_orphans);
        let config: SweeperConfig =
            serde_json::from_str(r#"{"reconcile_orphans": false}"#).unwrap();
        assert!(!config.reconcile_orphans);
    }

    #[test]
    fn test_sweeper_rejects_unbounded_interval() {
        let config = SweeperConfig {
            interval_secs: u64::MAX,
            ..SweeperConfig::default()
        };
        assert!(config.validate().is_err());
        assert_eq!(config.interval().as_secs(), MAX_SWEEP_INTERVAL_SECS);
        let config = SweeperConfig {
            interval_secs: MAX_SWEEP_INTERVAL_SECS,
            ..SweeperConfig::default()
        };
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_sweeper_rejects_zero_interval() {
        let config = SweeperConfig {
            interval_secs: 0,
            ..SweeperConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_ingest_deserialize_without_fields() {
        let config: IngestConfig = serde_json::from_str("{}").unwrap();
        assert_eq!(config.max_upload_bytes, 32 * 1024 * 1024);
        assert_eq!(
            config.allowed_types.enabled(),
            vec!["application/pdf", "image/jpeg", "image/png", "text/plain"]
        );
        assert!(config.default_ttl().is_none());
    }

    #[test]
    fn test_ingest_rejects_default_ttl_above_max() {
        let config = IngestConfig {
            default_ttl_secs: Some(7200),
            max_ttl_secs: Some(3600),
            ..IngestConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_ingest_rejects_empty_allow_list() {
        let config: IngestConfig =
            serde_json::from_str(r#"{"allowed_types": {"text/plain": false}}"#).unwrap();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_provisioned_token_hash_format() {
        let mut token = AuthConfig::for_testing().tokens.remove(0);
        assert!(token.validate().is_ok());
        token.token_hash = "abc".to_string();
        assert!(token.validate().is_err());
    }

    #[test]
    fn test_provisioned_token_hash_prefix_normalized() {
        let token = ProvisionedToken {
            owner: "u1".to_string(),
            token_hash: format!("sha256:{}", "AB".repeat(32)),
            scopes: None,
            description: None,
        };
        assert!(token.validate().is_ok());
        assert_eq!(token.normalized_hash(), "ab".repeat(32));
    }

    #[test]
    fn test_auth_rejects_duplicate_hash() {
        let mut auth = AuthConfig::for_testing();
        let mut dup = auth.tokens[0].clone();
        dup.owner = "someone-else".to_string();
        auth.tokens.push(dup);
        assert!(auth.validate().is_err());
    }

    #[test]
    fn test_storage_config_tagged() {
        let config: StorageConfig =
            serde_json::from_str(r#"{"type": "filesystem", "path": "/srv/satchel"}"#).unwrap();
        let StorageConfig::Filesystem { path } = config;
        assert_eq!(path, PathBuf::from("/srv/satchel"));
    }
}
