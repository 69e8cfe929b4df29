//! Object storage abstraction and backends for satchel.
//!
//! This crate provides:
//! - The [`ObjectStore`] trait used by ingestion, retrieval and the sweeper
//! - Streaming uploads that only become visible once finished
//! - A local filesystem backend

pub mod backends;
pub mod error;
pub mod traits;

pub use backends::filesystem::FilesystemBackend;
pub use error::{StorageError, StorageResult};
pub use traits::{ByteStream, ObjectMeta, ObjectStore, StreamingUpload};

use satchel_core::config::StorageConfig;
use std::sync::Arc;

/// Create an object store from configuration.
pub async fn from_config(config: &StorageConfig) -> StorageResult<Arc<dyn ObjectStore>> {
    match config {
        StorageConfig::Filesystem { path } => {
            let backend = FilesystemBackend::new(path).await?;
            Ok(Arc::new(backend))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;
    use tempfile::tempdir;

    #[tokio::test]
    async fn from_config_filesystem_ok() {
        let temp = tempdir().unwrap();
        let config = StorageConfig::Filesystem {
            path: temp.path().join("store"),
        };

        let store = from_config(&config).await.unwrap();
        store
            .put("content/hello.txt", Bytes::from_static(b"hi"))
            .await
            .unwrap();
        assert!(store.exists("content/hello.txt").await.unwrap());
        assert_eq!(store.backend_name(), "filesystem");
        store.health_check().await.unwrap();
    }
}
