//! Storage test utilities.

use async_trait::async_trait;
use bytes::Bytes;
use satchel_storage::{
    ByteStream, ObjectMeta, ObjectStore, StorageError, StorageResult, StreamingUpload,
};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

/// Wraps a store and fails every delete while `fail_deletes` is set.
/// Note: #[allow(dead_code)] because each test file compiles common/ separately.
#[allow(dead_code)]
pub struct FlakyDeletes {
    inner: Arc<dyn ObjectStore>,
    pub fail_deletes: AtomicBool,
}

#[allow(dead_code)]
impl FlakyDeletes {
    pub fn new(inner: Arc<dyn ObjectStore>) -> Self {
        Self {
            inner,
            fail_deletes: AtomicBool::new(true),
        }
    }
}

#[async_trait]
impl ObjectStore for FlakyDeletes {
    async fn exists(&self, key: &str) -> StorageResult<bool> {
        self.inner.exists(key).await
    }

    async fn head(&self, key: &str) -> StorageResult<ObjectMeta> {
        self.inner.head(key).await
    }

    async fn get(&self, key: &str) -> StorageResult<Bytes> {
        self.inner.get(key).await
    }

    async fn get_stream(&self, key: &str) -> StorageResult<ByteStream> {
        self.inner.get_stream(key).await
    }

    async fn put(&self, key: &str, data: Bytes) -> StorageResult<()> {
        self.inner.put(key, data).await
    }

    async fn put_stream(&self, key: &str) -> StorageResult<Box<dyn StreamingUpload>> {
        self.inner.put_stream(key).await
    }

    async fn delete(&self, key: &str) -> StorageResult<()> {
        if self.fail_deletes.load(Ordering::SeqCst) {
            return Err(StorageError::Io(std::io::Error::other(
                "injected delete failure",
            )));
        }
        self.inner.delete(key).await
    }

    async fn list(&self, prefix: &str) -> StorageResult<Vec<String>> {
        self.inner.list(prefix).await
    }

    async fn remove_stale_partials(
        &self,
        cutoff: time::OffsetDateTime,
    ) -> StorageResult<Vec<ObjectMeta>> {
        self.inner.remove_stale_partials(cutoff).await
    }

    fn backend_name(&self) -> &'static str {
        "flaky"
    }
}
