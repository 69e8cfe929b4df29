//! Post-ingest processing.
//!
//! Accepted uploads are handed to a bounded queue served by a fixed pool of
//! worker tasks. Submission never blocks the request that produced the
//! record: when the queue is full the job is dropped and counted.

use crate::metrics::{PROCESSING_DROPPED, PROCESSING_FAILURES};
use async_trait::async_trait;
use satchel_core::ContentRecord;
use satchel_core::config::ProcessingConfig;
use satchel_storage::{ObjectStore, StorageError};
use std::sync::Arc;
use tokio::sync::{Mutex, mpsc};
use tokio::task::JoinHandle;

/// Processing failures. Logged and counted, never surfaced to clients.
#[derive(Debug, thiserror::Error)]
pub enum ProcessingError {
    #[error("storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("integrity check failed: {0}")]
    Integrity(String),
}

/// A step run against every newly ingested record.
#[async_trait]
pub trait ContentProcessor: Send + Sync + 'static {
    /// Short name used in logs and metric labels.
    fn name(&self) -> &'static str;

    async fn process(&self, record: &ContentRecord) -> Result<(), ProcessingError>;
}

/// Re-reads the stored object and checks its size against the record.
pub struct IntegrityCheck {
    storage: Arc<dyn ObjectStore>,
}

impl IntegrityCheck {
    pub fn new(storage: Arc<dyn ObjectStore>) -> Self {
        Self { storage }
    }
}

#[async_trait]
impl ContentProcessor for IntegrityCheck {
    fn name(&self) -> &'static str {
        "integrity"
    }

    async fn process(&self, record: &ContentRecord) -> Result<(), ProcessingError> {
        let meta = self.storage.head(&record.path).await?;
        if meta.size != record.size_bytes {
            return Err(ProcessingError::Integrity(format!(
                "stored size {} differs from recorded size {}",
                meta.size, record.size_bytes
            )));
        }
        Ok(())
    }
}

/// Handle for submitting records to the worker pool.
///
/// Cloning shares the queue. Workers exit once every handle is dropped and
/// the queue has drained.
#[derive(Clone)]
pub struct ProcessingQueue {
    sender: mpsc::Sender<ContentRecord>,
}

impl ProcessingQueue {
    /// Spawn the worker pool. Must be called from within a Tokio runtime.
    pub fn start(
        config: &ProcessingConfig,
        processors: Vec<Arc<dyn ContentProcessor>>,
    ) -> (Self, Vec<JoinHandle<()>>) {
        let (sender, receiver) = mpsc::channel(config.queue_capacity.max(1));
        let receiver = Arc::new(Mutex::new(receiver));
        let processors: Arc<[Arc<dyn ContentProcessor>]> = processors.into();

        let handles = (0..config.workers.max(1))
            .map(|worker| {
                let receiver = receiver.clone();
                let processors = processors.clone();
                tokio::spawn(async move {
                    loop {
                        // Hold the lock only while waiting for the next job.
                        let next = receiver.lock().await.recv().await;
                        let Some(record) = next else {
                            tracing::debug!(worker, "Processing queue closed, worker exiting");
                            break;
                        };
                        run_processors(&processors, &record).await;
                    }
                })
            })
            .collect();

        (Self { sender }, handles)
    }

    /// Enqueue a record without waiting. Returns false if the job was dropped.
    pub fn submit(&self, record: ContentRecord) -> bool {
        match self.sender.try_send(record) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Full(record)) => {
                PROCESSING_DROPPED.inc();
                tracing::warn!(
                    content_id = %record.id,
                    "Processing queue full, dropping post-ingest job"
                );
                false
            }
            Err(mpsc::error::TrySendError::Closed(record)) => {
                PROCESSING_DROPPED.inc();
                tracing::warn!(
                    content_id = %record.id,
                    "Processing queue closed, dropping post-ingest job"
                );
                false
            }
        }
    }
}

async fn run_processors(processors: &[Arc<dyn ContentProcessor>], record: &ContentRecord) {
    for processor in processors {
        match processor.process(record).await {
            Ok(()) => {
                tracing::debug!(
                    content_id = %record.id,
                    processor = processor.name(),
                    "Post-ingest processing complete"
                );
            }
            Err(e) => {
                PROCESSING_FAILURES
                    .with_label_values(&[processor.name()])
                    .inc();
                tracing::warn!(
                    content_id = %record.id,
                    processor = processor.name(),
                    error = %e,
                    "Post-ingest processing failed"
                );
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;
    use satchel_core::{ContentId, Principal};
    use satchel_storage::FilesystemBackend;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use time::OffsetDateTime;

    fn record(path: &str, size_bytes: u64) -> ContentRecord {
        ContentRecord {
            id: ContentId::new(),
            owner: Principal::new("u1").unwrap(),
            original_name: "a.txt".to_string(),
            stored_name: path.trim_start_matches("content/").to_string(),
            mime_type: "text/plain".to_string(),
            size_bytes,
            path: path.to_string(),
            created_at: OffsetDateTime::now_utc(),
            expires_at: None,
        }
    }

    struct Counting(Arc<AtomicUsize>);

    #[async_trait]
    impl ContentProcessor for Counting {
        fn name(&self) -> &'static str {
            "counting"
        }

        async fn process(&self, _record: &ContentRecord) -> Result<(), ProcessingError> {
            self.0.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_integrity_check_detects_size_drift() {
        let dir = tempfile::tempdir().unwrap();
        let storage: Arc<dyn ObjectStore> =
            Arc::new(FilesystemBackend::new(dir.path()).await.unwrap());
        storage
            .put("content/x-a.txt", Bytes::from_static(b"hello"))
            .await
            .unwrap();

        let check = IntegrityCheck::new(storage);
        check.process(&record("content/x-a.txt", 5)).await.unwrap();
        assert!(matches!(
            check.process(&record("content/x-a.txt", 6)).await,
            Err(ProcessingError::Integrity(_))
        ));
        assert!(matches!(
            check.process(&record("content/missing", 1)).await,
            Err(ProcessingError::Storage(_))
        ));
    }

    #[tokio::test]
    async fn test_workers_drain_queue_and_exit() {
        let seen = Arc::new(AtomicUsize::new(0));
        let config = ProcessingConfig {
            workers: 2,
            queue_capacity: 8,
        };
        let processors: Vec<Arc<dyn ContentProcessor>> = vec![Arc::new(Counting(seen.clone()))];
        let (queue, handles) = ProcessingQueue::start(&config, processors);

        for _ in 0..5 {
            assert!(queue.submit(record("content/x", 1)));
        }
        drop(queue);
        for handle in handles {
            handle.await.unwrap();
        }
        assert_eq!(seen.load(Ordering::SeqCst), 5);
    }

    #[tokio::test]
    async fn test_submit_drops_when_full() {
        let (sender, _receiver) = mpsc::channel(1);
        let queue = ProcessingQueue { sender };

        assert!(queue.submit(record("content/x", 1)));
        assert!(!queue.submit(record("content/y", 1)));
    }
}
