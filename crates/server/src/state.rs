//! Application state shared across handlers.

use crate::ingest::IngestionPipeline;
use crate::processing::{ContentProcessor, IntegrityCheck, ProcessingQueue};
use crate::retrieval::RetrievalGateway;
use satchel_core::config::AppConfig;
use satchel_metadata::MetadataStore;
use satchel_storage::ObjectStore;
use std::sync::Arc;

/// Application state.
///
/// Store handles are passed in at construction and shared with the
/// components built from them; nothing is reached through globals.
#[derive(Clone)]
pub struct AppState {
    /// Application configuration.
    pub config: Arc<AppConfig>,
    /// Object storage backend.
    pub storage: Arc<dyn ObjectStore>,
    /// Metadata store.
    pub metadata: Arc<dyn MetadataStore>,
    /// Upload ingestion.
    pub ingest: Arc<IngestionPipeline>,
    /// Owner-scoped reads.
    pub retrieval: Arc<RetrievalGateway>,
}

impl AppState {
    /// Create the application state and start the post-ingest worker pool.
    ///
    /// Must be called from within a Tokio runtime. The workers exit once the
    /// last clone of the state is dropped.
    pub fn new(
        config: AppConfig,
        storage: Arc<dyn ObjectStore>,
        metadata: Arc<dyn MetadataStore>,
    ) -> Self {
        let processors: Vec<Arc<dyn ContentProcessor>> =
            vec![Arc::new(IntegrityCheck::new(storage.clone()))];
        let (processing, _workers) = ProcessingQueue::start(&config.processing, processors);

        let ingest = IngestionPipeline::new(
            storage.clone(),
            metadata.clone(),
            config.ingest.clone(),
            Some(processing),
        );
        let retrieval = RetrievalGateway::new(storage.clone(), metadata.clone(), config.server.clone());

        Self {
            config: Arc::new(config),
            storage,
            metadata,
            ingest: Arc::new(ingest),
            retrieval: Arc::new(retrieval),
        }
    }
}
