//! HTTP server for the satchel content locker.
//!
//! This crate provides:
//! - The ingestion pipeline (sniff, validate, store, index)
//! - The owner-scoped retrieval gateway
//! - The expiry sweeper and post-ingest processing queue
//! - The axum router, bearer-token authentication and metrics

pub mod auth;
pub mod bootstrap;
pub mod error;
pub mod handlers;
pub mod ingest;
pub mod metrics;
pub mod processing;
pub mod retrieval;
pub mod routes;
pub mod state;
pub mod sweeper;

pub use auth::TraceId;
pub use error::ApiError;
pub use ingest::{IngestError, IngestRequest, IngestionPipeline};
pub use retrieval::{RetrievalError, RetrievalGateway};
pub use routes::create_router;
pub use state::AppState;
pub use sweeper::{ExpirySweeper, SweepState, SweepStats};
