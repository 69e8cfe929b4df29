//! Expiry sweeper.
//!
//! A timer-driven background task that removes expired content from both the
//! store and the index. Each candidate is handled independently: the stored
//! object is deleted first, then its index row. A failure on either side is
//! logged and counted, and the candidate is left for the next cycle.
//!
//! The sweeper never holds a lock across a batch. Requests racing a deletion
//! observe either the record or a not-found, never a half-deleted pair that
//! crashes them.

use crate::metrics::{
    ORPHANS_DELETED, SWEEP_BYTES_RECLAIMED, SWEEP_CYCLES, SWEEP_DELETED, SWEEP_ERRORS,
};
use satchel_core::{CONTENT_PREFIX, ContentRecord};
use satchel_core::config::SweeperConfig;
use satchel_metadata::MetadataStore;
use satchel_storage::ObjectStore;
use std::sync::Arc;
use time::OffsetDateTime;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use uuid::Uuid;

/// What the sweeper is doing right now.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SweepState {
    Idle,
    Scanning,
    Deleting,
}

impl SweepState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Scanning => "scanning",
            Self::Deleting => "deleting",
        }
    }
}

/// Outcome of one sweep cycle.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct SweepStats {
    /// Expired candidates examined.
    pub scanned: u64,
    /// Candidates removed from both the store and the index.
    pub deleted: u64,
    /// Bytes reclaimed by those deletions.
    pub bytes_reclaimed: u64,
    /// Unindexed objects and stale partial uploads removed by reconciliation.
    pub orphans_deleted: u64,
    /// Storage or index failures; the affected candidates are retried next cycle.
    pub errors: u64,
}

/// Removes expired content on a fixed interval.
pub struct ExpirySweeper {
    storage: Arc<dyn ObjectStore>,
    metadata: Arc<dyn MetadataStore>,
    config: SweeperConfig,
    state: watch::Sender<SweepState>,
}

impl ExpirySweeper {
    pub fn new(
        storage: Arc<dyn ObjectStore>,
        metadata: Arc<dyn MetadataStore>,
        config: SweeperConfig,
    ) -> Self {
        let (state, _) = watch::channel(SweepState::Idle);
        Self {
            storage,
            metadata,
            config,
            state,
        }
    }

    /// The current state.
    pub fn state(&self) -> SweepState {
        *self.state.borrow()
    }

    /// Follow state transitions.
    pub fn subscribe(&self) -> watch::Receiver<SweepState> {
        self.state.subscribe()
    }

    /// Run one full cycle against `now`.
    pub async fn run_cycle(&self, now: OffsetDateTime) -> SweepStats {
        self.sweep(now, None).await
    }

    /// Spawn the timer loop.
    ///
    /// The first cycle runs one interval after startup. Setting the shutdown
    /// channel to `true` (or dropping its sender) stops the loop; a cycle in
    /// progress finishes the candidate in hand and stops before the next one.
    pub fn spawn(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) -> JoinHandle<()> {
        tokio::spawn(async move {
            let period = self.config.interval();
            let start = Instant::now();
            let mut ticker =
                tokio::time::interval_at(start.checked_add(period).unwrap_or(start), period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            tracing::info!(
                interval_secs = period.as_secs(),
                batch_size = self.config.batch_size,
                reconcile_orphans = self.config.reconcile_orphans,
                "Expiry sweeper started"
            );

            let stop = shutdown.clone();
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        self.sweep(OffsetDateTime::now_utc(), Some(&stop)).await;
                    }
                    changed = shutdown.changed() => {
                        if changed.is_err() || *shutdown.borrow() {
                            break;
                        }
                    }
                }
                if *shutdown.borrow() {
                    break;
                }
            }

            tracing::info!("Expiry sweeper stopped");
        })
    }

    #[tracing::instrument(skip(self, shutdown), fields(now = %now))]
    async fn sweep(
        &self,
        now: OffsetDateTime,
        shutdown: Option<&watch::Receiver<bool>>,
    ) -> SweepStats {
        let stopping = || shutdown.is_some_and(|rx| *rx.borrow());
        let mut stats = SweepStats::default();
        let mut cursor: Option<Uuid> = None;

        'pages: loop {
            self.state.send_replace(SweepState::Scanning);
            let page = match self
                .metadata
                .list_expired_content(now, cursor, self.config.batch_size)
                .await
            {
                Ok(page) => page,
                Err(e) => {
                    stats.errors += 1;
                    tracing::warn!(error = %e, "Failed to list expired content, ending cycle");
                    break;
                }
            };
            if page.is_empty() {
                break;
            }

            self.state.send_replace(SweepState::Deleting);
            let full_page = page.len() >= self.config.batch_size as usize;
            for row in page {
                if stopping() {
                    break 'pages;
                }
                cursor = Some(row.id);
                stats.scanned += 1;
                let record = match ContentRecord::try_from(row) {
                    Ok(record) => record,
                    Err(e) => {
                        stats.errors += 1;
                        tracing::warn!(error = %e, "Skipping unreadable expired record");
                        continue;
                    }
                };
                if !record.is_expired_at(now) {
                    continue;
                }
                self.delete_candidate(&record, &mut stats).await;
            }
            if !full_page {
                break;
            }
        }

        if self.config.reconcile_orphans && !stopping() {
            self.state.send_replace(SweepState::Scanning);
            self.reconcile_orphans(now, &mut stats).await;
        }

        self.state.send_replace(SweepState::Idle);

        SWEEP_CYCLES.inc();
        SWEEP_DELETED.inc_by(stats.deleted);
        SWEEP_ERRORS.inc_by(stats.errors);
        SWEEP_BYTES_RECLAIMED.inc_by(stats.bytes_reclaimed);
        ORPHANS_DELETED.inc_by(stats.orphans_deleted);

        if stats.scanned > 0 || stats.orphans_deleted > 0 || stats.errors > 0 {
            tracing::info!(
                scanned = stats.scanned,
                deleted = stats.deleted,
                bytes_reclaimed = stats.bytes_reclaimed,
                orphans_deleted = stats.orphans_deleted,
                errors = stats.errors,
                "Expiry sweep complete"
            );
        } else {
            tracing::debug!("Expiry sweep found nothing to do");
        }

        stats
    }

    async fn delete_candidate(&self, record: &ContentRecord, stats: &mut SweepStats) {
        // Store first: a crash after this leaves an index row pointing at
        // nothing, which reads as not-found and is retried next cycle.
        match self.storage.delete(&record.path).await {
            Ok(()) => {}
            Err(e) if e.is_not_found() => {
                tracing::debug!(content_id = %record.id, "Expired object already absent from storage");
            }
            Err(e) => {
                stats.errors += 1;
                tracing::warn!(
                    content_id = %record.id,
                    key = %record.path,
                    error = %e,
                    "Failed to delete expired object, will retry next cycle"
                );
                return;
            }
        }

        match self.metadata.delete_content(*record.id.as_uuid()).await {
            Ok(true) => {
                stats.deleted += 1;
                stats.bytes_reclaimed += record.size_bytes;
                tracing::debug!(content_id = %record.id, "Expired content deleted");
            }
            Ok(false) => {
                tracing::debug!(content_id = %record.id, "Expired record already removed");
            }
            Err(e) => {
                stats.errors += 1;
                tracing::warn!(
                    content_id = %record.id,
                    error = %e,
                    "Failed to delete expired record, will retry next cycle"
                );
            }
        }
    }

    /// Delete stored objects no record points at, and abandoned partial
    /// uploads, once they are past the grace period.
    async fn reconcile_orphans(&self, now: OffsetDateTime, stats: &mut SweepStats) {
        let grace = self.config.orphan_grace();
        match self.storage.remove_stale_partials(now - grace).await {
            Ok(removed) => {
                for meta in removed {
                    stats.orphans_deleted += 1;
                    stats.bytes_reclaimed += meta.size;
                }
            }
            Err(e) => {
                stats.errors += 1;
                tracing::warn!(error = %e, "Failed to remove stale partial uploads");
            }
        }

        let keys = match self.storage.list(CONTENT_PREFIX).await {
            Ok(keys) => keys,
            Err(e) => {
                stats.errors += 1;
                tracing::warn!(error = %e, "Failed to list stored content for reconciliation");
                return;
            }
        };

        for key in keys {
            match self.metadata.content_path_exists(&key).await {
                Ok(true) => continue,
                Ok(false) => {}
                Err(e) => {
                    stats.errors += 1;
                    tracing::warn!(key = %key, error = %e, "Failed to check index for stored object");
                    continue;
                }
            }

            let meta = match self.storage.head(&key).await {
                Ok(meta) => meta,
                Err(e) if e.is_not_found() => continue,
                Err(e) => {
                    stats.errors += 1;
                    tracing::warn!(key = %key, error = %e, "Failed to stat unindexed object");
                    continue;
                }
            };
            // Without a timestamp the object's age cannot be proven; leave it.
            let Some(modified) = meta.last_modified else {
                continue;
            };
            if now - modified < grace {
                continue;
            }

            match self.storage.delete(&key).await {
                Ok(()) => {
                    stats.orphans_deleted += 1;
                    stats.bytes_reclaimed += meta.size;
                    tracing::info!(key = %key, size = meta.size, "Removed unindexed object");
                }
                Err(e) if e.is_not_found() => {}
                Err(e) => {
                    stats.errors += 1;
                    tracing::warn!(key = %key, error = %e, "Failed to remove unindexed object");
                }
            }
        }
    }
}
