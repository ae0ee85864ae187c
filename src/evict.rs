//! TTL eviction loop.
//!
//! Runs one pass at startup and then on a fixed interval. Each pass drains
//! expired cache entries in bounded batches: blobs are deleted best-effort,
//! artifact rows are bulk-deleted (cascading to their cache entries), and
//! entries whose artifact has vanished are removed directly.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use serde::Serialize;
use uuid::Uuid;

use crate::error::Result;
use crate::meta::MetaStore;
use crate::storage::Blobs;

/// Result of a single eviction pass.
#[derive(Debug, Default, Serialize)]
pub struct EvictionResult {
    pub entries_scanned: u64,
    pub artifacts_removed: u64,
    pub orphan_entries_removed: u64,
    pub blob_delete_errors: u64,
}

/// Periodic cache eviction over the metadata and blob stores.
pub struct Evictor {
    meta: Arc<dyn MetaStore>,
    blobs: Arc<dyn Blobs>,
    interval: Duration,
    batch_size: i64,
}

impl Evictor {
    pub fn new(
        meta: Arc<dyn MetaStore>,
        blobs: Arc<dyn Blobs>,
        interval: Duration,
        batch_size: i64,
    ) -> Self {
        Self {
            meta,
            blobs,
            interval,
            batch_size,
        }
    }

    /// Run forever: one pass immediately, then one per interval tick.
    pub async fn run(self) {
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            ticker.tick().await;
            match self.run_pass().await {
                Ok(result) if result.entries_scanned > 0 => {
                    tracing::info!(
                        scanned = result.entries_scanned,
                        removed = result.artifacts_removed,
                        orphans = result.orphan_entries_removed,
                        blob_errors = result.blob_delete_errors,
                        "Eviction pass complete"
                    );
                }
                Ok(_) => {}
                Err(e) => tracing::warn!(error = %e, "Eviction pass failed"),
            }
        }
    }

    /// One full pass: loop over batches until a short batch signals the end.
    pub async fn run_pass(&self) -> Result<EvictionResult> {
        let mut result = EvictionResult::default();

        loop {
            let now = Utc::now();
            let batch = self.meta.expired_cache_entries(now, self.batch_size).await?;
            let batch_len = batch.len() as i64;
            result.entries_scanned += batch.len() as u64;

            if batch.is_empty() {
                break;
            }

            let mut artifact_ids: Vec<Uuid> = Vec::new();
            let mut orphan_keys: Vec<String> = Vec::new();

            for entry in &batch {
                match self
                    .meta
                    .artifact_id_by_storage_key(entry.repository_id, &entry.storage_key)
                    .await?
                {
                    Some(id) => artifact_ids.push(id),
                    None => orphan_keys.push(entry.key.clone()),
                }

                // Blob deletion is best-effort; a failure leaves an orphan
                // blob behind without blocking metadata cleanup.
                if let Err(e) = self.blobs.delete(&entry.storage_key).await {
                    tracing::warn!(
                        storage_key = %entry.storage_key,
                        error = %e,
                        "Failed to delete expired blob"
                    );
                    result.blob_delete_errors += 1;
                }
            }

            if !artifact_ids.is_empty() {
                // Cascade removes the cache entries alongside the rows.
                result.artifacts_removed +=
                    self.meta.delete_artifacts_by_ids(&artifact_ids).await?;
            }

            if !orphan_keys.is_empty() {
                result.orphan_entries_removed +=
                    self.meta.delete_cache_entries(&orphan_keys).await?;
            }

            if batch_len < self.batch_size {
                break;
            }
        }

        Ok(result)
    }
}
