//! Two-phase batch processor: a concurrent pre-fetch phase collects the
//! address sets of a planned block range, then a serial storage phase
//! filters them through the cache and bulk-writes the remainder. At most
//! one batch runs at a time process-wide.

use crate::blockchain::client::{BlockFetcher, RpcError};
use crate::cache::AddressCache;
use crate::config::Config;
use crate::db::store;
use crate::metrics::{BatchMetrics, MetricsSnapshot};
use crate::rate_limit::RateLimiter;
use dashmap::DashMap;
use futures::stream::{self, StreamExt};
use sqlx::SqlitePool;
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, error, info, warn};

#[derive(Error, Debug)]
pub enum BatchError {
    #[error("chain info not found for chain id {0}")]
    ChainNotFound(String),

    /// The bulk address upsert failed; the batch aborts and the high-water
    /// mark stays put.
    #[error("storage failure: {0}")]
    Storage(#[from] sqlx::Error),
}

/// How one `process_batch` invocation ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BatchOutcome {
    Completed,
    /// A stop request was observed at a phase boundary.
    Stopped,
    /// Another batch held the single-flight latch; nothing was done.
    Skipped,
}

/// Releases the single-flight latch on every exit path, including panics
/// and early returns between acquisition and the normal release.
struct LatchGuard<'a>(&'a AtomicBool);

impl Drop for LatchGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

pub struct BatchProcessor {
    config: Config,
    pool: SqlitePool,
    fetcher: Arc<dyn BlockFetcher>,
    limiter: Arc<RateLimiter>,
    cache: Arc<AddressCache>,
    metrics: Arc<BatchMetrics>,
    running: AtomicBool,
    stop_requested: AtomicBool,
}

impl BatchProcessor {
    pub fn new(
        config: Config,
        pool: SqlitePool,
        fetcher: Arc<dyn BlockFetcher>,
        limiter: Arc<RateLimiter>,
        cache: Arc<AddressCache>,
        metrics: Arc<BatchMetrics>,
    ) -> Self {
        Self {
            config,
            pool,
            fetcher,
            limiter,
            cache,
            metrics,
            running: AtomicBool::new(false),
            stop_requested: AtomicBool::new(false),
        }
    }

    /// Runs at most one batch. Safe to invoke concurrently: callers beyond
    /// the first observe `Skipped` and return immediately.
    pub async fn process_batch(&self) -> Result<BatchOutcome, BatchError> {
        if self
            .running
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            warn!("Batch job already running, skipping this execution");
            return Ok(BatchOutcome::Skipped);
        }
        let _latch = LatchGuard(&self.running);
        self.stop_requested.store(false, Ordering::Release);

        let result = self.run_batch().await;
        if let Err(e) = &result {
            error!("Critical error in pre-fetch batch processing: {}", e);
            self.metrics.error_job(&e.to_string());
        }
        result
    }

    /// Sets the cooperative stop flag; it is observed at phase boundaries,
    /// so in-flight RPC calls finish within their own timeouts.
    pub fn request_stop(&self) {
        info!("Stop requested for pre-fetch batch processing");
        self.stop_requested.store(true, Ordering::Release);
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    pub fn metrics_snapshot(&self) -> MetricsSnapshot {
        self.metrics.snapshot(self.cache.stats_snapshot())
    }

    pub fn cache(&self) -> &AddressCache {
        &self.cache
    }

    async fn run_batch(&self) -> Result<BatchOutcome, BatchError> {
        let chain = store::load_chain_by_external_id(&self.pool, &self.config.chain_id)
            .await?
            .ok_or_else(|| BatchError::ChainNotFound(self.config.chain_id.clone()))?;

        let start_block = chain.next_block_number as u64;
        let batch_size = self.config.batch_size;
        info!(
            "Starting pre-fetch batch processing from block {} with batch size {}",
            start_block, batch_size
        );

        self.cache.reset_batch_counters();
        self.metrics.start_batch(start_block, batch_size);

        self.metrics.begin_prefetch_phase();
        let block_addresses = self.prefetch_phase(start_block, batch_size).await;
        self.metrics.complete_prefetch_phase();

        if self.stop_requested.load(Ordering::Acquire) {
            self.metrics.stop_job();
            return Ok(BatchOutcome::Stopped);
        }

        let misses = self.storage_phase(&block_addresses, chain.id).await?;

        self.metrics.begin_cache_update_phase();
        self.cache.add_all(&misses);
        for block_number in start_block..start_block + batch_size {
            let count = block_addresses
                .get(&block_number)
                .map(|set| set.len())
                .unwrap_or(0);
            self.metrics.record_block_processed(block_number, count);
        }
        self.metrics.complete_cache_update_phase();

        store::advance_high_water_mark(
            &self.pool,
            chain.id,
            (start_block + batch_size) as i64,
        )
        .await?;
        info!(
            "Updated next block number to {} for chain {}",
            start_block + batch_size,
            chain.chain_name
        );

        let stats = self.cache.stats_snapshot();
        info!(
            "Cache performance: size {}/{} ({}% full), hits {}, misses {}, skipped DB ops {}, hit rate {}%",
            stats.size,
            stats.max_size,
            stats.utilization_percent,
            stats.hits,
            stats.misses,
            stats.skipped_db_ops,
            stats.hit_rate_percent()
        );

        self.metrics.complete_batch();
        if self.stop_requested.load(Ordering::Acquire) {
            self.metrics.stop_job();
            Ok(BatchOutcome::Stopped)
        } else {
            self.metrics.complete_job();
            Ok(BatchOutcome::Completed)
        }
    }

    /// Fans the planned range out to `max_concurrent_rpc_calls` workers.
    /// Every worker takes a rate-limit token before touching the network.
    /// Returns the per-block address sets of the successful fetches.
    async fn prefetch_phase(
        &self,
        start_block: u64,
        batch_size: u64,
    ) -> DashMap<u64, HashSet<String>> {
        info!(
            "Starting pre-fetch phase for blocks {} to {}",
            start_block,
            start_block + batch_size - 1
        );

        let collected: DashMap<u64, HashSet<String>> = DashMap::new();

        stream::iter(start_block..start_block + batch_size)
            .map(|block_number| {
                let collected = &collected;
                async move {
                    self.limiter.acquire().await;
                    match self.fetcher.fetch_block(block_number).await {
                        Ok(block) => {
                            debug!(
                                "Block {} fetched: {} transactions, {} unique addresses",
                                block_number,
                                block.transaction_count,
                                block.addresses.len()
                            );
                            if !block.addresses.is_empty() {
                                collected.insert(block_number, block.addresses);
                            }
                        }
                        Err(e) => self.record_failure(block_number, &e).await,
                    }
                }
            })
            .buffer_unordered(self.config.max_concurrent_rpc_calls)
            .collect::<()>()
            .await;

        let unique: usize = collected.iter().map(|entry| entry.value().len()).sum();
        info!(
            "Pre-fetch phase completed: {} blocks with addresses, {} address entries collected",
            collected.len(),
            unique
        );

        collected
    }

    /// Serial database phase: cache-filter the union of all block sets and
    /// bulk-write the misses. An address-upsert failure is fatal to the
    /// batch; the caller leaves the high-water mark untouched.
    async fn storage_phase(
        &self,
        block_addresses: &DashMap<u64, HashSet<String>>,
        chain_row_id: i64,
    ) -> Result<HashSet<String>, BatchError> {
        self.metrics.begin_storage_phase();
        info!("Starting storage phase for {} blocks", block_addresses.len());

        let mut all_addresses: HashSet<String> = HashSet::new();
        for entry in block_addresses.iter() {
            all_addresses.extend(entry.value().iter().cloned());
        }
        info!(
            "Collected {} unique addresses across all blocks",
            all_addresses.len()
        );

        let mut misses = HashSet::new();
        for address in all_addresses {
            if !self.cache.check_and_boost(&address) {
                misses.insert(address);
            }
        }

        if !misses.is_empty() {
            store::tune_for_bulk(&self.pool).await;
            let result =
                store::upsert_addresses_and_links(&self.pool, &misses, chain_row_id).await;
            store::reset_tuning(&self.pool).await;
            result?;
        }

        self.metrics.complete_storage_phase();
        Ok(misses)
    }

    async fn record_failure(&self, block_number: u64, err: &RpcError) {
        error!("Failed to process block {}: {}", block_number, err);
        if let Err(log_err) = store::insert_failure_log(
            &self.pool,
            &self.config.chain_id,
            block_number,
            err.status_code(),
            &err.to_string(),
        )
        .await
        {
            error!("Failed to record failure log: {}", log_err);
        }
        self.metrics.record_block_failed(block_number, &err.to_string());
    }
}
