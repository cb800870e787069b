//! Batch/job metrics: atomic cumulative counters plus the current batch's
//! phase timeline, combined into one serialisable snapshot for the status
//! endpoint.

use crate::cache::CacheStats;
use serde::Serialize;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::RwLock;
use std::time::{Duration, Instant};
use tracing::{error, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum JobStatus {
    Idle,
    Starting,
    Running,
    Stopping,
    Stopped,
    Error,
    Completed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum BatchPhase {
    Idle,
    #[serde(rename = "Pre-fetch")]
    PreFetch,
    Storage,
    #[serde(rename = "Cache Update")]
    CacheUpdate,
    Completed,
}

#[derive(Debug)]
struct JobState {
    status: JobStatus,
    first_started: Option<Instant>,
    job_started: Option<Instant>,
    job_ended: Option<Instant>,

    batch_number: u64,
    current_block_number: u64,
    batch_size: u64,
    phase: BatchPhase,
    batch_started: Option<Instant>,
    batch_ended: Option<Instant>,

    prefetch_started: Option<Instant>,
    prefetch_ended: Option<Instant>,
    storage_started: Option<Instant>,
    storage_ended: Option<Instant>,
    cache_update_started: Option<Instant>,
    cache_update_ended: Option<Instant>,

    last_prefetch: Option<Duration>,
    last_storage: Option<Duration>,
    last_cache_update: Option<Duration>,
    last_error: Option<String>,
}

impl JobState {
    fn new() -> Self {
        Self {
            status: JobStatus::Idle,
            first_started: None,
            job_started: None,
            job_ended: None,
            batch_number: 0,
            current_block_number: 0,
            batch_size: 0,
            phase: BatchPhase::Idle,
            batch_started: None,
            batch_ended: None,
            prefetch_started: None,
            prefetch_ended: None,
            storage_started: None,
            storage_ended: None,
            cache_update_started: None,
            cache_update_ended: None,
            last_prefetch: None,
            last_storage: None,
            last_cache_update: None,
            last_error: None,
        }
    }
}

/// Phase start/end instants of the current (or last) batch, for ordering
/// checks and the end-of-batch log line.
#[derive(Debug, Clone, Copy)]
pub struct PhaseTimeline {
    pub prefetch_started: Option<Instant>,
    pub prefetch_ended: Option<Instant>,
    pub storage_started: Option<Instant>,
    pub storage_ended: Option<Instant>,
    pub cache_update_started: Option<Instant>,
    pub cache_update_ended: Option<Instant>,
}

#[derive(Debug, Clone, Serialize)]
pub struct MetricsSnapshot {
    pub job_status: JobStatus,
    pub total_job_duration: Option<String>,
    pub last_error: Option<String>,

    pub current_batch_number: u64,
    pub current_block_number: u64,
    pub current_batch_size: u64,
    pub current_batch_phase: BatchPhase,
    pub current_batch_duration: Option<String>,

    pub last_prefetch_duration: Option<String>,
    pub last_storage_duration: Option<String>,
    pub last_cache_update_duration: Option<String>,

    pub total_blocks_processed: u64,
    pub total_addresses_found: u64,
    pub total_batches_completed: u64,
    pub total_failed_blocks: u64,
    pub consecutive_failures: u32,

    pub average_batch_duration: Option<String>,
    pub blocks_per_second: Option<String>,
    pub addresses_per_second: Option<String>,
    pub estimated_time_remaining: Option<String>,

    pub cache_hit_rate_percent: u32,
    pub cache: CacheStats,
}

pub struct BatchMetrics {
    total_blocks_processed: AtomicU64,
    total_addresses_found: AtomicU64,
    total_failed_blocks: AtomicU64,
    consecutive_failures: AtomicU32,
    total_batches_completed: AtomicU64,
    total_batch_duration_ms: AtomicU64,
    state: RwLock<JobState>,
}

impl Default for BatchMetrics {
    fn default() -> Self {
        Self::new()
    }
}

impl BatchMetrics {
    pub fn new() -> Self {
        Self {
            total_blocks_processed: AtomicU64::new(0),
            total_addresses_found: AtomicU64::new(0),
            total_failed_blocks: AtomicU64::new(0),
            consecutive_failures: AtomicU32::new(0),
            total_batches_completed: AtomicU64::new(0),
            total_batch_duration_ms: AtomicU64::new(0),
            state: RwLock::new(JobState::new()),
        }
    }

    pub fn is_job_running(&self) -> bool {
        let state = self.state.read().expect("metrics lock poisoned");
        matches!(state.status, JobStatus::Starting | JobStatus::Running)
    }

    pub fn job_status(&self) -> JobStatus {
        self.state.read().expect("metrics lock poisoned").status
    }

    /// Marks the start of one batch run and resets its phase timeline.
    pub fn start_batch(&self, start_block: u64, batch_size: u64) {
        let mut state = self.state.write().expect("metrics lock poisoned");
        let now = Instant::now();
        state.status = JobStatus::Starting;
        state.first_started.get_or_insert(now);
        state.job_started = Some(now);
        state.job_ended = None;
        state.batch_number += 1;
        state.current_block_number = start_block;
        state.batch_size = batch_size;
        state.batch_started = Some(now);
        state.batch_ended = None;
        state.prefetch_started = None;
        state.prefetch_ended = None;
        state.storage_started = None;
        state.storage_ended = None;
        state.cache_update_started = None;
        state.cache_update_ended = None;
        state.last_error = None;
        info!(
            "Batch #{} started: processing {} blocks starting from {}",
            state.batch_number, batch_size, start_block
        );
        state.status = JobStatus::Running;
    }

    pub fn begin_prefetch_phase(&self) {
        let mut state = self.state.write().expect("metrics lock poisoned");
        state.phase = BatchPhase::PreFetch;
        state.prefetch_started = Some(Instant::now());
        info!("Batch #{}: pre-fetch phase started", state.batch_number);
    }

    pub fn complete_prefetch_phase(&self) {
        let mut state = self.state.write().expect("metrics lock poisoned");
        let now = Instant::now();
        state.prefetch_ended = Some(now);
        state.last_prefetch = state.prefetch_started.map(|s| now - s);
        info!(
            "Batch #{}: pre-fetch phase completed in {}",
            state.batch_number,
            format_opt_duration(state.last_prefetch)
        );
    }

    pub fn begin_storage_phase(&self) {
        let mut state = self.state.write().expect("metrics lock poisoned");
        state.phase = BatchPhase::Storage;
        state.storage_started = Some(Instant::now());
        info!("Batch #{}: storage phase started", state.batch_number);
    }

    pub fn complete_storage_phase(&self) {
        let mut state = self.state.write().expect("metrics lock poisoned");
        let now = Instant::now();
        state.storage_ended = Some(now);
        state.last_storage = state.storage_started.map(|s| now - s);
        info!(
            "Batch #{}: storage phase completed in {}",
            state.batch_number,
            format_opt_duration(state.last_storage)
        );
    }

    pub fn begin_cache_update_phase(&self) {
        let mut state = self.state.write().expect("metrics lock poisoned");
        state.phase = BatchPhase::CacheUpdate;
        state.cache_update_started = Some(Instant::now());
        info!("Batch #{}: cache update phase started", state.batch_number);
    }

    pub fn complete_cache_update_phase(&self) {
        let mut state = self.state.write().expect("metrics lock poisoned");
        let now = Instant::now();
        state.cache_update_ended = Some(now);
        state.last_cache_update = state.cache_update_started.map(|s| now - s);
        info!(
            "Batch #{}: cache update phase completed in {}",
            state.batch_number,
            format_opt_duration(state.last_cache_update)
        );
    }

    pub fn complete_batch(&self) {
        let mut state = self.state.write().expect("metrics lock poisoned");
        let now = Instant::now();
        state.phase = BatchPhase::Completed;
        state.batch_ended = Some(now);
        if let Some(started) = state.batch_started {
            self.total_batch_duration_ms
                .fetch_add((now - started).as_millis() as u64, Ordering::Relaxed);
        }
        self.total_batches_completed.fetch_add(1, Ordering::Relaxed);
        info!(
            "Batch #{} completed in {} (pre-fetch: {}, storage: {}, cache: {})",
            state.batch_number,
            format_opt_duration(state.batch_started.map(|s| now - s)),
            format_opt_duration(state.last_prefetch),
            format_opt_duration(state.last_storage),
            format_opt_duration(state.last_cache_update)
        );
    }

    pub fn complete_job(&self) {
        let mut state = self.state.write().expect("metrics lock poisoned");
        state.status = JobStatus::Completed;
        state.job_ended = Some(Instant::now());
        info!(
            "Batch job completed. Processed {} blocks, found {} addresses, completed {} batches",
            self.total_blocks_processed.load(Ordering::Relaxed),
            self.total_addresses_found.load(Ordering::Relaxed),
            self.total_batches_completed.load(Ordering::Relaxed)
        );
    }

    pub fn stop_job(&self) {
        let mut state = self.state.write().expect("metrics lock poisoned");
        state.status = JobStatus::Stopping;
        state.job_ended = Some(Instant::now());
        info!(
            "Batch job stopped, next block to process: {}",
            state.current_block_number
        );
        state.status = JobStatus::Stopped;
    }

    pub fn error_job(&self, message: &str) {
        let mut state = self.state.write().expect("metrics lock poisoned");
        state.status = JobStatus::Error;
        state.job_ended = Some(Instant::now());
        state.last_error = Some(message.to_string());
        error!("Batch job encountered error: {}", message);
    }

    pub fn record_block_processed(&self, block_number: u64, address_count: usize) {
        self.total_blocks_processed.fetch_add(1, Ordering::Relaxed);
        self.total_addresses_found
            .fetch_add(address_count as u64, Ordering::Relaxed);
        self.consecutive_failures.store(0, Ordering::Relaxed);
        let mut state = self.state.write().expect("metrics lock poisoned");
        state.current_block_number = block_number + 1;
    }

    pub fn record_block_failed(&self, block_number: u64, message: &str) {
        self.total_failed_blocks.fetch_add(1, Ordering::Relaxed);
        let streak = self.consecutive_failures.fetch_add(1, Ordering::Relaxed) + 1;
        warn!(
            "Block {} failed: {}. Consecutive failures: {}",
            block_number, message, streak
        );
        let mut state = self.state.write().expect("metrics lock poisoned");
        state.current_block_number = block_number + 1;
    }

    pub fn total_failed_blocks(&self) -> u64 {
        self.total_failed_blocks.load(Ordering::Relaxed)
    }

    pub fn total_blocks_processed(&self) -> u64 {
        self.total_blocks_processed.load(Ordering::Relaxed)
    }

    pub fn total_addresses_found(&self) -> u64 {
        self.total_addresses_found.load(Ordering::Relaxed)
    }

    pub fn phase_timeline(&self) -> PhaseTimeline {
        let state = self.state.read().expect("metrics lock poisoned");
        PhaseTimeline {
            prefetch_started: state.prefetch_started,
            prefetch_ended: state.prefetch_ended,
            storage_started: state.storage_started,
            storage_ended: state.storage_ended,
            cache_update_started: state.cache_update_started,
            cache_update_ended: state.cache_update_ended,
        }
    }

    pub fn snapshot(&self, cache: CacheStats) -> MetricsSnapshot {
        let state = self.state.read().expect("metrics lock poisoned");
        let now = Instant::now();

        let total_job_duration = state.first_started.map(|started| {
            let end = match state.status {
                JobStatus::Running | JobStatus::Starting => now,
                _ => state.job_ended.unwrap_or(now),
            };
            format_duration(end - started)
        });

        let current_batch_duration = state.batch_started.map(|started| {
            let end = state.batch_ended.unwrap_or(now);
            format_duration(end - started)
        });

        let completed = self.total_batches_completed.load(Ordering::Relaxed);
        let total_batch_ms = self.total_batch_duration_ms.load(Ordering::Relaxed);
        let average_batch_duration = (completed > 0).then(|| {
            format_duration(Duration::from_millis(total_batch_ms / completed))
        });

        let blocks = self.total_blocks_processed.load(Ordering::Relaxed);
        let addresses = self.total_addresses_found.load(Ordering::Relaxed);
        let (blocks_per_second, addresses_per_second) = match state.first_started {
            Some(started) if blocks > 0 => {
                let secs = (now - started).as_secs_f64().max(1.0);
                (
                    Some(format!("{:.2} blocks/sec", blocks as f64 / secs)),
                    Some(format!("{:.1} addresses/sec", addresses as f64 / secs)),
                )
            }
            _ => (None, None),
        };

        let in_flight = matches!(
            state.phase,
            BatchPhase::PreFetch | BatchPhase::Storage | BatchPhase::CacheUpdate
        );
        let estimated_time_remaining = match (in_flight, completed, state.batch_started) {
            (true, c, Some(started)) if c > 0 => {
                let avg_ms = total_batch_ms / c;
                let elapsed_ms = (now - started).as_millis() as u64;
                Some(format_duration(Duration::from_millis(
                    avg_ms.saturating_sub(elapsed_ms),
                )))
            }
            _ => None,
        };

        MetricsSnapshot {
            job_status: state.status,
            total_job_duration,
            last_error: state.last_error.clone(),
            current_batch_number: state.batch_number,
            current_block_number: state.current_block_number,
            current_batch_size: state.batch_size,
            current_batch_phase: state.phase,
            current_batch_duration,
            last_prefetch_duration: state.last_prefetch.map(format_duration),
            last_storage_duration: state.last_storage.map(format_duration),
            last_cache_update_duration: state.last_cache_update.map(format_duration),
            total_blocks_processed: blocks,
            total_addresses_found: addresses,
            total_batches_completed: completed,
            total_failed_blocks: self.total_failed_blocks.load(Ordering::Relaxed),
            consecutive_failures: self.consecutive_failures.load(Ordering::Relaxed),
            average_batch_duration,
            blocks_per_second,
            addresses_per_second,
            estimated_time_remaining,
            cache_hit_rate_percent: cache.hit_rate_percent(),
            cache,
        }
    }
}

fn format_duration(duration: Duration) -> String {
    let ms = duration.as_millis();
    if ms < 1000 {
        return format!("{}ms", ms);
    }
    let seconds = duration.as_secs();
    if seconds < 60 {
        format!("{}s", seconds)
    } else if seconds < 3600 {
        format!("{}m {}s", seconds / 60, seconds % 60)
    } else {
        format!("{}h {}m {}s", seconds / 3600, (seconds % 3600) / 60, seconds % 60)
    }
}

fn format_opt_duration(duration: Option<Duration>) -> String {
    duration.map(format_duration).unwrap_or_else(|| "-".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn formats_durations_human_readable() {
        assert_eq!(format_duration(Duration::from_millis(250)), "250ms");
        assert_eq!(format_duration(Duration::from_secs(59)), "59s");
        assert_eq!(format_duration(Duration::from_secs(61)), "1m 1s");
        assert_eq!(format_duration(Duration::from_secs(3723)), "1h 2m 3s");
    }

    #[test]
    fn consecutive_failures_reset_on_success() {
        let metrics = BatchMetrics::new();
        metrics.start_batch(10, 5);
        metrics.record_block_failed(10, "timeout");
        metrics.record_block_failed(11, "timeout");
        let cache = crate::cache::AddressCache::new(Default::default());
        assert_eq!(metrics.snapshot(cache.stats_snapshot()).consecutive_failures, 2);

        metrics.record_block_processed(12, 3);
        let snap = metrics.snapshot(cache.stats_snapshot());
        assert_eq!(snap.consecutive_failures, 0);
        assert_eq!(snap.total_failed_blocks, 2);
        assert_eq!(snap.total_blocks_processed, 1);
        assert_eq!(snap.total_addresses_found, 3);
        assert_eq!(snap.current_block_number, 13);
    }

    #[test]
    fn batch_lifecycle_transitions_status() {
        let metrics = BatchMetrics::new();
        assert!(!metrics.is_job_running());

        metrics.start_batch(0, 10);
        assert!(metrics.is_job_running());

        metrics.begin_prefetch_phase();
        metrics.complete_prefetch_phase();
        metrics.begin_storage_phase();
        metrics.complete_storage_phase();
        metrics.begin_cache_update_phase();
        metrics.complete_cache_update_phase();
        metrics.complete_batch();
        metrics.complete_job();

        assert!(!metrics.is_job_running());
        assert_eq!(metrics.job_status(), JobStatus::Completed);

        let timeline = metrics.phase_timeline();
        let prefetch_end = timeline.prefetch_ended.unwrap();
        let storage_start = timeline.storage_started.unwrap();
        let cache_start = timeline.cache_update_started.unwrap();
        assert!(prefetch_end <= storage_start);
        assert!(timeline.storage_ended.unwrap() <= cache_start);
    }
}
