//! In-memory address cache used to suppress redundant upserts of hot
//! addresses. Maps wallet address to a decaying reference score; recency is
//! tracked in a separate LRU list so decay has a fallback when it cannot
//! free enough capacity on its own.

use crate::config::CacheConfig;
use dashmap::DashMap;
use serde::Serialize;
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicI64, AtomicU64, AtomicUsize, Ordering};
use std::sync::Mutex;
use tracing::{debug, info};

// Rough per-entry footprint beyond the key bytes: map bucket, score cell,
// recency index slot and String headers.
const ENTRY_OVERHEAD_BYTES: usize = 120;

pub struct AddressCache {
    config: CacheConfig,
    entries: DashMap<String, AtomicI64>,
    // Live keys always mirror the map; eviction from this order is what
    // lru_eviction_enabled gates. Touches are O(1).
    lru: Mutex<LruTracker>,
    key_bytes: AtomicUsize,

    // Per-batch counters, reset by reset_batch_counters().
    hits: AtomicU64,
    misses: AtomicU64,
    skipped_db_ops: AtomicU64,
}

#[derive(Debug, Clone, Serialize)]
pub struct CacheStats {
    pub size: usize,
    pub max_size: usize,
    pub hits: u64,
    pub misses: u64,
    pub skipped_db_ops: u64,
    pub utilization_percent: u32,
}

impl CacheStats {
    pub fn hit_rate_percent(&self) -> u32 {
        let lookups = self.hits + self.misses;
        if lookups == 0 {
            0
        } else {
            ((self.hits * 100) as f64 / lookups as f64).round() as u32
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct MemoryStats {
    pub estimated_used_mb: f64,
    pub budget_mb: u64,
    pub free_mb: f64,
    pub usage_percent: f64,
}

impl AddressCache {
    pub fn new(config: CacheConfig) -> Self {
        Self {
            config,
            entries: DashMap::new(),
            lru: Mutex::new(LruTracker::default()),
            key_bytes: AtomicUsize::new(0),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            skipped_db_ops: AtomicU64::new(0),
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.config.enabled
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// If the address is cached, boost its score, mark it recently used and
    /// report a hit (one skipped DB op). Otherwise report a miss.
    pub fn check_and_boost(&self, address: &str) -> bool {
        if !self.config.enabled {
            return false;
        }

        if let Some(score) = self.entries.get(address) {
            let boosted = score.fetch_add(self.config.default_value, Ordering::AcqRel)
                + self.config.default_value;
            drop(score);
            self.hits.fetch_add(1, Ordering::Relaxed);
            self.skipped_db_ops.fetch_add(1, Ordering::Relaxed);
            self.touch_lru(address);
            debug!("Address cache HIT {} -> {}", address, boosted);
            true
        } else {
            self.misses.fetch_add(1, Ordering::Relaxed);
            debug!("Address cache MISS {}", address);
            false
        }
    }

    /// Inserts a fresh entry with the default score. At capacity the cache
    /// first runs a decay pass; if that frees nothing, existing entries win
    /// and the insert is dropped.
    pub fn add_if_absent(&self, address: &str) {
        if !self.config.enabled {
            return;
        }

        if self.entries.len() >= self.config.max_size {
            self.decay_and_evict();
            if self.entries.len() >= self.config.max_size {
                return;
            }
        }

        let inserted = match self.entries.entry(address.to_string()) {
            dashmap::mapref::entry::Entry::Occupied(_) => false,
            dashmap::mapref::entry::Entry::Vacant(slot) => {
                slot.insert(AtomicI64::new(self.config.default_value));
                true
            }
        };

        if inserted {
            self.key_bytes.fetch_add(address.len(), Ordering::Relaxed);
            self.touch_lru(address);
        }
    }

    pub fn add_all(&self, addresses: &HashSet<String>) {
        if !self.config.enabled || addresses.is_empty() {
            return;
        }
        for address in addresses {
            self.add_if_absent(address);
        }
    }

    /// One decay sweep over every entry, then the LRU and memory-pressure
    /// fallbacks when the map is still at or over capacity.
    pub fn decay_and_evict(&self) {
        if !self.config.enabled {
            return;
        }

        let before = self.entries.len();

        let mut expired = Vec::new();
        for entry in self.entries.iter() {
            let after =
                entry.value().fetch_sub(self.config.decay_amount, Ordering::AcqRel)
                    - self.config.decay_amount;
            if after <= 0 {
                expired.push(entry.key().clone());
            }
        }
        for key in expired {
            if self
                .entries
                .remove_if(&key, |_, score| score.load(Ordering::Acquire) <= 0)
                .is_some()
            {
                self.key_bytes.fetch_sub(key.len(), Ordering::Relaxed);
                self.remove_from_lru(&key);
            }
        }

        if self.config.lru_eviction_enabled && self.entries.len() >= self.config.max_size {
            let to_evict =
                self.entries.len() - self.config.max_size + self.config.batch_eviction_size;
            self.evict_batch(to_evict);
        }

        if self.config.memory_check_enabled {
            self.shrink_under_memory_pressure();
        }

        info!(
            "Address cache decay: size {} -> {}",
            before,
            self.entries.len()
        );
    }

    /// Point-in-time view of size and per-batch hit/miss counters.
    pub fn stats_snapshot(&self) -> CacheStats {
        let size = self.entries.len();
        let max_size = self.config.max_size;
        CacheStats {
            size,
            max_size,
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            skipped_db_ops: self.skipped_db_ops.load(Ordering::Relaxed),
            utilization_percent: ((size * 100) as f64 / max_size as f64).round() as u32,
        }
    }

    /// Estimated footprint against the configured memory budget. Each key
    /// is held by the score map, the recency index and a queue slot.
    pub fn memory_stats(&self) -> MemoryStats {
        let key_bytes = self.key_bytes.load(Ordering::Relaxed);
        let estimated_bytes = key_bytes * 3 + self.entries.len() * ENTRY_OVERHEAD_BYTES;
        let estimated_used_mb = estimated_bytes as f64 / (1024.0 * 1024.0);
        let budget_mb = self.config.memory_budget_mb;
        MemoryStats {
            estimated_used_mb,
            budget_mb,
            free_mb: (budget_mb as f64 - estimated_used_mb).max(0.0),
            usage_percent: estimated_used_mb / budget_mb as f64 * 100.0,
        }
    }

    /// Zeroes hit/miss/skipped counters at batch boundaries. Entries and
    /// scores are untouched.
    pub fn reset_batch_counters(&self) {
        self.hits.store(0, Ordering::Relaxed);
        self.misses.store(0, Ordering::Relaxed);
        self.skipped_db_ops.store(0, Ordering::Relaxed);
    }

    fn touch_lru(&self, address: &str) {
        self.lru.lock().expect("lru lock poisoned").touch(address);
    }

    fn remove_from_lru(&self, address: &str) {
        self.lru.lock().expect("lru lock poisoned").remove(address);
    }

    fn evict_batch(&self, to_evict: usize) {
        let mut evicted = 0;
        while evicted < to_evict {
            let oldest = {
                let mut lru = self.lru.lock().expect("lru lock poisoned");
                lru.pop_oldest()
            };
            let Some(key) = oldest else { break };
            if let Some((removed, _)) = self.entries.remove(&key) {
                self.key_bytes.fetch_sub(removed.len(), Ordering::Relaxed);
                evicted += 1;
            }
        }

        if evicted > 0 {
            debug!("Batch evicted {} entries from cache", evicted);
        }
    }

    fn shrink_under_memory_pressure(&self) {
        let stats = self.memory_stats();
        let size = self.entries.len();
        if stats.usage_percent > self.config.target_memory_percent as f64
            && size > self.config.min_cache_size
        {
            let target_size = (size * 8 / 10).max(self.config.min_cache_size);
            let to_evict = size - target_size;
            if to_evict > 0 {
                self.evict_batch(to_evict);
                info!(
                    "Memory-based eviction: removed {} entries, estimated usage {:.1}%",
                    to_evict, stats.usage_percent
                );
            }
        }
    }

    #[cfg(test)]
    pub(crate) fn score_of(&self, address: &str) -> Option<i64> {
        self.entries
            .get(address)
            .map(|score| score.load(Ordering::Acquire))
    }

    #[cfg(test)]
    pub(crate) fn lru_keys(&self) -> Vec<String> {
        self.lru.lock().expect("lru lock poisoned").keys_in_order()
    }
}

/// Recency order with O(1) touches. A touch appends a fresh sequence
/// number and updates the side index; queue entries whose sequence no
/// longer matches the index are stale and get skipped on pop, or swept
/// out once they outnumber the live ones.
#[derive(Default)]
struct LruTracker {
    queue: VecDeque<(u64, String)>,
    live: HashMap<String, u64>,
    next_seq: u64,
}

impl LruTracker {
    fn touch(&mut self, key: &str) {
        self.next_seq += 1;
        let seq = self.next_seq;
        match self.live.get_mut(key) {
            Some(slot) => *slot = seq,
            None => {
                self.live.insert(key.to_string(), seq);
            }
        }
        self.queue.push_back((seq, key.to_string()));
        self.maybe_compact();
    }

    fn remove(&mut self, key: &str) {
        self.live.remove(key);
    }

    /// Oldest live key, skipping stale queue entries.
    fn pop_oldest(&mut self) -> Option<String> {
        while let Some((seq, key)) = self.queue.pop_front() {
            if self.live.get(&key) == Some(&seq) {
                self.live.remove(&key);
                return Some(key);
            }
        }
        None
    }

    fn maybe_compact(&mut self) {
        if self.queue.len() > self.live.len().saturating_mul(2).max(64) {
            let live = &self.live;
            self.queue.retain(|(seq, key)| live.get(key) == Some(seq));
        }
    }

    #[cfg(test)]
    fn keys_in_order(&self) -> Vec<String> {
        self.queue
            .iter()
            .filter(|(seq, key)| self.live.get(key) == Some(seq))
            .map(|(_, key)| key.clone())
            .collect()
    }
}
