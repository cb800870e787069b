//! Address score cache: decay eviction, LRU fallback, capacity bounds,
//! per-batch counters and the memory-pressure shrink rule.

use crate::cache::AddressCache;
use crate::config::CacheConfig;
use crate::tests::test_cache_config;

#[test]
fn miss_then_hit_counts_and_boosts() {
    let cache = AddressCache::new(test_cache_config());

    assert!(!cache.check_and_boost("0xA"), "empty cache must miss");
    cache.add_if_absent("0xA");
    assert_eq!(cache.score_of("0xA"), Some(50));

    assert!(cache.check_and_boost("0xA"));
    assert_eq!(cache.score_of("0xA"), Some(100));

    let stats = cache.stats_snapshot();
    assert_eq!(stats.size, 1);
    assert_eq!(stats.hits, 1);
    assert_eq!(stats.misses, 1);
    assert_eq!(stats.skipped_db_ops, 1);
    assert_eq!(stats.hit_rate_percent(), 50);
}

#[test]
fn reset_batch_counters_keeps_entries() {
    let cache = AddressCache::new(test_cache_config());
    cache.add_if_absent("0xA");
    cache.check_and_boost("0xA");
    cache.check_and_boost("0xB");

    cache.reset_batch_counters();

    let stats = cache.stats_snapshot();
    assert_eq!(stats.hits, 0);
    assert_eq!(stats.misses, 0);
    assert_eq!(stats.skipped_db_ops, 0);
    assert_eq!(stats.size, 1, "entries survive a counter reset");
    assert_eq!(cache.score_of("0xA"), Some(100));
}

#[test]
fn decay_removes_entries_at_or_below_zero() {
    let config = CacheConfig {
        max_size: 100,
        default_value: 4,
        decay_amount: 2,
        ..test_cache_config()
    };
    let cache = AddressCache::new(config);

    cache.add_if_absent("cold");
    cache.add_if_absent("hot");
    cache.check_and_boost("hot"); // score 8

    cache.decay_and_evict(); // cold 2, hot 6
    assert_eq!(cache.score_of("cold"), Some(2));
    cache.decay_and_evict(); // cold 0 -> removed, hot 4
    assert_eq!(cache.score_of("cold"), None);
    assert_eq!(cache.score_of("hot"), Some(4));
    assert_eq!(cache.len(), 1);
}

/// Full decay scenario: four entries at capacity, two of them boosted.
/// The first insert attempt decays everyone but frees nothing, so the
/// newcomer is dropped in favour of existing entries; the second attempt
/// decays the cold pair to zero and makes room.
#[test]
fn decay_eviction_prefers_existing_entries_until_scores_expire() {
    let config = CacheConfig {
        max_size: 4,
        default_value: 10,
        decay_amount: 5,
        lru_eviction_enabled: false,
        ..test_cache_config()
    };
    let cache = AddressCache::new(config);

    for addr in ["A", "B", "C", "D"] {
        cache.add_if_absent(addr);
    }
    assert!(cache.check_and_boost("A")); // 20
    assert!(cache.check_and_boost("B")); // 20

    cache.add_if_absent("E");
    // One decay pass: A/B at 15, C/D at 5 - nobody expired, E dropped.
    assert_eq!(cache.score_of("E"), None);
    assert_eq!(cache.len(), 4);
    assert_eq!(cache.score_of("C"), Some(5));

    cache.add_if_absent("E");
    // Second pass expires C and D (5 - 5 <= 0); E now fits.
    assert_eq!(cache.score_of("C"), None);
    assert_eq!(cache.score_of("D"), None);
    assert_eq!(cache.score_of("E"), Some(10));
    assert_eq!(cache.len(), 3);
    assert!(cache.len() <= 4);
}

#[test]
fn lru_fallback_evicts_oldest_when_decay_frees_nothing() {
    let config = CacheConfig {
        max_size: 3,
        default_value: 1000,
        decay_amount: 1,
        lru_eviction_enabled: true,
        batch_eviction_size: 1,
        ..test_cache_config()
    };
    let cache = AddressCache::new(config);

    cache.add_if_absent("A");
    cache.add_if_absent("B");
    cache.add_if_absent("C");
    cache.check_and_boost("A"); // A is now most recently used

    cache.add_if_absent("D");

    assert_eq!(cache.score_of("B"), None, "oldest untouched entry evicted");
    assert!(cache.score_of("A").is_some());
    assert!(cache.score_of("C").is_some());
    assert!(cache.score_of("D").is_some());
    assert_eq!(cache.len(), 3);
}

#[test]
fn lru_order_tracks_map_contents() {
    let cache = AddressCache::new(test_cache_config());
    let addrs = ["0x1", "0x2", "0x3", "0x4"];
    for addr in addrs {
        cache.add_if_absent(addr);
    }
    cache.check_and_boost("0x2");
    cache.decay_and_evict();

    let lru = cache.lru_keys();
    assert_eq!(lru.len(), cache.len(), "LRU list mirrors the map");
    for addr in addrs {
        assert_eq!(
            lru.iter().any(|k| k == addr),
            cache.score_of(addr).is_some()
        );
    }
    assert_eq!(lru.last().map(String::as_str), Some("0x2"));
}

#[test]
fn size_never_exceeds_capacity() {
    let config = CacheConfig {
        max_size: 8,
        default_value: 1000,
        decay_amount: 1,
        batch_eviction_size: 2,
        ..test_cache_config()
    };
    let cache = AddressCache::new(config);

    for i in 0..100 {
        cache.add_if_absent(&format!("0x{:040x}", i));
        assert!(cache.len() <= 8, "capacity exceeded at insert {}", i);
    }
}

#[test]
fn memory_pressure_shrinks_to_eighty_percent() {
    let config = CacheConfig {
        max_size: 10_000,
        default_value: 1000,
        decay_amount: 1,
        memory_check_enabled: true,
        target_memory_percent: 1,
        min_cache_size: 2,
        memory_budget_mb: 1,
        ..test_cache_config()
    };
    let cache = AddressCache::new(config);

    // Long keys so the estimated footprint clears 1% of a 1 MB budget.
    for i in 0..50 {
        cache.add_if_absent(&format!("{:0100}", i));
    }
    assert_eq!(cache.len(), 50);
    assert!(cache.memory_stats().usage_percent > 1.0);

    cache.decay_and_evict();
    assert_eq!(cache.len(), 40, "shrinks to 80% of the previous size");
}

#[test]
fn disabled_cache_is_inert() {
    let config = CacheConfig {
        enabled: false,
        ..test_cache_config()
    };
    let cache = AddressCache::new(config);

    cache.add_if_absent("0xA");
    assert!(!cache.check_and_boost("0xA"));
    assert_eq!(cache.len(), 0);

    cache.decay_and_evict();
    let stats = cache.stats_snapshot();
    assert_eq!(stats.hits, 0);
    assert_eq!(stats.misses, 0);
}

#[tokio::test]
async fn concurrent_boosts_and_decay_stay_consistent() {
    use std::sync::Arc;

    let config = CacheConfig {
        max_size: 1000,
        default_value: 10,
        decay_amount: 1,
        ..test_cache_config()
    };
    let cache = Arc::new(AddressCache::new(config));
    for i in 0..200 {
        cache.add_if_absent(&format!("0x{:x}", i));
    }

    let mut handles = Vec::new();
    for worker in 0..4 {
        let cache = Arc::clone(&cache);
        handles.push(tokio::spawn(async move {
            for i in 0..200 {
                cache.check_and_boost(&format!("0x{:x}", (i + worker * 50) % 200));
            }
        }));
    }
    let decayer = {
        let cache = Arc::clone(&cache);
        tokio::spawn(async move {
            for _ in 0..5 {
                cache.decay_and_evict();
            }
        })
    };
    for handle in handles {
        handle.await.unwrap();
    }
    decayer.await.unwrap();

    let lru = cache.lru_keys();
    assert_eq!(lru.len(), cache.len());
    for key in &lru {
        let score = cache.score_of(key).expect("LRU key missing from map");
        assert!(score > 0, "non-positive score retained for {}", key);
    }
}
