//! Shared test fixtures: in-memory database pools and a canned Config.

mod cache_tests;

use crate::config::{CacheConfig, Config};
use crate::db::migration;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::SqlitePool;
use std::str::FromStr;
use std::time::Duration;

/// Fresh in-memory database with the full schema. A single pooled
/// connection keeps every query on the same `:memory:` instance.
pub(crate) async fn test_pool() -> SqlitePool {
    let options = SqliteConnectOptions::from_str("sqlite::memory:")
        .expect("valid sqlite url")
        .foreign_keys(true);
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .connect_with(options)
        .await
        .expect("failed to open in-memory database");
    migration::run_migrations(&pool)
        .await
        .expect("migrations failed");
    pool
}

pub(crate) fn test_config(batch_size: u64) -> Config {
    Config {
        database_url: "sqlite::memory:".to_string(),
        server_host: "127.0.0.1".to_string(),
        server_port: 0,
        rpc_endpoint: "http://127.0.0.1:0".to_string(),
        rpc_timeout: Duration::from_secs(2),
        batch_size,
        max_concurrent_rpc_calls: 10,
        // High enough that the limiter never gates a test batch.
        rate_limit_per_minute: 600_000,
        schedule_interval: Duration::from_secs(10),
        chain_id: "1".to_string(),
        chain_name: "Test Chain".to_string(),
        prefetch_enabled: true,
        max_consecutive_failures: 10,
        start_block: 0,
        cache: test_cache_config(),
    }
}

pub(crate) fn test_cache_config() -> CacheConfig {
    CacheConfig {
        enabled: true,
        max_size: 10_000,
        default_value: 50,
        decay_amount: 2,
        lru_eviction_enabled: true,
        batch_eviction_size: 100,
        memory_check_enabled: false,
        target_memory_percent: 80,
        min_cache_size: 10,
        memory_budget_mb: 1024,
    }
}
