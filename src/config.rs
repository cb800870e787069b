// Process-wide configuration, loaded once at startup from the environment
// (with .env support). Values outside their valid range are clamped.

use dotenv::dotenv;
use std::env;
use std::str::FromStr;
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct Config {
    pub database_url: String,
    pub server_host: String,
    pub server_port: u16,

    pub rpc_endpoint: String,
    pub rpc_timeout: Duration,

    pub batch_size: u64,
    pub max_concurrent_rpc_calls: usize,
    pub rate_limit_per_minute: u64,
    pub schedule_interval: Duration,
    pub chain_id: String,
    pub chain_name: String,
    pub prefetch_enabled: bool,
    pub max_consecutive_failures: u32,
    pub start_block: u64,

    pub cache: CacheConfig,
}

#[derive(Debug, Clone)]
pub struct CacheConfig {
    pub enabled: bool,
    pub max_size: usize,
    pub default_value: i64,
    pub decay_amount: i64,
    pub lru_eviction_enabled: bool,
    pub batch_eviction_size: usize,
    pub memory_check_enabled: bool,
    pub target_memory_percent: u8,
    pub min_cache_size: usize,
    pub memory_budget_mb: u64,
}

fn parse_env<T: FromStr>(key: &str, default: T) -> T {
    env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn parse_env_bool(key: &str, default: bool) -> bool {
    env::var(key)
        .ok()
        .map(|v| matches!(v.to_lowercase().as_str(), "1" | "true" | "yes" | "on"))
        .unwrap_or(default)
}

impl Config {
    pub fn from_env() -> Self {
        dotenv().ok();

        let database_url =
            env::var("DATABASE_URL").unwrap_or_else(|_| "sqlite:data.db".to_string());
        let server_host = env::var("SERVER_HOST").unwrap_or_else(|_| "127.0.0.1".to_string());
        let server_port = parse_env("SERVER_PORT", 8080);

        let rpc_endpoint = env::var("RPC_ENDPOINT")
            .unwrap_or_else(|_| "https://eth.llamarpc.com".to_string());
        let rpc_timeout = Duration::from_secs(parse_env("RPC_TIMEOUT_SECS", 10u64).max(1));

        let batch_size = parse_env("BATCH_SIZE", 150u64).clamp(1, 1000);
        let max_concurrent_rpc_calls =
            parse_env("BATCH_MAX_CONCURRENT_RPC_CALLS", 10usize).clamp(1, 50);
        let rate_limit_per_minute = parse_env("BATCH_RATE_LIMIT_PER_MINUTE", 1500u64).max(1);
        let schedule_interval =
            Duration::from_secs(parse_env("BATCH_SCHEDULE_SECS", 10u64).max(1));
        let chain_id = env::var("BATCH_CHAIN_ID").unwrap_or_else(|_| "1".to_string());
        let chain_name = env::var("BATCH_CHAIN_NAME").unwrap_or_else(|_| {
            if chain_id == "1" {
                "Ethereum Mainnet".to_string()
            } else {
                format!("chain-{}", chain_id)
            }
        });
        let prefetch_enabled = parse_env_bool("BATCH_PREFETCH_ENABLED", true);
        let max_consecutive_failures = parse_env("BATCH_MAX_CONSECUTIVE_FAILURES", 10u32);
        let start_block = parse_env("BATCH_START_BLOCK", 0u64);

        let cache = CacheConfig {
            enabled: parse_env_bool("CACHE_ENABLED", true),
            max_size: parse_env("CACHE_MAX_SIZE", 1_000_000usize).max(1),
            default_value: parse_env("CACHE_DEFAULT_VALUE", 50i64).max(1),
            decay_amount: parse_env("CACHE_DECAY_AMOUNT", 2i64).max(1),
            lru_eviction_enabled: parse_env_bool("CACHE_LRU_EVICTION_ENABLED", true),
            batch_eviction_size: parse_env("CACHE_BATCH_EVICTION_SIZE", 10_000usize).max(1),
            memory_check_enabled: parse_env_bool("CACHE_MEMORY_CHECK_ENABLED", true),
            target_memory_percent: parse_env("CACHE_TARGET_MEMORY_PERCENT", 80u8).clamp(1, 100),
            min_cache_size: parse_env("CACHE_MIN_CACHE_SIZE", 100_000usize),
            memory_budget_mb: parse_env("CACHE_MEMORY_BUDGET_MB", 1024u64).max(1),
        };

        Self {
            database_url,
            server_host,
            server_port,
            rpc_endpoint,
            rpc_timeout,
            batch_size,
            max_concurrent_rpc_calls,
            rate_limit_per_minute,
            schedule_interval,
            chain_id,
            chain_name,
            prefetch_enabled,
            max_consecutive_failures,
            start_block,
            cache,
        }
    }
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            max_size: 1_000_000,
            default_value: 50,
            decay_amount: 2,
            lru_eviction_enabled: true,
            batch_eviction_size: 10_000,
            memory_check_enabled: true,
            target_memory_percent: 80,
            min_cache_size: 100_000,
            memory_budget_mb: 1024,
        }
    }
}
