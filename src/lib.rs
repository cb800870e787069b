pub mod api;
pub mod blockchain;
pub mod cache;
pub mod config;
pub mod db;
pub mod metrics;
pub mod models;
pub mod rate_limit;
pub mod state;

#[cfg(test)]
mod tests;

// Re-export specific items for convenience
pub use api::{create_router, ApiError, ApiResponse};
pub use blockchain::{BatchOutcome, BatchProcessor, BlockFetcher, EthRpcClient, RpcError};
pub use cache::AddressCache;
pub use config::Config;
pub use metrics::BatchMetrics;
pub use rate_limit::RateLimiter;
pub use state::AppState;
