pub mod client;
pub mod processor;
pub mod scheduler;

// Re-exports for convenience
pub use client::{BlockFetcher, EthRpcClient, RpcError};
pub use processor::{BatchOutcome, BatchProcessor};
pub use scheduler::run_scheduler;
