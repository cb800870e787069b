use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use std::collections::HashSet;

/// Row of the `chain_info` table. `next_block_number` is the high-water
/// mark: the smallest block number not yet attempted.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct ChainInfo {
    pub id: i64,
    pub chain_name: String,
    pub chain_id: String,
    pub next_block_number: i64,
    pub created_at: i64,
    pub updated_at: i64,
}

/// Everything the ingestion pipeline needs from one fetched block: the set
/// of distinct non-empty from/to addresses, plus identifying metadata.
#[derive(Debug, Clone, Default)]
pub struct BlockAddresses {
    pub block_number: u64,
    pub block_hash: Option<String>,
    pub addresses: HashSet<String>,
    pub transaction_count: usize,
    pub timestamp: Option<i64>,
}

/// Status codes seeded in the `status` table and referenced by
/// `api_call_failure_log.status_code`.
pub mod status_codes {
    pub const SUCCESS: &str = "SUCCESS";
    pub const RPC_NOT_FOUND: &str = "RPC_BLOCK_NOT_FOUND";
    pub const RPC_TIMEOUT: &str = "RPC_TIMEOUT";
    pub const RPC_UPSTREAM_ERROR: &str = "RPC_UPSTREAM_ERROR";
    pub const RPC_TRANSPORT_ERROR: &str = "RPC_TRANSPORT_ERROR";
    pub const BATCH_ERROR: &str = "PREFETCH_BATCH_PROCESSING_ERROR";
}
