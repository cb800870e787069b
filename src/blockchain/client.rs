use crate::models::{status_codes, BlockAddresses};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, warn};

/// Failure classes of a single block fetch. Per-block failures are recorded
/// and the batch moves on; none of these abort a batch.
#[derive(Error, Debug, Clone)]
pub enum RpcError {
    #[error("block not found")]
    NotFound,

    #[error("RPC request timed out")]
    Timeout,

    #[error("RPC error {code}: {message}")]
    Upstream { code: i64, message: String },

    #[error("transport error: {0}")]
    Transport(String),
}

impl RpcError {
    /// Status-table code used when logging this failure.
    pub fn status_code(&self) -> &'static str {
        match self {
            RpcError::NotFound => status_codes::RPC_NOT_FOUND,
            RpcError::Timeout => status_codes::RPC_TIMEOUT,
            RpcError::Upstream { .. } => status_codes::RPC_UPSTREAM_ERROR,
            RpcError::Transport(_) => status_codes::RPC_TRANSPORT_ERROR,
        }
    }
}

/// Seam between the batch processor and the network. Production code uses
/// [`EthRpcClient`]; tests drive the processor with stub implementations.
#[async_trait]
pub trait BlockFetcher: Send + Sync {
    async fn fetch_block(&self, block_number: u64) -> Result<BlockAddresses, RpcError>;
}

#[derive(Serialize)]
struct RpcRequest {
    jsonrpc: &'static str,
    id: u32,
    method: &'static str,
    params: (String, bool),
}

#[derive(Deserialize)]
struct RpcResponse {
    result: Option<EthBlock>,
    error: Option<RpcErrorObject>,
}

#[derive(Deserialize)]
struct RpcErrorObject {
    code: i64,
    #[serde(default)]
    message: String,
}

#[derive(Deserialize, Default)]
struct EthBlock {
    hash: Option<String>,
    timestamp: Option<String>,
    #[serde(default)]
    transactions: Vec<EthTransaction>,
}

#[derive(Deserialize)]
struct EthTransaction {
    from: Option<String>,
    to: Option<String>,
}

/// Thin adaptor over JSON-RPC `eth_getBlockByNumber`.
pub struct EthRpcClient {
    http: reqwest::Client,
    endpoint: String,
}

impl EthRpcClient {
    pub fn new(endpoint: &str, timeout: Duration) -> Result<Self, reqwest::Error> {
        let http = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            http,
            endpoint: endpoint.to_string(),
        })
    }

    async fn get_block(&self, block_number: u64) -> Result<RpcResponse, RpcError> {
        let request = RpcRequest {
            jsonrpc: "2.0",
            id: 1,
            method: "eth_getBlockByNumber",
            params: (to_hex_block_number(block_number), true),
        };

        let response = self
            .http
            .post(&self.endpoint)
            .json(&request)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    RpcError::Timeout
                } else {
                    RpcError::Transport(e.to_string())
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            return Err(RpcError::Transport(format!(
                "HTTP request failed with status {}",
                status
            )));
        }

        response
            .json::<RpcResponse>()
            .await
            .map_err(|e| RpcError::Transport(format!("malformed RPC response: {}", e)))
    }
}

#[async_trait]
impl BlockFetcher for EthRpcClient {
    async fn fetch_block(&self, block_number: u64) -> Result<BlockAddresses, RpcError> {
        debug!("Fetching block {}", block_number);
        let envelope = self.get_block(block_number).await?;

        if let Some(err) = envelope.error {
            return Err(RpcError::Upstream {
                code: err.code,
                message: err.message,
            });
        }

        let block = envelope.result.ok_or(RpcError::NotFound)?;
        Ok(extract_block_addresses(block_number, &block))
    }
}

fn extract_block_addresses(block_number: u64, block: &EthBlock) -> BlockAddresses {
    let mut addresses = HashSet::new();
    for tx in &block.transactions {
        for field in [&tx.from, &tx.to] {
            if let Some(value) = field {
                let trimmed = value.trim();
                if !trimmed.is_empty() {
                    addresses.insert(trimmed.to_string());
                }
            }
        }
    }

    BlockAddresses {
        block_number,
        block_hash: block.hash.clone(),
        transaction_count: block.transactions.len(),
        timestamp: block.timestamp.as_deref().and_then(parse_hex_timestamp),
        addresses,
    }
}

/// `0x`-prefixed hex with no superfluous leading zeroes.
pub fn to_hex_block_number(block_number: u64) -> String {
    format!("0x{:x}", block_number)
}

/// Accepts a decimal or `0x`-hex block height, as callers supply either.
pub fn parse_block_number(value: &str) -> Option<u64> {
    let value = value.trim();
    if let Some(hex) = value.strip_prefix("0x") {
        u64::from_str_radix(hex, 16).ok()
    } else {
        value.parse().ok()
    }
}

fn parse_hex_timestamp(raw: &str) -> Option<i64> {
    let digits = raw.strip_prefix("0x").unwrap_or(raw);
    match i64::from_str_radix(digits, 16) {
        Ok(secs) => Some(secs),
        Err(_) => {
            warn!("Failed to parse block timestamp: {}", raw);
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tx(from: Option<&str>, to: Option<&str>) -> EthTransaction {
        EthTransaction {
            from: from.map(str::to_string),
            to: to.map(str::to_string),
        }
    }

    #[test]
    fn extracts_distinct_nonempty_addresses() {
        let block = EthBlock {
            hash: Some("0xabc".into()),
            timestamp: Some("0x5f5e100".into()),
            transactions: vec![
                tx(Some("0xA"), Some("0xB")),
                tx(Some("0xA"), Some("0xC")),
                tx(None, Some("0xB")),
                tx(Some("0xA"), Some("")),
            ],
        };

        let extracted = extract_block_addresses(7, &block);
        let expected: HashSet<String> =
            ["0xA", "0xB", "0xC"].iter().map(|s| s.to_string()).collect();
        assert_eq!(extracted.addresses, expected);
        assert_eq!(extracted.transaction_count, 4);
        assert_eq!(extracted.block_number, 7);
        assert_eq!(extracted.timestamp, Some(0x5f5e100));
    }

    #[test]
    fn preserves_address_case() {
        let block = EthBlock {
            transactions: vec![tx(Some("0xAbCd"), Some("0xabcd"))],
            ..Default::default()
        };
        let extracted = extract_block_addresses(0, &block);
        assert_eq!(extracted.addresses.len(), 2);
    }

    #[test]
    fn hex_formatting_has_no_leading_zeroes() {
        assert_eq!(to_hex_block_number(0), "0x0");
        assert_eq!(to_hex_block_number(255), "0xff");
        assert_eq!(to_hex_block_number(17_000_000), "0x1036640");
    }

    #[test]
    fn parses_decimal_and_hex_heights() {
        assert_eq!(parse_block_number("100"), Some(100));
        assert_eq!(parse_block_number("0x64"), Some(100));
        assert_eq!(parse_block_number(" 12 "), Some(12));
        assert_eq!(parse_block_number("abc"), None);
        assert_eq!(parse_block_number("-3"), None);
    }

    #[test]
    fn classifies_rpc_envelope() {
        let not_found: RpcResponse =
            serde_json::from_str(r#"{"jsonrpc":"2.0","id":1,"result":null}"#).unwrap();
        assert!(not_found.result.is_none() && not_found.error.is_none());

        let upstream: RpcResponse = serde_json::from_str(
            r#"{"jsonrpc":"2.0","id":1,"error":{"code":-32000,"message":"header not found"}}"#,
        )
        .unwrap();
        let err = upstream.error.unwrap();
        assert_eq!(err.code, -32000);
        assert_eq!(err.message, "header not found");
    }

    #[test]
    fn tolerates_unknown_response_fields() {
        let body = r#"{
            "jsonrpc": "2.0",
            "id": 1,
            "result": {
                "hash": "0xdeadbeef",
                "number": "0x10",
                "timestamp": "0x10",
                "extraField": {"nested": true},
                "transactions": [
                    {"from": "0x1", "to": "0x2", "gas": "0x5208", "value": "0x0"}
                ]
            }
        }"#;
        let parsed: RpcResponse = serde_json::from_str(body).unwrap();
        let block = parsed.result.unwrap();
        assert_eq!(block.hash.as_deref(), Some("0xdeadbeef"));
        assert_eq!(block.transactions.len(), 1);
    }

    #[test]
    fn status_codes_map_per_error_class() {
        assert_eq!(RpcError::NotFound.status_code(), "RPC_BLOCK_NOT_FOUND");
        assert_eq!(RpcError::Timeout.status_code(), "RPC_TIMEOUT");
        assert_eq!(
            RpcError::Upstream {
                code: -32000,
                message: String::new()
            }
            .status_code(),
            "RPC_UPSTREAM_ERROR"
        );
        assert_eq!(
            RpcError::Transport("reset".into()).status_code(),
            "RPC_TRANSPORT_ERROR"
        );
    }
}
