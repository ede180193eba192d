//! Ethereum JSON-RPC client with rate limiting, reconnects and retry logic.
//!
//! The pipeline only talks to the chain through the [`ChainClient`] trait.
//! [`EthRpcClient`] implements it over HTTP with:
//! - a requests-per-second limiter and an in-flight cap
//! - bounded exponential backoff on transient failures
//! - an explicit disconnect/connect cycle used between days

use crate::config::RpcConfig;
use alloy_primitives::{Address, Bytes, TxHash, B256, U256, U64};
use async_trait::async_trait;
use governor::{Quota, RateLimiter};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::num::NonZeroU32;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};
use std::time::Duration;
use thiserror::Error;
use tokio::sync::Semaphore;
use tracing::{debug, info, warn};

#[derive(Error, Debug)]
pub enum RpcError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("JSON-RPC error: code={code}, message={message}")]
    JsonRpc { code: i64, message: String },

    #[error("Deserialization error: {0}")]
    Deserialize(#[from] serde_json::Error),

    #[error("{method} failed after {attempts} attempts: {last}")]
    RetriesExhausted {
        method: String,
        attempts: u32,
        last: String,
    },

    #[error("Invalid response: {0}")]
    InvalidResponse(String),
}

// ============================================================================
// Wire types
// ============================================================================

/// Raw event log as returned by `eth_getLogs` and inside receipts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Log {
    pub address: Address,
    pub topics: Vec<B256>,
    #[serde(default)]
    pub data: Bytes,
    #[serde(default)]
    pub block_number: Option<U64>,
    #[serde(default)]
    pub transaction_hash: Option<TxHash>,
    #[serde(default)]
    pub log_index: Option<U64>,
}

impl Log {
    pub fn topic0(&self) -> Option<&B256> {
        self.topics.first()
    }

    pub fn block_number(&self) -> Option<u64> {
        self.block_number.map(|n| n.to::<u64>())
    }

    pub fn log_index(&self) -> Option<u64> {
        self.log_index.map(|n| n.to::<u64>())
    }
}

/// Full transaction data (fields the records need)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Transaction {
    pub hash: TxHash,
    #[serde(default)]
    pub block_number: Option<U64>,
    pub from: Address,
    #[serde(default)]
    pub to: Option<Address>,
    pub gas: U64,
    #[serde(default)]
    pub gas_price: Option<U256>,
    #[serde(default)]
    pub value: Option<U256>,
}

/// Ethereum transaction receipt (minimal fields)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransactionReceipt {
    pub transaction_hash: TxHash,
    #[serde(default)]
    pub block_number: Option<U64>,
    #[serde(default)]
    pub status: Option<U64>,
    #[serde(default)]
    pub logs: Vec<Log>,
}

/// Block header fields (transactions requested as hashes and ignored)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Block {
    #[serde(default)]
    pub number: Option<U64>,
    pub timestamp: U64,
}

impl Block {
    pub fn timestamp(&self) -> u64 {
        self.timestamp.to::<u64>()
    }
}

// ============================================================================
// Client seam
// ============================================================================

/// Chain access needed by the backfill.
#[async_trait]
pub trait ChainClient: Send + Sync {
    /// `eth_getLogs` filtered by topic0 over an inclusive block range.
    async fn get_logs(&self, topic0: B256, from_block: u64, to_block: u64) -> Result<Vec<Log>, RpcError>;

    async fn get_transaction(&self, hash: TxHash) -> Result<Option<Transaction>, RpcError>;

    async fn get_transaction_receipt(&self, hash: TxHash) -> Result<Option<TransactionReceipt>, RpcError>;

    async fn get_block(&self, number: u64) -> Result<Option<Block>, RpcError>;

    /// `eth_call` against the latest state.
    async fn call(&self, to: Address, data: Bytes) -> Result<Bytes, RpcError>;

    async fn latest_block_number(&self) -> Result<u64, RpcError>;

    /// Establish (or re-establish) the connection and check it answers.
    async fn connect(&self) -> Result<(), RpcError>;

    /// Drop the current connection. The next call reconnects.
    fn disconnect(&self);
}

/// JSON-RPC request structure
#[derive(Debug, Serialize)]
struct JsonRpcRequest<'a, P: Serialize> {
    jsonrpc: &'static str,
    method: &'a str,
    params: P,
    id: u64,
}

/// JSON-RPC response structure
#[derive(Debug, Deserialize)]
struct JsonRpcResponse {
    #[allow(dead_code)]
    jsonrpc: String,
    /// `null` is a valid answer, e.g. for an unknown transaction
    #[serde(default)]
    result: serde_json::Value,
    error: Option<JsonRpcError>,
}

/// Decode a successful `result` into the caller's type. A `null` result
/// decodes to `None` for optional lookups and fails for everything else.
fn decode_result<R: DeserializeOwned>(method: &str, result: serde_json::Value) -> Result<R, RpcError> {
    serde_json::from_value(result)
        .map_err(|e| RpcError::InvalidResponse(format!("unexpected result for {method}: {e}")))
}

#[derive(Debug, Deserialize)]
struct JsonRpcError {
    code: i64,
    message: String,
}

/// Outcome of one attempt inside the retry loop.
enum Attempt<R> {
    Done(R),
    Retry(String),
}

type DirectLimiter = RateLimiter<
    governor::state::NotKeyed,
    governor::state::InMemoryState,
    governor::clock::DefaultClock,
>;

/// Rate-limited HTTP JSON-RPC client.
pub struct EthRpcClient {
    url: String,
    client: RwLock<Option<reqwest::Client>>,
    rate_limiter: DirectLimiter,
    semaphore: Arc<Semaphore>,
    config: RpcConfig,
    request_id: AtomicU64,
}

impl EthRpcClient {
    pub fn new(config: RpcConfig) -> Result<Self, RpcError> {
        let rps = NonZeroU32::new(config.requests_per_second).unwrap_or(NonZeroU32::MIN);
        let rate_limiter = RateLimiter::direct(Quota::per_second(rps));
        let semaphore = Arc::new(Semaphore::new(config.max_in_flight.max(1)));
        let client = Self::build_http(&config)?;

        Ok(Self {
            url: config.url.clone(),
            client: RwLock::new(Some(client)),
            rate_limiter,
            semaphore,
            config,
            request_id: AtomicU64::new(1),
        })
    }

    fn build_http(config: &RpcConfig) -> Result<reqwest::Client, RpcError> {
        Ok(reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .pool_max_idle_per_host(config.max_in_flight.max(1))
            .tcp_keepalive(Duration::from_secs(30))
            .build()?)
    }

    /// Current HTTP client, rebuilt if the connection was dropped.
    fn http(&self) -> Result<reqwest::Client, RpcError> {
        if let Some(client) = self.client.read().unwrap_or_else(|e| e.into_inner()).as_ref() {
            return Ok(client.clone());
        }
        let client = Self::build_http(&self.config)?;
        *self.client.write().unwrap_or_else(|e| e.into_inner()) = Some(client.clone());
        debug!("RPC client rebuilt after disconnect");
        Ok(client)
    }

    fn next_id(&self) -> u64 {
        self.request_id.fetch_add(1, Ordering::SeqCst)
    }

    /// Determine if an error is transient (should be retried).
    fn is_transient_error(code: i64, message: &str) -> bool {
        let message = message.to_lowercase();
        if message.contains("revert") {
            return false;
        }
        // -32005 = rate limit / resource unavailable
        // -32603 = internal JSON-RPC error
        // -32000 = server error
        matches!(code, -32005 | -32603 | -32000)
            || message.contains("rate")
            || message.contains("limit")
            || message.contains("capacity")
            || message.contains("temporarily")
            || message.contains("timeout")
    }

    async fn attempt<P: Serialize, R: for<'de> Deserialize<'de>>(
        &self,
        method: &str,
        params: &P,
    ) -> Result<Attempt<R>, RpcError> {
        self.rate_limiter.until_ready().await;
        let _permit = self
            .semaphore
            .acquire()
            .await
            .map_err(|_| RpcError::InvalidResponse("request limiter closed".into()))?;

        let request = JsonRpcRequest {
            jsonrpc: "2.0",
            method,
            params,
            id: self.next_id(),
        };

        let response = match self.http()?.post(&self.url).json(&request).send().await {
            Ok(resp) => resp,
            Err(e) => return Ok(Attempt::Retry(format!("network error: {e}"))),
        };

        let status = response.status();
        if status.as_u16() == 429 || status.is_server_error() {
            return Ok(Attempt::Retry(format!("HTTP {status}")));
        }

        let body: JsonRpcResponse = match response.json().await {
            Ok(body) => body,
            Err(e) => return Ok(Attempt::Retry(format!("failed to parse JSON: {e}"))),
        };

        if let Some(error) = body.error {
            if Self::is_transient_error(error.code, &error.message) {
                return Ok(Attempt::Retry(format!(
                    "code={}, msg={}",
                    error.code, error.message
                )));
            }
            return Err(RpcError::JsonRpc {
                code: error.code,
                message: error.message,
            });
        }

        decode_result(method, body.result).map(Attempt::Done)
    }

    /// Make a single RPC call, retrying transient failures with exponential
    /// backoff up to `max_retries` extra attempts.
    async fn request<P: Serialize, R: for<'de> Deserialize<'de>>(
        &self,
        method: &str,
        params: P,
    ) -> Result<R, RpcError> {
        let mut delay = Duration::from_millis(self.config.base_delay_ms);
        let max_delay = Duration::from_secs(60);
        let attempts = self.config.max_retries.saturating_add(1);

        for attempt in 1..=attempts {
            match self.attempt(method, &params).await? {
                Attempt::Done(result) => return Ok(result),
                Attempt::Retry(reason) if attempt < attempts => {
                    warn!(
                        "[attempt {}/{}] {} on {}, retrying in {:?}",
                        attempt, attempts, reason, method, delay
                    );
                    tokio::time::sleep(delay).await;
                    delay = (delay * 2).min(max_delay);
                }
                Attempt::Retry(reason) => {
                    return Err(RpcError::RetriesExhausted {
                        method: method.to_string(),
                        attempts,
                        last: reason,
                    });
                }
            }
        }

        Err(RpcError::RetriesExhausted {
            method: method.to_string(),
            attempts,
            last: "no attempt made".to_string(),
        })
    }
}

fn hex_block(number: u64) -> String {
    format!("0x{:x}", number)
}

#[async_trait]
impl ChainClient for EthRpcClient {
    async fn get_logs(&self, topic0: B256, from_block: u64, to_block: u64) -> Result<Vec<Log>, RpcError> {
        let filter = serde_json::json!({
            "fromBlock": hex_block(from_block),
            "toBlock": hex_block(to_block),
            "topics": [topic0],
        });
        self.request("eth_getLogs", [filter]).await
    }

    async fn get_transaction(&self, hash: TxHash) -> Result<Option<Transaction>, RpcError> {
        self.request("eth_getTransactionByHash", [hash]).await
    }

    async fn get_transaction_receipt(&self, hash: TxHash) -> Result<Option<TransactionReceipt>, RpcError> {
        self.request("eth_getTransactionReceipt", [hash]).await
    }

    async fn get_block(&self, number: u64) -> Result<Option<Block>, RpcError> {
        self.request("eth_getBlockByNumber", (hex_block(number), false)).await
    }

    async fn call(&self, to: Address, data: Bytes) -> Result<Bytes, RpcError> {
        let call = serde_json::json!({ "to": to, "data": data });
        self.request("eth_call", (call, "latest")).await
    }

    async fn latest_block_number(&self) -> Result<u64, RpcError> {
        let result: U64 = self.request("eth_blockNumber", ()).await?;
        Ok(result.to::<u64>())
    }

    async fn connect(&self) -> Result<(), RpcError> {
        let client = Self::build_http(&self.config)?;
        *self.client.write().unwrap_or_else(|e| e.into_inner()) = Some(client);
        let head = self.latest_block_number().await?;
        info!("Connected to RPC endpoint, head block {}", head);
        Ok(())
    }

    fn disconnect(&self) {
        self.client.write().unwrap_or_else(|e| e.into_inner()).take();
        debug!("RPC client disconnected");
    }
}
