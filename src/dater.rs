//! Timestamp to block number resolution.

use crate::rpc::{ChainClient, RpcError};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tracing::debug;

#[async_trait]
pub trait BlockResolver: Send + Sync {
    /// First block whose timestamp is at or after `at`.
    async fn resolve_block_for_timestamp(&self, at: DateTime<Utc>) -> Result<u64, RpcError>;
}

/// Binary search over block timestamps.
///
/// Returns the chain head when `at` is in the future and block 0 when it
/// predates genesis. Block timestamps are cached for the resolver's lifetime.
pub struct BlockDater<C: ChainClient> {
    chain: Arc<C>,
    timestamps: Mutex<HashMap<u64, u64>>,
}

impl<C: ChainClient> BlockDater<C> {
    pub fn new(chain: Arc<C>) -> Self {
        Self {
            chain,
            timestamps: Mutex::new(HashMap::new()),
        }
    }

    async fn timestamp(&self, block: u64) -> Result<u64, RpcError> {
        let cached = self
            .timestamps
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(&block)
            .copied();
        if let Some(ts) = cached {
            return Ok(ts);
        }
        let header = self
            .chain
            .get_block(block)
            .await?
            .ok_or_else(|| RpcError::InvalidResponse(format!("block {} not found", block)))?;
        let ts = header.timestamp();
        self.timestamps
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(block, ts);
        Ok(ts)
    }
}

#[async_trait]
impl<C: ChainClient> BlockResolver for BlockDater<C> {
    async fn resolve_block_for_timestamp(&self, at: DateTime<Utc>) -> Result<u64, RpcError> {
        let target = u64::try_from(at.timestamp()).unwrap_or(0);
        let head = self.chain.latest_block_number().await?;

        if self.timestamp(head).await? < target {
            return Ok(head);
        }
        if self.timestamp(0).await? >= target {
            return Ok(0);
        }

        // invariant: ts(low) < target <= ts(high)
        let (mut low, mut high) = (0u64, head);
        while high - low > 1 {
            let mid = low + (high - low) / 2;
            if self.timestamp(mid).await? >= target {
                high = mid;
            } else {
                low = mid;
            }
        }

        debug!("Resolved {} to block {}", at, high);
        Ok(high)
    }
}
