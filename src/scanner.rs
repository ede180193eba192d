//! Single-kind log scans over a block range.

use crate::decoder::{decode, EventKind};
use crate::rpc::{ChainClient, RpcError};
use crate::schemas::TransferEvent;
use std::sync::Arc;
use tracing::debug;

/// Decoded events of one kind plus the number of logs that could not be decoded.
#[derive(Debug, Default)]
pub struct ScanOutput {
    pub events: Vec<TransferEvent>,
    pub malformed: usize,
}

pub struct RangeScanner<C: ChainClient> {
    chain: Arc<C>,
}

impl<C: ChainClient> RangeScanner<C> {
    pub fn new(chain: Arc<C>) -> Self {
        Self { chain }
    }

    /// One `eth_getLogs` for `kind` over `[from_block, to_block]`.
    ///
    /// Malformed logs are dropped and counted; RPC failures propagate.
    pub async fn scan(&self, kind: EventKind, from_block: u64, to_block: u64) -> Result<ScanOutput, RpcError> {
        let logs = self.chain.get_logs(kind.topic(), from_block, to_block).await?;
        let total = logs.len();

        let mut output = ScanOutput::default();
        for log in &logs {
            match decode(kind, log) {
                Ok(event) => output.events.push(event),
                Err(e) => {
                    output.malformed += 1;
                    debug!("Skipping log from {}: {}", log.address, e);
                }
            }
        }

        debug!(
            "{} blocks {}-{}: {} logs -> {} events, {} malformed",
            kind,
            from_block,
            to_block,
            total,
            output.events.len(),
            output.malformed
        );
        Ok(output)
    }
}
