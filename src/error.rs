//! Errors that abort a block range or a day.

use crate::enrich::EnrichError;
use crate::rpc::RpcError;
use crate::store::StoreError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum IngestError {
    #[error("RPC error: {0}")]
    Rpc(#[from] RpcError),

    #[error("Enrichment error: {0}")]
    Enrich(#[from] EnrichError),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Block range error: {0}")]
    BlockRange(String),
}
