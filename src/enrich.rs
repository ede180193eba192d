//! Per-transaction enrichment.
//!
//! Pulls the transaction, its receipt and its block, and derives the fields a
//! record carries besides the transfer arrays. Contract `name()`/`symbol()` are
//! best effort and cached per contract for the lifetime of one [`Enricher`].

use crate::classify::MarketValue;
use crate::ethereum::{format_ether, format_unix_timestamp, saturating_u64};
use crate::marketplace;
use crate::rpc::{ChainClient, RpcError};
use alloy_primitives::{Address, Bytes, TxHash};
use alloy_sol_types::{sol, SolCall};
use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;
use tracing::debug;

sol! {
    function name() external view returns (string);
    function symbol() external view returns (string);
}

#[derive(Error, Debug)]
pub enum EnrichError {
    #[error("failed to fetch transaction {tx_hash}: {source}")]
    TransactionFetch {
        tx_hash: TxHash,
        #[source]
        source: RpcError,
    },

    #[error("transaction {0} not found")]
    MissingTransaction(TxHash),

    #[error("receipt for transaction {0} not found")]
    MissingReceipt(TxHash),

    #[error("block {block} of transaction {tx_hash} not found")]
    MissingBlock { tx_hash: TxHash, block: u64 },
}

/// Collection name and symbol read from the token contract; empty when unreadable.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TokenMetadata {
    pub name: String,
    pub symbol: String,
}

/// Immutable per-transaction fields.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Enrichment {
    pub from: Address,
    pub to: Option<Address>,
    pub gas: u64,
    pub gas_price: u64,
    /// Native value in ether units
    pub value: String,
    pub time: String,
    pub market_place: String,
    pub market_value: Option<MarketValue>,
    pub metadata: TokenMetadata,
}

pub struct Enricher<C: ChainClient> {
    chain: Arc<C>,
    metadata: HashMap<Address, TokenMetadata>,
}

impl<C: ChainClient> Enricher<C> {
    pub fn new(chain: Arc<C>) -> Self {
        Self {
            chain,
            metadata: HashMap::new(),
        }
    }

    /// Fetch everything a new record needs for `tx_hash`.
    ///
    /// `block_number` is the block of the log that introduced the transaction.
    pub async fn enrich(
        &mut self,
        tx_hash: TxHash,
        block_number: u64,
        contract: Address,
    ) -> Result<Enrichment, EnrichError> {
        let fetch_err = |source| EnrichError::TransactionFetch { tx_hash, source };

        let (tx, receipt, block) = tokio::try_join!(
            self.chain.get_transaction(tx_hash),
            self.chain.get_transaction_receipt(tx_hash),
            self.chain.get_block(block_number),
        )
        .map_err(fetch_err)?;

        let tx = tx.ok_or(EnrichError::MissingTransaction(tx_hash))?;
        let receipt = receipt.ok_or(EnrichError::MissingReceipt(tx_hash))?;
        let block = block.ok_or(EnrichError::MissingBlock {
            tx_hash,
            block: block_number,
        })?;

        let market = marketplace::first_match(&receipt.logs);
        let metadata = self.metadata(contract).await;

        Ok(Enrichment {
            from: tx.from,
            to: tx.to,
            gas: tx.gas.to::<u64>(),
            gas_price: tx.gas_price.map(saturating_u64).unwrap_or_default(),
            value: tx.value.map(format_ether).unwrap_or_else(|| "0".to_string()),
            time: format_unix_timestamp(block.timestamp()).unwrap_or_default(),
            market_place: market.map(|m| m.marketplace.to_string()).unwrap_or_default(),
            market_value: market.map(|m| m.value),
            metadata,
        })
    }

    async fn metadata(&mut self, contract: Address) -> TokenMetadata {
        if let Some(cached) = self.metadata.get(&contract) {
            return cached.clone();
        }
        let metadata = self.read_metadata(contract).await;
        self.metadata.insert(contract, metadata.clone());
        metadata
    }

    /// `symbol()` is only attempted once `name()` has answered. A name that
    /// was read is kept even when `symbol()` fails.
    async fn read_metadata(&self, contract: Address) -> TokenMetadata {
        let name = self
            .eth_call(contract, nameCall {}.abi_encode(), nameCall::SIGNATURE)
            .await
            .and_then(|output| nameCall::abi_decode_returns(&output, true).ok())
            .map(|ret| ret._0);
        let Some(name) = name else {
            return TokenMetadata::default();
        };

        let symbol = self
            .eth_call(contract, symbolCall {}.abi_encode(), symbolCall::SIGNATURE)
            .await
            .and_then(|output| symbolCall::abi_decode_returns(&output, true).ok())
            .map(|ret| ret._0);
        TokenMetadata {
            name,
            symbol: symbol.unwrap_or_default(),
        }
    }

    async fn eth_call(&self, contract: Address, data: Vec<u8>, signature: &str) -> Option<Bytes> {
        match self.chain.call(contract, Bytes::from(data)).await {
            Ok(output) => Some(output),
            Err(e) => {
                debug!("{} on {} unavailable: {}", signature, contract, e);
                None
            }
        }
    }
}
