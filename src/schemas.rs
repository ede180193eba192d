//! Data schemas for the NFT backfill.
//!
//! `TransferEvent` is the decoded, in-memory form of one log. `TransactionRecord`
//! is the persisted document, keyed by transaction hash, and keeps the field
//! names of the existing stored data. `Checkpoint` tracks per-day progress.

use crate::classify::Classification;
use alloy_primitives::{Address, TxHash, U256};
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

/// Collection holding one checkpoint per processed day.
pub const CHECKPOINT_COLLECTION: &str = "lastProcessedBlocks";

// ============================================================================
// Transfer events
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TokenStandard {
    #[serde(rename = "ERC721")]
    Erc721,
    #[serde(rename = "ERC1155")]
    Erc1155,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransferShape {
    Single,
    Batch,
}

impl std::fmt::Display for TokenStandard {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TokenStandard::Erc721 => write!(f, "ERC721"),
            TokenStandard::Erc1155 => write!(f, "ERC1155"),
        }
    }
}

impl std::fmt::Display for TransferShape {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TransferShape::Single => write!(f, "single"),
            TransferShape::Batch => write!(f, "batch"),
        }
    }
}

/// One decoded transfer log.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferEvent {
    pub tx_hash: TxHash,
    pub block_number: u64,
    /// Position of the log in its block, when the node reports it
    pub log_index: Option<u64>,
    /// Token contract that emitted the log
    pub contract: Address,
    pub from: Address,
    pub to: Address,
    pub token_ids: Vec<U256>,
    /// Empty for ERC721
    pub amounts: Vec<U256>,
    pub token_standard: TokenStandard,
    pub transfer_shape: TransferShape,
}

// ============================================================================
// Transaction records
// ============================================================================

/// Persisted transaction document, one per transaction hash per collection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransactionRecord {
    #[serde(rename = "transactionHash")]
    pub tx_hash: TxHash,

    #[serde(rename = "blockNumber")]
    pub block_number: u64,

    /// Transaction sender
    pub from: Address,

    /// Transaction recipient (None for contract creation)
    pub to: Option<Address>,

    /// Gas limit
    pub gas: u64,

    /// Gas price in wei
    #[serde(rename = "gasPrice")]
    pub gas_price: u64,

    /// Transferred native value in ether units
    pub value: String,

    /// Append-only token ids, one or more per merged event
    #[serde(rename = "tokenId", with = "token_values")]
    pub token_ids: Vec<U256>,

    /// ERC1155 amounts; ERC721 events contribute none
    #[serde(rename = "amount", with = "token_values")]
    pub amounts: Vec<U256>,

    /// One tag per merged event
    pub ms: Vec<Classification>,

    /// Token contract of the first merged event
    pub contract: Address,

    #[serde(rename = "tokentype")]
    pub token_standard: TokenStandard,

    #[serde(rename = "transferType")]
    pub transfer_shape: TransferShape,

    /// Block timestamp, `Tue, 06 Jun 2023 00:00:23 UTC`
    pub time: String,

    #[serde(rename = "collectionName")]
    pub collection_name: String,

    pub symbol: String,

    /// Marketplace that emitted the first recognized event, empty if none
    #[serde(rename = "marketPlace")]
    pub market_place: String,

    /// Ingestion time, same layout as `time`
    #[serde(rename = "pushedToDb")]
    pub pushed_to_db: String,
}

impl TransactionRecord {
    /// Number of transfer events merged into this record.
    pub fn event_count(&self) -> usize {
        self.ms.len()
    }
}

/// Token ids and amounts are 256-bit; the store keeps them as 64-bit integers
/// when they fit and as decimal strings otherwise.
mod token_values {
    use alloy_primitives::U256;
    use serde::de::Error as _;
    use serde::ser::SerializeSeq;
    use serde::{Deserialize, Deserializer, Serializer};

    #[derive(Deserialize)]
    #[serde(untagged)]
    enum StoredValue {
        Int(i64),
        Text(String),
    }

    pub fn serialize<S: Serializer>(values: &[U256], serializer: S) -> Result<S::Ok, S::Error> {
        let mut seq = serializer.serialize_seq(Some(values.len()))?;
        for value in values {
            match i64::try_from(*value) {
                Ok(small) => seq.serialize_element(&small)?,
                Err(_) => seq.serialize_element(&value.to_string())?,
            }
        }
        seq.end()
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<U256>, D::Error> {
        let stored = Vec::<StoredValue>::deserialize(deserializer)?;
        stored
            .into_iter()
            .map(|value| match value {
                StoredValue::Int(n) if n >= 0 => Ok(U256::from(n as u64)),
                StoredValue::Int(n) => Err(D::Error::custom(format!("negative token value {n}"))),
                StoredValue::Text(s) => s.parse::<U256>().map_err(D::Error::custom),
            })
            .collect()
    }
}

// ============================================================================
// Checkpoints
// ============================================================================

/// Progress record for one calendar day.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Checkpoint {
    /// UTC midnight of the day
    pub date: DateTime<Utc>,

    #[serde(rename = "rangeStart")]
    pub range_start: u64,

    /// Below `range_start` while the day is in flight
    #[serde(rename = "rangeEnd")]
    pub range_end: u64,
}

impl Checkpoint {
    /// True if the stored range covers `[start_block, end_block - 1]`.
    pub fn covers(&self, start_block: u64, end_block: u64) -> bool {
        self.range_start <= start_block && self.range_end >= end_block.saturating_sub(1)
    }
}

/// Name of the collection holding a day's records, e.g. `25_Mar_2023_Collection`.
pub fn collection_name(date: NaiveDate) -> String {
    date.format("%d_%b_%Y_Collection").to_string()
}
