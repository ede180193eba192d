//! Transfer classification.
//!
//! Every merged transfer event gets exactly one tag, picked in strict priority
//! order: mint, burn, marketplace sale, marketplace bid, plain transfer.

use crate::ethereum::is_zero;
use alloy_primitives::Address;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Deal type attached to a marketplace event signature.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MarketValue {
    #[serde(rename = "Sale")]
    Sale,
    #[serde(rename = "Bid Won")]
    BidWon,
}

/// Per-event transfer category stored in a record's `ms` array.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Classification {
    #[serde(rename = "Mint")]
    Mint,
    #[serde(rename = "Burn")]
    Burn,
    #[serde(rename = "Sale")]
    Sale,
    #[serde(rename = "Bid Won")]
    BidWon,
    #[serde(rename = "Transfer/Sale")]
    TransferOrSale,
}

impl Classification {
    pub fn as_str(&self) -> &'static str {
        match self {
            Classification::Mint => "Mint",
            Classification::Burn => "Burn",
            Classification::Sale => "Sale",
            Classification::BidWon => "Bid Won",
            Classification::TransferOrSale => "Transfer/Sale",
        }
    }
}

impl fmt::Display for Classification {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl fmt::Display for MarketValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MarketValue::Sale => f.write_str("Sale"),
            MarketValue::BidWon => f.write_str("Bid Won"),
        }
    }
}

/// Classify one transfer.
///
/// Always yields a single tag; the sequence shape matches the `ms` array the
/// tag is appended to.
pub fn classify(from: Address, to: Address, market_value: Option<MarketValue>) -> Vec<Classification> {
    let tag = if is_zero(&from) {
        Classification::Mint
    } else if is_zero(&to) {
        Classification::Burn
    } else {
        match market_value {
            Some(MarketValue::Sale) => Classification::Sale,
            Some(MarketValue::BidWon) => Classification::BidWon,
            None => Classification::TransferOrSale,
        }
    };
    vec![tag]
}
