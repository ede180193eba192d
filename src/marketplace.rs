//! Marketplace attribution by event signature.
//!
//! A transaction is attributed to the marketplace whose settlement event shows
//! up first in its receipt logs.

use crate::classify::MarketValue;
use crate::rpc::Log;
use alloy_primitives::{b256, B256};

/// Marketplace credited with a transaction and the kind of deal it settled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MarketplaceMatch {
    pub marketplace: &'static str,
    pub value: MarketValue,
}

/// topic0 → marketplace, deal type
const MARKETPLACE_EVENTS: [(B256, &str, MarketValue); 9] = [
    (
        b256!("9d9af8e38d66c62e2c12f0225249fd9d721c54b83f48d9352c97c6cacdcb6f31"),
        "OpenSea",
        MarketValue::Sale,
    ),
    (
        b256!("61cbb2a3dee0b6064c2e681aadd61677fb4ef319f0b547508d495626f5a62f64"),
        "Blur",
        MarketValue::Sale,
    ),
    (
        b256!("68cd251d4d267c6e2034ff0088b990352b97b2002c0476587d0c4da889c11330"),
        "LooksRare",
        MarketValue::Sale,
    ),
    (
        b256!("95fb6205e23ff6bda16a2d1dba56b9ad7c783f67c96fa149785052f47696f2be"),
        "LooksRare",
        MarketValue::BidWon,
    ),
    (
        b256!("3cbb63f144840e5b1b0a38a7c19211d2e89de4d7c5faf8b2d3c1776c302d1d33"),
        "X2Y2",
        MarketValue::Sale,
    ),
    (
        b256!("50273fa02273cceea9cf085b42de5c8af60624140168bd71357db833535877af"),
        "0x Protocol",
        MarketValue::Sale,
    ),
    (
        b256!("dddcdb07e460849cf04a4445b7af9faf01b7f5c7ba75deaf969ac5ed830312c3"),
        "Rarible",
        MarketValue::BidWon,
    ),
    (
        b256!("5764dbcef91eb6f946584f4ea671217c686fa7e858ce4f9f42d08422b86556a9"),
        "SuperRare",
        MarketValue::BidWon,
    ),
    (
        b256!("2a9d06eec42acd217a17785dbec90b8b4f01a93ecd8c127edd36bfccf239f8b6"),
        "SuperRare",
        MarketValue::Sale,
    ),
];

/// Look up a single event signature.
pub fn lookup_topic(topic: &B256) -> Option<MarketplaceMatch> {
    MARKETPLACE_EVENTS
        .iter()
        .find(|(signature, _, _)| signature == topic)
        .map(|(_, marketplace, value)| MarketplaceMatch {
            marketplace,
            value: *value,
        })
}

/// First log (in receipt order) whose topic0 is a known marketplace event.
pub fn first_match(logs: &[Log]) -> Option<MarketplaceMatch> {
    logs.iter()
        .filter_map(|log| log.topic0())
        .find_map(lookup_topic)
}
