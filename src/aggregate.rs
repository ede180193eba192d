//! Merging transfer events into transaction records.
//!
//! All events of one transaction inside a chunk collapse into a single record.
//! The first event of a transaction pays for one enrichment round trip; later
//! events only append token ids, amounts and one classification tag.

use crate::classify::{classify, MarketValue};
use crate::enrich::{EnrichError, Enricher, Enrichment};
use crate::ethereum::format_utc;
use crate::rpc::ChainClient;
use crate::schemas::{TransactionRecord, TransferEvent};
use alloy_primitives::TxHash;
use chrono::Utc;
use std::collections::HashMap;
use tracing::debug;

/// A record under construction together with the marketplace value used to
/// classify further events of the same transaction.
#[derive(Debug, Clone)]
struct Pending {
    record: TransactionRecord,
    market_value: Option<MarketValue>,
}

/// Records built from one chunk, in first-seen order.
#[derive(Debug, Default)]
pub struct Aggregator {
    order: Vec<TxHash>,
    pending: HashMap<TxHash, Pending>,
}

impl Aggregator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fold `events` into the aggregate, enriching transactions on first sight.
    pub async fn merge<C: ChainClient>(
        &mut self,
        events: &[TransferEvent],
        enricher: &mut Enricher<C>,
    ) -> Result<(), EnrichError> {
        for event in events {
            if let Some(pending) = self.pending.get_mut(&event.tx_hash) {
                merge_event(&mut pending.record, event, pending.market_value);
                continue;
            }

            let enrichment = enricher
                .enrich(event.tx_hash, event.block_number, event.contract)
                .await?;
            let market_value = enrichment.market_value;
            let mut record = new_record(event, enrichment);
            merge_event(&mut record, event, market_value);

            debug!(
                "New record {} in block {} ({} {})",
                event.tx_hash, event.block_number, event.token_standard, event.transfer_shape
            );
            self.order.push(event.tx_hash);
            self.pending.insert(event.tx_hash, Pending { record, market_value });
        }
        Ok(())
    }

    /// Consume the aggregate, yielding records in first-seen order.
    pub fn into_records(mut self) -> Vec<TransactionRecord> {
        self.order
            .iter()
            .filter_map(|hash| self.pending.remove(hash))
            .map(|pending| pending.record)
            .collect()
    }
}

/// Record skeleton for a transaction seen for the first time; arrays start empty.
fn new_record(event: &TransferEvent, enrichment: Enrichment) -> TransactionRecord {
    TransactionRecord {
        tx_hash: event.tx_hash,
        block_number: event.block_number,
        from: enrichment.from,
        to: enrichment.to,
        gas: enrichment.gas,
        gas_price: enrichment.gas_price,
        value: enrichment.value,
        token_ids: Vec::new(),
        amounts: Vec::new(),
        ms: Vec::new(),
        contract: event.contract,
        token_standard: event.token_standard,
        transfer_shape: event.transfer_shape,
        time: enrichment.time,
        collection_name: enrichment.metadata.name,
        symbol: enrichment.metadata.symbol,
        market_place: enrichment.market_place,
        pushed_to_db: format_utc(&Utc::now()),
    }
}

/// Append one event to a record: its token ids, its amounts, and one tag
/// classified on the event's own `from`/`to`.
pub fn merge_event(record: &mut TransactionRecord, event: &TransferEvent, market_value: Option<MarketValue>) {
    record.token_ids.extend(event.token_ids.iter().copied());
    record.amounts.extend(event.amounts.iter().copied());
    record.ms.extend(classify(event.from, event.to, market_value));
}
