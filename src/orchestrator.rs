//! Chunked, concurrent processing of one block range.
//!
//! The range is cut into fixed-size chunks. Each chunk scans the three transfer
//! kinds, merges events by transaction, and streams one upsert per record into
//! its own [`BulkWriter`]. Chunks run on a bounded pool; the first failing chunk
//! aborts the range and cancels the chunks still in flight.

use crate::aggregate::Aggregator;
use crate::config::ScanConfig;
use crate::decoder::EventKind;
use crate::enrich::Enricher;
use crate::error::IngestError;
use crate::rpc::ChainClient;
use crate::scanner::RangeScanner;
use crate::store::{BulkOperation, BulkWriter, DocumentStore, WriteSummary};
use futures::stream::{self, StreamExt, TryStreamExt};
use std::sync::Arc;
use tracing::{debug, info};

/// Inclusive block range.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct BlockRange {
    pub start: u64,
    pub end: u64,
}

impl std::fmt::Display for BlockRange {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}-{}", self.start, self.end)
    }
}

/// Split `[start, end]` into consecutive chunks of at most `size` blocks.
pub fn split_into_ranges(start: u64, end: u64, size: u64) -> Vec<BlockRange> {
    let size = size.max(1);
    let mut ranges = Vec::new();
    let mut chunk_start = start;
    while chunk_start <= end {
        let chunk_end = chunk_start.saturating_add(size - 1).min(end);
        ranges.push(BlockRange {
            start: chunk_start,
            end: chunk_end,
        });
        match chunk_end.checked_add(1) {
            Some(next) => chunk_start = next,
            None => break,
        }
    }
    ranges
}

/// Decoded events per transfer kind.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EventCounts {
    pub erc721: usize,
    pub erc1155_single: usize,
    pub erc1155_batch: usize,
}

impl EventCounts {
    pub fn total(&self) -> usize {
        self.erc721 + self.erc1155_single + self.erc1155_batch
    }

    fn add(&mut self, kind: EventKind, count: usize) {
        match kind {
            EventKind::Erc721Transfer => self.erc721 += count,
            EventKind::Erc1155Single => self.erc1155_single += count,
            EventKind::Erc1155Batch => self.erc1155_batch += count,
        }
    }
}

impl std::ops::AddAssign for EventCounts {
    fn add_assign(&mut self, other: Self) {
        self.erc721 += other.erc721;
        self.erc1155_single += other.erc1155_single;
        self.erc1155_batch += other.erc1155_batch;
    }
}

#[derive(Debug, Clone)]
pub struct ChunkSummary {
    pub range: BlockRange,
    pub events: EventCounts,
    pub malformed: usize,
    pub records: usize,
    pub writes: WriteSummary,
    pub flushes: usize,
}

/// Totals for a processed range; chunks sorted by start block.
#[derive(Debug, Clone, Default)]
pub struct RangeSummary {
    pub chunks: Vec<ChunkSummary>,
    pub events: EventCounts,
    pub malformed: usize,
    pub records: usize,
    /// Documents inserted vs. merged into existing ones
    pub writes: WriteSummary,
    pub flushes: usize,
}

impl RangeSummary {
    fn from_chunks(mut chunks: Vec<ChunkSummary>) -> Self {
        chunks.sort_by_key(|c| c.range);
        let mut summary = RangeSummary::default();
        for chunk in &chunks {
            summary.events += chunk.events;
            summary.malformed += chunk.malformed;
            summary.records += chunk.records;
            summary.writes += chunk.writes;
            summary.flushes += chunk.flushes;
        }
        summary.chunks = chunks;
        summary
    }
}

pub struct BatchOrchestrator<C: ChainClient, S: DocumentStore> {
    chain: Arc<C>,
    store: Arc<S>,
    scanner: RangeScanner<C>,
    settings: ScanConfig,
}

impl<C: ChainClient, S: DocumentStore> BatchOrchestrator<C, S> {
    pub fn new(chain: Arc<C>, store: Arc<S>, settings: ScanConfig) -> Self {
        Self {
            scanner: RangeScanner::new(chain.clone()),
            chain,
            store,
            settings,
        }
    }

    /// Process `[start, end]` into `collection`.
    pub async fn process_range(&self, start: u64, end: u64, collection: &str) -> Result<RangeSummary, IngestError> {
        if start > end {
            return Err(IngestError::BlockRange(format!("start {} is after end {}", start, end)));
        }

        let ranges = split_into_ranges(start, end, self.settings.chunk_size);
        info!(
            "Processing blocks {} to {} in {} chunks of {} (concurrency {})",
            start,
            end,
            ranges.len(),
            self.settings.chunk_size,
            self.settings.concurrency
        );

        let chunks: Vec<ChunkSummary> = stream::iter(ranges)
            .map(|range| self.process_chunk(range, collection))
            .buffer_unordered(self.settings.concurrency.max(1))
            .try_collect()
            .await?;

        let summary = RangeSummary::from_chunks(chunks);
        info!(
            "Blocks {} to {}: {} events ({} ERC721, {} single, {} batch), {} records ({} new, {} merged), {} malformed logs skipped",
            start,
            end,
            summary.events.total(),
            summary.events.erc721,
            summary.events.erc1155_single,
            summary.events.erc1155_batch,
            summary.records,
            summary.writes.upserted,
            summary.writes.modified,
            summary.malformed
        );
        Ok(summary)
    }

    async fn process_chunk(&self, range: BlockRange, collection: &str) -> Result<ChunkSummary, IngestError> {
        let mut events = Vec::new();
        let mut counts = EventCounts::default();
        let mut malformed = 0usize;

        for kind in EventKind::ALL {
            let output = self.scanner.scan(kind, range.start, range.end).await?;
            counts.add(kind, output.events.len());
            malformed += output.malformed;
            events.extend(output.events);
        }

        let mut enricher = Enricher::new(self.chain.clone());
        let mut aggregator = Aggregator::new();
        aggregator.merge(&events, &mut enricher).await?;
        let records = aggregator.into_records();
        let record_count = records.len();

        let mut writer = BulkWriter::new(self.store.as_ref(), collection, self.settings.batch_threshold);
        for record in records {
            writer.push(BulkOperation::upsert_append(record)).await?;
        }
        let (writes, flushes) = writer.finish().await?;

        debug!(
            "Chunk {}: {} events, {} records, {} flushes",
            range,
            counts.total(),
            record_count,
            flushes
        );

        Ok(ChunkSummary {
            range,
            events: counts,
            malformed,
            records: record_count,
            writes,
            flushes,
        })
    }
}
