//! Day-by-day backfill driver.
//!
//! For every requested calendar day the driver resolves the day's block range,
//! consults the stored checkpoint, processes the range when needed, records
//! completion and then refreshes the RPC connection. Days run strictly one
//! after another.

use crate::checkpoint::{CheckpointManager, DayRange, DayStatus};
use crate::config::ScanConfig;
use crate::dater::BlockResolver;
use crate::error::IngestError;
use crate::orchestrator::{BatchOrchestrator, RangeSummary};
use crate::rpc::ChainClient;
use crate::store::DocumentStore;
use chrono::{DateTime, Days, NaiveDate, NaiveTime, Utc};
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info};

/// UTC bounds of one calendar day, `00:00:00` to `23:59:59`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DayWindow {
    pub date: NaiveDate,
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl DayWindow {
    pub fn for_date(date: NaiveDate) -> Self {
        let start = date.and_time(NaiveTime::MIN).and_utc();
        let end = start + chrono::Duration::seconds(86_399);
        Self { date, start, end }
    }
}

/// Days `start + i * step` for `i` in `0..count`; a negative step walks back.
pub fn days_to_process(start: NaiveDate, count: u32, step: i64) -> Vec<NaiveDate> {
    let offset = Days::new(step.unsigned_abs());
    let mut days = Vec::with_capacity(count as usize);
    let mut current = Some(start);
    for _ in 0..count {
        let Some(day) = current else { break };
        days.push(day);
        current = if step < 0 {
            day.checked_sub_days(offset)
        } else {
            day.checked_add_days(offset)
        };
    }
    days
}

#[derive(Debug, Clone)]
pub enum DayOutcome {
    Skipped,
    Processed(RangeSummary),
}

#[derive(Debug, Clone)]
pub struct DayReport {
    pub day: DayRange,
    /// Status found before the day was handled
    pub status: DayStatus,
    pub outcome: DayOutcome,
}

pub struct DailyDriver<C: ChainClient, S: DocumentStore, R: BlockResolver> {
    chain: Arc<C>,
    resolver: Arc<R>,
    orchestrator: BatchOrchestrator<C, S>,
    checkpoints: CheckpointManager<S>,
    reconnect_settle: Duration,
}

impl<C: ChainClient, S: DocumentStore, R: BlockResolver> DailyDriver<C, S, R> {
    pub fn new(
        chain: Arc<C>,
        store: Arc<S>,
        resolver: Arc<R>,
        scan: ScanConfig,
        reconnect_settle: Duration,
    ) -> Self {
        Self {
            orchestrator: BatchOrchestrator::new(chain.clone(), store.clone(), scan),
            checkpoints: CheckpointManager::new(store),
            chain,
            resolver,
            reconnect_settle,
        }
    }

    /// Resolve a calendar day to its block range.
    pub async fn resolve_day(&self, date: NaiveDate) -> Result<DayRange, IngestError> {
        let window = DayWindow::for_date(date);
        let start_block = self.resolver.resolve_block_for_timestamp(window.start).await?;
        let end_block = self.resolver.resolve_block_for_timestamp(window.end).await?;
        if end_block < start_block {
            return Err(IngestError::BlockRange(format!(
                "{}: end block {} precedes start block {}",
                date, end_block, start_block
            )));
        }
        Ok(DayRange {
            date,
            start_block,
            end_block,
        })
    }

    /// Process every day in `dates`, stopping at the first failure.
    pub async fn run(&self, dates: &[NaiveDate]) -> Result<Vec<DayReport>, IngestError> {
        let mut reports = Vec::with_capacity(dates.len());

        for (i, date) in dates.iter().enumerate() {
            info!("Day {} of {}: {}", i + 1, dates.len(), date);
            match self.run_day(*date).await {
                Ok(report) => reports.push(report),
                Err(e) => {
                    error!("Day {} failed, no completion checkpoint written: {}", date, e);
                    return Err(e);
                }
            }
        }

        let processed = reports
            .iter()
            .filter(|r| matches!(r.outcome, DayOutcome::Processed(_)))
            .count();
        info!(
            "Backfill finished: {} days processed, {} skipped",
            processed,
            reports.len() - processed
        );
        Ok(reports)
    }

    async fn run_day(&self, date: NaiveDate) -> Result<DayReport, IngestError> {
        let day = self.resolve_day(date).await?;
        let collection = day.collection();
        info!(
            "{}: blocks {} to {} ({} blocks) into {}",
            date,
            day.start_block,
            day.end_block,
            day.end_block - day.start_block + 1,
            collection
        );

        let status = self.checkpoints.status(&day).await?;
        if status == DayStatus::Complete {
            info!("Data for {} already processed. Skipping", collection);
            return Ok(DayReport {
                day,
                status,
                outcome: DayOutcome::Skipped,
            });
        }

        self.checkpoints.begin_day(&day, &status).await?;
        let summary = self
            .orchestrator
            .process_range(day.start_block, day.end_block, &collection)
            .await?;
        self.checkpoints.complete_day(&day).await?;

        info!(
            "Data processed for {}: {} events, {} records",
            collection,
            summary.events.total(),
            summary.records
        );
        self.refresh_connection().await?;

        Ok(DayReport {
            day,
            status,
            outcome: DayOutcome::Processed(summary),
        })
    }

    /// Report each day's checkpoint state without processing anything.
    pub async fn status(&self, dates: &[NaiveDate]) -> Result<Vec<(DayRange, DayStatus)>, IngestError> {
        let mut statuses = Vec::with_capacity(dates.len());
        for date in dates {
            let day = self.resolve_day(*date).await?;
            let status = self.checkpoints.status(&day).await?;
            statuses.push((day, status));
        }
        Ok(statuses)
    }

    async fn refresh_connection(&self) -> Result<(), IngestError> {
        info!("Refreshing RPC connection");
        self.chain.disconnect();
        tokio::time::sleep(self.reconnect_settle).await;
        self.chain.connect().await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classify::Classification;
    use crate::dater::BlockDater;
    use crate::ethereum::ZERO_ADDRESS;
    use crate::schemas::{Checkpoint, TokenStandard, TransactionRecord, TransferShape};
    use crate::store::{BulkOperation, MemoryStore};
    use crate::testing::{erc1155_single_log, erc721_log, MockChain, BLOCK_TIME};
    use alloy_primitives::{address, Address, B256, U256};

    const KITTIES: Address = address!("00000000000000000000000000000000000000c1");
    const ITEMS: Address = address!("00000000000000000000000000000000000000c2");
    const ALICE: Address = address!("00000000000000000000000000000000000000a1");

    /// Mock genesis is 2023-06-05T00:00:00Z with 12 second blocks, so a day is 7200 blocks.
    const BLOCKS_PER_DAY: u64 = 86_400 / BLOCK_TIME;

    fn june(day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2023, 6, day).unwrap()
    }

    type Driver = DailyDriver<MockChain, MemoryStore, BlockDater<MockChain>>;

    fn driver(chain: &Arc<MockChain>, store: &Arc<MemoryStore>) -> Driver {
        let scan = ScanConfig {
            chunk_size: 1_000,
            concurrency: 2,
            batch_threshold: 300,
        };
        DailyDriver::new(
            chain.clone(),
            store.clone(),
            Arc::new(BlockDater::new(chain.clone())),
            scan,
            Duration::ZERO,
        )
    }

    /// Mint of ERC721 #7 and ERC1155 #3 x2 in one transaction on June 5th.
    fn seed_mint(chain: &MockChain) -> B256 {
        let tx = B256::repeat_byte(0x77);
        chain.add_transaction(
            tx,
            100,
            ALICE,
            Some(KITTIES),
            vec![
                erc721_log(KITTIES, 100, tx, ZERO_ADDRESS, ALICE, 7),
                erc1155_single_log(ITEMS, 100, tx, ZERO_ADDRESS, ALICE, 3, 2),
            ],
        );
        tx
    }

    #[test]
    fn test_day_window() {
        let window = DayWindow::for_date(june(6));
        assert_eq!(window.start.to_rfc3339(), "2023-06-06T00:00:00+00:00");
        assert_eq!(window.end.to_rfc3339(), "2023-06-06T23:59:59+00:00");
    }

    #[test]
    fn test_days_to_process() {
        assert_eq!(days_to_process(june(5), 3, 1), vec![june(5), june(6), june(7)]);
        assert_eq!(days_to_process(june(5), 3, 7), vec![june(5), june(12), june(19)]);
        assert!(days_to_process(june(5), 0, 1).is_empty());
    }

    #[test]
    fn test_days_walk_backward() {
        assert_eq!(days_to_process(june(5), 3, -1), vec![june(5), june(4), june(3)]);
        let march = NaiveDate::from_ymd_opt(2023, 3, 25).unwrap();
        assert_eq!(
            days_to_process(june(5), 2, -72),
            vec![june(5), march]
        );
    }

    #[tokio::test]
    async fn test_resolve_day() {
        let chain = Arc::new(MockChain::new(3 * BLOCKS_PER_DAY));
        let store = Arc::new(MemoryStore::new());
        let day = driver(&chain, &store).resolve_day(june(6)).await.unwrap();
        assert_eq!(day.start_block, BLOCKS_PER_DAY);
        assert_eq!(day.end_block, 2 * BLOCKS_PER_DAY);
    }

    #[tokio::test]
    async fn test_run_writes_records_and_checkpoints() {
        let chain = Arc::new(MockChain::new(3 * BLOCKS_PER_DAY));
        let store = Arc::new(MemoryStore::new());
        let tx = seed_mint(&chain);
        let driver = driver(&chain, &store);

        let reports = driver.run(&[june(5), june(6)]).await.unwrap();
        assert_eq!(reports.len(), 2);
        assert!(reports.iter().all(|r| matches!(r.outcome, DayOutcome::Processed(_))));
        assert!(reports.iter().all(|r| r.status == DayStatus::Unseen));

        let record = store.find_one("05_Jun_2023_Collection", tx).await.unwrap().unwrap();
        assert_eq!(record.token_ids, vec![U256::from(7u64), U256::from(3u64)]);
        assert_eq!(record.amounts, vec![U256::from(2u64)]);
        assert_eq!(record.ms, vec![Classification::Mint, Classification::Mint]);
        assert_eq!(record.time, "Mon, 05 Jun 2023 00:20:00 UTC");
        assert!(store.records("06_Jun_2023_Collection").is_empty());

        for date in [june(5), june(6)] {
            let day = driver.resolve_day(date).await.unwrap();
            assert_eq!(driver.checkpoints.status(&day).await.unwrap(), DayStatus::Complete);
        }
        // one refresh per processed day
        assert_eq!(MockChain::count(&chain.disconnects), 2);
        assert_eq!(MockChain::count(&chain.connects), 2);
    }

    #[tokio::test]
    async fn test_rerun_skips_complete_days_without_duplicates() {
        let chain = Arc::new(MockChain::new(3 * BLOCKS_PER_DAY));
        let store = Arc::new(MemoryStore::new());
        let tx = seed_mint(&chain);
        let driver = driver(&chain, &store);

        driver.run(&[june(5)]).await.unwrap();
        let writes = store.bulk_write_count();
        let logs_queries = MockChain::count(&chain.get_logs_calls);

        let reports = driver.run(&[june(5)]).await.unwrap();
        assert!(matches!(reports[0].outcome, DayOutcome::Skipped));
        assert_eq!(reports[0].status, DayStatus::Complete);
        assert_eq!(store.bulk_write_count(), writes);
        assert_eq!(MockChain::count(&chain.get_logs_calls), logs_queries);

        let record = store.find_one("05_Jun_2023_Collection", tx).await.unwrap().unwrap();
        assert_eq!(record.ms.len(), 2);
        assert_eq!(MockChain::count(&chain.connects), 1);
    }

    #[tokio::test]
    async fn test_partial_day_is_dropped_and_redone() {
        let chain = Arc::new(MockChain::new(3 * BLOCKS_PER_DAY));
        let store = Arc::new(MemoryStore::new());
        let tx = seed_mint(&chain);
        let driver = driver(&chain, &store);
        let day = driver.resolve_day(june(5)).await.unwrap();

        // leftovers of an interrupted run covering [start, start + 50]
        store
            .upsert_checkpoint(&Checkpoint {
                date: day.midnight(),
                range_start: day.start_block,
                range_end: day.start_block + 50,
            })
            .await
            .unwrap();
        let mut stale = stale_record(tx);
        stale.ms = vec![Classification::Mint];
        store
            .bulk_write(&day.collection(), &[BulkOperation::upsert_append(stale)])
            .await
            .unwrap();

        let reports = driver.run(&[june(5)]).await.unwrap();
        assert!(matches!(reports[0].status, DayStatus::Partial(_)));
        assert_eq!(store.dropped(), vec![day.collection()]);

        let record = store.find_one(&day.collection(), tx).await.unwrap().unwrap();
        assert_eq!(record.token_ids, vec![U256::from(7u64), U256::from(3u64)]);
        assert_eq!(record.ms.len(), 2);
        assert_eq!(driver.checkpoints.status(&day).await.unwrap(), DayStatus::Complete);
    }

    #[tokio::test]
    async fn test_failed_day_leaves_partial_marker_and_recovers() {
        let chain = Arc::new(MockChain::new(3 * BLOCKS_PER_DAY));
        let store = Arc::new(MemoryStore::new());
        let tx = seed_mint(&chain);
        let driver = driver(&chain, &store);
        let day = driver.resolve_day(june(5)).await.unwrap();

        chain.fail_logs_between(5_000, 5_000);
        assert!(driver.run(&[june(5), june(6)]).await.is_err());
        assert!(matches!(driver.checkpoints.status(&day).await.unwrap(), DayStatus::Partial(_)));
        // the failing day stops the run before June 6th
        let next = driver.resolve_day(june(6)).await.unwrap();
        assert_eq!(driver.checkpoints.status(&next).await.unwrap(), DayStatus::Unseen);
        assert_eq!(MockChain::count(&chain.connects), 0);

        chain.clear_failures();
        driver.run(&[june(5)]).await.unwrap();
        let record = store.find_one(&day.collection(), tx).await.unwrap().unwrap();
        assert_eq!(record.ms.len(), 2);
        assert_eq!(record.token_ids.len(), 2);
    }

    #[tokio::test]
    async fn test_status_reports_without_processing() {
        let chain = Arc::new(MockChain::new(3 * BLOCKS_PER_DAY));
        let store = Arc::new(MemoryStore::new());
        seed_mint(&chain);
        let driver = driver(&chain, &store);
        driver.run(&[june(5)]).await.unwrap();
        let queries = MockChain::count(&chain.get_logs_calls);

        let statuses = driver.status(&[june(5), june(6)]).await.unwrap();
        assert_eq!(statuses[0].1, DayStatus::Complete);
        assert_eq!(statuses[1].1, DayStatus::Unseen);
        assert_eq!(MockChain::count(&chain.get_logs_calls), queries);
    }

    fn stale_record(tx: B256) -> TransactionRecord {
        TransactionRecord {
            tx_hash: tx,
            block_number: 100,
            from: ALICE,
            to: Some(KITTIES),
            gas: 150_000,
            gas_price: 30_000_000_000,
            value: "0".to_string(),
            token_ids: vec![U256::from(7u64)],
            amounts: vec![],
            ms: vec![],
            contract: KITTIES,
            token_standard: TokenStandard::Erc721,
            transfer_shape: TransferShape::Single,
            time: String::new(),
            collection_name: String::new(),
            symbol: String::new(),
            market_place: String::new(),
            pushed_to_db: String::new(),
        }
    }
}
