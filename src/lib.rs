//! NFT Transfer Backfill Library
//!
//! Scans an EVM chain one UTC day at a time for ERC721 and ERC1155 transfer
//! events, enriches each transaction with chain and contract metadata, and
//! upserts one document per transaction hash into a per-day collection.
//!
//! # Pipeline Stages
//!
//! 1. **Date resolution** ([`dater`]): maps a day's UTC bounds to block numbers
//! 2. **Checkpointing** ([`checkpoint`]): skips complete days, drops and redoes partial ones
//! 3. **Scanning** ([`scanner`], [`decoder`]): fetches and decodes the three transfer event kinds per chunk
//! 4. **Enrichment** ([`enrich`], [`marketplace`], [`classify`]): adds transaction, block, metadata and marketplace fields
//! 5. **Merging and writing** ([`aggregate`], [`store`]): folds events per transaction and bulk upserts them
//!
//! [`driver::DailyDriver`] runs the stages for a list of days and
//! [`orchestrator::BatchOrchestrator`] handles a single block range.
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use std::time::Duration;
//! use nft_backfill::config::IndexerConfig;
//! use nft_backfill::dater::BlockDater;
//! use nft_backfill::driver::{days_to_process, DailyDriver};
//! use nft_backfill::mongo::MongoStore;
//! use nft_backfill::rpc::EthRpcClient;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = IndexerConfig::load()?;
//!     let chain = Arc::new(EthRpcClient::new(config.rpc.clone())?);
//!     let store = Arc::new(MongoStore::connect(&config.store).await?);
//!     let dater = Arc::new(BlockDater::new(chain.clone()));
//!     let driver = DailyDriver::new(chain, store, dater, config.scan.clone(), Duration::from_secs(5));
//!
//!     let days = days_to_process(config.window.start_date, 3, 1);
//!     let reports = driver.run(&days).await?;
//!     println!("Handled {} days", reports.len());
//!     Ok(())
//! }
//! ```

pub mod aggregate;
pub mod checkpoint;
pub mod classify;
pub mod config;
pub mod dater;
pub mod decoder;
pub mod driver;
pub mod enrich;
pub mod error;
pub mod ethereum;
pub mod marketplace;
pub mod mongo;
pub mod orchestrator;
pub mod rpc;
pub mod scanner;
pub mod schemas;
pub mod store;

#[cfg(test)]
mod testing;

// Re-export commonly used types
pub use config::IndexerConfig;
pub use error::IngestError;
pub use schemas::{Checkpoint, TransactionRecord, TransferEvent};
