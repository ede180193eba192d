//! Per-day progress tracking.
//!
//! A day is either unseen, complete, or partial. Partial days are never
//! resumed mid-range: their collection is dropped and the whole day is redone.
//! A start marker with an empty range is written before a day is processed so
//! that a crash mid-day reads back as partial.

use crate::schemas::{collection_name, Checkpoint};
use crate::store::{DocumentStore, StoreError};
use chrono::{DateTime, NaiveDate, Utc};
use std::fmt;
use std::sync::Arc;
use thiserror::Error;
use tracing::{info, warn};

/// A calendar day resolved to its inclusive block range.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DayRange {
    pub date: NaiveDate,
    pub start_block: u64,
    pub end_block: u64,
}

impl DayRange {
    /// UTC midnight, the key of the day's checkpoint.
    pub fn midnight(&self) -> DateTime<Utc> {
        self.date.and_time(chrono::NaiveTime::MIN).and_utc()
    }

    pub fn collection(&self) -> String {
        collection_name(self.date)
    }
}

/// Stored progress that does not cover the day it belongs to.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("checkpoint for {date} covers blocks {stored_start}-{stored_end}, day needs {required_start}-{required_end}")]
pub struct CheckpointConflict {
    pub date: NaiveDate,
    pub stored_start: u64,
    pub stored_end: u64,
    pub required_start: u64,
    pub required_end: u64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DayStatus {
    Unseen,
    Complete,
    Partial(CheckpointConflict),
}

impl fmt::Display for DayStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DayStatus::Unseen => write!(f, "unseen"),
            DayStatus::Complete => write!(f, "complete"),
            DayStatus::Partial(conflict) => write!(f, "partial ({})", conflict),
        }
    }
}

/// Status of `day` given its stored checkpoint.
pub fn status_for(checkpoint: Option<&Checkpoint>, day: &DayRange) -> DayStatus {
    match checkpoint {
        None => DayStatus::Unseen,
        Some(cp) if cp.covers(day.start_block, day.end_block) => DayStatus::Complete,
        Some(cp) => DayStatus::Partial(CheckpointConflict {
            date: day.date,
            stored_start: cp.range_start,
            stored_end: cp.range_end,
            required_start: day.start_block,
            required_end: day.end_block,
        }),
    }
}

/// Checkpoint written before a day is processed. Its range starts past the
/// day's last block, so it never covers the day, single-block days included.
pub fn start_marker(day: &DayRange) -> Checkpoint {
    Checkpoint {
        date: day.midnight(),
        range_start: day.end_block.saturating_add(1),
        range_end: day.start_block,
    }
}

pub struct CheckpointManager<S: DocumentStore> {
    store: Arc<S>,
}

impl<S: DocumentStore> CheckpointManager<S> {
    pub fn new(store: Arc<S>) -> Self {
        Self { store }
    }

    pub async fn status(&self, day: &DayRange) -> Result<DayStatus, StoreError> {
        let checkpoint = self.store.checkpoint(day.midnight()).await?;
        Ok(status_for(checkpoint.as_ref(), day))
    }

    /// Prepare a day that is not complete: drop leftovers of a partial run,
    /// prepare the day's collection and write the start marker.
    pub async fn begin_day(&self, day: &DayRange, status: &DayStatus) -> Result<(), StoreError> {
        if let DayStatus::Partial(conflict) = status {
            warn!("Partial run detected: {}; redoing the day", conflict);
            self.store.drop_collection(&day.collection()).await?;
        }
        self.store.prepare_collection(&day.collection()).await?;

        self.store.upsert_checkpoint(&start_marker(day)).await
    }

    /// Record the whole day as processed.
    pub async fn complete_day(&self, day: &DayRange) -> Result<(), StoreError> {
        self.store
            .upsert_checkpoint(&Checkpoint {
                date: day.midnight(),
                range_start: day.start_block,
                range_end: day.end_block,
            })
            .await?;
        info!(
            "Checkpoint recorded for {}: blocks {} to {}",
            day.date, day.start_block, day.end_block
        );
        Ok(())
    }
}
