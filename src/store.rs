//! Document store seam, bulk upsert operations and write batching.
//!
//! Records are written as keyed upserts: a new transaction hash inserts the
//! whole document, an existing one only gets the transfer arrays appended.
//! That keeps writes order independent across chunks and lets a retried day
//! merge into whatever a previous attempt left behind.

use crate::schemas::{Checkpoint, TransactionRecord};
use alloy_primitives::TxHash;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use mongodb::bson::{self, doc, Bson, Document};
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use thiserror::Error;
use tracing::debug;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("MongoDB error: {0}")]
    Database(#[from] mongodb::error::Error),

    #[error("BSON encoding error: {0}")]
    Encode(#[from] bson::ser::Error),

    #[error("BSON decoding error: {0}")]
    Decode(#[from] bson::de::Error),

    #[error("bulk write to {collection} rejected {failed} operations: {message}")]
    BulkWrite {
        collection: String,
        failed: usize,
        message: String,
    },

    #[error("malformed checkpoint document: {0}")]
    MalformedCheckpoint(String),
}

/// Counts reported by one bulk write.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WriteSummary {
    pub upserted: usize,
    pub modified: usize,
}

impl std::ops::AddAssign for WriteSummary {
    fn add_assign(&mut self, other: Self) {
        self.upserted += other.upserted;
        self.modified += other.modified;
    }
}

/// Storage needed by the backfill.
#[async_trait]
pub trait DocumentStore: Send + Sync {
    /// Apply upserts to `collection`, unordered.
    async fn bulk_write(&self, collection: &str, ops: &[BulkOperation]) -> Result<WriteSummary, StoreError>;

    async fn find_one(&self, collection: &str, tx_hash: TxHash) -> Result<Option<TransactionRecord>, StoreError>;

    /// Drop `collection`; a missing collection is not an error.
    async fn drop_collection(&self, collection: &str) -> Result<(), StoreError>;

    /// Ensure `collection` holds at most one document per transaction hash.
    async fn prepare_collection(&self, collection: &str) -> Result<(), StoreError>;

    /// Checkpoint stored for the day starting at `date`.
    async fn checkpoint(&self, date: DateTime<Utc>) -> Result<Option<Checkpoint>, StoreError>;

    async fn upsert_checkpoint(&self, checkpoint: &Checkpoint) -> Result<(), StoreError>;
}

// ============================================================================
// Bulk operations
// ============================================================================

/// Array fields appended on every write; everything else is set on insert only.
const APPEND_FIELDS: [&str; 3] = ["tokenId", "amount", "ms"];

/// Upsert keyed by transaction hash that appends the record's transfer arrays.
#[derive(Debug, Clone, PartialEq)]
pub struct BulkOperation {
    record: TransactionRecord,
}

impl BulkOperation {
    pub fn upsert_append(record: TransactionRecord) -> Self {
        Self { record }
    }

    pub fn tx_hash(&self) -> TxHash {
        self.record.tx_hash
    }

    pub fn filter_document(&self) -> Document {
        doc! { "transactionHash": self.record.tx_hash.to_string() }
    }

    /// `{$push: {tokenId, amount, ms}, $setOnInsert: {..rest}}`
    pub fn update_document(&self) -> Result<Document, StoreError> {
        let mut on_insert = bson::to_document(&self.record)?;
        on_insert.remove("transactionHash");

        let mut push = Document::new();
        for field in APPEND_FIELDS {
            let values = on_insert.remove(field).unwrap_or_else(|| Bson::Array(Vec::new()));
            push.insert(field, doc! { "$each": values });
        }

        Ok(doc! {
            "$push": push,
            "$setOnInsert": on_insert,
        })
    }

    /// Apply this operation to an in-memory document.
    fn apply_to(&self, existing: Option<&mut TransactionRecord>) -> Option<TransactionRecord> {
        match existing {
            Some(stored) => {
                stored.token_ids.extend(self.record.token_ids.iter().copied());
                stored.amounts.extend(self.record.amounts.iter().copied());
                stored.ms.extend(self.record.ms.iter().copied());
                None
            }
            None => Some(self.record.clone()),
        }
    }
}

// ============================================================================
// Write batching
// ============================================================================

/// Per-chunk operation buffer, flushed when `threshold` operations are queued
/// and once more when the chunk finishes.
pub struct BulkWriter<'a, S: DocumentStore + ?Sized> {
    store: &'a S,
    collection: &'a str,
    threshold: usize,
    queue: Vec<BulkOperation>,
    summary: WriteSummary,
    flushes: usize,
}

impl<'a, S: DocumentStore + ?Sized> BulkWriter<'a, S> {
    pub fn new(store: &'a S, collection: &'a str, threshold: usize) -> Self {
        Self {
            store,
            collection,
            threshold: threshold.max(1),
            queue: Vec::new(),
            summary: WriteSummary::default(),
            flushes: 0,
        }
    }

    pub async fn push(&mut self, op: BulkOperation) -> Result<(), StoreError> {
        self.queue.push(op);
        if self.queue.len() >= self.threshold {
            self.flush().await?;
        }
        Ok(())
    }

    pub async fn flush(&mut self) -> Result<(), StoreError> {
        if self.queue.is_empty() {
            return Ok(());
        }
        let ops = std::mem::take(&mut self.queue);
        let summary = self.store.bulk_write(self.collection, &ops).await?;
        debug!(
            "Flushed {} operations to {} ({} inserted, {} appended)",
            ops.len(),
            self.collection,
            summary.upserted,
            summary.modified
        );
        self.summary += summary;
        self.flushes += 1;
        Ok(())
    }

    /// Flush what is left and report totals: (summary, number of flushes).
    pub async fn finish(mut self) -> Result<(WriteSummary, usize), StoreError> {
        self.flush().await?;
        Ok((self.summary, self.flushes))
    }
}

// ============================================================================
// In-memory store
// ============================================================================

/// Store kept in process memory with the same upsert semantics as MongoDB.
/// Used for dry runs and tests.
#[derive(Default)]
pub struct MemoryStore {
    collections: Mutex<HashMap<String, Vec<TransactionRecord>>>,
    checkpoints: Mutex<BTreeMap<DateTime<Utc>, Checkpoint>>,
    dropped: Mutex<Vec<String>>,
    prepared: Mutex<Vec<String>>,
    bulk_writes: AtomicUsize,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// All records of a collection in insertion order.
    pub fn records(&self, collection: &str) -> Vec<TransactionRecord> {
        self.collections
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(collection)
            .cloned()
            .unwrap_or_default()
    }

    /// Collections dropped so far, in order.
    pub fn dropped(&self) -> Vec<String> {
        self.dropped.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    /// Collections prepared for writing, in order.
    pub fn prepared(&self) -> Vec<String> {
        self.prepared.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    pub fn bulk_write_count(&self) -> usize {
        self.bulk_writes.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl DocumentStore for MemoryStore {
    async fn bulk_write(&self, collection: &str, ops: &[BulkOperation]) -> Result<WriteSummary, StoreError> {
        self.bulk_writes.fetch_add(1, Ordering::SeqCst);
        let mut collections = self.collections.lock().unwrap_or_else(|e| e.into_inner());
        let records = collections.entry(collection.to_string()).or_default();

        let mut summary = WriteSummary::default();
        for op in ops {
            let existing = records.iter_mut().find(|r| r.tx_hash == op.tx_hash());
            match op.apply_to(existing) {
                Some(inserted) => {
                    records.push(inserted);
                    summary.upserted += 1;
                }
                None => summary.modified += 1,
            }
        }
        Ok(summary)
    }

    async fn find_one(&self, collection: &str, tx_hash: TxHash) -> Result<Option<TransactionRecord>, StoreError> {
        Ok(self
            .collections
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(collection)
            .and_then(|records| records.iter().find(|r| r.tx_hash == tx_hash).cloned()))
    }

    async fn drop_collection(&self, collection: &str) -> Result<(), StoreError> {
        self.collections
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(collection);
        self.dropped
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(collection.to_string());
        Ok(())
    }

    async fn prepare_collection(&self, collection: &str) -> Result<(), StoreError> {
        // uniqueness holds by construction: bulk_write looks up the hash under one lock
        self.prepared
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(collection.to_string());
        Ok(())
    }

    async fn checkpoint(&self, date: DateTime<Utc>) -> Result<Option<Checkpoint>, StoreError> {
        Ok(self
            .checkpoints
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(&date)
            .cloned())
    }

    async fn upsert_checkpoint(&self, checkpoint: &Checkpoint) -> Result<(), StoreError> {
        self.checkpoints
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(checkpoint.date, checkpoint.clone());
        Ok(())
    }
}
