//! MongoDB implementation of [`DocumentStore`].
//!
//! Day collections hold one document per transaction hash, backed by a unique
//! index so concurrent chunks cannot both insert the same hash. Checkpoints live
//! in a single collection keyed by the day's UTC midnight.

use crate::config::StoreConfig;
use crate::schemas::{Checkpoint, TransactionRecord};
use crate::store::{BulkOperation, DocumentStore, StoreError, WriteSummary};
use alloy_primitives::TxHash;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use mongodb::bson::{self, doc, Bson, Document};
use mongodb::options::IndexOptions;
use mongodb::{Client, Database, IndexModel};
use tracing::{debug, info};

pub struct MongoStore {
    database: Database,
    checkpoint_collection: String,
}

impl MongoStore {
    /// Connect and verify the server answers.
    pub async fn connect(config: &StoreConfig) -> Result<Self, StoreError> {
        let client = Client::with_uri_str(&config.url).await?;
        let database = client.database(&config.database);
        database.run_command(doc! { "ping": 1 }).await?;
        info!("Connected to MongoDB database {}", config.database);

        Ok(Self {
            database,
            checkpoint_collection: config.checkpoint_collection.clone(),
        })
    }
}

fn bson_datetime(date: &DateTime<Utc>) -> bson::DateTime {
    bson::DateTime::from_millis(date.timestamp_millis())
}

/// Block numbers written by other tools may be stored as int32 or double.
fn read_block(doc: &Document, key: &str) -> Result<u64, StoreError> {
    let value = match doc.get(key) {
        Some(Bson::Int32(n)) => u64::try_from(*n).ok(),
        Some(Bson::Int64(n)) => u64::try_from(*n).ok(),
        Some(Bson::Double(n)) if *n >= 0.0 && n.fract() == 0.0 => Some(*n as u64),
        _ => None,
    };
    value.ok_or_else(|| StoreError::MalformedCheckpoint(format!("{key} missing or not a block number")))
}

fn block_bson(block: u64) -> Bson {
    i64::try_from(block).map(Bson::Int64).unwrap_or(Bson::Null)
}

/// Server error code for a unique index violation.
const DUPLICATE_KEY: i64 = 11000;

/// Upserts that lose an insert race are retried; the retry matches the
/// document the winner inserted.
const MAX_UPSERT_ATTEMPTS: usize = 3;

fn int(value: Option<&Bson>) -> Option<i64> {
    match value {
        Some(Bson::Int32(n)) => Some(i64::from(*n)),
        Some(Bson::Int64(n)) => Some(*n),
        _ => None,
    }
}

/// Split `writeErrors` into the indexes of duplicate-key races and the
/// messages of everything else.
fn split_write_errors(reply: &Document) -> (Vec<usize>, Vec<String>) {
    let mut raced = Vec::new();
    let mut rejected = Vec::new();
    let Ok(errors) = reply.get_array("writeErrors") else {
        return (raced, rejected);
    };

    for error in errors.iter().filter_map(Bson::as_document) {
        let index = int(error.get("index")).and_then(|i| usize::try_from(i).ok());
        match (int(error.get("code")), index) {
            (Some(DUPLICATE_KEY), Some(index)) => raced.push(index),
            _ => rejected.push(error.get_str("errmsg").unwrap_or("unknown error").to_string()),
        }
    }
    (raced, rejected)
}

fn count(reply: &Document, key: &str) -> usize {
    match reply.get(key) {
        Some(Bson::Int32(n)) => *n as usize,
        Some(Bson::Int64(n)) => *n as usize,
        Some(Bson::Array(items)) => items.len(),
        _ => 0,
    }
}

impl MongoStore {
    async fn run_updates(&self, collection: &str, ops: &[&BulkOperation]) -> Result<Document, StoreError> {
        let updates = ops
            .iter()
            .map(|op| {
                Ok(doc! {
                    "q": op.filter_document(),
                    "u": op.update_document()?,
                    "upsert": true,
                })
            })
            .collect::<Result<Vec<Document>, StoreError>>()?;

        Ok(self
            .database
            .run_command(doc! {
                "update": collection,
                "updates": updates,
                "ordered": false,
            })
            .await?)
    }
}

#[async_trait]
impl DocumentStore for MongoStore {
    async fn bulk_write(&self, collection: &str, ops: &[BulkOperation]) -> Result<WriteSummary, StoreError> {
        let mut pending: Vec<&BulkOperation> = ops.iter().collect();
        let mut summary = WriteSummary::default();

        for attempt in 1..=MAX_UPSERT_ATTEMPTS {
            if pending.is_empty() {
                break;
            }
            let reply = self.run_updates(collection, &pending).await?;
            summary += WriteSummary {
                upserted: count(&reply, "upserted"),
                modified: count(&reply, "nModified"),
            };

            let (raced, rejected) = split_write_errors(&reply);
            if let Some(message) = rejected.first() {
                return Err(StoreError::BulkWrite {
                    collection: collection.to_string(),
                    failed: rejected.len(),
                    message: message.clone(),
                });
            }
            if !raced.is_empty() {
                debug!(
                    "{} upserts into {} lost an insert race on transactionHash (attempt {})",
                    raced.len(),
                    collection,
                    attempt
                );
            }
            pending = raced.into_iter().filter_map(|i| pending.get(i).copied()).collect();
        }

        if !pending.is_empty() {
            return Err(StoreError::BulkWrite {
                collection: collection.to_string(),
                failed: pending.len(),
                message: format!("duplicate key after {} attempts", MAX_UPSERT_ATTEMPTS),
            });
        }
        Ok(summary)
    }

    async fn find_one(&self, collection: &str, tx_hash: TxHash) -> Result<Option<TransactionRecord>, StoreError> {
        let found = self
            .database
            .collection::<Document>(collection)
            .find_one(doc! { "transactionHash": tx_hash.to_string() })
            .await?;
        match found {
            Some(mut document) => {
                document.remove("_id");
                Ok(Some(bson::from_document(document)?))
            }
            None => Ok(None),
        }
    }

    async fn drop_collection(&self, collection: &str) -> Result<(), StoreError> {
        let existing = self.database.list_collection_names().await?;
        if existing.iter().any(|name| name == collection) {
            self.database.collection::<Document>(collection).drop().await?;
            info!("Dropped collection {}", collection);
        } else {
            debug!("Collection {} does not exist, nothing to drop", collection);
        }
        Ok(())
    }

    async fn prepare_collection(&self, collection: &str) -> Result<(), StoreError> {
        let index = IndexModel::builder()
            .keys(doc! { "transactionHash": 1 })
            .options(IndexOptions::builder().unique(true).build())
            .build();
        self.database
            .collection::<Document>(collection)
            .create_index(index)
            .await?;
        debug!("Unique transactionHash index ensured on {}", collection);
        Ok(())
    }

    async fn checkpoint(&self, date: DateTime<Utc>) -> Result<Option<Checkpoint>, StoreError> {
        let found = self
            .database
            .collection::<Document>(&self.checkpoint_collection)
            .find_one(doc! { "date": bson_datetime(&date) })
            .await?;
        let Some(document) = found else {
            return Ok(None);
        };

        let stored = document
            .get_datetime("date")
            .map_err(|e| StoreError::MalformedCheckpoint(e.to_string()))?;
        Ok(Some(Checkpoint {
            date: DateTime::<Utc>::from_timestamp_millis(stored.timestamp_millis()).unwrap_or(date),
            range_start: read_block(&document, "rangeStart")?,
            range_end: read_block(&document, "rangeEnd")?,
        }))
    }

    async fn upsert_checkpoint(&self, checkpoint: &Checkpoint) -> Result<(), StoreError> {
        let date = bson_datetime(&checkpoint.date);
        self.database
            .collection::<Document>(&self.checkpoint_collection)
            .update_one(
                doc! { "date": date },
                doc! {
                    "$set": {
                        "date": date,
                        "rangeStart": block_bson(checkpoint.range_start),
                        "rangeEnd": block_bson(checkpoint.range_end),
                    }
                },
            )
            .upsert(true)
            .await?;
        Ok(())
    }
}
