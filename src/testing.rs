//! Scripted in-memory chain and log builders for tests.

use crate::decoder::EventKind;
use crate::enrich::{nameCall, symbolCall};
use crate::rpc::{Block, ChainClient, Log, RpcError, Transaction, TransactionReceipt};
use alloy_primitives::{Address, Bytes, TxHash, B256, U256, U64};
use alloy_sol_types::{SolCall, SolValue};
use async_trait::async_trait;
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

/// Timestamp of block 0 in the mock chain.
pub const GENESIS_TIMESTAMP: u64 = 1_685_923_200; // 2023-06-05T00:00:00Z
/// Seconds between mock blocks.
pub const BLOCK_TIME: u64 = 12;

fn address_topic(address: Address) -> B256 {
    address.into_word()
}

pub fn raw_log(address: Address, topics: Vec<B256>, data: Bytes) -> Log {
    Log {
        address,
        topics,
        data,
        block_number: None,
        transaction_hash: None,
        log_index: None,
    }
}

fn placed(mut log: Log, block: u64, tx_hash: TxHash) -> Log {
    log.block_number = Some(U64::from(block));
    log.transaction_hash = Some(tx_hash);
    log.log_index = Some(U64::ZERO);
    log
}

pub fn erc721_log(contract: Address, block: u64, tx_hash: TxHash, from: Address, to: Address, token_id: u64) -> Log {
    let topics = vec![
        EventKind::Erc721Transfer.topic(),
        address_topic(from),
        address_topic(to),
        B256::from(U256::from(token_id)),
    ];
    placed(raw_log(contract, topics, Bytes::new()), block, tx_hash)
}

/// ERC20 transfer: same topic0 as ERC721, amount in data, three topics.
pub fn erc20_transfer_log(contract: Address, block: u64, tx_hash: TxHash, from: Address, to: Address, amount: u64) -> Log {
    let topics = vec![EventKind::Erc721Transfer.topic(), address_topic(from), address_topic(to)];
    let data = Bytes::from(U256::from(amount).abi_encode());
    placed(raw_log(contract, topics, data), block, tx_hash)
}

pub fn erc1155_single_log(
    contract: Address,
    block: u64,
    tx_hash: TxHash,
    from: Address,
    to: Address,
    id: u64,
    value: u64,
) -> Log {
    let topics = vec![
        EventKind::Erc1155Single.topic(),
        address_topic(from),
        address_topic(from),
        address_topic(to),
    ];
    let data = Bytes::from((U256::from(id), U256::from(value)).abi_encode_params());
    placed(raw_log(contract, topics, data), block, tx_hash)
}

pub fn erc1155_batch_log(
    contract: Address,
    block: u64,
    tx_hash: TxHash,
    from: Address,
    to: Address,
    ids: &[u64],
    values: &[u64],
) -> Log {
    let topics = vec![
        EventKind::Erc1155Batch.topic(),
        address_topic(from),
        address_topic(from),
        address_topic(to),
    ];
    let ids: Vec<U256> = ids.iter().map(|id| U256::from(*id)).collect();
    let values: Vec<U256> = values.iter().map(|v| U256::from(*v)).collect();
    let data = Bytes::from((ids, values).abi_encode_params());
    placed(raw_log(contract, topics, data), block, tx_hash)
}

/// In-memory chain answering the calls the backfill makes.
#[derive(Default)]
pub struct MockChain {
    head: Mutex<u64>,
    logs: Mutex<Vec<Log>>,
    transactions: Mutex<HashMap<TxHash, Transaction>>,
    receipts: Mutex<HashMap<TxHash, TransactionReceipt>>,
    timestamps: Mutex<BTreeMap<u64, u64>>,
    metadata: Mutex<HashMap<Address, (String, Option<String>)>>,
    failing_ranges: Mutex<Vec<(u64, u64)>>,
    pub get_logs_calls: AtomicUsize,
    pub get_transaction_calls: AtomicUsize,
    pub get_block_calls: AtomicUsize,
    pub eth_calls: AtomicUsize,
    pub connects: AtomicUsize,
    pub disconnects: AtomicUsize,
}

impl MockChain {
    pub fn new(head: u64) -> Self {
        let chain = Self::default();
        *chain.head.lock().unwrap() = head;
        chain
    }

    /// Register a transaction whose receipt holds `logs`; the logs also become
    /// visible to `get_logs`.
    pub fn add_transaction(&self, tx_hash: TxHash, block: u64, from: Address, to: Option<Address>, logs: Vec<Log>) {
        self.add_transaction_with_value(tx_hash, block, from, to, U256::ZERO, logs);
    }

    pub fn add_transaction_with_value(
        &self,
        tx_hash: TxHash,
        block: u64,
        from: Address,
        to: Option<Address>,
        value: U256,
        logs: Vec<Log>,
    ) {
        self.transactions.lock().unwrap().insert(
            tx_hash,
            Transaction {
                hash: tx_hash,
                block_number: Some(U64::from(block)),
                from,
                to,
                gas: U64::from(150_000u64),
                gas_price: Some(U256::from(30_000_000_000u64)),
                value: Some(value),
            },
        );
        self.receipts.lock().unwrap().insert(
            tx_hash,
            TransactionReceipt {
                transaction_hash: tx_hash,
                block_number: Some(U64::from(block)),
                status: Some(U64::from(1)),
                logs: logs.clone(),
            },
        );
        self.logs.lock().unwrap().extend(logs);
    }

    /// Add a log visible to `get_logs` without a backing transaction.
    pub fn add_log(&self, log: Log) {
        self.logs.lock().unwrap().push(log);
    }

    pub fn set_metadata(&self, contract: Address, name: &str, symbol: &str) {
        self.metadata
            .lock()
            .unwrap()
            .insert(contract, (name.to_string(), Some(symbol.to_string())));
    }

    /// Contract answering `name()` while `symbol()` reverts.
    pub fn set_name_only(&self, contract: Address, name: &str) {
        self.metadata.lock().unwrap().insert(contract, (name.to_string(), None));
    }

    pub fn set_block_timestamp(&self, block: u64, timestamp: u64) {
        self.timestamps.lock().unwrap().insert(block, timestamp);
    }

    /// Make `get_logs` fail for any query overlapping `[from, to]`.
    pub fn fail_logs_between(&self, from: u64, to: u64) {
        self.failing_ranges.lock().unwrap().push((from, to));
    }

    pub fn clear_failures(&self) {
        self.failing_ranges.lock().unwrap().clear();
    }

    pub fn timestamp_of(&self, block: u64) -> u64 {
        self.timestamps
            .lock()
            .unwrap()
            .get(&block)
            .copied()
            .unwrap_or(GENESIS_TIMESTAMP + block * BLOCK_TIME)
    }

    pub fn count(counter: &AtomicUsize) -> usize {
        counter.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ChainClient for MockChain {
    async fn get_logs(&self, topic0: B256, from_block: u64, to_block: u64) -> Result<Vec<Log>, RpcError> {
        self.get_logs_calls.fetch_add(1, Ordering::SeqCst);
        let failing = self
            .failing_ranges
            .lock()
            .unwrap()
            .iter()
            .any(|(from, to)| from_block <= *to && *from <= to_block);
        if failing {
            return Err(RpcError::RetriesExhausted {
                method: "eth_getLogs".to_string(),
                attempts: 1,
                last: "HTTP 503 Service Unavailable".to_string(),
            });
        }
        Ok(self
            .logs
            .lock()
            .unwrap()
            .iter()
            .filter(|log| log.topic0() == Some(&topic0))
            .filter(|log| {
                log.block_number()
                    .is_some_and(|n| n >= from_block && n <= to_block)
            })
            .cloned()
            .collect())
    }

    async fn get_transaction(&self, hash: TxHash) -> Result<Option<Transaction>, RpcError> {
        self.get_transaction_calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.transactions.lock().unwrap().get(&hash).cloned())
    }

    async fn get_transaction_receipt(&self, hash: TxHash) -> Result<Option<TransactionReceipt>, RpcError> {
        Ok(self.receipts.lock().unwrap().get(&hash).cloned())
    }

    async fn get_block(&self, number: u64) -> Result<Option<Block>, RpcError> {
        self.get_block_calls.fetch_add(1, Ordering::SeqCst);
        if number > *self.head.lock().unwrap() {
            return Ok(None);
        }
        Ok(Some(Block {
            number: Some(U64::from(number)),
            timestamp: U64::from(self.timestamp_of(number)),
        }))
    }

    async fn call(&self, to: Address, data: Bytes) -> Result<Bytes, RpcError> {
        self.eth_calls.fetch_add(1, Ordering::SeqCst);
        let reverted = || RpcError::JsonRpc {
            code: 3,
            message: "execution reverted".to_string(),
        };
        let metadata = self.metadata.lock().unwrap().get(&to).cloned().ok_or_else(reverted)?;
        let selector = data.get(..4).ok_or_else(reverted)?;
        let value = if selector == nameCall::SELECTOR.as_slice() {
            metadata.0
        } else if selector == symbolCall::SELECTOR.as_slice() {
            metadata.1.ok_or_else(reverted)?
        } else {
            return Err(reverted());
        };
        Ok(Bytes::from((value,).abi_encode_params()))
    }

    async fn latest_block_number(&self) -> Result<u64, RpcError> {
        Ok(*self.head.lock().unwrap())
    }

    async fn connect(&self) -> Result<(), RpcError> {
        self.connects.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn disconnect(&self) {
        self.disconnects.fetch_add(1, Ordering::SeqCst);
    }
}
