//! Transfer log decoding.
//!
//! Three event shapes are recognized, each selected by its topic0:
//!
//! | kind           | signature                                                            |
//! |----------------|----------------------------------------------------------------------|
//! | ERC721         | `Transfer(address,address,uint256)` (all indexed)                    |
//! | ERC1155 single | `TransferSingle(address,address,address,uint256,uint256)`            |
//! | ERC1155 batch  | `TransferBatch(address,address,address,uint256[],uint256[])`         |
//!
//! ERC20 `Transfer` shares topic0 with ERC721 but carries only three topics;
//! those logs are rejected as malformed.

use crate::rpc::Log;
use crate::schemas::{TokenStandard, TransferEvent, TransferShape};
use alloy_primitives::B256;
use alloy_sol_types::SolEvent;
use std::fmt;
use thiserror::Error;

mod abi {
    alloy_sol_types::sol! {
        event Transfer(address indexed from, address indexed to, uint256 indexed tokenId);
        event TransferSingle(address indexed operator, address indexed from, address indexed to, uint256 id, uint256 value);
        event TransferBatch(address indexed operator, address indexed from, address indexed to, uint256[] ids, uint256[] values);
    }
}

/// Every transfer shape carries topic0 plus three indexed arguments.
const EXPECTED_TOPICS: usize = 4;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    Erc721Transfer,
    Erc1155Single,
    Erc1155Batch,
}

impl EventKind {
    /// Scan order within a chunk.
    pub const ALL: [EventKind; 3] = [
        EventKind::Erc721Transfer,
        EventKind::Erc1155Single,
        EventKind::Erc1155Batch,
    ];

    pub fn topic(self) -> B256 {
        match self {
            EventKind::Erc721Transfer => abi::Transfer::SIGNATURE_HASH,
            EventKind::Erc1155Single => abi::TransferSingle::SIGNATURE_HASH,
            EventKind::Erc1155Batch => abi::TransferBatch::SIGNATURE_HASH,
        }
    }

    pub fn from_topic(topic: &B256) -> Option<EventKind> {
        Self::ALL.into_iter().find(|kind| kind.topic() == *topic)
    }

    pub fn standard(self) -> TokenStandard {
        match self {
            EventKind::Erc721Transfer => TokenStandard::Erc721,
            EventKind::Erc1155Single | EventKind::Erc1155Batch => TokenStandard::Erc1155,
        }
    }

    pub fn shape(self) -> TransferShape {
        match self {
            EventKind::Erc721Transfer | EventKind::Erc1155Single => TransferShape::Single,
            EventKind::Erc1155Batch => TransferShape::Batch,
        }
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EventKind::Erc721Transfer => write!(f, "ERC721 Transfer"),
            EventKind::Erc1155Single => write!(f, "ERC1155 TransferSingle"),
            EventKind::Erc1155Batch => write!(f, "ERC1155 TransferBatch"),
        }
    }
}

/// A log that does not have the layout of its event kind.
#[derive(Error, Debug)]
pub enum DecodeError {
    #[error("malformed {kind} log: expected {expected} topics, found {found}")]
    TopicCount {
        kind: EventKind,
        expected: usize,
        found: usize,
    },

    #[error("malformed {kind} log: {source}")]
    Abi {
        kind: EventKind,
        #[source]
        source: alloy_sol_types::Error,
    },

    #[error("malformed {kind} log: missing {field}")]
    MissingField { kind: EventKind, field: &'static str },

    #[error("malformed {kind} log: {ids} ids but {values} values")]
    LengthMismatch {
        kind: EventKind,
        ids: usize,
        values: usize,
    },
}

/// Decode one raw log into a [`TransferEvent`].
pub fn decode(kind: EventKind, log: &Log) -> Result<TransferEvent, DecodeError> {
    if log.topics.len() != EXPECTED_TOPICS {
        return Err(DecodeError::TopicCount {
            kind,
            expected: EXPECTED_TOPICS,
            found: log.topics.len(),
        });
    }

    let tx_hash = log
        .transaction_hash
        .ok_or(DecodeError::MissingField { kind, field: "transactionHash" })?;
    let block_number = log
        .block_number()
        .ok_or(DecodeError::MissingField { kind, field: "blockNumber" })?;

    let topics = log.topics.iter().copied();
    let abi_err = |source| DecodeError::Abi { kind, source };

    let (from, to, token_ids, amounts) = match kind {
        EventKind::Erc721Transfer => {
            let event = abi::Transfer::decode_raw_log(topics, &log.data, true).map_err(abi_err)?;
            (event.from, event.to, vec![event.tokenId], Vec::new())
        }
        EventKind::Erc1155Single => {
            let event = abi::TransferSingle::decode_raw_log(topics, &log.data, true).map_err(abi_err)?;
            (event.from, event.to, vec![event.id], vec![event.value])
        }
        EventKind::Erc1155Batch => {
            let event = abi::TransferBatch::decode_raw_log(topics, &log.data, true).map_err(abi_err)?;
            if event.ids.len() != event.values.len() {
                return Err(DecodeError::LengthMismatch {
                    kind,
                    ids: event.ids.len(),
                    values: event.values.len(),
                });
            }
            (event.from, event.to, event.ids, event.values)
        }
    };

    Ok(TransferEvent {
        tx_hash,
        block_number,
        log_index: log.log_index(),
        contract: log.address,
        from,
        to,
        token_ids,
        amounts,
        token_standard: kind.standard(),
        transfer_shape: kind.shape(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{erc1155_batch_log, erc1155_single_log, erc20_transfer_log, erc721_log};
    use crate::ethereum::ZERO_ADDRESS;
    use alloy_primitives::{address, b256, Address, Bytes, U256};

    const CONTRACT: Address = address!("00000000000000000000000000000000000000c1");
    const ALICE: Address = address!("00000000000000000000000000000000000000a1");
    const BOB: Address = address!("00000000000000000000000000000000000000b2");

    #[test]
    fn test_topic_table() {
        assert_eq!(
            EventKind::Erc721Transfer.topic(),
            b256!("ddf252ad1be2c89b69c2b068fc378daa952ba7f163c4a11628f55a4df523b3ef")
        );
        assert_eq!(
            EventKind::Erc1155Single.topic(),
            b256!("c3d58168c5ae7397731d063d5bbf3d657854427343f4c083240f7aacaa2d0f62")
        );
        assert_eq!(
            EventKind::Erc1155Batch.topic(),
            b256!("4a39dc06d4c0dbc64b70af90fd698a233a518aa5d07e595d983b8c0526c8f7fb")
        );
        for kind in EventKind::ALL {
            assert_eq!(EventKind::from_topic(&kind.topic()), Some(kind));
        }
        assert_eq!(EventKind::from_topic(&B256::ZERO), None);
    }

    #[test]
    fn test_decode_erc721() {
        let log = erc721_log(CONTRACT, 10, B256::repeat_byte(0xa0), ZERO_ADDRESS, BOB, 7);
        let event = decode(EventKind::Erc721Transfer, &log).unwrap();
        assert_eq!(event.from, ZERO_ADDRESS);
        assert_eq!(event.to, BOB);
        assert_eq!(event.token_ids, vec![U256::from(7u64)]);
        assert!(event.amounts.is_empty());
        assert_eq!(event.token_standard, TokenStandard::Erc721);
        assert_eq!(event.transfer_shape, TransferShape::Single);
        assert_eq!(event.contract, CONTRACT);
        assert_eq!(event.block_number, 10);
    }

    #[test]
    fn test_decode_erc1155_single() {
        let log = erc1155_single_log(CONTRACT, 11, B256::repeat_byte(0xb0), ALICE, BOB, 3, 2);
        let event = decode(EventKind::Erc1155Single, &log).unwrap();
        assert_eq!(event.token_ids, vec![U256::from(3u64)]);
        assert_eq!(event.amounts, vec![U256::from(2u64)]);
        assert_eq!(event.token_standard, TokenStandard::Erc1155);
        assert_eq!(event.transfer_shape, TransferShape::Single);
    }

    #[test]
    fn test_decode_erc1155_batch() {
        let log = erc1155_batch_log(CONTRACT, 12, B256::repeat_byte(0xc0), ALICE, BOB, &[1, 2, 3], &[10, 20, 30]);
        let event = decode(EventKind::Erc1155Batch, &log).unwrap();
        assert_eq!(event.token_ids.len(), 3);
        assert_eq!(event.token_ids.len(), event.amounts.len());
        assert_eq!(event.amounts[2], U256::from(30u64));
        assert_eq!(event.transfer_shape, TransferShape::Batch);
    }

    #[test]
    fn test_erc20_transfer_is_malformed() {
        let log = erc20_transfer_log(CONTRACT, 10, B256::repeat_byte(0xa0), ALICE, BOB, 1_000);
        let err = decode(EventKind::Erc721Transfer, &log).unwrap_err();
        assert!(matches!(err, DecodeError::TopicCount { found: 3, .. }));
    }

    #[test]
    fn test_batch_length_mismatch_is_malformed() {
        let log = erc1155_batch_log(CONTRACT, 12, B256::repeat_byte(0xc0), ALICE, BOB, &[1, 2], &[10]);
        let err = decode(EventKind::Erc1155Batch, &log).unwrap_err();
        assert!(matches!(err, DecodeError::LengthMismatch { ids: 2, values: 1, .. }));
    }

    #[test]
    fn test_missing_tx_hash_is_malformed() {
        let mut log = erc721_log(CONTRACT, 10, B256::repeat_byte(0xa0), ALICE, BOB, 1);
        log.transaction_hash = None;
        let err = decode(EventKind::Erc721Transfer, &log).unwrap_err();
        assert!(matches!(err, DecodeError::MissingField { field: "transactionHash", .. }));
    }

    #[test]
    fn test_truncated_single_data_is_malformed() {
        let mut log = erc1155_single_log(CONTRACT, 11, B256::repeat_byte(0xb0), ALICE, BOB, 3, 2);
        log.data = Bytes::copy_from_slice(&log.data[..32]);
        assert!(matches!(
            decode(EventKind::Erc1155Single, &log),
            Err(DecodeError::Abi { .. })
        ));
    }
}
