// Copyright (c) EvidenceChain, Inc.
// SPDX-License-Identifier: Apache-2.0

//! Log normalization.
//!
//! Raw provider logs are decoded into [`NormalizedEvent`]s carrying the
//! canonical ordering key `(block_number, transaction_index, log_index)`.
//! A batch is always sorted by that key before dispatch so that effects on
//! the same evidence record apply in chain order.

use ethers::abi::RawLog;
use ethers::contract::EthLogDecode;
use ethers::types::{Address, Log, H256, U256};
use tracing::warn;

use crate::abi::{EvidenceAssetEvents, EvidenceCreatedFilter};
use crate::error::ChainError;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CreatedEvent {
    pub evidence_id: [u8; 32],
    pub creator: Address,
    pub evidence_contract: Address,
    pub metadata_hash: [u8; 32],
    pub nonce: u64,
    pub timestamp: i64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferredEvent {
    pub evidence_id: [u8; 32],
    pub previous_owner: Address,
    pub new_owner: Address,
    pub timestamp: i64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiscontinuedEvent {
    pub evidence_id: [u8; 32],
    pub by: Address,
    pub timestamp: i64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EventKind {
    Created(CreatedEvent),
    Transferred(TransferredEvent),
    Discontinued(DiscontinuedEvent),
}

/// A decoded custody event with its position on the chain.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NormalizedEvent {
    pub kind: EventKind,
    /// Contract that emitted the log.
    pub address: Address,
    pub block_number: u64,
    pub transaction_index: u64,
    pub log_index: u64,
    pub tx_hash: H256,
}

impl NormalizedEvent {
    pub fn ordering_key(&self) -> (u64, u64, u64) {
        (self.block_number, self.transaction_index, self.log_index)
    }

    pub fn evidence_id(&self) -> &[u8; 32] {
        match &self.kind {
            EventKind::Created(e) => &e.evidence_id,
            EventKind::Transferred(e) => &e.evidence_id,
            EventKind::Discontinued(e) => &e.evidence_id,
        }
    }

    pub fn kind_name(&self) -> &'static str {
        match &self.kind {
            EventKind::Created(_) => "created",
            EventKind::Transferred(_) => "transferred",
            EventKind::Discontinued(_) => "discontinued",
        }
    }
}

fn u256_to_i64(value: U256) -> i64 {
    value.min(U256::from(i64::MAX as u64)).low_u64() as i64
}

fn decode_kind(raw: &RawLog) -> Option<EventKind> {
    if let Ok(e) = <EvidenceCreatedFilter as EthLogDecode>::decode_log(raw) {
        return Some(EventKind::Created(CreatedEvent {
            evidence_id: e.evidence_id,
            creator: e.creator,
            evidence_contract: e.evidence_contract,
            metadata_hash: e.metadata_hash,
            nonce: e.nonce.min(U256::from(u64::MAX)).low_u64(),
            timestamp: u256_to_i64(e.timestamp),
        }));
    }
    match EvidenceAssetEvents::decode_log(raw) {
        Ok(EvidenceAssetEvents::CustodyTransferredFilter(e)) => {
            Some(EventKind::Transferred(TransferredEvent {
                evidence_id: e.evidence_id,
                previous_owner: e.previous_owner,
                new_owner: e.new_owner,
                timestamp: u256_to_i64(e.timestamp),
            }))
        }
        Ok(EvidenceAssetEvents::EvidenceDiscontinuedFilter(e)) => {
            Some(EventKind::Discontinued(DiscontinuedEvent {
                evidence_id: e.evidence_id,
                by: e.by,
                timestamp: u256_to_i64(e.timestamp),
            }))
        }
        Err(_) => None,
    }
}

/// Decode a single log. Fails if the log is still pending (missing block
/// number, transaction hash or log index) or carries an unknown signature.
pub fn normalize(log: &Log) -> Result<NormalizedEvent, ChainError> {
    let block_number = log
        .block_number
        .ok_or_else(|| ChainError::InvalidResponse("log without block_number".into()))?
        .as_u64();
    let tx_hash = log
        .transaction_hash
        .ok_or_else(|| ChainError::InvalidResponse("log without transaction_hash".into()))?;
    let transaction_index = log
        .transaction_index
        .ok_or_else(|| ChainError::InvalidResponse("log without transaction_index".into()))?
        .as_u64();
    let log_index = log
        .log_index
        .ok_or_else(|| ChainError::InvalidResponse("log without log_index".into()))?
        .as_u64();

    let raw = RawLog {
        topics: log.topics.clone(),
        data: log.data.to_vec(),
    };
    let kind = decode_kind(&raw).ok_or_else(|| {
        ChainError::InvalidResponse(format!(
            "unrecognized event signature {:?} at block {block_number}",
            log.topics.first()
        ))
    })?;

    Ok(NormalizedEvent {
        kind,
        address: log.address,
        block_number,
        transaction_index,
        log_index,
        tx_hash,
    })
}

/// Decode a batch of logs and sort them into chain order. Undecodable logs
/// are logged and skipped; they must not stall the scan.
pub fn normalize_batch(logs: Vec<Log>) -> Vec<NormalizedEvent> {
    let mut events: Vec<NormalizedEvent> = logs
        .iter()
        .filter_map(|log| match normalize(log) {
            Ok(ev) => Some(ev),
            Err(e) => {
                warn!("[Normalizer] skipping log from {:?}: {e}", log.address);
                None
            }
        })
        .collect();
    events.sort_by_key(|ev| ev.ordering_key());
    events
}

#[cfg(test)]
pub mod test_logs {
    //! Builders that encode custody events into raw provider logs, used by
    //! normalization and scanner tests.

    use super::*;
    use ethers::abi::{encode, Token};
    use ethers::contract::EthEvent;
    use ethers::types::{Bytes, U64};

    use crate::abi::{
        CustodyTransferredFilter, EvidenceCreatedFilter, EvidenceDiscontinuedFilter,
    };

    pub struct LogPosition {
        pub block_number: u64,
        pub transaction_index: u64,
        pub log_index: u64,
        pub tx_hash: H256,
    }

    fn base_log(address: Address, pos: &LogPosition) -> Log {
        Log {
            address,
            block_number: Some(U64::from(pos.block_number)),
            transaction_index: Some(U64::from(pos.transaction_index)),
            log_index: Some(U256::from(pos.log_index)),
            transaction_hash: Some(pos.tx_hash),
            ..Default::default()
        }
    }

    pub fn created_log(
        ledger: Address,
        evidence_id: [u8; 32],
        creator: Address,
        evidence_contract: Address,
        metadata_hash: [u8; 32],
        nonce: u64,
        timestamp: i64,
        pos: &LogPosition,
    ) -> Log {
        let mut log = base_log(ledger, pos);
        log.topics = vec![
            EvidenceCreatedFilter::signature(),
            H256::from(evidence_id),
            H256::from(creator),
        ];
        log.data = Bytes::from(encode(&[
            Token::Address(evidence_contract),
            Token::FixedBytes(metadata_hash.to_vec()),
            Token::Uint(U256::from(nonce)),
            Token::Uint(U256::from(timestamp as u64)),
        ]));
        log
    }

    pub fn transferred_log(
        evidence_contract: Address,
        evidence_id: [u8; 32],
        previous_owner: Address,
        new_owner: Address,
        timestamp: i64,
        pos: &LogPosition,
    ) -> Log {
        let mut log = base_log(evidence_contract, pos);
        log.topics = vec![
            CustodyTransferredFilter::signature(),
            H256::from(evidence_id),
            H256::from(previous_owner),
            H256::from(new_owner),
        ];
        log.data = Bytes::from(encode(&[Token::Uint(U256::from(timestamp as u64))]));
        log
    }

    pub fn discontinued_log(
        evidence_contract: Address,
        evidence_id: [u8; 32],
        by: Address,
        timestamp: i64,
        pos: &LogPosition,
    ) -> Log {
        let mut log = base_log(evidence_contract, pos);
        log.topics = vec![
            EvidenceDiscontinuedFilter::signature(),
            H256::from(evidence_id),
            H256::from(by),
        ];
        log.data = Bytes::from(encode(&[Token::Uint(U256::from(timestamp as u64))]));
        log
    }
}

#[cfg(test)]
mod tests {
    use super::test_logs::*;
    use super::*;

    fn addr(byte: u8) -> Address {
        Address::from([byte; 20])
    }

    fn pos(block: u64, tx_index: u64, log_index: u64) -> LogPosition {
        LogPosition {
            block_number: block,
            transaction_index: tx_index,
            log_index,
            tx_hash: H256::from_low_u64_be(block * 1000 + tx_index),
        }
    }

    #[test]
    fn created_log_round_trips() {
        let log = created_log(
            addr(0xAA),
            [1u8; 32],
            addr(0x11),
            addr(0xBB),
            [2u8; 32],
            7,
            1_700_000_000,
            &pos(100, 2, 5),
        );
        let ev = normalize(&log).unwrap();
        assert_eq!(ev.ordering_key(), (100, 2, 5));
        assert_eq!(ev.address, addr(0xAA));
        match ev.kind {
            EventKind::Created(c) => {
                assert_eq!(c.evidence_id, [1u8; 32]);
                assert_eq!(c.creator, addr(0x11));
                assert_eq!(c.evidence_contract, addr(0xBB));
                assert_eq!(c.metadata_hash, [2u8; 32]);
                assert_eq!(c.nonce, 7);
                assert_eq!(c.timestamp, 1_700_000_000);
            }
            other => panic!("expected Created, got {other:?}"),
        }
    }

    #[test]
    fn transferred_log_round_trips() {
        let log = transferred_log(
            addr(0xBB),
            [1u8; 32],
            addr(0x11),
            addr(0x22),
            1_700_000_100,
            &pos(101, 0, 0),
        );
        let ev = normalize(&log).unwrap();
        match ev.kind {
            EventKind::Transferred(t) => {
                assert_eq!(t.previous_owner, addr(0x11));
                assert_eq!(t.new_owner, addr(0x22));
            }
            other => panic!("expected Transferred, got {other:?}"),
        }
    }

    #[test]
    fn pending_log_is_rejected() {
        let mut log = discontinued_log(
            addr(0xBB),
            [1u8; 32],
            addr(0x11),
            1_700_000_200,
            &pos(102, 0, 0),
        );
        log.block_number = None;
        assert!(normalize(&log).is_err());
    }

    #[test]
    fn unknown_signature_is_rejected() {
        let mut log = transferred_log(
            addr(0xBB),
            [1u8; 32],
            addr(0x11),
            addr(0x22),
            1_700_000_100,
            &pos(101, 0, 0),
        );
        log.topics[0] = H256::from_low_u64_be(0xdead);
        assert!(normalize(&log).is_err());
    }

    #[test]
    fn batch_sorts_by_block_then_tx_index_then_log_index() {
        // Deliberately shuffled input covering all three tie-break levels.
        let logs = vec![
            transferred_log(addr(0xBB), [1; 32], addr(0x11), addr(0x22), 10, &pos(5, 1, 3)),
            transferred_log(addr(0xBB), [1; 32], addr(0x22), addr(0x33), 20, &pos(5, 1, 1)),
            discontinued_log(addr(0xBB), [1; 32], addr(0x33), 30, &pos(5, 0, 9)),
            created_log(
                addr(0xAA),
                [1; 32],
                addr(0x11),
                addr(0xBB),
                [2; 32],
                1,
                5,
                &pos(3, 7, 0),
            ),
        ];
        let events = normalize_batch(logs);
        let keys: Vec<_> = events.iter().map(|e| e.ordering_key()).collect();
        assert_eq!(keys, vec![(3, 7, 0), (5, 0, 9), (5, 1, 1), (5, 1, 3)]);
    }

    #[test]
    fn batch_skips_undecodable_logs() {
        let good = transferred_log(addr(0xBB), [1; 32], addr(0x11), addr(0x22), 10, &pos(5, 0, 0));
        let mut bad = good.clone();
        bad.log_index = None;
        let events = normalize_batch(vec![bad, good]);
        assert_eq!(events.len(), 1);
    }
}
