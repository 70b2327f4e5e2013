// Copyright (c) EvidenceChain, Inc.
// SPDX-License-Identifier: Apache-2.0

//! Chain access layer.
//!
//! [`ChainReader`] is the narrow read-only surface the scanners and the
//! submission validator need. The production implementation wraps an ethers
//! HTTP provider; tests use [`MockChain`].

use async_trait::async_trait;
use ethers::contract::EthEvent;
use ethers::providers::{Http, Middleware, Provider};
use ethers::types::{Address, Filter, Log, TransactionReceipt, ValueOrArray, H256};
use std::sync::Arc;

use crate::abi::{CustodyTransferredFilter, EvidenceCreatedFilter, EvidenceDiscontinuedFilter};
use crate::error::ChainError;

/// Read-only view of the chain.
#[async_trait]
pub trait ChainReader: Send + Sync {
    /// Current head block number.
    async fn block_number(&self) -> Result<u64, ChainError>;

    /// Logs emitted by any of `addresses` in the inclusive block range,
    /// restricted to the custody event signatures.
    async fn get_logs(
        &self,
        addresses: &[Address],
        from_block: u64,
        to_block: u64,
    ) -> Result<Vec<Log>, ChainError>;

    /// Receipt for a transaction, `None` while it is still pending.
    async fn transaction_receipt(
        &self,
        tx_hash: H256,
    ) -> Result<Option<TransactionReceipt>, ChainError>;
}

/// [`ChainReader`] backed by a JSON-RPC HTTP provider.
pub struct EthChainClient {
    provider: Arc<Provider<Http>>,
    event_signatures: Vec<H256>,
}

impl EthChainClient {
    pub fn new(rpc_url: &str) -> Result<Self, ChainError> {
        let provider = Provider::<Http>::try_from(rpc_url)
            .map_err(|e| ChainError::Config(format!("invalid RPC url {rpc_url}: {e}")))?;
        Ok(Self {
            provider: Arc::new(provider),
            event_signatures: vec![
                EvidenceCreatedFilter::signature(),
                CustodyTransferredFilter::signature(),
                EvidenceDiscontinuedFilter::signature(),
            ],
        })
    }
}

#[async_trait]
impl ChainReader for EthChainClient {
    async fn block_number(&self) -> Result<u64, ChainError> {
        let number = self
            .provider
            .get_block_number()
            .await
            .map_err(|e| ChainError::Rpc(format!("eth_blockNumber failed: {e}")))?;
        Ok(number.as_u64())
    }

    // Note: query may fail if the range is too big. Callsite is responsible
    // for chunking the query.
    async fn get_logs(
        &self,
        addresses: &[Address],
        from_block: u64,
        to_block: u64,
    ) -> Result<Vec<Log>, ChainError> {
        let filter = Filter::new()
            .from_block(from_block)
            .to_block(to_block)
            .address(addresses.to_vec())
            .topic0(ValueOrArray::Array(self.event_signatures.clone()));
        let logs = self
            .provider
            .get_logs(&filter)
            .await
            .map_err(|e| ChainError::Rpc(format!("eth_getLogs failed: {e}")))?;

        // Safeguard check that all logs come from a requested contract address
        if let Some(stray) = logs.iter().find(|log| !addresses.contains(&log.address)) {
            return Err(ChainError::InvalidResponse(format!(
                "provider returned log from unrequested address {:?}",
                stray.address
            )));
        }
        Ok(logs)
    }

    async fn transaction_receipt(
        &self,
        tx_hash: H256,
    ) -> Result<Option<TransactionReceipt>, ChainError> {
        self.provider
            .get_transaction_receipt(tx_hash)
            .await
            .map_err(|e| ChainError::Rpc(format!("eth_getTransactionReceipt failed: {e}")))
    }
}

#[cfg(test)]
mod tests {
    use super::mock::MockChain;
    use super::*;
    use crate::events::test_logs::{transferred_log, LogPosition};

    #[test]
    fn bad_rpc_url_is_rejected() {
        assert!(EthChainClient::new("not a url").is_err());
    }

    #[tokio::test]
    async fn mock_chain_filters_by_address_and_range() {
        let watched = Address::from([0xBB; 20]);
        let other = Address::from([0xCC; 20]);
        let chain = MockChain::new(100);

        for (addr, block) in [(watched, 10), (watched, 50), (watched, 90), (other, 50)] {
            chain.push_log(transferred_log(
                addr,
                [1u8; 32],
                Address::from([0x11; 20]),
                Address::from([0x22; 20]),
                0,
                &LogPosition {
                    block_number: block,
                    transaction_index: 0,
                    log_index: 0,
                    tx_hash: H256::from_low_u64_be(block),
                },
            ));
        }

        let logs = chain.get_logs(&[watched], 20, 95).await.unwrap();
        assert_eq!(logs.len(), 2);
        assert!(logs.iter().all(|log| log.address == watched));

        chain.set_head(200);
        assert_eq!(chain.block_number().await.unwrap(), 200);
    }

    #[tokio::test]
    async fn mock_chain_serves_installed_receipts() {
        let chain = MockChain::new(1);
        let tx = H256::from_low_u64_be(7);
        assert!(chain.transaction_receipt(tx).await.unwrap().is_none());

        chain.install_receipt(tx, TransactionReceipt::default());
        assert!(chain.transaction_receipt(tx).await.unwrap().is_some());
    }
}

/// In-memory chain double for tests. Blocks and receipts are installed up
/// front; `head` can be moved to simulate chain growth.
#[cfg(test)]
pub mod mock {
    use super::*;
    use std::collections::HashMap;
    use std::sync::Mutex;

    #[derive(Default)]
    pub struct MockChain {
        head: Mutex<u64>,
        logs: Mutex<Vec<Log>>,
        receipts: Mutex<HashMap<H256, TransactionReceipt>>,
    }

    impl MockChain {
        pub fn new(head: u64) -> Self {
            Self {
                head: Mutex::new(head),
                ..Default::default()
            }
        }

        pub fn set_head(&self, head: u64) {
            *self.head.lock().unwrap() = head;
        }

        pub fn push_log(&self, log: Log) {
            self.logs.lock().unwrap().push(log);
        }

        pub fn install_receipt(&self, tx_hash: H256, receipt: TransactionReceipt) {
            self.receipts.lock().unwrap().insert(tx_hash, receipt);
        }
    }

    #[async_trait]
    impl ChainReader for MockChain {
        async fn block_number(&self) -> Result<u64, ChainError> {
            Ok(*self.head.lock().unwrap())
        }

        async fn get_logs(
            &self,
            addresses: &[Address],
            from_block: u64,
            to_block: u64,
        ) -> Result<Vec<Log>, ChainError> {
            Ok(self
                .logs
                .lock()
                .unwrap()
                .iter()
                .filter(|log| {
                    let block = log.block_number.map(|b| b.as_u64()).unwrap_or(0);
                    addresses.contains(&log.address)
                        && block >= from_block
                        && block <= to_block
                })
                .cloned()
                .collect())
        }

        async fn transaction_receipt(
            &self,
            tx_hash: H256,
        ) -> Result<Option<TransactionReceipt>, ChainError> {
            Ok(self.receipts.lock().unwrap().get(&tx_hash).cloned())
        }
    }
}
