// Copyright (c) EvidenceChain, Inc.
// SPDX-License-Identifier: Apache-2.0

//! Listener configuration.

use std::time::Duration;

use anyhow::{anyhow, Result};
use ethers::types::{Address, H256};

use crate::scanner::ScannerConfig;
use crate::validator::ValidatorConfig;

#[derive(Debug, Clone)]
pub struct ListenerConfig {
    pub rpc_url: String,
    /// The ledger contract announcing new evidence.
    pub ledger_address: Address,
    /// Transaction that deployed the ledger; anchors the first scan and is
    /// verified against the chain at startup.
    pub deployment_tx: H256,
    pub network: String,
    /// Blocks below the head considered safe from reorgs.
    pub confirmations: u64,
    /// Maximum blocks fetched per scan pass.
    pub batch_size: u64,
    pub poll_interval_ms: u64,
    pub error_backoff_ms: u64,
    /// How long the validator waits for a submission's receipt.
    pub receipt_timeout_ms: u64,
}

impl ListenerConfig {
    pub fn validate(&self) -> Result<()> {
        if self.batch_size == 0 {
            return Err(anyhow!("batch-size must be at least 1"));
        }
        if self.poll_interval_ms == 0 {
            return Err(anyhow!("poll-interval-ms must be positive"));
        }
        if self.receipt_timeout_ms == 0 {
            return Err(anyhow!("receipt-timeout-ms must be positive"));
        }
        Ok(())
    }

    pub fn scanner_config(&self) -> ScannerConfig {
        ScannerConfig {
            confirmations: self.confirmations,
            batch_size: self.batch_size,
            poll_interval: Duration::from_millis(self.poll_interval_ms),
            error_backoff: Duration::from_millis(self.error_backoff_ms),
        }
    }

    pub fn validator_config(&self) -> ValidatorConfig {
        ValidatorConfig {
            receipt_timeout: Duration::from_millis(self.receipt_timeout_ms),
            ..ValidatorConfig::default()
        }
    }
}

/// Parse a 0x-prefixed 20-byte contract address.
pub fn parse_address(input: &str) -> Result<Address> {
    input
        .parse::<Address>()
        .map_err(|e| anyhow!("invalid address {input}: {e}"))
}

/// Parse a 0x-prefixed 32-byte transaction hash.
pub fn parse_tx_hash(input: &str) -> Result<H256> {
    input
        .parse::<H256>()
        .map_err(|e| anyhow!("invalid transaction hash {input}: {e}"))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> ListenerConfig {
        ListenerConfig {
            rpc_url: "http://localhost:8545".into(),
            ledger_address: Address::zero(),
            deployment_tx: H256::zero(),
            network: "localnet".into(),
            confirmations: 12,
            batch_size: 250,
            poll_interval_ms: 3000,
            error_backoff_ms: 5000,
            receipt_timeout_ms: 10_000,
        }
    }

    #[test]
    fn default_shape_is_valid() {
        assert!(config().validate().is_ok());
    }

    #[test]
    fn zero_batch_size_is_rejected() {
        let mut cfg = config();
        cfg.batch_size = 0;
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn parses_addresses_and_hashes() {
        assert!(parse_address("0x1111111111111111111111111111111111111111").is_ok());
        assert!(parse_address("not-an-address").is_err());
        assert!(parse_tx_hash(
            "0x2222222222222222222222222222222222222222222222222222222222222222"
        )
        .is_ok());
        assert!(parse_tx_hash("0x1234").is_err());
    }
}
