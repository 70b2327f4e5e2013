// Copyright (c) EvidenceChain, Inc.
// SPDX-License-Identifier: Apache-2.0

//! Contract event bindings.
//!
//! The ledger contract announces new evidence; each evidence contract then
//! emits its own custody events. Only events are bound here, the listener
//! never calls into the contracts.

use ethers::prelude::abigen;

abigen!(
    EvidenceLedger,
    r#"[
        event EvidenceCreated(bytes32 indexed evidenceId, address indexed creator, address evidenceContract, bytes32 metadataHash, uint256 nonce, uint256 timestamp)
    ]"#
);

abigen!(
    EvidenceAsset,
    r#"[
        event CustodyTransferred(bytes32 indexed evidenceId, address indexed previousOwner, address indexed newOwner, uint256 timestamp)
        event EvidenceDiscontinued(bytes32 indexed evidenceId, address indexed by, uint256 timestamp)
    ]"#
);

#[cfg(test)]
mod tests {
    use super::*;
    use ethers::contract::EthEvent;

    #[test]
    fn event_signatures_are_distinct() {
        let sigs = [
            EvidenceCreatedFilter::signature(),
            CustodyTransferredFilter::signature(),
            EvidenceDiscontinuedFilter::signature(),
        ];
        assert_ne!(sigs[0], sigs[1]);
        assert_ne!(sigs[0], sigs[2]);
        assert_ne!(sigs[1], sigs[2]);
    }
}
