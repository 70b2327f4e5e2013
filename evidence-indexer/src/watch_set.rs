// Copyright (c) EvidenceChain, Inc.
// SPDX-License-Identifier: Apache-2.0

//! Dynamic set of evidence contract addresses the evidence scanner follows.
//!
//! Seeded at startup from the mirror's active evidence rows and grown online
//! whenever the ledger scanner observes a creation event. Addresses are never
//! removed while the process runs; a discontinued contract simply stops
//! emitting.
//!
//! The ledger and evidence scanners advance independent cursors, so a
//! contract can be discovered after the evidence cursor has already moved
//! past its first blocks. Each newly tracked address is therefore queued
//! together with the block it was discovered at, and the evidence scanner
//! drains the queue with one-shot catch-up scans before its regular pass.

use ethers::types::Address;
use std::collections::HashSet;
use std::sync::Mutex;

#[derive(Default)]
pub struct WatchSet {
    addresses: Mutex<HashSet<Address>>,
    backfills: Mutex<Vec<(Address, u64)>>,
}

impl WatchSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add an address; returns false if it was already tracked.
    pub fn add(&self, address: Address) -> bool {
        self.addresses.lock().unwrap().insert(address)
    }

    /// Add a contract first seen at `block`. A newly tracked contract is
    /// queued for a catch-up scan from that block, covering any of its
    /// events the evidence cursor has already passed.
    pub fn add_discovered(&self, address: Address, block: u64) -> bool {
        let inserted = self.addresses.lock().unwrap().insert(address);
        if inserted {
            self.backfills.lock().unwrap().push((address, block));
        }
        inserted
    }

    /// Drain the queued catch-up scans.
    pub fn take_backfills(&self) -> Vec<(Address, u64)> {
        std::mem::take(&mut *self.backfills.lock().unwrap())
    }

    /// Put catch-up scans that could not be completed back on the queue.
    pub fn requeue_backfills(&self, pending: Vec<(Address, u64)>) {
        self.backfills.lock().unwrap().extend(pending);
    }

    pub fn len(&self) -> usize {
        self.addresses.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.addresses.lock().unwrap().is_empty()
    }

    /// Stable snapshot for one scan pass. Additions made while the pass runs
    /// are picked up on the next pass.
    pub fn snapshot(&self) -> Vec<Address> {
        self.addresses.lock().unwrap().iter().copied().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn add_is_idempotent() {
        let set = WatchSet::new();
        let addr = Address::from([0xBB; 20]);
        assert!(set.add(addr));
        assert!(!set.add(addr));
        assert_eq!(set.len(), 1);
    }

    #[test]
    fn snapshot_is_detached() {
        let set = WatchSet::new();
        set.add(Address::from([0x01; 20]));
        set.add(Address::from([0x02; 20]));
        let snap = set.snapshot();
        set.add(Address::from([0x03; 20]));
        assert_eq!(snap.len(), 2);
        assert_eq!(set.len(), 3);
    }

    #[test]
    fn discovery_queues_one_backfill_per_contract() {
        let set = WatchSet::new();
        let addr = Address::from([0xBB; 20]);
        assert!(set.add_discovered(addr, 700));
        assert!(!set.add_discovered(addr, 800));

        assert_eq!(set.take_backfills(), vec![(addr, 700)]);
        assert!(set.take_backfills().is_empty());
    }

    #[test]
    fn failed_backfills_are_requeued() {
        let set = WatchSet::new();
        let addr = Address::from([0xCC; 20]);
        set.add_discovered(addr, 42);

        let pending = set.take_backfills();
        set.requeue_backfills(pending);
        assert_eq!(set.take_backfills(), vec![(addr, 42)]);
    }
}
