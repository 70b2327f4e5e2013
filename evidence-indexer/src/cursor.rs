// Copyright (c) EvidenceChain, Inc.
// SPDX-License-Identifier: Apache-2.0

//! Scan cursor store.
//!
//! Tracks, per scanner task, the highest block whose events have all been
//! dispatched. On restart a scanner resumes from `cursor + 1`, falling back
//! to the ledger deployment block when no cursor has been recorded yet.
//! Cursor writes are guarded with `GREATEST` so a stale writer can never
//! move a cursor backwards.

use anyhow::{anyhow, Context, Result};
use diesel::{ExpressionMethods, OptionalExtension, QueryDsl};
use diesel_async::RunQueryDsl;
use ethers::types::{Address, H256};
use evidence_pg_db::Db;
use evidence_schema::models::{CursorRow, EvidenceStatus, LedgerInfoRow};
use evidence_schema::schema::{cursors, evidence, ledger_info};
use tracing::{debug, info, warn};

use crate::chain::ChainReader;
use crate::util::now_ms;

/// Task name for the ledger contract scanner
pub const LEDGER_SCANNER_TASK: &str = "ledger_scanner";

/// Task name for the per-evidence contract scanner
pub const EVIDENCE_SCANNER_TASK: &str = "evidence_scanner";

/// First block a scanner should fetch, given its stored cursor (if any) and
/// the ledger deployment block.
pub fn compute_from_block(cursor: Option<u64>, deployed_block: u64) -> u64 {
    cursor.map_or(deployed_block, |c| c.max(deployed_block)) + 1
}

#[derive(Clone)]
pub struct CursorStore {
    db: Db,
}

impl CursorStore {
    pub fn new(db: Db) -> Self {
        Self { db }
    }

    /// Last fully processed block for a task. None if the task has never run.
    pub async fn last_scanned_block(&self, task_name: &str) -> Result<Option<u64>> {
        use cursors::dsl;

        let mut conn = self.db.connect().await?;
        let result: Option<i64> = dsl::cursors
            .filter(dsl::task_name.eq(task_name))
            .select(dsl::last_scanned_block)
            .first(&mut conn)
            .await
            .optional()?;
        Ok(result.map(|b| b as u64))
    }

    /// Advance a task's cursor. Must only be called once every event in the
    /// batch ending at `block_number` has been dispatched.
    pub async fn set_last_scanned_block(
        &self,
        task_name: &str,
        watch_address: &[u8],
        block_number: u64,
        deployed_block: u64,
    ) -> Result<()> {
        use cursors::dsl;

        let row = CursorRow {
            task_name: task_name.to_string(),
            watch_address: watch_address.to_vec(),
            last_scanned_block: block_number as i64,
            deployed_block: deployed_block as i64,
            updated_at: now_ms(),
        };

        let mut conn = self.db.connect().await?;
        diesel::insert_into(dsl::cursors)
            .values(&row)
            .on_conflict(dsl::task_name)
            .do_update()
            .set((
                dsl::last_scanned_block.eq(diesel::dsl::sql::<diesel::sql_types::BigInt>(
                    "GREATEST(cursors.last_scanned_block, excluded.last_scanned_block)",
                )),
                dsl::updated_at.eq(now_ms()),
            ))
            .execute(&mut conn)
            .await
            .context("Failed to update scan cursor")?;

        debug!(
            "[CursorStore] Updated cursor for '{}' to {}",
            task_name, block_number
        );
        Ok(())
    }

    /// Confirm the configured ledger deployment against the chain and persist
    /// it to `ledger_info`. Returns the deployment block number.
    ///
    /// Refuses to start if the deployment transaction is unknown, reverted,
    /// or created a different contract than the configured ledger address.
    pub async fn verify_ledger_deployment(
        &self,
        chain: &dyn ChainReader,
        ledger_address: Address,
        deployment_tx: H256,
        network: &str,
    ) -> Result<u64> {
        let receipt = chain
            .transaction_receipt(deployment_tx)
            .await
            .context("Failed to fetch ledger deployment receipt")?
            .ok_or_else(|| anyhow!("ledger deployment tx {deployment_tx:?} not found on chain"))?;

        if receipt.status.map(|s| s.as_u64()) != Some(1) {
            return Err(anyhow!(
                "ledger deployment tx {deployment_tx:?} did not succeed"
            ));
        }
        let deployed = receipt
            .contract_address
            .ok_or_else(|| anyhow!("tx {deployment_tx:?} did not deploy a contract"))?;
        if deployed != ledger_address {
            return Err(anyhow!(
                "deployment tx created {deployed:?}, configured ledger is {ledger_address:?}"
            ));
        }
        let deployed_block = receipt
            .block_number
            .ok_or_else(|| anyhow!("deployment receipt has no block number"))?
            .as_u64();

        let row = LedgerInfoRow {
            contract_address: ledger_address.as_bytes().to_vec(),
            deployed_block: deployed_block as i64,
            deployed_tx: deployment_tx.as_bytes().to_vec(),
            network: network.to_string(),
            creator: receipt.from.as_bytes().to_vec(),
        };

        let mut conn = self.db.connect().await?;
        diesel::insert_into(ledger_info::table)
            .values(&row)
            .on_conflict_do_nothing()
            .execute(&mut conn)
            .await
            .context("Failed to persist ledger info")?;

        info!(
            "[CursorStore] Verified ledger {:?} deployed at block {}",
            ledger_address, deployed_block
        );
        Ok(deployed_block)
    }

    /// Contract addresses of all active evidence rows together with the
    /// block of their last applied transaction. Used to seed the evidence
    /// scanner's watch set at startup; seeding through the discovery queue
    /// re-fetches anything between the last applied block and the cursor,
    /// so a crash between dispatching a creation event and catching its
    /// contract up cannot leave a gap.
    pub async fn active_evidence_contracts(&self) -> Result<Vec<(Address, u64)>> {
        use evidence::dsl;

        let mut conn = self.db.connect().await?;
        let rows: Vec<(Vec<u8>, i64)> = dsl::evidence
            .filter(dsl::status.eq(EvidenceStatus::Active))
            .select((dsl::contract_address, dsl::last_tx_block))
            .load(&mut conn)
            .await
            .context("Failed to load active evidence contracts")?;

        let mut contracts = Vec::with_capacity(rows.len());
        for (bytes, last_tx_block) in rows {
            if bytes.len() == 20 {
                contracts.push((Address::from_slice(&bytes), last_tx_block.max(0) as u64));
            } else {
                warn!(
                    "[CursorStore] Skipping malformed contract address 0x{}",
                    hex::encode(&bytes)
                );
            }
        }
        Ok(contracts)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn from_block_without_cursor_starts_after_deployment() {
        assert_eq!(compute_from_block(None, 500), 501);
    }

    #[test]
    fn from_block_resumes_after_cursor() {
        assert_eq!(compute_from_block(Some(500), 100), 501);
    }

    #[test]
    fn stale_cursor_below_deployment_is_clamped() {
        assert_eq!(compute_from_block(Some(50), 100), 101);
    }
}
