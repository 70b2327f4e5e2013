// Copyright (c) EvidenceChain, Inc.
// SPDX-License-Identifier: Apache-2.0

//! Block scanners.
//!
//! Two scanner tasks share this implementation: one follows the ledger
//! contract for creation events, the other follows the dynamic set of
//! evidence contracts for custody events. Each pass scans a bounded batch
//! of blocks up to the confirmation-depth safe head, dispatches every event
//! in chain order, and only then advances its cursor. A crash therefore
//! re-scans at most one batch, and the mirror's idempotent writes absorb
//! the replay.

use std::sync::Arc;
use std::time::Duration;

use ethers::types::Address;
use tokio::task::JoinHandle;
use tokio::time;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::chain::ChainReader;
use crate::error::ChainError;
use crate::cursor::{compute_from_block, CursorStore};
use crate::dispatcher::Dispatcher;
use crate::events::normalize_batch;
use crate::metrics::IndexerMetrics;
use crate::watch_set::WatchSet;

#[derive(Debug, Clone)]
pub struct ScannerConfig {
    /// Blocks below the head considered safe from reorgs.
    pub confirmations: u64,
    /// Maximum blocks fetched per pass.
    pub batch_size: u64,
    pub poll_interval: Duration,
    pub error_backoff: Duration,
}

/// Inclusive block range for the next batch, or None when there is nothing
/// safe to scan yet.
pub fn compute_batch_range(
    cursor: Option<u64>,
    deployed_block: u64,
    head: u64,
    confirmations: u64,
    batch_size: u64,
) -> Option<(u64, u64)> {
    let safe_head = head.checked_sub(confirmations)?;
    let from = compute_from_block(cursor, deployed_block);
    if from > safe_head {
        return None;
    }
    let to = (from + batch_size - 1).min(safe_head);
    Some((from, to))
}

/// Inclusive range a newly discovered contract must be caught up over, or
/// None when the cursor has not yet passed its discovery block and the
/// regular batch scan covers it.
pub fn compute_backfill_range(discovered_at: u64, cursor: Option<u64>) -> Option<(u64, u64)> {
    let cursor = cursor?;
    (discovered_at <= cursor).then_some((discovered_at, cursor))
}

/// What the scanner follows.
pub enum ScanTarget {
    /// The ledger contract announcing new evidence.
    Ledger(Address),
    /// The evidence contracts currently known to the mirror.
    WatchSet(Arc<WatchSet>),
}

enum ScanOutcome {
    /// Nothing to do: no watched addresses, or no safe blocks past the cursor.
    Idle,
    /// A batch was dispatched; true when the cursor reached the safe head.
    Advanced { caught_up: bool },
}

pub struct Scanner {
    task_name: &'static str,
    chain: Arc<dyn ChainReader>,
    cursor_store: CursorStore,
    dispatcher: Arc<Dispatcher>,
    target: ScanTarget,
    /// Stored alongside the cursor; the ledger address, or empty for the
    /// dynamic set.
    watch_key: Vec<u8>,
    deployed_block: u64,
    config: ScannerConfig,
    metrics: Arc<IndexerMetrics>,
}

impl Scanner {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        task_name: &'static str,
        chain: Arc<dyn ChainReader>,
        cursor_store: CursorStore,
        dispatcher: Arc<Dispatcher>,
        target: ScanTarget,
        deployed_block: u64,
        config: ScannerConfig,
        metrics: Arc<IndexerMetrics>,
    ) -> Self {
        let watch_key = match &target {
            ScanTarget::Ledger(addr) => addr.as_bytes().to_vec(),
            ScanTarget::WatchSet(_) => Vec::new(),
        };
        Self {
            task_name,
            chain,
            cursor_store,
            dispatcher,
            target,
            watch_key,
            deployed_block,
            config,
            metrics,
        }
    }

    pub fn spawn(self, cancel: CancellationToken) -> JoinHandle<()> {
        tokio::spawn(async move {
            info!(
                "[{}] Starting scanner (deployed block {}, confirmations {}, batch {})",
                self.task_name, self.deployed_block, self.config.confirmations, self.config.batch_size
            );
            let mut delay = Duration::ZERO;
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => {
                        info!("[{}] Cancelled, stopping", self.task_name);
                        break;
                    }
                    _ = time::sleep(delay) => {}
                }
                delay = match self.scan_once().await {
                    // Behind the safe head: keep scanning without pause.
                    Ok(ScanOutcome::Advanced { caught_up: false }) => Duration::ZERO,
                    Ok(_) => self.config.poll_interval,
                    Err(e) => {
                        match e.downcast_ref::<ChainError>() {
                            Some(ce) if ce.is_recoverable() => {
                                warn!("[{}] Scan pass failed, will retry: {e:?}", self.task_name);
                            }
                            _ => error!("[{}] Scan pass failed: {e:?}", self.task_name),
                        }
                        self.config.error_backoff
                    }
                };
            }
        })
    }

    async fn scan_once(&self) -> anyhow::Result<ScanOutcome> {
        let addresses = match &self.target {
            ScanTarget::Ledger(addr) => vec![*addr],
            ScanTarget::WatchSet(set) => set.snapshot(),
        };
        if addresses.is_empty() {
            return Ok(ScanOutcome::Idle);
        }

        let head = self.chain.block_number().await?;
        let cursor = self.cursor_store.last_scanned_block(self.task_name).await?;

        // Contracts discovered since the last pass may have events below the
        // shared cursor; catch those up before scanning forward. On failure
        // the queue is restored and retried on the next pass.
        if let ScanTarget::WatchSet(set) = &self.target {
            let backfills = set.take_backfills();
            if !backfills.is_empty() {
                if let Err(e) = self.run_backfills(&backfills, cursor).await {
                    set.requeue_backfills(backfills);
                    return Err(e);
                }
            }
        }

        let Some((from, to)) = compute_batch_range(
            cursor,
            self.deployed_block,
            head,
            self.config.confirmations,
            self.config.batch_size,
        ) else {
            return Ok(ScanOutcome::Idle);
        };

        let timer = self.metrics.scan_batch_latency.start_timer();
        let logs = self.chain.get_logs(&addresses, from, to).await?;
        let events = normalize_batch(logs);
        let count = events.len();
        for ev in &events {
            self.dispatcher.dispatch(ev).await;
        }

        // The cursor moves only after the whole batch has been dispatched;
        // a crash before this line replays the batch.
        self.cursor_store
            .set_last_scanned_block(self.task_name, &self.watch_key, to, self.deployed_block)
            .await?;
        timer.observe_duration();

        self.metrics
            .last_scanned_block
            .with_label_values(&[self.task_name])
            .set(to as i64);
        if count > 0 {
            info!(
                "[{}] Dispatched {} events from blocks [{}, {}]",
                self.task_name, count, from, to
            );
        } else {
            debug!("[{}] No events in blocks [{}, {}]", self.task_name, from, to);
        }

        let safe_head = head.saturating_sub(self.config.confirmations);
        Ok(ScanOutcome::Advanced {
            caught_up: to >= safe_head,
        })
    }

    /// One-shot catch-up scans for contracts whose first blocks lie below
    /// the cursor. Dispatch is idempotent, so a retried catch-up that
    /// partially ran before is harmless.
    async fn run_backfills(
        &self,
        backfills: &[(Address, u64)],
        cursor: Option<u64>,
    ) -> anyhow::Result<()> {
        for &(address, discovered_at) in backfills {
            let Some((from, to)) = compute_backfill_range(discovered_at, cursor) else {
                continue;
            };
            let logs = self.chain.get_logs(&[address], from, to).await?;
            let events = normalize_batch(logs);
            let count = events.len();
            for ev in &events {
                self.dispatcher.dispatch(ev).await;
            }
            info!(
                "[{}] Caught up {:?} over blocks [{}, {}] ({} events)",
                self.task_name, address, from, to, count
            );
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn waits_for_confirmations() {
        // Head at 105 with 12 confirmations leaves nothing safe past block 93.
        assert_eq!(compute_batch_range(Some(93), 0, 105, 12, 100), None);
        assert_eq!(compute_batch_range(Some(92), 0, 105, 12, 100), Some((93, 93)));
    }

    #[test]
    fn head_below_confirmation_depth_is_idle() {
        assert_eq!(compute_batch_range(None, 0, 5, 12, 100), None);
    }

    #[test]
    fn batch_is_capped() {
        assert_eq!(
            compute_batch_range(Some(100), 0, 10_000, 12, 250),
            Some((101, 350))
        );
    }

    #[test]
    fn resumes_after_persisted_cursor() {
        // Cursor at 500 resumes at 501 regardless of the deployment block.
        assert_eq!(
            compute_batch_range(Some(500), 100, 1_000, 12, 250),
            Some((501, 750))
        );
    }

    #[test]
    fn first_scan_starts_after_deployment() {
        assert_eq!(
            compute_batch_range(None, 100, 1_000, 12, 1_000),
            Some((101, 988))
        );
    }

    #[test]
    fn final_partial_batch_stops_at_safe_head() {
        assert_eq!(
            compute_batch_range(Some(980), 0, 1_000, 12, 250),
            Some((981, 988))
        );
    }

    #[test]
    fn late_discovered_contract_is_caught_up_below_the_cursor() {
        // Shared cursor at 1000 while a contract created at block 700 joins
        // the watch set: the regular batch resumes at 1001, so the catch-up
        // range must cover the gap up to and including the cursor.
        assert_eq!(
            compute_batch_range(Some(1_000), 100, 2_000, 12, 250),
            Some((1_001, 1_250))
        );
        assert_eq!(compute_backfill_range(700, Some(1_000)), Some((700, 1_000)));
    }

    #[test]
    fn contract_discovered_ahead_of_cursor_needs_no_catch_up() {
        assert_eq!(compute_backfill_range(1_500, Some(1_000)), None);
        // No cursor yet: the first regular scan starts at the deployment
        // block and covers everything.
        assert_eq!(compute_backfill_range(700, None), None);
    }
}
