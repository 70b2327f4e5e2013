// Copyright (c) EvidenceChain, Inc.
// SPDX-License-Identifier: Apache-2.0

//! Client submission validation.
//!
//! Clients insert optimistic `pending` activity records after sending their
//! transactions. The validator settles each one: it waits (bounded) for the
//! transaction receipt, checks the receipt actually carries the claimed
//! custody event, applies the ledger effect to the mirror and moves the
//! record to `client_only`. The record is then fully confirmed later when
//! the scanner observes the same event and promotes it to `on_chain`.

use std::sync::Arc;
use std::time::Duration;

use diesel::{ExpressionMethods, QueryDsl, SelectableHelper};
use diesel_async::scoped_futures::ScopedFutureExt;
use diesel_async::{AsyncConnection, RunQueryDsl};
use ethers::types::{Address, TransactionReceipt, H256};
use evidence_pg_db::Db;
use evidence_schema::models::{ActivityRow, ActivityStatus, ActivityType};
use evidence_schema::schema::activity;
use tokio::task::JoinHandle;
use tokio::time;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::chain::ChainReader;
use crate::error::ReconcileError;
use crate::events::{normalize, EventKind, NormalizedEvent};
use crate::metrics::IndexerMetrics;
use crate::push::{self, StatusNotification};
use crate::reconciler::apply_event_effect;
use crate::resolution::{candidate_matches, facts_from_event, Candidate};
use crate::util::now_ms;

#[derive(Debug, Clone)]
pub struct ValidatorConfig {
    /// How long to wait for a submission's receipt before failing it.
    pub receipt_timeout: Duration,
    /// Receipt polling cadence within that window.
    pub receipt_poll_interval: Duration,
    /// How often the worker looks for new pending records.
    pub poll_interval: Duration,
}

impl Default for ValidatorConfig {
    fn default() -> Self {
        Self {
            receipt_timeout: Duration::from_secs(10),
            receipt_poll_interval: Duration::from_millis(500),
            poll_interval: Duration::from_secs(2),
        }
    }
}

/// How a receipt settles a submission.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReceiptVerdict {
    Confirmed,
    Reverted,
}

pub fn classify_receipt(receipt: &TransactionReceipt) -> ReceiptVerdict {
    if receipt.status.map(|s| s.as_u64()) == Some(1) {
        ReceiptVerdict::Confirmed
    } else {
        ReceiptVerdict::Reverted
    }
}

fn kind_matches(kind: &EventKind, activity_type: ActivityType) -> bool {
    matches!(
        (kind, activity_type),
        (EventKind::Created(_), ActivityType::Create)
            | (EventKind::Transferred(_), ActivityType::Transfer)
            | (EventKind::Discontinued(_), ActivityType::Discontinue)
    )
}

/// The event in `receipt` that backs the claimed activity, if any.
pub fn find_claimed_event(
    receipt: &TransactionReceipt,
    activity_type: ActivityType,
    evidence_id: &[u8],
) -> Option<NormalizedEvent> {
    receipt
        .logs
        .iter()
        .filter_map(|log| normalize(log).ok())
        .find(|ev| kind_matches(&ev.kind, activity_type) && ev.evidence_id() == evidence_id)
}

pub struct SubmissionValidator {
    db: Db,
    chain: Arc<dyn ChainReader>,
    metrics: Arc<IndexerMetrics>,
    config: ValidatorConfig,
}

impl SubmissionValidator {
    pub fn new(
        db: Db,
        chain: Arc<dyn ChainReader>,
        metrics: Arc<IndexerMetrics>,
        config: ValidatorConfig,
    ) -> Self {
        Self {
            db,
            chain,
            metrics,
            config,
        }
    }

    /// Pending records, oldest first.
    pub async fn pending_activities(&self) -> anyhow::Result<Vec<ActivityRow>> {
        let mut conn = self.db.connect().await?;
        let rows = activity::table
            .filter(activity::status.eq(ActivityStatus::Pending))
            .order(activity::initialized_at.asc())
            .limit(100)
            .select(ActivityRow::as_select())
            .load(&mut conn)
            .await?;
        Ok(rows)
    }

    /// Settle one pending record. Returning Ok without a settlement leaves
    /// the record pending for the next pass.
    pub async fn validate(&self, row: &ActivityRow) -> anyhow::Result<()> {
        if row.status != ActivityStatus::Pending {
            return Ok(());
        }

        // Fetch records never touch the chain; they settle immediately.
        if row.activity_type == ActivityType::Fetch {
            self.settle_client_only(row, None).await?;
            self.record_outcome("off_chain");
            return Ok(());
        }

        let Some(tx_bytes) = row.tx_hash.as_deref() else {
            self.settle_failed(row, "submission carries no transaction hash")
                .await?;
            self.record_outcome("missing_hash");
            return Ok(());
        };
        if tx_bytes.len() != 32 {
            self.settle_failed(row, "submission carries a malformed transaction hash")
                .await?;
            self.record_outcome("missing_hash");
            return Ok(());
        }
        let tx_hash = H256::from_slice(tx_bytes);

        let receipt = match self.await_receipt(tx_hash).await? {
            Some(receipt) => receipt,
            None => {
                self.settle_failed(row, "timed out waiting for transaction receipt")
                    .await?;
                self.record_outcome("timeout");
                return Ok(());
            }
        };

        if classify_receipt(&receipt) == ReceiptVerdict::Reverted {
            self.settle_failed(row, "transaction reverted").await?;
            self.record_outcome("reverted");
            return Ok(());
        }

        let Some(ev) = find_claimed_event(&receipt, row.activity_type, &row.evidence_id) else {
            self.settle_failed(row, "receipt carries no matching custody event")
                .await?;
            self.record_outcome("event_missing");
            return Ok(());
        };

        // The receipt proves the event happened; now the submission's own
        // facts must agree with it.
        let facts = facts_from_event(&ev);
        let candidate = Candidate {
            id: row.id,
            status: row.status,
            actor: row.actor.clone(),
            tx_hash: row.tx_hash.clone(),
            from_addr: row.from_addr.clone(),
            to_addr: row.to_addr.clone(),
        };
        if !candidate_matches(&candidate, &facts) {
            self.settle_failed(row, "submission disagrees with the on-chain event")
                .await?;
            self.record_outcome("event_mismatch");
            return Ok(());
        }

        match self.settle_confirmed(row, &ev).await {
            Ok(()) => {
                self.record_outcome("confirmed");
                Ok(())
            }
            // The creation event hasn't been mirrored yet; retry once the
            // ledger scanner catches up.
            Err(ReconcileError::UnknownEvidence(addr)) => {
                debug!(
                    "[Validator] Activity {} waits for evidence contract 0x{addr} to be mirrored",
                    row.id
                );
                Ok(())
            }
            Err(ReconcileError::OwnershipMismatch { .. }) => {
                self.settle_failed(row, "mirror ownership disagrees with the transfer")
                    .await?;
                self.record_outcome("ownership_mismatch");
                Ok(())
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Poll for the receipt until the configured timeout elapses.
    async fn await_receipt(&self, tx_hash: H256) -> anyhow::Result<Option<TransactionReceipt>> {
        let poll = async {
            loop {
                if let Some(receipt) = self.chain.transaction_receipt(tx_hash).await? {
                    return Ok::<_, anyhow::Error>(receipt);
                }
                time::sleep(self.config.receipt_poll_interval).await;
            }
        };
        match time::timeout(self.config.receipt_timeout, poll).await {
            Ok(result) => result.map(Some),
            Err(_elapsed) => Ok(None),
        }
    }

    /// Apply the event's ledger effect and move the record to `client_only`,
    /// atomically.
    async fn settle_confirmed(
        &self,
        row: &ActivityRow,
        ev: &NormalizedEvent,
    ) -> Result<(), ReconcileError> {
        let mut conn = self.db.connect().await.map_err(ReconcileError::Other)?;
        conn.transaction::<(), ReconcileError, _>(|conn| {
            async move {
                apply_event_effect(conn, ev).await?;
                diesel::update(activity::table.filter(activity::id.eq(row.id)))
                    .set((
                        activity::status.eq(ActivityStatus::ClientOnly),
                        activity::block_number.eq(Some(ev.block_number as i64)),
                        activity::updated_at.eq(now_ms()),
                    ))
                    .execute(conn)
                    .await?;
                Ok(())
            }
            .scope_boxed()
        })
        .await?;

        info!(
            "[Validator] Confirmed activity {} as client_only (evidence 0x{})",
            row.id,
            hex::encode(&row.evidence_id)
        );
        self.notify(row, ActivityStatus::ClientOnly, None);
        Ok(())
    }

    async fn settle_client_only(
        &self,
        row: &ActivityRow,
        block_number: Option<i64>,
    ) -> anyhow::Result<()> {
        let mut conn = self.db.connect().await?;
        diesel::update(activity::table.filter(activity::id.eq(row.id)))
            .set((
                activity::status.eq(ActivityStatus::ClientOnly),
                activity::block_number.eq(block_number),
                activity::updated_at.eq(now_ms()),
            ))
            .execute(&mut conn)
            .await?;
        self.notify(row, ActivityStatus::ClientOnly, None);
        Ok(())
    }

    async fn settle_failed(&self, row: &ActivityRow, reason: &str) -> anyhow::Result<()> {
        let mut conn = self.db.connect().await?;
        diesel::update(activity::table.filter(activity::id.eq(row.id)))
            .set((
                activity::status.eq(ActivityStatus::Failed),
                activity::updated_at.eq(now_ms()),
            ))
            .execute(&mut conn)
            .await?;
        warn!("[Validator] Failed activity {}: {reason}", row.id);
        self.notify(row, ActivityStatus::Failed, Some(reason.to_string()));
        Ok(())
    }

    fn notify(&self, row: &ActivityRow, status: ActivityStatus, reason: Option<String>) {
        let mut recipients: Vec<&[u8]> = vec![&row.actor];
        // A transfer also concerns the receiving account.
        if let Some(to) = row.to_addr.as_deref() {
            recipients.push(to);
        }
        for recipient in recipients {
            if recipient.len() != 20 {
                continue;
            }
            self.metrics.push_notifications.inc();
            push::emit(StatusNotification::new(
                Address::from_slice(recipient),
                row.id,
                &row.evidence_id,
                status,
                row.tx_hash.as_deref(),
                now_ms(),
                reason.clone(),
            ));
        }
    }

    fn record_outcome(&self, outcome: &str) {
        self.metrics.validations.with_label_values(&[outcome]).inc();
    }

    pub fn poll_interval(&self) -> Duration {
        self.config.poll_interval
    }
}

/// Run the validator as a background task polling for pending records.
pub fn spawn_validation_worker(
    validator: Arc<SubmissionValidator>,
    cancel: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        info!("[Validator] Starting validation worker");
        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    info!("[Validator] Cancelled, stopping");
                    break;
                }
                _ = time::sleep(validator.poll_interval()) => {}
            }
            let rows = match validator.pending_activities().await {
                Ok(rows) => rows,
                Err(e) => {
                    error!("[Validator] Failed to load pending activities: {e:?}");
                    continue;
                }
            };
            for row in rows {
                if cancel.is_cancelled() {
                    break;
                }
                if let Err(e) = validator.validate(&row).await {
                    error!("[Validator] Error validating activity {}: {e:?}", row.id);
                }
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::test_logs::{transferred_log, LogPosition};
    use ethers::types::U64;

    fn receipt_with_status(status: u64) -> TransactionReceipt {
        TransactionReceipt {
            status: Some(U64::from(status)),
            ..Default::default()
        }
    }

    #[test]
    fn successful_receipt_is_confirmed() {
        assert_eq!(
            classify_receipt(&receipt_with_status(1)),
            ReceiptVerdict::Confirmed
        );
    }

    #[test]
    fn reverted_receipt_is_rejected() {
        assert_eq!(
            classify_receipt(&receipt_with_status(0)),
            ReceiptVerdict::Reverted
        );
    }

    #[test]
    fn missing_status_is_treated_as_reverted() {
        let receipt = TransactionReceipt::default();
        assert_eq!(classify_receipt(&receipt), ReceiptVerdict::Reverted);
    }

    #[test]
    fn claimed_event_is_found_in_receipt_logs() {
        let contract = Address::from([0xBB; 20]);
        let pos = LogPosition {
            block_number: 42,
            transaction_index: 0,
            log_index: 0,
            tx_hash: H256::from_low_u64_be(7),
        };
        let mut receipt = receipt_with_status(1);
        receipt.logs = vec![transferred_log(
            contract,
            [1u8; 32],
            Address::from([0x11; 20]),
            Address::from([0x22; 20]),
            1_700_000_000,
            &pos,
        )];

        assert!(find_claimed_event(&receipt, ActivityType::Transfer, &[1u8; 32]).is_some());
        // Wrong kind or wrong evidence id finds nothing.
        assert!(find_claimed_event(&receipt, ActivityType::Create, &[1u8; 32]).is_none());
        assert!(find_claimed_event(&receipt, ActivityType::Transfer, &[9u8; 32]).is_none());
    }
}
