// Copyright (c) EvidenceChain, Inc.
// SPDX-License-Identifier: Apache-2.0

//! Activity reconciliation.
//!
//! The reconciler applies each normalized custody event to the mirror inside
//! a single database transaction: first the authoritative ledger effect
//! (evidence row upsert / owner change / discontinuation), then settlement
//! of any optimistic activity records claiming the event, then account
//! promotion. Re-processing an already applied event is a no-op, which is
//! what makes crash-recovery rescans safe.

use std::sync::Arc;

use diesel::upsert::excluded;
use diesel::{ExpressionMethods, OptionalExtension, QueryDsl};
use diesel_async::scoped_futures::ScopedFutureExt;
use diesel_async::{AsyncConnection, RunQueryDsl};
use ethers::types::Address;
use evidence_pg_db::{Connection, Db};
use evidence_schema::models::{
    custody_from_json, custody_to_json, AccountRow, AccountType, ActivityStatus, ActivityType,
    CustodyEntry, EvidenceRow, EvidenceStatus, NewActivity,
};
use evidence_schema::schema::{accounts, activity, evidence};
use tracing::{debug, info};

use crate::error::ReconcileError;
use crate::events::{
    CreatedEvent, DiscontinuedEvent, EventKind, NormalizedEvent, TransferredEvent,
};
use crate::metrics::IndexerMetrics;
use crate::push::{self, StatusNotification};
use crate::resolution::{
    facts_from_event, resolve_candidates, Candidate, EventFacts, ResolutionPlan,
};
use crate::util::now_ms;

pub struct Reconciler {
    db: Db,
    metrics: Arc<IndexerMetrics>,
}

impl Reconciler {
    pub fn new(db: Db, metrics: Arc<IndexerMetrics>) -> Self {
        Self { db, metrics }
    }

    /// Apply one event to the mirror. All writes commit or roll back
    /// together; notifications are emitted only after a successful commit.
    pub async fn handle_event(&self, ev: &NormalizedEvent) -> Result<(), ReconcileError> {
        let mut conn = self.db.connect().await.map_err(ReconcileError::Other)?;
        let notifications = conn
            .transaction::<Vec<StatusNotification>, ReconcileError, _>(|conn| {
                async move {
                    match &ev.kind {
                        EventKind::Created(c) => self.reconcile_created(conn, ev, c).await,
                        EventKind::Transferred(t) => self.reconcile_transferred(conn, ev, t).await,
                        EventKind::Discontinued(d) => {
                            self.reconcile_discontinued(conn, ev, d).await
                        }
                    }
                }
                .scope_boxed()
            })
            .await?;

        for notification in notifications {
            self.metrics.push_notifications.inc();
            push::emit(notification);
        }
        Ok(())
    }

    async fn reconcile_created(
        &self,
        conn: &mut Connection<'_>,
        ev: &NormalizedEvent,
        created: &CreatedEvent,
    ) -> Result<Vec<StatusNotification>, ReconcileError> {
        apply_created(conn, ev, created).await?;

        let facts = facts_from_event(ev);
        let notes = self
            .settle_activities(conn, ev, ActivityType::Create, &facts)
            .await?;

        upsert_account(conn, created.creator.as_bytes(), Some(created.nonce)).await?;
        Ok(notes)
    }

    async fn reconcile_transferred(
        &self,
        conn: &mut Connection<'_>,
        ev: &NormalizedEvent,
        transfer: &TransferredEvent,
    ) -> Result<Vec<StatusNotification>, ReconcileError> {
        apply_transferred(conn, ev, transfer).await?;

        let facts = facts_from_event(ev);
        let notes = self
            .settle_activities(conn, ev, ActivityType::Transfer, &facts)
            .await?;

        upsert_account(conn, transfer.new_owner.as_bytes(), None).await?;
        Ok(notes)
    }

    async fn reconcile_discontinued(
        &self,
        conn: &mut Connection<'_>,
        ev: &NormalizedEvent,
        disc: &DiscontinuedEvent,
    ) -> Result<Vec<StatusNotification>, ReconcileError> {
        apply_discontinued(conn, ev, disc).await?;

        let facts = facts_from_event(ev);
        self.settle_activities(conn, ev, ActivityType::Discontinue, &facts)
            .await
    }

    /// Load the candidate set for this event, resolve it and execute the
    /// plan. If a settled record already carries this transaction the event
    /// is a replay and only stale candidates are failed.
    async fn settle_activities(
        &self,
        conn: &mut Connection<'_>,
        ev: &NormalizedEvent,
        kind: ActivityType,
        facts: &EventFacts,
    ) -> Result<Vec<StatusNotification>, ReconcileError> {
        let evidence_id = ev.evidence_id().to_vec();

        let candidates: Vec<Candidate> = activity::table
            .filter(activity::evidence_id.eq(evidence_id.as_slice()))
            .filter(activity::activity_type.eq(kind))
            .filter(activity::status.eq_any([ActivityStatus::ClientOnly, ActivityStatus::Failed]))
            .select((
                activity::id,
                activity::status,
                activity::actor,
                activity::tx_hash,
                activity::from_addr,
                activity::to_addr,
            ))
            .load::<(
                i64,
                ActivityStatus,
                Vec<u8>,
                Option<Vec<u8>>,
                Option<Vec<u8>>,
                Option<Vec<u8>>,
            )>(conn)
            .await?
            .into_iter()
            .map(
                |(id, status, actor, tx_hash, from_addr, to_addr)| Candidate {
                    id,
                    status,
                    actor,
                    tx_hash,
                    from_addr,
                    to_addr,
                },
            )
            .collect();

        let already_settled: i64 = activity::table
            .filter(activity::evidence_id.eq(evidence_id.as_slice()))
            .filter(activity::activity_type.eq(kind))
            .filter(activity::tx_hash.eq(facts.tx_hash.as_slice()))
            .filter(activity::status.eq_any([ActivityStatus::OnChain, ActivityStatus::DbOnly]))
            .count()
            .get_result(conn)
            .await?;

        let mut plan = resolve_candidates(&candidates, facts);
        if already_settled > 0 {
            debug!(
                "[Reconciler] Event {:?} already settled for evidence 0x{}",
                ev.tx_hash,
                hex::encode(&evidence_id)
            );
            plan.promote = None;
            plan.insert_fresh = None;
        }

        self.execute_plan(conn, ev, kind, facts, &candidates, plan)
            .await
    }

    async fn execute_plan(
        &self,
        conn: &mut Connection<'_>,
        ev: &NormalizedEvent,
        kind: ActivityType,
        facts: &EventFacts,
        candidates: &[Candidate],
        plan: ResolutionPlan,
    ) -> Result<Vec<StatusNotification>, ReconcileError> {
        let now = now_ms();
        let evidence_id = ev.evidence_id().to_vec();
        let mut notifications = Vec::new();

        if let Some(id) = plan.promote {
            diesel::update(activity::table.filter(activity::id.eq(id)))
                .set((
                    activity::status.eq(ActivityStatus::OnChain),
                    activity::block_number.eq(ev.block_number as i64),
                    activity::updated_at.eq(now),
                ))
                .execute(conn)
                .await?;
            self.metrics
                .activities_resolved
                .with_label_values(&["on_chain"])
                .inc();
            notifications.extend(notifications_for(
                candidates,
                id,
                &evidence_id,
                ActivityStatus::OnChain,
                now,
                None,
            ));
            info!(
                "[Reconciler] Promoted activity {} to on_chain (evidence 0x{})",
                id,
                hex::encode(&evidence_id)
            );
        }

        if !plan.fail.is_empty() {
            diesel::update(activity::table.filter(activity::id.eq_any(plan.fail.clone())))
                .set((
                    activity::status.eq(ActivityStatus::Failed),
                    activity::updated_at.eq(now),
                ))
                .execute(conn)
                .await?;
            for id in &plan.fail {
                self.metrics
                    .activities_resolved
                    .with_label_values(&["failed"])
                    .inc();
                notifications.extend(notifications_for(
                    candidates,
                    *id,
                    &evidence_id,
                    ActivityStatus::Failed,
                    now,
                    Some("superseded by authoritative chain event".to_string()),
                ));
            }
        }

        if let Some(status) = plan.insert_fresh {
            let row = NewActivity {
                evidence_id: evidence_id.clone(),
                actor: facts.actor.clone(),
                activity_type: kind,
                from_addr: facts.from_addr.clone(),
                to_addr: facts.to_addr.clone(),
                status,
                tx_hash: Some(facts.tx_hash.clone()),
                block_number: Some(ev.block_number as i64),
                meta: serde_json::json!({ "origin": "chain_scan" }),
                initialized_at: now,
                updated_at: now,
            };
            diesel::insert_into(activity::table)
                .values(&row)
                .execute(conn)
                .await?;
            self.metrics
                .activities_resolved
                .with_label_values(&[status.as_ref()])
                .inc();
        }

        Ok(notifications)
    }
}

/// Notifications for a settled candidate: the submitting account, plus the
/// receiving account when the record carries one (transfers).
fn notifications_for(
    candidates: &[Candidate],
    id: i64,
    evidence_id: &[u8],
    status: ActivityStatus,
    updated_at: i64,
    reason: Option<String>,
) -> Vec<StatusNotification> {
    let Some(candidate) = candidates.iter().find(|c| c.id == id) else {
        return Vec::new();
    };
    let mut recipients: Vec<&[u8]> = vec![&candidate.actor];
    if let Some(to) = candidate.to_addr.as_deref() {
        if to != candidate.actor.as_slice() {
            recipients.push(to);
        }
    }
    recipients
        .into_iter()
        .filter(|r| r.len() == 20)
        .map(|r| {
            StatusNotification::new(
                Address::from_slice(r),
                id,
                evidence_id,
                status,
                candidate.tx_hash.as_deref(),
                updated_at,
                reason.clone(),
            )
        })
        .collect()
}

/// Apply the ledger effect of any event kind. Shared by the reconciler's
/// transaction and the submission validator's.
pub(crate) async fn apply_event_effect(
    conn: &mut Connection<'_>,
    ev: &NormalizedEvent,
) -> Result<(), ReconcileError> {
    match &ev.kind {
        EventKind::Created(c) => apply_created(conn, ev, c).await.map_err(ReconcileError::Db),
        EventKind::Transferred(t) => apply_transferred(conn, ev, t).await,
        EventKind::Discontinued(d) => apply_discontinued(conn, ev, d).await,
    }
}

/// Insert the evidence row announced by a creation event. A conflicting row
/// means the event (or the validator) already recorded it; later custody
/// state must not be clobbered, so the insert backs off entirely.
pub(crate) async fn apply_created(
    conn: &mut Connection<'_>,
    ev: &NormalizedEvent,
    created: &CreatedEvent,
) -> Result<(), diesel::result::Error> {
    let custody = vec![CustodyEntry::new(
        created.creator.as_bytes(),
        created.timestamp,
    )];
    let row = EvidenceRow {
        evidence_id: created.evidence_id.to_vec(),
        contract_address: created.evidence_contract.as_bytes().to_vec(),
        creator: created.creator.as_bytes().to_vec(),
        current_owner: created.creator.as_bytes().to_vec(),
        metadata_hash: created.metadata_hash.to_vec(),
        description: String::new(),
        status: EvidenceStatus::Active,
        chain_of_custody: custody_to_json(&custody),
        created_at: created.timestamp,
        updated_at: now_ms(),
        discontinued_at: None,
        latest_tx_hash: ev.tx_hash.as_bytes().to_vec(),
        last_tx_block: ev.block_number as i64,
    };
    let count = diesel::insert_into(evidence::table)
        .values(&row)
        .on_conflict_do_nothing()
        .execute(conn)
        .await?;
    if count > 0 {
        info!(
            "[Reconciler] Mirrored new evidence 0x{} at contract {:?}",
            hex::encode(created.evidence_id),
            created.evidence_contract
        );
    }
    Ok(())
}

/// How a transfer event lands on the mirror row it targets.
#[derive(Debug, PartialEq, Eq)]
pub(crate) enum TransferDecision {
    /// The mirror already carries this transaction, or has advanced past the
    /// event's block. Replays and crash-recovery rescans end up here.
    AlreadyApplied,
    /// The event's previous owner disagrees with the mirror.
    OwnerMismatch,
    /// Apply the transfer; the custody trail with the new owner appended.
    Apply { custody: Vec<CustodyEntry> },
}

/// Decide a transfer against the mirror row's current state.
pub(crate) fn decide_transfer(
    current_owner: &[u8],
    latest_tx_hash: &[u8],
    last_tx_block: i64,
    custody_json: &serde_json::Value,
    ev: &NormalizedEvent,
    transfer: &TransferredEvent,
) -> TransferDecision {
    // Replays: the exact transaction, or any event below the block the
    // mirror has already advanced past. An event in the same block as the
    // last applied one is new (creation and first transfer can share a
    // block), so the block comparison is strict.
    if latest_tx_hash == ev.tx_hash.as_bytes() || last_tx_block > ev.block_number as i64 {
        return TransferDecision::AlreadyApplied;
    }
    if current_owner != transfer.previous_owner.as_bytes() {
        return TransferDecision::OwnerMismatch;
    }
    let mut custody = custody_from_json(custody_json);
    custody.push(CustodyEntry::new(
        transfer.new_owner.as_bytes(),
        transfer.timestamp,
    ));
    TransferDecision::Apply { custody }
}

/// Apply a custody transfer to the mirror: owner change plus a new chain of
/// custody entry. Skipped when the mirror already carries this transaction.
/// Fails when the event's previous owner disagrees with the mirror.
pub(crate) async fn apply_transferred(
    conn: &mut Connection<'_>,
    ev: &NormalizedEvent,
    transfer: &TransferredEvent,
) -> Result<(), ReconcileError> {
    let row: Option<(Vec<u8>, Vec<u8>, Vec<u8>, i64, serde_json::Value)> = evidence::table
        .filter(evidence::contract_address.eq(ev.address.as_bytes()))
        .select((
            evidence::evidence_id,
            evidence::current_owner,
            evidence::latest_tx_hash,
            evidence::last_tx_block,
            evidence::chain_of_custody,
        ))
        .first(conn)
        .await
        .optional()?;

    let (evidence_id, current_owner, latest_tx_hash, last_tx_block, custody_json) =
        row.ok_or_else(|| ReconcileError::UnknownEvidence(hex::encode(ev.address.as_bytes())))?;

    let custody = match decide_transfer(
        &current_owner,
        &latest_tx_hash,
        last_tx_block,
        &custody_json,
        ev,
        transfer,
    ) {
        TransferDecision::AlreadyApplied => {
            debug!(
                "[Reconciler] Transfer {:?} already applied to evidence 0x{}",
                ev.tx_hash,
                hex::encode(&evidence_id)
            );
            return Ok(());
        }
        TransferDecision::OwnerMismatch => {
            return Err(ReconcileError::OwnershipMismatch {
                evidence_id: hex::encode(&evidence_id),
                mirror_owner: hex::encode(&current_owner),
                event_owner: hex::encode(transfer.previous_owner.as_bytes()),
            });
        }
        TransferDecision::Apply { custody } => custody,
    };

    diesel::update(evidence::table.filter(evidence::evidence_id.eq(evidence_id.as_slice())))
        .set((
            evidence::current_owner.eq(transfer.new_owner.as_bytes()),
            evidence::chain_of_custody.eq(custody_to_json(&custody)),
            evidence::latest_tx_hash.eq(ev.tx_hash.as_bytes()),
            evidence::last_tx_block.eq(ev.block_number as i64),
            evidence::updated_at.eq(now_ms()),
        ))
        .execute(conn)
        .await?;
    Ok(())
}

/// Mark an evidence row discontinued. Skipped when the mirror already
/// carries this transaction.
pub(crate) async fn apply_discontinued(
    conn: &mut Connection<'_>,
    ev: &NormalizedEvent,
    disc: &DiscontinuedEvent,
) -> Result<(), ReconcileError> {
    let row: Option<(Vec<u8>, Vec<u8>)> = evidence::table
        .filter(evidence::contract_address.eq(ev.address.as_bytes()))
        .select((evidence::evidence_id, evidence::latest_tx_hash))
        .first(conn)
        .await
        .optional()?;

    let (evidence_id, latest_tx_hash) =
        row.ok_or_else(|| ReconcileError::UnknownEvidence(hex::encode(ev.address.as_bytes())))?;

    if latest_tx_hash == ev.tx_hash.as_bytes() {
        return Ok(());
    }

    diesel::update(evidence::table.filter(evidence::evidence_id.eq(evidence_id.as_slice())))
        .set((
            evidence::status.eq(EvidenceStatus::Discontinued),
            evidence::discontinued_at.eq(Some(disc.timestamp)),
            evidence::latest_tx_hash.eq(ev.tx_hash.as_bytes()),
            evidence::last_tx_block.eq(ev.block_number as i64),
            evidence::updated_at.eq(now_ms()),
        ))
        .execute(conn)
        .await?;
    Ok(())
}

/// Record an account as a manager. Promotion is one-way and the nonce only
/// ever moves forward, so replayed events cannot regress either field.
pub(crate) async fn upsert_account(
    conn: &mut Connection<'_>,
    address: &[u8],
    nonce: Option<u64>,
) -> Result<(), diesel::result::Error> {
    let row = AccountRow {
        address: address.to_vec(),
        account_type: AccountType::Manager,
        nonce: nonce.unwrap_or(0) as i64,
        updated_at: now_ms(),
    };
    diesel::insert_into(accounts::table)
        .values(&row)
        .on_conflict(accounts::address)
        .do_update()
        .set((
            accounts::account_type.eq(AccountType::Manager),
            accounts::nonce.eq(diesel::dsl::sql::<diesel::sql_types::BigInt>(
                "GREATEST(accounts.nonce, excluded.nonce)",
            )),
            accounts::updated_at.eq(excluded(accounts::updated_at)),
        ))
        .execute(conn)
        .await?;
    Ok(())
}
