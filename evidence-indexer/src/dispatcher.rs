// Copyright (c) EvidenceChain, Inc.
// SPDX-License-Identifier: Apache-2.0

//! Event dispatch.
//!
//! Sits between the scanners and the reconciler. Dispatch never returns an
//! error to the scan loop: a batch must always run to completion so the
//! cursor can advance, and the mirror's idempotent writes make it safe to
//! see a problematic event again on a later rescan. Failures are logged and
//! counted instead.

use std::sync::Arc;

use tracing::{debug, error};

use crate::events::{EventKind, NormalizedEvent};
use crate::metrics::IndexerMetrics;
use crate::reconciler::Reconciler;
use crate::watch_set::WatchSet;

pub struct Dispatcher {
    reconciler: Arc<Reconciler>,
    watch_set: Arc<WatchSet>,
    metrics: Arc<IndexerMetrics>,
}

impl Dispatcher {
    pub fn new(
        reconciler: Arc<Reconciler>,
        watch_set: Arc<WatchSet>,
        metrics: Arc<IndexerMetrics>,
    ) -> Self {
        Self {
            reconciler,
            watch_set,
            metrics,
        }
    }

    pub async fn dispatch(&self, ev: &NormalizedEvent) {
        // A creation event starts the follow of its evidence contract even
        // if reconciliation below fails; the contract's own events would
        // otherwise be missed entirely. The creation block rides along so
        // the evidence scanner can catch up on blocks its cursor has
        // already passed.
        if let EventKind::Created(created) = &ev.kind {
            if self
                .watch_set
                .add_discovered(created.evidence_contract, ev.block_number)
            {
                debug!(
                    "[Dispatcher] Now watching evidence contract {:?} from block {}",
                    created.evidence_contract, ev.block_number
                );
            }
        }

        self.metrics
            .events_processed
            .with_label_values(&[ev.kind_name()])
            .inc();

        if let Err(e) = self.reconciler.handle_event(ev).await {
            self.metrics
                .reconcile_failures
                .with_label_values(&[reason_label(&e)])
                .inc();
            self.metrics.events_skipped.inc();
            error!(
                "[Dispatcher] Failed to reconcile {} event for evidence 0x{} \
                 (block {}, tx {:?}): {e:?}",
                ev.kind_name(),
                hex::encode(ev.evidence_id()),
                ev.block_number,
                ev.tx_hash,
            );
        }
    }
}

fn reason_label(err: &crate::error::ReconcileError) -> &'static str {
    use crate::error::ReconcileError::*;
    match err {
        UnknownEvidence(_) => "unknown_evidence",
        OwnershipMismatch { .. } => "ownership_mismatch",
        Db(_) => "db",
        Other(_) => "other",
    }
}
