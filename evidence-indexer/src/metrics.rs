// Copyright (c) EvidenceChain, Inc.
// SPDX-License-Identifier: Apache-2.0

use prometheus::{
    register_histogram_with_registry, register_int_counter_vec_with_registry,
    register_int_counter_with_registry, register_int_gauge_vec_with_registry, Histogram,
    IntCounter, IntCounterVec, IntGaugeVec, Registry,
};

const SCAN_LATENCY_SEC_BUCKETS: &[f64] = &[
    0.005, 0.01, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0, 60.0,
];

#[derive(Clone, Debug)]
pub struct IndexerMetrics {
    /// Highest block each scanner task has fully processed.
    pub(crate) last_scanned_block: IntGaugeVec,
    /// Decoded events handed to the dispatcher, by kind.
    pub(crate) events_processed: IntCounterVec,
    pub(crate) events_skipped: IntCounter,
    pub(crate) reconcile_failures: IntCounterVec,
    /// Activity transitions applied by the reconciler, by resulting status.
    pub(crate) activities_resolved: IntCounterVec,
    /// Client submission validations, by outcome.
    pub(crate) validations: IntCounterVec,
    pub(crate) push_notifications: IntCounter,
    pub(crate) scan_batch_latency: Histogram,
}

impl IndexerMetrics {
    pub fn new(registry: &Registry) -> Self {
        Self {
            last_scanned_block: register_int_gauge_vec_with_registry!(
                "evidence_last_scanned_block",
                "Highest block each scanner task has fully processed",
                &["task"],
                registry,
            )
            .unwrap(),
            events_processed: register_int_counter_vec_with_registry!(
                "evidence_events_processed",
                "Decoded custody events handed to the dispatcher, by kind",
                &["kind"],
                registry,
            )
            .unwrap(),
            events_skipped: register_int_counter_with_registry!(
                "evidence_events_skipped",
                "Events dropped after a non-recoverable reconciliation error",
                registry,
            )
            .unwrap(),
            reconcile_failures: register_int_counter_vec_with_registry!(
                "evidence_reconcile_failures",
                "Reconciliation failures, by reason",
                &["reason"],
                registry,
            )
            .unwrap(),
            activities_resolved: register_int_counter_vec_with_registry!(
                "evidence_activities_resolved",
                "Activity transitions applied by the reconciler, by resulting status",
                &["status"],
                registry,
            )
            .unwrap(),
            validations: register_int_counter_vec_with_registry!(
                "evidence_validations",
                "Client submission validations, by outcome",
                &["outcome"],
                registry,
            )
            .unwrap(),
            push_notifications: register_int_counter_with_registry!(
                "evidence_push_notifications",
                "Status notifications emitted at the push boundary",
                registry,
            )
            .unwrap(),
            scan_batch_latency: register_histogram_with_registry!(
                "evidence_scan_batch_latency",
                "Wall time spent fetching and dispatching one scan batch",
                SCAN_LATENCY_SEC_BUCKETS.to_vec(),
                registry,
            )
            .unwrap(),
        }
    }

    pub fn new_for_testing() -> Self {
        let registry = Registry::new();
        Self::new(&registry)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_for_testing() {
        let metrics = IndexerMetrics::new_for_testing();
        metrics.events_processed.with_label_values(&["created"]).inc();
        assert_eq!(
            metrics
                .events_processed
                .with_label_values(&["created"])
                .get(),
            1
        );
    }
}
