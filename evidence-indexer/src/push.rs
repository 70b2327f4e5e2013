// Copyright (c) EvidenceChain, Inc.
// SPDX-License-Identifier: Apache-2.0

//! Push boundary.
//!
//! When the validator settles a client submission it notifies the affected
//! account(s) through a [`PushSink`]. The sink is process-global so the
//! reconciler and validator can reach it without threading it through every
//! constructor; emission is strictly fire-and-forget and never affects
//! reconciliation outcomes.

use ethers::types::Address;
use evidence_schema::models::ActivityStatus;
use serde::Serialize;
use std::sync::{Arc, OnceLock};
use tokio::sync::broadcast;
use tracing::debug;

/// Global push sink for cross-module access
static GLOBAL_PUSH_SINK: OnceLock<Arc<dyn PushSink>> = OnceLock::new();

/// Payload delivered to interested accounts when an activity settles.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct StatusNotification {
    /// Hex-encoded account address the notification targets.
    pub recipient: String,
    pub activity_id: i64,
    /// Hex-encoded evidence id.
    pub evidence_id: String,
    pub status: String,
    /// Hex-encoded transaction hash, absent for off-chain activities.
    pub tx_hash: Option<String>,
    /// When the record reached this status, unix milliseconds.
    pub updated_at: i64,
    /// Human-readable reason, present on failures.
    pub reason: Option<String>,
}

impl StatusNotification {
    pub fn new(
        recipient: Address,
        activity_id: i64,
        evidence_id: &[u8],
        status: ActivityStatus,
        tx_hash: Option<&[u8]>,
        updated_at: i64,
        reason: Option<String>,
    ) -> Self {
        Self {
            recipient: format!("0x{}", hex::encode(recipient.as_bytes())),
            activity_id,
            evidence_id: format!("0x{}", hex::encode(evidence_id)),
            status: status.as_ref().to_string(),
            tx_hash: tx_hash.map(|h| format!("0x{}", hex::encode(h))),
            updated_at,
            reason,
        }
    }
}

/// Delivery surface for settled-activity notifications.
pub trait PushSink: Send + Sync {
    fn send(&self, notification: StatusNotification);
}

/// Initialize the global push sink. Later calls keep the first sink.
pub fn init_global_push_sink(sink: Arc<dyn PushSink>) -> Arc<dyn PushSink> {
    GLOBAL_PUSH_SINK.get_or_init(|| sink).clone()
}

/// Get the global push sink. Returns None if not initialized.
pub fn get_global_push_sink() -> Option<Arc<dyn PushSink>> {
    GLOBAL_PUSH_SINK.get().cloned()
}

/// Emit through the global sink if one is installed. Dropped silently
/// otherwise; notification delivery is best-effort by contract.
pub fn emit(notification: StatusNotification) {
    match get_global_push_sink() {
        Some(sink) => sink.send(notification),
        None => debug!("[Push] no sink installed, dropping notification"),
    }
}

/// [`PushSink`] over a tokio broadcast channel. Downstream delivery (websocket
/// fan-out, mobile push, ...) subscribes to the channel; lagging or absent
/// subscribers never block the sender.
pub struct BroadcastPush {
    tx: broadcast::Sender<StatusNotification>,
}

impl BroadcastPush {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<StatusNotification> {
        self.tx.subscribe()
    }
}

impl PushSink for BroadcastPush {
    fn send(&self, notification: StatusNotification) {
        // Err means no live subscribers, which is fine.
        let _ = self.tx.send(notification);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn broadcast_push_delivers_to_subscriber() {
        let push = BroadcastPush::new(8);
        let mut rx = push.subscribe();
        let note = StatusNotification::new(
            Address::from([0x11; 20]),
            42,
            &[0xAB; 32],
            ActivityStatus::ClientOnly,
            Some(&[0xCD; 32]),
            1_700_000_000_000,
            None,
        );
        push.send(note.clone());
        let got = rx.try_recv().unwrap();
        assert_eq!(got, note);
        assert_eq!(got.recipient, format!("0x{}", "11".repeat(20)));
        assert_eq!(got.status, "client_only");
        assert_eq!(got.tx_hash.as_deref(), Some(format!("0x{}", "cd".repeat(32)).as_str()));
        assert_eq!(got.updated_at, 1_700_000_000_000);
    }

    #[test]
    fn send_without_subscribers_does_not_panic() {
        let push = BroadcastPush::new(8);
        push.send(StatusNotification::new(
            Address::zero(),
            1,
            &[0u8; 32],
            ActivityStatus::Failed,
            None,
            0,
            Some("transaction reverted".into()),
        ));
    }
}
