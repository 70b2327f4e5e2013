// Copyright (c) EvidenceChain, Inc.
// SPDX-License-Identifier: Apache-2.0

//! Error types shared across the listener.

use thiserror::Error;

/// Errors raised by the chain access layer.
#[derive(Error, Debug)]
pub enum ChainError {
    #[error("RPC error: {0}")]
    Rpc(String),

    #[error("timeout: {0}")]
    Timeout(String),

    #[error("invalid RPC response: {0}")]
    InvalidResponse(String),

    #[error("invalid configuration: {0}")]
    Config(String),
}

impl ChainError {
    /// Whether the operation can be retried after a backoff.
    pub fn is_recoverable(&self) -> bool {
        matches!(self, ChainError::Rpc(_) | ChainError::Timeout(_))
    }
}

/// Errors raised while reconciling an observed event against the mirror.
#[derive(Error, Debug)]
pub enum ReconcileError {
    /// The event points at an evidence contract the mirror has never seen.
    #[error("no mirror row for evidence contract 0x{0}")]
    UnknownEvidence(String),

    /// A custody transfer whose previous owner disagrees with the mirror.
    #[error(
        "ownership mismatch for evidence 0x{evidence_id}: \
         mirror owner 0x{mirror_owner}, event previous owner 0x{event_owner}"
    )]
    OwnershipMismatch {
        evidence_id: String,
        mirror_owner: String,
        event_owner: String,
    },

    #[error("database error: {0}")]
    Db(#[from] diesel::result::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rpc_and_timeout_are_recoverable() {
        assert!(ChainError::Rpc("boom".into()).is_recoverable());
        assert!(ChainError::Timeout("slow".into()).is_recoverable());
        assert!(!ChainError::InvalidResponse("bad".into()).is_recoverable());
        assert!(!ChainError::Config("bad".into()).is_recoverable());
    }

    #[test]
    fn ownership_mismatch_names_both_owners() {
        let err = ReconcileError::OwnershipMismatch {
            evidence_id: "aa".into(),
            mirror_owner: "11".into(),
            event_owner: "22".into(),
        };
        let msg = err.to_string();
        assert!(msg.contains("0x11"));
        assert!(msg.contains("0x22"));
    }
}
