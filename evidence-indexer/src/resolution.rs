// Copyright (c) EvidenceChain, Inc.
// SPDX-License-Identifier: Apache-2.0

//! Candidate resolution.
//!
//! When an authoritative on-chain event arrives, the optimistic activity
//! records claiming it must be settled. [`resolve_candidates`] is the pure
//! decision procedure; the reconciler executes the resulting plan inside its
//! transaction.
//!
//! Rules:
//! - no candidates: the event was never claimed by a client, record a fresh
//!   `db_only` row.
//! - exactly one candidate matching the event's facts: promote it to
//!   `on_chain`, fail the rest.
//! - several matching candidates: the claim is ambiguous. All candidates are
//!   failed and one fresh `on_chain` row is inserted carrying the
//!   authoritative facts.
//! - candidates exist but none match: fail them all and record a fresh
//!   `db_only` row.

use evidence_schema::models::ActivityStatus;

use crate::events::{EventKind, NormalizedEvent};

/// A settleable activity row, as loaded by the reconciler. Only rows in
/// `client_only` or `failed` state are candidates; terminal `on_chain` and
/// `db_only` rows are settled already, `pending` rows still belong to the
/// validator.
#[derive(Debug, Clone)]
pub struct Candidate {
    pub id: i64,
    pub status: ActivityStatus,
    pub actor: Vec<u8>,
    pub tx_hash: Option<Vec<u8>>,
    pub from_addr: Option<Vec<u8>>,
    pub to_addr: Option<Vec<u8>>,
}

/// Authoritative facts extracted from the on-chain event.
#[derive(Debug, Clone)]
pub struct EventFacts {
    pub actor: Vec<u8>,
    pub tx_hash: Vec<u8>,
    pub from_addr: Option<Vec<u8>>,
    pub to_addr: Option<Vec<u8>>,
}

/// The facts a normalized event asserts about its activity. The actor is
/// the account that performed the action: the creator, the previous owner
/// for a transfer, the discontinuing owner.
pub fn facts_from_event(ev: &NormalizedEvent) -> EventFacts {
    let tx_hash = ev.tx_hash.as_bytes().to_vec();
    match &ev.kind {
        EventKind::Created(c) => EventFacts {
            actor: c.creator.as_bytes().to_vec(),
            tx_hash,
            from_addr: None,
            to_addr: None,
        },
        EventKind::Transferred(t) => EventFacts {
            actor: t.previous_owner.as_bytes().to_vec(),
            tx_hash,
            from_addr: Some(t.previous_owner.as_bytes().to_vec()),
            to_addr: Some(t.new_owner.as_bytes().to_vec()),
        },
        EventKind::Discontinued(d) => EventFacts {
            actor: d.by.as_bytes().to_vec(),
            tx_hash,
            from_addr: None,
            to_addr: None,
        },
    }
}

/// What the reconciler should do with the candidate set.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResolutionPlan {
    pub promote: Option<i64>,
    pub fail: Vec<i64>,
    pub insert_fresh: Option<ActivityStatus>,
}

/// Whether a candidate's optimistic record agrees with the event on every
/// fact it carries. A candidate without a transaction hash can never match.
pub fn candidate_matches(candidate: &Candidate, facts: &EventFacts) -> bool {
    if candidate.tx_hash.as_deref() != Some(facts.tx_hash.as_slice()) {
        return false;
    }
    if candidate.actor != facts.actor {
        return false;
    }
    if let Some(from) = &facts.from_addr {
        if candidate.from_addr.as_ref() != Some(from) {
            return false;
        }
    }
    if let Some(to) = &facts.to_addr {
        if candidate.to_addr.as_ref() != Some(to) {
            return false;
        }
    }
    true
}

pub fn resolve_candidates(candidates: &[Candidate], facts: &EventFacts) -> ResolutionPlan {
    if candidates.is_empty() {
        return ResolutionPlan {
            promote: None,
            fail: vec![],
            insert_fresh: Some(ActivityStatus::DbOnly),
        };
    }

    let (matching, stale): (Vec<&Candidate>, Vec<&Candidate>) = candidates
        .iter()
        .partition(|c| candidate_matches(c, facts));

    match matching.as_slice() {
        [] => ResolutionPlan {
            promote: None,
            fail: stale.iter().map(|c| c.id).collect(),
            insert_fresh: Some(ActivityStatus::DbOnly),
        },
        [winner] => ResolutionPlan {
            promote: Some(winner.id),
            fail: stale.iter().map(|c| c.id).collect(),
            insert_fresh: None,
        },
        _ => ResolutionPlan {
            promote: None,
            fail: candidates.iter().map(|c| c.id).collect(),
            insert_fresh: Some(ActivityStatus::OnChain),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn facts() -> EventFacts {
        EventFacts {
            actor: vec![0x11; 20],
            tx_hash: vec![0xAA; 32],
            from_addr: Some(vec![0x11; 20]),
            to_addr: Some(vec![0x22; 20]),
        }
    }

    fn matching_candidate(id: i64) -> Candidate {
        Candidate {
            id,
            status: ActivityStatus::ClientOnly,
            actor: vec![0x11; 20],
            tx_hash: Some(vec![0xAA; 32]),
            from_addr: Some(vec![0x11; 20]),
            to_addr: Some(vec![0x22; 20]),
        }
    }

    fn stale_candidate(id: i64) -> Candidate {
        Candidate {
            tx_hash: Some(vec![0xBB; 32]),
            ..matching_candidate(id)
        }
    }

    #[test]
    fn no_candidates_inserts_db_only() {
        let plan = resolve_candidates(&[], &facts());
        assert_eq!(plan.promote, None);
        assert!(plan.fail.is_empty());
        assert_eq!(plan.insert_fresh, Some(ActivityStatus::DbOnly));
    }

    #[test]
    fn single_match_is_promoted() {
        let plan = resolve_candidates(&[matching_candidate(7)], &facts());
        assert_eq!(plan.promote, Some(7));
        assert!(plan.fail.is_empty());
        assert_eq!(plan.insert_fresh, None);
    }

    #[test]
    fn single_match_among_stale_fails_the_rest() {
        let cands = vec![stale_candidate(1), matching_candidate(2), stale_candidate(3)];
        let plan = resolve_candidates(&cands, &facts());
        assert_eq!(plan.promote, Some(2));
        assert_eq!(plan.fail, vec![1, 3]);
        assert_eq!(plan.insert_fresh, None);
    }

    #[test]
    fn zero_matches_fails_all_and_inserts_db_only() {
        let cands = vec![stale_candidate(1), stale_candidate(2)];
        let plan = resolve_candidates(&cands, &facts());
        assert_eq!(plan.promote, None);
        assert_eq!(plan.fail, vec![1, 2]);
        assert_eq!(plan.insert_fresh, Some(ActivityStatus::DbOnly));
    }

    #[test]
    fn ambiguous_matches_fail_all_and_insert_on_chain() {
        let cands = vec![matching_candidate(1), matching_candidate(2), stale_candidate(3)];
        let plan = resolve_candidates(&cands, &facts());
        assert_eq!(plan.promote, None);
        assert_eq!(plan.fail, vec![1, 2, 3]);
        assert_eq!(plan.insert_fresh, Some(ActivityStatus::OnChain));
    }

    #[test]
    fn candidate_without_hash_never_matches() {
        let mut c = matching_candidate(1);
        c.tx_hash = None;
        assert!(!candidate_matches(&c, &facts()));
    }

    #[test]
    fn actor_mismatch_is_stale() {
        let mut c = matching_candidate(1);
        c.actor = vec![0x99; 20];
        assert!(!candidate_matches(&c, &facts()));
    }

    #[test]
    fn facts_without_transfer_fields_skip_those_checks() {
        let mut f = facts();
        f.from_addr = None;
        f.to_addr = None;
        let mut c = matching_candidate(1);
        c.from_addr = None;
        c.to_addr = None;
        assert!(candidate_matches(&c, &f));
    }
}
