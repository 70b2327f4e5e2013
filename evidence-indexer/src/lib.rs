// Copyright (c) EvidenceChain, Inc.
// SPDX-License-Identifier: Apache-2.0

//! Chain event listener and activity reconciliation engine.
//!
//! The listener follows a ledger contract and the evidence contracts it
//! announces, normalizes their custody events, and reconciles them against a
//! Postgres mirror: authoritative evidence state on one side, optimistic
//! client-submitted activity records on the other.

pub mod abi;
pub mod chain;
pub mod config;
pub mod cursor;
pub mod dispatcher;
pub mod error;
pub mod events;
pub mod metrics;
pub mod push;
pub mod reconciler;
pub mod resolution;
pub mod scanner;
pub mod util;
pub mod validator;
pub mod watch_set;
