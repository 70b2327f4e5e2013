// Copyright (c) EvidenceChain, Inc.
// SPDX-License-Identifier: Apache-2.0

//! Diesel schema and model types for the evidence mirror database.

pub mod models;
pub mod schema;
