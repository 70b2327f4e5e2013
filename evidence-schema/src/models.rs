// Copyright (c) EvidenceChain, Inc.
// SPDX-License-Identifier: Apache-2.0

//! Row and enum types for the evidence mirror tables.

use diesel::deserialize::{self, FromSql, FromSqlRow};
use diesel::expression::AsExpression;
use diesel::pg::{Pg, PgValue};
use diesel::prelude::*;
use diesel::serialize::{self, Output, ToSql};
use diesel::sql_types::Text;
use serde::{Deserialize, Serialize};

use crate::schema::{accounts, activity, cursors, evidence, ledger_info};

/// Lifecycle status of a mirrored evidence record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, AsExpression, FromSqlRow)]
#[diesel(sql_type = Text)]
pub enum EvidenceStatus {
    Active,
    Discontinued,
}

impl AsRef<str> for EvidenceStatus {
    fn as_ref(&self) -> &str {
        match self {
            EvidenceStatus::Active => "active",
            EvidenceStatus::Discontinued => "discontinued",
        }
    }
}

impl ToSql<Text, Pg> for EvidenceStatus {
    fn to_sql<'b>(&'b self, out: &mut Output<'b, '_, Pg>) -> serialize::Result {
        <str as ToSql<Text, Pg>>::to_sql(self.as_ref(), &mut out.reborrow())
    }
}

impl FromSql<Text, Pg> for EvidenceStatus {
    fn from_sql(value: PgValue<'_>) -> deserialize::Result<Self> {
        match std::str::from_utf8(value.as_bytes())? {
            "active" => Ok(EvidenceStatus::Active),
            "discontinued" => Ok(EvidenceStatus::Discontinued),
            other => Err(format!("unknown evidence status: {other}").into()),
        }
    }
}

/// Reconciliation status of an activity record.
///
/// `Pending` and `ClientOnly` may still be promoted or demoted once the
/// listener's authoritative view catches up; `OnChain`, `DbOnly` and `Failed`
/// are terminal for that record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, AsExpression, FromSqlRow)]
#[diesel(sql_type = Text)]
pub enum ActivityStatus {
    Pending,
    ClientOnly,
    OnChain,
    DbOnly,
    Failed,
}

impl ActivityStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            ActivityStatus::OnChain | ActivityStatus::DbOnly | ActivityStatus::Failed
        )
    }
}

impl AsRef<str> for ActivityStatus {
    fn as_ref(&self) -> &str {
        match self {
            ActivityStatus::Pending => "pending",
            ActivityStatus::ClientOnly => "client_only",
            ActivityStatus::OnChain => "on_chain",
            ActivityStatus::DbOnly => "db_only",
            ActivityStatus::Failed => "failed",
        }
    }
}

impl ToSql<Text, Pg> for ActivityStatus {
    fn to_sql<'b>(&'b self, out: &mut Output<'b, '_, Pg>) -> serialize::Result {
        <str as ToSql<Text, Pg>>::to_sql(self.as_ref(), &mut out.reborrow())
    }
}

impl FromSql<Text, Pg> for ActivityStatus {
    fn from_sql(value: PgValue<'_>) -> deserialize::Result<Self> {
        match std::str::from_utf8(value.as_bytes())? {
            "pending" => Ok(ActivityStatus::Pending),
            "client_only" => Ok(ActivityStatus::ClientOnly),
            "on_chain" => Ok(ActivityStatus::OnChain),
            "db_only" => Ok(ActivityStatus::DbOnly),
            "failed" => Ok(ActivityStatus::Failed),
            other => Err(format!("unknown activity status: {other}").into()),
        }
    }
}

/// Kind of action an activity record describes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, AsExpression, FromSqlRow)]
#[diesel(sql_type = Text)]
pub enum ActivityType {
    Create,
    Transfer,
    Discontinue,
    Fetch,
}

impl AsRef<str> for ActivityType {
    fn as_ref(&self) -> &str {
        match self {
            ActivityType::Create => "create",
            ActivityType::Transfer => "transfer",
            ActivityType::Discontinue => "discontinue",
            ActivityType::Fetch => "fetch",
        }
    }
}

impl ToSql<Text, Pg> for ActivityType {
    fn to_sql<'b>(&'b self, out: &mut Output<'b, '_, Pg>) -> serialize::Result {
        <str as ToSql<Text, Pg>>::to_sql(self.as_ref(), &mut out.reborrow())
    }
}

impl FromSql<Text, Pg> for ActivityType {
    fn from_sql(value: PgValue<'_>) -> deserialize::Result<Self> {
        match std::str::from_utf8(value.as_bytes())? {
            "create" => Ok(ActivityType::Create),
            "transfer" => Ok(ActivityType::Transfer),
            "discontinue" => Ok(ActivityType::Discontinue),
            "fetch" => Ok(ActivityType::Fetch),
            other => Err(format!("unknown activity type: {other}").into()),
        }
    }
}

/// Account privilege level. Promotion is one-way: a viewer becomes a manager
/// on its first manager-level activity and is never demoted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, AsExpression, FromSqlRow)]
#[diesel(sql_type = Text)]
pub enum AccountType {
    Viewer,
    Manager,
}

impl AsRef<str> for AccountType {
    fn as_ref(&self) -> &str {
        match self {
            AccountType::Viewer => "viewer",
            AccountType::Manager => "manager",
        }
    }
}

impl ToSql<Text, Pg> for AccountType {
    fn to_sql<'b>(&'b self, out: &mut Output<'b, '_, Pg>) -> serialize::Result {
        <str as ToSql<Text, Pg>>::to_sql(self.as_ref(), &mut out.reborrow())
    }
}

impl FromSql<Text, Pg> for AccountType {
    fn from_sql(value: PgValue<'_>) -> deserialize::Result<Self> {
        match std::str::from_utf8(value.as_bytes())? {
            "viewer" => Ok(AccountType::Viewer),
            "manager" => Ok(AccountType::Manager),
            other => Err(format!("unknown account type: {other}").into()),
        }
    }
}

/// One entry in an evidence record's chain of custody.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CustodyEntry {
    /// Hex-encoded owner address.
    pub owner: String,
    /// On-chain timestamp (seconds) of the custody change.
    pub timestamp: i64,
}

impl CustodyEntry {
    pub fn new(owner: &[u8], timestamp: i64) -> Self {
        Self {
            owner: format!("0x{}", hex::encode(owner)),
            timestamp,
        }
    }
}

/// Parse a `chain_of_custody` JSONB column value.
pub fn custody_from_json(value: &serde_json::Value) -> Vec<CustodyEntry> {
    serde_json::from_value(value.clone()).unwrap_or_default()
}

/// Serialize custody entries back into a JSONB column value.
pub fn custody_to_json(entries: &[CustodyEntry]) -> serde_json::Value {
    serde_json::to_value(entries).unwrap_or(serde_json::Value::Array(vec![]))
}

#[derive(Debug, Clone, Queryable, Selectable, Insertable)]
#[diesel(table_name = evidence)]
pub struct EvidenceRow {
    pub evidence_id: Vec<u8>,
    pub contract_address: Vec<u8>,
    pub creator: Vec<u8>,
    pub current_owner: Vec<u8>,
    pub metadata_hash: Vec<u8>,
    pub description: String,
    pub status: EvidenceStatus,
    pub chain_of_custody: serde_json::Value,
    pub created_at: i64,
    pub updated_at: i64,
    pub discontinued_at: Option<i64>,
    pub latest_tx_hash: Vec<u8>,
    pub last_tx_block: i64,
}

#[derive(Debug, Clone, Queryable, Selectable)]
#[diesel(table_name = activity)]
pub struct ActivityRow {
    pub id: i64,
    pub evidence_id: Vec<u8>,
    pub actor: Vec<u8>,
    pub activity_type: ActivityType,
    pub from_addr: Option<Vec<u8>>,
    pub to_addr: Option<Vec<u8>>,
    pub status: ActivityStatus,
    pub tx_hash: Option<Vec<u8>>,
    pub block_number: Option<i64>,
    pub meta: serde_json::Value,
    pub initialized_at: i64,
    pub updated_at: i64,
}

/// Insertable activity row; `id` is assigned by the database.
#[derive(Debug, Clone, Insertable)]
#[diesel(table_name = activity)]
pub struct NewActivity {
    pub evidence_id: Vec<u8>,
    pub actor: Vec<u8>,
    pub activity_type: ActivityType,
    pub from_addr: Option<Vec<u8>>,
    pub to_addr: Option<Vec<u8>>,
    pub status: ActivityStatus,
    pub tx_hash: Option<Vec<u8>>,
    pub block_number: Option<i64>,
    pub meta: serde_json::Value,
    pub initialized_at: i64,
    pub updated_at: i64,
}

#[derive(Debug, Clone, Queryable, Selectable, Insertable)]
#[diesel(table_name = accounts)]
pub struct AccountRow {
    pub address: Vec<u8>,
    pub account_type: AccountType,
    pub nonce: i64,
    pub updated_at: i64,
}

#[derive(Debug, Clone, Queryable, Selectable, Insertable)]
#[diesel(table_name = ledger_info)]
pub struct LedgerInfoRow {
    pub contract_address: Vec<u8>,
    pub deployed_block: i64,
    pub deployed_tx: Vec<u8>,
    pub network: String,
    pub creator: Vec<u8>,
}

#[derive(Debug, Clone, Queryable, Selectable, Insertable)]
#[diesel(table_name = cursors)]
pub struct CursorRow {
    pub task_name: String,
    pub watch_address: Vec<u8>,
    pub last_scanned_block: i64,
    pub deployed_block: i64,
    pub updated_at: i64,
}
