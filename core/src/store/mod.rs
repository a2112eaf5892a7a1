//! SQLite persistence layer.
//!
//! RULE: Only the store talks to the database.
//! The self-check runner and the tip endpoint call store methods; they
//! never execute SQL directly.

mod ledger;
mod participant;
mod payday;
mod self_check;
mod tip;

pub use payday::VolumeField;

use crate::{
    error::LedgerResult,
    types::{ParticipantId, ParticipantStatus, PaydayId, Timestamp},
};
use rust_decimal::Decimal;
use rusqlite::Connection;
use serde::Serialize;

/// Store view over a borrowed connection (usually a `Cursor`).
/// All writes land in whatever transaction the connection is in.
pub struct LedgerStore<'c> {
    conn: &'c Connection,
}

impl<'c> LedgerStore<'c> {
    pub fn new(conn: &'c Connection) -> Self {
        Self { conn }
    }

    /// Apply all schema migrations in order.
    pub fn migrate(&self) -> LedgerResult<()> {
        self.conn
            .execute_batch(include_str!("../../../migrations/001_ledger.sql"))?;
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ParticipantRow {
    pub id: ParticipantId,
    pub username: String,
    pub status: ParticipantStatus,
    pub balance: Decimal,
    pub goal: Option<Decimal>,
}

impl ParticipantRow {
    /// A negative goal means the participant refuses donations.
    pub fn accepts_donations(&self) -> bool {
        !matches!(self.goal, Some(goal) if goal < Decimal::ZERO)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct TipRow {
    pub id: i64,
    pub tipper: ParticipantId,
    pub tippee: ParticipantId,
    pub mtime: Timestamp,
    pub amount: Decimal,
}

#[derive(Debug, Clone, PartialEq)]
pub struct PaydayRow {
    pub id: PaydayId,
    pub ts_start: Timestamp,
    pub ts_end: Timestamp,
    pub charge_volume: Decimal,
    pub charge_fees_volume: Decimal,
    pub ach_volume: Decimal,
    pub ach_fees_volume: Decimal,
}

impl PaydayRow {
    pub fn is_running(&self) -> bool {
        self.ts_end < self.ts_start
    }
}

/// A participant whose stored balance disagrees with the ledger.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BalanceMismatch {
    pub id: ParticipantId,
    pub expected: Decimal,
    pub actual: Decimal,
}

/// A completed payday whose stored volume disagrees with its exchanges.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PaydayVolumeMismatch {
    pub id: PaydayId,
    pub ts_start: Timestamp,
    pub stored: Decimal,
    pub recomputed: Decimal,
}
