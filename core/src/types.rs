//! Shared primitive types and the money/time encodings used on disk.
//!
//! Money lives in SQLite as integer cents and in Rust as a two-place
//! `Decimal`. Timestamps live as microseconds since the Unix epoch.

use crate::error::{LedgerError, LedgerResult};
use chrono::{DateTime, Utc};
use rusqlite::{types::Type, Row};
use rust_decimal::{Decimal, RoundingStrategy};
use serde::{Deserialize, Serialize};

/// Primary key of a row in `participants`.
pub type ParticipantId = i64;

/// Primary key of a row in `paydays`.
pub type PaydayId = i64;

pub type Timestamp = DateTime<Utc>;

fn two_places(amount: Decimal) -> Decimal {
    let mut d = amount.round_dp_with_strategy(2, RoundingStrategy::MidpointAwayFromZero);
    d.rescale(2);
    d
}

/// Convert an amount to integer cents, rounding half away from zero.
/// Amounts whose cents do not fit an `i64` are rejected.
pub fn to_cents(amount: Decimal) -> LedgerResult<i64> {
    let d = two_places(amount);
    if d.scale() != 2 {
        return Err(LedgerError::AmountOutOfRange(amount));
    }
    i64::try_from(d.mantissa()).map_err(|_| LedgerError::AmountOutOfRange(amount))
}

pub fn from_cents(cents: i64) -> Decimal {
    Decimal::new(cents, 2)
}

/// Two-place string form used in API payloads, e.g. `"4.00"`.
pub fn format_amount(amount: Decimal) -> String {
    two_places(amount).to_string()
}

pub fn to_micros(ts: Timestamp) -> i64 {
    ts.timestamp_micros()
}

pub fn from_micros(micros: i64) -> LedgerResult<Timestamp> {
    DateTime::from_timestamp_micros(micros).ok_or(LedgerError::TimestampOutOfRange(micros))
}

/// Read a microsecond column as a timestamp inside a row mapper.
pub(crate) fn micros_column(row: &Row<'_>, idx: usize) -> rusqlite::Result<Timestamp> {
    let micros: i64 = row.get(idx)?;
    DateTime::from_timestamp_micros(micros).ok_or_else(|| {
        rusqlite::Error::FromSqlConversionFailure(
            idx,
            Type::Integer,
            format!("timestamp {micros} out of range").into(),
        )
    })
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ParticipantStatus {
    /// Unclaimed account created from an elsewhere identity.
    Stub,
    Active,
    Archived,
}

impl ParticipantStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Stub => "stub",
            Self::Active => "active",
            Self::Archived => "archived",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "stub" => Some(Self::Stub),
            "active" => Some(Self::Active),
            "archived" => Some(Self::Archived),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExchangeStatus {
    Pre,
    Pending,
    Failed,
    Succeeded,
}

impl ExchangeStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pre => "pre",
            Self::Pending => "pending",
            Self::Failed => "failed",
            Self::Succeeded => "succeeded",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pre" => Some(Self::Pre),
            "pending" => Some(Self::Pending),
            "failed" => Some(Self::Failed),
            "succeeded" => Some(Self::Succeeded),
            _ => None,
        }
    }
}
