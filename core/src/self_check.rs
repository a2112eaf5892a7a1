//! Self-check runner: cross-table invariants over the donation ledger.
//!
//! CHECK ORDER (fixed, so the first reported failure is deterministic):
//!   1. Duplicate tips
//!   2. Balance reconciliation
//!   3. Orphans (no elsewhere account)
//!   4. Orphans with outstanding tips
//!   5. Payday volume recomputation
//!
//! Each check is a pure read over a single connection and returns the
//! violation it found, if any. `check_db` stops at the first violation;
//! `audit_db` evaluates everything.

use crate::{
    error::{LedgerError, LedgerResult},
    store::{BalanceMismatch, LedgerStore, PaydayVolumeMismatch, VolumeField},
    types::ParticipantId,
};
use log::{debug, error, info, warn};
use rusqlite::Connection;
use serde::Serialize;
use std::fmt;

/// A failed invariant with the rows needed to diagnose it.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "check", rename_all = "snake_case")]
pub enum Violation {
    DuplicateTips {
        count: i64,
    },
    ConflictingBalances {
        rows: Vec<BalanceMismatch>,
    },
    MissingElsewheres {
        usernames: Vec<String>,
    },
    OrphansWithTips {
        ids: Vec<ParticipantId>,
    },
    PaydayVolume {
        field: VolumeField,
        rows: Vec<PaydayVolumeMismatch>,
    },
}

impl Violation {
    pub fn check_name(&self) -> &'static str {
        match self {
            Self::DuplicateTips { .. } => "tips",
            Self::ConflictingBalances { .. } => "balances",
            Self::MissingElsewheres { .. } => "orphans",
            Self::OrphansWithTips { .. } => "orphans_with_tips",
            Self::PaydayVolume { .. } => "paydays_volumes",
        }
    }
}

impl fmt::Display for Violation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::DuplicateTips { count } => {
                write!(f, "{count} tip row(s) share (tipper, tippee, mtime)")
            }
            Self::ConflictingBalances { rows } => {
                write!(f, "conflicting balances:")?;
                for r in rows {
                    write!(f, " (id={}, expected={}, actual={})", r.id, r.expected, r.actual)?;
                }
                Ok(())
            }
            Self::MissingElsewheres { usernames } => {
                write!(f, "missing elsewheres: {usernames:?}")
            }
            Self::OrphansWithTips { ids } => {
                write!(f, "participants with tips but no elsewhere: {ids:?}")
            }
            Self::PaydayVolume { field, rows } => {
                write!(f, "{field} mismatch:")?;
                for r in rows {
                    write!(
                        f,
                        " (payday={}, ts_start={}, stored={}, recomputed={})",
                        r.id,
                        r.ts_start.to_rfc3339(),
                        r.stored,
                        r.recomputed
                    )?;
                }
                Ok(())
            }
        }
    }
}

/// Runs all checks on the given connection; the first violation is
/// returned as `LedgerError::InvariantViolation`.
pub fn check_db(conn: &Connection) -> LedgerResult<()> {
    let checks: [fn(&Connection) -> LedgerResult<Option<Violation>>; 4] = [
        check_tips,
        check_balances,
        check_orphans,
        check_orphans_with_tips,
    ];
    for check in checks {
        if let Some(v) = check(conn)? {
            return Err(fail(v));
        }
    }
    if let Some(v) = check_paydays_volumes(conn)?.into_iter().next() {
        return Err(fail(v));
    }
    info!("self-check passed");
    Ok(())
}

/// Runs every check and collects all violations, in check order.
pub fn audit_db(conn: &Connection) -> LedgerResult<Vec<Violation>> {
    let mut found = Vec::new();
    found.extend(check_tips(conn)?);
    found.extend(check_balances(conn)?);
    found.extend(check_orphans(conn)?);
    found.extend(check_orphans_with_tips(conn)?);
    found.extend(check_paydays_volumes(conn)?);
    for v in &found {
        error!("self-check [{}]: {v}", v.check_name());
    }
    if found.is_empty() {
        info!("self-check audit found no violations");
    }
    Ok(found)
}

fn fail(v: Violation) -> LedgerError {
    error!("self-check [{}]: {v}", v.check_name());
    LedgerError::InvariantViolation(v)
}

/// No two tip rows may share (tipper, tippee, mtime).
pub fn check_tips(conn: &Connection) -> LedgerResult<Option<Violation>> {
    let count = LedgerStore::new(conn).count_conflicting_tips()?;
    debug!("check tips: {count} conflicting");
    Ok((count != 0).then_some(Violation::DuplicateTips { count }))
}

/// Stored balances must equal the ledger recomputation.
pub fn check_balances(conn: &Connection) -> LedgerResult<Option<Violation>> {
    let rows = LedgerStore::new(conn).conflicting_balances()?;
    debug!("check balances: {} conflicting", rows.len());
    Ok((!rows.is_empty()).then_some(Violation::ConflictingBalances { rows }))
}

/// Every non-archived participant needs an elsewhere account.
pub fn check_orphans(conn: &Connection) -> LedgerResult<Option<Violation>> {
    let usernames = LedgerStore::new(conn).orphan_usernames()?;
    debug!("check orphans: {} found", usernames.len());
    Ok((!usernames.is_empty()).then_some(Violation::MissingElsewheres { usernames }))
}

/// Removing a participant's last elsewhere account must zero their tips.
pub fn check_orphans_with_tips(conn: &Connection) -> LedgerResult<Option<Violation>> {
    let ids = LedgerStore::new(conn).orphans_with_tips()?;
    debug!("check orphans with tips: {} found", ids.len());
    Ok((!ids.is_empty()).then_some(Violation::OrphansWithTips { ids }))
}

/// Payday rollups must match the exchanges inside each payday's window.
///
/// While any payday is running the data is transiently inconsistent, so
/// the whole check is skipped rather than filtering that one row.
pub fn check_paydays_volumes(conn: &Connection) -> LedgerResult<Vec<Violation>> {
    let store = LedgerStore::new(conn);
    if store.payday_is_running()? {
        warn!("payday is running, skipping payday volume check");
        return Ok(Vec::new());
    }
    let mut found = Vec::new();
    for field in VolumeField::ALL {
        let rows = store.payday_volume_mismatches(field)?;
        debug!("check {field}: {} mismatching", rows.len());
        if !rows.is_empty() {
            found.push(Violation::PaydayVolume { field, rows });
        }
    }
    Ok(found)
}
