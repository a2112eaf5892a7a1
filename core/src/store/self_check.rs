//! Read-only reconciliation queries backing the self-check runner.

use super::{BalanceMismatch, LedgerStore, PaydayVolumeMismatch, VolumeField};
use crate::{
    error::LedgerResult,
    types::{from_cents, micros_column, ParticipantId},
};

impl LedgerStore<'_> {
    /// Rows lost when `tips` is deduplicated on (tipper, tippee, mtime)
    /// keeping one arbitrary row per key.
    pub fn count_conflicting_tips(&self) -> LedgerResult<i64> {
        let count: i64 = self.conn.query_row(
            "SELECT COALESCE(SUM(n - 1), 0)
               FROM (
                    SELECT COUNT(*) AS n
                      FROM tips
                  GROUP BY tipper, tippee, mtime
                    HAVING COUNT(*) > 1
                    )",
            [],
            |row| row.get(0),
        )?;
        Ok(count)
    }

    /// Participants whose stored balance differs from the sum of their
    /// non-failed exchanges (withdrawals net of fee) and transfers.
    /// Only participants with at least one ledger row are examined.
    pub fn conflicting_balances(&self) -> LedgerResult<Vec<BalanceMismatch>> {
        let mut stmt = self.conn.prepare(
            "SELECT p.id, foo2.expected, p.balance AS actual
               FROM (
                    SELECT id, SUM(a) AS expected
                      FROM (
                              SELECT participant AS id, SUM(amount) AS a
                                FROM exchanges
                               WHERE amount > 0
                                 AND (status IS NULL OR status <> 'failed')
                            GROUP BY participant

                           UNION ALL

                              SELECT participant AS id, SUM(amount - fee) AS a
                                FROM exchanges
                               WHERE amount < 0
                                 AND (status IS NULL OR status <> 'failed')
                            GROUP BY participant

                           UNION ALL

                              SELECT tipper AS id, SUM(-amount) AS a
                                FROM transfers
                            GROUP BY tipper

                           UNION ALL

                              SELECT tippee AS id, SUM(amount) AS a
                                FROM transfers
                            GROUP BY tippee
                           ) AS foo
                  GROUP BY id
                    ) AS foo2
               JOIN participants p ON p.id = foo2.id
              WHERE foo2.expected <> p.balance
           ORDER BY p.id",
        )?;
        let rows = stmt
            .query_map([], |row| {
                Ok(BalanceMismatch {
                    id: row.get(0)?,
                    expected: from_cents(row.get(1)?),
                    actual: from_cents(row.get(2)?),
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    /// Usernames of non-archived participants without an elsewhere account.
    pub fn orphan_usernames(&self) -> LedgerResult<Vec<String>> {
        let mut stmt = self.conn.prepare(
            "SELECT username
               FROM participants p
              WHERE status <> 'archived'
                AND NOT EXISTS (SELECT 1 FROM elsewhere e WHERE e.participant = p.id)
           ORDER BY username",
        )?;
        let rows = stmt
            .query_map([], |row| row.get(0))?
            .collect::<Result<Vec<String>, _>>()?;
        Ok(rows)
    }

    /// Ids of parties to a positive current tip that have no elsewhere account.
    pub fn orphans_with_tips(&self) -> LedgerResult<Vec<ParticipantId>> {
        let mut stmt = self.conn.prepare(
            "WITH valid_tips AS (SELECT * FROM current_tips WHERE amount > 0)
             SELECT id
               FROM (SELECT tipper AS id FROM valid_tips
                     UNION
                     SELECT tippee AS id FROM valid_tips) p
              WHERE NOT EXISTS (SELECT 1 FROM elsewhere WHERE participant = p.id)
           ORDER BY id",
        )?;
        let rows = stmt
            .query_map([], |row| row.get(0))?
            .collect::<Result<Vec<ParticipantId>, _>>()?;
        Ok(rows)
    }

    /// True while any payday has `ts_end < ts_start`.
    pub fn payday_is_running(&self) -> LedgerResult<bool> {
        let running: bool = self.conn.query_row(
            "SELECT EXISTS (SELECT 1 FROM paydays WHERE ts_end < ts_start)",
            [],
            |row| row.get(0),
        )?;
        Ok(running)
    }

    /// Paydays whose stored `field` differs from its recomputation.
    pub fn payday_volume_mismatches(
        &self,
        field: VolumeField,
    ) -> LedgerResult<Vec<PaydayVolumeMismatch>> {
        let sql = format!(
            "SELECT id, ts_start, stored, recomputed
               FROM (
                    SELECT id, ts_start, {column} AS stored, {recompute} AS recomputed
                      FROM paydays
                    ) AS foo
              WHERE stored <> recomputed
           ORDER BY id",
            column = field.column(),
            recompute = field.recompute_subquery(),
        );
        let mut stmt = self.conn.prepare(&sql)?;
        let rows = stmt
            .query_map([], |row| {
                Ok(PaydayVolumeMismatch {
                    id: row.get(0)?,
                    ts_start: micros_column(row, 1)?,
                    stored: from_cents(row.get(2)?),
                    recomputed: from_cents(row.get(3)?),
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }
}
