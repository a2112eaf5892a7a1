use super::{LedgerStore, PaydayRow};
use crate::{
    error::LedgerResult,
    types::{from_cents, micros_column, to_cents, to_micros, PaydayId, Timestamp},
};
use rusqlite::{params, OptionalExtension};
use rust_decimal::Decimal;
use serde::Serialize;

/// The four precomputed rollups on a payday row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum VolumeField {
    ChargeVolume,
    ChargeFeesVolume,
    AchVolume,
    AchFeesVolume,
}

impl VolumeField {
    pub const ALL: [VolumeField; 4] = [
        Self::ChargeVolume,
        Self::ChargeFeesVolume,
        Self::AchVolume,
        Self::AchFeesVolume,
    ];

    pub fn column(&self) -> &'static str {
        match self {
            Self::ChargeVolume => "charge_volume",
            Self::ChargeFeesVolume => "charge_fees_volume",
            Self::AchVolume => "ach_volume",
            Self::AchFeesVolume => "ach_fees_volume",
        }
    }

    /// Summed expression over `exchanges`.
    fn sum_expr(&self) -> &'static str {
        match self {
            Self::ChargeVolume => "amount + fee",
            Self::AchVolume => "amount",
            Self::ChargeFeesVolume | Self::AchFeesVolume => "fee",
        }
    }

    /// Row filter over `exchanges`, excluding the time window.
    /// Failed charges are excluded; ACH rows are counted whatever their status.
    pub(super) fn filter(&self) -> &'static str {
        match self {
            Self::ChargeVolume | Self::ChargeFeesVolume => {
                "amount > 0 AND recorder IS NULL AND (status IS NULL OR status <> 'failed')"
            }
            Self::AchVolume | Self::AchFeesVolume => "amount < 0 AND recorder IS NULL",
        }
    }

    /// Correlated subquery recomputing this field for the enclosing
    /// `paydays` row, over exchanges strictly inside (ts_start, ts_end).
    pub(super) fn recompute_subquery(&self) -> String {
        format!(
            "(SELECT COALESCE(SUM({expr}), 0)
                FROM exchanges
               WHERE timestamp > ts_start
                 AND timestamp < ts_end
                 AND {filter})",
            expr = self.sum_expr(),
            filter = self.filter(),
        )
    }
}

impl std::fmt::Display for VolumeField {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.column())
    }
}

impl LedgerStore<'_> {
    /// Open a payday run. Until `end_payday`, `ts_end` stays at the epoch,
    /// which marks the run as in progress.
    pub fn start_payday(&self, ts_start: Timestamp) -> LedgerResult<PaydayId> {
        self.conn.execute(
            "INSERT INTO paydays (ts_start, ts_end) VALUES (?1, 0)",
            params![to_micros(ts_start)],
        )?;
        Ok(self.conn.last_insert_rowid())
    }

    /// Close a payday run: compute its rollups from the exchanges inside the
    /// window and record `ts_end`.
    pub fn end_payday(&self, id: PaydayId, ts_end: Timestamp) -> LedgerResult<PaydayRow> {
        let ts_start: i64 = self.conn.query_row(
            "SELECT ts_start FROM paydays WHERE id = ?1",
            params![id],
            |row| row.get(0),
        )?;
        let ts_end = to_micros(ts_end);
        let mut volumes = [0i64; 4];
        for (slot, field) in volumes.iter_mut().zip(VolumeField::ALL) {
            *slot = self.sum_exchanges_in_window(field, ts_start, ts_end)?;
        }
        self.conn.execute(
            "UPDATE paydays
             SET ts_end = ?1, charge_volume = ?2, charge_fees_volume = ?3,
                 ach_volume = ?4, ach_fees_volume = ?5
             WHERE id = ?6",
            params![ts_end, volumes[0], volumes[1], volumes[2], volumes[3], id],
        )?;
        self.get_payday(id)?
            .ok_or_else(|| anyhow::anyhow!("payday {id} vanished while closing").into())
    }

    fn sum_exchanges_in_window(
        &self,
        field: VolumeField,
        ts_start: i64,
        ts_end: i64,
    ) -> LedgerResult<i64> {
        let sql = format!(
            "SELECT COALESCE(SUM({expr}), 0) FROM exchanges
             WHERE timestamp > ?1 AND timestamp < ?2 AND {filter}",
            expr = field.sum_expr(),
            filter = field.filter(),
        );
        let total: i64 = self
            .conn
            .query_row(&sql, params![ts_start, ts_end], |row| row.get(0))?;
        Ok(total)
    }

    pub fn get_payday(&self, id: PaydayId) -> LedgerResult<Option<PaydayRow>> {
        let row = self
            .conn
            .query_row(
                "SELECT id, ts_start, ts_end, charge_volume, charge_fees_volume,
                        ach_volume, ach_fees_volume
                 FROM paydays WHERE id = ?1",
                params![id],
                |row| {
                    Ok(PaydayRow {
                        id: row.get(0)?,
                        ts_start: micros_column(row, 1)?,
                        ts_end: micros_column(row, 2)?,
                        charge_volume: from_cents(row.get(3)?),
                        charge_fees_volume: from_cents(row.get(4)?),
                        ach_volume: from_cents(row.get(5)?),
                        ach_fees_volume: from_cents(row.get(6)?),
                    })
                },
            )
            .optional()?;
        Ok(row)
    }

    /// Overwrite one rollup without recomputation. Repair tooling and tests only.
    pub fn force_payday_volume(
        &self,
        id: PaydayId,
        field: VolumeField,
        value: Decimal,
    ) -> LedgerResult<()> {
        let sql = format!("UPDATE paydays SET {} = ?1 WHERE id = ?2", field.column());
        self.conn.execute(&sql, params![to_cents(value)?, id])?;
        Ok(())
    }

    /// Overwrite `ts_end`. An epoch value marks the payday as running again.
    pub fn force_payday_end(&self, id: PaydayId, ts_end: Timestamp) -> LedgerResult<()> {
        self.conn.execute(
            "UPDATE paydays SET ts_end = ?1 WHERE id = ?2",
            params![to_micros(ts_end), id],
        )?;
        Ok(())
    }
}
