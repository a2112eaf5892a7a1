use super::{LedgerStore, TipRow};
use crate::{
    error::LedgerResult,
    types::{from_cents, from_micros, micros_column, to_cents, to_micros, ParticipantId, Timestamp},
};
use rusqlite::{params, OptionalExtension};
use rust_decimal::Decimal;

impl LedgerStore<'_> {
    /// Append a tip version. Tips are never updated in place; the
    /// `current_tips` view picks the latest row per pair.
    ///
    /// `mtime` is bumped past the pair's latest version if needed so two
    /// versions never share a key.
    pub fn insert_tip(
        &self,
        tipper: ParticipantId,
        tippee: ParticipantId,
        amount: Decimal,
        at: Timestamp,
    ) -> LedgerResult<TipRow> {
        let latest: Option<(i64, i64)> = self
            .conn
            .query_row(
                "SELECT ctime, mtime FROM current_tips WHERE tipper = ?1 AND tippee = ?2",
                params![tipper, tippee],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .optional()?;
        let mut mtime = to_micros(at);
        if let Some((_, last)) = latest {
            mtime = mtime.max(last + 1);
        }
        let ctime = latest.map(|(ctime, _)| ctime).unwrap_or(mtime);
        self.insert_tip_raw(tipper, tippee, amount, ctime, mtime)?;
        Ok(TipRow {
            id: self.conn.last_insert_rowid(),
            tipper,
            tippee,
            mtime: from_micros(mtime)?,
            amount: from_cents(to_cents(amount)?),
        })
    }

    /// Insert a tip row exactly as given, duplicates included.
    pub fn insert_tip_raw(
        &self,
        tipper: ParticipantId,
        tippee: ParticipantId,
        amount: Decimal,
        ctime: i64,
        mtime: i64,
    ) -> LedgerResult<()> {
        self.conn.execute(
            "INSERT INTO tips (ctime, mtime, tipper, tippee, amount)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![ctime, mtime, tipper, tippee, to_cents(amount)?],
        )?;
        Ok(())
    }

    pub fn current_tip(
        &self,
        tipper: ParticipantId,
        tippee: ParticipantId,
    ) -> LedgerResult<Option<TipRow>> {
        let row = self
            .conn
            .query_row(
                "SELECT id, tipper, tippee, mtime, amount
                 FROM current_tips WHERE tipper = ?1 AND tippee = ?2",
                params![tipper, tippee],
                |row| {
                    Ok(TipRow {
                        id: row.get(0)?,
                        tipper: row.get(1)?,
                        tippee: row.get(2)?,
                        mtime: micros_column(row, 3)?,
                        amount: from_cents(row.get(4)?),
                    })
                },
            )
            .optional()?;
        Ok(row)
    }

    /// Sum of the tipper's positive current tips.
    pub fn total_giving(&self, tipper: ParticipantId) -> LedgerResult<Decimal> {
        let cents: i64 = self.conn.query_row(
            "SELECT COALESCE(SUM(amount), 0)
             FROM current_tips WHERE tipper = ?1 AND amount > 0",
            params![tipper],
            |row| row.get(0),
        )?;
        Ok(from_cents(cents))
    }

    /// Zero every current tip from or to `participant`. Called when the
    /// participant loses their last external account.
    pub fn zero_tips_of(&self, participant: ParticipantId, at: Timestamp) -> LedgerResult<usize> {
        let mut stmt = self.conn.prepare(
            "SELECT tipper, tippee FROM current_tips
             WHERE (tipper = ?1 OR tippee = ?1) AND amount > 0",
        )?;
        let pairs = stmt
            .query_map(params![participant], |row| {
                Ok((row.get::<_, ParticipantId>(0)?, row.get::<_, ParticipantId>(1)?))
            })?
            .collect::<Result<Vec<_>, _>>()?;
        for (tipper, tippee) in &pairs {
            self.insert_tip(*tipper, *tippee, Decimal::ZERO, at)?;
        }
        Ok(pairs.len())
    }

    pub fn tip_count(&self) -> LedgerResult<i64> {
        let count: i64 = self
            .conn
            .query_row("SELECT COUNT(*) FROM tips", [], |row| row.get(0))?;
        Ok(count)
    }
}
