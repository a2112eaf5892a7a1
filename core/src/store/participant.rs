use super::{LedgerStore, ParticipantRow};
use crate::{
    error::LedgerResult,
    types::{from_cents, to_cents, ParticipantId, ParticipantStatus},
};
use rusqlite::{params, OptionalExtension};
use rust_decimal::Decimal;

impl LedgerStore<'_> {
    /// Insert a participant with a zero balance. Balances only move through
    /// exchanges and transfers.
    pub fn insert_participant(
        &self,
        username: &str,
        status: ParticipantStatus,
        goal: Option<Decimal>,
        join_micros: i64,
    ) -> LedgerResult<ParticipantId> {
        let goal = goal.map(to_cents).transpose()?;
        self.conn.execute(
            "INSERT INTO participants (username, status, balance, goal, join_time)
             VALUES (?1, ?2, 0, ?3, ?4)",
            params![username, status.as_str(), goal, join_micros],
        )?;
        Ok(self.conn.last_insert_rowid())
    }

    pub fn get_participant(&self, id: ParticipantId) -> LedgerResult<Option<ParticipantRow>> {
        let row = self
            .conn
            .query_row(
                "SELECT id, username, status, balance, goal
                 FROM participants WHERE id = ?1",
                params![id],
                Self::map_participant_row,
            )
            .optional()?;
        Ok(row)
    }

    pub fn participant_by_username(&self, username: &str) -> LedgerResult<Option<ParticipantRow>> {
        let row = self
            .conn
            .query_row(
                "SELECT id, username, status, balance, goal
                 FROM participants WHERE username = ?1",
                params![username],
                Self::map_participant_row,
            )
            .optional()?;
        Ok(row)
    }

    pub fn set_participant_status(
        &self,
        id: ParticipantId,
        status: ParticipantStatus,
    ) -> LedgerResult<()> {
        self.conn.execute(
            "UPDATE participants SET status = ?1 WHERE id = ?2",
            params![status.as_str(), id],
        )?;
        Ok(())
    }

    pub fn set_goal(&self, id: ParticipantId, goal: Option<Decimal>) -> LedgerResult<()> {
        let goal = goal.map(to_cents).transpose()?;
        self.conn.execute(
            "UPDATE participants SET goal = ?1 WHERE id = ?2",
            params![goal, id],
        )?;
        Ok(())
    }

    /// Overwrite a stored balance without touching the ledger.
    /// Repair tooling and tests only; normal code moves money via
    /// `record_exchange` / `record_transfer`.
    pub fn force_balance(&self, id: ParticipantId, balance: Decimal) -> LedgerResult<()> {
        self.conn.execute(
            "UPDATE participants SET balance = ?1 WHERE id = ?2",
            params![to_cents(balance)?, id],
        )?;
        Ok(())
    }

    pub(super) fn adjust_balance(&self, id: ParticipantId, delta_cents: i64) -> LedgerResult<()> {
        self.conn.execute(
            "UPDATE participants SET balance = balance + ?1 WHERE id = ?2",
            params![delta_cents, id],
        )?;
        Ok(())
    }

    // ── Elsewhere ──────────────────────────────────────────────

    pub fn add_elsewhere(
        &self,
        participant: ParticipantId,
        platform: &str,
        user_id: &str,
        user_name: Option<&str>,
    ) -> LedgerResult<i64> {
        self.conn.execute(
            "INSERT INTO elsewhere (participant, platform, user_id, user_name)
             VALUES (?1, ?2, ?3, ?4)",
            params![participant, platform, user_id, user_name],
        )?;
        Ok(self.conn.last_insert_rowid())
    }

    /// Create an unclaimed (stub) participant from an external identity.
    /// The stub is named after the external user name.
    pub fn create_stub(
        &self,
        platform: &str,
        user_id: &str,
        user_name: &str,
        join_micros: i64,
    ) -> LedgerResult<ParticipantId> {
        let id = self.insert_participant(user_name, ParticipantStatus::Stub, None, join_micros)?;
        self.add_elsewhere(id, platform, user_id, Some(user_name))?;
        Ok(id)
    }

    /// Detach one external account. Returns the number of rows removed.
    pub fn remove_elsewhere(
        &self,
        participant: ParticipantId,
        platform: &str,
    ) -> LedgerResult<usize> {
        let n = self.conn.execute(
            "DELETE FROM elsewhere WHERE participant = ?1 AND platform = ?2",
            params![participant, platform],
        )?;
        Ok(n)
    }

    pub fn elsewhere_count(&self, participant: ParticipantId) -> LedgerResult<i64> {
        let count: i64 = self.conn.query_row(
            "SELECT COUNT(*) FROM elsewhere WHERE participant = ?1",
            params![participant],
            |row| row.get(0),
        )?;
        Ok(count)
    }

    pub fn participant_count(&self) -> LedgerResult<i64> {
        let count: i64 =
            self.conn
                .query_row("SELECT COUNT(*) FROM participants", [], |row| row.get(0))?;
        Ok(count)
    }

    fn map_participant_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<ParticipantRow> {
        let status: String = row.get(2)?;
        Ok(ParticipantRow {
            id: row.get(0)?,
            username: row.get(1)?,
            status: ParticipantStatus::parse(&status).ok_or_else(|| {
                rusqlite::Error::FromSqlConversionFailure(
                    2,
                    rusqlite::types::Type::Text,
                    format!("unknown participant status '{status}'").into(),
                )
            })?,
            balance: from_cents(row.get(3)?),
            goal: row.get::<_, Option<i64>>(4)?.map(from_cents),
        })
    }
}
