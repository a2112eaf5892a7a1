use super::LedgerStore;
use crate::{
    error::LedgerResult,
    types::{to_cents, to_micros, ExchangeStatus, ParticipantId, Timestamp},
};
use rusqlite::{params, OptionalExtension};
use rust_decimal::Decimal;

/// Balance effect of one exchange in cents. Failed exchanges move nothing;
/// withdrawals also take the fee out of the balance.
fn exchange_effect(amount: i64, fee: i64, status: Option<ExchangeStatus>) -> i64 {
    if status == Some(ExchangeStatus::Failed) {
        0
    } else if amount > 0 {
        amount
    } else {
        amount - fee
    }
}

impl LedgerStore<'_> {
    /// Record money entering (`amount > 0`) or leaving (`amount < 0`) the
    /// platform and apply it to the participant's balance.
    /// `recorder` is `None` for platform-initiated exchanges.
    pub fn record_exchange(
        &self,
        participant: ParticipantId,
        amount: Decimal,
        fee: Decimal,
        status: Option<ExchangeStatus>,
        recorder: Option<ParticipantId>,
        at: Timestamp,
    ) -> LedgerResult<i64> {
        let amount_c = to_cents(amount)?;
        let fee_c = to_cents(fee)?;
        self.conn.execute(
            "INSERT INTO exchanges (timestamp, participant, amount, fee, recorder, status)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                to_micros(at),
                participant,
                amount_c,
                fee_c,
                recorder,
                status.map(|s| s.as_str()),
            ],
        )?;
        let id = self.conn.last_insert_rowid();
        self.adjust_balance(participant, exchange_effect(amount_c, fee_c, status))?;
        Ok(id)
    }

    /// Move an exchange to a new status, reversing or reapplying its
    /// balance effect when it enters or leaves `failed`.
    pub fn update_exchange_status(
        &self,
        exchange_id: i64,
        status: ExchangeStatus,
    ) -> LedgerResult<()> {
        let current = self
            .conn
            .query_row(
                "SELECT participant, amount, fee, status FROM exchanges WHERE id = ?1",
                params![exchange_id],
                |row| {
                    Ok((
                        row.get::<_, ParticipantId>(0)?,
                        row.get::<_, i64>(1)?,
                        row.get::<_, i64>(2)?,
                        row.get::<_, Option<String>>(3)?,
                    ))
                },
            )
            .optional()?;
        let Some((participant, amount, fee, old)) = current else {
            return Err(anyhow::anyhow!("exchange {exchange_id} not found").into());
        };
        let old = old.as_deref().and_then(ExchangeStatus::parse);
        let delta = exchange_effect(amount, fee, Some(status)) - exchange_effect(amount, fee, old);

        self.conn.execute(
            "UPDATE exchanges SET status = ?1 WHERE id = ?2",
            params![status.as_str(), exchange_id],
        )?;
        if delta != 0 {
            self.adjust_balance(participant, delta)?;
        }
        Ok(())
    }

    /// Move money between two participants' balances.
    pub fn record_transfer(
        &self,
        tipper: ParticipantId,
        tippee: ParticipantId,
        amount: Decimal,
        context: &str,
        at: Timestamp,
    ) -> LedgerResult<i64> {
        let amount_c = to_cents(amount)?;
        self.conn.execute(
            "INSERT INTO transfers (timestamp, tipper, tippee, amount, context)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![to_micros(at), tipper, tippee, amount_c, context],
        )?;
        let id = self.conn.last_insert_rowid();
        self.adjust_balance(tipper, -amount_c)?;
        self.adjust_balance(tippee, amount_c)?;
        Ok(id)
    }

    pub fn exchange_count(&self) -> LedgerResult<i64> {
        let count: i64 = self
            .conn
            .query_row("SELECT COUNT(*) FROM exchanges", [], |row| row.get(0))?;
        Ok(count)
    }

    pub fn transfer_count(&self) -> LedgerResult<i64> {
        let count: i64 = self
            .conn
            .query_row("SELECT COUNT(*) FROM transfers", [], |row| row.get(0))?;
        Ok(count)
    }
}

#[cfg(test)]
mod tests {
    use super::exchange_effect;
    use crate::types::ExchangeStatus;

    #[test]
    fn failed_exchanges_do_not_move_balance() {
        assert_eq!(exchange_effect(1_000, 50, Some(ExchangeStatus::Failed)), 0);
        assert_eq!(exchange_effect(-1_000, 50, Some(ExchangeStatus::Failed)), 0);
    }

    #[test]
    fn withdrawal_fee_comes_out_of_balance() {
        assert_eq!(exchange_effect(-1_000, 50, None), -1_050);
        assert_eq!(exchange_effect(-1_000, 50, Some(ExchangeStatus::Pending)), -1_050);
    }

    #[test]
    fn charge_fee_is_paid_on_top() {
        assert_eq!(exchange_effect(1_000, 50, Some(ExchangeStatus::Succeeded)), 1_000);
    }
}
