//! Deterministic ledger generator.
//!
//! RULE: every write goes through the business-layer store methods, so a
//! generated ledger satisfies every self-check invariant. Same seed, same
//! ledger.

use crate::{
    error::LedgerResult,
    store::LedgerStore,
    types::{from_cents, ExchangeStatus, ParticipantId, ParticipantStatus, Timestamp},
};
use chrono::Duration;
use log::info;
use rand::{RngCore, SeedableRng};
use rand_pcg::Pcg64Mcg;
use rust_decimal::Decimal;
use rusqlite::Connection;
use std::collections::HashMap;

const PLATFORMS: [&str; 3] = ["github", "gitlab", "twitter"];

/// Deterministic stream seeded from a single u64.
pub struct LedgerRng {
    inner: Pcg64Mcg,
}

impl LedgerRng {
    pub fn new(seed: u64) -> Self {
        Self {
            inner: Pcg64Mcg::seed_from_u64(seed),
        }
    }

    /// Roll a float in [0.0, 1.0).
    pub fn next_f64(&mut self) -> f64 {
        let bits = self.inner.next_u64();
        (bits >> 11) as f64 * (1.0 / (1u64 << 53) as f64)
    }

    /// Roll a u64 in [0, n).
    pub fn below(&mut self, n: u64) -> u64 {
        assert!(n > 0, "n must be > 0");
        self.inner.next_u64() % n
    }

    pub fn chance(&mut self, p: f64) -> bool {
        self.next_f64() < p
    }

    /// Amount in whole cents within [lo, hi).
    pub fn cents(&mut self, lo: i64, hi: i64) -> i64 {
        lo + self.below((hi - lo) as u64) as i64
    }
}

#[derive(Debug, Clone, Copy)]
pub struct GeneratorParams {
    pub participants: usize,
    pub paydays: usize,
    /// Exchanges and transfers generated per payday window.
    pub events_per_payday: usize,
}

impl Default for GeneratorParams {
    fn default() -> Self {
        Self {
            participants: 12,
            paydays: 4,
            events_per_payday: 30,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GeneratedLedger {
    pub participants: Vec<ParticipantId>,
    pub archived: Vec<ParticipantId>,
    pub paydays: usize,
    pub exchanges: usize,
    pub transfers: usize,
    pub tips: usize,
}

pub struct LedgerGenerator {
    rng: LedgerRng,
    params: GeneratorParams,
    clock: Timestamp,
    // Mirror of balances in cents, so withdrawals and transfers stay covered.
    balances: HashMap<ParticipantId, i64>,
}

impl LedgerGenerator {
    pub fn new(seed: u64) -> Self {
        Self::with_params(seed, GeneratorParams::default())
    }

    pub fn with_params(seed: u64, params: GeneratorParams) -> Self {
        Self {
            rng: LedgerRng::new(seed),
            params,
            // 2024-01-01T00:00:00Z
            clock: Timestamp::default() + Duration::days(19_723),
            balances: HashMap::new(),
        }
    }

    fn tick(&mut self) -> Timestamp {
        self.clock += Duration::seconds(1 + self.rng.below(3_600) as i64);
        self.clock
    }

    /// Populate the database behind `conn`. Runs in the caller's transaction.
    pub fn populate(&mut self, conn: &Connection) -> LedgerResult<GeneratedLedger> {
        let store = LedgerStore::new(conn);
        let mut out = GeneratedLedger::default();

        for i in 0..self.params.participants.max(2) {
            let joined = self.tick();
            let id = store.insert_participant(
                &format!("donor-{i}"),
                ParticipantStatus::Active,
                None,
                joined.timestamp_micros(),
            )?;
            let platform = PLATFORMS[self.rng.below(PLATFORMS.len() as u64) as usize];
            let user_name = format!("donor{i}");
            store.add_elsewhere(id, platform, &(10_000 + i).to_string(), Some(user_name.as_str()))?;
            self.balances.insert(id, 0);
            out.participants.push(id);
        }
        let admin = out.participants[0];

        for _ in 0..self.params.paydays {
            let start = self.tick();
            let payday = store.start_payday(start)?;
            for _ in 0..self.params.events_per_payday {
                self.random_event(&store, admin, &mut out)?;
            }
            let end = self.tick();
            store.end_payday(payday, end)?;
            out.paydays += 1;

            // Activity between paydays still counts toward balances.
            for _ in 0..self.params.events_per_payday / 3 {
                self.random_event(&store, admin, &mut out)?;
            }
        }

        self.archive_one(&store, &mut out)?;
        info!(
            "generated ledger: {} participants, {} paydays, {} exchanges, {} transfers, {} tips",
            out.participants.len(),
            out.paydays,
            out.exchanges,
            out.transfers,
            out.tips
        );
        Ok(out)
    }

    fn pick(&mut self, ids: &[ParticipantId]) -> ParticipantId {
        ids[self.rng.below(ids.len() as u64) as usize]
    }

    fn random_event(
        &mut self,
        store: &LedgerStore<'_>,
        admin: ParticipantId,
        out: &mut GeneratedLedger,
    ) -> LedgerResult<()> {
        let who = self.pick(&out.participants);
        let at = self.tick();
        let roll = self.rng.below(100);
        if roll < 40 {
            // Charge
            let amount = self.rng.cents(1_000, 50_000);
            let fee = amount * 3 / 100 + 30;
            let status = self.status();
            let recorder = self.rng.chance(0.1).then_some(admin);
            store.record_exchange(who, from_cents(amount), from_cents(fee), status, recorder, at)?;
            if status != Some(ExchangeStatus::Failed) {
                *self.balances.entry(who).or_default() += amount;
            }
            out.exchanges += 1;
        } else if roll < 55 {
            // Withdrawal, only when the balance covers it and the fee
            let balance = self.balances.get(&who).copied().unwrap_or(0);
            let fee = 25;
            if balance > 1_000 + fee {
                let amount = self.rng.cents(1_000, balance - fee + 1);
                let status = self.status();
                let recorder = self.rng.chance(0.1).then_some(admin);
                store.record_exchange(
                    who,
                    from_cents(-amount),
                    from_cents(fee),
                    status,
                    recorder,
                    at,
                )?;
                if status != Some(ExchangeStatus::Failed) {
                    *self.balances.entry(who).or_default() -= amount + fee;
                }
                out.exchanges += 1;
            }
        } else if roll < 80 {
            let tippee = self.pick(&out.participants);
            let balance = self.balances.get(&who).copied().unwrap_or(0);
            if tippee != who && balance > 100 {
                let amount = self.rng.cents(100, balance.min(10_000) + 1);
                store.record_transfer(who, tippee, from_cents(amount), "tip", at)?;
                *self.balances.entry(who).or_default() -= amount;
                *self.balances.entry(tippee).or_default() += amount;
                out.transfers += 1;
            }
        } else {
            let tippee = self.pick(&out.participants);
            if tippee != who {
                let amount = if self.rng.chance(0.2) {
                    Decimal::ZERO
                } else {
                    from_cents(self.rng.cents(1, 10_001))
                };
                store.insert_tip(who, tippee, amount, at)?;
                out.tips += 1;
            }
        }
        Ok(())
    }

    fn status(&mut self) -> Option<ExchangeStatus> {
        match self.rng.below(10) {
            0 => Some(ExchangeStatus::Failed),
            1 => Some(ExchangeStatus::Pending),
            2 => None,
            _ => Some(ExchangeStatus::Succeeded),
        }
    }

    /// Archive the last participant the way account closure does: zero
    /// their tips, then drop their external accounts.
    fn archive_one(
        &mut self,
        store: &LedgerStore<'_>,
        out: &mut GeneratedLedger,
    ) -> LedgerResult<()> {
        let Some(&id) = out.participants.last() else {
            return Ok(());
        };
        if id == out.participants[0] {
            return Ok(());
        }
        let at = self.tick();
        store.zero_tips_of(id, at)?;
        for platform in PLATFORMS {
            store.remove_elsewhere(id, platform)?;
        }
        store.set_participant_status(id, ParticipantStatus::Archived)?;
        out.archived.push(id);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rng_is_deterministic() {
        let mut a = LedgerRng::new(7);
        let mut b = LedgerRng::new(7);
        for _ in 0..100 {
            assert_eq!(a.below(1_000), b.below(1_000));
        }
    }

    #[test]
    fn cents_stay_in_range() {
        let mut rng = LedgerRng::new(99);
        for _ in 0..1_000 {
            let c = rng.cents(100, 200);
            assert!((100..200).contains(&c), "{c} out of range");
        }
    }
}
