//! Self-check integration tests.
//!
//! Each test builds a small consistent ledger through the store, corrupts
//! one thing, and verifies exactly the matching check fires with the
//! offending rows attached.

use ledger_core::{
    db::{CursorOptions, Db},
    error::LedgerError,
    self_check::{self, Violation},
    store::{BalanceMismatch, LedgerStore, VolumeField},
    types::{from_micros, ExchangeStatus, ParticipantId, ParticipantStatus, Timestamp},
};
use rust_decimal::Decimal;
use rusqlite::Connection;

const BASE_MICROS: i64 = 1_704_067_200_000_000;

fn setup() -> Db {
    let _ = env_logger::builder().is_test(true).try_init();
    let db = Db::temporary().expect("temporary db");
    db.migrate().expect("migrate");
    db
}

fn at(secs: i64) -> Timestamp {
    from_micros(BASE_MICROS + secs * 1_000_000).expect("timestamp in range")
}

fn usd(s: &str) -> Decimal {
    s.parse().unwrap()
}

fn make_participant(conn: &Connection, username: &str) -> ParticipantId {
    let store = LedgerStore::new(conn);
    let id = store
        .insert_participant(username, ParticipantStatus::Active, None, BASE_MICROS)
        .unwrap();
    store
        .add_elsewhere(id, "github", &format!("gh-{username}"), Some(username))
        .unwrap();
    id
}

/// alice and bob with charges, a withdrawal, a transfer, a tip and one
/// completed payday around the exchanges.
struct Ledger {
    alice: ParticipantId,
    bob: ParticipantId,
    payday: i64,
}

fn consistent_ledger(db: &Db) -> Ledger {
    db.with_cursor(CursorOptions::default(), |conn| {
        let store = LedgerStore::new(conn);
        let alice = make_participant(conn, "alice");
        let bob = make_participant(conn, "bob");

        let payday = store.start_payday(at(10))?;
        store.record_exchange(alice, usd("50.00"), usd("1.80"), Some(ExchangeStatus::Succeeded), None, at(20))?;
        store.record_exchange(bob, usd("20.00"), usd("0.90"), None, None, at(21))?;
        store.record_exchange(bob, usd("99.00"), usd("3.00"), Some(ExchangeStatus::Failed), None, at(22))?;
        store.record_transfer(alice, bob, usd("10.00"), "tip", at(30))?;
        store.record_exchange(bob, usd("-15.00"), usd("0.50"), Some(ExchangeStatus::Succeeded), None, at(40))?;
        store.end_payday(payday, at(50))?;

        store.insert_tip(alice, bob, usd("2.50"), at(60))?;
        Ok(Ledger { alice, bob, payday })
    })
    .unwrap()
}

fn read<T>(db: &Db, f: impl FnOnce(&Connection) -> T) -> T {
    let cursor = db.get_cursor(None, CursorOptions::default()).unwrap();
    f(&*cursor)
}

#[test]
fn empty_database_passes() {
    let db = setup();
    db.self_check().expect("empty database must pass");
}

#[test]
fn consistent_ledger_passes_every_check() {
    let db = setup();
    let ledger = consistent_ledger(&db);
    db.self_check().expect("consistent ledger must pass");
    assert!(db.audit().unwrap().is_empty());

    let (alice, bob, payday, exchanges, transfers) = read(&db, |conn| {
        let store = LedgerStore::new(conn);
        (
            store.get_participant(ledger.alice).unwrap().unwrap(),
            store.get_participant(ledger.bob).unwrap().unwrap(),
            store.get_payday(ledger.payday).unwrap().unwrap(),
            store.exchange_count().unwrap(),
            store.transfer_count().unwrap(),
        )
    });
    // The failed charge is still a row; it just moves no money.
    assert_eq!(exchanges, 4);
    assert_eq!(transfers, 1);
    assert!(!payday.is_running());
    assert_eq!(alice.balance, usd("40.00"));
    // 20.00 + 10.00 - 15.00 - 0.50 fee
    assert_eq!(bob.balance, usd("14.50"));
    assert_eq!(payday.charge_volume, usd("72.70"));
    assert_eq!(payday.charge_fees_volume, usd("2.70"));
    assert_eq!(payday.ach_volume, usd("-15.00"));
    assert_eq!(payday.ach_fees_volume, usd("0.50"));
}

#[test]
fn duplicate_tip_key_is_reported() {
    let db = setup();
    let ledger = consistent_ledger(&db);
    db.with_cursor(CursorOptions::default(), |conn| {
        let store = LedgerStore::new(conn);
        let mtime = BASE_MICROS + 1_000 * 1_000_000;
        store.insert_tip_raw(ledger.bob, ledger.alice, usd("1.00"), mtime, mtime)?;
        store.insert_tip_raw(ledger.bob, ledger.alice, usd("2.00"), mtime, mtime)
    })
    .unwrap();

    match db.self_check() {
        Err(LedgerError::InvariantViolation(Violation::DuplicateTips { count })) => {
            assert!(count >= 1, "count = {count}")
        }
        other => panic!("expected duplicate tips violation, got {other:?}"),
    }
}

#[test]
fn corrupted_balance_reports_exactly_that_participant() {
    let db = setup();
    let ledger = consistent_ledger(&db);
    db.with_cursor(CursorOptions::default(), |conn| {
        LedgerStore::new(conn).force_balance(ledger.alice, usd("1234.56"))
    })
    .unwrap();

    let violation = read(&db, |conn| self_check::check_balances(conn).unwrap());
    assert_eq!(
        violation,
        Some(Violation::ConflictingBalances {
            rows: vec![BalanceMismatch {
                id: ledger.alice,
                expected: usd("40.00"),
                actual: usd("1234.56"),
            }],
        })
    );

    let err = db.self_check().unwrap_err();
    let text = err.to_string();
    assert!(text.contains("expected=40.00"), "{text}");
    assert!(text.contains("actual=1234.56"), "{text}");
}

#[test]
fn failed_status_change_keeps_balances_reconciled() {
    let db = setup();
    let ledger = consistent_ledger(&db);
    db.with_cursor(CursorOptions::default(), |conn| {
        let store = LedgerStore::new(conn);
        let id = store.record_exchange(
            ledger.alice,
            usd("5.00"),
            usd("0.45"),
            Some(ExchangeStatus::Pending),
            None,
            at(500),
        )?;
        store.update_exchange_status(id, ExchangeStatus::Failed)?;
        store.update_exchange_status(id, ExchangeStatus::Pending)?;
        store.update_exchange_status(id, ExchangeStatus::Succeeded)
    })
    .unwrap();
    db.self_check().expect("status transitions must keep balances reconciled");

    let alice = read(&db, |conn| {
        LedgerStore::new(conn).get_participant(ledger.alice).unwrap().unwrap()
    });
    assert_eq!(alice.balance, usd("45.00"));
}

#[test]
fn orphan_without_tips_trips_only_orphans_check() {
    let db = setup();
    let carol = db
        .with_cursor(CursorOptions::default(), |conn| {
            consistent_ledger_on(conn);
            let carol = make_participant(conn, "carol");
            LedgerStore::new(conn).remove_elsewhere(carol, "github")?;
            Ok(carol)
        })
        .unwrap();

    let (orphans, with_tips) = read(&db, |conn| {
        (
            self_check::check_orphans(conn).unwrap(),
            self_check::check_orphans_with_tips(conn).unwrap(),
        )
    });
    assert_eq!(
        orphans,
        Some(Violation::MissingElsewheres {
            usernames: vec!["carol".to_string()],
        })
    );
    assert_eq!(with_tips, None);

    // A positive tip from the orphan now trips the second check too.
    db.with_cursor(CursorOptions::default(), |conn| {
        let store = LedgerStore::new(conn);
        let alice = store.participant_by_username("alice")?.unwrap();
        store.insert_tip(carol, alice.id, usd("1.00"), at(900))
    })
    .unwrap();

    let violations = db.audit().unwrap();
    assert_eq!(violations.len(), 2, "{violations:?}");
    assert!(matches!(violations[0], Violation::MissingElsewheres { .. }));
    assert_eq!(violations[1], Violation::OrphansWithTips { ids: vec![carol] });
}

fn consistent_ledger_on(conn: &Connection) {
    let store = LedgerStore::new(conn);
    let alice = make_participant(conn, "alice");
    let bob = make_participant(conn, "bob");
    store
        .record_exchange(alice, usd("30.00"), usd("1.20"), None, None, at(5))
        .unwrap();
    store.insert_tip(alice, bob, usd("3.00"), at(6)).unwrap();
}

#[test]
fn zeroed_tips_clear_orphans_with_tips() {
    let db = setup();
    let ledger = consistent_ledger(&db);
    db.with_cursor(CursorOptions::default(), |conn| {
        let store = LedgerStore::new(conn);
        store.remove_elsewhere(ledger.bob, "github")?;
        store.set_participant_status(ledger.bob, ParticipantStatus::Archived)
    })
    .unwrap();

    let violation = read(&db, |conn| self_check::check_orphans_with_tips(conn).unwrap());
    assert_eq!(violation, Some(Violation::OrphansWithTips { ids: vec![ledger.bob] }));

    db.with_cursor(CursorOptions::default(), |conn| {
        LedgerStore::new(conn).zero_tips_of(ledger.bob, at(1_000))
    })
    .unwrap();
    // Archived participants may lack an elsewhere account.
    db.self_check().expect("archived participant with zeroed tips must pass");
}

#[test]
fn running_payday_skips_volume_check() {
    let db = setup();
    let ledger = consistent_ledger(&db);
    let running = db
        .with_cursor(CursorOptions::default(), |conn| {
            let store = LedgerStore::new(conn);
            let running = store.start_payday(at(2_000))?;
            store.record_exchange(ledger.bob, usd("-1.00"), usd("0.10"), None, None, at(2_010))?;
            store.force_payday_volume(running, VolumeField::AchVolume, usd("999.99"))?;
            // Even the completed payday's corruption is ignored while one runs.
            store.force_payday_volume(ledger.payday, VolumeField::ChargeVolume, usd("0.01"))?;
            Ok(running)
        })
        .unwrap();
    let row = read(&db, |conn| LedgerStore::new(conn).get_payday(running).unwrap().unwrap());
    assert!(row.is_running());

    let found = read(&db, |conn| self_check::check_paydays_volumes(conn).unwrap());
    assert!(found.is_empty(), "{found:?}");
    db.self_check().expect("volume check must be skipped mid-run");
}

#[test]
fn corrupted_ach_volume_trips_only_ach_volume() {
    let db = setup();
    let ledger = consistent_ledger(&db);
    db.with_cursor(CursorOptions::default(), |conn| {
        LedgerStore::new(conn).force_payday_volume(ledger.payday, VolumeField::AchVolume, usd("-7.00"))
    })
    .unwrap();

    let found = read(&db, |conn| self_check::check_paydays_volumes(conn).unwrap());
    assert_eq!(found.len(), 1, "{found:?}");
    match &found[0] {
        Violation::PaydayVolume { field, rows } => {
            assert_eq!(*field, VolumeField::AchVolume);
            assert_eq!(rows.len(), 1);
            assert_eq!(rows[0].id, ledger.payday);
            assert_eq!(rows[0].stored, usd("-7.00"));
            assert_eq!(rows[0].recomputed, usd("-15.00"));
        }
        other => panic!("unexpected violation {other:?}"),
    }
}

#[test]
fn payday_volumes_ignore_recorded_and_out_of_window_exchanges() {
    let db = setup();
    let ledger = consistent_ledger(&db);
    db.with_cursor(CursorOptions::default(), |conn| {
        let store = LedgerStore::new(conn);
        // Inside the window but recorded by an admin.
        store.record_exchange(ledger.bob, usd("12.00"), usd("0.00"), None, Some(ledger.alice), at(25))?;
        // Exactly on the window edges.
        store.record_exchange(ledger.bob, usd("3.00"), usd("0.00"), None, None, at(10))?;
        store.record_exchange(ledger.bob, usd("4.00"), usd("0.00"), None, None, at(50))
    })
    .unwrap();
    db.self_check().expect("recorded and edge exchanges are outside payday volumes");
}

#[test]
fn reopened_payday_is_treated_as_running() {
    let db = setup();
    let ledger = consistent_ledger(&db);
    db.with_cursor(CursorOptions::default(), |conn| {
        let store = LedgerStore::new(conn);
        store.force_payday_volume(ledger.payday, VolumeField::AchFeesVolume, usd("9.99"))?;
        store.force_payday_end(ledger.payday, from_micros(0)?)
    })
    .unwrap();
    db.self_check().expect("running payday must skip the volume check");
}

#[test]
fn check_db_reports_first_violation_and_audit_reports_all() {
    let db = setup();
    let ledger = consistent_ledger(&db);
    db.with_cursor(CursorOptions::default(), |conn| {
        let store = LedgerStore::new(conn);
        store.insert_tip_raw(ledger.alice, ledger.bob, usd("1.00"), 7, 7)?;
        store.insert_tip_raw(ledger.alice, ledger.bob, usd("1.00"), 7, 7)?;
        store.force_balance(ledger.bob, usd("0.00"))?;
        store.force_payday_volume(ledger.payday, VolumeField::ChargeFeesVolume, usd("0.00"))
    })
    .unwrap();

    match db.self_check() {
        Err(LedgerError::InvariantViolation(v)) => assert_eq!(v.check_name(), "tips"),
        other => panic!("expected tips violation first, got {other:?}"),
    }

    let names: Vec<_> = db.audit().unwrap().iter().map(|v| v.check_name()).collect();
    assert_eq!(names, vec!["tips", "balances", "paydays_volumes"]);
}

#[test]
fn self_check_releases_its_cursor_on_failure() {
    let db = setup();
    let ledger = consistent_ledger(&db);
    db.with_cursor(CursorOptions::default(), |conn| {
        LedgerStore::new(conn).force_balance(ledger.bob, usd("1.00"))
    })
    .unwrap();
    let idle_before = db.pool().state().idle_connections;

    assert!(db.self_check().is_err());
    assert_eq!(db.pool().state().idle_connections, idle_before);
}

#[test]
fn violations_serialize_with_check_tag() {
    let v = Violation::OrphansWithTips { ids: vec![3, 5] };
    let json = serde_json::to_value(&v).unwrap();
    assert_eq!(json["check"], "orphans_with_tips");
    assert_eq!(json["ids"], serde_json::json!([3, 5]));
}

#[test]
fn oversized_amounts_are_rejected_not_truncated() {
    let db = setup();
    let ledger = consistent_ledger(&db);
    // Cents of this amount overflow an i64.
    let huge = usd("100000000000000000000.00");

    let result = db.with_cursor(CursorOptions::default(), |conn| {
        LedgerStore::new(conn).force_balance(ledger.bob, huge)
    });
    assert!(
        matches!(result, Err(LedgerError::AmountOutOfRange(d)) if d == huge),
        "{result:?}"
    );
    let result = db.with_cursor(CursorOptions::default(), |conn| {
        LedgerStore::new(conn).record_exchange(ledger.alice, huge, Decimal::ZERO, None, None, at(70))
    });
    assert!(matches!(result, Err(LedgerError::AmountOutOfRange(_))), "{result:?}");

    let bob = read(&db, |conn| LedgerStore::new(conn).get_participant(ledger.bob).unwrap().unwrap());
    assert_eq!(bob.balance, usd("14.50"));
    db.self_check().expect("rejected writes leave the ledger untouched");
}
