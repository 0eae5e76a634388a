//! Credit Ledger Integration Tests
//!
//! Tests for reservation accounting under contention and for the
//! settle/refund idempotence guarantees.

use std::sync::Arc;
use std::thread;
use std::time::Duration;

use capturekit::core::{BalanceStore, Closure, CreditLedger, LedgerError};
use capturekit::domain::RequestKey;
use tempfile::TempDir;

fn key(n: usize) -> RequestKey {
    RequestKey::normalize(&format!("https://www.tiktok.com/@user/video/{}", 1000 + n)).unwrap()
}

#[test]
fn test_reserve_settle_refund_accounting() {
    let ledger = CreditLedger::new(10);

    let a = ledger.reserve(&key(1), 3).unwrap();
    let b = ledger.reserve(&key(2), 4).unwrap();
    assert_eq!(ledger.balance().reserved, 7);
    assert_eq!(ledger.balance().available(), 3);

    assert_eq!(ledger.settle(&a).unwrap(), Closure::Applied);
    assert_eq!(ledger.refund(&b).unwrap(), Closure::Applied);

    let balance = ledger.balance();
    assert_eq!(balance.total, 7);
    assert_eq!(balance.reserved, 0);
}

#[test]
fn test_second_close_is_noop() {
    let ledger = CreditLedger::new(5);
    let handle = ledger.reserve(&key(1), 2).unwrap();

    assert_eq!(ledger.settle(&handle).unwrap(), Closure::Applied);
    assert_eq!(ledger.settle(&handle).unwrap(), Closure::AlreadyClosed);
    assert_eq!(ledger.refund(&handle).unwrap(), Closure::AlreadyClosed);

    // Closed exactly once
    assert_eq!(ledger.balance().total, 3);
    assert_eq!(ledger.balance().reserved, 0);
}

#[test]
fn test_same_key_cannot_hold_twice() {
    let ledger = CreditLedger::new(5);
    let handle = ledger.reserve(&key(1), 1).unwrap();

    assert_eq!(
        ledger.reserve(&key(1), 1).unwrap_err(),
        LedgerError::AlreadyReserved(key(1))
    );

    // Once closed, the key may reserve again
    ledger.refund(&handle).unwrap();
    assert!(ledger.reserve(&key(1), 1).is_ok());
}

#[test]
fn test_set_total_refused_while_holds_open() {
    let ledger = CreditLedger::new(5);
    let handle = ledger.reserve(&key(1), 1).unwrap();

    assert_eq!(
        ledger.set_total(50).unwrap_err(),
        LedgerError::ReservationsOpen(1)
    );

    ledger.refund(&handle).unwrap();
    assert_eq!(ledger.set_total(50).unwrap().total, 50);
}

#[tokio::test]
async fn test_concurrent_reserves_never_oversubscribe() {
    let ledger = Arc::new(CreditLedger::new(10));

    let tasks: Vec<_> = (0..50)
        .map(|n| {
            let ledger = ledger.clone();
            tokio::spawn(async move { ledger.reserve(&key(n), 1) })
        })
        .collect();

    let mut granted = Vec::new();
    for task in tasks {
        match task.await.unwrap() {
            Ok(handle) => granted.push(handle),
            Err(e) => assert!(matches!(e, LedgerError::InsufficientCredits { .. })),
        }
    }

    assert_eq!(granted.len(), 10);
    assert_eq!(ledger.balance().available(), 0);

    for handle in &granted {
        ledger.refund(handle).unwrap();
    }
    assert_eq!(ledger.balance().available(), 10);
    assert!(ledger.open_reservations().is_empty());
}

#[test]
fn test_balance_survives_restart() {
    let temp = TempDir::new().unwrap();
    let store = BalanceStore::new(temp.path().join("credits.json"));

    let ledger = CreditLedger::new(store.load_or(10).unwrap());
    let handle = ledger.reserve(&key(1), 4).unwrap();
    ledger.settle(&handle).unwrap();
    store.save(ledger.balance().total).unwrap();

    let reopened = CreditLedger::new(store.load_or(10).unwrap());
    assert_eq!(reopened.balance().total, 6);
}

#[test]
fn test_balance_lock_excludes_second_handle() {
    let temp = TempDir::new().unwrap();
    let path = temp.path().join("credits.json");
    let first = BalanceStore::new(path.clone());
    let second = BalanceStore::new(path);

    let mut held = first.lock().unwrap();
    assert!(second.try_lock().unwrap().is_none());

    let total = held.load_or(10).unwrap();
    held.save(total - 3).unwrap();
    drop(held);

    let mut next = second.try_lock().unwrap().expect("lock released on drop");
    assert_eq!(next.load_or(10).unwrap(), 7);
}

#[test]
fn test_concurrent_runs_do_not_lose_settles() {
    let temp = TempDir::new().unwrap();
    let path = temp.path().join("credits.json");

    let runs: Vec<_> = (0..2)
        .map(|_| {
            let store = BalanceStore::new(path.clone());
            thread::spawn(move || {
                let mut lock = store.lock().unwrap();
                let ledger = CreditLedger::new(lock.load_or(10).unwrap());
                thread::sleep(Duration::from_millis(50));

                let handle = ledger.reserve(&key(1), 1).unwrap();
                ledger.settle(&handle).unwrap();
                lock.save(ledger.balance().total).unwrap();
            })
        })
        .collect();

    for run in runs {
        run.join().unwrap();
    }

    assert_eq!(BalanceStore::new(path).load_or(0).unwrap(), 8);
}
