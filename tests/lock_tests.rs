mod common;

use common::{amount, balance, flat_fee, payout};
use paysettle::application::engine::SettlementEngine;
use paysettle::application::ledger::{Delta, LedgerWriter};
use paysettle::application::notifier::NotificationDispatcher;
use paysettle::domain::account::Balance;
use paysettle::domain::ports::{LedgerStoreRef, LockService};
use paysettle::error::SettlementError;
use paysettle::infrastructure::in_memory::{InMemoryLeaseStore, InMemoryLedgerStore};
use paysettle::infrastructure::locks::LeaseLockService;
use paysettle::infrastructure::provider::{ScriptedOutcome, ScriptedProvider};
use rust_decimal_macros::dec;
use std::sync::Arc;
use std::time::Duration;

/// One service instance: its own lease client and provider over shared backends.
fn instance(
    store: &LedgerStoreRef,
    leases: &InMemoryLeaseStore,
    lease: Duration,
) -> (SettlementEngine, Arc<LeaseLockService>, Arc<ScriptedProvider>) {
    let locks = Arc::new(LeaseLockService::new(
        Arc::new(leases.clone()),
        lease,
        2,
        Duration::from_secs(1),
    ));
    let provider = Arc::new(ScriptedProvider::new());
    let engine = SettlementEngine::new(
        store.clone(),
        locks.clone(),
        provider.clone(),
        NotificationDispatcher::disabled(),
        Duration::from_secs(30),
    );
    (engine, locks, provider)
}

#[tokio::test(start_paused = true)]
async fn test_lease_held_by_other_instance_fails_fast() {
    let store: LedgerStoreRef = Arc::new(InMemoryLedgerStore::new());
    let leases = InMemoryLeaseStore::new();
    let (engine_a, locks_a, _) = instance(&store, &leases, Duration::from_secs(8));
    let (engine_b, _, provider_b) = instance(&store, &leases, Duration::from_secs(8));

    engine_a
        .open_account("acc-1", Balance::ZERO, balance(dec!(500)))
        .await
        .unwrap();
    provider_b.script("P1", ScriptedOutcome::Success { reference: None });

    let held = locks_a.acquire("acc-1").await.unwrap();
    let blocked = engine_b
        .request_payout(payout("acc-1", "P1", dec!(50), flat_fee(dec!(0))))
        .await;
    assert!(matches!(blocked, Err(SettlementError::LockTimeout(_))));
    assert_eq!(provider_b.calls(), 0);

    drop(held);
    let outcome = engine_b
        .request_payout(payout("acc-1", "P1", dec!(50), flat_fee(dec!(0))))
        .await
        .unwrap();
    assert!(!outcome.replayed);
    assert_eq!(
        engine_a.account("acc-1").await.unwrap().balance,
        balance(dec!(450))
    );
}

#[tokio::test(start_paused = true)]
async fn test_crashed_holder_lease_expires() {
    let store: LedgerStoreRef = Arc::new(InMemoryLedgerStore::new());
    let leases = InMemoryLeaseStore::new();
    let (engine_a, locks_a, _) = instance(&store, &leases, Duration::from_millis(1500));
    let (engine_b, _, _) = instance(&store, &leases, Duration::from_millis(1500));

    engine_a
        .open_account("acc-1", Balance::ZERO, Balance::ZERO)
        .await
        .unwrap();
    engine_a
        .initiate_payin("acc-1", "T1", amount(dec!(10)), &flat_fee(dec!(0)))
        .await
        .unwrap();

    // The holder never releases.
    std::mem::forget(locks_a.acquire("acc-1").await.unwrap());

    let outcome = engine_b
        .handle_callback(paysettle::domain::transaction::Callback {
            txn_id: "T1".to_string(),
            status: paysettle::domain::transaction::CallbackStatus::Success,
            reference: None,
            message: None,
        })
        .await
        .unwrap();
    assert_eq!(
        outcome,
        paysettle::application::engine::CallbackOutcome::Applied(
            paysettle::domain::transaction::TxnStatus::Success
        )
    );
    assert_eq!(
        engine_b.account("acc-1").await.unwrap().balance,
        balance(dec!(10))
    );
}

#[tokio::test(start_paused = true)]
async fn test_stale_holder_cannot_write_after_takeover() {
    let store: LedgerStoreRef = Arc::new(InMemoryLedgerStore::new());
    let leases = InMemoryLeaseStore::new();
    let (engine_a, locks_a, _) = instance(&store, &leases, Duration::from_millis(1500));
    let (_, locks_b, _) = instance(&store, &leases, Duration::from_millis(1500));

    engine_a
        .open_account("acc-1", Balance::ZERO, balance(dec!(100)))
        .await
        .unwrap();
    let writer = LedgerWriter::new(store.clone());

    let stale = locks_a.acquire("acc-1").await.unwrap();
    tokio::time::sleep(Duration::from_secs(2)).await;

    let fresh = locks_b.acquire("acc-1").await.unwrap();
    assert!(fresh.token() > stale.token());
    writer
        .apply_delta(
            &fresh,
            Delta {
                account_id: "acc-1".to_string(),
                amount: balance(dec!(-30)),
                fee: Balance::ZERO,
                txn_id: "adj-1".to_string(),
                linked: None,
            },
        )
        .await
        .unwrap();

    let late = writer
        .apply_delta(
            &stale,
            Delta {
                account_id: "acc-1".to_string(),
                amount: balance(dec!(-30)),
                fee: Balance::ZERO,
                txn_id: "adj-2".to_string(),
                linked: None,
            },
        )
        .await;
    assert!(matches!(late, Err(SettlementError::LedgerWriteFailed(_))));
    assert_eq!(
        engine_a.account("acc-1").await.unwrap().balance,
        balance(dec!(70))
    );
    assert!(engine_a.audit("acc-1").await.unwrap().is_consistent());
}
