#![allow(dead_code)]

use async_trait::async_trait;
use paysettle::application::engine::SettlementEngine;
use paysettle::application::notifier::NotificationDispatcher;
use paysettle::application::payout::PayoutRequest;
use paysettle::domain::account::{Amount, Balance};
use paysettle::domain::fee::{FeeSchedule, FeeTier};
use paysettle::domain::ports::{
    LedgerStoreRef, LockServiceRef, NotificationEvent, Notifier, NotifyError,
};
use paysettle::infrastructure::in_memory::InMemoryLedgerStore;
use paysettle::infrastructure::locks::LocalLockService;
use paysettle::infrastructure::provider::ScriptedProvider;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use std::fs::File;
use std::io::Error;
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;

pub const PROVIDER_TIMEOUT: Duration = Duration::from_secs(30);

pub struct Harness {
    pub engine: Arc<SettlementEngine>,
    pub store: LedgerStoreRef,
    pub provider: Arc<ScriptedProvider>,
    pub notifier: Arc<RecordingNotifier>,
}

/// Keeps every delivered event in order.
#[derive(Default)]
pub struct RecordingNotifier {
    events: Mutex<Vec<NotificationEvent>>,
}

impl RecordingNotifier {
    /// Events delivered so far, after letting spawned deliveries run.
    pub async fn delivered(&self) -> Vec<NotificationEvent> {
        for _ in 0..50 {
            tokio::task::yield_now().await;
        }
        self.events.lock().unwrap().clone()
    }
}

#[async_trait]
impl Notifier for RecordingNotifier {
    async fn deliver(&self, event: &NotificationEvent) -> Result<(), NotifyError> {
        self.events.lock().unwrap().push(event.clone());
        Ok(())
    }
}

pub fn harness() -> Harness {
    harness_with_locks(Arc::new(LocalLockService::new(Duration::from_secs(8))))
}

pub fn harness_with_locks(locks: LockServiceRef) -> Harness {
    let store: LedgerStoreRef = Arc::new(InMemoryLedgerStore::new());
    let provider = Arc::new(ScriptedProvider::new());
    let notifier = Arc::new(RecordingNotifier::default());
    let engine = SettlementEngine::new(
        store.clone(),
        locks,
        provider.clone(),
        NotificationDispatcher::new(notifier.clone(), 1, Duration::ZERO),
        PROVIDER_TIMEOUT,
    );
    Harness {
        engine: Arc::new(engine),
        store,
        provider,
        notifier,
    }
}

pub fn amount(value: Decimal) -> Amount {
    Amount::new(value).unwrap()
}

pub fn balance(value: Decimal) -> Balance {
    Balance::new(value)
}

pub fn flat_fee(value: Decimal) -> FeeSchedule {
    FeeSchedule::new(vec![FeeTier::flat(dec!(0), None, value)])
}

/// `[{0,1000,flat,5}, {1000,inf,percentage,1}]`
pub fn tiered_fees() -> FeeSchedule {
    FeeSchedule::new(vec![
        FeeTier::flat(dec!(0), Some(dec!(1000)), dec!(5)),
        FeeTier::percentage(dec!(1000), None, dec!(1)),
    ])
}

pub fn payout(account_id: &str, txn_id: &str, value: Decimal, fees: FeeSchedule) -> PayoutRequest {
    PayoutRequest {
        account_id: account_id.to_string(),
        amount: amount(value),
        fees,
        txn_id: txn_id.to_string(),
    }
}

/// Writes an events CSV with `rows` pay-ins of 1.0 followed by their success callbacks.
pub fn generate_events_csv(path: &Path, account: &str, rows: usize) -> Result<(), Error> {
    let file = File::create(path)?;
    let mut wtr = csv::WriterBuilder::new().from_writer(file);

    wtr.write_record([
        "type", "account", "txn", "amount", "status", "reference", "message",
    ])?;
    for i in 1..=rows {
        wtr.write_record(["payin", account, &format!("T{}", i), "1.0", "", "", ""])?;
    }
    for i in 1..=rows {
        wtr.write_record(["callback", "", &format!("T{}", i), "", "success", "", ""])?;
    }

    wtr.flush()?;
    Ok(())
}
