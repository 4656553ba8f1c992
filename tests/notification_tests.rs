mod common;

use common::{amount, balance, flat_fee, harness, payout};
use paysettle::application::engine::CallbackOutcome;
use paysettle::application::notifier::{PAYIN_SETTLED, PAYOUT_SETTLED};
use paysettle::application::payout::ReconciliationVerdict;
use paysettle::domain::account::Balance;
use paysettle::domain::transaction::{Callback, CallbackStatus, TxnStatus};
use paysettle::infrastructure::provider::ScriptedOutcome;
use rust_decimal_macros::dec;

fn callback(txn_id: &str, status: CallbackStatus, message: Option<&str>) -> Callback {
    Callback {
        txn_id: txn_id.to_string(),
        status,
        reference: Some(format!("UTR-{}", txn_id)),
        message: message.map(str::to_string),
    }
}

#[tokio::test]
async fn test_settled_payin_notifies_once_across_redeliveries() {
    let h = harness();
    h.engine
        .open_account("acc-1", Balance::ZERO, Balance::ZERO)
        .await
        .unwrap();
    h.engine
        .initiate_payin("acc-1", "T1", amount(dec!(100)), &flat_fee(dec!(2)))
        .await
        .unwrap();

    for _ in 0..3 {
        h.engine
            .handle_callback(callback("T1", CallbackStatus::Success, None))
            .await
            .unwrap();
    }
    h.engine
        .handle_callback(callback("T1", CallbackStatus::Failed, Some("late failure")))
        .await
        .unwrap();

    let events = h.notifier.delivered().await;
    assert_eq!(events.len(), 1);
    let event = &events[0];
    assert_eq!(event.event, PAYIN_SETTLED);
    assert_eq!(event.txn_id, "T1");
    assert_eq!(event.status, TxnStatus::Success);
    assert_eq!(event.amount, amount(dec!(100)));
    assert_eq!(event.fee, balance(dec!(2)));
    assert_eq!(event.reference.as_deref(), Some("UTR-T1"));
    assert_eq!(event.message, "PayIn successful for txnId T1");
}

#[tokio::test]
async fn test_failed_payin_notifies_with_provider_message() {
    let h = harness();
    h.engine
        .open_account("acc-1", Balance::ZERO, Balance::ZERO)
        .await
        .unwrap();
    h.engine
        .initiate_payin("acc-1", "T1", amount(dec!(100)), &flat_fee(dec!(0)))
        .await
        .unwrap();

    h.engine
        .handle_callback(callback("T1", CallbackStatus::Failed, Some("card declined")))
        .await
        .unwrap();

    let events = h.notifier.delivered().await;
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].status, TxnStatus::Failed);
    assert_eq!(events[0].message, "card declined");
}

#[tokio::test]
async fn test_unknown_callback_notifies_nothing() {
    let h = harness();
    let outcome = h
        .engine
        .handle_callback(callback("missing", CallbackStatus::Success, None))
        .await
        .unwrap();
    assert_eq!(outcome, CallbackOutcome::NotFound);
    assert!(h.notifier.delivered().await.is_empty());
}

#[tokio::test]
async fn test_concurrent_duplicate_callbacks_notify_once() {
    let h = harness();
    h.engine
        .open_account("acc-1", Balance::ZERO, Balance::ZERO)
        .await
        .unwrap();
    h.engine
        .initiate_payin("acc-1", "T1", amount(dec!(40)), &flat_fee(dec!(0)))
        .await
        .unwrap();

    let mut handles = Vec::new();
    for _ in 0..8 {
        let engine = h.engine.clone();
        handles.push(tokio::spawn(async move {
            engine
                .handle_callback(callback("T1", CallbackStatus::Success, None))
                .await
                .unwrap()
        }));
    }
    for handle in handles {
        handle.await.unwrap();
    }

    assert_eq!(h.notifier.delivered().await.len(), 1);
}

#[tokio::test]
async fn test_terminal_payouts_notify_once_and_replays_do_not() {
    let h = harness();
    h.engine
        .open_account("acc-1", Balance::ZERO, balance(dec!(1000)))
        .await
        .unwrap();
    h.provider.script(
        "P1",
        ScriptedOutcome::Success {
            reference: Some("SETTLE-1".to_string()),
        },
    );
    h.provider.script(
        "P2",
        ScriptedOutcome::Failure {
            reason: "beneficiary account closed".to_string(),
        },
    );

    for txn in ["P1", "P2", "P1", "P2"] {
        h.engine
            .request_payout(payout("acc-1", txn, dec!(100), flat_fee(dec!(1))))
            .await
            .unwrap();
    }

    let events = h.notifier.delivered().await;
    assert_eq!(events.len(), 2);
    assert!(events.iter().all(|event| event.event == PAYOUT_SETTLED));

    let settled = events.iter().find(|event| event.txn_id == "P1").unwrap();
    assert_eq!(settled.status, TxnStatus::Success);
    assert_eq!(settled.reference.as_deref(), Some("SETTLE-1"));
    assert_eq!(settled.message, "Payout successful for txnId P1");

    let refunded = events.iter().find(|event| event.txn_id == "P2").unwrap();
    assert_eq!(refunded.status, TxnStatus::Failed);
    assert_eq!(refunded.fee, balance(dec!(1)));
    assert_eq!(refunded.message, "beneficiary account closed");
}

#[tokio::test(start_paused = true)]
async fn test_reconciling_is_silent_until_settled() {
    let h = harness();
    h.engine
        .open_account("acc-1", Balance::ZERO, balance(dec!(500)))
        .await
        .unwrap();
    h.provider.script("P1", ScriptedOutcome::Timeout);

    let parked = h
        .engine
        .request_payout(payout("acc-1", "P1", dec!(100), flat_fee(dec!(0))))
        .await
        .unwrap();
    assert_eq!(parked.status, TxnStatus::Reconciling);
    assert!(h.notifier.delivered().await.is_empty());

    h.engine
        .request_payout(payout("acc-1", "P1", dec!(100), flat_fee(dec!(0))))
        .await
        .unwrap();
    assert!(h.notifier.delivered().await.is_empty());

    h.engine
        .settle_reconciling(
            "P1",
            ReconciliationVerdict::Executed {
                reference: Some("LATE-1".to_string()),
            },
        )
        .await
        .unwrap();

    let events = h.notifier.delivered().await;
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].event, PAYOUT_SETTLED);
    assert_eq!(events[0].status, TxnStatus::Success);
    assert_eq!(events[0].reference.as_deref(), Some("LATE-1"));
}
