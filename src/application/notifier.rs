use crate::domain::ports::{NotificationEvent, NotifierRef};
use crate::domain::transaction::{Direction, TransactionRecord, TxnStatus};
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

pub const PAYIN_SETTLED: &str = "payin.settled";
pub const PAYOUT_SETTLED: &str = "payout.settled";

/// Builds the event for a record that reached a terminal status.
pub fn settlement_event(record: &TransactionRecord) -> NotificationEvent {
    let (event, label) = match record.direction {
        Direction::In => (PAYIN_SETTLED, "PayIn"),
        Direction::Out => (PAYOUT_SETTLED, "Payout"),
    };
    let message = match record.status {
        TxnStatus::Success => format!("{} successful for txnId {}", label, record.txn_id),
        _ => record
            .failure_reason
            .clone()
            .unwrap_or_else(|| format!("{} failed for txnId {}", label, record.txn_id)),
    };

    NotificationEvent {
        event: event.to_string(),
        txn_id: record.txn_id.clone(),
        status: record.status,
        amount: record.amount,
        fee: record.fee,
        reference: record.reference.clone(),
        message,
    }
}

/// Fire-and-forget delivery of terminal-state events.
///
/// Each event is delivered on its own task with bounded retries. A delivery that
/// keeps failing is logged and dropped; it never feeds back into the ledger.
#[derive(Clone)]
pub struct NotificationDispatcher {
    notifier: Option<NotifierRef>,
    max_attempts: u32,
    retry_delay: Duration,
}

impl NotificationDispatcher {
    pub fn new(notifier: NotifierRef, max_attempts: u32, retry_delay: Duration) -> Self {
        Self {
            notifier: Some(notifier),
            max_attempts: max_attempts.max(1),
            retry_delay,
        }
    }

    /// A dispatcher with no endpoint; events are dropped.
    pub fn disabled() -> Self {
        Self {
            notifier: None,
            max_attempts: 1,
            retry_delay: Duration::ZERO,
        }
    }

    /// Spawns delivery of `event`. The handle resolves to whether it was delivered.
    pub fn dispatch(&self, event: NotificationEvent) -> Option<JoinHandle<bool>> {
        let notifier = self.notifier.clone()?;
        let max_attempts = self.max_attempts;
        let retry_delay = self.retry_delay;

        Some(tokio::spawn(async move {
            for attempt in 1..=max_attempts {
                match notifier.deliver(&event).await {
                    Ok(()) => {
                        debug!(txn_id = %event.txn_id, attempt, "notification delivered");
                        return true;
                    }
                    Err(e) if attempt < max_attempts => {
                        debug!(txn_id = %event.txn_id, attempt, error = %e, "notification retry");
                        tokio::time::sleep(retry_delay).await;
                    }
                    Err(e) => {
                        warn!(
                            txn_id = %event.txn_id,
                            attempts = max_attempts,
                            error = %e,
                            "notification dropped"
                        );
                    }
                }
            }
            false
        }))
    }
}
