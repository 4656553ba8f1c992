use super::ledger::{Delta, LedgerWriter};
use crate::domain::account::Balance;
use crate::domain::ledger::{LedgerEntry, LinkedChange};
use crate::domain::lock::LockGuard;
use crate::domain::ports::LedgerStoreRef;
use crate::domain::transaction::{StatusPatch, TransactionRecord, Transition, TxnStatus};
use crate::error::{Result, SettlementError};
use tracing::debug;

/// Outcome of a claim attempt.
#[derive(Debug, Clone, PartialEq)]
pub enum Claim {
    /// This caller won the transition. Carries the record as it was before, and the
    /// ledger entry when the claim moved money.
    Claimed {
        previous: TransactionRecord,
        entry: Option<LedgerEntry>,
    },
    /// Unknown id, or the record already left the expected status.
    NotClaimable,
}

impl Claim {
    pub fn is_claimed(&self) -> bool {
        matches!(self, Claim::Claimed { .. })
    }
}

/// The single deduplication point.
///
/// Every effect of a callback or payout step (balance change, ledger entry,
/// notification) happens only after a successful claim. When a claim moves money, the
/// status transition is part of the same ledger commit, so a failed write leaves the
/// record claimable and the whole operation can be retried.
#[derive(Clone)]
pub struct IdempotencyGate {
    store: LedgerStoreRef,
    writer: LedgerWriter,
}

impl IdempotencyGate {
    pub fn new(store: LedgerStoreRef, writer: LedgerWriter) -> Self {
        Self { store, writer }
    }

    /// Moves a `Pending` record to the status in `resolution`.
    pub async fn claim(&self, txn_id: &str, resolution: StatusPatch) -> Result<Claim> {
        self.claim_from(txn_id, TxnStatus::Pending, resolution).await
    }

    /// Moves a record from `from` to the status in `resolution`, with no balance effect.
    pub async fn claim_from(
        &self,
        txn_id: &str,
        from: TxnStatus,
        resolution: StatusPatch,
    ) -> Result<Claim> {
        match self.store.transition(txn_id, from, resolution).await? {
            Some(previous) => Ok(Claim::Claimed {
                previous,
                entry: None,
            }),
            None => {
                debug!(txn_id, ?from, "claim lost");
                Ok(Claim::NotClaimable)
            }
        }
    }

    /// Claims `record` out of `from` and applies `amount` to its account in the same
    /// atomic unit. Needs the account's lock.
    pub async fn claim_with_delta(
        &self,
        guard: &LockGuard,
        record: &TransactionRecord,
        from: TxnStatus,
        resolution: StatusPatch,
        amount: Balance,
    ) -> Result<Claim> {
        let delta = Delta {
            account_id: record.account_id.clone(),
            amount,
            fee: record.fee,
            txn_id: record.txn_id.clone(),
            linked: Some(LinkedChange::Transition(Transition {
                txn_id: record.txn_id.clone(),
                from,
                patch: resolution,
            })),
        };

        match self.writer.apply_delta(guard, delta).await {
            Ok(entry) => Ok(Claim::Claimed {
                previous: record.clone(),
                entry: Some(entry),
            }),
            Err(SettlementError::NotClaimable(_)) => {
                debug!(txn_id = %record.txn_id, ?from, "claim lost");
                Ok(Claim::NotClaimable)
            }
            Err(e) => Err(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::account::{Account, Amount};
    use crate::domain::lock::FencingToken;
    use crate::domain::transaction::Direction;
    use crate::infrastructure::in_memory::InMemoryLedgerStore;
    use rust_decimal_macros::dec;
    use std::sync::Arc;

    async fn setup() -> (IdempotencyGate, LedgerStoreRef, TransactionRecord) {
        let store: LedgerStoreRef = Arc::new(InMemoryLedgerStore::new());
        store
            .create_account(Account::new("acc-1", Balance::ZERO))
            .await
            .unwrap();
        let record = TransactionRecord::pending(
            "T1",
            "acc-1",
            Amount::new(dec!(100)).unwrap(),
            Balance::new(dec!(2)),
            Direction::In,
        );
        store.insert_transaction(record.clone()).await.unwrap();
        let gate = IdempotencyGate::new(store.clone(), LedgerWriter::new(store.clone()));
        (gate, store, record)
    }

    #[tokio::test]
    async fn test_claim_succeeds_once() {
        let (gate, store, _record) = setup().await;

        let first = gate
            .claim("T1", StatusPatch::to(TxnStatus::Failed).failure_reason("declined"))
            .await
            .unwrap();
        match first {
            Claim::Claimed { previous, entry } => {
                assert_eq!(previous.status, TxnStatus::Pending);
                assert!(entry.is_none());
            }
            Claim::NotClaimable => panic!("first claim must win"),
        }

        let second = gate
            .claim("T1", StatusPatch::to(TxnStatus::Success))
            .await
            .unwrap();
        assert_eq!(second, Claim::NotClaimable);

        let stored = store.transaction("T1").await.unwrap().unwrap();
        assert_eq!(stored.status, TxnStatus::Failed);
        assert_eq!(stored.failure_reason.as_deref(), Some("declined"));
    }

    #[tokio::test]
    async fn test_unknown_txn_is_not_claimable() {
        let (gate, _store, _record) = setup().await;
        let claim = gate
            .claim("missing", StatusPatch::to(TxnStatus::Success))
            .await
            .unwrap();
        assert!(!claim.is_claimed());
    }

    #[tokio::test]
    async fn test_claim_with_delta_moves_money_once() {
        let (gate, store, record) = setup().await;
        let guard = LockGuard::new("acc-1", FencingToken(1), || {});

        let first = gate
            .claim_with_delta(
                &guard,
                &record,
                TxnStatus::Pending,
                StatusPatch::to(TxnStatus::Success),
                record.net(),
            )
            .await
            .unwrap();
        assert!(first.is_claimed());

        let replay = gate
            .claim_with_delta(
                &guard,
                &record,
                TxnStatus::Pending,
                StatusPatch::to(TxnStatus::Success),
                record.net(),
            )
            .await
            .unwrap();
        assert_eq!(replay, Claim::NotClaimable);

        let account = store.account("acc-1").await.unwrap().unwrap();
        assert_eq!(account.balance, Balance::new(dec!(98)));
        assert_eq!(store.entries("acc-1").await.unwrap().len(), 1);
    }
}
