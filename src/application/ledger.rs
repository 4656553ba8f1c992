use crate::domain::account::{AccountId, Balance};
use crate::domain::ledger::{EntryType, LedgerCommit, LedgerEntry, LinkedChange};
use crate::domain::lock::LockGuard;
use crate::domain::ports::LedgerStoreRef;
use crate::domain::transaction::TxnId;
use crate::error::{Result, SettlementError};
use chrono::Utc;
use tracing::info;

/// A signed balance change together with what it is linked to.
#[derive(Debug, Clone)]
pub struct Delta {
    pub account_id: AccountId,
    /// Positive credits, negative debits.
    pub amount: Balance,
    pub fee: Balance,
    pub txn_id: TxnId,
    pub linked: Option<LinkedChange>,
}

/// Stored balance of an account compared with the sum of its ledger.
#[derive(Debug, Clone, PartialEq)]
pub struct AuditReport {
    pub account_id: AccountId,
    pub balance: Balance,
    pub ledger_sum: Balance,
    pub entries: usize,
}

impl AuditReport {
    pub fn is_consistent(&self) -> bool {
        self.balance == self.ledger_sum
    }
}

/// The only component allowed to change a balance.
///
/// Every mutation needs the account's `LockGuard` and lands as one atomic unit of
/// {new balance, ledger entry, linked record change}.
#[derive(Clone)]
pub struct LedgerWriter {
    store: LedgerStoreRef,
}

impl LedgerWriter {
    pub fn new(store: LedgerStoreRef) -> Self {
        Self { store }
    }

    /// Applies `delta` to the account held by `guard`.
    ///
    /// Debits are checked against `balance - min_balance` before anything is written.
    /// Dedup signals (`NotClaimable`, `DuplicateTransaction`) and `InsufficientFunds`
    /// pass through unchanged; any other failure is reported as `LedgerWriteFailed`
    /// and nothing was committed.
    pub async fn apply_delta(&self, guard: &LockGuard, delta: Delta) -> Result<LedgerEntry> {
        if guard.account_id() != delta.account_id {
            return Err(SettlementError::LedgerWriteFailed(format!(
                "lock held for {} but writing to {}",
                guard.account_id(),
                delta.account_id
            )));
        }

        let current = self
            .store
            .account(&delta.account_id)
            .await
            .map_err(write_failed)?
            .ok_or_else(|| SettlementError::AccountNotFound(delta.account_id.clone()))?;

        if delta.amount.is_negative() && !current.can_debit(-delta.amount) {
            return Err(SettlementError::InsufficientFunds {
                required: -delta.amount,
                usable: current.usable(),
            });
        }

        let fence = guard.token().0;
        let mut account = current.clone();
        account.balance = current.balance.checked_add(delta.amount).ok_or_else(|| {
            SettlementError::LedgerWriteFailed(format!(
                "balance of {} overflows applying {}",
                delta.account_id, delta.amount
            ))
        })?;
        account.version = current.version + 1;
        account.fence = account.fence.max(fence);
        account.updated_at = Utc::now();

        let entry = LedgerEntry {
            seq: account.version,
            account_id: delta.account_id.clone(),
            txn_id: delta.txn_id.clone(),
            r#type: if delta.amount.is_negative() {
                EntryType::Debit
            } else {
                EntryType::Credit
            },
            before_balance: current.balance,
            after_balance: account.balance,
            fee: delta.fee,
            created_at: account.updated_at,
        };

        self.store
            .commit(LedgerCommit {
                account,
                expected_version: current.version,
                fence,
                entry: entry.clone(),
                linked: delta.linked,
            })
            .await
            .map_err(write_failed)?;

        info!(
            account_id = %entry.account_id,
            txn_id = %entry.txn_id,
            fence,
            before = %entry.before_balance,
            after = %entry.after_balance,
            "ledger entry committed"
        );
        Ok(entry)
    }

    /// Recomputes the balance from the ledger and compares it to the stored one.
    pub async fn audit(&self, account_id: &str) -> Result<AuditReport> {
        let account = self
            .store
            .account(account_id)
            .await?
            .ok_or_else(|| SettlementError::AccountNotFound(account_id.to_string()))?;
        let entries = self.store.entries(account_id).await?;
        let ledger_sum = entries
            .iter()
            .fold(Balance::ZERO, |sum, entry| sum + entry.delta());

        Ok(AuditReport {
            account_id: account.id,
            balance: account.balance,
            ledger_sum,
            entries: entries.len(),
        })
    }
}

fn write_failed(err: SettlementError) -> SettlementError {
    match err {
        SettlementError::NotClaimable(_)
        | SettlementError::DuplicateTransaction(_)
        | SettlementError::AccountNotFound(_)
        | SettlementError::LedgerWriteFailed(_) => err,
        other => SettlementError::LedgerWriteFailed(other.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::account::Account;
    use crate::domain::lock::FencingToken;
    use crate::infrastructure::in_memory::InMemoryLedgerStore;
    use rust_decimal_macros::dec;
    use std::sync::Arc;

    async fn writer_with(balance: Balance, min_balance: Balance) -> (LedgerWriter, LedgerStoreRef) {
        let store: LedgerStoreRef = Arc::new(InMemoryLedgerStore::new());
        store
            .create_account(Account::new("acc-1", min_balance))
            .await
            .unwrap();
        let writer = LedgerWriter::new(store.clone());
        if balance != Balance::ZERO {
            writer
                .apply_delta(&guard("acc-1", 1), delta(balance, "opening"))
                .await
                .unwrap();
        }
        (writer, store)
    }

    fn guard(account_id: &str, token: u64) -> LockGuard {
        LockGuard::new(account_id, FencingToken(token), || {})
    }

    fn delta(amount: Balance, txn_id: &str) -> Delta {
        Delta {
            account_id: "acc-1".to_string(),
            amount,
            fee: Balance::ZERO,
            txn_id: txn_id.to_string(),
            linked: None,
        }
    }

    #[tokio::test]
    async fn test_debit_writes_entry_with_before_and_after() {
        let (writer, store) =
            writer_with(Balance::new(dec!(1000)), Balance::new(dec!(100))).await;

        let entry = writer
            .apply_delta(&guard("acc-1", 2), delta(Balance::new(dec!(-810)), "P1"))
            .await
            .unwrap();

        assert_eq!(entry.r#type, EntryType::Debit);
        assert_eq!(entry.before_balance, Balance::new(dec!(1000)));
        assert_eq!(entry.after_balance, Balance::new(dec!(190)));
        assert_eq!(entry.seq, 2);

        let account = store.account("acc-1").await.unwrap().unwrap();
        assert_eq!(account.balance, Balance::new(dec!(190)));
        assert_eq!(account.fence, 2);
    }

    #[tokio::test]
    async fn test_debit_below_min_balance_is_rejected_without_mutation() {
        let (writer, store) =
            writer_with(Balance::new(dec!(1000)), Balance::new(dec!(100))).await;

        let result = writer
            .apply_delta(&guard("acc-1", 2), delta(Balance::new(dec!(-900.01)), "P1"))
            .await;
        assert!(matches!(
            result,
            Err(SettlementError::InsufficientFunds { .. })
        ));

        let account = store.account("acc-1").await.unwrap().unwrap();
        assert_eq!(account.balance, Balance::new(dec!(1000)));
        assert_eq!(store.entries("acc-1").await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_guard_for_other_account_is_refused() {
        let (writer, _store) = writer_with(Balance::ZERO, Balance::ZERO).await;
        let result = writer
            .apply_delta(&guard("acc-2", 1), delta(Balance::new(dec!(5)), "T1"))
            .await;
        assert!(matches!(result, Err(SettlementError::LedgerWriteFailed(_))));
    }

    #[tokio::test]
    async fn test_stale_fence_cannot_write() {
        let (writer, store) = writer_with(Balance::new(dec!(10)), Balance::ZERO).await;
        writer
            .apply_delta(&guard("acc-1", 5), delta(Balance::new(dec!(1)), "T1"))
            .await
            .unwrap();

        let result = writer
            .apply_delta(&guard("acc-1", 4), delta(Balance::new(dec!(1)), "T2"))
            .await;
        assert!(matches!(result, Err(SettlementError::LedgerWriteFailed(_))));
        assert_eq!(
            store.account("acc-1").await.unwrap().unwrap().balance,
            Balance::new(dec!(11))
        );
    }

    #[tokio::test]
    async fn test_overflowing_credit_fails_without_mutation() {
        let (writer, store) =
            writer_with(Balance::new(rust_decimal::Decimal::MAX), Balance::ZERO).await;

        let result = writer
            .apply_delta(&guard("acc-1", 2), delta(Balance::new(dec!(1)), "T1"))
            .await;
        assert!(matches!(result, Err(SettlementError::LedgerWriteFailed(_))));

        let account = store.account("acc-1").await.unwrap().unwrap();
        assert_eq!(account.balance, Balance::new(rust_decimal::Decimal::MAX));
        assert_eq!(account.version, 1);
        assert_eq!(store.entries("acc-1").await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_audit_matches_ledger() {
        let (writer, _store) = writer_with(Balance::new(dec!(1000)), Balance::ZERO).await;
        writer
            .apply_delta(&guard("acc-1", 2), delta(Balance::new(dec!(-250.5)), "P1"))
            .await
            .unwrap();
        writer
            .apply_delta(&guard("acc-1", 3), delta(Balance::new(dec!(40)), "T1"))
            .await
            .unwrap();

        let report = writer.audit("acc-1").await.unwrap();
        assert!(report.is_consistent());
        assert_eq!(report.balance, Balance::new(dec!(789.5)));
        assert_eq!(report.entries, 3);
    }
}
