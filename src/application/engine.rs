use super::gate::{Claim, IdempotencyGate};
use super::ledger::{AuditReport, Delta, LedgerWriter};
use super::notifier::{NotificationDispatcher, settlement_event};
use super::payout::{PayoutOutcome, PayoutRequest, PayoutSaga, ReconciliationVerdict};
use crate::domain::account::{Account, AccountId, Amount, Balance};
use crate::domain::fee::FeeSchedule;
use crate::domain::ledger::LedgerEntry;
use crate::domain::lock::with_lock;
use crate::domain::ports::{LedgerStoreRef, LockServiceRef, PayoutProviderRef};
use crate::domain::transaction::{
    Callback, CallbackStatus, Direction, TransactionRecord, TxnStatus,
};
use crate::error::{Result, SettlementError};
use serde::Serialize;
use std::time::Duration;
use tracing::{info, warn};

/// Acknowledgement for an inbound provider callback.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum CallbackOutcome {
    /// This delivery settled the transaction.
    Applied(TxnStatus),
    /// An earlier delivery already settled it; nothing changed.
    AlreadyProcessed(TxnStatus),
    /// No record with this id exists; nothing changed.
    NotFound,
}

/// Balance view for the panel.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AccountView {
    pub account: AccountId,
    pub balance: Balance,
    pub min_balance: Balance,
    pub usable: Balance,
}

impl From<&Account> for AccountView {
    fn from(account: &Account) -> Self {
        Self {
            account: account.id.clone(),
            balance: account.balance,
            min_balance: account.min_balance,
            usable: account.usable(),
        }
    }
}

/// The settlement core.
///
/// `SettlementEngine` turns pay-in callbacks and payout requests into exactly-once
/// wallet mutations. Callers may invoke it from many tasks at once: every balance
/// change runs under the target account's lock and commits atomically with its ledger
/// entry and status transition.
pub struct SettlementEngine {
    store: LedgerStoreRef,
    locks: LockServiceRef,
    writer: LedgerWriter,
    gate: IdempotencyGate,
    payouts: PayoutSaga,
    notifications: NotificationDispatcher,
}

impl SettlementEngine {
    /// Creates a new `SettlementEngine`.
    ///
    /// # Arguments
    ///
    /// * `store` - Durable accounts, records and ledger.
    /// * `locks` - Per-account lock backend (local or lease-based).
    /// * `provider` - Payout provider called by the saga.
    /// * `notifications` - Dispatcher for terminal-state events.
    /// * `provider_timeout` - Bound on a single provider call.
    pub fn new(
        store: LedgerStoreRef,
        locks: LockServiceRef,
        provider: PayoutProviderRef,
        notifications: NotificationDispatcher,
        provider_timeout: Duration,
    ) -> Self {
        let writer = LedgerWriter::new(store.clone());
        let gate = IdempotencyGate::new(store.clone(), writer.clone());
        let payouts = PayoutSaga::new(
            store.clone(),
            locks.clone(),
            provider,
            notifications.clone(),
            provider_timeout,
        );
        Self {
            store,
            locks,
            writer,
            gate,
            payouts,
            notifications,
        }
    }

    /// Creates an account at zero and posts `opening_balance` as its first ledger entry.
    pub async fn open_account(
        &self,
        account_id: &str,
        min_balance: Balance,
        opening_balance: Balance,
    ) -> Result<AccountView> {
        if opening_balance.is_negative() {
            return Err(SettlementError::Validation(
                "Opening balance must not be negative".to_string(),
            ));
        }
        self.store
            .create_account(Account::new(account_id, min_balance))
            .await?;

        if opening_balance != Balance::ZERO {
            let writer = &self.writer;
            let delta = Delta {
                account_id: account_id.to_string(),
                amount: opening_balance,
                fee: Balance::ZERO,
                txn_id: format!("opening:{}", account_id),
                linked: None,
            };
            with_lock(self.locks.as_ref(), account_id, |guard| async move {
                writer.apply_delta(&guard, delta).await
            })
            .await?;
        }

        info!(account_id, min_balance = %min_balance, opening = %opening_balance, "account opened");
        self.account(account_id).await
    }

    /// Records a pending pay-in. The fee is computed now and frozen on the record.
    pub async fn initiate_payin(
        &self,
        account_id: &str,
        txn_id: &str,
        amount: Amount,
        fees: &FeeSchedule,
    ) -> Result<TransactionRecord> {
        if self.store.account(account_id).await?.is_none() {
            return Err(SettlementError::AccountNotFound(account_id.to_string()));
        }
        let fee = fees.calculate(amount)?;
        if fee > Balance::from(amount) {
            return Err(SettlementError::InvalidFeeConfig(format!(
                "fee {} exceeds pay-in amount {}",
                fee, amount
            )));
        }

        let record = TransactionRecord::pending(txn_id, account_id, amount, fee, Direction::In);
        self.store.insert_transaction(record.clone()).await?;
        info!(txn_id, account_id, amount = %amount, fee = %fee, "payin initiated");
        Ok(record)
    }

    /// Applies a provider callback exactly once.
    ///
    /// A success credits `amount - fee` in the same commit that claims the record.
    /// A failure only claims the record. Re-deliveries, with the same or a different
    /// payload, report `AlreadyProcessed` and change nothing.
    pub async fn handle_callback(&self, callback: Callback) -> Result<CallbackOutcome> {
        let Some(record) = self.store.transaction(&callback.txn_id).await? else {
            warn!(txn_id = %callback.txn_id, "callback for unknown transaction");
            return Ok(CallbackOutcome::NotFound);
        };
        if record.direction != Direction::In {
            return Err(SettlementError::Validation(format!(
                "callback for payout {}; payouts settle through the saga",
                record.txn_id
            )));
        }
        if record.status != TxnStatus::Pending {
            info!(txn_id = %record.txn_id, status = record.status.as_str(), "callback already processed");
            return Ok(CallbackOutcome::AlreadyProcessed(record.status));
        }

        let resolution = callback.resolution();
        let claim = match callback.status {
            CallbackStatus::Success => {
                let gate = &self.gate;
                let record = &record;
                with_lock(self.locks.as_ref(), &record.account_id, |guard| async move {
                    gate.claim_with_delta(
                        &guard,
                        record,
                        TxnStatus::Pending,
                        resolution,
                        record.net(),
                    )
                    .await
                })
                .await?
            }
            CallbackStatus::Failed => self.gate.claim(&record.txn_id, resolution).await?,
        };

        let current = self
            .store
            .transaction(&record.txn_id)
            .await?
            .ok_or_else(|| SettlementError::TransactionNotFound(record.txn_id.clone()))?;

        match claim {
            Claim::Claimed { .. } => {
                info!(txn_id = %current.txn_id, status = current.status.as_str(), "callback applied");
                self.notifications.dispatch(settlement_event(&current));
                Ok(CallbackOutcome::Applied(current.status))
            }
            Claim::NotClaimable => {
                info!(txn_id = %current.txn_id, "callback already processed");
                Ok(CallbackOutcome::AlreadyProcessed(current.status))
            }
        }
    }

    /// Runs the payout saga. See [`PayoutSaga::execute`].
    pub async fn request_payout(&self, request: PayoutRequest) -> Result<PayoutOutcome> {
        self.payouts.execute(request).await
    }

    /// Resolves a payout left in `Reconciling`. See [`PayoutSaga::settle_reconciling`].
    pub async fn settle_reconciling(
        &self,
        txn_id: &str,
        verdict: ReconciliationVerdict,
    ) -> Result<PayoutOutcome> {
        self.payouts.settle_reconciling(txn_id, verdict).await
    }

    pub async fn transaction(&self, txn_id: &str) -> Result<Option<TransactionRecord>> {
        self.store.transaction(txn_id).await
    }

    pub async fn account(&self, account_id: &str) -> Result<AccountView> {
        self.store
            .account(account_id)
            .await?
            .map(|account| AccountView::from(&account))
            .ok_or_else(|| SettlementError::AccountNotFound(account_id.to_string()))
    }

    pub async fn accounts(&self) -> Result<Vec<AccountView>> {
        Ok(self
            .store
            .accounts()
            .await?
            .iter()
            .map(AccountView::from)
            .collect())
    }

    /// Ledger entries of an account, oldest first.
    pub async fn history(&self, account_id: &str) -> Result<Vec<LedgerEntry>> {
        self.store.entries(account_id).await
    }

    /// Checks that the account balance equals the sum of its ledger deltas.
    pub async fn audit(&self, account_id: &str) -> Result<AuditReport> {
        self.writer.audit(account_id).await
    }
}
