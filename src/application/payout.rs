//! Payout saga: reserve, call the provider, then finalize, compensate or park.
//!
//! ```text
//! Requested -> Reserved -> Finalized    (provider confirmed success)
//!                       -> Compensated  (provider confirmed failure)
//!                       -> Reconciling  (timeout, transport error, ambiguous answer)
//! ```
//!
//! Funds are debited before the provider is contacted. A `Reconciling` payout is never
//! compensated automatically, since the provider may have paid it out; it waits for
//! `settle_reconciling` with the verdict of an out-of-band status check.

use super::gate::{Claim, IdempotencyGate};
use super::ledger::{Delta, LedgerWriter};
use super::notifier::{NotificationDispatcher, settlement_event};
use crate::domain::account::{AccountId, Amount, Balance};
use crate::domain::fee::FeeSchedule;
use crate::domain::ledger::LinkedChange;
use crate::domain::lock::with_lock;
use crate::domain::ports::{
    LedgerStoreRef, LockServiceRef, PayoutInstruction, PayoutProviderRef, ProviderOutcome,
};
use crate::domain::transaction::{
    Direction, PayoutStage, StatusPatch, TransactionRecord, TxnId, TxnStatus,
};
use crate::error::{Result, SettlementError};
use rust_decimal::Decimal;
use serde::Serialize;
use std::time::Duration;
use tracing::{error, info, warn};

/// An outbound payout request from the panel.
#[derive(Debug, Clone)]
pub struct PayoutRequest {
    pub account_id: AccountId,
    pub amount: Amount,
    pub fees: FeeSchedule,
    pub txn_id: TxnId,
}

/// What the caller of a payout gets back.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PayoutOutcome {
    pub status: TxnStatus,
    pub txn_id: TxnId,
    pub reference: Option<String>,
    pub reason: Option<String>,
    /// The id was already known; nothing was executed by this call.
    pub replayed: bool,
}

impl PayoutOutcome {
    fn from_record(record: &TransactionRecord, replayed: bool) -> Self {
        Self {
            status: record.status,
            txn_id: record.txn_id.clone(),
            reference: record.reference.clone(),
            reason: match record.status {
                TxnStatus::Success => None,
                _ => record.failure_reason.clone(),
            },
            replayed,
        }
    }
}

/// Result of an out-of-band status check on a `Reconciling` payout.
#[derive(Debug, Clone, PartialEq)]
pub enum ReconciliationVerdict {
    Executed { reference: Option<String> },
    NotExecuted { reason: String },
}

pub struct PayoutSaga {
    store: LedgerStoreRef,
    locks: LockServiceRef,
    writer: LedgerWriter,
    gate: IdempotencyGate,
    provider: PayoutProviderRef,
    notifications: NotificationDispatcher,
    provider_timeout: Duration,
}

impl PayoutSaga {
    pub fn new(
        store: LedgerStoreRef,
        locks: LockServiceRef,
        provider: PayoutProviderRef,
        notifications: NotificationDispatcher,
        provider_timeout: Duration,
    ) -> Self {
        let writer = LedgerWriter::new(store.clone());
        let gate = IdempotencyGate::new(store.clone(), writer.clone());
        Self {
            store,
            locks,
            writer,
            gate,
            provider,
            notifications,
            provider_timeout,
        }
    }

    /// Runs the whole saga for `request`.
    ///
    /// A `txn_id` that is already known as a payout returns that record's status with
    /// `replayed = true`, before any validation of the new request. An id taken by a
    /// pay-in is `DuplicateTransaction`. `InsufficientFunds`, `InvalidFeeConfig` and
    /// `LockTimeout` are returned before the provider is called, with no balance change.
    pub async fn execute(&self, request: PayoutRequest) -> Result<PayoutOutcome> {
        if let Some(existing) = self.store.transaction(&request.txn_id).await? {
            if existing.direction != Direction::Out {
                return Err(SettlementError::DuplicateTransaction(request.txn_id));
            }
            info!(txn_id = %request.txn_id, status = existing.status.as_str(), "payout replayed");
            return Ok(PayoutOutcome::from_record(&existing, true));
        }

        if request.amount.value() < Decimal::ONE {
            return Err(SettlementError::Validation(format!(
                "Amount must be at least 1. Received: {}",
                request.amount
            )));
        }
        let fee = request.fees.calculate(request.amount)?;
        if Balance::from(request.amount).checked_add(fee).is_none() {
            return Err(SettlementError::Validation(format!(
                "Amount {} plus fee {} is out of range",
                request.amount, fee
            )));
        }

        let mut record = TransactionRecord::pending(
            request.txn_id,
            request.account_id,
            request.amount,
            fee,
            Direction::Out,
        );
        record.stage = Some(PayoutStage::Reserved);

        match self.reserve(&record).await {
            Ok(()) => {}
            Err(SettlementError::DuplicateTransaction(id)) => {
                let existing = self.current(&record.txn_id).await?;
                if existing.direction != Direction::Out {
                    return Err(SettlementError::DuplicateTransaction(id));
                }
                return Ok(PayoutOutcome::from_record(&existing, true));
            }
            Err(e) => {
                warn!(txn_id = %record.txn_id, error = %e, "payout rejected");
                return Err(e);
            }
        }

        let outcome = self.call_provider(&record).await;
        let settled = match outcome {
            ProviderOutcome::Success { reference } => {
                self.finalize(&record, TxnStatus::Pending, reference).await?
            }
            ProviderOutcome::Failure { reason } => {
                self.compensate(&record, TxnStatus::Pending, reason).await?
            }
            ProviderOutcome::Ambiguous { reason } => self.park(&record, reason).await?,
        };
        Ok(PayoutOutcome::from_record(&settled, false))
    }

    /// Resolves a `Reconciling` payout once its real outcome is known.
    pub async fn settle_reconciling(
        &self,
        txn_id: &str,
        verdict: ReconciliationVerdict,
    ) -> Result<PayoutOutcome> {
        let record = self.current(txn_id).await?;
        if record.direction != Direction::Out || record.status != TxnStatus::Reconciling {
            return Err(SettlementError::NotClaimable(txn_id.to_string()));
        }

        let settled = match verdict {
            ReconciliationVerdict::Executed { reference } => {
                self.finalize(&record, TxnStatus::Reconciling, reference)
                    .await?
            }
            ReconciliationVerdict::NotExecuted { reason } => {
                self.compensate(&record, TxnStatus::Reconciling, reason)
                    .await?
            }
        };
        Ok(PayoutOutcome::from_record(&settled, false))
    }

    /// Inserts the record and debits `amount + fee` in one commit.
    async fn reserve(&self, record: &TransactionRecord) -> Result<()> {
        let writer = &self.writer;
        let delta = Delta {
            account_id: record.account_id.clone(),
            amount: -record.gross(),
            fee: record.fee,
            txn_id: record.txn_id.clone(),
            linked: Some(LinkedChange::Insert(record.clone())),
        };

        with_lock(self.locks.as_ref(), &record.account_id, |guard| async move {
            writer.apply_delta(&guard, delta).await
        })
        .await?;

        info!(
            txn_id = %record.txn_id,
            account_id = %record.account_id,
            reserved = %record.gross(),
            "payout reserved"
        );
        Ok(())
    }

    async fn call_provider(&self, record: &TransactionRecord) -> ProviderOutcome {
        let instruction = PayoutInstruction {
            txn_id: record.txn_id.clone(),
            account_id: record.account_id.clone(),
            amount: record.amount,
        };

        match tokio::time::timeout(self.provider_timeout, self.provider.execute(&instruction)).await
        {
            Ok(Ok(outcome)) => outcome,
            Ok(Err(e)) => ProviderOutcome::Ambiguous {
                reason: e.to_string(),
            },
            Err(_) => ProviderOutcome::Ambiguous {
                reason: format!("provider timed out after {:?}", self.provider_timeout),
            },
        }
    }

    /// Marks the payout successful. The debit already happened at reservation, so this
    /// is a conditional transition with no balance effect and needs no account lock.
    async fn finalize(
        &self,
        record: &TransactionRecord,
        from: TxnStatus,
        reference: Option<String>,
    ) -> Result<TransactionRecord> {
        let patch = StatusPatch::to(TxnStatus::Success)
            .stage(PayoutStage::Finalized)
            .reference(reference);

        let claim = self.gate.claim_from(&record.txn_id, from, patch).await?;
        let current = self.current(&record.txn_id).await?;
        if claim.is_claimed() {
            info!(txn_id = %record.txn_id, "payout finalized");
            self.notifications.dispatch(settlement_event(&current));
        }
        Ok(current)
    }

    /// Gives back exactly `amount + fee` and marks the payout failed, atomically.
    ///
    /// If the refund cannot be committed right after the provider call, the payout is
    /// parked in `Reconciling`. A failed refund of an already parked payout returns the
    /// error and leaves the record in `Reconciling` for the next attempt.
    async fn compensate(
        &self,
        record: &TransactionRecord,
        from: TxnStatus,
        reason: String,
    ) -> Result<TransactionRecord> {
        let gate = &self.gate;
        let patch = StatusPatch::to(TxnStatus::Failed)
            .stage(PayoutStage::Compensated)
            .failure_reason(reason.clone());

        let result = with_lock(self.locks.as_ref(), &record.account_id, |guard| async move {
            gate.claim_with_delta(&guard, record, from, patch, record.gross())
                .await
        })
        .await;

        match result {
            Ok(Claim::Claimed { .. }) => {
                let current = self.current(&record.txn_id).await?;
                info!(
                    txn_id = %record.txn_id,
                    refunded = %record.gross(),
                    reason = %reason,
                    "payout compensated"
                );
                self.notifications.dispatch(settlement_event(&current));
                Ok(current)
            }
            Ok(Claim::NotClaimable) => self.current(&record.txn_id).await,
            Err(e) => {
                error!(txn_id = %record.txn_id, error = %e, "payout compensation failed");
                if from == TxnStatus::Pending {
                    self.park(record, format!("compensation failed: {}", e))
                        .await
                } else {
                    Err(e)
                }
            }
        }
    }

    /// Leaves the payout in `Reconciling` with its funds still reserved.
    async fn park(&self, record: &TransactionRecord, reason: String) -> Result<TransactionRecord> {
        let patch = StatusPatch::to(TxnStatus::Reconciling)
            .stage(PayoutStage::Reconciling)
            .failure_reason(reason.clone());

        if self.gate.claim(&record.txn_id, patch).await?.is_claimed() {
            warn!(txn_id = %record.txn_id, reason = %reason, "payout needs reconciliation");
        }
        self.current(&record.txn_id).await
    }

    async fn current(&self, txn_id: &str) -> Result<TransactionRecord> {
        self.store
            .transaction(txn_id)
            .await?
            .ok_or_else(|| SettlementError::TransactionNotFound(txn_id.to_string()))
    }
}
