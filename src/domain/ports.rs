use super::account::{Account, AccountId, Amount, Balance};
use super::ledger::{LedgerCommit, LedgerEntry};
use super::lock::{FencingToken, LockGuard};
use super::transaction::{StatusPatch, TransactionRecord, TxnId, TxnStatus};
use crate::error::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

/// Durable state: accounts, transaction records and the append-only ledger.
#[async_trait]
pub trait LedgerStore: Send + Sync {
    async fn create_account(&self, account: Account) -> Result<()>;
    async fn account(&self, account_id: &str) -> Result<Option<Account>>;
    async fn accounts(&self) -> Result<Vec<Account>>;

    async fn insert_transaction(&self, record: TransactionRecord) -> Result<()>;
    async fn transaction(&self, txn_id: &str) -> Result<Option<TransactionRecord>>;

    /// Atomically applies `patch` if the record is currently `from`.
    ///
    /// Returns the record as it was before the change, or `None` when the id is
    /// unknown or the record is in another status.
    async fn transition(
        &self,
        txn_id: &str,
        from: TxnStatus,
        patch: StatusPatch,
    ) -> Result<Option<TransactionRecord>>;

    /// Applies balance, ledger entry and linked record change as one unit.
    async fn commit(&self, commit: LedgerCommit) -> Result<()>;

    /// Ledger entries of an account, in append order.
    async fn entries(&self, account_id: &str) -> Result<Vec<LedgerEntry>>;
}

pub type LedgerStoreRef = Arc<dyn LedgerStore>;

/// Per-account mutual exclusion.
///
/// At most one guard per account exists at any instant across every holder of the
/// same backend.
#[async_trait]
pub trait LockService: Send + Sync {
    async fn acquire(&self, account_id: &str) -> Result<LockGuard>;
}

pub type LockServiceRef = Arc<dyn LockService>;

/// A held lease on a key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Lease {
    pub key: String,
    pub owner: String,
    pub token: FencingToken,
}

/// Backend for lease-based locks shared by several processes.
#[async_trait]
pub trait LeaseStore: Send + Sync {
    /// Takes the lease if it is free or expired. `None` means another owner holds it.
    async fn try_acquire(&self, key: &str, owner: &str, ttl: Duration) -> Result<Option<Lease>>;

    /// Drops the lease if `lease.token` still owns it. Returns whether it did.
    async fn release(&self, lease: &Lease) -> Result<bool>;
}

/// What the saga asks a payout provider to execute.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PayoutInstruction {
    pub txn_id: TxnId,
    pub account_id: AccountId,
    pub amount: Amount,
}

/// A provider's answer to a payout instruction.
#[derive(Debug, Clone, PartialEq)]
pub enum ProviderOutcome {
    /// Confirmed executed.
    Success { reference: Option<String> },
    /// Confirmed not executed.
    Failure { reason: String },
    /// The provider answered but the outcome cannot be trusted either way.
    Ambiguous { reason: String },
}

/// Transport-level failure talking to a provider; the outcome is unknown.
#[derive(Debug, Error)]
#[error("provider call failed: {0}")]
pub struct ProviderError(pub String);

#[async_trait]
pub trait PayoutProvider: Send + Sync {
    async fn execute(
        &self,
        instruction: &PayoutInstruction,
    ) -> std::result::Result<ProviderOutcome, ProviderError>;
}

pub type PayoutProviderRef = Arc<dyn PayoutProvider>;

/// Terminal-state event delivered to the panel's registered endpoint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NotificationEvent {
    pub event: String,
    pub txn_id: TxnId,
    pub status: TxnStatus,
    pub amount: Amount,
    pub fee: Balance,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reference: Option<String>,
    pub message: String,
}

#[derive(Debug, Error)]
#[error("notification delivery failed: {0}")]
pub struct NotifyError(pub String);

#[async_trait]
pub trait Notifier: Send + Sync {
    async fn deliver(&self, event: &NotificationEvent) -> std::result::Result<(), NotifyError>;
}

pub type NotifierRef = Arc<dyn Notifier>;
