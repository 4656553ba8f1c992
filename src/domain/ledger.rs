use super::account::{Account, AccountId, Balance};
use super::transaction::{TransactionRecord, Transition, TxnId};
use crate::error::{Result, SettlementError};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Serialize, Deserialize, PartialEq, Eq, Clone, Copy)]
#[serde(rename_all = "lowercase")]
pub enum EntryType {
    Credit,
    Debit,
}

/// Immutable audit record of one balance mutation.
#[derive(Debug, Serialize, Deserialize, PartialEq, Clone)]
pub struct LedgerEntry {
    /// Position in the account's history, starting at 1.
    pub seq: u64,
    pub account_id: AccountId,
    pub txn_id: TxnId,
    pub r#type: EntryType,
    pub before_balance: Balance,
    pub after_balance: Balance,
    pub fee: Balance,
    pub created_at: DateTime<Utc>,
}

impl LedgerEntry {
    pub fn delta(&self) -> Balance {
        self.after_balance - self.before_balance
    }
}

/// The record change that commits together with a balance mutation.
#[derive(Debug, Clone, PartialEq)]
pub enum LinkedChange {
    /// Create a new record; aborts if the id already exists.
    Insert(TransactionRecord),
    /// Conditionally transition an existing record; aborts if it is not in `from`.
    Transition(Transition),
}

impl LinkedChange {
    pub fn txn_id(&self) -> &str {
        match self {
            LinkedChange::Insert(record) => &record.txn_id,
            LinkedChange::Transition(transition) => &transition.txn_id,
        }
    }
}

/// One atomic unit handed to the store: new account state, its audit entry, and at
/// most one linked record change.
///
/// The store applies all of it or nothing. It rejects the unit when the stored account
/// version differs from `expected_version` or the account has seen a higher fence.
#[derive(Debug, Clone)]
pub struct LedgerCommit {
    pub account: Account,
    pub expected_version: u64,
    pub fence: u64,
    pub entry: LedgerEntry,
    pub linked: Option<LinkedChange>,
}

impl LedgerCommit {
    /// Checks the unit against the currently stored account and linked record.
    ///
    /// Returns the record to persist alongside the balance, if any. Stores call this
    /// while holding whatever serializes their commits, then write everything at once.
    pub fn prepare(
        &self,
        stored: Option<&Account>,
        existing: Option<&TransactionRecord>,
    ) -> Result<Option<TransactionRecord>> {
        let stored = stored.ok_or_else(|| SettlementError::AccountNotFound(self.account.id.clone()))?;

        if stored.version != self.expected_version {
            return Err(SettlementError::LedgerWriteFailed(format!(
                "version conflict on {}: expected {}, found {}",
                stored.id, self.expected_version, stored.version
            )));
        }
        if self.fence < stored.fence {
            return Err(SettlementError::LedgerWriteFailed(format!(
                "stale fencing token {} on {}, account has seen {}",
                self.fence, stored.id, stored.fence
            )));
        }
        if self.entry.account_id != self.account.id {
            return Err(SettlementError::LedgerWriteFailed(format!(
                "entry for {} committed against {}",
                self.entry.account_id, self.account.id
            )));
        }

        match &self.linked {
            None => Ok(None),
            Some(LinkedChange::Insert(record)) => match existing {
                Some(_) => Err(SettlementError::DuplicateTransaction(record.txn_id.clone())),
                None => Ok(Some(record.clone())),
            },
            Some(LinkedChange::Transition(transition)) => match existing {
                Some(record) if record.status == transition.from => {
                    let mut record = record.clone();
                    transition.patch.apply(&mut record);
                    Ok(Some(record))
                }
                _ => Err(SettlementError::NotClaimable(transition.txn_id.clone())),
            },
        }
    }
}
