use crate::domain::account::{Account, AccountId};
use crate::domain::ledger::{LedgerCommit, LedgerEntry};
use crate::domain::lock::FencingToken;
use crate::domain::ports::{Lease, LeaseStore, LedgerStore};
use crate::domain::transaction::{StatusPatch, TransactionRecord, TxnId, TxnStatus};
use crate::error::{Result, SettlementError};
use crate::infrastructure::locks::clock_seed;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, RwLock};
use tokio::time::Instant;

#[derive(Default)]
struct LedgerState {
    accounts: HashMap<AccountId, Account>,
    transactions: HashMap<TxnId, TransactionRecord>,
    entries: HashMap<AccountId, Vec<LedgerEntry>>,
}

/// A thread-safe in-memory ledger store.
///
/// A single `RwLock` guards accounts, records and entries together, so a commit
/// validates and applies all of its effects under one write guard.
/// Ideal for testing and single-process deployments where persistence is not required.
#[derive(Default, Clone)]
pub struct InMemoryLedgerStore {
    state: Arc<RwLock<LedgerState>>,
}

impl InMemoryLedgerStore {
    /// Creates a new, empty in-memory ledger store.
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl LedgerStore for InMemoryLedgerStore {
    async fn create_account(&self, account: Account) -> Result<()> {
        let mut state = self.state.write().await;
        if state.accounts.contains_key(&account.id) {
            return Err(SettlementError::DuplicateAccount(account.id));
        }
        state.accounts.insert(account.id.clone(), account);
        Ok(())
    }

    async fn account(&self, account_id: &str) -> Result<Option<Account>> {
        let state = self.state.read().await;
        Ok(state.accounts.get(account_id).cloned())
    }

    async fn accounts(&self) -> Result<Vec<Account>> {
        let state = self.state.read().await;
        let mut accounts: Vec<Account> = state.accounts.values().cloned().collect();
        accounts.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(accounts)
    }

    async fn insert_transaction(&self, record: TransactionRecord) -> Result<()> {
        let mut state = self.state.write().await;
        if state.transactions.contains_key(&record.txn_id) {
            return Err(SettlementError::DuplicateTransaction(record.txn_id));
        }
        state.transactions.insert(record.txn_id.clone(), record);
        Ok(())
    }

    async fn transaction(&self, txn_id: &str) -> Result<Option<TransactionRecord>> {
        let state = self.state.read().await;
        Ok(state.transactions.get(txn_id).cloned())
    }

    async fn transition(
        &self,
        txn_id: &str,
        from: TxnStatus,
        patch: StatusPatch,
    ) -> Result<Option<TransactionRecord>> {
        let mut state = self.state.write().await;
        match state.transactions.get_mut(txn_id) {
            Some(record) if record.status == from => {
                let previous = record.clone();
                patch.apply(record);
                Ok(Some(previous))
            }
            _ => Ok(None),
        }
    }

    async fn commit(&self, commit: LedgerCommit) -> Result<()> {
        let mut state = self.state.write().await;

        let linked_id = commit.linked.as_ref().map(|change| change.txn_id().to_string());
        let existing = linked_id
            .as_deref()
            .and_then(|id| state.transactions.get(id));
        let record = commit.prepare(state.accounts.get(&commit.account.id), existing)?;

        // Nothing is written before every check above has passed.
        if let Some(record) = record {
            state.transactions.insert(record.txn_id.clone(), record);
        }
        state
            .entries
            .entry(commit.account.id.clone())
            .or_default()
            .push(commit.entry);
        state.accounts.insert(commit.account.id.clone(), commit.account);
        Ok(())
    }

    async fn entries(&self, account_id: &str) -> Result<Vec<LedgerEntry>> {
        let state = self.state.read().await;
        Ok(state.entries.get(account_id).cloned().unwrap_or_default())
    }
}

struct LeaseSlot {
    lease: Lease,
    expires_at: Instant,
}

struct LeaseState {
    slots: HashMap<String, LeaseSlot>,
    last_token: u64,
}

impl Default for LeaseState {
    fn default() -> Self {
        Self {
            slots: HashMap::new(),
            last_token: clock_seed(),
        }
    }
}

/// In-memory lease table for tests and single-process embedding.
///
/// Clones share the same table, which is how tests model several processes talking to
/// one lock backend; separate processes need `RedisLeaseStore`. Expiry uses tokio's
/// clock so paused-time tests can advance it.
#[derive(Default, Clone)]
pub struct InMemoryLeaseStore {
    state: Arc<Mutex<LeaseState>>,
}

impl InMemoryLeaseStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl LeaseStore for InMemoryLeaseStore {
    async fn try_acquire(&self, key: &str, owner: &str, ttl: Duration) -> Result<Option<Lease>> {
        let mut state = self.state.lock().await;
        let now = Instant::now();

        if let Some(slot) = state.slots.get(key)
            && slot.expires_at > now
        {
            return Ok(None);
        }

        state.last_token += 1;
        let lease = Lease {
            key: key.to_string(),
            owner: owner.to_string(),
            token: FencingToken(state.last_token),
        };
        state.slots.insert(
            key.to_string(),
            LeaseSlot {
                lease: lease.clone(),
                expires_at: now + ttl,
            },
        );
        Ok(Some(lease))
    }

    async fn release(&self, lease: &Lease) -> Result<bool> {
        let mut state = self.state.lock().await;
        match state.slots.get(&lease.key) {
            Some(slot) if slot.lease.token == lease.token => {
                state.slots.remove(&lease.key);
                Ok(true)
            }
            _ => Ok(false),
        }
    }
}
