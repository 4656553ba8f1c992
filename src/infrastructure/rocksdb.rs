use crate::domain::account::Account;
use crate::domain::ledger::{LedgerCommit, LedgerEntry};
use crate::domain::ports::LedgerStore;
use crate::domain::transaction::{StatusPatch, TransactionRecord, TxnStatus};
use crate::error::{Result, SettlementError};
use async_trait::async_trait;
use rocksdb::{
    ColumnFamily, ColumnFamilyDescriptor, DB, Direction, IteratorMode, Options, WriteBatch,
    WriteOptions,
};
use serde::de::DeserializeOwned;
use std::path::Path;
use std::sync::Arc;
use tokio::sync::Mutex;

/// Column Family for account states, keyed by account id.
pub const CF_ACCOUNTS: &str = "accounts";
/// Column Family for transaction records, keyed by txn id.
pub const CF_TRANSACTIONS: &str = "transactions";
/// Column Family for ledger entries, keyed by `account_id \0 seq` (big-endian seq).
pub const CF_ENTRIES: &str = "entries";

/// A persistent ledger store using RocksDB.
///
/// Accounts, records and entries live in separate Column Families. Every write that
/// depends on a prior read (account creation, record insert, transition, commit) runs
/// under one writer mutex, and every write goes through a synced `WriteBatch`, so a
/// commit is either fully on disk or absent after a crash. Account ids must not
/// contain NUL, which separates the id from the sequence in entry keys.
///
/// This struct is thread-safe (`Clone` shares the underlying `Arc<DB>`).
#[derive(Clone)]
pub struct RocksDBStore {
    db: Arc<DB>,
    writer: Arc<Mutex<()>>,
}

impl RocksDBStore {
    /// Opens or creates a RocksDB instance at the specified path.
    ///
    /// # Arguments
    ///
    /// * `path` - The filesystem path where the database will be stored.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let mut opts = Options::default();
        opts.create_if_missing(true);
        opts.create_missing_column_families(true);

        let families = [CF_ACCOUNTS, CF_TRANSACTIONS, CF_ENTRIES]
            .into_iter()
            .map(|name| ColumnFamilyDescriptor::new(name, Options::default()));

        let db = DB::open_cf_descriptors(&opts, path, families)?;

        Ok(Self {
            db: Arc::new(db),
            writer: Arc::new(Mutex::new(())),
        })
    }

    fn cf(&self, name: &str) -> Result<&ColumnFamily> {
        self.db
            .cf_handle(name)
            .ok_or_else(|| SettlementError::Storage(format!("{} column family not found", name)))
    }

    fn read<T: DeserializeOwned>(&self, cf: &str, key: &[u8]) -> Result<Option<T>> {
        match self.db.get_pinned_cf(self.cf(cf)?, key)? {
            Some(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            None => Ok(None),
        }
    }

    fn write_synced(&self, batch: WriteBatch) -> Result<()> {
        let mut opts = WriteOptions::default();
        opts.set_sync(true);
        self.db.write_opt(batch, &opts)?;
        Ok(())
    }

    fn entry_prefix(account_id: &str) -> Vec<u8> {
        let mut prefix = account_id.as_bytes().to_vec();
        prefix.push(0);
        prefix
    }

    fn entry_key(entry: &LedgerEntry) -> Vec<u8> {
        let mut key = Self::entry_prefix(&entry.account_id);
        key.extend_from_slice(&entry.seq.to_be_bytes());
        key
    }
}

#[async_trait]
impl LedgerStore for RocksDBStore {
    async fn create_account(&self, account: Account) -> Result<()> {
        // A NUL would let one account's entry prefix run into another's.
        if account.id.as_bytes().contains(&0) {
            return Err(SettlementError::Validation(format!(
                "account id {:?} contains a NUL byte",
                account.id
            )));
        }
        let _writer = self.writer.lock().await;
        let cf = self.cf(CF_ACCOUNTS)?;
        if self.db.get_pinned_cf(cf, account.id.as_bytes())?.is_some() {
            return Err(SettlementError::DuplicateAccount(account.id));
        }
        let mut batch = WriteBatch::default();
        batch.put_cf(cf, account.id.as_bytes(), serde_json::to_vec(&account)?);
        self.write_synced(batch)
    }

    async fn account(&self, account_id: &str) -> Result<Option<Account>> {
        self.read(CF_ACCOUNTS, account_id.as_bytes())
    }

    async fn accounts(&self) -> Result<Vec<Account>> {
        let cf = self.cf(CF_ACCOUNTS)?;
        let mut accounts = Vec::new();
        // Keys iterate in byte order, which is id order.
        for item in self.db.iterator_cf(cf, IteratorMode::Start) {
            let (_key, value) = item?;
            accounts.push(serde_json::from_slice(&value)?);
        }
        Ok(accounts)
    }

    async fn insert_transaction(&self, record: TransactionRecord) -> Result<()> {
        let _writer = self.writer.lock().await;
        let cf = self.cf(CF_TRANSACTIONS)?;
        if self.db.get_pinned_cf(cf, record.txn_id.as_bytes())?.is_some() {
            return Err(SettlementError::DuplicateTransaction(record.txn_id));
        }
        let mut batch = WriteBatch::default();
        batch.put_cf(cf, record.txn_id.as_bytes(), serde_json::to_vec(&record)?);
        self.write_synced(batch)
    }

    async fn transaction(&self, txn_id: &str) -> Result<Option<TransactionRecord>> {
        self.read(CF_TRANSACTIONS, txn_id.as_bytes())
    }

    async fn transition(
        &self,
        txn_id: &str,
        from: TxnStatus,
        patch: StatusPatch,
    ) -> Result<Option<TransactionRecord>> {
        let _writer = self.writer.lock().await;
        let Some(previous) = self.read::<TransactionRecord>(CF_TRANSACTIONS, txn_id.as_bytes())?
        else {
            return Ok(None);
        };
        if previous.status != from {
            return Ok(None);
        }

        let mut record = previous.clone();
        patch.apply(&mut record);
        let mut batch = WriteBatch::default();
        batch.put_cf(
            self.cf(CF_TRANSACTIONS)?,
            txn_id.as_bytes(),
            serde_json::to_vec(&record)?,
        );
        self.write_synced(batch)?;
        Ok(Some(previous))
    }

    async fn commit(&self, commit: LedgerCommit) -> Result<()> {
        let _writer = self.writer.lock().await;

        let stored: Option<Account> = self.read(CF_ACCOUNTS, commit.account.id.as_bytes())?;
        let existing: Option<TransactionRecord> = match &commit.linked {
            Some(change) => self.read(CF_TRANSACTIONS, change.txn_id().as_bytes())?,
            None => None,
        };
        let record = commit.prepare(stored.as_ref(), existing.as_ref())?;

        let mut batch = WriteBatch::default();
        batch.put_cf(
            self.cf(CF_ACCOUNTS)?,
            commit.account.id.as_bytes(),
            serde_json::to_vec(&commit.account)?,
        );
        batch.put_cf(
            self.cf(CF_ENTRIES)?,
            Self::entry_key(&commit.entry),
            serde_json::to_vec(&commit.entry)?,
        );
        if let Some(record) = record {
            batch.put_cf(
                self.cf(CF_TRANSACTIONS)?,
                record.txn_id.as_bytes(),
                serde_json::to_vec(&record)?,
            );
        }
        self.write_synced(batch)
    }

    async fn entries(&self, account_id: &str) -> Result<Vec<LedgerEntry>> {
        let cf = self.cf(CF_ENTRIES)?;
        let prefix = Self::entry_prefix(account_id);
        let mut entries = Vec::new();

        for item in self
            .db
            .iterator_cf(cf, IteratorMode::From(&prefix, Direction::Forward))
        {
            let (key, value) = item?;
            if !key.starts_with(&prefix) {
                break;
            }
            entries.push(serde_json::from_slice(&value)?);
        }
        Ok(entries)
    }
}
