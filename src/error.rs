use crate::domain::account::Balance;
use thiserror::Error;

/// Errors raised by the settlement core.
///
/// Replays of an already settled transaction are not errors; they surface as
/// outcome values (`CallbackOutcome::AlreadyProcessed`, an existing payout status).
#[derive(Error, Debug)]
pub enum SettlementError {
    #[error("Invalid fee config: {0}")]
    InvalidFeeConfig(String),
    #[error("Insufficient funds: required {required}, usable {usable}")]
    InsufficientFunds { required: Balance, usable: Balance },
    #[error("Account {0} is locked by another operation, retry later")]
    LockTimeout(String),
    #[error("Ledger write failed: {0}")]
    LedgerWriteFailed(String),
    #[error("Transaction {0} is not claimable")]
    NotClaimable(String),
    #[error("Duplicate transaction id: {0}")]
    DuplicateTransaction(String),
    #[error("Duplicate account id: {0}")]
    DuplicateAccount(String),
    #[error("Account not found: {0}")]
    AccountNotFound(String),
    #[error("Transaction not found: {0}")]
    TransactionNotFound(String),
    #[error("Validation error: {0}")]
    Validation(String),
    #[error("Storage error: {0}")]
    Storage(String),
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

#[cfg(feature = "storage-rocksdb")]
impl From<rocksdb::Error> for SettlementError {
    fn from(err: rocksdb::Error) -> Self {
        SettlementError::Storage(err.to_string())
    }
}

impl From<redis::RedisError> for SettlementError {
    fn from(err: redis::RedisError) -> Self {
        SettlementError::Storage(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, SettlementError>;
