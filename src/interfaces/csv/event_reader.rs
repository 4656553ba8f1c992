use crate::domain::account::{AccountId, Amount};
use crate::domain::transaction::{Callback, CallbackStatus, TxnId};
use crate::error::{Result, SettlementError};
use crate::infrastructure::provider::ScriptedOutcome;
use rust_decimal::Decimal;
use serde::Deserialize;
use std::io::Read;

/// One replayable event.
#[derive(Debug, Clone, PartialEq)]
pub enum Event {
    Payin {
        account_id: AccountId,
        txn_id: TxnId,
        amount: Amount,
    },
    Callback(Callback),
    /// A payout request plus the answer the provider will give for it.
    Payout {
        account_id: AccountId,
        txn_id: TxnId,
        amount: Amount,
        outcome: ScriptedOutcome,
    },
}

#[derive(Debug, Deserialize, PartialEq, Eq, Clone, Copy)]
#[serde(rename_all = "lowercase")]
enum EventType {
    Payin,
    Callback,
    Payout,
}

/// Raw CSV row: `type, account, txn, amount, status, reference, message`.
#[derive(Debug, Deserialize)]
struct EventRow {
    r#type: EventType,
    #[serde(default)]
    account: Option<String>,
    txn: String,
    #[serde(default)]
    amount: Option<Decimal>,
    #[serde(default)]
    status: Option<String>,
    #[serde(default)]
    reference: Option<String>,
    #[serde(default)]
    message: Option<String>,
}

impl EventRow {
    fn account(&self) -> Result<AccountId> {
        self.account
            .clone()
            .ok_or_else(|| self.missing("account"))
    }

    fn amount(&self) -> Result<Amount> {
        Amount::new(self.amount.ok_or_else(|| self.missing("amount"))?)
    }

    fn missing(&self, column: &str) -> SettlementError {
        SettlementError::Validation(format!("{} is missing {}", self.txn, column))
    }
}

impl TryFrom<EventRow> for Event {
    type Error = SettlementError;

    fn try_from(row: EventRow) -> Result<Self> {
        let status = row.status.as_deref().map(str::to_ascii_lowercase);
        match row.r#type {
            EventType::Payin => Ok(Event::Payin {
                account_id: row.account()?,
                amount: row.amount()?,
                txn_id: row.txn,
            }),
            EventType::Callback => {
                let status = match status.as_deref() {
                    Some("success") => CallbackStatus::Success,
                    Some("failed") => CallbackStatus::Failed,
                    other => {
                        return Err(SettlementError::Validation(format!(
                            "unknown callback status {:?} for {}",
                            other, row.txn
                        )));
                    }
                };
                Ok(Event::Callback(Callback {
                    txn_id: row.txn,
                    status,
                    reference: row.reference,
                    message: row.message,
                }))
            }
            EventType::Payout => {
                let outcome = match status.as_deref() {
                    Some("success") => ScriptedOutcome::Success {
                        reference: row.reference.clone(),
                    },
                    Some("failed") => ScriptedOutcome::Failure {
                        reason: row
                            .message
                            .clone()
                            .unwrap_or_else(|| "Payout declined by provider".to_string()),
                    },
                    Some("timeout") => ScriptedOutcome::Timeout,
                    other => {
                        return Err(SettlementError::Validation(format!(
                            "unknown payout outcome {:?} for {}",
                            other, row.txn
                        )));
                    }
                };
                Ok(Event::Payout {
                    account_id: row.account()?,
                    amount: row.amount()?,
                    txn_id: row.txn,
                    outcome,
                })
            }
        }
    }
}

/// Reads events from a CSV source.
///
/// Wraps `csv::Reader` with whitespace trimming and flexible record lengths, so
/// trailing optional columns may be left off.
pub struct EventReader<R: Read> {
    reader: csv::Reader<R>,
}

impl<R: Read> EventReader<R> {
    pub fn new(source: R) -> Self {
        let reader = csv::ReaderBuilder::new()
            .trim(csv::Trim::All)
            .flexible(true)
            .from_reader(source);
        Self { reader }
    }

    /// Lazily parses events in file order. A bad row yields an error and the
    /// iterator carries on with the next one.
    pub fn events(self) -> impl Iterator<Item = Result<Event>> {
        self.reader
            .into_deserialize::<EventRow>()
            .map(|row| Event::try_from(row.map_err(SettlementError::from)?))
    }
}
