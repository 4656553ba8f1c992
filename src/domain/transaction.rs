use super::account::{AccountId, Amount, Balance};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Caller-supplied, globally unique transaction identifier.
pub type TxnId = String;

#[derive(Debug, Serialize, Deserialize, PartialEq, Eq, Clone, Copy)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    In,
    Out,
}

/// Status of a transaction record.
///
/// `Success` and `Failed` are terminal and are written at most once. `Reconciling`
/// is neither pending nor terminal: the outcome of an external call is unknown.
#[derive(Debug, Serialize, Deserialize, PartialEq, Eq, Clone, Copy)]
pub enum TxnStatus {
    Pending,
    Success,
    Failed,
    Reconciling,
}

impl TxnStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, TxnStatus::Success | TxnStatus::Failed)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            TxnStatus::Pending => "Pending",
            TxnStatus::Success => "Success",
            TxnStatus::Failed => "Failed",
            TxnStatus::Reconciling => "Reconciling",
        }
    }
}

/// Position of an outbound payout in its saga.
#[derive(Debug, Serialize, Deserialize, PartialEq, Eq, Clone, Copy)]
pub enum PayoutStage {
    Requested,
    Reserved,
    Finalized,
    Compensated,
    Reconciling,
}

/// A payment initiated by the panel or a payout requested through it.
#[derive(Debug, Serialize, Deserialize, PartialEq, Clone)]
pub struct TransactionRecord {
    pub txn_id: TxnId,
    pub account_id: AccountId,
    pub amount: Amount,
    pub fee: Balance,
    pub direction: Direction,
    pub status: TxnStatus,
    /// Only set for outbound payouts.
    #[serde(default)]
    pub stage: Option<PayoutStage>,
    #[serde(default)]
    pub reference: Option<String>,
    #[serde(default)]
    pub failure_reason: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl TransactionRecord {
    pub fn pending(
        txn_id: impl Into<TxnId>,
        account_id: impl Into<AccountId>,
        amount: Amount,
        fee: Balance,
        direction: Direction,
    ) -> Self {
        let now = Utc::now();
        Self {
            txn_id: txn_id.into(),
            account_id: account_id.into(),
            amount,
            fee,
            direction,
            status: TxnStatus::Pending,
            stage: match direction {
                Direction::Out => Some(PayoutStage::Requested),
                Direction::In => None,
            },
            reference: None,
            failure_reason: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Amount plus fee, the total a payout takes out of the wallet.
    pub fn gross(&self) -> Balance {
        Balance::from(self.amount) + self.fee
    }

    /// Amount minus fee, the total a pay-in adds to the wallet.
    pub fn net(&self) -> Balance {
        Balance::from(self.amount) - self.fee
    }
}

/// The change a conditional transition applies to a record.
#[derive(Debug, Clone, PartialEq)]
pub struct StatusPatch {
    pub status: TxnStatus,
    pub stage: Option<PayoutStage>,
    pub reference: Option<String>,
    pub failure_reason: Option<String>,
}

impl StatusPatch {
    pub fn to(status: TxnStatus) -> Self {
        Self {
            status,
            stage: None,
            reference: None,
            failure_reason: None,
        }
    }

    pub fn stage(mut self, stage: PayoutStage) -> Self {
        self.stage = Some(stage);
        self
    }

    pub fn reference(mut self, reference: Option<String>) -> Self {
        self.reference = reference;
        self
    }

    pub fn failure_reason(mut self, reason: impl Into<String>) -> Self {
        self.failure_reason = Some(reason.into());
        self
    }

    /// Applies the patch to `record`, keeping fields the patch leaves unset.
    pub fn apply(&self, record: &mut TransactionRecord) {
        record.status = self.status;
        if self.stage.is_some() {
            record.stage = self.stage;
        }
        if self.reference.is_some() {
            record.reference = self.reference.clone();
        }
        if self.failure_reason.is_some() {
            record.failure_reason = self.failure_reason.clone();
        }
        record.updated_at = Utc::now();
    }
}

/// A conditional transition: applies `patch` only while the record is in `from`.
#[derive(Debug, Clone, PartialEq)]
pub struct Transition {
    pub txn_id: TxnId,
    pub from: TxnStatus,
    pub patch: StatusPatch,
}

#[derive(Debug, Deserialize, Serialize, PartialEq, Eq, Clone, Copy)]
#[serde(rename_all = "lowercase")]
pub enum CallbackStatus {
    Success,
    Failed,
}

/// Inbound provider callback.
#[derive(Debug, Deserialize, Serialize, PartialEq, Clone)]
pub struct Callback {
    #[serde(rename = "txnId")]
    pub txn_id: TxnId,
    pub status: CallbackStatus,
    #[serde(default)]
    pub reference: Option<String>,
    #[serde(default)]
    pub message: Option<String>,
}

impl Callback {
    /// The terminal patch this callback resolves a pending record to.
    pub fn resolution(&self) -> StatusPatch {
        match self.status {
            CallbackStatus::Success => {
                StatusPatch::to(TxnStatus::Success).reference(self.reference.clone())
            }
            CallbackStatus::Failed => StatusPatch::to(TxnStatus::Failed).failure_reason(
                self.message
                    .clone()
                    .unwrap_or_else(|| "Payment failed".to_string()),
            ),
        }
    }
}
