use crate::domain::ports::{PayoutInstruction, PayoutProvider, ProviderError, ProviderOutcome};
use crate::domain::transaction::TxnId;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};

/// Scripted behaviour for one payout.
#[derive(Debug, Clone, PartialEq)]
pub enum ScriptedOutcome {
    Success { reference: Option<String> },
    Failure { reason: String },
    /// The provider accepts the call and never answers.
    Timeout,
}

/// A payout provider that replays scripted answers per `txn_id`.
///
/// Drives the CLI replay and the tests. An instruction with no script is treated as a
/// transport error, which the saga parks for reconciliation.
#[derive(Default)]
pub struct ScriptedProvider {
    script: Mutex<HashMap<TxnId, ScriptedOutcome>>,
    calls: AtomicUsize,
}

impl ScriptedProvider {
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the answer for `txn_id`, replacing any previous one.
    pub fn script(&self, txn_id: impl Into<TxnId>, outcome: ScriptedOutcome) {
        if let Ok(mut script) = self.script.lock() {
            script.insert(txn_id.into(), outcome);
        }
    }

    /// Number of `execute` calls received so far.
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    fn outcome_for(&self, txn_id: &str) -> Option<ScriptedOutcome> {
        self.script
            .lock()
            .ok()
            .and_then(|script| script.get(txn_id).cloned())
    }
}

#[async_trait]
impl PayoutProvider for ScriptedProvider {
    async fn execute(
        &self,
        instruction: &PayoutInstruction,
    ) -> Result<ProviderOutcome, ProviderError> {
        self.calls.fetch_add(1, Ordering::SeqCst);

        match self.outcome_for(&instruction.txn_id) {
            Some(ScriptedOutcome::Success { reference }) => Ok(ProviderOutcome::Success { reference }),
            Some(ScriptedOutcome::Failure { reason }) => Ok(ProviderOutcome::Failure { reason }),
            Some(ScriptedOutcome::Timeout) => std::future::pending().await,
            None => Err(ProviderError(format!(
                "no route for payout {}",
                instruction.txn_id
            ))),
        }
    }
}
