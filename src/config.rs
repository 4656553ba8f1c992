//! Runtime configuration, loaded from a JSON file.
//!
//! ```json
//! {
//!   "locks": { "strategy": "lease", "redis_url": "redis://127.0.0.1/", "lease_ms": 8000 },
//!   "provider_timeout_ms": 30000,
//!   "notifications": { "endpoint": "https://panel.example/hooks", "max_attempts": 3 },
//!   "payin_fees": [ { "lower_bound": "0", "upper_bound": null, "charge_type": "flat", "value": "5" } ],
//!   "accounts": [ { "id": "acc-1", "min_balance": "100", "opening_balance": "1000" } ]
//! }
//! ```
//!
//! Every field is optional; missing sections take their defaults.

use crate::application::notifier::NotificationDispatcher;
use crate::domain::account::{AccountId, Balance};
use crate::domain::fee::{FeeSchedule, FeeTier};
use crate::domain::ports::{LockServiceRef, NotifierRef};
use crate::error::{Result, SettlementError};
use crate::infrastructure::locks::{LeaseLockService, LocalLockService};
use crate::infrastructure::redis::RedisLeaseStore;
use crate::infrastructure::webhook::{LogNotifier, WebhookNotifier};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LockStrategy {
    #[default]
    Local,
    Lease,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LockConfig {
    pub strategy: LockStrategy,
    /// Lease backend shared by every process. Required by the lease strategy.
    pub redis_url: Option<String>,
    pub lease_ms: u64,
    pub retry_count: u32,
    pub retry_delay_ms: u64,
    pub acquire_timeout_ms: u64,
}

impl Default for LockConfig {
    fn default() -> Self {
        Self {
            strategy: LockStrategy::Local,
            redis_url: None,
            lease_ms: 8000,
            retry_count: 2,
            retry_delay_ms: 1000,
            acquire_timeout_ms: 8000,
        }
    }
}

impl LockConfig {
    /// Builds the configured lock backend. The lease strategy connects to `redis_url`.
    pub async fn build(&self) -> Result<LockServiceRef> {
        match self.strategy {
            LockStrategy::Local => Ok(Arc::new(LocalLockService::new(Duration::from_millis(
                self.acquire_timeout_ms,
            )))),
            LockStrategy::Lease => {
                let url = self.redis_url.as_deref().ok_or_else(|| {
                    SettlementError::Validation(
                        "locks.redis_url is required by the lease strategy".to_string(),
                    )
                })?;
                let store = RedisLeaseStore::connect(url).await?;
                Ok(Arc::new(LeaseLockService::new(
                    Arc::new(store),
                    Duration::from_millis(self.lease_ms),
                    self.retry_count,
                    Duration::from_millis(self.retry_delay_ms),
                )))
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NotificationConfig {
    /// Webhook URL. Without one, events go to the log.
    pub endpoint: Option<String>,
    pub max_attempts: u32,
    pub retry_delay_ms: u64,
    pub timeout_ms: u64,
}

impl Default for NotificationConfig {
    fn default() -> Self {
        Self {
            endpoint: None,
            max_attempts: 3,
            retry_delay_ms: 500,
            timeout_ms: 5000,
        }
    }
}

impl NotificationConfig {
    pub fn build(&self) -> Result<NotificationDispatcher> {
        let notifier: NotifierRef = match &self.endpoint {
            Some(endpoint) => Arc::new(WebhookNotifier::new(
                endpoint.clone(),
                Duration::from_millis(self.timeout_ms),
            )?),
            None => Arc::new(LogNotifier),
        };
        Ok(NotificationDispatcher::new(
            notifier,
            self.max_attempts,
            Duration::from_millis(self.retry_delay_ms),
        ))
    }
}

/// An account created at startup.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AccountSeed {
    pub id: AccountId,
    #[serde(default)]
    pub min_balance: Balance,
    #[serde(default)]
    pub opening_balance: Balance,
    #[serde(default)]
    pub payin_fees: Option<FeeSchedule>,
    #[serde(default)]
    pub payout_fees: Option<FeeSchedule>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub locks: LockConfig,
    pub provider_timeout_ms: u64,
    pub notifications: NotificationConfig,
    pub payin_fees: FeeSchedule,
    pub payout_fees: FeeSchedule,
    pub accounts: Vec<AccountSeed>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            locks: LockConfig::default(),
            provider_timeout_ms: 30_000,
            notifications: NotificationConfig::default(),
            payin_fees: free(),
            payout_fees: free(),
            accounts: Vec::new(),
        }
    }
}

fn free() -> FeeSchedule {
    FeeSchedule::new(vec![FeeTier::flat(Decimal::ZERO, None, Decimal::ZERO)])
}

impl Config {
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&content)?)
    }

    pub fn provider_timeout(&self) -> Duration {
        Duration::from_millis(self.provider_timeout_ms)
    }

    /// Pay-in schedule for `account_id`: its own override, else the default.
    pub fn payin_fees_for(&self, account_id: &str) -> &FeeSchedule {
        self.seed(account_id)
            .and_then(|seed| seed.payin_fees.as_ref())
            .unwrap_or(&self.payin_fees)
    }

    pub fn payout_fees_for(&self, account_id: &str) -> &FeeSchedule {
        self.seed(account_id)
            .and_then(|seed| seed.payout_fees.as_ref())
            .unwrap_or(&self.payout_fees)
    }

    fn seed(&self, account_id: &str) -> Option<&AccountSeed> {
        self.accounts.iter().find(|seed| seed.id == account_id)
    }
}
