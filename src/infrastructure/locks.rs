//! The two lock backends behind `LockService`.
//!
//! `LocalLockService` serializes accounts inside one process. `LeaseLockService`
//! coordinates several processes through a shared `LeaseStore`, so a crashed holder
//! only wedges an account until its lease expires.

use crate::domain::account::AccountId;
use crate::domain::lock::{FencingToken, LockGuard};
use crate::domain::ports::{LeaseStore, LockService};
use crate::error::{Result, SettlementError};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{debug, warn};
use uuid::Uuid;

/// In-process lock table: one mutex per account.
///
/// Entries are created lazily and never removed. That is fine while the account set
/// is bounded; an unbounded account population needs an evicting table instead.
///
/// Tokens start from the wall clock in microseconds, so a restarted process over a
/// persistent store still issues tokens above the fences it left behind.
pub struct LocalLockService {
    table: Mutex<HashMap<AccountId, Arc<Mutex<()>>>>,
    acquire_timeout: Duration,
    last_token: AtomicU64,
}

impl LocalLockService {
    pub fn new(acquire_timeout: Duration) -> Self {
        Self {
            table: Mutex::new(HashMap::new()),
            acquire_timeout,
            last_token: AtomicU64::new(clock_seed()),
        }
    }

    async fn mutex_for(&self, account_id: &str) -> Arc<Mutex<()>> {
        let mut table = self.table.lock().await;
        table
            .entry(account_id.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }
}

#[async_trait]
impl LockService for LocalLockService {
    async fn acquire(&self, account_id: &str) -> Result<LockGuard> {
        let mutex = self.mutex_for(account_id).await;
        let held = tokio::time::timeout(self.acquire_timeout, mutex.lock_owned())
            .await
            .map_err(|_| SettlementError::LockTimeout(account_id.to_string()))?;

        let token = FencingToken(self.last_token.fetch_add(1, Ordering::SeqCst) + 1);
        debug!(account_id, fence = %token, "local lock acquired");
        Ok(LockGuard::new(account_id, token, move || drop(held)))
    }
}

pub(crate) fn clock_seed() -> u64 {
    u64::try_from(chrono::Utc::now().timestamp_micros()).unwrap_or(0)
}

/// Lease-based lock for multi-process deployments.
///
/// Acquisition makes `retry_count + 1` attempts spaced `retry_delay` apart and then
/// fails with `LockTimeout` instead of queuing.
pub struct LeaseLockService {
    store: Arc<dyn LeaseStore>,
    owner: String,
    lease: Duration,
    retry_count: u32,
    retry_delay: Duration,
}

impl LeaseLockService {
    pub fn new(
        store: Arc<dyn LeaseStore>,
        lease: Duration,
        retry_count: u32,
        retry_delay: Duration,
    ) -> Self {
        Self {
            store,
            owner: Uuid::new_v4().to_string(),
            lease,
            retry_count,
            retry_delay,
        }
    }

    pub fn owner(&self) -> &str {
        &self.owner
    }

    fn key(account_id: &str) -> String {
        format!("locks:account:{}", account_id)
    }
}

#[async_trait]
impl LockService for LeaseLockService {
    async fn acquire(&self, account_id: &str) -> Result<LockGuard> {
        let key = Self::key(account_id);

        for attempt in 0..=self.retry_count {
            if let Some(lease) = self.store.try_acquire(&key, &self.owner, self.lease).await? {
                let token = lease.token;
                debug!(account_id, fence = %token, attempt, "lease acquired");

                let store = self.store.clone();
                let release = move || {
                    // Drop cannot await; hand the release to the runtime. If no runtime
                    // is left the lease simply expires.
                    if let Ok(handle) = tokio::runtime::Handle::try_current() {
                        handle.spawn(async move {
                            if let Err(e) = store.release(&lease).await {
                                warn!(key = %lease.key, error = %e, "lease release failed");
                            }
                        });
                    }
                };
                return Ok(LockGuard::new(account_id, token, release));
            }

            if attempt < self.retry_count {
                tokio::time::sleep(self.retry_delay).await;
            }
        }

        warn!(account_id, retries = self.retry_count, "lease not acquired");
        Err(SettlementError::LockTimeout(account_id.to_string()))
    }
}
