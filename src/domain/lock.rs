use super::account::AccountId;
use super::ports::LockService;
use crate::error::Result;
use std::fmt;
use std::future::Future;

/// Monotonic token handed out with every lock acquisition.
///
/// The ledger rejects writes carrying a token lower than one the account already
/// accepted, so a holder whose lease expired cannot overwrite a newer holder.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct FencingToken(pub u64);

impl fmt::Display for FencingToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

type Release = Box<dyn FnOnce() + Send + Sync>;

/// Proof of exclusive access to one account.
///
/// Dropping the guard releases the lock, which covers success, error and a dropped
/// future alike.
pub struct LockGuard {
    account_id: AccountId,
    token: FencingToken,
    release: Option<Release>,
}

impl LockGuard {
    pub fn new(
        account_id: impl Into<AccountId>,
        token: FencingToken,
        release: impl FnOnce() + Send + Sync + 'static,
    ) -> Self {
        Self {
            account_id: account_id.into(),
            token,
            release: Some(Box::new(release)),
        }
    }

    pub fn account_id(&self) -> &str {
        &self.account_id
    }

    pub fn token(&self) -> FencingToken {
        self.token
    }
}

impl fmt::Debug for LockGuard {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LockGuard")
            .field("account_id", &self.account_id)
            .field("token", &self.token)
            .finish()
    }
}

impl Drop for LockGuard {
    fn drop(&mut self) {
        if let Some(release) = self.release.take() {
            release();
        }
    }
}

/// Runs `f` while holding `account_id`'s lock.
///
/// `f` owns the guard and must move it into the future it returns; the lock is then
/// released when that future completes, fails or is dropped.
pub async fn with_lock<F, Fut, T>(locks: &dyn LockService, account_id: &str, f: F) -> Result<T>
where
    F: FnOnce(LockGuard) -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let guard = locks.acquire(account_id).await?;
    f(guard).await
}
