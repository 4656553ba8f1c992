use crate::domain::lock::FencingToken;
use crate::domain::ports::{Lease, LeaseStore};
use crate::error::Result;
use crate::infrastructure::locks::clock_seed;
use async_trait::async_trait;
use redis::Script;
use redis::aio::ConnectionManager;
use std::time::Duration;
use tracing::{debug, info};

/// Counter every fencing token is drawn from, shared by all lease keys.
pub const FENCE_KEY: &str = "locks:fence";

/// Draws the next token, then takes the lease only if nobody holds it. Both steps run
/// in one script, so tokens follow acquisition order across processes. `%d` keeps
/// clock-seeded tokens out of Lua's exponent notation.
const ACQUIRE: &str = r"
local token = redis.call('INCR', KEYS[2])
if redis.call('SET', KEYS[1], string.format('%s:%d', ARGV[1], token), 'NX', 'PX', ARGV[2]) then
  return token
end
return false
";

/// Deletes the lease only while it still carries the caller's owner and token.
const RELEASE: &str = r"
if redis.call('GET', KEYS[1]) == ARGV[1] then
  return redis.call('DEL', KEYS[1])
end
return 0
";

/// Lease table in Redis, for several service processes sharing one lock backend.
///
/// A lease is a key holding `owner:token` with a `PX` expiry. Tokens come from `INCR`
/// on [`FENCE_KEY`], which `connect` seeds from the wall clock so a fresh Redis never
/// issues tokens below fences already stored in the ledger.
pub struct RedisLeaseStore {
    conn: ConnectionManager,
    acquire: Script,
    release: Script,
}

impl RedisLeaseStore {
    pub async fn connect(url: &str) -> Result<Self> {
        let client = redis::Client::open(url)?;
        let mut conn = ConnectionManager::new(client).await?;

        let _: () = redis::cmd("SET")
            .arg(FENCE_KEY)
            .arg(clock_seed())
            .arg("NX")
            .query_async(&mut conn)
            .await?;
        info!("redis lease store connected");

        Ok(Self::new(conn))
    }

    pub fn new(conn: ConnectionManager) -> Self {
        Self {
            conn,
            acquire: Script::new(ACQUIRE),
            release: Script::new(RELEASE),
        }
    }

    fn value(owner: &str, token: FencingToken) -> String {
        format!("{}:{}", owner, token.0)
    }
}

#[async_trait]
impl LeaseStore for RedisLeaseStore {
    async fn try_acquire(&self, key: &str, owner: &str, ttl: Duration) -> Result<Option<Lease>> {
        let ttl_ms = u64::try_from(ttl.as_millis()).unwrap_or(u64::MAX).max(1);
        let token: Option<u64> = self
            .acquire
            .key(key)
            .key(FENCE_KEY)
            .arg(owner)
            .arg(ttl_ms)
            .invoke_async(&mut self.conn.clone())
            .await?;

        Ok(token.map(|token| {
            debug!(key, owner, token, "redis lease taken");
            Lease {
                key: key.to_string(),
                owner: owner.to_string(),
                token: FencingToken(token),
            }
        }))
    }

    async fn release(&self, lease: &Lease) -> Result<bool> {
        let deleted: i64 = self
            .release
            .key(&lease.key)
            .arg(Self::value(&lease.owner, lease.token))
            .invoke_async(&mut self.conn.clone())
            .await?;
        Ok(deleted == 1)
    }
}
