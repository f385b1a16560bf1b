//! Advisory locks keyed by entity
//!
//! Locks here are advisory: they serialize administrative operations that
//! opt in (migrations out of the same source type) and nothing else.
//! [`LocalLocks`] covers a single process, [`RedisLocks`] covers every
//! instance sharing a Redis.

use async_trait::async_trait;
use common::cache::RedisPool;
use rand::Rng;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, OwnedMutexGuard};
use tokio::time::{Instant, sleep, timeout};
use tracing::{debug, warn};

use crate::error::{GovernanceError, GovernanceResult};

/// Held lock; hand it back to the lock that issued it
#[derive(Debug)]
pub struct LockLease {
    key: String,
    token: String,
    _guard: Option<OwnedMutexGuard<()>>,
}

impl LockLease {
    pub fn key(&self) -> &str {
        &self.key
    }
}

#[async_trait]
pub trait AdvisoryLock: Send + Sync {
    /// Wait for `key` to become free and take it
    async fn acquire(&self, key: &str) -> GovernanceResult<LockLease>;

    /// Confirm `lease` is still held and keep it alive for another TTL
    ///
    /// Fails with [`GovernanceError::Lock`] once the lease has been lost, in
    /// which case the holder must stop working under it.
    async fn extend(&self, lease: &LockLease) -> GovernanceResult<()>;

    async fn release(&self, lease: LockLease) -> GovernanceResult<()>;
}

/// In-process locks backed by one `tokio` mutex per key
#[derive(Clone)]
pub struct LocalLocks {
    locks: Arc<Mutex<HashMap<String, Arc<Mutex<()>>>>>,
    wait: Duration,
}

impl LocalLocks {
    pub fn new(wait: Duration) -> Self {
        Self {
            locks: Arc::new(Mutex::new(HashMap::new())),
            wait,
        }
    }
}

#[async_trait]
impl AdvisoryLock for LocalLocks {
    async fn acquire(&self, key: &str) -> GovernanceResult<LockLease> {
        let lock = {
            let mut locks = self.locks.lock().await;
            locks
                .entry(key.to_string())
                .or_insert_with(|| Arc::new(Mutex::new(())))
                .clone()
        };

        let guard = timeout(self.wait, lock.lock_owned())
            .await
            .map_err(|_| GovernanceError::Lock(format!("Timed out waiting for lock '{}'", key)))?;

        debug!("Acquired local lock '{}'", key);
        Ok(LockLease {
            key: key.to_string(),
            token: String::new(),
            _guard: Some(guard),
        })
    }

    async fn extend(&self, _lease: &LockLease) -> GovernanceResult<()> {
        // the guard inside the lease holds the mutex; it cannot expire
        Ok(())
    }

    async fn release(&self, lease: LockLease) -> GovernanceResult<()> {
        let key = lease.key.clone();
        drop(lease);

        // forget keys nobody holds or waits on
        let mut locks = self.locks.lock().await;
        if locks
            .get(&key)
            .is_some_and(|lock| Arc::strong_count(lock) == 1)
        {
            locks.remove(&key);
        }
        debug!("Released local lock '{}'", key);
        Ok(())
    }
}

/// Cross-instance locks stored in Redis with a TTL
#[derive(Clone)]
pub struct RedisLocks {
    pool: RedisPool,
    ttl: Duration,
    wait: Duration,
    poll_interval: Duration,
}

impl RedisLocks {
    pub fn new(pool: RedisPool, ttl: Duration, wait: Duration) -> Self {
        Self {
            pool,
            ttl,
            wait,
            poll_interval: Duration::from_millis(100),
        }
    }

    fn lock_key(key: &str) -> String {
        format!("lock:{}", key)
    }

    fn ttl_ms(&self) -> u64 {
        self.ttl.as_millis().max(1) as u64
    }
}

#[async_trait]
impl AdvisoryLock for RedisLocks {
    async fn acquire(&self, key: &str) -> GovernanceResult<LockLease> {
        let token = format!("{:032x}", rand::thread_rng().r#gen::<u128>());
        let redis_key = Self::lock_key(key);
        let ttl_ms = self.ttl_ms();
        let deadline = Instant::now() + self.wait;

        loop {
            if self.pool.set_if_absent(&redis_key, &token, ttl_ms).await? {
                debug!("Acquired redis lock '{}'", key);
                return Ok(LockLease {
                    key: key.to_string(),
                    token,
                    _guard: None,
                });
            }
            if Instant::now() >= deadline {
                return Err(GovernanceError::Lock(format!(
                    "Timed out waiting for lock '{}'",
                    key
                )));
            }
            sleep(self.poll_interval).await;
        }
    }

    async fn extend(&self, lease: &LockLease) -> GovernanceResult<()> {
        let extended = self
            .pool
            .extend_if_equals(&Self::lock_key(&lease.key), &lease.token, self.ttl_ms())
            .await?;
        if !extended {
            warn!("Lock '{}' was lost before it could be extended", lease.key);
            return Err(GovernanceError::Lock(format!(
                "Lease on '{}' expired or was taken over",
                lease.key
            )));
        }
        debug!("Extended redis lock '{}'", lease.key);
        Ok(())
    }

    async fn release(&self, lease: LockLease) -> GovernanceResult<()> {
        let released = self
            .pool
            .delete_if_equals(&Self::lock_key(&lease.key), &lease.token)
            .await?;
        if !released {
            warn!(
                "Lock '{}' expired before it was released; another holder may have taken it",
                lease.key
            );
        }
        Ok(())
    }
}
