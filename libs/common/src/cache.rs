//! Redis module for cross-instance coordination
//!
//! This module provides the Redis connection wrapper and the primitives the
//! distributed advisory locks are built on: set-if-absent with a TTL and an
//! atomic compare-and-delete.

use redis::{AsyncCommands, Client, Script};
use tracing::info;

use crate::error::{DatabaseError, DatabaseResult};

/// Deletes `KEYS[1]` only while it still holds `ARGV[1]`.
const COMPARE_AND_DELETE: &str = r#"
if redis.call("GET", KEYS[1]) == ARGV[1] then
    return redis.call("DEL", KEYS[1])
else
    return 0
end
"#;

/// Resets the TTL of `KEYS[1]` to `ARGV[2]` ms only while it still holds `ARGV[1]`.
const COMPARE_AND_PEXPIRE: &str = r#"
if redis.call("GET", KEYS[1]) == ARGV[1] then
    return redis.call("PEXPIRE", KEYS[1], ARGV[2])
else
    return 0
end
"#;

/// Configuration for Redis connection
#[derive(Debug, Clone)]
pub struct RedisConfig {
    /// Redis connection URL (e.g., "redis://localhost:6379")
    pub url: String,
    /// Prefix prepended to every key written by this workspace
    pub key_prefix: String,
}

impl RedisConfig {
    /// Create a new RedisConfig from environment variables
    ///
    /// # Environment Variables
    /// - `REDIS_URL`: Redis connection URL (default: "redis://localhost:6379")
    /// - `REDIS_KEY_PREFIX`: Key namespace (default: "media-governance")
    pub fn from_env() -> DatabaseResult<Self> {
        let url =
            std::env::var("REDIS_URL").unwrap_or_else(|_| "redis://localhost:6379".to_string());
        let key_prefix =
            std::env::var("REDIS_KEY_PREFIX").unwrap_or_else(|_| "media-governance".to_string());

        if key_prefix.trim().is_empty() {
            return Err(DatabaseError::Configuration(
                "REDIS_KEY_PREFIX must not be empty".to_string(),
            ));
        }

        Ok(RedisConfig { url, key_prefix })
    }
}

/// Redis connection pool
#[derive(Clone)]
pub struct RedisPool {
    client: Client,
    key_prefix: String,
}

impl RedisPool {
    /// Initialize a new Redis client
    pub async fn new(config: &RedisConfig) -> DatabaseResult<Self> {
        let client = Client::open(config.url.clone())?;
        info!("Redis client initialized with URL: {}", config.url);
        Ok(RedisPool {
            client,
            key_prefix: config.key_prefix.clone(),
        })
    }

    /// Get a connection from the pool
    async fn get_connection(&self) -> DatabaseResult<redis::aio::MultiplexedConnection> {
        let conn = self.client.get_multiplexed_async_connection().await?;
        Ok(conn)
    }

    fn namespaced(&self, key: &str) -> String {
        format!("{}:{}", self.key_prefix, key)
    }

    /// Set `key` to `value` only if it does not exist yet, expiring after `ttl_ms`
    ///
    /// Returns `true` when the key was written.
    pub async fn set_if_absent(&self, key: &str, value: &str, ttl_ms: u64) -> DatabaseResult<bool> {
        let mut conn = self.get_connection().await?;
        let reply: Option<String> = redis::cmd("SET")
            .arg(self.namespaced(key))
            .arg(value)
            .arg("NX")
            .arg("PX")
            .arg(ttl_ms)
            .query_async(&mut conn)
            .await?;
        Ok(reply.is_some())
    }

    /// Delete `key` only while it still holds `value`
    ///
    /// Returns `true` when the key was removed.
    pub async fn delete_if_equals(&self, key: &str, value: &str) -> DatabaseResult<bool> {
        let mut conn = self.get_connection().await?;
        let removed: i64 = Script::new(COMPARE_AND_DELETE)
            .key(self.namespaced(key))
            .arg(value)
            .invoke_async(&mut conn)
            .await?;
        Ok(removed == 1)
    }

    /// Push the expiry of `key` to `ttl_ms` from now, only while it still holds `value`
    ///
    /// Returns `false` when the key expired or belongs to someone else.
    pub async fn extend_if_equals(&self, key: &str, value: &str, ttl_ms: u64) -> DatabaseResult<bool> {
        let mut conn = self.get_connection().await?;
        let extended: i64 = Script::new(COMPARE_AND_PEXPIRE)
            .key(self.namespaced(key))
            .arg(value)
            .arg(ttl_ms)
            .invoke_async(&mut conn)
            .await?;
        Ok(extended == 1)
    }

    /// Get a value from Redis by key
    pub async fn get(&self, key: &str) -> DatabaseResult<Option<String>> {
        let mut conn = self.get_connection().await?;
        let value: Option<String> = conn.get(self.namespaced(key)).await?;
        Ok(value)
    }

    /// Check if Redis is reachable
    pub async fn health_check(&self) -> DatabaseResult<bool> {
        let mut conn = self.get_connection().await?;
        let pong: String = redis::cmd("PING").query_async(&mut conn).await?;
        Ok(pong == "PONG")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    fn local_config() -> RedisConfig {
        RedisConfig {
            url: "redis://localhost:6379".to_string(),
            key_prefix: "media-governance-test".to_string(),
        }
    }

    #[tokio::test]
    #[ignore = "requires a running Redis"]
    #[serial]
    async fn test_redis_connection() -> DatabaseResult<()> {
        let pool = RedisPool::new(&local_config()).await?;
        assert!(pool.health_check().await?);
        Ok(())
    }

    #[tokio::test]
    #[ignore = "requires a running Redis"]
    #[serial]
    async fn test_set_if_absent_and_compare_delete() -> DatabaseResult<()> {
        let pool = RedisPool::new(&local_config()).await?;
        let key = "lock-test";

        assert!(pool.set_if_absent(key, "owner-a", 5_000).await?);
        assert!(!pool.set_if_absent(key, "owner-b", 5_000).await?);
        assert_eq!(pool.get(key).await?, Some("owner-a".to_string()));

        // a foreign token must not release the key
        assert!(!pool.delete_if_equals(key, "owner-b").await?);
        assert!(pool.delete_if_equals(key, "owner-a").await?);
        assert_eq!(pool.get(key).await?, None);
        Ok(())
    }

    #[tokio::test]
    #[ignore = "requires a running Redis"]
    #[serial]
    async fn test_extend_only_by_owner() -> DatabaseResult<()> {
        let pool = RedisPool::new(&local_config()).await?;
        let key = "lock-extend-test";

        assert!(pool.set_if_absent(key, "owner-a", 200).await?);
        assert!(!pool.extend_if_equals(key, "owner-b", 5_000).await?);
        assert!(pool.extend_if_equals(key, "owner-a", 5_000).await?);

        tokio::time::sleep(std::time::Duration::from_millis(400)).await;
        assert_eq!(pool.get(key).await?, Some("owner-a".to_string()));

        assert!(pool.delete_if_equals(key, "owner-a").await?);
        assert!(!pool.extend_if_equals(key, "owner-a", 5_000).await?);
        Ok(())
    }
}
