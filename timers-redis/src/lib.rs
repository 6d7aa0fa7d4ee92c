//! A [`timers_core::TimerStore`] backed by a real Redis-compatible server.
//!
//! The timeline is a sorted set (`ZADD`/`ZRANGEBYSCORE`, scored by
//! activation epoch seconds); payloads are a hash (`HSET`/`HGET`/`HDEL`);
//! locks are plain keys set with `SET key 1 NX PX <ttl_ms>`. Timeline and
//! payload mutations are issued together inside one
//! `redis::pipe().atomic()` transaction, so a reader never observes one
//! half of a `set_timer`/`remove_timer` write without the other.

#![deny(missing_docs)]

use redis::aio::ConnectionManager;
use redis::AsyncCommands;
use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use timers_core::{TimersError, TimerStore};

/// Key names this store uses for the timeline and payloads map.
#[derive(Debug, Clone)]
pub struct RedisKeys {
    /// Sorted-set key for the timeline.
    pub timeline: String,
    /// Hash key for the payloads map.
    pub payloads: String,
}

impl Default for RedisKeys {
    fn default() -> Self {
        Self {
            timeline: "redis_timers:timeline".to_string(),
            payloads: "redis_timers:payloads".to_string(),
        }
    }
}

/// A [`TimerStore`] backed by a Redis (or Redis-protocol-compatible)
/// server, reached through an auto-reconnecting, multiplexed
/// `ConnectionManager`.
pub struct RedisTimerStore {
    manager: ConnectionManager,
    keys: RedisKeys,
}

impl RedisTimerStore {
    /// Connects to `url` (e.g. `redis://127.0.0.1:6379`) using the default
    /// [`RedisKeys`].
    pub async fn connect(url: &str) -> Result<Self, TimersError> {
        Self::connect_with_keys(url, RedisKeys::default()).await
    }

    /// Connects to `url` using the given timeline/payloads key names.
    pub async fn connect_with_keys(url: &str, keys: RedisKeys) -> Result<Self, TimersError> {
        let client = redis::Client::open(url).map_err(store_error)?;
        let manager = client.get_connection_manager().await.map_err(store_error)?;
        Ok(Self { manager, keys })
    }

    fn conn(&self) -> ConnectionManager {
        self.manager.clone()
    }
}

fn store_error(error: redis::RedisError) -> TimersError {
    TimersError::Store(error.to_string())
}

#[async_trait]
impl TimerStore for RedisTimerStore {
    async fn upsert_timer(&self, key: &str, score: f64, payload: Vec<u8>) -> Result<(), TimersError> {
        let mut conn = self.conn();
        redis::pipe()
            .atomic()
            .zadd(&self.keys.timeline, key, score)
            .ignore()
            .hset(&self.keys.payloads, key, payload)
            .ignore()
            .query_async::<()>(&mut conn)
            .await
            .map_err(store_error)
    }

    async fn remove_timer(&self, key: &str) -> Result<(), TimersError> {
        let mut conn = self.conn();
        redis::pipe()
            .atomic()
            .zrem(&self.keys.timeline, key)
            .ignore()
            .hdel(&self.keys.payloads, key)
            .ignore()
            .query_async::<()>(&mut conn)
            .await
            .map_err(store_error)
    }

    async fn due_timers(&self, now: f64, limit: usize) -> Result<Vec<String>, TimersError> {
        let mut conn = self.conn();
        let keys: Vec<String> = conn
            .zrangebyscore_limit(&self.keys.timeline, f64::NEG_INFINITY, now, 0, limit as isize)
            .await
            .map_err(store_error)?;
        Ok(keys)
    }

    async fn get_payload(&self, key: &str) -> Result<Option<Vec<u8>>, TimersError> {
        let mut conn = self.conn();
        let payload: Option<Vec<u8>> = conn.hget(&self.keys.payloads, key).await.map_err(store_error)?;
        Ok(payload)
    }

    async fn snapshot(&self) -> Result<(Vec<String>, HashMap<String, Vec<u8>>), TimersError> {
        let mut conn = self.conn();
        let keys: Vec<String> = conn.zrange(&self.keys.timeline, 0, -1).await.map_err(store_error)?;
        let payloads: HashMap<String, Vec<u8>> =
            conn.hgetall(&self.keys.payloads).await.map_err(store_error)?;
        Ok((keys, payloads))
    }

    async fn try_acquire_lock(&self, key: &str, ttl: Duration) -> Result<bool, TimersError> {
        let mut conn = self.conn();
        let ttl_ms: i64 = ttl.as_millis().try_into().unwrap_or(i64::MAX);
        let acquired: Option<String> = redis::cmd("SET")
            .arg(key)
            .arg(1_u8)
            .arg("NX")
            .arg("PX")
            .arg(ttl_ms)
            .query_async(&mut conn)
            .await
            .map_err(store_error)?;
        Ok(acquired.is_some())
    }

    async fn release_lock(&self, key: &str) -> Result<(), TimersError> {
        let mut conn = self.conn();
        conn.del::<_, ()>(key).await.map_err(store_error)
    }
}
