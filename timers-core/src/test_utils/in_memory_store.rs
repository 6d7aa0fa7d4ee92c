use std::collections::HashMap;
use std::sync::RwLock;
use std::time::{Duration, Instant};

use async_trait::async_trait;

use crate::error::TimersError;
use crate::store::TimerStore;

struct Entry {
    score: f64,
    payload: Vec<u8>,
}

/// A `TimerStore` backed by two in-process `RwLock<HashMap<..>>`s: one for
/// timeline entries/payloads, one for lock leases. No TTL sweeping runs in
/// the background — an expired lock is only noticed the next time someone
/// tries to acquire it.
#[derive(Default)]
pub struct InMemoryTimerStore {
    timers: RwLock<HashMap<String, Entry>>,
    locks: RwLock<HashMap<String, Instant>>,
}

impl InMemoryTimerStore {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl TimerStore for InMemoryTimerStore {
    async fn upsert_timer(&self, key: &str, score: f64, payload: Vec<u8>) -> Result<(), TimersError> {
        let mut timers = self.timers.write().expect("lock poisoned");
        timers.insert(key.to_string(), Entry { score, payload });
        Ok(())
    }

    async fn remove_timer(&self, key: &str) -> Result<(), TimersError> {
        let mut timers = self.timers.write().expect("lock poisoned");
        timers.remove(key);
        Ok(())
    }

    async fn due_timers(&self, now: f64, limit: usize) -> Result<Vec<String>, TimersError> {
        let timers = self.timers.read().expect("lock poisoned");
        let mut due: Vec<(&String, f64)> = timers
            .iter()
            .filter(|(_, entry)| entry.score <= now)
            .map(|(key, entry)| (key, entry.score))
            .collect();
        due.sort_by(|a, b| a.1.total_cmp(&b.1));
        Ok(due.into_iter().take(limit).map(|(key, _)| key.clone()).collect())
    }

    async fn get_payload(&self, key: &str) -> Result<Option<Vec<u8>>, TimersError> {
        let timers = self.timers.read().expect("lock poisoned");
        Ok(timers.get(key).map(|entry| entry.payload.clone()))
    }

    async fn snapshot(&self) -> Result<(Vec<String>, HashMap<String, Vec<u8>>), TimersError> {
        let timers = self.timers.read().expect("lock poisoned");
        let mut ordered: Vec<(&String, f64)> = timers.iter().map(|(key, entry)| (key, entry.score)).collect();
        ordered.sort_by(|a, b| a.1.total_cmp(&b.1));
        let keys = ordered.into_iter().map(|(key, _)| key.clone()).collect();
        let payloads = timers.iter().map(|(key, entry)| (key.clone(), entry.payload.clone())).collect();
        Ok((keys, payloads))
    }

    async fn try_acquire_lock(&self, key: &str, ttl: Duration) -> Result<bool, TimersError> {
        let mut locks = self.locks.write().expect("lock poisoned");
        let now = Instant::now();
        if let Some(expires_at) = locks.get(key)
            && *expires_at > now
        {
            return Ok(false);
        }
        locks.insert(key.to_string(), now + ttl);
        Ok(true)
    }

    async fn release_lock(&self, key: &str) -> Result<(), TimersError> {
        let mut locks = self.locks.write().expect("lock poisoned");
        locks.remove(key);
        Ok(())
    }
}
