//! Advisory, non-blocking locks over the shared store.

use std::sync::Arc;
use std::time::Duration;

use crate::error::TimersError;
use crate::store::TimerStore;

/// A held lock, scoped to release its key on every exit path.
///
/// Call [`LockGuard::release`] to release deterministically. If the guard
/// is dropped without an explicit release (an early return, a panic), it
/// falls back to spawning a best-effort release on the current Tokio
/// runtime; a failure there is logged, never propagated, matching the
/// store's own "release is best-effort" contract.
pub struct LockGuard {
    store: Arc<dyn TimerStore>,
    key: String,
    released: bool,
}

impl LockGuard {
    /// Releases the lock, awaiting the store's confirmation. A store error
    /// on release is logged and swallowed rather than returned, since the
    /// lock's TTL bounds how long a failed release can matter.
    pub async fn release(mut self) {
        self.release_inner().await;
    }

    async fn release_inner(&mut self) {
        if self.released {
            return;
        }
        self.released = true;
        if let Err(error) = self.store.release_lock(&self.key).await {
            tracing::warn!(lock = %self.key, %error, "failed to release lock");
        }
    }
}

impl Drop for LockGuard {
    fn drop(&mut self) {
        if self.released {
            return;
        }
        self.released = true;
        let store = Arc::clone(&self.store);
        let key = self.key.clone();
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn(async move {
                    if let Err(error) = store.release_lock(&key).await {
                        tracing::warn!(lock = %key, %error, "failed to release lock on drop");
                    }
                });
            }
            Err(_) => {
                tracing::warn!(lock = %key, "lock guard dropped outside a Tokio runtime, key left to expire via TTL");
            }
        }
    }
}

async fn acquire(
    store: &Arc<dyn TimerStore>,
    lock_key: String,
    ttl: Duration,
) -> Result<Option<LockGuard>, TimersError> {
    if store.try_acquire_lock(&lock_key, ttl).await? {
        Ok(Some(LockGuard {
            store: Arc::clone(store),
            key: lock_key,
            released: false,
        }))
    } else {
        Ok(None)
    }
}

/// Acquires the lock guarding a `set_timer`/`remove_timer` mutation on
/// `composite_key`. Retries a bounded number of times on contention before
/// giving up with `TimersError::LockBusy`, since replacement/removal calls
/// are expected to succeed rather than be skipped.
pub async fn timer_lock(
    store: &Arc<dyn TimerStore>,
    composite_key: &str,
    ttl: Duration,
) -> Result<LockGuard, TimersError> {
    let lock_key = format!("lock:{composite_key}");
    const MAX_ATTEMPTS: u32 = 20;
    const RETRY_DELAY: Duration = Duration::from_millis(25);

    for attempt in 0..MAX_ATTEMPTS {
        if let Some(guard) = acquire(store, lock_key.clone(), ttl).await? {
            return Ok(guard);
        }
        if attempt + 1 < MAX_ATTEMPTS {
            tokio::time::sleep(RETRY_DELAY).await;
        }
    }
    Err(TimersError::LockBusy(composite_key.to_string()))
}

/// Acquires the lock guarding one handler's dispatch of `composite_key`.
/// Non-blocking: returns `Ok(None)` immediately on contention rather than
/// retrying, since a timer left locked will simply be retried next tick.
pub async fn consume_lock(
    store: &Arc<dyn TimerStore>,
    composite_key: &str,
    ttl: Duration,
) -> Result<Option<LockGuard>, TimersError> {
    let lock_key = format!("lock:{composite_key}");
    acquire(store, lock_key, ttl).await
}
