//! Explicit engine configuration.
//!
//! Kept as a plain struct rather than process-wide mutable settings, so a
//! process can run more than one [`crate::engine::Timers`] engine against
//! different keyspaces or concurrency limits at once.

use std::time::Duration;

/// Configuration for a [`crate::engine::Timers`] engine.
#[derive(Debug, Clone)]
pub struct TimersConfig {
    /// Key (or key prefix) the backing store uses for the timeline.
    pub timeline_key: String,
    /// Key (or key prefix) the backing store uses for the payloads map.
    pub payloads_key: String,
    /// Maximum number of due timers read and dispatched per tick.
    pub concurrent_processing_limit: usize,
    /// TTL for the lock held across a `set_timer`/`remove_timer` mutation.
    pub timer_lock_ttl: Duration,
    /// TTL for the lock held across one handler's dispatch.
    pub consume_lock_ttl: Duration,
}

impl Default for TimersConfig {
    fn default() -> Self {
        Self {
            timeline_key: "redis_timers:timeline".to_string(),
            payloads_key: "redis_timers:payloads".to_string(),
            concurrent_processing_limit: 32,
            timer_lock_ttl: Duration::from_secs(5),
            consume_lock_ttl: Duration::from_secs(30),
        }
    }
}

impl TimersConfig {
    /// Builds a configuration from environment variables, falling back to
    /// [`TimersConfig::default`] values for anything unset or unparsable.
    ///
    /// Reads `TIMERS_TIMELINE_KEY`, `TIMERS_PAYLOADS_KEY`,
    /// `TIMERS_CONCURRENT_PROCESSING_LIMIT`, `TIMERS_TIMER_LOCK_TTL_SECS`,
    /// and `TIMERS_CONSUME_LOCK_TTL_SECS`.
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Ok(value) = std::env::var("TIMERS_TIMELINE_KEY") {
            config.timeline_key = value;
        }
        if let Ok(value) = std::env::var("TIMERS_PAYLOADS_KEY") {
            config.payloads_key = value;
        }
        if let Ok(limit) = std::env::var("TIMERS_CONCURRENT_PROCESSING_LIMIT").and_then(|v| {
            v.parse::<usize>().map_err(|_| std::env::VarError::NotPresent)
        }) {
            config.concurrent_processing_limit = limit;
        }
        if let Ok(secs) = std::env::var("TIMERS_TIMER_LOCK_TTL_SECS").and_then(|v| {
            v.parse::<u64>().map_err(|_| std::env::VarError::NotPresent)
        }) {
            config.timer_lock_ttl = Duration::from_secs(secs);
        }
        if let Ok(secs) = std::env::var("TIMERS_CONSUME_LOCK_TTL_SECS").and_then(|v| {
            v.parse::<u64>().map_err(|_| std::env::VarError::NotPresent)
        }) {
            config.consume_lock_ttl = Duration::from_secs(secs);
        }

        config
    }
}
