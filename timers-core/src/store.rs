//! The storage seam the dispatch engine is built on.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;

use crate::error::TimersError;

/// Shared, distributed state backing the dispatch engine: a timeline
/// (composite key -> activation score), a payloads map (composite key ->
/// raw JSON bytes), and advisory locks keyed by arbitrary strings.
///
/// Implementations are expected to make `upsert_timer` and `remove_timer`
/// atomic with respect to both the timeline and payloads map — a reader
/// must never observe a timeline entry with no payload, or vice versa,
/// except transiently while a `handle_ready_timers` tick is mid-dispatch
/// (which removes both as a single follow-up call, see
/// [`crate::engine::Timers::handle_ready_timers`]).
#[async_trait]
pub trait TimerStore: Send + Sync {
    /// Writes a timeline entry and its payload for `key`, replacing any
    /// existing entry under the same key.
    async fn upsert_timer(&self, key: &str, score: f64, payload: Vec<u8>) -> Result<(), TimersError>;

    /// Removes `key` from both the timeline and the payloads map. A
    /// missing key is not an error.
    async fn remove_timer(&self, key: &str) -> Result<(), TimersError>;

    /// Returns up to `limit` composite keys scored at or below `now`, in
    /// ascending score order.
    async fn due_timers(&self, now: f64, limit: usize) -> Result<Vec<String>, TimersError>;

    /// Returns the raw payload bytes for `key`, or `None` if absent.
    async fn get_payload(&self, key: &str) -> Result<Option<Vec<u8>>, TimersError>;

    /// Returns every timeline key (in score order) alongside the full
    /// payloads map, for diagnostic inspection.
    async fn snapshot(&self) -> Result<(Vec<String>, HashMap<String, Vec<u8>>), TimersError>;

    /// Attempts to set `key` to a held state with the given TTL, failing
    /// non-blockingly (returning `Ok(false)`) if it is already held.
    async fn try_acquire_lock(&self, key: &str, ttl: Duration) -> Result<bool, TimersError>;

    /// Releases `key`. A release of a key that isn't held, or has already
    /// expired, is not an error.
    async fn release_lock(&self, key: &str) -> Result<(), TimersError>;
}

/// Builds the composite key `"{topic}--{timer_id}"` used throughout the
/// timeline and payloads map.
pub fn composite_key(topic: &str, timer_id: &str) -> String {
    format!("{topic}--{timer_id}")
}

/// Splits a composite key back into its topic and timer id, on the first
/// `--` separator. Behavior is unspecified if `topic` or `timer_id`
/// themselves contain `--`.
pub fn split_composite_key(key: &str) -> Option<(&str, &str)> {
    key.split_once("--")
}
