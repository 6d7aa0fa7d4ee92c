//! Error types for the store seam and the dispatch engine.

use thiserror::Error;

/// The error type a handler invocation fails with.
///
/// Handlers are ordinary async functions; whatever error type they return
/// is boxed here so the engine can aggregate failures across a mixed set
/// of topics without knowing their concrete error types.
pub type HandlerError = Box<dyn std::error::Error + Send + Sync>;

/// A single handler's failure during one dispatch tick.
///
/// The timer that produced this failure was *not* removed from the store;
/// it will be retried on a later tick once its consume lock expires.
#[derive(Debug)]
pub struct HandlerFailure {
    /// The composite `"{topic}--{timer_id}"` key that failed.
    pub composite_key: String,
    /// The error the handler returned.
    pub source: HandlerError,
}

impl std::fmt::Display for HandlerFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.composite_key, self.source)
    }
}

/// Errors surfaced by the [`crate::store::TimerStore`] seam and the public
/// [`crate::engine::Timers`] operations built on top of it.
#[non_exhaustive]
#[derive(Debug, Error)]
pub enum TimersError {
    /// `set_timer`/`remove_timer` was called with a topic that has no
    /// registered handler.
    #[error("handler is not found: {0}")]
    HandlerNotFound(String),

    /// A due timer's payload failed to deserialize into its handler's
    /// expected type. The timer is dropped rather than retried, since a
    /// malformed payload will never successfully decode on a later tick.
    #[error("failed to parse payload for {key}: {source}")]
    PayloadDecode {
        /// The composite key whose payload failed to decode.
        key: String,
        /// The underlying deserialization error.
        source: serde_json::Error,
    },

    /// Acquiring a lock stayed contended past the retry budget (for
    /// `timer_lock`) or failed non-blockingly on the first attempt (for
    /// `consume_lock`, which the engine treats as "try again next tick").
    #[error("timer is locked: {0}")]
    LockBusy(String),

    /// An error from the backing store's connection or protocol layer.
    #[error("store error: {0}")]
    Store(String),

    /// A handler returned an error while processing a due timer.
    #[error(transparent)]
    Handler(#[from] HandlerError),

    /// One or more handlers failed during a dispatch tick. The tick still
    /// ran to completion for every other due timer; only the listed keys
    /// were left in place for retry.
    #[error("{count} handler(s) failed during dispatch")]
    HandlersFailed {
        /// Number of handlers that failed (equal to `failures.len()`).
        count: usize,
        /// The individual failures, one per failed composite key.
        failures: Vec<HandlerFailure>,
    },
}
