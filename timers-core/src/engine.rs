//! The dispatch engine: topic table composition, timer mutation, and the
//! bounded-concurrency dispatch tick.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use serde::Serialize;
use tokio::sync::Semaphore;

use crate::config::TimersConfig;
use crate::context::Context;
use crate::error::{HandlerFailure, TimersError};
use crate::lock::{consume_lock, timer_lock};
use crate::router::{HandlerDescriptor, HandlerDispatchError, HandlerDyn, Router};
use crate::store::{composite_key, split_composite_key, TimerStore};

fn now_secs() -> f64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .expect("system clock before the Unix epoch")
        .as_secs_f64()
}

/// The dispatch engine: a topic table plus everything needed to mutate and
/// drain timers against a [`TimerStore`].
pub struct Timers {
    store: Arc<dyn TimerStore>,
    context: Context,
    config: TimersConfig,
    topics: HashMap<String, Arc<dyn HandlerDyn>>,
}

impl Timers {
    /// Builds an engine with default context and configuration and no
    /// registered handlers.
    pub fn new(store: Arc<dyn TimerStore>) -> Self {
        Self {
            store,
            context: Context::default(),
            config: TimersConfig::default(),
            topics: HashMap::new(),
        }
    }

    /// Sets the context handed to every handler invocation.
    #[must_use]
    pub fn with_context(mut self, context: Context) -> Self {
        self.context = context;
        self
    }

    /// Sets the engine's configuration.
    #[must_use]
    pub fn with_config(mut self, config: TimersConfig) -> Self {
        self.config = config;
        self
    }

    /// Folds one router's handlers into the topic table.
    #[must_use]
    pub fn with_router(mut self, router: &Router) -> Self {
        self.include_router(router);
        self
    }

    /// Folds one router's handlers into the topic table. Later
    /// registrations win when two handlers share a topic.
    pub fn include_router(&mut self, router: &Router) {
        for HandlerDescriptor { topic, handler } in router.handlers() {
            self.topics.insert(topic.clone(), Arc::clone(handler));
        }
    }

    /// Folds several routers into the topic table, in order.
    pub fn include_routers<'a>(&mut self, routers: impl IntoIterator<Item = &'a Router>) {
        for router in routers {
            self.include_router(router);
        }
    }

    /// Schedules `payload` to be dispatched to `topic`'s handler after
    /// `activation_period` elapses, replacing any existing timer with the
    /// same `topic`/`timer_id`.
    ///
    /// Fails with [`TimersError::HandlerNotFound`] if `topic` has no
    /// registered handler; the mutation never reaches the store in that
    /// case.
    pub async fn set_timer<P: Serialize + ?Sized>(
        &self,
        topic: &str,
        timer_id: &str,
        payload: &P,
        activation_period: Duration,
    ) -> Result<(), TimersError> {
        if !self.topics.contains_key(topic) {
            return Err(TimersError::HandlerNotFound(topic.to_string()));
        }

        let key = composite_key(topic, timer_id);
        let guard = timer_lock(&self.store, &key, self.config.timer_lock_ttl).await?;

        let bytes = serde_json::to_vec(payload).map_err(|source| TimersError::PayloadDecode {
            key: key.clone(),
            source,
        });
        let result = match bytes {
            Ok(bytes) => {
                let score = now_secs() + activation_period.as_secs_f64();
                self.store.upsert_timer(&key, score, bytes).await
            }
            Err(error) => Err(error),
        };

        guard.release().await;
        result
    }

    /// Removes a timer. Removing a timer that doesn't exist, or whose
    /// topic has no registered handler, is not an error for the latter —
    /// only the former mirrors `set_timer`'s precondition.
    pub async fn remove_timer(&self, topic: &str, timer_id: &str) -> Result<(), TimersError> {
        if !self.topics.contains_key(topic) {
            return Err(TimersError::HandlerNotFound(topic.to_string()));
        }

        let key = composite_key(topic, timer_id);
        let guard = timer_lock(&self.store, &key, self.config.timer_lock_ttl).await?;
        let result = self.store.remove_timer(&key).await;
        guard.release().await;
        result
    }

    /// Returns every timeline key (in score order) alongside the full
    /// payloads map, for diagnostic inspection.
    pub async fn fetch_all_timers(&self) -> Result<(Vec<String>, HashMap<String, Vec<u8>>), TimersError> {
        self.store.snapshot().await
    }

    /// Reads up to `concurrent_processing_limit` due timers and dispatches
    /// each to its topic's handler, bounded to that same width of
    /// in-flight work.
    ///
    /// A tick with `concurrent_processing_limit` set to zero is a no-op.
    /// Handler failures are aggregated into
    /// [`TimersError::HandlersFailed`] once every other due timer has
    /// finished processing; they never cancel sibling dispatches.
    pub async fn handle_ready_timers(&self) -> Result<(), TimersError> {
        let limit = self.config.concurrent_processing_limit;
        if limit == 0 {
            return Ok(());
        }

        let due = self.store.due_timers(now_secs(), limit).await?;
        if due.is_empty() {
            return Ok(());
        }

        let semaphore = Arc::new(Semaphore::new(limit));
        let mut handles = Vec::with_capacity(due.len());

        for key in due {
            let handler = split_composite_key(&key)
                .and_then(|(topic, _timer_id)| self.topics.get(topic))
                .cloned();
            let store = Arc::clone(&self.store);
            let context = self.context.clone();
            let consume_ttl = self.config.consume_lock_ttl;
            let permits = Arc::clone(&semaphore);

            handles.push(tokio::spawn(async move {
                let _permit = permits.acquire_owned().await.expect("semaphore never closes");
                process_one(store, handler, context, key, consume_ttl).await
            }));
        }

        let mut failures = Vec::new();
        for handle in handles {
            match handle.await {
                Ok(Ok(())) => {}
                Ok(Err(failure)) => failures.push(failure),
                Err(join_error) => failures.push(HandlerFailure {
                    composite_key: "<unknown>".to_string(),
                    source: Box::new(join_error),
                }),
            }
        }

        if failures.is_empty() {
            Ok(())
        } else {
            Err(TimersError::HandlersFailed {
                count: failures.len(),
                failures,
            })
        }
    }
}

/// Processes one due composite key: steps (a)-(e) of a dispatch tick.
/// Returns `Err` only when the handler itself failed; every other
/// terminal case (unknown handler, missing payload, undecodable payload,
/// lock contention) is handled in place and reported as `Ok(())`.
async fn process_one(
    store: Arc<dyn TimerStore>,
    handler: Option<Arc<dyn HandlerDyn>>,
    context: Context,
    key: String,
    consume_ttl: Duration,
) -> Result<(), HandlerFailure> {
    let Some(handler) = handler else {
        tracing::info!(timer = %key, "Handler is not found");
        if let Err(error) = store.remove_timer(&key).await {
            tracing::warn!(timer = %key, %error, "failed to drop timer with no registered handler");
        }
        return Ok(());
    };

    let guard = match consume_lock(&store, &key, consume_ttl).await {
        Ok(Some(guard)) => guard,
        Ok(None) => {
            tracing::debug!(timer = %key, "Timer is locked");
            return Ok(());
        }
        Err(error) => {
            tracing::warn!(timer = %key, %error, "failed to acquire consume lock");
            return Ok(());
        }
    };

    let payload = match store.get_payload(&key).await {
        Ok(Some(payload)) => payload,
        Ok(None) => {
            tracing::info!(timer = %key, "No payload found");
            if let Err(error) = store.remove_timer(&key).await {
                tracing::warn!(timer = %key, %error, "failed to drop timer with no payload");
            }
            guard.release().await;
            return Ok(());
        }
        Err(error) => {
            tracing::warn!(timer = %key, %error, "store error fetching payload");
            guard.release().await;
            return Ok(());
        }
    };

    match handler.invoke(&payload, &context).await {
        Ok(()) => {
            if let Err(error) = store.remove_timer(&key).await {
                tracing::warn!(timer = %key, %error, "failed to drop timer after successful dispatch");
            }
            guard.release().await;
            Ok(())
        }
        Err(HandlerDispatchError::Decode(source)) => {
            tracing::info!(timer = %key, error = %source, "Failed to parse payload");
            if let Err(error) = store.remove_timer(&key).await {
                tracing::warn!(timer = %key, %error, "failed to drop timer after decode failure");
            }
            guard.release().await;
            Ok(())
        }
        Err(HandlerDispatchError::Handler(source)) => {
            guard.release().await;
            Err(HandlerFailure {
                composite_key: key,
                source,
            })
        }
    }
}
