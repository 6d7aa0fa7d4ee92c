//! Scheduling and dispatch engine for a distributed delayed-task
//! dispatcher.
//!
//! A [`Timers`] engine schedules payloads against topics (registered
//! through [`Router`]) to be activated after a delay and dispatched to
//! that topic's handler, backed by any [`TimerStore`] implementation —
//! typically a shared, networked store so that multiple processes can
//! set, remove, and drain the same timers. This crate defines the
//! protocol; `timers-redis` is one concrete store.
//!
//! The moving pieces:
//!
//! - [`store::TimerStore`] — the I/O seam: a timeline, a payloads map, and
//!   advisory locks.
//! - [`router::Router`] — builds up a topic's handler registrations;
//!   several routers compose into one engine's topic table.
//! - [`engine::Timers`] — `set_timer`/`remove_timer`/`fetch_all_timers`,
//!   and the bounded-concurrency `handle_ready_timers` dispatch tick.
//! - [`context::Context`] — the opaque value handed to every handler call.

#![deny(missing_docs)]

mod config;
mod context;
mod engine;
mod error;
mod lock;
mod router;
mod store;

#[cfg(feature = "test-utils")]
pub mod test_utils;

pub use config::TimersConfig;
pub use context::Context;
pub use engine::Timers;
pub use error::{HandlerError, HandlerFailure, TimersError};
pub use lock::{consume_lock, timer_lock, LockGuard};
pub use router::{HandlerDescriptor, Router};
pub use store::{composite_key, split_composite_key, TimerStore};

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use serde::{Deserialize, Serialize};

    use crate::test_utils::InMemoryTimerStore;
    use crate::{Router, Timers, TimersConfig, TimersError};

    #[derive(Debug, Serialize, Deserialize, PartialEq, Eq)]
    struct Ping {
        message: String,
    }

    fn engine_with(router: &Router) -> Timers {
        let store: Arc<dyn crate::TimerStore> = Arc::new(InMemoryTimerStore::new());
        Timers::new(store).with_router(router)
    }

    #[tokio::test]
    async fn set_then_remove_round_trips_through_fetch_all_timers() {
        let mut router = Router::new();
        router.handler("ping", |_payload: Ping, _ctx| async { Ok(()) });
        let engine = engine_with(&router);

        engine
            .set_timer("ping", "t1", &Ping { message: "hi".into() }, Duration::from_secs(60))
            .await
            .unwrap();

        let (keys, payloads) = engine.fetch_all_timers().await.unwrap();
        assert_eq!(keys, vec!["ping--t1".to_string()]);
        assert_eq!(payloads.len(), 1);

        engine.remove_timer("ping", "t1").await.unwrap();
        let (keys, payloads) = engine.fetch_all_timers().await.unwrap();
        assert!(keys.is_empty());
        assert!(payloads.is_empty());
    }

    #[tokio::test]
    async fn set_timer_rejects_unknown_topic() {
        let router = Router::new();
        let engine = engine_with(&router);

        let result = engine
            .set_timer("missing", "t1", &Ping { message: "hi".into() }, Duration::from_secs(60))
            .await;

        assert!(matches!(result, Err(TimersError::HandlerNotFound(topic)) if topic == "missing"));
    }

    #[tokio::test]
    async fn immediately_due_timer_dispatches_on_next_tick() {
        let calls: Arc<std::sync::Mutex<Vec<Ping>>> = Arc::new(std::sync::Mutex::new(Vec::new()));
        let recorded = Arc::clone(&calls);

        let mut router = Router::new();
        router.handler("ping", move |payload: Ping, _ctx| {
            let recorded = Arc::clone(&recorded);
            async move {
                recorded.lock().unwrap().push(payload);
                Ok(())
            }
        });
        let engine = engine_with(&router);

        engine
            .set_timer("ping", "t1", &Ping { message: "hi".into() }, Duration::from_secs(0))
            .await
            .unwrap();

        engine.handle_ready_timers().await.unwrap();

        assert_eq!(calls.lock().unwrap().as_slice(), &[Ping { message: "hi".into() }]);
        let (keys, _) = engine.fetch_all_timers().await.unwrap();
        assert!(keys.is_empty(), "dispatched timer should be removed from the timeline");
    }

    #[tokio::test]
    async fn duplicate_set_timer_replaces_the_earlier_one() {
        let calls: Arc<std::sync::Mutex<Vec<Ping>>> = Arc::new(std::sync::Mutex::new(Vec::new()));
        let recorded = Arc::clone(&calls);

        let mut router = Router::new();
        router.handler("ping", move |payload: Ping, _ctx| {
            let recorded = Arc::clone(&recorded);
            async move {
                recorded.lock().unwrap().push(payload);
                Ok(())
            }
        });
        let engine = engine_with(&router);

        engine
            .set_timer("ping", "t1", &Ping { message: "first".into() }, Duration::from_secs(0))
            .await
            .unwrap();
        engine
            .set_timer("ping", "t1", &Ping { message: "second".into() }, Duration::from_secs(0))
            .await
            .unwrap();

        engine.handle_ready_timers().await.unwrap();

        assert_eq!(calls.lock().unwrap().as_slice(), &[Ping { message: "second".into() }]);
    }

    #[tokio::test]
    async fn handler_not_yet_due_is_left_untouched() {
        let mut router = Router::new();
        router.handler("ping", |_payload: Ping, _ctx| async { Ok(()) });
        let engine = engine_with(&router);

        engine
            .set_timer("ping", "t1", &Ping { message: "hi".into() }, Duration::from_secs(3600))
            .await
            .unwrap();

        engine.handle_ready_timers().await.unwrap();

        let (keys, _) = engine.fetch_all_timers().await.unwrap();
        assert_eq!(keys, vec!["ping--t1".to_string()]);
    }

    #[tokio::test]
    async fn handler_failure_is_aggregated_and_timer_survives() {
        let mut router = Router::new();
        router.handler("ping", |_payload: Ping, _ctx| async {
            Err(Box::<dyn std::error::Error + Send + Sync>::from("boom"))
        });
        let engine = engine_with(&router);

        engine
            .set_timer("ping", "t1", &Ping { message: "hi".into() }, Duration::from_secs(0))
            .await
            .unwrap();

        let result = engine.handle_ready_timers().await;
        match result {
            Err(TimersError::HandlersFailed { count, failures }) => {
                assert_eq!(count, 1);
                assert_eq!(failures[0].composite_key, "ping--t1");
            }
            other => panic!("expected HandlersFailed, got {other:?}"),
        }

        let (keys, _) = engine.fetch_all_timers().await.unwrap();
        assert_eq!(keys, vec!["ping--t1".to_string()], "failed handler's timer should not be removed");
    }

    #[tokio::test]
    async fn zero_concurrency_limit_is_a_no_op() {
        let mut router = Router::new();
        router.handler("ping", |_payload: Ping, _ctx| async { Ok(()) });
        let engine = engine_with(&router).with_config(TimersConfig {
            concurrent_processing_limit: 0,
            ..TimersConfig::default()
        });

        engine
            .set_timer("ping", "t1", &Ping { message: "hi".into() }, Duration::from_secs(0))
            .await
            .unwrap();

        engine.handle_ready_timers().await.unwrap();

        let (keys, _) = engine.fetch_all_timers().await.unwrap();
        assert_eq!(keys, vec!["ping--t1".to_string()], "a zero-width tick must not dispatch anything");
    }

    #[tokio::test]
    async fn two_due_topics_both_dispatch_in_one_tick() {
        let calls: Arc<std::sync::Mutex<Vec<String>>> = Arc::new(std::sync::Mutex::new(Vec::new()));

        let mut router = Router::new();
        for topic in ["alpha", "beta"] {
            let recorded = Arc::clone(&calls);
            router.handler(topic, move |payload: Ping, _ctx| {
                let recorded = Arc::clone(&recorded);
                async move {
                    recorded.lock().unwrap().push(payload.message);
                    Ok(())
                }
            });
        }
        let engine = engine_with(&router);

        engine
            .set_timer("alpha", "t1", &Ping { message: "alpha".into() }, Duration::from_secs(0))
            .await
            .unwrap();
        engine
            .set_timer("beta", "t1", &Ping { message: "beta".into() }, Duration::from_secs(0))
            .await
            .unwrap();

        engine.handle_ready_timers().await.unwrap();

        let mut fired = calls.lock().unwrap().clone();
        fired.sort();
        assert_eq!(fired, vec!["alpha".to_string(), "beta".to_string()]);
    }

    #[tokio::test]
    async fn externally_held_consume_lock_suppresses_dispatch() {
        let mut router = Router::new();
        router.handler("ping", |_payload: Ping, _ctx| async { Ok(()) });

        let store: Arc<dyn crate::TimerStore> = Arc::new(InMemoryTimerStore::new());
        let engine = Timers::new(Arc::clone(&store)).with_router(&router);

        engine
            .set_timer("ping", "t1", &Ping { message: "hi".into() }, Duration::from_secs(0))
            .await
            .unwrap();

        let held = crate::consume_lock(&store, "ping--t1", Duration::from_secs(30))
            .await
            .unwrap()
            .expect("lock should be free before any tick runs");

        engine.handle_ready_timers().await.unwrap();

        let (keys, _) = engine.fetch_all_timers().await.unwrap();
        assert_eq!(keys, vec!["ping--t1".to_string()], "externally locked timer must survive the tick");

        held.release().await;
    }

    #[tokio::test]
    async fn timer_lock_and_consume_lock_share_one_namespace() {
        let store: Arc<dyn crate::TimerStore> = Arc::new(InMemoryTimerStore::new());

        let held = crate::consume_lock(&store, "ping--t1", Duration::from_secs(30))
            .await
            .unwrap()
            .expect("lock should be free initially");

        match crate::timer_lock(&store, "ping--t1", Duration::from_millis(50)).await {
            Err(TimersError::LockBusy(key)) => assert_eq!(key, "ping--t1"),
            other => panic!(
                "a held consume_lock must block timer_lock on the same composite key, got {:?}",
                other.map(|_| ())
            ),
        }

        held.release().await;

        crate::timer_lock(&store, "ping--t1", Duration::from_secs(5))
            .await
            .expect("timer_lock should succeed once the consume_lock is released")
            .release()
            .await;
    }
}
