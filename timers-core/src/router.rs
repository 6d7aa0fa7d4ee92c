//! Handler registration and topic table composition.

use std::future::Future;
use std::marker::PhantomData;
use std::sync::Arc;

use async_trait::async_trait;
use serde::de::DeserializeOwned;

use crate::context::Context;
use crate::error::HandlerError;

/// Outcome of decoding and invoking a handler for one due timer.
pub(crate) enum HandlerDispatchError {
    /// The payload failed to deserialize into the handler's expected type.
    Decode(serde_json::Error),
    /// The handler itself returned an error.
    Handler(HandlerError),
}

/// Object-safe, type-erased handler invocation.
///
/// `Router::handler::<P>()` captures the concrete payload type `P` in a
/// monomorphized `TypedHandler`; this trait is the object-safe surface the
/// topic table stores instead, so the engine never needs to know `P`.
#[async_trait]
pub(crate) trait HandlerDyn: Send + Sync {
    async fn invoke(&self, payload: &[u8], context: &Context) -> Result<(), HandlerDispatchError>;
}

struct TypedHandler<P, F> {
    func: F,
    _payload: PhantomData<fn(P)>,
}

#[async_trait]
impl<P, F, Fut> HandlerDyn for TypedHandler<P, F>
where
    P: DeserializeOwned + Send + 'static,
    F: Fn(P, Context) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<(), HandlerError>> + Send + 'static,
{
    async fn invoke(&self, payload: &[u8], context: &Context) -> Result<(), HandlerDispatchError> {
        let decoded: P = serde_json::from_slice(payload).map_err(HandlerDispatchError::Decode)?;
        (self.func)(decoded, context.clone()).await.map_err(HandlerDispatchError::Handler)
    }
}

/// One registered topic: its name and the handler that processes its due
/// timers.
#[derive(Clone)]
pub struct HandlerDescriptor {
    /// The topic this handler is registered under.
    pub topic: String,
    pub(crate) handler: Arc<dyn HandlerDyn>,
}

/// A list of handler registrations, composed into an engine's topic table
/// at construction time.
///
/// Mirrors how a hook/tool registry collects entries in registration
/// order; unlike those, a `Router`'s entries are looked up by topic name
/// rather than walked in order, so only the last registration for a given
/// topic survives composition (see
/// [`crate::engine::Timers::include_router`]).
#[derive(Default, Clone)]
pub struct Router {
    handlers: Vec<HandlerDescriptor>,
}

impl Router {
    /// Creates an empty router.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a handler for `topic`. The handler receives the decoded
    /// payload and the engine's [`Context`].
    ///
    /// Registering a second handler under the same topic within one
    /// router keeps both entries here; composition into an engine's topic
    /// table is where later-registration-wins takes effect.
    pub fn handler<P, F, Fut>(&mut self, topic: impl Into<String>, handler: F) -> &mut Self
    where
        P: DeserializeOwned + Send + 'static,
        F: Fn(P, Context) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), HandlerError>> + Send + 'static,
    {
        self.handlers.push(HandlerDescriptor {
            topic: topic.into(),
            handler: Arc::new(TypedHandler {
                func: handler,
                _payload: PhantomData,
            }),
        });
        self
    }

    /// Registers a handler that doesn't need the engine's [`Context`],
    /// adapting it to the two-argument form at registration time.
    pub fn handler_without_context<P, F, Fut>(&mut self, topic: impl Into<String>, handler: F) -> &mut Self
    where
        P: DeserializeOwned + Send + 'static,
        F: Fn(P) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), HandlerError>> + Send + 'static,
    {
        self.handler(topic, move |payload, _context| handler(payload))
    }

    /// Returns the registered handlers in registration order.
    pub fn handlers(&self) -> &[HandlerDescriptor] {
        &self.handlers
    }
}
