//! The opaque value threaded into every handler invocation.

use std::collections::HashMap;
use std::sync::Arc;

/// An opaque bag of values supplied once at engine construction and handed
/// to every handler call. Cloning is cheap — it shares the underlying map
/// via `Arc` rather than copying it.
#[derive(Clone, Default)]
pub struct Context(Arc<HashMap<String, serde_json::Value>>);

impl Context {
    /// Builds a context from a fixed map of values.
    pub fn new(values: HashMap<String, serde_json::Value>) -> Self {
        Self(Arc::new(values))
    }

    /// Looks up a value by key.
    pub fn get(&self, key: &str) -> Option<&serde_json::Value> {
        self.0.get(key)
    }

    /// Returns `true` if the context carries no values.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl std::fmt::Debug for Context {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("Context").field(&self.0.keys().collect::<Vec<_>>()).finish()
    }
}
