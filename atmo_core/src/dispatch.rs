//! Function registration and dispatch.
//!
//! User callbacks are registered as wrappers pairing a match key with a
//! function. A wrapper fires when its key names the event, names the
//! payload's tag, or when the request's resolver claims it. Registration
//! order is preserved; a panicking callback never starves the rest.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::{Arc, PoisonError, RwLock};

use crate::event::Event;
use crate::payload::Payload;

/// A user callback.
pub trait Function: Send + Sync {
    /// Invoked with the fully decoded payload.
    fn on(&self, message: &Payload);
}

impl<F> Function for F
where
    F: Fn(&Payload) + Send + Sync,
{
    fn on(&self, message: &Payload) {
        self(message);
    }
}

/// A registered callback and the key it matches on.
#[derive(Clone)]
pub struct FunctionWrapper {
    key: String,
    function: Arc<dyn Function>,
}

impl FunctionWrapper {
    /// Pair a match key with a callback.
    pub fn new(key: impl Into<String>, function: Arc<dyn Function>) -> Self {
        FunctionWrapper {
            key: key.into(),
            function,
        }
    }

    /// The match key.
    #[must_use]
    pub fn key(&self) -> &str {
        &self.key
    }
}

/// The shared, ordered callback list.
///
/// Clones alias the same list, so the socket and its transport dispatch to
/// an identical view.
#[derive(Clone, Default)]
pub struct FunctionRegistry {
    inner: Arc<RwLock<Vec<FunctionWrapper>>>,
}

impl FunctionRegistry {
    /// An empty registry.
    #[must_use]
    pub fn new() -> Self {
        FunctionRegistry::default()
    }

    /// Register a callback under a match key.
    pub fn register(&self, key: impl Into<String>, function: impl Function + 'static) {
        self.register_wrapper(FunctionWrapper::new(key, Arc::new(function)));
    }

    /// Register a prebuilt wrapper.
    pub fn register_wrapper(&self, wrapper: FunctionWrapper) {
        self.inner
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .push(wrapper);
    }

    /// Point-in-time copy of the wrappers, in registration order.
    #[must_use]
    pub fn snapshot(&self) -> Vec<FunctionWrapper> {
        self.inner
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Number of registered wrappers.
    #[must_use]
    pub fn len(&self) -> usize {
        self.inner
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// Whether no wrapper is registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl std::fmt::Debug for FunctionRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("FunctionRegistry").field(&self.len()).finish()
    }
}

/// Extension point deciding whether a wrapper's key claims a payload that
/// neither the event name nor the payload tag matched.
pub trait FunctionResolver: Send + Sync {
    /// Whether the wrapper registered under `key` should fire.
    fn matches(&self, key: &str, event: Event, payload: &Payload) -> bool;
}

/// The default resolver: the empty key is a wildcard for message events,
/// in either framing.
#[derive(Debug, Clone, Copy, Default)]
pub struct DefaultFunctionResolver;

impl FunctionResolver for DefaultFunctionResolver {
    fn matches(&self, key: &str, event: Event, _payload: &Payload) -> bool {
        key.is_empty() && event.is_message()
    }
}

/// Invoke every matching callback, in registration order.
///
/// Returns whether at least one callback fired; transports use this to
/// decide whether an error was consumed by user code.
pub fn dispatch(
    event: Event,
    payload: &Payload,
    functions: &FunctionRegistry,
    resolver: &dyn FunctionResolver,
) -> bool {
    let mut invoked = false;
    for wrapper in functions.snapshot() {
        let hit = wrapper.key() == event.name()
            || wrapper.key() == payload.kind().name()
            || resolver.matches(wrapper.key(), event, payload);
        if !hit {
            continue;
        }
        invoked = true;
        let function = wrapper.function.clone();
        if catch_unwind(AssertUnwindSafe(|| function.on(payload))).is_err() {
            tracing::warn!(key = wrapper.key(), %event, "function panicked during dispatch");
        }
    }
    invoked
}
