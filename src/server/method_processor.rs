//! Method dispatch boundary (§4.9). Not a typed-dispatch framework — that
//! remains an external product — just enough to exercise the server core
//! end-to-end: a trait the server calls into, and a minimal name-keyed
//! implementation of it.

use std::collections::HashMap;

use crate::common::{Result, Status};

/// What the server core needs from a method dispatcher. Implementations
/// own argument deserialization and are responsible for producing an
/// error payload for an unknown method rather than panicking.
pub trait MethodProcessor: Send + Sync {
    /// Handles a request. `Ok(value)` becomes a successful response,
    /// `Err(value)` an error response; both are serialized by the caller
    /// once it knows the request's id (§4.7).
    fn call(&self, method: &str, params: &rmpv::Value) -> std::result::Result<rmpv::Value, rmpv::Value>;

    /// Handles a notification. No response is ever produced.
    fn notify(&self, method: &str, params: &rmpv::Value);
}

type Handler = Box<dyn Fn(&rmpv::Value) -> Result<rmpv::Value> + Send + Sync>;

/// Name-keyed [`MethodProcessor`]: a `HashMap<String, Handler>` built up
/// with [`HandlerMap::register`]. Unknown methods produce an error
/// response carrying the method name (§8 scenario 3).
#[derive(Default)]
pub struct HandlerMap {
    handlers: HashMap<String, Handler>,
    notification_handlers: HashMap<String, Box<dyn Fn(&rmpv::Value) + Send + Sync>>,
}

impl HandlerMap {
    pub fn new() -> Self {
        HandlerMap::default()
    }

    /// Registers a request handler under `name`, replacing any previous
    /// registration for the same name.
    pub fn register(
        &mut self,
        name: impl Into<String>,
        handler: impl Fn(&rmpv::Value) -> Result<rmpv::Value> + Send + Sync + 'static,
    ) {
        self.handlers.insert(name.into(), Box::new(handler));
    }

    /// Registers a notification handler under `name`.
    pub fn register_notification(
        &mut self,
        name: impl Into<String>,
        handler: impl Fn(&rmpv::Value) + Send + Sync + 'static,
    ) {
        self.notification_handlers.insert(name.into(), Box::new(handler));
    }
}

impl MethodProcessor for HandlerMap {
    fn call(&self, method: &str, params: &rmpv::Value) -> std::result::Result<rmpv::Value, rmpv::Value> {
        match self.handlers.get(method) {
            Some(handler) => handler(params).map_err(|status| rmpv::Value::from(status.message())),
            None => Err(rmpv::Value::from(format!("unknown method: {method}"))),
        }
    }

    fn notify(&self, method: &str, params: &rmpv::Value) {
        match self.notification_handlers.get(method) {
            Some(handler) => handler(params),
            None => tracing::trace!(method, "no handler registered for notification"),
        }
    }
}
