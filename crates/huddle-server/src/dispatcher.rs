//! Message-name → handler table and dispatch.
//!
//! Built once at startup, then shared behind an `Arc` and never mutated.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;

use futures::FutureExt;
use futures::future::BoxFuture;
use huddle_core::Message;
use metrics::counter;
use serde_json::Value;
use tracing::{debug, warn};

use crate::errors::HandlerError;
use crate::metrics::{HANDLER_ERRORS_TOTAL, MESSAGES_DISPATCHED_TOTAL, MESSAGES_UNKNOWN_TOTAL};
use crate::session::Session;

/// Future returned by a handler.
pub type HandlerFuture = BoxFuture<'static, Result<(), HandlerError>>;

/// A handler: given the session and the message payload, perform side
/// effects and optionally push messages to the session.
pub type Handler = Arc<dyn Fn(Arc<Session>, Value) -> HandlerFuture + Send + Sync>;

/// Registry mapping message names to handlers.
#[derive(Default)]
pub struct Dispatcher {
    handlers: HashMap<String, Handler>,
}

impl Dispatcher {
    /// Create an empty dispatcher.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a handler for a message name, replacing any previous one.
    pub fn register<F, Fut>(&mut self, name: impl Into<String>, handler: F)
    where
        F: Fn(Arc<Session>, Value) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), HandlerError>> + Send + 'static,
    {
        let handler: Handler = Arc::new(move |session, data| handler(session, data).boxed());
        let _ = self.handlers.insert(name.into(), handler);
    }

    /// Handler registered for `name`.
    pub fn lookup(&self, name: &str) -> Option<&Handler> {
        self.handlers.get(name)
    }

    /// Whether `name` has a handler.
    pub fn has_handler(&self, name: &str) -> bool {
        self.handlers.contains_key(name)
    }

    /// All registered names (sorted).
    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.handlers.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    /// Number of registered handlers.
    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    /// Whether no handler is registered.
    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }

    /// Run the handler for `message` on behalf of `session`.
    ///
    /// Unknown names are dropped. A failing handler is reported to the
    /// session as a single `"error"` message.
    pub async fn dispatch(&self, session: &Arc<Session>, message: Message) {
        let Message { name, data } = message;
        let Some(handler) = self.lookup(&name) else {
            counter!(MESSAGES_UNKNOWN_TOTAL).increment(1);
            debug!(name, "no handler for message");
            return;
        };

        counter!(MESSAGES_DISPATCHED_TOTAL, "name" => name.clone()).increment(1);
        if let Err(e) = handler(Arc::clone(session), data).await {
            counter!(HANDLER_ERRORS_TOTAL, "name" => name.clone()).increment(1);
            warn!(name, error = %e, "handler failed");
            let _ = session.send(Message::error(e.to_string())).await;
        }
    }
}

impl std::fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Dispatcher")
            .field("handlers", &self.names())
            .finish()
    }
}
