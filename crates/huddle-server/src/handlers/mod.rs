//! The application message catalog.
//!
//! | name | effect |
//! |------|--------|
//! | `channel add` | insert a channel |
//! | `channel subscribe` / `channel unsubscribe` | stream channel changes |
//! | `user edit` | rename this session's user |
//! | `user subscribe` / `user unsubscribe` | stream user changes |
//! | `message add` | post a message to a channel |
//! | `message subscribe` / `message unsubscribe` | stream one channel's messages |

use std::sync::Arc;

use huddle_store::ChangeOptions;
use serde::de::DeserializeOwned;
use serde_json::Value;
use tracing::debug;

use crate::dispatcher::Dispatcher;
use crate::errors::HandlerError;
use crate::session::Session;
use crate::subscription::SubscriptionKind;
use crate::translator::run_translator;

pub mod channel;
pub mod message;
pub mod user;

/// Register every handler of the catalog.
pub fn register_all(dispatcher: &mut Dispatcher) {
    dispatcher.register(channel::ADD, channel::add);
    dispatcher.register(channel::SUBSCRIBE, channel::subscribe);
    dispatcher.register(channel::UNSUBSCRIBE, channel::unsubscribe);
    dispatcher.register(user::EDIT, user::edit);
    dispatcher.register(user::SUBSCRIBE, user::subscribe);
    dispatcher.register(user::UNSUBSCRIBE, user::unsubscribe);
    dispatcher.register(message::ADD, message::add);
    dispatcher.register(message::SUBSCRIBE, message::subscribe);
    dispatcher.register(message::UNSUBSCRIBE, message::unsubscribe);
}

/// Decode a handler payload, naming the message on failure.
fn decode<T: DeserializeOwned>(name: &'static str, data: Value) -> Result<T, HandlerError> {
    serde_json::from_value(data).map_err(|e| HandlerError::invalid(name, e))
}

/// Open a change stream for `kind` and run it as the session's
/// subscription of that kind.
///
/// The previous subscription of the same kind is cancelled before the new
/// stream is opened, so none of its pending events reach the client.
async fn subscribe(
    session: &Arc<Session>,
    kind: SubscriptionKind,
    options: ChangeOptions,
) -> Result<(), HandlerError> {
    let _ = session.cancel_subscription(kind);
    let stream = session.store().changes(kind.entity_kind(), options).await?;
    let sink = session.sink().clone();
    let _ = session.spawn_subscription(kind, move |token| async move {
        let exit = run_translator(stream, kind.entity_kind(), token, sink).await;
        debug!(%kind, ?exit, "subscription finished");
    });
    Ok(())
}

#[cfg(test)]
pub(crate) mod test_support {
    use std::sync::Arc;
    use std::time::Duration;

    use huddle_core::Message;
    use huddle_store::{SqliteStore, Store};

    use crate::config::ServerConfig;
    use crate::dispatcher::Dispatcher;
    use crate::outbound::OutboundQueue;
    use crate::session::Session;

    /// A session wired to the full catalog over an in-memory store.
    pub(crate) async fn session() -> (Arc<Session>, OutboundQueue, SqliteStore) {
        let store = SqliteStore::in_memory().unwrap();
        let shared: Arc<dyn Store> = Arc::new(store.clone());
        let mut dispatcher = Dispatcher::new();
        super::register_all(&mut dispatcher);
        let (session, queue) =
            Session::create(Arc::new(dispatcher), shared, &ServerConfig::default())
                .await
                .unwrap();
        (session, queue, store)
    }

    /// Next queued message within a short deadline.
    pub(crate) async fn next(queue: &mut OutboundQueue) -> Option<Message> {
        tokio::time::timeout(Duration::from_millis(500), queue.recv())
            .await
            .ok()
            .flatten()
    }

    /// Assert nothing arrives for a moment.
    pub(crate) async fn assert_quiet(queue: &mut OutboundQueue) {
        let res = tokio::time::timeout(Duration::from_millis(50), queue.recv()).await;
        assert!(res.is_err(), "unexpected message: {res:?}");
    }
}
