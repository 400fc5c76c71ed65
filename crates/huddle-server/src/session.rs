//! Session lifecycle: one client connection from accept through teardown.
//!
//! A session owns the connection's identity (the id of the `user` record
//! it inserts on creation), the outbound sink, and the registry of live
//! subscriptions. [`Session::run`] drives the whole lifecycle:
//!
//! 1. Insert the session's user record (failure aborts the connection)
//! 2. Spawn the outbound loop (queue → frames)
//! 3. Run the inbound loop (frames → dispatcher) until the peer goes away
//!    or the server shuts down
//! 4. [`Session::close`]: cancel subscriptions, close the sink, wait for
//!    subscription tasks, delete the user record in the background

use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use huddle_core::Message;
use huddle_core::entities::{USER_COLLECTION, User};
use huddle_store::Store;
use metrics::{counter, gauge};
use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{Instrument, debug, info, instrument, warn};

use crate::config::ServerConfig;
use crate::dispatcher::Dispatcher;
use crate::errors::{SessionError, TransportError};
use crate::metrics::{MESSAGES_MALFORMED_TOTAL, SUBSCRIPTIONS_ACTIVE};
use crate::outbound::{OutboundQueue, OutboundSink, outbound};
use crate::subscription::{SubscriptionKind, SubscriptionRegistry};
use crate::transport::{FrameReader, FrameWriter, Transport};

/// How long the outbound loop waits for the transport to accept a close.
const WRITER_CLOSE_TIMEOUT: Duration = Duration::from_secs(1);

/// Server-side state for one live client connection.
pub struct Session {
    id: String,
    display_name: Mutex<String>,
    sink: OutboundSink,
    subscriptions: Mutex<SubscriptionRegistry>,
    tasks: TaskTracker,
    dispatcher: Arc<Dispatcher>,
    store: Arc<dyn Store>,
    closed: AtomicBool,
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("id", &self.id)
            .field("display_name", &*self.display_name.lock())
            .field("subscriptions", &self.subscriptions.lock().len())
            .finish_non_exhaustive()
    }
}

impl Session {
    /// Register a new session's user record and open its outbound queue.
    pub async fn create(
        dispatcher: Arc<Dispatcher>,
        store: Arc<dyn Store>,
        config: &ServerConfig,
    ) -> Result<(Arc<Self>, OutboundQueue), SessionError> {
        let user = User {
            id: None,
            name: config.default_user_name.clone(),
        };
        let record = serde_json::to_value(&user).map_err(huddle_store::StoreError::from)?;
        let id = store.insert(USER_COLLECTION, record).await?;
        let (sink, queue) = outbound(config.outbound_queue_size);

        let session = Arc::new(Self {
            id,
            display_name: Mutex::new(user.name),
            sink,
            subscriptions: Mutex::new(SubscriptionRegistry::new()),
            tasks: TaskTracker::new(),
            dispatcher,
            store,
            closed: AtomicBool::new(false),
        });
        Ok((session, queue))
    }

    /// Drive a connection through its whole lifecycle.
    #[instrument(skip_all, fields(session_id = tracing::field::Empty))]
    pub async fn run(
        transport: Transport,
        dispatcher: Arc<Dispatcher>,
        store: Arc<dyn Store>,
        config: Arc<ServerConfig>,
        shutdown: CancellationToken,
    ) -> Result<(), SessionError> {
        let Transport { mut reader, writer } = transport;
        let (session, queue) = Self::create(dispatcher, store, &config).await?;
        let _ = tracing::Span::current().record("session_id", session.id());
        info!("session started");

        let outbound = tokio::spawn(
            Arc::clone(&session)
                .run_outbound_loop(queue, writer)
                .in_current_span(),
        );
        session.run_inbound_loop(reader.as_mut(), &shutdown).await;
        session.close().await;
        let _ = outbound.await;

        info!("session ended");
        Ok(())
    }

    /// Session id (the id of its `user` record).
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Current display name.
    pub fn display_name(&self) -> String {
        self.display_name.lock().clone()
    }

    /// Replace the display name.
    pub fn set_display_name(&self, name: impl Into<String>) {
        *self.display_name.lock() = name.into();
    }

    /// The store this session reads and writes.
    pub fn store(&self) -> &Arc<dyn Store> {
        &self.store
    }

    /// Producer handle for this session's outbound queue.
    pub fn sink(&self) -> &OutboundSink {
        &self.sink
    }

    /// Queue a message for the client. Returns `false` once the session is closing.
    pub async fn send(&self, message: Message) -> bool {
        self.sink.push(message).await
    }

    /// Whether [`Session::close`] has run.
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Register (or replace) the subscription for `kind`, returning its token.
    pub fn register_subscription(&self, kind: SubscriptionKind) -> CancellationToken {
        self.subscriptions.lock().register_or_replace(kind)
    }

    /// Cancel the subscription for `kind`, if any.
    pub fn cancel_subscription(&self, kind: SubscriptionKind) -> bool {
        let cancelled = self.subscriptions.lock().cancel(kind);
        if cancelled {
            debug!(session_id = %self.id, %kind, "subscription cancelled");
        }
        cancelled
    }

    /// Whether `kind` currently has a registered subscription.
    pub fn has_subscription(&self, kind: SubscriptionKind) -> bool {
        self.subscriptions.lock().contains(kind)
    }

    /// Number of registered subscriptions.
    pub fn subscription_count(&self) -> usize {
        self.subscriptions.lock().len()
    }

    /// Register `kind` and run the future built by `make` on a tracked task.
    ///
    /// Any previous subscription of the same kind is asked to stop; this does
    /// not wait for it. After [`Session::close`] the token is already
    /// cancelled and nothing is spawned.
    pub fn spawn_subscription<F, Fut>(&self, kind: SubscriptionKind, make: F) -> CancellationToken
    where
        F: FnOnce(CancellationToken) -> Fut,
        Fut: Future + Send + 'static,
        Fut::Output: Send + 'static,
    {
        let token = {
            let mut registry = self.subscriptions.lock();
            if self.is_closed() {
                let token = CancellationToken::new();
                token.cancel();
                return token;
            }
            registry.register_or_replace(kind)
        };

        let fut = make(token.clone());
        gauge!(SUBSCRIPTIONS_ACTIVE).increment(1.0);
        debug!(session_id = %self.id, %kind, "subscription started");
        let _ = self.tasks.spawn(
            async move {
                let _ = fut.await;
                gauge!(SUBSCRIPTIONS_ACTIVE).decrement(1.0);
            }
            .in_current_span(),
        );
        token
    }

    /// Tear the session down. Only the first call does anything.
    pub async fn close(&self) {
        let cancelled = {
            let mut registry = self.subscriptions.lock();
            if self.closed.swap(true, Ordering::AcqRel) {
                return;
            }
            registry.cancel_all()
        };
        debug!(session_id = %self.id, cancelled, "closing session");

        self.sink.close();
        let _ = self.tasks.close();
        self.tasks.wait().await;

        let store = Arc::clone(&self.store);
        let id = self.id.clone();
        drop(tokio::spawn(async move {
            if let Err(e) = store.delete(USER_COLLECTION, &id).await {
                warn!(session_id = %id, error = %e, "failed to delete session user");
            }
        }));
    }

    /// Serialize queued messages onto the transport until the sink closes
    /// or a write fails. A write failure closes the session's sink, which
    /// also stops the inbound loop. Closing the sink abandons a write that
    /// is stuck on a peer that stopped reading.
    pub async fn run_outbound_loop(
        self: Arc<Self>,
        mut queue: OutboundQueue,
        mut writer: Box<dyn FrameWriter>,
    ) {
        while let Some(message) = queue.recv().await {
            let frame = match message.to_json() {
                Ok(frame) => frame,
                Err(e) => {
                    warn!(name = %message.name, error = %e, "failed to serialize outbound message");
                    continue;
                }
            };
            let written = tokio::select! {
                biased;
                () = self.sink.closed() => break,
                written = writer.write_frame(frame) => written,
            };
            if let Err(e) = written {
                debug!(error = %e, "write failed, closing connection");
                self.sink.close();
                break;
            }
        }
        if tokio::time::timeout(WRITER_CLOSE_TIMEOUT, writer.close()).await.is_err() {
            debug!("peer did not accept close, dropping connection");
        }
    }

    /// Read frames and dispatch them until the peer closes, a read fails,
    /// the session's sink is closed or `shutdown` fires.
    pub async fn run_inbound_loop(
        self: &Arc<Self>,
        reader: &mut dyn FrameReader,
        shutdown: &CancellationToken,
    ) {
        loop {
            let frame = tokio::select! {
                biased;
                () = self.sink.closed() => break,
                () = shutdown.cancelled() => {
                    debug!("server shutting down");
                    break;
                }
                frame = reader.read_frame() => frame,
            };
            match frame {
                Ok(Some(text)) => self.handle_frame(&text).await,
                Err(TransportError::InvalidFrame(reason)) => self.report_malformed(reason).await,
                Ok(None) => {
                    debug!("peer closed connection");
                    break;
                }
                Err(e) => {
                    debug!(error = %e, "read failed");
                    break;
                }
            }
        }
    }

    async fn handle_frame(self: &Arc<Self>, text: &str) {
        match Message::from_json(text) {
            Ok(message) => self.dispatcher.dispatch(self, message).await,
            Err(e) => self.report_malformed(e.to_string()).await,
        }
    }

    async fn report_malformed(&self, reason: String) {
        counter!(MESSAGES_MALFORMED_TOTAL).increment(1);
        debug!(error = %reason, "malformed envelope");
        let _ = self.send(Message::error(format!("invalid message: {reason}"))).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::channel_pair;
    use huddle_store::SqliteStore;
    use serde_json::{Value, json};
    use std::sync::atomic::AtomicUsize;

    const TIMEOUT: Duration = Duration::from_secs(2);

    fn store() -> (SqliteStore, Arc<dyn Store>) {
        let store = SqliteStore::in_memory().unwrap();
        let shared: Arc<dyn Store> = Arc::new(store.clone());
        (store, shared)
    }

    async fn new_session(dispatcher: Dispatcher) -> (Arc<Session>, OutboundQueue, SqliteStore) {
        let (raw, shared) = store();
        let (session, queue) = Session::create(Arc::new(dispatcher), shared, &ServerConfig::default())
            .await
            .unwrap();
        (session, queue, raw)
    }

    #[tokio::test]
    async fn create_inserts_user_record() {
        let (session, _queue, store) = new_session(Dispatcher::new()).await;
        let user = store.get(USER_COLLECTION, session.id()).await.unwrap().unwrap();
        assert_eq!(user["name"], "anonymous");
        assert_eq!(session.display_name(), "anonymous");
    }

    #[tokio::test]
    async fn register_twice_keeps_one() {
        let (session, _queue, _store) = new_session(Dispatcher::new()).await;
        let first = session.register_subscription(SubscriptionKind::Channel);
        let second = session.register_subscription(SubscriptionKind::Channel);
        assert_eq!(session.subscription_count(), 1);
        assert!(first.is_cancelled());
        assert!(!second.is_cancelled());
    }

    #[tokio::test]
    async fn close_cancels_all_and_waits_for_tasks() {
        let (session, _queue, store) = new_session(Dispatcher::new()).await;
        let finished = Arc::new(AtomicUsize::new(0));

        let tokens: Vec<_> = SubscriptionKind::ALL
            .iter()
            .map(|kind| {
                let finished = Arc::clone(&finished);
                session.spawn_subscription(*kind, move |token| async move {
                    token.cancelled().await;
                    let _ = finished.fetch_add(1, Ordering::SeqCst);
                })
            })
            .collect();
        assert_eq!(session.subscription_count(), 3);

        tokio::time::timeout(TIMEOUT, session.close()).await.unwrap();
        assert!(tokens.iter().all(CancellationToken::is_cancelled));
        assert_eq!(finished.load(Ordering::SeqCst), 3);
        assert_eq!(session.subscription_count(), 0);
        assert!(session.sink().is_closed());

        // user record removal runs in the background
        tokio::time::timeout(TIMEOUT, async {
            while store.get(USER_COLLECTION, session.id()).await.unwrap().is_some() {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .unwrap();
    }

    #[tokio::test]
    async fn close_is_idempotent() {
        let (session, _queue, _store) = new_session(Dispatcher::new()).await;
        session.close().await;
        session.close().await;
        assert!(session.is_closed());
    }

    #[tokio::test]
    async fn spawn_after_close_is_inert() {
        let (session, _queue, _store) = new_session(Dispatcher::new()).await;
        session.close().await;
        let token = session.spawn_subscription(SubscriptionKind::User, |_| async {});
        assert!(token.is_cancelled());
        assert_eq!(session.subscription_count(), 0);
    }

    #[tokio::test]
    async fn malformed_frame_yields_single_error() {
        let (raw, shared) = store();
        drop(raw);
        let (transport, mut peer) = channel_pair(8);
        let run = tokio::spawn(Session::run(
            transport,
            Arc::new(Dispatcher::new()),
            shared,
            Arc::new(ServerConfig::default()),
            CancellationToken::new(),
        ));

        assert!(peer.send_raw("{not json").await);
        let reply = tokio::time::timeout(TIMEOUT, peer.recv()).await.unwrap().unwrap();
        assert!(reply.is_error());

        // still usable afterwards
        assert!(peer.send_raw(r#"{"data": 1}"#).await);
        let reply = tokio::time::timeout(TIMEOUT, peer.recv()).await.unwrap().unwrap();
        assert!(reply.is_error());

        peer.disconnect();
        tokio::time::timeout(TIMEOUT, run).await.unwrap().unwrap().unwrap();
    }

    #[tokio::test]
    async fn unknown_name_is_ignored() {
        let (_raw, shared) = store();
        let mut dispatcher = Dispatcher::new();
        dispatcher.register("echo", |session: Arc<Session>, data| async move {
            let _ = session.send(Message::new("echo", data)).await;
            Ok(())
        });
        let (transport, mut peer) = channel_pair(8);
        let run = tokio::spawn(Session::run(
            transport,
            Arc::new(dispatcher),
            shared,
            Arc::new(ServerConfig::default()),
            CancellationToken::new(),
        ));

        assert!(peer.send(&Message::new("nope", json!({}))).await);
        assert!(peer.send(&Message::new("echo", json!("hi"))).await);
        let reply = tokio::time::timeout(TIMEOUT, peer.recv()).await.unwrap().unwrap();
        assert_eq!(reply.name, "echo");
        assert_eq!(reply.data, json!("hi"));

        peer.disconnect();
        tokio::time::timeout(TIMEOUT, run).await.unwrap().unwrap().unwrap();
    }

    fn catalog() -> Arc<Dispatcher> {
        let mut dispatcher = Dispatcher::new();
        crate::handlers::register_all(&mut dispatcher);
        Arc::new(dispatcher)
    }

    #[tokio::test]
    async fn double_subscribe_replays_existing_once() {
        let (raw, shared) = store();
        for i in 0..5 {
            let _ = raw.insert("channel", json!({"name": format!("c{i}")})).await.unwrap();
        }
        let (transport, mut peer) = channel_pair(16);
        let subscribe = Message::new("channel subscribe", Value::Null);
        assert!(peer.send(&subscribe).await);
        assert!(peer.send(&subscribe).await);
        let run = tokio::spawn(Session::run(
            transport,
            catalog(),
            shared,
            Arc::new(ServerConfig::default()),
            CancellationToken::new(),
        ));

        let mut adds = 0;
        while let Ok(Some(event)) =
            tokio::time::timeout(Duration::from_millis(200), peer.recv()).await
        {
            assert_eq!(event.name, "channel add");
            adds += 1;
        }
        assert_eq!(adds, 5);

        peer.disconnect();
        tokio::time::timeout(TIMEOUT, run).await.unwrap().unwrap().unwrap();
    }

    #[tokio::test]
    async fn stalled_peer_does_not_block_shutdown() {
        let (raw, shared) = store();
        for i in 0..20 {
            let _ = raw.insert("channel", json!({"name": format!("c{i}")})).await.unwrap();
        }
        // the peer never reads, so the outbound loop stalls on the first full write
        let (transport, peer) = channel_pair(1);
        let shutdown = CancellationToken::new();
        let run = tokio::spawn(Session::run(
            transport,
            catalog(),
            shared,
            Arc::new(ServerConfig::default()),
            shutdown.clone(),
        ));
        assert!(peer.send(&Message::new("channel subscribe", Value::Null)).await);
        tokio::time::sleep(Duration::from_millis(50)).await;

        shutdown.cancel();
        tokio::time::timeout(TIMEOUT, run).await.unwrap().unwrap().unwrap();
        drop(peer);
    }

    #[tokio::test]
    async fn disconnect_finishes_every_subscription_task() {
        let mut dispatcher = Dispatcher::new();
        crate::handlers::register_all(&mut dispatcher);
        let (session, queue, raw) = new_session(dispatcher).await;
        let (transport, mut peer) = channel_pair(16);
        let Transport { mut reader, writer } = transport;
        let outbound = tokio::spawn(Arc::clone(&session).run_outbound_loop(queue, writer));

        assert!(peer.send(&Message::new("channel subscribe", Value::Null)).await);
        assert!(peer.send(&Message::new("user subscribe", Value::Null)).await);
        assert!(peer.send(&Message::new("message subscribe", json!({"channelId": "c1"}))).await);
        peer.disconnect();

        let shutdown = CancellationToken::new();
        tokio::time::timeout(TIMEOUT, session.run_inbound_loop(reader.as_mut(), &shutdown))
            .await
            .unwrap();
        assert_eq!(session.subscription_count(), 3);
        assert_eq!(session.tasks.len(), 3);
        assert_eq!(raw.open_streams(), 3);

        tokio::time::timeout(TIMEOUT, session.close()).await.unwrap();
        assert_eq!(session.subscription_count(), 0);
        assert!(session.tasks.is_empty());
        assert_eq!(raw.open_streams(), 0);

        tokio::time::timeout(TIMEOUT, outbound).await.unwrap().unwrap();
        while let Some(event) = peer.recv().await {
            assert_eq!(event.name, "user add");
        }
    }

    #[tokio::test]
    async fn shutdown_token_ends_session() {
        let (_raw, shared) = store();
        let (transport, mut peer) = channel_pair(8);
        let shutdown = CancellationToken::new();
        let run = tokio::spawn(Session::run(
            transport,
            Arc::new(Dispatcher::new()),
            shared,
            Arc::new(ServerConfig::default()),
            shutdown.clone(),
        ));
        tokio::time::sleep(Duration::from_millis(20)).await;

        shutdown.cancel();
        tokio::time::timeout(TIMEOUT, run).await.unwrap().unwrap().unwrap();
        // writer closed: the client sees end of stream
        assert!(peer.recv_raw().await.is_none());
    }

    #[tokio::test]
    async fn client_gone_ends_session() {
        let (raw, shared) = store();
        let (transport, peer) = channel_pair(8);
        let run = tokio::spawn(Session::run(
            transport,
            Arc::new(Dispatcher::new()),
            shared,
            Arc::new(ServerConfig::default()),
            CancellationToken::new(),
        ));
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(raw.count(USER_COLLECTION).await.unwrap(), 1);

        drop(peer);
        tokio::time::timeout(TIMEOUT, run).await.unwrap().unwrap().unwrap();
        tokio::time::timeout(TIMEOUT, async {
            while raw.count(USER_COLLECTION).await.unwrap() > 0 {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .unwrap();
    }
}
