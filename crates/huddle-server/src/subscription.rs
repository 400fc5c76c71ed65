//! Per-session registry of live subscriptions.
//!
//! At most one subscription per [`SubscriptionKind`]. Each entry holds the
//! cancellation token of the task streaming that kind; the registry only
//! does bookkeeping and never waits for tasks.

use std::collections::HashMap;
use std::fmt;

use huddle_core::entities::{CHANNEL_COLLECTION, MESSAGE_COLLECTION, USER_COLLECTION};
use tokio_util::sync::CancellationToken;

/// The kinds of data a session can subscribe to.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum SubscriptionKind {
    /// Channel records.
    Channel,
    /// User records.
    User,
    /// Messages of one channel.
    Message,
}

impl SubscriptionKind {
    /// Every kind.
    pub const ALL: [Self; 3] = [Self::Channel, Self::User, Self::Message];

    /// Entity kind used in event names and as the store collection.
    pub fn entity_kind(self) -> &'static str {
        match self {
            Self::Channel => CHANNEL_COLLECTION,
            Self::User => USER_COLLECTION,
            Self::Message => MESSAGE_COLLECTION,
        }
    }
}

impl fmt::Display for SubscriptionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.entity_kind())
    }
}

/// Mapping from kind to the cancellation token of its running task.
#[derive(Debug, Default)]
pub struct SubscriptionRegistry {
    entries: HashMap<SubscriptionKind, CancellationToken>,
}

impl SubscriptionRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Cancel any existing subscription for `kind` and register a fresh one.
    ///
    /// Returns the new subscription's token.
    pub fn register_or_replace(&mut self, kind: SubscriptionKind) -> CancellationToken {
        let token = CancellationToken::new();
        if let Some(previous) = self.entries.insert(kind, token.clone()) {
            previous.cancel();
        }
        token
    }

    /// Cancel and remove the subscription for `kind`. Returns whether one existed.
    pub fn cancel(&mut self, kind: SubscriptionKind) -> bool {
        match self.entries.remove(&kind) {
            Some(token) => {
                token.cancel();
                true
            }
            None => false,
        }
    }

    /// Cancel and remove every subscription. Returns how many were cancelled.
    pub fn cancel_all(&mut self) -> usize {
        let count = self.entries.len();
        for (_, token) in self.entries.drain() {
            token.cancel();
        }
        count
    }

    /// Number of registered subscriptions.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether no subscription is registered.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Whether `kind` has a registered subscription.
    pub fn contains(&self, kind: SubscriptionKind) -> bool {
        self.entries.contains_key(&kind)
    }
}
