//! `channel *` handlers.

use std::sync::Arc;

use huddle_core::entities::{CHANNEL_COLLECTION, Channel};
use huddle_store::ChangeOptions;
use serde_json::Value;
use tracing::debug;

use super::decode;
use crate::errors::HandlerError;
use crate::session::Session;
use crate::subscription::SubscriptionKind;

/// Create a channel.
pub const ADD: &str = "channel add";
/// Stream channel changes.
pub const SUBSCRIBE: &str = "channel subscribe";
/// Stop streaming channel changes.
pub const UNSUBSCRIBE: &str = "channel unsubscribe";

/// Insert a channel from `{name}`.
pub async fn add(session: Arc<Session>, data: Value) -> Result<(), HandlerError> {
    let channel: Channel = decode(ADD, data)?;
    let record = serde_json::to_value(Channel {
        id: None,
        name: channel.name,
    })
    .map_err(|e| HandlerError::invalid(ADD, e))?;
    let id = session.store().insert(CHANNEL_COLLECTION, record).await?;
    debug!(session_id = session.id(), channel_id = %id, "channel added");
    Ok(())
}

/// Stream every channel, then live channel changes.
pub async fn subscribe(session: Arc<Session>, _data: Value) -> Result<(), HandlerError> {
    super::subscribe(&session, SubscriptionKind::Channel, ChangeOptions::with_initial()).await
}

/// Cancel the channel subscription.
pub async fn unsubscribe(session: Arc<Session>, _data: Value) -> Result<(), HandlerError> {
    let _ = session.cancel_subscription(SubscriptionKind::Channel);
    Ok(())
}
