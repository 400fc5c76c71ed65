//! `message *` handlers.

use std::sync::Arc;

use chrono::Utc;
use huddle_core::entities::{ChannelMessage, MESSAGE_COLLECTION};
use huddle_store::{ChangeOptions, FieldFilter, OrderBy};
use serde::Deserialize;
use serde_json::Value;
use tracing::debug;

use super::decode;
use crate::errors::HandlerError;
use crate::session::Session;
use crate::subscription::SubscriptionKind;

/// Post a message.
pub const ADD: &str = "message add";
/// Stream one channel's messages.
pub const SUBSCRIBE: &str = "message subscribe";
/// Stop streaming messages.
pub const UNSUBSCRIBE: &str = "message unsubscribe";

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct AddParams {
    channel_id: String,
    body: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct SubscribeParams {
    channel_id: String,
}

/// Post `{channelId, body}` as this session's user, stamped with the
/// current time. Any other fields the client sends are ignored.
pub async fn add(session: Arc<Session>, data: Value) -> Result<(), HandlerError> {
    let AddParams { channel_id, body } = decode(ADD, data)?;
    let message = ChannelMessage {
        id: None,
        channel_id,
        body,
        author: session.display_name(),
        created_at: Utc::now(),
    };
    let record = serde_json::to_value(&message).map_err(|e| HandlerError::invalid(ADD, e))?;
    let id = session.store().insert(MESSAGE_COLLECTION, record).await?;
    debug!(session_id = session.id(), channel_id = %message.channel_id, message_id = %id, "message added");
    Ok(())
}

/// Stream the messages of `{channelId}`, newest first, then live changes.
///
/// Replaces any existing message subscription, even one for another channel.
pub async fn subscribe(session: Arc<Session>, data: Value) -> Result<(), HandlerError> {
    let SubscribeParams { channel_id } = decode(SUBSCRIBE, data)?;
    let options = ChangeOptions::with_initial()
        .filter(FieldFilter::equals("channelId", channel_id))
        .order_by(OrderBy::desc("createdAt"));
    super::subscribe(&session, SubscriptionKind::Message, options).await
}

/// Cancel the message subscription.
pub async fn unsubscribe(session: Arc<Session>, _data: Value) -> Result<(), HandlerError> {
    let _ = session.cancel_subscription(SubscriptionKind::Message);
    Ok(())
}
