//! `user *` handlers.

use std::sync::Arc;

use huddle_core::entities::{USER_COLLECTION, User};
use huddle_store::ChangeOptions;
use serde_json::{Value, json};
use tracing::debug;

use super::decode;
use crate::errors::HandlerError;
use crate::session::Session;
use crate::subscription::SubscriptionKind;

/// Rename this session's user.
pub const EDIT: &str = "user edit";
/// Stream user changes.
pub const SUBSCRIBE: &str = "user subscribe";
/// Stop streaming user changes.
pub const UNSUBSCRIBE: &str = "user unsubscribe";

/// Set the session's display name from `{name}` and persist it.
pub async fn edit(session: Arc<Session>, data: Value) -> Result<(), HandlerError> {
    let User { name, .. } = decode(EDIT, data)?;
    session
        .store()
        .update(USER_COLLECTION, session.id(), json!({ "name": name }))
        .await?;
    debug!(session_id = session.id(), name, "user renamed");
    session.set_display_name(name);
    Ok(())
}

/// Stream every connected user, then live user changes.
pub async fn subscribe(session: Arc<Session>, _data: Value) -> Result<(), HandlerError> {
    super::subscribe(&session, SubscriptionKind::User, ChangeOptions::with_initial()).await
}

/// Cancel the user subscription.
pub async fn unsubscribe(session: Arc<Session>, _data: Value) -> Result<(), HandlerError> {
    let _ = session.cancel_subscription(SubscriptionKind::User);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use crate::handlers::test_support::{assert_quiet, next, session};

    #[tokio::test]
    async fn edit_renames_session_and_record() {
        let (s, _queue, store) = session().await;
        edit(Arc::clone(&s), json!({"name": "ana"})).await.unwrap();
        assert_eq!(s.display_name(), "ana");
        let record = store.get(USER_COLLECTION, s.id()).await.unwrap().unwrap();
        assert_eq!(record["name"], "ana");
    }

    #[tokio::test]
    async fn edit_rejects_bad_payload() {
        let (s, _queue, _store) = session().await;
        let err = edit(Arc::clone(&s), json!({"name": 5})).await.unwrap_err();
        assert_matches!(err, HandlerError::InvalidParams { name: EDIT, .. });
        assert_eq!(s.display_name(), "anonymous");
    }

    #[tokio::test]
    async fn subscribe_sees_self_then_rename() {
        let (s, mut queue, _store) = session().await;
        subscribe(Arc::clone(&s), Value::Null).await.unwrap();

        let me = next(&mut queue).await.unwrap();
        assert_eq!(me.name, "user add");
        assert_eq!(me.data["id"], s.id());

        edit(Arc::clone(&s), json!({"name": "bo"})).await.unwrap();
        let renamed = next(&mut queue).await.unwrap();
        assert_eq!(renamed.name, "user edit");
        assert_eq!(renamed.data["name"], "bo");
    }

    #[tokio::test]
    async fn unsubscribe_stops_events() {
        let (s, mut queue, _store) = session().await;
        subscribe(Arc::clone(&s), Value::Null).await.unwrap();
        let _ = next(&mut queue).await.unwrap();
        unsubscribe(Arc::clone(&s), Value::Null).await.unwrap();

        edit(Arc::clone(&s), json!({"name": "quiet"})).await.unwrap();
        assert_quiet(&mut queue).await;
    }
}
