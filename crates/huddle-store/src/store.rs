//! The store collaborator interface used by the gateway.

use async_trait::async_trait;
use serde_json::Value;

use crate::errors::Result;
use crate::types::{ChangeOptions, ChangeStream};

/// Persistent record store with live change notification.
///
/// These four operations are everything the gateway asks of a store.
#[async_trait]
pub trait Store: Send + Sync {
    /// Insert a JSON object into `collection`, returning its id.
    ///
    /// A string `id` field on the record is kept; otherwise one is generated.
    async fn insert(&self, collection: &str, record: Value) -> Result<String>;

    /// Merge the top-level fields of `patch` into an existing record.
    async fn update(&self, collection: &str, id: &str, patch: Value) -> Result<()>;

    /// Delete a record. Deleting a missing record is not an error.
    async fn delete(&self, collection: &str, id: &str) -> Result<()>;

    /// Open a stream of `(old, new)` changes on `collection`.
    async fn changes(&self, collection: &str, options: ChangeOptions) -> Result<ChangeStream>;
}
