//! # huddle-store
//!
//! Record store collaborator for the huddle gateway.
//!
//! - [`Store`]: the four operations the gateway relies on (insert, update,
//!   delete, open a change stream)
//! - [`SqliteStore`]: `rusqlite` + `r2d2` implementation with live change
//!   fan-out over a `tokio::sync::broadcast` channel
//! - [`migrations`]: version-tracked schema
//!
//! Change streams yield `(old, new)` pairs. With
//! [`ChangeOptions::include_initial`] every matching record is first emitted
//! once as `(None, Some(record))`, then live changes follow. The snapshot
//! and the live subscription are taken under the same write gate, so no
//! write is lost or seen twice between them.

#![deny(unsafe_code)]

pub mod connection;
pub mod errors;
pub mod migrations;
pub mod sqlite;
pub mod store;
pub mod types;

pub use connection::{ConnectionConfig, ConnectionPool, new_file, new_in_memory};
pub use errors::{Result, StoreError};
pub use sqlite::SqliteStore;
pub use store::Store;
pub use types::{Change, ChangeOptions, ChangeStream, FieldFilter, OrderBy};
