//! `SQLite`-backed [`Store`] with live change fan-out.
//!
//! Records live in a single `records` table as JSON text. Every successful
//! write publishes its `(old, new)` pair on a `tokio::sync::broadcast`
//! channel; change streams are receivers of that channel filtered to one
//! collection. Writes publish while holding the write gate, and a stream
//! subscribes and reads its snapshot under the same gate.

use std::sync::Arc;

use async_trait::async_trait;
use futures::StreamExt;
use parking_lot::Mutex;
use rusqlite::{Connection, OptionalExtension, params};
use serde_json::Value;
use tokio::sync::broadcast;
use tokio_stream::wrappers::BroadcastStream;
use tokio_stream::wrappers::errors::BroadcastStreamRecvError;
use tracing::{debug, instrument};
use uuid::Uuid;

use crate::connection::{ConnectionConfig, ConnectionPool, new_file, new_in_memory};
use crate::errors::{Result, StoreError};
use crate::migrations;
use crate::store::Store;
use crate::types::{Change, ChangeOptions, ChangeStream, OrderBy};

/// Live-change buffer per subscriber before it is reported as lagging.
pub const DEFAULT_CHANGE_BUFFER: usize = 1024;

#[derive(Debug)]
struct RecordChange {
    collection: String,
    change: Change,
}

/// Record store on top of a `SQLite` connection pool.
#[derive(Clone)]
pub struct SqliteStore {
    pool: ConnectionPool,
    feed: broadcast::Sender<Arc<RecordChange>>,
    write_gate: Arc<Mutex<()>>,
}

impl SqliteStore {
    /// Wrap a pool, running pending migrations first.
    pub fn new(pool: ConnectionPool) -> Result<Self> {
        Self::with_change_buffer(pool, DEFAULT_CHANGE_BUFFER)
    }

    /// Like [`SqliteStore::new`] with a custom live-change buffer size.
    pub fn with_change_buffer(pool: ConnectionPool, capacity: usize) -> Result<Self> {
        {
            let conn = pool.get()?;
            let _ = migrations::run_migrations(&conn)?;
        }
        let (feed, _) = broadcast::channel(capacity.max(1));
        Ok(Self {
            pool,
            feed,
            write_gate: Arc::new(Mutex::new(())),
        })
    }

    /// Fresh in-memory store.
    pub fn in_memory() -> Result<Self> {
        Self::new(new_in_memory(&ConnectionConfig::default())?)
    }

    /// Open a store at `path`; `":memory:"` selects an in-memory database.
    pub fn open(path: &str, config: &ConnectionConfig) -> Result<Self> {
        let pool = if path == ":memory:" {
            new_in_memory(config)?
        } else {
            new_file(path, config)?
        };
        debug!(path, "record store opened");
        Self::new(pool)
    }

    /// Fetch one record.
    pub async fn get(&self, collection: &str, id: &str) -> Result<Option<Value>> {
        let (collection, id) = (collection.to_owned(), id.to_owned());
        self.blocking(move |store| {
            let conn = store.pool.get()?;
            load(&conn, &collection, &id)
        })
        .await
    }

    /// Number of records in a collection.
    pub async fn count(&self, collection: &str) -> Result<usize> {
        let collection = collection.to_owned();
        self.blocking(move |store| {
            let conn = store.pool.get()?;
            let n: i64 = conn.query_row(
                "SELECT COUNT(*) FROM records WHERE collection = ?1",
                params![collection],
                |r| r.get(0),
            )?;
            Ok(usize::try_from(n).unwrap_or_default())
        })
        .await
    }

    /// Number of change streams that have not been dropped yet.
    pub fn open_streams(&self) -> usize {
        self.feed.receiver_count()
    }

    async fn blocking<T, F>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&SqliteStore) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let store = self.clone();
        tokio::task::spawn_blocking(move || f(&store))
            .await
            .map_err(|e| StoreError::Internal(e.to_string()))?
    }

    fn publish(&self, collection: &str, change: Change) {
        // no receivers is fine: nobody is watching
        let _ = self.feed.send(Arc::new(RecordChange {
            collection: collection.to_owned(),
            change,
        }));
    }

    fn insert_sync(&self, collection: &str, record: Value) -> Result<String> {
        let Value::Object(mut fields) = record else {
            return Err(StoreError::InvalidRecord("record must be a JSON object".into()));
        };
        let id = match fields.get("id") {
            Some(Value::String(id)) if !id.is_empty() => id.clone(),
            _ => Uuid::now_v7().to_string(),
        };
        let _ = fields.insert("id".into(), Value::String(id.clone()));
        let record = Value::Object(fields);
        let body = serde_json::to_string(&record)?;

        let _gate = self.write_gate.lock();
        let conn = self.pool.get()?;
        let _ = conn.execute(
            "INSERT INTO records (collection, id, body) VALUES (?1, ?2, ?3)",
            params![collection, id, body],
        )?;
        self.publish(collection, Change::added(record));
        Ok(id)
    }

    fn update_sync(&self, collection: &str, id: &str, patch: Value) -> Result<()> {
        let Value::Object(patch) = patch else {
            return Err(StoreError::InvalidRecord("patch must be a JSON object".into()));
        };

        let _gate = self.write_gate.lock();
        let conn = self.pool.get()?;
        let old = load(&conn, collection, id)?.ok_or_else(|| StoreError::NotFound {
            collection: collection.to_owned(),
            id: id.to_owned(),
        })?;

        let mut new = old.clone();
        if let Value::Object(fields) = &mut new {
            for (key, value) in patch {
                if key != "id" {
                    let _ = fields.insert(key, value);
                }
            }
        }
        if new == old {
            return Ok(());
        }

        let _ = conn.execute(
            "UPDATE records SET body = ?3 WHERE collection = ?1 AND id = ?2",
            params![collection, id, serde_json::to_string(&new)?],
        )?;
        self.publish(
            collection,
            Change {
                old_value: Some(old),
                new_value: Some(new),
            },
        );
        Ok(())
    }

    fn delete_sync(&self, collection: &str, id: &str) -> Result<()> {
        let _gate = self.write_gate.lock();
        let conn = self.pool.get()?;
        let Some(old) = load(&conn, collection, id)? else {
            return Ok(());
        };
        let _ = conn.execute(
            "DELETE FROM records WHERE collection = ?1 AND id = ?2",
            params![collection, id],
        )?;
        self.publish(
            collection,
            Change {
                old_value: Some(old),
                new_value: None,
            },
        );
        Ok(())
    }

    fn changes_sync(&self, collection: &str, options: &ChangeOptions) -> Result<ChangeStream> {
        let (rx, initial) = {
            let _gate = self.write_gate.lock();
            let rx = self.feed.subscribe();
            let initial = if options.include_initial {
                let conn = self.pool.get()?;
                snapshot(&conn, collection, options.order_by.as_ref())?
            } else {
                Vec::new()
            };
            (rx, initial)
        };

        let filter = options.filter.clone();
        let initial: Vec<_> = initial
            .into_iter()
            .filter(|record| filter.as_ref().is_none_or(|f| f.matches(record)))
            .map(|record| Ok(Change::added(record)))
            .collect();

        let collection = collection.to_owned();
        let live = BroadcastStream::new(rx).filter_map(move |item| {
            let out = match item {
                Ok(rc) if rc.collection == collection => {
                    rc.change.clone().restrict(filter.as_ref()).map(Ok)
                }
                Ok(_) => None,
                Err(BroadcastStreamRecvError::Lagged(n)) => Some(Err(StoreError::Lagged(n))),
            };
            futures::future::ready(out)
        });

        Ok(futures::stream::iter(initial).chain(live).boxed())
    }
}

#[async_trait]
impl Store for SqliteStore {
    #[instrument(skip(self, record))]
    async fn insert(&self, collection: &str, record: Value) -> Result<String> {
        let collection = collection.to_owned();
        self.blocking(move |store| store.insert_sync(&collection, record))
            .await
    }

    #[instrument(skip(self, patch))]
    async fn update(&self, collection: &str, id: &str, patch: Value) -> Result<()> {
        let (collection, id) = (collection.to_owned(), id.to_owned());
        self.blocking(move |store| store.update_sync(&collection, &id, patch))
            .await
    }

    #[instrument(skip(self))]
    async fn delete(&self, collection: &str, id: &str) -> Result<()> {
        let (collection, id) = (collection.to_owned(), id.to_owned());
        self.blocking(move |store| store.delete_sync(&collection, &id))
            .await
    }

    #[instrument(skip(self, options))]
    async fn changes(&self, collection: &str, options: ChangeOptions) -> Result<ChangeStream> {
        let collection = collection.to_owned();
        self.blocking(move |store| store.changes_sync(&collection, &options))
            .await
    }
}

fn load(conn: &Connection, collection: &str, id: &str) -> Result<Option<Value>> {
    let body: Option<String> = conn
        .query_row(
            "SELECT body FROM records WHERE collection = ?1 AND id = ?2",
            params![collection, id],
            |r| r.get(0),
        )
        .optional()?;
    Ok(body.map(|b| serde_json::from_str(&b)).transpose()?)
}

fn snapshot(conn: &Connection, collection: &str, order: Option<&OrderBy>) -> Result<Vec<Value>> {
    let bodies: Vec<String> = match order {
        None => {
            let mut stmt =
                conn.prepare("SELECT body FROM records WHERE collection = ?1 ORDER BY seq")?;
            let rows = stmt
                .query_map(params![collection], |r| r.get(0))?
                .collect::<rusqlite::Result<_>>()?;
            rows
        }
        Some(order) => {
            let sql = if order.descending {
                "SELECT body FROM records WHERE collection = ?1 \
                 ORDER BY json_extract(body, ?2) DESC, seq DESC"
            } else {
                "SELECT body FROM records WHERE collection = ?1 \
                 ORDER BY json_extract(body, ?2) ASC, seq ASC"
            };
            let path = format!("$.{}", order.field);
            let mut stmt = conn.prepare(sql)?;
            let rows = stmt
                .query_map(params![collection, path], |r| r.get(0))?
                .collect::<rusqlite::Result<_>>()?;
            rows
        }
    };
    bodies
        .iter()
        .map(|b| serde_json::from_str(b).map_err(StoreError::from))
        .collect()
}
