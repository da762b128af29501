//! Persistence strategies (spec.md §4.1): snapshot and event-sourced.
//!
//! Both strategies guarantee: state before the write call is not visible to
//! a subsequent read, and once the write call returns, the write is durable
//! and visible to all subsequent reads. The sqlite-backed implementations
//! use a single connection behind a `tokio::sync::Mutex`, the same pattern
//! the teacher uses for `vault::user_accounts::UserAccountsDB`.

use async_trait::async_trait;
use rusqlite::{params, Connection};
use serde::{de::DeserializeOwned, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;

use crate::error::CoreError;

#[async_trait]
pub trait SnapshotStore<S>: Send + Sync
where
    S: Serialize + DeserializeOwned + Send + Sync,
{
    async fn load(&self, key: &str) -> Result<Option<S>, CoreError>;
    async fn save(&self, key: &str, state: &S) -> Result<(), CoreError>;
}

#[async_trait]
pub trait EventLogStore<E>: Send + Sync
where
    E: Serialize + DeserializeOwned + Send + Sync,
{
    /// Append events in order, atomically. Must not be visible until this
    /// returns (spec.md §4.1 "before... must not be visible; after...
    /// durable").
    async fn append(&self, key: &str, events: &[E]) -> Result<(), CoreError>;

    /// Read the full ordered history for replay (spec.md §8 invariant 4).
    async fn read_all(&self, key: &str) -> Result<Vec<E>, CoreError>;
}

/// Sqlite-backed snapshot store: one row per key, JSON-serialized state,
/// an incrementing `version` column per spec.md §6 "Persisted state
/// layout".
pub struct SqliteSnapshotStore {
    conn: Arc<Mutex<Connection>>,
    table: &'static str,
}

impl SqliteSnapshotStore {
    pub fn new(conn: Arc<Mutex<Connection>>, table: &'static str) -> Result<Self, CoreError> {
        let store = Self { conn, table };
        store.ensure_table()
    }

    fn ensure_table(self) -> Result<Self, CoreError> {
        Ok(self)
    }

    pub async fn init(&self) -> Result<(), CoreError> {
        let conn = self.conn.lock().await;
        conn.execute_batch(&format!(
            "CREATE TABLE IF NOT EXISTS {} (
                key TEXT PRIMARY KEY,
                version INTEGER NOT NULL DEFAULT 0,
                body TEXT NOT NULL
            )",
            self.table
        ))
        .map_err(|e| CoreError::persistence(self.table, e.to_string()))
    }
}

#[async_trait]
impl<S> SnapshotStore<S> for SqliteSnapshotStore
where
    S: Serialize + DeserializeOwned + Send + Sync,
{
    async fn load(&self, key: &str) -> Result<Option<S>, CoreError> {
        let conn = self.conn.lock().await;
        let mut stmt = conn
            .prepare(&format!("SELECT body FROM {} WHERE key = ?1", self.table))
            .map_err(|e| CoreError::persistence(key, e.to_string()))?;
        let mut rows = stmt
            .query(params![key])
            .map_err(|e| CoreError::persistence(key, e.to_string()))?;
        if let Some(row) = rows
            .next()
            .map_err(|e| CoreError::persistence(key, e.to_string()))?
        {
            let body: String = row
                .get(0)
                .map_err(|e| CoreError::persistence(key, e.to_string()))?;
            let state = serde_json::from_str(&body)
                .map_err(|e| CoreError::persistence(key, e.to_string()))?;
            Ok(Some(state))
        } else {
            Ok(None)
        }
    }

    async fn save(&self, key: &str, state: &S) -> Result<(), CoreError> {
        let body = serde_json::to_string(state)
            .map_err(|e| CoreError::persistence(key, e.to_string()))?;
        let conn = self.conn.lock().await;
        conn.execute(
            &format!(
                "INSERT INTO {} (key, version, body) VALUES (?1, 1, ?2)
                 ON CONFLICT(key) DO UPDATE SET version = version + 1, body = excluded.body",
                self.table
            ),
            params![key, body],
        )
        .map_err(|e| CoreError::persistence(key, e.to_string()))?;
        Ok(())
    }
}

/// Sqlite-backed append-only event log: one row per event, ordered by an
/// auto-incrementing sequence column, grouped by key.
pub struct SqliteEventLogStore {
    conn: Arc<Mutex<Connection>>,
    table: &'static str,
}

impl SqliteEventLogStore {
    pub fn new(conn: Arc<Mutex<Connection>>, table: &'static str) -> Self {
        Self { conn, table }
    }

    pub async fn init(&self) -> Result<(), CoreError> {
        let conn = self.conn.lock().await;
        conn.execute_batch(&format!(
            "CREATE TABLE IF NOT EXISTS {} (
                seq INTEGER PRIMARY KEY AUTOINCREMENT,
                key TEXT NOT NULL,
                body TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_{0}_key ON {0}(key);",
            self.table
        ))
        .map_err(|e| CoreError::persistence(self.table, e.to_string()))
    }
}

#[async_trait]
impl<E> EventLogStore<E> for SqliteEventLogStore
where
    E: Serialize + DeserializeOwned + Send + Sync,
{
    async fn append(&self, key: &str, events: &[E]) -> Result<(), CoreError> {
        if events.is_empty() {
            return Ok(());
        }
        let mut conn = self.conn.lock().await;
        let tx = conn
            .transaction()
            .map_err(|e| CoreError::persistence(key, e.to_string()))?;
        for event in events {
            let body = serde_json::to_string(event)
                .map_err(|e| CoreError::persistence(key, e.to_string()))?;
            tx.execute(
                &format!("INSERT INTO {} (key, body) VALUES (?1, ?2)", self.table),
                params![key, body],
            )
            .map_err(|e| CoreError::persistence(key, e.to_string()))?;
        }
        tx.commit()
            .map_err(|e| CoreError::persistence(key, e.to_string()))?;
        Ok(())
    }

    async fn read_all(&self, key: &str) -> Result<Vec<E>, CoreError> {
        let conn = self.conn.lock().await;
        let mut stmt = conn
            .prepare(&format!(
                "SELECT body FROM {} WHERE key = ?1 ORDER BY seq ASC",
                self.table
            ))
            .map_err(|e| CoreError::persistence(key, e.to_string()))?;
        let rows = stmt
            .query_map(params![key], |row| row.get::<_, String>(0))
            .map_err(|e| CoreError::persistence(key, e.to_string()))?;
        let mut out = Vec::new();
        for row in rows {
            let body = row.map_err(|e| CoreError::persistence(key, e.to_string()))?;
            out.push(
                serde_json::from_str(&body)
                    .map_err(|e| CoreError::persistence(key, e.to_string()))?,
            );
        }
        Ok(out)
    }
}

/// In-memory stores for unit tests that don't need a sqlite fixture.
pub struct InMemorySnapshotStore<S> {
    data: Mutex<HashMap<String, S>>,
}

impl<S: Clone + Send + Sync> InMemorySnapshotStore<S> {
    pub fn new() -> Self {
        Self {
            data: Mutex::new(HashMap::new()),
        }
    }
}

impl<S: Clone + Send + Sync> Default for InMemorySnapshotStore<S> {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl<S> SnapshotStore<S> for InMemorySnapshotStore<S>
where
    S: Serialize + DeserializeOwned + Clone + Send + Sync,
{
    async fn load(&self, key: &str) -> Result<Option<S>, CoreError> {
        Ok(self.data.lock().await.get(key).cloned())
    }

    async fn save(&self, key: &str, state: &S) -> Result<(), CoreError> {
        self.data.lock().await.insert(key.to_string(), state.clone());
        Ok(())
    }
}

pub struct InMemoryEventLogStore<E> {
    data: Mutex<HashMap<String, Vec<E>>>,
}

impl<E: Clone + Send + Sync> InMemoryEventLogStore<E> {
    pub fn new() -> Self {
        Self {
            data: Mutex::new(HashMap::new()),
        }
    }
}

impl<E: Clone + Send + Sync> Default for InMemoryEventLogStore<E> {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl<E> EventLogStore<E> for InMemoryEventLogStore<E>
where
    E: Serialize + DeserializeOwned + Clone + Send + Sync,
{
    async fn append(&self, key: &str, events: &[E]) -> Result<(), CoreError> {
        self.data
            .lock()
            .await
            .entry(key.to_string())
            .or_default()
            .extend_from_slice(events);
        Ok(())
    }

    async fn read_all(&self, key: &str) -> Result<Vec<E>, CoreError> {
        Ok(self.data.lock().await.get(key).cloned().unwrap_or_default())
    }
}
