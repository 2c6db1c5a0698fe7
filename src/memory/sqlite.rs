//! Embedded-relational `MemoryBackend`, gated behind the `sqlite` feature.
//! Follows `SqliteChunkStore`'s pattern: a
//! single `Arc<Mutex<Connection>>`, schema created on open, one table per
//! concern, indexes on the fields queries actually filter by.

use std::path::Path;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use rusqlite::{params, Connection, OptionalExtension};

use crate::error::{EngineError, Result};
use crate::memory::backend::{apply_query, MemoryBackend, Query};
use crate::model::ContextItem;

#[derive(Clone)]
pub struct SqliteBackend {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteBackend {
    pub fn new(db_path: impl AsRef<Path>) -> Result<Self> {
        let conn = Connection::open(db_path).map_err(sqlite_err)?;
        let backend = Self { conn: Arc::new(Mutex::new(conn)) };
        backend.init_schema()?;
        Ok(backend)
    }

    pub fn in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().map_err(sqlite_err)?;
        let backend = Self { conn: Arc::new(Mutex::new(conn)) };
        backend.init_schema()?;
        Ok(backend)
    }

    fn init_schema(&self) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "CREATE TABLE IF NOT EXISTS memory_items (
                id TEXT PRIMARY KEY,
                kind TEXT NOT NULL,
                source TEXT NOT NULL,
                timestamp TEXT NOT NULL,
                tags TEXT NOT NULL,
                importance REAL NOT NULL,
                token_cost INTEGER NOT NULL,
                payload TEXT NOT NULL,
                metadata TEXT NOT NULL,
                retrieval_score REAL
            )",
            [],
        )
        .map_err(sqlite_err)?;

        conn.execute(
            "CREATE INDEX IF NOT EXISTS idx_memory_items_timestamp ON memory_items(timestamp)",
            [],
        )
        .map_err(sqlite_err)?;
        conn.execute(
            "CREATE INDEX IF NOT EXISTS idx_memory_items_importance ON memory_items(importance)",
            [],
        )
        .map_err(sqlite_err)?;

        Ok(())
    }

    fn row_to_item(row: &rusqlite::Row) -> rusqlite::Result<ContextItem> {
        let tags_json: String = row.get(4)?;
        let payload_json: String = row.get(7)?;
        let metadata_json: String = row.get(8)?;
        Ok(ContextItem {
            id: row.get(0)?,
            kind: row.get(1)?,
            source: row.get(2)?,
            timestamp: row
                .get::<_, String>(3)?
                .parse()
                .unwrap_or_else(|_| chrono::Utc::now()),
            tags: serde_json::from_str(&tags_json).unwrap_or_default(),
            importance: row.get(5)?,
            token_cost: row.get(6)?,
            payload: serde_json::from_str(&payload_json).unwrap_or(serde_json::Value::Null),
            metadata: serde_json::from_str(&metadata_json).unwrap_or_default(),
            retrieval_score: row.get(9)?,
        })
    }
}

fn sqlite_err(e: rusqlite::Error) -> EngineError {
    EngineError::memory("sqlite_error", e.to_string())
}

fn json_err(e: serde_json::Error) -> EngineError {
    EngineError::memory("serialize_item", e.to_string())
}

#[async_trait]
impl MemoryBackend for SqliteBackend {
    async fn add(&self, item: ContextItem) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT OR REPLACE INTO memory_items
             (id, kind, source, timestamp, tags, importance, token_cost, payload, metadata, retrieval_score)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
            params![
                item.id,
                item.kind,
                item.source,
                item.timestamp.to_rfc3339(),
                serde_json::to_string(&item.tags).map_err(json_err)?,
                item.importance,
                item.token_cost,
                serde_json::to_string(&item.payload).map_err(json_err)?,
                serde_json::to_string(&item.metadata).map_err(json_err)?,
                item.retrieval_score,
            ],
        )
        .map_err(sqlite_err)?;
        Ok(())
    }

    async fn get(&self, id: &str) -> Result<Option<ContextItem>> {
        let conn = self.conn.lock().unwrap();
        conn.query_row(
            "SELECT id, kind, source, timestamp, tags, importance, token_cost, payload, metadata, retrieval_score
             FROM memory_items WHERE id = ?1",
            params![id],
            Self::row_to_item,
        )
        .optional()
        .map_err(sqlite_err)
    }

    async fn delete(&self, id: &str) -> Result<bool> {
        let conn = self.conn.lock().unwrap();
        let affected = conn
            .execute("DELETE FROM memory_items WHERE id = ?1", params![id])
            .map_err(sqlite_err)?;
        Ok(affected > 0)
    }

    async fn query(&self, query: &Query) -> Result<Vec<ContextItem>> {
        // Filtering/sorting/limit semantics (tag overlap, leading-dash order_by)
        // live in `apply_query`; SQLite is used purely as a row store here.
        let items = self.list_all().await?;
        Ok(apply_query(items, query))
    }

    async fn list_all(&self) -> Result<Vec<ContextItem>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn
            .prepare(
                "SELECT id, kind, source, timestamp, tags, importance, token_cost, payload, metadata, retrieval_score
                 FROM memory_items",
            )
            .map_err(sqlite_err)?;
        let items = stmt
            .query_map([], Self::row_to_item)
            .map_err(sqlite_err)?
            .collect::<rusqlite::Result<Vec<_>>>()
            .map_err(sqlite_err)?;
        Ok(items)
    }

    async fn clear(&self) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute("DELETE FROM memory_items", []).map_err(sqlite_err)?;
        Ok(())
    }

    async fn count(&self) -> Result<usize> {
        let conn = self.conn.lock().unwrap();
        let count: i64 = conn
            .query_row("SELECT COUNT(*) FROM memory_items", [], |row| row.get(0))
            .map_err(sqlite_err)?;
        Ok(count as usize)
    }

    async fn enforce_retention(&self, max_items: usize) -> Result<usize> {
        let conn = self.conn.lock().unwrap();
        let total: i64 = conn
            .query_row("SELECT COUNT(*) FROM memory_items", [], |row| row.get(0))
            .map_err(sqlite_err)?;
        let total = total as usize;
        if total <= max_items {
            return Ok(0);
        }
        let to_evict = total - max_items;
        conn.execute(
            "DELETE FROM memory_items WHERE id IN (
                SELECT id FROM memory_items ORDER BY timestamp ASC LIMIT ?1
            )",
            params![to_evict as i64],
        )
        .map_err(sqlite_err)?;
        Ok(to_evict)
    }
}
