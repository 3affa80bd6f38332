//! The archival store contract: a key-value collaborator the hierarchical
//! memory manager pages items out to, grounded on
//! `tandem-memory::db` SQLite wrapper, but narrowed to the three operations
//! the manager actually needs — no vector search, since matching here is
//! substring/keyword, not embedding similarity.

use std::collections::HashMap;
use std::sync::Mutex as StdMutex;

use rusqlite::Connection;
use tokio::sync::Mutex;

use crate::types::{MemoryError, MemoryResult};

#[async_trait::async_trait]
pub trait ArchivalStore: Send + Sync {
    async fn put(&self, id: &str, bytes: Vec<u8>) -> MemoryResult<()>;
    async fn get(&self, id: &str) -> MemoryResult<Option<Vec<u8>>>;
    /// Substring/keyword match over stored content, most recently written
    /// first, capped at `k` ids.
    async fn search(&self, query: &str, k: usize) -> MemoryResult<Vec<String>>;
    async fn remove(&self, id: &str) -> MemoryResult<()>;
}

/// An in-process archival store for tests and short-lived runs.
#[derive(Default)]
pub struct InMemoryArchivalStore {
    entries: StdMutex<HashMap<String, Vec<u8>>>,
    order: StdMutex<Vec<String>>,
}

impl InMemoryArchivalStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait::async_trait]
impl ArchivalStore for InMemoryArchivalStore {
    async fn put(&self, id: &str, bytes: Vec<u8>) -> MemoryResult<()> {
        let mut entries = self.entries.lock().map_err(|e| MemoryError::Lock(e.to_string()))?;
        let mut order = self.order.lock().map_err(|e| MemoryError::Lock(e.to_string()))?;
        if !entries.contains_key(id) {
            order.push(id.to_string());
        }
        entries.insert(id.to_string(), bytes);
        Ok(())
    }

    async fn get(&self, id: &str) -> MemoryResult<Option<Vec<u8>>> {
        let entries = self.entries.lock().map_err(|e| MemoryError::Lock(e.to_string()))?;
        Ok(entries.get(id).cloned())
    }

    async fn search(&self, query: &str, k: usize) -> MemoryResult<Vec<String>> {
        let entries = self.entries.lock().map_err(|e| MemoryError::Lock(e.to_string()))?;
        let order = self.order.lock().map_err(|e| MemoryError::Lock(e.to_string()))?;
        let query = query.to_lowercase();
        let mut hits: Vec<String> = order
            .iter()
            .rev()
            .filter(|id| {
                entries
                    .get(*id)
                    .map(|bytes| String::from_utf8_lossy(bytes).to_lowercase().contains(&query))
                    .unwrap_or(false)
            })
            .cloned()
            .collect();
        hits.truncate(k);
        Ok(hits)
    }

    async fn remove(&self, id: &str) -> MemoryResult<()> {
        let mut entries = self.entries.lock().map_err(|e| MemoryError::Lock(e.to_string()))?;
        let mut order = self.order.lock().map_err(|e| MemoryError::Lock(e.to_string()))?;
        entries.remove(id);
        order.retain(|existing| existing != id);
        Ok(())
    }
}

/// A durable archival store, one SQLite file per task directory. Uses the
/// same `tokio::sync::Mutex<Connection>` wrapping pattern so the
/// blocking rusqlite calls still serialize behind an async-friendly lock.
pub struct SqliteArchivalStore {
    conn: Mutex<Connection>,
}

impl SqliteArchivalStore {
    pub fn open(path: &std::path::Path) -> MemoryResult<Self> {
        let conn = Connection::open(path)?;
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS archival (
                id TEXT PRIMARY KEY,
                content BLOB NOT NULL,
                written_at INTEGER NOT NULL
            );",
        )?;
        Ok(Self { conn: Mutex::new(conn) })
    }
}

#[async_trait::async_trait]
impl ArchivalStore for SqliteArchivalStore {
    async fn put(&self, id: &str, bytes: Vec<u8>) -> MemoryResult<()> {
        let conn = self.conn.lock().await;
        conn.execute(
            "INSERT INTO archival (id, content, written_at) VALUES (?1, ?2, strftime('%s','now'))
             ON CONFLICT(id) DO UPDATE SET content = excluded.content, written_at = excluded.written_at",
            rusqlite::params![id, bytes],
        )?;
        Ok(())
    }

    async fn get(&self, id: &str) -> MemoryResult<Option<Vec<u8>>> {
        let conn = self.conn.lock().await;
        let mut stmt = conn.prepare("SELECT content FROM archival WHERE id = ?1")?;
        let mut rows = stmt.query(rusqlite::params![id])?;
        if let Some(row) = rows.next()? {
            Ok(Some(row.get(0)?))
        } else {
            Ok(None)
        }
    }

    async fn search(&self, query: &str, k: usize) -> MemoryResult<Vec<String>> {
        let conn = self.conn.lock().await;
        let mut stmt = conn.prepare(
            "SELECT id FROM archival WHERE CAST(content AS TEXT) LIKE ?1 ORDER BY written_at DESC LIMIT ?2",
        )?;
        let pattern = format!("%{query}%");
        let rows = stmt.query_map(rusqlite::params![pattern, k as i64], |row| row.get::<_, String>(0))?;
        let mut ids = Vec::new();
        for row in rows {
            ids.push(row?);
        }
        Ok(ids)
    }

    async fn remove(&self, id: &str) -> MemoryResult<()> {
        let conn = self.conn.lock().await;
        conn.execute("DELETE FROM archival WHERE id = ?1", rusqlite::params![id])?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn in_memory_roundtrip() {
        let store = InMemoryArchivalStore::new();
        store.put("a", b"hello world".to_vec()).await.unwrap();
        assert_eq!(store.get("a").await.unwrap(), Some(b"hello world".to_vec()));
        let hits = store.search("hello", 10).await.unwrap();
        assert_eq!(hits, vec!["a".to_string()]);
    }

    #[tokio::test]
    async fn in_memory_search_respects_k() {
        let store = InMemoryArchivalStore::new();
        store.put("a", b"tag match".to_vec()).await.unwrap();
        store.put("b", b"tag match".to_vec()).await.unwrap();
        let hits = store.search("tag", 1).await.unwrap();
        assert_eq!(hits.len(), 1);
    }
}
