//! Append-log file backend: one JSON document per
//! line, fsynced on every `add`; `delete` rewrites the file in place;
//! malformed lines are skipped on load rather than failing the store.

use std::fs::{File, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;

use crate::error::{EngineError, Result};
use crate::memory::backend::{apply_query, MemoryBackend, Query};
use crate::model::ContextItem;

pub struct AppendLogBackend {
    path: PathBuf,
    lock: Arc<Mutex<()>>,
}

impl AppendLogBackend {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            lock: Arc::new(Mutex::new(())),
        }
    }

    fn read_all(&self) -> Result<Vec<ContextItem>> {
        if !self.path.exists() {
            return Ok(vec![]);
        }
        let file = File::open(&self.path)?;
        let reader = BufReader::new(file);
        let mut items = Vec::new();
        for line in reader.lines() {
            let line = line?;
            if line.trim().is_empty() {
                continue;
            }
            // Malformed lines are skipped on load with no failure.
            if let Ok(item) = serde_json::from_str::<ContextItem>(&line) {
                items.push(item);
            }
        }
        Ok(items)
    }

    fn rewrite_all(&self, items: &[ContextItem]) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let mut file = OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .open(&self.path)?;
        for item in items {
            let line = serde_json::to_string(item)
                .map_err(|e| EngineError::memory("serialize_item", e.to_string()))?;
            writeln!(file, "{}", line)?;
        }
        file.sync_all()?;
        Ok(())
    }
}

#[async_trait]
impl MemoryBackend for AppendLogBackend {
    async fn add(&self, item: ContextItem) -> Result<()> {
        let _guard = self.lock.lock();
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let mut file = OpenOptions::new().append(true).create(true).open(&self.path)?;
        let line = serde_json::to_string(&item)
            .map_err(|e| EngineError::memory("serialize_item", e.to_string()))?;
        writeln!(file, "{}", line)?;
        file.sync_all()?;
        Ok(())
    }

    async fn get(&self, id: &str) -> Result<Option<ContextItem>> {
        let _guard = self.lock.lock();
        Ok(self.read_all()?.into_iter().find(|i| i.id == id))
    }

    async fn delete(&self, id: &str) -> Result<bool> {
        let _guard = self.lock.lock();
        let items = self.read_all()?;
        let before = items.len();
        let retained: Vec<ContextItem> = items.into_iter().filter(|i| i.id != id).collect();
        let deleted = retained.len() != before;
        if deleted {
            self.rewrite_all(&retained)?;
        }
        Ok(deleted)
    }

    async fn query(&self, query: &Query) -> Result<Vec<ContextItem>> {
        let _guard = self.lock.lock();
        Ok(apply_query(self.read_all()?, query))
    }

    async fn list_all(&self) -> Result<Vec<ContextItem>> {
        let _guard = self.lock.lock();
        self.read_all()
    }

    async fn clear(&self) -> Result<()> {
        let _guard = self.lock.lock();
        self.rewrite_all(&[])
    }

    async fn count(&self) -> Result<usize> {
        let _guard = self.lock.lock();
        Ok(self.read_all()?.len())
    }

    async fn enforce_retention(&self, max_items: usize) -> Result<usize> {
        let _guard = self.lock.lock();
        let mut items = self.read_all()?;
        if items.len() <= max_items {
            return Ok(0);
        }
        items.sort_by(|a, b| a.timestamp.cmp(&b.timestamp));
        let to_evict = items.len() - max_items;
        let retained = items.split_off(to_evict);
        self.rewrite_all(&retained)?;
        Ok(to_evict)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn item(id: &str) -> ContextItem {
        ContextItem {
            id: id.to_string(),
            kind: "note".to_string(),
            source: "test".to_string(),
            timestamp: Utc::now(),
            tags: vec![],
            importance: 0.5,
            token_cost: 5,
            payload: serde_json::Value::Null,
            metadata: serde_json::Map::new(),
            retrieval_score: None,
        }
    }

    #[tokio::test]
    async fn add_then_list_roundtrips() {
        let dir = tempfile_dir();
        let backend = AppendLogBackend::new(dir.join("log.jsonl"));
        backend.add(item("a")).await.unwrap();
        backend.add(item("b")).await.unwrap();
        let items = backend.list_all().await.unwrap();
        assert_eq!(items.len(), 2);
    }

    #[tokio::test]
    async fn delete_rewrites_file() {
        let dir = tempfile_dir();
        let backend = AppendLogBackend::new(dir.join("log.jsonl"));
        backend.add(item("a")).await.unwrap();
        backend.add(item("b")).await.unwrap();
        assert!(backend.delete("a").await.unwrap());
        let items = backend.list_all().await.unwrap();
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].id, "b");
    }

    #[tokio::test]
    async fn malformed_lines_are_skipped_not_fatal() {
        let dir = tempfile_dir();
        let path = dir.join("log.jsonl");
        std::fs::write(&path, "not json at all\n").unwrap();
        let backend = AppendLogBackend::new(path);
        backend.add(item("a")).await.unwrap();
        let items = backend.list_all().await.unwrap();
        assert_eq!(items.len(), 1);
    }

    fn tempfile_dir() -> PathBuf {
        let dir = std::env::temp_dir().join(format!("agent-weave-test-{}", uuid::Uuid::new_v4()));
        std::fs::create_dir_all(&dir).unwrap();
        dir
    }
}
