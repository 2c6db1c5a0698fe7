//! In-memory `MemoryBackend`, following `CheckpointManager::new_in_memory`'s
//! `Arc<parking_lot::Mutex<Vec<_>>>` pattern.

use async_trait::async_trait;
use parking_lot::Mutex;
use std::sync::Arc;

use crate::error::Result;
use crate::memory::backend::{apply_query, MemoryBackend, Query};
use crate::model::ContextItem;

#[derive(Default, Clone)]
pub struct InMemoryBackend {
    items: Arc<Mutex<Vec<ContextItem>>>,
}

impl InMemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl MemoryBackend for InMemoryBackend {
    async fn add(&self, item: ContextItem) -> Result<()> {
        let mut items = self.items.lock();
        items.retain(|existing| existing.id != item.id);
        items.push(item);
        Ok(())
    }

    async fn get(&self, id: &str) -> Result<Option<ContextItem>> {
        Ok(self.items.lock().iter().find(|i| i.id == id).cloned())
    }

    async fn delete(&self, id: &str) -> Result<bool> {
        let mut items = self.items.lock();
        let before = items.len();
        items.retain(|i| i.id != id);
        Ok(items.len() != before)
    }

    async fn query(&self, query: &Query) -> Result<Vec<ContextItem>> {
        let items = self.items.lock().clone();
        Ok(apply_query(items, query))
    }

    async fn list_all(&self) -> Result<Vec<ContextItem>> {
        Ok(self.items.lock().clone())
    }

    async fn clear(&self) -> Result<()> {
        self.items.lock().clear();
        Ok(())
    }

    async fn count(&self) -> Result<usize> {
        Ok(self.items.lock().len())
    }

    async fn enforce_retention(&self, max_items: usize) -> Result<usize> {
        let mut items = self.items.lock();
        if items.len() <= max_items {
            return Ok(0);
        }
        items.sort_by(|a, b| a.timestamp.cmp(&b.timestamp));
        let to_evict = items.len() - max_items;
        items.drain(0..to_evict);
        Ok(to_evict)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::backend::{Filter, FilterOp};
    use chrono::{Duration, Utc};

    fn item(id: &str, age_secs: i64) -> ContextItem {
        ContextItem {
            id: id.to_string(),
            kind: "note".to_string(),
            source: "test".to_string(),
            timestamp: Utc::now() - Duration::seconds(age_secs),
            tags: vec![],
            importance: 0.5,
            token_cost: 5,
            payload: serde_json::Value::Null,
            metadata: serde_json::Map::new(),
            retrieval_score: None,
        }
    }

    #[tokio::test]
    async fn add_get_delete_roundtrip() {
        let backend = InMemoryBackend::new();
        backend.add(item("a", 0)).await.unwrap();
        assert!(backend.get("a").await.unwrap().is_some());
        assert!(backend.delete("a").await.unwrap());
        assert!(backend.get("a").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn add_replaces_existing_id() {
        let backend = InMemoryBackend::new();
        backend.add(item("a", 100)).await.unwrap();
        backend.add(item("a", 0)).await.unwrap();
        assert_eq!(backend.count().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn enforce_retention_evicts_oldest() {
        let backend = InMemoryBackend::new();
        backend.add(item("old", 1000)).await.unwrap();
        backend.add(item("mid", 500)).await.unwrap();
        backend.add(item("new", 0)).await.unwrap();

        let evicted = backend.enforce_retention(2).await.unwrap();
        assert_eq!(evicted, 1);
        assert_eq!(backend.count().await.unwrap(), 2);
        assert!(backend.get("old").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn query_applies_filters() {
        let backend = InMemoryBackend::new();
        backend.add(item("a", 0)).await.unwrap();
        backend.add(item("b", 0)).await.unwrap();
        let query = Query {
            filters: vec![Filter {
                field: "id".to_string(),
                op: FilterOp::Eq(serde_json::Value::String("a".to_string())),
            }],
            limit: None,
            order_by: None,
        };
        let result = backend.query(&query).await.unwrap();
        assert_eq!(result.len(), 1);
        assert_eq!(result[0].id, "a");
    }
}
