//! The three memory tiers: task (ephemeral,
//! per-task), project (persistent, keyed by project id), and global
//! (persistent, singleton). Each tier is a thin named wrapper over a
//! `MemoryBackend`.

use std::sync::Arc;

use dashmap::DashMap;

use crate::error::Result;
use crate::memory::backend::{MemoryBackend, Query};
use crate::memory::in_memory::InMemoryBackend;
use crate::model::ContextItem;

pub struct TaskMemoryStore {
    pub task_id: String,
    pub backend: Arc<dyn MemoryBackend>,
}

pub struct ProjectMemoryStore {
    pub project_id: String,
    pub backend: Arc<dyn MemoryBackend>,
}

pub struct GlobalMemoryStore {
    pub backend: Arc<dyn MemoryBackend>,
}

impl GlobalMemoryStore {
    pub fn new_in_memory() -> Self {
        Self {
            backend: Arc::new(InMemoryBackend::new()),
        }
    }
}

pub type BackendFactory = Arc<dyn Fn() -> Arc<dyn MemoryBackend> + Send + Sync>;

/// Owns the lazily-created per-task and per-project stores plus the single
/// global store. A factory closure per tier decides what backend new
/// entries get (in-memory by default; callers may inject an append-log or
/// SQLite factory instead, one per tier since task/project/global store
/// config is independent).
pub struct MemoryTiers {
    task_stores: DashMap<String, Arc<TaskMemoryStore>>,
    project_stores: DashMap<String, Arc<ProjectMemoryStore>>,
    pub global: GlobalMemoryStore,
    task_backend_factory: BackendFactory,
    project_backend_factory: BackendFactory,
}

impl MemoryTiers {
    pub fn new_in_memory() -> Self {
        Self {
            task_stores: DashMap::new(),
            project_stores: DashMap::new(),
            global: GlobalMemoryStore::new_in_memory(),
            task_backend_factory: Arc::new(|| Arc::new(InMemoryBackend::new())),
            project_backend_factory: Arc::new(|| Arc::new(InMemoryBackend::new())),
        }
    }

    /// Construct with an independent backend factory per tier, as produced
    /// by resolving each tier's `memory.yaml` `StoreConfig` (the task and
    /// project tiers are factories, called once per new id; the global
    /// tier is a singleton backend).
    pub fn with_backends(
        task_backend_factory: BackendFactory,
        project_backend_factory: BackendFactory,
        global_backend: Arc<dyn MemoryBackend>,
    ) -> Self {
        Self {
            task_stores: DashMap::new(),
            project_stores: DashMap::new(),
            global: GlobalMemoryStore { backend: global_backend },
            task_backend_factory,
            project_backend_factory,
        }
    }

    pub fn task_store(&self, task_id: &str) -> Arc<TaskMemoryStore> {
        self.task_stores
            .entry(task_id.to_string())
            .or_insert_with(|| {
                Arc::new(TaskMemoryStore {
                    task_id: task_id.to_string(),
                    backend: (self.task_backend_factory)(),
                })
            })
            .clone()
    }

    pub fn project_store(&self, project_id: &str) -> Arc<ProjectMemoryStore> {
        self.project_stores
            .entry(project_id.to_string())
            .or_insert_with(|| {
                Arc::new(ProjectMemoryStore {
                    project_id: project_id.to_string(),
                    backend: (self.project_backend_factory)(),
                })
            })
            .clone()
    }

    /// Clear and drop the ephemeral task store for a concluded task.
    pub async fn conclude_task(&self, task_id: &str) -> Result<()> {
        if let Some((_, store)) = self.task_stores.remove(task_id) {
            store.backend.clear().await?;
        }
        Ok(())
    }

    pub async fn add_to(&self, task_id: &str, project_id: &str, tier: crate::model::MemoryTier, item: ContextItem) -> Result<()> {
        use crate::model::MemoryTier as T;
        match tier {
            T::Task => self.task_store(task_id).backend.add(item).await,
            T::Project => self.project_store(project_id).backend.add(item).await,
            T::Global => self.global.backend.add(item).await,
        }
    }

    pub async fn query_tier(
        &self,
        task_id: &str,
        project_id: &str,
        tier: crate::model::MemoryTier,
        query: &Query,
    ) -> Result<Vec<ContextItem>> {
        use crate::model::MemoryTier as T;
        match tier {
            T::Task => self.task_store(task_id).backend.query(query).await,
            T::Project => self.project_store(project_id).backend.query(query).await,
            T::Global => self.global.backend.query(query).await,
        }
    }
}
