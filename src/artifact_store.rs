//! Artifact store: a monotonically growing
//! `artifact_id -> Artifact` map with secondary by-task/by-node indices,
//! following `ReverseDependencyIndex`'s lock-free `DashMap` idiom from the
//! codegraph-orchestration pipeline. The primary map uses
//! `parking_lot::Mutex` instead so insert-then-evict stays atomic when a
//! maximum size is configured.

use std::sync::Arc;

use chrono::Utc;
use dashmap::DashMap;
use parking_lot::Mutex;
use serde_json::Value;
use uuid::Uuid;

use crate::model::{Artifact, ArtifactType};

struct ArtifactTable {
    by_id: std::collections::HashMap<String, Artifact>,
}

/// Indexed artifact storage. Cheap to clone (`Arc` internals); intended to
/// be shared across the engine's collaborators.
pub struct ArtifactStore {
    table: Mutex<ArtifactTable>,
    by_task: DashMap<String, Vec<String>>,
    by_node: DashMap<String, Vec<String>>,
    by_type: DashMap<ArtifactType, Vec<String>>,
    max_artifacts: Option<usize>,
}

impl ArtifactStore {
    pub fn new() -> Self {
        Self {
            table: Mutex::new(ArtifactTable { by_id: std::collections::HashMap::new() }),
            by_task: DashMap::new(),
            by_node: DashMap::new(),
            by_type: DashMap::new(),
            max_artifacts: None,
        }
    }

    pub fn with_max_artifacts(max_artifacts: usize) -> Self {
        Self {
            max_artifacts: Some(max_artifacts),
            ..Self::new()
        }
    }

    pub fn store(
        &self,
        task_id: &str,
        artifact_type: ArtifactType,
        payload: Value,
        node_id: Option<String>,
        schema_ref: Option<String>,
        metadata: Option<serde_json::Map<String, Value>>,
    ) -> String {
        let id = format!("art-{}", Uuid::new_v4());
        let artifact = Artifact {
            id: id.clone(),
            task_id: task_id.to_string(),
            node_id: node_id.clone(),
            artifact_type,
            timestamp: Utc::now(),
            schema_ref,
            payload,
            metadata: metadata.unwrap_or_default(),
        };

        {
            let mut table = self.table.lock();
            table.by_id.insert(id.clone(), artifact);
        }
        self.by_task.entry(task_id.to_string()).or_default().push(id.clone());
        if let Some(node_id) = &node_id {
            self.by_node.entry(node_id.clone()).or_default().push(id.clone());
        }
        self.by_type.entry(artifact_type).or_default().push(id.clone());

        if let Some(max) = self.max_artifacts {
            self.evict_oldest_until(max);
        }

        id
    }

    pub fn get(&self, artifact_id: &str) -> Option<Artifact> {
        self.table.lock().by_id.get(artifact_id).cloned()
    }

    pub fn by_task_id(&self, task_id: &str) -> Vec<Artifact> {
        self.ids_to_artifacts(self.by_task.get(task_id).map(|v| v.clone()).unwrap_or_default())
    }

    pub fn by_node_id(&self, node_id: &str) -> Vec<Artifact> {
        self.ids_to_artifacts(self.by_node.get(node_id).map(|v| v.clone()).unwrap_or_default())
    }

    pub fn by_type(&self, artifact_type: ArtifactType, task_id: Option<&str>) -> Vec<Artifact> {
        let ids = self.by_type.get(&artifact_type).map(|v| v.clone()).unwrap_or_default();
        let artifacts = self.ids_to_artifacts(ids);
        match task_id {
            Some(task_id) => artifacts.into_iter().filter(|a| a.task_id == task_id).collect(),
            None => artifacts,
        }
    }

    pub fn len(&self) -> usize {
        self.table.lock().by_id.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn ids_to_artifacts(&self, ids: Vec<String>) -> Vec<Artifact> {
        let table = self.table.lock();
        ids.iter().filter_map(|id| table.by_id.get(id).cloned()).collect()
    }

    /// Evict oldest-by-timestamp artifacts until at most `max` remain,
    /// pruning the secondary indices along with the primary map.
    fn evict_oldest_until(&self, max: usize) {
        let mut table = self.table.lock();
        if table.by_id.len() <= max {
            return;
        }
        let mut ordered: Vec<(String, chrono::DateTime<Utc>)> =
            table.by_id.iter().map(|(id, a)| (id.clone(), a.timestamp)).collect();
        ordered.sort_by_key(|(_, ts)| *ts);
        let to_evict = ordered.len() - max;
        for (id, _) in ordered.into_iter().take(to_evict) {
            table.by_id.remove(&id);
            for mut entry in self.by_task.iter_mut() {
                entry.retain(|existing| existing != &id);
            }
            for mut entry in self.by_node.iter_mut() {
                entry.retain(|existing| existing != &id);
            }
            for mut entry in self.by_type.iter_mut() {
                entry.retain(|existing| existing != &id);
            }
        }
    }
}

impl Default for ArtifactStore {
    fn default() -> Self {
        Self::new()
    }
}
