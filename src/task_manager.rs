//! Task manager: owns the in-memory task map and lineage, plus JSON
//! checkpoint save/load/list at `<root>/<project_id>/<task_id>.json`.
//! Lineage and lifecycle tracking follow `CheckpointManager`'s
//! mutex-guarded in-memory map idiom from the codegraph-orchestration
//! pipeline.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::Deserialize;

use crate::error::{EngineError, Result};
use crate::model::{StageExecutionRecord, Task, TaskStatus};

/// Cheap checkpoint summary: status and timestamps without `history` or
/// `lineage`, so a caller that only needs "is it done yet" doesn't pay for
/// deserializing a task's full execution record.
#[derive(Debug, Clone, Deserialize)]
pub struct TaskMetadata {
    pub task_id: String,
    pub status: TaskStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Mutex-guarded task map plus disk-backed JSON checkpointing.
pub struct TaskManager {
    tasks: Mutex<HashMap<String, Task>>,
    storage_root: PathBuf,
}

impl TaskManager {
    pub fn new(storage_root: impl Into<PathBuf>) -> Self {
        Self { tasks: Mutex::new(HashMap::new()), storage_root: storage_root.into() }
    }

    pub fn in_memory() -> Self {
        Self::new(".agent-weave/tasks")
    }

    pub fn insert(&self, task: Task) {
        self.tasks.lock().insert(task.task_id.clone(), task);
    }

    pub fn get(&self, task_id: &str) -> Option<Task> {
        self.tasks.lock().get(task_id).cloned()
    }

    pub fn set_status(&self, task_id: &str, status: TaskStatus) {
        let mut tasks = self.tasks.lock();
        if let Some(task) = tasks.get_mut(task_id) {
            task.status = status;
            task.updated_at = chrono::Utc::now();
        }
    }

    pub fn set_current_output(&self, task_id: &str, output: Option<serde_json::Value>) {
        let mut tasks = self.tasks.lock();
        if let Some(task) = tasks.get_mut(task_id) {
            task.current_output = output;
            task.updated_at = chrono::Utc::now();
        }
    }

    pub fn set_current_node(&self, task_id: &str, node_id: Option<String>) {
        let mut tasks = self.tasks.lock();
        if let Some(task) = tasks.get_mut(task_id) {
            task.current_node_id = node_id;
            task.updated_at = chrono::Utc::now();
        }
    }

    pub fn append_history(&self, task_id: &str, record: StageExecutionRecord) {
        let mut tasks = self.tasks.lock();
        if let Some(task) = tasks.get_mut(task_id) {
            task.history.push(record);
            task.updated_at = chrono::Utc::now();
        }
    }

    /// All task ids currently held in memory, regardless of project or status.
    pub fn all_task_ids(&self) -> Vec<String> {
        self.tasks.lock().keys().cloned().collect()
    }

    pub fn add_child(&self, parent_task_id: &str, child_task_id: &str) {
        let mut tasks = self.tasks.lock();
        if let Some(task) = tasks.get_mut(parent_task_id) {
            task.lineage.child_task_ids.push(child_task_id.to_string());
            task.updated_at = chrono::Utc::now();
        }
    }

    /// Serialize `task_id` as JSON to `<storage_root>/<project_id>/<task_id>.json`,
    /// creating parent directories as needed. Overwrites any existing file.
    pub fn save_checkpoint(&self, task_id: &str) -> Result<()> {
        let task = self
            .tasks
            .lock()
            .get(task_id)
            .cloned()
            .ok_or_else(|| EngineError::task_manager("task_not_found", format!("task '{}' not found in memory", task_id)))?;

        let project_id = Task::project_id_from_task_id(task_id);
        let task_file = self.storage_root.join(&project_id).join(format!("{}.json", task_id));

        if let Some(parent) = task_file.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let serialized = serde_json::to_string_pretty(&task)?;
        std::fs::write(&task_file, serialized)?;
        Ok(())
    }

    /// Load `task_id`'s checkpoint from disk and insert it into the
    /// in-memory map, overwriting any existing entry of the same id.
    pub fn load_checkpoint(&self, task_id: &str) -> Result<Task> {
        let project_id = Task::project_id_from_task_id(task_id);
        let task_file = self.storage_root.join(&project_id).join(format!("{}.json", task_id));

        if !task_file.exists() {
            return Err(EngineError::task_manager(
                "checkpoint_not_found",
                format!("checkpoint file not found: {}", task_file.display()),
            ));
        }

        let raw = std::fs::read_to_string(&task_file)?;
        let task: Task = serde_json::from_str(&raw)?;
        self.tasks.lock().insert(task_id.to_string(), task.clone());
        Ok(task)
    }

    /// Read `task_id`'s checkpoint file and extract just its id, status,
    /// and timestamps, without deserializing `history`/`lineage`/`spec`.
    /// Unlike `load_checkpoint`, this never touches the in-memory map.
    pub fn metadata(&self, task_id: &str) -> Result<TaskMetadata> {
        let project_id = Task::project_id_from_task_id(task_id);
        let task_file = self.storage_root.join(&project_id).join(format!("{}.json", task_id));

        if !task_file.exists() {
            return Err(EngineError::task_manager(
                "checkpoint_not_found",
                format!("checkpoint file not found: {}", task_file.display()),
            ));
        }

        let raw = std::fs::read_to_string(&task_file)?;
        let metadata: TaskMetadata = serde_json::from_str(&raw)?;
        Ok(metadata)
    }

    /// List task ids checkpointed for `project_id`. A missing directory is
    /// not an error — it yields an empty list.
    pub fn list_tasks(&self, project_id: &str) -> Result<Vec<String>> {
        let project_dir = self.storage_root.join(project_id);
        if !project_dir.exists() {
            return Ok(vec![]);
        }

        let mut task_ids: Vec<String> = std::fs::read_dir(&project_dir)?
            .filter_map(|entry| entry.ok())
            .filter(|entry| entry.path().extension().is_some_and(|ext| ext == "json"))
            .filter_map(|entry| entry.path().file_stem().map(|s| s.to_string_lossy().into_owned()))
            .collect();
        task_ids.sort();
        Ok(task_ids)
    }
}

/// Shared handle type used by the router/engine to avoid cloning the map.
pub type SharedTaskManager = Arc<TaskManager>;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{TaskMode, TaskSpec};

    fn sample_task(spec_id: &str) -> Task {
        let spec = TaskSpec {
            spec_id: spec_id.to_string(),
            request: serde_json::json!({"goal": "demo"}),
            mode: TaskMode::Implement,
            priority: 0,
            metadata: serde_json::Map::new(),
        };
        Task::new_root(spec, Some(format!("task-{}-abc123", spec_id)))
    }

    fn tempfile_dir() -> PathBuf {
        let dir = std::env::temp_dir().join(format!("agent-weave-test-{}", uuid::Uuid::new_v4()));
        std::fs::create_dir_all(&dir).unwrap();
        dir
    }

    #[test]
    fn save_and_load_checkpoint_roundtrips() {
        let dir = tempfile_dir();
        let manager = TaskManager::new(&dir);
        let task = sample_task("proj-a");
        let task_id = task.task_id.clone();
        manager.insert(task);

        manager.save_checkpoint(&task_id).unwrap();

        let fresh = TaskManager::new(&dir);
        let loaded = fresh.load_checkpoint(&task_id).unwrap();
        assert_eq!(loaded.task_id, task_id);
    }

    #[test]
    fn metadata_reads_status_and_timestamps_without_loading_into_memory() {
        let dir = tempfile_dir();
        let manager = TaskManager::new(&dir);
        let task = sample_task("proj-a");
        let task_id = task.task_id.clone();
        manager.insert(task);
        manager.save_checkpoint(&task_id).unwrap();

        let fresh = TaskManager::new(&dir);
        let meta = fresh.metadata(&task_id).unwrap();
        assert_eq!(meta.task_id, task_id);
        assert_eq!(meta.status, TaskStatus::Pending);
        assert!(fresh.get(&task_id).is_none(), "metadata must not populate the in-memory map");
    }

    #[test]
    fn metadata_on_missing_checkpoint_is_an_error() {
        let dir = tempfile_dir();
        let manager = TaskManager::new(&dir);
        assert!(manager.metadata("task-proj-a-missing").is_err());
    }

    #[test]
    fn load_missing_checkpoint_is_an_error() {
        let dir = tempfile_dir();
        let manager = TaskManager::new(&dir);
        assert!(manager.load_checkpoint("task-proj-a-missing").is_err());
    }

    #[test]
    fn list_tasks_on_missing_directory_is_empty_not_error() {
        let dir = tempfile_dir();
        let manager = TaskManager::new(&dir);
        assert_eq!(manager.list_tasks("nonexistent").unwrap(), Vec::<String>::new());
    }

    #[test]
    fn list_tasks_returns_sorted_ids() {
        let dir = tempfile_dir();
        let manager = TaskManager::new(&dir);
        let t1 = sample_task("proj-a");
        let t2_id = t1.task_id.replace("abc123", "def456");
        let mut t2 = sample_task("proj-a");
        t2.task_id = t2_id;

        manager.insert(t1.clone());
        manager.save_checkpoint(&t1.task_id).unwrap();
        manager.insert(t2.clone());
        manager.save_checkpoint(&t2.task_id).unwrap();

        let ids = manager.list_tasks("proj-a").unwrap();
        assert_eq!(ids.len(), 2);
    }
}
