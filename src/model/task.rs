//! Task lifecycle types: TaskSpec, Task, lineage, and per-stage execution
//! records.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::error::EngineError;
use crate::model::node::{NodeKind, NodeRole};
use crate::model::tool::ToolCallRecord;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskMode {
    AnalysisOnly,
    Implement,
    Review,
    DryRun,
}

/// The immutable input describing a run request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskSpec {
    pub spec_id: String,
    pub request: Value,
    pub mode: TaskMode,
    #[serde(default)]
    pub priority: i32,
    #[serde(default)]
    pub metadata: serde_json::Map<String, Value>,
}

impl TaskSpec {
    pub fn project_id(&self) -> &str {
        self.metadata
            .get("project_id")
            .and_then(|v| v.as_str())
            .unwrap_or("default")
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Pending,
    Running,
    Completed,
    Failed,
}

/// How a task came into being.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Lineage {
    Root,
    Clone {
        parent: String,
        branch_label: Option<String>,
    },
    Subtask {
        parent: String,
        index: usize,
    },
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LineageState {
    pub parent_task_id: Option<String>,
    #[serde(default)]
    pub child_task_ids: Vec<String>,
    pub lineage: Option<Lineage>,
}

impl LineageState {
    pub fn root() -> Self {
        Self {
            parent_task_id: None,
            child_task_ids: vec![],
            lineage: Some(Lineage::Root),
        }
    }

    pub fn clone_of(parent: &str, branch_label: Option<String>) -> Self {
        Self {
            parent_task_id: Some(parent.to_string()),
            child_task_ids: vec![],
            lineage: Some(Lineage::Clone {
                parent: parent.to_string(),
                branch_label,
            }),
        }
    }

    pub fn subtask_of(parent: &str, index: usize) -> Self {
        Self {
            parent_task_id: Some(parent.to_string()),
            child_task_ids: vec![],
            lineage: Some(Lineage::Subtask {
                parent: parent.to_string(),
                index,
            }),
        }
    }
}

/// One recorded node execution within a task's history.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StageExecutionRecord {
    pub node_id: String,
    pub node_role: NodeRole,
    pub node_kind: NodeKind,
    pub input: Value,
    pub output: Option<Value>,
    pub error: Option<EngineError>,
    pub node_status: TaskStatus,
    pub tool_plan: Option<Value>,
    #[serde(default)]
    pub tool_calls: Vec<ToolCallRecord>,
    pub context_profile_id: Option<String>,
    #[serde(default)]
    pub context_metadata: serde_json::Map<String, Value>,
    pub started_at: DateTime<Utc>,
    pub completed_at: DateTime<Utc>,
}

/// The mutable run instance produced from a TaskSpec.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    pub task_id: String,
    pub spec: TaskSpec,
    pub status: TaskStatus,
    pub current_node_id: Option<String>,
    pub current_output: Option<Value>,
    #[serde(default)]
    pub history: Vec<StageExecutionRecord>,
    pub lineage: LineageState,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Task {
    pub fn new_root(spec: TaskSpec, task_id: Option<String>) -> Self {
        let now = Utc::now();
        let task_id = task_id.unwrap_or_else(|| format!("task-{}-{}", spec.spec_id, Uuid::new_v4()));
        Self {
            task_id,
            spec,
            status: TaskStatus::Pending,
            current_node_id: None,
            current_output: None,
            history: vec![],
            lineage: LineageState::root(),
            created_at: now,
            updated_at: now,
        }
    }

    /// Parse the project id component out of `task-<spec_id>-<suffix>`,
    /// joining any middle components.
    pub fn project_id_from_task_id(task_id: &str) -> String {
        let mut parts: Vec<&str> = task_id.split('-').collect();
        if parts.len() < 3 || parts[0] != "task" {
            return "default".to_string();
        }
        parts.remove(0);
        parts.pop();
        parts.join("-")
    }

    pub fn is_concluded(&self) -> bool {
        matches!(self.status, TaskStatus::Completed | TaskStatus::Failed)
    }
}
