//! Artifact types produced by node execution and tracked by the artifact store.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ArtifactType {
    NodeOutput,
    ToolResult,
    TelemetrySnapshot,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Artifact {
    pub id: String,
    pub task_id: String,
    pub node_id: Option<String>,
    pub artifact_type: ArtifactType,
    pub timestamp: DateTime<Utc>,
    pub schema_ref: Option<String>,
    pub payload: Value,
    #[serde(default)]
    pub metadata: serde_json::Map<String, Value>,
}
