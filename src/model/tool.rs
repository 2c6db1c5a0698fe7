//! Tool definition and tool-plan types.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::EngineError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolKind {
    Deterministic,
    LlmTool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolCapability {
    DeterministicSafe,
    WorkspaceMutation,
    ExternalNetwork,
    ShellExecution,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolRiskLevel {
    Low,
    Medium,
    High,
}

/// A registered tool: identity, schema refs, capabilities, risk, permissions.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolDefinition {
    pub tool_id: String,
    pub kind: ToolKind,
    #[serde(default)]
    pub inputs_schema_id: Option<String>,
    #[serde(default)]
    pub outputs_schema_id: Option<String>,
    pub capabilities: Vec<ToolCapability>,
    pub risk_level: ToolRiskLevel,
    #[serde(default)]
    pub allow_network: bool,
    #[serde(default)]
    pub allow_shell: bool,
    #[serde(default)]
    pub filesystem_root: Option<String>,
    #[serde(default)]
    pub default_timeout_ms: u64,
}

impl ToolDefinition {
    pub fn requires_capability(&self, cap: ToolCapability) -> bool {
        self.capabilities.contains(&cap)
    }
}

/// One step of an agent-emitted tool plan.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolPlanStep {
    pub tool_id: String,
    #[serde(default)]
    pub inputs: Value,
    #[serde(default)]
    pub reason: String,
    #[serde(default)]
    pub kind: String,
}

/// Ordered list of tool invocations emitted by an agent as structured output.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolPlan {
    pub steps: Vec<ToolPlanStep>,
}

/// A recorded tool invocation within a StageExecutionRecord.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolCallRecord {
    pub tool_id: String,
    pub inputs: Value,
    pub output: Option<Value>,
    pub error: Option<EngineError>,
    pub started_at: DateTime<Utc>,
    pub completed_at: DateTime<Utc>,
}
