//! Tool runtime: executes a single-tool stage or an agent-emitted
//! `ToolPlan` step by step, following `ToolRuntime.execute_tool_plan`'s
//! permission-gate, policy-gate, resolve, dispatch, timeout sequence.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use serde_json::Value;
use uuid::Uuid;

use crate::artifact_store::ArtifactStore;
use crate::error::{EngineError, ErrorCategory, Result, Severity};
use crate::model::{ArtifactType, Event, EventType, ToolCallRecord, ToolCapability, ToolDefinition, ToolKind, ToolPlan};
use crate::schema::SchemaRegistry;
use crate::telemetry::TelemetryBus;

/// In-process handler for a DETERMINISTIC tool.
#[async_trait]
pub trait ToolHandler: Send + Sync {
    async fn invoke(&self, inputs: Value) -> Result<Value>;
}

/// Caller-side permission flags consulted by the permission gate.
#[derive(Debug, Clone, Copy, Default)]
pub struct CallerFlags {
    pub allow_network: bool,
    pub allow_workspace_mutation: bool,
    pub allow_shell: bool,
}

#[derive(Debug, Clone)]
pub struct Decision {
    pub allowed: bool,
    pub reason: String,
}

impl Decision {
    fn allow() -> Self {
        Self { allowed: true, reason: String::new() }
    }

    fn deny(reason: impl Into<String>) -> Self {
        Self { allowed: false, reason: reason.into() }
    }
}

/// Permission gate: deny if the tool declares a capability the caller's
/// flags don't allow.
pub fn check_permissions(tool: &ToolDefinition, flags: CallerFlags) -> Decision {
    if tool.requires_capability(ToolCapability::ExternalNetwork) && !(flags.allow_network || tool.allow_network) {
        return Decision::deny(format!("tool '{}' requires network access, not permitted", tool.tool_id));
    }
    if tool.requires_capability(ToolCapability::WorkspaceMutation) && !flags.allow_workspace_mutation {
        return Decision::deny(format!("tool '{}' requires workspace mutation, not permitted", tool.tool_id));
    }
    if tool.requires_capability(ToolCapability::ShellExecution) && !(flags.allow_shell || tool.allow_shell) {
        return Decision::deny(format!("tool '{}' requires shell execution, not permitted", tool.tool_id));
    }
    Decision::allow()
}

/// Policy evaluator consulted after the permission gate: a matching DENY
/// rule for `(tool_id, task_id)` halts the plan.
pub trait PolicyEvaluator: Send + Sync {
    fn evaluate(&self, tool_id: &str, task_id: &str) -> Decision;
}

/// Default evaluator: an explicit deny-list keyed by tool id, optionally
/// scoped to specific task ids.
#[derive(Default)]
pub struct DenyListPolicyEvaluator {
    denied_tools: HashMap<String, Vec<String>>,
}

impl DenyListPolicyEvaluator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Deny `tool_id` for every task (empty `task_ids`) or only the listed ones.
    pub fn deny(mut self, tool_id: impl Into<String>, task_ids: Vec<String>) -> Self {
        self.denied_tools.insert(tool_id.into(), task_ids);
        self
    }
}

impl PolicyEvaluator for DenyListPolicyEvaluator {
    fn evaluate(&self, tool_id: &str, task_id: &str) -> Decision {
        match self.denied_tools.get(tool_id) {
            Some(task_ids) if task_ids.is_empty() || task_ids.iter().any(|t| t == task_id) => {
                Decision::deny(format!("tool '{}' denied by policy", tool_id))
            }
            _ => Decision::allow(),
        }
    }
}

/// Per-task/per-project dynamic overrides for `enabled`/`timeout_ms`,
/// resolved with priority task > project > global.
#[derive(Debug, Clone, Default)]
pub struct ToolOverride {
    pub enabled: Option<bool>,
    pub timeout_ms: Option<u64>,
}

#[derive(Default)]
pub struct ParameterResolver {
    task_overrides: HashMap<(String, String), ToolOverride>,
    project_overrides: HashMap<(String, String), ToolOverride>,
    global_overrides: HashMap<String, ToolOverride>,
}

impl ParameterResolver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_task_override(&mut self, task_id: &str, tool_id: &str, over: ToolOverride) {
        self.task_overrides.insert((task_id.to_string(), tool_id.to_string()), over);
    }

    pub fn set_project_override(&mut self, project_id: &str, tool_id: &str, over: ToolOverride) {
        self.project_overrides.insert((project_id.to_string(), tool_id.to_string()), over);
    }

    pub fn set_global_override(&mut self, tool_id: &str, over: ToolOverride) {
        self.global_overrides.insert(tool_id.to_string(), over);
    }

    /// Resolve `enabled`/`timeout_ms` with task > project > global priority,
    /// falling back to the tool's own default timeout.
    pub fn resolve(&self, task_id: &str, project_id: &str, tool: &ToolDefinition) -> (bool, u64) {
        let mut enabled = true;
        let mut timeout_ms = tool.default_timeout_ms;

        if let Some(over) = self.global_overrides.get(&tool.tool_id) {
            enabled = over.enabled.unwrap_or(enabled);
            timeout_ms = over.timeout_ms.unwrap_or(timeout_ms);
        }
        if let Some(over) = self.project_overrides.get(&(project_id.to_string(), tool.tool_id.clone())) {
            enabled = over.enabled.unwrap_or(enabled);
            timeout_ms = over.timeout_ms.unwrap_or(timeout_ms);
        }
        if let Some(over) = self.task_overrides.get(&(task_id.to_string(), tool.tool_id.clone())) {
            enabled = over.enabled.unwrap_or(enabled);
            timeout_ms = over.timeout_ms.unwrap_or(timeout_ms);
        }

        (enabled, timeout_ms)
    }
}

pub struct ToolRuntime {
    tools: HashMap<String, ToolDefinition>,
    handlers: HashMap<String, Arc<dyn ToolHandler>>,
    parameter_resolver: parking_lot::Mutex<ParameterResolver>,
    policy_evaluator: Option<Arc<dyn PolicyEvaluator>>,
    telemetry: Option<Arc<TelemetryBus>>,
    artifact_store: Option<Arc<ArtifactStore>>,
    caller_flags: CallerFlags,
    schemas: Option<Arc<SchemaRegistry>>,
}

impl ToolRuntime {
    pub fn new(tools: Vec<ToolDefinition>) -> Self {
        Self {
            tools: tools.into_iter().map(|t| (t.tool_id.clone(), t)).collect(),
            handlers: HashMap::new(),
            parameter_resolver: parking_lot::Mutex::new(ParameterResolver::new()),
            policy_evaluator: None,
            telemetry: None,
            artifact_store: None,
            caller_flags: CallerFlags::default(),
            schemas: None,
        }
    }

    pub fn tool_ids(&self) -> Vec<String> {
        self.tools.keys().cloned().collect()
    }

    pub fn contains_tool(&self, tool_id: &str) -> bool {
        self.tools.contains_key(tool_id)
    }

    /// Engine-façade override surface, scoped to `global|project|task`.
    /// Takes effect on the next `execute_tool_plan` call since the resolver
    /// is consulted per step.
    pub fn set_task_override(&self, task_id: &str, tool_id: &str, over: ToolOverride) {
        self.parameter_resolver.lock().set_task_override(task_id, tool_id, over);
    }

    pub fn set_project_override(&self, project_id: &str, tool_id: &str, over: ToolOverride) {
        self.parameter_resolver.lock().set_project_override(project_id, tool_id, over);
    }

    pub fn set_global_override(&self, tool_id: &str, over: ToolOverride) {
        self.parameter_resolver.lock().set_global_override(tool_id, over);
    }

    pub fn clear_overrides(&self) {
        *self.parameter_resolver.lock() = ParameterResolver::new();
    }

    pub fn with_handler(mut self, tool_id: impl Into<String>, handler: Arc<dyn ToolHandler>) -> Self {
        self.handlers.insert(tool_id.into(), handler);
        self
    }

    pub fn with_policy_evaluator(mut self, evaluator: Arc<dyn PolicyEvaluator>) -> Self {
        self.policy_evaluator = Some(evaluator);
        self
    }

    pub fn with_telemetry(mut self, telemetry: Arc<TelemetryBus>) -> Self {
        self.telemetry = Some(telemetry);
        self
    }

    pub fn with_artifact_store(mut self, store: Arc<ArtifactStore>) -> Self {
        self.artifact_store = Some(store);
        self
    }

    pub fn with_caller_flags(mut self, flags: CallerFlags) -> Self {
        self.caller_flags = flags;
        self
    }

    pub fn with_schemas(mut self, schemas: Arc<SchemaRegistry>) -> Self {
        self.schemas = Some(schemas);
        self
    }

    pub fn with_parameter_resolver(mut self, resolver: ParameterResolver) -> Self {
        self.parameter_resolver = parking_lot::Mutex::new(resolver);
        self
    }

    /// Execute every step of a `ToolPlan` in order. Returns the recorded
    /// calls plus an optional fatal error (a security/misuse class error
    /// halts the remaining steps).
    pub async fn execute_tool_plan(
        &self,
        plan: &ToolPlan,
        task_id: &str,
        project_id: &str,
        node_id: &str,
    ) -> (Vec<ToolCallRecord>, Option<EngineError>) {
        let mut calls = Vec::new();

        for step in &plan.steps {
            let Some(tool_def) = self.tools.get(&step.tool_id) else {
                let err = EngineError::tool(
                    "tool_not_found",
                    format!("tool '{}' not found in registry", step.tool_id),
                )
                .with_stage(node_id)
                .with_task(task_id);
                return (calls, Some(err));
            };

            let (enabled, timeout_ms) = self.parameter_resolver.lock().resolve(task_id, project_id, tool_def);
            if !enabled {
                continue;
            }

            let permission = check_permissions(tool_def, self.caller_flags);
            if !permission.allowed {
                let err = EngineError::security("tool_permission_denied", permission.reason)
                    .with_stage(node_id)
                    .with_task(task_id);
                return (calls, Some(err));
            }

            if let Some(evaluator) = &self.policy_evaluator {
                let decision = evaluator.evaluate(&step.tool_id, task_id);
                if !decision.allowed {
                    self.emit(Event::new(EventType::Tool, Self::payload(&step.tool_id, "policy_denied"))
                        .with_task(task_id)
                        .with_stage(node_id));
                    let err = EngineError::security("tool_policy_denied", decision.reason)
                        .with_stage(node_id)
                        .with_task(task_id);
                    return (calls, Some(err));
                }
            }

            self.emit(Event::new(EventType::Tool, Self::payload(&step.tool_id, "invoked"))
                .with_task(task_id)
                .with_stage(node_id));

            let started_at = Utc::now();
            let outcome = self.dispatch(tool_def, step.inputs.clone(), timeout_ms).await;
            let completed_at = Utc::now();

            let (output, error) = match outcome {
                Ok(value) => (Some(value), None),
                Err(e) => (None, Some(e)),
            };

            self.emit(
                Event::new(
                    EventType::Tool,
                    Self::payload(&step.tool_id, if error.is_some() { "failed" } else { "completed" }),
                )
                .with_task(task_id)
                .with_stage(node_id),
            );

            let record = ToolCallRecord {
                tool_id: step.tool_id.clone(),
                inputs: step.inputs.clone(),
                output: output.clone(),
                error: error.clone(),
                started_at,
                completed_at,
            };

            if let Some(store) = &self.artifact_store {
                store.store(
                    task_id,
                    ArtifactType::ToolResult,
                    serde_json::json!({
                        "tool_id": step.tool_id,
                        "inputs": step.inputs,
                        "output": output,
                    }),
                    Some(node_id.to_string()),
                    None,
                    None,
                );
            }

            let fatal = error.as_ref().map(|e| e.category == ErrorCategory::Security).unwrap_or(false);
            calls.push(record);
            if fatal {
                return (calls, error);
            }
        }

        (calls, None)
    }

    async fn dispatch(&self, tool_def: &ToolDefinition, inputs: Value, timeout_ms: u64) -> Result<Value> {
        let handler = self.handlers.get(&tool_def.tool_id);
        let call = async {
            match (tool_def.kind, handler) {
                (ToolKind::Deterministic, Some(handler)) => handler.invoke(inputs.clone()).await,
                _ => Ok(serde_json::json!({ "tool": tool_def.tool_id, "echo": inputs })),
            }
        };

        let result = if timeout_ms == 0 {
            call.await
        } else {
            match tokio::time::timeout(Duration::from_millis(timeout_ms), call).await {
                Ok(r) => r,
                Err(_) => {
                    return Err(EngineError::tool(
                        "tool_execution_timeout",
                        format!("tool '{}' exceeded timeout of {}ms", tool_def.tool_id, timeout_ms),
                    )
                    .with_severity(Severity::Error))
                }
            }
        };

        let value = result?;

        if let Some(schema_id) = &tool_def.outputs_schema_id {
            if let Some(schemas) = &self.schemas {
                schemas.validate(schema_id, &value).map_err(|e| {
                    EngineError::tool(
                        "tool_output_schema_violation",
                        format!("tool '{}' output failed schema '{}': {}", tool_def.tool_id, schema_id, e.message),
                    )
                    .with_details(e.details.clone().unwrap_or(Value::Null))
                })?;
            }
        }

        Ok(value)
    }

    fn emit(&self, event: Event) {
        if let Some(bus) = &self.telemetry {
            bus.emit(event);
        }
    }

    fn payload(tool_id: &str, phase: &str) -> serde_json::Map<String, Value> {
        let mut map = serde_json::Map::new();
        map.insert("tool_id".to_string(), Value::String(tool_id.to_string()));
        map.insert("phase".to_string(), Value::String(phase.to_string()));
        map
    }
}

#[allow(dead_code)]
fn _tool_call_id() -> String {
    format!("call-{}", Uuid::new_v4())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{ToolPlanStep, ToolRiskLevel};

    struct EchoHandler;

    #[async_trait]
    impl ToolHandler for EchoHandler {
        async fn invoke(&self, inputs: Value) -> Result<Value> {
            Ok(serde_json::json!({ "received": inputs }))
        }
    }

    struct FailingHandler;

    #[async_trait]
    impl ToolHandler for FailingHandler {
        async fn invoke(&self, _inputs: Value) -> Result<Value> {
            Err(EngineError::tool("boom", "handler failed"))
        }
    }

    fn det_tool(id: &str, caps: Vec<ToolCapability>) -> ToolDefinition {
        ToolDefinition {
            tool_id: id.to_string(),
            kind: ToolKind::Deterministic,
            inputs_schema_id: None,
            outputs_schema_id: None,
            capabilities: caps,
            risk_level: ToolRiskLevel::Low,
            allow_network: false,
            allow_shell: false,
            filesystem_root: None,
            default_timeout_ms: 1000,
        }
    }

    #[tokio::test]
    async fn successful_plan_records_calls_with_no_fatal_error() {
        let tool = det_tool("echo", vec![ToolCapability::DeterministicSafe]);
        let runtime = ToolRuntime::new(vec![tool]).with_handler("echo", Arc::new(EchoHandler));
        let plan = ToolPlan {
            steps: vec![ToolPlanStep {
                tool_id: "echo".to_string(),
                inputs: serde_json::json!({"x": 1}),
                reason: "test".to_string(),
                kind: "analyze".to_string(),
            }],
        };

        let (calls, error) = runtime.execute_tool_plan(&plan, "task-1", "default", "node-a").await;
        assert_eq!(calls.len(), 1);
        assert!(error.is_none());
        assert!(calls[0].output.is_some());
    }

    #[tokio::test]
    async fn unknown_tool_halts_the_plan() {
        let runtime = ToolRuntime::new(vec![]);
        let plan = ToolPlan {
            steps: vec![ToolPlanStep {
                tool_id: "missing".to_string(),
                inputs: Value::Null,
                reason: String::new(),
                kind: String::new(),
            }],
        };
        let (calls, error) = runtime.execute_tool_plan(&plan, "task-1", "default", "node-a").await;
        assert!(calls.is_empty());
        assert_eq!(error.unwrap().id, "tool_not_found");
    }

    #[tokio::test]
    async fn permission_gate_denies_network_capability_by_default() {
        let tool = det_tool("fetch", vec![ToolCapability::ExternalNetwork]);
        let runtime = ToolRuntime::new(vec![tool]).with_handler("fetch", Arc::new(EchoHandler));
        let plan = ToolPlan {
            steps: vec![ToolPlanStep {
                tool_id: "fetch".to_string(),
                inputs: Value::Null,
                reason: String::new(),
                kind: String::new(),
            }],
        };
        let (calls, error) = runtime.execute_tool_plan(&plan, "task-1", "default", "node-a").await;
        assert!(calls.is_empty());
        let err = error.unwrap();
        assert_eq!(err.category, ErrorCategory::Security);
    }

    #[tokio::test]
    async fn policy_deny_list_halts_the_plan() {
        let tool = det_tool("echo", vec![ToolCapability::DeterministicSafe]);
        let evaluator = Arc::new(DenyListPolicyEvaluator::new().deny("echo", vec![]));
        let runtime = ToolRuntime::new(vec![tool])
            .with_handler("echo", Arc::new(EchoHandler))
            .with_policy_evaluator(evaluator);
        let plan = ToolPlan {
            steps: vec![ToolPlanStep {
                tool_id: "echo".to_string(),
                inputs: Value::Null,
                reason: String::new(),
                kind: String::new(),
            }],
        };
        let (calls, error) = runtime.execute_tool_plan(&plan, "task-1", "default", "node-a").await;
        assert!(calls.is_empty());
        assert_eq!(error.unwrap().id, "tool_policy_denied");
    }

    #[tokio::test]
    async fn handler_failure_becomes_tool_error_but_is_not_fatal() {
        let tool = det_tool("flaky", vec![ToolCapability::DeterministicSafe]);
        let runtime = ToolRuntime::new(vec![tool]).with_handler("flaky", Arc::new(FailingHandler));
        let plan = ToolPlan {
            steps: vec![ToolPlanStep {
                tool_id: "flaky".to_string(),
                inputs: Value::Null,
                reason: String::new(),
                kind: String::new(),
            }],
        };
        let (calls, error) = runtime.execute_tool_plan(&plan, "task-1", "default", "node-a").await;
        assert_eq!(calls.len(), 1);
        assert!(calls[0].error.is_some());
        assert!(error.is_none());
    }

    #[tokio::test]
    async fn output_schema_violation_becomes_a_tool_error() {
        let schema = serde_json::json!({
            "type": "object",
            "required": ["received"],
            "properties": { "received": { "type": "string" } }
        });
        let schemas = Arc::new(SchemaRegistry::from_documents(vec![("echo-out".to_string(), schema)]).unwrap());

        let mut tool = det_tool("echo", vec![ToolCapability::DeterministicSafe]);
        tool.outputs_schema_id = Some("echo-out".to_string());

        let runtime = ToolRuntime::new(vec![tool])
            .with_handler("echo", Arc::new(EchoHandler))
            .with_schemas(schemas);
        let plan = ToolPlan {
            steps: vec![ToolPlanStep {
                tool_id: "echo".to_string(),
                inputs: serde_json::json!({"x": 1}),
                reason: String::new(),
                kind: String::new(),
            }],
        };

        let (calls, error) = runtime.execute_tool_plan(&plan, "task-1", "default", "node-a").await;
        assert_eq!(calls.len(), 1);
        assert!(calls[0].output.is_none());
        assert_eq!(calls[0].error.as_ref().unwrap().id, "tool_output_schema_violation");
        assert!(error.is_none(), "a schema violation is not a security-class error, so it must not halt the plan");
    }

    #[tokio::test]
    async fn disabled_override_skips_step_silently() {
        let tool = det_tool("echo", vec![ToolCapability::DeterministicSafe]);
        let mut resolver = ParameterResolver::new();
        resolver.set_task_override("task-1", "echo", ToolOverride { enabled: Some(false), timeout_ms: None });
        let runtime = ToolRuntime::new(vec![tool])
            .with_handler("echo", Arc::new(EchoHandler))
            .with_parameter_resolver(resolver);
        let plan = ToolPlan {
            steps: vec![ToolPlanStep {
                tool_id: "echo".to_string(),
                inputs: Value::Null,
                reason: String::new(),
                kind: String::new(),
            }],
        };
        let (calls, error) = runtime.execute_tool_plan(&plan, "task-1", "default", "node-a").await;
        assert!(calls.is_empty());
        assert!(error.is_none());
    }
}
