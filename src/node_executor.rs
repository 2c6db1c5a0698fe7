//! Node executor: orchestrates a single node's canonical lifecycle —
//! context assembly, dispatch to a deterministic handler or the agent
//! runtime, output validation, and `StageExecutionRecord` construction.
//! Routing is the router's job, not this module's.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use serde_json::Value;

use crate::agent_runtime::AgentRuntime;
use crate::context::ContextAssembler;
use crate::error::{EngineError, ErrorCategory, Result};
use crate::model::{ContextPackage, Node, NodeKind, NodeRole, Task, TaskStatus};
use crate::schema::SchemaRegistry;
use crate::telemetry::TelemetryBus;
use crate::tool_runtime::ToolRuntime;

/// An in-process handler registered either against a specific `stage_id`
/// or as the default for a `NodeRole`.
#[async_trait]
pub trait DeterministicHandler: Send + Sync {
    async fn execute(&self, task: &Task, node: &Node, context: &ContextPackage) -> Result<Value>;
}

#[derive(Default)]
pub struct DeterministicRegistry {
    by_stage_id: HashMap<String, Arc<dyn DeterministicHandler>>,
    by_role_default: HashMap<NodeRole, Arc<dyn DeterministicHandler>>,
}

impl DeterministicRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(mut self, stage_id: impl Into<String>, handler: Arc<dyn DeterministicHandler>) -> Self {
        self.by_stage_id.insert(stage_id.into(), handler);
        self
    }

    pub fn register_role_default(mut self, role: NodeRole, handler: Arc<dyn DeterministicHandler>) -> Self {
        self.by_role_default.insert(role, handler);
        self
    }
}

/// A node execution's outcome: the record for `Task::history`, and the
/// value (if any) that becomes `Task::current_output`.
pub struct NodeExecutionOutcome {
    pub record: crate::model::StageExecutionRecord,
    pub next_output: Option<Value>,
}

pub struct NodeExecutor {
    agent_runtime: Arc<AgentRuntime>,
    tool_runtime: Arc<ToolRuntime>,
    context_assembler: Arc<ContextAssembler>,
    deterministic: DeterministicRegistry,
    telemetry: Option<Arc<TelemetryBus>>,
    schemas: Option<Arc<SchemaRegistry>>,
}

impl NodeExecutor {
    pub fn new(
        agent_runtime: Arc<AgentRuntime>,
        tool_runtime: Arc<ToolRuntime>,
        context_assembler: Arc<ContextAssembler>,
        deterministic: DeterministicRegistry,
    ) -> Self {
        Self {
            agent_runtime,
            tool_runtime,
            context_assembler,
            deterministic,
            telemetry: None,
            schemas: None,
        }
    }

    pub fn with_telemetry(mut self, telemetry: Arc<TelemetryBus>) -> Self {
        self.telemetry = Some(telemetry);
        self
    }

    pub fn with_schemas(mut self, schemas: Arc<SchemaRegistry>) -> Self {
        self.schemas = Some(schemas);
        self
    }

    pub async fn execute_node(&self, task: &Task, node: &Node, project_id: &str) -> NodeExecutionOutcome {
        let started_at = Utc::now();
        let input_payload = task.current_output.clone().unwrap_or(Value::Null);

        // Step 1: input schema validation, when both a schema registry and
        // an `inputs_schema_id` are present; absent either, the input
        // passes through unchanged (mirrors the original's
        // `hasattr(json_engine, "validate")` pass-through path).
        if let Some(schema_id) = &node.inputs_schema_id {
            if let Some(schemas) = &self.schemas {
                if let Err(e) = schemas.validate(schema_id, &input_payload) {
                    return self.error_outcome(node, input_payload, e, started_at, None, None);
                }
            }
        }

        // Step 2: assemble context.
        let profile = match self.context_assembler.resolve_context_profile(&node.context) {
            Ok(profile) => profile,
            Err(e) => return self.error_outcome(node, input_payload, e, started_at, None, None),
        };

        let context = match &profile {
            None => ContextPackage { id: format!("ctx-none-{}", task.task_id), items: vec![], compression_ratio: 1.0 },
            Some(profile) => {
                match self.context_assembler.build_context(&task.task_id, project_id, profile, None).await {
                    Ok(ctx) => ctx,
                    Err(e) => return self.error_outcome(node, input_payload, e, started_at, Some(profile.id.clone()), None),
                }
            }
        };
        let context_profile_id = profile.as_ref().map(|p| p.id.clone());
        let context_metadata = Self::context_metadata(&context);

        // Step 3: dispatch.
        let (output, error, tool_plan, tool_calls) = if node.kind == NodeKind::Agent {
            self.execute_agent_node(task, node, &context, project_id).await
        } else {
            let result = self.execute_deterministic_node(task, node, &context).await;
            match result {
                Ok(output) => (Some(output), None, None, vec![]),
                Err(e) => (None, Some(e), None, vec![]),
            }
        };

        if let Some(e) = error {
            let mut record = self.error_outcome(node, input_payload, e, started_at, context_profile_id, Some(context_metadata));
            record.record.tool_plan = tool_plan.and_then(|p| serde_json::to_value(p).ok());
            record.record.tool_calls = tool_calls;
            return record;
        }

        let output = output.unwrap_or(Value::Null);

        // Step 4: output schema validation, symmetric with step 1.
        if let Some(schema_id) = &node.outputs_schema_id {
            if let Some(schemas) = &self.schemas {
                if let Err(e) = schemas.validate(schema_id, &output) {
                    let mut record = self.error_outcome(node, input_payload, e, started_at, context_profile_id, Some(context_metadata));
                    record.record.tool_plan = tool_plan.and_then(|p| serde_json::to_value(p).ok());
                    record.record.tool_calls = tool_calls;
                    return record;
                }
            }
        }

        let completed_at = Utc::now();
        let record = crate::model::StageExecutionRecord {
            node_id: node.stage_id.clone(),
            node_role: node.role,
            node_kind: node.kind,
            input: input_payload,
            output: Some(output.clone()),
            error: None,
            node_status: TaskStatus::Completed,
            tool_plan: tool_plan.and_then(|p| serde_json::to_value(p).ok()),
            tool_calls,
            context_profile_id,
            context_metadata,
            started_at,
            completed_at,
        };

        self.emit_stage_event(task, node);

        NodeExecutionOutcome { record, next_output: Some(output) }
    }

    async fn execute_agent_node(
        &self,
        task: &Task,
        node: &Node,
        context: &ContextPackage,
        project_id: &str,
    ) -> (Option<Value>, Option<EngineError>, Option<crate::model::ToolPlan>, Vec<crate::model::ToolCallRecord>) {
        let outcome = match self.agent_runtime.run_agent_stage(task, node, context).await {
            Ok(outcome) => outcome,
            Err(e) => return (None, Some(e), None, vec![]),
        };

        if outcome.tool_plan.is_some() && !node.tools.is_empty() {
            let plan = outcome.tool_plan.clone().unwrap();
            let (tool_calls, tool_error) = self
                .tool_runtime
                .execute_tool_plan(&plan, &task.task_id, project_id, &node.stage_id)
                .await;
            if let Some(e) = tool_error {
                return (None, Some(e), Some(plan), tool_calls);
            }
            return (Some(outcome.main_result), None, Some(plan), tool_calls);
        }

        (Some(outcome.main_result), None, outcome.tool_plan, vec![])
    }

    async fn execute_deterministic_node(&self, task: &Task, node: &Node, context: &ContextPackage) -> Result<Value> {
        if let Some(handler) = self.deterministic.by_stage_id.get(&node.stage_id) {
            return handler.execute(task, node, context).await;
        }
        if let Some(handler) = self.deterministic.by_role_default.get(&node.role) {
            return handler.execute(task, node, context).await;
        }
        Ok(built_in_default(task, node))
    }

    fn error_outcome(
        &self,
        node: &Node,
        input_payload: Value,
        error: EngineError,
        started_at: chrono::DateTime<Utc>,
        context_profile_id: Option<String>,
        context_metadata: Option<serde_json::Map<String, Value>>,
    ) -> NodeExecutionOutcome {
        let record = crate::model::StageExecutionRecord {
            node_id: node.stage_id.clone(),
            node_role: node.role,
            node_kind: node.kind,
            input: input_payload,
            output: None,
            error: Some(error),
            node_status: TaskStatus::Failed,
            tool_plan: None,
            tool_calls: vec![],
            context_profile_id,
            context_metadata: context_metadata.unwrap_or_default(),
            started_at,
            completed_at: Utc::now(),
        };
        NodeExecutionOutcome { record, next_output: None }
    }

    fn context_metadata(context: &ContextPackage) -> serde_json::Map<String, Value> {
        let mut map = serde_json::Map::new();
        map.insert("items_count".to_string(), serde_json::json!(context.items.len()));
        map.insert("compression_ratio".to_string(), serde_json::json!(context.compression_ratio));
        map
    }

    fn emit_stage_event(&self, task: &Task, node: &Node) {
        if let Some(bus) = &self.telemetry {
            let mut payload = serde_json::Map::new();
            payload.insert("node_role".to_string(), serde_json::json!(node.role));
            bus.emit(
                crate::model::Event::new(crate::model::EventType::Stage, payload)
                    .with_task(task.task_id.clone())
                    .with_stage(node.stage_id.clone()),
            );
        }
    }
}

/// Helper used by callers that want to know whether a failed node's error
/// is severe enough that the whole task should be marked `Failed` rather
/// than just this stage.
pub fn is_task_fatal(error: &EngineError) -> bool {
    matches!(error.category, ErrorCategory::Security | ErrorCategory::Validation)
}

/// Engine-supplied defaults for DETERMINISTIC nodes with no registered
/// handler: START yields `task.spec.request`; every other role (including
/// DECISION) passes `current_output` through unchanged. DECISION routing
/// reads its condition label directly off that value via
/// `router::decision_condition`'s key-priority lookup (`selected_edge`,
/// `condition`, `route`, `next`), so the default must not reshape it.
fn built_in_default(task: &Task, node: &Node) -> Value {
    match node.role {
        NodeRole::Start => task.spec.request.clone(),
        _ => task.current_output.clone().unwrap_or(Value::Null),
    }
}
