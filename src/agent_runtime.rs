//! Agent runtime: assembles a prompt from node metadata, task spec and
//! context, invokes an `LlmClient` (or falls back to a deterministic stub),
//! and splits `main_result`/`tool_plan` out of the result.

use std::collections::HashMap;

use async_trait::async_trait;
use serde_json::Value;

use crate::error::Result;
use crate::model::{ContextPackage, Node, NodeRole, Task, ToolPlan};

/// Model/hyperparameter override for one agent id, set at `global`,
/// `project`, or `task` scope.
#[derive(Debug, Clone, Default)]
pub struct AgentOverride {
    pub model: Option<String>,
    pub hyperparameters: Option<serde_json::Map<String, Value>>,
}

/// Resolves per-agent model/hyperparameter overrides with
/// task > project > global priority, mirroring `tool_runtime::ParameterResolver`.
#[derive(Default)]
struct AgentOverrideResolver {
    task: HashMap<(String, String), AgentOverride>,
    project: HashMap<(String, String), AgentOverride>,
    global: HashMap<String, AgentOverride>,
}

impl AgentOverrideResolver {
    fn resolve(&self, task_id: &str, project_id: &str, agent_id: &str) -> AgentOverride {
        let mut resolved = AgentOverride::default();
        for over in [
            self.global.get(agent_id),
            self.project.get(&(project_id.to_string(), agent_id.to_string())),
            self.task.get(&(task_id.to_string(), agent_id.to_string())),
        ]
        .into_iter()
        .flatten()
        {
            if over.model.is_some() {
                resolved.model = over.model.clone();
            }
            if over.hyperparameters.is_some() {
                resolved.hyperparameters = over.hyperparameters.clone();
            }
        }
        resolved
    }
}

/// A chat-style completion backend. The only network-touching seam in the
/// engine; the default build ships no implementation that dials out.
#[async_trait]
pub trait LlmClient: Send + Sync {
    async fn generate(&self, prompt: Value) -> Result<Value>;
}

/// The stage-shaped result of running an agent node: the (possibly
/// schema-validated) main result, plus an optional emitted `ToolPlan`.
pub struct AgentStageOutcome {
    pub main_result: Value,
    pub tool_plan: Option<ToolPlan>,
}

pub struct AgentRuntime {
    llm_client: Option<std::sync::Arc<dyn LlmClient>>,
    template_version: String,
    overrides: parking_lot::Mutex<AgentOverrideResolver>,
}

impl AgentRuntime {
    pub fn new(template_version: impl Into<String>) -> Self {
        Self {
            llm_client: None,
            template_version: template_version.into(),
            overrides: parking_lot::Mutex::new(AgentOverrideResolver::default()),
        }
    }

    pub fn with_llm_client(mut self, client: std::sync::Arc<dyn LlmClient>) -> Self {
        self.llm_client = Some(client);
        self
    }

    pub fn set_task_model(&self, task_id: &str, agent_id: &str, model: String) {
        self.overrides.lock().task.entry((task_id.to_string(), agent_id.to_string())).or_default().model = Some(model);
    }

    pub fn set_project_model(&self, project_id: &str, agent_id: &str, model: String) {
        self.overrides.lock().project.entry((project_id.to_string(), agent_id.to_string())).or_default().model = Some(model);
    }

    pub fn set_global_model(&self, agent_id: &str, model: String) {
        self.overrides.lock().global.entry(agent_id.to_string()).or_default().model = Some(model);
    }

    pub fn set_task_hyperparameters(&self, task_id: &str, agent_id: &str, params: serde_json::Map<String, Value>) {
        self.overrides.lock().task.entry((task_id.to_string(), agent_id.to_string())).or_default().hyperparameters = Some(params);
    }

    pub fn set_project_hyperparameters(&self, project_id: &str, agent_id: &str, params: serde_json::Map<String, Value>) {
        self.overrides.lock().project.entry((project_id.to_string(), agent_id.to_string())).or_default().hyperparameters = Some(params);
    }

    pub fn set_global_hyperparameters(&self, agent_id: &str, params: serde_json::Map<String, Value>) {
        self.overrides.lock().global.entry(agent_id.to_string()).or_default().hyperparameters = Some(params);
    }

    pub fn clear_overrides(&self) {
        *self.overrides.lock() = AgentOverrideResolver::default();
    }

    /// Run one AGENT-kind node to completion.
    pub async fn run_agent_stage(
        &self,
        task: &Task,
        node: &Node,
        context: &ContextPackage,
    ) -> Result<AgentStageOutcome> {
        if self.llm_client.is_none() {
            return Ok(self.deterministic_fallback(task, node));
        }

        let project_id = Task::project_id_from_task_id(&task.task_id);
        let agent_id = node.agent_id.as_deref().unwrap_or(node.stage_id.as_str());
        let over = self.overrides.lock().resolve(&task.task_id, &project_id, agent_id);

        let mut prompt = if node.tools.is_empty() {
            self.build_prompt(task, node, context)
        } else {
            self.build_tool_aware_prompt(task, node, context)
        };
        if let Some(obj) = prompt.as_object_mut() {
            if let Some(model) = over.model {
                obj.insert("model".to_string(), Value::String(model));
            }
            if let Some(params) = over.hyperparameters {
                obj.insert("hyperparameters".to_string(), Value::Object(params));
            }
        }

        let client = self.llm_client.as_ref().expect("checked above");
        let raw = client.generate(prompt).await?;
        let parsed = parse_if_json_string(raw);

        let (main_result, tool_plan) = split_tool_plan(parsed);
        Ok(AgentStageOutcome { main_result, tool_plan })
    }

    /// No LLM client wired: DECISION nodes derive a condition label from
    /// `task.current_output.action` (defaulting to the first branch),
    /// everything else passes `current_output` straight through.
    fn deterministic_fallback(&self, task: &Task, node: &Node) -> AgentStageOutcome {
        if node.role == NodeRole::Decision {
            let action = task
                .current_output
                .as_ref()
                .and_then(|v| v.get("action"))
                .and_then(|v| v.as_str());
            let condition = match action {
                Some("create") | Some("edit") => action.unwrap(),
                _ => "create",
            };
            return AgentStageOutcome {
                main_result: serde_json::json!({ "condition": condition }),
                tool_plan: None,
            };
        }

        AgentStageOutcome {
            main_result: task.current_output.clone().unwrap_or(Value::Null),
            tool_plan: None,
        }
    }

    fn build_prompt(&self, task: &Task, node: &Node, context: &ContextPackage) -> Value {
        serde_json::json!({
            "template_version": self.template_version,
            "agent_stage": node.stage_id,
            "task_mode": task.spec.mode,
            "task_request": task.spec.request,
            "context": context.items.iter().map(|i| &i.payload).collect::<Vec<_>>(),
            "tools": node.tools,
            "schema_id": node.outputs_schema_id,
        })
    }

    fn build_tool_aware_prompt(&self, task: &Task, node: &Node, context: &ContextPackage) -> Value {
        let tool_definitions: Vec<Value> = node
            .tools
            .iter()
            .map(|tool_id| {
                serde_json::json!({
                    "tool_id": tool_id,
                    "description": format!("Tool {} available for use", tool_id),
                })
            })
            .collect();

        serde_json::json!({
            "template_version": self.template_version,
            "agent_stage": node.stage_id,
            "task_mode": task.spec.mode,
            "task_request": task.spec.request,
            "context": context.items.iter().map(|i| &i.payload).collect::<Vec<_>>(),
            "tools": tool_definitions,
            "schema_id": node.outputs_schema_id,
            "instructions": "When tools are available, emit JSON with both 'main_result' and 'tool_plan' keys. ToolPlan format: {\"steps\": [{\"tool_id\": \"...\", \"inputs\": {...}, \"reason\": \"...\", \"kind\": \"...\"}]}",
        })
    }
}

/// The one network-touching `LlmClient` the engine ships, gated behind the
/// `live-llm` feature so a default build never links an HTTP client.
#[cfg(feature = "live-llm")]
pub struct ReqwestLlmClient {
    client: reqwest::Client,
    endpoint: String,
    api_key: String,
}

#[cfg(feature = "live-llm")]
impl ReqwestLlmClient {
    /// Resolves the vendor API key through a `CredentialProvider` rather
    /// than reading the environment directly, so prompt construction stays
    /// separated from credential storage.
    pub fn new(
        endpoint: impl Into<String>,
        credentials: &dyn crate::credentials::CredentialProvider,
        key_name: &str,
    ) -> Result<Self> {
        let api_key = credentials.get(key_name).ok_or_else(|| {
            crate::error::EngineError::agent("missing_credential", format!("credential '{}' not configured", key_name))
        })?;
        Ok(Self { client: reqwest::Client::new(), endpoint: endpoint.into(), api_key })
    }
}

#[cfg(feature = "live-llm")]
#[async_trait]
impl LlmClient for ReqwestLlmClient {
    async fn generate(&self, prompt: Value) -> Result<Value> {
        let response = self
            .client
            .post(&self.endpoint)
            .bearer_auth(&self.api_key)
            .json(&prompt)
            .send()
            .await
            .map_err(|e| crate::error::EngineError::agent("llm_request_failed", e.to_string()))?;

        response
            .json::<Value>()
            .await
            .map_err(|e| crate::error::EngineError::agent("llm_response_not_json", e.to_string()))
    }
}

/// If the LLM returned a JSON-encoded string, parse it; otherwise leave it
/// as-is. A string that fails to parse is treated as a literal output.
fn parse_if_json_string(value: Value) -> Value {
    match value {
        Value::String(s) => serde_json::from_str(&s).unwrap_or(Value::String(s)),
        other => other,
    }
}

/// Split `{"main_result": ..., "tool_plan": {...}}` out of the parsed
/// output; anything else is treated as the main result with no tool plan.
fn split_tool_plan(value: Value) -> (Value, Option<ToolPlan>) {
    if let Value::Object(mut map) = value {
        if map.contains_key("main_result") && map.contains_key("tool_plan") {
            let tool_plan_raw = map.remove("tool_plan").unwrap();
            let main_result = map.remove("main_result").unwrap();
            let tool_plan = serde_json::from_value::<ToolPlan>(tool_plan_raw).ok();
            return (main_result, tool_plan);
        }
        return (Value::Object(map), None);
    }
    (value, None)
}
