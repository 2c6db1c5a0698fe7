//! Engine façade: wires manifest loading, schema compilation, DAG
//! construction, memory/artifact/telemetry state, and the
//! tool/agent/node-executor/router stack into the single run surface
//! external callers use. Construction order follows `PipelineOrchestrator::new`'s
//! wiring order from the codegraph-orchestration pipeline.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::Mutex;
use serde::Serialize;
use serde_json::Value;

use crate::agent_runtime::AgentRuntime;
use crate::artifact_store::ArtifactStore;
use crate::context::ContextAssembler;
use crate::dag::Dag;
use crate::error::{EngineError, Result};
use crate::manifest::{ManifestBundle, StoreConfig};
use crate::memory::stores::BackendFactory;
use crate::memory::{AppendLogBackend, InMemoryBackend, MemoryBackend, MemoryTiers};
use crate::model::{Artifact, Event, EventType, StageExecutionRecord, TaskStatus};
use crate::node_executor::{DeterministicRegistry, NodeExecutor};
use crate::router::Router;
use crate::schema::SchemaRegistry;
use crate::task_manager::TaskManager;
use crate::telemetry::TelemetryBus;
use crate::tool_runtime::{CallerFlags, DenyListPolicyEvaluator, ToolOverride, ToolRuntime};

/// The result of one `run()` call, typed.
#[derive(Debug, Clone)]
pub struct RunOutcome {
    pub task_id: String,
    pub status: TaskStatus,
    pub output: Option<Value>,
    pub history: Vec<StageExecutionRecord>,
    pub node_sequence: Vec<String>,
    pub execution_time_ms: u64,
}

/// Task summary returned by `get_task_summary` — status and timing without
/// the full history/output payload.
#[derive(Debug, Clone)]
pub struct TaskSummary {
    pub task_id: String,
    pub status: TaskStatus,
    pub current_node_id: Option<String>,
    pub child_task_ids: Vec<String>,
}

struct QueuedRun {
    input: Value,
    start_node_id: Option<String>,
    project_id: String,
}

/// Wires the whole runtime stack from a configuration directory and exposes
/// the run/enqueue/inspect/override surface.
pub struct Engine {
    dag: Arc<Dag>,
    memory: Arc<MemoryTiers>,
    artifact_store: Arc<ArtifactStore>,
    telemetry: Arc<TelemetryBus>,
    tool_runtime: Arc<ToolRuntime>,
    agent_runtime: Arc<AgentRuntime>,
    task_manager: Arc<TaskManager>,
    router: Arc<Router>,
    agent_ids: Vec<String>,
    queue: Mutex<std::collections::VecDeque<QueuedRun>>,
    queue_capacity: usize,
}

impl Engine {
    /// Load `config_dir`, validate every manifest and the resulting DAG,
    /// and wire the full runtime stack. Aborts (returns `Err`) on the first
    /// validation failure.
    pub fn from_config_dir(config_dir: impl AsRef<Path>) -> Result<Self> {
        let bundle = ManifestBundle::load(config_dir)?;

        for node in &bundle.workflow.nodes {
            node.validate_self()?;
        }
        let dag = Dag::new(bundle.workflow.nodes.clone(), bundle.workflow.edges.clone());
        dag.validate()?;

        let schemas = Arc::new(SchemaRegistry::from_documents(bundle.schemas.clone())?);

        let memory = Arc::new(match &bundle.memory {
            Some(mem_manifest) => MemoryTiers::with_backends(
                backend_factory(&mem_manifest.task_store)?,
                backend_factory(&mem_manifest.project_store)?,
                backend_singleton(&mem_manifest.global_store)?,
            ),
            None => MemoryTiers::new_in_memory(),
        });
        let mut profiles = HashMap::new();
        if let Some(mem_manifest) = &bundle.memory {
            for profile in &mem_manifest.context_profiles {
                profiles.insert(profile.id.clone(), profile.clone());
            }
        }
        let context_assembler = Arc::new(ContextAssembler::new(memory.clone(), profiles));

        let artifact_store = Arc::new(ArtifactStore::new());
        let telemetry = Arc::new(TelemetryBus::new());
        telemetry.start_plugins();

        let mut tool_runtime = ToolRuntime::new(bundle.tools.tools.clone())
            .with_telemetry(telemetry.clone())
            .with_artifact_store(artifact_store.clone())
            .with_caller_flags(CallerFlags::default())
            .with_schemas(schemas.clone());

        if let Some(policies) = &bundle.policies {
            let mut evaluator = DenyListPolicyEvaluator::new();
            for entry in &policies.deny {
                evaluator = evaluator.deny(entry.tool_id.clone(), entry.task_ids.clone());
            }
            tool_runtime = tool_runtime.with_policy_evaluator(Arc::new(evaluator));
        }
        let tool_runtime = Arc::new(tool_runtime);

        let agent_runtime = Arc::new(AgentRuntime::new("v1"));
        let agent_ids: Vec<String> = bundle.agents.agents.iter().map(|a| a.id.clone()).collect();

        let node_executor = Arc::new(
            NodeExecutor::new(agent_runtime.clone(), tool_runtime.clone(), context_assembler, DeterministicRegistry::new())
                .with_telemetry(telemetry.clone())
                .with_schemas(schemas),
        );

        let task_manager = Arc::new(TaskManager::in_memory());
        let dag = Arc::new(dag);
        let router = Arc::new(Router::new(dag.clone(), node_executor, task_manager.clone()).with_telemetry(telemetry.clone()));

        Ok(Self {
            dag,
            memory,
            artifact_store,
            telemetry,
            tool_runtime,
            agent_runtime,
            task_manager,
            router,
            agent_ids,
            queue: Mutex::new(std::collections::VecDeque::new()),
            queue_capacity: 256,
        })
    }

    fn project_id_of(input: &Value) -> String {
        input
            .get("project_id")
            .and_then(|v| v.as_str())
            .unwrap_or("default")
            .to_string()
    }

    /// Run one request to completion. `input` must be JSON-serializable;
    /// a value that fails to serialize is the one `Err` this call returns —
    /// every other failure mode folds into `Ok(RunOutcome { status:
    /// Failed, .. })`.
    pub async fn run<T: Serialize>(&self, input: T, start_node_id: Option<&str>) -> Result<RunOutcome> {
        let value = serde_json::to_value(input)
            .map_err(|e| EngineError::validation("input_not_json_serializable", e.to_string()))?;
        self.run_value(value, start_node_id).await
    }

    async fn run_value(&self, input: Value, start_node_id: Option<&str>) -> Result<RunOutcome> {
        let project_id = Self::project_id_of(&input);
        let started = std::time::Instant::now();

        let result = self.router.execute_task(input, start_node_id, &project_id).await?;

        let _ = self.memory.conclude_task(&result.task_id).await;

        Ok(RunOutcome {
            task_id: result.task_id,
            status: result.status,
            output: result.current_output,
            history: result.history,
            node_sequence: result.visited_node_ids,
            execution_time_ms: started.elapsed().as_millis() as u64,
        })
    }

    /// Append a request to the run queue. Rejects once `queue_capacity` is
    /// reached, bounding memory by refusing enqueue when full.
    pub fn enqueue<T: Serialize>(&self, input: T, start_node_id: Option<&str>) -> Result<()> {
        let value = serde_json::to_value(input)
            .map_err(|e| EngineError::validation("input_not_json_serializable", e.to_string()))?;
        let project_id = Self::project_id_of(&value);

        let mut queue = self.queue.lock();
        if queue.len() >= self.queue_capacity {
            return Err(EngineError::validation("queue_full", "run queue is at capacity"));
        }
        queue.push_back(QueuedRun { input: value, start_node_id: start_node_id.map(str::to_string), project_id });
        Ok(())
    }

    /// Drain and run every queued request in FIFO order, using the same
    /// router instance.
    pub async fn run_queued(&self) -> Result<Vec<RunOutcome>> {
        let mut outcomes = Vec::new();
        loop {
            let next = self.queue.lock().pop_front();
            let Some(queued) = next else { break };
            let started = std::time::Instant::now();
            let result = self
                .router
                .execute_task(queued.input, queued.start_node_id.as_deref(), &queued.project_id)
                .await?;
            let _ = self.memory.conclude_task(&result.task_id).await;
            outcomes.push(RunOutcome {
                task_id: result.task_id,
                status: result.status,
                output: result.current_output,
                history: result.history,
                node_sequence: result.visited_node_ids,
                execution_time_ms: started.elapsed().as_millis() as u64,
            });
        }
        Ok(outcomes)
    }

    pub fn get_events(&self) -> Vec<Event> {
        self.telemetry.events()
    }

    pub fn get_events_by_type(&self, event_type: EventType) -> Vec<Event> {
        self.telemetry.events_of_type(event_type)
    }

    pub fn get_events_by_task(&self, task_id: &str) -> Vec<Event> {
        self.telemetry.events_of_task(task_id)
    }

    pub fn clear_events(&self) {
        self.telemetry.clear();
    }

    pub fn get_task_summary(&self, task_id: &str) -> Option<TaskSummary> {
        let task = self.task_manager.get(task_id)?;
        Some(TaskSummary {
            task_id: task.task_id,
            status: task.status,
            current_node_id: task.current_node_id,
            child_task_ids: task.lineage.child_task_ids,
        })
    }

    pub fn get_task_history(&self, task_id: &str) -> Vec<StageExecutionRecord> {
        self.task_manager.get(task_id).map(|t| t.history).unwrap_or_default()
    }

    pub fn get_task_artifacts(&self, task_id: &str) -> Vec<Artifact> {
        self.artifact_store.by_task_id(task_id)
    }

    pub fn get_task_events(&self, task_id: &str) -> Vec<Event> {
        self.get_events_by_task(task_id)
    }

    pub fn get_all_task_ids(&self) -> Vec<String> {
        self.task_manager.all_task_ids()
    }

    pub fn dag(&self) -> &Dag {
        &self.dag
    }

    fn require_known_agent(&self, agent_id: &str) -> Result<()> {
        if self.agent_ids.iter().any(|id| id == agent_id) {
            Ok(())
        } else {
            Err(EngineError::validation("unknown_agent_id", format!("agent '{}' is not declared in agents.yaml", agent_id)))
        }
    }

    fn require_known_tool(&self, tool_id: &str) -> Result<()> {
        if self.tool_runtime.contains_tool(tool_id) {
            Ok(())
        } else {
            Err(EngineError::validation("unknown_tool_id", format!("tool '{}' is not declared in tools.yaml", tool_id)))
        }
    }

    /// Set an agent's model, scoped to `global`, a `project_id`, or a `task_id`.
    pub fn set_agent_model(&self, scope: Scope, agent_id: &str, model: String) -> Result<()> {
        self.require_known_agent(agent_id)?;
        match scope {
            Scope::Global => self.agent_runtime.set_global_model(agent_id, model),
            Scope::Project(project_id) => self.agent_runtime.set_project_model(&project_id, agent_id, model),
            Scope::Task(task_id) => self.agent_runtime.set_task_model(&task_id, agent_id, model),
        }
        Ok(())
    }

    pub fn set_agent_hyperparameters(&self, scope: Scope, agent_id: &str, params: serde_json::Map<String, Value>) -> Result<()> {
        self.require_known_agent(agent_id)?;
        match scope {
            Scope::Global => self.agent_runtime.set_global_hyperparameters(agent_id, params),
            Scope::Project(project_id) => self.agent_runtime.set_project_hyperparameters(&project_id, agent_id, params),
            Scope::Task(task_id) => self.agent_runtime.set_task_hyperparameters(&task_id, agent_id, params),
        }
        Ok(())
    }

    pub fn enable_tool(&self, scope: Scope, tool_id: &str, enabled: bool) -> Result<()> {
        self.require_known_tool(tool_id)?;
        let over = ToolOverride { enabled: Some(enabled), timeout_ms: None };
        self.apply_tool_override(scope, tool_id, over)
    }

    pub fn set_node_timeout(&self, scope: Scope, tool_id: &str, timeout_ms: u64) -> Result<()> {
        self.require_known_tool(tool_id)?;
        let over = ToolOverride { enabled: None, timeout_ms: Some(timeout_ms) };
        self.apply_tool_override(scope, tool_id, over)
    }

    fn apply_tool_override(&self, scope: Scope, tool_id: &str, over: ToolOverride) -> Result<()> {
        match scope {
            Scope::Global => self.tool_runtime.set_global_override(tool_id, over),
            Scope::Project(project_id) => self.tool_runtime.set_project_override(&project_id, tool_id, over),
            Scope::Task(task_id) => self.tool_runtime.set_task_override(&task_id, tool_id, over),
        }
        Ok(())
    }

    /// Overwrite a task's top-level request metadata in place; used by
    /// operators to correct a queued-but-not-yet-run request's parameters.
    pub fn set_task_parameters(&self, task_id: &str, params: Value) -> Result<()> {
        if self.task_manager.get(task_id).is_none() {
            return Err(EngineError::validation("unknown_task_id", format!("task '{}' is not known to this engine", task_id)));
        }
        self.task_manager.set_current_output(task_id, Some(params));
        Ok(())
    }

    pub fn clear_overrides(&self) {
        self.tool_runtime.clear_overrides();
        self.agent_runtime.clear_overrides();
    }
}

/// Override scope: each override applies to the global, project, or task level.
#[derive(Debug, Clone)]
pub enum Scope {
    Global,
    Project(String),
    Task(String),
}

fn require_path(config: &StoreConfig, store_type: &str) -> Result<PathBuf> {
    config.path.clone().map(PathBuf::from).ok_or_else(|| {
        EngineError::validation(
            "memory_backend_missing_path",
            format!("memory store_type '{}' requires a 'path'", store_type),
        )
    })
}

/// Build the per-entity backend factory a `StoreConfig` names, for the
/// task/project tiers (called once per new task/project id).
fn backend_factory(config: &StoreConfig) -> Result<BackendFactory> {
    match config.store_type.as_str() {
        "in_memory" => Ok(Arc::new(|| Arc::new(InMemoryBackend::new()) as Arc<dyn MemoryBackend>)),
        "append_log" => {
            let path = require_path(config, "append_log")?;
            Ok(Arc::new(move || Arc::new(AppendLogBackend::new(path.clone())) as Arc<dyn MemoryBackend>))
        }
        "sqlite" => sqlite_backend_factory(config),
        other => Err(EngineError::validation(
            "unknown_memory_backend",
            format!("unknown memory store_type '{}'", other),
        )),
    }
}

/// Build the single backend a `StoreConfig` names, for the global tier
/// (one singleton store, no per-entity factory needed).
fn backend_singleton(config: &StoreConfig) -> Result<Arc<dyn MemoryBackend>> {
    match config.store_type.as_str() {
        "in_memory" => Ok(Arc::new(InMemoryBackend::new())),
        "append_log" => {
            let path = require_path(config, "append_log")?;
            Ok(Arc::new(AppendLogBackend::new(path)))
        }
        "sqlite" => sqlite_backend_singleton(config),
        other => Err(EngineError::validation(
            "unknown_memory_backend",
            format!("unknown memory store_type '{}'", other),
        )),
    }
}

#[cfg(feature = "sqlite")]
fn sqlite_backend_factory(config: &StoreConfig) -> Result<BackendFactory> {
    let path = require_path(config, "sqlite")?;
    // Preflight: fail construction now if the path can't be opened at all,
    // rather than surfacing it lazily on the first task/project created.
    crate::memory::SqliteBackend::new(&path).map_err(|e| {
        EngineError::validation("memory_backend_unavailable", format!("sqlite store at '{}' failed to open: {}", path.display(), e.message))
    })?;
    Ok(Arc::new(move || match crate::memory::SqliteBackend::new(&path) {
        Ok(backend) => Arc::new(backend) as Arc<dyn MemoryBackend>,
        Err(e) => {
            tracing::error!(error = %e.message, path = %path.display(), "sqlite backend failed to open after startup validation; falling back to in-memory");
            Arc::new(InMemoryBackend::new()) as Arc<dyn MemoryBackend>
        }
    }))
}

#[cfg(not(feature = "sqlite"))]
fn sqlite_backend_factory(_config: &StoreConfig) -> Result<BackendFactory> {
    Err(EngineError::validation(
        "memory_backend_unavailable",
        "store_type 'sqlite' requires the crate's 'sqlite' feature to be enabled",
    ))
}

#[cfg(feature = "sqlite")]
fn sqlite_backend_singleton(config: &StoreConfig) -> Result<Arc<dyn MemoryBackend>> {
    let path = require_path(config, "sqlite")?;
    let backend = crate::memory::SqliteBackend::new(&path).map_err(|e| {
        EngineError::validation("memory_backend_unavailable", format!("sqlite store at '{}' failed to open: {}", path.display(), e.message))
    })?;
    Ok(Arc::new(backend))
}

#[cfg(not(feature = "sqlite"))]
fn sqlite_backend_singleton(_config: &StoreConfig) -> Result<Arc<dyn MemoryBackend>> {
    Err(EngineError::validation(
        "memory_backend_unavailable",
        "store_type 'sqlite' requires the crate's 'sqlite' feature to be enabled",
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn tempfile_dir() -> PathBuf {
        let dir = std::env::temp_dir().join(format!("agent-weave-engine-test-{}", uuid::Uuid::new_v4()));
        std::fs::create_dir_all(&dir).unwrap();
        dir
    }

    fn write(dir: &Path, name: &str, contents: &str) {
        std::fs::write(dir.join(name), contents).unwrap();
    }

    fn minimal_config() -> PathBuf {
        let dir = tempfile_dir();
        write(
            &dir,
            "workflow.yaml",
            r#"
nodes:
  - stage_id: start
    role: start
    kind: deterministic
    context: none
    default_start: true
  - stage_id: exit
    role: exit
    kind: deterministic
    context: none
edges:
  - from: start
    to: exit
"#,
        );
        write(
            &dir,
            "agents.yaml",
            r#"
agents:
  - id: writer
    kind: agent
    llm: openai
"#,
        );
        write(
            &dir,
            "tools.yaml",
            r#"
tools:
  - tool_id: fs_write
    kind: deterministic
    capabilities: [workspace_mutation]
    risk_level: medium
"#,
        );
        dir
    }

    #[tokio::test]
    async fn run_drives_a_linear_workflow_to_exit() {
        let dir = minimal_config();
        let engine = Engine::from_config_dir(&dir).unwrap();

        let outcome = engine.run(serde_json::json!({"goal": "demo"}), None).await.unwrap();
        assert_eq!(outcome.status, TaskStatus::Completed);
        assert_eq!(outcome.node_sequence, vec!["start".to_string(), "exit".to_string()]);
    }

    #[tokio::test]
    async fn unknown_agent_override_is_a_validation_error() {
        let dir = minimal_config();
        let engine = Engine::from_config_dir(&dir).unwrap();
        let err = engine.set_agent_model(Scope::Global, "ghost", "gpt-5".to_string()).unwrap_err();
        assert_eq!(err.id, "unknown_agent_id");
    }

    #[tokio::test]
    async fn unknown_tool_override_is_a_validation_error() {
        let dir = minimal_config();
        let engine = Engine::from_config_dir(&dir).unwrap();
        let err = engine.enable_tool(Scope::Global, "ghost_tool", false).unwrap_err();
        assert_eq!(err.id, "unknown_tool_id");
    }

    #[tokio::test]
    async fn enqueue_and_run_queued_drains_in_order() {
        let dir = minimal_config();
        let engine = Engine::from_config_dir(&dir).unwrap();
        engine.enqueue(serde_json::json!({"goal": "a"}), None).unwrap();
        engine.enqueue(serde_json::json!({"goal": "b"}), None).unwrap();

        let outcomes = engine.run_queued().await.unwrap();
        assert_eq!(outcomes.len(), 2);
        assert!(outcomes.iter().all(|o| o.status == TaskStatus::Completed));
    }

    #[tokio::test]
    async fn invalid_config_dir_is_a_load_error() {
        let dir = tempfile_dir();
        let err = Engine::from_config_dir(&dir).unwrap_err();
        assert_eq!(err.id, "manifest_load");
    }

    #[tokio::test]
    async fn get_task_summary_reports_status_after_run() {
        let dir = minimal_config();
        let engine = Engine::from_config_dir(&dir).unwrap();
        let outcome = engine.run(serde_json::json!({"goal": "demo"}), None).await.unwrap();

        let summary = engine.get_task_summary(&outcome.task_id).unwrap();
        assert_eq!(summary.status, TaskStatus::Completed);
        assert!(engine.get_all_task_ids().contains(&outcome.task_id));
    }

    #[tokio::test]
    async fn declared_append_log_store_type_actually_persists_to_disk() {
        let dir = minimal_config();
        let memory_dir = dir.join("memstore");
        write(
            &dir,
            "memory.yaml",
            &format!(
                r#"
task_store:
  store_type: append_log
  path: {task_path}
project_store:
  store_type: in_memory
global_store:
  store_type: append_log
  path: {global_path}
"#,
                task_path = memory_dir.join("task.jsonl").display(),
                global_path = memory_dir.join("global.jsonl").display(),
            ),
        );

        // The minimal workflow has no node that writes to memory, so
        // `from_config_dir` succeeding at all confirms the manifest's
        // `append_log`/`in_memory` store_types resolved to real backends
        // rather than failing construction; exercise the resulting
        // factory directly to confirm it writes to the declared path.
        let engine = Engine::from_config_dir(&dir).unwrap();
        engine.run(serde_json::json!({"goal": "demo"}), None).await.unwrap();

        let factory = backend_factory(&StoreConfig { store_type: "append_log".to_string(), path: Some(memory_dir.join("direct.jsonl").display().to_string()) }).unwrap();
        let backend = factory();
        backend
            .add(crate::model::ContextItem {
                id: "a".to_string(),
                kind: "note".to_string(),
                source: "test".to_string(),
                timestamp: chrono::Utc::now(),
                tags: vec![],
                importance: 0.5,
                token_cost: 1,
                payload: serde_json::Value::Null,
                metadata: serde_json::Map::new(),
                retrieval_score: None,
            })
            .await
            .unwrap();
        assert!(memory_dir.join("direct.jsonl").exists());
    }

    #[tokio::test]
    async fn unknown_memory_store_type_fails_engine_construction() {
        let dir = minimal_config();
        write(
            &dir,
            "memory.yaml",
            r#"
task_store:
  store_type: not_a_real_backend
project_store:
  store_type: in_memory
global_store:
  store_type: in_memory
"#,
        );

        let err = Engine::from_config_dir(&dir).unwrap_err();
        assert_eq!(err.id, "unknown_memory_backend");
    }

    #[tokio::test]
    async fn append_log_store_missing_path_fails_engine_construction() {
        let dir = minimal_config();
        write(
            &dir,
            "memory.yaml",
            r#"
task_store:
  store_type: append_log
project_store:
  store_type: in_memory
global_store:
  store_type: in_memory
"#,
        );

        let err = Engine::from_config_dir(&dir).unwrap_err();
        assert_eq!(err.id, "memory_backend_missing_path");
    }
}
