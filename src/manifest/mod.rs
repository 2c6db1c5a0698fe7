//! Manifest loader: parses a configuration directory
//! of YAML manifests plus a `schemas/` directory of JSON-schema documents
//! into the typed structs the engine façade wires together. Follows
//! `supernovae-st-nika`'s `serde_yaml`-backed manifest loading pattern,
//! since codegraph-orchestration has no manifest-directory concept of its own.

use std::path::{Path, PathBuf};

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{EngineError, Result};
use crate::model::{ContextProfile, Edge, Node, ToolDefinition};

/// `workflow.yaml`: the DAG's nodes and edges.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct WorkflowManifest {
    pub nodes: Vec<Node>,
    pub edges: Vec<Edge>,
}

/// One entry in `agents.yaml`.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct AgentDefinition {
    pub id: String,
    pub kind: String,
    pub llm: String,
    #[serde(default)]
    pub config: serde_json::Map<String, Value>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct AgentsManifest {
    pub agents: Vec<AgentDefinition>,
}

/// `tools.yaml`: one `ToolDefinition` per declared tool.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ToolsManifest {
    pub tools: Vec<ToolDefinition>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct StoreConfig {
    pub store_type: String,
    #[serde(default)]
    pub path: Option<String>,
}

/// `memory.yaml`: per-tier backend configuration plus named context profiles.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct MemoryManifest {
    pub task_store: StoreConfig,
    pub project_store: StoreConfig,
    pub global_store: StoreConfig,
    #[serde(default)]
    pub context_profiles: Vec<ContextProfile>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct PolicyDenyEntry {
    pub tool_id: String,
    #[serde(default)]
    pub task_ids: Vec<String>,
}

/// `policies.yaml`: a deny-list consumed by `DenyListPolicyEvaluator`.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct PoliciesManifest {
    #[serde(default)]
    pub deny: Vec<PolicyDenyEntry>,
}

/// Everything parsed out of one configuration directory.
pub struct ManifestBundle {
    pub workflow: WorkflowManifest,
    pub agents: AgentsManifest,
    pub tools: ToolsManifest,
    pub memory: Option<MemoryManifest>,
    pub policies: Option<PoliciesManifest>,
    /// `(schema_id, parsed document)` pairs from `schemas/*.json`.
    pub schemas: Vec<(String, Value)>,
}

impl ManifestBundle {
    /// Load and parse every manifest under `config_dir`. `workflow.yaml`,
    /// `agents.yaml`, and `tools.yaml` are required; `memory.yaml` and
    /// `policies.yaml` are optional; `schemas/*.json` is scanned if present.
    pub fn load(config_dir: impl AsRef<Path>) -> Result<Self> {
        let dir = config_dir.as_ref();
        let workflow = load_required_yaml::<WorkflowManifest>(dir, "workflow.yaml")?;
        let agents = load_required_yaml::<AgentsManifest>(dir, "agents.yaml")?;
        let tools = load_required_yaml::<ToolsManifest>(dir, "tools.yaml")?;
        let memory = load_optional_yaml::<MemoryManifest>(dir, "memory.yaml")?;
        let policies = load_optional_yaml::<PoliciesManifest>(dir, "policies.yaml")?;
        let schemas = load_schemas(dir)?;

        Ok(Self { workflow, agents, tools, memory, policies, schemas })
    }
}

fn load_required_yaml<T: DeserializeOwned>(dir: &Path, filename: &str) -> Result<T> {
    let path = dir.join(filename);
    let raw = std::fs::read_to_string(&path)
        .map_err(|_| EngineError::validation("manifest_load", format!("required manifest '{}' not found", filename)))?;
    parse_yaml(filename, &raw)
}

fn load_optional_yaml<T: DeserializeOwned>(dir: &Path, filename: &str) -> Result<Option<T>> {
    let path = dir.join(filename);
    if !path.exists() {
        return Ok(None);
    }
    let raw = std::fs::read_to_string(&path)
        .map_err(|e| EngineError::validation("manifest_load", format!("failed to read '{}': {}", filename, e)))?;
    parse_yaml(filename, &raw).map(Some)
}

fn parse_yaml<T: DeserializeOwned>(filename: &str, raw: &str) -> Result<T> {
    serde_yaml::from_str(raw)
        .map_err(|e| EngineError::validation("manifest_load", format!("failed to parse '{}': {}", filename, e)))
}

fn load_schemas(dir: &Path) -> Result<Vec<(String, Value)>> {
    let schemas_dir = dir.join("schemas");
    if !schemas_dir.exists() {
        return Ok(vec![]);
    }

    let mut schemas = vec![];
    let entries = std::fs::read_dir(&schemas_dir)
        .map_err(|e| EngineError::validation("manifest_load", format!("failed to read schemas directory: {}", e)))?;
    for entry in entries {
        let entry = entry.map_err(|e| EngineError::validation("manifest_load", format!("failed to read schemas directory: {}", e)))?;
        let path: PathBuf = entry.path();
        if path.extension().is_none_or(|ext| ext != "json") {
            continue;
        }
        let stem = path.file_stem().map(|s| s.to_string_lossy().into_owned()).unwrap_or_default();
        let raw = std::fs::read_to_string(&path)
            .map_err(|e| EngineError::validation("manifest_load", format!("failed to read schema '{}': {}", stem, e)))?;
        let document: Value = serde_json::from_str(&raw)
            .map_err(|e| EngineError::validation("manifest_load", format!("failed to parse schema '{}': {}", stem, e)))?;
        schemas.push((stem, document));
    }
    schemas.sort_by(|a, b| a.0.cmp(&b.0));
    Ok(schemas)
}
