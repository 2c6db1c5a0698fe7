//! Node and edge types for the workflow DAG.

use serde::{Deserialize, Serialize};

use crate::error::{EngineError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeRole {
    Start,
    Linear,
    Decision,
    Branch,
    Split,
    Merge,
    Exit,
}

impl NodeRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            NodeRole::Start => "start",
            NodeRole::Linear => "linear",
            NodeRole::Decision => "decision",
            NodeRole::Branch => "branch",
            NodeRole::Split => "split",
            NodeRole::Merge => "merge",
            NodeRole::Exit => "exit",
        }
    }

    /// Per-role (min_inbound, min_outbound, max_outbound) arity.
    /// `None` for max means unbounded (>=).
    pub fn arity(&self) -> (usize, usize, Option<usize>) {
        match self {
            NodeRole::Start => (0, 1, Some(1)),
            NodeRole::Linear => (1, 1, Some(1)),
            NodeRole::Decision => (1, 2, None),
            NodeRole::Branch => (1, 2, None),
            NodeRole::Split => (1, 1, None),
            NodeRole::Merge => (2, 1, Some(1)),
            NodeRole::Exit => (1, 0, Some(0)),
        }
    }
}

impl std::fmt::Display for NodeRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeKind {
    Deterministic,
    Agent,
}

/// What context a node receives: a named profile, the built-in "global"
/// profile, or "none".
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ContextSelector {
    Profile(String),
}

impl ContextSelector {
    pub fn none() -> Self {
        ContextSelector::Profile("none".to_string())
    }

    pub fn global() -> Self {
        ContextSelector::Profile("global".to_string())
    }

    pub fn is_none(&self) -> bool {
        matches!(self, ContextSelector::Profile(s) if s == "none")
    }

    pub fn is_global(&self) -> bool {
        matches!(self, ContextSelector::Profile(s) if s == "global")
    }

    pub fn profile_id(&self) -> Option<&str> {
        match self {
            ContextSelector::Profile(s) if s != "none" && s != "global" => Some(s.as_str()),
            _ => None,
        }
    }
}

/// A node in the workflow DAG.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Node {
    pub stage_id: String,
    pub role: NodeRole,
    pub kind: NodeKind,
    pub context: ContextSelector,
    #[serde(default)]
    pub agent_id: Option<String>,
    #[serde(default)]
    pub tools: Vec<String>,
    #[serde(default)]
    pub inputs_schema_id: Option<String>,
    #[serde(default)]
    pub outputs_schema_id: Option<String>,
    #[serde(default)]
    pub default_start: bool,
}

impl Node {
    /// Validate the node-local invariants (role/kind/tools/default_start).
    /// DAG-wide invariants (arity, reachability, acyclicity) are checked by `Dag::validate`.
    pub fn validate_self(&self) -> Result<()> {
        if matches!(self.role, NodeRole::Start | NodeRole::Exit)
            && self.kind != NodeKind::Deterministic
        {
            return Err(EngineError::validation(
                "node_role_kind_mismatch",
                format!(
                    "node '{}': role {} must be DETERMINISTIC",
                    self.stage_id, self.role
                ),
            )
            .with_stage(self.stage_id.clone()));
        }

        if self.kind == NodeKind::Agent && self.agent_id.as_deref().unwrap_or("").is_empty() {
            return Err(EngineError::validation(
                "agent_node_missing_agent_id",
                format!("node '{}': AGENT kind requires a non-empty agent_id", self.stage_id),
            )
            .with_stage(self.stage_id.clone()));
        }

        if matches!(self.role, NodeRole::Exit) && !self.tools.is_empty() {
            return Err(EngineError::validation(
                "exit_node_forbids_tools",
                format!("node '{}': EXIT nodes may not declare tools", self.stage_id),
            )
            .with_stage(self.stage_id.clone()));
        }

        if self.default_start && self.role != NodeRole::Start {
            return Err(EngineError::validation(
                "default_start_wrong_role",
                format!(
                    "node '{}': default_start=true is only permitted on START nodes",
                    self.stage_id
                ),
            )
            .with_stage(self.stage_id.clone()));
        }

        Ok(())
    }
}

/// An edge `(from, to)` plus an optional condition label used by DECISION nodes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Edge {
    pub from: String,
    pub to: String,
    #[serde(default)]
    pub condition: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn node(role: NodeRole, kind: NodeKind) -> Node {
        Node {
            stage_id: "n1".to_string(),
            role,
            kind,
            context: ContextSelector::none(),
            agent_id: None,
            tools: vec![],
            inputs_schema_id: None,
            outputs_schema_id: None,
            default_start: false,
        }
    }

    #[test]
    fn start_must_be_deterministic() {
        let n = node(NodeRole::Start, NodeKind::Agent);
        assert!(n.validate_self().is_err());
    }

    #[test]
    fn agent_kind_requires_agent_id() {
        let mut n = node(NodeRole::Linear, NodeKind::Agent);
        assert!(n.validate_self().is_err());
        n.agent_id = Some("writer".to_string());
        assert!(n.validate_self().is_ok());
    }

    #[test]
    fn exit_forbids_tools() {
        let mut n = node(NodeRole::Exit, NodeKind::Deterministic);
        n.tools = vec!["fs_write".to_string()];
        assert!(n.validate_self().is_err());
    }

    #[test]
    fn default_start_requires_start_role() {
        let mut n = node(NodeRole::Linear, NodeKind::Deterministic);
        n.default_start = true;
        assert!(n.validate_self().is_err());
    }

    #[test]
    fn context_selector_variants() {
        assert!(ContextSelector::none().is_none());
        assert!(ContextSelector::global().is_global());
        let p = ContextSelector::Profile("analysis".to_string());
        assert_eq!(p.profile_id(), Some("analysis"));
    }
}
