//! The workflow DAG: typed nodes, directed edges, adjacency indexes, and the
//! invariant validator.
//!
//! Generalizes the fixed 4-stage `PipelineDAG`/topological-sort of the
//! codegraph-orchestration pipeline to an arbitrary node set keyed by string
//! `stage_id`, with per-role edge arity and reachability validation in
//! place of a simpler "dependencies exist + acyclic" check.

use std::collections::{HashMap, HashSet};

use crate::error::{EngineError, Result};
use crate::model::{Edge, Node, NodeRole};

/// Directed acyclic graph over workflow nodes. Construction is O(|V|+|E|).
#[derive(Debug, Clone)]
pub struct Dag {
    nodes: HashMap<String, Node>,
    edges: Vec<Edge>,
    outbound: HashMap<String, Vec<Edge>>,
    inbound: HashMap<String, Vec<Edge>>,
}

impl Dag {
    pub fn new(nodes: Vec<Node>, edges: Vec<Edge>) -> Self {
        let mut node_map = HashMap::with_capacity(nodes.len());
        for node in nodes {
            node_map.insert(node.stage_id.clone(), node);
        }

        let mut outbound: HashMap<String, Vec<Edge>> =
            node_map.keys().map(|id| (id.clone(), vec![])).collect();
        let mut inbound: HashMap<String, Vec<Edge>> =
            node_map.keys().map(|id| (id.clone(), vec![])).collect();

        for edge in &edges {
            outbound.entry(edge.from.clone()).or_default().push(edge.clone());
            inbound.entry(edge.to.clone()).or_default().push(edge.clone());
        }

        Self {
            nodes: node_map,
            edges,
            outbound,
            inbound,
        }
    }

    pub fn node(&self, stage_id: &str) -> Option<&Node> {
        self.nodes.get(stage_id)
    }

    pub fn nodes(&self) -> impl Iterator<Item = &Node> {
        self.nodes.values()
    }

    pub fn edges(&self) -> &[Edge] {
        &self.edges
    }

    pub fn outbound(&self, stage_id: &str) -> &[Edge] {
        self.outbound.get(stage_id).map(|v| v.as_slice()).unwrap_or(&[])
    }

    pub fn inbound(&self, stage_id: &str) -> &[Edge] {
        self.inbound.get(stage_id).map(|v| v.as_slice()).unwrap_or(&[])
    }

    pub fn default_start(&self) -> Result<&Node> {
        let starts: Vec<&Node> = self
            .nodes
            .values()
            .filter(|n| n.role == NodeRole::Start && n.default_start)
            .collect();
        if starts.len() != 1 {
            return Err(EngineError::validation(
                "default_start_not_unique",
                format!(
                    "expected exactly one default start node, found {}",
                    starts.len()
                ),
            ));
        }
        Ok(starts[0])
    }

    /// Run every DAG-wide invariant check in one pass and return the first failure.
    pub fn validate(&self) -> Result<()> {
        for node in self.nodes.values() {
            node.validate_self()?;
        }

        self.validate_edges_reference_known_nodes()?;
        self.validate_acyclic()?;
        let default_start = self.default_start()?;
        self.validate_has_exit()?;
        self.validate_reachable_from(&default_start.stage_id)?;
        self.validate_reaches_exit(&default_start.stage_id)?;
        self.validate_arity()?;

        Ok(())
    }

    fn validate_edges_reference_known_nodes(&self) -> Result<()> {
        for edge in &self.edges {
            if !self.nodes.contains_key(&edge.from) {
                return Err(EngineError::validation(
                    "edge_unknown_from",
                    format!("edge references unknown source node '{}'", edge.from),
                ));
            }
            if !self.nodes.contains_key(&edge.to) {
                return Err(EngineError::validation(
                    "edge_unknown_to",
                    format!("edge references unknown target node '{}'", edge.to),
                ));
            }
        }
        Ok(())
    }

    /// Tri-color DFS cycle detection.
    fn validate_acyclic(&self) -> Result<()> {
        #[derive(Clone, Copy, PartialEq)]
        enum Color {
            White,
            Gray,
            Black,
        }

        let mut color: HashMap<&str, Color> =
            self.nodes.keys().map(|id| (id.as_str(), Color::White)).collect();

        fn visit<'a>(dag: &'a Dag, id: &'a str, color: &mut HashMap<&'a str, Color>) -> Result<()> {
            color.insert(id, Color::Gray);
            for edge in dag.outbound(id) {
                match color.get(edge.to.as_str()).copied().unwrap_or(Color::White) {
                    Color::Gray => {
                        return Err(EngineError::validation(
                            "dag_cycle_detected",
                            format!("cycle detected at node '{}'", edge.to),
                        ));
                    }
                    Color::White => visit(dag, &edge.to, color)?,
                    Color::Black => {}
                }
            }
            color.insert(id, Color::Black);
            Ok(())
        }

        let ids: Vec<String> = self.nodes.keys().cloned().collect();
        for id in &ids {
            if color.get(id.as_str()).copied() == Some(Color::White) {
                visit(self, id, &mut color)?;
            }
        }
        Ok(())
    }

    fn validate_has_exit(&self) -> Result<()> {
        if self.nodes.values().any(|n| n.role == NodeRole::Exit) {
            Ok(())
        } else {
            Err(EngineError::validation("no_exit_node", "workflow has no EXIT node"))
        }
    }

    fn validate_reachable_from(&self, start: &str) -> Result<()> {
        let reachable = self.reachable_set(start);
        let unreachable: Vec<&str> = self
            .nodes
            .keys()
            .map(|s| s.as_str())
            .filter(|id| !reachable.contains(*id))
            .collect();
        if unreachable.is_empty() {
            Ok(())
        } else {
            Err(EngineError::validation(
                "unreachable_nodes",
                format!("node(s) unreachable from default start: {:?}", unreachable),
            ))
        }
    }

    fn validate_reaches_exit(&self, start: &str) -> Result<()> {
        let reachable = self.reachable_set(start);
        let reaches_exit = reachable
            .iter()
            .any(|id| self.nodes.get(*id).map(|n| n.role == NodeRole::Exit).unwrap_or(false));
        if reaches_exit {
            Ok(())
        } else {
            Err(EngineError::validation(
                "default_start_no_exit_path",
                "default start cannot reach any EXIT node",
            ))
        }
    }

    fn reachable_set(&self, start: &str) -> HashSet<&str> {
        let mut seen = HashSet::new();
        let mut stack = vec![start];
        while let Some(id) = stack.pop() {
            if !seen.insert(id) {
                continue;
            }
            for edge in self.outbound(id) {
                if !seen.contains(edge.to.as_str()) {
                    stack.push(&edge.to);
                }
            }
        }
        seen
    }

    fn validate_arity(&self) -> Result<()> {
        for node in self.nodes.values() {
            let (min_in, min_out, max_out) = node.role.arity();
            let in_count = self.inbound(&node.stage_id).len();
            let out_count = self.outbound(&node.stage_id).len();

            if in_count < min_in {
                return Err(EngineError::validation(
                    "arity_inbound_violation",
                    format!(
                        "node '{}' (role {}) requires >= {} inbound edge(s), has {}",
                        node.stage_id, node.role, min_in, in_count
                    ),
                )
                .with_stage(node.stage_id.clone()));
            }
            if out_count < min_out {
                return Err(EngineError::validation(
                    "arity_outbound_violation",
                    format!(
                        "node '{}' (role {}) requires >= {} outbound edge(s), has {}",
                        node.stage_id, node.role, min_out, out_count
                    ),
                )
                .with_stage(node.stage_id.clone()));
            }
            if let Some(max) = max_out {
                if out_count > max {
                    return Err(EngineError::validation(
                        "arity_outbound_violation",
                        format!(
                            "node '{}' (role {}) permits <= {} outbound edge(s), has {}",
                            node.stage_id, node.role, max, out_count
                        ),
                    )
                    .with_stage(node.stage_id.clone()));
                }
            }
        }
        Ok(())
    }
}
