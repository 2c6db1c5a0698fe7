//! Router / scheduler: a FIFO worklist over `(task_id, node_id)` pairs, with
//! role-specific routing for START/LINEAR/DECISION/BRANCH/SPLIT/MERGE/EXIT.
//! Follows `JobStateMachine`'s single-writer, worklist-owns-state style from
//! the codegraph-orchestration pipeline, generalized from 4 fixed stages to
//! arbitrary per-role routing.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use parking_lot::Mutex;
use serde_json::Value;

use chrono::Utc;

use crate::dag::Dag;
use crate::error::{EngineError, Result};
use crate::model::{Edge, LineageState, Node, NodeRole, StageExecutionRecord, Task, TaskMode, TaskSpec, TaskStatus};
use crate::node_executor::NodeExecutor;
use crate::task_manager::TaskManager;
use crate::telemetry::TelemetryBus;

/// One pending unit of work. `arrived_via` is the node that produced the
/// edge this item travelled, needed by MERGE to key arrivals per inbound edge.
struct WorkItem {
    task_id: String,
    node_id: String,
    arrived_via: Option<String>,
}

/// Per-merge-node, per-branching-ancestor accumulation of arrived clone/
/// subtask outputs, keyed by the node that fed each inbound edge.
struct MergeWait {
    arrived: HashMap<String, Value>,
    total_inbound: usize,
}

/// The final shape returned to a caller of `execute_task`.
pub struct RouterResult {
    pub task_id: String,
    pub status: TaskStatus,
    pub current_output: Option<Value>,
    pub history: Vec<StageExecutionRecord>,
    pub visited_node_ids: Vec<String>,
}

pub struct Router {
    dag: Arc<Dag>,
    node_executor: Arc<NodeExecutor>,
    task_manager: Arc<TaskManager>,
    telemetry: Option<Arc<TelemetryBus>>,
    merge_state: Mutex<HashMap<(String, String), MergeWait>>,
}

impl Router {
    pub fn new(dag: Arc<Dag>, node_executor: Arc<NodeExecutor>, task_manager: Arc<TaskManager>) -> Self {
        Self {
            dag,
            node_executor,
            task_manager,
            telemetry: None,
            merge_state: Mutex::new(HashMap::new()),
        }
    }

    pub fn with_telemetry(mut self, telemetry: Arc<TelemetryBus>) -> Self {
        self.telemetry = Some(telemetry);
        self
    }

    /// Run a fresh root task to completion, starting at `start_node_id` (or
    /// the DAG's default start when `None`).
    pub async fn execute_task(&self, input: Value, start_node_id: Option<&str>, project_id: &str) -> Result<RouterResult> {
        let start_node = self.resolve_start_node(start_node_id)?;

        let spec = TaskSpec {
            spec_id: project_id.to_string(),
            request: input.clone(),
            mode: TaskMode::Implement,
            priority: 0,
            metadata: serde_json::Map::new(),
        };
        let mut task = Task::new_root(spec, None);
        task.current_output = Some(input);
        task.status = TaskStatus::Running;
        let root_task_id = task.task_id.clone();
        self.task_manager.insert(task);

        let mut worklist: VecDeque<WorkItem> = VecDeque::new();
        worklist.push_back(WorkItem {
            task_id: root_task_id.clone(),
            node_id: start_node.stage_id.clone(),
            arrived_via: None,
        });

        let mut visited_node_ids = Vec::new();

        while let Some(item) = worklist.pop_front() {
            let node = self.dag.node(&item.node_id).ok_or_else(|| {
                EngineError::routing("unknown_node", format!("worklist references unknown node '{}'", item.node_id))
            })?;
            let task = self.task_manager.get(&item.task_id).ok_or_else(|| {
                EngineError::routing("unknown_task", format!("worklist references unknown task '{}'", item.task_id))
            })?;

            let outcome = self.node_executor.execute_node(&task, node, project_id).await;
            visited_node_ids.push(node.stage_id.clone());
            self.task_manager.append_history(&item.task_id, outcome.record.clone());

            if outcome.record.error.is_some() {
                self.task_manager.set_status(&item.task_id, TaskStatus::Failed);
                continue;
            }

            self.task_manager.set_current_output(&item.task_id, outcome.next_output.clone());
            self.task_manager.set_current_node(&item.task_id, Some(node.stage_id.clone()));

            // A routing failure (no matching DECISION edge, malformed SPLIT
            // output, ...) concludes this task in failure; it never aborts
            // the whole run, mirroring how schema/tool failures "halt this
            // node" rather than propagating out of `execute_task`.
            match self.route(&item.task_id, node, outcome.next_output, item.arrived_via) {
                Ok(next_items) => worklist.extend(next_items),
                Err(e) => {
                    self.task_manager.append_history(&item.task_id, routing_error_record(node, e));
                    self.task_manager.set_status(&item.task_id, TaskStatus::Failed);
                }
            }
        }

        let root_task = self
            .task_manager
            .get(&root_task_id)
            .expect("root task inserted at the start of execute_task");
        let status = self.final_status(&root_task_id);

        Ok(RouterResult {
            task_id: root_task_id,
            status,
            current_output: root_task.current_output,
            history: root_task.history,
            visited_node_ids,
        })
    }

    fn resolve_start_node(&self, start_node_id: Option<&str>) -> Result<&Node> {
        match start_node_id {
            Some(id) => {
                let node = self
                    .dag
                    .node(id)
                    .ok_or_else(|| EngineError::routing("start_node_not_found", format!("start node '{}' not found", id)))?;
                if node.role != NodeRole::Start {
                    return Err(EngineError::routing(
                        "start_node_wrong_role",
                        format!("node '{}' is not a START node", id),
                    ));
                }
                Ok(node)
            }
            None => self.dag.default_start(),
        }
    }

    /// Role-specific routing. Returns zero or more follow-up work items.
    fn route(&self, task_id: &str, node: &Node, output: Option<Value>, arrived_via: Option<String>) -> Result<Vec<WorkItem>> {
        match node.role {
            NodeRole::Start | NodeRole::Linear => self.route_single_outbound(task_id, node),
            NodeRole::Decision => self.route_decision(task_id, node, output),
            NodeRole::Branch => self.route_branch(task_id, node, output),
            NodeRole::Split => self.route_split(task_id, node, output),
            NodeRole::Merge => self.route_merge(task_id, node, output, arrived_via),
            NodeRole::Exit => self.route_exit(task_id, output),
        }
    }

    fn route_single_outbound(&self, task_id: &str, node: &Node) -> Result<Vec<WorkItem>> {
        let edges = self.dag.outbound(&node.stage_id);
        if edges.len() != 1 {
            return Err(EngineError::routing(
                "non_unique_outbound_edge",
                format!("node '{}' (role {}) must have exactly one outbound edge, has {}", node.stage_id, node.role, edges.len()),
            )
            .with_stage(node.stage_id.clone()));
        }
        Ok(vec![self.next_item(task_id, &edges[0])])
    }

    fn route_decision(&self, task_id: &str, node: &Node, output: Option<Value>) -> Result<Vec<WorkItem>> {
        let condition = decision_condition(&output);
        let edges = self.dag.outbound(&node.stage_id);
        let matched = edges.iter().find(|e| e.condition.as_deref() == Some(condition.as_str()));
        match matched {
            Some(edge) => Ok(vec![self.next_item(task_id, edge)]),
            None => Err(EngineError::routing(
                "no_matching_decision_edge",
                format!("node '{}': no outbound edge matches condition '{}'", node.stage_id, condition),
            )
            .with_stage(node.stage_id.clone())
            .with_task(task_id.to_string())),
        }
    }

    fn route_branch(&self, task_id: &str, node: &Node, output: Option<Value>) -> Result<Vec<WorkItem>> {
        let edges = self.dag.outbound(&node.stage_id);
        let parent_spec = self.task_manager.get(task_id).unwrap().spec.clone();
        let mut items = Vec::with_capacity(edges.len());
        for edge in edges {
            let mut clone = Task::new_root(parent_spec.clone(), None);
            let clone_id = clone.task_id.clone();
            clone.current_output = output.clone();
            clone.lineage = LineageState::clone_of(task_id, edge.condition.clone());
            self.task_manager.insert(clone);
            self.task_manager.add_child(task_id, &clone_id);
            items.push(WorkItem { task_id: clone_id, node_id: edge.to.clone(), arrived_via: Some(node.stage_id.clone()) });
        }
        Ok(items)
    }

    fn route_split(&self, task_id: &str, node: &Node, output: Option<Value>) -> Result<Vec<WorkItem>> {
        let inputs = split_inputs(&output).ok_or_else(|| {
            EngineError::routing(
                "invalid_split_input",
                format!("node '{}': SPLIT output must be a non-empty list or {{subtask_inputs: [...]}}", node.stage_id),
            )
            .with_stage(node.stage_id.clone())
            .with_task(task_id.to_string())
        })?;

        let edges = self.dag.outbound(&node.stage_id);
        let parent_spec = self.task_manager.get(task_id).unwrap().spec.clone();
        let mut items = Vec::with_capacity(inputs.len());
        for (index, subtask_input) in inputs.into_iter().enumerate() {
            let edge = &edges[index % edges.len()];
            let mut subtask = Task::new_root(parent_spec.clone(), None);
            let subtask_id = subtask.task_id.clone();
            subtask.current_output = Some(subtask_input);
            subtask.lineage = LineageState::subtask_of(task_id, index);
            self.task_manager.insert(subtask);
            self.task_manager.add_child(task_id, &subtask_id);
            items.push(WorkItem { task_id: subtask_id, node_id: edge.to.clone(), arrived_via: Some(node.stage_id.clone()) });
        }
        Ok(items)
    }

    fn route_merge(&self, task_id: &str, node: &Node, output: Option<Value>, arrived_via: Option<String>) -> Result<Vec<WorkItem>> {
        let task = self.task_manager.get(task_id).unwrap();
        let parent_task_id = task.lineage.parent_task_id.clone().unwrap_or_else(|| task_id.to_string());
        let arrived_via = arrived_via.unwrap_or_else(|| node.stage_id.clone());
        let key = (node.stage_id.clone(), parent_task_id.clone());
        let total_inbound = self.dag.inbound(&node.stage_id).len();

        let combined = {
            let mut state = self.merge_state.lock();
            let wait = state.entry(key.clone()).or_insert_with(|| MergeWait { arrived: HashMap::new(), total_inbound });
            wait.arrived.insert(arrived_via, output.unwrap_or(Value::Null));
            if wait.arrived.len() < wait.total_inbound {
                None
            } else {
                let inbound_order: Vec<String> = self.dag.inbound(&node.stage_id).iter().map(|e| e.from.clone()).collect();
                let combined: Vec<Value> = inbound_order.iter().filter_map(|from| wait.arrived.get(from).cloned()).collect();
                state.remove(&key);
                Some(Value::Array(combined))
            }
        };

        let Some(combined) = combined else {
            return Ok(vec![]);
        };

        let outbound = self.dag.outbound(&node.stage_id);
        if outbound.len() != 1 {
            return Err(EngineError::routing(
                "merge_requires_single_outbound",
                format!("node '{}' must have exactly one outbound edge", node.stage_id),
            )
            .with_stage(node.stage_id.clone()));
        }

        self.task_manager.set_current_output(&parent_task_id, Some(combined));
        Ok(vec![WorkItem {
            task_id: parent_task_id,
            node_id: outbound[0].to.clone(),
            arrived_via: Some(node.stage_id.clone()),
        }])
    }

    fn route_exit(&self, task_id: &str, output: Option<Value>) -> Result<Vec<WorkItem>> {
        let _ = output;
        self.task_manager.set_status(task_id, TaskStatus::Completed);
        Ok(vec![])
    }

    fn next_item(&self, task_id: &str, edge: &Edge) -> WorkItem {
        WorkItem {
            task_id: task_id.to_string(),
            node_id: edge.to.clone(),
            arrived_via: Some(edge.from.clone()),
        }
    }

    /// COMPLETED if the root task or any descendant reached a non-failing
    /// EXIT; FAILED otherwise.
    fn final_status(&self, root_task_id: &str) -> TaskStatus {
        let mut stack = vec![root_task_id.to_string()];
        while let Some(task_id) = stack.pop() {
            if let Some(task) = self.task_manager.get(&task_id) {
                if task.status == TaskStatus::Completed {
                    return TaskStatus::Completed;
                }
                stack.extend(task.lineage.child_task_ids.clone());
            }
        }
        TaskStatus::Failed
    }
}

/// Extract a condition label in priority order `selected_edge`, `condition`,
/// `route`, `next`; non-object output is stringified directly.
fn decision_condition(output: &Option<Value>) -> String {
    match output {
        Some(Value::Object(map)) => {
            for key in ["selected_edge", "condition", "route", "next"] {
                if let Some(value) = map.get(key) {
                    return value.as_str().map(str::to_string).unwrap_or_else(|| value.to_string());
                }
            }
            Value::Object(map.clone()).to_string()
        }
        Some(other) => match other {
            Value::String(s) => s.clone(),
            _ => other.to_string(),
        },
        None => "null".to_string(),
    }
}

/// Wrap a routing failure as a history entry so it is visible in
/// `Task::history` even though no node executor ran to produce one.
fn routing_error_record(node: &Node, error: EngineError) -> StageExecutionRecord {
    let now = Utc::now();
    StageExecutionRecord {
        node_id: node.stage_id.clone(),
        node_role: node.role,
        node_kind: node.kind,
        input: Value::Null,
        output: None,
        error: Some(error),
        node_status: TaskStatus::Failed,
        tool_plan: None,
        tool_calls: vec![],
        context_profile_id: None,
        context_metadata: serde_json::Map::new(),
        started_at: now,
        completed_at: now,
    }
}

/// A SPLIT node's output must be a non-empty list, or an object carrying a
/// non-empty `subtask_inputs` list.
fn split_inputs(output: &Option<Value>) -> Option<Vec<Value>> {
    match output {
        Some(Value::Array(items)) if !items.is_empty() => Some(items.clone()),
        Some(Value::Object(map)) => match map.get("subtask_inputs") {
            Some(Value::Array(items)) if !items.is_empty() => Some(items.clone()),
            _ => None,
        },
        _ => None,
    }
}
