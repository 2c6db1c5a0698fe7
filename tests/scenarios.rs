//! End-to-end scenarios over the `Engine` façade, each asserting the literal
//! node_sequence / output / history shapes across linear runs, decision
//! routing, branch fan-out, and construction-time DAG validation failures.

use std::path::{Path, PathBuf};

use agent_weave::Engine;
use serde_json::json;

fn tempdir() -> PathBuf {
    let dir = std::env::temp_dir().join(format!("agent-weave-scenarios-{}", uuid::Uuid::new_v4()));
    std::fs::create_dir_all(&dir).unwrap();
    dir
}

fn write(dir: &Path, name: &str, contents: &str) {
    std::fs::write(dir.join(name), contents).unwrap();
}

fn write_agents_and_tools(dir: &Path) {
    write(
        dir,
        "agents.yaml",
        r#"
agents:
  - id: writer
    kind: agent
    llm: openai
"#,
    );
    write(
        dir,
        "tools.yaml",
        r#"
tools:
  - tool_id: fs_write
    kind: deterministic
    capabilities: [workspace_mutation]
    risk_level: medium
"#,
    );
}

/// Scenario 1: linear success. start -> process -> exit, all DETERMINISTIC,
/// default (identity) handlers. Input `{"x": 1}` passes through unchanged.
#[tokio::test]
async fn linear_success_passes_input_through_to_exit() {
    let dir = tempdir();
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
  - stage_id: process
    role: linear
    kind: deterministic
    context: none
  - stage_id: exit
    role: exit
    kind: deterministic
    context: none
edges:
  - from: start
    to: process
  - from: process
    to: exit
"#,
    );
    write_agents_and_tools(&dir);

    let engine = Engine::from_config_dir(&dir).unwrap();
    let outcome = engine.run(json!({"x": 1}), None).await.unwrap();

    assert_eq!(outcome.node_sequence, vec!["start", "process", "exit"]);
    assert_eq!(outcome.output, Some(json!({"x": 1})));
    assert_eq!(outcome.history.len(), 3);
}

/// Scenario 2: decision routing. start -> decision -> {A, B} -> exit_b, with
/// `B` selected via the input's `selected_edge` field. `A` never appears.
#[tokio::test]
async fn decision_routing_follows_the_selected_edge_label() {
    let dir = tempdir();
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
  - stage_id: decide
    role: decision
    kind: deterministic
    context: none
  - stage_id: a
    role: linear
    kind: deterministic
    context: none
  - stage_id: b
    role: linear
    kind: deterministic
    context: none
  - stage_id: exit
    role: exit
    kind: deterministic
    context: none
edges:
  - from: start
    to: decide
  - from: decide
    to: a
    condition: a
  - from: decide
    to: b
    condition: b
  - from: a
    to: exit
  - from: b
    to: exit
"#,
    );
    write_agents_and_tools(&dir);

    let engine = Engine::from_config_dir(&dir).unwrap();
    let outcome = engine.run(json!({"selected_edge": "b"}), None).await.unwrap();

    assert_eq!(outcome.node_sequence, vec!["start", "decide", "b", "exit"]);
    assert!(!outcome.node_sequence.contains(&"a".to_string()));
}

/// Scenario 3: missing default start. Two START nodes, neither default.
/// Engine construction fails with a dag_validation error naming "default start".
#[tokio::test]
async fn missing_default_start_fails_engine_construction() {
    let dir = tempdir();
    write(
        &dir,
        "workflow.yaml",
        r#"
nodes:
  - stage_id: start1
    role: start
    kind: deterministic
    context: none
  - stage_id: start2
    role: start
    kind: deterministic
    context: none
  - stage_id: exit
    role: exit
    kind: deterministic
    context: none
edges:
  - from: start1
    to: exit
  - from: start2
    to: exit
"#,
    );
    write_agents_and_tools(&dir);

    let err = Engine::from_config_dir(&dir).unwrap_err();
    assert!(err.message.contains("default start"));
}

/// Scenario 4: cycle detection. start->a, a->b, b->a, a->exit. Engine
/// construction fails with a dag_validation error naming the cyclic node.
#[tokio::test]
async fn cycle_fails_engine_construction() {
    let dir = tempdir();
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
  - stage_id: a
    role: linear
    kind: deterministic
    context: none
  - stage_id: b
    role: linear
    kind: deterministic
    context: none
  - stage_id: exit
    role: exit
    kind: deterministic
    context: none
edges:
  - from: start
    to: a
  - from: a
    to: b
  - from: b
    to: a
  - from: a
    to: exit
"#,
    );
    write_agents_and_tools(&dir);

    let err = Engine::from_config_dir(&dir).unwrap_err();
    assert_eq!(err.id, "dag_cycle_detected");
}

/// Scenario 5: branch then merge. BRANCH with two outbound edges a/b, each
/// leading into a shared MERGE node. The merge waits for both clones to
/// arrive before combining their outputs (in inbound-edge order) and
/// routing the combined array back onto the original (pre-branch) task,
/// which then proceeds to exit.
#[tokio::test]
async fn branch_then_merge_combines_both_clones_on_the_parent_task() {
    let dir = tempdir();
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
  - stage_id: branch
    role: branch
    kind: deterministic
    context: none
  - stage_id: a
    role: linear
    kind: deterministic
    context: none
  - stage_id: b
    role: linear
    kind: deterministic
    context: none
  - stage_id: merge
    role: merge
    kind: deterministic
    context: none
  - stage_id: exit
    role: exit
    kind: deterministic
    context: none
edges:
  - from: start
    to: branch
  - from: branch
    to: a
    condition: a
  - from: branch
    to: b
    condition: b
  - from: a
    to: merge
  - from: b
    to: merge
  - from: merge
    to: exit
"#,
    );
    write_agents_and_tools(&dir);

    let engine = Engine::from_config_dir(&dir).unwrap();
    let outcome = engine.run(json!({"v": 1}), None).await.unwrap();

    assert_eq!(outcome.status, agent_weave::model::TaskStatus::Completed);
    assert_eq!(outcome.output, Some(json!([{"v": 1}, {"v": 1}])));
    assert_eq!(outcome.node_sequence.last(), Some(&"exit".to_string()));

    let summary = engine.get_task_summary(&outcome.task_id).unwrap();
    assert_eq!(summary.child_task_ids.len(), 2, "branch should have spawned exactly two clones");
}

/// Scenario 6: branch fan-out. BRANCH with three outbound edges a/b/c and
/// input `{"v": 0}`; each clone starts with the parent's output and its own
/// edge label, and the run still completes once any clone exits.
#[tokio::test]
async fn branch_fans_out_a_clone_per_outbound_edge() {
    let dir = tempdir();
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
  - stage_id: branch
    role: branch
    kind: deterministic
    context: none
  - stage_id: a
    role: linear
    kind: deterministic
    context: none
  - stage_id: b
    role: linear
    kind: deterministic
    context: none
  - stage_id: c
    role: linear
    kind: deterministic
    context: none
  - stage_id: exit_a
    role: exit
    kind: deterministic
    context: none
  - stage_id: exit_b
    role: exit
    kind: deterministic
    context: none
  - stage_id: exit_c
    role: exit
    kind: deterministic
    context: none
edges:
  - from: start
    to: branch
  - from: branch
    to: a
    condition: a
  - from: branch
    to: b
    condition: b
  - from: branch
    to: c
    condition: c
  - from: a
    to: exit_a
  - from: b
    to: exit_b
  - from: c
    to: exit_c
"#,
    );
    write_agents_and_tools(&dir);

    let engine = Engine::from_config_dir(&dir).unwrap();
    let outcome = engine.run(json!({"v": 0}), None).await.unwrap();

    assert_eq!(outcome.status, agent_weave::model::TaskStatus::Completed);
    let summary = engine.get_task_summary(&outcome.task_id).unwrap();
    assert_eq!(summary.child_task_ids.len(), 3);
}
