//! Property-based tests for the workflow DAG's invariants
//! (acyclic, unique default start, full reachability,
//! default start reaches an EXIT, per-role arity).

use agent_weave::model::{ContextSelector, Edge, Node, NodeKind, NodeRole};
use agent_weave::Dag;
use proptest::prelude::*;

fn det_node(id: &str, role: NodeRole, default_start: bool) -> Node {
    Node {
        stage_id: id.to_string(),
        role,
        kind: NodeKind::Deterministic,
        context: ContextSelector::none(),
        agent_id: None,
        tools: vec![],
        inputs_schema_id: None,
        outputs_schema_id: None,
        default_start,
    }
}

fn edge(from: &str, to: &str, condition: Option<&str>) -> Edge {
    Edge { from: from.to_string(), to: to.to_string(), condition: condition.map(|s| s.to_string()) }
}

/// Build a straight-line chain `start -> n0 -> n1 -> ... -> n(len-1) -> exit`,
/// every node DETERMINISTIC and already arity/reachability-valid.
fn linear_chain(len: usize) -> Dag {
    let mut nodes = vec![det_node("start", NodeRole::Start, true)];
    let mut edges = vec![];
    let mut prev = "start".to_string();
    for i in 0..len {
        let id = format!("n{i}");
        nodes.push(det_node(&id, NodeRole::Linear, false));
        edges.push(edge(&prev, &id, None));
        prev = id;
    }
    nodes.push(det_node("exit", NodeRole::Exit, false));
    edges.push(edge(&prev, "exit", None));
    Dag::new(nodes, edges)
}

prop_compose! {
    /// A chain length plus a back-edge `(from, to)` pair guaranteed to lie
    /// within the chain and point strictly backwards, so it always closes
    /// a cycle instead of relying on `prop_assume!` rejection sampling.
    fn chain_with_back_edge()(len in 2usize..20)
        (len in Just(len), back_from in 1usize..len)
        (len in Just(len), back_from in Just(back_from), back_to in 0usize..back_from)
        -> (usize, usize, usize)
    {
        (len, back_from, back_to)
    }
}

proptest! {
    /// Property: any chain built by `linear_chain`, regardless of length,
    /// is acyclic, fully reachable from its default start, and reaches an
    /// EXIT — the DAG invariants hold independent of chain length.
    #[test]
    fn linear_chains_of_any_length_validate(len in 0usize..30) {
        let dag = linear_chain(len);
        prop_assert!(dag.validate().is_ok());
        prop_assert_eq!(dag.default_start().unwrap().stage_id.as_str(), "start");
        prop_assert_eq!(dag.nodes().count(), len + 2);
        prop_assert_eq!(dag.edges().len(), len + 1);
    }

    /// Property: adding one back edge to an otherwise-valid chain always
    /// produces a cycle, and `validate` reports it as such even though the
    /// same edge also breaks the LINEAR role's outbound arity — acyclicity
    /// is checked before arity in `Dag::validate`.
    #[test]
    fn any_injected_back_edge_is_detected_as_a_cycle((len, back_from, back_to) in chain_with_back_edge()) {
        let mut nodes = vec![det_node("start", NodeRole::Start, true)];
        let mut edges = vec![];
        let mut prev = "start".to_string();
        for i in 0..len {
            let id = format!("n{i}");
            nodes.push(det_node(&id, NodeRole::Linear, false));
            edges.push(edge(&prev, &id, None));
            prev = id;
        }
        nodes.push(det_node("exit", NodeRole::Exit, false));
        edges.push(edge(&prev, "exit", None));
        edges.push(edge(&format!("n{back_from}"), &format!("n{back_to}"), None));

        let dag = Dag::new(nodes, edges);
        let err = dag.validate().unwrap_err();
        prop_assert_eq!(err.id.as_str(), "dag_cycle_detected");
    }

    /// Property: `default_start` succeeds iff exactly one START node has
    /// `default_start = true`, regardless of how many other START nodes
    /// (all non-default) coexist in the graph.
    #[test]
    fn default_start_resolution_requires_exactly_one(extra_starts in 0usize..5, has_default in any::<bool>()) {
        let mut nodes = vec![det_node("exit", NodeRole::Exit, false)];
        let mut edges = vec![];
        for i in 0..extra_starts {
            let id = format!("start{i}");
            nodes.push(det_node(&id, NodeRole::Start, false));
            edges.push(edge(&id, "exit", None));
        }
        if has_default {
            nodes.push(det_node("main_start", NodeRole::Start, true));
            edges.push(edge("main_start", "exit", None));
        }

        let dag = Dag::new(nodes, edges);
        match dag.default_start() {
            Ok(node) => {
                prop_assert!(has_default);
                prop_assert_eq!(node.stage_id.as_str(), "main_start");
            }
            Err(e) => {
                prop_assert!(!has_default);
                prop_assert_eq!(e.id.as_str(), "default_start_not_unique");
            }
        }
    }

    /// Property: a DECISION node with fewer than two outbound edges always
    /// fails arity validation, for any number of additional valid branches.
    #[test]
    fn decision_nodes_below_minimum_outbound_arity_are_rejected(outbound_count in 0usize..2) {
        let mut nodes = vec![
            det_node("start", NodeRole::Start, true),
            det_node("decide", NodeRole::Decision, false),
        ];
        let mut edges = vec![edge("start", "decide", None)];
        for i in 0..outbound_count {
            let id = format!("exit{i}");
            nodes.push(det_node(&id, NodeRole::Exit, false));
            edges.push(edge("decide", &id, Some(&format!("c{i}"))));
        }
        if outbound_count == 0 {
            // DECISION still needs *a* path to an EXIT to reach the
            // reachability/has-exit checks, so give the graph a detached
            // EXIT unreachable from decide — arity fails before that matters.
            nodes.push(det_node("unused_exit", NodeRole::Exit, false));
            edges.push(edge("start", "unused_exit", None));
        }

        let dag = Dag::new(nodes, edges);
        let err = dag.validate().unwrap_err();
        prop_assert_eq!(err.id.as_str(), "arity_outbound_violation");
    }
}
