//! Graph preparation: circuits, marker insertion, bounded rewriting.

mod common;

use common::*;
use flowplan_core::config::PlanningOption;
use flowplan_core::error::{Error, Result};
use flowplan_core::graph::OperatorGraph;
use flowplan_core::operator::{CoreOperatorKind, OperatorSpec, PlanMarker, UserOperatorKind};
use flowplan_planner::markers::{insert_plan_markers, remove_cyclic_broadcasts};
use flowplan_planner::prepare::optimize;
use flowplan_planner::rules::RewriteContext;
use flowplan_planner::{plan_copy, prepare_operator_graph, OperatorRewriter, REDUCTION_STEP_LIMIT};

#[test]
fn cyclic_graph_reports_one_diagnostic_per_circuit() {
    let graph = cyclic_graph(2);
    let err = plan_copy(&context(), &graph).unwrap_err();
    assert!(matches!(err, Error::Diagnostics(_)));
    let diagnostics = err.diagnostics();
    assert_eq!(diagnostics.len(), 2);
    for diagnostic in diagnostics {
        assert!(diagnostic.message.contains("acyclic"));
        assert!(diagnostic.message.contains("head"));
        assert!(diagnostic.message.contains("tail"));
    }
}

#[test]
fn prepared_graph_has_boundaries_everywhere() {
    let mut graph = grouped_pipeline(false).graph;
    prepare_operator_graph(&context(), &mut graph).unwrap();
    for op in graph.operators() {
        // terminators are the ends of the flow
        let inputs = if op.is_marker_of(PlanMarker::Begin) { &[][..] } else { op.inputs() };
        let outputs = if op.is_marker_of(PlanMarker::End) { &[][..] } else { op.outputs() };
        for port in inputs.iter().chain(outputs) {
            assert!(graph.is_connected(*port), "{} has a dangling port", op.label());
        }
    }
    let gathers = graph
        .operators()
        .filter(|op| op.is_marker_of(PlanMarker::Gather))
        .count();
    assert_eq!(gathers, 1);
    assert!(graph.dependency_graph().find_circuits().is_empty());
}

#[test]
fn marker_insertion_is_idempotent() {
    let ctx = context_with(|c| {
        c.options
            .set(PlanningOption::CheckpointAfterExternalInputs, true)
            .set(PlanningOption::CheckpointBeforeExternalOutputs, true);
    });
    for mut graph in [grouped_pipeline(true).graph, broadcast_join(), checkpoint_fan_out()] {
        prepare_operator_graph(&ctx, &mut graph).unwrap();
        let before = graph.snapshot();
        insert_plan_markers(&ctx, &mut graph).unwrap();
        assert_eq!(graph.snapshot(), before);
    }
}

#[test]
fn external_checkpoints_are_optional() {
    let ctx = context_with(|c| {
        c.options.set(PlanningOption::CheckpointAfterExternalInputs, true);
    });
    let mut graph = broadcast_join();
    prepare_operator_graph(&ctx, &mut graph).unwrap();
    let checkpoints = graph
        .operators()
        .filter(|op| op.is_marker_of(PlanMarker::Checkpoint))
        .count();
    assert_eq!(checkpoints, 2);

    let mut plain = broadcast_join();
    prepare_operator_graph(&context(), &mut plain).unwrap();
    assert!(!plain
        .operators()
        .any(|op| op.is_marker_of(PlanMarker::Checkpoint)));
}

/// Inserts a projection after the first input, then removes it again.
#[derive(Debug)]
struct Oscillate;

impl OperatorRewriter for Oscillate {
    fn perform(&self, _context: &RewriteContext<'_>, graph: &mut OperatorGraph) -> Result<()> {
        let existing = graph
            .operators()
            .find(|op| op.is_core(CoreOperatorKind::Project))
            .map(|op| op.id());
        if let Some(id) = existing {
            return graph.bypass(id);
        }
        let input = graph
            .operators()
            .find(|op| op.as_external_input().is_some())
            .map(|op| op.id())
            .ok_or_else(|| Error::Graph("no input".into()))?;
        let port = graph.output(input, 0)?;
        graph.insert_after(port, OperatorSpec::core(CoreOperatorKind::Project, ty("order")))?;
        Ok(())
    }
}

#[test]
fn oscillating_rewriter_stops_at_the_step_limit() {
    let ctx = context().with_rewriter(Oscillate);
    let mut graph = grouped_pipeline(false).graph;
    let outcome = optimize(&ctx, &mut graph).unwrap();
    assert_eq!(outcome.steps, REDUCTION_STEP_LIMIT);
    assert!(!outcome.converged);
}

#[test]
fn non_convergence_is_not_fatal() {
    let ctx = context().with_rewriter(Oscillate).with_step_limit(10);
    let mut graph = grouped_pipeline(false).graph;
    let report = prepare_operator_graph(&ctx, &mut graph).unwrap();
    assert_eq!(report.optimization.steps, 10);
    assert!(!report.optimization.converged);
    assert!(plan_copy(&ctx, &grouped_pipeline(false).graph).is_ok());
}

#[test]
fn default_rules_converge() {
    let mut graph = grouped_pipeline(false).graph;
    let report = prepare_operator_graph(&context(), &mut graph).unwrap();
    assert!(report.optimization.converged);
}

/// `count` producers, each feeding a consumer both directly and through a
/// `BROADCAST` marker.
fn broadcast_cycles(count: usize) -> OperatorGraph {
    let mut g = OperatorGraph::new();
    for i in 0..count {
        let producer = g.add(extract(&format!("p{i}"), "row"));
        let broadcast = g.add(OperatorSpec::marker(PlanMarker::Broadcast, ty("row")));
        let consumer = g.add(
            OperatorSpec::user(format!("c{i}"), UserOperatorKind::Extract)
                .input("in", ty("row"))
                .input("side", ty("row"))
                .output("out", ty("row")),
        );
        connect(&mut g, producer, broadcast);
        connect_named(&mut g, producer, "out", consumer, "in");
        connect_named(&mut g, broadcast, "out", consumer, "side");
    }
    g
}

#[test]
fn cyclic_broadcasts_are_broken_with_checkpoints() {
    let mut graph = broadcast_cycles(3);
    let outcome = remove_cyclic_broadcasts(&context(), &mut graph).unwrap();
    assert!(outcome.converged);
    assert_eq!(outcome.steps, 3);
    let checkpoints = graph
        .operators()
        .filter(|op| op.is_marker_of(PlanMarker::Checkpoint))
        .count();
    assert_eq!(checkpoints, 3);
}

#[test]
fn cyclic_broadcast_removal_stops_at_the_step_limit() {
    let mut graph = broadcast_cycles(REDUCTION_STEP_LIMIT + 100);
    let outcome = remove_cyclic_broadcasts(&context(), &mut graph).unwrap();
    assert!(!outcome.converged);
    assert_eq!(outcome.steps, REDUCTION_STEP_LIMIT);
}

#[test]
fn cyclic_broadcast_without_free_inputs_is_an_invariant_error() {
    // the consumer's only input is fed by the producer and by the broadcast
    let mut g = OperatorGraph::new();
    let producer = g.add(extract("p", "row"));
    let broadcast = g.add(OperatorSpec::marker(PlanMarker::Broadcast, ty("row")));
    let consumer = g.add(extract("c", "row"));
    connect(&mut g, producer, broadcast);
    connect(&mut g, producer, consumer);
    connect_named(&mut g, broadcast, "out", consumer, "in");
    let err = remove_cyclic_broadcasts(&context(), &mut g).unwrap_err();
    assert!(matches!(err, Error::Invariant(_)), "{err}");
}
