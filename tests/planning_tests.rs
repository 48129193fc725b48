//! End-to-end planning of small operator graphs.

mod common;

use common::*;
use flowplan_core::config::{DataSize, PlanningOption};
use flowplan_core::depgraph::GraphStatistics;
use flowplan_core::error::Error;
use flowplan_core::graph::OperatorGraph;
use flowplan_core::operator::{InputUnit, OperatorSpec, PortSpec, UserOperatorKind};
use flowplan_planner::analyze::{
    DriverType, IterativeInfo, NameInfo, ParameterInfo, PlanStatistics, SizeInfo, SubPlanInfo,
};
use flowplan_planner::{plan, plan_copy, save_info, to_info, DataExchange};

#[test]
fn grouped_pipeline_yields_two_stages_joined_by_a_shuffle() {
    let pipeline = grouped_pipeline(false);
    let detail = plan_copy(&context(), &pipeline.graph).unwrap();
    let staged = detail.plan();

    assert_eq!(staged.len(), 2);
    assert_eq!(staged.connections().len(), 1);
    assert!(staged.dependency_graph().find_circuits().is_empty());

    let info = to_info(staged);
    assert_eq!(
        info.edges(),
        vec![("v0.o0".to_string(), "v1.i0".to_string())]
    );
    let upstream = info.vertex("v0").unwrap();
    let downstream = info.vertex("v1").unwrap();
    assert_eq!(upstream.label, "input:orders");
    assert_eq!(downstream.label, "cogroup:total");
    assert_eq!(upstream.outputs[0].exchange, DataExchange::Shuffle);
    assert_eq!(downstream.inputs[0].exchange, DataExchange::Shuffle);
    assert_eq!(
        downstream.inputs[0].partition,
        Some(vec!["customer".to_string()])
    );
    assert_eq!(upstream.inputs[0].exchange, DataExchange::Nothing);
    assert_eq!(downstream.outputs[0].exchange, DataExchange::Nothing);
}

#[test]
fn plan_copy_leaves_the_graph_untouched() {
    let pipeline = grouped_pipeline(false);
    let before = pipeline.graph.snapshot();
    plan_copy(&context(), &pipeline.graph).unwrap();
    assert_eq!(pipeline.graph.snapshot(), before);
    assert_eq!(pipeline.graph.len(), 3);
}

#[test]
fn plan_prepares_the_graph_in_place() {
    let mut pipeline = grouped_pipeline(false);
    plan(&context(), &mut pipeline.graph).unwrap();
    assert!(pipeline.graph.len() > 3);
    assert!(pipeline.graph.operators().any(|op| op.is_marker()));
}

#[test]
fn partial_aggregation_is_exchanged_as_aggregate() {
    let pipeline = grouped_pipeline(true);
    let detail = plan_copy(&context(), &pipeline.graph).unwrap();
    let info = to_info(detail.plan());

    let upstream = info.vertex("v0").unwrap();
    let downstream = info.vertex("v1").unwrap();
    assert_eq!(upstream.outputs[0].exchange, DataExchange::Aggregate);
    assert!(upstream.outputs[0].aggregation.is_some());
    assert_eq!(downstream.inputs[0].exchange, DataExchange::Shuffle);
    assert_eq!(downstream.label, "aggregate:total");

    let stage = detail
        .plan()
        .elements()
        .iter()
        .find(|s| s.attribute::<NameInfo>().map(|n| n.name.as_str()) == Some("v1"))
        .unwrap();
    assert_eq!(
        stage.attribute::<SubPlanInfo>().map(|i| i.driver_type),
        Some(DriverType::Aggregate)
    );
}

#[test]
fn whole_input_is_broadcast() {
    let graph = broadcast_join();
    let detail = plan_copy(&context(), &graph).unwrap();
    let staged = detail.plan();

    assert_eq!(staged.len(), 2);
    let info = to_info(staged);
    let edges = info.edges();
    assert_eq!(edges.len(), 1);
    let (from, to) = &edges[0];
    let producer = info.vertex(from.split('.').next().unwrap()).unwrap();
    let consumer = info.vertex(to.split('.').next().unwrap()).unwrap();
    assert!(producer
        .outputs
        .iter()
        .any(|o| o.exchange == DataExchange::Broadcast));
    assert!(consumer
        .inputs
        .iter()
        .any(|i| i.exchange == DataExchange::Broadcast));
    assert!(staged
        .elements()
        .iter()
        .any(|s| s.attribute::<SubPlanInfo>().map(|i| i.broadcast_join) == Some(true)));
}

#[test]
fn sibling_branches_of_a_checkpoint_share_one_stage() {
    let graph = checkpoint_fan_out();
    let detail = plan_copy(&context(), &graph).unwrap();
    let staged = detail.plan();

    assert_eq!(staged.len(), 2);
    let merged = staged
        .elements()
        .iter()
        .find(|s| {
            let labels: Vec<String> = s.operators().operators().map(|o| o.label()).collect();
            labels.iter().any(|l| l.starts_with("left"))
                && labels.iter().any(|l| l.starts_with("right"))
        })
        .expect("both branches in one stage");
    assert_eq!(merged.inputs().len(), 1);
    assert_eq!(staged.connections().len(), 1);
}

#[test]
fn planning_is_deterministic() {
    let graph = checkpoint_fan_out();
    let first = to_info(plan_copy(&context(), &graph).unwrap().plan());
    let second = to_info(plan_copy(&context(), &graph).unwrap().plan());
    assert_eq!(
        serde_json::to_value(&first).unwrap(),
        serde_json::to_value(&second).unwrap()
    );
}

#[test]
fn stage_names_follow_topological_order() {
    let pipeline = grouped_pipeline(false);
    let detail = plan_copy(&context(), &pipeline.graph).unwrap();
    let staged = detail.plan();
    let names: Vec<&str> = staged
        .elements()
        .iter()
        .map(|s| s.attribute::<NameInfo>().unwrap().name.as_str())
        .collect();
    assert_eq!(names, vec!["v0", "v1"]);
    for stage in staged.elements() {
        for (index, port) in stage.inputs().iter().enumerate() {
            assert_eq!(
                port.attribute::<NameInfo>().unwrap().name,
                format!("i{index}")
            );
        }
    }
}

#[test]
fn default_equivalence_still_produces_a_valid_plan() {
    let ctx = context_with(|c| {
        c.options.set(PlanningOption::UnifySubplanIo, false);
    });
    let graph = checkpoint_fan_out();
    let detail = plan_copy(&ctx, &graph).unwrap();
    assert_eq!(detail.plan().len(), 2);
    assert!(detail.plan().dependency_graph().find_circuits().is_empty());
}

#[test]
fn size_estimation_attaches_sizes_and_partition_classes() {
    let ctx = context_with(|c| {
        c.explicit_partition_sizes
            .insert("cogroup:total".to_string(), DataSize::Large);
    });
    let pipeline = grouped_pipeline(false);
    let detail = plan_copy(&ctx, &pipeline.graph).unwrap();
    for stage in detail.plan().elements() {
        for port in stage.inputs().iter().chain(stage.outputs()) {
            assert!(port.attribute::<SizeInfo>().is_some());
        }
    }
    let info = to_info(detail.plan());
    let upstream = info.vertex("v0").unwrap();
    let downstream = info.vertex("v1").unwrap();
    assert_eq!(upstream.outputs[0].partition_size.as_deref(), Some("large"));
    assert_eq!(downstream.inputs[0].partition_size.as_deref(), Some("large"));
}

#[test]
fn disabled_size_estimation_leaves_ports_bare() {
    let ctx = context_with(|c| {
        c.options.set(PlanningOption::SizeEstimation, false);
    });
    let pipeline = grouped_pipeline(false);
    let detail = plan_copy(&ctx, &pipeline.graph).unwrap();
    for stage in detail.plan().elements() {
        for port in stage.inputs().iter().chain(stage.outputs()) {
            assert!(port.attribute::<SizeInfo>().is_none());
        }
    }
}

#[test]
fn parameters_and_iterations_are_detected() {
    let mut pipeline = grouped_pipeline(false);
    pipeline
        .graph
        .operator_mut(pipeline.total)
        .unwrap()
        .attributes_mut()
        .insert(IterativeInfo::parameters(["date"]));

    let detail = plan_copy(&context(), &pipeline.graph).unwrap();
    let staged = detail.plan();
    let parameters = staged.attribute::<ParameterInfo>().unwrap();
    assert!(parameters.names.contains("date"));
    assert_eq!(
        staged.attribute::<IterativeInfo>(),
        Some(&IterativeInfo::parameters(["date"]))
    );
}

#[test]
fn statistics_are_attached_on_request() {
    let ctx = context_with(|c| {
        c.options.set(PlanningOption::GraphStatistics, true);
        c.options.set(PlanningOption::PlanStatistics, true);
    });
    let pipeline = grouped_pipeline(false);
    let detail = plan_copy(&ctx, &pipeline.graph).unwrap();
    let staged = detail.plan();
    let graph_stats = staged.attribute::<GraphStatistics>().unwrap();
    assert_eq!(graph_stats.vertices, 2);
    assert_eq!(graph_stats.edges, 1);
    let plan_stats = staged.attribute::<PlanStatistics>().unwrap();
    assert_eq!(plan_stats.stages, 2);
    assert_eq!(plan_stats.connections, 1);
}

#[test]
fn saved_info_is_json() {
    let pipeline = grouped_pipeline(false);
    let detail = plan_copy(&context(), &pipeline.graph).unwrap();
    let mut buffer = Vec::new();
    save_info(detail.plan(), &mut buffer).unwrap();
    let value: serde_json::Value = serde_json::from_slice(&buffer).unwrap();
    let vertices = value["vertices"].as_array().unwrap();
    assert_eq!(vertices.len(), 2);
    assert_eq!(vertices[0]["outputs"][0]["exchange"], "SHUFFLE");
}

#[test]
fn crossing_broadcasts_still_yield_an_acyclic_plan() {
    for remove_cycles in [true, false] {
        let ctx = context_with(|c| {
            c.options
                .set(PlanningOption::RemoveCyclicBroadcasts, remove_cycles);
        });
        let detail = plan_copy(&ctx, &crossing_broadcasts()).unwrap();
        let staged = detail.plan();
        assert!(staged.dependency_graph().find_circuits().is_empty());
        assert!(staged.dependency_graph().topological_order().is_ok());
        assert!(to_info(staged)
            .vertices
            .iter()
            .flat_map(|v| v.inputs.iter())
            .any(|i| i.exchange == DataExchange::Broadcast));
    }
}

fn input_stage_outputs(partial: bool) -> usize {
    let detail = plan_copy(&context(), &twin_folds(partial)).unwrap();
    let info = to_info(detail.plan());
    info.vertices
        .iter()
        .find(|v| v.label == "input:orders")
        .map(|v| v.outputs.len())
        .unwrap()
}

#[test]
fn equal_gathers_share_one_stage_output() {
    assert_eq!(input_stage_outputs(false), 1);
}

#[test]
fn partial_and_plain_gathers_stay_apart() {
    assert_eq!(input_stage_outputs(true), 2);
}

#[test]
fn stage_fed_only_by_broadcasts_is_rejected() {
    let mut g = OperatorGraph::new();
    let rates = g.add(OperatorSpec::external_input("rates", ty("rate")));
    let lookup = g.add(
        OperatorSpec::user("lookup", UserOperatorKind::Extract)
            .input_port(PortSpec::new("side", ty("rate")).unit(InputUnit::Whole))
            .output("out", ty("rate")),
    );
    let output = g.add(OperatorSpec::external_output("looked_up", ty("rate")));
    connect_named(&mut g, rates, "port", lookup, "side");
    connect(&mut g, lookup, output);
    let err = plan_copy(&context(), &g).unwrap_err();
    assert!(matches!(err, Error::Invariant(_)), "{err}");
}
