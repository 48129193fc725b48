//! Attaches derived metadata to an assembled plan.

use flowplan_core::config::PlanningOption;
use flowplan_core::error::Result;
use flowplan_core::graph::OperatorGraph;

use crate::analyze::iterative::attach_iterative_info;
use crate::analyze::naming::attach_names;
use crate::analyze::stats::{attach_graph_statistics, attach_plan_statistics};
use crate::analyze::{ParameterInfo, PartitionGroupAnalyzer, PlanEstimator, SubPlanAnalyzer};
use crate::context::PlanningContext;
use crate::plan::{Plan, PlanDetail};

/// Runs the analyzers in their fixed order. `graph` is the prepared graph
/// the plan was built from.
pub fn decorate_plan(
    context: &PlanningContext,
    detail: &mut PlanDetail,
    graph: &OperatorGraph,
) -> Result<()> {
    attach_core_info(detail, graph)?;
    attach_names(detail.plan_mut())?;
    attach_broadcast_info(detail, graph);
    if context.is_enabled(PlanningOption::SizeEstimation) {
        attach_size_info(context, detail.plan_mut(), graph);
        attach_partition_group_info(context, detail.plan_mut());
    }
    if context.is_enabled(PlanningOption::IterativeExtension) {
        attach_iterative_info(detail.plan_mut())?;
    }
    if context.is_enabled(PlanningOption::ParameterDetection) {
        let info = ParameterInfo::of(detail.plan());
        detail.plan_mut().attributes_mut().insert(info);
    }
    if context.is_enabled(PlanningOption::GraphStatistics) {
        attach_graph_statistics(detail.plan_mut());
    }
    if context.is_enabled(PlanningOption::PlanStatistics) {
        attach_plan_statistics(detail.plan_mut());
    }
    Ok(())
}

fn attach_core_info(detail: &mut PlanDetail, graph: &OperatorGraph) -> Result<()> {
    let mut stages = Vec::new();
    let mut inputs = Vec::new();
    let mut outputs = Vec::new();
    {
        let analyzer = SubPlanAnalyzer::new(detail, graph);
        for stage in detail.plan().elements() {
            stages.push((stage.id(), analyzer.analyze(stage)?));
            for port in stage.inputs() {
                inputs.push((stage.id(), port.id(), analyzer.analyze_input(stage, port)?));
            }
            for port in stage.outputs() {
                outputs.push((stage.id(), port.id(), analyzer.analyze_output(stage, port)?));
            }
        }
    }
    let plan = detail.plan_mut();
    for (id, info) in stages {
        if let Some(stage) = plan.element_mut(id) {
            stage.attributes_mut().insert(info);
        }
    }
    for (id, port, info) in inputs {
        if let Some(port) = plan.element_mut(id).and_then(|s| s.input_mut(port)) {
            port.attributes_mut().insert(info);
        }
    }
    for (id, port, info) in outputs {
        if let Some(port) = plan.element_mut(id).and_then(|s| s.output_mut(port)) {
            port.attributes_mut().insert(info);
        }
    }
    Ok(())
}

fn attach_broadcast_info(detail: &mut PlanDetail, graph: &OperatorGraph) {
    let mut found = Vec::new();
    {
        let analyzer = SubPlanAnalyzer::new(detail, graph);
        for stage in detail.plan().elements() {
            for port in stage.inputs().iter().chain(stage.outputs()) {
                if let Some(info) = analyzer.analyze_broadcast(stage, port) {
                    found.push((stage.id(), port.id(), info));
                }
            }
        }
    }
    let plan = detail.plan_mut();
    for (id, port, info) in found {
        let Some(stage) = plan.element_mut(id) else {
            continue;
        };
        if let Some(input) = stage.input_mut(port) {
            input.attributes_mut().insert(info);
        } else if let Some(output) = stage.output_mut(port) {
            output.attributes_mut().insert(info);
        }
    }
}

fn attach_size_info(context: &PlanningContext, plan: &mut Plan, graph: &OperatorGraph) {
    let estimator = PlanEstimator::new(context.estimator(), graph);
    for stage in plan.elements_mut() {
        for port in stage.inputs_mut() {
            let info = estimator.estimate(port);
            port.attributes_mut().insert(info);
        }
        for port in stage.outputs_mut() {
            let info = estimator.estimate(port);
            port.attributes_mut().insert(info);
        }
    }
}

fn attach_partition_group_info(context: &PlanningContext, plan: &mut Plan) {
    let config = context.config();
    let analyzer =
        PartitionGroupAnalyzer::new(&config.partition_limits, &config.explicit_partition_sizes);
    let groups = analyzer.analyze(plan);
    for stage in plan.elements_mut() {
        for port in stage.inputs_mut() {
            if let Some(info) = groups.get(&port.id()) {
                port.attributes_mut().insert(*info);
            }
        }
        for port in stage.outputs_mut() {
            if let Some(info) = groups.get(&port.id()) {
                port.attributes_mut().insert(*info);
            }
        }
    }
}
