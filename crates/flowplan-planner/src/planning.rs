//! Entry points: operator graph in, decorated stage plan out.

use flowplan_core::config::PlanningOption;
use flowplan_core::error::Result;
use flowplan_core::graph::OperatorGraph;

use crate::assemble::start_assemble_plan;
use crate::context::PlanningContext;
use crate::decorate::decorate_plan;
use crate::equivalence::{CustomEquivalence, DefaultEquivalence, OperatorEquivalence};
use crate::grouping::classify;
use crate::plan::PlanDetail;
use crate::prepare::prepare_operator_graph;
use crate::primitive::create_primitive_plan;

/// Plans a copy of `graph`; the caller's graph is left untouched.
pub fn plan_copy(context: &PlanningContext, graph: &OperatorGraph) -> Result<PlanDetail> {
    let mut copy = graph.clone();
    plan(context, &mut copy)
}

/// Prepares `graph` in place and builds the execution plan from it.
///
/// On return `graph` holds the marker-annotated graph that the plan's
/// provenance refers to.
pub fn plan(context: &PlanningContext, graph: &mut OperatorGraph) -> Result<PlanDetail> {
    let report = prepare_operator_graph(context, graph)?;
    tracing::debug!(
        optimization_steps = report.optimization.steps,
        converged = report.optimization.converged,
        "operator graph ready for planning"
    );
    create_plan(context, graph)
}

/// Builds the plan of an already prepared graph.
pub fn create_plan(context: &PlanningContext, graph: &OperatorGraph) -> Result<PlanDetail> {
    let primitive = create_primitive_plan(graph)?;
    let groups = classify(&primitive)?;
    let equivalence: Box<dyn OperatorEquivalence> =
        if context.is_enabled(PlanningOption::UnifySubplanIo) {
            Box::new(CustomEquivalence)
        } else {
            Box::new(DefaultEquivalence)
        };
    let mut assembler = start_assemble_plan(&primitive, graph)
        .with_trivial_output_elimination(true)
        .with_redundant_output_elimination(true)
        .with_duplicate_checkpoint_elimination(true)
        .with_union_push_down(true)
        .with_sort_result(true)
        .with_boxed_equivalence(equivalence);
    for group in &groups {
        assembler.add(group.elements().iter().copied());
    }
    let mut detail = assembler.build()?;
    tracing::debug!(stages = detail.plan().len(), "assembled plan");

    decorate_plan(context, &mut detail, graph)?;
    Ok(detail)
}
