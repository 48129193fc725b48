//! Operator graph preparation: normalize, optimize, fix, mark, validate.

use flowplan_core::error::Result;
use flowplan_core::graph::OperatorGraph;

use crate::context::{PlanningContext, ReductionOutcome};
use crate::fixer::fix_operator_graph;
use crate::markers::insert_plan_markers;
use crate::normalize::{normalize, remove_dead_flow, simplify_terminators, validate_acyclic};
use crate::rules::RewriteContext;

/// What preparation did to the graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PreparationReport {
    pub optimization: ReductionOutcome,
    pub rebuilt_operators: usize,
    /// `None` when cyclic broadcast removal is disabled.
    pub broadcast_cycles: Option<ReductionOutcome>,
}

/// Prepares `graph` in place so that it can be cut into stages.
pub fn prepare_operator_graph(
    context: &PlanningContext,
    graph: &mut OperatorGraph,
) -> Result<PreparationReport> {
    normalize(graph)?;
    let optimization = optimize(context, graph)?;
    // fail before the passes that assume a DAG
    validate_acyclic(graph)?;
    let rebuilt_operators = fix_operator_graph(context, graph)?;
    let broadcast_cycles = insert_plan_markers(context, graph)?;
    simplify_terminators(graph)?;
    validate_acyclic(graph)?;
    tracing::debug!(
        operators = graph.len(),
        optimization_steps = optimization.steps,
        rebuilt_operators,
        "prepared operator graph"
    );
    Ok(PreparationReport {
        optimization,
        rebuilt_operators,
        broadcast_cycles,
    })
}

/// Applies the context's rewriter until the graph stops changing.
///
/// Dead flow is removed before every round. Stops with a warning once the
/// step limit is exceeded.
pub fn optimize(context: &PlanningContext, graph: &mut OperatorGraph) -> Result<ReductionOutcome> {
    let rewrite = RewriteContext {
        estimator: context.estimator(),
        options: context.options(),
    };
    let mut step = 0;
    loop {
        step += 1;
        remove_dead_flow(graph)?;
        if step > context.step_limit() {
            tracing::warn!(
                limit = context.step_limit(),
                "operator graph optimization did not converge"
            );
            return Ok(ReductionOutcome {
                steps: step - 1,
                converged: false,
            });
        }
        let before = graph.snapshot();
        context.rewriter().perform(&rewrite, graph)?;
        let after = graph.snapshot();
        tracing::trace!(step, snapshot = %after.fingerprint().short(), "optimization round");
        if before == after {
            return Ok(ReductionOutcome {
                steps: step - 1,
                converged: true,
            });
        }
    }
}
