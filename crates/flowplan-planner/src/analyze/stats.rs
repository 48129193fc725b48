//! Shape statistics of the plan and its stages.

use flowplan_core::depgraph::GraphStatistics;
use serde::{Deserialize, Serialize};

use crate::plan::Plan;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlanStatistics {
    pub stages: usize,
    pub operators: usize,
    pub inputs: usize,
    pub outputs: usize,
    /// Output to input connections between stages.
    pub connections: usize,
    pub max_stage_operators: usize,
}

impl PlanStatistics {
    pub fn of(plan: &Plan) -> Self {
        let sizes: Vec<usize> = plan.elements().iter().map(|s| s.operators().len()).collect();
        Self {
            stages: plan.len(),
            operators: sizes.iter().sum(),
            inputs: plan.elements().iter().map(|s| s.inputs().len()).sum(),
            outputs: plan.elements().iter().map(|s| s.outputs().len()).sum(),
            connections: plan.connections().len(),
            max_stage_operators: sizes.into_iter().max().unwrap_or(0),
        }
    }
}

/// `GraphStatistics` of the stage graph on the plan, and of each stage's
/// operator graph on the stage.
pub fn attach_graph_statistics(plan: &mut Plan) {
    let whole: GraphStatistics = plan.dependency_graph().statistics();
    for stage in plan.elements_mut() {
        let stats = stage.operators().dependency_graph().statistics();
        stage.attributes_mut().insert(stats);
    }
    plan.attributes_mut().insert(whole);
}

pub fn attach_plan_statistics(plan: &mut Plan) {
    let stats = PlanStatistics::of(plan);
    plan.attributes_mut().insert(stats);
}
