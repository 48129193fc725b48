//! Stable names for stages (`v0`, `v1`, ...) and their ports (`i0`, `o0`, ...).

use std::collections::BTreeMap;

use flowplan_core::error::Result;
use flowplan_core::id::{PlanPortId, SerialNumber, SubPlanId};
use serde::{Deserialize, Serialize};

use crate::plan::{Plan, SubPlan, SubPlanPort};

pub const STAGE_PREFIX: &str = "v";
pub const INPUT_PREFIX: &str = "i";
pub const OUTPUT_PREFIX: &str = "o";

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct NameInfo {
    pub name: String,
}

impl NameInfo {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }
}

pub fn stage_name(stage: &SubPlan) -> Option<&str> {
    stage.attribute::<NameInfo>().map(|n| n.name.as_str())
}

pub fn port_name(port: &SubPlanPort) -> Option<&str> {
    port.attribute::<NameInfo>().map(|n| n.name.as_str())
}

fn stage_rank(stage: &SubPlan) -> Option<SerialNumber> {
    stage.operators().operators().map(|o| o.serial()).min()
}

/// Upstream stages first; ties go to the stage holding the oldest operator.
pub fn sort_elements(plan: &Plan) -> Result<Vec<SubPlanId>> {
    let ranks: BTreeMap<SubPlanId, Option<SerialNumber>> = plan
        .elements()
        .iter()
        .map(|s| (s.id(), stage_rank(s)))
        .collect();
    plan.dependency_graph()
        .topological_order_by(|id| ranks.get(&id).copied().flatten())
}

/// Ports ordered by their marker's serial number.
fn sort_ports(stage: &SubPlan, ports: &[SubPlanPort]) -> Vec<PlanPortId> {
    let mut keyed: Vec<(Option<SerialNumber>, PlanPortId)> = ports
        .iter()
        .map(|p| (stage.operators().get(p.marker()).map(|o| o.serial()), p.id()))
        .collect();
    keyed.sort();
    keyed.into_iter().map(|(_, id)| id).collect()
}

pub fn attach_names(plan: &mut Plan) -> Result<()> {
    let order = sort_elements(plan)?;
    for (index, id) in order.iter().enumerate() {
        if let Some(stage) = plan.element_mut(*id) {
            stage
                .attributes_mut()
                .insert(NameInfo::new(format!("{STAGE_PREFIX}{index}")));
        }
    }
    for stage in plan.elements_mut() {
        let inputs = sort_ports(stage, stage.inputs());
        let outputs = sort_ports(stage, stage.outputs());
        for (index, id) in inputs.into_iter().enumerate() {
            if let Some(port) = stage.input_mut(id) {
                port.attributes_mut()
                    .insert(NameInfo::new(format!("{INPUT_PREFIX}{index}")));
            }
        }
        for (index, id) in outputs.into_iter().enumerate() {
            if let Some(port) = stage.output_mut(id) {
                port.attributes_mut()
                    .insert(NameInfo::new(format!("{OUTPUT_PREFIX}{index}")));
            }
        }
    }
    Ok(())
}
