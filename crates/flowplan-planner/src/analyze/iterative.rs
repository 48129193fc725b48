//! Detection of loop-carried (iterative) computation.
//!
//! Operators may declare an [`IterativeInfo`]; stages inherit the merge of
//! their operators' declarations and everything upstream of them.

use std::collections::{BTreeMap, BTreeSet};

use flowplan_core::error::Result;
use flowplan_core::id::SubPlanId;
use serde::{Deserialize, Serialize};

use super::naming::sort_elements;
use crate::plan::{Plan, PortRef};

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IterativeInfo {
    #[default]
    Never,
    /// Re-runs whenever one of these batch parameters changes.
    Parameters(BTreeSet<String>),
    Always,
}

impl IterativeInfo {
    pub fn parameters<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        IterativeInfo::Parameters(names.into_iter().map(Into::into).collect())
    }

    pub fn is_iterative(&self) -> bool {
        !matches!(self, IterativeInfo::Never)
    }

    pub fn merge(&self, other: &IterativeInfo) -> IterativeInfo {
        match (self, other) {
            (IterativeInfo::Always, _) | (_, IterativeInfo::Always) => IterativeInfo::Always,
            (IterativeInfo::Never, x) | (x, IterativeInfo::Never) => x.clone(),
            (IterativeInfo::Parameters(a), IterativeInfo::Parameters(b)) => {
                IterativeInfo::Parameters(a.union(b).cloned().collect())
            }
        }
    }
}

/// Attaches `IterativeInfo` to the plan, every stage and every port.
pub fn attach_iterative_info(plan: &mut Plan) -> Result<()> {
    let order = sort_elements(plan)?;
    let mut stage_infos: BTreeMap<SubPlanId, IterativeInfo> = BTreeMap::new();
    let mut input_infos: BTreeMap<PortRef, IterativeInfo> = BTreeMap::new();
    for id in &order {
        let stage = plan.sub_plan(*id)?;
        let mut info = stage
            .operators()
            .operators()
            .filter_map(|op| op.attribute::<IterativeInfo>())
            .fold(IterativeInfo::Never, |acc, i| acc.merge(i));
        for port in stage.inputs() {
            let at = PortRef {
                sub_plan: *id,
                port: port.id(),
            };
            let upstream = plan
                .input_opposites(at)
                .iter()
                .filter_map(|up| stage_infos.get(&up.sub_plan))
                .fold(IterativeInfo::Never, |acc, i| acc.merge(i));
            info = info.merge(&upstream);
            input_infos.insert(at, upstream);
        }
        stage_infos.insert(*id, info);
    }

    let mut whole = IterativeInfo::Never;
    for stage in plan.elements_mut() {
        let info = stage_infos.get(&stage.id()).cloned().unwrap_or_default();
        whole = whole.merge(&info);
        let id = stage.id();
        for port in stage.inputs_mut() {
            let at = PortRef {
                sub_plan: id,
                port: port.id(),
            };
            let port_info = input_infos.get(&at).cloned().unwrap_or_default();
            port.attributes_mut().insert(port_info);
        }
        for port in stage.outputs_mut() {
            port.attributes_mut().insert(info.clone());
        }
        stage.attributes_mut().insert(info);
    }
    plan.attributes_mut().insert(whole);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn merge_takes_the_strongest() {
        let never = IterativeInfo::Never;
        let a = IterativeInfo::parameters(["date"]);
        let b = IterativeInfo::parameters(["region"]);
        assert_eq!(never.merge(&a), a);
        assert_eq!(a.merge(&b), IterativeInfo::parameters(["date", "region"]));
        assert_eq!(a.merge(&IterativeInfo::Always), IterativeInfo::Always);
        assert!(!never.is_iterative());
    }
}
