//! Data volume of stage ports and the partition size class of shuffles.

use std::collections::{BTreeMap, BTreeSet};

use flowplan_core::config::{DataSize, SizeLimits};
use flowplan_core::graph::OperatorGraph;
use flowplan_core::id::PlanPortId;
use serde::{Deserialize, Serialize};

use super::core::{InputType, OutputType, SubPlanInfo, SubPlanInputInfo, SubPlanOutputInfo};
use super::naming::stage_name;
use crate::cost::{Estimates, OperatorEstimator};
use crate::plan::{Plan, PortRef, SubPlanPort};

/// Estimated bytes crossing a port; `None` when unknown.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SizeInfo {
    pub bytes: Option<f64>,
}

/// Estimates port sizes from the prepared operator graph.
#[derive(Debug)]
pub struct PlanEstimator<'a> {
    graph: &'a OperatorGraph,
    estimates: Estimates,
}

impl<'a> PlanEstimator<'a> {
    pub fn new(estimator: &dyn OperatorEstimator, graph: &'a OperatorGraph) -> Self {
        Self {
            graph,
            estimates: estimator.estimate(graph),
        }
    }

    /// Sum over the port's origin markers.
    pub fn estimate(&self, port: &SubPlanPort) -> SizeInfo {
        let bytes = port
            .origins()
            .iter()
            .map(|marker| {
                self.graph
                    .output(*marker, 0)
                    .ok()
                    .and_then(|p| self.estimates.output_size(p))
            })
            .sum();
        SizeInfo { bytes }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PartitionGroupInfo {
    pub data_size: DataSize,
}

/// Assigns one size class to every set of shuffle ports that must agree on
/// their partition count: co-grouped inputs of a stage, and an output
/// together with the inputs it feeds.
#[derive(Debug)]
pub struct PartitionGroupAnalyzer<'a> {
    limits: &'a SizeLimits,
    explicit: &'a BTreeMap<String, DataSize>,
}

impl<'a> PartitionGroupAnalyzer<'a> {
    pub fn new(limits: &'a SizeLimits, explicit: &'a BTreeMap<String, DataSize>) -> Self {
        Self { limits, explicit }
    }

    fn explicit_size(&self, plan: &Plan, port: PortRef) -> Option<DataSize> {
        let stage = plan.element(port.sub_plan)?;
        let label = stage.attribute::<SubPlanInfo>().map(|i| i.label.as_str());
        [label, stage_name(stage)]
            .into_iter()
            .flatten()
            .find_map(|key| self.explicit.get(key).copied())
    }

    pub fn analyze(&self, plan: &Plan) -> BTreeMap<PlanPortId, PartitionGroupInfo> {
        let mut members: Vec<PortRef> = Vec::new();
        let mut parent: BTreeMap<PlanPortId, PlanPortId> = BTreeMap::new();
        for stage in plan.elements() {
            let mut cogroup: Option<PlanPortId> = None;
            for port in stage.inputs() {
                let partitioned = port
                    .attribute::<SubPlanInputInfo>()
                    .map(|i| i.input_type == InputType::Partitioned)
                    .unwrap_or(false);
                if !partitioned {
                    continue;
                }
                members.push(PortRef {
                    sub_plan: stage.id(),
                    port: port.id(),
                });
                parent.insert(port.id(), port.id());
                match cogroup {
                    Some(first) => union(&mut parent, first, port.id()),
                    None => cogroup = Some(port.id()),
                }
            }
        }
        for stage in plan.elements() {
            for port in stage.outputs() {
                let partitioned = port
                    .attribute::<SubPlanOutputInfo>()
                    .map(|i| matches!(i.output_type, OutputType::Partitioned | OutputType::Aggregated))
                    .unwrap_or(false);
                if !partitioned {
                    continue;
                }
                let at = PortRef {
                    sub_plan: stage.id(),
                    port: port.id(),
                };
                members.push(at);
                parent.insert(port.id(), port.id());
                for opposite in plan.output_opposites(at) {
                    if parent.contains_key(&opposite.port) {
                        union(&mut parent, port.id(), opposite.port);
                    }
                }
            }
        }

        let mut groups: BTreeMap<PlanPortId, Vec<PortRef>> = BTreeMap::new();
        for at in members {
            let root = find(&mut parent, at.port);
            groups.entry(root).or_default().push(at);
        }

        let mut results = BTreeMap::new();
        for ports in groups.values() {
            let explicit = ports
                .iter()
                .filter_map(|p| self.explicit_size(plan, *p))
                .max();
            let bytes = ports
                .iter()
                .filter_map(|p| port_size(plan, *p))
                .fold(None, |acc: Option<f64>, b| Some(acc.map_or(b, |a| a.max(b))));
            let data_size = explicit
                .or_else(|| bytes.map(|b| self.limits.classify(b)))
                .unwrap_or(DataSize::Regular);
            let ids: BTreeSet<PlanPortId> = ports.iter().map(|p| p.port).collect();
            tracing::trace!(ports = ids.len(), size = data_size.symbol(), "partition group");
            for id in ids {
                results.insert(id, PartitionGroupInfo { data_size });
            }
        }
        results
    }
}

fn port_size(plan: &Plan, at: PortRef) -> Option<f64> {
    plan.input_port(at)
        .or_else(|| plan.output_port(at))
        .and_then(|p| p.attribute::<SizeInfo>())
        .and_then(|s| s.bytes)
}

fn find(parent: &mut BTreeMap<PlanPortId, PlanPortId>, id: PlanPortId) -> PlanPortId {
    let mut root = id;
    while let Some(next) = parent.get(&root).copied() {
        if next == root {
            break;
        }
        root = next;
    }
    parent.insert(id, root);
    root
}

fn union(parent: &mut BTreeMap<PlanPortId, PlanPortId>, a: PlanPortId, b: PlanPortId) {
    let (ra, rb) = (find(parent, a), find(parent, b));
    if ra != rb {
        parent.insert(ra.max(rb), ra.min(rb));
    }
}
