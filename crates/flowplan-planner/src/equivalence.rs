//! Structural equivalence of stage boundaries.
//!
//! The assembler only unifies two ports of a stage when their markers map to
//! equal [`EquivalenceKey`]s.

use std::fmt::Debug;

use flowplan_core::id::{OperatorId, SerialNumber};
use flowplan_core::operator::PlanMarker;
use flowplan_core::schema::DataType;

use crate::markers::EdgeInfo;
use crate::plan::SubPlan;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EquivalenceKey {
    /// Original serial number of the operator.
    Serial(SerialNumber),
    DataType(DataType),
    Edge(PlanMarker, EdgeInfo),
    /// The operator is not part of the stage.
    Missing(OperatorId),
}

pub trait OperatorEquivalence: Debug {
    /// Key of `operator`, a marker inside `owner`'s operator graph.
    fn extract(&self, owner: &SubPlan, operator: OperatorId) -> EquivalenceKey;
}

/// Operators are equivalent only to copies of themselves.
#[derive(Debug, Clone, Copy, Default)]
pub struct DefaultEquivalence;

impl OperatorEquivalence for DefaultEquivalence {
    fn extract(&self, owner: &SubPlan, operator: OperatorId) -> EquivalenceKey {
        match owner.operators().get(operator) {
            Some(op) => EquivalenceKey::Serial(op.serial()),
            None => EquivalenceKey::Missing(operator),
        }
    }
}

/// Checkpoints compare by data type; shuffles and broadcasts by the data
/// they carry.
#[derive(Debug, Clone, Copy, Default)]
pub struct CustomEquivalence;

impl OperatorEquivalence for CustomEquivalence {
    fn extract(&self, owner: &SubPlan, operator: OperatorId) -> EquivalenceKey {
        let Some(op) = owner.operators().get(operator) else {
            return EquivalenceKey::Missing(operator);
        };
        let is_input = owner.find_input(operator).is_some();
        let is_output = owner.find_output(operator).is_some();
        if !is_input && !is_output {
            return DefaultEquivalence.extract(owner, operator);
        }
        let edge = |marker| {
            op.attribute::<EdgeInfo>()
                .map(|info| EquivalenceKey::Edge(marker, info.clone()))
        };
        let key = match op.marker() {
            Some(PlanMarker::Checkpoint) => op
                .outputs()
                .first()
                .and_then(|p| owner.operators().get_port(*p))
                .map(|p| EquivalenceKey::DataType(p.data_type().clone())),
            Some(PlanMarker::Gather) if is_output => edge(PlanMarker::Gather),
            Some(PlanMarker::Broadcast) => edge(PlanMarker::Broadcast),
            _ => None,
        };
        key.unwrap_or_else(|| DefaultEquivalence.extract(owner, operator))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use flowplan_core::graph::OperatorGraph;
    use flowplan_core::operator::OperatorSpec;
    use flowplan_core::schema::Group;
    use std::collections::BTreeSet;

    use crate::plan::PlanDetail;

    fn gather(info: EdgeInfo) -> OperatorSpec {
        let ty = info.data_type().clone();
        OperatorSpec::marker(PlanMarker::Gather, ty).attribute(info)
    }

    #[test]
    fn gather_outputs_compare_by_edge_info() {
        let ty = DataType::named("Row");
        let plain = EdgeInfo::new(ty.clone(), Some(Group::by(["k"])), None);
        let aggregated = EdgeInfo::new(ty.clone(), Some(Group::by(["k"])), Some(SerialNumber::new(9)));

        let mut g = OperatorGraph::new();
        let begin = g.add(OperatorSpec::marker(PlanMarker::Begin, ty.clone()));
        let a = g.add(gather(plain.clone()));
        let b = g.add(gather(plain));
        let c = g.add(gather(aggregated));
        for m in [a, b, c] {
            g.connect(g.output(begin, 0).unwrap(), g.input(m, 0).unwrap()).unwrap();
        }
        let mut detail = PlanDetail::new();
        let members = BTreeSet::from([begin, a, b, c]);
        let stage = detail
            .add_stage(
                &g,
                &members,
                &BTreeSet::from([begin]),
                &BTreeSet::from([begin]),
                &BTreeSet::from([a, b, c]),
            )
            .unwrap();
        let stage = detail.plan().sub_plan(stage).unwrap();
        let keys: Vec<EquivalenceKey> = stage
            .outputs()
            .iter()
            .map(|p| CustomEquivalence.extract(stage, p.marker()))
            .collect();
        assert_eq!(keys[0], keys[1]);
        assert_ne!(keys[0], keys[2]);

        let defaults: Vec<EquivalenceKey> = stage
            .outputs()
            .iter()
            .map(|p| DefaultEquivalence.extract(stage, p.marker()))
            .collect();
        assert_ne!(defaults[0], defaults[1]);
    }
}
