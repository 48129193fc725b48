//! Stage-boundary marker insertion.
//!
//! Markers are the only points where the graph may later be cut into
//! stages. Insertion is idempotent: a port already bounded by an equivalent
//! marker is left alone.

use std::collections::BTreeSet;

use flowplan_core::config::PlanningOption;
use flowplan_core::error::{Error, Result};
use flowplan_core::graph::OperatorGraph;
use flowplan_core::id::{OperatorId, PortId, SerialNumber};
use flowplan_core::operator::{CoreOperatorKind, OperatorKind, OperatorSpec, PlanMarker};
use flowplan_core::schema::{DataType, Group};
use serde::{Deserialize, Serialize};

use crate::classify::{characterize, InputAttribute, InputType};
use crate::context::{PlanningContext, ReductionOutcome};
use crate::normalize::find_potentially_cyclic_broadcast;

/// Identity of the data crossing a `GATHER` or `BROADCAST` boundary.
///
/// Two boundaries carry the same data iff type, grouping and aggregating
/// operator agree.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct EdgeInfo {
    data_type: DataType,
    group: Option<Group>,
    aggregation: Option<SerialNumber>,
}

impl EdgeInfo {
    pub fn new(data_type: DataType, group: Option<Group>, aggregation: Option<SerialNumber>) -> Self {
        Self {
            data_type,
            group,
            aggregation,
        }
    }

    pub fn data_type(&self) -> &DataType {
        &self.data_type
    }

    pub fn group(&self) -> Option<&Group> {
        self.group.as_ref()
    }

    /// Serial of the operator whose partial aggregation runs before the exchange.
    pub fn aggregation(&self) -> Option<SerialNumber> {
        self.aggregation
    }
}

/// Inserts every boundary marker the graph needs, then breaks cyclic
/// broadcasts when enabled.
pub fn insert_plan_markers(
    context: &PlanningContext,
    graph: &mut OperatorGraph,
) -> Result<Option<ReductionOutcome>> {
    rewrite_checkpoint_operators(graph)?;

    let classes = characterize(graph, context.estimator(), context.classifier());
    for class in classes.values() {
        let serial = graph.operator(class.operator())?.serial();
        if class.primary_input_type() == InputType::Group {
            for port in class.primary_inputs() {
                let aggregation = class
                    .has_attribute(*port, InputAttribute::PartialReduction)
                    .then_some(serial);
                let info = edge_info(graph, *port, aggregation)?;
                insert_exchange(graph, *port, PlanMarker::Gather, info)?;
            }
        }
        for port in class.secondary_inputs() {
            let info = edge_info(graph, *port, None)?;
            insert_exchange(graph, *port, PlanMarker::Broadcast, info)?;
        }
    }

    if context.is_enabled(PlanningOption::CheckpointAfterExternalInputs) {
        for id in external_operators(graph, true) {
            for port in graph.operator(id)?.outputs().to_vec() {
                checkpoint_after(graph, port)?;
            }
        }
    }
    if context.is_enabled(PlanningOption::CheckpointBeforeExternalOutputs) {
        for id in external_operators(graph, false) {
            for port in graph.operator(id)?.inputs().to_vec() {
                checkpoint_before(graph, port)?;
            }
        }
    }

    if context.is_enabled(PlanningOption::RemoveCyclicBroadcasts) {
        return remove_cyclic_broadcasts(context, graph).map(Some);
    }
    Ok(None)
}

fn external_operators(graph: &OperatorGraph, inputs: bool) -> Vec<OperatorId> {
    graph
        .operators()
        .filter(|op| match op.kind() {
            OperatorKind::Input(_) => inputs,
            OperatorKind::Output(_) => !inputs,
            _ => false,
        })
        .map(|op| op.id())
        .collect()
}

fn edge_info(
    graph: &OperatorGraph,
    port: PortId,
    aggregation: Option<SerialNumber>,
) -> Result<EdgeInfo> {
    let port = graph.port(port)?;
    Ok(EdgeInfo::new(
        port.data_type().clone(),
        port.group().cloned(),
        aggregation,
    ))
}

/// Replaces core checkpoint operators with `CHECKPOINT` markers.
fn rewrite_checkpoint_operators(graph: &mut OperatorGraph) -> Result<()> {
    let targets: Vec<OperatorId> = graph
        .operators()
        .filter(|op| op.is_core(CoreOperatorKind::Checkpoint))
        .map(|op| op.id())
        .collect();
    for id in targets {
        let input = graph.input(id, 0)?;
        let data_type = graph.port(input)?.data_type().clone();
        graph.insert_before(input, OperatorSpec::marker(PlanMarker::Checkpoint, data_type))?;
        graph.bypass(id)?;
    }
    Ok(())
}

fn insert_exchange(
    graph: &mut OperatorGraph,
    port: PortId,
    marker: PlanMarker,
    info: EdgeInfo,
) -> Result<Option<OperatorId>> {
    let ups = graph.opposite_operators(port);
    let bounded = !ups.is_empty()
        && ups.iter().all(|u| match graph.get(*u) {
            Some(op) if op.is_marker_of(PlanMarker::Begin) => true,
            Some(op) if op.is_marker_of(marker) => op.attribute::<EdgeInfo>() == Some(&info),
            _ => false,
        });
    if bounded {
        return Ok(None);
    }
    let data_type = info.data_type().clone();
    let id = graph.insert_before(port, OperatorSpec::marker(marker, data_type).attribute(info))?;
    Ok(Some(id))
}

fn all_opposites_are(graph: &OperatorGraph, port: PortId, marker: PlanMarker) -> bool {
    let opposites = graph.opposite_operators(port);
    !opposites.is_empty()
        && opposites
            .iter()
            .all(|o| graph.get(*o).map(|op| op.is_marker_of(marker)).unwrap_or(false))
}

fn checkpoint_after(graph: &mut OperatorGraph, port: PortId) -> Result<()> {
    if all_opposites_are(graph, port, PlanMarker::Checkpoint) {
        return Ok(());
    }
    let data_type = graph.port(port)?.data_type().clone();
    graph.insert_after(port, OperatorSpec::marker(PlanMarker::Checkpoint, data_type))?;
    Ok(())
}

fn checkpoint_before(graph: &mut OperatorGraph, port: PortId) -> Result<()> {
    if all_opposites_are(graph, port, PlanMarker::Checkpoint) {
        return Ok(());
    }
    let data_type = graph.port(port)?.data_type().clone();
    graph.insert_before(port, OperatorSpec::marker(PlanMarker::Checkpoint, data_type))?;
    Ok(())
}

/// Inserts `CHECKPOINT` markers until no broadcast is potentially cyclic.
///
/// Each round picks one cyclic broadcast and checkpoints every input of its
/// consumers that is not already fed by a marker. Stops with a warning after
/// the step limit.
pub fn remove_cyclic_broadcasts(
    context: &PlanningContext,
    graph: &mut OperatorGraph,
) -> Result<ReductionOutcome> {
    let mut step = 0;
    loop {
        let Some(broadcast) = find_potentially_cyclic_broadcast(graph) else {
            return Ok(ReductionOutcome {
                steps: step,
                converged: true,
            });
        };
        if step >= context.step_limit() {
            tracing::warn!(
                limit = context.step_limit(),
                "cyclic broadcast removal reached its step limit"
            );
            return Ok(ReductionOutcome {
                steps: step,
                converged: false,
            });
        }
        step += 1;

        let mut targets: BTreeSet<PortId> = BTreeSet::new();
        for consumer in graph.successors(broadcast) {
            for port in graph.operator(consumer)?.inputs() {
                let fed_by_marker = graph
                    .opposite_operators(*port)
                    .iter()
                    .any(|u| graph.get(*u).map(|o| o.is_marker()).unwrap_or(false));
                if !fed_by_marker {
                    targets.insert(*port);
                }
            }
        }
        if targets.is_empty() {
            return Err(Error::Invariant(format!(
                "cyclic broadcast {} has no input to checkpoint",
                graph.operator(broadcast)?.label()
            )));
        }
        tracing::debug!(
            broadcast = %broadcast,
            targets = targets.len(),
            "breaking cyclic broadcast"
        );
        for port in targets {
            let data_type = graph.port(port)?.data_type().clone();
            graph.insert_before(port, OperatorSpec::marker(PlanMarker::Checkpoint, data_type))?;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use flowplan_core::operator::UserOperatorKind;

    #[test]
    fn edge_info_equality_ignores_operator_identity() {
        let ty = DataType::named("Row");
        let a = EdgeInfo::new(ty.clone(), Some(Group::by(["k"])), Some(SerialNumber::new(3)));
        let b = EdgeInfo::new(ty.clone(), Some(Group::by(["k"])), Some(SerialNumber::new(3)));
        let c = EdgeInfo::new(ty, Some(Group::by(["k"])), None);
        assert_eq!(a, b);
        assert_ne!(a, c);
    }

    #[test]
    fn core_checkpoint_becomes_marker() {
        let ty = DataType::named("Row");
        let mut g = OperatorGraph::new();
        let a = g.add(OperatorSpec::user("a", UserOperatorKind::Extract).output("out", ty.clone()));
        let c = g.add(OperatorSpec::core(CoreOperatorKind::Checkpoint, ty.clone()));
        let b = g.add(OperatorSpec::user("b", UserOperatorKind::Extract).input("in", ty));
        g.connect(g.output(a, 0).unwrap(), g.input(c, 0).unwrap()).unwrap();
        g.connect(g.output(c, 0).unwrap(), g.input(b, 0).unwrap()).unwrap();
        rewrite_checkpoint_operators(&mut g).unwrap();
        assert!(!g.contains(c));
        let marker = g.predecessors(b).into_iter().next().unwrap();
        assert!(g.operator(marker).unwrap().is_marker_of(PlanMarker::Checkpoint));
        assert_eq!(g.predecessors(marker).into_iter().collect::<Vec<_>>(), vec![a]);
    }
}
