//! Canonical shape of operator graphs: terminators, dead flow, circuits.
//!
//! After [`normalize`] every input port has a producer and every output port
//! a consumer. Ports that would otherwise dangle are attached to `BEGIN` and
//! `END` markers.

use std::collections::{BTreeSet, VecDeque};

use flowplan_core::error::{Diagnostic, Error, Result};
use flowplan_core::graph::OperatorGraph;
use flowplan_core::id::{OperatorId, PortId};
use flowplan_core::operator::{OperatorKind, OperatorSpec, PlanMarker};

/// Attaches terminators to unconnected ports.
pub fn normalize(graph: &mut OperatorGraph) -> Result<()> {
    ensure_terminators(graph)?;
    Ok(())
}

fn ensure_terminators(graph: &mut OperatorGraph) -> Result<usize> {
    let mut dangling_inputs: Vec<PortId> = Vec::new();
    let mut dangling_outputs: Vec<PortId> = Vec::new();
    for op in graph.operators() {
        if !op.is_marker_of(PlanMarker::Begin) {
            dangling_inputs.extend(op.inputs().iter().filter(|p| !graph.is_connected(**p)));
        }
        if !op.is_marker_of(PlanMarker::End) {
            dangling_outputs.extend(op.outputs().iter().filter(|p| !graph.is_connected(**p)));
        }
    }
    for port in &dangling_inputs {
        let data_type = graph.port(*port)?.data_type().clone();
        let begin = graph.add(OperatorSpec::marker(PlanMarker::Begin, data_type));
        graph.connect(graph.output(begin, 0)?, *port)?;
    }
    for port in &dangling_outputs {
        let data_type = graph.port(*port)?.data_type().clone();
        let end = graph.add(OperatorSpec::marker(PlanMarker::End, data_type));
        graph.connect(*port, graph.input(end, 0)?)?;
    }
    Ok(dangling_inputs.len() + dangling_outputs.len())
}

/// Removes operators that cannot reach any external output.
///
/// Terminators next to live operators survive; ports of live operators
/// that lose their opposites get fresh terminators. Returns the number of
/// removed operators.
pub fn remove_dead_flow(graph: &mut OperatorGraph) -> Result<usize> {
    let mut live: BTreeSet<OperatorId> = BTreeSet::new();
    let mut queue: VecDeque<OperatorId> = graph
        .operators()
        .filter(|op| matches!(op.kind(), OperatorKind::Output(_)))
        .map(|op| op.id())
        .collect();
    while let Some(id) = queue.pop_front() {
        if live.insert(id) {
            queue.extend(graph.predecessors(id));
        }
    }
    let terminators: Vec<OperatorId> = graph
        .operators()
        .filter(|op| !live.contains(&op.id()))
        .filter(|op| match op.marker() {
            Some(PlanMarker::Begin) => graph.successors(op.id()).iter().any(|s| live.contains(s)),
            Some(PlanMarker::End) => graph.predecessors(op.id()).iter().any(|p| live.contains(p)),
            _ => false,
        })
        .map(|op| op.id())
        .collect();
    live.extend(terminators);

    let dead: Vec<OperatorId> = graph
        .operator_ids()
        .into_iter()
        .filter(|id| !live.contains(id))
        .collect();
    for id in &dead {
        graph.remove(*id)?;
    }
    if !dead.is_empty() {
        tracing::debug!(removed = dead.len(), "removed dead flow");
        ensure_terminators(graph)?;
    }
    Ok(dead.len())
}

/// Drops terminators that are redundant: `END` on outputs with other
/// consumers, `BEGIN` on inputs with other producers, and orphans.
pub fn simplify_terminators(graph: &mut OperatorGraph) -> Result<usize> {
    let mut removed = 0;
    for id in graph.operator_ids() {
        let Some(op) = graph.get(id) else { continue };
        let Some(marker) = op.marker() else { continue };
        let port = match marker {
            PlanMarker::Begin => op.outputs().first().copied(),
            PlanMarker::End => op.inputs().first().copied(),
            _ => continue,
        };
        let Some(port) = port else { continue };
        let attached: Vec<PortId> = graph.opposites(port);
        let mut kept = false;
        for opposite in attached {
            let others = graph
                .opposites(opposite)
                .into_iter()
                .filter(|p| *p != port)
                .filter(|p| {
                    graph
                        .owner(*p)
                        .map(|o| !o.is_marker_of(marker))
                        .unwrap_or(false)
                })
                .count();
            // keep exactly one terminator per port that has no real opposite
            let duplicate_terminator = graph.opposites(opposite).into_iter().any(|p| {
                p != port
                    && p < port
                    && graph
                        .owner(p)
                        .map(|o| o.is_marker_of(marker))
                        .unwrap_or(false)
            });
            if others > 0 || duplicate_terminator {
                match marker {
                    PlanMarker::Begin => graph.disconnect(port, opposite),
                    _ => graph.disconnect(opposite, port),
                };
            } else {
                kept = true;
            }
        }
        if !kept {
            graph.remove(id)?;
            removed += 1;
        }
    }
    if removed > 0 {
        tracing::debug!(removed, "simplified terminators");
    }
    Ok(removed)
}

/// Fails when the operator graph contains circuits, one diagnostic each.
pub fn validate_acyclic(graph: &OperatorGraph) -> Result<()> {
    let circuits = graph.dependency_graph().find_circuits();
    if circuits.is_empty() {
        return Ok(());
    }
    let diagnostics = circuits
        .iter()
        .map(|circuit| {
            let labels: Vec<String> = circuit
                .iter()
                .filter_map(|id| graph.get(*id))
                .map(|op| op.label())
                .collect();
            Diagnostic::error(format!(
                "operator graph must be acyclic: [{}]",
                labels.join(", ")
            ))
        })
        .collect();
    Err(Error::Diagnostics(diagnostics))
}

/// Finds a `BROADCAST` marker whose consumers reach one of its producers
/// without crossing another marker. Cutting such a graph at markers would
/// put producer and consumer in one stage that also waits on the broadcast.
pub fn find_potentially_cyclic_broadcast(graph: &OperatorGraph) -> Option<OperatorId> {
    graph
        .operators()
        .filter(|op| op.is_marker_of(PlanMarker::Broadcast))
        .find(|broadcast| {
            let producers: BTreeSet<OperatorId> = graph
                .predecessors(broadcast.id())
                .into_iter()
                .filter(|p| graph.get(*p).map(|o| !o.is_marker()).unwrap_or(false))
                .collect();
            if producers.is_empty() {
                return false;
            }
            graph
                .successors(broadcast.id())
                .into_iter()
                .filter(|s| graph.get(*s).map(|o| !o.is_marker()).unwrap_or(false))
                .any(|consumer| {
                    let ancestors = graph.ancestors_where(consumer, |o| !o.is_marker());
                    !ancestors.is_disjoint(&producers)
                })
        })
        .map(|op| op.id())
}

#[cfg(test)]
mod tests {
    use super::*;
    use flowplan_core::operator::UserOperatorKind;
    use flowplan_core::schema::DataType;

    fn ty() -> DataType {
        DataType::named("Row")
    }

    #[test]
    fn dangling_ports_get_terminators() {
        let mut g = OperatorGraph::new();
        let op = g.add(
            OperatorSpec::user("x", UserOperatorKind::Extract)
                .input("in", ty())
                .output("out", ty()),
        );
        normalize(&mut g).unwrap();
        assert_eq!(g.len(), 3);
        let pred = g.predecessors(op).into_iter().next().unwrap();
        let succ = g.successors(op).into_iter().next().unwrap();
        assert!(g.operator(pred).unwrap().is_marker_of(PlanMarker::Begin));
        assert!(g.operator(succ).unwrap().is_marker_of(PlanMarker::End));
        // already normalized
        normalize(&mut g).unwrap();
        assert_eq!(g.len(), 3);
    }

    #[test]
    fn unreachable_operators_are_dead() {
        let mut g = OperatorGraph::new();
        let input = g.add(OperatorSpec::external_input("in", ty()));
        let used = g.add(
            OperatorSpec::user("used", UserOperatorKind::Extract)
                .input("in", ty())
                .output("out", ty()),
        );
        let unused = g.add(OperatorSpec::user("unused", UserOperatorKind::Extract).input("in", ty()));
        let output = g.add(OperatorSpec::external_output("out", ty()));
        g.connect(g.output(input, 0).unwrap(), g.input(used, 0).unwrap()).unwrap();
        g.connect(g.output(input, 0).unwrap(), g.input(unused, 0).unwrap()).unwrap();
        g.connect(g.output(used, 0).unwrap(), g.input(output, 0).unwrap()).unwrap();
        normalize(&mut g).unwrap();

        let removed = remove_dead_flow(&mut g).unwrap();
        assert_eq!(removed, 1);
        assert!(!g.contains(unused));
        assert!(g.contains(used));
        // activation ports stay terminated
        assert_eq!(
            g.operators().filter(|o| o.is_marker()).count(),
            2,
            "BEGIN for the input activation, END for the output activation"
        );
    }

    #[test]
    fn redundant_end_is_dropped() {
        let mut g = OperatorGraph::new();
        let a = g.add(OperatorSpec::user("a", UserOperatorKind::Extract).output("out", ty()));
        normalize(&mut g).unwrap();
        let b = g.add(OperatorSpec::user("b", UserOperatorKind::Extract).input("in", ty()));
        g.connect(g.output(a, 0).unwrap(), g.input(b, 0).unwrap()).unwrap();
        assert_eq!(simplify_terminators(&mut g).unwrap(), 1);
        assert_eq!(g.successors(a).into_iter().collect::<Vec<_>>(), vec![b]);
    }

    #[test]
    fn circuits_become_diagnostics() {
        let mut g = OperatorGraph::new();
        let a = g.add(
            OperatorSpec::user("a", UserOperatorKind::Extract)
                .input("in", ty())
                .output("out", ty()),
        );
        let b = g.add(
            OperatorSpec::user("b", UserOperatorKind::Extract)
                .input("in", ty())
                .output("out", ty()),
        );
        g.connect(g.output(a, 0).unwrap(), g.input(b, 0).unwrap()).unwrap();
        g.connect(g.output(b, 0).unwrap(), g.input(a, 0).unwrap()).unwrap();
        let err = validate_acyclic(&g).unwrap_err();
        assert_eq!(err.diagnostics().len(), 1);
        assert!(err.to_string().contains("acyclic"));
    }
}
