//! Aligns declared input units with how operators actually consume inputs.

use flowplan_core::error::Result;
use flowplan_core::graph::OperatorGraph;
use flowplan_core::id::{OperatorId, PortId};
use flowplan_core::operator::InputUnit;

use crate::classify::{characterize, InputType, OperatorClass};
use crate::context::PlanningContext;

/// Rebuilds every user operator whose input units disagree with its
/// classification. Serial numbers and edges are preserved; operator ids
/// change. Returns the number of rebuilt operators.
pub fn fix_operator_graph(context: &PlanningContext, graph: &mut OperatorGraph) -> Result<usize> {
    let classes = characterize(graph, context.estimator(), context.classifier());
    let mut targets: Vec<&OperatorClass> = classes
        .values()
        .filter(|c| graph.get(c.operator()).map(|o| o.as_user().is_some()).unwrap_or(false))
        .collect();
    targets.sort_by_key(|c| graph.get(c.operator()).map(|o| o.serial()));

    let mut rebuilt = 0;
    for class in targets {
        let op = graph.operator(class.operator())?;
        let mut units: Vec<Option<InputUnit>> = Vec::with_capacity(op.inputs().len());
        let mut changed = false;
        for port in op.inputs() {
            let current = graph.port(*port)?.unit();
            let required = required_unit(class, *port, current);
            changed |= required != current;
            units.push(required);
        }
        if !changed {
            continue;
        }
        let old: OperatorId = op.id();
        let new = graph.rebuild(old, |spec| {
            for (port, unit) in spec.inputs.iter_mut().zip(units) {
                port.unit = unit;
            }
        })?;
        tracing::debug!(old = %old, new = %new, "rebuilt operator with fixed input units");
        rebuilt += 1;
    }
    Ok(rebuilt)
}

fn required_unit(class: &OperatorClass, port: PortId, current: Option<InputUnit>) -> Option<InputUnit> {
    if class.is_secondary(port) {
        return Some(InputUnit::Whole);
    }
    match class.primary_input_type() {
        InputType::Record => Some(InputUnit::Record),
        InputType::Group => Some(InputUnit::Group),
        InputType::Nothing => current,
    }
}
