//! Operator characteristics: how each operator consumes its inputs.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt::Debug;

use flowplan_core::graph::OperatorGraph;
use flowplan_core::id::{OperatorId, PortId};
use flowplan_core::operator::{InputUnit, Operator, OperatorKind};
use serde::{Deserialize, Serialize};

use crate::cost::{Estimates, OperatorEstimator};

/// Shape of an operator's primary inputs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum InputType {
    /// Record at a time; no exchange needed.
    Record,
    /// Groups of records sharing a key; needs a shuffle.
    Group,
    /// No data input at all.
    Nothing,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum InputAttribute {
    /// The consumer tolerates records reduced before the shuffle.
    PartialReduction,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OperatorClass {
    operator: OperatorId,
    primary_input_type: InputType,
    primary_inputs: Vec<PortId>,
    secondary_inputs: BTreeSet<PortId>,
    attributes: BTreeMap<PortId, BTreeSet<InputAttribute>>,
}

impl OperatorClass {
    pub fn new(operator: OperatorId, primary_input_type: InputType) -> Self {
        Self {
            operator,
            primary_input_type,
            primary_inputs: Vec::new(),
            secondary_inputs: BTreeSet::new(),
            attributes: BTreeMap::new(),
        }
    }

    pub fn operator(&self) -> OperatorId {
        self.operator
    }

    pub fn primary_input_type(&self) -> InputType {
        self.primary_input_type
    }

    pub fn primary_inputs(&self) -> &[PortId] {
        &self.primary_inputs
    }

    /// Inputs consumed as a whole, delivered by broadcast.
    pub fn secondary_inputs(&self) -> &BTreeSet<PortId> {
        &self.secondary_inputs
    }

    pub fn is_primary(&self, port: PortId) -> bool {
        self.primary_inputs.contains(&port)
    }

    pub fn is_secondary(&self, port: PortId) -> bool {
        self.secondary_inputs.contains(&port)
    }

    pub fn has_attribute(&self, port: PortId, attribute: InputAttribute) -> bool {
        self.attributes
            .get(&port)
            .map(|a| a.contains(&attribute))
            .unwrap_or(false)
    }

    pub fn with_primary(mut self, port: PortId) -> Self {
        self.primary_inputs.push(port);
        self
    }

    pub fn with_secondary(mut self, port: PortId) -> Self {
        self.secondary_inputs.insert(port);
        self
    }

    pub fn with_attribute(mut self, port: PortId, attribute: InputAttribute) -> Self {
        self.attributes.entry(port).or_default().insert(attribute);
        self
    }
}

pub trait OperatorClassifier: Debug {
    /// Classifies one operator. `None` for operators without characteristics
    /// (markers).
    fn classify(
        &self,
        graph: &OperatorGraph,
        estimates: &Estimates,
        op: &Operator,
    ) -> Option<OperatorClass>;
}

#[derive(Debug, Clone, Default)]
pub struct BasicClassifier {
    /// Master inputs at or below this estimated size are broadcast.
    broadcast_limit: Option<f64>,
}

impl BasicClassifier {
    pub fn new(broadcast_limit: Option<f64>) -> Self {
        Self { broadcast_limit }
    }

    fn broadcastable(&self, graph: &OperatorGraph, estimates: &Estimates, port: PortId) -> bool {
        match (self.broadcast_limit, estimates.input_size(graph, port)) {
            (Some(limit), Some(size)) => size <= limit,
            _ => false,
        }
    }
}

impl OperatorClassifier for BasicClassifier {
    fn classify(
        &self,
        graph: &OperatorGraph,
        estimates: &Estimates,
        op: &Operator,
    ) -> Option<OperatorClass> {
        let declared_whole =
            |p: &PortId| graph.get_port(*p).and_then(|p| p.unit()) == Some(InputUnit::Whole);
        let mut secondary: BTreeSet<PortId> =
            op.inputs().iter().copied().filter(declared_whole).collect();

        let input_type = match op.kind() {
            OperatorKind::Marker(_) => return None,
            OperatorKind::Input(_) | OperatorKind::Output(_) | OperatorKind::Core(_) => {
                InputType::Record
            }
            OperatorKind::User(user) if user.kind.is_master_join() => {
                match op.inputs().first() {
                    Some(master) if self.broadcastable(graph, estimates, *master) => {
                        secondary.insert(*master);
                        InputType::Record
                    }
                    Some(master) if secondary.contains(master) => InputType::Record,
                    _ => InputType::Group,
                }
            }
            OperatorKind::User(user) if user.kind.is_group_wise() => InputType::Group,
            OperatorKind::User(_) => InputType::Record,
        };
        let input_type = if op.inputs().is_empty() {
            InputType::Nothing
        } else {
            input_type
        };

        let partial = op
            .as_user()
            .map(|u| u.partial_aggregation && u.kind.supports_partial_reduction())
            .unwrap_or(false);
        let mut class = OperatorClass::new(op.id(), input_type);
        for port in op.inputs() {
            if secondary.contains(port) {
                class = class.with_secondary(*port);
            } else {
                class = class.with_primary(*port);
                if partial {
                    class = class.with_attribute(*port, InputAttribute::PartialReduction);
                }
            }
        }
        Some(class)
    }
}

/// Classifies every operator of the graph, keyed by operator id.
pub fn characterize(
    graph: &OperatorGraph,
    estimator: &dyn OperatorEstimator,
    classifier: &dyn OperatorClassifier,
) -> BTreeMap<OperatorId, OperatorClass> {
    let estimates = estimator.estimate(graph);
    graph
        .operators()
        .filter_map(|op| classifier.classify(graph, &estimates, op))
        .map(|class| (class.operator(), class))
        .collect()
}
