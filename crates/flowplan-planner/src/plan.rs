//! Staged execution plans.
//!
//! A [`SubPlan`] owns a private copy of its operators. Its ports name a
//! marker inside that copy plus the *origin* markers of the prepared graph
//! the port stands for. A stage output feeds a stage input exactly when
//! their origin sets intersect.

use std::collections::{BTreeMap, BTreeSet};

use flowplan_core::attr::{Attribute, AttributeMap};
use flowplan_core::depgraph::DependencyGraph;
use flowplan_core::error::{Error, Result};
use flowplan_core::graph::OperatorGraph;
use flowplan_core::id::{OperatorId, PlanPortId, SubPlanId};
use flowplan_core::operator::PlanMarker;

#[derive(Debug, Clone)]
pub struct SubPlanPort {
    id: PlanPortId,
    marker: OperatorId,
    origins: BTreeSet<OperatorId>,
    attributes: AttributeMap,
}

impl SubPlanPort {
    pub fn id(&self) -> PlanPortId {
        self.id
    }

    /// Marker operator inside the owning stage's graph.
    pub fn marker(&self) -> OperatorId {
        self.marker
    }

    /// Markers of the prepared graph this port stands for.
    pub fn origins(&self) -> &BTreeSet<OperatorId> {
        &self.origins
    }

    pub fn attributes(&self) -> &AttributeMap {
        &self.attributes
    }

    pub fn attributes_mut(&mut self) -> &mut AttributeMap {
        &mut self.attributes
    }

    pub fn attribute<T: Attribute>(&self) -> Option<&T> {
        self.attributes.get::<T>()
    }

    pub(crate) fn origins_mut(&mut self) -> &mut BTreeSet<OperatorId> {
        &mut self.origins
    }
}

#[derive(Debug, Clone)]
pub struct SubPlan {
    id: SubPlanId,
    operators: OperatorGraph,
    inputs: Vec<SubPlanPort>,
    outputs: Vec<SubPlanPort>,
    attributes: AttributeMap,
}

impl SubPlan {
    pub fn id(&self) -> SubPlanId {
        self.id
    }

    pub fn operators(&self) -> &OperatorGraph {
        &self.operators
    }

    pub(crate) fn operators_mut(&mut self) -> &mut OperatorGraph {
        &mut self.operators
    }

    pub fn inputs(&self) -> &[SubPlanPort] {
        &self.inputs
    }

    pub fn outputs(&self) -> &[SubPlanPort] {
        &self.outputs
    }

    pub fn input(&self, id: PlanPortId) -> Option<&SubPlanPort> {
        self.inputs.iter().find(|p| p.id == id)
    }

    pub fn output(&self, id: PlanPortId) -> Option<&SubPlanPort> {
        self.outputs.iter().find(|p| p.id == id)
    }

    pub fn input_mut(&mut self, id: PlanPortId) -> Option<&mut SubPlanPort> {
        self.inputs.iter_mut().find(|p| p.id == id)
    }

    pub fn output_mut(&mut self, id: PlanPortId) -> Option<&mut SubPlanPort> {
        self.outputs.iter_mut().find(|p| p.id == id)
    }

    pub fn inputs_mut(&mut self) -> impl Iterator<Item = &mut SubPlanPort> {
        self.inputs.iter_mut()
    }

    pub fn outputs_mut(&mut self) -> impl Iterator<Item = &mut SubPlanPort> {
        self.outputs.iter_mut()
    }

    /// Input port whose marker is `marker`.
    pub fn find_input(&self, marker: OperatorId) -> Option<&SubPlanPort> {
        self.inputs.iter().find(|p| p.marker == marker)
    }

    pub fn find_output(&self, marker: OperatorId) -> Option<&SubPlanPort> {
        self.outputs.iter().find(|p| p.marker == marker)
    }

    /// Marker kind of a port of this stage.
    pub fn marker_kind(&self, port: &SubPlanPort) -> Option<PlanMarker> {
        self.operators.get(port.marker).and_then(|op| op.marker())
    }

    pub fn attributes(&self) -> &AttributeMap {
        &self.attributes
    }

    pub fn attributes_mut(&mut self) -> &mut AttributeMap {
        &mut self.attributes
    }

    pub fn attribute<T: Attribute>(&self) -> Option<&T> {
        self.attributes.get::<T>()
    }

    /// Removes a port together with its marker operator.
    pub(crate) fn remove_input(&mut self, id: PlanPortId) -> Result<SubPlanPort> {
        let index = self
            .inputs
            .iter()
            .position(|p| p.id == id)
            .ok_or_else(|| Error::Plan(format!("{} has no input {id}", self.id)))?;
        let port = self.inputs.remove(index);
        self.operators.remove(port.marker)?;
        Ok(port)
    }

    pub(crate) fn remove_output(&mut self, id: PlanPortId) -> Result<SubPlanPort> {
        let index = self
            .outputs
            .iter()
            .position(|p| p.id == id)
            .ok_or_else(|| Error::Plan(format!("{} has no output {id}", self.id)))?;
        let port = self.outputs.remove(index);
        self.operators.remove(port.marker)?;
        Ok(port)
    }
}

/// Address of a stage port within a plan.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct PortRef {
    pub sub_plan: SubPlanId,
    pub port: PlanPortId,
}

#[derive(Debug, Clone, Default)]
pub struct Plan {
    elements: Vec<SubPlan>,
    attributes: AttributeMap,
    next_sub_plan: u64,
    next_port: u64,
}

impl Plan {
    pub fn new() -> Self {
        Self::default()
    }

    /// Stages in plan order.
    pub fn elements(&self) -> &[SubPlan] {
        &self.elements
    }

    pub fn elements_mut(&mut self) -> impl Iterator<Item = &mut SubPlan> {
        self.elements.iter_mut()
    }

    pub fn len(&self) -> usize {
        self.elements.len()
    }

    pub fn is_empty(&self) -> bool {
        self.elements.is_empty()
    }

    pub fn element(&self, id: SubPlanId) -> Option<&SubPlan> {
        self.elements.iter().find(|s| s.id == id)
    }

    pub fn element_mut(&mut self, id: SubPlanId) -> Option<&mut SubPlan> {
        self.elements.iter_mut().find(|s| s.id == id)
    }

    pub fn sub_plan(&self, id: SubPlanId) -> Result<&SubPlan> {
        self.element(id)
            .ok_or_else(|| Error::Plan(format!("unknown sub-plan {id}")))
    }

    pub fn attributes(&self) -> &AttributeMap {
        &self.attributes
    }

    pub fn attributes_mut(&mut self) -> &mut AttributeMap {
        &mut self.attributes
    }

    pub fn attribute<T: Attribute>(&self) -> Option<&T> {
        self.attributes.get::<T>()
    }

    pub fn input_port(&self, at: PortRef) -> Option<&SubPlanPort> {
        self.element(at.sub_plan).and_then(|s| s.input(at.port))
    }

    pub fn output_port(&self, at: PortRef) -> Option<&SubPlanPort> {
        self.element(at.sub_plan).and_then(|s| s.output(at.port))
    }

    fn push(
        &mut self,
        operators: OperatorGraph,
        inputs: Vec<(OperatorId, BTreeSet<OperatorId>)>,
        outputs: Vec<(OperatorId, BTreeSet<OperatorId>)>,
    ) -> SubPlanId {
        let id = SubPlanId::new(self.next_sub_plan);
        self.next_sub_plan += 1;
        let mut port = |(marker, origins): (OperatorId, BTreeSet<OperatorId>)| {
            let id = PlanPortId::new(self.next_port);
            self.next_port += 1;
            SubPlanPort {
                id,
                marker,
                origins,
                attributes: AttributeMap::new(),
            }
        };
        let inputs = inputs.into_iter().map(&mut port).collect();
        let outputs = outputs.into_iter().map(&mut port).collect();
        self.elements.push(SubPlan {
            id,
            operators,
            inputs,
            outputs,
            attributes: AttributeMap::new(),
        });
        id
    }

    pub(crate) fn remove(&mut self, id: SubPlanId) -> Option<SubPlan> {
        let index = self.elements.iter().position(|s| s.id == id)?;
        Some(self.elements.remove(index))
    }

    /// Reorders stages; `order` must be a permutation of the current ids.
    pub(crate) fn reorder(&mut self, order: &[SubPlanId]) -> Result<()> {
        if order.len() != self.elements.len() {
            return Err(Error::Invariant("stage order is not a permutation".into()));
        }
        let mut by_id: BTreeMap<SubPlanId, SubPlan> =
            self.elements.drain(..).map(|s| (s.id, s)).collect();
        for id in order {
            let stage = by_id
                .remove(id)
                .ok_or_else(|| Error::Invariant(format!("stage order names unknown {id}")))?;
            self.elements.push(stage);
        }
        Ok(())
    }

    /// Every `(output, input)` pair whose origin sets intersect.
    pub fn connections(&self) -> Vec<(PortRef, PortRef)> {
        let mut inputs_by_origin: BTreeMap<OperatorId, Vec<PortRef>> = BTreeMap::new();
        for stage in &self.elements {
            for port in &stage.inputs {
                for origin in &port.origins {
                    inputs_by_origin.entry(*origin).or_default().push(PortRef {
                        sub_plan: stage.id,
                        port: port.id,
                    });
                }
            }
        }
        let mut out = BTreeSet::new();
        for stage in &self.elements {
            for port in &stage.outputs {
                let from = PortRef {
                    sub_plan: stage.id,
                    port: port.id,
                };
                for origin in &port.origins {
                    for to in inputs_by_origin.get(origin).into_iter().flatten() {
                        out.insert((from, *to));
                    }
                }
            }
        }
        out.into_iter().collect()
    }

    /// Stage inputs fed by an output.
    pub fn output_opposites(&self, output: PortRef) -> Vec<PortRef> {
        let Some(origins) = self.output_port(output).map(|p| &p.origins) else {
            return Vec::new();
        };
        self.elements
            .iter()
            .flat_map(|s| {
                s.inputs
                    .iter()
                    .filter(|p| !p.origins.is_disjoint(origins))
                    .map(move |p| PortRef {
                        sub_plan: s.id,
                        port: p.id,
                    })
            })
            .collect()
    }

    /// Stage outputs feeding an input.
    pub fn input_opposites(&self, input: PortRef) -> Vec<PortRef> {
        let Some(origins) = self.input_port(input).map(|p| &p.origins) else {
            return Vec::new();
        };
        self.elements
            .iter()
            .flat_map(|s| {
                s.outputs
                    .iter()
                    .filter(|p| !p.origins.is_disjoint(origins))
                    .map(move |p| PortRef {
                        sub_plan: s.id,
                        port: p.id,
                    })
            })
            .collect()
    }

    /// Stage-level dependency graph: a stage depends on the stages feeding it.
    pub fn dependency_graph(&self) -> DependencyGraph<SubPlanId> {
        let mut deps = DependencyGraph::new();
        for stage in &self.elements {
            deps.add_vertex(stage.id);
        }
        for (from, to) in self.connections() {
            deps.add_edge(to.sub_plan, from.sub_plan);
        }
        deps
    }
}

/// A plan plus the provenance of every copied operator.
#[derive(Debug, Clone, Default)]
pub struct PlanDetail {
    plan: Plan,
    sources: BTreeMap<SubPlanId, BTreeMap<OperatorId, OperatorId>>,
}

impl PlanDetail {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn plan(&self) -> &Plan {
        &self.plan
    }

    pub fn plan_mut(&mut self) -> &mut Plan {
        &mut self.plan
    }

    pub fn into_plan(self) -> Plan {
        self.plan
    }

    /// Original operator a stage-local copy came from.
    pub fn source(&self, sub_plan: SubPlanId, copy: OperatorId) -> Option<OperatorId> {
        self.sources.get(&sub_plan).and_then(|m| m.get(&copy)).copied()
    }

    /// Original operators contained in a stage.
    pub fn sources_of(&self, sub_plan: SubPlanId) -> BTreeSet<OperatorId> {
        self.sources
            .get(&sub_plan)
            .map(|m| m.values().copied().collect())
            .unwrap_or_default()
    }

    /// Stage-local copies of an original operator.
    pub fn copies_of(&self, original: OperatorId) -> Vec<(SubPlanId, OperatorId)> {
        self.sources
            .iter()
            .flat_map(|(stage, m)| {
                m.iter()
                    .filter(move |(_, o)| **o == original)
                    .map(move |(copy, _)| (*stage, *copy))
            })
            .collect()
    }

    /// Copies `members` of `source` into a new stage.
    ///
    /// `inputs` and `outputs` are markers among the members; edges into
    /// inputs and out of outputs are not copied, and outputs are only fed by
    /// `producers` (the remaining members are copies needed for their
    /// upstream data). Every port starts with itself as the only origin.
    pub fn add_stage(
        &mut self,
        source: &OperatorGraph,
        members: &BTreeSet<OperatorId>,
        producers: &BTreeSet<OperatorId>,
        inputs: &BTreeSet<OperatorId>,
        outputs: &BTreeSet<OperatorId>,
    ) -> Result<SubPlanId> {
        for marker in inputs.iter().chain(outputs.iter()) {
            if !members.contains(marker) || !source.operator(*marker)?.is_marker() {
                return Err(Error::Plan(format!(
                    "stage boundary {marker} must be a member marker"
                )));
            }
        }
        if let Some(both) = inputs.intersection(outputs).next() {
            return Err(Error::Invariant(format!(
                "{} would be both input and output of one stage",
                source.operator(*both)?.label()
            )));
        }
        let (operators, to_original) = source.copy_of(members, |up, down| {
            !inputs.contains(&down)
                && !outputs.contains(&up)
                && (!outputs.contains(&down) || producers.contains(&up))
        })?;
        let to_copy: BTreeMap<OperatorId, OperatorId> =
            to_original.iter().map(|(c, o)| (*o, *c)).collect();
        let ports = |markers: &BTreeSet<OperatorId>| -> Vec<(OperatorId, BTreeSet<OperatorId>)> {
            markers
                .iter()
                .filter_map(|m| to_copy.get(m).map(|c| (*c, BTreeSet::from([*m]))))
                .collect()
        };
        let id = self.plan.push(operators, ports(inputs), ports(outputs));
        self.sources.insert(id, to_original);
        Ok(id)
    }

    pub(crate) fn remove_stage(&mut self, id: SubPlanId) -> Option<SubPlan> {
        self.sources.remove(&id);
        self.plan.remove(id)
    }

    /// Forgets provenance of operators no longer present in a stage.
    pub(crate) fn prune_sources(&mut self, id: SubPlanId) {
        let Some(stage) = self.plan.element(id) else {
            return;
        };
        if let Some(map) = self.sources.get_mut(&id) {
            map.retain(|copy, _| stage.operators.contains(*copy));
        }
    }
}
