//! Merges candidate groups of primitive stages into the final plan.
//!
//! Each group becomes one stage holding the union of its members' original
//! operators. Afterwards, ports are unified and pruned until the plan stops
//! changing; which ports may be unified is decided by the configured
//! [`OperatorEquivalence`].

use std::collections::{BTreeMap, BTreeSet};

use flowplan_core::error::{Error, Result};
use flowplan_core::graph::OperatorGraph;
use flowplan_core::id::{OperatorId, PlanPortId, PortId, SerialNumber, SubPlanId};
use flowplan_core::operator::PlanMarker;

use crate::equivalence::{DefaultEquivalence, EquivalenceKey, OperatorEquivalence};
use crate::plan::{Plan, PlanDetail, PortRef, SubPlan, SubPlanPort};

pub fn start_assemble_plan<'a>(
    primitive: &'a PlanDetail,
    graph: &'a OperatorGraph,
) -> PlanAssembler<'a> {
    PlanAssembler::new(primitive, graph)
}

#[derive(Debug)]
pub struct PlanAssembler<'a> {
    primitive: &'a PlanDetail,
    graph: &'a OperatorGraph,
    groups: Vec<Vec<SubPlanId>>,
    equivalence: Box<dyn OperatorEquivalence>,
    trivial_output_elimination: bool,
    redundant_output_elimination: bool,
    duplicate_checkpoint_elimination: bool,
    union_push_down: bool,
    sort_result: bool,
}

impl<'a> PlanAssembler<'a> {
    /// `graph` is the prepared graph `primitive` was cut from.
    pub fn new(primitive: &'a PlanDetail, graph: &'a OperatorGraph) -> Self {
        Self {
            primitive,
            graph,
            groups: Vec::new(),
            equivalence: Box::new(DefaultEquivalence),
            trivial_output_elimination: false,
            redundant_output_elimination: false,
            duplicate_checkpoint_elimination: false,
            union_push_down: false,
            sort_result: false,
        }
    }

    pub fn with_trivial_output_elimination(mut self, enabled: bool) -> Self {
        self.trivial_output_elimination = enabled;
        self
    }

    pub fn with_redundant_output_elimination(mut self, enabled: bool) -> Self {
        self.redundant_output_elimination = enabled;
        self
    }

    pub fn with_duplicate_checkpoint_elimination(mut self, enabled: bool) -> Self {
        self.duplicate_checkpoint_elimination = enabled;
        self
    }

    pub fn with_union_push_down(mut self, enabled: bool) -> Self {
        self.union_push_down = enabled;
        self
    }

    pub fn with_sort_result(mut self, enabled: bool) -> Self {
        self.sort_result = enabled;
        self
    }

    pub fn with_custom_equivalence(mut self, equivalence: impl OperatorEquivalence + 'static) -> Self {
        self.equivalence = Box::new(equivalence);
        self
    }

    pub fn with_boxed_equivalence(mut self, equivalence: Box<dyn OperatorEquivalence>) -> Self {
        self.equivalence = equivalence;
        self
    }

    /// Registers stages that are merged into a single stage.
    pub fn add(&mut self, elements: impl IntoIterator<Item = SubPlanId>) -> &mut Self {
        let group: Vec<SubPlanId> = elements.into_iter().collect();
        if !group.is_empty() {
            self.groups.push(group);
        }
        self
    }

    pub fn build(self) -> Result<PlanDetail> {
        let mut detail = PlanDetail::new();
        let mut covered: BTreeSet<SubPlanId> = BTreeSet::new();
        let mut groups: Vec<Vec<SubPlanId>> = Vec::new();
        for group in &self.groups {
            let fresh: Vec<SubPlanId> = group
                .iter()
                .copied()
                .filter(|id| covered.insert(*id))
                .collect();
            if !fresh.is_empty() {
                groups.push(fresh);
            }
        }
        for stage in self.primitive.plan().elements() {
            if covered.insert(stage.id()) {
                groups.push(vec![stage.id()]);
            }
        }
        for group in &groups {
            self.merge(&mut detail, group)?;
        }

        let mut rounds = 0usize;
        loop {
            rounds += 1;
            let mut changed = false;
            if self.redundant_output_elimination {
                changed |= self.unify_redundant_outputs(&mut detail)?;
                changed |= self.unify_inputs(&mut detail)?;
            }
            if self.union_push_down {
                changed |= self.push_down_unions(&mut detail)?;
            }
            if self.duplicate_checkpoint_elimination {
                changed |= eliminate_duplicate_checkpoints(&mut detail)?;
            }
            if self.trivial_output_elimination {
                changed |= remove_trivial_outputs(&mut detail)?;
            }
            changed |= remove_unused(&mut detail)?;
            if !changed {
                break;
            }
        }

        let ids: Vec<SubPlanId> = detail.plan().elements().iter().map(SubPlan::id).collect();
        for id in &ids {
            detail.prune_sources(*id);
        }
        let dependencies = detail.plan().dependency_graph();
        let circuits = dependencies.find_circuits();
        if !circuits.is_empty() {
            return Err(Error::Invariant(format!(
                "assembled plan is cyclic: {circuits:?}"
            )));
        }
        if self.sort_result {
            let ranks: BTreeMap<SubPlanId, Option<SerialNumber>> = detail
                .plan()
                .elements()
                .iter()
                .map(|s| (s.id(), s.operators().operators().map(|o| o.serial()).min()))
                .collect();
            let order = dependencies.topological_order_by(|id| ranks.get(&id).copied().flatten())?;
            detail.plan_mut().reorder(&order)?;
        }
        tracing::debug!(
            groups = groups.len(),
            stages = detail.plan().len(),
            rounds,
            "assembled plan"
        );
        Ok(detail)
    }

    fn merge(&self, detail: &mut PlanDetail, group: &[SubPlanId]) -> Result<SubPlanId> {
        let mut members = BTreeSet::new();
        let mut producers = BTreeSet::new();
        let mut inputs = BTreeSet::new();
        let mut outputs = BTreeSet::new();
        for id in group {
            let stage = self.primitive.plan().sub_plan(*id)?;
            members.extend(self.primitive.sources_of(*id));
            for port in stage.inputs() {
                inputs.extend(port.origins().iter().copied());
            }
            for port in stage.outputs() {
                outputs.extend(port.origins().iter().copied());
                for copy in stage.operators().predecessors(port.marker()) {
                    if let Some(original) = self.primitive.source(*id, copy) {
                        producers.insert(original);
                    }
                }
            }
        }
        members.extend(inputs.iter().copied());
        members.extend(outputs.iter().copied());
        detail.add_stage(self.graph, &members, &producers, &inputs, &outputs)
    }

    fn key(&self, stage: &SubPlan, marker: OperatorId) -> EquivalenceKey {
        self.equivalence.extract(stage, marker)
    }

    /// Equivalent outputs computed from the same upstream ports.
    fn unify_redundant_outputs(&self, detail: &mut PlanDetail) -> Result<bool> {
        let mut changed = false;
        while let Some((stage, keep, absorbed)) =
            self.find_output_pair(detail.plan(), |_, stage, a, b| {
                upstream_ports(stage, a) == upstream_ports(stage, b)
            })
        {
            merge_outputs(detail, stage, keep, absorbed)?;
            changed = true;
        }
        Ok(changed)
    }

    /// Equivalent outputs that feed exactly the same stage inputs.
    fn push_down_unions(&self, detail: &mut PlanDetail) -> Result<bool> {
        let mut changed = false;
        while let Some((stage, keep, absorbed)) =
            self.find_output_pair(detail.plan(), |plan, stage, a, b| {
                let opposites = |port: PlanPortId| -> BTreeSet<PortRef> {
                    plan.output_opposites(PortRef {
                        sub_plan: stage.id(),
                        port,
                    })
                    .into_iter()
                    .collect()
                };
                let left = opposites(a);
                !left.is_empty() && left == opposites(b)
            })
        {
            merge_outputs(detail, stage, keep, absorbed)?;
            changed = true;
        }
        Ok(changed)
    }

    fn find_output_pair(
        &self,
        plan: &Plan,
        matches: impl Fn(&Plan, &SubPlan, PlanPortId, PlanPortId) -> bool,
    ) -> Option<(SubPlanId, PlanPortId, PlanPortId)> {
        for stage in plan.elements() {
            let keys: Vec<(PlanPortId, EquivalenceKey)> = stage
                .outputs()
                .iter()
                .map(|p| (p.id(), self.key(stage, p.marker())))
                .collect();
            for (i, (a, key_a)) in keys.iter().enumerate() {
                for (b, key_b) in keys.iter().skip(i + 1) {
                    if key_a == key_b && matches(plan, stage, *a, *b) {
                        return Some((stage.id(), *a, *b));
                    }
                }
            }
        }
        None
    }

    /// Equivalent inputs fed by exactly the same outputs.
    fn unify_inputs(&self, detail: &mut PlanDetail) -> Result<bool> {
        let mut changed = false;
        loop {
            let found = {
                let plan = detail.plan();
                let mut found = None;
                'stages: for stage in plan.elements() {
                    let ports: Vec<(PlanPortId, EquivalenceKey, BTreeSet<PortRef>)> = stage
                        .inputs()
                        .iter()
                        .map(|p| {
                            let at = PortRef {
                                sub_plan: stage.id(),
                                port: p.id(),
                            };
                            let opposites = plan.input_opposites(at).into_iter().collect();
                            (p.id(), self.key(stage, p.marker()), opposites)
                        })
                        .collect();
                    for (i, (a, key_a, ops_a)) in ports.iter().enumerate() {
                        for (b, key_b, ops_b) in ports.iter().skip(i + 1) {
                            if key_a == key_b && !ops_a.is_empty() && ops_a == ops_b {
                                found = Some((stage.id(), *a, *b));
                                break 'stages;
                            }
                        }
                    }
                }
                found
            };
            let Some((stage, keep, absorbed)) = found else {
                return Ok(changed);
            };
            merge_inputs(detail, stage, keep, absorbed)?;
            changed = true;
        }
    }
}

fn stage_mut(detail: &mut PlanDetail, id: SubPlanId) -> Result<&mut SubPlan> {
    detail
        .plan_mut()
        .element_mut(id)
        .ok_or_else(|| Error::Plan(format!("unknown sub-plan {id}")))
}

/// Ports feeding an output's marker inside its stage.
fn upstream_ports(stage: &SubPlan, output: PlanPortId) -> BTreeSet<PortId> {
    let Some(port) = stage.output(output) else {
        return BTreeSet::new();
    };
    let graph = stage.operators();
    graph
        .input(port.marker(), 0)
        .map(|input| graph.opposites(input).into_iter().collect())
        .unwrap_or_default()
}

/// Folds output `absorbed` into `keep`: upstreams and origins are united.
fn merge_outputs(
    detail: &mut PlanDetail,
    id: SubPlanId,
    keep: PlanPortId,
    absorbed: PlanPortId,
) -> Result<()> {
    let stage = stage_mut(detail, id)?;
    let keep_marker = port_marker(stage.output(keep), id, keep)?;
    let absorbed_port = stage
        .output(absorbed)
        .ok_or_else(|| Error::Plan(format!("{id} has no output {absorbed}")))?;
    let absorbed_marker = absorbed_port.marker();
    let origins = absorbed_port.origins().clone();
    let graph = stage.operators_mut();
    let target = graph.input(keep_marker, 0)?;
    for up in graph.opposites(graph.input(absorbed_marker, 0)?) {
        graph.connect(up, target)?;
    }
    if let Some(port) = stage.output_mut(keep) {
        port.origins_mut().extend(origins);
    }
    stage.remove_output(absorbed)?;
    tracing::trace!(stage = %id, kept = %keep, absorbed = %absorbed, "unified outputs");
    Ok(())
}

/// Folds input `absorbed` into `keep`: consumers and origins are united.
fn merge_inputs(
    detail: &mut PlanDetail,
    id: SubPlanId,
    keep: PlanPortId,
    absorbed: PlanPortId,
) -> Result<()> {
    let stage = stage_mut(detail, id)?;
    let keep_marker = port_marker(stage.input(keep), id, keep)?;
    let absorbed_port = stage
        .input(absorbed)
        .ok_or_else(|| Error::Plan(format!("{id} has no input {absorbed}")))?;
    let absorbed_marker = absorbed_port.marker();
    let origins = absorbed_port.origins().clone();
    let graph = stage.operators_mut();
    let source = graph.output(keep_marker, 0)?;
    for down in graph.opposites(graph.output(absorbed_marker, 0)?) {
        graph.connect(source, down)?;
    }
    if let Some(port) = stage.input_mut(keep) {
        port.origins_mut().extend(origins);
    }
    stage.remove_input(absorbed)?;
    tracing::trace!(stage = %id, kept = %keep, absorbed = %absorbed, "unified inputs");
    Ok(())
}

fn port_marker(
    port: Option<&SubPlanPort>,
    id: SubPlanId,
    port_id: PlanPortId,
) -> Result<OperatorId> {
    port.map(|p| p.marker())
        .ok_or_else(|| Error::Plan(format!("{id} has no port {port_id}")))
}

/// A checkpoint output that only forwards a checkpoint input is dissolved:
/// the outputs feeding that input take over its consumers.
fn eliminate_duplicate_checkpoints(detail: &mut PlanDetail) -> Result<bool> {
    let mut changed = false;
    loop {
        let found = {
            let plan = detail.plan();
            let mut found = None;
            'stages: for stage in plan.elements() {
                for output in stage.outputs() {
                    if stage.marker_kind(output) != Some(PlanMarker::Checkpoint) {
                        continue;
                    }
                    let preds = stage.operators().predecessors(output.marker());
                    if preds.len() != 1 {
                        continue;
                    }
                    let Some(pred) = preds.first().copied() else {
                        continue;
                    };
                    let Some(input) = stage.find_input(pred) else {
                        continue;
                    };
                    if stage.marker_kind(input) != Some(PlanMarker::Checkpoint) {
                        continue;
                    }
                    let upstreams = plan.input_opposites(PortRef {
                        sub_plan: stage.id(),
                        port: input.id(),
                    });
                    if upstreams.is_empty() {
                        continue;
                    }
                    found = Some((stage.id(), output.id(), output.origins().clone(), upstreams));
                    break 'stages;
                }
            }
            found
        };
        let Some((id, output, origins, upstreams)) = found else {
            return Ok(changed);
        };
        for up in upstreams {
            if let Some(port) = detail
                .plan_mut()
                .element_mut(up.sub_plan)
                .and_then(|s| s.output_mut(up.port))
            {
                port.origins_mut().extend(origins.iter().copied());
            }
        }
        stage_mut(detail, id)?.remove_output(output)?;
        tracing::trace!(stage = %id, output = %output, "dissolved duplicate checkpoint");
        changed = true;
    }
}

/// Drops non-`END` outputs nobody reads.
fn remove_trivial_outputs(detail: &mut PlanDetail) -> Result<bool> {
    let targets: Vec<(SubPlanId, PlanPortId)> = {
        let plan = detail.plan();
        plan.elements()
            .iter()
            .flat_map(|stage| {
                stage
                    .outputs()
                    .iter()
                    .filter(|p| stage.marker_kind(p) != Some(PlanMarker::End))
                    .filter(|p| {
                        plan.output_opposites(PortRef {
                            sub_plan: stage.id(),
                            port: p.id(),
                        })
                        .is_empty()
                    })
                    .map(move |p| (stage.id(), p.id()))
            })
            .collect()
    };
    for (id, port) in &targets {
        stage_mut(detail, *id)?.remove_output(*port)?;
    }
    Ok(!targets.is_empty())
}

/// Removes operators that no longer reach an output, inputs that feed
/// nothing, and stages without outputs.
fn remove_unused(detail: &mut PlanDetail) -> Result<bool> {
    let mut changed = false;
    let ids: Vec<SubPlanId> = detail.plan().elements().iter().map(SubPlan::id).collect();
    for id in ids {
        let stage = stage_mut(detail, id)?;
        if stage.outputs().is_empty() {
            detail.remove_stage(id);
            tracing::trace!(stage = %id, "removed stage without outputs");
            changed = true;
            continue;
        }
        let graph = stage.operators();
        let mut live: BTreeSet<OperatorId> = BTreeSet::new();
        for port in stage.outputs() {
            live.insert(port.marker());
            live.extend(graph.ancestors_where(port.marker(), |_| true));
        }
        let dead: Vec<OperatorId> = graph
            .operator_ids()
            .into_iter()
            .filter(|op| !live.contains(op) && stage.find_input(*op).is_none())
            .collect();
        for op in &dead {
            stage.operators_mut().remove(*op)?;
        }
        let unused: Vec<PlanPortId> = stage
            .inputs()
            .iter()
            .filter(|p| stage.operators().successors(p.marker()).is_empty())
            .map(|p| p.id())
            .collect();
        for port in &unused {
            stage.remove_input(*port)?;
        }
        changed |= !dead.is_empty() || !unused.is_empty();
    }
    Ok(changed)
}
