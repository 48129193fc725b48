//! Candidate merge sets for the assembler.
//!
//! Primitive stages reading the same non-broadcast sources are grouped.
//! Groups are then split until no element of a group is (transitively)
//! upstream of another, and until merging every group at once leaves the
//! stage graph acyclic.

use std::collections::{BTreeMap, BTreeSet, VecDeque};

use flowplan_core::depgraph::DependencyGraph;
use flowplan_core::error::{Error, Result};
use flowplan_core::id::{OperatorId, SubPlanId};
use flowplan_core::operator::PlanMarker;

use crate::plan::PlanDetail;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubPlanGroup {
    common_sources: BTreeSet<OperatorId>,
    elements: Vec<SubPlanId>,
}

impl SubPlanGroup {
    pub fn common_sources(&self) -> &BTreeSet<OperatorId> {
        &self.common_sources
    }

    pub fn elements(&self) -> &[SubPlanId] {
        &self.elements
    }

    fn of(detail: &PlanDetail, id: SubPlanId) -> Result<Self> {
        let stage = detail.plan().sub_plan(id)?;
        let common_sources: BTreeSet<OperatorId> = stage
            .inputs()
            .iter()
            .filter(|port| stage.marker_kind(port) != Some(PlanMarker::Broadcast))
            .flat_map(|port| port.origins().iter().copied())
            .collect();
        if common_sources.is_empty() {
            return Err(Error::Invariant(format!(
                "{id} has no non-broadcast input to group by"
            )));
        }
        Ok(Self {
            common_sources,
            elements: vec![id],
        })
    }
}

/// Groups the stages of a primitive plan into merge candidates.
pub fn classify(primitive: &PlanDetail) -> Result<Vec<SubPlanGroup>> {
    let groups = primitive
        .plan()
        .elements()
        .iter()
        .map(|stage| SubPlanGroup::of(primitive, stage.id()))
        .collect::<Result<Vec<_>>>()?;
    let groups = combine_groups(groups);
    let dependencies = primitive.plan().dependency_graph();
    let groups = split_groups(&dependencies, groups);
    let groups = break_group_circuits(&dependencies, groups);
    tracing::debug!(groups = groups.len(), "classified primitive stages");
    Ok(groups)
}

/// Merges groups with identical keys, keeping first-seen order.
pub fn combine_groups(groups: Vec<SubPlanGroup>) -> Vec<SubPlanGroup> {
    let mut combined: Vec<SubPlanGroup> = Vec::new();
    for group in groups {
        match combined
            .iter_mut()
            .find(|g| g.common_sources == group.common_sources)
        {
            Some(buddy) => buddy.elements.extend(group.elements),
            None => combined.push(group),
        }
    }
    combined
}

/// Pulls blocking elements out of groups until every group is free of
/// internal dependencies.
pub fn split_groups(
    dependencies: &DependencyGraph<SubPlanId>,
    groups: Vec<SubPlanGroup>,
) -> Vec<SubPlanGroup> {
    let mut results = groups;
    loop {
        let mut purged = Vec::new();
        for group in &mut results {
            if let Some(split) = split_group(dependencies, group) {
                purged.push(split);
            }
        }
        if purged.is_empty() {
            return results;
        }
        results.extend(purged);
    }
}

fn split_group(
    dependencies: &DependencyGraph<SubPlanId>,
    group: &mut SubPlanGroup,
) -> Option<SubPlanGroup> {
    if group.elements.len() <= 1 {
        return None;
    }
    let blockers = compute_blockers(dependencies, &group.elements);
    let (purged, kept): (Vec<SubPlanId>, Vec<SubPlanId>) = group
        .elements
        .iter()
        .copied()
        .partition(|e| blockers.contains(e));
    if purged.is_empty() {
        return None;
    }
    group.elements = kept;
    Some(SubPlanGroup {
        common_sources: group.common_sources.clone(),
        elements: purged,
    })
}

/// Splits groups that sit on a circuit of the group dependency graph.
///
/// Two groups can each be free of internal dependencies and still depend on
/// each other, for example when broadcasts cross between them. Each round
/// picks the first multi-element group of a circuit and moves the elements
/// that depend on another stage of the circuit into a new group; when that
/// separates nothing, the group falls apart into singletons.
pub fn break_group_circuits(
    dependencies: &DependencyGraph<SubPlanId>,
    groups: Vec<SubPlanGroup>,
) -> Vec<SubPlanGroup> {
    let mut results = groups;
    loop {
        let circuits = group_dependencies(dependencies, &results).find_circuits();
        let Some(circuit) = circuits.into_iter().next() else {
            return results;
        };
        // an all-singleton circuit would mean the primitive plan itself is
        // cyclic; the assembler reports that
        let Some(index) = circuit
            .iter()
            .copied()
            .find(|i| results[*i].elements.len() > 1)
        else {
            return results;
        };
        let members: BTreeSet<SubPlanId> = circuit
            .iter()
            .flat_map(|i| results[*i].elements.iter().copied())
            .collect();
        let group = &mut results[index];
        let (moved, kept): (Vec<SubPlanId>, Vec<SubPlanId>) =
            group.elements.iter().copied().partition(|e| {
                compute_blockers(dependencies, &[*e])
                    .iter()
                    .any(|upstream| upstream != e && members.contains(upstream))
            });
        let common_sources = group.common_sources.clone();
        let split: Vec<Vec<SubPlanId>> = if moved.is_empty() || kept.is_empty() {
            group.elements.iter().map(|e| vec![*e]).collect()
        } else {
            vec![kept, moved]
        };
        tracing::debug!(
            group = index,
            parts = split.len(),
            "split stage group on a circuit"
        );
        let mut parts = split.into_iter();
        group.elements = parts.next().unwrap_or_default();
        results.extend(parts.map(|elements| SubPlanGroup {
            common_sources: common_sources.clone(),
            elements,
        }));
    }
}

/// Dependencies between groups, keyed by group index, as they would be after
/// merging each group into one stage.
fn group_dependencies(
    dependencies: &DependencyGraph<SubPlanId>,
    groups: &[SubPlanGroup],
) -> DependencyGraph<usize> {
    let owner: BTreeMap<SubPlanId, usize> = groups
        .iter()
        .enumerate()
        .flat_map(|(i, g)| g.elements.iter().map(move |e| (*e, i)))
        .collect();
    let mut graph = DependencyGraph::new();
    for (i, group) in groups.iter().enumerate() {
        graph.add_vertex(i);
        for element in &group.elements {
            for upstream in dependencies.connected(*element) {
                match owner.get(&upstream) {
                    Some(j) if *j != i => graph.add_edge(i, *j),
                    _ => {}
                }
            }
        }
    }
    graph
}

/// Every stage reachable upstream from any element.
fn compute_blockers(
    dependencies: &DependencyGraph<SubPlanId>,
    elements: &[SubPlanId],
) -> BTreeSet<SubPlanId> {
    let mut saw = BTreeSet::new();
    let mut work: VecDeque<SubPlanId> = elements.iter().copied().collect();
    while let Some(first) = work.pop_front() {
        for blocker in dependencies.connected(first) {
            if saw.insert(blocker) {
                work.push_back(blocker);
            }
        }
    }
    saw
}
