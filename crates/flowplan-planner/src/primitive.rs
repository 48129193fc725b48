//! Cuts a prepared operator graph into primitive stages at its markers.
//!
//! Every operator gets a *level*: the number of markers on the longest path
//! from a source. Operators of one level that are joined by marker-free
//! edges form a region; each region becomes a stage together with copies of
//! the marker-free ancestors it needs. Marker to marker edges get a stage of
//! their own. Stage dependencies always go from a lower to a higher level,
//! so the primitive plan is acyclic.

use std::collections::{BTreeMap, BTreeSet};

use flowplan_core::error::Result;
use flowplan_core::graph::OperatorGraph;
use flowplan_core::id::OperatorId;

use crate::plan::PlanDetail;

pub fn create_primitive_plan(graph: &OperatorGraph) -> Result<PlanDetail> {
    let order = graph.dependency_graph().topological_order()?;
    let is_marker = |id: &OperatorId| graph.get(*id).map(|o| o.is_marker()).unwrap_or(false);

    let mut levels: BTreeMap<OperatorId, usize> = BTreeMap::new();
    for id in &order {
        let level = graph
            .predecessors(*id)
            .iter()
            .map(|p| levels.get(p).copied().unwrap_or(0) + usize::from(is_marker(p)))
            .max()
            .unwrap_or(0);
        levels.insert(*id, level);
    }

    let mut regions = UnionFind::default();
    for id in order.iter().filter(|id| !is_marker(id)) {
        regions.add(*id);
        for succ in graph.successors(*id) {
            if !is_marker(&succ) && levels.get(&succ) == levels.get(id) {
                regions.add(succ);
                regions.union(*id, succ);
            }
        }
    }

    let mut detail = PlanDetail::new();
    for region in regions.into_sets() {
        let mut members = region.clone();
        for id in &region {
            members.extend(graph.ancestors_where(*id, |o| !o.is_marker()));
        }
        let inputs: BTreeSet<OperatorId> = members
            .iter()
            .flat_map(|id| graph.predecessors(*id))
            .filter(|p| is_marker(p))
            .collect();
        let outputs: BTreeSet<OperatorId> = region
            .iter()
            .flat_map(|id| graph.successors(*id))
            .filter(|s| is_marker(s))
            .collect();
        members.extend(inputs.iter().copied());
        members.extend(outputs.iter().copied());
        let id = detail.add_stage(graph, &members, &region, &inputs, &outputs)?;
        tracing::trace!(stage = %id, operators = members.len(), "primitive stage");
    }

    for upstream in order.iter().filter(|id| is_marker(id)) {
        for downstream in graph.successors(*upstream) {
            if !is_marker(&downstream) {
                continue;
            }
            let members = BTreeSet::from([*upstream, downstream]);
            let inputs = BTreeSet::from([*upstream]);
            let outputs = BTreeSet::from([downstream]);
            detail.add_stage(graph, &members, &inputs, &inputs, &outputs)?;
        }
    }

    tracing::debug!(stages = detail.plan().len(), "created primitive plan");
    Ok(detail)
}

#[derive(Debug, Default)]
struct UnionFind {
    parent: BTreeMap<OperatorId, OperatorId>,
}

impl UnionFind {
    fn add(&mut self, id: OperatorId) {
        self.parent.entry(id).or_insert(id);
    }

    fn find(&mut self, id: OperatorId) -> OperatorId {
        let mut root = id;
        while let Some(parent) = self.parent.get(&root).copied() {
            if parent == root {
                break;
            }
            root = parent;
        }
        let mut current = id;
        while current != root {
            let next = self.parent.insert(current, root).unwrap_or(root);
            current = next;
        }
        root
    }

    fn union(&mut self, a: OperatorId, b: OperatorId) {
        let (ra, rb) = (self.find(a), self.find(b));
        if ra != rb {
            let (keep, merge) = if ra < rb { (ra, rb) } else { (rb, ra) };
            self.parent.insert(merge, keep);
        }
    }

    /// Sets ordered by their smallest member.
    fn into_sets(mut self) -> Vec<BTreeSet<OperatorId>> {
        let ids: Vec<OperatorId> = self.parent.keys().copied().collect();
        let mut sets: BTreeMap<OperatorId, BTreeSet<OperatorId>> = BTreeMap::new();
        for id in ids {
            let root = self.find(id);
            sets.entry(root).or_default().insert(id);
        }
        let mut sets: Vec<BTreeSet<OperatorId>> = sets.into_values().collect();
        sets.sort_by_key(|s| s.first().copied());
        sets
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use flowplan_core::operator::{OperatorSpec, PlanMarker, UserOperatorKind};
    use flowplan_core::schema::DataType;

    fn ty() -> DataType {
        DataType::named("Row")
    }

    fn extract(name: &str) -> OperatorSpec {
        OperatorSpec::user(name, UserOperatorKind::Extract)
            .input("in", ty())
            .output("out", ty())
    }

    #[test]
    fn gather_splits_two_stages() {
        let mut g = OperatorGraph::new();
        let begin = g.add(OperatorSpec::marker(PlanMarker::Begin, ty()));
        let a = g.add(extract("a"));
        let gather = g.add(OperatorSpec::marker(PlanMarker::Gather, ty()));
        let b = g.add(extract("b"));
        let end = g.add(OperatorSpec::marker(PlanMarker::End, ty()));
        for (up, down) in [(begin, a), (a, gather), (gather, b), (b, end)] {
            g.connect(g.output(up, 0).unwrap(), g.input(down, 0).unwrap()).unwrap();
        }
        let detail = create_primitive_plan(&g).unwrap();
        let plan = detail.plan();
        assert_eq!(plan.len(), 2);
        assert_eq!(plan.connections().len(), 1);
        let first = &plan.elements()[0];
        assert!(detail.sources_of(first.id()).contains(&a));
        assert_eq!(first.outputs().len(), 1);
        assert!(first.outputs()[0].origins().contains(&gather));
        assert!(plan.dependency_graph().find_circuits().is_empty());
    }

    #[test]
    fn marker_edges_get_trivial_stages() {
        let mut g = OperatorGraph::new();
        let begin = g.add(OperatorSpec::marker(PlanMarker::Begin, ty()));
        let checkpoint = g.add(OperatorSpec::marker(PlanMarker::Checkpoint, ty()));
        let end = g.add(OperatorSpec::marker(PlanMarker::End, ty()));
        g.connect(g.output(begin, 0).unwrap(), g.input(checkpoint, 0).unwrap()).unwrap();
        g.connect(g.output(checkpoint, 0).unwrap(), g.input(end, 0).unwrap()).unwrap();
        let detail = create_primitive_plan(&g).unwrap();
        assert_eq!(detail.plan().len(), 2);
        for stage in detail.plan().elements() {
            assert_eq!(stage.inputs().len(), 1);
            assert_eq!(stage.outputs().len(), 1);
            assert_eq!(stage.operators().len(), 2);
        }
    }

    #[test]
    fn mixed_level_ancestors_are_copied() {
        // a feeds b directly and c through a gather; b joins c's level
        let mut g = OperatorGraph::new();
        let begin = g.add(OperatorSpec::marker(PlanMarker::Begin, ty()));
        let a = g.add(extract("a"));
        let gather = g.add(OperatorSpec::marker(PlanMarker::Gather, ty()));
        let join = g.add(
            OperatorSpec::user("join", UserOperatorKind::CoGroup)
                .input("left", ty())
                .input("right", ty())
                .output("out", ty()),
        );
        let end = g.add(OperatorSpec::marker(PlanMarker::End, ty()));
        g.connect(g.output(begin, 0).unwrap(), g.input(a, 0).unwrap()).unwrap();
        g.connect(g.output(a, 0).unwrap(), g.input(gather, 0).unwrap()).unwrap();
        g.connect(g.output(gather, 0).unwrap(), g.input(join, 0).unwrap()).unwrap();
        g.connect(g.output(a, 0).unwrap(), g.input(join, 1).unwrap()).unwrap();
        g.connect(g.output(join, 0).unwrap(), g.input(end, 0).unwrap()).unwrap();

        let detail = create_primitive_plan(&g).unwrap();
        let plan = detail.plan();
        assert_eq!(plan.len(), 2);
        assert_eq!(detail.copies_of(a).len(), 2);
        let order = plan.dependency_graph().topological_order().unwrap();
        assert_eq!(order.len(), 2);
        // the copy of `a` in the join stage does not feed the gather again
        let gather_writers: usize = plan
            .elements()
            .iter()
            .filter(|s| s.outputs().iter().any(|p| p.origins().contains(&gather)))
            .count();
        assert_eq!(gather_writers, 1);
    }
}
