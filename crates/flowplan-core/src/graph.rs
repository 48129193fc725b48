//! Arena-backed operator graph.
//!
//! Operators and ports live in id-keyed maps; edges are `(output, input)`
//! port pairs indexed in both directions. Every structural mutation goes
//! through this type so the adjacency indexes never disagree.

use std::collections::{BTreeMap, BTreeSet, VecDeque};

use crate::depgraph::DependencyGraph;
use crate::error::{Error, Result};
use crate::hash::{hash_u64s, Hash256};
use crate::id::{IdCounter, OperatorId, PortId, SerialNumber};
use crate::operator::{Operator, OperatorSpec, Port, PortDirection, PortSpec};

#[derive(Debug, Clone, Default)]
pub struct OperatorGraph {
    operators: BTreeMap<OperatorId, Operator>,
    ports: BTreeMap<PortId, Port>,
    /// output port -> connected input ports
    downstream: BTreeMap<PortId, BTreeSet<PortId>>,
    /// input port -> connected output ports
    upstream: BTreeMap<PortId, BTreeSet<PortId>>,
    operator_ids: IdCounter,
    port_ids: IdCounter,
    serials: IdCounter,
}

/// Structural fingerprint of a graph: operator ids and edges.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Snapshot {
    operators: BTreeSet<OperatorId>,
    edges: BTreeSet<(PortId, PortId)>,
}

impl Snapshot {
    pub fn operator_count(&self) -> usize {
        self.operators.len()
    }

    pub fn edge_count(&self) -> usize {
        self.edges.len()
    }

    pub fn fingerprint(&self) -> Hash256 {
        hash_u64s(
            self.operators
                .iter()
                .map(|o| o.get())
                .chain(std::iter::once(u64::MAX))
                .chain(self.edges.iter().flat_map(|(u, d)| [u.get(), d.get()])),
        )
    }
}

impl OperatorGraph {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.operators.len()
    }

    pub fn is_empty(&self) -> bool {
        self.operators.is_empty()
    }

    /// Adds an operator built from `spec` and returns its id.
    pub fn add(&mut self, spec: OperatorSpec) -> OperatorId {
        let id = OperatorId::new(self.operator_ids.next());
        let serial = match spec.serial {
            Some(serial) => {
                self.serials.observe(serial.get());
                serial
            }
            None => SerialNumber::new(self.serials.next()),
        };
        let inputs = spec
            .inputs
            .into_iter()
            .map(|p| self.add_port(id, PortDirection::Input, p))
            .collect();
        let outputs = spec
            .outputs
            .into_iter()
            .map(|p| self.add_port(id, PortDirection::Output, p))
            .collect();
        self.operators.insert(
            id,
            Operator {
                id,
                serial,
                kind: spec.kind,
                inputs,
                outputs,
                arguments: spec.arguments,
                attributes: spec.attributes,
            },
        );
        id
    }

    fn add_port(&mut self, owner: OperatorId, direction: PortDirection, spec: PortSpec) -> PortId {
        let id = PortId::new(self.port_ids.next());
        self.ports.insert(
            id,
            Port {
                id,
                owner,
                direction,
                name: spec.name,
                data_type: spec.data_type,
                group: spec.group,
                unit: spec.unit,
            },
        );
        id
    }

    /// Removes an operator together with its ports and edges.
    pub fn remove(&mut self, id: OperatorId) -> Result<Operator> {
        let op = self
            .operators
            .remove(&id)
            .ok_or_else(|| Error::Graph(format!("unknown operator {id}")))?;
        for port in op.inputs.iter().chain(op.outputs.iter()) {
            self.disconnect_all(*port);
            self.ports.remove(port);
        }
        Ok(op)
    }

    pub fn contains(&self, id: OperatorId) -> bool {
        self.operators.contains_key(&id)
    }

    pub fn get(&self, id: OperatorId) -> Option<&Operator> {
        self.operators.get(&id)
    }

    pub fn operator(&self, id: OperatorId) -> Result<&Operator> {
        self.operators
            .get(&id)
            .ok_or_else(|| Error::Graph(format!("unknown operator {id}")))
    }

    pub fn operator_mut(&mut self, id: OperatorId) -> Result<&mut Operator> {
        self.operators
            .get_mut(&id)
            .ok_or_else(|| Error::Graph(format!("unknown operator {id}")))
    }

    /// Operators in id order.
    pub fn operators(&self) -> impl Iterator<Item = &Operator> {
        self.operators.values()
    }

    pub fn operator_ids(&self) -> Vec<OperatorId> {
        self.operators.keys().copied().collect()
    }

    pub fn get_port(&self, id: PortId) -> Option<&Port> {
        self.ports.get(&id)
    }

    pub fn port(&self, id: PortId) -> Result<&Port> {
        self.ports
            .get(&id)
            .ok_or_else(|| Error::Graph(format!("unknown port {id}")))
    }

    /// Owner operator of a port.
    pub fn owner(&self, port: PortId) -> Result<&Operator> {
        let owner = self.port(port)?.owner;
        self.operator(owner)
    }

    pub fn input(&self, op: OperatorId, index: usize) -> Result<PortId> {
        self.operator(op)?
            .inputs
            .get(index)
            .copied()
            .ok_or_else(|| Error::Graph(format!("{op} has no input #{index}")))
    }

    pub fn output(&self, op: OperatorId, index: usize) -> Result<PortId> {
        self.operator(op)?
            .outputs
            .get(index)
            .copied()
            .ok_or_else(|| Error::Graph(format!("{op} has no output #{index}")))
    }

    pub fn input_named(&self, op: OperatorId, name: &str) -> Result<PortId> {
        let operator = self.operator(op)?;
        operator
            .inputs
            .iter()
            .copied()
            .find(|p| self.ports.get(p).map(|p| p.name.as_str()) == Some(name))
            .ok_or_else(|| Error::Graph(format!("{} has no input named {name}", operator.label())))
    }

    pub fn output_named(&self, op: OperatorId, name: &str) -> Result<PortId> {
        let operator = self.operator(op)?;
        operator
            .outputs
            .iter()
            .copied()
            .find(|p| self.ports.get(p).map(|p| p.name.as_str()) == Some(name))
            .ok_or_else(|| {
                Error::Graph(format!("{} has no output named {name}", operator.label()))
            })
    }

    /// Connects an output port to an input port. Connecting twice is a no-op.
    pub fn connect(&mut self, upstream: PortId, downstream: PortId) -> Result<()> {
        let up = self.port(upstream)?;
        let down = self.port(downstream)?;
        if up.direction != PortDirection::Output || down.direction != PortDirection::Input {
            return Err(Error::Graph(format!(
                "edge must run from an output to an input: {upstream} -> {downstream}"
            )));
        }
        self.downstream.entry(upstream).or_default().insert(downstream);
        self.upstream.entry(downstream).or_default().insert(upstream);
        Ok(())
    }

    /// Removes a single edge; returns whether it existed.
    pub fn disconnect(&mut self, upstream: PortId, downstream: PortId) -> bool {
        let removed = self
            .downstream
            .get_mut(&upstream)
            .map(|s| s.remove(&downstream))
            .unwrap_or(false);
        if let Some(s) = self.upstream.get_mut(&downstream) {
            s.remove(&upstream);
        }
        removed
    }

    /// Removes every edge touching `port`.
    pub fn disconnect_all(&mut self, port: PortId) {
        for other in self.opposites(port) {
            self.disconnect(port, other);
            self.disconnect(other, port);
        }
    }

    /// Ports connected to `port`: producers of an input, consumers of an output.
    pub fn opposites(&self, port: PortId) -> Vec<PortId> {
        let index = match self.ports.get(&port).map(|p| p.direction) {
            Some(PortDirection::Input) => &self.upstream,
            Some(PortDirection::Output) => &self.downstream,
            None => return Vec::new(),
        };
        index
            .get(&port)
            .map(|s| s.iter().copied().collect())
            .unwrap_or_default()
    }

    pub fn is_connected(&self, port: PortId) -> bool {
        !self.opposites(port).is_empty()
    }

    /// Owners of the ports connected to `port`.
    pub fn opposite_operators(&self, port: PortId) -> BTreeSet<OperatorId> {
        self.opposites(port)
            .into_iter()
            .filter_map(|p| self.ports.get(&p).map(|p| p.owner))
            .collect()
    }

    pub fn predecessors(&self, op: OperatorId) -> BTreeSet<OperatorId> {
        self.operators
            .get(&op)
            .map(|o| {
                o.inputs
                    .iter()
                    .flat_map(|p| self.opposite_operators(*p))
                    .collect()
            })
            .unwrap_or_default()
    }

    pub fn successors(&self, op: OperatorId) -> BTreeSet<OperatorId> {
        self.operators
            .get(&op)
            .map(|o| {
                o.outputs
                    .iter()
                    .flat_map(|p| self.opposite_operators(*p))
                    .collect()
            })
            .unwrap_or_default()
    }

    /// All edges as `(output, input)` pairs, ordered.
    pub fn edges(&self) -> Vec<(PortId, PortId)> {
        self.downstream
            .iter()
            .flat_map(|(up, downs)| downs.iter().map(move |d| (*up, *d)))
            .collect()
    }

    /// Moves every producer of `input` onto a new single-port operator that
    /// then feeds `input`.
    pub fn insert_before(&mut self, input: PortId, spec: OperatorSpec) -> Result<OperatorId> {
        require_pass_through(&spec)?;
        if self.port(input)?.direction != PortDirection::Input {
            return Err(Error::Graph(format!("{input} is not an input port")));
        }
        let id = self.add(spec);
        let (new_in, new_out) = (self.input(id, 0)?, self.output(id, 0)?);
        for up in self.opposites(input) {
            self.disconnect(up, input);
            self.connect(up, new_in)?;
        }
        self.connect(new_out, input)?;
        Ok(id)
    }

    /// Moves every consumer of `output` behind a new single-port operator.
    pub fn insert_after(&mut self, output: PortId, spec: OperatorSpec) -> Result<OperatorId> {
        require_pass_through(&spec)?;
        if self.port(output)?.direction != PortDirection::Output {
            return Err(Error::Graph(format!("{output} is not an output port")));
        }
        let id = self.add(spec);
        let (new_in, new_out) = (self.input(id, 0)?, self.output(id, 0)?);
        for down in self.opposites(output) {
            self.disconnect(output, down);
            self.connect(new_out, down)?;
        }
        self.connect(output, new_in)?;
        Ok(id)
    }

    /// Removes a single-input single-output operator, wiring its producers
    /// directly to its consumers.
    pub fn bypass(&mut self, op: OperatorId) -> Result<()> {
        let operator = self.operator(op)?;
        if operator.inputs.len() != 1 || operator.outputs.len() != 1 {
            return Err(Error::Graph(format!(
                "cannot bypass {}: not a pass-through operator",
                operator.label()
            )));
        }
        let ups = self.opposites(operator.inputs[0]);
        let downs = self.opposites(operator.outputs[0]);
        self.remove(op)?;
        for up in &ups {
            for down in &downs {
                self.connect(*up, *down)?;
            }
        }
        Ok(())
    }

    /// Blueprint of an existing operator, serial included.
    pub fn to_spec(&self, op: OperatorId) -> Result<OperatorSpec> {
        let operator = self.operator(op)?;
        let ports = |ids: &[PortId]| -> Result<Vec<PortSpec>> {
            ids.iter()
                .map(|p| self.port(*p).map(|port| port.to_spec()))
                .collect()
        };
        Ok(OperatorSpec {
            kind: operator.kind.clone(),
            inputs: ports(&operator.inputs)?,
            outputs: ports(&operator.outputs)?,
            arguments: operator.arguments.clone(),
            attributes: operator.attributes.clone(),
            serial: Some(operator.serial),
        })
    }

    /// Replaces `op` with a modified copy. Edges are carried over port by
    /// port, so `edit` must keep the number of inputs and outputs.
    pub fn rebuild(
        &mut self,
        op: OperatorId,
        edit: impl FnOnce(&mut OperatorSpec),
    ) -> Result<OperatorId> {
        let mut spec = self.to_spec(op)?;
        edit(&mut spec);
        let old = self.operator(op)?;
        if spec.inputs.len() != old.inputs.len() || spec.outputs.len() != old.outputs.len() {
            return Err(Error::Graph(format!(
                "rebuilding {} must keep its port layout",
                old.label()
            )));
        }
        let old_inputs = old.inputs.clone();
        let old_outputs = old.outputs.clone();
        let id = self.add(spec);
        let (new_inputs, new_outputs) = {
            let new = self.operator(id)?;
            (new.inputs.clone(), new.outputs.clone())
        };
        for (old_port, new_port) in old_inputs.iter().zip(&new_inputs) {
            for up in self.opposites(*old_port) {
                self.connect(up, *new_port)?;
            }
        }
        for (old_port, new_port) in old_outputs.iter().zip(&new_outputs) {
            for down in self.opposites(*old_port) {
                self.connect(*new_port, down)?;
            }
        }
        self.remove(op)?;
        Ok(id)
    }

    pub fn snapshot(&self) -> Snapshot {
        Snapshot {
            operators: self.operators.keys().copied().collect(),
            edges: self.edges().into_iter().collect(),
        }
    }

    /// Copies `members` into a fresh graph. An edge between two members is
    /// copied when `keep_edge(upstream_op, downstream_op)` holds.
    ///
    /// Returns the copy and a map from copied operator ids to original ids.
    pub fn copy_of(
        &self,
        members: &BTreeSet<OperatorId>,
        keep_edge: impl Fn(OperatorId, OperatorId) -> bool,
    ) -> Result<(OperatorGraph, BTreeMap<OperatorId, OperatorId>)> {
        let mut copy = OperatorGraph::new();
        copy.serials = IdCounter::starting_at(self.serials.peek());
        let mut to_copy = BTreeMap::new();
        let mut to_original = BTreeMap::new();
        let mut port_map = BTreeMap::new();
        for id in members {
            let original = self.operator(*id)?;
            let new_id = copy.add(self.to_spec(*id)?);
            let created = copy.operator(new_id)?;
            for (a, b) in original
                .inputs
                .iter()
                .chain(original.outputs.iter())
                .zip(created.inputs.iter().chain(created.outputs.iter()))
            {
                port_map.insert(*a, *b);
            }
            to_copy.insert(*id, new_id);
            to_original.insert(new_id, *id);
        }
        for (up, down) in self.edges() {
            let (Some(up_copy), Some(down_copy)) = (port_map.get(&up), port_map.get(&down)) else {
                continue;
            };
            let up_owner = self.port(up)?.owner;
            let down_owner = self.port(down)?.owner;
            if keep_edge(up_owner, down_owner) {
                copy.connect(*up_copy, *down_copy)?;
            }
        }
        Ok((copy, to_original))
    }

    /// Operator-level dependency graph: each operator depends on its predecessors.
    pub fn dependency_graph(&self) -> DependencyGraph<OperatorId> {
        let mut deps = DependencyGraph::new();
        for id in self.operators.keys() {
            deps.add_vertex(*id);
            for pred in self.predecessors(*id) {
                deps.add_edge(*id, pred);
            }
        }
        deps
    }

    /// Operators reachable upstream from `start` (exclusive), walking only
    /// through operators accepted by `pass`. Rejected operators are neither
    /// returned nor traversed.
    pub fn ancestors_where(
        &self,
        start: OperatorId,
        pass: impl Fn(&Operator) -> bool,
    ) -> BTreeSet<OperatorId> {
        let mut seen = BTreeSet::new();
        let mut queue: VecDeque<OperatorId> = VecDeque::from([start]);
        while let Some(current) = queue.pop_front() {
            for pred in self.predecessors(current) {
                if pred == start || seen.contains(&pred) {
                    continue;
                }
                if self.operators.get(&pred).map(&pass).unwrap_or(false) {
                    seen.insert(pred);
                    queue.push_back(pred);
                }
            }
        }
        seen
    }
}

fn require_pass_through(spec: &OperatorSpec) -> Result<()> {
    if spec.inputs.len() != 1 || spec.outputs.len() != 1 {
        return Err(Error::Graph(format!(
            "{} must have exactly one input and one output to be inserted on an edge",
            spec.kind
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::operator::{PlanMarker, UserOperatorKind};
    use crate::schema::DataType;

    fn ty() -> DataType {
        DataType::named("Row")
    }

    fn chain() -> (OperatorGraph, OperatorId, OperatorId) {
        let mut g = OperatorGraph::new();
        let a = g.add(OperatorSpec::user("a", UserOperatorKind::Extract).output("out", ty()));
        let b = g.add(OperatorSpec::user("b", UserOperatorKind::Extract).input("in", ty()));
        let (out, inp) = (g.output(a, 0).unwrap(), g.input(b, 0).unwrap());
        g.connect(out, inp).unwrap();
        (g, a, b)
    }

    #[test]
    fn connect_rejects_wrong_direction() {
        let (mut g, a, b) = chain();
        let out = g.output(a, 0).unwrap();
        let inp = g.input(b, 0).unwrap();
        assert!(g.connect(inp, out).is_err());
    }

    #[test]
    fn insert_before_moves_producers() {
        let (mut g, a, b) = chain();
        let inp = g.input(b, 0).unwrap();
        let m = g
            .insert_before(inp, OperatorSpec::marker(PlanMarker::Gather, ty()))
            .unwrap();
        assert_eq!(g.predecessors(b), BTreeSet::from([m]));
        assert_eq!(g.predecessors(m), BTreeSet::from([a]));
        assert_eq!(g.successors(a), BTreeSet::from([m]));
    }

    #[test]
    fn rebuild_keeps_serial_and_edges() {
        let (mut g, a, b) = chain();
        let serial = g.operator(b).unwrap().serial();
        let rebuilt = g
            .rebuild(b, |spec| spec.inputs[0].unit = Some(crate::operator::InputUnit::Group))
            .unwrap();
        assert_ne!(rebuilt, b);
        assert!(!g.contains(b));
        let op = g.operator(rebuilt).unwrap();
        assert_eq!(op.serial(), serial);
        assert_eq!(g.predecessors(rebuilt), BTreeSet::from([a]));
    }

    #[test]
    fn bypass_rewires_around_operator() {
        let (mut g, a, b) = chain();
        let inp = g.input(b, 0).unwrap();
        let m = g
            .insert_before(inp, OperatorSpec::marker(PlanMarker::Checkpoint, ty()))
            .unwrap();
        g.bypass(m).unwrap();
        assert_eq!(g.predecessors(b), BTreeSet::from([a]));
        assert_eq!(g.len(), 2);
    }

    #[test]
    fn snapshots_detect_changes() {
        let (mut g, a, b) = chain();
        let before = g.snapshot();
        assert_eq!(before, g.snapshot());
        let (out, inp) = (g.output(a, 0).unwrap(), g.input(b, 0).unwrap());
        g.disconnect(out, inp);
        let after = g.snapshot();
        assert_ne!(before, after);
        assert_ne!(before.fingerprint(), after.fingerprint());
    }

    #[test]
    fn copy_preserves_serials_and_filters_edges() {
        let (g, a, b) = chain();
        let members = BTreeSet::from([a, b]);
        let (copy, origin) = g.copy_of(&members, |_, _| false).unwrap();
        assert_eq!(copy.len(), 2);
        assert!(copy.edges().is_empty());
        for (new_id, old_id) in &origin {
            assert_eq!(
                copy.operator(*new_id).unwrap().serial(),
                g.operator(*old_id).unwrap().serial()
            );
        }
        let (copy, _) = g.copy_of(&members, |_, _| true).unwrap();
        assert_eq!(copy.edges().len(), 1);
    }
}
