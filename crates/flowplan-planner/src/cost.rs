//! Coarse data-size estimation for planning decisions.
//!
//! Sizes start at external inputs (declared sizes or `SizeHint`s) and are
//! propagated downstream with fixed selectivity heuristics. In real
//! deployments these should come from statistics; unknown stays unknown.

use std::collections::BTreeMap;
use std::fmt::Debug;

use flowplan_core::graph::OperatorGraph;
use flowplan_core::id::PortId;
use flowplan_core::operator::{Operator, OperatorKind, PlanMarker, UserOperatorKind};
use serde::{Deserialize, Serialize};

/// Optional hints you can pass in when estimating sizes.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SizeHint {
    /// Bytes at external inputs (if known); keyed by input name.
    pub input_bytes: Vec<(String, u64)>,
}

/// Estimated bytes per output port.
#[derive(Debug, Clone, Default)]
pub struct Estimates {
    outputs: BTreeMap<PortId, f64>,
}

impl Estimates {
    pub fn output_size(&self, port: PortId) -> Option<f64> {
        self.outputs.get(&port).copied()
    }

    /// Sum over the producers of an input port. `None` if any producer is
    /// unknown or the port is unconnected.
    pub fn input_size(&self, graph: &OperatorGraph, port: PortId) -> Option<f64> {
        let ups = graph.opposites(port);
        if ups.is_empty() {
            return None;
        }
        ups.iter().map(|p| self.output_size(*p)).sum()
    }

    pub fn set_output(&mut self, port: PortId, bytes: f64) {
        self.outputs.insert(port, bytes);
    }

    pub fn len(&self) -> usize {
        self.outputs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.outputs.is_empty()
    }
}

pub trait OperatorEstimator: Debug {
    fn estimate(&self, graph: &OperatorGraph) -> Estimates;
}

/// Estimator that knows nothing; every size is unknown.
#[derive(Debug, Clone, Copy, Default)]
pub struct NullEstimator;

impl OperatorEstimator for NullEstimator {
    fn estimate(&self, _graph: &OperatorGraph) -> Estimates {
        Estimates::default()
    }
}

#[derive(Debug, Clone, Default)]
pub struct BasicEstimator {
    hint: SizeHint,
}

impl BasicEstimator {
    pub fn new(hint: SizeHint) -> Self {
        Self { hint }
    }

    fn external_size(&self, name: &str, declared: Option<u64>) -> Option<f64> {
        declared
            .or_else(|| {
                self.hint
                    .input_bytes
                    .iter()
                    .find(|(n, _)| n == name)
                    .map(|(_, b)| *b)
            })
            .map(|b| b as f64)
    }

    fn output_estimate(
        &self,
        graph: &OperatorGraph,
        estimates: &Estimates,
        op: &Operator,
    ) -> Option<f64> {
        let total = || -> Option<f64> {
            op.inputs()
                .iter()
                .map(|p| estimates.input_size(graph, *p))
                .sum()
        };
        match op.kind() {
            OperatorKind::Marker(PlanMarker::Begin) => Some(0.0),
            OperatorKind::Marker(_) | OperatorKind::Core(_) => total(),
            OperatorKind::Input(input) => self.external_size(&input.name, input.estimated_size),
            OperatorKind::Output(_) => Some(0.0),
            OperatorKind::User(user) => match user.kind {
                UserOperatorKind::Fold | UserOperatorKind::Summarize => {
                    let keys = op
                        .inputs()
                        .first()
                        .and_then(|p| graph.get_port(*p))
                        .and_then(|p| p.group())
                        .map(|g| g.keys.len())
                        .unwrap_or(0);
                    let width = op
                        .outputs()
                        .first()
                        .and_then(|p| graph.get_port(*p))
                        .map(|p| p.data_type().record_width_hint() as f64)
                        .unwrap_or(1.0);
                    total().map(|t| aggregate_bytes(t, keys, width))
                }
                kind if kind.is_master_join() => op
                    .inputs()
                    .get(1)
                    .and_then(|p| estimates.input_size(graph, *p))
                    .or_else(total),
                _ => total(),
            },
        }
    }
}

impl OperatorEstimator for BasicEstimator {
    fn estimate(&self, graph: &OperatorGraph) -> Estimates {
        // cyclic graphs are rejected later; estimate what can be estimated
        let order = graph
            .dependency_graph()
            .topological_order()
            .unwrap_or_else(|_| graph.operator_ids());
        let mut estimates = Estimates::default();
        for id in order {
            let Some(op) = graph.get(id) else { continue };
            if let Some(bytes) = self.output_estimate(graph, &estimates, op) {
                for port in op.outputs() {
                    estimates.set_output(*port, bytes);
                }
            }
        }
        estimates
    }
}

/// Output bytes of an aggregation over `input_bytes`.
fn aggregate_bytes(input_bytes: f64, num_group_keys: usize, record_width: f64) -> f64 {
    if num_group_keys == 0 {
        // No group by: single record
        return record_width.min(input_bytes);
    }
    // More keys → more groups, but with diminishing returns
    let cardinality_factor = match num_group_keys {
        1 => 0.1,
        2 => 0.25,
        3 => 0.4,
        _ => 0.5,
    };
    (input_bytes * cardinality_factor).max(record_width.min(input_bytes))
}
