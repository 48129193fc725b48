//! Generic dependency graph over copyable keys.
//!
//! An edge `a -> b` means "a depends on b" (b is upstream of a). Used for
//! operator graphs and for stage graphs alike.

use std::cmp::Reverse;
use std::collections::{BTreeMap, BTreeSet, BinaryHeap};
use std::fmt::Debug;
use std::hash::Hash;

use petgraph::algo::tarjan_scc;
use petgraph::graph::{DiGraph, NodeIndex};
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

#[derive(Debug, Clone)]
pub struct DependencyGraph<K: Ord + Copy> {
    deps: BTreeMap<K, BTreeSet<K>>,
}

impl<K: Ord + Copy> Default for DependencyGraph<K> {
    fn default() -> Self {
        Self {
            deps: BTreeMap::new(),
        }
    }
}

/// Shape summary of a graph.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GraphStatistics {
    pub vertices: usize,
    pub edges: usize,
    /// Vertices without dependencies.
    pub sources: usize,
    /// Vertices nothing depends on.
    pub sinks: usize,
    pub max_fan_in: usize,
    pub max_fan_out: usize,
    /// Vertices on the longest dependency chain; zero when cyclic.
    pub critical_path: usize,
}

impl<K: Ord + Copy + Hash + Debug> DependencyGraph<K> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_vertex(&mut self, v: K) {
        self.deps.entry(v).or_default();
    }

    pub fn add_edge(&mut self, dependent: K, dependency: K) {
        self.add_vertex(dependency);
        self.deps.entry(dependent).or_default().insert(dependency);
    }

    pub fn contains(&self, v: K) -> bool {
        self.deps.contains_key(&v)
    }

    pub fn vertices(&self) -> impl Iterator<Item = K> + '_ {
        self.deps.keys().copied()
    }

    /// Direct dependencies of `v`.
    pub fn connected(&self, v: K) -> impl Iterator<Item = K> + '_ {
        self.deps.get(&v).into_iter().flat_map(|s| s.iter().copied())
    }

    pub fn edge_count(&self) -> usize {
        self.deps.values().map(BTreeSet::len).sum()
    }

    fn dependents(&self) -> BTreeMap<K, BTreeSet<K>> {
        let mut out: BTreeMap<K, BTreeSet<K>> =
            self.deps.keys().map(|k| (*k, BTreeSet::new())).collect();
        for (dependent, deps) in &self.deps {
            for dep in deps {
                out.entry(*dep).or_default().insert(*dependent);
            }
        }
        out
    }

    /// Strongly connected circuits: components with more than one vertex,
    /// plus self-loops. Empty for a DAG.
    pub fn find_circuits(&self) -> Vec<BTreeSet<K>> {
        let mut graph: DiGraph<K, ()> = DiGraph::new();
        let mut index: BTreeMap<K, NodeIndex> = BTreeMap::new();
        for v in self.deps.keys() {
            index.insert(*v, graph.add_node(*v));
        }
        for (dependent, deps) in &self.deps {
            for dep in deps {
                graph.add_edge(index[dependent], index[dep], ());
            }
        }
        let mut circuits: Vec<BTreeSet<K>> = tarjan_scc(&graph)
            .into_iter()
            .filter(|scc| {
                scc.len() > 1 || scc.iter().any(|n| graph.contains_edge(*n, *n))
            })
            .map(|scc| scc.into_iter().map(|n| graph[n]).collect())
            .collect();
        circuits.sort();
        circuits
    }

    /// Vertices with dependencies first; ties broken by key order.
    pub fn topological_order(&self) -> Result<Vec<K>> {
        self.topological_order_by(|k| k)
    }

    /// Kahn's algorithm, releasing ready vertices in ascending `rank` order.
    pub fn topological_order_by<R: Ord>(&self, rank: impl Fn(K) -> R) -> Result<Vec<K>> {
        let dependents = self.dependents();
        let mut pending: BTreeMap<K, usize> =
            self.deps.iter().map(|(k, d)| (*k, d.len())).collect();
        let mut ready: BinaryHeap<Reverse<(R, K)>> = pending
            .iter()
            .filter(|(_, n)| **n == 0)
            .map(|(k, _)| Reverse((rank(*k), *k)))
            .collect();
        let mut order = Vec::with_capacity(self.deps.len());
        while let Some(Reverse((_, v))) = ready.pop() {
            order.push(v);
            for dependent in dependents.get(&v).into_iter().flatten() {
                if let Some(n) = pending.get_mut(dependent) {
                    *n -= 1;
                    if *n == 0 {
                        ready.push(Reverse((rank(*dependent), *dependent)));
                    }
                }
            }
        }
        if order.len() != self.deps.len() {
            return Err(Error::Invariant(format!(
                "dependency graph is cyclic: {:?}",
                self.find_circuits()
            )));
        }
        Ok(order)
    }

    pub fn statistics(&self) -> GraphStatistics {
        let dependents = self.dependents();
        let critical_path = self
            .topological_order()
            .map(|order| {
                let mut depth: BTreeMap<K, usize> = BTreeMap::new();
                for v in order {
                    let d = self
                        .connected(v)
                        .filter_map(|u| depth.get(&u).copied())
                        .max()
                        .unwrap_or(0)
                        + 1;
                    depth.insert(v, d);
                }
                depth.values().copied().max().unwrap_or(0)
            })
            .unwrap_or(0);
        GraphStatistics {
            vertices: self.deps.len(),
            edges: self.edge_count(),
            sources: self.deps.values().filter(|d| d.is_empty()).count(),
            sinks: dependents.values().filter(|d| d.is_empty()).count(),
            max_fan_in: self.deps.values().map(BTreeSet::len).max().unwrap_or(0),
            max_fan_out: dependents.values().map(BTreeSet::len).max().unwrap_or(0),
            critical_path,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dag_has_no_circuits() {
        let mut g = DependencyGraph::new();
        g.add_edge(2u32, 1);
        g.add_edge(3, 2);
        g.add_edge(3, 1);
        assert!(g.find_circuits().is_empty());
        assert_eq!(g.topological_order().unwrap(), vec![1, 2, 3]);
    }

    #[test]
    fn reports_each_circuit() {
        let mut g = DependencyGraph::new();
        g.add_edge(1u32, 2);
        g.add_edge(2, 1);
        g.add_edge(3, 3);
        g.add_edge(4, 1);
        let circuits = g.find_circuits();
        assert_eq!(
            circuits,
            vec![BTreeSet::from([1, 2]), BTreeSet::from([3])]
        );
        assert!(g.topological_order().is_err());
    }

    #[test]
    fn rank_breaks_ties() {
        let mut g = DependencyGraph::new();
        g.add_vertex(1u32);
        g.add_vertex(2);
        g.add_vertex(3);
        let order = g.topological_order_by(|k| Reverse(k)).unwrap();
        assert_eq!(order, vec![3, 2, 1]);
    }

    #[test]
    fn statistics_of_diamond() {
        let mut g = DependencyGraph::new();
        g.add_edge('b', 'a');
        g.add_edge('c', 'a');
        g.add_edge('d', 'b');
        g.add_edge('d', 'c');
        let stats = g.statistics();
        assert_eq!(stats.vertices, 4);
        assert_eq!(stats.edges, 4);
        assert_eq!(stats.sources, 1);
        assert_eq!(stats.sinks, 1);
        assert_eq!(stats.max_fan_in, 2);
        assert_eq!(stats.max_fan_out, 2);
        assert_eq!(stats.critical_path, 3);
    }
}
