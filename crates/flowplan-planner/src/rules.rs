//! Lightweight graph rewrites applied by the optimizer loop.
//!
//! A rewriter performs one pass over the graph; the caller repeats passes
//! until the graph stops changing (see [`crate::prepare::optimize`]).

use std::fmt::Debug;

use flowplan_core::config::PlanningOptions;
use flowplan_core::error::Result;
use flowplan_core::graph::OperatorGraph;
use flowplan_core::id::OperatorId;
use flowplan_core::operator::CoreOperatorKind;

use crate::cost::OperatorEstimator;

pub struct RewriteContext<'a> {
    pub estimator: &'a dyn OperatorEstimator,
    pub options: &'a PlanningOptions,
}

pub trait OperatorRewriter: Debug {
    fn perform(&self, context: &RewriteContext<'_>, graph: &mut OperatorGraph) -> Result<()>;
}

/// A single rewrite; reports whether it changed anything.
pub trait RewriteRule: Debug {
    fn name(&self) -> &'static str;
    fn apply(&self, context: &RewriteContext<'_>, graph: &mut OperatorGraph) -> Result<bool>;
}

#[derive(Debug, Default)]
pub struct RuleSet {
    rules: Vec<Box<dyn RewriteRule>>,
}

impl RuleSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, rule: impl RewriteRule + 'static) -> Self {
        self.rules.push(Box::new(rule));
        self
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }
}

impl OperatorRewriter for RuleSet {
    fn perform(&self, context: &RewriteContext<'_>, graph: &mut OperatorGraph) -> Result<()> {
        for rule in &self.rules {
            if rule.apply(context, graph)? {
                tracing::debug!(rule = rule.name(), "rewrite applied");
            }
        }
        Ok(())
    }
}

pub fn default_rules() -> RuleSet {
    RuleSet::new()
        .with(RemoveTrivialProjections)
        .with(CollapseCheckpoints)
}

/// Drops core projections that keep their data type unchanged.
#[derive(Debug, Clone, Copy, Default)]
pub struct RemoveTrivialProjections;

impl RewriteRule for RemoveTrivialProjections {
    fn name(&self) -> &'static str {
        "remove_trivial_projections"
    }

    fn apply(&self, _context: &RewriteContext<'_>, graph: &mut OperatorGraph) -> Result<bool> {
        let mut targets: Vec<OperatorId> = Vec::new();
        for op in graph.operators() {
            if !op.is_core(CoreOperatorKind::Project) || !op.arguments().is_empty() {
                continue;
            }
            if op.inputs().len() != 1 || op.outputs().len() != 1 {
                continue;
            }
            let input = graph.port(op.inputs()[0])?;
            let output = graph.port(op.outputs()[0])?;
            if input.data_type() == output.data_type() {
                targets.push(op.id());
            }
        }
        for id in &targets {
            graph.bypass(*id)?;
        }
        Ok(!targets.is_empty())
    }
}

/// Folds a core checkpoint that directly and exclusively follows another
/// core checkpoint.
#[derive(Debug, Clone, Copy, Default)]
pub struct CollapseCheckpoints;

impl RewriteRule for CollapseCheckpoints {
    fn name(&self) -> &'static str {
        "collapse_checkpoints"
    }

    fn apply(&self, _context: &RewriteContext<'_>, graph: &mut OperatorGraph) -> Result<bool> {
        let is_checkpoint =
            |g: &OperatorGraph, id: OperatorId| -> bool {
                g.get(id)
                    .map(|o| o.is_core(CoreOperatorKind::Checkpoint))
                    .unwrap_or(false)
            };
        let mut changed = false;
        for id in graph.operator_ids() {
            if !is_checkpoint(graph, id) {
                continue;
            }
            let preds = graph.predecessors(id);
            let Some(pred) = preds.iter().next().copied() else {
                continue;
            };
            if preds.len() != 1 || !is_checkpoint(graph, pred) {
                continue;
            }
            if graph.successors(pred).len() != 1 {
                continue;
            }
            graph.bypass(id)?;
            changed = true;
        }
        Ok(changed)
    }
}
