//! Everything a planning run needs besides the graph itself.

use flowplan_core::config::{PlannerConfig, PlanningOption, PlanningOptions};

use crate::classify::{BasicClassifier, OperatorClassifier};
use crate::cost::{BasicEstimator, OperatorEstimator, SizeHint};
use crate::rules::{default_rules, OperatorRewriter};

/// Upper bound of optimization and cycle-breaking iterations.
pub const REDUCTION_STEP_LIMIT: usize = 1000;

#[derive(Debug)]
pub struct PlanningContext {
    config: PlannerConfig,
    estimator: Box<dyn OperatorEstimator>,
    classifier: Box<dyn OperatorClassifier>,
    rewriter: Box<dyn OperatorRewriter>,
    step_limit: usize,
}

impl Default for PlanningContext {
    fn default() -> Self {
        Self::new(PlannerConfig::default())
    }
}

impl PlanningContext {
    /// Context with the basic estimator, classifier and rule set.
    pub fn new(config: PlannerConfig) -> Self {
        let classifier = BasicClassifier::new(config.broadcast_limit_bytes);
        Self {
            config,
            estimator: Box::new(BasicEstimator::new(SizeHint::default())),
            classifier: Box::new(classifier),
            rewriter: Box::new(default_rules()),
            step_limit: REDUCTION_STEP_LIMIT,
        }
    }

    pub fn with_estimator(mut self, estimator: impl OperatorEstimator + 'static) -> Self {
        self.estimator = Box::new(estimator);
        self
    }

    pub fn with_classifier(mut self, classifier: impl OperatorClassifier + 'static) -> Self {
        self.classifier = Box::new(classifier);
        self
    }

    pub fn with_rewriter(mut self, rewriter: impl OperatorRewriter + 'static) -> Self {
        self.rewriter = Box::new(rewriter);
        self
    }

    /// Overrides the iteration ceiling; mainly for tests.
    pub fn with_step_limit(mut self, limit: usize) -> Self {
        self.step_limit = limit;
        self
    }

    pub fn config(&self) -> &PlannerConfig {
        &self.config
    }

    pub fn options(&self) -> &PlanningOptions {
        &self.config.options
    }

    pub fn is_enabled(&self, option: PlanningOption) -> bool {
        let enabled = self.config.options.is_enabled(option);
        tracing::trace!(option = %option, enabled, "planning option");
        enabled
    }

    pub fn estimator(&self) -> &dyn OperatorEstimator {
        self.estimator.as_ref()
    }

    pub fn classifier(&self) -> &dyn OperatorClassifier {
        self.classifier.as_ref()
    }

    pub fn rewriter(&self) -> &dyn OperatorRewriter {
        self.rewriter.as_ref()
    }

    pub fn step_limit(&self) -> usize {
        self.step_limit
    }
}

/// Result of a bounded fixed-point loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReductionOutcome {
    /// Iterations that changed the graph.
    pub steps: usize,
    /// `false` when the loop stopped at the step limit.
    pub converged: bool,
}
