#![forbid(unsafe_code)]
//! flowplan-planner: operator graph → staged execution plan.
//!
//! Pipeline:
//! - `prepare`: normalize, optimize with the context's rewriter, rebuild
//!   operators (`fixer`), insert stage boundary markers (`markers`) and
//!   validate acyclicity
//! - `primitive`: cut the prepared graph into the smallest stages
//! - `grouping` + `assemble`: merge compatible stages and unify their ports
//! - `decorate`: attach stage roles, names, sizes and statistics (`analyze`)
//!
//! `info` turns a decorated plan into a serializable description; `dsl`
//! reads graphs from YAML documents.

pub mod analyze;
pub mod assemble;
pub mod classify;
pub mod context;
pub mod cost;
pub mod decorate;
pub mod dsl;
pub mod equivalence;
pub mod fixer;
pub mod grouping;
pub mod info;
pub mod markers;
pub mod normalize;
pub mod plan;
pub mod planning;
pub mod prepare;
pub mod primitive;
pub mod rules;

pub use assemble::{start_assemble_plan, PlanAssembler};
pub use context::{PlanningContext, ReductionOutcome, REDUCTION_STEP_LIMIT};
pub use cost::{BasicEstimator, OperatorEstimator, SizeHint};
pub use dsl::yaml::parse_yaml_graph;
pub use dsl::DslError;
pub use equivalence::{CustomEquivalence, DefaultEquivalence, OperatorEquivalence};
pub use info::{save_info, to_info, DataExchange, PlanGraphInfo};
pub use markers::EdgeInfo;
pub use plan::{Plan, PlanDetail, PortRef, SubPlan, SubPlanPort};
pub use planning::{create_plan, plan, plan_copy};
pub use prepare::{prepare_operator_graph, PreparationReport};
pub use rules::{default_rules, OperatorRewriter, RewriteRule, RuleSet};
