//! flowplan: turns logical operator graphs into staged execution plans.
//!
//! This facade re-exports the workspace crates so integration tests and
//! benchmarks can depend on a single package.

pub use flowplan_core as core;
pub use flowplan_planner as planner;
