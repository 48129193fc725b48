//! Analyzers attaching derived metadata to a finished plan.

pub mod core;
pub mod iterative;
pub mod naming;
pub mod parameter;
pub mod size;
pub mod stats;

pub use self::core::{
    BroadcastInfo, DriverType, InputType, OutputType, SubPlanAnalyzer, SubPlanInfo,
    SubPlanInputInfo, SubPlanOutputInfo,
};
pub use iterative::IterativeInfo;
pub use naming::NameInfo;
pub use parameter::ParameterInfo;
pub use size::{PartitionGroupAnalyzer, PartitionGroupInfo, PlanEstimator, SizeInfo};
pub use stats::PlanStatistics;
