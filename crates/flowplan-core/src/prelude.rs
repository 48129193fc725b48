//! Convenient re-exports for downstream crates.

pub use crate::attr::{Attribute, AttributeMap};
pub use crate::config::{DataSize, PlannerConfig, PlanningOption, PlanningOptions, SizeLimits};
pub use crate::depgraph::{DependencyGraph, GraphStatistics};
pub use crate::error::{Diagnostic, Error, Result};
pub use crate::graph::{OperatorGraph, Snapshot};
pub use crate::hash::Hash256;
pub use crate::id::{OperatorId, PlanPortId, PortId, SerialNumber, SubPlanId};
pub use crate::manifest::{ManifestId, PlanManifest};
pub use crate::operator::{
    Argument, ArgumentValue, CoreOperatorKind, ExternalInput, ExternalOutput, InputUnit, Operator,
    OperatorKind, OperatorSpec, PlanMarker, Port, PortDirection, PortSpec, UserOperator,
    UserOperatorKind,
};
pub use crate::schema::{DataType, Field, FieldType, Group, SortKey};
