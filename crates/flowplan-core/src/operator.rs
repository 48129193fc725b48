//! Operators and ports of a logical dataflow graph.
//!
//! Operators are created from an [`OperatorSpec`] by
//! [`OperatorGraph::add`](crate::graph::OperatorGraph::add), which assigns
//! graph-local ids to the operator and every port.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::attr::{Attribute, AttributeMap};
use crate::id::{OperatorId, PortId, SerialNumber};
use crate::schema::{DataType, Group};

/// Activation ports of external inputs/outputs.
pub const ACTIVATION_PORT: &str = "activation";
/// Data port of external inputs/outputs.
pub const EXTERNAL_PORT: &str = "port";
pub const MARKER_INPUT: &str = "in";
pub const MARKER_OUTPUT: &str = "out";

/// Data type name carried by activation ports.
pub const ACTIVATION_TYPE: &str = "activation";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PortDirection {
    Input,
    Output,
}

/// How an operator consumes an input port.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InputUnit {
    Record,
    Group,
    Whole,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Port {
    pub(crate) id: PortId,
    pub(crate) owner: OperatorId,
    pub(crate) direction: PortDirection,
    pub(crate) name: String,
    pub(crate) data_type: DataType,
    pub(crate) group: Option<Group>,
    pub(crate) unit: Option<InputUnit>,
}

impl Port {
    pub fn id(&self) -> PortId {
        self.id
    }
    pub fn owner(&self) -> OperatorId {
        self.owner
    }
    pub fn direction(&self) -> PortDirection {
        self.direction
    }
    pub fn name(&self) -> &str {
        &self.name
    }
    pub fn data_type(&self) -> &DataType {
        &self.data_type
    }
    pub fn group(&self) -> Option<&Group> {
        self.group.as_ref()
    }
    pub fn unit(&self) -> Option<InputUnit> {
        self.unit
    }
    pub fn is_input(&self) -> bool {
        self.direction == PortDirection::Input
    }

    pub(crate) fn to_spec(&self) -> PortSpec {
        PortSpec {
            name: self.name.clone(),
            data_type: self.data_type.clone(),
            group: self.group.clone(),
            unit: self.unit,
        }
    }
}

/// Stage-boundary pseudo operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum PlanMarker {
    Begin,
    End,
    Checkpoint,
    Gather,
    Broadcast,
}

impl fmt::Display for PlanMarker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            PlanMarker::Begin => "BEGIN",
            PlanMarker::End => "END",
            PlanMarker::Checkpoint => "CHECKPOINT",
            PlanMarker::Gather => "GATHER",
            PlanMarker::Broadcast => "BROADCAST",
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CoreOperatorKind {
    Checkpoint,
    Project,
    Extend,
    Restructure,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UserOperatorKind {
    Extract,
    Convert,
    Update,
    Branch,
    Split,
    CoGroup,
    GroupSort,
    Fold,
    Summarize,
    MasterJoin,
    MasterCheck,
    MasterBranch,
    MasterJoinUpdate,
}

impl UserOperatorKind {
    /// Consumes groups of records sharing a key.
    pub fn is_group_wise(self) -> bool {
        matches!(
            self,
            UserOperatorKind::CoGroup
                | UserOperatorKind::GroupSort
                | UserOperatorKind::Fold
                | UserOperatorKind::Summarize
        )
    }

    /// Can pre-aggregate before the shuffle.
    pub fn supports_partial_reduction(self) -> bool {
        matches!(self, UserOperatorKind::Fold | UserOperatorKind::Summarize)
    }

    /// Master input first, transaction input second.
    pub fn is_master_join(self) -> bool {
        matches!(
            self,
            UserOperatorKind::MasterJoin
                | UserOperatorKind::MasterCheck
                | UserOperatorKind::MasterBranch
                | UserOperatorKind::MasterJoinUpdate
        )
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserOperator {
    pub name: String,
    pub kind: UserOperatorKind,
    #[serde(default)]
    pub partial_aggregation: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExternalInput {
    pub name: String,
    pub path: Option<String>,
    /// Declared size of the dataset in bytes, if known.
    pub estimated_size: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExternalOutput {
    pub name: String,
    pub path: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OperatorKind {
    User(UserOperator),
    Core(CoreOperatorKind),
    Input(ExternalInput),
    Output(ExternalOutput),
    Marker(PlanMarker),
}

impl fmt::Display for OperatorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OperatorKind::User(u) => write!(f, "{}[{:?}]", u.name, u.kind),
            OperatorKind::Core(c) => write!(f, "core:{:?}", c),
            OperatorKind::Input(i) => write!(f, "input:{}", i.name),
            OperatorKind::Output(o) => write!(f, "output:{}", o.name),
            OperatorKind::Marker(m) => write!(f, "{}", m),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ArgumentValue {
    Boolean(bool),
    Integer(i64),
    String(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Argument {
    pub name: String,
    pub value: ArgumentValue,
}

#[derive(Debug, Clone)]
pub struct Operator {
    pub(crate) id: OperatorId,
    pub(crate) serial: SerialNumber,
    pub(crate) kind: OperatorKind,
    pub(crate) inputs: Vec<PortId>,
    pub(crate) outputs: Vec<PortId>,
    pub(crate) arguments: Vec<Argument>,
    pub(crate) attributes: AttributeMap,
}

impl Operator {
    pub fn id(&self) -> OperatorId {
        self.id
    }
    pub fn serial(&self) -> SerialNumber {
        self.serial
    }
    pub fn kind(&self) -> &OperatorKind {
        &self.kind
    }
    pub fn inputs(&self) -> &[PortId] {
        &self.inputs
    }
    pub fn outputs(&self) -> &[PortId] {
        &self.outputs
    }
    pub fn arguments(&self) -> &[Argument] {
        &self.arguments
    }
    pub fn attributes(&self) -> &AttributeMap {
        &self.attributes
    }
    pub fn attributes_mut(&mut self) -> &mut AttributeMap {
        &mut self.attributes
    }

    pub fn attribute<T: Attribute>(&self) -> Option<&T> {
        self.attributes.get::<T>()
    }

    pub fn marker(&self) -> Option<PlanMarker> {
        match self.kind {
            OperatorKind::Marker(m) => Some(m),
            _ => None,
        }
    }

    pub fn is_marker(&self) -> bool {
        self.marker().is_some()
    }

    pub fn is_marker_of(&self, marker: PlanMarker) -> bool {
        self.marker() == Some(marker)
    }

    pub fn as_user(&self) -> Option<&UserOperator> {
        match &self.kind {
            OperatorKind::User(u) => Some(u),
            _ => None,
        }
    }

    pub fn as_external_input(&self) -> Option<&ExternalInput> {
        match &self.kind {
            OperatorKind::Input(i) => Some(i),
            _ => None,
        }
    }

    pub fn as_external_output(&self) -> Option<&ExternalOutput> {
        match &self.kind {
            OperatorKind::Output(o) => Some(o),
            _ => None,
        }
    }

    pub fn is_core(&self, kind: CoreOperatorKind) -> bool {
        self.kind == OperatorKind::Core(kind)
    }

    /// Short human-readable label, stable across copies.
    pub fn label(&self) -> String {
        format!("{}#{}", self.kind, self.serial.get())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PortSpec {
    pub name: String,
    pub data_type: DataType,
    pub group: Option<Group>,
    pub unit: Option<InputUnit>,
}

impl PortSpec {
    pub fn new(name: impl Into<String>, data_type: DataType) -> Self {
        Self {
            name: name.into(),
            data_type,
            group: None,
            unit: None,
        }
    }

    pub fn grouped(mut self, group: Group) -> Self {
        self.group = Some(group);
        self
    }

    pub fn unit(mut self, unit: InputUnit) -> Self {
        self.unit = Some(unit);
        self
    }
}

/// Blueprint of an operator, before ids are assigned.
#[derive(Debug, Clone)]
pub struct OperatorSpec {
    pub kind: OperatorKind,
    pub inputs: Vec<PortSpec>,
    pub outputs: Vec<PortSpec>,
    pub arguments: Vec<Argument>,
    pub attributes: AttributeMap,
    /// Kept verbatim when set; a fresh serial is assigned otherwise.
    pub serial: Option<SerialNumber>,
}

impl OperatorSpec {
    pub fn new(kind: OperatorKind) -> Self {
        Self {
            kind,
            inputs: Vec::new(),
            outputs: Vec::new(),
            arguments: Vec::new(),
            attributes: AttributeMap::new(),
            serial: None,
        }
    }

    pub fn user(name: impl Into<String>, kind: UserOperatorKind) -> Self {
        Self::new(OperatorKind::User(UserOperator {
            name: name.into(),
            kind,
            partial_aggregation: false,
        }))
    }

    pub fn core(kind: CoreOperatorKind, data_type: DataType) -> Self {
        Self::new(OperatorKind::Core(kind))
            .input(MARKER_INPUT, data_type.clone())
            .output(MARKER_OUTPUT, data_type)
    }

    pub fn external_input(name: impl Into<String>, data_type: DataType) -> Self {
        Self::new(OperatorKind::Input(ExternalInput {
            name: name.into(),
            path: None,
            estimated_size: None,
        }))
        .input(ACTIVATION_PORT, DataType::named(ACTIVATION_TYPE))
        .output(EXTERNAL_PORT, data_type)
    }

    pub fn external_output(name: impl Into<String>, data_type: DataType) -> Self {
        Self::new(OperatorKind::Output(ExternalOutput {
            name: name.into(),
            path: None,
        }))
        .input(EXTERNAL_PORT, data_type)
        .output(ACTIVATION_PORT, DataType::named(ACTIVATION_TYPE))
    }

    pub fn marker(marker: PlanMarker, data_type: DataType) -> Self {
        Self::new(OperatorKind::Marker(marker))
            .input(MARKER_INPUT, data_type.clone())
            .output(MARKER_OUTPUT, data_type)
    }

    pub fn input(self, name: impl Into<String>, data_type: DataType) -> Self {
        self.input_port(PortSpec::new(name, data_type))
    }

    pub fn grouped_input(self, name: impl Into<String>, data_type: DataType, group: Group) -> Self {
        self.input_port(PortSpec::new(name, data_type).grouped(group))
    }

    pub fn input_port(mut self, port: PortSpec) -> Self {
        self.inputs.push(port);
        self
    }

    pub fn output(mut self, name: impl Into<String>, data_type: DataType) -> Self {
        self.outputs.push(PortSpec::new(name, data_type));
        self
    }

    pub fn argument(mut self, name: impl Into<String>, value: ArgumentValue) -> Self {
        self.arguments.push(Argument {
            name: name.into(),
            value,
        });
        self
    }

    pub fn attribute<T: Attribute + Clone>(mut self, value: T) -> Self {
        self.attributes.insert(value);
        self
    }

    pub fn serial(mut self, serial: SerialNumber) -> Self {
        self.serial = Some(serial);
        self
    }

    /// Enables partial aggregation on user operators; no-op otherwise.
    pub fn partial_aggregation(mut self, enabled: bool) -> Self {
        if let OperatorKind::User(u) = &mut self.kind {
            u.partial_aggregation = enabled;
        }
        self
    }

    pub fn path(mut self, value: impl Into<String>) -> Self {
        match &mut self.kind {
            OperatorKind::Input(i) => i.path = Some(value.into()),
            OperatorKind::Output(o) => o.path = Some(value.into()),
            _ => {}
        }
        self
    }

    pub fn estimated_size(mut self, bytes: u64) -> Self {
        if let OperatorKind::Input(i) = &mut self.kind {
            i.estimated_size = Some(bytes);
        }
        self
    }
}
