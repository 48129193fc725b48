//! YAML → OperatorGraph parser.
//!
//! Example:
//! ```yaml
//! config:
//!   options: { graph_statistics: true }
//!   broadcast_limit: 1048576
//! operators:
//!   - { id: orders, op: input, type: order, path: "data/${date}/orders", size: 4096 }
//!   - id: total
//!     op: fold
//!     partial: true
//!     inputs:  [ { name: in, type: order, group: [customer] } ]
//!     outputs: [ { name: out, type: total } ]
//!   - { id: result, op: output, type: total }
//! edges:
//!   - { from: orders, to: total.in }
//!   - { from: total.out, to: result }
//! ```
//!
//! An endpoint without a port name refers to the operator's first port.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use flowplan_core::config::{
    PlannerConfig, KEY_BROADCAST_LIMIT, OPTION_PREFIX, PARTITION_LIMIT_PREFIX,
    PARTITION_SIZE_PREFIX,
};
use flowplan_core::error::{Error, Result};
use flowplan_core::graph::OperatorGraph;
use flowplan_core::id::{OperatorId, PortId};
use flowplan_core::operator::{
    ArgumentValue, CoreOperatorKind, InputUnit, OperatorSpec, PortSpec, UserOperatorKind,
};
use flowplan_core::schema::{DataType, Field, FieldType, Group};

use super::DslError;
use crate::analyze::IterativeInfo;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GraphDocument {
    #[serde(default)]
    pub config: GraphConfig,
    #[serde(default)]
    pub operators: Vec<OperatorDef>,
    #[serde(default)]
    pub edges: Vec<EdgeDef>,
}

/// Planner settings carried by a graph document.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct GraphConfig {
    /// Option symbol → enabled.
    pub options: BTreeMap<String, bool>,
    /// Negative disables broadcasting.
    pub broadcast_limit: Option<f64>,
    /// Size class symbol → upper bound in bytes.
    pub partition_limits: BTreeMap<String, f64>,
    /// Stage label → size class symbol.
    pub partition_sizes: BTreeMap<String, String>,
}

impl GraphConfig {
    /// The section as `flowplan.planning.*` properties.
    pub fn properties(&self) -> Vec<(String, String)> {
        let mut props = Vec::new();
        for (symbol, enabled) in &self.options {
            props.push((format!("{OPTION_PREFIX}{symbol}"), enabled.to_string()));
        }
        if let Some(limit) = self.broadcast_limit {
            props.push((KEY_BROADCAST_LIMIT.to_string(), limit.to_string()));
        }
        for (size, bytes) in &self.partition_limits {
            props.push((format!("{PARTITION_LIMIT_PREFIX}{size}"), bytes.to_string()));
        }
        for (label, size) in &self.partition_sizes {
            props.push((format!("{PARTITION_SIZE_PREFIX}{label}"), size.clone()));
        }
        props
    }

    pub fn apply_to(&self, config: &mut PlannerConfig) -> Result<()> {
        let props = self.properties();
        config.apply_properties(props.iter().map(|(k, v)| (k.as_str(), v.as_str())))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OperatorDef {
    pub id: String,
    /// `input`, `output`, a core kind (`checkpoint`, `project`, ...) or a
    /// user kind (`extract`, `co_group`, `fold`, ...).
    pub op: String,
    #[serde(default)]
    pub name: Option<String>,
    /// Data type of external and core operators.
    #[serde(rename = "type", default)]
    pub data_type: Option<TypeDef>,
    #[serde(default)]
    pub inputs: Vec<PortDef>,
    #[serde(default)]
    pub outputs: Vec<PortDef>,
    #[serde(default)]
    pub arguments: BTreeMap<String, ArgumentValue>,
    #[serde(default)]
    pub partial: bool,
    #[serde(default)]
    pub path: Option<String>,
    /// Declared size of an external input in bytes.
    #[serde(default)]
    pub size: Option<u64>,
    #[serde(default)]
    pub iterative: Option<IterativeDef>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum TypeDef {
    Name(String),
    Record {
        name: String,
        #[serde(default)]
        fields: Vec<FieldDef>,
    },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FieldDef {
    pub name: String,
    #[serde(rename = "type")]
    pub data_type: String,
    #[serde(default)]
    pub nullable: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PortDef {
    pub name: String,
    #[serde(rename = "type")]
    pub data_type: TypeDef,
    /// Grouping keys; empty for record-wise ports.
    #[serde(default)]
    pub group: Vec<String>,
    /// In-group order, `field` ascending or `-field` descending.
    #[serde(default)]
    pub order: Vec<String>,
    #[serde(default)]
    pub unit: Option<InputUnit>,
}

/// `true` for always iterative, or the batch parameters it depends on.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum IterativeDef {
    Flag(bool),
    Parameters(Vec<String>),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EdgeDef {
    pub from: String,
    pub to: String,
}

#[derive(Debug, Clone)]
pub struct ParsedGraph {
    pub graph: OperatorGraph,
    pub config: GraphConfig,
    /// Document ids of the created operators.
    pub operators: BTreeMap<String, OperatorId>,
}

fn parse_field_type(s: &str) -> FieldType {
    match s {
        "Boolean" | "bool" => FieldType::Boolean,
        "Int32" | "i32" => FieldType::Int32,
        "Int64" | "i64" => FieldType::Int64,
        "Float32" | "f32" => FieldType::Float32,
        "Float64" | "f64" => FieldType::Float64,
        "Binary" | "bytes" => FieldType::Binary,
        "Date64" | "date" => FieldType::Date64,
        "Decimal128" | "decimal" => FieldType::Decimal128,
        _ => FieldType::Utf8,
    }
}

fn to_data_type(def: &TypeDef) -> DataType {
    match def {
        TypeDef::Name(name) => DataType::named(name.clone()),
        TypeDef::Record { name, fields } => fields.iter().fold(
            DataType::named(name.clone()),
            |dt, f| dt.with_field(Field::new(f.name.clone(), parse_field_type(&f.data_type), f.nullable)),
        ),
    }
}

fn to_port_spec(def: &PortDef) -> PortSpec {
    let mut spec = PortSpec::new(def.name.clone(), to_data_type(&def.data_type));
    if !def.group.is_empty() || !def.order.is_empty() {
        let group = def.order.iter().fold(Group::by(def.group.clone()), |g, o| {
            match o.strip_prefix('-') {
                Some(field) => g.order_by(field, false),
                None => g.order_by(o.trim_start_matches('+'), true),
            }
        });
        spec = spec.grouped(group);
    }
    if let Some(unit) = def.unit {
        spec = spec.unit(unit);
    }
    spec
}

/// Parses a kind name with the enum's own serde names.
fn parse_kind<T: serde::de::DeserializeOwned>(op: &str) -> Option<T> {
    serde_yaml::from_value(serde_yaml::Value::String(op.to_string())).ok()
}

fn to_operator_spec(def: &OperatorDef) -> Result<OperatorSpec> {
    let name = def.name.clone().unwrap_or_else(|| def.id.clone());
    let data_type = || {
        def.data_type
            .as_ref()
            .map(to_data_type)
            .ok_or_else(|| Error::Graph(format!("operator {} ({}) needs a type", def.id, def.op)))
    };
    let mut spec = match def.op.as_str() {
        "input" => {
            let mut spec = OperatorSpec::external_input(name, data_type()?);
            if let Some(size) = def.size {
                spec = spec.estimated_size(size);
            }
            spec
        }
        "output" => OperatorSpec::external_output(name, data_type()?),
        op => {
            if let Some(kind) = parse_kind::<CoreOperatorKind>(op) {
                OperatorSpec::core(kind, data_type()?)
            } else if let Some(kind) = parse_kind::<UserOperatorKind>(op) {
                let spec = def
                    .inputs
                    .iter()
                    .fold(OperatorSpec::user(name, kind), |s, p| s.input_port(to_port_spec(p)));
                def.outputs
                    .iter()
                    .fold(spec, |s, p| s.output(p.name.clone(), to_data_type(&p.data_type)))
                    .partial_aggregation(def.partial)
            } else {
                return Err(Error::Graph(format!(
                    "operator {} has unknown kind: {op}",
                    def.id
                )));
            }
        }
    };
    if let Some(path) = &def.path {
        spec = spec.path(path.clone());
    }
    for (arg, value) in &def.arguments {
        spec = spec.argument(arg.clone(), value.clone());
    }
    match &def.iterative {
        Some(IterativeDef::Flag(true)) => spec = spec.attribute(IterativeInfo::Always),
        Some(IterativeDef::Parameters(names)) => {
            spec = spec.attribute(IterativeInfo::parameters(names.iter().cloned()))
        }
        Some(IterativeDef::Flag(false)) | None => {}
    }
    Ok(spec)
}

fn resolve_endpoint(
    graph: &OperatorGraph,
    operators: &BTreeMap<String, OperatorId>,
    endpoint: &str,
    output: bool,
) -> Result<PortId> {
    let (op_name, port) = match endpoint.rsplit_once('.') {
        Some((op, port)) if operators.contains_key(op) => (op, Some(port)),
        _ => (endpoint, None),
    };
    let op = operators
        .get(op_name)
        .copied()
        .ok_or_else(|| Error::Graph(format!("edge refers to unknown operator: {endpoint}")))?;
    match (port, output) {
        (Some(port), true) => graph.output_named(op, port),
        (Some(port), false) => graph.input_named(op, port),
        (None, true) => graph.output(op, 0),
        (None, false) => graph.input(op, 0),
    }
}

/// Build an operator graph from a parsed document.
pub fn build_graph(doc: &GraphDocument) -> Result<ParsedGraph> {
    let mut graph = OperatorGraph::new();
    let mut operators = BTreeMap::new();
    for def in &doc.operators {
        if operators.contains_key(&def.id) {
            return Err(Error::Graph(format!("duplicate operator id: {}", def.id)));
        }
        let id = graph.add(to_operator_spec(def)?);
        operators.insert(def.id.clone(), id);
    }
    for edge in &doc.edges {
        let from = resolve_endpoint(&graph, &operators, &edge.from, true)?;
        let to = resolve_endpoint(&graph, &operators, &edge.to, false)?;
        graph.connect(from, to)?;
    }
    tracing::debug!(
        operators = operators.len(),
        edges = doc.edges.len(),
        "parsed graph document"
    );
    Ok(ParsedGraph {
        graph,
        config: doc.config.clone(),
        operators,
    })
}

/// Parse a YAML graph document into an operator graph.
pub fn parse_yaml_graph(yaml_src: &str) -> std::result::Result<ParsedGraph, DslError> {
    let doc: GraphDocument = serde_yaml::from_str(yaml_src)?;
    Ok(build_graph(&doc)?)
}
