//! Serializable description of a decorated plan, for persistence and tools.

use std::collections::BTreeMap;
use std::io::Write;

use flowplan_core::error::{Error, Result};
use flowplan_core::operator::OperatorKind;
use serde::{Deserialize, Serialize};

use crate::analyze::naming::{port_name, stage_name};
use crate::analyze::{
    InputType, OutputType, PartitionGroupInfo, SizeInfo, SubPlanInfo, SubPlanInputInfo,
    SubPlanOutputInfo,
};
use crate::plan::{Plan, PortRef, SubPlan};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DataExchange {
    Move,
    Shuffle,
    Broadcast,
    Aggregate,
    Nothing,
    Unknown,
}

impl DataExchange {
    pub fn of_input(info: Option<&SubPlanInputInfo>) -> Self {
        match info.map(|i| i.input_type) {
            Some(InputType::DontCare) => DataExchange::Move,
            Some(InputType::Partitioned) => DataExchange::Shuffle,
            Some(InputType::Void) => DataExchange::Nothing,
            Some(InputType::Broadcast) => DataExchange::Broadcast,
            None => DataExchange::Unknown,
        }
    }

    pub fn of_output(info: Option<&SubPlanOutputInfo>) -> Self {
        match info.map(|i| i.output_type) {
            Some(OutputType::DontCare) => DataExchange::Move,
            Some(OutputType::Aggregated) => DataExchange::Aggregate,
            Some(OutputType::Broadcast) => DataExchange::Broadcast,
            Some(OutputType::Discard) => DataExchange::Nothing,
            Some(OutputType::Partitioned) => DataExchange::Shuffle,
            None => DataExchange::Unknown,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PlanGraphInfo {
    pub vertices: Vec<VertexInfo>,
}

impl PlanGraphInfo {
    pub fn vertex(&self, name: &str) -> Option<&VertexInfo> {
        self.vertices.iter().find(|v| v.name == name)
    }

    /// `(from "v0.o0", to "v1.i0")` pairs.
    pub fn edges(&self) -> Vec<(String, String)> {
        self.vertices
            .iter()
            .flat_map(|v| {
                v.outputs.iter().flat_map(move |o| {
                    o.opposites
                        .iter()
                        .map(move |to| (format!("{}.{}", v.name, o.name), to.clone()))
                })
            })
            .collect()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VertexInfo {
    pub name: String,
    pub label: String,
    pub inputs: Vec<PortInfo>,
    pub outputs: Vec<PortInfo>,
    /// Labels of the operators executed by the stage.
    pub operators: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PortInfo {
    pub name: String,
    pub data_type: String,
    pub exchange: DataExchange,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub partition: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub aggregation: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub size_bytes: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub partition_size: Option<String>,
    /// Connected ports of other stages as `vertex.port`.
    #[serde(default)]
    pub opposites: Vec<String>,
}

/// Converts a decorated plan. Conversion stops at the first stage that
/// cannot be described; what was converted so far is returned.
pub fn to_info(plan: &Plan) -> PlanGraphInfo {
    let mut info = PlanGraphInfo::default();
    if let Err(e) = convert(plan, &mut info) {
        tracing::warn!(error = %e, "error occurred while converting execution plan");
    }
    info
}

fn convert(plan: &Plan, info: &mut PlanGraphInfo) -> Result<()> {
    let mut names: BTreeMap<PortRef, String> = BTreeMap::new();
    for stage in plan.elements() {
        let vertex = name_of(stage)?;
        for port in stage.inputs().iter().chain(stage.outputs()) {
            let port_name = port_name(port).ok_or_else(|| {
                Error::Plan(format!("{} port {} has no name", stage.id(), port.id()))
            })?;
            names.insert(
                PortRef {
                    sub_plan: stage.id(),
                    port: port.id(),
                },
                format!("{vertex}.{port_name}"),
            );
        }
    }
    for stage in plan.elements() {
        info.vertices.push(convert_vertex(plan, stage, &names)?);
    }
    Ok(())
}

fn name_of(stage: &SubPlan) -> Result<&str> {
    stage_name(stage).ok_or_else(|| Error::Plan(format!("{} has no name", stage.id())))
}

fn convert_vertex(
    plan: &Plan,
    stage: &SubPlan,
    names: &BTreeMap<PortRef, String>,
) -> Result<VertexInfo> {
    let name = name_of(stage)?.to_string();
    let label = stage
        .attribute::<SubPlanInfo>()
        .map(|i| i.label.clone())
        .unwrap_or_else(|| name.clone());

    let mut inputs = Vec::new();
    for port in stage.inputs() {
        let at = PortRef {
            sub_plan: stage.id(),
            port: port.id(),
        };
        let core = port.attribute::<SubPlanInputInfo>();
        let mut opposites: Vec<String> = plan
            .input_opposites(at)
            .iter()
            .filter_map(|o| names.get(o).cloned())
            .collect();
        opposites.sort();
        inputs.push(PortInfo {
            name: port_name(port).unwrap_or_default().to_string(),
            data_type: core.map(|c| c.data_type.name.clone()).unwrap_or_default(),
            exchange: DataExchange::of_input(core),
            partition: core.and_then(|c| c.partition.as_ref()).map(|g| g.keys.clone()),
            aggregation: None,
            size_bytes: port.attribute::<SizeInfo>().and_then(|s| s.bytes),
            partition_size: port
                .attribute::<PartitionGroupInfo>()
                .map(|p| p.data_size.symbol().to_string()),
            opposites,
        });
    }
    let mut outputs = Vec::new();
    for port in stage.outputs() {
        let at = PortRef {
            sub_plan: stage.id(),
            port: port.id(),
        };
        let core = port.attribute::<SubPlanOutputInfo>();
        let mut opposites: Vec<String> = plan
            .output_opposites(at)
            .iter()
            .filter_map(|o| names.get(o).cloned())
            .collect();
        opposites.sort();
        outputs.push(PortInfo {
            name: port_name(port).unwrap_or_default().to_string(),
            data_type: core.map(|c| c.data_type.name.clone()).unwrap_or_default(),
            exchange: DataExchange::of_output(core),
            partition: core.and_then(|c| c.partition.as_ref()).map(|g| g.keys.clone()),
            aggregation: core.and_then(|c| c.aggregation).map(|s| s.get()),
            size_bytes: port.attribute::<SizeInfo>().and_then(|s| s.bytes),
            partition_size: port
                .attribute::<PartitionGroupInfo>()
                .map(|p| p.data_size.symbol().to_string()),
            opposites,
        });
    }
    inputs.sort_by(|a, b| a.name.cmp(&b.name));
    outputs.sort_by(|a, b| a.name.cmp(&b.name));

    let operators = stage
        .operators()
        .operators()
        .filter(|op| !matches!(op.kind(), OperatorKind::Marker(_)))
        .map(|op| op.label())
        .collect();
    Ok(VertexInfo {
        name,
        label,
        inputs,
        outputs,
        operators,
    })
}

/// Writes the plan description as pretty JSON.
pub fn save_info(plan: &Plan, writer: impl Write) -> Result<()> {
    serde_json::to_writer_pretty(writer, &to_info(plan))
        .map_err(|e| Error::Plan(format!("cannot write plan info: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exchange_kinds_follow_port_roles() {
        assert_eq!(DataExchange::of_input(None), DataExchange::Unknown);
        assert_eq!(DataExchange::of_output(None), DataExchange::Unknown);
        assert_eq!(
            serde_json::to_string(&DataExchange::Shuffle).unwrap(),
            "\"SHUFFLE\""
        );
    }

    #[test]
    fn undecorated_plan_converts_to_partial_info() {
        let plan = Plan::new();
        let info = to_info(&plan);
        assert!(info.vertices.is_empty());
        assert!(info.edges().is_empty());
    }
}
