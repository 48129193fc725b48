//! Role of every stage and data exchange kind of every stage port.

use std::collections::BTreeSet;

use flowplan_core::error::{Error, Result};
use flowplan_core::graph::OperatorGraph;
use flowplan_core::id::{OperatorId, SerialNumber, SubPlanId};
use flowplan_core::operator::{Operator, OperatorKind, PlanMarker};
use flowplan_core::schema::{DataType, Group};
use serde::{Deserialize, Serialize};

use crate::markers::EdgeInfo;
use crate::plan::{PlanDetail, SubPlan, SubPlanPort};

/// What drives the execution of a stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DriverType {
    /// Reads external inputs.
    Input,
    /// Only writes external outputs.
    Output,
    /// Record-wise processing of its inputs.
    Extract,
    /// Groups shuffled inputs.
    CoGroup,
    /// Groups partially aggregated inputs.
    Aggregate,
}

impl DriverType {
    pub fn symbol(self) -> &'static str {
        match self {
            DriverType::Input => "input",
            DriverType::Output => "output",
            DriverType::Extract => "extract",
            DriverType::CoGroup => "cogroup",
            DriverType::Aggregate => "aggregate",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubPlanInfo {
    pub driver_type: DriverType,
    /// Serial of the operator that characterizes the stage.
    pub primary_operator: Option<SerialNumber>,
    /// Reads at least one broadcast input.
    pub broadcast_join: bool,
    pub label: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InputType {
    /// Nothing is read (`BEGIN`).
    Void,
    /// Any distribution will do (`CHECKPOINT`).
    DontCare,
    /// Shuffled by key (`GATHER`).
    Partitioned,
    /// Replicated to every task (`BROADCAST`).
    Broadcast,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubPlanInputInfo {
    pub input_type: InputType,
    pub data_type: DataType,
    pub partition: Option<Group>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutputType {
    /// Dropped (`END`).
    Discard,
    DontCare,
    Partitioned,
    /// Partially aggregated, then shuffled.
    Aggregated,
    Broadcast,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubPlanOutputInfo {
    pub output_type: OutputType,
    pub data_type: DataType,
    pub partition: Option<Group>,
    pub aggregation: Option<SerialNumber>,
}

/// Format of a broadcast exchange.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BroadcastInfo {
    pub label: String,
    pub data_type: DataType,
    /// Lookup key of the broadcast table, if grouped.
    pub format: Option<Group>,
}

/// Reads stage structure through the provenance of `detail` back into the
/// prepared operator graph.
#[derive(Debug)]
pub struct SubPlanAnalyzer<'a> {
    detail: &'a PlanDetail,
    graph: &'a OperatorGraph,
}

impl<'a> SubPlanAnalyzer<'a> {
    pub fn new(detail: &'a PlanDetail, graph: &'a OperatorGraph) -> Self {
        Self { detail, graph }
    }

    /// Original operators of a stage.
    fn originals(&self, stage: SubPlanId) -> Vec<&'a Operator> {
        self.detail
            .sources_of(stage)
            .into_iter()
            .filter_map(|id| self.graph.get(id))
            .collect()
    }

    fn port_marker(&self, stage: &SubPlan, port: &SubPlanPort) -> Result<PlanMarker> {
        stage.marker_kind(port).ok_or_else(|| {
            Error::Invariant(format!("{} port {} is not a marker", stage.id(), port.id()))
        })
    }

    fn edge_info<'s>(stage: &'s SubPlan, port: &SubPlanPort) -> Option<&'s EdgeInfo> {
        stage
            .operators()
            .get(port.marker())
            .and_then(|op| op.attribute::<EdgeInfo>())
    }

    fn data_type(stage: &SubPlan, port: &SubPlanPort) -> DataType {
        let graph = stage.operators();
        graph
            .output(port.marker(), 0)
            .ok()
            .and_then(|p| graph.get_port(p))
            .map(|p| p.data_type().clone())
            .unwrap_or_else(|| DataType::named("unknown"))
    }

    pub fn analyze(&self, stage: &SubPlan) -> Result<SubPlanInfo> {
        let originals = self.originals(stage.id());
        let member_ids: BTreeSet<OperatorId> = originals.iter().map(|o| o.id()).collect();

        let mut gathered: Option<(&Operator, bool)> = None;
        let mut broadcast_join = false;
        for port in stage.inputs() {
            match self.port_marker(stage, port)? {
                PlanMarker::Gather => {
                    let aggregated = Self::edge_info(stage, port)
                        .map(|info| info.aggregation().is_some())
                        .unwrap_or(false);
                    let consumer = port
                        .origins()
                        .iter()
                        .flat_map(|m| self.graph.successors(*m))
                        .filter(|s| member_ids.contains(s))
                        .filter_map(|s| self.graph.get(s))
                        .min_by_key(|op| op.serial());
                    if let (None, Some(op)) = (gathered, consumer) {
                        gathered = Some((op, aggregated));
                    }
                }
                PlanMarker::Broadcast => broadcast_join = true,
                _ => {}
            }
        }

        let non_markers: Vec<&Operator> = originals.iter().copied().filter(|o| !o.is_marker()).collect();
        let (driver_type, primary) = if let Some((op, aggregated)) = gathered {
            let driver = if aggregated {
                DriverType::Aggregate
            } else {
                DriverType::CoGroup
            };
            (driver, Some(op))
        } else if let Some(input) = non_markers
            .iter()
            .find(|o| matches!(o.kind(), OperatorKind::Input(_)))
        {
            (DriverType::Input, Some(*input))
        } else if !non_markers.is_empty()
            && non_markers
                .iter()
                .all(|o| matches!(o.kind(), OperatorKind::Output(_)))
        {
            (DriverType::Output, non_markers.first().copied())
        } else {
            let first_user = non_markers.iter().copied().find(|o| o.as_user().is_some());
            (DriverType::Extract, first_user.or_else(|| non_markers.first().copied()))
        };

        let label = match primary.map(|op| op.kind()) {
            Some(OperatorKind::User(user)) => format!("{}:{}", driver_type.symbol(), user.name),
            Some(OperatorKind::Input(input)) => format!("{}:{}", driver_type.symbol(), input.name),
            Some(OperatorKind::Output(output)) => {
                format!("{}:{}", driver_type.symbol(), output.name)
            }
            _ => driver_type.symbol().to_string(),
        };
        Ok(SubPlanInfo {
            driver_type,
            primary_operator: primary.map(|op| op.serial()),
            broadcast_join,
            label,
        })
    }

    pub fn analyze_input(&self, stage: &SubPlan, port: &SubPlanPort) -> Result<SubPlanInputInfo> {
        let marker = self.port_marker(stage, port)?;
        let info = Self::edge_info(stage, port);
        let input_type = match marker {
            PlanMarker::Begin => InputType::Void,
            PlanMarker::Checkpoint => InputType::DontCare,
            PlanMarker::Gather => InputType::Partitioned,
            PlanMarker::Broadcast => InputType::Broadcast,
            PlanMarker::End => {
                return Err(Error::Invariant(format!(
                    "{} reads from an END marker",
                    stage.id()
                )))
            }
        };
        Ok(SubPlanInputInfo {
            input_type,
            data_type: Self::data_type(stage, port),
            partition: info.and_then(|i| i.group().cloned()),
        })
    }

    pub fn analyze_output(&self, stage: &SubPlan, port: &SubPlanPort) -> Result<SubPlanOutputInfo> {
        let marker = self.port_marker(stage, port)?;
        let info = Self::edge_info(stage, port);
        let aggregation = info.and_then(|i| i.aggregation());
        let output_type = match marker {
            PlanMarker::End => OutputType::Discard,
            PlanMarker::Checkpoint => OutputType::DontCare,
            PlanMarker::Gather if aggregation.is_some() => OutputType::Aggregated,
            PlanMarker::Gather => OutputType::Partitioned,
            PlanMarker::Broadcast => OutputType::Broadcast,
            PlanMarker::Begin => {
                return Err(Error::Invariant(format!(
                    "{} writes into a BEGIN marker",
                    stage.id()
                )))
            }
        };
        Ok(SubPlanOutputInfo {
            output_type,
            data_type: Self::data_type(stage, port),
            partition: info.and_then(|i| i.group().cloned()),
            aggregation,
        })
    }

    /// `None` unless the port is a broadcast boundary.
    pub fn analyze_broadcast(&self, stage: &SubPlan, port: &SubPlanPort) -> Option<BroadcastInfo> {
        if stage.marker_kind(port) != Some(PlanMarker::Broadcast) {
            return None;
        }
        let serial = stage.operators().get(port.marker())?.serial();
        Some(BroadcastInfo {
            label: format!("broadcast#{}", serial.get()),
            data_type: Self::data_type(stage, port),
            format: Self::edge_info(stage, port).and_then(|i| i.group().cloned()),
        })
    }
}
