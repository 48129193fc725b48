//! Planner configuration that downstream crates can serialize/deserialize.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Property key prefix for boolean planning options.
pub const OPTION_PREFIX: &str = "flowplan.planning.option.";

/// Property key for the broadcast threshold in bytes.
pub const KEY_BROADCAST_LIMIT: &str = "flowplan.planning.broadcast.limit";

/// Property key prefix for partition size class limits (`...limit.tiny` etc.).
pub const PARTITION_LIMIT_PREFIX: &str = "flowplan.planning.partition.limit.";

/// Property key prefix for explicit per-stage partition sizes, keyed by stage label.
pub const PARTITION_SIZE_PREFIX: &str = "flowplan.planning.partition.size.";

/// Boolean switches of the planning pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PlanningOption {
    CheckpointAfterExternalInputs,
    CheckpointBeforeExternalOutputs,
    RemoveCyclicBroadcasts,
    UnifySubplanIo,
    SizeEstimation,
    IterativeExtension,
    ParameterDetection,
    GraphStatistics,
    PlanStatistics,
}

impl PlanningOption {
    pub const ALL: [PlanningOption; 9] = [
        PlanningOption::CheckpointAfterExternalInputs,
        PlanningOption::CheckpointBeforeExternalOutputs,
        PlanningOption::RemoveCyclicBroadcasts,
        PlanningOption::UnifySubplanIo,
        PlanningOption::SizeEstimation,
        PlanningOption::IterativeExtension,
        PlanningOption::ParameterDetection,
        PlanningOption::GraphStatistics,
        PlanningOption::PlanStatistics,
    ];

    pub fn symbol(self) -> &'static str {
        match self {
            PlanningOption::CheckpointAfterExternalInputs => "checkpoint_after_external_inputs",
            PlanningOption::CheckpointBeforeExternalOutputs => "checkpoint_before_external_outputs",
            PlanningOption::RemoveCyclicBroadcasts => "remove_cyclic_broadcasts",
            PlanningOption::UnifySubplanIo => "unify_subplan_io",
            PlanningOption::SizeEstimation => "size_estimation",
            PlanningOption::IterativeExtension => "iterative_extension",
            PlanningOption::ParameterDetection => "parameter_detection",
            PlanningOption::GraphStatistics => "graph_statistics",
            PlanningOption::PlanStatistics => "plan_statistics",
        }
    }

    pub fn default_enabled(self) -> bool {
        matches!(
            self,
            PlanningOption::RemoveCyclicBroadcasts
                | PlanningOption::UnifySubplanIo
                | PlanningOption::SizeEstimation
                | PlanningOption::IterativeExtension
                | PlanningOption::ParameterDetection
        )
    }

    pub fn from_symbol(symbol: &str) -> Option<Self> {
        Self::ALL.iter().copied().find(|o| o.symbol() == symbol)
    }
}

impl fmt::Display for PlanningOption {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.symbol())
    }
}

/// The set of enabled planning options.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PlanningOptions {
    enabled: BTreeSet<PlanningOption>,
}

impl Default for PlanningOptions {
    fn default() -> Self {
        Self {
            enabled: PlanningOption::ALL
                .iter()
                .copied()
                .filter(|o| o.default_enabled())
                .collect(),
        }
    }
}

impl PlanningOptions {
    /// All options disabled.
    pub fn none() -> Self {
        Self {
            enabled: BTreeSet::new(),
        }
    }

    pub fn is_enabled(&self, option: PlanningOption) -> bool {
        self.enabled.contains(&option)
    }

    pub fn set(&mut self, option: PlanningOption, enabled: bool) -> &mut Self {
        if enabled {
            self.enabled.insert(option);
        } else {
            self.enabled.remove(&option);
        }
        self
    }

    pub fn with(mut self, option: PlanningOption, enabled: bool) -> Self {
        self.set(option, enabled);
        self
    }

    pub fn enabled(&self) -> impl Iterator<Item = PlanningOption> + '_ {
        self.enabled.iter().copied()
    }
}

/// Size class of a partitioned data exchange.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DataSize {
    Tiny,
    Small,
    Regular,
    Large,
    Huge,
}

impl DataSize {
    pub const ALL: [DataSize; 5] = [
        DataSize::Tiny,
        DataSize::Small,
        DataSize::Regular,
        DataSize::Large,
        DataSize::Huge,
    ];

    pub fn symbol(self) -> &'static str {
        match self {
            DataSize::Tiny => "tiny",
            DataSize::Small => "small",
            DataSize::Regular => "regular",
            DataSize::Large => "large",
            DataSize::Huge => "huge",
        }
    }
}

impl FromStr for DataSize {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        DataSize::ALL
            .iter()
            .copied()
            .find(|d| d.symbol().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| Error::Config(format!("unknown data size: {s}")))
    }
}

/// Upper bounds (inclusive, in bytes) of the size classes below `Huge`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SizeLimits {
    pub tiny: f64,
    pub small: f64,
    pub regular: f64,
    pub large: f64,
}

impl Default for SizeLimits {
    fn default() -> Self {
        Self {
            tiny: 20.0 * 1024.0 * 1024.0,       // 20 MiB
            small: 200.0 * 1024.0 * 1024.0,     // 200 MiB
            regular: 20.0 * 1024.0 * 1024.0 * 1024.0, // 20 GiB
            large: 200.0 * 1024.0 * 1024.0 * 1024.0, // 200 GiB
        }
    }
}

impl SizeLimits {
    pub fn classify(&self, bytes: f64) -> DataSize {
        if bytes <= self.tiny {
            DataSize::Tiny
        } else if bytes <= self.small {
            DataSize::Small
        } else if bytes <= self.regular {
            DataSize::Regular
        } else if bytes <= self.large {
            DataSize::Large
        } else {
            DataSize::Huge
        }
    }

    fn set(&mut self, size: DataSize, bytes: f64) -> Result<()> {
        match size {
            DataSize::Tiny => self.tiny = bytes,
            DataSize::Small => self.small = bytes,
            DataSize::Regular => self.regular = bytes,
            DataSize::Large => self.large = bytes,
            DataSize::Huge => {
                return Err(Error::Config("huge partitions have no upper limit".into()))
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlannerConfig {
    pub options: PlanningOptions,

    /// Master inputs estimated at or below this many bytes are broadcast.
    /// `None` disables broadcasting.
    pub broadcast_limit_bytes: Option<f64>,

    pub partition_limits: SizeLimits,

    /// Explicit partition size classes, keyed by stage label.
    pub explicit_partition_sizes: BTreeMap<String, DataSize>,
}

impl Default for PlannerConfig {
    fn default() -> Self {
        Self {
            options: PlanningOptions::default(),
            broadcast_limit_bytes: Some(20.0 * 1024.0 * 1024.0), // 20 MiB default
            partition_limits: SizeLimits::default(),
            explicit_partition_sizes: BTreeMap::new(),
        }
    }
}

impl PlannerConfig {
    /// Create a config from environment variables, falling back to defaults.
    ///
    /// Environment variables:
    /// - `FLOWPLAN_OPTION_<SYMBOL>`: `true`/`false` for each planning option
    /// - `FLOWPLAN_BROADCAST_LIMIT_BYTES`: broadcast threshold, negative disables
    /// - `FLOWPLAN_PARTITION_LIMIT_<SIZE>`: upper bound of a size class
    ///
    /// Unparseable values are ignored.
    pub fn from_env() -> Self {
        let mut cfg = Self::default();

        for option in PlanningOption::ALL {
            let key = format!("FLOWPLAN_OPTION_{}", option.symbol().to_ascii_uppercase());
            if let Ok(s) = std::env::var(&key) {
                if let Ok(v) = parse_bool(&s) {
                    cfg.options.set(option, v);
                }
            }
        }

        if let Ok(s) = std::env::var("FLOWPLAN_BROADCAST_LIMIT_BYTES") {
            if let Ok(v) = s.trim().parse::<f64>() {
                cfg.broadcast_limit_bytes = (v >= 0.0).then_some(v);
            }
        }

        for size in DataSize::ALL {
            let key = format!(
                "FLOWPLAN_PARTITION_LIMIT_{}",
                size.symbol().to_ascii_uppercase()
            );
            if let Ok(s) = std::env::var(&key) {
                if let Ok(v) = s.trim().parse::<f64>() {
                    let _ = cfg.partition_limits.set(size, v);
                }
            }
        }

        cfg
    }

    /// Apply `flowplan.planning.*` properties on top of this config.
    ///
    /// Unknown keys under the planning prefixes and malformed values are
    /// configuration errors; keys outside the prefixes are ignored.
    pub fn apply_properties<'a, I>(&mut self, properties: I) -> Result<()>
    where
        I: IntoIterator<Item = (&'a str, &'a str)>,
    {
        for (key, value) in properties {
            if let Some(symbol) = key.strip_prefix(OPTION_PREFIX) {
                let option = PlanningOption::from_symbol(symbol)
                    .ok_or_else(|| Error::Config(format!("unknown planning option: {key}")))?;
                let enabled = parse_bool(value)
                    .map_err(|_| Error::Config(format!("{key} must be true or false: {value}")))?;
                self.options.set(option, enabled);
            } else if key == KEY_BROADCAST_LIMIT {
                let v = parse_bytes(key, value)?;
                self.broadcast_limit_bytes = (v >= 0.0).then_some(v);
            } else if let Some(symbol) = key.strip_prefix(PARTITION_LIMIT_PREFIX) {
                let size: DataSize = symbol.parse()?;
                self.partition_limits.set(size, parse_bytes(key, value)?)?;
            } else if let Some(label) = key.strip_prefix(PARTITION_SIZE_PREFIX) {
                self.explicit_partition_sizes
                    .insert(label.to_string(), value.parse()?);
            }
        }
        Ok(())
    }

    pub fn from_properties<'a, I>(properties: I) -> Result<Self>
    where
        I: IntoIterator<Item = (&'a str, &'a str)>,
    {
        let mut cfg = Self::default();
        cfg.apply_properties(properties)?;
        Ok(cfg)
    }
}

fn parse_bool(s: &str) -> std::result::Result<bool, ()> {
    match s.trim().to_ascii_lowercase().as_str() {
        "true" | "on" | "yes" | "1" => Ok(true),
        "false" | "off" | "no" | "0" => Ok(false),
        _ => Err(()),
    }
}

fn parse_bytes(key: &str, value: &str) -> Result<f64> {
    value
        .trim()
        .parse::<f64>()
        .map_err(|_| Error::Config(format!("{key} must be a number of bytes: {value}")))
}
