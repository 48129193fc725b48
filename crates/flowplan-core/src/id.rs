//! Strongly-typed identifiers used across the planner.
//!
//! Graph and plan code should *not* use raw integers for handles.
//! `OperatorId`/`PortId` are local to one graph; `SerialNumber` survives
//! copies and rebuilds and is the stable identity of an operator.

use serde::{Deserialize, Serialize};
use std::fmt;

macro_rules! new_id {
    ($name:ident) => {
        #[derive(
            Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Ord, PartialOrd,
        )]
        #[serde(transparent)]
        pub struct $name(u64);

        impl $name {
            pub const fn new(v: u64) -> Self {
                Self(v)
            }
            pub const fn get(self) -> u64 {
                self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}({})", stringify!($name), self.0)
            }
        }
    };
}

new_id!(OperatorId);
new_id!(PortId);
new_id!(SerialNumber);
new_id!(SubPlanId);
new_id!(PlanPortId);

/// Monotonic per-container counter for handing out ids.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub(crate) struct IdCounter(u64);

impl IdCounter {
    pub(crate) fn starting_at(v: u64) -> Self {
        Self(v)
    }

    pub(crate) fn next(&mut self) -> u64 {
        let v = self.0;
        self.0 += 1;
        v
    }

    /// Ensures later ids are greater than an externally chosen `v`.
    pub(crate) fn observe(&mut self, v: u64) {
        if v >= self.0 {
            self.0 = v + 1;
        }
    }

    pub(crate) fn peek(&self) -> u64 {
        self.0
    }
}
