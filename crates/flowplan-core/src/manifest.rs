//! Provenance record emitted next to a saved plan.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::hash::Hash256;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ManifestId(pub Uuid);

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlanManifest {
    pub id: ManifestId,

    /// Stable hash of the exported plan info.
    pub plan_hash: Hash256,

    /// Stable hash of the input graph document, if planned from one.
    pub source_digest: Option<Hash256>,

    /// Planner version string for provenance.
    pub planner_version: String,

    pub stages: usize,

    /// Milliseconds since Unix epoch (UTC).
    pub created_ms: u64,
}

impl PlanManifest {
    pub fn new(plan_hash: Hash256, stages: usize, created_ms: u64) -> Self {
        Self {
            id: ManifestId(Uuid::new_v4()),
            plan_hash,
            source_digest: None,
            planner_version: crate::VERSION.to_string(),
            stages,
            created_ms,
        }
    }

    pub fn with_source(mut self, digest: Hash256) -> Self {
        self.source_digest = Some(digest);
        self
    }
}
