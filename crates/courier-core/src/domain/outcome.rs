//! Cycle report: what one loop invocation did.
//!
//! Returned by every `Cycle::run_once` so the scheduler can log a summary and
//! tests can assert on counts without reaching into the store.

use serde::{Deserialize, Serialize};

use super::ids::RunId;
use super::token::TokenKey;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CycleReport {
    /// Job name (`ingestion`, `refresh`, `resync`, `reaper`).
    pub job: String,
    pub run_id: RunId,

    /// Records matched by the selection (claimed, for ingestion).
    pub selected: usize,

    /// Records the transport acknowledged.
    pub published: usize,

    /// Records whose commit write went through.
    pub committed: usize,

    /// Records left in their prior state because build or publish failed.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub failed: Vec<TokenKey>,
}

impl CycleReport {
    pub fn new(job: impl Into<String>, run_id: RunId) -> Self {
        Self {
            job: job.into(),
            run_id,
            selected: 0,
            published: 0,
            committed: 0,
            failed: Vec::new(),
        }
    }

    /// Nothing was eligible this firing.
    pub fn is_idle(&self) -> bool {
        self.selected == 0
    }
}
