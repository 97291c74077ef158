use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::app::FailureKind;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum SyncOutcome {
    Completed,
    /// The remote answered 304; extraction and merge were skipped.
    NotModified,
    Failed { kind: FailureKind, message: String },
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncCounts {
    pub inserted: usize,
    pub updated: usize,
    pub unchanged: usize,
    pub orphaned: usize,
    pub removed: usize,
}

impl SyncCounts {
    pub fn changed(&self) -> usize {
        self.inserted + self.updated + self.orphaned + self.removed
    }
}

/// Summary of one reconciler execution for one source.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncRun {
    pub source_id: i64,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub outcome: SyncOutcome,
    pub counts: SyncCounts,
    /// Candidates dropped during extraction.
    pub diagnostics: usize,
}

impl SyncRun {
    pub fn is_success(&self) -> bool {
        !matches!(self.outcome, SyncOutcome::Failed { .. })
    }

    pub fn failure_kind(&self) -> Option<FailureKind> {
        match &self.outcome {
            SyncOutcome::Failed { kind, .. } => Some(*kind),
            _ => None,
        }
    }

    pub fn elapsed_secs(&self) -> f64 {
        self.finished_at
            .signed_duration_since(self.started_at)
            .num_milliseconds() as f64
            / 1000.0
    }
}
