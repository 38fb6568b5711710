use crate::model::Step;
use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use strum::Display;

/// Net row/column shift between where a step was recorded and where it lands.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct GridDelta {
    pub rows: i64,
    pub cols: i64,
}

impl GridDelta {
    pub const ZERO: GridDelta = GridDelta { rows: 0, cols: 0 };

    pub fn new(rows: i64, cols: i64) -> Self {
        Self { rows, cols }
    }

    pub fn is_zero(&self) -> bool {
        self.rows == 0 && self.cols == 0
    }
}

/// Executes one step against a live spreadsheet.
///
/// `delta` is the shift already folded into an `APPLY_FORMULA` step, or the
/// running net structural shift of the run for every other kind. An `Err` is
/// a rejection of this step; its message is shown next to the step.
#[async_trait]
pub trait SpreadsheetBackend: Send + Sync {
    async fn apply_step(&self, step: &Step, delta: GridDelta) -> Result<()>;
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobId(pub String);

impl JobId {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum JobState {
    Queued,
    Running,
    Succeeded,
    Failed,
}

impl JobState {
    pub fn is_terminal(self) -> bool {
        matches!(self, JobState::Succeeded | JobState::Failed)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobStatusReport {
    pub status: JobState,
    /// Coarse percentage reported by the backend, 0..=100.
    #[serde(default)]
    pub progress: u8,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Index into the submitted step list of the step that failed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failed_index: Option<usize>,
}

impl JobStatusReport {
    pub fn queued() -> Self {
        Self {
            status: JobState::Queued,
            progress: 0,
            error: None,
            failed_index: None,
        }
    }

    pub fn running(progress: u8) -> Self {
        Self {
            status: JobState::Running,
            progress,
            error: None,
            failed_index: None,
        }
    }

    pub fn succeeded() -> Self {
        Self {
            status: JobState::Succeeded,
            progress: 100,
            error: None,
            failed_index: None,
        }
    }

    pub fn failed(error: impl Into<String>, failed_index: Option<usize>) -> Self {
        Self {
            status: JobState::Failed,
            progress: 0,
            error: Some(error.into()),
            failed_index,
        }
    }
}

/// Runs a whole step list as a server-side job.
///
/// An `Err` from either method is an infrastructure fault, not a step rejection.
#[async_trait]
pub trait JobBackend: Send + Sync {
    async fn submit_job(&self, steps: &[Step]) -> Result<JobId>;

    async fn job_status(&self, job_id: &JobId) -> Result<JobStatusReport>;
}
