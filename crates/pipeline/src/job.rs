//! Edit jobs and their lifecycle.

use std::fmt;
use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use snapedit_common::error::{ErrorKind, SnapEditError, SnapEditResult};
use snapedit_media_model::{EditSpec, MediaAsset};
use uuid::Uuid;

/// Identifier handed back by `submit`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobId(Uuid);

impl JobId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for JobId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Lifecycle of a job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobState {
    /// Submitted, waiting for a run slot.
    Pending,
    /// Frames are flowing through the stages.
    Running,
    /// Output committed to the destination.
    Completed,
    /// A stage failed; no output was written.
    Failed,
    /// Stopped on request; no output was written.
    Cancelled,
}

impl JobState {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            JobState::Completed | JobState::Failed | JobState::Cancelled
        )
    }

    /// Pending may be cancelled or failed before it ever runs.
    pub fn can_transition_to(&self, next: JobState) -> bool {
        matches!(
            (self, next),
            (JobState::Pending, JobState::Running)
                | (JobState::Pending, JobState::Failed)
                | (JobState::Pending, JobState::Cancelled)
                | (JobState::Running, JobState::Completed)
                | (JobState::Running, JobState::Failed)
                | (JobState::Running, JobState::Cancelled)
        )
    }
}

impl fmt::Display for JobState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            JobState::Pending => "pending",
            JobState::Running => "running",
            JobState::Completed => "completed",
            JobState::Failed => "failed",
            JobState::Cancelled => "cancelled",
        };
        f.write_str(s)
    }
}

/// One asset, one edit, one destination.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobRequest {
    pub asset: MediaAsset,
    pub edit: EditSpec,
    pub output: PathBuf,
}

impl JobRequest {
    pub fn new(asset: MediaAsset, edit: EditSpec, output: impl Into<PathBuf>) -> Self {
        Self {
            asset,
            edit,
            output: output.into(),
        }
    }
}

/// Error reported for a failed job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobError {
    pub kind: ErrorKind,
    pub message: String,
}

impl From<&SnapEditError> for JobError {
    fn from(err: &SnapEditError) -> Self {
        Self {
            kind: err.kind(),
            message: err.to_string(),
        }
    }
}

impl fmt::Display for JobError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.kind, self.message)
    }
}

/// Status of a job as seen by a caller.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobSnapshot {
    pub id: JobId,
    pub state: JobState,
    pub source: PathBuf,
    pub destination: PathBuf,
    pub operation: String,
    pub submitted_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    pub frames_encoded: u64,
    /// Committed output, set once the job completes.
    pub output: Option<PathBuf>,
    pub last_error: Option<JobError>,
}

impl JobSnapshot {
    pub(crate) fn pending(id: JobId, request: &JobRequest) -> Self {
        Self {
            id,
            state: JobState::Pending,
            source: request.asset.path.clone(),
            destination: request.output.clone(),
            operation: request.edit.operation.name().to_string(),
            submitted_at: Utc::now(),
            started_at: None,
            finished_at: None,
            frames_encoded: 0,
            output: None,
            last_error: None,
        }
    }

    pub(crate) fn transition(&mut self, next: JobState) -> SnapEditResult<()> {
        if !self.state.can_transition_to(next) {
            return Err(SnapEditError::invalid_state(format!(
                "job {} cannot go from {} to {}",
                self.id, self.state, next
            )));
        }
        let now = Utc::now();
        if next == JobState::Running {
            self.started_at = Some(now);
        }
        if next.is_terminal() {
            self.finished_at = Some(now);
        }
        self.state = next;
        Ok(())
    }
}
