//! Notifications delivered to the caller.

use std::fmt;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use snapedit_common::error::ErrorKind;

use crate::job::JobId;

/// Pipeline stage a progress update refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Stage {
    Decoding,
    Inferring,
    Compositing,
    Encoding,
    Finalizing,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Stage::Decoding => "decoding",
            Stage::Inferring => "inferring",
            Stage::Compositing => "compositing",
            Stage::Encoding => "encoding",
            Stage::Finalizing => "finalizing",
        };
        f.write_str(s)
    }
}

/// Job notification. Every job produces exactly one terminal event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum JobEvent {
    Progress {
        job_id: JobId,
        percent: f64,
        stage: Stage,
    },
    Completed {
        job_id: JobId,
        output: PathBuf,
    },
    Failed {
        job_id: JobId,
        kind: ErrorKind,
        message: String,
    },
    Cancelled {
        job_id: JobId,
    },
}

impl JobEvent {
    pub fn job_id(&self) -> JobId {
        match self {
            JobEvent::Progress { job_id, .. }
            | JobEvent::Completed { job_id, .. }
            | JobEvent::Failed { job_id, .. }
            | JobEvent::Cancelled { job_id } => *job_id,
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, JobEvent::Progress { .. })
    }
}
