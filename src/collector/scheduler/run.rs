//! Run records and task states

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, SecondsFormat, Utc};
use serde::Serialize;
use serde_json::Value;
use thiserror::Error;
use uuid::Uuid;

use crate::collector::lifecycle::StartMode;
use crate::collector::metrics::compute_runtime_secs;

use super::SchedulerError;

/// State of a run, and by extension of the handle it belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum TaskStatus {
    Idle,
    Queued,
    Running,
    Done,
    Failed,
    Cancelled,
}

impl TaskStatus {
    /// Queued and Running hold the handle's single active slot.
    pub fn is_locked(self) -> bool {
        matches!(self, TaskStatus::Queued | TaskStatus::Running)
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, TaskStatus::Done | TaskStatus::Failed | TaskStatus::Cancelled)
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            TaskStatus::Idle => "Idle",
            TaskStatus::Queued => "Queued",
            TaskStatus::Running => "Running",
            TaskStatus::Done => "Done",
            TaskStatus::Failed => "Failed",
            TaskStatus::Cancelled => "Cancelled",
        };
        f.write_str(name)
    }
}

/// Whether a run starts over or continues an earlier one
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RunKind {
    Start,
    Continue,
}

impl fmt::Display for RunKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RunKind::Start => write!(f, "start"),
            RunKind::Continue => write!(f, "continue"),
        }
    }
}

impl FromStr for RunKind {
    type Err = SchedulerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "start" => Ok(RunKind::Start),
            "continue" => Ok(RunKind::Continue),
            other => Err(SchedulerError::InvalidKind(other.to_string())),
        }
    }
}

/// How a runner ended, when it did not succeed
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RunError {
    #[error("run was cancelled")]
    Cancelled,

    #[error("{0}")]
    Failed(String),
}

impl RunError {
    pub fn failed(error: impl fmt::Display) -> Self {
        RunError::Failed(error.to_string())
    }
}

/// One scheduled execution for one handle
#[derive(Debug, Clone, PartialEq)]
pub struct Run {
    pub run_id: Uuid,
    pub handle: String,
    pub kind: RunKind,
    pub account_config: Value,
    pub status: TaskStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    /// Set when the run enters Running
    pub started_at: Option<DateTime<Utc>>,
    /// Set when the run reaches a terminal state
    pub finished_at: Option<DateTime<Utc>>,
    /// Only kept for `start` runs
    pub start_mode: Option<StartMode>,
    pub error: Option<String>,
}

impl Run {
    pub(crate) fn new(
        handle: String,
        kind: RunKind,
        account_config: Value,
        start_mode: Option<StartMode>,
        status: TaskStatus,
    ) -> Self {
        let now = Utc::now();
        Self {
            run_id: Uuid::new_v4(),
            handle,
            kind,
            account_config,
            status,
            created_at: now,
            updated_at: now,
            started_at: None,
            finished_at: None,
            start_mode: match kind {
                RunKind::Start => start_mode,
                RunKind::Continue => None,
            },
            error: None,
        }
    }

    pub fn runtime_secs(&self, now: DateTime<Utc>) -> f64 {
        compute_runtime_secs(self.started_at, self.finished_at, now)
    }

    /// Serializable view with `Z`-suffixed UTC timestamps.
    pub fn to_record(&self) -> RunRecord {
        RunRecord {
            run_id: self.run_id.to_string(),
            handle: self.handle.clone(),
            kind: self.kind,
            status: self.status,
            created_at: format_utc_z(self.created_at),
            updated_at: format_utc_z(self.updated_at),
            started_at: self.started_at.map(format_utc_z),
            finished_at: self.finished_at.map(format_utc_z),
            start_mode: self.start_mode,
            error: self.error.clone(),
            account_config: self.account_config.clone(),
        }
    }
}

/// On-disk and public representation of a run
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RunRecord {
    pub run_id: String,
    pub handle: String,
    pub kind: RunKind,
    pub status: TaskStatus,
    pub created_at: String,
    pub updated_at: String,
    pub started_at: Option<String>,
    pub finished_at: Option<String>,
    pub start_mode: Option<StartMode>,
    pub error: Option<String>,
    pub account_config: Value,
}

pub fn format_utc_z(dt: DateTime<Utc>) -> String {
    dt.to_rfc3339_opts(SecondsFormat::Micros, true)
}
