//! Batch job lifecycle.
//!
//! ```text
//! Validating → InProgress → Finalizing → Completed
//!     │            │            ├──────→ Failed
//!     │            │            └──────→ Expired
//!     │            ├──────────────────→ Failed | Expired
//!     ├──────────────────────────────→ Failed
//!     └────────────┴──→ Cancelling → Cancelled
//! ```
//!
//! Polling may miss intermediate states, so observed statuses are accepted
//! when reachable from the current one, while direct transitions must
//! follow a single edge.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;
use tracing::info;

/// Errors from job tracking.
#[derive(Error, Debug, PartialEq)]
pub enum JobError {
    #[error("Invalid transition for job {job_id}: {from} -> {to}")]
    InvalidTransition {
        job_id: String,
        from: JobStatus,
        to: JobStatus,
    },

    #[error("Unknown batch status: {0}")]
    UnknownStatus(String),
}

/// Status reported by the batch API.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Validating,
    InProgress,
    Finalizing,
    Completed,
    Failed,
    Expired,
    Cancelling,
    Cancelled,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Validating => "validating",
            JobStatus::InProgress => "in_progress",
            JobStatus::Finalizing => "finalizing",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
            JobStatus::Expired => "expired",
            JobStatus::Cancelling => "cancelling",
            JobStatus::Cancelled => "cancelled",
        }
    }

    /// No further status change is possible.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            JobStatus::Completed | JobStatus::Failed | JobStatus::Expired | JobStatus::Cancelled
        )
    }

    /// Statuses reachable in one step.
    pub fn successors(&self) -> &'static [JobStatus] {
        use JobStatus::*;
        match self {
            Validating => &[InProgress, Failed, Cancelling],
            InProgress => &[Finalizing, Failed, Expired, Cancelling],
            Finalizing => &[Completed, Failed, Expired],
            Cancelling => &[Cancelled],
            Completed | Failed | Expired | Cancelled => &[],
        }
    }

    pub fn can_transition_to(&self, next: JobStatus) -> bool {
        self.successors().contains(&next)
    }

    /// Whether `target` can be reached through zero or more steps.
    pub fn reaches(&self, target: JobStatus) -> bool {
        let mut stack = vec![*self];
        let mut seen = Vec::new();
        while let Some(status) = stack.pop() {
            if status == target {
                return true;
            }
            if seen.contains(&status) {
                continue;
            }
            seen.push(status);
            stack.extend_from_slice(status.successors());
        }
        false
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for JobStatus {
    type Err = JobError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        use JobStatus::*;
        [
            Validating, InProgress, Finalizing, Completed, Failed, Expired, Cancelling, Cancelled,
        ]
        .into_iter()
        .find(|status| status.as_str() == s)
        .ok_or_else(|| JobError::UnknownStatus(s.to_string()))
    }
}

/// A status change with the time it was recorded.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatusChange {
    pub status: JobStatus,
    pub at: DateTime<Utc>,
}

/// Local view of a submitted batch.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchJob {
    pub id: String,
    status: JobStatus,
    history: Vec<StatusChange>,

    /// Output file id, once the API reports one
    pub output_file_id: Option<String>,
}

impl BatchJob {
    /// Track a newly created batch.
    pub fn new(id: impl Into<String>) -> Self {
        Self::at(id, Utc::now())
    }

    /// Track a batch created at `created_at`.
    pub fn at(id: impl Into<String>, created_at: DateTime<Utc>) -> Self {
        Self {
            id: id.into(),
            status: JobStatus::Validating,
            history: vec![StatusChange {
                status: JobStatus::Validating,
                at: created_at,
            }],
            output_file_id: None,
        }
    }

    pub fn status(&self) -> JobStatus {
        self.status
    }

    pub fn history(&self) -> &[StatusChange] {
        &self.history
    }

    /// Move to `next` along a single edge.
    pub fn transition(&mut self, next: JobStatus) -> Result<(), JobError> {
        if !self.status.can_transition_to(next) {
            return Err(self.invalid(next));
        }
        self.record(next, Utc::now());
        Ok(())
    }

    /// Apply a polled status.
    ///
    /// Repeating the current status is a no-op. Any status reachable from
    /// the current one is accepted, since polls can skip states. Returns
    /// whether the status changed.
    pub fn observe(&mut self, polled: JobStatus, at: DateTime<Utc>) -> Result<bool, JobError> {
        if polled == self.status {
            return Ok(false);
        }
        if !self.status.reaches(polled) {
            return Err(self.invalid(polled));
        }
        self.record(polled, at);
        Ok(true)
    }

    /// Polling can stop.
    pub fn is_done(&self) -> bool {
        self.status.is_terminal()
    }

    /// The job finished and its output can be downloaded.
    pub fn output_ready(&self) -> bool {
        self.status == JobStatus::Completed && self.output_file_id.is_some()
    }

    fn record(&mut self, status: JobStatus, at: DateTime<Utc>) {
        info!(job_id = %self.id, from = %self.status, to = %status, "Batch status changed");
        self.status = status;
        self.history.push(StatusChange { status, at });
    }

    fn invalid(&self, to: JobStatus) -> JobError {
        JobError::InvalidTransition {
            job_id: self.id.clone(),
            from: self.status,
            to,
        }
    }
}
