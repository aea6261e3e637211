//! Transfer job state machine.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::ids::JobId;

/// Status as reported by one poll of the remote service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum RemoteJobStatus {
    /// Queued or running remotely.
    Pending,

    Succeeded,

    /// Terminal failure; `code` is the service's status code.
    Failed { code: String },
}

impl RemoteJobStatus {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, RemoteJobStatus::Pending)
    }
}

/// Local view of a job's lifecycle.
///
/// State transitions:
/// - Submitted -> Polling -> Succeeded
/// - Submitted -> Polling -> Failed
/// - Submitted -> Polling -> TimedOut -> Cancelled (best-effort cancel accepted)
///
/// `TimedOut` stays put when the cancel request itself fails.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransferState {
    Submitted,
    Polling,
    Succeeded,
    Failed,
    TimedOut,
    Cancelled,
}

impl TransferState {
    /// No further transitions expected.
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            TransferState::Succeeded | TransferState::Failed | TransferState::Cancelled
        )
    }
}

/// Bookkeeping for one job, from submission to its terminal state.
///
/// All transitions go through the methods below.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransferRecord {
    pub job_id: JobId,
    pub label: String,
    pub state: TransferState,

    /// Number of status polls issued so far.
    pub polls: u32,

    /// Remote status code of a failed job.
    pub failure_code: Option<String>,

    pub submitted_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl TransferRecord {
    pub fn new(job_id: JobId, label: impl Into<String>, now: DateTime<Utc>) -> Self {
        Self {
            job_id,
            label: label.into(),
            state: TransferState::Submitted,
            polls: 0,
            failure_code: None,
            submitted_at: now,
            updated_at: now,
        }
    }

    /// Count a poll (moves Submitted -> Polling on the first one).
    pub fn record_poll(&mut self, now: DateTime<Utc>) {
        self.state = TransferState::Polling;
        self.polls += 1;
        self.updated_at = now;
    }

    pub fn mark_succeeded(&mut self, now: DateTime<Utc>) {
        self.state = TransferState::Succeeded;
        self.updated_at = now;
    }

    pub fn mark_failed(&mut self, code: impl Into<String>, now: DateTime<Utc>) {
        self.state = TransferState::Failed;
        self.failure_code = Some(code.into());
        self.updated_at = now;
    }

    pub fn mark_timed_out(&mut self, now: DateTime<Utc>) {
        self.state = TransferState::TimedOut;
        self.updated_at = now;
    }

    /// Only a timed-out job can be cancelled.
    pub fn mark_cancelled(&mut self, now: DateTime<Utc>) {
        if self.state == TransferState::TimedOut {
            self.state = TransferState::Cancelled;
            self.updated_at = now;
        }
    }
}
