//! Batch and session data model

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::script::{BoundParams, Script, ScriptError};

/// Session life-cycle states. A session never leaves a terminal state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum SessionState {
    Queued,
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl SessionState {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            SessionState::Completed | SessionState::Failed | SessionState::Cancelled
        )
    }
}

/// Machine-checkable reason code attached to a failed session or step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureReason {
    /// The driver could not open a session for the target.
    AcquisitionError,
    /// A driver primitive reported a fault.
    StepFault,
    /// A `{name}` placeholder had no bound value.
    UnresolvedParameter,
    /// A step input failed local validation before any driver call.
    InvalidInput,
    /// The per-session deadline elapsed at a step boundary.
    DeadlineExceeded,
}

/// A batch submission: one script applied to many target profiles.
#[derive(Clone)]
pub struct BatchSpec {
    /// Target profile identities, in submission order.
    pub targets: Vec<String>,
    pub script: Arc<Script>,
    pub params: BoundParams,
    /// Concurrency ceiling C, at least 1.
    pub concurrency: usize,
    /// Minimum gap D between successive session launches.
    pub launch_delay: Duration,
    /// Optional per-session deadline, checked at step boundaries.
    pub session_deadline: Option<Duration>,
}

/// One queued unit of work derived from a batch. Owned by the scheduler until
/// dispatched, then by its session worker.
#[derive(Debug, Clone)]
pub struct SessionRequest {
    pub target: String,
}

/// Terminal outcome of one session, emitted for external persistence.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionRecord {
    pub target: String,
    pub state: SessionState,
    /// Index of the last step that produced an outcome. For a failed session
    /// this is the failing step.
    pub last_step: Option<u32>,
    pub reason: Option<FailureReason>,
    pub message: String,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: DateTime<Utc>,
}

/// Batch admission errors, surfaced synchronously at submission before any
/// driver session is opened.
#[derive(Error, Debug)]
pub enum AdmissionError {
    #[error("batch has no targets")]
    EmptyBatch,

    #[error("concurrency ceiling must be at least 1")]
    InvalidConcurrency,

    #[error("duplicate target in batch: {0}")]
    DuplicateTarget(String),

    #[error("malformed script {0}: {1}")]
    MalformedScript(String, #[source] ScriptError),

    #[error("script references parameter {{{0}}} with no bound value")]
    UnresolvedParameter(String),
}
