//! Session worker
//!
//! Owns one session's life cycle: acquire a driver handle, interpret the
//! script's steps in index order, emit progress, release the handle exactly
//! once, and report the terminal state. Cancellation is cooperative and
//! observed at step boundaries only; a session that is mid-step finishes that
//! step first.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use tokio::sync::OwnedSemaphorePermit;
use tracing::{info, warn};

use super::batch::{FailureReason, SessionRecord, SessionState};
use super::event::{EventHub, EventKind, SessionEvent};
use super::interpreter::{self, StepOutcome};
use super::outcome::OutcomeSink;
use crate::driver::Driver;
use crate::script::{BoundParams, Script};
use crate::stats::BatchStats;

/// Cooperative cancellation: one flag per session plus one for the batch.
#[derive(Clone)]
pub(crate) struct CancelFlag {
    session: Arc<AtomicBool>,
    batch: Arc<AtomicBool>,
}

impl CancelFlag {
    pub(crate) fn new(batch: Arc<AtomicBool>) -> Self {
        Self {
            session: Arc::new(AtomicBool::new(false)),
            batch,
        }
    }

    /// Request cancellation of this session. Idempotent.
    pub(crate) fn cancel(&self) {
        self.session.store(true, Ordering::Relaxed);
    }

    pub(crate) fn is_cancelled(&self) -> bool {
        self.session.load(Ordering::Relaxed) || self.batch.load(Ordering::Relaxed)
    }
}

/// Drives one session from dispatch to its terminal state.
pub(crate) struct SessionWorker {
    pub target: String,
    pub script: Arc<Script>,
    pub params: Arc<BoundParams>,
    pub driver: Arc<dyn Driver>,
    pub events: Arc<EventHub>,
    pub stats: Arc<BatchStats>,
    pub records: Arc<DashMap<String, SessionRecord>>,
    pub outcomes: Arc<dyn OutcomeSink>,
    pub cancel: CancelFlag,
    pub deadline: Option<Duration>,
    /// Held for the session's whole running lifetime; dropped when the worker
    /// finishes, freeing a concurrency slot.
    pub _permit: Option<OwnedSemaphorePermit>,
}

impl SessionWorker {
    pub(crate) async fn run(self) {
        // A request cancelled while still queued is never started: no handle
        // is acquired and no step is attempted.
        if self.cancel.is_cancelled() {
            self.stats.cancel_queued();
            self.finish(
                SessionState::Cancelled,
                None,
                None,
                "cancelled before start",
                None,
            )
            .await;
            return;
        }

        self.stats.mark_running();
        let started_at = Utc::now();
        let started = Instant::now();
        self.emit(EventKind::Progress, None, "session started");
        info!(
            "Session {} starting ({} steps)",
            self.target,
            self.script.steps.len()
        );

        let mut handle = match self.driver.open_session(&self.target).await {
            Ok(handle) => handle,
            Err(e) => {
                warn!("Session {}: could not open driver session: {}", self.target, e);
                self.stats.finish_running(SessionState::Failed);
                self.finish(
                    SessionState::Failed,
                    Some(FailureReason::AcquisitionError),
                    None,
                    &format!("could not open session: {e}"),
                    Some(started_at),
                )
                .await;
                return;
            }
        };

        let mut state = SessionState::Completed;
        let mut reason: Option<FailureReason> = None;
        let mut message = String::from("all steps completed");
        let mut last_step: Option<u32> = None;

        for step in &self.script.steps {
            if self.cancel.is_cancelled() {
                state = SessionState::Cancelled;
                message = "cancellation observed".into();
                break;
            }
            if let Some(deadline) = self.deadline {
                if started.elapsed() >= deadline {
                    state = SessionState::Failed;
                    reason = Some(FailureReason::DeadlineExceeded);
                    message = format!("session deadline of {:?} exceeded", deadline);
                    break;
                }
            }

            match interpreter::execute_step(&mut *handle, step, &self.params).await {
                StepOutcome::Ok => {
                    last_step = Some(step.index);
                    self.emit(
                        EventKind::Progress,
                        Some(step.index),
                        format!("step {} ({}) ok: {}", step.index, step.action, step.desc),
                    );
                }
                StepOutcome::OkWithWarning(warning) => {
                    last_step = Some(step.index);
                    warn!("Session {} step {}: {}", self.target, step.index, warning);
                    self.emit(
                        EventKind::Progress,
                        Some(step.index),
                        format!("step {} ({}): {}", step.index, step.action, warning),
                    );
                }
                StepOutcome::Fatal {
                    reason: step_reason,
                    message: step_message,
                } => {
                    last_step = Some(step.index);
                    warn!(
                        "Session {} failed at step {}: {}",
                        self.target, step.index, step_message
                    );
                    self.emit(EventKind::StepFailed, Some(step.index), step_message.clone());
                    state = SessionState::Failed;
                    reason = Some(step_reason);
                    message = step_message;
                    break;
                }
            }
        }

        // The handle is released exactly once on every path out of Running.
        // A release error is logged and never changes the session's outcome.
        if let Err(e) = handle.close().await {
            warn!("Session {}: error closing driver session: {}", self.target, e);
        }

        self.stats.finish_running(state);
        self.finish(state, reason, last_step, &message, Some(started_at))
            .await;
    }

    fn emit(&self, kind: EventKind, step_index: Option<u32>, message: impl Into<String>) {
        self.events
            .emit(SessionEvent::now(&self.target, kind, step_index, message));
    }

    async fn finish(
        &self,
        state: SessionState,
        reason: Option<FailureReason>,
        last_step: Option<u32>,
        message: &str,
        started_at: Option<DateTime<Utc>>,
    ) {
        let kind = match state {
            SessionState::Completed => EventKind::Completed,
            SessionState::Failed => EventKind::Failed,
            SessionState::Cancelled => EventKind::Cancelled,
            SessionState::Queued | SessionState::Running => EventKind::Progress,
        };
        self.emit(kind, None, message);

        let record = SessionRecord {
            target: self.target.clone(),
            state,
            last_step,
            reason,
            message: message.to_string(),
            started_at,
            finished_at: Utc::now(),
        };
        self.records.insert(self.target.clone(), record.clone());
        self.outcomes.record(&record).await;

        info!("Session {} finished: {:?} - {}", self.target, state, message);
    }
}
