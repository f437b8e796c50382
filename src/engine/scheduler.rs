//! Session scheduler
//!
//! Admits a batch of session requests under a concurrency ceiling, dispatches
//! the queue FIFO with a minimum inter-launch gap, tracks aggregate counts and
//! propagates cancellation. One session's failure never aborts its siblings:
//! the batch status is a summary of independent terminal states, not a
//! short-circuit.

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use dashmap::DashMap;
use futures::future::join_all;
use serde::Serialize;
use tokio::sync::{watch, Semaphore};
use tracing::{error, info};
use uuid::Uuid;

use super::batch::{AdmissionError, BatchSpec, SessionRecord, SessionRequest};
use super::event::{EventHub, SessionEvent};
use super::outcome::OutcomeSink;
use super::worker::{CancelFlag, SessionWorker};
use crate::driver::Driver;
use crate::rate::{LaunchPacer, PacerConfig};
use crate::stats::{BatchStats, BatchStatsSnapshot};

/// Engine-wide settings shared by every batch.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Capacity of each session's event ring buffer.
    pub event_buffer_size: usize,
    /// Jitter applied on top of a batch's inter-launch delay (percent, 0-100).
    pub launch_jitter_percent: u8,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            event_buffer_size: 256,
            launch_jitter_percent: 0,
        }
    }
}

/// Aggregate status of one batch.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchStatus {
    pub batch_id: String,
    #[serde(flatten)]
    pub counts: BatchStatsSnapshot,
    pub dropped_events: u64,
    pub finished: bool,
}

/// Schedules batches of sessions against a driver.
pub struct BatchScheduler {
    driver: Arc<dyn Driver>,
    outcomes: Arc<dyn OutcomeSink>,
    config: EngineConfig,
}

impl BatchScheduler {
    pub fn new(
        driver: Arc<dyn Driver>,
        outcomes: Arc<dyn OutcomeSink>,
        config: EngineConfig,
    ) -> Self {
        Self {
            driver,
            outcomes,
            config,
        }
    }

    /// Validate and admit a batch, returning a handle for status queries,
    /// event draining and cancellation. Dispatch begins immediately.
    pub fn submit(&self, spec: BatchSpec) -> Result<BatchHandle, AdmissionError> {
        Self::validate(&spec)?;

        let id = Uuid::new_v4();
        let total = spec.targets.len();
        let stats = Arc::new(BatchStats::new(total as u64));
        let events = Arc::new(EventHub::new(self.config.event_buffer_size));
        let records: Arc<DashMap<String, SessionRecord>> = Arc::new(DashMap::new());
        let batch_cancel = Arc::new(AtomicBool::new(false));
        let controls: Arc<DashMap<String, CancelFlag>> = Arc::new(DashMap::new());

        for target in &spec.targets {
            events.register(target);
            controls.insert(target.clone(), CancelFlag::new(batch_cancel.clone()));
        }

        let (done_tx, done_rx) = watch::channel(false);

        info!(
            "Batch {} admitted: {} targets, script {}, concurrency {}, launch delay {:?}",
            id,
            total,
            spec.script.id,
            spec.concurrency,
            spec.launch_delay
        );

        tokio::spawn(Self::dispatch(
            id,
            spec,
            self.driver.clone(),
            self.outcomes.clone(),
            self.config.launch_jitter_percent,
            stats.clone(),
            events.clone(),
            records.clone(),
            controls.clone(),
            done_tx,
        ));

        Ok(BatchHandle {
            id,
            stats,
            events,
            records,
            controls,
            batch_cancel,
            done: done_rx,
        })
    }

    fn validate(spec: &BatchSpec) -> Result<(), AdmissionError> {
        if spec.targets.is_empty() {
            return Err(AdmissionError::EmptyBatch);
        }
        if spec.concurrency < 1 {
            return Err(AdmissionError::InvalidConcurrency);
        }

        let mut seen = HashSet::new();
        for target in &spec.targets {
            if !seen.insert(target.as_str()) {
                return Err(AdmissionError::DuplicateTarget(target.clone()));
            }
        }

        spec.script
            .validate()
            .map_err(|e| AdmissionError::MalformedScript(spec.script.id.clone(), e))?;

        for name in spec.script.placeholders() {
            if !spec.params.contains_key(&name) {
                return Err(AdmissionError::UnresolvedParameter(name));
            }
        }

        Ok(())
    }

    /// The per-batch dispatch loop: the single owner of the request queue.
    /// Pops requests FIFO, waits for a free slot under the ceiling, paces
    /// launches, and spawns one worker task per session.
    #[allow(clippy::too_many_arguments)]
    async fn dispatch(
        id: Uuid,
        spec: BatchSpec,
        driver: Arc<dyn Driver>,
        outcomes: Arc<dyn OutcomeSink>,
        launch_jitter_percent: u8,
        stats: Arc<BatchStats>,
        events: Arc<EventHub>,
        records: Arc<DashMap<String, SessionRecord>>,
        controls: Arc<DashMap<String, CancelFlag>>,
        done_tx: watch::Sender<bool>,
    ) {
        let semaphore = Arc::new(Semaphore::new(spec.concurrency));
        let mut pacer = LaunchPacer::new(PacerConfig {
            launch_delay_ms: spec.launch_delay.as_millis() as u64,
            jitter_percent: launch_jitter_percent,
        });

        let script = spec.script.clone();
        let params = Arc::new(spec.params.clone());
        let requests: Vec<SessionRequest> = spec
            .targets
            .iter()
            .map(|target| SessionRequest {
                target: target.clone(),
            })
            .collect();

        let mut workers = Vec::with_capacity(requests.len());

        for request in requests {
            let Some(cancel) = controls.get(&request.target).map(|c| c.value().clone()) else {
                continue;
            };

            // A request already cancelled skips slot acquisition and pacing;
            // its worker reports the cancelled terminal state without ever
            // opening a driver session.
            let permit = if cancel.is_cancelled() {
                None
            } else {
                let Ok(permit) = semaphore.clone().acquire_owned().await else {
                    break;
                };
                pacer.pace().await;
                Some(permit)
            };

            let worker = SessionWorker {
                target: request.target,
                script: script.clone(),
                params: params.clone(),
                driver: driver.clone(),
                events: events.clone(),
                stats: stats.clone(),
                records: records.clone(),
                outcomes: outcomes.clone(),
                cancel,
                deadline: spec.session_deadline,
                _permit: permit,
            };
            workers.push(tokio::spawn(worker.run()));
        }

        for result in join_all(workers).await {
            if let Err(e) = result {
                error!("Batch {}: session task panicked: {}", id, e);
            }
        }

        let _ = done_tx.send(true);
        info!("Batch {} finished: {:?}", id, stats.snapshot());
    }
}

/// Handle to one admitted batch: status, events, results and cancellation.
#[derive(Clone)]
pub struct BatchHandle {
    id: Uuid,
    stats: Arc<BatchStats>,
    events: Arc<EventHub>,
    records: Arc<DashMap<String, SessionRecord>>,
    controls: Arc<DashMap<String, CancelFlag>>,
    batch_cancel: Arc<AtomicBool>,
    done: watch::Receiver<bool>,
}

impl BatchHandle {
    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Current aggregate counts. Safe to call concurrently with dispatch.
    pub fn status(&self) -> BatchStatus {
        BatchStatus {
            batch_id: self.id.to_string(),
            counts: self.stats.snapshot(),
            dropped_events: self.events.dropped(),
            finished: self.is_finished(),
        }
    }

    /// Request cooperative cancellation of one session. Idempotent; cancelling
    /// an unknown target or an already-terminal session is a no-op. Returns
    /// whether the target belongs to this batch.
    pub fn cancel(&self, target: &str) -> bool {
        match self.controls.get(target) {
            Some(flag) => {
                flag.cancel();
                info!("Batch {}: cancellation requested for {}", self.id, target);
                true
            }
            None => false,
        }
    }

    /// Cancel every queued request and signal every running worker. Does not
    /// block; completion is observed via status and events.
    pub fn cancel_all(&self) {
        self.batch_cancel.store(true, Ordering::Relaxed);
        info!("Batch {}: cancellation requested for all sessions", self.id);
    }

    /// Drain buffered events for every session.
    pub fn drain_events(&self) -> Vec<SessionEvent> {
        self.events.drain_all()
    }

    /// Drain buffered events for one session, in emission order.
    pub fn session_events(&self, target: &str) -> Vec<SessionEvent> {
        self.events.drain(target)
    }

    /// Number of events lost to the per-session drop-oldest policy.
    pub fn dropped_events(&self) -> u64 {
        self.events.dropped()
    }

    /// Terminal records produced so far.
    pub fn results(&self) -> Vec<SessionRecord> {
        self.records.iter().map(|r| r.value().clone()).collect()
    }

    /// Terminal record for one target, if it has finished.
    pub fn result(&self, target: &str) -> Option<SessionRecord> {
        self.records.get(target).map(|r| r.value().clone())
    }

    /// True once every session has reached a terminal state.
    pub fn is_finished(&self) -> bool {
        *self.done.borrow()
    }

    /// Wait until every session has reached a terminal state.
    pub async fn wait(&self) {
        let mut done = self.done.clone();
        while !*done.borrow_and_update() {
            if done.changed().await.is_err() {
                break;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::driver::{SimDriver, SimDriverConfig};
    use crate::engine::outcome::LogSink;
    use crate::script::{ActionKind, Script, Step};
    use std::time::Duration;

    fn scheduler() -> BatchScheduler {
        let driver = Arc::new(SimDriver::new(SimDriverConfig {
            min_latency_ms: 0,
            max_latency_ms: 0,
        }));
        BatchScheduler::new(driver, Arc::new(LogSink), EngineConfig::default())
    }

    fn script() -> Arc<Script> {
        Arc::new(Script {
            id: "demo".into(),
            platform: "web".into(),
            description: String::new(),
            steps: vec![Step {
                index: 1,
                action: ActionKind::OpenUrl,
                locator: None,
                input: Some("https://example.com/{page}".into()),
                desc: "open".into(),
            }],
        })
    }

    fn spec(targets: &[&str], concurrency: usize) -> BatchSpec {
        BatchSpec {
            targets: targets.iter().map(|t| t.to_string()).collect(),
            script: script(),
            params: [("page".to_string(), "home".to_string())].into(),
            concurrency,
            launch_delay: Duration::ZERO,
            session_deadline: None,
        }
    }

    #[tokio::test]
    async fn test_empty_batch_is_rejected() {
        let result = scheduler().submit(spec(&[], 2));
        assert!(matches!(result, Err(AdmissionError::EmptyBatch)));
    }

    #[tokio::test]
    async fn test_zero_concurrency_is_rejected() {
        let result = scheduler().submit(spec(&["profile-1"], 0));
        assert!(matches!(result, Err(AdmissionError::InvalidConcurrency)));
    }

    #[tokio::test]
    async fn test_duplicate_targets_are_rejected() {
        let result = scheduler().submit(spec(&["profile-1", "profile-1"], 2));
        assert!(matches!(result, Err(AdmissionError::DuplicateTarget(_))));
    }

    #[tokio::test]
    async fn test_missing_placeholder_is_rejected_at_admission() {
        let mut spec = spec(&["profile-1"], 1);
        spec.params.clear();
        let result = scheduler().submit(spec);
        match result {
            Err(AdmissionError::UnresolvedParameter(name)) => assert_eq!(name, "page"),
            other => panic!("expected UnresolvedParameter, got {:?}", other.map(|h| h.id())),
        }
    }

    #[tokio::test]
    async fn test_single_session_batch_completes() {
        let handle = scheduler().submit(spec(&["profile-1"], 1)).unwrap();
        handle.wait().await;

        let status = handle.status();
        assert_eq!(status.counts.completed, 1);
        assert!(status.finished);

        let record = handle.result("profile-1").unwrap();
        assert_eq!(record.state, crate::engine::SessionState::Completed);
        assert_eq!(record.last_step, Some(1));
    }
}
