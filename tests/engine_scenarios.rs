//! End-to-end engine scenarios against a recording fake driver.
//!
//! The fake counts opened/closed sessions, tracks the concurrent-session
//! high-water mark and records every primitive it receives, so the tests can
//! assert the engine's isolation, ordering and handle-release guarantees.

use std::collections::HashSet;
use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;

use profile_runner::driver::{Driver, DriverError, DriverHandle, PrimitiveStatus};
use profile_runner::engine::{
    BatchHandle, BatchScheduler, BatchSpec, EngineConfig, EventKind, FailureReason, LogSink,
    SessionState,
};
use profile_runner::script::{ActionKind, BoundParams, Script, Step};

#[derive(Default)]
struct DriverState {
    opens: AtomicU64,
    closes: AtomicU64,
    concurrent: AtomicI64,
    peak_concurrent: AtomicI64,
    primitives: Mutex<Vec<(String, ActionKind)>>,
    primitive_count: AtomicU64,
    fail_open: Mutex<HashSet<String>>,
    fail_action: Mutex<Option<ActionKind>>,
    #[allow(clippy::type_complexity)]
    on_primitive: Mutex<Option<Box<dyn Fn(u64) + Send + Sync>>>,
}

/// Fake driver with configurable faults and a per-primitive delay.
struct RecordingDriver {
    state: Arc<DriverState>,
    step_delay: Duration,
}

impl RecordingDriver {
    fn new(step_delay: Duration) -> Self {
        Self {
            state: Arc::new(DriverState::default()),
            step_delay,
        }
    }

    fn fail_open_for(&self, target: &str) {
        self.state
            .fail_open
            .lock()
            .unwrap()
            .insert(target.to_string());
    }

    fn fail_on_action(&self, action: ActionKind) {
        *self.state.fail_action.lock().unwrap() = Some(action);
    }

    fn on_primitive(&self, callback: impl Fn(u64) + Send + Sync + 'static) {
        *self.state.on_primitive.lock().unwrap() = Some(Box::new(callback));
    }

    fn opens(&self) -> u64 {
        self.state.opens.load(Ordering::SeqCst)
    }

    fn closes(&self) -> u64 {
        self.state.closes.load(Ordering::SeqCst)
    }

    fn peak_concurrent(&self) -> i64 {
        self.state.peak_concurrent.load(Ordering::SeqCst)
    }

    fn primitives(&self) -> Vec<(String, ActionKind)> {
        self.state.primitives.lock().unwrap().clone()
    }
}

#[async_trait]
impl Driver for RecordingDriver {
    async fn open_session(&self, target: &str) -> Result<Box<dyn DriverHandle>, DriverError> {
        if self.state.fail_open.lock().unwrap().contains(target) {
            return Err(DriverError::LaunchFailed(format!(
                "launch refused for {target}"
            )));
        }

        self.state.opens.fetch_add(1, Ordering::SeqCst);
        let now = self.state.concurrent.fetch_add(1, Ordering::SeqCst) + 1;
        self.state.peak_concurrent.fetch_max(now, Ordering::SeqCst);

        Ok(Box::new(RecordingHandle {
            target: target.to_string(),
            state: self.state.clone(),
            step_delay: self.step_delay,
        }))
    }
}

struct RecordingHandle {
    target: String,
    state: Arc<DriverState>,
    step_delay: Duration,
}

#[async_trait]
impl DriverHandle for RecordingHandle {
    async fn run_primitive(
        &mut self,
        action: ActionKind,
        _locator: Option<&str>,
        _input: Option<&str>,
    ) -> Result<PrimitiveStatus, DriverError> {
        if *self.state.fail_action.lock().unwrap() == Some(action) {
            return Err(DriverError::InteractionFailed(format!(
                "{action} rejected by fake driver"
            )));
        }

        tokio::time::sleep(self.step_delay).await;

        self.state
            .primitives
            .lock()
            .unwrap()
            .push((self.target.clone(), action));
        let count = self.state.primitive_count.fetch_add(1, Ordering::SeqCst) + 1;
        if let Some(callback) = self.state.on_primitive.lock().unwrap().as_ref() {
            callback(count);
        }

        Ok(PrimitiveStatus::Ok)
    }

    async fn close(&mut self) -> Result<(), DriverError> {
        self.state.closes.fetch_add(1, Ordering::SeqCst);
        self.state.concurrent.fetch_sub(1, Ordering::SeqCst);
        Ok(())
    }
}

fn click_step(index: u32) -> Step {
    Step {
        index,
        action: ActionKind::Click,
        locator: Some(format!("css:#button-{index}")),
        input: None,
        desc: format!("click button {index}"),
    }
}

fn click_script(steps: u32) -> Arc<Script> {
    Arc::new(Script {
        id: "clicks".into(),
        platform: "web".into(),
        description: String::new(),
        steps: (1..=steps).map(click_step).collect(),
    })
}

fn targets(n: usize) -> Vec<String> {
    (1..=n).map(|i| format!("profile-{i}")).collect()
}

fn spec(targets: Vec<String>, script: Arc<Script>, concurrency: usize) -> BatchSpec {
    BatchSpec {
        targets,
        script,
        params: BoundParams::new(),
        concurrency,
        launch_delay: Duration::ZERO,
        session_deadline: None,
    }
}

fn scheduler(driver: &RecordingDriver) -> BatchScheduler {
    let driver = Arc::new(RecordingDriver {
        state: driver.state.clone(),
        step_delay: driver.step_delay,
    });
    BatchScheduler::new(driver, Arc::new(LogSink), EngineConfig::default())
}

async fn wait_finished(handle: &BatchHandle) {
    tokio::time::timeout(Duration::from_secs(30), handle.wait())
        .await
        .expect("batch did not finish in time");
}

/// Scenario A: 5 targets under a ceiling of 2 all complete, and the driver
/// never observes more than 2 concurrent sessions.
#[tokio::test]
async fn test_batch_respects_concurrency_ceiling() {
    let driver = RecordingDriver::new(Duration::from_millis(20));
    let scheduler = scheduler(&driver);

    let handle = scheduler
        .submit(spec(targets(5), click_script(3), 2))
        .unwrap();
    wait_finished(&handle).await;

    let status = handle.status();
    assert_eq!(status.counts.completed, 5);
    assert_eq!(status.counts.failed, 0);
    assert_eq!(status.counts.cancelled, 0);
    assert!(status.counts.peak_running <= 2);
    assert!(driver.peak_concurrent() <= 2);
    assert_eq!(driver.opens(), 5);
    assert_eq!(driver.closes(), 5);
}

/// Scenario B: one target's launch fails; its siblings are unaffected.
#[tokio::test]
async fn test_acquisition_failure_is_isolated() {
    let driver = RecordingDriver::new(Duration::from_millis(5));
    driver.fail_open_for("profile-2");
    let scheduler = scheduler(&driver);

    let handle = scheduler
        .submit(spec(targets(3), click_script(2), 3))
        .unwrap();
    wait_finished(&handle).await;

    let status = handle.status();
    assert_eq!(status.counts.completed, 2);
    assert_eq!(status.counts.failed, 1);

    let record = handle.result("profile-2").unwrap();
    assert_eq!(record.state, SessionState::Failed);
    assert_eq!(record.reason, Some(FailureReason::AcquisitionError));
    assert_eq!(record.last_step, None);

    assert_eq!(handle.result("profile-1").unwrap().state, SessionState::Completed);
    assert_eq!(handle.result("profile-3").unwrap().state, SessionState::Completed);

    // Every opened session was closed, including on the happy paths.
    assert_eq!(driver.opens(), 2);
    assert_eq!(driver.closes(), 2);
}

/// Scenario C: cancellation after step 2 stops the session at the next step
/// boundary; exactly steps 1-2 ran and the handle was closed once.
#[tokio::test]
async fn test_cancellation_stops_at_step_boundary() {
    let driver = RecordingDriver::new(Duration::from_millis(10));
    let scheduler = scheduler(&driver);

    let cancel_cell: Arc<Mutex<Option<BatchHandle>>> = Arc::new(Mutex::new(None));
    {
        let cancel_cell = cancel_cell.clone();
        driver.on_primitive(move |count| {
            if count == 2 {
                if let Some(handle) = cancel_cell.lock().unwrap().as_ref() {
                    handle.cancel("profile-1");
                }
            }
        });
    }

    let handle = scheduler
        .submit(spec(targets(1), click_script(4), 1))
        .unwrap();
    *cancel_cell.lock().unwrap() = Some(handle.clone());
    wait_finished(&handle).await;

    let record = handle.result("profile-1").unwrap();
    assert_eq!(record.state, SessionState::Cancelled);
    assert_eq!(record.last_step, Some(2));

    let executed = driver.primitives();
    assert_eq!(executed.len(), 2);

    let events = handle.session_events("profile-1");
    assert!(events
        .iter()
        .all(|e| e.step_index.map_or(true, |index| index <= 2)));
    assert_eq!(events.last().unwrap().kind, EventKind::Cancelled);

    assert_eq!(driver.opens(), 1);
    assert_eq!(driver.closes(), 1);
}

/// A step fault fails the session at that step: exactly one step-failed event
/// carries the failing index and nothing later ever ran.
#[tokio::test]
async fn test_step_fault_records_failing_index() {
    let driver = RecordingDriver::new(Duration::from_millis(5));
    driver.fail_on_action(ActionKind::EnterText);
    let scheduler = scheduler(&driver);

    let script = Arc::new(Script {
        id: "login".into(),
        platform: "web".into(),
        description: String::new(),
        steps: vec![
            click_step(1),
            Step {
                index: 2,
                action: ActionKind::EnterText,
                locator: Some("css:#user".into()),
                input: Some("someone".into()),
                desc: "enter username".into(),
            },
            click_step(3),
        ],
    });

    let handle = scheduler.submit(spec(targets(1), script, 1)).unwrap();
    wait_finished(&handle).await;

    let record = handle.result("profile-1").unwrap();
    assert_eq!(record.state, SessionState::Failed);
    assert_eq!(record.reason, Some(FailureReason::StepFault));
    assert_eq!(record.last_step, Some(2));

    let events = handle.session_events("profile-1");
    let step_failed: Vec<_> = events
        .iter()
        .filter(|e| e.kind == EventKind::StepFailed)
        .collect();
    assert_eq!(step_failed.len(), 1);
    assert_eq!(step_failed[0].step_index, Some(2));
    assert!(events
        .iter()
        .all(|e| e.step_index.map_or(true, |index| index <= 2)));

    // Only step 1 reached the driver successfully; step 2 faulted before
    // being recorded and step 3 never ran.
    let executed = driver.primitives();
    assert_eq!(executed.len(), 1);
    assert_eq!(executed[0].1, ActionKind::Click);
    assert_eq!(driver.opens(), 1);
    assert_eq!(driver.closes(), 1);
}

/// Cancelling a still-queued request prevents it from ever starting: no driver
/// session is opened for it.
#[tokio::test]
async fn test_cancelling_a_queued_request_never_starts_it() {
    let driver = RecordingDriver::new(Duration::from_millis(100));
    let scheduler = scheduler(&driver);

    let handle = scheduler
        .submit(spec(targets(2), click_script(3), 1))
        .unwrap();
    // profile-1 occupies the single slot for ~300ms; profile-2 is still queued.
    handle.cancel("profile-2");
    wait_finished(&handle).await;

    let record = handle.result("profile-2").unwrap();
    assert_eq!(record.state, SessionState::Cancelled);
    assert_eq!(record.started_at, None);

    assert_eq!(handle.result("profile-1").unwrap().state, SessionState::Completed);
    assert_eq!(driver.opens(), 1);
    assert_eq!(driver.closes(), 1);
}

/// Cancel is idempotent: repeating it, or cancelling a terminal session,
/// changes nothing.
#[tokio::test]
async fn test_cancel_is_idempotent() {
    let driver = RecordingDriver::new(Duration::from_millis(5));
    let scheduler = scheduler(&driver);

    let handle = scheduler
        .submit(spec(targets(1), click_script(2), 1))
        .unwrap();
    wait_finished(&handle).await;

    let before = handle.status();
    assert_eq!(before.counts.completed, 1);

    assert!(handle.cancel("profile-1"));
    assert!(handle.cancel("profile-1"));
    assert!(!handle.cancel("profile-unknown"));

    let after = handle.status();
    assert_eq!(after.counts.completed, 1);
    assert_eq!(after.counts.cancelled, 0);
}

/// cancel_all drives every remaining session to a terminal state without
/// leaking a single handle.
#[tokio::test]
async fn test_cancel_all_reaches_terminal_states_without_leaks() {
    let driver = RecordingDriver::new(Duration::from_millis(50));
    let scheduler = scheduler(&driver);

    let handle = scheduler
        .submit(spec(targets(4), click_script(4), 1))
        .unwrap();
    tokio::time::sleep(Duration::from_millis(60)).await;
    handle.cancel_all();
    wait_finished(&handle).await;

    let status = handle.status();
    assert_eq!(status.counts.queued, 0);
    assert_eq!(status.counts.running, 0);
    assert_eq!(
        status.counts.completed + status.counts.failed + status.counts.cancelled,
        4
    );
    assert!(status.counts.cancelled >= 3);
    assert!(status.finished);

    assert_eq!(driver.opens(), driver.closes());
}

/// An exceeded per-session deadline fails the session at the next step
/// boundary with the deadline reason.
#[tokio::test]
async fn test_session_deadline_fails_at_step_boundary() {
    let driver = RecordingDriver::new(Duration::ZERO);
    let scheduler = scheduler(&driver);

    let script = Arc::new(Script {
        id: "slow".into(),
        platform: "web".into(),
        description: String::new(),
        steps: vec![
            Step {
                index: 1,
                action: ActionKind::Wait,
                locator: None,
                input: Some("0.3".into()),
                desc: "long pause".into(),
            },
            Step {
                index: 2,
                action: ActionKind::Wait,
                locator: None,
                input: Some("0.3".into()),
                desc: "another pause".into(),
            },
        ],
    });

    let mut spec = spec(targets(1), script, 1);
    spec.session_deadline = Some(Duration::from_millis(50));

    let handle = scheduler.submit(spec).unwrap();
    wait_finished(&handle).await;

    let record = handle.result("profile-1").unwrap();
    assert_eq!(record.state, SessionState::Failed);
    assert_eq!(record.reason, Some(FailureReason::DeadlineExceeded));
    assert_eq!(record.last_step, Some(1));

    // Wait steps never touch the driver, but the handle still cycled once.
    assert!(driver.primitives().is_empty());
    assert_eq!(driver.opens(), 1);
    assert_eq!(driver.closes(), 1);
}

/// The inter-launch delay keeps a minimum gap between session starts even
/// when slots are free.
#[tokio::test]
async fn test_inter_launch_delay_spaces_session_starts() {
    let driver = RecordingDriver::new(Duration::ZERO);
    let scheduler = scheduler(&driver);

    let mut spec = spec(targets(3), click_script(1), 3);
    spec.launch_delay = Duration::from_millis(80);

    let started = std::time::Instant::now();
    let handle = scheduler.submit(spec).unwrap();
    wait_finished(&handle).await;

    // Three launches with an 80ms minimum gap need at least 160ms in total.
    assert!(started.elapsed() >= Duration::from_millis(160));
    assert_eq!(handle.status().counts.completed, 3);
}
