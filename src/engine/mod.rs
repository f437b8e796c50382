//! Session scheduling and script execution engine
//!
//! Accepts batches of (target, script, parameters) work items, admits a
//! bounded number concurrently, drives each session through its state machine
//! against an injected driver, and reports progress and terminal outcomes with
//! per-session failure isolation.

mod batch;
mod event;
mod interpreter;
mod outcome;
mod scheduler;
mod worker;

pub use batch::{
    AdmissionError, BatchSpec, FailureReason, SessionRecord, SessionRequest, SessionState,
};
pub use event::{EventHub, EventKind, SessionEvent};
pub use interpreter::{execute_step, resolve_template, StepOutcome};
pub use outcome::{LogSink, OutcomeSink, WebhookSink};
pub use scheduler::{BatchHandle, BatchScheduler, BatchStatus, EngineConfig};
