//! Session progress events
//!
//! Every state transition and per-step outcome produces exactly one event.
//! Events are buffered per session in a bounded ring with a drop-oldest policy
//! so a slow consumer can never stall step execution; consumers drain the
//! buffers. Ordering within one session is strict program order, ordering
//! across sessions is unspecified.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

/// Event classification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum EventKind {
    Progress,
    StepFailed,
    Completed,
    Failed,
    Cancelled,
}

/// One progress or terminal event for a session. Append-only.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionEvent {
    pub target: String,
    pub step_index: Option<u32>,
    pub kind: EventKind,
    pub message: String,
    pub timestamp: DateTime<Utc>,
}

impl SessionEvent {
    pub(crate) fn now(
        target: &str,
        kind: EventKind,
        step_index: Option<u32>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            target: target.to_string(),
            step_index,
            kind,
            message: message.into(),
            timestamp: Utc::now(),
        }
    }
}

struct SessionBuffer {
    queue: Mutex<VecDeque<SessionEvent>>,
}

impl SessionBuffer {
    fn new() -> Self {
        Self {
            queue: Mutex::new(VecDeque::new()),
        }
    }
}

/// Bounded per-session event buffers for one batch.
pub struct EventHub {
    buffers: DashMap<String, SessionBuffer>,
    capacity: usize,
    dropped: AtomicU64,
}

impl EventHub {
    /// Create a hub whose per-session buffers hold up to `capacity` events.
    pub fn new(capacity: usize) -> Self {
        Self {
            buffers: DashMap::new(),
            capacity: capacity.max(1),
            dropped: AtomicU64::new(0),
        }
    }

    /// Pre-create the buffer for a target so drains are stable from the start.
    pub(crate) fn register(&self, target: &str) {
        self.buffers
            .entry(target.to_string())
            .or_insert_with(SessionBuffer::new);
    }

    /// Append an event to its session buffer, dropping the oldest buffered
    /// event when the buffer is full. Never blocks.
    pub(crate) fn emit(&self, event: SessionEvent) {
        let buffer = self
            .buffers
            .entry(event.target.clone())
            .or_insert_with(SessionBuffer::new);
        let mut queue = buffer.queue.lock();
        if queue.len() >= self.capacity {
            queue.pop_front();
            self.dropped.fetch_add(1, Ordering::Relaxed);
        }
        queue.push_back(event);
    }

    /// Drain all buffered events for one session, in emission order.
    pub fn drain(&self, target: &str) -> Vec<SessionEvent> {
        match self.buffers.get(target) {
            Some(buffer) => buffer.queue.lock().drain(..).collect(),
            None => Vec::new(),
        }
    }

    /// Drain every session buffer. Per-session order is preserved; the order
    /// between sessions is unspecified.
    pub fn drain_all(&self) -> Vec<SessionEvent> {
        let mut events = Vec::new();
        for buffer in self.buffers.iter() {
            events.extend(buffer.queue.lock().drain(..));
        }
        events
    }

    /// Total number of events dropped to the drop-oldest policy.
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}
