//! Simulated driver
//!
//! A dry-run [`Driver`] that sleeps a jittered latency per primitive instead of
//! touching a browser. Used by the server's default wiring to exercise script
//! batches end to end without an automation backend, and handy in tests for
//! verifying open/close bookkeeping.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tracing::{debug, info};

use super::{Driver, DriverError, DriverHandle, PrimitiveStatus};
use crate::script::ActionKind;

/// Latency window for simulated primitives.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SimDriverConfig {
    /// Minimum simulated latency per primitive in milliseconds.
    pub min_latency_ms: u64,
    /// Maximum simulated latency per primitive in milliseconds.
    pub max_latency_ms: u64,
}

impl Default for SimDriverConfig {
    fn default() -> Self {
        Self {
            min_latency_ms: 200,
            max_latency_ms: 800,
        }
    }
}

impl SimDriverConfig {
    fn latency(&self) -> Duration {
        let (min, max) = if self.min_latency_ms <= self.max_latency_ms {
            (self.min_latency_ms, self.max_latency_ms)
        } else {
            (self.max_latency_ms, self.min_latency_ms)
        };
        let ms = if min == max {
            min
        } else {
            // ThreadRng must not live across an await point.
            use rand::Rng;
            rand::thread_rng().gen_range(min..=max)
        };
        Duration::from_millis(ms)
    }
}

/// Dry-run driver: every primitive succeeds after a jittered delay.
pub struct SimDriver {
    config: SimDriverConfig,
    opened: Arc<AtomicU64>,
    closed: Arc<AtomicU64>,
}

impl SimDriver {
    pub fn new(config: SimDriverConfig) -> Self {
        Self {
            config,
            opened: Arc::new(AtomicU64::new(0)),
            closed: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Total sessions opened so far.
    pub fn opened(&self) -> u64 {
        self.opened.load(Ordering::Relaxed)
    }

    /// Total sessions closed so far.
    pub fn closed(&self) -> u64 {
        self.closed.load(Ordering::Relaxed)
    }
}

impl Default for SimDriver {
    fn default() -> Self {
        Self::new(SimDriverConfig::default())
    }
}

#[async_trait]
impl Driver for SimDriver {
    async fn open_session(&self, target: &str) -> Result<Box<dyn DriverHandle>, DriverError> {
        let delay = self.config.latency();
        tokio::time::sleep(delay).await;

        self.opened.fetch_add(1, Ordering::Relaxed);
        info!("Sim session opened for {}", target);

        Ok(Box::new(SimHandle {
            target: target.to_string(),
            config: self.config.clone(),
            closed: self.closed.clone(),
        }))
    }
}

struct SimHandle {
    target: String,
    config: SimDriverConfig,
    closed: Arc<AtomicU64>,
}

#[async_trait]
impl DriverHandle for SimHandle {
    async fn run_primitive(
        &mut self,
        action: ActionKind,
        locator: Option<&str>,
        input: Option<&str>,
    ) -> Result<PrimitiveStatus, DriverError> {
        let delay = self.config.latency();
        tokio::time::sleep(delay).await;

        debug!(
            "Sim {}: {} locator={:?} input={:?} ({}ms)",
            self.target,
            action,
            locator,
            input,
            delay.as_millis()
        );
        Ok(PrimitiveStatus::Ok)
    }

    async fn close(&mut self) -> Result<(), DriverError> {
        self.closed.fetch_add(1, Ordering::Relaxed);
        debug!("Sim session closed for {}", self.target);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_sim_driver_counts_open_and_close() {
        let driver = SimDriver::new(SimDriverConfig {
            min_latency_ms: 0,
            max_latency_ms: 0,
        });

        let mut handle = driver.open_session("profile-1").await.unwrap();
        let status = handle
            .run_primitive(ActionKind::OpenUrl, None, Some("https://example.com"))
            .await
            .unwrap();
        assert_eq!(status, PrimitiveStatus::Ok);

        handle.close().await.unwrap();
        assert_eq!(driver.opened(), 1);
        assert_eq!(driver.closed(), 1);
    }

    #[test]
    fn test_latency_window_is_respected() {
        let config = SimDriverConfig {
            min_latency_ms: 10,
            max_latency_ms: 20,
        };
        for _ in 0..50 {
            let d = config.latency().as_millis() as u64;
            assert!((10..=20).contains(&d));
        }
    }
}
