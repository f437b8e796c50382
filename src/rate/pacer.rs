//! Launch pacer with optional jitter
//!
//! Enforces a minimum wall-clock gap between successive session launches so a
//! batch does not fire correlated bursts against the target service.

use std::time::{Duration, Instant};

use rand::Rng;
use tokio::time::sleep;
use tracing::debug;

/// Launch pacing configuration.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PacerConfig {
    /// Minimum delay between session launches in milliseconds.
    pub launch_delay_ms: u64,
    /// Additional jitter on top of the base delay (percentage, 0-100).
    /// Jitter only ever lengthens the gap; the base delay is a hard floor.
    pub jitter_percent: u8,
}

impl Default for PacerConfig {
    fn default() -> Self {
        Self {
            launch_delay_ms: 1000,
            jitter_percent: 0,
        }
    }
}

impl PacerConfig {
    /// Calculate the gap for the next launch: base delay plus random jitter.
    pub fn gap_ms(&self) -> u64 {
        let base = self.launch_delay_ms;
        let jitter_range = base * self.jitter_percent as u64 / 100;
        if jitter_range == 0 {
            return base;
        }
        base + rand::thread_rng().gen_range(0..=jitter_range)
    }
}

/// Paces session launches within one batch.
pub struct LaunchPacer {
    config: PacerConfig,
    last_launch: Option<Instant>,
}

impl LaunchPacer {
    /// Create a new pacer with the given config.
    pub fn new(config: PacerConfig) -> Self {
        Self {
            config,
            last_launch: None,
        }
    }

    /// Get current configuration.
    pub fn config(&self) -> &PacerConfig {
        &self.config
    }

    /// Wait until at least the configured gap has elapsed since the previous
    /// launch, then record this launch. The first launch never waits.
    pub async fn pace(&mut self) {
        if self.config.launch_delay_ms > 0 {
            if let Some(last) = self.last_launch {
                let gap = Duration::from_millis(self.config.gap_ms());
                let elapsed = last.elapsed();
                if elapsed < gap {
                    let remaining = gap - elapsed;
                    debug!("Launch pacer waiting {}ms", remaining.as_millis());
                    sleep(remaining).await;
                }
            }
        }
        self.last_launch = Some(Instant::now());
    }
}
