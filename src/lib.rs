//! Profile Runner
//!
//! Multi-profile browser automation: runs scripted, multi-step tasks (post a
//! video, sign in, ...) across many independent browser-profile sessions under
//! a concurrency ceiling, with per-session progress reporting and failure
//! isolation. The engine drives an injected [`driver::Driver`]; the bundled
//! simulated driver lets the headless server mode exercise batches without a
//! real automation backend.

pub mod driver;
pub mod engine;
pub mod rate;
pub mod script;
pub mod stats;
pub mod web;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use thiserror::Error;
use tokio::sync::RwLock;
use tracing::{error, info, warn};
use uuid::Uuid;

use driver::{Driver, SimDriver, SimDriverConfig};
use engine::{
    AdmissionError, BatchHandle, BatchScheduler, BatchSpec, BatchStatus, EngineConfig, LogSink,
    OutcomeSink, WebhookSink,
};
use script::{BoundParams, ScriptStore, StoreError};

/// Application configuration
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AppConfig {
    /// Directory searched (recursively) for script JSON files
    pub scripts_dir: String,

    /// Default concurrency ceiling for submitted batches
    pub concurrent_sessions: usize,

    /// Default minimum gap between session launches in milliseconds
    pub launch_delay_ms: u64,
    /// Jitter added on top of the launch delay (percentage, 0-100)
    #[serde(default)]
    pub launch_jitter_percent: u8,

    /// Capacity of each session's event buffer (drop-oldest beyond this)
    pub event_buffer_size: usize,

    /// Optional per-session deadline in seconds (0/absent = none)
    #[serde(default)]
    pub session_deadline_secs: Option<u64>,

    /// How long loaded scripts are cached before re-reading from disk
    #[serde(default = "default_script_cache_ttl")]
    pub script_cache_ttl_secs: u64,

    /// Optional webhook URL receiving terminal session records as JSON
    #[serde(default)]
    pub outcome_webhook: Option<String>,

    /// Simulated driver latency window (server default wiring)
    #[serde(default)]
    pub sim: SimDriverConfig,
}

fn default_script_cache_ttl() -> u64 {
    30
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            scripts_dir: "scripts".to_string(),
            concurrent_sessions: 5,
            launch_delay_ms: 1000,
            launch_jitter_percent: 0,
            event_buffer_size: 256,
            session_deadline_secs: None,
            script_cache_ttl_secs: default_script_cache_ttl(),
            outcome_webhook: None,
            sim: SimDriverConfig::default(),
        }
    }
}

/// Get log directory path (shared across modules)
pub fn log_dir() -> Option<PathBuf> {
    dirs::config_dir().map(|p| p.join("profile-runner").join("logs"))
}

impl AppConfig {
    /// Get config file path
    fn config_path() -> Option<PathBuf> {
        dirs::config_dir().map(|p| p.join("profile-runner").join("config.json"))
    }

    /// Load config from file
    pub fn load() -> Self {
        if let Some(path) = Self::config_path() {
            if path.exists() {
                match std::fs::read_to_string(&path) {
                    Ok(content) => match serde_json::from_str(&content) {
                        Ok(config) => {
                            info!("Loaded config from {:?}", path);
                            return config;
                        }
                        Err(e) => {
                            warn!("Failed to parse config file: {}", e);
                        }
                    },
                    Err(e) => {
                        warn!("Failed to read config file: {}", e);
                    }
                }
            }
        }
        Self::default()
    }

    /// Save config to file
    pub fn save(&self) {
        if let Some(path) = Self::config_path() {
            if let Some(parent) = path.parent() {
                if let Err(e) = std::fs::create_dir_all(parent) {
                    error!("Failed to create config directory: {}", e);
                    return;
                }
            }

            match serde_json::to_string_pretty(self) {
                Ok(content) => {
                    if let Err(e) = std::fs::write(&path, content) {
                        error!("Failed to save config: {}", e);
                    } else {
                        info!("Config saved to {:?}", path);
                    }
                }
                Err(e) => {
                    error!("Failed to serialize config: {}", e);
                }
            }
        }
    }
}

/// One batch submission as accepted by the public surface. Omitted knobs fall
/// back to the configured defaults.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchSubmission {
    pub targets: Vec<String>,
    pub script_id: String,
    #[serde(default)]
    pub params: BoundParams,
    #[serde(default)]
    pub concurrency: Option<usize>,
    #[serde(default)]
    pub launch_delay_ms: Option<u64>,
    #[serde(default)]
    pub session_deadline_secs: Option<u64>,
}

/// Submission errors: either the script could not be loaded or the batch was
/// rejected at admission.
#[derive(Error, Debug)]
pub enum SubmitError {
    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Admission(#[from] AdmissionError),
}

/// Application state shared across the app
pub struct AppState {
    /// Application configuration
    pub config: Arc<RwLock<AppConfig>>,
    /// Script store
    pub script_store: Arc<ScriptStore>,
    /// Batch scheduler
    pub scheduler: Arc<BatchScheduler>,
    /// All batches submitted this process lifetime
    pub batches: DashMap<Uuid, BatchHandle>,
}

impl AppState {
    /// Create application state with the loaded config and the simulated
    /// driver (server default wiring).
    pub fn new() -> Self {
        let config = AppConfig::load();
        let driver = Arc::new(SimDriver::new(config.sim.clone()));
        Self::with_driver(config, driver)
    }

    /// Create application state around an externally supplied driver.
    pub fn with_driver(config: AppConfig, driver: Arc<dyn Driver>) -> Self {
        let outcomes: Arc<dyn OutcomeSink> = match config.outcome_webhook.as_deref() {
            Some(url) => match WebhookSink::new(url) {
                Ok(sink) => {
                    info!("Outcome webhook enabled: {}", url);
                    Arc::new(sink)
                }
                Err(e) => {
                    warn!("Invalid outcome webhook '{}', falling back to log sink: {}", url, e);
                    Arc::new(LogSink)
                }
            },
            None => Arc::new(LogSink),
        };

        let script_store = Arc::new(ScriptStore::new(
            &config.scripts_dir,
            Duration::from_secs(config.script_cache_ttl_secs),
        ));

        let scheduler = Arc::new(BatchScheduler::new(
            driver,
            outcomes,
            EngineConfig {
                event_buffer_size: config.event_buffer_size,
                launch_jitter_percent: config.launch_jitter_percent,
            },
        ));

        Self {
            config: Arc::new(RwLock::new(config)),
            script_store,
            scheduler,
            batches: DashMap::new(),
        }
    }

    /// Submit a batch: load the script, apply configured defaults, admit it
    /// and register the handle.
    pub async fn submit(&self, submission: BatchSubmission) -> Result<BatchHandle, SubmitError> {
        let config = self.config.read().await.clone();
        let script = self.script_store.load(&submission.script_id).await?;

        let spec = BatchSpec {
            targets: submission.targets,
            script,
            params: submission.params,
            concurrency: submission.concurrency.unwrap_or(config.concurrent_sessions),
            launch_delay: Duration::from_millis(
                submission.launch_delay_ms.unwrap_or(config.launch_delay_ms),
            ),
            session_deadline: submission
                .session_deadline_secs
                .or(config.session_deadline_secs)
                .map(Duration::from_secs),
        };

        let handle = self.scheduler.submit(spec)?;
        self.batches.insert(handle.id(), handle.clone());
        Ok(handle)
    }

    /// Look up a previously submitted batch.
    pub fn batch(&self, id: &Uuid) -> Option<BatchHandle> {
        self.batches.get(id).map(|h| h.value().clone())
    }

    /// Status snapshots of every batch submitted this process lifetime.
    pub fn batch_statuses(&self) -> Vec<BatchStatus> {
        self.batches.iter().map(|h| h.status()).collect()
    }

    /// Apply and persist new configuration.
    ///
    /// Defaults (concurrency, launch delay, deadline) apply to future
    /// submissions; the scripts directory and driver wiring are fixed at
    /// startup.
    pub async fn configure(&self, config: AppConfig) {
        config.save();
        *self.config.write().await = config;
        info!("Application configured");
    }
}

impl Default for AppState {
    fn default() -> Self {
        Self::new()
    }
}

/// Initialize logging (console + daily-rolling file layer)
pub fn init_logging() -> Option<tracing_appender::non_blocking::WorkerGuard> {
    use tracing_subscriber::layer::SubscriberExt;
    use tracing_subscriber::util::SubscriberInitExt;

    let env_filter = tracing_subscriber::EnvFilter::from_default_env()
        .add_directive(tracing::Level::INFO.into());

    let console_layer = tracing_subscriber::fmt::layer()
        .with_target(true)
        .with_thread_ids(false);

    if let Some(log_dir) = log_dir() {
        let _ = std::fs::create_dir_all(&log_dir);
        let file_appender = tracing_appender::rolling::daily(&log_dir, "profile-runner.log");
        let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

        let file_layer = tracing_subscriber::fmt::layer()
            .with_ansi(false)
            .with_target(true)
            .with_thread_ids(true)
            .with_writer(non_blocking);

        tracing_subscriber::registry()
            .with(env_filter)
            .with(console_layer)
            .with(file_layer)
            .init();

        Some(guard)
    } else {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(console_layer)
            .init();

        None
    }
}
