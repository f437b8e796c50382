//! Terminal outcome sinks
//!
//! On every terminal transition the engine hands the session record to an
//! [`OutcomeSink`] for external persistence. The engine itself keeps no durable
//! state and may be restarted between batches. Delivery is best-effort: sink
//! failures are logged and never change an already-determined outcome.

use std::time::Duration;

use async_trait::async_trait;
use tracing::{debug, info, warn};
use url::Url;

use super::batch::SessionRecord;

/// Receives terminal session records for external persistence.
#[async_trait]
pub trait OutcomeSink: Send + Sync {
    async fn record(&self, record: &SessionRecord);
}

/// Default sink: one structured log line per terminal session.
pub struct LogSink;

#[async_trait]
impl OutcomeSink for LogSink {
    async fn record(&self, record: &SessionRecord) {
        info!(
            "Session {} terminal: {:?} (last step: {:?}, reason: {:?}) - {}",
            record.target, record.state, record.last_step, record.reason, record.message
        );
    }
}

/// Posts each terminal record as JSON to an external endpoint.
pub struct WebhookSink {
    client: reqwest::Client,
    endpoint: Url,
}

impl WebhookSink {
    /// Build a sink for the given endpoint URL.
    pub fn new(endpoint: &str) -> anyhow::Result<Self> {
        let endpoint = Url::parse(endpoint)?;
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .build()?;
        Ok(Self { client, endpoint })
    }
}

#[async_trait]
impl OutcomeSink for WebhookSink {
    async fn record(&self, record: &SessionRecord) {
        let result = self
            .client
            .post(self.endpoint.clone())
            .json(record)
            .send()
            .await;

        match result {
            Ok(response) if response.status().is_success() => {
                debug!("Delivered outcome for {} to {}", record.target, self.endpoint);
            }
            Ok(response) => {
                warn!(
                    "Outcome webhook returned HTTP {} for {}",
                    response.status(),
                    record.target
                );
            }
            Err(e) => {
                warn!("Failed to deliver outcome for {}: {}", record.target, e);
            }
        }
    }
}
