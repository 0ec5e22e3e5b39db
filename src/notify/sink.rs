use super::PowerEvent;
use crate::error::{ConductorError, Result};
use async_trait::async_trait;
use tokio::sync::mpsc;

/// Destination for power events (the external workload scheduler)
#[async_trait]
pub trait PowerEventSink: Send + Sync {
    async fn deliver(&self, event: &PowerEvent) -> Result<()>;

    fn name(&self) -> &str;
}

/// In-process sink backed by an unbounded tokio channel
#[derive(Debug, Clone)]
pub struct ChannelSink {
    tx: mpsc::UnboundedSender<PowerEvent>,
}

impl ChannelSink {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<PowerEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

#[async_trait]
impl PowerEventSink for ChannelSink {
    async fn deliver(&self, event: &PowerEvent) -> Result<()> {
        self.tx
            .send(event.clone())
            .map_err(|_| ConductorError::notification("event receiver closed"))
    }

    fn name(&self) -> &str {
        "channel"
    }
}

/// POSTs each event as JSON to the scheduler's callback endpoint
#[cfg(feature = "webhook")]
#[derive(Debug, Clone)]
pub struct WebhookSink {
    client: reqwest::Client,
    url: String,
}

#[cfg(feature = "webhook")]
impl WebhookSink {
    pub fn new(url: impl Into<String>, timeout: std::time::Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| ConductorError::notification(format!("Failed to build HTTP client: {}", e)))?;
        Ok(Self {
            client,
            url: url.into(),
        })
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}

#[cfg(feature = "webhook")]
#[async_trait]
impl PowerEventSink for WebhookSink {
    async fn deliver(&self, event: &PowerEvent) -> Result<()> {
        self.client
            .post(&self.url)
            .json(event)
            .send()
            .await
            .and_then(|response| response.error_for_status())
            .map_err(|e| ConductorError::notification(format!("POST {} failed: {}", self.url, e)))?;
        Ok(())
    }

    fn name(&self) -> &str {
        "webhook"
    }
}
