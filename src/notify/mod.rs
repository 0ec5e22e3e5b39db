//! Power-change notifications to the external workload scheduler
//!
//! Delivery is best-effort: each event is handed to a spawned task and the
//! caller moves on. A failed delivery is logged and forgotten; the state
//! change that triggered it stands.
//!
//! The scheduler also polls our records on its own schedule. If it samples a
//! node after the record changed but before the event lands, it may act on
//! its own view first. That window is accepted and not closed here.

mod sink;

#[cfg(feature = "webhook")]
pub use sink::WebhookSink;
pub use sink::{ChannelSink, PowerEventSink};

use crate::config::ConductorConfig;
use crate::error::Result;
use crate::types::PowerState;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, warn};

/// Who asked for a power change
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeOrigin {
    /// The sync loop corrected a discrepancy
    Conductor,
    /// A command through the operator surface
    Operator,
    /// A command sent by the scheduler itself, which already knows
    Scheduler,
}

impl ChangeOrigin {
    pub fn is_core_initiated(self) -> bool {
        !matches!(self, ChangeOrigin::Scheduler)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PowerEvent {
    pub node_id: String,
    pub power_state: PowerState,
    pub previous_state: PowerState,
    pub conductor_id: String,
    pub emitted_at: DateTime<Utc>,
}

#[derive(Debug, Default)]
struct DispatchStats {
    emitted: AtomicU64,
    delivered: AtomicU64,
    failed: AtomicU64,
    suppressed: AtomicU64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct DispatchCounters {
    pub emitted: u64,
    pub delivered: u64,
    pub failed: u64,
    pub suppressed: u64,
}

pub struct NotificationDispatcher {
    conductor_id: String,
    enabled: bool,
    sink: Option<Arc<dyn PowerEventSink>>,
    stats: Arc<DispatchStats>,
}

impl NotificationDispatcher {
    pub fn new(
        conductor_id: impl Into<String>,
        enabled: bool,
        sink: Option<Arc<dyn PowerEventSink>>,
    ) -> Self {
        Self {
            conductor_id: conductor_id.into(),
            enabled,
            sink,
            stats: Arc::new(DispatchStats::default()),
        }
    }

    pub fn disabled(conductor_id: impl Into<String>) -> Self {
        Self::new(conductor_id, false, None)
    }

    /// Build from config, using the webhook sink when an endpoint is set
    pub fn from_config(config: &ConductorConfig) -> Result<Self> {
        let sink: Option<Arc<dyn PowerEventSink>> = match &config.notification_webhook {
            #[cfg(feature = "webhook")]
            Some(url) => Some(Arc::new(WebhookSink::new(url.clone(), config.hardware_call_timeout())?)),
            #[cfg(not(feature = "webhook"))]
            Some(url) => {
                warn!(%url, "Webhook notifications requested but the webhook feature is disabled");
                None
            }
            None => None,
        };
        Ok(Self::new(config.conductor_id.clone(), config.notifications_enabled, sink))
    }

    pub fn is_active(&self) -> bool {
        self.enabled && self.sink.is_some()
    }

    /// Tell the scheduler that `node_id` moved from `previous` to `state`.
    ///
    /// Only `on`/`off` transitions this conductor initiated are sent.
    /// Returns whether an event was handed off; delivery happens later on a
    /// spawned task and its outcome never reaches the caller.
    pub fn notify(
        &self,
        node_id: &str,
        state: PowerState,
        previous: PowerState,
        origin: ChangeOrigin,
    ) -> bool {
        if !state.is_notifiable() || !origin.is_core_initiated() || state == previous {
            self.stats.suppressed.fetch_add(1, Ordering::Relaxed);
            return false;
        }

        let sink = match (&self.sink, self.enabled) {
            (Some(sink), true) => sink.clone(),
            _ => {
                debug!(node_id, %state, "Notifications not configured, dropping power event");
                self.stats.suppressed.fetch_add(1, Ordering::Relaxed);
                return false;
            }
        };

        let event = PowerEvent {
            node_id: node_id.to_string(),
            power_state: state,
            previous_state: previous,
            conductor_id: self.conductor_id.clone(),
            emitted_at: Utc::now(),
        };
        self.stats.emitted.fetch_add(1, Ordering::Relaxed);

        let stats = self.stats.clone();
        tokio::spawn(async move {
            match sink.deliver(&event).await {
                Ok(()) => {
                    stats.delivered.fetch_add(1, Ordering::Relaxed);
                    debug!(node_id = %event.node_id, sink = sink.name(), "Power event delivered");
                }
                Err(e) => {
                    stats.failed.fetch_add(1, Ordering::Relaxed);
                    warn!(
                        node_id = %event.node_id,
                        power_state = %event.power_state,
                        sink = sink.name(),
                        "Failed to notify scheduler of power change: {}",
                        e
                    );
                }
            }
        });
        true
    }

    pub fn counters(&self) -> DispatchCounters {
        DispatchCounters {
            emitted: self.stats.emitted.load(Ordering::Relaxed),
            delivered: self.stats.delivered.load(Ordering::Relaxed),
            failed: self.stats.failed.load(Ordering::Relaxed),
            suppressed: self.stats.suppressed.load(Ordering::Relaxed),
        }
    }
}

impl std::fmt::Debug for NotificationDispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NotificationDispatcher")
            .field("conductor_id", &self.conductor_id)
            .field("enabled", &self.enabled)
            .field("sink", &self.sink.as_ref().map(|s| s.name().to_string()))
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ConductorError;

    struct FailingSink;

    #[async_trait::async_trait]
    impl PowerEventSink for FailingSink {
        async fn deliver(&self, _event: &PowerEvent) -> Result<()> {
            Err(ConductorError::notification("scheduler unreachable"))
        }

        fn name(&self) -> &str {
            "failing"
        }
    }

    fn channel_dispatcher() -> (NotificationDispatcher, tokio::sync::mpsc::UnboundedReceiver<PowerEvent>) {
        let (sink, rx) = ChannelSink::new();
        (NotificationDispatcher::new("c1", true, Some(Arc::new(sink))), rx)
    }

    #[tokio::test]
    async fn delivers_on_off_changes() {
        let (dispatcher, mut rx) = channel_dispatcher();
        assert!(dispatcher.notify("n1", PowerState::On, PowerState::Off, ChangeOrigin::Conductor));

        let event = rx.recv().await.unwrap();
        assert_eq!(event.node_id, "n1");
        assert_eq!(event.power_state, PowerState::On);
        assert_eq!(event.previous_state, PowerState::Off);
        assert_eq!(event.conductor_id, "c1");
    }

    #[tokio::test]
    async fn scoped_to_core_initiated_on_off() {
        let (dispatcher, _rx) = channel_dispatcher();
        assert!(!dispatcher.notify("n1", PowerState::Error, PowerState::On, ChangeOrigin::Conductor));
        assert!(!dispatcher.notify("n1", PowerState::Unknown, PowerState::On, ChangeOrigin::Operator));
        assert!(!dispatcher.notify("n1", PowerState::On, PowerState::Off, ChangeOrigin::Scheduler));
        assert!(!dispatcher.notify("n1", PowerState::On, PowerState::On, ChangeOrigin::Operator));
        assert_eq!(dispatcher.counters().emitted, 0);
        assert_eq!(dispatcher.counters().suppressed, 4);
    }

    #[tokio::test]
    async fn failure_is_counted_not_propagated() {
        let dispatcher = NotificationDispatcher::new("c1", true, Some(Arc::new(FailingSink)));
        assert!(dispatcher.notify("n1", PowerState::Off, PowerState::On, ChangeOrigin::Conductor));

        for _ in 0..10 {
            tokio::task::yield_now().await;
        }
        let counters = dispatcher.counters();
        assert_eq!(counters.emitted, 1);
        assert_eq!(counters.failed, 1);
        assert_eq!(counters.delivered, 0);
    }

    #[tokio::test]
    async fn unconfigured_or_disabled_sends_nothing() {
        let unconfigured = NotificationDispatcher::new("c1", true, None);
        assert!(!unconfigured.notify("n1", PowerState::On, PowerState::Off, ChangeOrigin::Conductor));

        let (sink, mut rx) = ChannelSink::new();
        let disabled = NotificationDispatcher::new("c1", false, Some(Arc::new(sink)));
        assert!(!disabled.notify("n1", PowerState::On, PowerState::Off, ChangeOrigin::Conductor));
        drop(disabled);
        assert!(rx.recv().await.is_none());
    }
}
