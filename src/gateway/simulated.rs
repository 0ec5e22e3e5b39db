use super::HardwareGateway;
use crate::error::GatewayError;
use crate::types::{Node, PowerState};
use async_trait::async_trait;
use dashmap::DashMap;
use parking_lot::RwLock;
use rand::Rng;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

#[derive(Debug, Default)]
struct CallStats {
    get_calls: AtomicU64,
    set_calls: AtomicU64,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
}

/// Decrements the in-flight gauge however the call ends
struct InFlight<'a>(&'a CallStats);

impl<'a> InFlight<'a> {
    fn enter(stats: &'a CallStats) -> Self {
        let now = stats.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        stats.max_in_flight.fetch_max(now, Ordering::SeqCst);
        Self(stats)
    }
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.in_flight.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Programmable stand-in for a fleet of BMCs.
///
/// Holds the "real" power state per node and lets callers inject failures,
/// hangs and latency. Clones share state.
#[derive(Debug, Clone, Default)]
pub struct SimulatedGateway {
    states: Arc<DashMap<String, PowerState>>,
    failures: Arc<DashMap<String, GatewayError>>,
    set_failures: Arc<DashMap<String, GatewayError>>,
    hanging: Arc<DashMap<String, ()>>,
    latency: Arc<RwLock<Option<(Duration, Duration)>>>,
    stats: Arc<CallStats>,
}

impl SimulatedGateway {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every call sleeps a random duration in `min..=max`
    pub fn with_latency(self, min: Duration, max: Duration) -> Self {
        *self.latency.write() = Some((min, max.max(min)));
        self
    }

    pub fn set_state(&self, node_id: &str, state: PowerState) {
        self.states.insert(node_id.to_string(), state);
    }

    pub fn state(&self, node_id: &str) -> Option<PowerState> {
        self.states.get(node_id).map(|s| *s)
    }

    /// Fail every call for this node with `error` until [`heal`](Self::heal)
    pub fn fail(&self, node_id: &str, error: GatewayError) {
        self.failures.insert(node_id.to_string(), error);
    }

    /// Fail only `set_power_state` calls
    pub fn fail_set(&self, node_id: &str, error: GatewayError) {
        self.set_failures.insert(node_id.to_string(), error);
    }

    /// Calls for this node never return
    pub fn hang(&self, node_id: &str) {
        self.hanging.insert(node_id.to_string(), ());
    }

    pub fn heal(&self, node_id: &str) {
        self.failures.remove(node_id);
        self.set_failures.remove(node_id);
        self.hanging.remove(node_id);
    }

    pub fn get_calls(&self) -> u64 {
        self.stats.get_calls.load(Ordering::SeqCst)
    }

    pub fn set_calls(&self) -> u64 {
        self.stats.set_calls.load(Ordering::SeqCst)
    }

    /// Highest number of concurrently outstanding calls observed
    pub fn max_in_flight(&self) -> usize {
        self.stats.max_in_flight.load(Ordering::SeqCst)
    }

    async fn simulate_call(&self, node_id: &str) -> Result<(), GatewayError> {
        let latency = *self.latency.read();
        if let Some((min, max)) = latency {
            let delay = if max > min {
                rand::rng().random_range(min..=max)
            } else {
                min
            };
            tokio::time::sleep(delay).await;
        }

        if self.hanging.contains_key(node_id) {
            futures::future::pending::<()>().await;
        }

        if let Some(err) = self.failures.get(node_id) {
            return Err(err.clone());
        }
        Ok(())
    }
}

#[async_trait]
impl HardwareGateway for SimulatedGateway {
    async fn get_power_state(&self, node: &Node) -> Result<PowerState, GatewayError> {
        self.stats.get_calls.fetch_add(1, Ordering::SeqCst);
        let _in_flight = InFlight::enter(&self.stats);
        self.simulate_call(&node.id).await?;

        self.state(&node.id)
            .ok_or_else(|| GatewayError::Unreachable(format!("no BMC registered for node {}", node.id)))
    }

    async fn set_power_state(&self, node: &Node, desired: PowerState) -> Result<(), GatewayError> {
        self.stats.set_calls.fetch_add(1, Ordering::SeqCst);
        let _in_flight = InFlight::enter(&self.stats);
        self.simulate_call(&node.id).await?;

        if let Some(err) = self.set_failures.get(&node.id) {
            return Err(err.clone());
        }
        if !desired.is_actionable() {
            return Err(GatewayError::Unsupported(format!("cannot set power state to {}", desired)));
        }
        if !self.states.contains_key(&node.id) {
            return Err(GatewayError::Unreachable(format!("no BMC registered for node {}", node.id)));
        }
        self.set_state(&node.id, desired);
        Ok(())
    }
}
