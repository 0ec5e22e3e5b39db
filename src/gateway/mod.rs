//! Hardware gateway
//!
//! Uniform get/set power capability over whatever driver talks to a node's
//! BMC. Calls may be slow, fail, or never return; callers bound them with
//! [`call_with_timeout`].

mod simulated;

pub use simulated::SimulatedGateway;

use crate::error::GatewayError;
use crate::types::{Node, PowerState};
use async_trait::async_trait;
use std::future::Future;
use std::time::Duration;

#[async_trait]
pub trait HardwareGateway: Send + Sync {
    /// Read the actual power state from the BMC
    async fn get_power_state(&self, node: &Node) -> Result<PowerState, GatewayError>;

    /// Drive the BMC to `desired` (only `On`/`Off` are meaningful)
    async fn set_power_state(&self, node: &Node, desired: PowerState) -> Result<(), GatewayError>;

    /// Hard reboot. Drivers without a native reboot get off-then-on.
    async fn reboot(&self, node: &Node) -> Result<(), GatewayError> {
        self.set_power_state(node, PowerState::Off).await?;
        self.set_power_state(node, PowerState::On).await
    }
}

/// Run a gateway call, turning an elapsed deadline into
/// [`GatewayError::Timeout`]. The inner future is dropped on timeout.
pub async fn call_with_timeout<T, F>(timeout: Duration, node_id: &str, call: F) -> Result<T, GatewayError>
where
    F: Future<Output = Result<T, GatewayError>>,
{
    match tokio::time::timeout(timeout, call).await {
        Ok(result) => result,
        Err(_) => Err(GatewayError::Timeout(format!(
            "no response from BMC of node {} within {:?}",
            node_id, timeout
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn timeout_maps_to_gateway_timeout() {
        let result: Result<PowerState, _> = call_with_timeout(
            Duration::from_millis(10),
            "n1",
            futures::future::pending(),
        )
        .await;
        assert!(matches!(result, Err(GatewayError::Timeout(_))));
    }

    #[tokio::test]
    async fn default_reboot_cycles_power() {
        let gateway = SimulatedGateway::new();
        let node = Node::new("n1", "");
        gateway.set_state("n1", PowerState::On);

        gateway.reboot(&node).await.unwrap();
        assert_eq!(gateway.state("n1"), Some(PowerState::On));
        assert_eq!(gateway.set_calls(), 2);
    }
}
