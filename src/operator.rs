//! Operator commands
//!
//! Explicit maintenance and power commands against a single node. Each
//! command takes the node lock and fails fast with
//! [`ConductorError::NodeLocked`] when someone else holds it.

use crate::context::ConductorContext;
use crate::error::{ConductorError, Result};
use crate::gateway::call_with_timeout;
use crate::lock::NodeLockGuard;
use crate::notify::ChangeOrigin;
use crate::types::{Node, PowerAction};
use std::sync::Arc;
use tracing::{error, info, warn};

#[derive(Debug, Clone)]
pub struct Operator {
    ctx: Arc<ConductorContext>,
}

impl Operator {
    pub fn new(ctx: Arc<ConductorContext>) -> Self {
        Self { ctx }
    }

    /// Put a node into operator-requested maintenance
    pub async fn set_maintenance(&self, node_id: &str, detail: Option<String>) -> Result<Node> {
        let guard = self.lock(node_id).await?;
        let result = set_maintenance_locked(&self.ctx, node_id, detail).await;
        release(guard).await;
        result
    }

    /// Take a node out of maintenance, whatever put it there
    pub async fn clear_maintenance(&self, node_id: &str) -> Result<Node> {
        let guard = self.lock(node_id).await?;
        let result = clear_maintenance_locked(&self.ctx, node_id).await;
        release(guard).await;
        result
    }

    /// Drive a node's power. Commands whose origin is the scheduler are
    /// applied but not echoed back to it.
    pub async fn power_action(&self, node_id: &str, action: PowerAction, origin: ChangeOrigin) -> Result<Node> {
        let guard = self.lock(node_id).await?;
        let result = power_action_locked(&self.ctx, node_id, action, origin).await;
        release(guard).await;
        result
    }

    async fn lock(&self, node_id: &str) -> Result<NodeLockGuard> {
        let config = self.ctx.config.snapshot();
        self.ctx.node_lock(&config).guard(node_id).await
    }
}

async fn release(guard: NodeLockGuard) {
    let node_id = guard.node_id().to_string();
    if let Err(e) = guard.release().await {
        warn!(node_id = %node_id, "Failed to release node lock after operator command: {}", e);
    }
}

async fn set_maintenance_locked(ctx: &ConductorContext, node_id: &str, detail: Option<String>) -> Result<Node> {
    let mut node = ctx.store.get_node(node_id).await?;
    node.set_manual_maintenance(detail);
    ctx.store.save_node(&node).await?;
    info!(node_id, reason = ?node.maintenance_reason, "Maintenance set by operator");
    Ok(node)
}

async fn clear_maintenance_locked(ctx: &ConductorContext, node_id: &str) -> Result<Node> {
    let mut node = ctx.store.get_node(node_id).await?;
    node.clear_maintenance();
    ctx.store.save_node(&node).await?;
    ctx.faults.reset(node_id);
    ctx.faults.unwatch(node_id);
    info!(node_id, "Maintenance cleared by operator");
    Ok(node)
}

async fn power_action_locked(
    ctx: &ConductorContext,
    node_id: &str,
    action: PowerAction,
    origin: ChangeOrigin,
) -> Result<Node> {
    let config = ctx.config.snapshot();
    let call_timeout = config.hardware_call_timeout();
    let mut node = ctx.store.get_node(node_id).await?;
    let target = action.target_state();
    let previous = node.recorded_power_state;

    if action != PowerAction::Reboot {
        match call_with_timeout(call_timeout, node_id, ctx.gateway.get_power_state(&node)).await {
            Ok(current) if current == target => {
                // Nothing to do on the hardware; make sure the record agrees
                let stale_record = node.recorded_power_state != current;
                if stale_record || node.last_error.is_some() {
                    node.recorded_power_state = current;
                    node.last_error = None;
                    ctx.store.save_node(&node).await?;
                }
                if stale_record {
                    info!(node_id, %previous, %current, "Already in requested power state, record repaired");
                    ctx.dispatcher.notify(node_id, current, previous, origin);
                }
                return Ok(node);
            }
            Ok(_) => {}
            Err(e) => {
                node.last_error = Some(format!("Failed to read power state before {:?}: {}", action, e));
                ctx.store.save_node(&node).await?;
                error!(node_id, ?action, "Power action aborted: {}", e);
                return Err(e.into());
            }
        }
    }

    // Advertise the pending change; the sync loop leaves the node alone until it clears
    node.target_power_state = Some(target);
    node.last_error = None;
    ctx.store.save_node(&node).await?;

    let result = match action {
        PowerAction::Reboot => call_with_timeout(call_timeout, node_id, ctx.gateway.reboot(&node)).await,
        _ => call_with_timeout(call_timeout, node_id, ctx.gateway.set_power_state(&node, target)).await,
    };

    node.target_power_state = None;
    match result {
        Ok(()) => {
            node.recorded_power_state = target;
            finish_action(ctx, &node).await?;
            info!(node_id, ?action, ?origin, %previous, "Power action succeeded");
            ctx.dispatcher.notify(node_id, target, previous, origin);
            Ok(node)
        }
        Err(e) => {
            node.last_error = Some(format!("Failed to {:?} node: {}", action, e));
            finish_action(ctx, &node).await?;
            error!(node_id, ?action, "Power action failed: {}", e);
            Err(ConductorError::Gateway(e))
        }
    }
}

/// Persist the outcome of a power action. The record still carries the
/// pending target until this lands, and sync skips the node meanwhile, so
/// one failed write gets a second attempt.
async fn finish_action(ctx: &ConductorContext, node: &Node) -> Result<()> {
    let Err(first) = ctx.store.save_node(node).await else {
        return Ok(());
    };
    warn!(node_id = %node.id, "Failed to record power action outcome, retrying: {}", first);

    match ctx.store.save_node(node).await {
        Ok(()) => Ok(()),
        Err(e) => {
            error!(
                node_id = %node.id,
                target = ?node.target_power_state,
                "Power action outcome not recorded, node stays pending until cleared: {}",
                e
            );
            Err(e)
        }
    }
}
