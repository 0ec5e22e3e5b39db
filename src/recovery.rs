//! Fault recovery
//!
//! Periodically probes nodes in power-failure maintenance. A node whose BMC
//! answers again has its fault cleared; maintenance is lifted only when the
//! fault was the reason for it. Nodes that still fail are left alone and
//! retried next interval, indefinitely.

use crate::context::ConductorContext;
use crate::gateway::call_with_timeout;
use crate::lock::NodeLock;
use crate::sync::WorkerPool;
use crate::types::OnlineConductors;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProbeOutcome {
    /// BMC answered; fault cleared
    Recovered { maintenance_cleared: bool },
    /// BMC still failing; node untouched
    StillFaulted(String),
    /// Fault already gone (cleared by an operator)
    NotFaulted,
    Locked,
    Error(String),
}

#[derive(Debug, Clone, Default)]
pub struct RecoveryReport {
    pub outcomes: BTreeMap<String, ProbeOutcome>,
    pub error: Option<String>,
}

impl RecoveryReport {
    pub fn outcome(&self, node_id: &str) -> Option<&ProbeOutcome> {
        self.outcomes.get(node_id)
    }

    pub fn recovered(&self) -> Vec<&str> {
        self.outcomes
            .iter()
            .filter(|(_, o)| matches!(o, ProbeOutcome::Recovered { .. }))
            .map(|(id, _)| id.as_str())
            .collect()
    }
}

#[derive(Debug)]
pub struct FaultRecoveryScheduler {
    ctx: Arc<ConductorContext>,
}

impl FaultRecoveryScheduler {
    pub fn new(ctx: Arc<ConductorContext>) -> Self {
        Self { ctx }
    }

    /// Probe every owned power-faulted node once
    pub async fn run_cycle(&self, online: &OnlineConductors) -> RecoveryReport {
        let mut report = RecoveryReport::default();
        let config = self.ctx.config.snapshot();
        let snapshot = self.ctx.ring.refresh(online);

        let nodes = match self.ctx.store.list_nodes().await {
            Ok(nodes) => nodes,
            Err(e) => {
                warn!(conductor_id = %self.ctx.conductor_id, "Failed to list nodes for fault recovery: {}", e);
                report.error = Some(e.to_string());
                return report;
            }
        };

        let mut candidates: BTreeSet<String> = snapshot
            .owned(&self.ctx.conductor_id, &nodes)
            .into_iter()
            .filter(|node| node.is_power_faulted())
            .map(|node| node.id.clone())
            .collect();

        // Watched nodes that moved to another conductor are its problem now
        for (node_id, _) in self.ctx.faults.watched() {
            let owned = nodes
                .iter()
                .find(|node| node.id == node_id)
                .map(|node| snapshot.is_owner(&self.ctx.conductor_id, node))
                .unwrap_or(false);
            if owned {
                candidates.insert(node_id);
            } else {
                debug!(node_id = %node_id, "No longer owned, dropping from recovery watch");
                self.ctx.faults.unwatch(&node_id);
            }
        }

        if candidates.is_empty() {
            return report;
        }

        let lock = Arc::new(self.ctx.node_lock(&config));
        let call_timeout = config.hardware_call_timeout();
        let tasks: Vec<_> = candidates
            .into_iter()
            .map(|node_id| {
                let ctx = self.ctx.clone();
                let lock = lock.clone();
                let id = node_id.clone();
                (node_id, async move { probe(&ctx, &lock, call_timeout, &id).await })
            })
            .collect();

        for (node_id, result) in WorkerPool::new(config.sync_workers).run(tasks).await {
            let outcome = result.unwrap_or_else(ProbeOutcome::Error);
            report.outcomes.insert(node_id, outcome);
        }
        report
    }

    pub async fn run(&self, cancel: CancellationToken) {
        let period = self.ctx.config.snapshot().fault_recovery_interval();
        let mut ticker = tokio::time::interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        info!(conductor_id = %self.ctx.conductor_id, interval = ?period, "Fault recovery loop started");

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {}
            }

            let online = match self.ctx.online_conductors().await {
                Ok(online) => online,
                Err(e) => {
                    warn!(conductor_id = %self.ctx.conductor_id, "Cannot read conductor membership, skipping recovery: {}", e);
                    continue;
                }
            };

            tokio::select! {
                _ = cancel.cancelled() => break,
                report = self.run_cycle(&online) => {
                    if !report.outcomes.is_empty() {
                        debug!(
                            conductor_id = %self.ctx.conductor_id,
                            probed = report.outcomes.len(),
                            recovered = report.recovered().len(),
                            "Fault recovery pass complete"
                        );
                    }
                }
            }
        }

        info!(conductor_id = %self.ctx.conductor_id, "Fault recovery loop stopped");
    }
}

async fn probe(ctx: &ConductorContext, lock: &NodeLock, call_timeout: Duration, node_id: &str) -> ProbeOutcome {
    let guard = match lock.try_guard(node_id).await {
        Ok(Some(guard)) => guard,
        Ok(None) => return ProbeOutcome::Locked,
        Err(e) => return ProbeOutcome::Error(e.to_string()),
    };

    let outcome = probe_locked(ctx, call_timeout, node_id).await;

    if let Err(e) = guard.release().await {
        warn!(node_id, "Failed to release node lock after recovery probe: {}", e);
    }
    outcome
}

async fn probe_locked(ctx: &ConductorContext, call_timeout: Duration, node_id: &str) -> ProbeOutcome {
    let mut node = match ctx.store.get_node(node_id).await {
        Ok(node) => node,
        Err(e) => return ProbeOutcome::Error(e.to_string()),
    };

    if !node.is_power_faulted() {
        ctx.faults.unwatch(node_id);
        return ProbeOutcome::NotFaulted;
    }

    match call_with_timeout(call_timeout, node_id, ctx.gateway.get_power_state(&node)).await {
        Ok(state) => {
            let maintenance_cleared = node.clear_power_fault();
            if let Err(e) = ctx.store.save_node(&node).await {
                warn!(node_id, "Failed to save recovered node: {}", e);
                return ProbeOutcome::Error(e.to_string());
            }
            ctx.faults.reset(node_id);
            ctx.faults.unwatch(node_id);
            info!(
                node_id,
                power_state = %state,
                maintenance_cleared,
                "BMC reachable again, power fault cleared"
            );
            ProbeOutcome::Recovered { maintenance_cleared }
        }
        Err(e) => {
            debug!(node_id, kind = e.kind(), "Node still unreachable: {}", e);
            ProbeOutcome::StillFaulted(e.to_string())
        }
    }
}
