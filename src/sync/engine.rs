use super::WorkerPool;
use crate::config::SyncPolicy;
use crate::context::ConductorContext;
use crate::error::GatewayError;
use crate::gateway::call_with_timeout;
use crate::lock::NodeLock;
use crate::notify::ChangeOrigin;
use crate::types::{Node, OnlineConductors, PowerState};
use chrono::{DateTime, Utc};
use std::collections::{BTreeMap, HashSet};
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Why a node was passed over this cycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    Maintenance,
    PowerActionPending,
    Locked,
}

/// Which side was changed to resolve a discrepancy
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Correction {
    RecordUpdated,
    HardwareForced,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NodeOutcome {
    Unchanged,
    Synced {
        previous: PowerState,
        current: PowerState,
        correction: Correction,
    },
    Skipped(SkipReason),
    /// Gateway or store error, not yet at the fault threshold
    Failed(String),
    /// Threshold reached; node moved into power-failure maintenance
    Faulted(String),
}

impl fmt::Display for NodeOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NodeOutcome::Unchanged => f.write_str("unchanged"),
            NodeOutcome::Synced {
                previous, current, ..
            } => write!(f, "synced {} -> {}", previous, current),
            NodeOutcome::Skipped(reason) => write!(f, "skipped ({:?})", reason),
            NodeOutcome::Failed(e) => write!(f, "failed: {}", e),
            NodeOutcome::Faulted(e) => write!(f, "faulted: {}", e),
        }
    }
}

/// Per-node result of one sync cycle
#[derive(Debug, Clone)]
pub struct CycleReport {
    pub started_at: DateTime<Utc>,
    pub elapsed: Duration,
    /// Nodes this conductor owned when the cycle started
    pub owned: usize,
    pub outcomes: BTreeMap<String, NodeOutcome>,
    /// Set when the cycle could not even list nodes
    pub error: Option<String>,
}

impl CycleReport {
    fn new(started_at: DateTime<Utc>) -> Self {
        Self {
            started_at,
            elapsed: Duration::ZERO,
            owned: 0,
            outcomes: BTreeMap::new(),
            error: None,
        }
    }

    pub fn outcome(&self, node_id: &str) -> Option<&NodeOutcome> {
        self.outcomes.get(node_id)
    }

    fn count(&self, pred: impl Fn(&NodeOutcome) -> bool) -> usize {
        self.outcomes.values().filter(|o| pred(o)).count()
    }

    pub fn synced(&self) -> usize {
        self.count(|o| matches!(o, NodeOutcome::Synced { .. }))
    }

    pub fn unchanged(&self) -> usize {
        self.count(|o| matches!(o, NodeOutcome::Unchanged))
    }

    pub fn skipped(&self) -> usize {
        self.count(|o| matches!(o, NodeOutcome::Skipped(_)))
    }

    pub fn failed(&self) -> usize {
        self.count(|o| matches!(o, NodeOutcome::Failed(_)))
    }

    pub fn faulted(&self) -> usize {
        self.count(|o| matches!(o, NodeOutcome::Faulted(_)))
    }

    pub fn log(&self, conductor_id: &str) {
        info!(
            conductor_id,
            owned = self.owned,
            synced = self.synced(),
            unchanged = self.unchanged(),
            skipped = self.skipped(),
            failed = self.failed(),
            faulted = self.faulted(),
            elapsed_ms = self.elapsed.as_millis() as u64,
            "Power sync cycle complete"
        );
    }
}

/// Settings fixed for the duration of one cycle
struct CycleSettings {
    policy: SyncPolicy,
    threshold: u32,
    call_timeout: Duration,
    lock: NodeLock,
}

/// Periodic power-state reconciliation for the nodes this conductor owns
#[derive(Debug)]
pub struct ReconciliationEngine {
    ctx: Arc<ConductorContext>,
}

impl ReconciliationEngine {
    pub fn new(ctx: Arc<ConductorContext>) -> Self {
        Self { ctx }
    }

    /// One sync pass over the nodes owned under `online`.
    ///
    /// Never fails: per-node problems end up in the report and the logs.
    pub async fn run_cycle(&self, online: &OnlineConductors) -> CycleReport {
        let clock = Instant::now();
        let mut report = CycleReport::new(Utc::now());

        let config = self.ctx.config.snapshot();
        let snapshot = self.ctx.ring.refresh(online);

        let nodes = match self.ctx.store.list_nodes().await {
            Ok(nodes) => nodes,
            Err(e) => {
                error!(conductor_id = %self.ctx.conductor_id, "Failed to list nodes for power sync: {}", e);
                report.error = Some(e.to_string());
                report.elapsed = clock.elapsed();
                return report;
            }
        };

        let owned: Vec<Node> = snapshot
            .owned(&self.ctx.conductor_id, &nodes)
            .into_iter()
            .cloned()
            .collect();
        report.owned = owned.len();

        // A count only means something while the same conductor keeps the node
        let owned_ids: HashSet<&str> = owned.iter().map(|node| node.id.as_str()).collect();
        let dropped = self.ctx.faults.retain_failures(|node_id| owned_ids.contains(node_id));
        if dropped > 0 {
            debug!(conductor_id = %self.ctx.conductor_id, dropped, "Dropped failure counts of nodes no longer owned");
        }

        let settings = Arc::new(CycleSettings {
            policy: config.sync_policy,
            threshold: config.power_failure_threshold,
            call_timeout: config.hardware_call_timeout(),
            lock: self.ctx.node_lock(&config),
        });

        let tasks: Vec<_> = owned
            .into_iter()
            .map(|node| {
                let ctx = self.ctx.clone();
                let settings = settings.clone();
                (node.id.clone(), sync_node(ctx, settings, node))
            })
            .collect();

        for (node_id, result) in WorkerPool::new(config.sync_workers).run(tasks).await {
            let outcome = result.unwrap_or_else(|message| {
                error!(node_id = %node_id, "Power sync task crashed: {}", message);
                NodeOutcome::Failed(message)
            });
            report.outcomes.insert(node_id, outcome);
        }

        report.elapsed = clock.elapsed();
        report
    }

    /// Cycle on a fixed interval until cancelled. A cycle that overruns
    /// delays the next start instead of overlapping it.
    pub async fn run(&self, cancel: CancellationToken) {
        let period = self.ctx.config.snapshot().sync_interval();
        let mut ticker = tokio::time::interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        info!(conductor_id = %self.ctx.conductor_id, interval = ?period, "Power sync loop started");

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {}
            }

            let online = match self.ctx.online_conductors().await {
                Ok(online) => online,
                Err(e) => {
                    warn!(conductor_id = %self.ctx.conductor_id, "Cannot read conductor membership, skipping cycle: {}", e);
                    continue;
                }
            };

            tokio::select! {
                _ = cancel.cancelled() => break,
                report = self.run_cycle(&online) => {
                    report.log(&self.ctx.conductor_id);
                    if report.elapsed > period {
                        warn!(
                            conductor_id = %self.ctx.conductor_id,
                            elapsed = ?report.elapsed,
                            interval = ?period,
                            "Power sync cycle overran its interval"
                        );
                    }
                }
            }
        }

        info!(conductor_id = %self.ctx.conductor_id, "Power sync loop stopped");
    }
}

async fn sync_node(ctx: Arc<ConductorContext>, settings: Arc<CycleSettings>, node: Node) -> NodeOutcome {
    if let Some(reason) = skip_reason(&node) {
        return NodeOutcome::Skipped(reason);
    }

    let guard = match settings.lock.try_guard(&node.id).await {
        Ok(Some(guard)) => guard,
        Ok(None) => return NodeOutcome::Skipped(SkipReason::Locked),
        Err(e) => {
            warn!(node_id = %node.id, "Failed to lock node for power sync: {}", e);
            return NodeOutcome::Failed(e.to_string());
        }
    };

    let outcome = sync_locked(&ctx, &settings, &node.id).await;

    if let Err(e) = guard.release().await {
        warn!(node_id = %node.id, "Failed to release node lock after power sync: {}", e);
    }
    outcome
}

fn skip_reason(node: &Node) -> Option<SkipReason> {
    if node.maintenance {
        Some(SkipReason::Maintenance)
    } else if node.target_power_state.is_some() {
        Some(SkipReason::PowerActionPending)
    } else {
        None
    }
}

async fn sync_locked(ctx: &ConductorContext, settings: &CycleSettings, node_id: &str) -> NodeOutcome {
    // The listing predates the lock
    let mut node = match ctx.store.get_node(node_id).await {
        Ok(node) => node,
        Err(e) => {
            warn!(node_id, "Failed to reload node under lock: {}", e);
            return NodeOutcome::Failed(e.to_string());
        }
    };
    if let Some(reason) = skip_reason(&node) {
        return NodeOutcome::Skipped(reason);
    }

    let actual = match call_with_timeout(
        settings.call_timeout,
        node_id,
        ctx.gateway.get_power_state(&node),
    )
    .await
    {
        Ok(state) => state,
        Err(e) => return record_gateway_failure(ctx, settings, node, "get power state", e).await,
    };

    let recorded = node.recorded_power_state;
    if actual == recorded {
        ctx.faults.reset(node_id);
        return NodeOutcome::Unchanged;
    }

    let policy = match settings.policy {
        SyncPolicy::ForceHardware if !recorded.is_actionable() => {
            debug!(node_id, %recorded, "No recorded intent to enforce, taking hardware state");
            SyncPolicy::ForceDatabase
        }
        policy => policy,
    };

    match policy {
        SyncPolicy::ForceDatabase => {
            info!(node_id, %recorded, %actual, "Power state changed outside the conductor, updating record");
            node.recorded_power_state = actual;
            if let Err(e) = ctx.store.save_node(&node).await {
                warn!(node_id, "Failed to save synced power state: {}", e);
                return NodeOutcome::Failed(e.to_string());
            }
            ctx.faults.reset(node_id);
            ctx.dispatcher.notify(node_id, actual, recorded, ChangeOrigin::Conductor);
            NodeOutcome::Synced {
                previous: recorded,
                current: actual,
                correction: Correction::RecordUpdated,
            }
        }
        SyncPolicy::ForceHardware => {
            info!(node_id, %recorded, %actual, "Hardware disagrees with record, forcing recorded state");
            let forced = call_with_timeout(
                settings.call_timeout,
                node_id,
                ctx.gateway.set_power_state(&node, recorded),
            )
            .await;
            if let Err(e) = forced {
                return record_gateway_failure(ctx, settings, node, "set power state", e).await;
            }
            ctx.faults.reset(node_id);
            ctx.dispatcher.notify(node_id, recorded, actual, ChangeOrigin::Conductor);
            NodeOutcome::Synced {
                previous: actual,
                current: recorded,
                correction: Correction::HardwareForced,
            }
        }
    }
}

async fn record_gateway_failure(
    ctx: &ConductorContext,
    settings: &CycleSettings,
    mut node: Node,
    operation: &str,
    err: GatewayError,
) -> NodeOutcome {
    if !err.counts_toward_fault() {
        warn!(node_id = %node.id, kind = err.kind(), "Power sync not possible for node: {}", err);
        return NodeOutcome::Failed(err.to_string());
    }

    let attempts = ctx.faults.record_failure(&node.id);
    if attempts < settings.threshold {
        warn!(
            node_id = %node.id,
            kind = err.kind(),
            attempt = attempts,
            max_attempts = settings.threshold,
            "Could not {}: {}",
            operation,
            err
        );
        return NodeOutcome::Failed(err.to_string());
    }

    let detail = format!(
        "During power sync, could not {} after {} attempts: {}",
        operation, attempts, err
    );
    node.enter_power_fault(detail.clone());
    if let Err(e) = ctx.store.save_node(&node).await {
        error!(node_id = %node.id, "Failed to record power fault: {}", e);
        return NodeOutcome::Failed(e.to_string());
    }
    ctx.faults.watch(&node.id);

    error!(node_id = %node.id, kind = err.kind(), attempts, "Node moved to maintenance: {}", detail);
    NodeOutcome::Faulted(detail)
}
