//! Conductor service
//!
//! Wires the shared context to its periodic tasks: heartbeat, power sync and
//! fault recovery. Each runs on its own timer until [`Conductor::stop`].

use crate::config::ConductorConfig;
use crate::context::ConductorContext;
use crate::error::Result;
use crate::gateway::HardwareGateway;
use crate::notify::NotificationDispatcher;
use crate::operator::Operator;
use crate::recovery::FaultRecoveryScheduler;
use crate::store::Datastore;
use crate::sync::ReconciliationEngine;
use crate::types::ConductorRecord;
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(5);

pub struct Conductor {
    ctx: Arc<ConductorContext>,
    engine: Arc<ReconciliationEngine>,
    recovery: Arc<FaultRecoveryScheduler>,
    operator: Operator,
    /// Replaced on every start so a stopped conductor can be started again
    cancel: Mutex<CancellationToken>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl Conductor {
    pub fn new(
        config: ConductorConfig,
        store: Arc<dyn Datastore>,
        gateway: Arc<dyn HardwareGateway>,
        dispatcher: NotificationDispatcher,
    ) -> Self {
        let ctx = ConductorContext::new(config, store, gateway, dispatcher);
        Self {
            engine: Arc::new(ReconciliationEngine::new(ctx.clone())),
            recovery: Arc::new(FaultRecoveryScheduler::new(ctx.clone())),
            operator: Operator::new(ctx.clone()),
            ctx,
            cancel: Mutex::new(CancellationToken::new()),
            tasks: Mutex::new(Vec::new()),
        }
    }

    pub fn id(&self) -> &str {
        &self.ctx.conductor_id
    }

    pub fn context(&self) -> &Arc<ConductorContext> {
        &self.ctx
    }

    pub fn engine(&self) -> &ReconciliationEngine {
        &self.engine
    }

    pub fn recovery(&self) -> &FaultRecoveryScheduler {
        &self.recovery
    }

    pub fn operator(&self) -> &Operator {
        &self.operator
    }

    pub fn is_running(&self) -> bool {
        !self.tasks.lock().is_empty()
    }

    /// Register with the heartbeat table and start the periodic tasks
    pub async fn start(&self) -> Result<()> {
        if self.is_running() {
            warn!(conductor_id = %self.ctx.conductor_id, "Conductor already started");
            return Ok(());
        }

        self.heartbeat().await?;

        let token = CancellationToken::new();
        *self.cancel.lock() = token.clone();
        let mut tasks = Vec::with_capacity(3);

        let ctx = self.ctx.clone();
        let cancel = token.clone();
        tasks.push(tokio::spawn(async move {
            heartbeat_loop(ctx, cancel).await;
        }));

        let engine = self.engine.clone();
        let cancel = token.clone();
        tasks.push(tokio::spawn(async move {
            engine.run(cancel).await;
        }));

        let recovery = self.recovery.clone();
        let cancel = token;
        tasks.push(tokio::spawn(async move {
            recovery.run(cancel).await;
        }));

        *self.tasks.lock() = tasks;
        info!(
            conductor_id = %self.ctx.conductor_id,
            conductor_group = %self.ctx.conductor_group,
            "Conductor started"
        );
        Ok(())
    }

    /// Cancel the periodic tasks, wait briefly for them, and deregister
    pub async fn stop(&self) -> Result<()> {
        self.cancel.lock().cancel();

        let handles: Vec<_> = self.tasks.lock().drain(..).collect();
        let results = futures::future::join_all(
            handles
                .into_iter()
                .map(|handle| tokio::time::timeout(SHUTDOWN_TIMEOUT, handle)),
        )
        .await;

        for (i, result) in results.iter().enumerate() {
            match result {
                Ok(Ok(())) => debug!("Conductor task {} stopped", i + 1),
                Ok(Err(e)) => error!("Conductor task {} failed: {}", i + 1, e),
                Err(_) => error!("Conductor task {} failed to stop within timeout", i + 1),
            }
        }

        self.ctx.store.unregister_conductor(&self.ctx.conductor_id).await?;
        info!(conductor_id = %self.ctx.conductor_id, "Conductor stopped");
        Ok(())
    }

    async fn heartbeat(&self) -> Result<()> {
        send_heartbeat(&self.ctx).await
    }
}

async fn send_heartbeat(ctx: &ConductorContext) -> Result<()> {
    ctx.store
        .heartbeat(ConductorRecord::new(ctx.conductor_id.clone(), ctx.conductor_group.clone()))
        .await
}

async fn heartbeat_loop(ctx: Arc<ConductorContext>, cancel: CancellationToken) {
    let period = ctx.config.snapshot().heartbeat_interval();
    let mut ticker = tokio::time::interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = ticker.tick() => {
                if let Err(e) = send_heartbeat(&ctx).await {
                    warn!(conductor_id = %ctx.conductor_id, "Heartbeat failed: {}", e);
                }
            }
        }
    }
}
