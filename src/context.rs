use crate::config::{ConductorConfig, ConfigHandle};
use crate::error::Result;
use crate::gateway::HardwareGateway;
use crate::lock::NodeLock;
use crate::membership::MembershipRing;
use crate::notify::NotificationDispatcher;
use crate::store::Datastore;
use crate::sync::FaultTracker;
use crate::types::OnlineConductors;
use chrono::Utc;
use std::sync::Arc;

/// Everything one conductor's periodic tasks and operator commands share
pub struct ConductorContext {
    pub conductor_id: String,
    pub conductor_group: String,
    pub config: ConfigHandle,
    pub store: Arc<dyn Datastore>,
    pub gateway: Arc<dyn HardwareGateway>,
    pub ring: MembershipRing,
    pub dispatcher: NotificationDispatcher,
    pub faults: FaultTracker,
}

impl ConductorContext {
    pub fn new(
        config: ConductorConfig,
        store: Arc<dyn Datastore>,
        gateway: Arc<dyn HardwareGateway>,
        dispatcher: NotificationDispatcher,
    ) -> Arc<Self> {
        Arc::new(Self {
            conductor_id: config.conductor_id.clone(),
            conductor_group: config.conductor_group.clone(),
            ring: MembershipRing::new(config.hash_replicas),
            config: ConfigHandle::new(config),
            store,
            gateway,
            dispatcher,
            faults: FaultTracker::new(),
        })
    }

    /// Lock client for this conductor under the given config snapshot
    pub fn node_lock(&self, config: &ConductorConfig) -> NodeLock {
        NodeLock::new(self.store.clone(), self.conductor_id.clone(), config.lock_stale_after())
    }

    /// Current online set derived from the heartbeat table
    pub async fn online_conductors(&self) -> Result<OnlineConductors> {
        let records = self.store.list_conductors().await?;
        let timeout = self.config.snapshot().heartbeat_timeout();
        Ok(OnlineConductors::from_records(&records, Utc::now(), timeout))
    }
}

impl std::fmt::Debug for ConductorContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConductorContext")
            .field("conductor_id", &self.conductor_id)
            .field("conductor_group", &self.conductor_group)
            .field("ring", &self.ring)
            .field("dispatcher", &self.dispatcher)
            .finish()
    }
}
