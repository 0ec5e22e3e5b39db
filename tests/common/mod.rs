#![allow(dead_code)]

use power_conductor::context::ConductorContext;
use power_conductor::notify::ChannelSink;
use power_conductor::{
    ConductorConfig, InMemoryStore, Node, NotificationDispatcher, OnlineConductors, PowerEvent,
    PowerState, SimulatedGateway,
};
use std::sync::Arc;
use tokio::sync::mpsc::UnboundedReceiver;

pub struct Harness {
    pub store: InMemoryStore,
    pub gateway: SimulatedGateway,
    pub ctx: Arc<ConductorContext>,
    pub events: UnboundedReceiver<PowerEvent>,
}

pub fn config(conductor_id: &str) -> ConductorConfig {
    ConductorConfig {
        conductor_id: conductor_id.to_string(),
        sync_workers: 4,
        power_failure_threshold: 3,
        hardware_call_timeout_secs: 1,
        ..Default::default()
    }
}

/// A single conductor with a channel-backed notification sink
pub fn harness(config: ConductorConfig) -> Harness {
    harness_on(config, InMemoryStore::new(), SimulatedGateway::new())
}

/// A conductor sharing `store` and `gateway` with others
pub fn harness_on(config: ConductorConfig, store: InMemoryStore, gateway: SimulatedGateway) -> Harness {
    let (sink, events) = ChannelSink::new();
    let dispatcher = NotificationDispatcher::new(config.conductor_id.clone(), true, Some(Arc::new(sink)));
    let ctx = ConductorContext::new(config, Arc::new(store.clone()), Arc::new(gateway.clone()), dispatcher);
    Harness {
        store,
        gateway,
        ctx,
        events,
    }
}

pub fn solo(conductor_id: &str) -> OnlineConductors {
    OnlineConductors::new().with_group("", [conductor_id])
}

impl Harness {
    /// Enroll a node with a recorded state and matching-or-not BMC state
    pub fn enroll(&self, node_id: &str, recorded: PowerState, hardware: PowerState) {
        self.store
            .insert_node(Node::new(node_id, "").with_power_state(recorded));
        self.gateway.set_state(node_id, hardware);
    }

    pub fn drain_events(&mut self) -> Vec<PowerEvent> {
        let mut events = Vec::new();
        while let Ok(event) = self.events.try_recv() {
            events.push(event);
        }
        events
    }
}

/// Let spawned deliveries run
pub async fn settle() {
    for _ in 0..20 {
        tokio::task::yield_now().await;
    }
}
