mod common;

use async_trait::async_trait;
use chrono::Utc;
use common::{config, settle, solo};
use power_conductor::context::ConductorContext;
use power_conductor::notify::ChannelSink;
use power_conductor::operator::Operator;
use power_conductor::{
    ChangeOrigin, Datastore, InMemoryStore, Node, NotificationDispatcher, PowerAction, PowerEvent,
    PowerEventSink, PowerState, ReconciliationEngine, Result, SimulatedGateway,
};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc::UnboundedReceiver;
use tokio::time::timeout;

/// Holds each event for a fixed delay, like a slow network hop
struct DelayedSink {
    inner: ChannelSink,
    delay: Duration,
}

#[async_trait]
impl PowerEventSink for DelayedSink {
    async fn deliver(&self, event: &PowerEvent) -> Result<()> {
        tokio::time::sleep(self.delay).await;
        self.inner.deliver(event).await
    }

    fn name(&self) -> &str {
        "delayed"
    }
}

fn delayed_conductor(delay: Duration) -> (Arc<ConductorContext>, InMemoryStore, SimulatedGateway, UnboundedReceiver<PowerEvent>) {
    let store = InMemoryStore::new();
    let gateway = SimulatedGateway::new();
    let (inner, rx) = ChannelSink::new();
    let dispatcher = NotificationDispatcher::new("c1", true, Some(Arc::new(DelayedSink { inner, delay })));
    let ctx = ConductorContext::new(config("c1"), Arc::new(store.clone()), Arc::new(gateway.clone()), dispatcher);
    (ctx, store, gateway, rx)
}

#[test_log::test(tokio::test)]
async fn scheduler_can_observe_record_before_event_but_only_briefly() {
    let delay = Duration::from_millis(50);
    let (ctx, store, gateway, mut rx) = delayed_conductor(delay);
    store.insert_node(Node::new("n1", "").with_power_state(PowerState::Off));
    gateway.set_state("n1", PowerState::On);

    let cycle_start = Utc::now();
    ReconciliationEngine::new(ctx.clone()).run_cycle(&solo("c1")).await;

    // The scheduler's own poll sees the new record with no event yet
    assert_eq!(store.get_node("n1").await.unwrap().recorded_power_state, PowerState::On);
    assert!(rx.try_recv().is_err(), "event should still be in flight");

    // ...and the window closes once delivery lands
    let event = timeout(delay * 10, rx.recv())
        .await
        .expect("event delivered within bound")
        .expect("channel open");
    assert_eq!(event.power_state, PowerState::On);
    assert!(event.emitted_at >= cycle_start);
    assert!(Utc::now().signed_duration_since(event.emitted_at).to_std().unwrap() < delay * 10);
}

#[tokio::test]
async fn slow_consumer_does_not_slow_the_cycle() {
    let (ctx, store, gateway, _rx) = delayed_conductor(Duration::from_secs(30));
    for i in 0..10 {
        let id = format!("n{}", i);
        store.insert_node(Node::new(id.clone(), "").with_power_state(PowerState::Off));
        gateway.set_state(&id, PowerState::On);
    }

    let report = timeout(
        Duration::from_secs(5),
        ReconciliationEngine::new(ctx.clone()).run_cycle(&solo("c1")),
    )
    .await
    .expect("cycle must not wait on delivery");
    assert_eq!(report.synced(), 10);
    assert_eq!(ctx.dispatcher.counters().emitted, 10);
}

#[tokio::test]
async fn transitions_to_error_are_not_sent() {
    let mut h = common::harness(config("c1"));
    h.enroll("n1", PowerState::On, PowerState::Error);

    ReconciliationEngine::new(h.ctx.clone()).run_cycle(&solo("c1")).await;
    settle().await;

    assert_eq!(h.store.get_node("n1").await.unwrap().recorded_power_state, PowerState::Error);
    assert!(h.drain_events().is_empty());
}

#[tokio::test]
async fn scheduler_commands_are_not_echoed_back() {
    let mut h = common::harness(config("c1"));
    h.enroll("n1", PowerState::Off, PowerState::Off);
    h.enroll("n2", PowerState::Off, PowerState::Off);
    let operator = Operator::new(h.ctx.clone());

    operator
        .power_action("n1", PowerAction::On, ChangeOrigin::Scheduler)
        .await
        .unwrap();
    operator
        .power_action("n2", PowerAction::On, ChangeOrigin::Operator)
        .await
        .unwrap();
    settle().await;

    let events = h.drain_events();
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].node_id, "n2");
}

#[tokio::test]
async fn unreachable_scheduler_keeps_the_state_change() {
    struct Unreachable;

    #[async_trait]
    impl PowerEventSink for Unreachable {
        async fn deliver(&self, _event: &PowerEvent) -> Result<()> {
            Err(power_conductor::ConductorError::notification("connection refused"))
        }

        fn name(&self) -> &str {
            "unreachable"
        }
    }

    let store = InMemoryStore::new();
    let gateway = SimulatedGateway::new();
    store.insert_node(Node::new("n1", "").with_power_state(PowerState::On));
    gateway.set_state("n1", PowerState::Off);
    let dispatcher = NotificationDispatcher::new("c1", true, Some(Arc::new(Unreachable)));
    let ctx = ConductorContext::new(config("c1"), Arc::new(store.clone()), Arc::new(gateway), dispatcher);

    ReconciliationEngine::new(ctx.clone()).run_cycle(&solo("c1")).await;
    settle().await;

    assert_eq!(store.get_node("n1").await.unwrap().recorded_power_state, PowerState::Off);
    let counters = ctx.dispatcher.counters();
    assert_eq!(counters.emitted, 1);
    assert_eq!(counters.failed, 1);
}

#[tokio::test]
async fn disabled_notifications_still_sync() {
    let store = InMemoryStore::new();
    let gateway = SimulatedGateway::new();
    store.insert_node(Node::new("n1", "").with_power_state(PowerState::On));
    gateway.set_state("n1", PowerState::Off);
    let ctx = ConductorContext::new(
        config("c1"),
        Arc::new(store.clone()),
        Arc::new(gateway),
        NotificationDispatcher::disabled("c1"),
    );

    let report = ReconciliationEngine::new(ctx.clone()).run_cycle(&solo("c1")).await;

    assert_eq!(report.synced(), 1);
    assert_eq!(ctx.dispatcher.counters().emitted, 0);
}
