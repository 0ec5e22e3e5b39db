use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use power_conductor::context::ConductorContext;
use power_conductor::membership::ConductorRing;
use power_conductor::{
    ConductorConfig, InMemoryStore, Node, NotificationDispatcher, OnlineConductors, PowerState,
    ReconciliationEngine, RingSnapshot, SimulatedGateway,
};
use std::sync::Arc;
use tokio::runtime::Runtime;

fn members(n: usize) -> Vec<String> {
    (0..n).map(|i| format!("conductor-{}", i)).collect()
}

pub fn ring_benchmark(c: &mut Criterion) {
    let mut group = c.benchmark_group("ring");

    for size in [3usize, 16, 64] {
        group.bench_with_input(BenchmarkId::new("build", size), &size, |b, &size| {
            let members = members(size);
            b.iter(|| black_box(ConductorRing::new(members.iter().cloned(), 64)));
        });
    }

    let ring = ConductorRing::new(members(16), 64);
    let ids: Vec<String> = (0..1000).map(|i| format!("node-{:05}", i)).collect();
    group.bench_function("lookup_1000", |b| {
        b.iter(|| {
            for id in &ids {
                black_box(ring.get(id));
            }
        })
    });

    let online = OnlineConductors::new().with_group("", members(16));
    let snapshot = RingSnapshot::build(&online, 64);
    let nodes: Vec<Node> = ids.iter().map(|id| Node::new(id.clone(), "")).collect();
    group.bench_function("owned_nodes_1000", |b| {
        b.iter(|| black_box(snapshot.owned_nodes("conductor-3", &nodes)))
    });

    group.finish();
}

fn sync_cycle(c: &mut Criterion) {
    let rt = Runtime::new().unwrap();
    let store = InMemoryStore::new();
    let gateway = SimulatedGateway::new();
    for i in 0..500 {
        let id = format!("node-{:04}", i);
        store.insert_node(Node::new(id.clone(), "").with_power_state(PowerState::On));
        gateway.set_state(&id, PowerState::On);
    }
    let config = ConductorConfig {
        conductor_id: "c1".into(),
        sync_workers: 8,
        ..Default::default()
    };
    let ctx = ConductorContext::new(
        config,
        Arc::new(store),
        Arc::new(gateway),
        NotificationDispatcher::disabled("c1"),
    );
    let engine = ReconciliationEngine::new(ctx);
    let online = OnlineConductors::new().with_group("", ["c1"]);

    c.bench_function("sync_cycle_500_unchanged", |b| {
        b.to_async(&rt).iter(|| async { black_box(engine.run_cycle(&online).await) })
    });
}

criterion_group!(benches, ring_benchmark, sync_cycle);
criterion_main!(benches);
