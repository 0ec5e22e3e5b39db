use chrono::{DateTime, Utc};
use dashmap::DashMap;

/// Conductor-local fault bookkeeping.
///
/// Counts consecutive failed sync attempts per node and tracks the nodes
/// handed to fault recovery. Nothing here is persisted: a node that changes
/// owner starts from zero on its new conductor.
#[derive(Debug, Default)]
pub struct FaultTracker {
    failures: DashMap<String, u32>,
    watched: DashMap<String, DateTime<Utc>>,
}

impl FaultTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Count one more failure and return the running total
    pub fn record_failure(&self, node_id: &str) -> u32 {
        let mut count = self.failures.entry(node_id.to_string()).or_insert(0);
        *count = count.saturating_add(1);
        *count
    }

    pub fn failures(&self, node_id: &str) -> u32 {
        self.failures.get(node_id).map(|c| *c).unwrap_or(0)
    }

    pub fn reset(&self, node_id: &str) {
        self.failures.remove(node_id);
    }

    /// Keep only the counters whose node passes `keep`; returns how many went
    pub fn retain_failures<F>(&self, keep: F) -> usize
    where
        F: Fn(&str) -> bool,
    {
        let before = self.failures.len();
        self.failures.retain(|node_id, _| keep(node_id));
        before.saturating_sub(self.failures.len())
    }

    pub fn watch(&self, node_id: &str) {
        self.watched.entry(node_id.to_string()).or_insert_with(Utc::now);
    }

    pub fn unwatch(&self, node_id: &str) {
        self.watched.remove(node_id);
    }

    pub fn is_watched(&self, node_id: &str) -> bool {
        self.watched.contains_key(node_id)
    }

    /// Watched node IDs with the time each was handed over
    pub fn watched(&self) -> Vec<(String, DateTime<Utc>)> {
        let mut watched: Vec<_> = self
            .watched
            .iter()
            .map(|entry| (entry.key().clone(), *entry.value()))
            .collect();
        watched.sort();
        watched
    }
}
