use super::Datastore;
use crate::error::{ConductorError, Result};
use crate::lock::{LockOutcome, NodeLockRecord};
use crate::types::{ConductorRecord, Node};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

#[derive(Debug, Default)]
struct StoreStats {
    node_writes: AtomicU64,
    lock_acquisitions: AtomicU64,
    lock_reclaims: AtomicU64,
    lock_contentions: AtomicU64,
}

/// In-memory datastore used by tests and the simulation binary.
///
/// Cloning shares the underlying tables, so several conductors built from
/// clones of one store behave like processes sharing a database.
#[derive(Debug, Clone, Default)]
pub struct InMemoryStore {
    nodes: Arc<DashMap<String, Node>>,
    locks: Arc<DashMap<String, NodeLockRecord>>,
    conductors: Arc<DashMap<String, ConductorRecord>>,
    stats: Arc<StoreStats>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Enroll a node. Enrollment is not a conductor write and is not counted.
    pub fn insert_node(&self, node: Node) {
        self.nodes.insert(node.id.clone(), node);
    }

    pub fn with_nodes(self, nodes: impl IntoIterator<Item = Node>) -> Self {
        for node in nodes {
            self.insert_node(node);
        }
        self
    }

    /// Number of `save_node` calls since creation
    pub fn node_writes(&self) -> u64 {
        self.stats.node_writes.load(Ordering::Relaxed)
    }

    pub fn lock_reclaims(&self) -> u64 {
        self.stats.lock_reclaims.load(Ordering::Relaxed)
    }

    pub fn lock_contentions(&self) -> u64 {
        self.stats.lock_contentions.load(Ordering::Relaxed)
    }

    pub fn lock_acquisitions(&self) -> u64 {
        self.stats.lock_acquisitions.load(Ordering::Relaxed)
    }

    /// Lock acquisition against an explicit clock
    pub fn try_lock_node_at(
        &self,
        node_id: &str,
        holder: &str,
        stale_after: Duration,
        now: DateTime<Utc>,
    ) -> LockOutcome {
        let record = NodeLockRecord {
            node_id: node_id.to_string(),
            holder: holder.to_string(),
            acquired_at: now,
        };

        match self.locks.entry(node_id.to_string()) {
            Entry::Vacant(vacant) => {
                vacant.insert(record);
                self.stats.lock_acquisitions.fetch_add(1, Ordering::Relaxed);
                LockOutcome::Locked
            }
            Entry::Occupied(mut occupied) => {
                let current = occupied.get();
                if current.is_stale(now, stale_after) {
                    let previous = occupied.insert(record);
                    self.stats.lock_acquisitions.fetch_add(1, Ordering::Relaxed);
                    self.stats.lock_reclaims.fetch_add(1, Ordering::Relaxed);
                    LockOutcome::ExpiredReclaimed {
                        previous_holder: previous.holder,
                        acquired_at: previous.acquired_at,
                    }
                } else {
                    self.stats.lock_contentions.fetch_add(1, Ordering::Relaxed);
                    LockOutcome::AlreadyHeld {
                        holder: current.holder.clone(),
                    }
                }
            }
        }
    }
}

#[async_trait]
impl Datastore for InMemoryStore {
    async fn get_node(&self, node_id: &str) -> Result<Node> {
        self.nodes
            .get(node_id)
            .map(|n| n.value().clone())
            .ok_or_else(|| ConductorError::NodeNotFound(node_id.to_string()))
    }

    async fn list_nodes(&self) -> Result<Vec<Node>> {
        let mut nodes: Vec<Node> = self.nodes.iter().map(|n| n.value().clone()).collect();
        nodes.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(nodes)
    }

    async fn save_node(&self, node: &Node) -> Result<()> {
        match self.nodes.get_mut(&node.id) {
            Some(mut existing) => {
                *existing = node.clone();
                self.stats.node_writes.fetch_add(1, Ordering::Relaxed);
                Ok(())
            }
            None => Err(ConductorError::NodeNotFound(node.id.clone())),
        }
    }

    async fn try_lock_node(
        &self,
        node_id: &str,
        holder: &str,
        stale_after: Duration,
    ) -> Result<LockOutcome> {
        Ok(self.try_lock_node_at(node_id, holder, stale_after, Utc::now()))
    }

    async fn unlock_node(&self, node_id: &str, holder: &str) -> Result<bool> {
        Ok(self
            .locks
            .remove_if(node_id, |_, record| record.holder == holder)
            .is_some())
    }

    async fn lock_record(&self, node_id: &str) -> Result<Option<NodeLockRecord>> {
        Ok(self.locks.get(node_id).map(|r| r.value().clone()))
    }

    async fn heartbeat(&self, record: ConductorRecord) -> Result<()> {
        self.conductors.insert(record.id.clone(), record);
        Ok(())
    }

    async fn list_conductors(&self) -> Result<Vec<ConductorRecord>> {
        Ok(self.conductors.iter().map(|c| c.value().clone()).collect())
    }

    async fn unregister_conductor(&self, conductor_id: &str) -> Result<()> {
        self.conductors.remove(conductor_id);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::PowerState;
    use chrono::Duration as ChronoDuration;

    #[tokio::test]
    async fn save_requires_enrollment() {
        let store = InMemoryStore::new();
        let node = Node::new("n1", "");
        assert!(matches!(
            store.save_node(&node).await,
            Err(ConductorError::NodeNotFound(_))
        ));

        store.insert_node(node.clone());
        let updated = node.with_power_state(PowerState::On);
        store.save_node(&updated).await.unwrap();
        assert_eq!(store.get_node("n1").await.unwrap().recorded_power_state, PowerState::On);
        assert_eq!(store.node_writes(), 1);
    }

    #[test]
    fn lock_is_exclusive_until_stale() {
        let store = InMemoryStore::new();
        let stale_after = Duration::from_secs(60);
        let t0 = Utc::now();

        assert_eq!(store.try_lock_node_at("n1", "c1", stale_after, t0), LockOutcome::Locked);
        assert_eq!(
            store.try_lock_node_at("n1", "c2", stale_after, t0 + ChronoDuration::seconds(59)),
            LockOutcome::AlreadyHeld { holder: "c1".into() }
        );
        assert!(matches!(
            store.try_lock_node_at("n1", "c2", stale_after, t0 + ChronoDuration::seconds(61)),
            LockOutcome::ExpiredReclaimed { ref previous_holder, .. } if previous_holder == "c1"
        ));
        assert_eq!(store.lock_reclaims(), 1);
    }

    #[tokio::test]
    async fn unlock_ignores_other_holders() {
        let store = InMemoryStore::new();
        store.try_lock_node("n1", "c1", Duration::from_secs(60)).await.unwrap();

        assert!(!store.unlock_node("n1", "c2").await.unwrap());
        assert_eq!(store.lock_record("n1").await.unwrap().unwrap().holder, "c1");
        assert!(store.unlock_node("n1", "c1").await.unwrap());
        assert!(store.lock_record("n1").await.unwrap().is_none());
    }
}
