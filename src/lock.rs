//! Per-node exclusive locking
//!
//! Every operation that mutates a node record (a sync pass, a fault-recovery
//! probe, an operator command) first takes the node's lock. Acquisition never
//! waits: a busy node is skipped and picked up again next cycle.
//!
//! A lock older than the staleness window is assumed to belong to a dead
//! conductor and may be taken over. This trades strict mutual exclusion for
//! liveness: a slow-but-alive holder can briefly overlap with the reclaimer.

use crate::error::{ConductorError, Result};
use crate::store::Datastore;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, warn};

/// Persisted lock ownership
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeLockRecord {
    pub node_id: String,
    pub holder: String,
    pub acquired_at: DateTime<Utc>,
}

impl NodeLockRecord {
    pub fn is_stale(&self, now: DateTime<Utc>, stale_after: Duration) -> bool {
        let window = ChronoDuration::from_std(stale_after).unwrap_or(ChronoDuration::MAX);
        now.signed_duration_since(self.acquired_at) > window
    }
}

/// Result of a non-blocking acquisition attempt
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LockOutcome {
    Locked,
    AlreadyHeld {
        holder: String,
    },
    /// Taken over from a holder that exceeded the staleness window
    ExpiredReclaimed {
        previous_holder: String,
        acquired_at: DateTime<Utc>,
    },
}

impl LockOutcome {
    pub fn is_acquired(&self) -> bool {
        !matches!(self, LockOutcome::AlreadyHeld { .. })
    }
}

/// Lock client bound to one holder identity and staleness window
#[derive(Clone)]
pub struct NodeLock {
    store: Arc<dyn Datastore>,
    holder: String,
    stale_after: Duration,
}

impl NodeLock {
    pub fn new(store: Arc<dyn Datastore>, holder: impl Into<String>, stale_after: Duration) -> Self {
        Self {
            store,
            holder: holder.into(),
            stale_after,
        }
    }

    pub fn holder(&self) -> &str {
        &self.holder
    }

    pub async fn acquire(&self, node_id: &str) -> Result<LockOutcome> {
        self.store
            .try_lock_node(node_id, &self.holder, self.stale_after)
            .await
    }

    /// No-op unless this holder owns the lock
    pub async fn release(&self, node_id: &str) -> Result<bool> {
        self.store.unlock_node(node_id, &self.holder).await
    }

    /// Scoped acquisition. Returns `None` when another holder has the node;
    /// the returned guard releases the lock on every exit path.
    pub async fn try_guard(&self, node_id: &str) -> Result<Option<NodeLockGuard>> {
        match self.guard(node_id).await {
            Ok(guard) => Ok(Some(guard)),
            Err(ConductorError::NodeLocked { holder, .. }) => {
                debug!(node_id, %holder, "Node locked by another holder, skipping");
                Ok(None)
            }
            Err(e) => Err(e),
        }
    }

    /// Like [`try_guard`](Self::try_guard) but contention is an error
    pub async fn guard(&self, node_id: &str) -> Result<NodeLockGuard> {
        match self.acquire(node_id).await? {
            LockOutcome::Locked => {}
            LockOutcome::AlreadyHeld { holder } => {
                return Err(ConductorError::NodeLocked {
                    node_id: node_id.to_string(),
                    holder,
                });
            }
            LockOutcome::ExpiredReclaimed {
                previous_holder,
                acquired_at,
            } => {
                warn!(
                    node_id,
                    %previous_holder,
                    %acquired_at,
                    holder = %self.holder,
                    "Reclaimed stale node lock; previous holder presumed dead"
                );
            }
        }

        Ok(NodeLockGuard {
            store: self.store.clone(),
            node_id: node_id.to_string(),
            holder: self.holder.clone(),
            released: false,
        })
    }
}

/// Held node lock.
///
/// Call [`release`](NodeLockGuard::release) on the normal path. If the guard
/// is dropped instead (panic, or the task was abandoned on timeout) the
/// release is spawned onto the current runtime.
pub struct NodeLockGuard {
    store: Arc<dyn Datastore>,
    node_id: String,
    holder: String,
    released: bool,
}

impl NodeLockGuard {
    pub fn node_id(&self) -> &str {
        &self.node_id
    }

    pub async fn release(mut self) -> Result<()> {
        self.released = true;
        self.store.unlock_node(&self.node_id, &self.holder).await?;
        Ok(())
    }
}

impl std::fmt::Debug for NodeLockGuard {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NodeLockGuard")
            .field("node_id", &self.node_id)
            .field("holder", &self.holder)
            .field("released", &self.released)
            .finish()
    }
}

impl Drop for NodeLockGuard {
    fn drop(&mut self) {
        if self.released {
            return;
        }
        let store = self.store.clone();
        let node_id = std::mem::take(&mut self.node_id);
        let holder = std::mem::take(&mut self.holder);
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn(async move {
                    if let Err(e) = store.unlock_node(&node_id, &holder).await {
                        error!(node_id = %node_id, "Failed to release abandoned node lock: {}", e);
                    }
                });
            }
            Err(_) => {
                error!(node_id = %node_id, "Node lock dropped outside a runtime; it will expire as stale");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::InMemoryStore;

    fn locker(store: &InMemoryStore, holder: &str) -> NodeLock {
        NodeLock::new(Arc::new(store.clone()), holder, Duration::from_secs(60))
    }

    #[tokio::test]
    async fn guard_release_frees_lock() {
        let store = InMemoryStore::new();
        let lock = locker(&store, "c1");

        let guard = lock.try_guard("n1").await.unwrap().expect("lock");
        assert!(locker(&store, "c2").try_guard("n1").await.unwrap().is_none());
        guard.release().await.unwrap();

        assert!(store.lock_record("n1").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn dropped_guard_releases_in_background() {
        let store = InMemoryStore::new();
        let lock = locker(&store, "c1");

        {
            let _guard = lock.try_guard("n1").await.unwrap().expect("lock");
        }
        // Let the spawned release run
        for _ in 0..10 {
            tokio::task::yield_now().await;
        }
        assert!(store.lock_record("n1").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn contended_guard_names_holder() {
        let store = InMemoryStore::new();
        let _held = locker(&store, "c1").guard("n1").await.unwrap();

        match locker(&store, "c2").guard("n1").await {
            Err(ConductorError::NodeLocked { node_id, holder }) => {
                assert_eq!(node_id, "n1");
                assert_eq!(holder, "c1");
            }
            other => panic!("expected NodeLocked, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn release_by_non_holder_is_noop() {
        let store = InMemoryStore::new();
        locker(&store, "c1").acquire("n1").await.unwrap();

        assert!(!locker(&store, "c2").release("n1").await.unwrap());
        assert_eq!(store.lock_record("n1").await.unwrap().unwrap().holder, "c1");
    }

    #[test]
    fn staleness_is_strictly_older_than_window() {
        let t0 = Utc::now();
        let record = NodeLockRecord {
            node_id: "n1".into(),
            holder: "c1".into(),
            acquired_at: t0,
        };
        let window = Duration::from_secs(10);
        assert!(!record.is_stale(t0 + ChronoDuration::seconds(10), window));
        assert!(record.is_stale(t0 + ChronoDuration::seconds(11), window));
    }
}
