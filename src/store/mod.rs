//! Datastore access
//!
//! The conductor never talks to a database directly; everything goes through
//! [`Datastore`]: node CRUD, the per-node exclusive lock primitive, and the
//! conductor heartbeat table.

mod memory;

pub use memory::InMemoryStore;

use crate::error::Result;
use crate::lock::{LockOutcome, NodeLockRecord};
use crate::types::{ConductorRecord, Node};
use async_trait::async_trait;
use std::time::Duration;

#[async_trait]
pub trait Datastore: Send + Sync {
    /// Fetch a single node
    async fn get_node(&self, node_id: &str) -> Result<Node>;

    /// List every enrolled node
    async fn list_nodes(&self) -> Result<Vec<Node>>;

    /// Persist an existing node record. Nodes are enrolled elsewhere, so
    /// saving an unknown node is an error.
    async fn save_node(&self, node: &Node) -> Result<()>;

    /// Non-blocking exclusive lock. A lock held longer than `stale_after`
    /// is reclaimed from its (presumed dead) holder.
    async fn try_lock_node(
        &self,
        node_id: &str,
        holder: &str,
        stale_after: Duration,
    ) -> Result<LockOutcome>;

    /// Release the lock if, and only if, `holder` currently owns it.
    /// Returns whether a lock was released.
    async fn unlock_node(&self, node_id: &str, holder: &str) -> Result<bool>;

    async fn lock_record(&self, node_id: &str) -> Result<Option<NodeLockRecord>>;

    /// Register or refresh a conductor heartbeat
    async fn heartbeat(&self, record: ConductorRecord) -> Result<()>;

    async fn list_conductors(&self) -> Result<Vec<ConductorRecord>>;

    async fn unregister_conductor(&self, conductor_id: &str) -> Result<()>;
}
