//! Node ownership partitioning
//!
//! Every conductor independently hashes node IDs onto the ring of online
//! conductors in the node's group. No assignment is ever stored: when
//! membership changes, each conductor rebuilds its ring and ownership moves
//! implicitly. Until all conductors have observed the change two of them may
//! both try a node (the node lock arbitrates) or, briefly, none will.

mod ring;

pub use ring::ConductorRing;

use crate::types::{Node, OnlineConductors};
use parking_lot::RwLock;
use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use tracing::{debug, info};

pub const DEFAULT_HASH_REPLICAS: u32 = 64;

/// Pure ownership function: which online conductor of `conductor_group`
/// is responsible for `node_id` on a ring with `replicas` virtual nodes per
/// conductor. `None` when the group has nobody online.
///
/// Agrees with [`RingSnapshot::responsible`] for the same replica count.
pub fn responsible_conductor(
    node_id: &str,
    conductor_group: &str,
    online: &OnlineConductors,
    replicas: u32,
) -> Option<String> {
    let members = online.group(conductor_group)?;
    ConductorRing::new(members.iter().cloned(), replicas)
        .get(node_id)
        .map(str::to_string)
}

/// Immutable ownership view computed from one membership snapshot
#[derive(Debug)]
pub struct RingSnapshot {
    online: OnlineConductors,
    rings: HashMap<String, ConductorRing>,
}

impl RingSnapshot {
    pub fn build(online: &OnlineConductors, replicas: u32) -> Self {
        let rings = online
            .groups()
            .filter(|(_, members)| !members.is_empty())
            .map(|(group, members)| {
                (group.clone(), ConductorRing::new(members.iter().cloned(), replicas))
            })
            .collect();
        Self {
            online: online.clone(),
            rings,
        }
    }

    pub fn online(&self) -> &OnlineConductors {
        &self.online
    }

    pub fn responsible(&self, node_id: &str, conductor_group: &str) -> Option<&str> {
        self.rings.get(conductor_group)?.get(node_id)
    }

    pub fn is_owner(&self, local_conductor_id: &str, node: &Node) -> bool {
        self.responsible(&node.id, &node.conductor_group) == Some(local_conductor_id)
    }

    /// Nodes from `nodes` that `local_conductor_id` owns under this snapshot
    pub fn owned<'a>(&self, local_conductor_id: &str, nodes: &'a [Node]) -> Vec<&'a Node> {
        nodes
            .iter()
            .filter(|node| self.is_owner(local_conductor_id, node))
            .collect()
    }

    pub fn owned_nodes(&self, local_conductor_id: &str, nodes: &[Node]) -> BTreeSet<String> {
        self.owned(local_conductor_id, nodes)
            .into_iter()
            .map(|node| node.id.clone())
            .collect()
    }
}

/// Conductor-local holder of the current ring snapshot.
///
/// Readers clone the `Arc`; [`refresh`](MembershipRing::refresh) swaps in a
/// freshly built snapshot. Snapshots are never mutated.
#[derive(Debug)]
pub struct MembershipRing {
    replicas: u32,
    current: RwLock<Arc<RingSnapshot>>,
}

impl MembershipRing {
    pub fn new(replicas: u32) -> Self {
        Self {
            replicas,
            current: RwLock::new(Arc::new(RingSnapshot::build(&OnlineConductors::new(), replicas))),
        }
    }

    pub fn snapshot(&self) -> Arc<RingSnapshot> {
        self.current.read().clone()
    }

    /// Rebuild from the latest online set. Returns the snapshot to use for
    /// this cycle; an unchanged membership keeps the existing one.
    pub fn refresh(&self, online: &OnlineConductors) -> Arc<RingSnapshot> {
        let current = self.snapshot();
        if current.online() == online {
            return current;
        }

        let next = Arc::new(RingSnapshot::build(online, self.replicas));
        info!(
            conductors = online.len(),
            previous = current.online().len(),
            "Conductor membership changed, rebuilt hash ring"
        );
        debug!(?online, "New membership");
        *self.current.write() = next.clone();
        next
    }

    pub fn owned_nodes(&self, local_conductor_id: &str, nodes: &[Node]) -> BTreeSet<String> {
        self.snapshot().owned_nodes(local_conductor_id, nodes)
    }
}
