use hashring::HashRing;
use std::collections::BTreeSet;
use std::fmt;

/// One of a conductor's points on the ring
#[derive(Debug, Clone, Hash, PartialEq, Eq)]
struct VirtualNode {
    conductor_id: String,
    replica: u32,
}

/// Consistent-hash ring over the online conductors of one group.
///
/// Built from a sorted member set with a fixed-key hasher, so every
/// conductor that sees the same members computes the same placement.
pub struct ConductorRing {
    ring: HashRing<VirtualNode>,
    members: BTreeSet<String>,
    replicas: u32,
}

impl ConductorRing {
    pub fn new<I, S>(members: I, replicas: u32) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let members: BTreeSet<String> = members.into_iter().map(Into::into).collect();
        let replicas = replicas.max(1);
        let mut ring = HashRing::new();
        for conductor_id in &members {
            for replica in 0..replicas {
                ring.add(VirtualNode {
                    conductor_id: conductor_id.clone(),
                    replica,
                });
            }
        }
        Self {
            ring,
            members,
            replicas,
        }
    }

    /// Conductor responsible for `node_id`, if the ring has any members
    pub fn get(&self, node_id: &str) -> Option<&str> {
        self.ring.get(&node_id).map(|vnode| vnode.conductor_id.as_str())
    }

    pub fn members(&self) -> &BTreeSet<String> {
        &self.members
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }
}

impl fmt::Debug for ConductorRing {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConductorRing")
            .field("members", &self.members)
            .field("replicas", &self.replicas)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_ring_has_no_owner() {
        let ring = ConductorRing::new(Vec::<String>::new(), 16);
        assert!(ring.is_empty());
        assert_eq!(ring.get("node-1"), None);
    }

    #[test]
    fn member_order_does_not_matter() {
        let a = ConductorRing::new(["c1", "c2", "c3"], 32);
        let b = ConductorRing::new(["c3", "c1", "c2"], 32);
        for i in 0..200 {
            let id = format!("node-{}", i);
            assert_eq!(a.get(&id), b.get(&id));
        }
    }

    #[test]
    fn every_member_gets_some_nodes() {
        let ring = ConductorRing::new(["c1", "c2", "c3"], 64);
        let owners: BTreeSet<&str> = (0..500)
            .filter_map(|i| ring.get(&format!("node-{}", i)))
            .collect();
        assert_eq!(owners.len(), 3);
    }
}
