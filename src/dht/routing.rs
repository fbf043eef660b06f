use std::collections::VecDeque;
use std::time::Duration;

use super::node::{Node, NodeId};

pub const K: usize = 8;
const NUM_BUCKETS: usize = 160;

/// What [`RoutingTable::insert`] did with a contact.
#[derive(Debug, Clone)]
pub enum InsertOutcome {
    Added,
    Refreshed,
    /// The bucket was full; the returned contact made room.
    Replaced(Node),
    Dropped,
}

/// Contacts sharing one prefix length with the local id.
///
/// Kept in verification order: the front is the least recently verified,
/// with never-verified contacts ahead of all verified ones.
#[derive(Debug, Default)]
struct Bucket {
    nodes: VecDeque<Node>,
}

impl Bucket {
    fn position(&self, id: &NodeId) -> Option<usize> {
        self.nodes.iter().position(|n| &n.id == id)
    }

    fn insert_ordered(&mut self, node: Node) {
        let at = self
            .nodes
            .iter()
            .position(|n| n.last_verified > node.last_verified)
            .unwrap_or(self.nodes.len());
        self.nodes.insert(at, node);
    }

    fn insert(&mut self, mut node: Node, verified: bool) -> InsertOutcome {
        if let Some(pos) = self.position(&node.id) {
            let Some(mut existing) = self.nodes.remove(pos) else {
                return InsertOutcome::Dropped;
            };
            if verified {
                existing.addr = node.addr;
                existing.verify();
            } else {
                existing.touch();
            }
            self.insert_ordered(existing);
            return InsertOutcome::Refreshed;
        }

        if verified {
            node.verify();
        }

        if self.nodes.len() < K {
            self.insert_ordered(node);
            return InsertOutcome::Added;
        }

        if !verified {
            return InsertOutcome::Dropped;
        }

        match self.nodes.pop_front() {
            Some(evicted) => {
                self.insert_ordered(node);
                InsertOutcome::Replaced(evicted)
            }
            None => InsertOutcome::Dropped,
        }
    }
}

/// Kademlia routing table owned by the DHT event loop.
///
/// Bucket `i` holds contacts whose id shares exactly `i` leading bits with
/// ours. A full bucket only admits a contact that has answered one of our
/// queries, and then evicts its least recently verified entry.
pub struct RoutingTable {
    our_id: NodeId,
    buckets: Vec<Bucket>,
}

impl RoutingTable {
    pub fn new(our_id: NodeId) -> Self {
        let buckets = (0..NUM_BUCKETS).map(|_| Bucket::default()).collect();
        Self { our_id, buckets }
    }

    pub fn our_id(&self) -> &NodeId {
        &self.our_id
    }

    /// Offers a contact to the table. `verified` means it just answered
    /// one of our queries.
    pub fn insert(&mut self, node: Node, verified: bool) -> InsertOutcome {
        if node.id == self.our_id {
            return InsertOutcome::Dropped;
        }

        let idx = self.our_id.bucket_index(&node.id);
        self.buckets[idx].insert(node, verified)
    }

    pub fn remove(&mut self, id: &NodeId) -> Option<Node> {
        let bucket = &mut self.buckets[self.our_id.bucket_index(id)];
        let pos = bucket.position(id)?;
        bucket.nodes.remove(pos)
    }

    /// Records an unanswered query. Returns true if the contact was evicted
    /// for exceeding `max_failures`.
    pub fn mark_failed(&mut self, id: &NodeId, max_failures: u8) -> bool {
        let bucket = &mut self.buckets[self.our_id.bucket_index(id)];
        let Some(pos) = bucket.position(id) else {
            return false;
        };

        bucket.nodes[pos].fail();
        if bucket.nodes[pos].failures > max_failures {
            bucket.nodes.remove(pos);
            return true;
        }
        false
    }

    pub fn get(&self, id: &NodeId) -> Option<&Node> {
        let bucket = &self.buckets[self.our_id.bucket_index(id)];
        bucket.nodes.iter().find(|n| &n.id == id)
    }

    /// Up to `count` contacts closest to `target`; equal distances prefer
    /// the most recently verified contact.
    pub fn closest(&self, target: &NodeId, count: usize) -> Vec<Node> {
        let mut nodes: Vec<&Node> = self.buckets.iter().flat_map(|b| b.nodes.iter()).collect();

        nodes.sort_by(|a, b| {
            a.id.distance(target)
                .cmp(&b.id.distance(target))
                .then_with(|| b.last_verified.cmp(&a.last_verified))
        });
        nodes.truncate(count);
        nodes.into_iter().cloned().collect()
    }

    /// Contacts that have not answered us within `max_age`, oldest first.
    pub fn questionable(&self, max_age: Duration) -> Vec<Node> {
        let mut nodes: Vec<&Node> = self
            .buckets
            .iter()
            .flat_map(|b| b.nodes.iter())
            .filter(|n| n.is_questionable(max_age))
            .collect();
        nodes.sort_by_key(|n| n.last_verified.unwrap_or(n.last_seen));
        nodes.into_iter().cloned().collect()
    }

    /// Buckets with room to grow, from the shallowest up to one past the
    /// deepest populated bucket.
    pub fn sparse_buckets(&self) -> Vec<usize> {
        let deepest = self
            .buckets
            .iter()
            .rposition(|b| !b.nodes.is_empty())
            .map_or(0, |i| i + 1)
            .min(NUM_BUCKETS - 1);

        (0..=deepest)
            .filter(|&i| self.buckets[i].nodes.len() < K)
            .collect()
    }

    pub fn bucket_len(&self, idx: usize) -> usize {
        self.buckets.get(idx).map_or(0, |b| b.nodes.len())
    }

    pub fn len(&self) -> usize {
        self.buckets.iter().map(|b| b.nodes.len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.buckets.iter().all(|b| b.nodes.is_empty())
    }

    pub fn verified_len(&self) -> usize {
        self.buckets
            .iter()
            .flat_map(|b| b.nodes.iter())
            .filter(|n| n.is_verified())
            .count()
    }
}
