use super::node::{Node, NodeId};
use super::routing::RoutingTable;
use std::collections::HashSet;
use std::time::Duration;

/// Ticks between lookups of our own id.
const SELF_LOOKUP_EVERY: u64 = 20;
/// Closest contacts considered when picking who to ask about a target.
const CANDIDATES_PER_TARGET: usize = 8;

/// One `find_node` to send.
#[derive(Debug, Clone)]
pub struct Probe {
    pub node: Node,
    pub target: NodeId,
}

/// What one crawl tick should send.
#[derive(Debug, Default)]
pub struct CrawlPlan {
    /// Re-resolve and query the bootstrap routers.
    pub bootstrap: bool,
    pub probes: Vec<Probe>,
    pub pings: Vec<Node>,
}

/// Decides which queries keep the routing table populated.
///
/// Pure policy: it reads the table and returns a [`CrawlPlan`], the event
/// loop does the sending. Targets are drawn from buckets that still have
/// room so each walk pulls in contacts where the table is thin. It never
/// plans a `get_peers`.
pub struct Crawler {
    find_node_per_tick: usize,
    pings_per_tick: usize,
    min_nodes: usize,
    questionable_after: Duration,
    cursor: usize,
    ticks: u64,
}

impl Crawler {
    pub fn new(
        find_node_per_tick: usize,
        pings_per_tick: usize,
        min_nodes: usize,
        questionable_after: Duration,
    ) -> Self {
        Self {
            find_node_per_tick,
            pings_per_tick,
            min_nodes,
            questionable_after,
            cursor: 0,
            ticks: 0,
        }
    }

    pub fn plan(&mut self, table: &RoutingTable) -> CrawlPlan {
        self.ticks += 1;

        let mut plan = CrawlPlan {
            bootstrap: table.len() < self.min_nodes,
            ..CrawlPlan::default()
        };

        if table.is_empty() {
            return plan;
        }

        let mut targets = Vec::with_capacity(self.find_node_per_tick);
        if self.ticks % SELF_LOOKUP_EVERY == 1 {
            targets.push(*table.our_id());
        }

        let sparse = table.sparse_buckets();
        for _ in 0..self.find_node_per_tick.min(sparse.len()) {
            let depth = sparse[self.cursor % sparse.len()];
            self.cursor = self.cursor.wrapping_add(1);
            targets.push(table.our_id().random_at_depth(depth));
        }

        let mut asked = HashSet::new();
        for target in targets {
            for node in table.closest(&target, CANDIDATES_PER_TARGET) {
                if plan.probes.len() >= self.find_node_per_tick {
                    break;
                }
                if asked.insert(node.id) {
                    plan.probes.push(Probe { node, target });
                    break;
                }
            }
        }

        plan.pings = table
            .questionable(self.questionable_after)
            .into_iter()
            .filter(|n| !asked.contains(&n.id))
            .take(self.pings_per_tick)
            .collect();

        plan
    }
}
