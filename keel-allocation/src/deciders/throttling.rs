//! Caps concurrent recoveries and total shards per node.

use keel_cluster::{DiscoveryNode, ShardRouting};

use crate::context::RoutingAllocation;
use crate::decider::{AllocationDecider, Ruling};
use crate::settings::AllocationSettings;

/// Node capacity limits.
///
/// Recovery concurrency throttles (retry on a later pass once recoveries
/// finish); the absolute shard cap refuses outright.
#[derive(Debug, Clone, Copy)]
pub struct ThrottlingAllocationDecider {
    concurrent_recoveries: u32,
    max_shards_per_node: u32,
}

impl ThrottlingAllocationDecider {
    /// Creates the decider from cluster settings.
    #[must_use]
    pub const fn new(settings: &AllocationSettings) -> Self {
        Self {
            concurrent_recoveries: settings.node_concurrent_recoveries,
            max_shards_per_node: settings.max_shards_per_node,
        }
    }
}

impl AllocationDecider for ThrottlingAllocationDecider {
    fn name(&self) -> &'static str {
        "throttling"
    }

    fn can_allocate(
        &self,
        shard: &ShardRouting,
        node: &DiscoveryNode,
        allocation: &RoutingAllocation<'_>,
    ) -> Ruling {
        let shards = allocation.routing_nodes().node_shard_count(node.id());
        if shards >= self.max_shards_per_node as usize {
            return Ruling::no(format!(
                "node already holds {shards} shards (max_shards_per_node={})",
                self.max_shards_per_node
            ));
        }

        let incoming = allocation.routing_nodes().incoming_recoveries(node.id());
        if incoming >= self.concurrent_recoveries as usize {
            return Ruling::throttle(format!(
                "{incoming} concurrent incoming recoveries (cap {})",
                self.concurrent_recoveries
            ));
        }

        // For a relocation the assigned shard is the source; cap its node's
        // outgoing handoffs as well.
        if let Some(source) = shard.current_node() {
            let outgoing = allocation.routing_nodes().outgoing_recoveries(source);
            if outgoing >= self.concurrent_recoveries as usize {
                return Ruling::throttle(format!(
                    "{outgoing} concurrent outgoing recoveries on {source} (cap {})",
                    self.concurrent_recoveries
                ));
            }
        }
        Ruling::yes()
    }
}
