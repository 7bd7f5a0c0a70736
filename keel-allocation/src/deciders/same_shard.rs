//! Refuses two copies of the same shard on one node (or host).

use keel_cluster::{DiscoveryNode, ShardRouting};

use crate::context::RoutingAllocation;
use crate::decider::{AllocationDecider, Ruling};
use crate::settings::AllocationSettings;

/// Keeps copies of one shard apart: never two on the same node, and
/// optionally never two on the same host.
#[derive(Debug, Clone, Copy)]
pub struct SameShardAllocationDecider {
    same_host: bool,
}

impl SameShardAllocationDecider {
    /// Creates the decider from cluster settings.
    #[must_use]
    pub const fn new(settings: &AllocationSettings) -> Self {
        Self {
            same_host: settings.same_shard_host,
        }
    }
}

impl AllocationDecider for SameShardAllocationDecider {
    fn name(&self) -> &'static str {
        "same_shard"
    }

    fn can_allocate(
        &self,
        shard: &ShardRouting,
        node: &DiscoveryNode,
        allocation: &RoutingAllocation<'_>,
    ) -> Ruling {
        for copy in allocation.routing_nodes().assigned(shard.shard_id()) {
            if copy.current_node() == Some(node.id()) {
                return Ruling::no(format!(
                    "a copy of {} is already allocated to this node",
                    shard.shard_id()
                ));
            }
        }

        if self.same_host && !node.host().is_empty() {
            for other in allocation.nodes().data_nodes() {
                if other.id() == node.id() || other.host() != node.host() {
                    continue;
                }
                let occupied = allocation
                    .routing_nodes()
                    .assigned(shard.shard_id())
                    .any(|copy| copy.current_node() == Some(other.id()));
                if occupied {
                    return Ruling::no(format!(
                        "a copy of {} is already allocated to host [{}]",
                        shard.shard_id(),
                        node.host()
                    ));
                }
            }
        }

        Ruling::yes()
    }
}
