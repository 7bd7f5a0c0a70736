//! Replicas wait for their primary.

use keel_cluster::{DiscoveryNode, ShardRouting};

use crate::context::RoutingAllocation;
use crate::decider::{AllocationDecider, Ruling};

/// A replica may start recovering only once its primary is active; there is
/// nothing to recover from before that.
#[derive(Debug, Clone, Copy, Default)]
pub struct ReplicaAfterPrimaryActiveDecider;

impl ReplicaAfterPrimaryActiveDecider {
    /// Creates the decider.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }
}

impl AllocationDecider for ReplicaAfterPrimaryActiveDecider {
    fn name(&self) -> &'static str {
        "replica_after_primary_active"
    }

    fn can_allocate(
        &self,
        shard: &ShardRouting,
        _node: &DiscoveryNode,
        allocation: &RoutingAllocation<'_>,
    ) -> Ruling {
        if shard.primary() {
            return Ruling::yes();
        }
        if allocation
            .routing_nodes()
            .active_primary(shard.shard_id())
            .is_some()
        {
            Ruling::yes()
        } else {
            Ruling::no(format!(
                "the primary of {} is not active yet",
                shard.shard_id()
            ))
        }
    }
}
