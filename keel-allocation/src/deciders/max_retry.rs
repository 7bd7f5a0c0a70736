//! Stops retrying shards that keep failing.

use keel_cluster::{DiscoveryNode, ShardRouting};

use crate::context::RoutingAllocation;
use crate::decider::{AllocationDecider, Ruling};
use crate::settings::AllocationSettings;

/// Refuses shards whose consecutive allocation failures reached the retry
/// cap; an operator reroute with `retry_failed` resets the gate for one
/// pass.
#[derive(Debug, Clone, Copy)]
pub struct MaxRetryAllocationDecider {
    max_retries: u32,
}

impl MaxRetryAllocationDecider {
    /// Creates the decider from cluster settings.
    #[must_use]
    pub const fn new(settings: &AllocationSettings) -> Self {
        Self {
            max_retries: settings.max_retries,
        }
    }
}

impl AllocationDecider for MaxRetryAllocationDecider {
    fn name(&self) -> &'static str {
        "max_retry"
    }

    fn can_allocate(
        &self,
        shard: &ShardRouting,
        _node: &DiscoveryNode,
        allocation: &RoutingAllocation<'_>,
    ) -> Ruling {
        if allocation.retry_failed() {
            return Ruling::yes();
        }
        let failed = shard
            .unassigned_info()
            .map_or(0, |info| info.failed_allocations);
        if failed >= self.max_retries {
            return Ruling::no(format!(
                "shard failed {failed} allocation attempts (max_retries={}); \
                 reroute with retry_failed to try again",
                self.max_retries
            ));
        }
        Ruling::yes()
    }
}
