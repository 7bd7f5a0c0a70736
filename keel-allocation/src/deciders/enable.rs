//! Honors the cluster-wide allocation-enable gate.

use keel_cluster::{DiscoveryNode, ShardRouting, UnassignedReason};

use crate::context::RoutingAllocation;
use crate::decider::{AllocationDecider, Ruling};
use crate::settings::{AllocationSettings, EnableAllocation};

/// Gates allocation on `cluster.routing.allocation.enable`. Explicit
/// operator commands bypass the gate through the pass's `ignore_disable`
/// flag.
#[derive(Debug, Clone, Copy)]
pub struct EnableAllocationDecider {
    enable: EnableAllocation,
}

impl EnableAllocationDecider {
    /// Creates the decider from cluster settings.
    #[must_use]
    pub const fn new(settings: &AllocationSettings) -> Self {
        Self {
            enable: settings.enable,
        }
    }
}

impl AllocationDecider for EnableAllocationDecider {
    fn name(&self) -> &'static str {
        "enable"
    }

    fn can_allocate(
        &self,
        shard: &ShardRouting,
        _node: &DiscoveryNode,
        allocation: &RoutingAllocation<'_>,
    ) -> Ruling {
        if allocation.ignore_disable() {
            return Ruling::yes();
        }
        match self.enable {
            EnableAllocation::All => Ruling::yes(),
            EnableAllocation::None => Ruling::no("all shard allocation is disabled"),
            EnableAllocation::Primaries => {
                if shard.primary() {
                    Ruling::yes()
                } else {
                    Ruling::no("replica allocation is disabled")
                }
            }
            EnableAllocation::NewPrimaries => {
                let new_primary = shard.primary()
                    && shard
                        .unassigned_info()
                        .is_some_and(|info| info.reason == UnassignedReason::IndexCreated);
                if new_primary {
                    Ruling::yes()
                } else {
                    Ruling::no("only primaries of new indices may allocate")
                }
            }
        }
    }
}
