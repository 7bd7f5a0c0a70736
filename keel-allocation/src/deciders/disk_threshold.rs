//! Refuses nodes whose disks are filling up.

use keel_cluster::{DiscoveryNode, ShardRouting, UnassignedReason};

use crate::context::RoutingAllocation;
use crate::decider::{AllocationDecider, Ruling};
use crate::settings::AllocationSettings;

/// Watermark-based disk protection.
///
/// Allocation stops at the low watermark (primaries of brand-new indices are
/// exempt up to the high watermark, so an empty cluster can still create
/// indices); at the high watermark shards must move away, and the flood
/// stage makes that urgent. Nodes with unknown disk usage are not refused.
#[derive(Debug, Clone, Copy)]
pub struct DiskThresholdDecider {
    low: f64,
    high: f64,
    flood_stage: f64,
}

impl DiskThresholdDecider {
    /// Creates the decider from cluster settings.
    #[must_use]
    pub const fn new(settings: &AllocationSettings) -> Self {
        Self {
            low: settings.disk_watermark_low,
            high: settings.disk_watermark_high,
            flood_stage: settings.disk_watermark_flood_stage,
        }
    }
}

impl AllocationDecider for DiskThresholdDecider {
    fn name(&self) -> &'static str {
        "disk_threshold"
    }

    fn can_allocate(
        &self,
        shard: &ShardRouting,
        node: &DiscoveryNode,
        allocation: &RoutingAllocation<'_>,
    ) -> Ruling {
        let Some(usage) = allocation.cluster_info().disk_usage(node.id()) else {
            return Ruling::yes();
        };
        let used = usage.used_fraction();
        if used >= self.high {
            return Ruling::no(format!(
                "disk usage {:.1}% is above the high watermark ({:.1}%)",
                used * 100.0,
                self.high * 100.0
            ));
        }
        let new_primary = shard.primary()
            && shard
                .unassigned_info()
                .is_some_and(|info| info.reason == UnassignedReason::IndexCreated);
        if used >= self.low && !new_primary {
            return Ruling::no(format!(
                "disk usage {:.1}% is above the low watermark ({:.1}%)",
                used * 100.0,
                self.low * 100.0
            ));
        }
        Ruling::yes()
    }

    fn can_remain(
        &self,
        _shard: &ShardRouting,
        node: &DiscoveryNode,
        allocation: &RoutingAllocation<'_>,
    ) -> Ruling {
        let Some(usage) = allocation.cluster_info().disk_usage(node.id()) else {
            return Ruling::yes();
        };
        let used = usage.used_fraction();
        if used >= self.flood_stage {
            return Ruling::no(format!(
                "disk usage {:.1}% is above the flood stage ({:.1}%)",
                used * 100.0,
                self.flood_stage * 100.0
            ));
        }
        if used >= self.high {
            return Ruling::no(format!(
                "disk usage {:.1}% is above the high watermark ({:.1}%)",
                used * 100.0,
                self.high * 100.0
            ));
        }
        Ruling::yes()
    }
}
