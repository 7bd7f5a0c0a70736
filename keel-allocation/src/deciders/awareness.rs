//! Spreads shard copies across failure domains.

use std::collections::BTreeSet;

use keel_cluster::{DiscoveryNode, ShardRouting};

use crate::context::RoutingAllocation;
use crate::decider::{AllocationDecider, Ruling};
use crate::settings::AllocationSettings;

/// Balances copies of one shard across the values of configured node
/// attributes (rack, zone). A node may take a copy only while its attribute
/// value holds at most `ceil(copies / values)` of them.
#[derive(Debug, Clone)]
pub struct AwarenessAllocationDecider {
    attributes: Vec<String>,
}

impl AwarenessAllocationDecider {
    /// Creates the decider from cluster settings.
    #[must_use]
    pub fn new(settings: &AllocationSettings) -> Self {
        Self {
            attributes: settings.awareness_attributes.clone(),
        }
    }
}

impl AllocationDecider for AwarenessAllocationDecider {
    fn name(&self) -> &'static str {
        "awareness"
    }

    fn can_allocate(
        &self,
        shard: &ShardRouting,
        node: &DiscoveryNode,
        allocation: &RoutingAllocation<'_>,
    ) -> Ruling {
        if self.attributes.is_empty() {
            return Ruling::yes();
        }
        let Some(meta) = allocation.metadata().index(shard.shard_id().index().name()) else {
            return Ruling::yes();
        };
        let total_copies = 1 + meta.number_of_replicas() as usize;

        for attribute in &self.attributes {
            let Some(node_value) = node.attribute(attribute) else {
                return Ruling::no(format!(
                    "node has no value for awareness attribute [{attribute}]"
                ));
            };

            let values: BTreeSet<&str> = allocation
                .nodes()
                .data_nodes()
                .filter_map(|n| n.attribute(attribute))
                .collect();
            let value_count = values.len().max(1);

            // Copies already in this attribute value, plus the one placed.
            // Relocation sources are skipped: their target half counts at
            // its own location.
            let mut count = 1;
            for copy in allocation.routing_nodes().assigned(shard.shard_id()) {
                if copy.is_same_allocation(shard) || copy.is_relocating() {
                    continue;
                }
                let on_value = copy
                    .current_node()
                    .and_then(|id| allocation.nodes().get(id))
                    .and_then(|n| n.attribute(attribute))
                    == Some(node_value);
                if on_value {
                    count += 1;
                }
            }

            let allowed = total_copies.div_ceil(value_count);
            if count > allowed {
                return Ruling::no(format!(
                    "too many copies of {} in [{attribute}={node_value}]: \
                     {count} > {allowed} allowed across {value_count} values",
                    shard.shard_id()
                ));
            }
        }

        Ruling::yes()
    }
}
