//! Weight-based shard placement and rebalancing.

use std::cmp::Ordering;

use keel_core::NodeId;
use keel_cluster::{AllocationStatus, ShardId, ShardRouting};
use uuid::Uuid;

use crate::context::RoutingAllocation;
use crate::decider::Decision;

/// Maximum rebalance sweeps per pass. Each accepted move strictly shrinks
/// the weight spread of its index, so this bound is never the terminator in
/// practice.
const REBALANCE_SWEEPS_MAX: usize = 100;

/// Strategy that places unassigned shards and proposes rebalancing moves,
/// operating only on the working copy through the deciders.
pub trait ShardsAllocator: Send + Sync {
    /// Runs one placement round. Returns true if anything changed.
    fn allocate(&self, allocation: &mut RoutingAllocation<'_>) -> bool;
}

/// Tuning knobs of the [`BalancedShardsAllocator`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BalancerSettings {
    /// Weight of a node's total shard count.
    pub shard_balance_factor: f32,
    /// Weight of a node's per-index shard count.
    pub index_balance_factor: f32,
    /// Minimum weight spread before a rebalancing move is worth it.
    pub threshold: f32,
}

impl BalancerSettings {
    /// Creates settings with defaults.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            shard_balance_factor: 0.45,
            index_balance_factor: 0.55,
            threshold: 1.0,
        }
    }

    /// Validates internal consistency.
    ///
    /// # Errors
    /// Returns an error if any knob is out of range.
    pub fn validate(&self) -> keel_core::Result<()> {
        if self.shard_balance_factor < 0.0 || self.index_balance_factor < 0.0 {
            return Err(keel_core::Error::InvalidArgument {
                name: "balance_factor",
                reason: "factors must be non-negative",
            });
        }
        if self.shard_balance_factor + self.index_balance_factor <= 0.0 {
            return Err(keel_core::Error::InvalidArgument {
                name: "balance_factor",
                reason: "at least one factor must be positive",
            });
        }
        if self.threshold < 0.0 {
            return Err(keel_core::Error::InvalidArgument {
                name: "threshold",
                reason: "must be non-negative",
            });
        }
        Ok(())
    }
}

impl Default for BalancerSettings {
    fn default() -> Self {
        Self::new()
    }
}

/// The default placement strategy.
///
/// Weight of a node is `shard_factor * shards(node) +
/// index_factor * shards(node, index)`; lower is better. Placement picks the
/// lightest node the deciders accept (ties broken by node id); rebalancing
/// moves one shard at a time from the heaviest to the lightest node of an
/// index while the spread exceeds the threshold and the move strictly
/// shrinks it.
#[derive(Debug, Clone, Copy, Default)]
pub struct BalancedShardsAllocator {
    settings: BalancerSettings,
}

impl BalancedShardsAllocator {
    /// Creates a balancer with the given settings.
    #[must_use]
    pub const fn new(settings: BalancerSettings) -> Self {
        Self { settings }
    }

    fn weight(&self, allocation: &RoutingAllocation<'_>, node: NodeId, index: &str) -> f32 {
        #[allow(clippy::cast_precision_loss)]
        let total = allocation.routing_nodes().node_shard_count(node) as f32;
        #[allow(clippy::cast_precision_loss)]
        let of_index = allocation
            .routing_nodes()
            .shards_on(node)
            .filter(|s| s.shard_id().index().name() == index)
            .count() as f32;
        self.settings
            .shard_balance_factor
            .mul_add(total, self.settings.index_balance_factor * of_index)
    }

    fn allocate_unassigned(&self, allocation: &mut RoutingAllocation<'_>) -> bool {
        let mut pending = allocation.routing_nodes_mut().unassigned_mut().drain();
        if pending.is_empty() {
            return false;
        }
        // Primaries first; replicas depend on them.
        pending.sort_by_key(|s| !s.primary());

        let node_ids: Vec<NodeId> = allocation
            .nodes()
            .data_nodes()
            .map(keel_cluster::DiscoveryNode::id)
            .collect();

        let mut changed = false;
        for shard in pending {
            if shard.unassigned_info().is_some_and(|info| info.delayed) {
                changed |= allocation
                    .routing_nodes_mut()
                    .unassigned_mut()
                    .ignore(shard, AllocationStatus::DelayedAllocation);
                continue;
            }
            if self.needs_existing_copy(allocation, &shard) {
                // Gateway territory; without an in-sync copy this primary
                // must not be invented from nothing.
                changed |= allocation
                    .routing_nodes_mut()
                    .unassigned_mut()
                    .ignore(shard, AllocationStatus::NoValidShardCopy);
                continue;
            }

            let mut best: Option<(f32, NodeId)> = None;
            let mut throttled = false;
            for &node in &node_ids {
                if allocation.is_ignored(node, shard.shard_id()) {
                    continue;
                }
                let verdict = allocation.decide_allocate(&shard, node);
                allocation.explain(
                    format!("allocate {} to {node}", shard.shard_id()),
                    &verdict,
                );
                match verdict.decision {
                    Decision::Yes => {
                        let weight = self.weight(allocation, node, shard.shard_id().index().name());
                        if best.is_none_or(|(w, n)| lighter((weight, node), (w, n))) {
                            best = Some((weight, node));
                        }
                    }
                    Decision::Throttle => throttled = true,
                    Decision::No => {}
                }
            }

            if let Some((_, node)) = best {
                let expected = allocation.cluster_info().shard_size(shard.shard_id());
                allocation
                    .routing_nodes_mut()
                    .initialize_shard(shard, node, expected);
                changed = true;
            } else {
                let status = if throttled {
                    AllocationStatus::Throttled
                } else {
                    AllocationStatus::DecidersNo
                };
                changed |= allocation
                    .routing_nodes_mut()
                    .unassigned_mut()
                    .ignore(shard, status);
            }
        }
        changed
    }

    /// Relocates started shards that may no longer remain where they are
    /// (disk flood, filter changes).
    fn move_shards(&self, allocation: &mut RoutingAllocation<'_>) -> bool {
        let candidates: Vec<(ShardId, Uuid, NodeId)> = allocation
            .routing_nodes()
            .iter_assigned()
            .filter(|s| s.is_started())
            .filter_map(|s| {
                let allocation_id = s.allocation_id()?.id();
                let node = s.current_node()?;
                Some((s.shard_id().clone(), allocation_id, node))
            })
            .collect();

        let node_ids: Vec<NodeId> = allocation
            .nodes()
            .data_nodes()
            .map(keel_cluster::DiscoveryNode::id)
            .collect();

        let mut changed = false;
        for (shard_id, allocation_id, source) in candidates {
            let Some(shard) = allocation
                .routing_nodes()
                .get_by_allocation(&shard_id, allocation_id)
            else {
                continue;
            };
            if !shard.is_started() {
                continue;
            }
            let shard = shard.clone();

            let remain = allocation.decide_remain(&shard, source);
            if remain.decision != Decision::No {
                continue;
            }
            allocation.explain(format!("move {shard_id} off {source}"), &remain);

            if let Some(target) = self.pick_target(allocation, &shard, &node_ids, source) {
                tracing::debug!(shard = %shard, from = %source, to = %target, "moving shard");
                let expected = allocation.cluster_info().shard_size(&shard_id);
                allocation.routing_nodes_mut().relocate_shard(
                    &shard_id,
                    allocation_id,
                    target,
                    expected,
                );
                changed = true;
            }
        }
        changed
    }

    fn rebalance(&self, allocation: &mut RoutingAllocation<'_>) -> bool {
        let node_ids: Vec<NodeId> = allocation
            .nodes()
            .data_nodes()
            .map(keel_cluster::DiscoveryNode::id)
            .collect();
        if node_ids.len() < 2 {
            return false;
        }
        let index_names: Vec<String> = allocation
            .metadata()
            .iter()
            .map(|meta| meta.index().name().to_string())
            .collect();
        // A move shifts this much weight from one node to another; the
        // spread must exceed it for the move to strictly improve things.
        let step = self.settings.shard_balance_factor + self.settings.index_balance_factor;

        let mut changed = false;
        for _ in 0..REBALANCE_SWEEPS_MAX {
            let mut moved = false;
            for index in &index_names {
                let weights: Vec<(f32, NodeId)> = node_ids
                    .iter()
                    .map(|&node| (self.weight(allocation, node, index), node))
                    .collect();
                let Some(&heaviest) = weights
                    .iter()
                    .max_by(|a, b| compare_weight(**a, **b))
                else {
                    continue;
                };
                let Some(&lightest) = weights
                    .iter()
                    .min_by(|a, b| compare_weight(**a, **b))
                else {
                    continue;
                };
                let spread = heaviest.0 - lightest.0;
                if spread <= self.settings.threshold || spread <= step {
                    continue;
                }

                moved |= self.rebalance_one(allocation, index, heaviest.1, lightest.1);
            }
            changed |= moved;
            if !moved {
                break;
            }
        }
        changed
    }

    fn rebalance_one(
        &self,
        allocation: &mut RoutingAllocation<'_>,
        index: &str,
        source: NodeId,
        target: NodeId,
    ) -> bool {
        let candidates: Vec<(ShardId, Uuid)> = allocation
            .routing_nodes()
            .shards_on(source)
            .filter(|s| s.is_started() && s.shard_id().index().name() == index)
            .filter_map(|s| Some((s.shard_id().clone(), s.allocation_id()?.id())))
            .collect();

        for (shard_id, allocation_id) in candidates {
            if allocation.is_ignored(target, &shard_id) {
                continue;
            }
            let Some(shard) = allocation
                .routing_nodes()
                .get_by_allocation(&shard_id, allocation_id)
            else {
                continue;
            };
            let shard = shard.clone();
            let verdict = allocation.decide_allocate(&shard, target);
            allocation.explain(
                format!("rebalance {shard_id} from {source} to {target}"),
                &verdict,
            );
            if verdict.decision == Decision::Yes {
                tracing::debug!(shard = %shard, from = %source, to = %target, "rebalancing");
                let expected = allocation.cluster_info().shard_size(&shard_id);
                allocation.routing_nodes_mut().relocate_shard(
                    &shard_id,
                    allocation_id,
                    target,
                    expected,
                );
                return true;
            }
        }
        false
    }

    fn pick_target(
        &self,
        allocation: &RoutingAllocation<'_>,
        shard: &ShardRouting,
        node_ids: &[NodeId],
        source: NodeId,
    ) -> Option<NodeId> {
        let mut best: Option<(f32, NodeId)> = None;
        for &node in node_ids {
            if node == source || allocation.is_ignored(node, shard.shard_id()) {
                continue;
            }
            if allocation.decide_allocate(shard, node).decision != Decision::Yes {
                continue;
            }
            let weight = self.weight(allocation, node, shard.shard_id().index().name());
            if best.is_none_or(|(w, n)| lighter((weight, node), (w, n))) {
                best = Some((weight, node));
            }
        }
        best.map(|(_, node)| node)
    }

    fn needs_existing_copy(
        &self,
        allocation: &RoutingAllocation<'_>,
        shard: &ShardRouting,
    ) -> bool {
        shard.primary()
            && allocation
                .metadata()
                .index(shard.shard_id().index().name())
                .is_some_and(|meta| !meta.in_sync_ids(shard.shard_id().number()).is_empty())
    }
}

impl ShardsAllocator for BalancedShardsAllocator {
    fn allocate(&self, allocation: &mut RoutingAllocation<'_>) -> bool {
        let mut changed = self.allocate_unassigned(allocation);
        changed |= self.move_shards(allocation);
        changed |= self.rebalance(allocation);
        changed
    }
}

fn compare_weight(a: (f32, NodeId), b: (f32, NodeId)) -> Ordering {
    a.0.partial_cmp(&b.0)
        .unwrap_or(Ordering::Equal)
        .then(a.1.cmp(&b.1))
}

fn lighter(candidate: (f32, NodeId), best: (f32, NodeId)) -> bool {
    compare_weight(candidate, best) == Ordering::Less
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_settings_valid() {
        assert!(BalancerSettings::new().validate().is_ok());
    }

    #[test]
    fn test_negative_threshold_invalid() {
        let mut settings = BalancerSettings::new();
        settings.threshold = -1.0;
        assert!(settings.validate().is_err());
    }

    #[test]
    fn test_weight_comparison_tie_breaks_by_node() {
        let a = (1.0_f32, NodeId::new(1));
        let b = (1.0_f32, NodeId::new(2));
        assert!(lighter(a, b));
        assert!(!lighter(b, a));
    }
}
