//! The gateway allocator: places shards that already have data somewhere.
//!
//! A primary with a recorded in-sync set must come back on a node holding an
//! in-sync copy; handing it to the balancer would resurrect it empty.
//! Replicas merely prefer nodes with a reusable copy. Store information is
//! gathered asynchronously outside the allocator; a pass sees it through a
//! synchronous oracle that may answer "still fetching".

use std::collections::{BTreeMap, BTreeSet, HashMap};

use keel_core::NodeId;
use keel_cluster::{AllocationStatus, ShardId, ShardRouting};
use uuid::Uuid;

use crate::context::RoutingAllocation;
use crate::decider::Decision;

/// An on-disk copy of a shard found on some node.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StoreCopy {
    /// Allocation id the copy was written under.
    pub allocation_id: Uuid,
    /// Size of the copy in bytes.
    pub size_bytes: u64,
}

/// Answer of the store oracle for one shard.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreFetch {
    /// Store listing is not available yet; ask again next pass.
    Fetching,
    /// All known on-disk copies, by node.
    Available(BTreeMap<NodeId, StoreCopy>),
}

/// Synchronous view over asynchronously gathered shard-store listings.
pub trait ShardStoreProvider: Send + Sync {
    /// Returns the known on-disk copies of a shard, or `Fetching`.
    fn store_info(&self, shard_id: &ShardId) -> StoreFetch;
}

/// Provider that knows of no on-disk data at all.
#[derive(Debug, Clone, Copy, Default)]
pub struct EmptyStoreProvider;

impl ShardStoreProvider for EmptyStoreProvider {
    fn store_info(&self, _shard_id: &ShardId) -> StoreFetch {
        StoreFetch::Available(BTreeMap::new())
    }
}

/// Places shards with preexisting on-disk state, consulted before the
/// balancer. Caches store listings across passes; started or failed shards
/// invalidate their entries.
pub struct GatewayAllocator {
    provider: Box<dyn ShardStoreProvider>,
    cache: HashMap<ShardId, BTreeMap<NodeId, StoreCopy>>,
}

impl GatewayAllocator {
    /// Creates a gateway allocator over a store oracle.
    #[must_use]
    pub fn new(provider: Box<dyn ShardStoreProvider>) -> Self {
        Self {
            provider,
            cache: HashMap::new(),
        }
    }

    /// Places unassigned shards that have (or need) on-disk data. Returns
    /// true if anything changed. Shards without data fall through to the
    /// balancer untouched.
    pub fn allocate_unassigned(&mut self, allocation: &mut RoutingAllocation<'_>) -> bool {
        let mut changed = false;
        let pending = allocation.routing_nodes_mut().unassigned_mut().drain();

        for shard in pending {
            if shard.primary() {
                changed |= self.place_primary(allocation, shard);
            } else {
                changed |= self.place_replica(allocation, shard);
            }
        }
        changed
    }

    /// Drops cached store listings for shards that started.
    pub fn apply_started_shards<'a>(&mut self, shards: impl IntoIterator<Item = &'a ShardId>) {
        for shard_id in shards {
            self.cache.remove(shard_id);
        }
    }

    /// Drops cached store listings for shards that failed.
    pub fn apply_failed_shards<'a>(&mut self, shards: impl IntoIterator<Item = &'a ShardId>) {
        for shard_id in shards {
            self.cache.remove(shard_id);
        }
    }

    fn place_primary(
        &mut self,
        allocation: &mut RoutingAllocation<'_>,
        shard: ShardRouting,
    ) -> bool {
        let shard_id = shard.shard_id().clone();
        let in_sync: BTreeSet<Uuid> = allocation
            .metadata()
            .index(shard_id.index().name())
            .map(|meta| meta.in_sync_ids(shard_id.number()).clone())
            .unwrap_or_default();

        if in_sync.is_empty() {
            // Brand-new primary; the balancer may put it anywhere.
            allocation.routing_nodes_mut().unassigned_mut().push(shard);
            return false;
        }

        let Some(stores) = self.stores(&shard_id) else {
            tracing::trace!(shard = %shard_id, "store listing not fetched yet");
            return allocation
                .routing_nodes_mut()
                .unassigned_mut()
                .ignore(shard, AllocationStatus::FetchingShardData);
        };

        let candidates: Vec<(NodeId, u64)> = stores
            .iter()
            .filter(|(_, copy)| in_sync.contains(&copy.allocation_id))
            .map(|(&node, copy)| (node, copy.size_bytes))
            .collect();
        if candidates.is_empty() {
            tracing::debug!(shard = %shard_id, "no in-sync copy found in the cluster");
            return allocation
                .routing_nodes_mut()
                .unassigned_mut()
                .ignore(shard, AllocationStatus::NoValidShardCopy);
        }

        let mut throttled = false;
        for (node, size_bytes) in candidates {
            if allocation.is_ignored(node, &shard_id)
                || !allocation.nodes().is_live_data_node(node)
            {
                continue;
            }
            let verdict = allocation.decide_allocate(&shard, node);
            allocation.explain(format!("allocate {shard_id} to {node}"), &verdict);
            match verdict.decision {
                Decision::Yes => {
                    allocation
                        .routing_nodes_mut()
                        .initialize_shard(shard, node, Some(size_bytes));
                    return true;
                }
                Decision::Throttle => throttled = true,
                Decision::No => {}
            }
        }

        let status = if throttled {
            AllocationStatus::Throttled
        } else {
            AllocationStatus::DecidersNo
        };
        allocation
            .routing_nodes_mut()
            .unassigned_mut()
            .ignore(shard, status)
    }

    fn place_replica(
        &mut self,
        allocation: &mut RoutingAllocation<'_>,
        shard: ShardRouting,
    ) -> bool {
        let delayed = shard.unassigned_info().is_some_and(|info| info.delayed);
        let primary_active = allocation
            .routing_nodes()
            .active_primary(shard.shard_id())
            .is_some();
        if delayed || !primary_active {
            allocation.routing_nodes_mut().unassigned_mut().push(shard);
            return false;
        }

        let shard_id = shard.shard_id().clone();
        let Some(stores) = self.stores(&shard_id) else {
            // A replica can be built from scratch; let the balancer decide.
            allocation.routing_nodes_mut().unassigned_mut().push(shard);
            return false;
        };

        // Prefer a node that already holds a reusable copy.
        let candidates: Vec<(NodeId, u64)> = stores
            .iter()
            .map(|(&node, copy)| (node, copy.size_bytes))
            .collect();
        for (node, size_bytes) in candidates {
            if allocation.is_ignored(node, &shard_id)
                || !allocation.nodes().is_live_data_node(node)
            {
                continue;
            }
            let verdict = allocation.decide_allocate(&shard, node);
            allocation.explain(format!("allocate {shard_id} to {node}"), &verdict);
            if verdict.decision == Decision::Yes {
                allocation
                    .routing_nodes_mut()
                    .initialize_shard(shard, node, Some(size_bytes));
                return true;
            }
        }

        allocation.routing_nodes_mut().unassigned_mut().push(shard);
        false
    }

    fn stores(&mut self, shard_id: &ShardId) -> Option<&BTreeMap<NodeId, StoreCopy>> {
        use std::collections::hash_map::Entry;
        let stores = match self.cache.entry(shard_id.clone()) {
            Entry::Occupied(entry) => entry.into_mut(),
            Entry::Vacant(entry) => match self.provider.store_info(shard_id) {
                StoreFetch::Fetching => return None,
                StoreFetch::Available(stores) => entry.insert(stores),
            },
        };
        Some(&*stores)
    }
}

impl std::fmt::Debug for GatewayAllocator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GatewayAllocator")
            .field("cached_shards", &self.cache.len())
            .finish()
    }
}
