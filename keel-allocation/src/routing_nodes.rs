//! The mutable routing view of one allocation pass.
//!
//! `RoutingNodes` clones the immutable routing table into a working copy the
//! allocators mutate. Assigned shard routings live in a flat arena; per-node
//! lists and a by-shard index hold arena slots, so there are no cyclic
//! references to manage. Unassigned copies wait in a queue with an "ignored"
//! side list for copies this pass has given up on.
//!
//! Every transition here preserves the routing invariants (one primary per
//! shard, one copy per node, unique allocation ids, paired relocation
//! halves); [`crate::invariants::check`] verifies them after each pass in
//! debug builds.

use std::collections::{BTreeMap, HashMap};

use keel_core::NodeId;
use keel_cluster::{
    AllocationClock, AllocationStatus, DiscoveryNodes, RoutingTable, ShardId, ShardRouting,
    ShardTable, UnassignedInfo, UnassignedReason,
};
use rand::seq::SliceRandom;
use rand::Rng;
use rand_chacha::ChaCha8Rng;
use uuid::Uuid;

type Slot = usize;

/// Queue of unassigned shard copies for one pass.
///
/// Allocators `drain` the queue, place what they can, push back what they do
/// not own, and `ignore` what they own but cannot place. Ignored copies are
/// skipped by later allocators in the same pass and rejoin the routing table
/// at commit.
#[derive(Debug, Default)]
pub struct UnassignedShards {
    shards: Vec<ShardRouting>,
    ignored: Vec<ShardRouting>,
}

impl UnassignedShards {
    /// Number of copies still waiting (ignored ones excluded).
    #[must_use]
    pub fn len(&self) -> usize {
        self.shards.len()
    }

    /// True if no copy is waiting.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.shards.is_empty()
    }

    /// Number of copies ignored this pass.
    #[must_use]
    pub fn ignored_len(&self) -> usize {
        self.ignored.len()
    }

    /// Adds a copy to the queue.
    pub fn push(&mut self, shard: ShardRouting) {
        assert!(shard.is_unassigned(), "only unassigned shards queue here");
        self.shards.push(shard);
    }

    /// Takes every waiting copy out of the queue.
    #[must_use]
    pub fn drain(&mut self) -> Vec<ShardRouting> {
        std::mem::take(&mut self.shards)
    }

    /// Gives up on a copy for this pass, recording the attempt outcome.
    /// Returns true if the recorded status differs from the previous one.
    pub fn ignore(&mut self, mut shard: ShardRouting, status: AllocationStatus) -> bool {
        let previous = shard
            .unassigned_info()
            .map(|info| info.last_allocation_status);
        let changed = previous != Some(status);
        if changed {
            if let Some(info) = shard.unassigned_info().cloned() {
                shard.update_unassigned_info(info.with_status(status));
            }
        }
        self.ignored.push(shard);
        changed
    }

    /// Removes and returns the first waiting copy matching the predicate.
    pub fn take_first(
        &mut self,
        mut predicate: impl FnMut(&ShardRouting) -> bool,
    ) -> Option<ShardRouting> {
        let position = self.shards.iter().position(|s| predicate(s))?;
        Some(self.shards.remove(position))
    }

    /// Iterates waiting copies.
    pub fn iter(&self) -> impl Iterator<Item = &ShardRouting> {
        self.shards.iter()
    }

    /// Iterates waiting copies mutably (delay-marker maintenance).
    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut ShardRouting> {
        self.shards.iter_mut()
    }

    /// Iterates waiting and ignored copies.
    pub fn iter_all(&self) -> impl Iterator<Item = &ShardRouting> {
        self.shards.iter().chain(self.ignored.iter())
    }

    fn shuffle(&mut self, rng: &mut ChaCha8Rng) {
        self.shards.shuffle(rng);
    }
}

/// Mutable shard-level view of the cluster for one pass.
#[derive(Debug)]
pub struct RoutingNodes {
    arena: Vec<Option<ShardRouting>>,
    nodes: BTreeMap<NodeId, Vec<Slot>>,
    by_shard: HashMap<ShardId, Vec<Slot>>,
    unassigned: UnassignedShards,
    rng: ChaCha8Rng,
}

impl RoutingNodes {
    /// Clones the routing table into a working copy.
    ///
    /// Every live data node gets an entry (possibly empty) so the balancer
    /// considers it; nodes that vanished but still hold shards get entries
    /// too, pending [dead-node deassociation]. Relocation targets, which the
    /// table does not store, are materialized from their sources.
    ///
    /// [dead-node deassociation]: crate::AllocationService::deassociate_dead_nodes
    #[must_use]
    pub fn new(table: &RoutingTable, nodes: &DiscoveryNodes, rng: ChaCha8Rng) -> Self {
        let mut routing_nodes = Self {
            arena: Vec::new(),
            nodes: BTreeMap::new(),
            by_shard: HashMap::new(),
            unassigned: UnassignedShards::default(),
            rng,
        };
        for node in nodes.data_nodes() {
            routing_nodes.nodes.entry(node.id()).or_default();
        }
        for shard in table.iter_shards() {
            if shard.is_unassigned() {
                routing_nodes.unassigned.push(shard.clone());
            } else {
                routing_nodes.insert(shard.clone());
                if shard.is_relocating() {
                    routing_nodes.insert(shard.build_relocation_target());
                }
            }
        }
        routing_nodes
    }

    /// Shuffles the unassigned queue so one unplaceable shard cannot starve
    /// the rest pass after pass. Command-mode reroutes skip this.
    pub fn shuffle_unassigned(&mut self) {
        let Self {
            unassigned, rng, ..
        } = self;
        unassigned.shuffle(rng);
    }

    /// The unassigned queue.
    #[must_use]
    pub const fn unassigned(&self) -> &UnassignedShards {
        &self.unassigned
    }

    /// The unassigned queue, mutably.
    pub fn unassigned_mut(&mut self) -> &mut UnassignedShards {
        &mut self.unassigned
    }

    /// Node ids in the working view, in id order.
    #[must_use]
    pub fn node_ids(&self) -> Vec<NodeId> {
        self.nodes.keys().copied().collect()
    }

    /// True if the view tracks this node.
    #[must_use]
    pub fn has_node(&self, node: NodeId) -> bool {
        self.nodes.contains_key(&node)
    }

    /// Iterates the shard copies assigned to a node.
    pub fn shards_on(&self, node: NodeId) -> impl Iterator<Item = &ShardRouting> {
        self.nodes
            .get(&node)
            .into_iter()
            .flatten()
            .map(|&slot| self.shard(slot))
    }

    /// Number of shard copies assigned to a node.
    #[must_use]
    pub fn node_shard_count(&self, node: NodeId) -> usize {
        self.nodes.get(&node).map_or(0, Vec::len)
    }

    /// Number of copies currently recovering onto a node.
    #[must_use]
    pub fn incoming_recoveries(&self, node: NodeId) -> usize {
        self.shards_on(node).filter(|s| s.is_initializing()).count()
    }

    /// Number of relocation sources handing off from a node.
    #[must_use]
    pub fn outgoing_recoveries(&self, node: NodeId) -> usize {
        self.shards_on(node).filter(|s| s.is_relocating()).count()
    }

    /// Iterates every assigned shard copy.
    pub fn iter_assigned(&self) -> impl Iterator<Item = &ShardRouting> {
        self.arena.iter().filter_map(Option::as_ref)
    }

    /// Iterates the assigned copies of one shard.
    pub fn assigned(&self, shard_id: &ShardId) -> impl Iterator<Item = &ShardRouting> {
        self.by_shard
            .get(shard_id)
            .into_iter()
            .flatten()
            .map(|&slot| self.shard(slot))
    }

    /// Finds a copy by shard address and allocation id.
    #[must_use]
    pub fn get_by_allocation(&self, shard_id: &ShardId, allocation: Uuid) -> Option<&ShardRouting> {
        self.slot_by_allocation(shard_id, allocation)
            .map(|slot| self.shard(slot))
    }

    /// The active primary of a shard, if any.
    #[must_use]
    pub fn active_primary(&self, shard_id: &ShardId) -> Option<&ShardRouting> {
        self.assigned(shard_id)
            .find(|s| s.primary() && s.is_active())
    }

    /// Unassigned → Initializing on `node` with a fresh allocation id.
    pub fn initialize_shard(
        &mut self,
        shard: ShardRouting,
        node: NodeId,
        expected_size: Option<u64>,
    ) {
        assert!(shard.is_unassigned(), "only unassigned shards initialize");
        let allocation = self.fresh_id();
        let mut shard = shard;
        shard.initialize(node, allocation, expected_size);
        tracing::trace!(shard = %shard, "initializing shard");
        self.insert(shard);
    }

    /// Initializing → Started. A relocation target completing its handoff
    /// atomically removes the paired relocating source.
    ///
    /// # Panics
    /// Panics if the copy does not exist or is not initializing.
    pub fn start_shard(&mut self, shard_id: &ShardId, allocation: Uuid) {
        let Some(slot) = self.slot_by_allocation(shard_id, allocation) else {
            unreachable!("started shard copy not found: {shard_id}")
        };
        assert!(
            self.shard(slot).is_initializing(),
            "only initializing shards can start"
        );

        if self.shard(slot).is_relocation_target() {
            let Some(pair) = self.shard(slot).allocation_id().and_then(|a| a.relocation_id())
            else {
                unreachable!("relocation target must carry a relocation id")
            };
            let Some(source_slot) = self.slot_by_allocation(shard_id, pair) else {
                unreachable!("relocation target without a source: {shard_id}")
            };
            let source = self.remove(source_slot);
            assert!(source.is_relocating(), "relocation source in wrong state");
            tracing::trace!(shard = %source, "relocation source removed");
        }

        self.shard_mut(slot).move_to_started();
        tracing::trace!(shard = %self.shard(slot), "shard started");
    }

    /// Started → Relocating towards `target_node`, creating the paired
    /// initializing target.
    ///
    /// # Panics
    /// Panics if the copy does not exist or is not started.
    pub fn relocate_shard(
        &mut self,
        shard_id: &ShardId,
        allocation: Uuid,
        target_node: NodeId,
        expected_size: Option<u64>,
    ) {
        let Some(slot) = self.slot_by_allocation(shard_id, allocation) else {
            unreachable!("relocating shard copy not found: {shard_id}")
        };
        let target_id = self.fresh_id();
        let target = self
            .shard_mut(slot)
            .begin_relocation(target_node, target_id, expected_size);
        tracing::trace!(shard = %self.shard(slot), "relocation begins");
        self.insert(target);
    }

    /// Relocating → Started on the source; the paired target is removed.
    ///
    /// # Panics
    /// Panics if the source does not exist or is not relocating.
    pub fn cancel_relocation(&mut self, shard_id: &ShardId, allocation: Uuid) {
        let Some(slot) = self.slot_by_allocation(shard_id, allocation) else {
            unreachable!("relocation source not found: {shard_id}")
        };
        let Some(target_id) = self.shard(slot).allocation_id().and_then(|a| a.relocation_id())
        else {
            unreachable!("relocation source must carry a relocation id")
        };
        if let Some(target_slot) = self.slot_by_allocation(shard_id, target_id) {
            self.remove(target_slot);
        }
        self.shard_mut(slot).cancel_relocation();
        tracing::trace!(shard = %self.shard(slot), "relocation cancelled");
    }

    /// Fails an assigned copy: any non-unassigned state → Unassigned.
    ///
    /// Failing a primary cascades to its initializing replicas (reason
    /// `PrimaryFailed`). If a started replica exists it is promoted in the
    /// same call, choosing the one with the lexicographically smallest
    /// allocation id; the failed primary re-enters the unassigned queue
    /// demoted to replica with reason `PrimaryFailed`. A replica that is
    /// mid-relocation is not promotable; with no started replica the
    /// primary simply goes unassigned. Failing a relocation target cancels
    /// the relocation instead of unassigning anything.
    ///
    /// # Panics
    /// Panics if the copy does not exist.
    pub fn fail_shard(&mut self, shard_id: &ShardId, allocation: Uuid, info: UnassignedInfo) {
        let Some(slot) = self.slot_by_allocation(shard_id, allocation) else {
            unreachable!("failed shard copy not found: {shard_id}")
        };
        let primary = self.shard(slot).primary();
        tracing::debug!(shard = %self.shard(slot), reason = %info.reason, "failing shard");

        // A failing primary takes its initializing replicas down with it.
        if primary {
            let clock = AllocationClock::new(info.at_nanos, info.at_millis);
            let replicas: Vec<Uuid> = self
                .assigned(shard_id)
                .filter(|s| !s.primary() && s.is_initializing())
                .filter_map(|s| s.allocation_id().map(|a| a.id()))
                .collect();
            for replica in replicas {
                let replica_info = UnassignedInfo::new(
                    UnassignedReason::PrimaryFailed,
                    Some("primary shard failed while replica initializing".to_string()),
                    clock,
                );
                self.fail_shard(shard_id, replica, replica_info);
            }
        }

        if self.shard(slot).is_relocation_target() {
            // Failing the target half aborts the handoff; the source stays.
            let Some(pair) = self.shard(slot).allocation_id().and_then(|a| a.relocation_id())
            else {
                unreachable!("relocation target must carry a relocation id")
            };
            let removed = self.remove(slot);
            tracing::trace!(shard = %removed, "relocation target removed");
            if let Some(source_slot) = self.slot_by_allocation(shard_id, pair) {
                self.shard_mut(source_slot).cancel_relocation();
            }
            return;
        }

        if self.shard(slot).is_relocating() {
            // The in-flight target dies with its source.
            let Some(target_id) = self.shard(slot).allocation_id().and_then(|a| a.relocation_id())
            else {
                unreachable!("relocation source must carry a relocation id")
            };
            if let Some(target_slot) = self.slot_by_allocation(shard_id, target_id) {
                self.remove(target_slot);
            }
        }

        self.unassign_slot(slot, info);
    }

    /// Removes an empty node from the working view.
    ///
    /// # Panics
    /// Panics if the node still holds shards.
    pub fn remove_node(&mut self, node: NodeId) {
        let shards = self.nodes.remove(&node);
        assert!(
            shards.as_ref().is_none_or(Vec::is_empty),
            "removing a node that still holds shards"
        );
    }

    /// Builds the immutable routing table this working copy describes.
    ///
    /// Relocation targets are skipped (they are represented by their
    /// sources); ignored unassigned copies rejoin the table.
    #[must_use]
    pub fn build_routing_table(&self, version: u64) -> RoutingTable {
        let mut by_shard: BTreeMap<ShardId, Vec<ShardRouting>> = BTreeMap::new();
        for shard in self.iter_assigned() {
            if shard.is_relocation_target() {
                continue;
            }
            by_shard
                .entry(shard.shard_id().clone())
                .or_default()
                .push(shard.clone());
        }
        for shard in self.unassigned.iter_all() {
            by_shard
                .entry(shard.shard_id().clone())
                .or_default()
                .push(shard.clone());
        }

        let mut builder = RoutingTable::builder(version);
        for (shard_id, copies) in by_shard {
            builder = builder.add_shard_table(ShardTable::new(shard_id, copies));
        }
        builder.build()
    }

    fn unassign_slot(&mut self, slot: Slot, info: UnassignedInfo) {
        let mut shard = self.remove(slot);

        if shard.primary() {
            let promote = self
                .assigned(shard.shard_id())
                .filter(|s| !s.primary() && s.is_started())
                .filter_map(|s| s.allocation_id().map(|a| a.id()))
                .min();
            if let Some(replica) = promote {
                let demoted_info = UnassignedInfo {
                    reason: UnassignedReason::PrimaryFailed,
                    message: Some("failed primary demoted to replica".to_string()),
                    failed_allocations: info.failed_allocations,
                    at_nanos: info.at_nanos,
                    at_millis: info.at_millis,
                    delayed: info.delayed,
                    last_allocation_status: AllocationStatus::NoAttempt,
                };
                shard.demote_to_replica();
                shard.move_to_unassigned(demoted_info);
                let shard_id = shard.shard_id().clone();
                self.unassigned.push(shard);
                self.promote_replica(&shard_id, replica);
                return;
            }
        }

        shard.move_to_unassigned(info);
        self.unassigned.push(shard);
    }

    fn promote_replica(&mut self, shard_id: &ShardId, allocation: Uuid) {
        let Some(slot) = self.slot_by_allocation(shard_id, allocation) else {
            unreachable!("promoted replica not found: {shard_id}")
        };
        assert!(
            self.shard(slot).is_started(),
            "only started replicas are promoted"
        );
        self.shard_mut(slot).promote_to_primary();
        tracing::debug!(shard = %self.shard(slot), "replica promoted to primary");
    }

    fn fresh_id(&mut self) -> Uuid {
        uuid::Builder::from_random_bytes(self.rng.gen()).into_uuid()
    }

    fn shard(&self, slot: Slot) -> &ShardRouting {
        let Some(shard) = self.arena[slot].as_ref() else {
            unreachable!("dangling arena slot {slot}")
        };
        shard
    }

    fn shard_mut(&mut self, slot: Slot) -> &mut ShardRouting {
        let Some(shard) = self.arena[slot].as_mut() else {
            unreachable!("dangling arena slot {slot}")
        };
        shard
    }

    fn slot_by_allocation(&self, shard_id: &ShardId, allocation: Uuid) -> Option<Slot> {
        self.by_shard.get(shard_id)?.iter().copied().find(|&slot| {
            self.shard(slot)
                .allocation_id()
                .is_some_and(|a| a.id() == allocation)
        })
    }

    fn insert(&mut self, shard: ShardRouting) -> Slot {
        let Some(node) = shard.current_node() else {
            unreachable!("inserting an unassigned shard into the arena")
        };
        let shard_id = shard.shard_id().clone();
        let slot = self.arena.len();
        self.arena.push(Some(shard));
        self.nodes.entry(node).or_default().push(slot);
        self.by_shard.entry(shard_id).or_default().push(slot);
        slot
    }

    fn remove(&mut self, slot: Slot) -> ShardRouting {
        let Some(shard) = self.arena[slot].take() else {
            unreachable!("removing a dangling arena slot {slot}")
        };
        let Some(node) = shard.current_node() else {
            unreachable!("arena shard without a node")
        };
        if let Some(slots) = self.nodes.get_mut(&node) {
            slots.retain(|&s| s != slot);
        }
        if let Some(slots) = self.by_shard.get_mut(shard.shard_id()) {
            slots.retain(|&s| s != slot);
        }
        shard
    }
}
