//! The allocation service: entry points, event batching, commit protocol.

use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;

use keel_core::Limits;
use keel_cluster::{
    AllocationClock, ClusterState, ClusterStateHealth, HealthChange, MetaData, RoutingTable,
    ShardId, ShardRouting, UnassignedInfo, UnassignedReason,
};
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use uuid::Uuid;

use crate::balancer::{BalancedShardsAllocator, BalancerSettings, ShardsAllocator};
use crate::cluster_info::{ClusterInfoProvider, EmptyClusterInfo};
use crate::commands::AllocationCommands;
use crate::context::RoutingAllocation;
use crate::decider::DeciderStack;
use crate::deciders::standard_deciders;
use crate::error::{AllocationError, AllocationResult};
use crate::explain::RoutingExplanations;
use crate::gateway::{EmptyStoreProvider, GatewayAllocator};
use crate::invariants;
use crate::reconcile::reconcile_metadata;
use crate::routing_nodes::RoutingNodes;
use crate::settings::AllocationSettings;

const REASON_ELEMENTS_MAX: usize = Limits::new().max_reason_elements as usize;

/// An initializing shard copy reported as recovered.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StartedShard {
    /// The shard address.
    pub shard_id: ShardId,
    /// Allocation id of the recovered copy.
    pub allocation_id: Uuid,
}

impl StartedShard {
    /// References an assigned routing entry.
    #[must_use]
    pub fn of(routing: &ShardRouting) -> Option<Self> {
        Some(Self {
            shard_id: routing.shard_id().clone(),
            allocation_id: routing.allocation_id()?.id(),
        })
    }
}

/// An assigned shard copy reported as failed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FailedShard {
    /// The shard address.
    pub shard_id: ShardId,
    /// Allocation id of the failed copy.
    pub allocation_id: Uuid,
    /// What went wrong, for operators.
    pub message: Option<String>,
}

impl FailedShard {
    /// References an assigned routing entry.
    #[must_use]
    pub fn of(routing: &ShardRouting, message: Option<String>) -> Option<Self> {
        Some(Self {
            shard_id: routing.shard_id().clone(),
            allocation_id: routing.allocation_id()?.id(),
            message,
        })
    }
}

/// Outcome of one allocation pass.
///
/// When `changed` is false the routing table and metadata are the very
/// objects from the input state (`Arc` identity), so callers can
/// short-circuit.
#[derive(Debug, Clone)]
pub struct RerouteResult {
    /// True if the pass changed anything.
    pub changed: bool,
    /// The resulting routing table.
    pub routing_table: Arc<RoutingTable>,
    /// The resulting (reconciled) metadata.
    pub metadata: Arc<MetaData>,
    /// Explanations recorded during the pass (debug/command mode).
    pub explanations: RoutingExplanations,
    /// Health transition, if the pass caused one.
    pub health_change: Option<HealthChange>,
}

/// The shard allocation service.
///
/// A stateless façade over the decider stack, the gateway allocator, the
/// balancing strategy, and the resource oracle. Operations take `&mut self`:
/// the single-writer rule of cluster-state updates, in the type system.
pub struct AllocationService {
    deciders: DeciderStack,
    gateway: GatewayAllocator,
    balancer: Box<dyn ShardsAllocator>,
    info: Box<dyn ClusterInfoProvider>,
    seed: u64,
}

impl AllocationService {
    /// Creates a service from explicit collaborators.
    #[must_use]
    pub fn new(
        deciders: DeciderStack,
        gateway: GatewayAllocator,
        balancer: Box<dyn ShardsAllocator>,
        info: Box<dyn ClusterInfoProvider>,
        seed: u64,
    ) -> Self {
        Self {
            deciders,
            gateway,
            balancer,
            info,
            seed,
        }
    }

    /// Creates a service with the standard decider stack, the default
    /// balancer, and empty oracles.
    #[must_use]
    pub fn with_settings(settings: &AllocationSettings) -> Self {
        Self::new(
            standard_deciders(settings),
            GatewayAllocator::new(Box::new(EmptyStoreProvider)),
            Box::new(BalancedShardsAllocator::new(BalancerSettings::new())),
            Box::new(EmptyClusterInfo),
            0,
        )
    }

    /// Marks initializing shards as started and reroutes.
    ///
    /// Each entry must reference an initializing copy present in the table,
    /// without duplicates. A started relocation target removes its paired
    /// source atomically. The gateway allocator is notified even when
    /// `with_reroute` is false.
    ///
    /// # Errors
    /// Returns invalid-input errors without mutating anything observable.
    pub fn apply_started_shards(
        &mut self,
        state: &ClusterState,
        started: &[StartedShard],
        clock: AllocationClock,
        with_reroute: bool,
    ) -> AllocationResult<RerouteResult> {
        if started.is_empty() {
            return Ok(unchanged(state));
        }
        let Self {
            deciders,
            gateway,
            balancer,
            info,
            seed,
        } = self;
        let mut routing_nodes =
            RoutingNodes::new(&state.routing_table, &state.nodes, pass_rng(*seed, state));
        routing_nodes.shuffle_unassigned();
        let mut allocation =
            RoutingAllocation::new(deciders, routing_nodes, state, info.cluster_info(), clock);

        let mut seen: HashSet<(ShardId, Uuid)> = HashSet::new();
        for entry in started {
            if !seen.insert((entry.shard_id.clone(), entry.allocation_id)) {
                return Err(AllocationError::DuplicateShardEntry {
                    shard_id: entry.shard_id.clone(),
                });
            }
            let Some(shard) = allocation
                .routing_nodes()
                .get_by_allocation(&entry.shard_id, entry.allocation_id)
            else {
                return Err(AllocationError::ShardCopyNotFound {
                    shard_id: entry.shard_id.clone(),
                    detail: format!("allocation {}", entry.allocation_id),
                });
            };
            if !shard.is_initializing() {
                return Err(AllocationError::InvalidShardState {
                    shard_id: entry.shard_id.clone(),
                    detail: "only initializing shards can be started".to_string(),
                });
            }
            allocation
                .routing_nodes_mut()
                .start_shard(&entry.shard_id, entry.allocation_id);
        }

        gateway.apply_started_shards(started.iter().map(|s| &s.shard_id));
        if with_reroute {
            reroute_pass(gateway, balancer.as_ref(), &mut allocation);
        }

        let reason = format!(
            "shards started [{}]",
            summarize(started.iter().map(|s| s.shard_id.to_string()))
        );
        build_result(state, allocation, &reason)
    }

    /// Fails one assigned shard copy and reroutes.
    ///
    /// # Errors
    /// Returns invalid-input errors without mutating anything observable.
    pub fn apply_failed_shard(
        &mut self,
        state: &ClusterState,
        failed: FailedShard,
        clock: AllocationClock,
    ) -> AllocationResult<RerouteResult> {
        self.apply_failed_shards(state, &[failed], clock)
    }

    /// Fails assigned shard copies and reroutes.
    ///
    /// Each failure increments the copy's failure counter and excludes its
    /// node for that shard for the remainder of the pass. Failing a primary
    /// cascades to its initializing replicas and promotes a started replica
    /// when one exists.
    ///
    /// # Errors
    /// Returns invalid-input errors without mutating anything observable.
    pub fn apply_failed_shards(
        &mut self,
        state: &ClusterState,
        failed: &[FailedShard],
        clock: AllocationClock,
    ) -> AllocationResult<RerouteResult> {
        if failed.is_empty() {
            return Ok(unchanged(state));
        }
        let Self {
            deciders,
            gateway,
            balancer,
            info,
            seed,
        } = self;
        let mut routing_nodes =
            RoutingNodes::new(&state.routing_table, &state.nodes, pass_rng(*seed, state));
        routing_nodes.shuffle_unassigned();
        let mut allocation =
            RoutingAllocation::new(deciders, routing_nodes, state, info.cluster_info(), clock);

        // The whole batch must be well-formed before anything mutates.
        let mut seen: HashSet<(ShardId, Uuid)> = HashSet::new();
        for entry in failed {
            if !seen.insert((entry.shard_id.clone(), entry.allocation_id)) {
                return Err(AllocationError::DuplicateShardEntry {
                    shard_id: entry.shard_id.clone(),
                });
            }
            if allocation
                .routing_nodes()
                .get_by_allocation(&entry.shard_id, entry.allocation_id)
                .is_none()
            {
                return Err(AllocationError::ShardCopyNotFound {
                    shard_id: entry.shard_id.clone(),
                    detail: format!("allocation {}", entry.allocation_id),
                });
            }
        }

        for entry in failed {
            // A cascade from an earlier entry may have handled this copy.
            let Some(shard) = allocation
                .routing_nodes()
                .get_by_allocation(&entry.shard_id, entry.allocation_id)
            else {
                tracing::trace!(shard = %entry.shard_id, "copy already failed in an earlier iteration");
                continue;
            };
            let failed_before = shard
                .unassigned_info()
                .map_or(0, |i| i.failed_allocations);
            if let Some(node) = shard.current_node() {
                allocation.add_ignore(node, entry.shard_id.clone());
            }
            let message = entry
                .message
                .clone()
                .unwrap_or_else(|| "shard failure reported".to_string());
            let unassigned_info =
                UnassignedInfo::new(UnassignedReason::AllocationFailed, Some(message), clock)
                    .with_failed_allocations(failed_before + 1);
            allocation.routing_nodes_mut().fail_shard(
                &entry.shard_id,
                entry.allocation_id,
                unassigned_info,
            );
        }

        gateway.apply_failed_shards(failed.iter().map(|s| &s.shard_id));
        reroute_pass(gateway, balancer.as_ref(), &mut allocation);

        let reason = format!(
            "shards failed [{}]",
            summarize(failed.iter().map(|s| s.shard_id.to_string()))
        );
        build_result(state, allocation, &reason)
    }

    /// Fails every shard on nodes that are no longer live data nodes and
    /// removes those nodes from the routing view. Shards of indices with a
    /// node-left delay come back flagged `delayed`.
    ///
    /// # Errors
    /// Returns errors only from post-pass validation.
    pub fn deassociate_dead_nodes(
        &mut self,
        state: &ClusterState,
        reroute: bool,
        reason: &str,
        clock: AllocationClock,
    ) -> AllocationResult<RerouteResult> {
        let Self {
            deciders,
            gateway,
            balancer,
            info,
            seed,
        } = self;
        let mut routing_nodes =
            RoutingNodes::new(&state.routing_table, &state.nodes, pass_rng(*seed, state));
        routing_nodes.shuffle_unassigned();
        let mut allocation =
            RoutingAllocation::new(deciders, routing_nodes, state, info.cluster_info(), clock);

        let mut changed = false;
        for node in allocation.routing_nodes().node_ids() {
            if state.nodes.is_live_data_node(node) {
                continue;
            }
            changed = true;
            tracing::debug!(node = %node, "deassociating dead node");
            let shards: Vec<(ShardId, Uuid)> = allocation
                .routing_nodes()
                .shards_on(node)
                .filter_map(|s| Some((s.shard_id().clone(), s.allocation_id()?.id())))
                .collect();
            for (shard_id, allocation_id) in shards {
                // Relocation handshakes may already have taken this copy out.
                if allocation
                    .routing_nodes()
                    .get_by_allocation(&shard_id, allocation_id)
                    .is_none()
                {
                    continue;
                }
                let delayed = allocation
                    .metadata()
                    .index(shard_id.index().name())
                    .is_some_and(|meta| meta.settings().delayed_node_left_timeout_nanos > 0);
                let unassigned_info = UnassignedInfo::new(
                    UnassignedReason::NodeLeft,
                    Some(format!("node_left [{node}]")),
                    clock,
                )
                .delayed(delayed);
                allocation
                    .routing_nodes_mut()
                    .fail_shard(&shard_id, allocation_id, unassigned_info);
            }
            allocation.routing_nodes_mut().remove_node(node);
        }

        if reroute {
            changed |= reroute_pass(gateway, balancer.as_ref(), &mut allocation);
        }
        if !changed {
            return Ok(unchanged(state));
        }
        build_result(state, allocation, reason)
    }

    /// Runs a plain reroute pass: delay maintenance, gateway placement,
    /// balancing. Returns an unchanged result (same object identities) when
    /// nothing moved.
    ///
    /// # Errors
    /// Returns errors only from post-pass validation.
    pub fn reroute(
        &mut self,
        state: &ClusterState,
        reason: &str,
        debug: bool,
        clock: AllocationClock,
    ) -> AllocationResult<RerouteResult> {
        let Self {
            deciders,
            gateway,
            balancer,
            info,
            seed,
        } = self;
        let mut routing_nodes =
            RoutingNodes::new(&state.routing_table, &state.nodes, pass_rng(*seed, state));
        routing_nodes.shuffle_unassigned();
        let mut allocation =
            RoutingAllocation::new(deciders, routing_nodes, state, info.cluster_info(), clock);
        allocation.set_debug_decision(debug);

        if !reroute_pass(gateway, balancer.as_ref(), &mut allocation) {
            // Unchanged, but debug explanations still belong to the caller.
            let (_, explanations) = allocation.into_routing_nodes();
            let mut result = unchanged(state);
            result.explanations = explanations;
            return Ok(result);
        }
        build_result(state, allocation, reason)
    }

    /// Executes administrative commands, then reroutes.
    ///
    /// The unassigned queue keeps its insertion order so command batches are
    /// deterministic and dry-runnable; deciders run in debug mode and the
    /// allocation-enable gate is bypassed for the commands themselves.
    ///
    /// # Errors
    /// In non-explain mode, the first rejected command aborts the batch; the
    /// working copy is discarded, so none of the batch takes effect.
    pub fn reroute_commands(
        &mut self,
        state: &ClusterState,
        commands: &AllocationCommands,
        explain: bool,
        retry_failed: bool,
        clock: AllocationClock,
    ) -> AllocationResult<RerouteResult> {
        let Self {
            deciders,
            gateway,
            balancer,
            info,
            seed,
        } = self;
        let routing_nodes =
            RoutingNodes::new(&state.routing_table, &state.nodes, pass_rng(*seed, state));
        let mut allocation =
            RoutingAllocation::new(deciders, routing_nodes, state, info.cluster_info(), clock);
        allocation.set_debug_decision(true);
        allocation.set_retry_failed(retry_failed);

        allocation.set_ignore_disable(true);
        commands.execute(&mut allocation, explain)?;
        allocation.set_ignore_disable(false);

        reroute_pass(gateway, balancer.as_ref(), &mut allocation);
        build_result(state, allocation, "reroute commands")
    }

    /// Nanoseconds until the next delayed shard becomes placeable, if any
    /// shard is waiting out a node-left delay. Zero means a reroute is due
    /// now.
    #[must_use]
    pub fn next_delay_nanos(state: &ClusterState, now_nanos: u64) -> Option<u64> {
        state
            .routing_table
            .iter_shards()
            .filter(|s| s.is_unassigned())
            .filter_map(|s| {
                let info = s.unassigned_info()?;
                if !info.delayed {
                    return None;
                }
                let timeout = state
                    .metadata
                    .index(s.shard_id().index().name())?
                    .settings()
                    .delayed_node_left_timeout_nanos;
                Some(info.remaining_delay_nanos(now_nanos, timeout))
            })
            .min()
    }
}

impl std::fmt::Debug for AllocationService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AllocationService")
            .field("deciders", &self.deciders)
            .field("seed", &self.seed)
            .finish_non_exhaustive()
    }
}

/// One reroute round: delay maintenance and gateway placement while
/// anything is unassigned, then the balancer.
fn reroute_pass(
    gateway: &mut GatewayAllocator,
    balancer: &dyn ShardsAllocator,
    allocation: &mut RoutingAllocation<'_>,
) -> bool {
    let mut changed = false;
    if !allocation.routing_nodes().unassigned().is_empty() {
        changed |= remove_delay_markers(allocation);
        changed |= gateway.allocate_unassigned(allocation);
    }
    changed |= balancer.allocate(allocation);
    changed
}

/// Clears the `delayed` flag on unassigned shards whose node-left timeout
/// has fully elapsed. Returns true if any marker was removed.
fn remove_delay_markers(allocation: &mut RoutingAllocation<'_>) -> bool {
    let now_nanos = allocation.clock().nanos;
    let timeouts: BTreeMap<String, u64> = allocation
        .metadata()
        .iter()
        .map(|meta| {
            (
                meta.index().name().to_string(),
                meta.settings().delayed_node_left_timeout_nanos,
            )
        })
        .collect();

    let mut changed = false;
    for shard in allocation.routing_nodes_mut().unassigned_mut().iter_mut() {
        let Some(info) = shard.unassigned_info() else {
            continue;
        };
        if !info.delayed {
            continue;
        }
        let timeout = timeouts
            .get(shard.shard_id().index().name())
            .copied()
            .unwrap_or(0);
        if info.remaining_delay_nanos(now_nanos, timeout) == 0 {
            let cleared = info.clone().delayed(false);
            shard.update_unassigned_info(cleared);
            changed = true;
        }
    }
    changed
}

fn build_result(
    state: &ClusterState,
    allocation: RoutingAllocation<'_>,
    reason: &str,
) -> AllocationResult<RerouteResult> {
    let (routing_nodes, explanations) = allocation.into_routing_nodes();

    if cfg!(debug_assertions) {
        if let Err(violation) = invariants::check(&routing_nodes) {
            return Err(AllocationError::InvariantViolation { detail: violation });
        }
    }

    let routing_table = Arc::new(routing_nodes.build_routing_table(state.routing_table.version()));
    let metadata = reconcile_metadata(&state.metadata, &state.routing_table, &routing_table)?;
    routing_table
        .validate(&metadata)
        .map_err(|error| AllocationError::InvariantViolation {
            detail: error.to_string(),
        })?;

    let before = ClusterStateHealth::new(&state.metadata, &state.routing_table);
    let after = ClusterStateHealth::new(&metadata, &routing_table);
    let health_change = (before.status != after.status).then(|| {
        tracing::info!(
            from = %before.status,
            to = %after.status,
            reason,
            "cluster health changed"
        );
        HealthChange {
            from: before.status,
            to: after.status,
            reason: reason.to_string(),
        }
    });

    Ok(RerouteResult {
        changed: true,
        routing_table,
        metadata,
        explanations,
        health_change,
    })
}

fn unchanged(state: &ClusterState) -> RerouteResult {
    RerouteResult {
        changed: false,
        routing_table: Arc::clone(&state.routing_table),
        metadata: Arc::clone(&state.metadata),
        explanations: RoutingExplanations::new(),
        health_change: None,
    }
}

fn pass_rng(seed: u64, state: &ClusterState) -> ChaCha8Rng {
    ChaCha8Rng::seed_from_u64(seed ^ state.version.wrapping_mul(0x9E37_79B9_7F4A_7C15))
}

fn summarize(items: impl Iterator<Item = String>) -> String {
    let mut shown: Vec<String> = items.take(REASON_ELEMENTS_MAX + 1).collect();
    if shown.len() > REASON_ELEMENTS_MAX {
        shown.truncate(REASON_ELEMENTS_MAX);
        shown.push("...".to_string());
    }
    shown.join(", ")
}
