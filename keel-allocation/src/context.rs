//! The transaction context of one allocation pass.

use std::collections::{HashMap, HashSet};

use keel_core::NodeId;
use keel_cluster::{
    AllocationClock, ClusterState, DiscoveryNodes, MetaData, RoutingTable, ShardId, ShardRouting,
};

use crate::cluster_info::ClusterInfo;
use crate::decider::{Decision, DeciderStack, DecisionStep, Verdict};
use crate::explain::{Explanation, RoutingExplanations};
use crate::routing_nodes::RoutingNodes;

/// Everything one pass reads and mutates.
///
/// Constructed at the start of every public operation and dropped at commit;
/// nothing in here outlives the pass. The clock is captured once so every
/// decision inside the pass sees the same time.
pub struct RoutingAllocation<'a> {
    deciders: &'a DeciderStack,
    routing_nodes: RoutingNodes,
    nodes: &'a DiscoveryNodes,
    metadata: &'a MetaData,
    routing_table: &'a RoutingTable,
    cluster_info: ClusterInfo,
    clock: AllocationClock,
    ignored: HashMap<NodeId, HashSet<ShardId>>,
    debug_decision: bool,
    ignore_disable: bool,
    retry_failed: bool,
    explanations: RoutingExplanations,
}

impl<'a> RoutingAllocation<'a> {
    /// Creates the context for one pass.
    #[must_use]
    pub fn new(
        deciders: &'a DeciderStack,
        routing_nodes: RoutingNodes,
        state: &'a ClusterState,
        cluster_info: ClusterInfo,
        clock: AllocationClock,
    ) -> Self {
        Self {
            deciders,
            routing_nodes,
            nodes: &state.nodes,
            metadata: &state.metadata,
            routing_table: &state.routing_table,
            cluster_info,
            clock,
            ignored: HashMap::new(),
            debug_decision: false,
            ignore_disable: false,
            retry_failed: false,
            explanations: RoutingExplanations::new(),
        }
    }

    /// The working routing view.
    #[must_use]
    pub const fn routing_nodes(&self) -> &RoutingNodes {
        &self.routing_nodes
    }

    /// The working routing view, mutably.
    pub fn routing_nodes_mut(&mut self) -> &mut RoutingNodes {
        &mut self.routing_nodes
    }

    /// Consumes the context, releasing the working view for commit.
    #[must_use]
    pub fn into_routing_nodes(self) -> (RoutingNodes, RoutingExplanations) {
        (self.routing_nodes, self.explanations)
    }

    /// The live node set of the input snapshot.
    #[must_use]
    pub const fn nodes(&self) -> &DiscoveryNodes {
        self.nodes
    }

    /// The input metadata.
    #[must_use]
    pub const fn metadata(&self) -> &MetaData {
        self.metadata
    }

    /// The input routing table.
    #[must_use]
    pub const fn routing_table(&self) -> &RoutingTable {
        self.routing_table
    }

    /// The resource-information snapshot of this pass.
    #[must_use]
    pub const fn cluster_info(&self) -> &ClusterInfo {
        &self.cluster_info
    }

    /// The pass clock, captured once at construction.
    #[must_use]
    pub const fn clock(&self) -> AllocationClock {
        self.clock
    }

    /// True if deciders must record every step.
    #[must_use]
    pub const fn debug_decision(&self) -> bool {
        self.debug_decision
    }

    /// Turns full decision recording on or off.
    pub fn set_debug_decision(&mut self, debug: bool) {
        self.debug_decision = debug;
    }

    /// True if the allocation-enable gate is bypassed (explicit commands).
    #[must_use]
    pub const fn ignore_disable(&self) -> bool {
        self.ignore_disable
    }

    /// Sets the allocation-enable bypass.
    pub fn set_ignore_disable(&mut self, ignore: bool) {
        self.ignore_disable = ignore;
    }

    /// True if retry-exhausted shards may allocate again this pass.
    #[must_use]
    pub const fn retry_failed(&self) -> bool {
        self.retry_failed
    }

    /// Allows retry-exhausted shards to allocate this pass.
    pub fn set_retry_failed(&mut self, retry: bool) {
        self.retry_failed = retry;
    }

    /// Excludes `node` for `shard_id` for the remainder of this pass.
    /// Additive; discarded at commit.
    pub fn add_ignore(&mut self, node: NodeId, shard_id: ShardId) {
        self.ignored.entry(node).or_default().insert(shard_id);
    }

    /// True if `node` is excluded for `shard_id` this pass.
    #[must_use]
    pub fn is_ignored(&self, node: NodeId, shard_id: &ShardId) -> bool {
        self.ignored
            .get(&node)
            .is_some_and(|shards| shards.contains(shard_id))
    }

    /// Aggregate `can_allocate` over the decider stack.
    ///
    /// A node unknown to the live set is refused outright.
    #[must_use]
    pub fn decide_allocate(&self, shard: &ShardRouting, node: NodeId) -> Verdict {
        self.nodes.get(node).map_or_else(
            || Verdict {
                decision: Decision::No,
                steps: vec![DecisionStep {
                    decider: "live_nodes",
                    decision: Decision::No,
                    message: format!("node {node} is not in the cluster"),
                }],
            },
            |discovery_node| self.deciders.can_allocate(shard, discovery_node, self),
        )
    }

    /// Aggregate `can_remain` over the decider stack.
    #[must_use]
    pub fn decide_remain(&self, shard: &ShardRouting, node: NodeId) -> Verdict {
        self.nodes.get(node).map_or_else(Verdict::yes, |discovery_node| {
            self.deciders.can_remain(shard, discovery_node, self)
        })
    }

    /// `can_allocate` restricted to the same-shard safety decider.
    ///
    /// Forced primary commands bypass placement policy, but two copies of a
    /// shard on one node (or host, when configured) is never legal.
    #[must_use]
    pub fn decide_forced_allocate(&self, shard: &ShardRouting, node: NodeId) -> Verdict {
        self.nodes.get(node).map_or_else(
            || Verdict {
                decision: Decision::No,
                steps: vec![DecisionStep {
                    decider: "live_nodes",
                    decision: Decision::No,
                    message: format!("node {node} is not in the cluster"),
                }],
            },
            |discovery_node| {
                self.deciders
                    .can_allocate_named("same_shard", shard, discovery_node, self)
            },
        )
    }

    /// Records an explanation when debug recording is on.
    pub fn explain(&mut self, subject: impl Into<String>, verdict: &Verdict) {
        if self.debug_decision {
            self.explanations.add(Explanation {
                subject: subject.into(),
                steps: verdict.steps.clone(),
            });
        }
    }

    /// The explanations recorded so far.
    #[must_use]
    pub const fn explanations(&self) -> &RoutingExplanations {
        &self.explanations
    }
}
