//! End-to-end allocation scenarios over full cluster states.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use keel_allocation::{
    standard_deciders, AllocationCommand, AllocationCommands, AllocationError, AllocationService,
    AllocationSettings, BalancedShardsAllocator, BalancerSettings, ClusterInfo, Decision,
    DiskUsage, EmptyClusterInfo, FailedShard, GatewayAllocator, RerouteResult, ShardStoreProvider,
    StartedShard, StoreCopy, StoreFetch,
};
use keel_cluster::{
    AllocationClock, AllocationStatus, ClusterHealthStatus, ClusterState, DiscoveryNode,
    DiscoveryNodes, Index, IndexMetaData, IndexSettings, MetaData, RoutingTable, ShardId,
    ShardRouting, UnassignedReason,
};
use keel_core::{NodeId, ShardNumber};
use uuid::Uuid;

const NANOS_PER_SEC: u64 = 1_000_000_000;

fn clock(secs: u64) -> AllocationClock {
    AllocationClock::new(secs * NANOS_PER_SEC, secs * 1_000)
}

fn nodes(ids: &[u64]) -> DiscoveryNodes {
    ids.iter().fold(DiscoveryNodes::new(), |acc, &id| {
        acc.with_node(DiscoveryNode::new(NodeId::new(id), format!("n{id}")))
    })
}

fn index_meta(shards: u32, replicas: u32, node_left_timeout_secs: u64) -> IndexMetaData {
    IndexMetaData::new(
        Index::new("logs", Uuid::from_u128(1)),
        shards,
        replicas,
        IndexSettings::new().with_node_left_timeout_nanos(node_left_timeout_secs * NANOS_PER_SEC),
    )
}

fn fresh_state(node_ids: &[u64], meta: IndexMetaData) -> ClusterState {
    let metadata = MetaData::new().with_index(meta.clone());
    let table = RoutingTable::builder(1)
        .add_index_new(&meta, clock(0))
        .build();
    ClusterState::new("test", 1, nodes(node_ids), metadata, table)
}

fn service() -> AllocationService {
    AllocationService::with_settings(&AllocationSettings::new())
}

fn commit(state: &ClusterState, result: &RerouteResult) -> ClusterState {
    assert!(result.changed, "committing an unchanged result");
    state.with_routing(
        Arc::clone(&result.metadata),
        Arc::clone(&result.routing_table),
    )
}

fn shard_id() -> ShardId {
    ShardId::new(Index::new("logs", Uuid::from_u128(1)), ShardNumber::new(0))
}

fn copies(state: &ClusterState) -> Vec<ShardRouting> {
    state.routing_table.iter_shards().cloned().collect()
}

fn copy_on(state: &ClusterState, node: u64) -> ShardRouting {
    state
        .routing_table
        .shards_on_node(NodeId::new(node))
        .next()
        .unwrap_or_else(|| panic!("no shard copy on node {node}"))
        .clone()
}

fn initializing_entries(state: &ClusterState) -> Vec<StartedShard> {
    state
        .routing_table
        .iter_shards()
        .filter(|s| s.is_initializing())
        .filter_map(StartedShard::of)
        .collect()
}

/// Runs reroute + start cycles until every copy that can start has started.
fn start_all(service: &mut AllocationService, state: ClusterState, secs: u64) -> ClusterState {
    let mut state = state;
    for _ in 0..8 {
        let result = service.reroute(&state, "settle", false, clock(secs)).unwrap();
        if result.changed {
            state = commit(&state, &result);
        }
        let started = initializing_entries(&state);
        if started.is_empty() {
            return state;
        }
        let result = service
            .apply_started_shards(&state, &started, clock(secs), true)
            .unwrap();
        state = commit(&state, &result);
    }
    state
}

struct TestStores {
    fetching: bool,
    stores: HashMap<ShardId, BTreeMap<NodeId, StoreCopy>>,
}

impl ShardStoreProvider for TestStores {
    fn store_info(&self, shard_id: &ShardId) -> StoreFetch {
        if self.fetching {
            return StoreFetch::Fetching;
        }
        StoreFetch::Available(self.stores.get(shard_id).cloned().unwrap_or_default())
    }
}

// ---------------------------------------------------------------------------
// Seed scenario 1: fresh single-node cluster, one index, 1 primary 1 replica.
// ---------------------------------------------------------------------------

#[test]
fn test_fresh_single_node_cluster() {
    let mut service = service();
    let state = fresh_state(&[1], index_meta(1, 1, 0));

    let result = service.reroute(&state, "initial", false, clock(0)).unwrap();
    assert!(result.changed);
    let state = commit(&state, &result);

    let primary = copy_on(&state, 1);
    assert!(primary.primary());
    assert!(primary.is_initializing());

    let replica = copies(&state)
        .into_iter()
        .find(|s| !s.primary())
        .unwrap();
    assert!(replica.is_unassigned());
    assert_eq!(
        replica.unassigned_info().unwrap().last_allocation_status,
        AllocationStatus::DecidersNo
    );

    // Start the primary; the replica still has nowhere to go.
    let result = service
        .apply_started_shards(&state, &initializing_entries(&state), clock(1), true)
        .unwrap();
    let health = result.health_change.as_ref().unwrap();
    assert_eq!(health.from, ClusterHealthStatus::Red);
    assert_eq!(health.to, ClusterHealthStatus::Yellow);
    let state = commit(&state, &result);

    assert!(copy_on(&state, 1).is_started());
    let replica = copies(&state)
        .into_iter()
        .find(|s| !s.primary())
        .unwrap();
    assert!(replica.is_unassigned());
}

// ---------------------------------------------------------------------------
// Seed scenario 2: two nodes, shard starts and relocates.
// ---------------------------------------------------------------------------

#[test]
fn test_move_rejected_then_relocation_completes() {
    let mut service = service();
    let state = fresh_state(&[1, 2], index_meta(1, 1, 0));
    let state = start_all(&mut service, state, 0);

    assert!(copy_on(&state, 1).primary());
    assert!(copy_on(&state, 2).is_started());
    let term_before = state.metadata.index("logs").unwrap().primary_term(ShardNumber::new(0));

    // Moving either copy onto the other's node violates the same-shard rule.
    for (from, to) in [(1, 2), (2, 1)] {
        let commands = AllocationCommands::new(vec![AllocationCommand::Move {
            index: "logs".to_string(),
            shard: 0,
            from_node: NodeId::new(from),
            to_node: NodeId::new(to),
        }])
        .unwrap();
        let err = service
            .reroute_commands(&state, &commands, false, false, clock(2))
            .unwrap_err();
        assert!(matches!(err, AllocationError::CommandRejected { .. }));
    }

    // A third node opens a path for the replica.
    let state = state.with_nodes(nodes(&[1, 2, 3]));
    let commands = AllocationCommands::new(vec![AllocationCommand::Move {
        index: "logs".to_string(),
        shard: 0,
        from_node: NodeId::new(2),
        to_node: NodeId::new(3),
    }])
    .unwrap();
    let result = service
        .reroute_commands(&state, &commands, false, false, clock(3))
        .unwrap();
    let state = commit(&state, &result);

    let source = copy_on(&state, 2);
    assert!(source.is_relocating());
    assert_eq!(source.relocating_node(), Some(NodeId::new(3)));

    // Start the target half: source removed, replica started on the new node.
    let target = StartedShard {
        shard_id: shard_id(),
        allocation_id: source.allocation_id().unwrap().relocation_id().unwrap(),
    };
    let result = service
        .apply_started_shards(&state, &[target], clock(4), true)
        .unwrap();
    let state = commit(&state, &result);

    assert_eq!(
        state.routing_table.shards_on_node(NodeId::new(2)).count(),
        0
    );
    let moved = copy_on(&state, 3);
    assert!(moved.is_started());
    assert!(!moved.primary());
    assert_eq!(
        state.metadata.index("logs").unwrap().primary_term(ShardNumber::new(0)),
        term_before
    );
}

// ---------------------------------------------------------------------------
// Seed scenario 3: primary failure triggers replica promotion.
// ---------------------------------------------------------------------------

#[test]
fn test_primary_failure_promotes_replica() {
    let mut service = service();
    let state = fresh_state(&[1, 2], index_meta(1, 1, 0));
    let state = start_all(&mut service, state, 0);

    let meta = state.metadata.index("logs").unwrap();
    let term_before = meta.primary_term(ShardNumber::new(0));
    let primary = copy_on(&state, 1);
    let replica_allocation = copy_on(&state, 2).allocation_id().unwrap().id();

    let failed = FailedShard::of(&primary, Some("simulated failure".to_string())).unwrap();
    let result = service.apply_failed_shards(&state, &[failed], clock(5)).unwrap();
    let health = result.health_change.as_ref().unwrap();
    assert_eq!(health.from, ClusterHealthStatus::Green);
    assert_eq!(health.to, ClusterHealthStatus::Yellow);
    let state = commit(&state, &result);

    // The replica on the second node took over.
    let promoted = copy_on(&state, 2);
    assert!(promoted.primary());
    assert!(promoted.is_started());
    assert_eq!(promoted.allocation_id().unwrap().id(), replica_allocation);
    assert_eq!(
        state.metadata.index("logs").unwrap().primary_term(ShardNumber::new(0)),
        term_before + 1
    );

    // The demoted former primary waits unassigned; its failure node was
    // excluded for this pass, and the promoted copy blocks the other node.
    let demoted = copies(&state).into_iter().find(|s| !s.primary()).unwrap();
    assert!(demoted.is_unassigned());
    let info = demoted.unassigned_info().unwrap();
    assert_eq!(info.reason, UnassignedReason::PrimaryFailed);
    assert_eq!(info.failed_allocations, 1);
}

// ---------------------------------------------------------------------------
// Seed scenario 4: node leaves with a delayed timeout.
// ---------------------------------------------------------------------------

#[test]
fn test_node_left_delay_honored_then_expires() {
    let mut service = service();
    let state = fresh_state(&[1, 2, 3], index_meta(1, 1, 60));
    let state = start_all(&mut service, state, 0);
    assert!(copy_on(&state, 2).is_started());

    // The node holding the replica disappears.
    let state = state.with_nodes(nodes(&[1, 3]));
    let result = service
        .deassociate_dead_nodes(&state, true, "node left", clock(100))
        .unwrap();
    let state = commit(&state, &result);

    let replica = copies(&state).into_iter().find(|s| !s.primary()).unwrap();
    assert!(replica.is_unassigned());
    let info = replica.unassigned_info().unwrap();
    assert_eq!(info.reason, UnassignedReason::NodeLeft);
    assert!(info.delayed);

    assert_eq!(
        AllocationService::next_delay_nanos(&state, clock(100).nanos),
        Some(60 * NANOS_PER_SEC)
    );

    // Rerouting before the timeout keeps the shard pinned.
    let result = service.reroute(&state, "tick", false, clock(130)).unwrap();
    let state = if result.changed {
        commit(&state, &result)
    } else {
        state
    };
    let replica = copies(&state).into_iter().find(|s| !s.primary()).unwrap();
    assert!(replica.is_unassigned());
    assert!(replica.unassigned_info().unwrap().delayed);

    // At the exact boundary the marker clears and the balancer places it.
    let result = service.reroute(&state, "tick", false, clock(160)).unwrap();
    let state = commit(&state, &result);
    let replica = copy_on(&state, 3);
    assert!(replica.is_initializing());
    assert!(!replica.primary());
}

// ---------------------------------------------------------------------------
// Seed scenario 5: disk high watermark blocks allocation.
// ---------------------------------------------------------------------------

#[test]
fn test_disk_watermark_blocks_replica() {
    let settings = AllocationSettings::new();
    let info = ClusterInfo::new().with_disk_usage(NodeId::new(2), DiskUsage::new(100, 8));
    let mut service = AllocationService::new(
        standard_deciders(&settings),
        GatewayAllocator::new(Box::new(keel_allocation::EmptyStoreProvider)),
        Box::new(BalancedShardsAllocator::new(BalancerSettings::new())),
        Box::new(info),
        0,
    );

    let state = fresh_state(&[1, 2], index_meta(1, 1, 0));
    let result = service.reroute(&state, "initial", false, clock(0)).unwrap();
    let state = commit(&state, &result);

    // The primary lands on the healthy node.
    let primary = copy_on(&state, 1);
    assert!(primary.primary());
    let result = service
        .apply_started_shards(&state, &initializing_entries(&state), clock(1), true)
        .unwrap();
    let state = commit(&state, &result);

    // The replica has nowhere to go: node 1 holds the primary, node 2 is
    // over the watermark.
    let replica = copies(&state).into_iter().find(|s| !s.primary()).unwrap();
    assert!(replica.is_unassigned());
    assert_eq!(
        replica.unassigned_info().unwrap().last_allocation_status,
        AllocationStatus::DecidersNo
    );

    // The debug explanation names the disk decider.
    let result = service.reroute(&state, "explain", true, clock(2)).unwrap();
    let cited: Vec<_> = result
        .explanations
        .iter()
        .flat_map(|e| e.steps.iter())
        .filter(|s| s.decider == "disk_threshold" && s.decision == Decision::No)
        .collect();
    assert!(!cited.is_empty(), "expected a disk_threshold refusal step");
}

// ---------------------------------------------------------------------------
// Seed scenario 6: recovery throttling.
// ---------------------------------------------------------------------------

#[test]
fn test_throttling_caps_concurrent_recoveries() {
    let mut service = service();
    let meta_a = IndexMetaData::new(
        Index::new("a", Uuid::from_u128(10)),
        1,
        0,
        IndexSettings::new(),
    );
    let meta_b = IndexMetaData::new(
        Index::new("b", Uuid::from_u128(11)),
        1,
        0,
        IndexSettings::new(),
    );
    let meta_c = IndexMetaData::new(
        Index::new("c", Uuid::from_u128(12)),
        1,
        0,
        IndexSettings::new(),
    );
    let metadata = MetaData::new()
        .with_index(meta_a.clone())
        .with_index(meta_b.clone())
        .with_index(meta_c.clone());
    let table = RoutingTable::builder(1)
        .add_index_new(&meta_a, clock(0))
        .add_index_new(&meta_b, clock(0))
        .add_index_new(&meta_c, clock(0))
        .build();
    let state = ClusterState::new("test", 1, nodes(&[1]), metadata, table);

    let result = service.reroute(&state, "initial", false, clock(0)).unwrap();
    let state = commit(&state, &result);

    let initializing = initializing_entries(&state);
    assert_eq!(initializing.len(), 2, "recovery cap is two per node");
    let throttled: Vec<_> = copies(&state)
        .into_iter()
        .filter(|s| s.is_unassigned())
        .collect();
    assert_eq!(throttled.len(), 1);
    assert_eq!(
        throttled[0].unassigned_info().unwrap().last_allocation_status,
        AllocationStatus::Throttled
    );

    // Once one recovery finishes, the throttled primary gets its turn.
    let result = service
        .apply_started_shards(&state, &initializing[..1], clock(1), true)
        .unwrap();
    let state = commit(&state, &result);
    assert!(copies(&state).iter().all(|s| !s.is_unassigned()));
}

// ---------------------------------------------------------------------------
// Round-trip laws.
// ---------------------------------------------------------------------------

#[test]
fn test_started_then_failed_increments_counter() {
    let mut service = service();
    let state = fresh_state(&[1], index_meta(1, 0, 0));
    let state = start_all(&mut service, state, 0);

    let primary = copy_on(&state, 1);
    assert!(primary.is_started());

    let failed = FailedShard::of(&primary, None).unwrap();
    let result = service.apply_failed_shards(&state, &[failed], clock(1)).unwrap();
    assert_eq!(
        result.health_change.as_ref().map(|h| h.to),
        Some(ClusterHealthStatus::Red)
    );
    let state = commit(&state, &result);

    let unassigned = copies(&state).into_iter().next().unwrap();
    assert!(unassigned.is_unassigned());
    let info = unassigned.unassigned_info().unwrap();
    assert_eq!(info.reason, UnassignedReason::AllocationFailed);
    assert_eq!(info.failed_allocations, 1);
}

#[test]
fn test_move_then_cancel_restores_routing() {
    let mut service = service();
    let state = fresh_state(&[1, 2, 3], index_meta(1, 1, 0));
    let state = start_all(&mut service, state, 0);

    let commands = AllocationCommands::new(vec![AllocationCommand::Move {
        index: "logs".to_string(),
        shard: 0,
        from_node: NodeId::new(2),
        to_node: NodeId::new(3),
    }])
    .unwrap();
    let result = service
        .reroute_commands(&state, &commands, false, false, clock(2))
        .unwrap();
    let state = commit(&state, &result);
    assert!(copy_on(&state, 2).is_relocating());

    let commands = AllocationCommands::new(vec![AllocationCommand::Cancel {
        index: "logs".to_string(),
        shard: 0,
        node: NodeId::new(3),
        allow_primary: false,
    }])
    .unwrap();
    let result = service
        .reroute_commands(&state, &commands, false, false, clock(3))
        .unwrap();
    let state = commit(&state, &result);

    let restored = copy_on(&state, 2);
    assert!(restored.is_started());
    assert_eq!(restored.relocating_node(), None);
    assert_eq!(
        state.routing_table.shards_on_node(NodeId::new(3)).count(),
        0
    );
}

// ---------------------------------------------------------------------------
// Identity, idempotence, determinism.
// ---------------------------------------------------------------------------

#[test]
fn test_empty_batches_return_same_identity() {
    let mut service = service();
    let state = fresh_state(&[1], index_meta(1, 1, 0));

    let result = service
        .apply_started_shards(&state, &[], clock(0), true)
        .unwrap();
    assert!(!result.changed);
    assert!(Arc::ptr_eq(&result.routing_table, &state.routing_table));
    assert!(Arc::ptr_eq(&result.metadata, &state.metadata));

    let result = service.apply_failed_shards(&state, &[], clock(0)).unwrap();
    assert!(!result.changed);
    assert!(Arc::ptr_eq(&result.routing_table, &state.routing_table));
}

#[test]
fn test_reroute_is_idempotent() {
    let mut service = service();
    let state = fresh_state(&[1, 2], index_meta(2, 1, 0));
    let state = start_all(&mut service, state, 0);

    let result = service.reroute(&state, "noop", false, clock(9)).unwrap();
    assert!(!result.changed);
    assert!(Arc::ptr_eq(&result.routing_table, &state.routing_table));
    assert!(Arc::ptr_eq(&result.metadata, &state.metadata));
}

#[test]
fn test_command_mode_is_deterministic() {
    let run = || {
        let mut service = service();
        let state = fresh_state(&[1, 2, 3], index_meta(2, 1, 0));
        let state = start_all(&mut service, state, 0);
        let commands = AllocationCommands::new(vec![AllocationCommand::Move {
            index: "logs".to_string(),
            shard: 0,
            from_node: NodeId::new(2),
            to_node: NodeId::new(3),
        }])
        .unwrap();
        let result = service
            .reroute_commands(&state, &commands, true, false, clock(7))
            .unwrap();
        commit(&state, &result)
    };

    let first = run();
    let second = run();
    assert_eq!(*first.routing_table, *second.routing_table);
    assert_eq!(*first.metadata, *second.metadata);
}

// ---------------------------------------------------------------------------
// Gateway allocator: in-sync recovery, fetching, forced primaries.
// ---------------------------------------------------------------------------

/// Builds a "restarted cluster" state: metadata remembers an in-sync id,
/// the routing table is fully unassigned with reason `ClusterRecovered`.
fn recovered_state(node_ids: &[u64], in_sync: Uuid) -> ClusterState {
    let mut meta = index_meta(1, 0, 0);
    meta.set_in_sync_ids(ShardNumber::new(0), [in_sync].into_iter().collect());
    let metadata = MetaData::new().with_index(meta.clone());
    let table = RoutingTable::builder(1)
        .add_index_recovered(&meta, clock(0))
        .build();
    ClusterState::new("test", 1, nodes(node_ids), metadata, table)
}

fn service_with_stores(provider: TestStores) -> AllocationService {
    let settings = AllocationSettings::new();
    AllocationService::new(
        standard_deciders(&settings),
        GatewayAllocator::new(Box::new(provider)),
        Box::new(BalancedShardsAllocator::new(BalancerSettings::new())),
        Box::new(EmptyClusterInfo),
        0,
    )
}

#[test]
fn test_gateway_places_primary_on_in_sync_copy() {
    let in_sync = Uuid::from_u128(77);
    let stores = TestStores {
        fetching: false,
        stores: [(
            shard_id(),
            [(NodeId::new(2), StoreCopy {
                allocation_id: in_sync,
                size_bytes: 4_096,
            })]
            .into_iter()
            .collect(),
        )]
        .into_iter()
        .collect(),
    };
    let mut service = service_with_stores(stores);
    let state = recovered_state(&[1, 2], in_sync);

    let result = service.reroute(&state, "recover", false, clock(0)).unwrap();
    let state = commit(&state, &result);

    // Recovered on the node holding the in-sync copy, not the lighter node.
    let primary = copy_on(&state, 2);
    assert!(primary.primary());
    assert!(primary.is_initializing());
    assert_eq!(primary.expected_size(), Some(4_096));
}

#[test]
fn test_gateway_waits_for_store_fetch() {
    let mut service = service_with_stores(TestStores {
        fetching: true,
        stores: HashMap::new(),
    });
    let state = recovered_state(&[1, 2], Uuid::from_u128(77));

    let result = service.reroute(&state, "recover", false, clock(0)).unwrap();
    let state = commit(&state, &result);

    let primary = copies(&state).into_iter().next().unwrap();
    assert!(primary.is_unassigned());
    assert_eq!(
        primary.unassigned_info().unwrap().last_allocation_status,
        AllocationStatus::FetchingShardData
    );
}

#[test]
fn test_gateway_reports_no_valid_copy() {
    let mut service = service_with_stores(TestStores {
        fetching: false,
        stores: HashMap::new(),
    });
    let state = recovered_state(&[1, 2], Uuid::from_u128(77));

    let result = service.reroute(&state, "recover", false, clock(0)).unwrap();
    let state = commit(&state, &result);

    let primary = copies(&state).into_iter().next().unwrap();
    assert!(primary.is_unassigned());
    assert_eq!(
        primary.unassigned_info().unwrap().last_allocation_status,
        AllocationStatus::NoValidShardCopy
    );
}

#[test]
fn test_allocate_empty_primary_discards_history() {
    let old_in_sync = Uuid::from_u128(77);
    let mut service = service_with_stores(TestStores {
        fetching: false,
        stores: HashMap::new(),
    });
    let state = recovered_state(&[1, 2], old_in_sync);

    // Without acknowledgement the command refuses.
    let commands = AllocationCommands::new(vec![AllocationCommand::AllocateEmptyPrimary {
        index: "logs".to_string(),
        shard: 0,
        node: NodeId::new(1),
        accept_data_loss: false,
    }])
    .unwrap();
    let err = service
        .reroute_commands(&state, &commands, false, false, clock(1))
        .unwrap_err();
    assert!(matches!(err, AllocationError::DataLossNotAcknowledged { .. }));

    // Acknowledged: the shard starts empty and the history is replaced.
    let commands = AllocationCommands::new(vec![AllocationCommand::AllocateEmptyPrimary {
        index: "logs".to_string(),
        shard: 0,
        node: NodeId::new(1),
        accept_data_loss: true,
    }])
    .unwrap();
    let result = service
        .reroute_commands(&state, &commands, false, false, clock(1))
        .unwrap();
    let state = commit(&state, &result);
    let primary = copy_on(&state, 1);
    assert!(primary.is_initializing());
    assert_eq!(
        primary.unassigned_info().unwrap().reason,
        UnassignedReason::ForcedEmptyPrimary
    );

    let result = service
        .apply_started_shards(&state, &initializing_entries(&state), clock(2), true)
        .unwrap();
    let state = commit(&state, &result);
    let in_sync = state
        .metadata
        .index("logs")
        .unwrap()
        .in_sync_ids(ShardNumber::new(0))
        .clone();
    assert!(!in_sync.contains(&old_in_sync));
    assert_eq!(in_sync.len(), 1);
}

#[test]
fn test_allocate_replica_command() {
    let mut service = service();
    let state = fresh_state(&[1, 2], index_meta(1, 1, 0));
    let result = service.reroute(&state, "initial", false, clock(0)).unwrap();
    let state = commit(&state, &result);
    let result = service
        .apply_started_shards(&state, &initializing_entries(&state), clock(1), false)
        .unwrap();
    let state = commit(&state, &result);

    let commands = AllocationCommands::new(vec![AllocationCommand::AllocateReplica {
        index: "logs".to_string(),
        shard: 0,
        node: NodeId::new(2),
    }])
    .unwrap();
    let result = service
        .reroute_commands(&state, &commands, false, false, clock(2))
        .unwrap();
    let state = commit(&state, &result);

    let replica = copy_on(&state, 2);
    assert!(!replica.primary());
    assert!(replica.is_initializing());
}
