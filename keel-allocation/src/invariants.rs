//! Routing invariant checks, run after every pass in debug builds.
//!
//! A violation here is a programming error in a transition, never a normal
//! runtime condition, so the service wraps this in `debug_assert!` and tests
//! call it directly.

use std::collections::{BTreeMap, HashSet};

use keel_core::NodeId;
use keel_cluster::{ShardId, ShardRouting};
use uuid::Uuid;

use crate::routing_nodes::RoutingNodes;

/// Checks every routing invariant over a working copy.
///
/// # Errors
/// Returns a description of the first violation found.
pub fn check(routing_nodes: &RoutingNodes) -> Result<(), String> {
    let mut groups: BTreeMap<ShardId, Vec<&ShardRouting>> = BTreeMap::new();
    for shard in routing_nodes
        .iter_assigned()
        .chain(routing_nodes.unassigned().iter_all())
    {
        groups.entry(shard.shard_id().clone()).or_default().push(shard);
    }

    for (shard_id, copies) in &groups {
        // Exactly one primary per shard.
        let primaries = copies.iter().filter(|s| s.primary()).count();
        let relocating_primaries = copies
            .iter()
            .filter(|s| s.primary() && s.is_relocation_target())
            .count();
        if primaries - relocating_primaries != 1 {
            return Err(format!(
                "{shard_id}: expected exactly one primary, found {}",
                primaries - relocating_primaries
            ));
        }

        // No two copies on one node; relocation targets pair with sources.
        let mut nodes_seen: HashSet<NodeId> = HashSet::new();
        let mut ids_seen: HashSet<Uuid> = HashSet::new();
        for shard in copies {
            if let Some(node) = shard.current_node() {
                if !nodes_seen.insert(node) {
                    return Err(format!("{shard_id}: two copies on node {node}"));
                }
            }
            if let Some(allocation_id) = shard.allocation_id() {
                if !ids_seen.insert(allocation_id.id()) {
                    return Err(format!(
                        "{shard_id}: duplicate allocation id {}",
                        allocation_id.id()
                    ));
                }
            }
            if let Err(reason) = check_state(shard) {
                return Err(format!("{shard_id}: {reason}"));
            }
        }

        // Relocation halves must pair up.
        for shard in copies {
            if shard.is_relocating() {
                let Some(target_id) = shard.allocation_id().and_then(|a| a.relocation_id())
                else {
                    return Err(format!("{shard_id}: relocating without a relocation id"));
                };
                let target = copies.iter().find(|s| {
                    s.allocation_id().is_some_and(|a| a.id() == target_id)
                });
                match target {
                    None => {
                        return Err(format!("{shard_id}: relocation source without target"))
                    }
                    Some(target) if !target.is_relocation_target() => {
                        return Err(format!(
                            "{shard_id}: relocation pair is not an initializing target"
                        ))
                    }
                    Some(target) if target.current_node() != shard.relocating_node() => {
                        return Err(format!(
                            "{shard_id}: relocation target on the wrong node"
                        ))
                    }
                    Some(_) => {}
                }
            }
        }

        // An initializing replica needs an active primary, unless it is the
        // target half of a relocation.
        for shard in copies {
            if !shard.primary() && shard.is_initializing() && !shard.is_relocation_target() {
                let primary_active = copies
                    .iter()
                    .any(|s| s.primary() && s.is_active());
                if !primary_active {
                    return Err(format!(
                        "{shard_id}: replica initializing without an active primary"
                    ));
                }
            }
        }
    }

    Ok(())
}

fn check_state(shard: &ShardRouting) -> Result<(), String> {
    use keel_cluster::ShardState;
    match shard.state() {
        ShardState::Unassigned => {
            if shard.current_node().is_some() || shard.allocation_id().is_some() {
                return Err("unassigned copy carries a node or allocation id".to_string());
            }
            if shard.unassigned_info().is_none() {
                return Err("unassigned copy without unassigned info".to_string());
            }
        }
        ShardState::Initializing | ShardState::Started => {
            if shard.current_node().is_none() || shard.allocation_id().is_none() {
                return Err("assigned copy lacks a node or allocation id".to_string());
            }
        }
        ShardState::Relocating => {
            if shard.current_node().is_none()
                || shard.relocating_node().is_none()
                || shard.allocation_id().is_none()
            {
                return Err("relocating copy lacks node, target, or allocation id".to_string());
            }
            if shard.current_node() == shard.relocating_node() {
                return Err("relocating copy targets its own node".to_string());
            }
        }
    }
    Ok(())
}
