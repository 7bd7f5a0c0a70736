//! Cluster health derived from the routing table.

use std::collections::BTreeMap;
use std::fmt;

use crate::metadata::MetaData;
use crate::routing_table::RoutingTable;

/// Traffic-light health of an index or the whole cluster.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum ClusterHealthStatus {
    /// Every primary and replica is active.
    Green,
    /// Every primary is active, but some replica is not.
    Yellow,
    /// Some primary is not active.
    Red,
}

impl ClusterHealthStatus {
    /// Combines two statuses, keeping the worse one.
    #[must_use]
    pub fn worst(self, other: Self) -> Self {
        self.max(other)
    }
}

impl fmt::Display for ClusterHealthStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Green => "GREEN",
            Self::Yellow => "YELLOW",
            Self::Red => "RED",
        };
        f.write_str(s)
    }
}

/// Health of a cluster state: the cluster-wide status, per-index statuses,
/// and shard-state counts for operators.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClusterStateHealth {
    /// Cluster-wide status (worst index).
    pub status: ClusterHealthStatus,
    /// Status per index.
    pub indices: BTreeMap<String, ClusterHealthStatus>,
    /// Active primary copies.
    pub active_primaries: u32,
    /// Active copies of any kind.
    pub active_shards: u32,
    /// Copies currently recovering.
    pub initializing_shards: u32,
    /// Relocation sources in flight.
    pub relocating_shards: u32,
    /// Copies with no node.
    pub unassigned_shards: u32,
}

impl ClusterStateHealth {
    /// Computes health from metadata and a routing table.
    #[must_use]
    pub fn new(_metadata: &MetaData, routing_table: &RoutingTable) -> Self {
        let mut indices = BTreeMap::new();
        let mut active_primaries = 0;
        let mut active_shards = 0;
        let mut initializing_shards = 0;
        let mut relocating_shards = 0;
        let mut unassigned_shards = 0;

        for index_table in routing_table.iter() {
            let mut index_status = ClusterHealthStatus::Green;
            for shard_table in index_table.iter() {
                let primary_active = shard_table.primary().is_some_and(|p| p.is_active());
                if !primary_active {
                    index_status = index_status.worst(ClusterHealthStatus::Red);
                }
                for shard in shard_table.iter() {
                    if shard.is_active() {
                        active_shards += 1;
                        if shard.primary() {
                            active_primaries += 1;
                        }
                        if shard.is_relocating() {
                            relocating_shards += 1;
                        }
                    } else if shard.is_initializing() {
                        initializing_shards += 1;
                        index_status = index_status.worst(ClusterHealthStatus::Yellow);
                    } else {
                        unassigned_shards += 1;
                        index_status = index_status.worst(ClusterHealthStatus::Yellow);
                    }
                }
            }
            indices.insert(index_table.index().name().to_string(), index_status);
        }

        let status = indices
            .values()
            .copied()
            .fold(ClusterHealthStatus::Green, ClusterHealthStatus::worst);

        Self {
            status,
            indices,
            active_primaries,
            active_shards,
            initializing_shards,
            relocating_shards,
            unassigned_shards,
        }
    }
}

/// A cluster-health transition produced by a committed allocation pass.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HealthChange {
    /// Status before the pass.
    pub from: ClusterHealthStatus,
    /// Status after the pass.
    pub to: ClusterHealthStatus,
    /// Human-readable cause, e.g. `shards started [[logs][0]]`.
    pub reason: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::index::Index;
    use crate::metadata::{IndexMetaData, IndexSettings};
    use crate::unassigned::AllocationClock;
    use uuid::Uuid;

    fn one_index_state() -> (MetaData, RoutingTable) {
        let meta = IndexMetaData::new(
            Index::new("logs", Uuid::from_u128(1)),
            1,
            1,
            IndexSettings::new(),
        );
        let metadata = MetaData::new().with_index(meta.clone());
        let table = RoutingTable::builder(1)
            .add_index_new(&meta, AllocationClock::default())
            .build();
        (metadata, table)
    }

    #[test]
    fn test_all_unassigned_is_red() {
        let (metadata, table) = one_index_state();
        let health = ClusterStateHealth::new(&metadata, &table);
        assert_eq!(health.status, ClusterHealthStatus::Red);
        assert_eq!(health.unassigned_shards, 2);
        assert_eq!(health.active_shards, 0);
        assert_eq!(health.indices["logs"], ClusterHealthStatus::Red);
    }

    #[test]
    fn test_worst_ordering() {
        use ClusterHealthStatus::{Green, Red, Yellow};
        assert_eq!(Green.worst(Yellow), Yellow);
        assert_eq!(Yellow.worst(Red), Red);
        assert_eq!(Green.worst(Green), Green);
    }

    #[test]
    fn test_empty_cluster_is_green() {
        let health = ClusterStateHealth::new(&MetaData::new(), &RoutingTable::builder(0).build());
        assert_eq!(health.status, ClusterHealthStatus::Green);
    }
}
