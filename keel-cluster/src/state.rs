//! The immutable cluster-state snapshot fed to the allocator.

use std::sync::Arc;

use crate::metadata::MetaData;
use crate::node::DiscoveryNodes;
use crate::routing_table::RoutingTable;

/// One immutable snapshot of the cluster, produced by the single-writer
/// master and consumed by an allocation pass.
///
/// Metadata and routing table are shared through `Arc`: a pass that changes
/// nothing hands the very same objects back, which callers can detect with
/// `Arc::ptr_eq` and short-circuit.
#[derive(Debug, Clone)]
pub struct ClusterState {
    /// Cluster name, for operator-facing events.
    pub cluster_name: String,
    /// Monotonic state version, bumped by the caller on commit.
    pub version: u64,
    /// The live node set.
    pub nodes: DiscoveryNodes,
    /// Cluster metadata.
    pub metadata: Arc<MetaData>,
    /// The routing table.
    pub routing_table: Arc<RoutingTable>,
}

impl ClusterState {
    /// Creates a snapshot.
    #[must_use]
    pub fn new(
        cluster_name: impl Into<String>,
        version: u64,
        nodes: DiscoveryNodes,
        metadata: MetaData,
        routing_table: RoutingTable,
    ) -> Self {
        Self {
            cluster_name: cluster_name.into(),
            version,
            nodes,
            metadata: Arc::new(metadata),
            routing_table: Arc::new(routing_table),
        }
    }

    /// Returns a successor snapshot with a new routing table and metadata,
    /// bumping the version.
    #[must_use]
    pub fn with_routing(
        &self,
        metadata: Arc<MetaData>,
        routing_table: Arc<RoutingTable>,
    ) -> Self {
        Self {
            cluster_name: self.cluster_name.clone(),
            version: self.version + 1,
            nodes: self.nodes.clone(),
            metadata,
            routing_table,
        }
    }

    /// Returns a successor snapshot with a different node set, bumping the
    /// version.
    #[must_use]
    pub fn with_nodes(&self, nodes: DiscoveryNodes) -> Self {
        Self {
            cluster_name: self.cluster_name.clone(),
            version: self.version + 1,
            nodes,
            metadata: Arc::clone(&self.metadata),
            routing_table: Arc::clone(&self.routing_table),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::index::Index;
    use crate::metadata::{IndexMetaData, IndexSettings};
    use crate::routing_table::RoutingTable;
    use crate::unassigned::AllocationClock;
    use uuid::Uuid;

    #[test]
    fn test_successor_shares_unchanged_parts() {
        let meta = IndexMetaData::new(
            Index::new("logs", Uuid::from_u128(1)),
            1,
            0,
            IndexSettings::new(),
        );
        let metadata = MetaData::new().with_index(meta.clone());
        let table = RoutingTable::builder(1)
            .add_index_new(&meta, AllocationClock::default())
            .build();
        let state = ClusterState::new("test", 1, DiscoveryNodes::new(), metadata, table);

        let successor = state.with_nodes(DiscoveryNodes::new());
        assert_eq!(successor.version, 2);
        assert!(Arc::ptr_eq(&state.metadata, &successor.metadata));
        assert!(Arc::ptr_eq(&state.routing_table, &successor.routing_table));
    }
}
