//! The immutable routing table: which copy of which shard is where.
//!
//! A relocation is represented by its RELOCATING source entry only; the
//! paired INITIALIZING target is materialized by the allocator's working
//! view, not stored here. This keeps the table a function of copies, not of
//! in-flight handshakes.

use std::collections::BTreeMap;

use keel_core::{NodeId, ShardNumber};

use crate::index::{Index, ShardId};
use crate::metadata::{IndexMetaData, MetaData};
use crate::shard::ShardRouting;
use crate::unassigned::{AllocationClock, UnassignedInfo, UnassignedReason};

/// Routing of every copy of one shard.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShardTable {
    shard_id: ShardId,
    shards: Vec<ShardRouting>,
}

impl ShardTable {
    /// Creates a shard table, normalizing the copy order so that equal
    /// routings always produce byte-identical tables: primary first, then
    /// assigned copies by allocation id, then unassigned copies in input
    /// order.
    ///
    /// # Panics
    /// Panics if a routing belongs to a different shard.
    #[must_use]
    pub fn new(shard_id: ShardId, mut shards: Vec<ShardRouting>) -> Self {
        for shard in &shards {
            assert!(
                *shard.shard_id() == shard_id,
                "routing belongs to a different shard"
            );
        }
        shards.sort_by_key(|s| {
            (
                !s.primary(),
                s.is_unassigned(),
                s.allocation_id().map(|id| id.id()),
            )
        });
        Self { shard_id, shards }
    }

    /// Returns the shard address.
    #[must_use]
    pub const fn shard_id(&self) -> &ShardId {
        &self.shard_id
    }

    /// Returns the primary copy.
    #[must_use]
    pub fn primary(&self) -> Option<&ShardRouting> {
        self.shards.iter().find(|s| s.primary())
    }

    /// Iterates replica copies.
    pub fn replicas(&self) -> impl Iterator<Item = &ShardRouting> {
        self.shards.iter().filter(|s| !s.primary())
    }

    /// Iterates active (started or relocating) copies.
    pub fn active_shards(&self) -> impl Iterator<Item = &ShardRouting> {
        self.shards.iter().filter(|s| s.is_active())
    }

    /// Iterates all copies.
    pub fn iter(&self) -> impl Iterator<Item = &ShardRouting> {
        self.shards.iter()
    }

    /// Number of copies.
    #[must_use]
    pub fn len(&self) -> usize {
        self.shards.len()
    }

    /// True if the table has no copies.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.shards.is_empty()
    }
}

/// Routing of every shard of one index.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexRoutingTable {
    index: Index,
    shards: BTreeMap<ShardNumber, ShardTable>,
}

impl IndexRoutingTable {
    /// Returns the index identity.
    #[must_use]
    pub const fn index(&self) -> &Index {
        &self.index
    }

    /// Returns the table of one shard.
    #[must_use]
    pub fn shard(&self, number: ShardNumber) -> Option<&ShardTable> {
        self.shards.get(&number)
    }

    /// Iterates shard tables in shard-number order.
    pub fn iter(&self) -> impl Iterator<Item = &ShardTable> {
        self.shards.values()
    }

    /// Number of shards.
    #[must_use]
    pub fn len(&self) -> usize {
        self.shards.len()
    }

    /// True if the index has no shards routed.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.shards.is_empty()
    }
}

/// The routing table of the whole cluster.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoutingTable {
    version: u64,
    indices: BTreeMap<String, IndexRoutingTable>,
}

impl RoutingTable {
    /// Starts building a routing table.
    #[must_use]
    pub const fn builder(version: u64) -> RoutingTableBuilder {
        RoutingTableBuilder {
            version,
            indices: BTreeMap::new(),
        }
    }

    /// Table version. The allocator preserves it; callers bump it on commit.
    #[must_use]
    pub const fn version(&self) -> u64 {
        self.version
    }

    /// Returns the routing of one index.
    #[must_use]
    pub fn index(&self, name: &str) -> Option<&IndexRoutingTable> {
        self.indices.get(name)
    }

    /// Returns the table of one shard.
    #[must_use]
    pub fn shard_table(&self, shard_id: &ShardId) -> Option<&ShardTable> {
        self.indices
            .get(shard_id.index().name())
            .and_then(|index| index.shard(shard_id.number()))
    }

    /// Iterates index tables in name order.
    pub fn iter(&self) -> impl Iterator<Item = &IndexRoutingTable> {
        self.indices.values()
    }

    /// Iterates every shard routing in the table.
    pub fn iter_shards(&self) -> impl Iterator<Item = &ShardRouting> {
        self.indices
            .values()
            .flat_map(|index| index.iter().flat_map(|table| table.iter()))
    }

    /// Iterates every shard routing assigned to `node`, including relocation
    /// sources.
    pub fn shards_on_node(&self, node: NodeId) -> impl Iterator<Item = &ShardRouting> {
        self.iter_shards()
            .filter(move |s| s.current_node() == Some(node))
    }

    /// Checks coherence against cluster metadata: every routed index has
    /// metadata with a matching UUID, shard and copy counts match, and each
    /// shard has exactly one primary entry.
    ///
    /// # Errors
    /// Returns the first incoherence found.
    pub fn validate(&self, metadata: &MetaData) -> keel_core::Result<()> {
        for index_table in self.indices.values() {
            let Some(meta) = metadata.index(index_table.index().name()) else {
                return Err(keel_core::Error::NotFound {
                    resource: "index metadata",
                    id: index_table.index().name().to_string(),
                });
            };
            if meta.index() != index_table.index() {
                return Err(keel_core::Error::InvalidState {
                    current: "routing table references a different index generation",
                    required: "matching index UUID in metadata",
                });
            }
            if index_table.len() != meta.number_of_shards() as usize {
                return Err(keel_core::Error::InvalidState {
                    current: "routed shard count differs from metadata",
                    required: "one shard table per primary shard",
                });
            }
            let copies = 1 + meta.number_of_replicas() as usize;
            for shard_table in index_table.iter() {
                if shard_table.len() != copies {
                    return Err(keel_core::Error::InvalidState {
                        current: "copy count differs from metadata",
                        required: "one primary plus configured replicas",
                    });
                }
                let primaries = shard_table.iter().filter(|s| s.primary()).count();
                if primaries != 1 {
                    return Err(keel_core::Error::InvalidState {
                        current: "shard has zero or multiple primary entries",
                        required: "exactly one primary per shard",
                    });
                }
            }
        }
        Ok(())
    }
}

/// Builder for a routing table.
#[derive(Debug)]
pub struct RoutingTableBuilder {
    version: u64,
    indices: BTreeMap<String, IndexRoutingTable>,
}

impl RoutingTableBuilder {
    /// Adds a freshly created index: every copy unassigned with reason
    /// `IndexCreated`.
    #[must_use]
    pub fn add_index_new(self, meta: &IndexMetaData, clock: AllocationClock) -> Self {
        self.add_index_unassigned(meta, UnassignedReason::IndexCreated, clock)
    }

    /// Adds an index recovering after full-cluster restart: every copy
    /// unassigned with reason `ClusterRecovered`.
    #[must_use]
    pub fn add_index_recovered(self, meta: &IndexMetaData, clock: AllocationClock) -> Self {
        self.add_index_unassigned(meta, UnassignedReason::ClusterRecovered, clock)
    }

    fn add_index_unassigned(
        mut self,
        meta: &IndexMetaData,
        reason: UnassignedReason,
        clock: AllocationClock,
    ) -> Self {
        let mut shards = BTreeMap::new();
        for number in 0..meta.number_of_shards() {
            let number = ShardNumber::new(number);
            let shard_id = ShardId::new(meta.index().clone(), number);
            let mut copies = Vec::with_capacity(1 + meta.number_of_replicas() as usize);
            copies.push(ShardRouting::new_unassigned(
                shard_id.clone(),
                true,
                UnassignedInfo::new(reason, None, clock),
            ));
            for _ in 0..meta.number_of_replicas() {
                copies.push(ShardRouting::new_unassigned(
                    shard_id.clone(),
                    false,
                    UnassignedInfo::new(reason, None, clock),
                ));
            }
            shards.insert(number, ShardTable::new(shard_id, copies));
        }
        self.indices.insert(
            meta.index().name().to_string(),
            IndexRoutingTable {
                index: meta.index().clone(),
                shards,
            },
        );
        self
    }

    /// Adds one shard table, creating its index table as needed.
    #[must_use]
    pub fn add_shard_table(mut self, table: ShardTable) -> Self {
        let index = table.shard_id().index().clone();
        let entry = self
            .indices
            .entry(index.name().to_string())
            .or_insert_with(|| IndexRoutingTable {
                index,
                shards: BTreeMap::new(),
            });
        entry.shards.insert(table.shard_id().number(), table);
        self
    }

    /// Finishes the table.
    #[must_use]
    pub fn build(self) -> RoutingTable {
        RoutingTable {
            version: self.version,
            indices: self.indices,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metadata::IndexSettings;
    use uuid::Uuid;

    fn meta() -> IndexMetaData {
        IndexMetaData::new(
            Index::new("logs", Uuid::from_u128(1)),
            2,
            1,
            IndexSettings::new(),
        )
    }

    #[test]
    fn test_new_index_all_unassigned() {
        let meta = meta();
        let table = RoutingTable::builder(1)
            .add_index_new(&meta, AllocationClock::default())
            .build();

        assert_eq!(table.version(), 1);
        let index_table = table.index("logs").unwrap();
        assert_eq!(index_table.len(), 2);
        for shard_table in index_table.iter() {
            assert_eq!(shard_table.len(), 2);
            assert!(shard_table.iter().all(ShardRouting::is_unassigned));
            assert!(shard_table.primary().is_some());
            assert_eq!(shard_table.active_shards().count(), 0);
        }
    }

    #[test]
    fn test_validate_against_metadata() {
        let meta = meta();
        let metadata = MetaData::new().with_index(meta.clone());
        let table = RoutingTable::builder(1)
            .add_index_new(&meta, AllocationClock::default())
            .build();

        assert!(table.validate(&metadata).is_ok());
        assert!(table.validate(&MetaData::new()).is_err());
    }

    #[test]
    fn test_primary_sorts_first() {
        let meta = meta();
        let table = RoutingTable::builder(1)
            .add_index_new(&meta, AllocationClock::default())
            .build();
        let shard_table = table.index("logs").unwrap().shard(ShardNumber::new(0)).unwrap();
        assert!(shard_table.iter().next().unwrap().primary());
    }

    #[test]
    fn test_health_of_empty_table() {
        let table = RoutingTable::builder(0).build();
        assert_eq!(table.iter_shards().count(), 0);
        assert!(table.validate(&MetaData::new()).is_ok());
    }
}
