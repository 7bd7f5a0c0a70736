//! Per-index metadata: settings, in-sync allocation ids, primary terms.

use std::collections::{BTreeMap, BTreeSet};

use keel_core::ShardNumber;
use uuid::Uuid;

use crate::index::Index;

/// Node-attribute filters constraining where an index's shards may live.
///
/// `require` must all match, `include` needs at least one match when
/// non-empty, `exclude` must match none. Values match against node
/// attributes, plus the pseudo-attribute `_id` for the node id.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct AllocationFilters {
    /// Attributes a node must all carry.
    pub require: BTreeMap<String, String>,
    /// Attributes of which a node must carry at least one (when non-empty).
    pub include: BTreeMap<String, String>,
    /// Attributes a node must not carry.
    pub exclude: BTreeMap<String, String>,
}

impl AllocationFilters {
    /// Creates an empty filter set (matches every node).
    #[must_use]
    pub const fn new() -> Self {
        Self {
            require: BTreeMap::new(),
            include: BTreeMap::new(),
            exclude: BTreeMap::new(),
        }
    }

    /// True if no filter is configured.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.require.is_empty() && self.include.is_empty() && self.exclude.is_empty()
    }
}

/// Per-index allocation settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexSettings {
    /// How long shards of a departed node stay pinned before reallocation.
    pub delayed_node_left_timeout_nanos: u64,
    /// Index-level allocation filters.
    pub filters: AllocationFilters,
}

impl IndexSettings {
    /// Default delay before reallocating shards of a departed node: one minute.
    pub const DEFAULT_NODE_LEFT_TIMEOUT_NANOS: u64 = 60_000_000_000;

    /// Creates settings with defaults.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            delayed_node_left_timeout_nanos: Self::DEFAULT_NODE_LEFT_TIMEOUT_NANOS,
            filters: AllocationFilters::new(),
        }
    }

    /// Sets the node-left delay.
    #[must_use]
    pub const fn with_node_left_timeout_nanos(mut self, nanos: u64) -> Self {
        self.delayed_node_left_timeout_nanos = nanos;
        self
    }

    /// Sets the index-level allocation filters.
    #[must_use]
    pub fn with_filters(mut self, filters: AllocationFilters) -> Self {
        self.filters = filters;
        self
    }
}

impl Default for IndexSettings {
    fn default() -> Self {
        Self::new()
    }
}

/// Metadata of one index.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexMetaData {
    index: Index,
    number_of_shards: u32,
    number_of_replicas: u32,
    settings: IndexSettings,
    in_sync_allocation_ids: BTreeMap<ShardNumber, BTreeSet<Uuid>>,
    primary_terms: Vec<u64>,
}

impl IndexMetaData {
    /// Creates metadata for a new index. Primary terms start at zero and are
    /// bumped by the reconciler on first assignment.
    ///
    /// # Panics
    /// Panics if `number_of_shards` is zero.
    #[must_use]
    pub fn new(
        index: Index,
        number_of_shards: u32,
        number_of_replicas: u32,
        settings: IndexSettings,
    ) -> Self {
        assert!(number_of_shards > 0, "an index needs at least one shard");
        Self {
            index,
            number_of_shards,
            number_of_replicas,
            settings,
            in_sync_allocation_ids: BTreeMap::new(),
            primary_terms: vec![0; number_of_shards as usize],
        }
    }

    /// Returns the index identity.
    #[must_use]
    pub const fn index(&self) -> &Index {
        &self.index
    }

    /// Number of primary shards.
    #[must_use]
    pub const fn number_of_shards(&self) -> u32 {
        self.number_of_shards
    }

    /// Number of replicas per primary.
    #[must_use]
    pub const fn number_of_replicas(&self) -> u32 {
        self.number_of_replicas
    }

    /// Returns the index settings.
    #[must_use]
    pub const fn settings(&self) -> &IndexSettings {
        &self.settings
    }

    /// In-sync allocation ids for a shard; empty if never written.
    #[must_use]
    pub fn in_sync_ids(&self, number: ShardNumber) -> &BTreeSet<Uuid> {
        static EMPTY: BTreeSet<Uuid> = BTreeSet::new();
        self.in_sync_allocation_ids.get(&number).unwrap_or(&EMPTY)
    }

    /// Primary term of a shard.
    ///
    /// # Panics
    /// Panics if the shard number is out of range.
    #[must_use]
    pub fn primary_term(&self, number: ShardNumber) -> u64 {
        self.primary_terms[number.get() as usize]
    }

    /// Overwrites the in-sync set for a shard. Used by the reconciler.
    pub fn set_in_sync_ids(&mut self, number: ShardNumber, ids: BTreeSet<Uuid>) {
        assert!(
            number.get() < self.number_of_shards,
            "shard number out of range"
        );
        self.in_sync_allocation_ids.insert(number, ids);
    }

    /// Overwrites the primary term of a shard. Used by the reconciler.
    ///
    /// # Panics
    /// Panics if the term would decrease.
    pub fn set_primary_term(&mut self, number: ShardNumber, term: u64) {
        let slot = &mut self.primary_terms[number.get() as usize];
        assert!(term >= *slot, "primary terms never decrease");
        *slot = term;
    }
}

/// Cluster metadata: every index the cluster knows about.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct MetaData {
    indices: BTreeMap<String, IndexMetaData>,
}

impl MetaData {
    /// Creates empty metadata.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            indices: BTreeMap::new(),
        }
    }

    /// Adds or replaces an index.
    #[must_use]
    pub fn with_index(mut self, meta: IndexMetaData) -> Self {
        self.indices.insert(meta.index().name().to_string(), meta);
        self
    }

    /// Looks up an index by name.
    #[must_use]
    pub fn index(&self, name: &str) -> Option<&IndexMetaData> {
        self.indices.get(name)
    }

    /// Replaces an index entry in place. Used by the reconciler.
    pub fn put_index(&mut self, meta: IndexMetaData) {
        self.indices.insert(meta.index().name().to_string(), meta);
    }

    /// Number of indices.
    #[must_use]
    pub fn len(&self) -> usize {
        self.indices.len()
    }

    /// True if no index exists.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.indices.is_empty()
    }

    /// Iterates indices in name order.
    pub fn iter(&self) -> impl Iterator<Item = &IndexMetaData> {
        self.indices.values()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn meta() -> IndexMetaData {
        IndexMetaData::new(
            Index::new("logs", Uuid::from_u128(1)),
            2,
            1,
            IndexSettings::new(),
        )
    }

    #[test]
    fn test_fresh_index_terms_are_zero() {
        let meta = meta();
        assert_eq!(meta.primary_term(ShardNumber::new(0)), 0);
        assert_eq!(meta.primary_term(ShardNumber::new(1)), 0);
        assert!(meta.in_sync_ids(ShardNumber::new(0)).is_empty());
    }

    #[test]
    fn test_set_in_sync_ids() {
        let mut meta = meta();
        let ids: BTreeSet<Uuid> = [Uuid::from_u128(9)].into_iter().collect();
        meta.set_in_sync_ids(ShardNumber::new(1), ids.clone());
        assert_eq!(meta.in_sync_ids(ShardNumber::new(1)), &ids);
        assert!(meta.in_sync_ids(ShardNumber::new(0)).is_empty());
    }

    #[test]
    #[should_panic(expected = "primary terms never decrease")]
    fn test_term_decrease_panics() {
        let mut meta = meta();
        meta.set_primary_term(ShardNumber::new(0), 5);
        meta.set_primary_term(ShardNumber::new(0), 4);
    }

    #[test]
    fn test_metadata_lookup() {
        let md = MetaData::new().with_index(meta());
        assert!(md.index("logs").is_some());
        assert!(md.index("missing").is_none());
        assert_eq!(md.len(), 1);
    }
}
