//! Strongly-typed identifiers for Keel entities.
//!
//! Explicit types prevent bugs from mixing up identifiers: a `NodeId` can
//! never be passed where a `ShardNumber` is expected even though both wrap
//! small integers.

use std::fmt;

/// Unique identifier for a node in the cluster.
///
/// Handed out by the discovery layer; the allocator only compares, orders,
/// and displays node ids, so the wrapper stays minimal.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
#[repr(transparent)]
pub struct NodeId(u64);

impl NodeId {
    /// Creates a node id from a raw u64 value.
    #[inline]
    #[must_use]
    pub const fn new(value: u64) -> Self {
        Self(value)
    }

    /// Returns the raw u64 value.
    #[inline]
    #[must_use]
    pub const fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Debug for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "node({})", self.0)
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "node-{}", self.0)
    }
}

impl From<u64> for NodeId {
    fn from(value: u64) -> Self {
        Self::new(value)
    }
}

impl From<NodeId> for u64 {
    fn from(id: NodeId) -> Self {
        id.get()
    }
}

/// Position of a shard within its index.
///
/// An index with N primary shards numbers them `0..N`. Shard numbers are
/// 32-bit: index shard counts are bounded far below that. Unlike node ids
/// they display bare, so `[logs][3]` reads the way operators write it.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
#[repr(transparent)]
pub struct ShardNumber(u32);

impl ShardNumber {
    /// Creates a shard number from a raw u32 value.
    #[inline]
    #[must_use]
    pub const fn new(value: u32) -> Self {
        Self(value)
    }

    /// Returns the raw u32 value.
    #[inline]
    #[must_use]
    pub const fn get(self) -> u32 {
        self.0
    }
}

impl fmt::Debug for ShardNumber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "shard({})", self.0)
    }
}

impl fmt::Display for ShardNumber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u32> for ShardNumber {
    fn from(value: u32) -> Self {
        Self::new(value)
    }
}

impl From<ShardNumber> for u32 {
    fn from(number: ShardNumber) -> Self {
        number.get()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_node_id_display() {
        let node = NodeId::new(42);
        assert_eq!(format!("{node}"), "node-42");
        assert_eq!(format!("{node:?}"), "node(42)");
    }

    #[test]
    fn test_node_id_ordering() {
        let a = NodeId::new(1);
        let b = NodeId::new(2);
        let c = NodeId::new(1);

        assert!(a < b);
        assert!(b > a);
        assert_eq!(a, c);
    }

    #[test]
    fn test_node_id_conversions() {
        let id = NodeId::from(7_u64);
        assert_eq!(u64::from(id), 7);
    }

    #[test]
    fn test_shard_number_display() {
        let n = ShardNumber::new(3);
        assert_eq!(format!("{n}"), "3");
        assert_eq!(format!("{n:?}"), "shard(3)");
    }

    #[test]
    fn test_shard_number_conversions() {
        let n = ShardNumber::from(5_u32);
        assert_eq!(u32::from(n), 5);
    }
}
