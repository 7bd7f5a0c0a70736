//! Index identity and shard addressing.

use std::fmt;

use keel_core::ShardNumber;
use uuid::Uuid;

/// Identity of an index: a human-facing name plus a UUID.
///
/// The UUID distinguishes two generations of an index that reused the same
/// name (delete then recreate). Routing entries always carry the full
/// identity so a stale shard of a deleted generation can never be confused
/// with the live one.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Index {
    name: String,
    uuid: Uuid,
}

impl Index {
    /// Creates an index identity.
    #[must_use]
    pub fn new(name: impl Into<String>, uuid: Uuid) -> Self {
        Self {
            name: name.into(),
            uuid,
        }
    }

    /// Returns the index name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns the index UUID.
    #[must_use]
    pub const fn uuid(&self) -> Uuid {
        self.uuid
    }
}

impl fmt::Display for Index {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}]", self.name)
    }
}

/// Address of one shard: an index identity plus the shard's position.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ShardId {
    index: Index,
    number: ShardNumber,
}

impl ShardId {
    /// Creates a shard address.
    #[must_use]
    pub const fn new(index: Index, number: ShardNumber) -> Self {
        Self { index, number }
    }

    /// Returns the index identity.
    #[must_use]
    pub const fn index(&self) -> &Index {
        &self.index
    }

    /// Returns the shard position within the index.
    #[must_use]
    pub const fn number(&self) -> ShardNumber {
        self.number
    }
}

impl fmt::Display for ShardId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}][{}]", self.index.name, self.number)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn index(name: &str) -> Index {
        Index::new(name, Uuid::from_u128(7))
    }

    #[test]
    fn test_display() {
        let id = ShardId::new(index("logs"), ShardNumber::new(3));
        assert_eq!(format!("{id}"), "[logs][3]");
    }

    #[test]
    fn test_same_name_different_uuid() {
        let a = Index::new("logs", Uuid::from_u128(1));
        let b = Index::new("logs", Uuid::from_u128(2));
        assert_ne!(a, b);
    }

    #[test]
    fn test_shard_id_ordering() {
        let a = ShardId::new(index("logs"), ShardNumber::new(0));
        let b = ShardId::new(index("logs"), ShardNumber::new(1));
        assert!(a < b);
    }
}
