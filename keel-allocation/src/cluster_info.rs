//! Disk-usage and shard-size oracle.
//!
//! Gathering this data involves I/O and runs outside the allocator; a pass
//! consumes one precomputed snapshot. Missing entries mean "unknown" and
//! never block allocation by themselves.

use std::collections::HashMap;

use keel_core::NodeId;
use keel_cluster::ShardId;

/// Disk usage of one node.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DiskUsage {
    /// Total filesystem capacity in bytes.
    pub total_bytes: u64,
    /// Free bytes.
    pub free_bytes: u64,
}

impl DiskUsage {
    /// Creates a usage record.
    ///
    /// # Panics
    /// Panics if free exceeds total.
    #[must_use]
    pub const fn new(total_bytes: u64, free_bytes: u64) -> Self {
        assert!(free_bytes <= total_bytes, "free bytes exceed total");
        Self {
            total_bytes,
            free_bytes,
        }
    }

    /// Fraction of the disk in use, in `[0, 1]`.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn used_fraction(&self) -> f64 {
        if self.total_bytes == 0 {
            return 0.0;
        }
        (self.total_bytes - self.free_bytes) as f64 / self.total_bytes as f64
    }
}

/// One snapshot of cluster resource information.
#[derive(Debug, Clone, Default)]
pub struct ClusterInfo {
    disk: HashMap<NodeId, DiskUsage>,
    shard_sizes: HashMap<ShardId, u64>,
}

impl ClusterInfo {
    /// Creates an empty snapshot (everything unknown).
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Records a node's disk usage.
    #[must_use]
    pub fn with_disk_usage(mut self, node: NodeId, usage: DiskUsage) -> Self {
        self.disk.insert(node, usage);
        self
    }

    /// Records a shard's estimated size in bytes.
    #[must_use]
    pub fn with_shard_size(mut self, shard_id: ShardId, bytes: u64) -> Self {
        self.shard_sizes.insert(shard_id, bytes);
        self
    }

    /// Disk usage of a node, if known.
    #[must_use]
    pub fn disk_usage(&self, node: NodeId) -> Option<DiskUsage> {
        self.disk.get(&node).copied()
    }

    /// Estimated size of a shard, if known.
    #[must_use]
    pub fn shard_size(&self, shard_id: &ShardId) -> Option<u64> {
        self.shard_sizes.get(shard_id).copied()
    }
}

/// Supplies one `ClusterInfo` snapshot per allocation pass.
pub trait ClusterInfoProvider: Send + Sync {
    /// Returns the current snapshot.
    fn cluster_info(&self) -> ClusterInfo;
}

/// Provider that knows nothing. Disk thresholds never fire.
#[derive(Debug, Clone, Copy, Default)]
pub struct EmptyClusterInfo;

impl ClusterInfoProvider for EmptyClusterInfo {
    fn cluster_info(&self) -> ClusterInfo {
        ClusterInfo::new()
    }
}

impl ClusterInfoProvider for ClusterInfo {
    fn cluster_info(&self) -> ClusterInfo {
        self.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_used_fraction() {
        let usage = DiskUsage::new(100, 8);
        assert!((usage.used_fraction() - 0.92).abs() < 1e-9);
    }

    #[test]
    fn test_empty_disk_is_unused() {
        let usage = DiskUsage::new(0, 0);
        assert!(usage.used_fraction().abs() < f64::EPSILON);
    }

    #[test]
    fn test_lookup_unknown_node() {
        let info = ClusterInfo::new();
        assert!(info.disk_usage(NodeId::new(9)).is_none());
    }
}
