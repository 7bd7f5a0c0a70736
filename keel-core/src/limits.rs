//! System limits and configuration bounds.
//!
//! Put limits on everything. Every collection the allocator walks has an
//! explicit maximum size, which keeps a reroute pass predictably bounded.

/// Workspace-wide limits for Keel.
///
/// All limits are explicit and configurable. Default values are chosen to be
/// safe for most deployments while allowing customization.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Limits {
    /// Maximum number of nodes in the cluster.
    pub max_nodes: u32,
    /// Maximum number of indices in the cluster metadata.
    pub max_indices: u32,
    /// Maximum number of primary shards per index.
    pub max_shards_per_index: u32,
    /// Maximum number of replicas per primary shard.
    pub max_replicas_per_shard: u32,
    /// Maximum number of administrative commands in one batch.
    pub max_commands_per_batch: u32,
    /// Maximum number of elements named in a health-change reason string.
    pub max_reason_elements: u32,
}

impl Limits {
    /// Creates limits with safe defaults.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            max_nodes: 1_000,
            max_indices: 10_000,
            max_shards_per_index: 1_024,
            max_replicas_per_shard: 16,
            max_commands_per_batch: 64,
            max_reason_elements: 10,
        }
    }

    /// Validates that all limits are internally consistent.
    ///
    /// # Errors
    /// Returns an error if any limits are invalid.
    pub fn validate(&self) -> crate::Result<()> {
        if self.max_nodes == 0 {
            return Err(crate::Error::InvalidArgument {
                name: "max_nodes",
                reason: "must be positive",
            });
        }
        if self.max_shards_per_index == 0 {
            return Err(crate::Error::InvalidArgument {
                name: "max_shards_per_index",
                reason: "must be positive",
            });
        }
        if self.max_commands_per_batch == 0 {
            return Err(crate::Error::InvalidArgument {
                name: "max_commands_per_batch",
                reason: "must be positive",
            });
        }
        Ok(())
    }
}

impl Default for Limits {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_limits_are_valid() {
        let limits = Limits::new();
        assert!(limits.validate().is_ok());
    }

    #[test]
    fn test_zero_nodes_invalid() {
        let mut limits = Limits::new();
        limits.max_nodes = 0;
        assert!(limits.validate().is_err());
    }
}
