//! Cluster-wide allocation settings.

use keel_cluster::AllocationFilters;

/// Which shards the cluster currently allows to allocate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum EnableAllocation {
    /// All shards may allocate.
    #[default]
    All,
    /// Only primaries may allocate.
    Primaries,
    /// Only primaries of freshly created indices may allocate.
    NewPrimaries,
    /// Nothing may allocate.
    None,
}

impl EnableAllocation {
    /// Parses the setting value (`all`, `primaries`, `new_primaries`, `none`).
    #[must_use]
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "all" => Some(Self::All),
            "primaries" => Some(Self::Primaries),
            "new_primaries" => Some(Self::NewPrimaries),
            "none" => Some(Self::None),
            _ => None,
        }
    }
}

/// Cluster-wide allocation settings, consumed by the standard decider stack.
#[derive(Debug, Clone, PartialEq)]
pub struct AllocationSettings {
    /// Which shards may allocate at all.
    pub enable: EnableAllocation,
    /// Maximum concurrent shard recoveries per node (incoming or outgoing).
    pub node_concurrent_recoveries: u32,
    /// Disk usage fraction above which no new shard is allocated.
    pub disk_watermark_low: f64,
    /// Disk usage fraction above which shards are moved away.
    pub disk_watermark_high: f64,
    /// Disk usage fraction above which moving away is urgent.
    pub disk_watermark_flood_stage: f64,
    /// Refuse two copies of a shard on nodes sharing a host.
    pub same_shard_host: bool,
    /// Node attributes shard copies are spread across (e.g. `zone`).
    pub awareness_attributes: Vec<String>,
    /// Cluster-level allocation filters.
    pub filters: AllocationFilters,
    /// Failed-allocation retries before a shard needs manual intervention.
    pub max_retries: u32,
    /// Maximum shards a single node will accept.
    pub max_shards_per_node: u32,
}

impl AllocationSettings {
    /// Creates settings with defaults.
    #[must_use]
    pub fn new() -> Self {
        Self {
            enable: EnableAllocation::All,
            node_concurrent_recoveries: 2,
            disk_watermark_low: 0.85,
            disk_watermark_high: 0.90,
            disk_watermark_flood_stage: 0.95,
            same_shard_host: false,
            awareness_attributes: Vec::new(),
            filters: AllocationFilters::new(),
            max_retries: 5,
            max_shards_per_node: 1_000,
        }
    }

    /// Sets the allocation-enable gate.
    #[must_use]
    pub const fn with_enable(mut self, enable: EnableAllocation) -> Self {
        self.enable = enable;
        self
    }

    /// Sets the per-node concurrent recovery cap.
    #[must_use]
    pub const fn with_concurrent_recoveries(mut self, cap: u32) -> Self {
        self.node_concurrent_recoveries = cap;
        self
    }

    /// Sets the disk watermarks.
    #[must_use]
    pub const fn with_disk_watermarks(mut self, low: f64, high: f64, flood_stage: f64) -> Self {
        self.disk_watermark_low = low;
        self.disk_watermark_high = high;
        self.disk_watermark_flood_stage = flood_stage;
        self
    }

    /// Sets the awareness attributes.
    #[must_use]
    pub fn with_awareness_attributes(
        mut self,
        attributes: impl IntoIterator<Item = String>,
    ) -> Self {
        self.awareness_attributes = attributes.into_iter().collect();
        self
    }

    /// Sets the cluster-level allocation filters.
    #[must_use]
    pub fn with_filters(mut self, filters: AllocationFilters) -> Self {
        self.filters = filters;
        self
    }

    /// Sets the failed-allocation retry cap.
    #[must_use]
    pub const fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    /// Validates internal consistency.
    ///
    /// # Errors
    /// Returns an error if any setting is out of range.
    pub fn validate(&self) -> keel_core::Result<()> {
        if self.node_concurrent_recoveries == 0 {
            return Err(keel_core::Error::InvalidArgument {
                name: "node_concurrent_recoveries",
                reason: "must be positive",
            });
        }
        let watermarks = [
            self.disk_watermark_low,
            self.disk_watermark_high,
            self.disk_watermark_flood_stage,
        ];
        if watermarks.iter().any(|w| !(0.0..=1.0).contains(w)) {
            return Err(keel_core::Error::InvalidArgument {
                name: "disk_watermark",
                reason: "must be a fraction in [0, 1]",
            });
        }
        if self.disk_watermark_low > self.disk_watermark_high
            || self.disk_watermark_high > self.disk_watermark_flood_stage
        {
            return Err(keel_core::Error::InvalidArgument {
                name: "disk_watermark",
                reason: "must be ordered low <= high <= flood_stage",
            });
        }
        if self.max_shards_per_node == 0 {
            return Err(keel_core::Error::InvalidArgument {
                name: "max_shards_per_node",
                reason: "must be positive",
            });
        }
        Ok(())
    }
}

impl Default for AllocationSettings {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        assert!(AllocationSettings::new().validate().is_ok());
    }

    #[test]
    fn test_watermark_ordering_enforced() {
        let settings = AllocationSettings::new().with_disk_watermarks(0.9, 0.8, 0.95);
        assert!(settings.validate().is_err());
    }

    #[test]
    fn test_enable_parse() {
        assert_eq!(
            EnableAllocation::parse("new_primaries"),
            Some(EnableAllocation::NewPrimaries)
        );
        assert_eq!(EnableAllocation::parse("sometimes"), None);
    }

    #[test]
    fn test_zero_recoveries_invalid() {
        let settings = AllocationSettings::new().with_concurrent_recoveries(0);
        assert!(settings.validate().is_err());
    }
}
