//! Honors include/exclude/require node filters.

use keel_cluster::{AllocationFilters, DiscoveryNode, ShardRouting};

use crate::context::RoutingAllocation;
use crate::decider::{AllocationDecider, Ruling};
use crate::settings::AllocationSettings;

/// Applies cluster-level and index-level allocation filters. Filters also
/// evict: a shard on a node that stopped matching may not remain.
#[derive(Debug, Clone)]
pub struct FilterAllocationDecider {
    cluster: AllocationFilters,
}

impl FilterAllocationDecider {
    /// Creates the decider from cluster settings.
    #[must_use]
    pub fn new(settings: &AllocationSettings) -> Self {
        Self {
            cluster: settings.filters.clone(),
        }
    }

    fn check(
        &self,
        shard: &ShardRouting,
        node: &DiscoveryNode,
        allocation: &RoutingAllocation<'_>,
    ) -> Ruling {
        if let Some(reason) = refusal(&self.cluster, node, "cluster") {
            return Ruling::no(reason);
        }
        if let Some(meta) = allocation.metadata().index(shard.shard_id().index().name()) {
            if let Some(reason) = refusal(&meta.settings().filters, node, "index") {
                return Ruling::no(reason);
            }
        }
        Ruling::yes()
    }
}

impl AllocationDecider for FilterAllocationDecider {
    fn name(&self) -> &'static str {
        "filter"
    }

    fn can_allocate(
        &self,
        shard: &ShardRouting,
        node: &DiscoveryNode,
        allocation: &RoutingAllocation<'_>,
    ) -> Ruling {
        self.check(shard, node, allocation)
    }

    fn can_remain(
        &self,
        shard: &ShardRouting,
        node: &DiscoveryNode,
        allocation: &RoutingAllocation<'_>,
    ) -> Ruling {
        self.check(shard, node, allocation)
    }
}

fn refusal(filters: &AllocationFilters, node: &DiscoveryNode, level: &str) -> Option<String> {
    if filters.is_empty() {
        return None;
    }
    for (key, value) in &filters.require {
        if !matches(node, key, value) {
            return Some(format!("node does not match {level} require filter [{key}={value}]"));
        }
    }
    if !filters.include.is_empty()
        && !filters.include.iter().any(|(k, v)| matches(node, k, v))
    {
        return Some(format!("node matches no {level} include filter"));
    }
    for (key, value) in &filters.exclude {
        if matches(node, key, value) {
            return Some(format!("node matches {level} exclude filter [{key}={value}]"));
        }
    }
    None
}

fn matches(node: &DiscoveryNode, key: &str, value: &str) -> bool {
    match key {
        "_id" => node.id().to_string() == value,
        "_name" => node.name() == value,
        "_host" => node.host() == value,
        _ => node.attribute(key) == Some(value),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use keel_core::NodeId;
    use std::collections::BTreeMap;

    fn filters(require: &[(&str, &str)], exclude: &[(&str, &str)]) -> AllocationFilters {
        let to_map = |pairs: &[(&str, &str)]| -> BTreeMap<String, String> {
            pairs
                .iter()
                .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
                .collect()
        };
        AllocationFilters {
            require: to_map(require),
            include: BTreeMap::new(),
            exclude: to_map(exclude),
        }
    }

    #[test]
    fn test_require_filter() {
        let node = DiscoveryNode::new(NodeId::new(1), "n1").with_attribute("tier", "hot");
        assert!(refusal(&filters(&[("tier", "hot")], &[]), &node, "cluster").is_none());
        assert!(refusal(&filters(&[("tier", "cold")], &[]), &node, "cluster").is_some());
    }

    #[test]
    fn test_exclude_filter() {
        let node = DiscoveryNode::new(NodeId::new(1), "n1").with_attribute("zone", "eu-1");
        assert!(refusal(&filters(&[], &[("zone", "eu-1")]), &node, "cluster").is_some());
        assert!(refusal(&filters(&[], &[("zone", "eu-2")]), &node, "cluster").is_none());
    }

    #[test]
    fn test_pseudo_attributes() {
        let node = DiscoveryNode::new(NodeId::new(7), "gamma").with_host("rack-3");
        assert!(matches(&node, "_id", "node-7"));
        assert!(matches(&node, "_name", "gamma"));
        assert!(matches(&node, "_host", "rack-3"));
        assert!(!matches(&node, "_id", "node-8"));
    }
}
