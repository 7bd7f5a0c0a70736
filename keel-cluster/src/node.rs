//! The live node set: identities, roles, and attributes.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use keel_core::NodeId;

/// Role a node plays in the cluster.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum NodeRole {
    /// Holds shard data.
    Data,
    /// Eligible to coordinate cluster-state updates.
    Master,
    /// Runs ingest pipelines.
    Ingest,
}

impl fmt::Display for NodeRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Data => "data",
            Self::Master => "master",
            Self::Ingest => "ingest",
        };
        f.write_str(s)
    }
}

/// A node as seen by the allocator: identity, host, roles, attributes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiscoveryNode {
    id: NodeId,
    name: String,
    host: String,
    roles: BTreeSet<NodeRole>,
    attributes: BTreeMap<String, String>,
}

impl DiscoveryNode {
    /// Creates a data node with the given id and name.
    #[must_use]
    pub fn new(id: NodeId, name: impl Into<String>) -> Self {
        Self {
            id,
            name: name.into(),
            host: String::new(),
            roles: [NodeRole::Data].into_iter().collect(),
            attributes: BTreeMap::new(),
        }
    }

    /// Sets the host the node runs on.
    #[must_use]
    pub fn with_host(mut self, host: impl Into<String>) -> Self {
        self.host = host.into();
        self
    }

    /// Replaces the node's roles.
    #[must_use]
    pub fn with_roles(mut self, roles: impl IntoIterator<Item = NodeRole>) -> Self {
        self.roles = roles.into_iter().collect();
        self
    }

    /// Adds a custom attribute (e.g. `zone=eu-1`).
    #[must_use]
    pub fn with_attribute(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.attributes.insert(key.into(), value.into());
        self
    }

    /// Returns the node id.
    #[must_use]
    pub const fn id(&self) -> NodeId {
        self.id
    }

    /// Returns the node name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns the host, empty if unknown.
    #[must_use]
    pub fn host(&self) -> &str {
        &self.host
    }

    /// True if the node holds shard data.
    #[must_use]
    pub fn is_data(&self) -> bool {
        self.roles.contains(&NodeRole::Data)
    }

    /// Returns a custom attribute value.
    #[must_use]
    pub fn attribute(&self, key: &str) -> Option<&str> {
        self.attributes.get(key).map(String::as_str)
    }
}

/// The set of live nodes, keyed by id.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct DiscoveryNodes {
    nodes: BTreeMap<NodeId, DiscoveryNode>,
}

impl DiscoveryNodes {
    /// Creates an empty node set.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            nodes: BTreeMap::new(),
        }
    }

    /// Adds a node.
    #[must_use]
    pub fn with_node(mut self, node: DiscoveryNode) -> Self {
        self.nodes.insert(node.id(), node);
        self
    }

    /// Looks up a node.
    #[must_use]
    pub fn get(&self, id: NodeId) -> Option<&DiscoveryNode> {
        self.nodes.get(&id)
    }

    /// True if a data node with this id is live.
    #[must_use]
    pub fn is_live_data_node(&self, id: NodeId) -> bool {
        self.nodes.get(&id).is_some_and(DiscoveryNode::is_data)
    }

    /// Iterates data nodes in id order.
    pub fn data_nodes(&self) -> impl Iterator<Item = &DiscoveryNode> {
        self.nodes.values().filter(|n| n.is_data())
    }

    /// Iterates all nodes in id order.
    pub fn iter(&self) -> impl Iterator<Item = &DiscoveryNode> {
        self.nodes.values()
    }

    /// Number of nodes.
    #[must_use]
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    /// True if the set is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_data_nodes_filter() {
        let nodes = DiscoveryNodes::new()
            .with_node(DiscoveryNode::new(NodeId::new(1), "n1"))
            .with_node(
                DiscoveryNode::new(NodeId::new(2), "m1").with_roles([NodeRole::Master]),
            );

        let data: Vec<_> = nodes.data_nodes().map(DiscoveryNode::id).collect();
        assert_eq!(data, vec![NodeId::new(1)]);
        assert!(nodes.is_live_data_node(NodeId::new(1)));
        assert!(!nodes.is_live_data_node(NodeId::new(2)));
        assert!(!nodes.is_live_data_node(NodeId::new(3)));
    }

    #[test]
    fn test_attributes() {
        let node = DiscoveryNode::new(NodeId::new(1), "n1")
            .with_host("rack-7.dc1")
            .with_attribute("zone", "eu-1");
        assert_eq!(node.attribute("zone"), Some("eu-1"));
        assert_eq!(node.attribute("rack"), None);
        assert_eq!(node.host(), "rack-7.dc1");
    }
}
