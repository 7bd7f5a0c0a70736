//! Keel Cluster - the immutable cluster-state model.
//!
//! This crate defines the value types a Keel master works with: indices and
//! their shards, the routing table mapping shard copies to nodes, per-index
//! metadata (in-sync allocation ids, primary terms), the live node set, and
//! derived cluster health.
//!
//! # Design
//!
//! - **Immutable snapshots**: `ClusterState` and everything it holds are
//!   values; mutation happens only inside an allocation pass on a working
//!   copy owned by the allocator
//! - **Assert-guarded transitions**: `ShardRouting` state changes panic on
//!   misuse, the same way a shard transfer refuses an out-of-order step
//! - **Cheap identity**: the routing table and metadata are shared through
//!   `Arc`, so an unchanged pass can hand back the very same objects

#![forbid(unsafe_code)]
#![deny(missing_docs)]
#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]

mod health;
mod index;
mod metadata;
mod node;
mod routing_table;
mod shard;
mod state;
mod unassigned;

pub use health::{ClusterHealthStatus, ClusterStateHealth, HealthChange};
pub use index::{Index, ShardId};
pub use metadata::{AllocationFilters, IndexMetaData, IndexSettings, MetaData};
pub use node::{DiscoveryNode, DiscoveryNodes, NodeRole};
pub use routing_table::{IndexRoutingTable, RoutingTable, RoutingTableBuilder, ShardTable};
pub use shard::{AllocationId, ShardRouting, ShardState};
pub use state::ClusterState;
pub use unassigned::{AllocationClock, AllocationStatus, UnassignedInfo, UnassignedReason};
