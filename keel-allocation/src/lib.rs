//! Keel Allocation - the shard allocation engine.
//!
//! Given an immutable [`ClusterState`](keel_cluster::ClusterState) snapshot
//! and a batch of events (shards started or failed, nodes gone,
//! administrative commands), one allocation pass produces a new routing
//! table that moves the cluster toward a legal, balanced placement, together
//! with reconciled index metadata (in-sync allocation ids, primary terms).
//!
//! # Design
//!
//! - **Single writer**: [`AllocationService`] operations take `&mut self`;
//!   exactly one pass runs at a time and owns its working copy exclusively
//! - **Deterministic passes**: all randomness flows from a seeded RNG, the
//!   clock is captured once per pass, and command-mode reroutes never
//!   shuffle, so dry runs reproduce byte-identically
//! - **Constraint stack**: placement is legal iff the ordered decider stack
//!   agrees; `No` wins over `Throttle` wins over `Yes`
//! - **Crisp mutability boundary**: the mutable routing view lives only
//!   inside a pass; results are immutable and share unchanged parts with the
//!   input

#![forbid(unsafe_code)]
#![deny(missing_docs)]
#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]

mod balancer;
mod cluster_info;
mod commands;
mod context;
mod decider;
mod deciders;
mod error;
mod explain;
mod gateway;
pub mod invariants;
mod reconcile;
mod routing_nodes;
mod service;
mod settings;

pub use balancer::{BalancedShardsAllocator, BalancerSettings, ShardsAllocator};
pub use cluster_info::{ClusterInfo, ClusterInfoProvider, DiskUsage, EmptyClusterInfo};
pub use commands::{AllocationCommand, AllocationCommands, COMMANDS_PER_BATCH_MAX};
pub use context::RoutingAllocation;
pub use decider::{AllocationDecider, Decision, DeciderStack, DecisionStep, Ruling, Verdict};
pub use deciders::{
    standard_deciders, AwarenessAllocationDecider, DiskThresholdDecider, EnableAllocationDecider,
    FilterAllocationDecider, MaxRetryAllocationDecider, ReplicaAfterPrimaryActiveDecider,
    SameShardAllocationDecider, ThrottlingAllocationDecider,
};
pub use error::{AllocationError, AllocationResult};
pub use explain::{Explanation, RoutingExplanations};
pub use gateway::{EmptyStoreProvider, GatewayAllocator, ShardStoreProvider, StoreCopy, StoreFetch};
pub use routing_nodes::{RoutingNodes, UnassignedShards};
pub use service::{AllocationService, FailedShard, RerouteResult, StartedShard};
pub use settings::{AllocationSettings, EnableAllocation};
