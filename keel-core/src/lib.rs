//! Keel Core - Strongly-typed identifiers and bounds for the Keel cluster.
//!
//! This crate provides the identifier types and workspace-wide limits shared
//! by the cluster-state model and the allocation engine. It deliberately
//! carries no I/O, no clocks, and no randomness: those are injected at the
//! boundaries by callers.
//!
//! # Design Principles
//!
//! - **Strongly-typed IDs**: Prevent mixing up a node id with a shard number
//! - **Explicit limits**: Every collection the allocator walks is bounded
//! - **No unsafe code**: Safety > Performance

#![forbid(unsafe_code)]
#![deny(missing_docs)]
#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]

mod error;
mod limits;
mod types;

pub use error::{Error, Result};
pub use limits::Limits;
pub use types::{NodeId, ShardNumber};
