//! The standard allocation deciders.
//!
//! Each decider is a pure constraint holding only its configuration; the
//! pass context supplies everything else. [`standard_deciders`] assembles
//! the canonical stack in evaluation order.

mod awareness;
mod disk_threshold;
mod enable;
mod filter;
mod max_retry;
mod replica_after_primary;
mod same_shard;
mod throttling;

pub use awareness::AwarenessAllocationDecider;
pub use disk_threshold::DiskThresholdDecider;
pub use enable::EnableAllocationDecider;
pub use filter::FilterAllocationDecider;
pub use max_retry::MaxRetryAllocationDecider;
pub use replica_after_primary::ReplicaAfterPrimaryActiveDecider;
pub use same_shard::SameShardAllocationDecider;
pub use throttling::ThrottlingAllocationDecider;

use crate::decider::{AllocationDecider, DeciderStack};
use crate::settings::AllocationSettings;

/// Builds the standard decider stack from cluster settings.
#[must_use]
pub fn standard_deciders(settings: &AllocationSettings) -> DeciderStack {
    let deciders: Vec<Box<dyn AllocationDecider>> = vec![
        Box::new(SameShardAllocationDecider::new(settings)),
        Box::new(AwarenessAllocationDecider::new(settings)),
        Box::new(FilterAllocationDecider::new(settings)),
        Box::new(DiskThresholdDecider::new(settings)),
        Box::new(ThrottlingAllocationDecider::new(settings)),
        Box::new(ReplicaAfterPrimaryActiveDecider::new()),
        Box::new(EnableAllocationDecider::new(settings)),
        Box::new(MaxRetryAllocationDecider::new(settings)),
    ];
    DeciderStack::new(deciders)
}
