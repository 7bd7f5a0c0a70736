//! Unassigned-shard bookkeeping: why a shard has no node, since when, and
//! what the last placement attempt concluded.

use std::fmt;

/// Why a shard became unassigned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnassignedReason {
    /// The index was just created.
    IndexCreated,
    /// The cluster restarted and routing is being recovered.
    ClusterRecovered,
    /// The replica count of the index was increased.
    ReplicaAdded,
    /// A previous allocation attempt failed on the assigned node.
    AllocationFailed,
    /// The node holding the shard left the cluster.
    NodeLeft,
    /// An operator cancelled the shard's recovery or relocation.
    RerouteCancelled,
    /// The shard was forcibly reset to recover from an inconsistent state.
    Reinitialized,
    /// The shard's primary failed while this copy depended on it.
    PrimaryFailed,
    /// An operator forced an empty primary, discarding known copies.
    ForcedEmptyPrimary,
}

impl fmt::Display for UnassignedReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::IndexCreated => "INDEX_CREATED",
            Self::ClusterRecovered => "CLUSTER_RECOVERED",
            Self::ReplicaAdded => "REPLICA_ADDED",
            Self::AllocationFailed => "ALLOCATION_FAILED",
            Self::NodeLeft => "NODE_LEFT",
            Self::RerouteCancelled => "REROUTE_CANCELLED",
            Self::Reinitialized => "REINITIALIZED",
            Self::PrimaryFailed => "PRIMARY_FAILED",
            Self::ForcedEmptyPrimary => "FORCED_EMPTY_PRIMARY",
        };
        f.write_str(s)
    }
}

/// Outcome of the most recent attempt to place an unassigned shard.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AllocationStatus {
    /// No placement attempt has been made yet.
    #[default]
    NoAttempt,
    /// Every candidate node was refused by the deciders.
    DecidersNo,
    /// Placement was possible but throttled; retried on a later pass.
    Throttled,
    /// Shard-store information is still being fetched.
    FetchingShardData,
    /// No node holds an in-sync copy of the shard's data.
    NoValidShardCopy,
    /// Placement is intentionally delayed, waiting for a node to return.
    DelayedAllocation,
}

impl fmt::Display for AllocationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::NoAttempt => "NO_ATTEMPT",
            Self::DecidersNo => "DECIDERS_NO",
            Self::Throttled => "THROTTLED",
            Self::FetchingShardData => "FETCHING_SHARD_DATA",
            Self::NoValidShardCopy => "NO_VALID_SHARD_COPY",
            Self::DelayedAllocation => "DELAYED_ALLOCATION",
        };
        f.write_str(s)
    }
}

/// A pass-wide clock snapshot.
///
/// Captured exactly once per allocation pass by the caller; every timestamp
/// and delay computation inside the pass reads from here, never from a wall
/// clock, so a pass is reproducible.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct AllocationClock {
    /// Monotonic nanoseconds, used for delay arithmetic.
    pub nanos: u64,
    /// Wall-clock milliseconds, recorded for operators.
    pub millis: u64,
}

impl AllocationClock {
    /// Creates a clock snapshot.
    #[must_use]
    pub const fn new(nanos: u64, millis: u64) -> Self {
        Self { nanos, millis }
    }
}

/// Everything known about why and since when a shard is unassigned.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnassignedInfo {
    /// Why the shard became unassigned.
    pub reason: UnassignedReason,
    /// Free-form detail, e.g. the failure message of a failed recovery.
    pub message: Option<String>,
    /// How many allocation attempts for this shard have failed in a row.
    pub failed_allocations: u32,
    /// Monotonic nanos at which the shard became unassigned.
    pub at_nanos: u64,
    /// Wall-clock millis at which the shard became unassigned.
    pub at_millis: u64,
    /// True while the shard is held back by `delayed_node_left_timeout`.
    pub delayed: bool,
    /// Outcome of the most recent placement attempt.
    pub last_allocation_status: AllocationStatus,
}

impl UnassignedInfo {
    /// Creates the info recorded when a shard first becomes unassigned.
    #[must_use]
    pub fn new(reason: UnassignedReason, message: Option<String>, clock: AllocationClock) -> Self {
        Self {
            reason,
            message,
            failed_allocations: 0,
            at_nanos: clock.nanos,
            at_millis: clock.millis,
            delayed: false,
            last_allocation_status: AllocationStatus::NoAttempt,
        }
    }

    /// Marks the info as delayed by `delayed_node_left_timeout`.
    #[must_use]
    pub const fn delayed(mut self, delayed: bool) -> Self {
        self.delayed = delayed;
        self
    }

    /// Sets the consecutive-failure counter.
    #[must_use]
    pub const fn with_failed_allocations(mut self, failed: u32) -> Self {
        self.failed_allocations = failed;
        self
    }

    /// Returns a copy with an updated last-attempt status.
    #[must_use]
    pub fn with_status(&self, status: AllocationStatus) -> Self {
        let mut info = self.clone();
        info.last_allocation_status = status;
        info
    }

    /// Nanoseconds of delay left before the shard may be placed again.
    ///
    /// Zero once the timeout has elapsed (or if the shard is not delayed).
    #[must_use]
    pub const fn remaining_delay_nanos(&self, now_nanos: u64, timeout_nanos: u64) -> u64 {
        if !self.delayed {
            return 0;
        }
        timeout_nanos.saturating_sub(now_nanos.saturating_sub(self.at_nanos))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_info_defaults() {
        let info = UnassignedInfo::new(
            UnassignedReason::IndexCreated,
            None,
            AllocationClock::new(10, 20),
        );
        assert_eq!(info.failed_allocations, 0);
        assert!(!info.delayed);
        assert_eq!(info.last_allocation_status, AllocationStatus::NoAttempt);
        assert_eq!(info.at_nanos, 10);
        assert_eq!(info.at_millis, 20);
    }

    #[test]
    fn test_remaining_delay() {
        let info = UnassignedInfo::new(
            UnassignedReason::NodeLeft,
            None,
            AllocationClock::new(1_000, 0),
        )
        .delayed(true);

        // Half the timeout elapsed.
        assert_eq!(info.remaining_delay_nanos(1_500, 1_000), 500);
        // Exactly at the boundary.
        assert_eq!(info.remaining_delay_nanos(2_000, 1_000), 0);
        // Past the boundary saturates at zero.
        assert_eq!(info.remaining_delay_nanos(9_000, 1_000), 0);
    }

    #[test]
    fn test_remaining_delay_not_delayed() {
        let info = UnassignedInfo::new(
            UnassignedReason::NodeLeft,
            None,
            AllocationClock::new(1_000, 0),
        );
        assert_eq!(info.remaining_delay_nanos(1_000, 1_000), 0);
    }

    #[test]
    fn test_with_status() {
        let info = UnassignedInfo::new(
            UnassignedReason::AllocationFailed,
            Some("boom".to_string()),
            AllocationClock::default(),
        )
        .with_failed_allocations(3);

        let updated = info.with_status(AllocationStatus::Throttled);
        assert_eq!(updated.failed_allocations, 3);
        assert_eq!(updated.last_allocation_status, AllocationStatus::Throttled);
        assert_eq!(updated.message.as_deref(), Some("boom"));
    }
}
