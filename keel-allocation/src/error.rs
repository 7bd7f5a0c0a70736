//! Allocation error types.

use keel_core::NodeId;
use keel_cluster::ShardId;
use thiserror::Error;

/// Result type for allocation operations.
pub type AllocationResult<T> = Result<T, AllocationError>;

/// Errors that abort an allocation pass.
///
/// Only invalid input and invariant violations are errors; throttled or
/// undecidable placements are ordinary data carried on the unassigned shard.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum AllocationError {
    /// An event referenced an index the metadata does not know.
    #[error("unknown index: {index}")]
    UnknownIndex {
        /// The index name.
        index: String,
    },

    /// A command referenced a node that is not a live data node.
    #[error("unknown or non-data node: {node}")]
    UnknownNode {
        /// The node id.
        node: NodeId,
    },

    /// An event referenced a shard copy not present in the routing table.
    #[error("shard copy not found: {shard_id} [{detail}]")]
    ShardCopyNotFound {
        /// The shard address.
        shard_id: ShardId,
        /// What was looked for.
        detail: String,
    },

    /// The same shard copy appeared twice in one event batch.
    #[error("duplicate entry for shard {shard_id}")]
    DuplicateShardEntry {
        /// The shard address.
        shard_id: ShardId,
    },

    /// An event found a shard copy in the wrong state.
    #[error("shard {shard_id} is in the wrong state: {detail}")]
    InvalidShardState {
        /// The shard address.
        shard_id: ShardId,
        /// What state was required.
        detail: String,
    },

    /// More commands in one batch than the configured limit.
    #[error("too many commands in one batch: {count} (max {max})")]
    TooManyCommands {
        /// Commands in the batch.
        count: usize,
        /// Maximum allowed.
        max: usize,
    },

    /// An administrative command failed a precondition or a decider.
    #[error("command [{command}] rejected: {reason}")]
    CommandRejected {
        /// Description of the command.
        command: String,
        /// Why it was rejected.
        reason: String,
    },

    /// A forced-primary command was issued without acknowledging data loss.
    #[error("allocating {shard_id} would discard data; set accept_data_loss to proceed")]
    DataLossNotAcknowledged {
        /// The shard address.
        shard_id: ShardId,
    },

    /// Post-pass validation found a broken routing invariant. Programming
    /// error; the caller must reject the cluster-state update.
    #[error("routing invariant violated: {detail}")]
    InvariantViolation {
        /// Which invariant broke.
        detail: String,
    },
}

#[cfg(test)]
mod tests {
    use super::*;
    use keel_cluster::Index;
    use keel_core::ShardNumber;
    use uuid::Uuid;

    #[test]
    fn test_display() {
        let shard_id = ShardId::new(Index::new("logs", Uuid::from_u128(1)), ShardNumber::new(2));
        let err = AllocationError::DuplicateShardEntry { shard_id };
        assert_eq!(format!("{err}"), "duplicate entry for shard [logs][2]");
    }

    #[test]
    fn test_command_rejected_display() {
        let err = AllocationError::CommandRejected {
            command: "move [logs][0] from node-1 to node-2".to_string(),
            reason: "shard is not started".to_string(),
        };
        let msg = format!("{err}");
        assert!(msg.contains("move"));
        assert!(msg.contains("not started"));
    }
}
