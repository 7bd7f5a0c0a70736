//! Administrative allocation commands.
//!
//! Commands execute against the working copy before the regular reroute
//! runs. Execution is deterministic (the unassigned queue keeps its order)
//! and fully explained (deciders run in debug mode). A command that would
//! violate a routing invariant fails before any mutation of its own; in
//! non-explain mode the first rejection aborts the batch and the discarded
//! working copy guarantees none of it took effect.

use std::fmt;

use keel_core::NodeId;
use keel_cluster::{ShardId, UnassignedInfo, UnassignedReason};

use crate::context::RoutingAllocation;
use crate::decider::{Decision, DecisionStep, Verdict};
use crate::error::{AllocationError, AllocationResult};

/// Maximum commands in one batch.
pub const COMMANDS_PER_BATCH_MAX: usize = 64;

/// One administrative command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AllocationCommand {
    /// Allocates an unassigned replica to a node, subject to the deciders.
    AllocateReplica {
        /// Index name.
        index: String,
        /// Shard number.
        shard: u32,
        /// Target node.
        node: NodeId,
    },
    /// Forces a primary back from a node holding a stale copy. Loses the
    /// writes the stale copy missed; requires explicit acknowledgement.
    AllocateStalePrimary {
        /// Index name.
        index: String,
        /// Shard number.
        shard: u32,
        /// Target node.
        node: NodeId,
        /// Operator acknowledges the data loss.
        accept_data_loss: bool,
    },
    /// Forces an empty primary, discarding every known copy. Requires
    /// explicit acknowledgement.
    AllocateEmptyPrimary {
        /// Index name.
        index: String,
        /// Shard number.
        shard: u32,
        /// Target node.
        node: NodeId,
        /// Operator acknowledges the data loss.
        accept_data_loss: bool,
    },
    /// Relocates a started shard to another node.
    Move {
        /// Index name.
        index: String,
        /// Shard number.
        shard: u32,
        /// Node the shard is started on.
        from_node: NodeId,
        /// Node to move it to.
        to_node: NodeId,
    },
    /// Cancels an initialization or relocation.
    Cancel {
        /// Index name.
        index: String,
        /// Shard number.
        shard: u32,
        /// Node holding the copy to cancel.
        node: NodeId,
        /// Allow cancelling a primary copy.
        allow_primary: bool,
    },
}

impl AllocationCommand {
    fn execute(&self, allocation: &mut RoutingAllocation<'_>) -> AllocationResult<()> {
        match self {
            Self::AllocateReplica { index, shard, node } => {
                self.allocate_replica(allocation, index, *shard, *node)
            }
            Self::AllocateStalePrimary {
                index,
                shard,
                node,
                accept_data_loss,
            } => self.allocate_primary(allocation, index, *shard, *node, *accept_data_loss, false),
            Self::AllocateEmptyPrimary {
                index,
                shard,
                node,
                accept_data_loss,
            } => self.allocate_primary(allocation, index, *shard, *node, *accept_data_loss, true),
            Self::Move {
                index,
                shard,
                from_node,
                to_node,
            } => self.move_shard(allocation, index, *shard, *from_node, *to_node),
            Self::Cancel {
                index,
                shard,
                node,
                allow_primary,
            } => self.cancel(allocation, index, *shard, *node, *allow_primary),
        }
    }

    fn allocate_replica(
        &self,
        allocation: &mut RoutingAllocation<'_>,
        index: &str,
        shard: u32,
        node: NodeId,
    ) -> AllocationResult<()> {
        let shard_id = resolve_shard_id(allocation, index, shard)?;
        require_data_node(allocation, node)?;

        if allocation.routing_nodes().active_primary(&shard_id).is_none() {
            return Err(self.rejected("the primary of this shard is not active"));
        }
        let Some(replica) = allocation
            .routing_nodes_mut()
            .unassigned_mut()
            .take_first(|s| s.shard_id() == &shard_id && !s.primary())
        else {
            return Err(self.rejected("no unassigned replica for this shard"));
        };

        let verdict = allocation.decide_allocate(&replica, node);
        allocation.explain(self.to_string(), &verdict);
        if verdict.decision == Decision::Yes {
            allocation
                .routing_nodes_mut()
                .initialize_shard(replica, node, None);
            Ok(())
        } else {
            let reason = verdict.summary();
            allocation.routing_nodes_mut().unassigned_mut().push(replica);
            Err(self.rejected(reason))
        }
    }

    fn allocate_primary(
        &self,
        allocation: &mut RoutingAllocation<'_>,
        index: &str,
        shard: u32,
        node: NodeId,
        accept_data_loss: bool,
        empty: bool,
    ) -> AllocationResult<()> {
        let shard_id = resolve_shard_id(allocation, index, shard)?;
        require_data_node(allocation, node)?;

        if !accept_data_loss {
            return Err(AllocationError::DataLossNotAcknowledged { shard_id });
        }

        let has_history = allocation
            .metadata()
            .index(index)
            .is_some_and(|meta| !meta.in_sync_ids(shard_id.number()).is_empty());
        if !empty && !has_history {
            return Err(self.rejected(
                "no previous allocation history; use allocate_empty_primary instead",
            ));
        }

        let Some(mut primary) = allocation
            .routing_nodes_mut()
            .unassigned_mut()
            .take_first(|s| s.shard_id() == &shard_id && s.primary())
        else {
            return Err(self.rejected("no unassigned primary for this shard"));
        };

        // Forced primaries outrank placement policy, but never the
        // same-shard rule: one copy per node, and per host when configured.
        let verdict = allocation.decide_forced_allocate(&primary, node);
        allocation.explain(self.to_string(), &verdict);
        if verdict.decision != Decision::Yes {
            let reason = verdict.summary();
            allocation.routing_nodes_mut().unassigned_mut().push(primary);
            return Err(self.rejected(reason));
        }

        if empty {
            primary.update_unassigned_info(UnassignedInfo::new(
                UnassignedReason::ForcedEmptyPrimary,
                Some("forced empty primary by operator command".to_string()),
                allocation.clock(),
            ));
        }

        allocation
            .routing_nodes_mut()
            .initialize_shard(primary, node, None);
        Ok(())
    }

    fn move_shard(
        &self,
        allocation: &mut RoutingAllocation<'_>,
        index: &str,
        shard: u32,
        from_node: NodeId,
        to_node: NodeId,
    ) -> AllocationResult<()> {
        let shard_id = resolve_shard_id(allocation, index, shard)?;
        require_data_node(allocation, to_node)?;

        let Some((allocation_id, started)) = allocation
            .routing_nodes()
            .assigned(&shard_id)
            .find(|s| s.current_node() == Some(from_node))
            .and_then(|s| Some((s.allocation_id()?.id(), s.is_started())))
        else {
            return Err(self.rejected("no copy of this shard on the source node"));
        };
        if !started {
            return Err(self.rejected("only started shards can move"));
        }

        let Some(moving) = allocation
            .routing_nodes()
            .get_by_allocation(&shard_id, allocation_id)
            .cloned()
        else {
            return Err(self.rejected("no copy of this shard on the source node"));
        };
        let verdict = allocation.decide_allocate(&moving, to_node);
        allocation.explain(self.to_string(), &verdict);
        if verdict.decision != Decision::Yes {
            return Err(self.rejected(verdict.summary()));
        }

        allocation
            .routing_nodes_mut()
            .relocate_shard(&shard_id, allocation_id, to_node, None);
        Ok(())
    }

    fn cancel(
        &self,
        allocation: &mut RoutingAllocation<'_>,
        index: &str,
        shard: u32,
        node: NodeId,
        allow_primary: bool,
    ) -> AllocationResult<()> {
        let shard_id = resolve_shard_id(allocation, index, shard)?;

        let Some(copy) = allocation
            .routing_nodes()
            .assigned(&shard_id)
            .find(|s| s.current_node() == Some(node))
            .cloned()
        else {
            return Err(self.rejected("no copy of this shard on that node"));
        };
        if copy.primary() && !allow_primary {
            return Err(self.rejected("cancelling a primary requires allow_primary"));
        }
        let Some(allocation_id) = copy.allocation_id() else {
            return Err(self.rejected("copy has no allocation id"));
        };

        allocation.explain(self.to_string(), &Verdict::yes());
        if copy.is_relocating() {
            allocation
                .routing_nodes_mut()
                .cancel_relocation(&shard_id, allocation_id.id());
        } else if copy.is_relocation_target() {
            let Some(source_id) = allocation_id.relocation_id() else {
                return Err(self.rejected("relocation target without a source"));
            };
            allocation
                .routing_nodes_mut()
                .cancel_relocation(&shard_id, source_id);
        } else if copy.is_initializing() {
            let info = UnassignedInfo::new(
                UnassignedReason::RerouteCancelled,
                Some(format!("cancelled on {node} by operator command")),
                allocation.clock(),
            );
            allocation
                .routing_nodes_mut()
                .fail_shard(&shard_id, allocation_id.id(), info);
        } else {
            return Err(self.rejected(
                "shard is started; only initialization or relocation can be cancelled",
            ));
        }
        Ok(())
    }

    fn rejected(&self, reason: impl Into<String>) -> AllocationError {
        AllocationError::CommandRejected {
            command: self.to_string(),
            reason: reason.into(),
        }
    }
}

impl fmt::Display for AllocationCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::AllocateReplica { index, shard, node } => {
                write!(f, "allocate_replica [{index}][{shard}] on {node}")
            }
            Self::AllocateStalePrimary {
                index, shard, node, ..
            } => write!(f, "allocate_stale_primary [{index}][{shard}] on {node}"),
            Self::AllocateEmptyPrimary {
                index, shard, node, ..
            } => write!(f, "allocate_empty_primary [{index}][{shard}] on {node}"),
            Self::Move {
                index,
                shard,
                from_node,
                to_node,
            } => write!(f, "move [{index}][{shard}] from {from_node} to {to_node}"),
            Self::Cancel {
                index, shard, node, ..
            } => write!(f, "cancel [{index}][{shard}] on {node}"),
        }
    }
}

/// An ordered batch of commands.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct AllocationCommands {
    commands: Vec<AllocationCommand>,
}

impl AllocationCommands {
    /// Creates a batch.
    ///
    /// # Errors
    /// Returns an error if the batch exceeds [`COMMANDS_PER_BATCH_MAX`].
    pub fn new(commands: Vec<AllocationCommand>) -> AllocationResult<Self> {
        if commands.len() > COMMANDS_PER_BATCH_MAX {
            return Err(AllocationError::TooManyCommands {
                count: commands.len(),
                max: COMMANDS_PER_BATCH_MAX,
            });
        }
        Ok(Self { commands })
    }

    /// Number of commands.
    #[must_use]
    pub fn len(&self) -> usize {
        self.commands.len()
    }

    /// True if the batch is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.commands.is_empty()
    }

    /// Executes the batch in order.
    ///
    /// In explain mode rejections are recorded in the pass explanations and
    /// execution continues; otherwise the first rejection aborts the batch.
    ///
    /// # Errors
    /// Returns the first command error in non-explain mode.
    pub fn execute(
        &self,
        allocation: &mut RoutingAllocation<'_>,
        explain: bool,
    ) -> AllocationResult<()> {
        for command in &self.commands {
            match command.execute(allocation) {
                Ok(()) => {}
                Err(error) if explain => {
                    let verdict = Verdict {
                        decision: Decision::No,
                        steps: vec![DecisionStep {
                            decider: "command",
                            decision: Decision::No,
                            message: error.to_string(),
                        }],
                    };
                    allocation.explain(command.to_string(), &verdict);
                }
                Err(error) => return Err(error),
            }
        }
        Ok(())
    }
}

fn resolve_shard_id(
    allocation: &RoutingAllocation<'_>,
    index: &str,
    shard: u32,
) -> AllocationResult<ShardId> {
    let Some(meta) = allocation.metadata().index(index) else {
        return Err(AllocationError::UnknownIndex {
            index: index.to_string(),
        });
    };
    let shard_id = ShardId::new(meta.index().clone(), keel_core::ShardNumber::new(shard));
    if shard >= meta.number_of_shards() {
        return Err(AllocationError::ShardCopyNotFound {
            shard_id,
            detail: format!("index has {} shards", meta.number_of_shards()),
        });
    }
    Ok(shard_id)
}

fn require_data_node(
    allocation: &RoutingAllocation<'_>,
    node: NodeId,
) -> AllocationResult<()> {
    if allocation.nodes().is_live_data_node(node) {
        Ok(())
    } else {
        Err(AllocationError::UnknownNode { node })
    }
}
