//! Shard routing entries and their state machine.
//!
//! A `ShardRouting` is the elementary unit of the routing table: one copy of
//! one shard, where it lives, and what it is doing. Transitions are methods
//! with assert-guarded preconditions; an out-of-order transition is a
//! programming error and panics.
//!
//! # Lifecycle
//!
//! `Unassigned → Initializing → Started`, with
//! `Started → Relocating → (target becomes Started, source is removed)` and
//! any assigned state `→ Unassigned` on failure or node death.

use std::fmt;

use keel_core::NodeId;
use uuid::Uuid;

use crate::index::ShardId;
use crate::unassigned::UnassignedInfo;

/// Identifier of one incarnation of a shard copy.
///
/// Fresh per initialization, so a stale on-disk copy can be told apart from
/// the copy the cluster currently trusts. During a relocation the source and
/// target carry mirrored pairs: the source holds `{ id: X, relocation_id: Y }`
/// and the target `{ id: Y, relocation_id: X }`, which lets the target be
/// promoted atomically when the handoff completes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct AllocationId {
    id: Uuid,
    relocation_id: Option<Uuid>,
}

impl AllocationId {
    /// Creates a plain (non-relocating) allocation id.
    #[must_use]
    pub const fn new(id: Uuid) -> Self {
        Self {
            id,
            relocation_id: None,
        }
    }

    /// Reconstructs one member of a relocation pair from raw parts.
    #[must_use]
    pub const fn with_relocation(id: Uuid, relocation_id: Uuid) -> Self {
        Self {
            id,
            relocation_id: Some(relocation_id),
        }
    }

    /// Returns the current incarnation id.
    #[must_use]
    pub const fn id(&self) -> Uuid {
        self.id
    }

    /// Returns the paired relocation id, if a relocation is in flight.
    #[must_use]
    pub const fn relocation_id(&self) -> Option<Uuid> {
        self.relocation_id
    }

    /// Splits this id into the (source, target) pair of a relocation.
    ///
    /// # Panics
    /// Panics if a relocation is already in flight.
    #[must_use]
    pub fn begin_relocation(self, target_id: Uuid) -> (Self, Self) {
        assert!(
            self.relocation_id.is_none(),
            "allocation id is already relocating"
        );
        let source = Self {
            id: self.id,
            relocation_id: Some(target_id),
        };
        let target = Self {
            id: target_id,
            relocation_id: Some(self.id),
        };
        (source, target)
    }

    /// Collapses a relocation pair member back to a plain id.
    ///
    /// Used both when a target completes (keeps the target's own id) and
    /// when a source cancels (keeps the source's own id).
    ///
    /// # Panics
    /// Panics if no relocation is in flight.
    #[must_use]
    pub fn finish_relocation(self) -> Self {
        assert!(
            self.relocation_id.is_some(),
            "allocation id is not relocating"
        );
        Self {
            id: self.id,
            relocation_id: None,
        }
    }
}

impl fmt::Display for AllocationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.relocation_id {
            Some(relocation) => write!(f, "{} (relocating {relocation})", self.id),
            None => write!(f, "{}", self.id),
        }
    }
}

/// State of one shard copy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShardState {
    /// Not allocated to any node.
    Unassigned,
    /// Allocated to a node, recovering its data.
    Initializing,
    /// Fully recovered and serving.
    Started,
    /// Started, and handing off to a paired initializing target.
    Relocating,
}

impl ShardState {
    /// Returns true for states that count as an active copy (serving reads).
    #[must_use]
    pub const fn is_active(self) -> bool {
        matches!(self, Self::Started | Self::Relocating)
    }
}

impl fmt::Display for ShardState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Unassigned => "UNASSIGNED",
            Self::Initializing => "INITIALIZING",
            Self::Started => "STARTED",
            Self::Relocating => "RELOCATING",
        };
        f.write_str(s)
    }
}

/// One copy of one shard: its address, role, state, and location.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShardRouting {
    shard_id: ShardId,
    primary: bool,
    state: ShardState,
    current_node: Option<NodeId>,
    relocating_node: Option<NodeId>,
    allocation_id: Option<AllocationId>,
    unassigned_info: Option<UnassignedInfo>,
    expected_size: Option<u64>,
}

impl ShardRouting {
    /// Creates an unassigned shard routing.
    #[must_use]
    pub const fn new_unassigned(shard_id: ShardId, primary: bool, info: UnassignedInfo) -> Self {
        Self {
            shard_id,
            primary,
            state: ShardState::Unassigned,
            current_node: None,
            relocating_node: None,
            allocation_id: None,
            unassigned_info: Some(info),
            expected_size: None,
        }
    }

    /// Restores an assigned routing entry from a persisted table.
    ///
    /// # Panics
    /// Panics if the field combination violates the state invariants, e.g. an
    /// assigned state without a node or allocation id.
    #[must_use]
    pub fn restore(
        shard_id: ShardId,
        primary: bool,
        state: ShardState,
        current_node: NodeId,
        relocating_node: Option<NodeId>,
        allocation_id: AllocationId,
        unassigned_info: Option<UnassignedInfo>,
    ) -> Self {
        let routing = Self {
            shard_id,
            primary,
            state,
            current_node: Some(current_node),
            relocating_node,
            allocation_id: Some(allocation_id),
            unassigned_info,
            expected_size: None,
        };
        routing.assert_consistent();
        routing
    }

    /// Returns the shard address.
    #[must_use]
    pub const fn shard_id(&self) -> &ShardId {
        &self.shard_id
    }

    /// True if this copy is the primary.
    #[must_use]
    pub const fn primary(&self) -> bool {
        self.primary
    }

    /// Returns the copy's state.
    #[must_use]
    pub const fn state(&self) -> ShardState {
        self.state
    }

    /// True if the copy is unassigned.
    #[must_use]
    pub const fn is_unassigned(&self) -> bool {
        matches!(self.state, ShardState::Unassigned)
    }

    /// True if the copy is initializing.
    #[must_use]
    pub const fn is_initializing(&self) -> bool {
        matches!(self.state, ShardState::Initializing)
    }

    /// True if the copy is started.
    #[must_use]
    pub const fn is_started(&self) -> bool {
        matches!(self.state, ShardState::Started)
    }

    /// True if the copy is the source half of a relocation.
    #[must_use]
    pub const fn is_relocating(&self) -> bool {
        matches!(self.state, ShardState::Relocating)
    }

    /// True if the copy counts as active (started or relocating).
    #[must_use]
    pub const fn is_active(&self) -> bool {
        self.state.is_active()
    }

    /// True if the copy is the initializing target half of a relocation.
    #[must_use]
    pub const fn is_relocation_target(&self) -> bool {
        matches!(self.state, ShardState::Initializing) && self.relocating_node.is_some()
    }

    /// Node the copy currently lives on (None iff unassigned).
    #[must_use]
    pub const fn current_node(&self) -> Option<NodeId> {
        self.current_node
    }

    /// The other end of an in-flight relocation: the target node for a
    /// relocating source, the source node for an initializing target.
    #[must_use]
    pub const fn relocating_node(&self) -> Option<NodeId> {
        self.relocating_node
    }

    /// The copy's allocation id (None iff unassigned).
    #[must_use]
    pub const fn allocation_id(&self) -> Option<AllocationId> {
        self.allocation_id
    }

    /// Why the copy is unassigned (or how its last assignment began).
    #[must_use]
    pub const fn unassigned_info(&self) -> Option<&UnassignedInfo> {
        self.unassigned_info.as_ref()
    }

    /// Size hint for the balancer, in bytes.
    #[must_use]
    pub const fn expected_size(&self) -> Option<u64> {
        self.expected_size
    }

    /// True if `other` is the same incarnation of the same shard.
    #[must_use]
    pub fn is_same_allocation(&self, other: &Self) -> bool {
        self.shard_id == other.shard_id
            && match (self.allocation_id, other.allocation_id) {
                (Some(a), Some(b)) => a.id() == b.id(),
                _ => false,
            }
    }

    /// Replaces the unassigned info.
    ///
    /// # Panics
    /// Panics if the shard is not unassigned.
    pub fn update_unassigned_info(&mut self, info: UnassignedInfo) {
        assert!(
            self.is_unassigned(),
            "only unassigned shards carry mutable unassigned info"
        );
        self.unassigned_info = Some(info);
    }

    /// Unassigned → Initializing on `node` with a fresh allocation id.
    ///
    /// # Panics
    /// Panics if the shard is not unassigned.
    pub fn initialize(&mut self, node: NodeId, allocation_id: Uuid, expected_size: Option<u64>) {
        assert!(self.is_unassigned(), "only unassigned shards can initialize");
        self.state = ShardState::Initializing;
        self.current_node = Some(node);
        self.allocation_id = Some(AllocationId::new(allocation_id));
        self.expected_size = expected_size;
    }

    /// Initializing → Started. Drops recovery bookkeeping.
    ///
    /// # Panics
    /// Panics if the shard is not initializing.
    pub fn move_to_started(&mut self) {
        assert!(self.is_initializing(), "only initializing shards can start");
        if let Some(allocation_id) = self.allocation_id {
            if allocation_id.relocation_id().is_some() {
                // Relocation target completing the handoff.
                self.allocation_id = Some(allocation_id.finish_relocation());
            }
        }
        self.relocating_node = None;
        self.state = ShardState::Started;
        self.unassigned_info = None;
        self.expected_size = None;
    }

    /// Started → Relocating towards `target_node`; returns the paired
    /// initializing target entry to be placed on that node.
    ///
    /// # Panics
    /// Panics if the shard is not started, or targets its own node.
    #[must_use]
    pub fn begin_relocation(
        &mut self,
        target_node: NodeId,
        target_id: Uuid,
        expected_size: Option<u64>,
    ) -> Self {
        assert!(self.is_started(), "only started shards can relocate");
        let Some(source_node) = self.current_node else {
            unreachable!("started shard must have a node")
        };
        assert!(
            source_node != target_node,
            "relocation target must differ from the current node"
        );
        let Some(allocation_id) = self.allocation_id else {
            unreachable!("started shard must have an allocation id")
        };

        let (source_id, target_allocation) = allocation_id.begin_relocation(target_id);
        self.state = ShardState::Relocating;
        self.relocating_node = Some(target_node);
        self.allocation_id = Some(source_id);
        self.expected_size = expected_size;

        Self {
            shard_id: self.shard_id.clone(),
            primary: self.primary,
            state: ShardState::Initializing,
            current_node: Some(target_node),
            relocating_node: Some(source_node),
            allocation_id: Some(target_allocation),
            unassigned_info: None,
            expected_size,
        }
    }

    /// Materializes the initializing target half of a relocating source.
    ///
    /// The routing table stores only the source entry; the allocator's
    /// working view derives the target from it.
    ///
    /// # Panics
    /// Panics if the shard is not relocating.
    #[must_use]
    pub fn build_relocation_target(&self) -> Self {
        assert!(
            self.is_relocating(),
            "only relocating shards have a target half"
        );
        let Some(allocation_id) = self.allocation_id else {
            unreachable!("relocating shard must have an allocation id")
        };
        let Some(relocation_id) = allocation_id.relocation_id() else {
            unreachable!("relocating shard must carry a relocation id")
        };
        Self {
            shard_id: self.shard_id.clone(),
            primary: self.primary,
            state: ShardState::Initializing,
            current_node: self.relocating_node,
            relocating_node: self.current_node,
            allocation_id: Some(AllocationId::with_relocation(
                relocation_id,
                allocation_id.id(),
            )),
            unassigned_info: None,
            expected_size: self.expected_size,
        }
    }

    /// Relocating → Started. The caller removes the paired target.
    ///
    /// # Panics
    /// Panics if the shard is not relocating.
    pub fn cancel_relocation(&mut self) {
        assert!(self.is_relocating(), "only relocating shards can cancel");
        let Some(allocation_id) = self.allocation_id else {
            unreachable!("relocating shard must have an allocation id")
        };
        self.state = ShardState::Started;
        self.relocating_node = None;
        self.allocation_id = Some(allocation_id.finish_relocation());
        self.expected_size = None;
    }

    /// Any assigned state → Unassigned, recording why.
    ///
    /// # Panics
    /// Panics if the shard is already unassigned.
    pub fn move_to_unassigned(&mut self, info: UnassignedInfo) {
        assert!(
            !self.is_unassigned(),
            "shard is already unassigned"
        );
        self.state = ShardState::Unassigned;
        self.current_node = None;
        self.relocating_node = None;
        self.allocation_id = None;
        self.expected_size = None;
        self.unassigned_info = Some(info);
    }

    /// Promotes a replica to primary.
    ///
    /// # Panics
    /// Panics if the shard is already a primary.
    pub fn promote_to_primary(&mut self) {
        assert!(!self.primary, "shard is already a primary");
        self.primary = true;
    }

    /// Demotes a primary to replica.
    ///
    /// # Panics
    /// Panics if the shard is not a primary.
    pub fn demote_to_replica(&mut self) {
        assert!(self.primary, "shard is not a primary");
        self.primary = false;
    }

    fn assert_consistent(&self) {
        match self.state {
            ShardState::Unassigned => {
                assert!(self.current_node.is_none(), "unassigned shard has a node");
                assert!(self.allocation_id.is_none(), "unassigned shard has an id");
            }
            ShardState::Initializing | ShardState::Started => {
                assert!(self.current_node.is_some(), "assigned shard lacks a node");
                assert!(self.allocation_id.is_some(), "assigned shard lacks an id");
            }
            ShardState::Relocating => {
                assert!(self.current_node.is_some(), "relocating shard lacks a node");
                assert!(
                    self.relocating_node.is_some(),
                    "relocating shard lacks a target"
                );
                assert!(self.allocation_id.is_some(), "relocating shard lacks an id");
            }
        }
    }
}

impl fmt::Display for ShardRouting {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let role = if self.primary { "P" } else { "R" };
        write!(f, "{}[{role}][{}]", self.shard_id, self.state)?;
        if let Some(node) = self.current_node {
            write!(f, " on {node}")?;
        }
        if let Some(target) = self.relocating_node {
            write!(f, " <-> {target}")?;
        }
        Ok(())
    }
}
