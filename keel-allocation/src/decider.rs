//! Allocation deciders: pure constraint functions and their ordered stack.
//!
//! A decider answers "may this shard go on (or stay on) this node?" with
//! `Yes`, `No`, or `Throttle`. The stack aggregates by severity: the first
//! `No` wins, otherwise any `Throttle` dominates `Yes`. In debug mode every
//! decider runs and every answer is recorded, so explain APIs and command
//! execution can show the full picture.

use std::fmt;

use keel_cluster::{DiscoveryNode, ShardRouting};

use crate::context::RoutingAllocation;

/// Outcome of one constraint check.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Decision {
    /// Placement is allowed.
    Yes,
    /// Placement is allowed in principle but must wait (e.g. recovery caps).
    Throttle,
    /// Placement is forbidden.
    No,
}

impl fmt::Display for Decision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Yes => "YES",
            Self::Throttle => "THROTTLE",
            Self::No => "NO",
        };
        f.write_str(s)
    }
}

/// One decider's answer, with an explanation for anything but a plain yes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Ruling {
    /// The decision.
    pub decision: Decision,
    /// Why, when the decision is not a plain yes.
    pub message: Option<String>,
}

impl Ruling {
    /// An unconditional yes.
    #[must_use]
    pub const fn yes() -> Self {
        Self {
            decision: Decision::Yes,
            message: None,
        }
    }

    /// A refusal with a reason.
    #[must_use]
    pub fn no(message: impl Into<String>) -> Self {
        Self {
            decision: Decision::No,
            message: Some(message.into()),
        }
    }

    /// A throttle with a reason.
    #[must_use]
    pub fn throttle(message: impl Into<String>) -> Self {
        Self {
            decision: Decision::Throttle,
            message: Some(message.into()),
        }
    }
}

/// One recorded decider answer inside a [`Verdict`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecisionStep {
    /// Name of the decider.
    pub decider: &'static str,
    /// Its decision.
    pub decision: Decision,
    /// Its explanation (empty for a plain yes).
    pub message: String,
}

/// Aggregated answer of the whole stack.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Verdict {
    /// The aggregate decision.
    pub decision: Decision,
    /// Recorded per-decider steps. Contains every decider in debug mode,
    /// only the deciding step otherwise.
    pub steps: Vec<DecisionStep>,
}

impl Verdict {
    /// A yes with no recorded steps.
    #[must_use]
    pub const fn yes() -> Self {
        Self {
            decision: Decision::Yes,
            steps: Vec::new(),
        }
    }

    /// True if the aggregate decision is yes.
    #[must_use]
    pub fn is_yes(&self) -> bool {
        self.decision == Decision::Yes
    }

    /// Joins the non-yes step messages into one operator-facing string.
    #[must_use]
    pub fn summary(&self) -> String {
        let parts: Vec<String> = self
            .steps
            .iter()
            .filter(|s| s.decision != Decision::Yes)
            .map(|s| format!("[{}] {}", s.decider, s.message))
            .collect();
        parts.join("; ")
    }
}

/// A pure allocation constraint.
///
/// Deciders hold only configuration; everything about the current pass comes
/// through the [`RoutingAllocation`] so passes stay reproducible.
pub trait AllocationDecider: Send + Sync {
    /// Name shown in explanations.
    fn name(&self) -> &'static str;

    /// May `shard` be allocated to `node`?
    fn can_allocate(
        &self,
        shard: &ShardRouting,
        node: &DiscoveryNode,
        allocation: &RoutingAllocation<'_>,
    ) -> Ruling;

    /// May `shard` stay on `node`? Defaults to yes.
    fn can_remain(
        &self,
        shard: &ShardRouting,
        node: &DiscoveryNode,
        allocation: &RoutingAllocation<'_>,
    ) -> Ruling {
        let _ = (shard, node, allocation);
        Ruling::yes()
    }
}

/// The ordered decider stack.
pub struct DeciderStack {
    deciders: Vec<Box<dyn AllocationDecider>>,
}

impl DeciderStack {
    /// Creates a stack from an explicit decider list, evaluated in order.
    #[must_use]
    pub fn new(deciders: Vec<Box<dyn AllocationDecider>>) -> Self {
        Self { deciders }
    }

    /// Aggregate `can_allocate` over the stack.
    #[must_use]
    pub fn can_allocate(
        &self,
        shard: &ShardRouting,
        node: &DiscoveryNode,
        allocation: &RoutingAllocation<'_>,
    ) -> Verdict {
        self.aggregate(allocation.debug_decision(), |decider| {
            decider.can_allocate(shard, node, allocation)
        })
    }

    /// Aggregate `can_remain` over the stack.
    #[must_use]
    pub fn can_remain(
        &self,
        shard: &ShardRouting,
        node: &DiscoveryNode,
        allocation: &RoutingAllocation<'_>,
    ) -> Verdict {
        self.aggregate(allocation.debug_decision(), |decider| {
            decider.can_remain(shard, node, allocation)
        })
    }

    /// Aggregate `can_allocate` restricted to the decider with the given
    /// name.
    ///
    /// Forced operator commands outrank placement policy but never safety:
    /// they consult only the safety decider they name. A name absent from
    /// the stack leaves nothing to refuse.
    #[must_use]
    pub fn can_allocate_named(
        &self,
        name: &str,
        shard: &ShardRouting,
        node: &DiscoveryNode,
        allocation: &RoutingAllocation<'_>,
    ) -> Verdict {
        aggregate_over(
            self.deciders.iter().filter(|d| d.name() == name),
            allocation.debug_decision(),
            |decider| decider.can_allocate(shard, node, allocation),
        )
    }

    /// Number of deciders in the stack.
    #[must_use]
    pub fn len(&self) -> usize {
        self.deciders.len()
    }

    /// True if the stack is empty (everything allowed).
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.deciders.is_empty()
    }

    fn aggregate(
        &self,
        debug: bool,
        ask: impl FnMut(&dyn AllocationDecider) -> Ruling,
    ) -> Verdict {
        aggregate_over(self.deciders.iter(), debug, ask)
    }
}

fn aggregate_over<'d>(
    deciders: impl Iterator<Item = &'d Box<dyn AllocationDecider>>,
    debug: bool,
    mut ask: impl FnMut(&dyn AllocationDecider) -> Ruling,
) -> Verdict {
    let mut decision = Decision::Yes;
    let mut steps = Vec::new();

    for decider in deciders {
        let ruling = ask(decider.as_ref());
        let record = debug || ruling.decision != Decision::Yes;
        if record {
            steps.push(DecisionStep {
                decider: decider.name(),
                decision: ruling.decision,
                message: ruling.message.unwrap_or_default(),
            });
        }
        decision = decision.max(ruling.decision);
        if decision == Decision::No && !debug {
            break;
        }
    }

    Verdict { decision, steps }
}

impl fmt::Debug for DeciderStack {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let names: Vec<_> = self.deciders.iter().map(|d| d.name()).collect();
        f.debug_struct("DeciderStack").field("deciders", &names).finish()
    }
}
