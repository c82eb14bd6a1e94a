//! Graph Nodes
//!
//! This module defines the node records that live in the dependency graph.
//!
//! Every node carries both halves of the bookkeeping: the observable half
//! (who watches me) and the derivation half (whom do I watch). Atoms only
//! use the first half, reactions only the second, computed values use both.

use std::fmt;
use std::rc::{Rc, Weak};
use std::sync::atomic::{AtomicU64, Ordering};

use indexmap::IndexSet;
use serde::Serialize;
use smallvec::SmallVec;

use crate::error::Result;
use crate::reactive::Reaction;

/// Unique identifier for a node in the dependency graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct NodeId(u64);

impl NodeId {
    /// Generate a new unique node ID.
    pub fn new() -> Self {
        static COUNTER: AtomicU64 = AtomicU64::new(1);
        Self(COUNTER.fetch_add(1, Ordering::Relaxed))
    }

    /// Get the raw ID value.
    pub fn raw(&self) -> u64 {
        self.0
    }
}

impl Default for NodeId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Freshness of a derivation, ordered by instability.
///
/// `NotTracking < UpToDate < PossiblyStale < Stale`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub enum DerivationState {
    /// No dependency bookkeeping is held. Initial state, and the state after
    /// a derivation is disposed or suspended.
    NotTracking,

    /// No shallow dependency changed since the last run.
    UpToDate,

    /// A computed dependency might have changed; it must be pulled before
    /// deciding whether to rerun.
    PossiblyStale,

    /// A direct dependency changed. A rerun is mandatory.
    Stale,
}

/// The kind of node in the dependency graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum NodeKind {
    /// A plain observable. Only ever observed, never observing.
    Atom,

    /// A memoized derivation that can itself be observed.
    Computed,

    /// An effectful derivation. A leaf of the graph.
    Reaction,
}

/// Diagnostic output emitted when a derivation is invalidated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TraceMode {
    /// No output.
    #[default]
    Off,

    /// Log which observable invalidated the derivation.
    Log,

    /// Log the invalidation together with the derivation's dependency tree.
    Tree,
}

/// Type-erased access to a computed value's memo.
///
/// The graph only knows computed values through this seam, so the
/// scheduler can pull or suspend them without knowing their value type.
pub(crate) trait ComputedCell {
    /// Bring the memo up to date, reporting a captured failure.
    fn refresh(&self) -> Result<()>;

    /// Drop the memo and every dependency edge unless kept alive.
    fn suspend(&self);
}

/// A callback registered on become-observed/become-unobserved transitions.
pub(crate) type Listener = Rc<dyn Fn()>;

/// Kind-specific payload of a node.
pub(crate) enum NodeBody {
    Atom,
    Computed {
        cell: Weak<dyn ComputedCell>,
    },
    Reaction {
        reaction: Reaction,
        is_scheduled: bool,
    },
}

/// A node in the dependency graph.
pub(crate) struct Node {
    pub(crate) id: NodeId,
    pub(crate) name: Rc<str>,
    pub(crate) body: NodeBody,

    // Observable half.
    pub(crate) observers: IndexSet<NodeId>,
    /// Minimum state among the observers. A cache used to skip repeated
    /// propagation, never authoritative.
    pub(crate) lowest_observer_state: DerivationState,
    pub(crate) is_being_observed: bool,
    pub(crate) is_pending_unobservation: bool,
    pub(crate) last_accessed_by: u64,
    /// Scratch flag, only meaningful inside a single `bind_dependencies` call.
    pub(crate) diff_value: u8,
    pub(crate) on_observed: Vec<(u64, Listener)>,
    pub(crate) on_unobserved: Vec<(u64, Listener)>,

    // Derivation half.
    pub(crate) observing: SmallVec<[NodeId; 4]>,
    /// Scratch list, only written while this node is being tracked.
    pub(crate) new_observing: Vec<NodeId>,
    pub(crate) dependencies_state: DerivationState,
    pub(crate) run_id: u64,
    pub(crate) unbound_deps_count: usize,
    pub(crate) trace_mode: TraceMode,
    pub(crate) requires_observable: bool,
}

impl Node {
    fn new(id: NodeId, name: Rc<str>, body: NodeBody) -> Self {
        let lowest_observer_state = match body {
            NodeBody::Computed { .. } => DerivationState::UpToDate,
            _ => DerivationState::NotTracking,
        };

        Self {
            id,
            name,
            body,
            observers: IndexSet::new(),
            lowest_observer_state,
            is_being_observed: false,
            is_pending_unobservation: false,
            last_accessed_by: 0,
            diff_value: 0,
            on_observed: Vec::new(),
            on_unobserved: Vec::new(),
            observing: SmallVec::new(),
            new_observing: Vec::new(),
            dependencies_state: DerivationState::NotTracking,
            run_id: 0,
            unbound_deps_count: 0,
            trace_mode: TraceMode::Off,
            requires_observable: false,
        }
    }

    /// Create a new atom node.
    pub(crate) fn atom(id: NodeId, name: Rc<str>) -> Self {
        Self::new(id, name, NodeBody::Atom)
    }

    /// Create a new computed node backed by `cell`.
    pub(crate) fn computed(id: NodeId, name: Rc<str>, cell: Weak<dyn ComputedCell>) -> Self {
        Self::new(id, name, NodeBody::Computed { cell })
    }

    /// Create a new reaction node.
    pub(crate) fn reaction(id: NodeId, name: Rc<str>, reaction: Reaction) -> Self {
        Self::new(
            id,
            name,
            NodeBody::Reaction {
                reaction,
                is_scheduled: false,
            },
        )
    }

    /// Get the node's kind.
    pub(crate) fn kind(&self) -> NodeKind {
        match self.body {
            NodeBody::Atom => NodeKind::Atom,
            NodeBody::Computed { .. } => NodeKind::Computed,
            NodeBody::Reaction { .. } => NodeKind::Reaction,
        }
    }

    pub(crate) fn has_observers(&self) -> bool {
        !self.observers.is_empty()
    }
}

impl fmt::Debug for Node {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Node")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("kind", &self.kind())
            .field("state", &self.dependencies_state)
            .field("observers", &self.observers.len())
            .field("observing", &self.observing.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn node_ids_are_unique() {
        let id1 = NodeId::new();
        let id2 = NodeId::new();
        assert_ne!(id1, id2);
        assert!(id2.raw() > id1.raw());
    }

    #[test]
    fn states_are_ordered_by_instability() {
        assert!(DerivationState::NotTracking < DerivationState::UpToDate);
        assert!(DerivationState::UpToDate < DerivationState::PossiblyStale);
        assert!(DerivationState::PossiblyStale < DerivationState::Stale);
    }

    #[test]
    fn atom_node_starts_untracked() {
        let node = Node::atom(NodeId::new(), "a".into());
        assert_eq!(node.kind(), NodeKind::Atom);
        assert_eq!(node.dependencies_state, DerivationState::NotTracking);
        assert_eq!(node.lowest_observer_state, DerivationState::NotTracking);
        assert!(!node.has_observers());
    }

    #[test]
    fn computed_node_starts_with_up_to_date_observers() {
        struct Nothing;
        impl ComputedCell for Nothing {
            fn refresh(&self) -> Result<()> {
                Ok(())
            }
            fn suspend(&self) {}
        }

        let cell: Rc<dyn ComputedCell> = Rc::new(Nothing);
        let node = Node::computed(NodeId::new(), "c".into(), Rc::downgrade(&cell));
        assert_eq!(node.kind(), NodeKind::Computed);
        assert_eq!(node.lowest_observer_state, DerivationState::UpToDate);
        assert_eq!(node.dependencies_state, DerivationState::NotTracking);
    }
}
