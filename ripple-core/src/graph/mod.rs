//! Dependency Graph
//!
//! This module implements the bookkeeping half of the kernel: the nodes,
//! the edges between them, and the primitives that move freshness states
//! through the graph.
//!
//! # Overview
//!
//! The graph is a directed graph where:
//!
//! - Nodes are atoms, computed values or reactions
//! - An edge `o -> d` means derivation `d` read observable `o` during its
//!   last tracked run; it is stored on both ends (`o.observers`,
//!   `d.observing`)
//!
//! # Design Decisions
//!
//! 1. Node kinds are an explicit tagged variant, so propagation switches
//!    exhaustively over `NodeKind` instead of probing capabilities.
//!
//! 2. The graph is indexed by node ID for O(1) lookups and never runs user
//!    code. Callers that need to invoke user code (pulling a computed value,
//!    running a reaction, firing a hook) extract what they need first.
//!
//! 3. Propagation is push-only for the cheap part (freshness flags) and
//!    pull-based for the expensive part (recomputation), which happens in
//!    `reactive`.

mod node;
mod propagate;
mod store;
mod tree;

pub use node::{DerivationState, NodeId, NodeKind, TraceMode};
pub use propagate::TraceEvent;
pub use tree::{DependencyTree, ObserverTree};

pub(crate) use node::{ComputedCell, Listener, Node};
pub(crate) use store::Graph;
