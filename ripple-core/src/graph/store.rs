//! Graph Store
//!
//! The store owns every node record together with the two work queues the
//! batch coordinator drains: pending reactions and pending unobservations.
//!
//! All edge maintenance goes through this type. The central invariant is
//! that, at the end of any tracked run, `d ∈ o.observers ⟺ o ∈ d.observing`.

use std::collections::{HashMap, VecDeque};
use std::mem;
use std::rc::Rc;

use smallvec::SmallVec;

use super::node::{ComputedCell, DerivationState, Listener, Node, NodeBody, NodeId};
use super::propagate::TraceEvent;
use crate::reactive::Reaction;

/// What to do with an observable whose unobservation is being settled.
pub(crate) struct Unobservation {
    pub(crate) listeners: Vec<Listener>,
    pub(crate) cell: Option<Rc<dyn ComputedCell>>,
}

/// The dependency graph and its work queues.
#[derive(Default)]
pub(crate) struct Graph {
    /// All nodes in the graph, indexed by ID.
    nodes: HashMap<NodeId, Node>,

    /// Reactions waiting for the outermost batch to end, in FIFO order.
    pub(crate) pending_reactions: Vec<NodeId>,

    /// Observables that lost their last observer during the current batch.
    pub(crate) pending_unobservations: VecDeque<NodeId>,

    /// Invalidations recorded for the trace hook.
    pub(crate) trace_events: Vec<TraceEvent>,

    /// Whether invalidations should be recorded at all.
    pub(crate) trace_enabled: bool,
}

impl Graph {
    /// Add a node to the graph.
    pub(crate) fn insert(&mut self, node: Node) -> NodeId {
        let id = node.id;
        self.nodes.insert(id, node);
        id
    }

    /// Remove a node from the graph together with every edge touching it.
    ///
    /// The removed node is handed back so the caller can drop it once the
    /// runtime is no longer borrowed.
    pub(crate) fn remove(&mut self, id: NodeId) -> Option<Node> {
        self.clear_observing(id);
        let node = self.nodes.remove(&id)?;

        for observer in &node.observers {
            if let Some(derivation) = self.nodes.get_mut(observer) {
                derivation.observing.retain(|dep| *dep != id);
            }
        }

        self.pending_reactions.retain(|pending| *pending != id);
        self.pending_unobservations.retain(|pending| *pending != id);
        Some(node)
    }

    pub(crate) fn get(&self, id: NodeId) -> Option<&Node> {
        self.nodes.get(&id)
    }

    pub(crate) fn get_mut(&mut self, id: NodeId) -> Option<&mut Node> {
        self.nodes.get_mut(&id)
    }

    /// Get the total number of nodes in the graph.
    pub(crate) fn node_count(&self) -> usize {
        self.nodes.len()
    }

    pub(crate) fn state_of(&self, id: NodeId) -> DerivationState {
        self.nodes
            .get(&id)
            .map_or(DerivationState::NotTracking, |node| node.dependencies_state)
    }

    pub(crate) fn has_observers(&self, id: NodeId) -> bool {
        self.nodes.get(&id).is_some_and(Node::has_observers)
    }

    pub(crate) fn observers(&self, id: NodeId) -> Vec<NodeId> {
        self.nodes
            .get(&id)
            .map(|node| node.observers.iter().copied().collect())
            .unwrap_or_default()
    }

    pub(crate) fn observing(&self, id: NodeId) -> SmallVec<[NodeId; 4]> {
        self.nodes
            .get(&id)
            .map(|node| node.observing.clone())
            .unwrap_or_default()
    }

    pub(crate) fn computed_cell(&self, id: NodeId) -> Option<Rc<dyn ComputedCell>> {
        match &self.nodes.get(&id)?.body {
            NodeBody::Computed { cell } => cell.upgrade(),
            _ => None,
        }
    }

    pub(crate) fn reaction(&self, id: NodeId) -> Option<Reaction> {
        match &self.nodes.get(&id)?.body {
            NodeBody::Reaction { reaction, .. } => Some(reaction.clone()),
            _ => None,
        }
    }

    pub(crate) fn is_scheduled(&self, id: NodeId) -> bool {
        matches!(
            self.nodes.get(&id).map(|node| &node.body),
            Some(NodeBody::Reaction { is_scheduled: true, .. })
        )
    }

    pub(crate) fn set_scheduled(&mut self, id: NodeId, scheduled: bool) {
        if let Some(NodeBody::Reaction { is_scheduled, .. }) =
            self.nodes.get_mut(&id).map(|node| &mut node.body)
        {
            *is_scheduled = scheduled;
        }
    }

    /// Record a new edge `observable -> derivation`.
    pub(crate) fn add_observer(&mut self, observable: NodeId, derivation: NodeId) {
        let state = self.state_of(derivation);
        if let Some(node) = self.nodes.get_mut(&observable) {
            node.observers.insert(derivation);
            if node.lowest_observer_state > state {
                node.lowest_observer_state = state;
            }
        }
    }

    /// Remove the edge `observable -> derivation`.
    pub(crate) fn remove_observer(&mut self, observable: NodeId, derivation: NodeId) {
        let now_unobserved = match self.nodes.get_mut(&observable) {
            Some(node) => {
                // Order-preserving; reactions are queued in this order.
                node.observers.shift_remove(&derivation);
                node.observers.is_empty()
            }
            None => false,
        };
        if now_unobserved {
            self.queue_for_unobservation(observable);
        }
    }

    /// Queue an observable for become-unobserved processing at batch end.
    /// Each observable is queued at most once per batch.
    pub(crate) fn queue_for_unobservation(&mut self, observable: NodeId) {
        if let Some(node) = self.nodes.get_mut(&observable) {
            if !node.is_pending_unobservation {
                node.is_pending_unobservation = true;
                self.pending_unobservations.push_back(observable);
            }
        }
    }

    /// Settle the next pending unobservation.
    ///
    /// Returns `None` once the queue is empty. An entry that regained an
    /// observer in the meantime settles to an empty `Unobservation`.
    pub(crate) fn next_unobservation(&mut self) -> Option<Unobservation> {
        let id = self.pending_unobservations.pop_front()?;
        let mut settled = Unobservation {
            listeners: Vec::new(),
            cell: None,
        };

        let Some(node) = self.nodes.get_mut(&id) else {
            return Some(settled);
        };
        node.is_pending_unobservation = false;
        if node.has_observers() {
            return Some(settled);
        }

        if node.is_being_observed {
            node.is_being_observed = false;
            settled.listeners = node
                .on_unobserved
                .iter()
                .map(|(_, listener)| Rc::clone(listener))
                .collect();
        }
        if let NodeBody::Computed { cell } = &node.body {
            settled.cell = cell.upgrade();
        }
        Some(settled)
    }

    /// Mark `derivation` up to date without rerunning it.
    pub(crate) fn change_dependencies_state_to_0(&mut self, derivation: NodeId) {
        let observing = match self.nodes.get_mut(&derivation) {
            Some(node) if node.dependencies_state != DerivationState::UpToDate => {
                node.dependencies_state = DerivationState::UpToDate;
                node.observing.clone()
            }
            _ => return,
        };
        for dep in observing {
            if let Some(node) = self.nodes.get_mut(&dep) {
                node.lowest_observer_state = DerivationState::UpToDate;
            }
        }
    }

    /// Prepare `derivation` for a tracked run with the given run id.
    pub(crate) fn begin_tracking(&mut self, derivation: NodeId, run_id: u64) {
        self.change_dependencies_state_to_0(derivation);
        if let Some(node) = self.nodes.get_mut(&derivation) {
            node.new_observing = Vec::with_capacity(node.observing.len());
            node.unbound_deps_count = 0;
            node.run_id = run_id;
        }
    }

    /// Record a read of `observable` by the tracked `derivation`.
    ///
    /// Returns the become-observed listeners to fire when this read is the
    /// first one since the observable was last unobserved.
    pub(crate) fn record_read(&mut self, observable: NodeId, derivation: NodeId) -> Vec<Listener> {
        let Some(run_id) = self.nodes.get(&derivation).map(|node| node.run_id) else {
            return Vec::new();
        };
        let Some(node) = self.nodes.get_mut(&observable) else {
            return Vec::new();
        };
        if node.last_accessed_by == run_id {
            return Vec::new();
        }

        node.last_accessed_by = run_id;
        let mut listeners = Vec::new();
        if !node.is_being_observed {
            node.is_being_observed = true;
            listeners = node
                .on_observed
                .iter()
                .map(|(_, listener)| Rc::clone(listener))
                .collect();
        }

        if let Some(tracked) = self.nodes.get_mut(&derivation) {
            tracked.new_observing.push(observable);
            tracked.unbound_deps_count += 1;
        }
        listeners
    }

    /// Reconcile the dependencies recorded during the last tracked run of
    /// `derivation` with the previous ones.
    ///
    /// Deduplication uses each dependency's `diff_value` scratch flag, so the
    /// whole pass is linear in the number of recorded reads.
    pub(crate) fn bind_dependencies(&mut self, derivation: NodeId) {
        let (previous, mut fresh) = match self.nodes.get_mut(&derivation) {
            Some(node) => {
                let mut fresh = mem::take(&mut node.new_observing);
                fresh.truncate(node.unbound_deps_count);
                node.unbound_deps_count = 0;
                (mem::take(&mut node.observing), fresh)
            }
            None => return,
        };

        // Compact the fresh reads, keeping the first occurrence of each.
        let mut lowest = DerivationState::UpToDate;
        let mut kept = 0;
        for i in 0..fresh.len() {
            let dep = fresh[i];
            let Some(node) = self.nodes.get_mut(&dep) else {
                continue;
            };
            if node.diff_value == 0 {
                node.diff_value = 1;
                fresh[kept] = dep;
                kept += 1;
            }
            if node.dependencies_state > lowest {
                lowest = node.dependencies_state;
            }
        }
        fresh.truncate(kept);

        // Drop edges that were not read again; reset the flag of kept ones.
        for dep in previous.iter().rev().copied() {
            let unused = match self.nodes.get_mut(&dep) {
                Some(node) => {
                    let unused = node.diff_value == 0;
                    node.diff_value = 0;
                    unused
                }
                None => false,
            };
            if unused {
                self.remove_observer(dep, derivation);
            }
        }

        // Whatever still carries the flag is a brand new dependency.
        for dep in fresh.iter().rev().copied() {
            let added = match self.nodes.get_mut(&dep) {
                Some(node) if node.diff_value == 1 => {
                    node.diff_value = 0;
                    true
                }
                _ => false,
            };
            if added {
                self.add_observer(dep, derivation);
            }
        }

        if let Some(node) = self.nodes.get_mut(&derivation) {
            node.observing = SmallVec::from_vec(fresh);
        }

        // A dependency that is already unstable makes us unstable too.
        if lowest != DerivationState::UpToDate {
            if let Some(node) = self.nodes.get_mut(&derivation) {
                node.dependencies_state = lowest;
            }
            self.on_become_stale(derivation);
        }
    }

    /// Remove every dependency edge of `derivation` and stop tracking it.
    pub(crate) fn clear_observing(&mut self, derivation: NodeId) {
        let observing = match self.nodes.get_mut(&derivation) {
            Some(node) => {
                node.dependencies_state = DerivationState::NotTracking;
                mem::take(&mut node.observing)
            }
            None => return,
        };
        for dep in observing.iter().rev().copied() {
            self.remove_observer(dep, derivation);
        }
    }

    pub(crate) fn add_listener(&mut self, id: NodeId, key: u64, listener: Listener, observed: bool) {
        if let Some(node) = self.nodes.get_mut(&id) {
            let listeners = if observed {
                &mut node.on_observed
            } else {
                &mut node.on_unobserved
            };
            listeners.push((key, listener));
        }
    }

    pub(crate) fn remove_listener(&mut self, id: NodeId, key: u64) -> Vec<Listener> {
        let mut removed = Vec::new();
        if let Some(node) = self.nodes.get_mut(&id) {
            for listeners in [&mut node.on_observed, &mut node.on_unobserved] {
                listeners.retain(|(candidate, listener)| {
                    let keep = *candidate != key;
                    if !keep {
                        removed.push(Rc::clone(listener));
                    }
                    keep
                });
            }
        }
        removed
    }

    /// Check that every edge is recorded on both of its ends and that no
    /// scratch flag leaked out of a reconciliation pass.
    pub(crate) fn is_consistent(&self) -> bool {
        self.nodes.values().all(|node| {
            let observing_ok = node.observing.iter().all(|dep| {
                self.nodes
                    .get(dep)
                    .is_some_and(|dep_node| dep_node.observers.contains(&node.id))
            });
            let observers_ok = node.observers.iter().all(|observer| {
                self.nodes
                    .get(observer)
                    .is_some_and(|observer_node| observer_node.observing.contains(&node.id))
            });
            observing_ok && observers_ok && node.diff_value == 0
        })
    }
}
