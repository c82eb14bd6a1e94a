//! Propagation Engine
//!
//! Walks outward from a changed observable and escalates the freshness of
//! its direct observers. Nothing is recomputed here: reactions are queued
//! and computed values pass a weaker "maybe changed" signal downstream, to
//! be confirmed lazily when someone pulls them.
//!
//! Each primitive first consults the observable's cached
//! `lowest_observer_state`; when every observer is already at least as
//! unstable as the primitive would make it, the walk is skipped entirely.

use std::rc::Rc;

use serde::Serialize;

use super::node::{DerivationState, NodeId, NodeKind, TraceMode};
use super::store::Graph;

/// An invalidation performed by the propagation engine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TraceEvent {
    pub derivation: NodeId,
    pub derivation_name: String,
    pub observable: NodeId,
    pub observable_name: String,
}

impl Graph {
    /// An atomic value definitely changed: every observer becomes stale.
    pub(crate) fn propagate_changed(&mut self, observable: NodeId) {
        let observers = match self.get_mut(observable) {
            Some(node) if node.lowest_observer_state != DerivationState::Stale => {
                node.lowest_observer_state = DerivationState::Stale;
                node.observers.clone()
            }
            _ => return,
        };

        for derivation in observers {
            if self.state_of(derivation) == DerivationState::UpToDate {
                self.trace_invalidation(derivation, observable);
                self.on_become_stale(derivation);
            }
            if let Some(node) = self.get_mut(derivation) {
                node.dependencies_state = DerivationState::Stale;
            }
        }
    }

    /// A computed value recomputed and its output differs: observers that
    /// were waiting for confirmation become stale.
    pub(crate) fn propagate_change_confirmed(&mut self, observable: NodeId) {
        let observers = match self.get_mut(observable) {
            Some(node) if node.lowest_observer_state != DerivationState::Stale => {
                node.lowest_observer_state = DerivationState::Stale;
                node.observers.clone()
            }
            _ => return,
        };

        for derivation in observers {
            match self.state_of(derivation) {
                DerivationState::PossiblyStale => {
                    if let Some(node) = self.get_mut(derivation) {
                        node.dependencies_state = DerivationState::Stale;
                    }
                }
                // The observer is in the middle of its own tracked run.
                DerivationState::UpToDate => {
                    if let Some(node) = self.get_mut(observable) {
                        node.lowest_observer_state = DerivationState::UpToDate;
                    }
                }
                _ => {}
            }
        }
    }

    /// A dependency of a computed value changed, but the computed value has
    /// not been re-derived yet.
    pub(crate) fn propagate_maybe_changed(&mut self, observable: NodeId) {
        let observers = match self.get_mut(observable) {
            Some(node) if node.lowest_observer_state == DerivationState::UpToDate => {
                node.lowest_observer_state = DerivationState::PossiblyStale;
                node.observers.clone()
            }
            _ => return,
        };

        for derivation in observers {
            if self.state_of(derivation) == DerivationState::UpToDate {
                if let Some(node) = self.get_mut(derivation) {
                    node.dependencies_state = DerivationState::PossiblyStale;
                }
                self.trace_invalidation(derivation, observable);
                self.on_become_stale(derivation);
            }
        }
    }

    /// The stale hook: computed values pass a maybe-changed signal on,
    /// reactions are queued for the scheduler.
    pub(crate) fn on_become_stale(&mut self, derivation: NodeId) {
        let Some(kind) = self.get(derivation).map(|node| node.kind()) else {
            return;
        };
        match kind {
            NodeKind::Atom => {}
            NodeKind::Computed => self.propagate_maybe_changed(derivation),
            NodeKind::Reaction => {
                if !self.is_scheduled(derivation) {
                    self.set_scheduled(derivation, true);
                    self.pending_reactions.push(derivation);
                }
            }
        }
    }

    fn trace_invalidation(&mut self, derivation: NodeId, observable: NodeId) {
        let (Some(target), Some(source)) = (self.get(derivation), self.get(observable)) else {
            return;
        };
        let mode = target.trace_mode;
        let derivation_name = Rc::clone(&target.name);
        let observable_name = Rc::clone(&source.name);

        if mode != TraceMode::Off {
            tracing::info!(
                target: "ripple::trace",
                derivation = %derivation_name,
                observable = %observable_name,
                "'{}' is invalidated due to a change in '{}'",
                derivation_name,
                observable_name
            );
        }
        if mode == TraceMode::Tree {
            if let Some(tree) = self.dependency_tree(derivation) {
                tracing::info!(
                    target: "ripple::trace",
                    derivation = %derivation_name,
                    "dependencies of '{}':\n{}",
                    derivation_name,
                    tree.render()
                );
            }
        }

        if self.trace_enabled {
            self.trace_events.push(TraceEvent {
                derivation,
                derivation_name: derivation_name.to_string(),
                observable,
                observable_name: observable_name.to_string(),
            });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::node::Node;

    fn atom(graph: &mut Graph, name: &str) -> NodeId {
        graph.insert(Node::atom(NodeId::new(), name.into()))
    }

    /// Track `reads` on an atom record standing in for a derivation.
    fn observe(graph: &mut Graph, derivation: NodeId, run_id: u64, reads: &[NodeId]) {
        graph.begin_tracking(derivation, run_id);
        for read in reads {
            graph.record_read(*read, derivation);
        }
        graph.bind_dependencies(derivation);
    }

    #[test]
    fn changed_marks_observers_stale() {
        let mut graph = Graph::default();
        let a = atom(&mut graph, "a");
        let d = atom(&mut graph, "d");
        observe(&mut graph, d, 1, &[a]);

        graph.propagate_changed(a);
        assert_eq!(graph.state_of(d), DerivationState::Stale);
        assert_eq!(
            graph.get(a).map(|n| n.lowest_observer_state),
            Some(DerivationState::Stale)
        );
    }

    #[test]
    fn repeated_change_is_skipped() {
        let mut graph = Graph::default();
        graph.trace_enabled = true;
        let a = atom(&mut graph, "a");
        let d = atom(&mut graph, "d");
        observe(&mut graph, d, 1, &[a]);

        graph.propagate_changed(a);
        graph.propagate_changed(a);
        assert_eq!(graph.trace_events.len(), 1);
        assert_eq!(graph.trace_events[0].derivation, d);
        assert_eq!(graph.trace_events[0].observable_name, "a");
    }

    #[test]
    fn maybe_changed_only_escalates_up_to_date_observers() {
        let mut graph = Graph::default();
        let a = atom(&mut graph, "a");
        let d = atom(&mut graph, "d");
        observe(&mut graph, d, 1, &[a]);

        graph.propagate_maybe_changed(a);
        // Atoms start with NotTracking observers, so nothing happens.
        assert_eq!(graph.state_of(d), DerivationState::UpToDate);

        graph.get_mut(a).unwrap().lowest_observer_state = DerivationState::UpToDate;
        graph.propagate_maybe_changed(a);
        assert_eq!(graph.state_of(d), DerivationState::PossiblyStale);
    }

    #[test]
    fn confirmed_change_escalates_possibly_stale_observers() {
        let mut graph = Graph::default();
        let a = atom(&mut graph, "a");
        let d = atom(&mut graph, "d");
        observe(&mut graph, d, 1, &[a]);
        graph.get_mut(a).unwrap().lowest_observer_state = DerivationState::UpToDate;

        graph.propagate_maybe_changed(a);
        graph.propagate_change_confirmed(a);
        assert_eq!(graph.state_of(d), DerivationState::Stale);
    }
}
