//! Atom Implementation
//!
//! An Atom is the minimal observable: it holds no value of its own, it only
//! knows who watches it. Containers (such as [`ObservableValue`]) own an
//! atom and call [`Atom::report_observed`] on every read and
//! [`Atom::report_changed`] after every write.
//!
//! [`ObservableValue`]: super::ObservableValue

use std::fmt;
use std::rc::Rc;

use crate::error::Result;
use crate::graph::{Node, NodeId};

use super::disposer::Disposer;
use super::runtime::{self, end_batch, start_batch, with_state, Runtime};

struct AtomInner {
    id: NodeId,
    name: Rc<str>,
}

impl Drop for AtomInner {
    fn drop(&mut self) {
        runtime::release(self.id);
    }
}

/// A named observable without a value.
///
/// Cloning an `Atom` yields another handle to the same node; the node is
/// removed from the graph when the last handle is dropped.
#[derive(Clone)]
pub struct Atom {
    inner: Rc<AtomInner>,
}

impl Atom {
    /// Create a new atom with a debug name.
    pub fn new(name: impl Into<String>) -> Self {
        Self::register(NodeId::new(), Rc::from(name.into()))
    }

    /// Create a new atom named `Atom@<id>`.
    pub fn unnamed() -> Self {
        Self::prefixed("Atom")
    }

    /// Create a new atom named `<prefix>@<id>`.
    pub(crate) fn prefixed(prefix: &str) -> Self {
        let id = NodeId::new();
        Self::register(id, Rc::from(format!("{prefix}@{id}")))
    }

    /// Create an atom with listeners for the observed/unobserved
    /// transitions. Each listener fires once per transition.
    pub fn with_hooks(
        name: impl Into<String>,
        on_observed: impl Fn() + 'static,
        on_unobserved: impl Fn() + 'static,
    ) -> Self {
        let atom = Self::new(name);
        // Registered for the lifetime of the atom.
        let _ = atom.on_become_observed(on_observed);
        let _ = atom.on_become_unobserved(on_unobserved);
        atom
    }

    fn register(id: NodeId, name: Rc<str>) -> Self {
        with_state(|state| state.graph.insert(Node::atom(id, Rc::clone(&name))));
        Self {
            inner: Rc::new(AtomInner { id, name }),
        }
    }

    /// Get the atom's node ID.
    pub fn id(&self) -> NodeId {
        self.inner.id
    }

    /// Get the atom's debug name.
    pub fn name(&self) -> &str {
        &self.inner.name
    }

    /// Report a read. Returns whether a derivation is being tracked.
    pub fn report_observed(&self) -> bool {
        Runtime::report_observed(self.inner.id)
    }

    /// Fail if writing this atom right now violates the mutation policy.
    ///
    /// Containers call this before mutating so that a rejected write leaves
    /// the container untouched.
    pub fn ensure_writable(&self) -> Result<()> {
        with_state(|state| state.check_mutation_allowed(self.inner.id))
    }

    /// Report a write. Every observer becomes stale; reactions run when the
    /// outermost batch ends.
    pub fn report_changed(&self) -> Result<()> {
        self.ensure_writable()?;
        start_batch();
        with_state(|state| state.graph.propagate_changed(self.inner.id));
        end_batch()
    }

    /// Register a listener for the unobserved → observed transition.
    pub fn on_become_observed(&self, listener: impl Fn() + 'static) -> Disposer {
        Runtime::add_listener(self.inner.id, Rc::new(listener), true)
    }

    /// Register a listener for the observed → unobserved transition.
    pub fn on_become_unobserved(&self, listener: impl Fn() + 'static) -> Disposer {
        Runtime::add_listener(self.inner.id, Rc::new(listener), false)
    }

    /// Number of derivations currently observing this atom.
    pub fn observer_count(&self) -> usize {
        Runtime::observers(self.inner.id).len()
    }

    pub fn is_being_observed(&self) -> bool {
        with_state(|state| {
            state
                .graph
                .get(self.inner.id)
                .is_some_and(|node| node.is_being_observed)
        })
    }
}

impl fmt::Debug for Atom {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Atom")
            .field("id", &self.inner.id)
            .field("name", &self.inner.name)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reactive::autorun;
    use std::cell::Cell;

    #[test]
    fn unnamed_atoms_get_a_generated_name() {
        let atom = Atom::unnamed();
        assert_eq!(atom.name(), format!("Atom@{}", atom.id()));
    }

    #[test]
    fn clones_share_the_node() {
        let atom = Atom::new("shared");
        let other = atom.clone();
        assert_eq!(atom.id(), other.id());
        drop(atom);
        assert!(other.report_changed().is_ok());
    }

    #[test]
    fn read_outside_tracking_reports_no_context() {
        let atom = Atom::new("a");
        assert!(!atom.report_observed());
    }

    #[test]
    fn hooks_fire_once_per_transition() {
        let observed = Rc::new(Cell::new(0));
        let unobserved = Rc::new(Cell::new(0));
        let (o, u) = (observed.clone(), unobserved.clone());
        let atom = Atom::with_hooks(
            "hooked",
            move || o.set(o.get() + 1),
            move || u.set(u.get() + 1),
        );

        let reader = atom.clone();
        let disposer = autorun(move |_| {
            reader.report_observed();
            reader.report_observed();
        })
        .unwrap();
        assert_eq!(observed.get(), 1);
        assert!(atom.is_being_observed());
        assert_eq!(atom.observer_count(), 1);

        atom.report_changed().unwrap();
        assert_eq!(observed.get(), 1);
        assert_eq!(unobserved.get(), 0);

        disposer.dispose().unwrap();
        assert_eq!(unobserved.get(), 1);
        assert!(!atom.is_being_observed());
    }

    #[test]
    fn disposed_listeners_stop_firing() {
        let atom = Atom::new("a");
        let count = Rc::new(Cell::new(0));
        let counter = count.clone();
        let listener = atom.on_become_observed(move || counter.set(counter.get() + 1));
        listener.dispose();

        let reader = atom.clone();
        let disposer = autorun(move |_| {
            reader.report_observed();
        })
        .unwrap();
        assert_eq!(count.get(), 0);
        disposer.dispose().unwrap();
    }
}
