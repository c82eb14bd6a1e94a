//! Observable Value
//!
//! An ObservableValue is the simplest container built on an [`Atom`]: a
//! single boxed value.
//!
//! # How Observable Values Work
//!
//! 1. Reading the value reports the read to the atom, which makes the
//!    currently tracked derivation depend on it.
//!
//! 2. Writing a value that the comparer considers equal to the current one
//!    is a no-op.
//!
//! 3. Writing a different value first checks the mutation policy, then
//!    stores the value and reports the change, which marks every observer
//!    stale and runs reactions at the end of the outermost batch.

use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;

use crate::error::Result;
use crate::graph::NodeId;

use super::atom::Atom;
use super::comparer::Comparer;

/// A reactive box holding a value of type `T`.
///
/// # Example
///
/// ```rust,ignore
/// let count = ObservableValue::new(0);
///
/// // Read the value (tracked inside derivations)
/// let value = count.get();
///
/// // Update the value (notifies observers)
/// count.set(5)?;
/// ```
pub struct ObservableValue<T> {
    atom: Atom,
    value: Rc<RefCell<T>>,
    equals: Comparer<T>,
}

impl<T: Clone + PartialEq + 'static> ObservableValue<T> {
    /// Create a new observable value named `ObservableValue@<id>`.
    pub fn new(value: T) -> Self {
        Self::build(Atom::prefixed("ObservableValue"), value, Comparer::by_eq())
    }

    /// Create a new observable value with a debug name.
    pub fn named(name: impl Into<String>, value: T) -> Self {
        Self::build(Atom::new(name), value, Comparer::by_eq())
    }
}

impl<T: Clone + 'static> ObservableValue<T> {
    /// Create a new observable value that uses `equals` to detect changes.
    pub fn with_comparer(name: impl Into<String>, value: T, equals: Comparer<T>) -> Self {
        Self::build(Atom::new(name), value, equals)
    }

    fn build(atom: Atom, value: T, equals: Comparer<T>) -> Self {
        Self {
            atom,
            value: Rc::new(RefCell::new(value)),
            equals,
        }
    }

    /// Get the current value, registering a dependency if a derivation is
    /// being tracked.
    pub fn get(&self) -> T {
        self.atom.report_observed();
        self.value.borrow().clone()
    }

    /// Get the current value without registering a dependency.
    pub fn get_untracked(&self) -> T {
        self.value.borrow().clone()
    }

    /// Borrow the current value, registering a dependency.
    pub fn with<R>(&self, f: impl FnOnce(&T) -> R) -> R {
        self.atom.report_observed();
        f(&self.value.borrow())
    }

    /// Set a new value.
    ///
    /// Fails without modifying anything if the write violates the mutation
    /// policy. Returns the first uncaught reaction failure of the drain this
    /// write triggered, if any.
    pub fn set(&self, value: T) -> Result<()> {
        self.atom.ensure_writable()?;
        let unchanged = {
            let current = self.value.borrow();
            self.equals.equals(&current, &value)
        };
        if unchanged {
            return Ok(());
        }

        let old = self.value.replace(value);
        drop(old);
        self.atom.report_changed()
    }

    /// Update the value using a function of the current one.
    pub fn update(&self, f: impl FnOnce(&T) -> T) -> Result<()> {
        let next = f(&self.value.borrow());
        self.set(next)
    }

    /// The underlying atom.
    pub fn atom(&self) -> &Atom {
        &self.atom
    }

    pub fn id(&self) -> NodeId {
        self.atom.id()
    }
}

impl<T> Clone for ObservableValue<T> {
    fn clone(&self) -> Self {
        Self {
            atom: self.atom.clone(),
            value: Rc::clone(&self.value),
            equals: self.equals.clone(),
        }
    }
}

impl<T: fmt::Debug> fmt::Debug for ObservableValue<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ObservableValue")
            .field("name", &self.atom.name())
            .field("value", &self.value.borrow())
            .finish()
    }
}
