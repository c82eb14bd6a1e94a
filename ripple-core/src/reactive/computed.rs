//! Computed Implementation
//!
//! A Computed is a cached derived value that is both a derivation (it
//! observes the values it reads) and an observable (others can observe it).
//!
//! # How Computed Values Work
//!
//! 1. On first tracked access, the computed value runs its derivation under
//!    the tracker and caches the result.
//!
//! 2. When an atom it read changes, the computed value becomes stale and
//!    tells its own observers that it *might* have changed.
//!
//! 3. When one of those observers needs to decide whether to rerun, it pulls
//!    the computed value. Only if the recomputed result differs (per the
//!    comparer) are the observers escalated to stale.
//!
//! 4. When the last observer goes away, the computed value is suspended at
//!    the end of the batch: it drops its cache and its dependency edges.
//!
//! # Why This Matters
//!
//! This "lazy confirmation" avoids rerunning everything downstream of an
//! atom whose change does not affect the derived result:
//!
//! - An atom changes
//! - 10 reactions depend on a computed that depends on the atom
//! - The computed recomputes once and yields the same value
//! - None of the 10 reactions rerun
//!
//! # Failures
//!
//! A panic in the derivation is captured and cached in place of the value.
//! [`Computed::try_get`] returns it as an error; [`Computed::get`] re-raises
//! it as a panic carrying the [`ReactiveError`].

use std::cell::{Cell, RefCell};
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::rc::Rc;

use crate::error::{ReactiveError, Result};
use crate::graph::{ComputedCell, DerivationState, Node, NodeId, TraceMode};

use super::action::run_in_action;
use super::autorun::{autorun_with, AutorunOptions, ReactionDisposer};
use super::comparer::Comparer;
use super::context::{should_compute, track_derived_function, untracked, UntrackedScope};
use super::disposer::Disposer;
use super::runtime::{self, with_state, BatchGuard, Runtime};

/// Construction options for a [`Computed`].
pub struct ComputedOptions<T> {
    /// Debug name. Defaults to `ComputedValue@<id>`.
    pub name: Option<String>,

    /// Comparer deciding whether a recomputation is a change.
    pub equals: Comparer<T>,

    /// Setter invoked (inside an action) by [`Computed::set`].
    pub setter: Option<Box<dyn Fn(T)>>,

    /// Never suspend, even without observers.
    pub keep_alive: bool,

    /// Fail reads that happen outside a reactive context.
    pub requires_reaction: bool,
}

impl<T: PartialEq + 'static> Default for ComputedOptions<T> {
    fn default() -> Self {
        Self {
            name: None,
            equals: Comparer::by_eq(),
            setter: None,
            keep_alive: false,
            requires_reaction: false,
        }
    }
}

impl<T: PartialEq + 'static> ComputedOptions<T> {
    pub fn new() -> Self {
        Self::default()
    }
}

impl<T: 'static> ComputedOptions<T> {
    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn equals(mut self, equals: Comparer<T>) -> Self {
        self.equals = equals;
        self
    }

    pub fn setter(mut self, setter: impl Fn(T) + 'static) -> Self {
        self.setter = Some(Box::new(setter));
        self
    }

    pub fn keep_alive(mut self, keep_alive: bool) -> Self {
        self.keep_alive = keep_alive;
        self
    }

    pub fn requires_reaction(mut self, requires_reaction: bool) -> Self {
        self.requires_reaction = requires_reaction;
        self
    }
}

/// A change delivered to [`Computed::observe`] listeners.
#[derive(Debug, Clone, PartialEq)]
pub struct ComputedChange<T> {
    pub new_value: T,
    /// `None` for the first delivery.
    pub old_value: Option<T>,
}

struct ComputedInner<T> {
    id: NodeId,
    name: Rc<str>,
    derivation: Box<dyn Fn() -> T>,
    setter: Option<Box<dyn Fn(T)>>,
    equals: Comparer<T>,

    /// The memo: a value, a captured failure, or nothing while suspended.
    value: RefCell<Option<Result<T>>>,
    is_computing: Cell<bool>,
    is_running_setter: Cell<bool>,
    keep_alive: bool,
    requires_reaction: bool,
}

impl<T: Clone + 'static> ComputedInner<T> {
    fn try_get(&self) -> Result<T> {
        if self.is_computing.get() {
            return Err(ReactiveError::Cycle {
                name: self.name.to_string(),
            });
        }

        let untracked_read = !self.keep_alive
            && with_state(|state| state.in_batch == 0 && !state.graph.has_observers(self.id));
        if untracked_read {
            // Nobody observes the value, so it is recomputed from scratch
            // and not cached: a cache would never be invalidated.
            self.warn_about_untracked_read()?;
            let batch = BatchGuard::start();
            let value = self.compute_value(false);
            batch.end()?;
            return value;
        }

        let batch = BatchGuard::start();
        Runtime::report_observed(self.id);
        if should_compute(self.id) && self.track_and_compute() {
            with_state(|state| state.graph.propagate_change_confirmed(self.id));
        }
        let value = self.memo();
        batch.end()?;
        value
    }

    fn memo(&self) -> Result<T> {
        match &*self.value.borrow() {
            Some(value) => value.clone(),
            // Only reachable if the memo was dropped while being read.
            None => Err(ReactiveError::Derivation {
                name: self.name.to_string(),
                message: "computed value has no cached value".to_string(),
            }),
        }
    }

    fn warn_about_untracked_read(&self) -> Result<()> {
        if self.requires_reaction {
            return Err(ReactiveError::UntrackedRead {
                name: self.name.to_string(),
            });
        }

        let (trace_mode, warn) = with_state(|state| {
            let trace_mode = state
                .graph
                .get(self.id)
                .map_or(TraceMode::Off, |node| node.trace_mode);
            (trace_mode, state.config.computed_requires_reaction)
        });
        if trace_mode != TraceMode::Off {
            tracing::info!(
                target: "ripple::trace",
                computed = %self.name,
                "'{}' is being read outside a reactive context; doing a full recompute",
                self.name
            );
        }
        if warn {
            tracing::warn!(
                computed = %self.name,
                "computed value is being read outside a reactive context; doing a full recompute"
            );
        }
        Ok(())
    }

    /// Recompute under the tracker. Returns whether the observers have to be
    /// told about a confirmed change.
    fn track_and_compute(&self) -> bool {
        let was_suspended =
            with_state(|state| state.graph.state_of(self.id)) == DerivationState::NotTracking;
        let new_value = self.compute_value(true);

        let old_value = self.value.borrow_mut().take();
        let changed = was_suspended
            || match (&old_value, &new_value) {
                (Some(Ok(old)), Ok(new)) => !self.equals.equals(old, new),
                _ => true,
            };

        let (kept, dropped) = if changed {
            (Some(new_value), old_value)
        } else {
            (old_value, Some(new_value))
        };
        *self.value.borrow_mut() = kept;
        drop(dropped);

        tracing::trace!(computed = %self.name, changed, "recomputed");
        changed
    }

    fn compute_value(&self, track: bool) -> Result<T> {
        self.is_computing.set(true);
        with_state(|state| state.computation_depth += 1);

        let result = if track {
            track_derived_function(self.id, &self.name, || (self.derivation)())
        } else {
            panic::catch_unwind(AssertUnwindSafe(|| (self.derivation)()))
                .map_err(|payload| ReactiveError::from_panic(&self.name, payload))
        };

        with_state(|state| state.computation_depth -= 1);
        self.is_computing.set(false);
        result
    }
}

impl<T: Clone + 'static> ComputedCell for ComputedInner<T> {
    fn refresh(&self) -> Result<()> {
        self.try_get().map(drop)
    }

    fn suspend(&self) {
        if self.keep_alive {
            return;
        }
        with_state(|state| state.graph.clear_observing(self.id));
        let dropped = self.value.borrow_mut().take();
        drop(dropped);
        tracing::trace!(computed = %self.name, "suspended");
    }
}

impl<T> Drop for ComputedInner<T> {
    fn drop(&mut self) {
        runtime::release(self.id);
    }
}

/// A memoized value derived from other observables.
///
/// # Type Parameters
///
/// - `T`: The type of the computed value. `Clone` so reads can hand out
///   copies of the cache; `PartialEq` unless a custom comparer is supplied.
///
/// # Example
///
/// ```rust,ignore
/// let x = ObservableValue::new(1);
/// let double = {
///     let x = x.clone();
///     Computed::new(move || x.get() * 2)
/// };
/// assert_eq!(double.get(), 2);
/// ```
pub struct Computed<T> {
    inner: Rc<ComputedInner<T>>,
}

impl<T: Clone + PartialEq + 'static> Computed<T> {
    /// Create a computed value named `ComputedValue@<id>`.
    ///
    /// The derivation is not run immediately. It runs on first access.
    pub fn new(derivation: impl Fn() -> T + 'static) -> Self {
        Self::with_options(derivation, ComputedOptions::default())
    }

    /// Create a computed value with a debug name.
    pub fn named(name: impl Into<String>, derivation: impl Fn() -> T + 'static) -> Self {
        Self::with_options(derivation, ComputedOptions::default().name(name))
    }
}

impl<T: Clone + 'static> Computed<T> {
    pub fn with_options(derivation: impl Fn() -> T + 'static, options: ComputedOptions<T>) -> Self {
        let id = NodeId::new();
        let name: Rc<str> = match options.name {
            Some(name) => Rc::from(name),
            None => Rc::from(format!("ComputedValue@{id}")),
        };

        let inner = Rc::new(ComputedInner {
            id,
            name: Rc::clone(&name),
            derivation: Box::new(derivation),
            setter: options.setter,
            equals: options.equals,
            value: RefCell::new(None),
            is_computing: Cell::new(false),
            is_running_setter: Cell::new(false),
            keep_alive: options.keep_alive,
            requires_reaction: options.requires_reaction,
        });

        let cell: Rc<dyn ComputedCell> = inner.clone();
        let cell = Rc::downgrade(&cell);
        with_state(|state| state.graph.insert(Node::computed(id, name, cell)));

        Self { inner }
    }

    /// Get the node ID.
    pub fn id(&self) -> NodeId {
        self.inner.id
    }

    /// Get the debug name.
    pub fn name(&self) -> &str {
        &self.inner.name
    }

    /// Get the current value, recomputing if necessary.
    ///
    /// Inside a tracked run this also makes the tracked derivation depend on
    /// this computed value.
    pub fn try_get(&self) -> Result<T> {
        self.inner.try_get()
    }

    /// Get the current value.
    ///
    /// # Panics
    ///
    /// Panics with the [`ReactiveError`] as payload if the derivation failed
    /// or a cycle was detected. Inside another derivation the payload is
    /// captured and surfaces from that derivation unchanged.
    pub fn get(&self) -> T {
        match self.inner.try_get() {
            Ok(value) => value,
            Err(error) => panic::panic_any(error),
        }
    }

    /// Compute the value without tracking and without touching the cache.
    pub fn peek(&self) -> Result<T> {
        let _scope = UntrackedScope::enter();
        self.inner.compute_value(false)
    }

    /// Assign through the setter, which runs inside an action.
    pub fn set(&self, value: T) -> Result<()> {
        let Some(setter) = &self.inner.setter else {
            return Err(ReactiveError::NoSetter {
                name: self.inner.name.to_string(),
            });
        };
        if self.inner.is_running_setter.get() {
            return Err(ReactiveError::SetterReentry {
                name: self.inner.name.to_string(),
            });
        }

        self.inner.is_running_setter.set(true);
        let _reset = SetterGuard(&self.inner.is_running_setter);
        run_in_action(&format!("{}-setter", self.inner.name), || setter(value))
    }

    /// Whether a value (or captured failure) is currently cached.
    pub fn has_value(&self) -> bool {
        self.inner.value.borrow().is_some()
    }

    /// Invoke `listener` whenever the value changes.
    ///
    /// The listener runs untracked. With `fire_immediately` it also receives
    /// the initial value.
    pub fn observe(
        &self,
        listener: impl Fn(ComputedChange<T>) + 'static,
        fire_immediately: bool,
    ) -> Result<ReactionDisposer> {
        let computed = self.clone();
        let first_time = Cell::new(true);
        let previous: RefCell<Option<T>> = RefCell::new(None);

        let options = AutorunOptions {
            name: Some(format!("{}-observer", self.inner.name)),
            ..AutorunOptions::default()
        };
        autorun_with(options, move |_| {
            let new_value = computed.get();
            if !first_time.get() || fire_immediately {
                let old_value = previous.borrow().clone();
                let change = ComputedChange {
                    new_value: new_value.clone(),
                    old_value,
                };
                untracked(|| listener(change));
            }
            first_time.set(false);
            *previous.borrow_mut() = Some(new_value);
        })
    }

    /// Register a listener for the unobserved → observed transition.
    pub fn on_become_observed(&self, listener: impl Fn() + 'static) -> Disposer {
        Runtime::add_listener(self.inner.id, Rc::new(listener), true)
    }

    /// Register a listener for the observed → unobserved transition.
    pub fn on_become_unobserved(&self, listener: impl Fn() + 'static) -> Disposer {
        Runtime::add_listener(self.inner.id, Rc::new(listener), false)
    }

    /// Enable diagnostic output for invalidations of this computed value.
    pub fn trace(&self, mode: TraceMode) {
        with_state(|state| {
            if let Some(node) = state.graph.get_mut(self.inner.id) {
                node.trace_mode = mode;
            }
        });
    }
}

struct SetterGuard<'a>(&'a Cell<bool>);

impl Drop for SetterGuard<'_> {
    fn drop(&mut self) {
        self.0.set(false);
    }
}

impl<T> Clone for Computed<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Rc::clone(&self.inner),
        }
    }
}

impl<T> fmt::Debug for Computed<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Computed")
            .field("id", &self.inner.id)
            .field("name", &self.inner.name)
            .field("has_value", &self.inner.value.borrow().is_some())
            .field("keep_alive", &self.inner.keep_alive)
            .finish()
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------
