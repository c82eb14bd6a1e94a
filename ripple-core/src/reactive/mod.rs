//! Reactive Primitives
//!
//! This module implements the user-facing half of the kernel: atoms,
//! computed values and reactions, and the runtime that schedules them.
//!
//! # Concepts
//!
//! ## Atoms
//!
//! An Atom is the minimal observable. When it is read within a tracked run
//! (of a computed value or a reaction), the running derivation starts
//! depending on it. When it reports a change, every derivation depending on
//! it becomes stale. [`ObservableValue`] is a boxed value built on an atom.
//!
//! ## Computed Values
//!
//! A Computed is a derived value that caches its result. It re-evaluates
//! only when one of its dependencies actually changed, and it stops
//! caching (suspends) as soon as nothing observes it anymore.
//!
//! ## Reactions
//!
//! A Reaction is a side-effecting derivation that reruns whenever its
//! dependencies change. [`autorun`] and [`reaction`] are the usual ways to
//! create one.
//!
//! ## Batches and Actions
//!
//! Changes made inside a batch notify reactions once, when the outermost
//! batch ends. Actions are untracked batches that are allowed to change
//! state when actions are enforced.
//!
//! # Implementation Notes
//!
//! The system uses a thread-local runtime to detect dependencies
//! automatically. When an observable is read, the runtime checks whether a
//! derivation is being tracked and, if so, records the dependency. The
//! dependency set is reconciled after every tracked run, so dependencies
//! can change from one run to the next.
//!
//! This approach (sometimes called "transparent reactivity") is used by
//! MobX, SolidJS and Vue 3.

mod action;
mod atom;
mod autorun;
mod comparer;
mod computed;
mod context;
mod disposer;
mod reaction;
pub(crate) mod runtime;
mod value;

pub use action::{action, run_in_action, transaction};
pub use atom::Atom;
pub use autorun::{
    autorun, autorun_with, reaction, AutorunOptions, ReactionDisposer, ReactionOptions, Scheduler,
};
pub use comparer::Comparer;
pub use computed::{Computed, ComputedChange, ComputedOptions};
pub use context::untracked;
pub use disposer::Disposer;
pub use reaction::{Reaction, ReactionBuilder};
pub use runtime::{end_batch, start_batch, ReactionErrorHandler, Runtime, TraceHook};
pub use value::ObservableValue;
