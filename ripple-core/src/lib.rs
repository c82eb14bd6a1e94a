//! Ripple Core
//!
//! This crate provides a transparent reactive dependency engine: ordinary
//! mutable state notifies interested computations and side effects
//! automatically, without manually wired subscriptions.
//! It implements:
//!
//! - Observable atoms and boxed observable values
//! - Memoized computed values with lazy change confirmation
//! - Reactions (`autorun`, `reaction`) that rerun when their inputs change
//! - Batches, transactions and actions
//! - A glitch-free scheduler that runs each stale reaction once per batch
//!
//! # Architecture
//!
//! The crate is organized into several modules:
//!
//! - `graph`: Node records, dependency edges, propagation primitives
//! - `reactive`: The runtime and the user-facing primitives
//! - `config`: Runtime policies (action enforcement, warnings, limits)
//! - `error`: The error type shared by every fallible operation
//!
//! # Example
//!
//! ```rust,ignore
//! use ripple_core::reactive::{autorun, Computed, ObservableValue};
//!
//! // Create an observable
//! let count = ObservableValue::new(1);
//!
//! // Create a derived value
//! let doubled = {
//!     let count = count.clone();
//!     Computed::new(move || count.get() * 2)
//! };
//!
//! // Create a reaction
//! let disposer = autorun(move |_| {
//!     println!("Doubled: {}", doubled.get());
//! })?;
//!
//! // Update the observable
//! count.set(5)?;
//! // The reaction runs again and prints: "Doubled: 10"
//!
//! disposer.dispose()?;
//! ```

pub mod config;
pub mod error;
pub mod graph;
pub mod reactive;

pub use config::{configure, Config, EnforceActions};
pub use error::{ReactiveError, Result};
pub use graph::{DerivationState, NodeId, NodeKind, TraceEvent, TraceMode};
pub use reactive::{
    action, autorun, autorun_with, reaction, run_in_action, transaction, untracked, Atom,
    Computed, ComputedOptions, ObservableValue, Reaction, Runtime,
};
