//! Tracking Context
//!
//! The tracking context records which derivation is currently running so
//! that reads can be attributed to it. Only one derivation is tracked at a
//! time; nesting (a computed value read inside a reaction, an untracked
//! section inside a computed value) saves the previous derivation and
//! restores it afterwards.
//!
//! # Implementation
//!
//! The tracked derivation lives in the runtime's global state. Scopes are
//! RAII guards, so the previous derivation is restored even if the body
//! panics.

use std::panic::{self, AssertUnwindSafe};

use crate::error::{ReactiveError, Result};
use crate::graph::{DerivationState, NodeId};

use super::runtime::{try_with_state, with_state};

/// Guard that suspends tracking until dropped.
///
/// Reads performed while the guard is alive are not attributed to any
/// derivation.
pub(crate) struct UntrackedScope {
    prev_tracking: Option<NodeId>,
    prev_allow_reads: bool,
}

impl UntrackedScope {
    pub(crate) fn enter() -> Self {
        with_state(|state| Self {
            prev_tracking: state.tracking.take(),
            prev_allow_reads: std::mem::replace(&mut state.allow_state_reads, true),
        })
    }
}

impl Drop for UntrackedScope {
    fn drop(&mut self) {
        let tracking = self.prev_tracking;
        let allow_reads = self.prev_allow_reads;
        try_with_state(|state| {
            state.tracking = tracking;
            state.allow_state_reads = allow_reads;
        });
    }
}

/// Run `f` without establishing dependencies on anything it reads.
///
/// # Example
///
/// ```rust,ignore
/// autorun(move |_| {
///     let tracked = a.get();
///     let not_tracked = untracked(|| b.get());
///     println!("{tracked} {not_tracked}");
/// })?;
/// ```
pub fn untracked<R>(f: impl FnOnce() -> R) -> R {
    let _scope = UntrackedScope::enter();
    f()
}

/// Run `f` as a tracked run of `derivation` and rebind its dependencies to
/// exactly the observables `f` read.
///
/// A panic inside `f` is captured and returned as an error; the dependency
/// bookkeeping is completed either way.
pub(crate) fn track_derived_function<T>(
    derivation: NodeId,
    name: &str,
    f: impl FnOnce() -> T,
) -> Result<T> {
    let (prev_tracking, prev_allow_reads) = with_state(|state| {
        state.run_id += 1;
        let run_id = state.run_id;
        state.graph.begin_tracking(derivation, run_id);
        (
            state.tracking.replace(derivation),
            std::mem::replace(&mut state.allow_state_reads, true),
        )
    });

    let result = panic::catch_unwind(AssertUnwindSafe(f));

    with_state(|state| {
        state.tracking = prev_tracking;
        state.allow_state_reads = prev_allow_reads;
        state.graph.bind_dependencies(derivation);

        if let Some(node) = state.graph.get(derivation) {
            let requires = node.requires_observable || state.config.reaction_requires_observable;
            if requires && node.observing.is_empty() {
                tracing::warn!(
                    derivation = %node.name,
                    "derivation is created or reconfigured without reading any observable value"
                );
            }
        }
    });

    result.map_err(|payload| ReactiveError::from_panic(name, payload))
}

/// Decide whether `derivation` has to rerun.
///
/// A possibly stale derivation pulls its computed dependencies, in
/// dependency order, until one of them confirms a change. If none does, the
/// derivation is marked up to date without rerunning.
pub(crate) fn should_compute(derivation: NodeId) -> bool {
    match with_state(|state| state.graph.state_of(derivation)) {
        DerivationState::UpToDate => false,
        DerivationState::NotTracking | DerivationState::Stale => true,
        DerivationState::PossiblyStale => {
            let _scope = UntrackedScope::enter();
            let observing = with_state(|state| state.graph.observing(derivation));

            for dep in observing {
                let Some(cell) = with_state(|state| state.graph.computed_cell(dep)) else {
                    continue;
                };
                // A failing dependency counts as a change; the error is
                // surfaced when the derivation reruns and reads it.
                if cell.refresh().is_err() {
                    return true;
                }
                if with_state(|state| state.graph.state_of(derivation)) == DerivationState::Stale {
                    return true;
                }
            }

            with_state(|state| state.graph.change_dependencies_state_to_0(derivation));
            false
        }
    }
}
