//! Actions and Transactions
//!
//! An action is the place where state is supposed to change. Running code
//! as an action:
//!
//! - batches it, so reactions run once after the outermost action ends,
//! - untracks it, so a derivation calling an action doesn't depend on what
//!   the action reads,
//! - allows state changes when actions are enforced.
//!
//! A transaction only batches.

use std::mem;

use crate::error::Result;
use crate::graph::NodeId;

use super::runtime::{end_batch, try_with_state, with_state, BatchGuard};

/// Guard for a running action. Restores the previous tracking and
/// permission state when dropped.
struct ActionScope {
    prev_tracking: Option<NodeId>,
    prev_allow_changes: bool,
    prev_allow_reads: bool,
    ended: bool,
}

impl ActionScope {
    fn enter() -> Self {
        with_state(|state| {
            state.in_batch += 1;
            Self {
                prev_tracking: state.tracking.take(),
                prev_allow_changes: mem::replace(&mut state.allow_state_changes, true),
                prev_allow_reads: mem::replace(&mut state.allow_state_reads, true),
                ended: false,
            }
        })
    }

    fn exit(mut self) -> Result<()> {
        self.ended = true;
        let (allow_changes, allow_reads) = (self.prev_allow_changes, self.prev_allow_reads);
        with_state(|state| {
            state.allow_state_changes = allow_changes;
            state.allow_state_reads = allow_reads;
        });
        let drained = end_batch();
        let tracking = self.prev_tracking;
        with_state(|state| state.tracking = tracking);
        drained
    }
}

impl Drop for ActionScope {
    fn drop(&mut self) {
        if self.ended {
            return;
        }
        // The action panicked; restore without draining.
        let (tracking, allow_changes, allow_reads) =
            (self.prev_tracking, self.prev_allow_changes, self.prev_allow_reads);
        try_with_state(|state| {
            state.allow_state_changes = allow_changes;
            state.allow_state_reads = allow_reads;
            state.in_batch = state.in_batch.saturating_sub(1);
            state.tracking = tracking;
        });
    }
}

/// Run `f` as an action named `name`.
///
/// Returns `f`'s result, or the first uncaught reaction failure of the
/// drain at the end of the action.
///
/// # Example
///
/// ```rust,ignore
/// run_in_action("transfer", || {
///     from.set(from.get() - amount)?;
///     to.set(to.get() + amount)
/// })??;
/// ```
pub fn run_in_action<R>(name: &str, f: impl FnOnce() -> R) -> Result<R> {
    tracing::trace!(action = name, "running action");
    let scope = ActionScope::enter();
    let result = f();
    scope.exit()?;
    Ok(result)
}

/// Wrap `f` so that every call runs as an action named `name`.
pub fn action<R>(name: impl Into<String>, f: impl Fn() -> R) -> impl Fn() -> Result<R> {
    let name = name.into();
    move || run_in_action(&name, &f)
}

/// Run `f` in a batch: reactions run once, after `f` returns.
pub fn transaction<R>(f: impl FnOnce() -> R) -> Result<R> {
    let batch = BatchGuard::start();
    let result = f();
    batch.end()?;
    Ok(result)
}
