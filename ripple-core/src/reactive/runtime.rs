//! Reactive Runtime
//!
//! The runtime is the central coordinator that connects atoms, computed
//! values and reactions. It owns the dependency graph and the global
//! scheduler state, and it implements the batch protocol and the reaction
//! scheduler.
//!
//! # How It Works
//!
//! 1. Every write happens inside a batch. `start_batch` bumps a depth
//!    counter; only the `end_batch` that brings it back to zero does any
//!    work.
//!
//! 2. At depth zero the scheduler drains the pending reactions, round by
//!    round, until no reaction is left. Reactions that schedule further
//!    reactions simply extend the drain.
//!
//! 3. After the drain, observables that lost their last observer during the
//!    batch fire their unobserved hooks, and idle computed values are
//!    suspended.
//!
//! # Threading
//!
//! The runtime lives in thread-local storage and every handle is `Rc`
//! based, so each thread has its own independent graph. The state sits in a
//! `RefCell` that is never borrowed while user code runs; listeners and
//! trace events discovered during a borrow are fired once it is released.

use std::cell::RefCell;
use std::mem;
use std::rc::Rc;

use crate::config::{Config, EnforceActions};
use crate::error::{ReactiveError, Result};
use crate::graph::{
    DependencyTree, DerivationState, Graph, Listener, NodeId, ObserverTree, TraceEvent,
};

use super::reaction::Reaction;
use super::Disposer;

/// Callback invoked for every invalidation performed by propagation.
pub type TraceHook = Rc<dyn Fn(&TraceEvent)>;

/// Callback invoked for reaction failures that have no local handler.
pub type ReactionErrorHandler = Rc<dyn Fn(&ReactiveError, &Reaction)>;

/// Process-wide (per thread) mutable scheduler state.
pub(crate) struct GlobalState {
    pub(crate) graph: Graph,

    /// Batch depth. Reactions only run when it returns to zero.
    pub(crate) in_batch: usize,

    /// The single derivation currently being tracked, if any.
    pub(crate) tracking: Option<NodeId>,

    /// Monotonic id handed to every tracked run.
    pub(crate) run_id: u64,

    /// Number of computed values currently being derived.
    pub(crate) computation_depth: usize,

    pub(crate) allow_state_changes: bool,
    pub(crate) allow_state_reads: bool,
    pub(crate) is_running_reactions: bool,

    /// Reaction failures nobody handled, returned to the drain caller.
    pub(crate) uncaught: Vec<ReactiveError>,

    pub(crate) config: Config,
    pub(crate) trace_hook: Option<TraceHook>,
    pub(crate) reaction_error_handlers: Vec<(u64, ReactionErrorHandler)>,
    pub(crate) next_listener_key: u64,

    /// Listeners to fire as soon as the state is released.
    pub(crate) deferred: Vec<Listener>,
}

impl Default for GlobalState {
    fn default() -> Self {
        Self {
            graph: Graph::default(),
            in_batch: 0,
            tracking: None,
            run_id: 0,
            computation_depth: 0,
            allow_state_changes: true,
            allow_state_reads: true,
            is_running_reactions: false,
            uncaught: Vec::new(),
            config: Config::default(),
            trace_hook: None,
            reaction_error_handlers: Vec::new(),
            next_listener_key: 0,
            deferred: Vec::new(),
        }
    }
}

impl GlobalState {
    /// Register a read of `observable`.
    ///
    /// Inside a tracked run the observable becomes a dependency of the
    /// tracked derivation. Outside one, an unobserved observable read during
    /// a batch is queued so its unobserved hook still fires at batch end.
    pub(crate) fn report_observed(&mut self, observable: NodeId) -> bool {
        self.check_read_allowed(observable);

        match self.tracking {
            Some(derivation) => {
                let listeners = self.graph.record_read(observable, derivation);
                self.deferred.extend(listeners);
                true
            }
            None => {
                if !self.graph.has_observers(observable) && self.in_batch > 0 {
                    self.graph.queue_for_unobservation(observable);
                }
                false
            }
        }
    }

    /// Fail if writing `observable` right now violates the mutation policy.
    pub(crate) fn check_mutation_allowed(&self, observable: NodeId) -> Result<()> {
        let Some(node) = self.graph.get(observable) else {
            return Ok(());
        };
        let has_observers = node.has_observers();

        if self.computation_depth > 0 && has_observers {
            return Err(ReactiveError::MutationInsideComputed {
                name: node.name.to_string(),
            });
        }
        if !self.allow_state_changes
            && (has_observers || self.config.enforce_actions == EnforceActions::Always)
        {
            return Err(ReactiveError::MutationOutsideAction {
                name: node.name.to_string(),
            });
        }
        Ok(())
    }

    fn check_read_allowed(&self, observable: NodeId) {
        if !self.allow_state_reads && self.config.observable_requires_reaction {
            if let Some(node) = self.graph.get(observable) {
                tracing::warn!(
                    observable = %node.name,
                    "observable is being read outside a reactive context"
                );
            }
        }
    }

    fn next_key(&mut self) -> u64 {
        self.next_listener_key += 1;
        self.next_listener_key
    }
}

struct RuntimeCell {
    state: RefCell<GlobalState>,
    /// Nodes whose handles were dropped while the state was borrowed.
    graveyard: RefCell<Vec<NodeId>>,
}

thread_local! {
    static RUNTIME: RuntimeCell = RuntimeCell {
        state: RefCell::new(GlobalState::default()),
        graveyard: RefCell::new(Vec::new()),
    };
}

/// Run `f` against the current thread's state, then fire whatever
/// listeners and trace events it produced.
///
/// # Panics
///
/// Panics if called while the state is already borrowed, which would mean
/// user code ran inside a graph operation.
pub(crate) fn with_state<R>(f: impl FnOnce(&mut GlobalState) -> R) -> R {
    let (result, deferred, events, hook) = RUNTIME.with(|runtime| {
        let mut state = runtime.state.borrow_mut();
        let result = f(&mut state);
        let deferred = mem::take(&mut state.deferred);
        let events = mem::take(&mut state.graph.trace_events);
        let hook = if events.is_empty() {
            None
        } else {
            state.trace_hook.clone()
        };
        (result, deferred, events, hook)
    });

    for listener in deferred {
        listener();
    }
    if let Some(hook) = hook {
        for event in &events {
            hook(event);
        }
    }
    result
}

/// Like [`with_state`], but does nothing if the state is unavailable.
///
/// Used by drop guards, which may run while a panic unwinds.
pub(crate) fn try_with_state(f: impl FnOnce(&mut GlobalState)) {
    let _ = RUNTIME.try_with(|runtime| {
        if let Ok(mut state) = runtime.state.try_borrow_mut() {
            f(&mut state);
        }
    });
}

/// Remove the node of a dropped handle, or park it if the state is busy.
pub(crate) fn release(id: NodeId) {
    let removed = RUNTIME
        .try_with(|runtime| match runtime.state.try_borrow_mut() {
            Ok(mut state) => state.graph.remove(id),
            Err(_) => {
                runtime.graveyard.borrow_mut().push(id);
                None
            }
        })
        .ok()
        .flatten();
    drop(removed);
}

fn sweep_graveyard() {
    let buried = RUNTIME.with(|runtime| mem::take(&mut *runtime.graveyard.borrow_mut()));
    for id in buried {
        let removed = with_state(|state| state.graph.remove(id));
        drop(removed);
    }
}

/// Open a batch. Batches nest; only the outermost end drains.
pub fn start_batch() {
    with_state(|state| state.in_batch += 1);
}

/// Close a batch. When the outermost batch closes, pending reactions run
/// and idle observables are released.
///
/// Returns the first reaction failure nobody handled, or `ReactionLoop` if
/// the reactions did not settle.
pub fn end_batch() -> Result<()> {
    let depth = with_state(|state| {
        if state.in_batch == 0 {
            return None;
        }
        state.in_batch -= 1;
        Some(state.in_batch)
    });

    match depth {
        None => Err(ReactiveError::UnbalancedBatch),
        Some(0) => {
            let drained = run_reactions();
            process_unobservations();
            sweep_graveyard();
            drained
        }
        Some(_) => Ok(()),
    }
}

/// A batch that is closed explicitly with [`BatchGuard::end`].
///
/// If the guard is dropped without being ended (the batched code panicked),
/// the depth is restored without draining.
pub(crate) struct BatchGuard {
    ended: bool,
}

impl BatchGuard {
    pub(crate) fn start() -> Self {
        start_batch();
        Self { ended: false }
    }

    pub(crate) fn end(mut self) -> Result<()> {
        self.ended = true;
        end_batch()
    }
}

impl Drop for BatchGuard {
    fn drop(&mut self) {
        if !self.ended {
            try_with_state(|state| state.in_batch = state.in_batch.saturating_sub(1));
        }
    }
}

/// Drain the pending reaction queue unless a batch is open or a drain is
/// already in progress further up the stack.
pub(crate) fn run_reactions() -> Result<()> {
    let (start, max_iterations) = with_state(|state| {
        if state.in_batch > 0 || state.is_running_reactions {
            (false, 0)
        } else {
            state.is_running_reactions = true;
            (true, state.config.max_reaction_iterations)
        }
    });
    if !start {
        return Ok(());
    }

    let mut iterations = 0;
    let mut runaway = None;
    loop {
        let round = with_state(|state| mem::take(&mut state.graph.pending_reactions));
        if round.is_empty() {
            break;
        }

        if iterations == max_iterations {
            let name = with_state(|state| {
                for id in &round {
                    state.graph.set_scheduled(*id, false);
                }
                state
                    .graph
                    .get(round[0])
                    .map(|node| node.name.to_string())
                    .unwrap_or_default()
            });
            tracing::error!(
                reaction = %name,
                iterations,
                "reaction doesn't converge to a stable state; probably a cycle in the reactive function"
            );
            runaway = Some(ReactiveError::ReactionLoop { name, iterations });
            break;
        }

        iterations += 1;
        tracing::trace!(iterations, reactions = round.len(), "running reactions");
        for id in round {
            if let Some(reaction) = with_state(|state| state.graph.reaction(id)) {
                reaction.run_reaction();
            }
        }
    }

    let uncaught = with_state(|state| {
        state.is_running_reactions = false;
        mem::take(&mut state.uncaught)
    });

    match (runaway, uncaught.into_iter().next()) {
        (Some(error), _) | (None, Some(error)) => Err(error),
        (None, None) => Ok(()),
    }
}

/// Fire unobserved hooks and suspend idle computed values. Entries queued
/// while this runs (a suspended computed releasing its own dependencies)
/// are processed in the same pass.
fn process_unobservations() {
    while let Some(settled) = with_state(|state| state.graph.next_unobservation()) {
        for listener in settled.listeners {
            listener();
        }
        if let Some(cell) = settled.cell {
            cell.suspend();
        }
    }
}

/// Entry points for inspecting and instrumenting the current thread's
/// runtime.
pub struct Runtime;

impl Runtime {
    /// Current batch depth.
    pub fn batch_depth() -> usize {
        with_state(|state| state.in_batch)
    }

    /// Check if a derivation is currently being tracked.
    pub fn is_tracking() -> bool {
        with_state(|state| state.tracking.is_some())
    }

    /// Get the derivation currently being tracked, if any.
    pub fn current_derivation() -> Option<NodeId> {
        with_state(|state| state.tracking)
    }

    /// Register a read of `id` with the tracked derivation.
    pub fn report_observed(id: NodeId) -> bool {
        with_state(|state| state.report_observed(id))
    }

    /// Freshness state of a node. Unknown nodes are `NotTracking`.
    pub fn state_of(id: NodeId) -> DerivationState {
        with_state(|state| state.graph.state_of(id))
    }

    /// Derivations currently observing `id`, in subscription order.
    pub fn observers(id: NodeId) -> Vec<NodeId> {
        with_state(|state| state.graph.observers(id))
    }

    /// Observables `id` read during its last completed tracked run.
    pub fn observing(id: NodeId) -> Vec<NodeId> {
        with_state(|state| state.graph.observing(id).to_vec())
    }

    /// Number of live nodes in this thread's graph.
    pub fn node_count() -> usize {
        with_state(|state| state.graph.node_count())
    }

    /// Check that every edge is recorded on both of its ends.
    pub fn is_consistent() -> bool {
        with_state(|state| state.graph.is_consistent())
    }

    /// Snapshot of what `id` depends on.
    pub fn dependency_tree(id: NodeId) -> Option<DependencyTree> {
        with_state(|state| state.graph.dependency_tree(id))
    }

    /// Snapshot of what depends on `id`.
    pub fn observer_tree(id: NodeId) -> Option<ObserverTree> {
        with_state(|state| state.graph.observer_tree(id))
    }

    /// The active configuration.
    pub fn config() -> Config {
        with_state(|state| state.config.clone())
    }

    /// Install or remove the trace hook.
    pub fn set_trace_hook(hook: Option<TraceHook>) {
        with_state(|state| {
            state.graph.trace_enabled = hook.is_some();
            state.trace_hook = hook;
        });
    }

    /// Register a handler for reaction failures that have no local handler.
    pub fn on_reaction_error(handler: impl Fn(&ReactiveError, &Reaction) + 'static) -> Disposer {
        let key = with_state(|state| {
            let key = state.next_key();
            state.reaction_error_handlers.push((key, Rc::new(handler)));
            key
        });
        Disposer::new(move || {
            let removed = with_state(|state| {
                let handlers = mem::take(&mut state.reaction_error_handlers);
                let (removed, kept): (Vec<_>, Vec<_>) =
                    handlers.into_iter().partition(|(candidate, _)| *candidate == key);
                state.reaction_error_handlers = kept;
                removed
            });
            drop(removed);
        })
    }

    pub(crate) fn add_listener(id: NodeId, listener: Listener, observed: bool) -> Disposer {
        let key = with_state(|state| {
            let key = state.next_key();
            state.graph.add_listener(id, key, listener, observed);
            key
        });
        Disposer::new(move || {
            let removed = with_state(|state| state.graph.remove_listener(id, key));
            drop(removed);
        })
    }
}
