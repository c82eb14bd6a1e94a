//! Reaction Implementation
//!
//! A Reaction is an effectful derivation: it has no value, it reruns a
//! side-effecting callback when what it observes changes.
//!
//! # How Reactions Work
//!
//! 1. [`Reaction::schedule`] queues the reaction and, outside a batch, drains
//!    the queue right away.
//!
//! 2. When the scheduler gets to the reaction, it first asks whether any
//!    dependency actually changed (pulling computed values if necessary).
//!    Only then is the `on_invalidate` callback invoked.
//!
//! 3. The callback normally calls [`Reaction::track`], which runs the body
//!    under the tracker and rebinds the reaction's dependencies.
//!
//! # Differences from Computed
//!
//! - Computed values return a value; reactions do not.
//! - Computed values are lazy (pulled on access); reactions are eager (run
//!   by the scheduler when a dependency changed).
//! - Nothing can observe a reaction.
//!
//! # Disposal
//!
//! A disposed reaction is removed from the graph. Disposing a reaction
//! while its body runs defers the removal to the end of the run, and a
//! disposed reaction ignores invocations that were already queued.

use std::cell::Cell;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::rc::Rc;

use crate::error::{ReactiveError, Result};
use crate::graph::{Node, NodeId, TraceMode};

use super::context::{should_compute, track_derived_function};
use super::runtime::{end_batch, run_reactions, start_batch, with_state, ReactionErrorHandler, Runtime};

type Invalidate = Box<dyn Fn(&Reaction) -> Result<()>>;

struct ReactionInner {
    id: NodeId,
    name: Rc<str>,
    on_invalidate: Invalidate,
    error_handler: Option<ReactionErrorHandler>,
    disposed: Cell<bool>,
    running: Cell<bool>,
    run_count: Cell<usize>,
}

/// Builder for a [`Reaction`].
///
/// # Example
///
/// ```rust,ignore
/// let reaction = Reaction::builder()
///     .name("logger")
///     .on_error(|error, _| eprintln!("{error}"))
///     .build(move |reaction| reaction.track(|| println!("{}", value.get())));
/// reaction.schedule()?;
/// ```
#[derive(Default)]
pub struct ReactionBuilder {
    name: Option<String>,
    prefix: Option<&'static str>,
    error_handler: Option<ReactionErrorHandler>,
    requires_observable: bool,
}

impl ReactionBuilder {
    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Handle failures of this reaction instead of reporting them globally.
    pub fn on_error(mut self, handler: impl Fn(&ReactiveError, &Reaction) + 'static) -> Self {
        self.error_handler = Some(Rc::new(handler));
        self
    }

    pub(crate) fn error_handler(mut self, handler: Option<ReactionErrorHandler>) -> Self {
        self.error_handler = handler;
        self
    }

    /// Warn when a tracked run of this reaction reads no observable.
    pub fn requires_observable(mut self, requires_observable: bool) -> Self {
        self.requires_observable = requires_observable;
        self
    }

    /// Prefix of the generated name used when no name is given.
    pub(crate) fn default_prefix(mut self, prefix: &'static str) -> Self {
        self.prefix = Some(prefix);
        self
    }

    /// Create the reaction. It does not run until it is scheduled.
    pub fn build(self, on_invalidate: impl Fn(&Reaction) -> Result<()> + 'static) -> Reaction {
        let id = NodeId::new();
        let name: Rc<str> = match self.name {
            Some(name) => Rc::from(name),
            None => Rc::from(format!("{}@{id}", self.prefix.unwrap_or("Reaction"))),
        };

        let reaction = Reaction {
            inner: Rc::new(ReactionInner {
                id,
                name: Rc::clone(&name),
                on_invalidate: Box::new(on_invalidate),
                error_handler: self.error_handler,
                disposed: Cell::new(false),
                running: Cell::new(false),
                run_count: Cell::new(0),
            }),
        };

        let mut node = Node::reaction(id, name, reaction.clone());
        node.requires_observable = self.requires_observable;
        with_state(|state| state.graph.insert(node));
        reaction
    }
}

/// A derivation that reruns a side effect when its dependencies change.
///
/// Cloning a `Reaction` yields another handle to the same reaction. The
/// graph keeps the reaction alive until it is disposed.
#[derive(Clone)]
pub struct Reaction {
    inner: Rc<ReactionInner>,
}

impl Reaction {
    /// Create a reaction named `name` with the given invalidation callback.
    pub fn new(name: impl Into<String>, on_invalidate: impl Fn(&Reaction) -> Result<()> + 'static) -> Self {
        Self::builder().name(name).build(on_invalidate)
    }

    pub fn builder() -> ReactionBuilder {
        ReactionBuilder::default()
    }

    /// Get the node ID.
    pub fn id(&self) -> NodeId {
        self.inner.id
    }

    /// Get the debug name.
    pub fn name(&self) -> &str {
        &self.inner.name
    }

    /// Queue the reaction for a run. Outside a batch the queue is drained
    /// immediately.
    pub fn schedule(&self) -> Result<()> {
        let id = self.inner.id;
        let queued = with_state(|state| {
            if state.graph.get(id).is_none() || state.graph.is_scheduled(id) {
                return false;
            }
            state.graph.set_scheduled(id, true);
            state.graph.pending_reactions.push(id);
            true
        });
        if queued {
            run_reactions()
        } else {
            Ok(())
        }
    }

    /// Run `f` under the tracker and make the reaction depend on exactly
    /// what `f` read.
    ///
    /// A panic inside `f` is routed to the error handler (or reported
    /// globally); the returned error, if any, comes from the drain that ends
    /// this run's batch.
    pub fn track(&self, f: impl FnOnce()) -> Result<()> {
        if self.is_disposed() {
            return Ok(());
        }

        start_batch();
        self.inner.running.set(true);
        let result = track_derived_function(self.inner.id, &self.inner.name, f);
        self.inner.running.set(false);
        self.inner.run_count.set(self.inner.run_count.get() + 1);

        if self.is_disposed() {
            // Disposed during the run.
            let removed = with_state(|state| state.graph.remove(self.inner.id));
            drop(removed);
        }
        if let Err(error) = result {
            self.report_exception(error);
        }
        end_batch()
    }

    /// Invoked by the scheduler for a queued reaction.
    pub(crate) fn run_reaction(&self) {
        if self.is_disposed() {
            return;
        }

        start_batch();
        with_state(|state| state.graph.set_scheduled(self.inner.id, false));
        if should_compute(self.inner.id) {
            tracing::trace!(reaction = %self.inner.name, "running reaction");
            let outcome = panic::catch_unwind(AssertUnwindSafe(|| (self.inner.on_invalidate)(self)));
            let error = match outcome {
                Ok(Ok(())) => None,
                Ok(Err(error)) => Some(error),
                Err(payload) => Some(ReactiveError::from_panic(&self.inner.name, payload)),
            };
            if let Some(error) = error {
                self.report_exception(error);
            }
        }
        if let Err(error) = end_batch() {
            with_state(|state| state.uncaught.push(error));
        }
    }

    /// Route a failure of this reaction to its handler, or log it and hand
    /// it to the global handlers and the drain caller.
    pub(crate) fn report_exception(&self, error: ReactiveError) {
        if let Some(handler) = &self.inner.error_handler {
            handler(&error, self);
            return;
        }

        tracing::error!(reaction = %self.inner.name, %error, "uncaught error in reaction");
        let handlers = with_state(|state| {
            state.uncaught.push(error.clone());
            state
                .reaction_error_handlers
                .iter()
                .map(|(_, handler)| Rc::clone(handler))
                .collect::<Vec<_>>()
        });
        for handler in handlers {
            handler(&error, self);
        }
    }

    /// Stop the reaction for good and remove it from the graph.
    pub fn dispose(&self) -> Result<()> {
        if self.inner.disposed.replace(true) {
            return Ok(());
        }
        tracing::debug!(reaction = %self.inner.name, "disposing reaction");

        if self.inner.running.get() {
            return Ok(());
        }
        start_batch();
        let removed = with_state(|state| state.graph.remove(self.inner.id));
        drop(removed);
        end_batch()
    }

    pub fn is_disposed(&self) -> bool {
        self.inner.disposed.get()
    }

    /// Whether the reaction is waiting in the scheduler's queue.
    pub fn is_scheduled(&self) -> bool {
        with_state(|state| state.graph.is_scheduled(self.inner.id))
    }

    /// Observables read during the last completed tracked run.
    pub fn observing(&self) -> Vec<NodeId> {
        Runtime::observing(self.inner.id)
    }

    /// Number of completed tracked runs.
    pub fn run_count(&self) -> usize {
        self.inner.run_count.get()
    }

    /// Enable diagnostic output for invalidations of this reaction.
    pub fn trace(&self, mode: TraceMode) {
        with_state(|state| {
            if let Some(node) = state.graph.get_mut(self.inner.id) {
                node.trace_mode = mode;
            }
        });
    }
}

impl fmt::Debug for Reaction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Reaction")
            .field("id", &self.inner.id)
            .field("name", &self.inner.name)
            .field("disposed", &self.inner.disposed.get())
            .field("run_count", &self.inner.run_count.get())
            .finish()
    }
}
