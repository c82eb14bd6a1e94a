//! Autorun and Reaction Helpers
//!
//! The two usual ways to create a reaction:
//!
//! - [`autorun`] runs a view function immediately and reruns it whenever
//!   anything it read changes.
//! - [`reaction`] splits the work in two: a tracked expression that
//!   produces a value, and an untracked effect that only runs when that
//!   value changes.
//!
//! Both accept a pluggable scheduler that defers reruns, for example to the
//! next tick of an event loop. A deferred run re-tracks the reaction, so the
//! graph reflects the most recent run whenever it eventually executes.

use std::cell::{Cell, RefCell};
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::rc::Rc;

use crate::error::{ReactiveError, Result};

use super::action::run_in_action;
use super::comparer::Comparer;
use super::reaction::Reaction;
use super::runtime::{end_batch, start_batch, ReactionErrorHandler};

/// Defers a rerun. Receives the run to perform.
pub type Scheduler = Rc<dyn Fn(Box<dyn FnOnce()>)>;

/// Options for [`autorun_with`].
#[derive(Default)]
pub struct AutorunOptions {
    /// Debug name. Defaults to `Autorun@<id>`.
    pub name: Option<String>,

    /// Warn when a run reads no observable.
    pub requires_observable: bool,

    /// Defer reruns through this scheduler instead of running them
    /// synchronously at the end of the batch.
    pub scheduler: Option<Scheduler>,

    /// Handle failures of the view instead of reporting them globally.
    pub on_error: Option<ReactionErrorHandler>,
}

/// Options for [`reaction`].
pub struct ReactionOptions<T> {
    /// Debug name. Defaults to `Reaction@<id>`.
    pub name: Option<String>,

    /// Run the effect with the first value of the expression.
    pub fire_immediately: bool,

    /// Comparer deciding whether the expression value changed.
    pub equals: Option<Comparer<T>>,

    pub requires_observable: bool,
    pub scheduler: Option<Scheduler>,
    pub on_error: Option<ReactionErrorHandler>,
}

impl<T> Default for ReactionOptions<T> {
    fn default() -> Self {
        Self {
            name: None,
            fire_immediately: false,
            equals: None,
            requires_observable: false,
            scheduler: None,
            on_error: None,
        }
    }
}

/// Stops a reaction created by [`autorun`] or [`reaction`].
#[derive(Clone)]
pub struct ReactionDisposer {
    reaction: Reaction,
}

impl ReactionDisposer {
    /// Dispose the underlying reaction.
    pub fn dispose(&self) -> Result<()> {
        self.reaction.dispose()
    }

    /// The underlying reaction.
    pub fn reaction(&self) -> &Reaction {
        &self.reaction
    }
}

impl fmt::Debug for ReactionDisposer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("ReactionDisposer").field(&self.reaction).finish()
    }
}

/// Run `view` now and again whenever anything it read changes.
///
/// # Example
///
/// ```rust,ignore
/// let count = ObservableValue::new(0);
/// let reader = count.clone();
/// let disposer = autorun(move |_| println!("count is {}", reader.get()))?;
///
/// count.set(5)?; // prints "count is 5"
/// disposer.dispose()?;
/// ```
pub fn autorun(view: impl Fn(&Reaction) + 'static) -> Result<ReactionDisposer> {
    autorun_with(AutorunOptions::default(), view)
}

/// [`autorun`] with options.
///
/// If the first run fails and nobody handles the failure, the reaction is
/// disposed and the failure returned.
pub fn autorun_with(
    options: AutorunOptions,
    view: impl Fn(&Reaction) + 'static,
) -> Result<ReactionDisposer> {
    let mut builder = Reaction::builder()
        .default_prefix("Autorun")
        .requires_observable(options.requires_observable)
        .error_handler(options.on_error);
    if let Some(name) = options.name {
        builder = builder.name(name);
    }

    let view = Rc::new(view);
    let reaction = match options.scheduler {
        None => builder.build(move |reaction| reaction.track(|| view(reaction))),
        Some(scheduler) => {
            let is_scheduled = Rc::new(Cell::new(false));
            builder.build(move |reaction| {
                if is_scheduled.replace(true) {
                    return Ok(());
                }
                let (reaction, view, is_scheduled) =
                    (reaction.clone(), Rc::clone(&view), Rc::clone(&is_scheduled));
                scheduler(Box::new(move || {
                    is_scheduled.set(false);
                    if reaction.is_disposed() {
                        return;
                    }
                    if let Err(error) = reaction.track(|| view(&reaction)) {
                        tracing::error!(reaction = %reaction.name(), %error, "deferred reaction run failed");
                    }
                }));
                Ok(())
            })
        }
    };

    start(reaction)
}

/// Track `expression` and run `effect` with its value whenever that value
/// changes.
///
/// The effect runs untracked, inside an action. Values are compared with
/// `options.equals`, `PartialEq` by default.
pub fn reaction<T: Clone + PartialEq + 'static>(
    expression: impl Fn(&Reaction) -> T + 'static,
    effect: impl Fn(&T, &Reaction) + 'static,
    options: ReactionOptions<T>,
) -> Result<ReactionDisposer> {
    let mut builder = Reaction::builder()
        .requires_observable(options.requires_observable)
        .error_handler(options.on_error);
    if let Some(name) = options.name {
        builder = builder.name(name);
    }

    let equals = options.equals.unwrap_or_else(Comparer::by_eq);
    let runner = Rc::new(ExpressionRunner {
        expression: Box::new(expression),
        effect: Box::new(effect),
        equals,
        fire_immediately: options.fire_immediately,
        first_time: Cell::new(true),
        value: RefCell::new(None),
        is_scheduled: Cell::new(false),
    });

    let scheduler = options.scheduler;
    let reaction = builder.build(move |reaction| {
        let first_or_sync = runner.first_time.get() || scheduler.is_none();
        match &scheduler {
            Some(scheduler) if !first_or_sync => {
                if !runner.is_scheduled.replace(true) {
                    let (runner, reaction) = (Rc::clone(&runner), reaction.clone());
                    scheduler(Box::new(move || {
                        // The effect fires after the tracked run's batch has
                        // closed; this batch collects its failure.
                        start_batch();
                        let ran = runner.run(&reaction);
                        if let Err(error) = ran.and(end_batch()) {
                            tracing::error!(reaction = %reaction.name(), %error, "deferred reaction run failed");
                        }
                    }));
                }
                Ok(())
            }
            _ => runner.run(reaction),
        }
    });

    start(reaction)
}

fn start(reaction: Reaction) -> Result<ReactionDisposer> {
    if let Err(error) = reaction.schedule() {
        // A failure nobody handled; don't leave a half-started reaction.
        if let Err(dispose_error) = reaction.dispose() {
            tracing::warn!(
                reaction = %reaction.name(),
                error = %dispose_error,
                "disposing a reaction whose first run failed"
            );
        }
        return Err(error);
    }
    Ok(ReactionDisposer { reaction })
}

struct ExpressionRunner<T> {
    expression: Box<dyn Fn(&Reaction) -> T>,
    effect: Box<dyn Fn(&T, &Reaction)>,
    equals: Comparer<T>,
    fire_immediately: bool,
    first_time: Cell<bool>,
    value: RefCell<Option<T>>,
    is_scheduled: Cell<bool>,
}

impl<T: Clone + 'static> ExpressionRunner<T> {
    fn run(&self, reaction: &Reaction) -> Result<()> {
        self.is_scheduled.set(false);
        if reaction.is_disposed() {
            return Ok(());
        }

        let first_time = self.first_time.get();
        let changed = Cell::new(false);
        let tracked = reaction.track(|| {
            let next = (self.expression)(reaction);
            let previous = self.value.borrow_mut().take();
            changed.set(match &previous {
                Some(previous) => first_time || !self.equals.equals(previous, &next),
                None => true,
            });
            *self.value.borrow_mut() = Some(next);
        });

        let fire = if first_time {
            self.fire_immediately
        } else {
            changed.get()
        };
        if fire {
            self.fire_effect(reaction);
        }
        self.first_time.set(false);
        tracked
    }

    fn fire_effect(&self, reaction: &Reaction) {
        let Some(value) = self.value.borrow().clone() else {
            return;
        };
        let outcome = panic::catch_unwind(AssertUnwindSafe(|| {
            run_in_action(reaction.name(), || (self.effect)(&value, reaction))
        }));
        let error = match outcome {
            Ok(Ok(())) => None,
            Ok(Err(error)) => Some(error),
            Err(payload) => Some(ReactiveError::from_panic(reaction.name(), payload)),
        };
        if let Some(error) = error {
            reaction.report_exception(error);
        }
    }
}
