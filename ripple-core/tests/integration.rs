//! Integration Tests for the Reactive System
//!
//! These tests verify that atoms, computed values and reactions work
//! together: propagation, lazy confirmation, batching, suspension and the
//! failure modes.

use std::cell::{Cell, RefCell};
use std::rc::Rc;

use ripple_core::config::{configure, Config, EnforceActions};
use ripple_core::graph::{DerivationState, TraceEvent};
use ripple_core::reactive::{
    autorun, autorun_with, end_batch, run_in_action, start_batch, transaction, untracked, Atom,
    AutorunOptions, Computed, ComputedOptions, ObservableValue, Reaction, Runtime, Scheduler,
};
use ripple_core::ReactiveError;

fn counter() -> (Rc<Cell<usize>>, Rc<Cell<usize>>) {
    let count = Rc::new(Cell::new(0));
    (count.clone(), count)
}

/// The worked scenario: x = 1, double = x * 2, a reaction logs double.
#[test]
fn logs_each_settled_value_once() {
    let x = ObservableValue::named("x", 1);
    let double = {
        let x = x.clone();
        Computed::named("double", move || x.get() * 2)
    };
    let log = Rc::new(RefCell::new(Vec::new()));
    let sink = log.clone();
    let disposer = autorun(move |_| sink.borrow_mut().push(double.get())).unwrap();

    assert_eq!(*log.borrow(), vec![2]);
    x.set(5).unwrap();
    assert_eq!(*log.borrow(), vec![2, 10]);
    disposer.dispose().unwrap();
}

/// Two changes inside one batch invalidate the observer once.
#[test]
fn no_redundant_notification() {
    let events = Rc::new(RefCell::new(Vec::new()));
    let sink = events.clone();
    Runtime::set_trace_hook(Some(Rc::new(move |event: &TraceEvent| {
        sink.borrow_mut().push(event.derivation);
    })));

    let atom = Atom::new("o");
    let (runs, count) = counter();
    let reader = atom.clone();
    let disposer = autorun(move |_| {
        reader.report_observed();
        count.set(count.get() + 1);
    })
    .unwrap();

    start_batch();
    atom.report_changed().unwrap();
    atom.report_changed().unwrap();
    assert_eq!(*events.borrow(), vec![disposer.reaction().id()]);
    end_batch().unwrap();

    assert_eq!(runs.get(), 2);
    Runtime::set_trace_hook(None);
    disposer.dispose().unwrap();
}

/// A computed whose output does not change keeps downstream reactions idle.
#[test]
fn lazy_computed_confirmation() {
    let atom = ObservableValue::named("n", 2);
    let (computations, count) = counter();
    let parity = {
        let atom = atom.clone();
        Computed::named("parity", move || {
            count.set(count.get() + 1);
            atom.get() % 2
        })
    };
    let (runs, run_count) = counter();
    let reader = parity.clone();
    let disposer = autorun(move |_| {
        reader.get();
        run_count.set(run_count.get() + 1);
    })
    .unwrap();
    assert_eq!((computations.get(), runs.get()), (1, 1));

    atom.set(4).unwrap();
    assert_eq!(computations.get(), 2);
    assert_eq!(runs.get(), 1);
    assert_eq!(
        Runtime::state_of(disposer.reaction().id()),
        DerivationState::UpToDate
    );

    atom.set(5).unwrap();
    assert_eq!((computations.get(), runs.get()), (3, 2));
    disposer.dispose().unwrap();
}

/// Computed chains confirm lazily through every level.
#[test]
fn lazy_confirmation_through_a_chain() {
    let atom = ObservableValue::new(1);
    let clamped = {
        let atom = atom.clone();
        Computed::named("clamped", move || atom.get().min(10))
    };
    let label = {
        let clamped = clamped.clone();
        Computed::named("label", move || format!("<{}>", clamped.get()))
    };
    let log = Rc::new(RefCell::new(Vec::new()));
    let sink = log.clone();
    let disposer = autorun(move |_| sink.borrow_mut().push(label.get())).unwrap();

    atom.set(20).unwrap();
    atom.set(30).unwrap();
    assert_eq!(*log.borrow(), vec!["<1>".to_string(), "<10>".to_string()]);
    disposer.dispose().unwrap();
}

/// Disposing the only observer suspends the computed; reading it again
/// rebuilds the same edges as a fresh computed would.
#[test]
fn suspend_resume_round_trip() {
    let atom = ObservableValue::named("source", 3);
    let (computations, count) = counter();
    let computed = {
        let atom = atom.clone();
        Computed::named("square", move || {
            count.set(count.get() + 1);
            atom.get() * atom.get()
        })
    };

    let reader = computed.clone();
    let first = autorun(move |_| {
        reader.get();
    })
    .unwrap();
    assert!(computed.has_value());
    assert_eq!(Runtime::observing(computed.id()), vec![atom.id()]);

    first.dispose().unwrap();
    assert!(!computed.has_value());
    assert!(Runtime::observing(computed.id()).is_empty());
    assert!(Runtime::observers(atom.id()).is_empty());
    assert_eq!(Runtime::state_of(computed.id()), DerivationState::NotTracking);

    let reader = computed.clone();
    let second = autorun(move |_| {
        reader.get();
    })
    .unwrap();
    assert_eq!(computations.get(), 2);
    assert_eq!(Runtime::observing(computed.id()), vec![atom.id()]);
    assert_eq!(Runtime::observers(computed.id()), vec![second.reaction().id()]);
    assert!(Runtime::is_consistent());
    second.dispose().unwrap();
}

/// Nested batches collapse into a single run that sees the final values.
#[test]
fn batch_collapsing() {
    let a = ObservableValue::new(0);
    let b = ObservableValue::new(0);
    let seen = Rc::new(RefCell::new(Vec::new()));
    let (ra, rb, sink) = (a.clone(), b.clone(), seen.clone());
    let disposer = autorun(move |_| sink.borrow_mut().push((ra.get(), rb.get()))).unwrap();

    start_batch();
    start_batch();
    a.set(1).unwrap();
    start_batch();
    b.set(1).unwrap();
    a.set(2).unwrap();
    end_batch().unwrap();
    b.set(2).unwrap();
    end_batch().unwrap();
    assert_eq!(seen.borrow().len(), 1);
    end_batch().unwrap();

    assert_eq!(*seen.borrow(), vec![(0, 0), (2, 2)]);
    disposer.dispose().unwrap();
}

#[test]
fn transaction_collapses_like_a_batch() {
    let a = ObservableValue::new(0);
    let (runs, count) = counter();
    let reader = a.clone();
    let disposer = autorun(move |_| {
        reader.get();
        count.set(count.get() + 1);
    })
    .unwrap();

    transaction(|| {
        for i in 1..=5 {
            a.set(i).unwrap();
        }
    })
    .unwrap();
    assert_eq!(runs.get(), 2);
    disposer.dispose().unwrap();
}

/// A computed that reads itself fails with a cycle error.
#[test]
fn cycle_detection() {
    let slot: Rc<RefCell<Option<Computed<u32>>>> = Rc::new(RefCell::new(None));
    let inner = slot.clone();
    let computed = Computed::named("ouroboros", move || {
        let me = inner.borrow().clone().expect("installed before the first read");
        me.get() + 1
    });
    *slot.borrow_mut() = Some(computed.clone());

    assert_eq!(
        computed.try_get(),
        Err(ReactiveError::Cycle {
            name: "ouroboros".into()
        })
    );

    // Also inside a reaction, where the failure is cached.
    let failures = Rc::new(RefCell::new(Vec::new()));
    let sink = failures.clone();
    let reader = computed.clone();
    let disposer = autorun(move |_| sink.borrow_mut().push(reader.try_get())).unwrap();
    assert_eq!(
        *failures.borrow(),
        vec![Err(ReactiveError::Cycle {
            name: "ouroboros".into()
        })]
    );
    disposer.dispose().unwrap();
    slot.borrow_mut().take();
}

/// Flipping the branch moves the edge from `a` to `b`.
#[test]
fn dynamic_dependency_tracking() {
    let flag = ObservableValue::named("flag", true);
    let a = ObservableValue::named("a", 1);
    let b = ObservableValue::named("b", 2);
    let (rf, ra, rb) = (flag.clone(), a.clone(), b.clone());
    let disposer = autorun(move |_| {
        if rf.get() {
            ra.get();
        } else {
            rb.get();
        }
    })
    .unwrap();
    let reaction = disposer.reaction().clone();
    assert_eq!(reaction.observing(), vec![flag.id(), a.id()]);

    flag.set(false).unwrap();
    assert_eq!(reaction.observing(), vec![flag.id(), b.id()]);
    assert!(Runtime::observers(a.id()).is_empty());
    assert_eq!(Runtime::observers(b.id()), vec![reaction.id()]);
    assert!(Runtime::is_consistent());

    // `a` is no longer a dependency.
    let runs = reaction.run_count();
    a.set(100).unwrap();
    assert_eq!(reaction.run_count(), runs);
    disposer.dispose().unwrap();
}

/// Reads inside `untracked` do not become dependencies.
#[test]
fn untracked_reads_are_not_dependencies() {
    let tracked = ObservableValue::named("tracked", 1);
    let hidden = ObservableValue::named("hidden", 1);
    let sums = Rc::new(RefCell::new(Vec::new()));
    let (rt, rh, sink) = (tracked.clone(), hidden.clone(), sums.clone());
    let disposer = autorun(move |_| {
        let sum = rt.get() + untracked(|| rh.get());
        sink.borrow_mut().push(sum);
    })
    .unwrap();

    assert_eq!(disposer.reaction().observing(), vec![tracked.id()]);
    hidden.set(10).unwrap();
    assert_eq!(*sums.borrow(), vec![2]);
    tracked.set(2).unwrap();
    assert_eq!(*sums.borrow(), vec![2, 12]);
    disposer.dispose().unwrap();
}

/// Reactions run in the order they were scheduled.
#[test]
fn reactions_run_in_fifo_order() {
    let source = ObservableValue::new(0);
    let order = Rc::new(RefCell::new(Vec::new()));
    let disposers: Vec<_> = (0..3)
        .map(|i| {
            let (source, order) = (source.clone(), order.clone());
            autorun(move |_| {
                source.get();
                order.borrow_mut().push(i);
            })
            .unwrap()
        })
        .collect();
    order.borrow_mut().clear();

    source.set(1).unwrap();
    assert_eq!(*order.borrow(), vec![0, 1, 2]);
    for disposer in disposers {
        disposer.dispose().unwrap();
    }
}

/// Disposing a reaction keeps the remaining ones in creation order.
#[test]
fn disposal_preserves_run_order() {
    let source = ObservableValue::new(0);
    let order = Rc::new(RefCell::new(Vec::new()));
    let mut disposers: Vec<_> = (0..4)
        .map(|i| {
            let (source, order) = (source.clone(), order.clone());
            autorun(move |_| {
                source.get();
                order.borrow_mut().push(i);
            })
            .unwrap()
        })
        .collect();
    disposers.remove(1).dispose().unwrap();
    order.borrow_mut().clear();

    source.set(1).unwrap();
    assert_eq!(*order.borrow(), vec![0, 2, 3]);
    for disposer in disposers {
        disposer.dispose().unwrap();
    }
}

/// A reaction that writes what another reaction reads extends the drain.
#[test]
fn reactions_can_trigger_reactions() {
    let celsius = ObservableValue::new(0);
    let fahrenheit = ObservableValue::new(32);
    let (c, f) = (celsius.clone(), fahrenheit.clone());
    let converter = autorun(move |_| {
        let value = c.get() * 9 / 5 + 32;
        f.set(value).unwrap();
    })
    .unwrap();

    let log = Rc::new(RefCell::new(Vec::new()));
    let (reader, sink) = (fahrenheit.clone(), log.clone());
    let printer = autorun(move |_| sink.borrow_mut().push(reader.get())).unwrap();

    celsius.set(100).unwrap();
    assert_eq!(*log.borrow(), vec![32, 212]);
    converter.dispose().unwrap();
    printer.dispose().unwrap();
}

/// Two reactions feeding each other never settle and trip the
/// iteration cap.
#[test]
fn runaway_reactions_are_reported() {
    configure(Config {
        max_reaction_iterations: 10,
        ..Config::default()
    })
    .unwrap();

    let a = ObservableValue::named("a", 0);
    let b = ObservableValue::named("b", 0);
    let (read_a, write_b) = (a.clone(), b.clone());
    let ping = Reaction::new("ping", move |reaction| {
        reaction.track(|| {
            let next = read_a.get() + 1;
            write_b.set(next).unwrap();
        })
    });
    ping.schedule().unwrap();

    let (read_b, write_a) = (b.clone(), a.clone());
    let pong = Reaction::new("pong", move |reaction| {
        reaction.track(|| {
            let next = read_b.get() + 1;
            write_a.set(next).unwrap();
        })
    });
    assert_eq!(
        pong.schedule(),
        Err(ReactiveError::ReactionLoop {
            name: "pong".into(),
            iterations: 10
        })
    );
    assert!(!ping.is_scheduled());
    assert!(!pong.is_scheduled());

    ping.dispose().unwrap();
    pong.dispose().unwrap();
    configure(Config::default()).unwrap();
}

/// Failures without a handler reach the caller that triggered the drain.
#[test]
fn uncaught_reaction_failures_reach_the_writer() {
    let value = ObservableValue::new(1);
    let reader = value.clone();
    let disposer = autorun(move |_| {
        if reader.get() > 1 {
            panic!("too large");
        }
    })
    .unwrap();

    assert_eq!(
        value.set(2),
        Err(ReactiveError::Derivation {
            name: disposer.reaction().name().to_string(),
            message: "too large".into()
        })
    );
    // The failed run still tracked its dependencies.
    assert_eq!(disposer.reaction().observing(), vec![value.id()]);
    assert!(value.set(1).is_ok());
    disposer.dispose().unwrap();
}

#[test]
fn reaction_error_handler_takes_over() {
    let value = ObservableValue::new(1);
    let handled = Rc::new(RefCell::new(Vec::new()));
    let sink = handled.clone();
    let reader = value.clone();
    let disposer = autorun_with(
        AutorunOptions {
            name: Some("guarded".into()),
            on_error: Some(Rc::new(move |error: &ReactiveError, _: &Reaction| {
                sink.borrow_mut().push(error.clone())
            })),
            ..AutorunOptions::default()
        },
        move |_| {
            if reader.get() > 1 {
                panic!("too large");
            }
        },
    )
    .unwrap();

    assert!(value.set(2).is_ok());
    assert_eq!(
        *handled.borrow(),
        vec![ReactiveError::Derivation {
            name: "guarded".into(),
            message: "too large".into()
        }]
    );
    disposer.dispose().unwrap();
}

/// A failing computed surfaces its error where it is consumed, with its
/// dependencies still tracked.
#[test]
fn computed_failures_surface_on_read() {
    let divisor = ObservableValue::named("divisor", 0);
    let quotient = {
        let divisor = divisor.clone();
        Computed::named("quotient", move || {
            let d = divisor.get();
            if d == 0 {
                panic!("division by zero");
            }
            100 / d
        })
    };
    let results = Rc::new(RefCell::new(Vec::new()));
    let (reader, sink) = (quotient.clone(), results.clone());
    let disposer = autorun(move |_| sink.borrow_mut().push(reader.try_get())).unwrap();

    divisor.set(4).unwrap();
    assert_eq!(
        *results.borrow(),
        vec![
            Err(ReactiveError::Derivation {
                name: "quotient".into(),
                message: "division by zero".into()
            }),
            Ok(25),
        ]
    );
    disposer.dispose().unwrap();
}

#[test]
fn deferred_runs_skip_disposed_reactions() {
    let queue: Rc<RefCell<Vec<Box<dyn FnOnce()>>>> = Rc::new(RefCell::new(Vec::new()));
    let pending = queue.clone();
    let scheduler: Scheduler = Rc::new(move |run: Box<dyn FnOnce()>| pending.borrow_mut().push(run));

    let (runs, count) = counter();
    let disposer = autorun_with(
        AutorunOptions {
            scheduler: Some(scheduler),
            ..AutorunOptions::default()
        },
        move |_| count.set(count.get() + 1),
    )
    .unwrap();
    disposer.dispose().unwrap();

    let deferred: Vec<_> = queue.borrow_mut().drain(..).collect();
    deferred.into_iter().for_each(|run| run());
    assert_eq!(runs.get(), 0);
}

#[test]
fn observed_mutation_inside_computed_is_rejected() {
    let target = ObservableValue::named("target", 0);
    let watcher = {
        let target = target.clone();
        autorun(move |_| {
            target.get();
        })
        .unwrap()
    };

    let writer = target.clone();
    let sneaky = Computed::named("sneaky", move || writer.set(1));
    assert_eq!(
        sneaky.try_get(),
        Ok(Err(ReactiveError::MutationInsideComputed {
            name: "target".into()
        }))
    );
    assert_eq!(target.get(), 0);
    watcher.dispose().unwrap();
}

#[test]
fn observed_policy_requires_actions_for_observed_values() {
    configure(Config {
        enforce_actions: EnforceActions::Observed,
        ..Config::default()
    })
    .unwrap();

    let value = ObservableValue::named("strict", 0);
    // Unobserved values may be written freely.
    value.set(1).unwrap();

    let reader = value.clone();
    let disposer = autorun(move |_| {
        reader.get();
    })
    .unwrap();
    assert_eq!(
        value.set(2),
        Err(ReactiveError::MutationOutsideAction {
            name: "strict".into()
        })
    );
    run_in_action("allowed", || value.set(2)).unwrap().unwrap();
    assert_eq!(value.get(), 2);

    disposer.dispose().unwrap();
    configure(Config::default()).unwrap();
}

#[test]
fn keep_alive_computed_stays_up_to_date_without_observers() {
    let source = ObservableValue::new(1);
    let (computations, count) = counter();
    let computed = {
        let source = source.clone();
        Computed::with_options(
            move || {
                count.set(count.get() + 1);
                source.get() + 1
            },
            ComputedOptions::new().keep_alive(true),
        )
    };

    assert_eq!(computed.get(), 2);
    assert_eq!(computed.get(), 2);
    assert_eq!(computations.get(), 1);
    assert_eq!(Runtime::observing(computed.id()), vec![source.id()]);

    source.set(5).unwrap();
    assert_eq!(computed.get(), 6);
    assert_eq!(computations.get(), 2);
}

#[test]
fn become_observed_hooks_follow_transitions() {
    let log = Rc::new(RefCell::new(Vec::new()));
    let (on, off) = (log.clone(), log.clone());
    let atom = Atom::with_hooks(
        "resource",
        move || on.borrow_mut().push("observed"),
        move || off.borrow_mut().push("unobserved"),
    );

    let first = {
        let atom = atom.clone();
        autorun(move |_| {
            atom.report_observed();
        })
        .unwrap()
    };
    let second = {
        let atom = atom.clone();
        autorun(move |_| {
            atom.report_observed();
        })
        .unwrap()
    };
    first.dispose().unwrap();
    assert_eq!(*log.borrow(), vec!["observed"]);

    second.dispose().unwrap();
    assert_eq!(*log.borrow(), vec!["observed", "unobserved"]);
}

#[test]
fn dependency_tree_describes_the_graph() {
    let a = ObservableValue::named("a", 1);
    let b = ObservableValue::named("b", 2);
    let sum = {
        let (a, b) = (a.clone(), b.clone());
        Computed::named("sum", move || a.get() + b.get())
    };
    let disposer = autorun_with(
        AutorunOptions {
            name: Some("printer".into()),
            ..AutorunOptions::default()
        },
        move |_| {
            sum.get();
        },
    )
    .unwrap();

    let tree = Runtime::dependency_tree(disposer.reaction().id()).unwrap();
    assert_eq!(tree.render(), "printer\n\tsum\n\t\ta\n\t\tb");

    let json: serde_json::Value = serde_json::from_str(&tree.to_json()).unwrap();
    assert_eq!(json["dependencies"][0]["name"], "sum");

    let observers = Runtime::observer_tree(a.id()).unwrap();
    assert_eq!(observers.observers[0].name, "sum");
    assert_eq!(observers.observers[0].observers[0].name, "printer");
    disposer.dispose().unwrap();
}
