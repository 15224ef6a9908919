use eddy::{facade, Error, Outcome, Promise, Resolver};

use std::cell::{Cell, RefCell};
use std::rc::Rc;

#[test]
fn test_cancel_without_handler_rejects() {
    let (promise, _resolver) = Promise::<i32>::pending();

    promise.cancel(Error::Cancelled("give up".into()));

    assert_eq!(promise.result(), Err(Error::Cancelled("give up".into())));
}

#[test]
fn test_cancel_after_settlement_is_noop() {
    let promise = Promise::resolved(3);

    promise.cancel_default();

    assert!(promise.is_fulfilled());
    assert_eq!(promise.result().unwrap(), 3);
}

#[test]
fn test_cancel_handler_runs_with_reason() {
    let reason_seen = Rc::new(Cell::new(false));
    let reason_seen2 = reason_seen.clone();

    let promise = Promise::<i32>::with_cancel(
        |_resolver| Ok(()),
        move |reason| {
            assert_eq!(reason, Error::Timeout);
            reason_seen2.set(true);
        },
    );

    promise.cancel(Error::Timeout);

    assert!(reason_seen.get(), "Cancel handler should run");
    assert!(promise.is_rejected(), "Still-pending promise rejects after the handler");
}

#[test]
fn test_cancel_handler_may_settle_instead() {
    let slot: Rc<RefCell<Option<Resolver<i32>>>> = Rc::new(RefCell::new(None));
    let executor_slot = slot.clone();

    let promise = Promise::with_cancel(
        move |resolver| {
            *executor_slot.borrow_mut() = Some(resolver);
            Ok(())
        },
        move |_reason| {
            if let Some(resolver) = slot.borrow_mut().take() {
                resolver.resolve(99);
            }
        },
    );

    promise.cancel_default();

    assert!(promise.is_fulfilled(), "Handler settled the promise first");
    assert_eq!(promise.result().unwrap(), 99);
}

#[test]
fn test_cancel_propagates_when_all_children_cancel() {
    let upstream_cancels = Rc::new(Cell::new(0));
    let counter = upstream_cancels.clone();

    let parent = Promise::<i32>::with_cancel(
        |_resolver| Ok(()),
        move |_reason| counter.set(counter.get() + 1),
    );

    let child_a = parent.and_then(|v| Ok(Outcome::Value(v)));
    let child_b = parent.and_then(|v| Ok(Outcome::Value(v)));

    child_a.cancel_default();
    assert_eq!(
        upstream_cancels.get(),
        0,
        "One remaining child should keep the upstream alive"
    );
    assert!(parent.is_pending());

    child_b.cancel_default();
    assert_eq!(
        upstream_cancels.get(),
        1,
        "Cancel handler should run exactly once, after the second cancel"
    );
    assert!(parent.is_rejected());
}

#[test]
fn test_done_pins_upstream() {
    let upstream_cancels = Rc::new(Cell::new(0));
    let counter = upstream_cancels.clone();

    let parent = Promise::<i32>::with_cancel(
        |_resolver| Ok(()),
        move |_reason| counter.set(counter.get() + 1),
    );

    parent.done(|_| {}, |_| {});

    let child = parent.and_then(|v| Ok(Outcome::Value(v)));
    child.cancel_default();

    assert_eq!(
        upstream_cancels.get(),
        1,
        "done chains have no downstream and do not hold a cancel reference"
    );

    facade::run().unwrap();
}

#[test]
fn test_cancel_reaches_adopted_promise() {
    let inner_cancelled = Rc::new(Cell::new(false));
    let flag = inner_cancelled.clone();

    let inner = Promise::<i32>::with_cancel(|_| Ok(()), move |_| flag.set(true));

    let outer = Promise::resolved(0).and_then({
        let inner = inner.clone();
        move |_| Ok(Outcome::Chain(inner))
    });

    // Let the chain resolve far enough that `outer` adopts `inner`.
    facade::tick(false).unwrap();
    facade::tick(false).unwrap();
    assert!(outer.is_pending());

    outer.cancel_default();

    assert!(
        inner_cancelled.get(),
        "Cancelling an adopting promise should cancel the adopted one"
    );
}
