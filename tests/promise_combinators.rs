use eddy::{all, any, choose, facade, iterate, map, reduce, retry, settle};
use eddy::{Error, Outcome, Promise};

use std::cell::Cell;
use std::rc::Rc;
use std::time::Duration;

#[test]
fn test_all_preserves_input_order() {
    let (slow, slow_resolver) = Promise::pending();
    let joined = all([slow, Promise::resolved(2), Promise::resolved(3)]);

    facade::run().unwrap();
    assert!(joined.is_pending(), "all should wait for every input");

    slow_resolver.resolve(1);
    facade::run().unwrap();

    assert_eq!(
        joined.result().unwrap(),
        vec![1, 2, 3],
        "Values should line up with input order, not settlement order"
    );
}

#[test]
fn test_all_of_nothing_resolves_empty() {
    let joined = all(Vec::<Promise<i32>>::new());

    assert_eq!(joined.result().unwrap(), Vec::<i32>::new());
}

#[test]
fn test_all_rejects_on_first_rejection_and_cancels_rest() {
    let cancelled = Rc::new(Cell::new(false));
    let flag = cancelled.clone();

    let hanging = Promise::<i32>::with_cancel(|_| Ok(()), move |reason| {
        assert_eq!(reason, Error::Timeout);
        flag.set(true);
    });

    let joined = all([
        Promise::resolved(1),
        Promise::rejected(Error::Timeout),
        hanging,
    ]);

    facade::run().unwrap();

    assert_eq!(joined.result(), Err(Error::Timeout));
    assert!(
        cancelled.get(),
        "Remaining inputs should be cancelled with the rejection reason"
    );
}

#[test]
fn test_any_takes_first_fulfilment() {
    let (never, _keep) = Promise::pending();
    let first = any([never, Promise::resolved(10)]);

    facade::run().unwrap();
    assert_eq!(first.result().unwrap(), 10);
}

#[test]
fn test_any_collects_rejections_in_input_order() {
    let e1 = Error::Runtime("first".into());
    let e2 = Error::Runtime("second".into());

    let (late, late_resolver) = Promise::<i32>::pending();
    let first = any([late, Promise::rejected(e1.clone())]);

    facade::run().unwrap();
    late_resolver.reject(e2.clone());
    facade::run().unwrap();

    // The later input rejected last but comes first in the input order.
    assert_eq!(first.result(), Err(Error::MultiReason(vec![e2, e1])));
}

#[test]
fn test_choose_settles_with_first_and_cancels_losers() {
    let loser_cancelled = Rc::new(Cell::new(false));
    let flag = loser_cancelled.clone();

    let slow = Promise::with_cancel(|_| Ok(()), move |_| flag.set(true))
        .delay(Duration::from_millis(50));
    let fast = Promise::resolved(2).delay(Duration::from_millis(1));

    let winner = choose([slow, fast]);

    facade::run().unwrap();

    assert_eq!(winner.result().unwrap(), 2);
    assert!(loser_cancelled.get(), "The losing input should be cancelled");
}

#[test]
fn test_choose_forwards_first_rejection() {
    let (never, _keep) = Promise::<i32>::pending();
    let winner = choose([never, Promise::rejected(Error::Timeout)]);

    facade::run().unwrap();
    assert_eq!(winner.result(), Err(Error::Timeout));
}

#[test]
fn test_settle_never_rejects() {
    let report = settle([Promise::resolved(1), Promise::rejected(Error::Timeout)]);

    facade::run().unwrap();

    assert_eq!(
        report.result().unwrap(),
        vec![Ok(1), Err(Error::Timeout)],
        "settle should report every outcome in input order"
    );
}

#[test]
fn test_map_transforms_each_value() {
    let mapped = map([Promise::resolved(1), Promise::resolved(2)], |v| Ok(v * 10));

    facade::run().unwrap();
    assert_eq!(mapped.result().unwrap(), vec![10, 20]);
}

#[test]
fn test_map_rejects_when_transform_fails() {
    let mapped = map([Promise::resolved(1)], |_| -> Result<i32, Error> {
        Err(Error::Runtime("bad input".into()))
    });

    facade::run().unwrap();
    assert!(mapped.is_rejected());
}

#[test]
fn test_reduce_folds_left_to_right() {
    let folded = reduce(
        [Promise::resolved(1), Promise::resolved(2), Promise::resolved(3)],
        |acc, v| Ok(Outcome::Value(acc * 10 + v)),
        0,
    );

    facade::run().unwrap();
    assert_eq!(
        folded.result().unwrap(),
        123,
        "Order-sensitive fold should see elements strictly left to right"
    );
}

#[test]
fn test_reduce_awaits_chained_accumulator() {
    let folded = reduce(
        [Promise::resolved(5)],
        |acc: i32, v| Ok(Outcome::Chain(Promise::resolved(acc + v).delay(Duration::from_millis(1)))),
        1,
    );

    facade::run().unwrap();
    assert_eq!(folded.result().unwrap(), 6);
}

#[test]
fn test_iterate_runs_until_predicate_fails() {
    let counted = iterate(0, |v| *v < 5, |v| Ok(Outcome::Value(v + 1)));

    facade::run().unwrap();
    assert_eq!(counted.result().unwrap(), 5);
}

#[test]
fn test_iterate_awaits_chained_steps() {
    let counted = iterate(
        0,
        |v| *v < 3,
        |v| Ok(Outcome::Chain(Promise::resolved(v + 1).delay(Duration::from_millis(1)))),
    );

    facade::run().unwrap();
    assert_eq!(counted.result().unwrap(), 3);
}

#[test]
fn test_retry_until_success() {
    let attempts = Rc::new(Cell::new(0));
    let counter = attempts.clone();

    let outcome = retry(
        move || {
            counter.set(counter.get() + 1);
            if counter.get() < 3 {
                Promise::rejected(Error::Runtime("flaky".into()))
            } else {
                Promise::resolved(42)
            }
        },
        |_error| Ok(true),
    );

    facade::run().unwrap();

    assert_eq!(outcome.result().unwrap(), 42);
    assert_eq!(attempts.get(), 3, "Two failures then one success");
}

#[test]
fn test_retry_gives_up_when_classifier_declines() {
    let outcome = retry(
        || Promise::<i32>::rejected(Error::Timeout),
        |error| {
            assert_eq!(*error, Error::Timeout);
            Ok(false)
        },
    );

    facade::run().unwrap();
    assert_eq!(outcome.result(), Err(Error::Timeout));
}
