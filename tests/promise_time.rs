use eddy::{facade, Error, Promise};

use std::cell::Cell;
use std::rc::Rc;
use std::time::{Duration, Instant};

#[test]
fn test_delay_redelivers_after_interval() {
    let start = Instant::now();
    let delayed = Promise::resolved("payload").delay(Duration::from_millis(30));

    facade::run().unwrap();

    assert_eq!(delayed.result().unwrap(), "payload");
    assert!(
        start.elapsed() >= Duration::from_millis(30),
        "Delay should wait at least the specified duration"
    );
}

#[test]
fn test_delay_forwards_rejection_immediately() {
    let start = Instant::now();
    let delayed = Promise::<i32>::rejected(Error::Timeout).delay(Duration::from_secs(5));

    facade::run().unwrap();

    assert_eq!(delayed.result(), Err(Error::Timeout));
    assert!(
        start.elapsed() < Duration::from_secs(1),
        "Rejections skip the delay"
    );
}

#[test]
fn test_delay_cancel_stops_timer() {
    let delayed = Promise::resolved(1).delay(Duration::from_secs(30));

    // Let the upstream fulfil and the timer arm.
    facade::tick(false).unwrap();
    facade::tick(false).unwrap();

    delayed.cancel_default();

    let start = Instant::now();
    facade::run().unwrap();

    assert!(delayed.is_rejected());
    assert!(
        start.elapsed() < Duration::from_secs(1),
        "Cancelling the delay should disarm the timer so the loop empties"
    );
}

#[test]
fn test_timeout_forwards_when_upstream_wins() {
    let guarded = Promise::resolved(11)
        .delay(Duration::from_millis(5))
        .timeout(Duration::from_secs(10));

    let start = Instant::now();
    facade::run().unwrap();

    assert_eq!(guarded.result().unwrap(), 11);
    assert!(
        start.elapsed() < Duration::from_secs(5),
        "The timeout timer should be stopped once the upstream settles"
    );
}

#[test]
fn test_timeout_rejects_and_cancels_upstream() {
    let upstream_reason = Rc::new(Cell::new(false));
    let flag = upstream_reason.clone();

    let never = Promise::<i32>::with_cancel(|_| Ok(()), move |reason| {
        assert_eq!(reason, Error::Timeout);
        flag.set(true);
    });

    let start = Instant::now();
    let guarded = never.timeout(Duration::from_millis(10));

    facade::run().unwrap();

    assert_eq!(guarded.result(), Err(Error::Timeout));
    assert!(
        upstream_reason.get(),
        "The never-resolving upstream should be cancelled with the timeout error"
    );
    assert!(start.elapsed() >= Duration::from_millis(10));
}

#[test]
fn test_timeout_with_custom_reason() {
    let reason = Error::Runtime("handshake deadline".into());
    let guarded = Promise::<i32>::with_cancel(|_| Ok(()), |_| {})
        .timeout_with(Duration::from_millis(5), reason.clone());

    facade::run().unwrap();

    assert_eq!(guarded.result(), Err(reason));
}

#[test]
fn test_timeout_cancel_stops_timer() {
    let guarded = Promise::<i32>::with_cancel(|_| Ok(()), |_| {})
        .timeout(Duration::from_secs(30));

    guarded.cancel_default();

    let start = Instant::now();
    facade::run().unwrap();

    assert!(guarded.is_rejected());
    assert!(
        start.elapsed() < Duration::from_secs(1),
        "Cancelling the timeout should disarm its timer"
    );
}
