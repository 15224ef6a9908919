use eddy::{facade, Coroutine, Error, GenStep, Generator, Promise, Yielded};

use std::cell::Cell;
use std::rc::Rc;
use std::time::{Duration, Instant};

/// `yield <awaitable>; return "done"`.
struct YieldThenReturn {
    awaited: Option<Promise<String>>,
    finished: bool,
}

impl Generator for YieldThenReturn {
    type Item = String;

    fn current(&mut self) -> Result<Yielded<String>, Error> {
        Ok(Yielded::Awaitable(self.awaited.take().expect("started twice")))
    }

    fn send(&mut self, _value: String) -> Result<GenStep<String>, Error> {
        self.finished = true;
        Ok(GenStep::Done("done".into()))
    }

    fn throw(&mut self, error: Error) -> Result<GenStep<String>, Error> {
        self.finished = true;
        Err(error)
    }

    fn valid(&self) -> bool {
        !self.finished
    }
}

#[test]
fn test_coroutine_resolves_with_return_value() {
    let coroutine = Coroutine::new(YieldThenReturn {
        awaited: Some(Promise::resolved("intermediate".into())),
        finished: false,
    });
    let promise = coroutine.promise();

    facade::run().unwrap();

    assert_eq!(
        promise.result().unwrap(),
        "done",
        "The coroutine settles with the generator's return value, not the yield"
    );
}

/// Counts down through plain-value yields: each one is a cooperative
/// yield to the loop.
struct CountDown {
    remaining: i32,
}

impl Generator for CountDown {
    type Item = i32;

    fn current(&mut self) -> Result<Yielded<i32>, Error> {
        Ok(Yielded::Value(self.remaining))
    }

    fn send(&mut self, value: i32) -> Result<GenStep<i32>, Error> {
        if value <= 0 {
            self.remaining = -1;
            return Ok(GenStep::Done(0));
        }

        self.remaining = value - 1;
        Ok(GenStep::Yielded(Yielded::Value(self.remaining)))
    }

    fn throw(&mut self, error: Error) -> Result<GenStep<i32>, Error> {
        self.remaining = -1;
        Err(error)
    }

    fn valid(&self) -> bool {
        self.remaining >= 0
    }
}

#[test]
fn test_plain_value_yields_cooperate_with_loop() {
    let coroutine = Coroutine::new(CountDown { remaining: 4 });
    let promise = coroutine.promise();

    facade::run().unwrap();

    assert_eq!(promise.result().unwrap(), 0);
}

/// Two timed suspensions, then a return value.
struct TwoDelays {
    step: u8,
}

impl Generator for TwoDelays {
    type Item = String;

    fn current(&mut self) -> Result<Yielded<String>, Error> {
        self.step = 1;
        Ok(Yielded::Awaitable(
            Promise::resolved("a".to_string()).delay(Duration::from_millis(20)),
        ))
    }

    fn send(&mut self, value: String) -> Result<GenStep<String>, Error> {
        match self.step {
            1 => {
                assert_eq!(value, "a");
                self.step = 2;
                Ok(GenStep::Yielded(Yielded::Awaitable(
                    Promise::resolved("b".to_string()).delay(Duration::from_millis(20)),
                )))
            }
            _ => {
                assert_eq!(value, "b");
                self.step = 3;
                Ok(GenStep::Done("done".to_string()))
            }
        }
    }

    fn throw(&mut self, error: Error) -> Result<GenStep<String>, Error> {
        self.step = 3;
        Err(error)
    }

    fn valid(&self) -> bool {
        self.step < 3
    }
}

#[test]
fn test_sequential_delays_accumulate() {
    let start = Instant::now();
    let promise = Coroutine::new(TwoDelays { step: 0 }).promise();

    facade::run().unwrap();

    assert_eq!(promise.result().unwrap(), "done");
    assert!(
        start.elapsed() >= Duration::from_millis(40),
        "Two 20ms suspensions should take at least 40ms in sequence"
    );
}

/// Yields a nested generator; resumes with its result.
struct Outer {
    step: u8,
}

impl Generator for Outer {
    type Item = i32;

    fn current(&mut self) -> Result<Yielded<i32>, Error> {
        self.step = 1;
        Ok(Yielded::Nested(Box::new(CountDown { remaining: 2 })))
    }

    fn send(&mut self, value: i32) -> Result<GenStep<i32>, Error> {
        self.step = 2;
        Ok(GenStep::Done(value + 100))
    }

    fn throw(&mut self, error: Error) -> Result<GenStep<i32>, Error> {
        self.step = 2;
        Err(error)
    }

    fn valid(&self) -> bool {
        self.step < 2
    }
}

#[test]
fn test_nested_generator_runs_as_sub_coroutine() {
    let promise = Coroutine::new(Outer { step: 0 }).promise();

    facade::run().unwrap();

    assert_eq!(
        promise.result().unwrap(),
        100,
        "The nested countdown returns 0 and the outer adds 100"
    );
}

/// Absorbs a rejection at the suspension point and recovers.
struct Recovers {
    step: u8,
}

impl Generator for Recovers {
    type Item = i32;

    fn current(&mut self) -> Result<Yielded<i32>, Error> {
        self.step = 1;
        Ok(Yielded::Awaitable(Promise::rejected(Error::Timeout)))
    }

    fn send(&mut self, value: i32) -> Result<GenStep<i32>, Error> {
        self.step = 2;
        Ok(GenStep::Done(value))
    }

    fn throw(&mut self, error: Error) -> Result<GenStep<i32>, Error> {
        assert_eq!(error, Error::Timeout);
        self.step = 2;
        Ok(GenStep::Done(-1))
    }

    fn valid(&self) -> bool {
        self.step < 2
    }
}

#[test]
fn test_rejection_is_thrown_into_generator() {
    let promise = Coroutine::new(Recovers { step: 0 }).promise();

    facade::run().unwrap();

    assert_eq!(
        promise.result().unwrap(),
        -1,
        "The generator absorbed the rejection and recovered"
    );
}

/// Rejections the generator does not absorb reject the coroutine.
struct DoesNotRecover {
    step: u8,
}

impl Generator for DoesNotRecover {
    type Item = i32;

    fn current(&mut self) -> Result<Yielded<i32>, Error> {
        self.step = 1;
        Ok(Yielded::Awaitable(Promise::rejected(Error::Timeout)))
    }

    fn send(&mut self, _value: i32) -> Result<GenStep<i32>, Error> {
        self.step = 2;
        Ok(GenStep::Done(0))
    }

    fn throw(&mut self, error: Error) -> Result<GenStep<i32>, Error> {
        self.step = 2;
        Err(error)
    }

    fn valid(&self) -> bool {
        self.step < 2
    }
}

#[test]
fn test_unabsorbed_rejection_rejects_coroutine() {
    let promise = Coroutine::new(DoesNotRecover { step: 0 }).promise();

    facade::run().unwrap();

    assert_eq!(promise.result(), Err(Error::Timeout));
}

/// Runs cleanup when cancelled: the first throw yields once more (a
/// cleanup suspension), the second finishes the unwind.
struct WithCleanup {
    cleanup_runs: Rc<Cell<u32>>,
    step: u8,
}

impl Generator for WithCleanup {
    type Item = i32;

    fn current(&mut self) -> Result<Yielded<i32>, Error> {
        self.step = 1;
        Ok(Yielded::Awaitable(Promise::with_cancel(|_| Ok(()), |_| {})))
    }

    fn send(&mut self, _value: i32) -> Result<GenStep<i32>, Error> {
        Ok(GenStep::Done(0))
    }

    fn throw(&mut self, error: Error) -> Result<GenStep<i32>, Error> {
        self.cleanup_runs.set(self.cleanup_runs.get() + 1);

        if self.step == 1 {
            // Cleanup has its own pending await to unwind through.
            self.step = 2;
            return Ok(GenStep::Yielded(Yielded::Value(0)));
        }

        self.step = 3;
        Err(error)
    }

    fn valid(&self) -> bool {
        self.step < 3
    }
}

#[test]
fn test_cancel_unwinds_cleanup_before_rejecting() {
    let cleanup_runs = Rc::new(Cell::new(0));

    let coroutine = Coroutine::new(WithCleanup {
        cleanup_runs: cleanup_runs.clone(),
        step: 0,
    });
    let promise = coroutine.promise();

    // Reach the first suspension.
    facade::run().unwrap();
    assert!(promise.is_pending());

    let reason = Error::Cancelled("shutting down".into());
    coroutine.cancel(reason.clone());

    assert_eq!(
        cleanup_runs.get(),
        2,
        "Unwind should throw at every still-pending suspension point"
    );
    assert_eq!(promise.result(), Err(reason));
}

#[test]
fn test_pause_latches_settlement_until_resume() {
    let coroutine = Coroutine::new(YieldThenReturn {
        awaited: Some(Promise::resolved("intermediate".into())),
        finished: false,
    });
    let promise = coroutine.promise();

    coroutine.pause();
    facade::run().unwrap();

    assert!(
        promise.is_pending(),
        "A paused coroutine must not advance past its suspension"
    );

    coroutine.resume();
    facade::run().unwrap();

    assert_eq!(promise.result().unwrap(), "done");
}
