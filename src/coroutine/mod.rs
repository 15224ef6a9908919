//! Coroutine driver: turns a [`Generator`] into an awaitable.
//!
//! Construction schedules the first step on the deferred queue. Each
//! step resumes the generator once — with the initial suspension, with a
//! sent value, or by throwing an error — and then dispatches whatever it
//! yielded: plain values bounce off the deferred queue (a cooperative
//! yield), awaitables get the worker subscribed for fulfilment and the
//! pitch for rejection, and nested generators are wrapped in their own
//! coroutine. When the generator finishes, the owning promise resolves
//! with its return value.
//!
//! On settlement or cancellation the driver drops the generator, the
//! cached suspension, and the in-flight subscription; those slots form a
//! cycle with the owning promise otherwise.

mod generator;

pub use generator::{GenStep, Generator, Yielded};

use crate::error::Error;
use crate::promise::{Promise, Resolver};
use crate::runtime::context;

use std::cell::RefCell;
use std::rc::Rc;

/// An awaitable driving a generator-style computation.
pub struct Coroutine<T> {
    promise: Promise<T>,
    state: Rc<RefCell<CoroState<T>>>,
}

struct CoroState<T> {
    generator: Option<Box<dyn Generator<Item = T>>>,
    current: Option<Current<T>>,
    in_flight: Option<Promise<T>>,
    resolver: Option<Resolver<T>>,
    paused: bool,
    ready: bool,
    finished: bool,
}

/// Cached suspension, normalized: nested generators are wrapped into a
/// coroutine as soon as they are yielded, so re-dispatch after a
/// pause/resume only ever sees values and awaitables.
enum Current<T> {
    Value(T),
    Awaitable(Promise<T>),
}

enum Resume<T> {
    Start,
    Send(T),
    Throw(Error),
}

impl<T: Clone + 'static> Coroutine<T> {
    pub fn new(generator: impl Generator<Item = T> + 'static) -> Coroutine<T> {
        let (promise, resolver) = Promise::pending();

        let state = Rc::new(RefCell::new(CoroState {
            generator: Some(Box::new(generator)),
            current: None,
            in_flight: None,
            resolver: Some(resolver),
            paused: false,
            ready: false,
            finished: false,
        }));

        {
            let state = state.clone();
            promise.set_cancel(move |reason| cancel_coroutine(&state, reason));
        }

        {
            let state = state.clone();
            context::current().queue(move || step(&state, Resume::Start));
        }

        Coroutine { promise, state }
    }

    /// The awaitable that settles with the generator's result.
    pub fn promise(&self) -> Promise<T> {
        self.promise.clone()
    }

    /// Stops advancing; settlements arriving while paused are latched
    /// and re-dispatched on resume.
    pub fn pause(&self) {
        self.state.borrow_mut().paused = true;
    }

    /// Resumes a paused coroutine, re-dispatching the cached suspension
    /// if the worker was invoked while paused.
    pub fn resume(&self) {
        let (latched, started) = {
            let mut state = self.state.borrow_mut();

            if !state.paused {
                return;
            }

            state.paused = false;
            let latched = std::mem::replace(&mut state.ready, false);
            (latched, state.current.is_some())
        };

        if !latched {
            return;
        }

        if started {
            dispatch_current(&self.state);
        } else {
            // Paused before the first advance: the initial step was
            // swallowed, so schedule it again.
            let state = self.state.clone();
            context::current().queue(move || step(&state, Resume::Start));
        }
    }

    pub fn is_paused(&self) -> bool {
        self.state.borrow().paused
    }

    /// Cancels the owning awaitable; the reason is thrown into the
    /// generator so cleanup at each pending suspension point can run.
    pub fn cancel(&self, reason: Error) {
        self.promise.cancel(reason);
    }

    pub fn cancel_default(&self) {
        self.promise.cancel(Error::Cancelled("coroutine cancelled".into()));
    }
}

/// Advances the generator once and caches the new suspension.
fn step<T: Clone + 'static>(state: &Rc<RefCell<CoroState<T>>>, input: Resume<T>) {
    {
        let mut coro = state.borrow_mut();

        if coro.finished {
            return;
        }

        if coro.paused {
            coro.ready = true;
            return;
        }

        coro.in_flight = None;

        let Some(generator) = coro.generator.as_mut() else {
            return;
        };

        let outcome = match input {
            Resume::Start => generator.current().map(GenStep::Yielded),
            Resume::Send(value) => generator.send(value),
            Resume::Throw(error) => generator.throw(error),
        };

        match outcome {
            Ok(GenStep::Yielded(yielded)) => {
                let current = match yielded {
                    Yielded::Value(value) => Current::Value(value),
                    Yielded::Awaitable(promise) => Current::Awaitable(promise),
                    Yielded::Nested(nested) => {
                        Current::Awaitable(Coroutine::new(nested).promise())
                    }
                };
                coro.current = Some(current);
            }
            Ok(GenStep::Done(value)) => {
                if let Some(resolver) = finalize(&mut coro) {
                    resolver.resolve(value);
                }
                return;
            }
            Err(error) => {
                if let Some(resolver) = finalize(&mut coro) {
                    resolver.reject(error);
                }
                return;
            }
        }
    }

    dispatch_current(state);
}

/// Dispatches the cached suspension: queue a plain value back through
/// the loop, or subscribe worker and pitch to an awaitable.
fn dispatch_current<T: Clone + 'static>(state: &Rc<RefCell<CoroState<T>>>) {
    let current = {
        let mut coro = state.borrow_mut();

        if coro.finished {
            return;
        }

        match &coro.current {
            Some(Current::Value(value)) => Current::Value(value.clone()),
            Some(Current::Awaitable(promise)) => {
                let promise = promise.clone();
                coro.in_flight = Some(promise.clone());
                Current::Awaitable(promise)
            }
            None => return,
        }
    };

    match current {
        Current::Value(value) => {
            let state = state.clone();
            context::current().queue(move || step(&state, Resume::Send(value)));
        }
        Current::Awaitable(promise) => {
            let state = state.clone();
            promise.subscribe(Box::new(move |result| match result {
                Ok(value) => step(&state, Resume::Send(value)),
                Err(error) => step(&state, Resume::Throw(error)),
            }));
        }
    }
}

/// Cancel handler: unwind the generator with the reason, cancel the
/// sub-awaitable in flight, then tear down. The owning promise rejects
/// with the reason afterwards.
fn cancel_coroutine<T: Clone + 'static>(state: &Rc<RefCell<CoroState<T>>>, reason: Error) {
    let (in_flight, mut generator) = {
        let mut coro = state.borrow_mut();

        if coro.finished {
            return;
        }

        coro.finished = true;
        (coro.in_flight.take(), coro.generator.take())
    };

    if let Some(pending) = in_flight {
        pending.cancel(reason.clone());
    }

    if let Some(generator) = generator.as_mut() {
        // Throw at every still-pending suspension point so the
        // generator's cleanup can run before the promise rejects.
        while generator.valid() {
            match generator.throw(reason.clone()) {
                Ok(GenStep::Yielded(_)) => continue,
                Ok(GenStep::Done(_)) | Err(_) => break,
            }
        }
    }

    let mut coro = state.borrow_mut();
    coro.current = None;
    coro.resolver.take();
}

fn finalize<T>(coro: &mut CoroState<T>) -> Option<Resolver<T>> {
    coro.finished = true;
    coro.generator = None;
    coro.current = None;
    coro.in_flight = None;
    coro.resolver.take()
}
