//! Combinators over collections of promises.
//!
//! Inputs are consumed in iteration order and keying is positional:
//! output vectors line up with the input sequence regardless of the
//! order in which the inputs settle.

use crate::error::Error;
use crate::promise::{Outcome, Promise, Resolver};
use crate::runtime::context;

use std::cell::{Cell, RefCell};
use std::collections::VecDeque;
use std::rc::Rc;

/// Resolves with every fulfilment value in input order. The first
/// rejection wins: it rejects the result and cancels the remaining
/// inputs with the same reason.
pub fn all<T, I>(inputs: I) -> Promise<Vec<T>>
where
    T: Clone + 'static,
    I: IntoIterator<Item = Promise<T>>,
{
    let inputs: Rc<Vec<Promise<T>>> = Rc::new(inputs.into_iter().collect());

    if inputs.is_empty() {
        return Promise::resolved(Vec::new());
    }

    let (promise, resolver) = Promise::pending();
    let remaining = Rc::new(Cell::new(inputs.len()));
    let slots: Rc<RefCell<Vec<Option<T>>>> =
        Rc::new(RefCell::new((0..inputs.len()).map(|_| None).collect()));
    let settled = Rc::new(Cell::new(false));

    for (index, input) in inputs.iter().enumerate() {
        let inputs = inputs.clone();
        let remaining = remaining.clone();
        let slots = slots.clone();
        let settled = settled.clone();
        let resolver = resolver.clone();

        input.subscribe(Box::new(move |result| {
            if settled.get() {
                return;
            }

            match result {
                Ok(value) => {
                    slots.borrow_mut()[index] = Some(value);
                    remaining.set(remaining.get() - 1);

                    if remaining.get() == 0 {
                        settled.set(true);
                        let values = slots.borrow_mut().drain(..).flatten().collect();
                        resolver.resolve(values);
                    }
                }
                Err(error) => {
                    settled.set(true);
                    for (other_index, other) in inputs.iter().enumerate() {
                        if other_index != index {
                            other.cancel(error.clone());
                        }
                    }
                    resolver.reject(error);
                }
            }
        }));
    }

    attach_input_cancel(&promise, &inputs, &settled);
    promise
}

/// Fulfils with the first fulfilment, cancelling the rest. If every
/// input rejects, rejects with [`Error::MultiReason`] carrying the
/// reasons in input order.
pub fn any<T, I>(inputs: I) -> Promise<T>
where
    T: Clone + 'static,
    I: IntoIterator<Item = Promise<T>>,
{
    let inputs: Rc<Vec<Promise<T>>> = Rc::new(inputs.into_iter().collect());

    if inputs.is_empty() {
        return Promise::rejected(Error::MultiReason(Vec::new()));
    }

    let (promise, resolver) = Promise::pending();
    let remaining = Rc::new(Cell::new(inputs.len()));
    let reasons: Rc<RefCell<Vec<Option<Error>>>> =
        Rc::new(RefCell::new((0..inputs.len()).map(|_| None).collect()));
    let settled = Rc::new(Cell::new(false));

    for (index, input) in inputs.iter().enumerate() {
        let inputs = inputs.clone();
        let remaining = remaining.clone();
        let reasons = reasons.clone();
        let settled = settled.clone();
        let resolver = resolver.clone();

        input.subscribe(Box::new(move |result| {
            if settled.get() {
                return;
            }

            match result {
                Ok(value) => {
                    settled.set(true);
                    for (other_index, other) in inputs.iter().enumerate() {
                        if other_index != index {
                            other.cancel(Error::cancelled());
                        }
                    }
                    resolver.resolve(value);
                }
                Err(error) => {
                    reasons.borrow_mut()[index] = Some(error);
                    remaining.set(remaining.get() - 1);

                    if remaining.get() == 0 {
                        settled.set(true);
                        let reasons = reasons.borrow_mut().drain(..).flatten().collect();
                        resolver.reject(Error::MultiReason(reasons));
                    }
                }
            }
        }));
    }

    attach_input_cancel(&promise, &inputs, &settled);
    promise
}

/// Settles like the first input to settle, fulfilment or rejection, and
/// cancels the rest.
pub fn choose<T, I>(inputs: I) -> Promise<T>
where
    T: Clone + 'static,
    I: IntoIterator<Item = Promise<T>>,
{
    let inputs: Rc<Vec<Promise<T>>> = Rc::new(inputs.into_iter().collect());

    if inputs.is_empty() {
        return Promise::rejected(Error::Logic("choose over no awaitables".into()));
    }

    let (promise, resolver) = Promise::pending();
    let settled = Rc::new(Cell::new(false));

    for (index, input) in inputs.iter().enumerate() {
        let inputs = inputs.clone();
        let settled = settled.clone();
        let resolver = resolver.clone();

        input.subscribe(Box::new(move |result| {
            if settled.get() {
                return;
            }
            settled.set(true);

            for (other_index, other) in inputs.iter().enumerate() {
                if other_index != index {
                    other.cancel(Error::cancelled());
                }
            }

            match result {
                Ok(value) => resolver.resolve(value),
                Err(error) => resolver.reject(error),
            }
        }));
    }

    attach_input_cancel(&promise, &inputs, &settled);
    promise
}

/// Resolves with every input's settlement, fulfilled or rejected, in
/// input order. Never rejects.
pub fn settle<T, I>(inputs: I) -> Promise<Vec<Result<T, Error>>>
where
    T: Clone + 'static,
    I: IntoIterator<Item = Promise<T>>,
{
    let inputs: Vec<Promise<T>> = inputs.into_iter().collect();

    if inputs.is_empty() {
        return Promise::resolved(Vec::new());
    }

    let (promise, resolver) = Promise::pending();
    let remaining = Rc::new(Cell::new(inputs.len()));
    let slots: Rc<RefCell<Vec<Option<Result<T, Error>>>>> =
        Rc::new(RefCell::new((0..inputs.len()).map(|_| None).collect()));

    for (index, input) in inputs.iter().enumerate() {
        let remaining = remaining.clone();
        let slots = slots.clone();
        let resolver = resolver.clone();

        input.subscribe(Box::new(move |result| {
            slots.borrow_mut()[index] = Some(result);
            remaining.set(remaining.get() - 1);

            if remaining.get() == 0 {
                let settlements = slots.borrow_mut().drain(..).flatten().collect();
                resolver.resolve(settlements);
            }
        }));
    }

    promise
}

/// Applies `transform` to every fulfilment value, resolving with the
/// transformed values in input order. Rejections behave as in [`all`].
pub fn map<T, U, I, F>(inputs: I, transform: F) -> Promise<Vec<U>>
where
    T: Clone + 'static,
    U: Clone + 'static,
    I: IntoIterator<Item = Promise<T>>,
    F: Fn(T) -> Result<U, Error> + 'static,
{
    let inputs: Rc<Vec<Promise<T>>> = Rc::new(inputs.into_iter().collect());

    if inputs.is_empty() {
        return Promise::resolved(Vec::new());
    }

    let (promise, resolver) = Promise::pending();
    let transform = Rc::new(transform);
    let remaining = Rc::new(Cell::new(inputs.len()));
    let slots: Rc<RefCell<Vec<Option<U>>>> =
        Rc::new(RefCell::new((0..inputs.len()).map(|_| None).collect()));
    let settled = Rc::new(Cell::new(false));

    for (index, input) in inputs.iter().enumerate() {
        let inputs = inputs.clone();
        let transform = transform.clone();
        let remaining = remaining.clone();
        let slots = slots.clone();
        let settled = settled.clone();
        let resolver = resolver.clone();

        input.subscribe(Box::new(move |result| {
            if settled.get() {
                return;
            }

            let transformed = result.and_then(|value| transform(value));

            match transformed {
                Ok(value) => {
                    slots.borrow_mut()[index] = Some(value);
                    remaining.set(remaining.get() - 1);

                    if remaining.get() == 0 {
                        settled.set(true);
                        let values = slots.borrow_mut().drain(..).flatten().collect();
                        resolver.resolve(values);
                    }
                }
                Err(error) => {
                    settled.set(true);
                    for (other_index, other) in inputs.iter().enumerate() {
                        if other_index != index {
                            other.cancel(error.clone());
                        }
                    }
                    resolver.reject(error);
                }
            }
        }));
    }

    attach_input_cancel(&promise, &inputs, &settled);
    promise
}

/// Folds the inputs strictly left to right, awaiting each element before
/// applying `fold`, which may itself return `Outcome::Chain`.
pub fn reduce<T, A, I, F>(inputs: I, fold: F, initial: A) -> Promise<A>
where
    T: Clone + 'static,
    A: Clone + 'static,
    I: IntoIterator<Item = Promise<T>>,
    F: FnMut(A, T) -> Result<Outcome<A>, Error> + 'static,
{
    let queue: Rc<RefCell<VecDeque<Promise<T>>>> =
        Rc::new(RefCell::new(inputs.into_iter().collect()));
    let fold = Rc::new(RefCell::new(fold));
    // The element in flight is sometimes a Promise<T> input and sometimes
    // a Promise<A> chained accumulator, so cancellation is type erased.
    let in_flight: InFlight = Rc::new(RefCell::new(None));

    let (promise, resolver) = Promise::pending();

    {
        let in_flight = in_flight.clone();
        promise.set_cancel(move |reason| {
            if let Some(cancel) = in_flight.borrow_mut().take() {
                cancel(reason);
            }
        });
    }

    reduce_step(queue, fold, in_flight, resolver, initial);
    promise
}

type InFlight = Rc<RefCell<Option<Box<dyn FnOnce(Error)>>>>;

fn watch_in_flight<T: Clone + 'static>(in_flight: &InFlight, promise: &Promise<T>) {
    let promise = promise.clone();
    *in_flight.borrow_mut() = Some(Box::new(move |reason| promise.cancel(reason)));
}

fn reduce_step<T, A, F>(
    queue: Rc<RefCell<VecDeque<Promise<T>>>>,
    fold: Rc<RefCell<F>>,
    in_flight: InFlight,
    resolver: Resolver<A>,
    accumulator: A,
) where
    T: Clone + 'static,
    A: Clone + 'static,
    F: FnMut(A, T) -> Result<Outcome<A>, Error> + 'static,
{
    let next = queue.borrow_mut().pop_front();

    let Some(input) = next else {
        resolver.resolve(accumulator);
        return;
    };

    watch_in_flight(&in_flight, &input);

    input.subscribe(Box::new(move |result| {
        in_flight.borrow_mut().take();

        let value = match result {
            Ok(value) => value,
            Err(error) => {
                resolver.reject(error);
                return;
            }
        };

        let folded = (fold.borrow_mut())(accumulator, value);

        match folded {
            Err(error) => resolver.reject(error),
            Ok(Outcome::Value(accumulator)) => {
                reduce_step(queue, fold, in_flight, resolver, accumulator);
            }
            Ok(Outcome::Chain(pending)) => {
                watch_in_flight(&in_flight, &pending);
                let in_flight = in_flight.clone();

                pending.subscribe(Box::new(move |result| {
                    in_flight.borrow_mut().take();

                    match result {
                        Ok(accumulator) => {
                            reduce_step(queue, fold, in_flight, resolver, accumulator)
                        }
                        Err(error) => resolver.reject(error),
                    }
                }));
            }
        }
    }));
}

/// Applies `worker` to the value while `predicate` holds, resolving with
/// the first value that fails the predicate. Each plain-value step is
/// re-scheduled through the deferred queue, so long chains cooperate
/// with the loop instead of recursing.
pub fn iterate<T, P, W>(seed: T, predicate: P, worker: W) -> Promise<T>
where
    T: Clone + 'static,
    P: Fn(&T) -> bool + 'static,
    W: FnMut(T) -> Result<Outcome<T>, Error> + 'static,
{
    let predicate = Rc::new(predicate);
    let worker = Rc::new(RefCell::new(worker));
    let in_flight: Rc<RefCell<Option<Promise<T>>>> = Rc::new(RefCell::new(None));

    let (promise, resolver) = Promise::pending();

    {
        let in_flight = in_flight.clone();
        promise.set_cancel(move |reason| {
            if let Some(current) = in_flight.borrow_mut().take() {
                current.cancel(reason);
            }
        });
    }

    iterate_step(predicate, worker, in_flight, resolver, seed);
    promise
}

fn iterate_step<T, P, W>(
    predicate: Rc<P>,
    worker: Rc<RefCell<W>>,
    in_flight: Rc<RefCell<Option<Promise<T>>>>,
    resolver: Resolver<T>,
    value: T,
) where
    T: Clone + 'static,
    P: Fn(&T) -> bool + 'static,
    W: FnMut(T) -> Result<Outcome<T>, Error> + 'static,
{
    if !predicate(&value) {
        resolver.resolve(value);
        return;
    }

    let produced = (worker.borrow_mut())(value);

    match produced {
        Err(error) => resolver.reject(error),
        Ok(Outcome::Value(next)) => {
            context::current().queue(move || {
                iterate_step(predicate, worker, in_flight, resolver, next);
            });
        }
        Ok(Outcome::Chain(pending)) => {
            *in_flight.borrow_mut() = Some(pending.clone());
            let in_flight_next = in_flight.clone();

            pending.subscribe(Box::new(move |result| {
                in_flight_next.borrow_mut().take();

                match result {
                    Ok(next) => iterate_step(predicate, worker, in_flight_next, resolver, next),
                    Err(error) => resolver.reject(error),
                }
            }));
        }
    }
}

/// Runs attempts from `factory` until one fulfils. After a rejection,
/// `classify` decides whether to retry (`Ok(true)`), give up with the
/// attempt's error (`Ok(false)`), or give up with its own error.
pub fn retry<T, F, R>(factory: F, classify: R) -> Promise<T>
where
    T: Clone + 'static,
    F: FnMut() -> Promise<T> + 'static,
    R: FnMut(&Error) -> Result<bool, Error> + 'static,
{
    let factory = Rc::new(RefCell::new(factory));
    let classify = Rc::new(RefCell::new(classify));
    let in_flight: Rc<RefCell<Option<Promise<T>>>> = Rc::new(RefCell::new(None));

    let (promise, resolver) = Promise::pending();

    {
        let in_flight = in_flight.clone();
        promise.set_cancel(move |reason| {
            if let Some(current) = in_flight.borrow_mut().take() {
                current.cancel(reason);
            }
        });
    }

    retry_attempt(factory, classify, in_flight, resolver);
    promise
}

fn retry_attempt<T, F, R>(
    factory: Rc<RefCell<F>>,
    classify: Rc<RefCell<R>>,
    in_flight: Rc<RefCell<Option<Promise<T>>>>,
    resolver: Resolver<T>,
) where
    T: Clone + 'static,
    F: FnMut() -> Promise<T> + 'static,
    R: FnMut(&Error) -> Result<bool, Error> + 'static,
{
    let attempt = (factory.borrow_mut())();
    *in_flight.borrow_mut() = Some(attempt.clone());

    let in_flight_next = in_flight.clone();
    attempt.subscribe(Box::new(move |result| {
        in_flight_next.borrow_mut().take();

        match result {
            Ok(value) => resolver.resolve(value),
            Err(error) => {
                let outcome = (classify.borrow_mut())(&error);
                match outcome {
                    Ok(true) => {
                        context::current().queue(move || {
                            retry_attempt(factory, classify, in_flight_next, resolver);
                        });
                    }
                    Ok(false) => resolver.reject(error),
                    Err(overriding) => resolver.reject(overriding),
                }
            }
        }
    }));
}

/// Cancelling a combinator result withdraws interest from every input
/// that has not settled the race yet.
fn attach_input_cancel<T, U>(
    promise: &Promise<U>,
    inputs: &Rc<Vec<Promise<T>>>,
    settled: &Rc<Cell<bool>>,
) where
    T: Clone + 'static,
    U: Clone + 'static,
{
    let inputs = inputs.clone();
    let settled = settled.clone();

    promise.set_cancel(move |reason| {
        if settled.get() {
            return;
        }
        settled.set(true);

        for input in inputs.iter() {
            input.cancel(reason.clone());
        }
    });
}
