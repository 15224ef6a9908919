//! Single-assignment awaitables with composable continuations.
//!
//! A [`Promise`] is a cell that settles exactly once, to a value or to an
//! [`Error`]. Continuations attached with [`then`](Promise::then) and
//! friends always run through the loop's deferred queue, never inside the
//! `resolve`/`reject` call that settled the promise, so user callbacks
//! are never re-entered.
//!
//! Cancellation is reference counted: a promise only truly cancels once
//! every `then`-child has cancelled, at which point its cancel handler
//! runs and the promise rejects with the reason. [`done`](Promise::done)
//! attaches terminal callbacks without creating a child, so a `done`
//! chain pins its upstream.
//!
//! # Example
//!
//! ```ignore
//! use eddy::{facade, Promise, Outcome};
//! use std::time::Duration;
//!
//! let greeting = Promise::resolved("hello".to_string())
//!     .delay(Duration::from_millis(10))
//!     .and_then(|s| Ok(Outcome::Value(format!("{s} world"))));
//!
//! greeting.done_ok(|s| println!("{s}"));
//! facade::run().unwrap();
//! ```

mod combinators;
mod time;

pub use combinators::{all, any, choose, iterate, map, reduce, retry, settle};

use crate::error::Error;
use crate::runtime::context;

use std::cell::RefCell;
use std::rc::Rc;

/// What a continuation or executor hands back: a plain value, or another
/// promise for the downstream to adopt.
pub enum Outcome<T> {
    Value(T),
    Chain(Promise<T>),
}

enum State<T> {
    Pending,
    Fulfilled(T),
    Rejected(Error),
}

type Continuation<T> = Box<dyn FnOnce(Result<T, Error>)>;
type CancelHandler = Box<dyn FnOnce(Error)>;

struct Inner<T> {
    state: State<T>,
    continuations: Vec<Continuation<T>>,
    on_cancel: Option<CancelHandler>,
    /// Number of `then`-children still depending on this promise.
    children: usize,
    /// Set while this promise has resolved to another promise and is
    /// waiting for it to settle.
    adopted: Option<Promise<T>>,
}

/// Single-assignment awaitable value.
pub struct Promise<T> {
    inner: Rc<RefCell<Inner<T>>>,
}

impl<T> Clone for Promise<T> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

/// Settlement handle handed to executors.
///
/// Clones share the same promise; only the first settlement wins, the
/// rest are no-ops.
pub struct Resolver<T> {
    promise: Promise<T>,
}

impl<T> Clone for Resolver<T> {
    fn clone(&self) -> Self {
        Self {
            promise: self.promise.clone(),
        }
    }
}

impl<T: Clone + 'static> Resolver<T> {
    /// Fulfils the promise with `value`.
    pub fn resolve(&self, value: T) {
        self.promise.deliver(Outcome::Value(value));
    }

    /// Resolves the promise with another promise, adopting its eventual
    /// state.
    pub fn chain(&self, other: Promise<T>) {
        self.promise.deliver(Outcome::Chain(other));
    }

    pub fn deliver(&self, outcome: Outcome<T>) {
        self.promise.deliver(outcome);
    }

    /// Rejects the promise with `error`.
    pub fn reject(&self, error: Error) {
        self.promise.complete(Err(error));
    }
}

impl<T: Clone + 'static> Promise<T> {
    /// A pending promise and its resolver.
    pub fn pending() -> (Promise<T>, Resolver<T>) {
        let promise = Promise {
            inner: Rc::new(RefCell::new(Inner {
                state: State::Pending,
                continuations: Vec::new(),
                on_cancel: None,
                children: 0,
                adopted: None,
            })),
        };
        let resolver = Resolver {
            promise: promise.clone(),
        };

        (promise, resolver)
    }

    /// Runs `executor` synchronously with the resolver; an `Err` return
    /// rejects the promise immediately.
    pub fn new(executor: impl FnOnce(Resolver<T>) -> Result<(), Error>) -> Promise<T> {
        let (promise, resolver) = Promise::pending();

        if let Err(error) = executor(resolver.clone()) {
            resolver.reject(error);
        }

        promise
    }

    /// Like [`new`](Promise::new), with a cancel handler that runs when
    /// the last downstream interest cancels.
    pub fn with_cancel(
        executor: impl FnOnce(Resolver<T>) -> Result<(), Error>,
        on_cancel: impl FnOnce(Error) + 'static,
    ) -> Promise<T> {
        let (promise, resolver) = Promise::pending();
        promise.set_cancel(on_cancel);

        if let Err(error) = executor(resolver.clone()) {
            resolver.reject(error);
        }

        promise
    }

    pub fn resolved(value: T) -> Promise<T> {
        let (promise, resolver) = Promise::pending();
        resolver.resolve(value);
        promise
    }

    pub fn rejected(error: Error) -> Promise<T> {
        let (promise, resolver) = Promise::pending();
        resolver.reject(error);
        promise
    }

    pub fn is_pending(&self) -> bool {
        matches!(self.inner.borrow().state, State::Pending)
    }

    pub fn is_fulfilled(&self) -> bool {
        matches!(self.inner.borrow().state, State::Fulfilled(_))
    }

    pub fn is_rejected(&self) -> bool {
        matches!(self.inner.borrow().state, State::Rejected(_))
    }

    /// Non-blocking result access: the value if fulfilled, the rejection
    /// error if rejected, and a logic error while still pending.
    pub fn result(&self) -> Result<T, Error> {
        match &self.inner.borrow().state {
            State::Pending => Err(Error::Logic("awaitable is still pending".into())),
            State::Fulfilled(value) => Ok(value.clone()),
            State::Rejected(error) => Err(error.clone()),
        }
    }

    /// Attaches a continuation. Settled promises dispatch through the
    /// deferred queue as well, so the continuation never runs inside this
    /// call.
    pub(crate) fn subscribe(&self, continuation: Continuation<T>) {
        if matches!(self.inner.borrow().state, State::Pending) {
            self.inner.borrow_mut().continuations.push(continuation);
            return;
        }

        let result = match &self.inner.borrow().state {
            State::Fulfilled(value) => Ok(value.clone()),
            State::Rejected(error) => Err(error.clone()),
            State::Pending => unreachable!(),
        };

        context::current().queue(move || continuation(result));
    }

    /// Chains both settlement paths into a new promise.
    ///
    /// Either callback may return `Outcome::Chain` to keep the chain
    /// asynchronous. Cancelling the returned promise propagates upstream
    /// once every sibling has cancelled too.
    pub fn then<U, F, R>(&self, on_fulfilled: F, on_rejected: R) -> Promise<U>
    where
        U: Clone + 'static,
        F: FnOnce(T) -> Result<Outcome<U>, Error> + 'static,
        R: FnOnce(Error) -> Result<Outcome<U>, Error> + 'static,
    {
        let (child, resolver) = Promise::pending();

        {
            let upstream = self.clone();
            child.set_cancel(move |reason| upstream.cancel(reason));
        }
        self.inner.borrow_mut().children += 1;

        self.subscribe(Box::new(move |result| {
            let outcome = match result {
                Ok(value) => on_fulfilled(value),
                Err(error) => on_rejected(error),
            };

            match outcome {
                Ok(outcome) => resolver.deliver(outcome),
                Err(error) => resolver.reject(error),
            }
        }));

        child
    }

    /// Chains the fulfilment path; rejections pass through untouched.
    pub fn and_then<U, F>(&self, on_fulfilled: F) -> Promise<U>
    where
        U: Clone + 'static,
        F: FnOnce(T) -> Result<Outcome<U>, Error> + 'static,
    {
        self.then(on_fulfilled, Err)
    }

    /// Chains the rejection path; fulfilments pass through untouched.
    pub fn or_else<R>(&self, on_rejected: R) -> Promise<T>
    where
        R: FnOnce(Error) -> Result<Outcome<T>, Error> + 'static,
    {
        self.then(|value| Ok(Outcome::Value(value)), on_rejected)
    }

    /// Terminal observation of both settlement paths. No child promise
    /// is created, so the upstream can no longer be cancelled through
    /// this chain.
    pub fn done<F, R>(&self, on_fulfilled: F, on_rejected: R)
    where
        F: FnOnce(T) + 'static,
        R: FnOnce(Error) + 'static,
    {
        self.subscribe(Box::new(move |result| match result {
            Ok(value) => on_fulfilled(value),
            Err(error) => on_rejected(error),
        }));
    }

    /// Terminal observation of fulfilment only; a rejection becomes an
    /// uncaught-error report on the loop.
    pub fn done_ok<F>(&self, on_fulfilled: F)
    where
        F: FnOnce(T) + 'static,
    {
        self.subscribe(Box::new(move |result| match result {
            Ok(value) => on_fulfilled(value),
            Err(error) => context::current().report_uncaught(Error::Uncaught(Box::new(error))),
        }));
    }

    /// Terminal observation of rejection only.
    pub fn done_err<R>(&self, on_rejected: R)
    where
        R: FnOnce(Error) + 'static,
    {
        self.subscribe(Box::new(move |result| {
            if let Err(error) = result {
                on_rejected(error);
            }
        }));
    }

    /// Withdraws this downstream's interest. When the last interested
    /// party has cancelled, the cancel handler runs with `reason`, any
    /// adopted promise is cancelled too, and the promise rejects with
    /// `reason` if the handler left it pending. Settled promises ignore
    /// cancellation.
    pub fn cancel(&self, reason: Error) {
        let (handler, adopted) = {
            let mut inner = self.inner.borrow_mut();

            if !matches!(inner.state, State::Pending) {
                return;
            }

            if inner.children > 0 {
                inner.children -= 1;
                if inner.children > 0 {
                    return;
                }
            }

            (inner.on_cancel.take(), inner.adopted.take())
        };

        if let Some(adopted) = adopted {
            adopted.cancel(reason.clone());
        }

        if let Some(handler) = handler {
            handler(reason.clone());
        }

        self.complete(Err(reason));
    }

    /// [`cancel`](Promise::cancel) with the default cancellation reason.
    pub fn cancel_default(&self) {
        self.cancel(Error::cancelled());
    }

    /// Installs the cancel handler; ignored once settled.
    pub(crate) fn set_cancel(&self, handler: impl FnOnce(Error) + 'static) {
        let mut inner = self.inner.borrow_mut();

        if matches!(inner.state, State::Pending) {
            inner.on_cancel = Some(Box::new(handler));
        }
    }

    fn deliver(&self, outcome: Outcome<T>) {
        match outcome {
            Outcome::Value(value) => self.complete(Ok(value)),
            Outcome::Chain(other) => {
                if Rc::ptr_eq(&other.inner, &self.inner) {
                    self.complete(Err(Error::Logic("awaitable resolved with itself".into())));
                    return;
                }

                {
                    let mut inner = self.inner.borrow_mut();
                    if !matches!(inner.state, State::Pending) {
                        return;
                    }
                    inner.adopted = Some(other.clone());
                }

                let target = self.clone();
                other.subscribe(Box::new(move |result| target.complete(result)));
            }
        }
    }

    /// Settles the promise. The settlement slots are cleared so the
    /// promise no longer owns its continuations, cancel handler, or
    /// adopted upstream once it has a state.
    fn complete(&self, result: Result<T, Error>) {
        let continuations = {
            let mut inner = self.inner.borrow_mut();

            if !matches!(inner.state, State::Pending) {
                return;
            }

            inner.state = match result.clone() {
                Ok(value) => State::Fulfilled(value),
                Err(error) => State::Rejected(error),
            };
            inner.on_cancel = None;
            inner.adopted = None;

            std::mem::take(&mut inner.continuations)
        };

        if continuations.is_empty() {
            return;
        }

        let scheduler = context::current();
        for continuation in continuations {
            let result = result.clone();
            scheduler.queue(move || continuation(result));
        }
    }
}
