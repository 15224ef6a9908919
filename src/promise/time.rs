//! Delay and timeout adapters over loop timers.

use crate::error::Error;
use crate::promise::{Outcome, Promise};
use crate::runtime::context;

use std::cell::RefCell;
use std::rc::Rc;
use std::time::Duration;

/// A promise that fulfils with `value` once `duration` has elapsed.
/// Cancelling it stops the timer.
pub(crate) fn settled_after<T: Clone + 'static>(duration: Duration, value: T) -> Promise<T> {
    let (promise, resolver) = Promise::pending();

    let mut slot = Some(value);
    let timer = context::current().timer(duration, move || {
        if let Some(value) = slot.take() {
            resolver.resolve(value);
        }
    });

    promise.set_cancel(move |_reason| timer.stop());
    promise
}

impl<T: Clone + 'static> Promise<T> {
    /// Re-delivers the fulfilment value `duration` after the upstream
    /// fulfils. Rejections are forwarded without the delay. Cancelling
    /// the result stops the timer and withdraws interest upstream.
    pub fn delay(&self, duration: Duration) -> Promise<T> {
        self.and_then(move |value| Ok(Outcome::Chain(settled_after(duration, value))))
    }

    /// [`timeout_with`](Promise::timeout_with) using [`Error::Timeout`].
    pub fn timeout(&self, duration: Duration) -> Promise<T> {
        self.timeout_with(duration, Error::Timeout)
    }

    /// Races the upstream against a timer started now. If the upstream
    /// settles first its state is forwarded; if the timer fires first the
    /// result rejects with `reason` and the upstream is cancelled with
    /// the same reason.
    ///
    /// The adapter subscribes through a `then`-derived child, so the
    /// upstream sees it as one more downstream: cancellation out of this
    /// adapter withdraws exactly the interest it registered, and other
    /// chains hanging off the same upstream keep theirs.
    pub fn timeout_with(&self, duration: Duration, reason: Error) -> Promise<T> {
        let (result, resolver) = Promise::pending();
        let forwarded_slot: Rc<RefCell<Option<Promise<T>>>> = Rc::new(RefCell::new(None));

        let timer = context::current().timer(duration, {
            let resolver = resolver.clone();
            let forwarded_slot = forwarded_slot.clone();
            move || {
                resolver.reject(reason.clone());
                if let Some(forwarded) = forwarded_slot.borrow_mut().take() {
                    forwarded.cancel(reason.clone());
                }
            }
        });

        let forwarded = self.then(
            {
                let resolver = resolver.clone();
                let timer = timer.clone();
                move |value| {
                    timer.stop();
                    resolver.resolve(value.clone());
                    Ok(Outcome::Value(value))
                }
            },
            {
                let timer = timer.clone();
                move |error| {
                    timer.stop();
                    resolver.reject(error.clone());
                    Err(error)
                }
            },
        );
        *forwarded_slot.borrow_mut() = Some(forwarded);

        result.set_cancel(move |reason| {
            timer.stop();
            if let Some(forwarded) = forwarded_slot.borrow_mut().take() {
                forwarded.cancel(reason);
            }
        });

        result
    }
}
